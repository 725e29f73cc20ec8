use crate::common::LogLevel;
use crate::core::scaling::ScalingMode;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPhase {
    Light,
    Deep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Ping,
    Quit,
    Status,
    GetMode,
    SetMode(ScalingMode),
    GetMinFreq,
    SetMinFreq(usize),
    GetMaxFreq,
    SetMaxFreq(usize),
    GetMinPp,
    SetMinPp(u32),
    GetMaxPp,
    SetMaxPp(u32),
    GetFreq,
    SetFreq(usize),
    Preheat,
    Flush,
    DomainStat,
    Suspend(PowerPhase),
    Resume(PowerPhase),
    Reload,
    SetLog(LogLevel),
}

fn parse_phase(s: &str) -> Option<PowerPhase> {
    match s.to_uppercase().as_str() {
        "LIGHT" => Some(PowerPhase::Light),
        "DEEP" => Some(PowerPhase::Deep),
        _ => None,
    }
}

impl FromStr for Command {
    type Err = &'static str;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            ["HELP"] | ["?"] => Ok(Command::Help),
            ["PING"] => Ok(Command::Ping),
            ["QUIT"] => Ok(Command::Quit),
            ["STATUS"] => Ok(Command::Status),
            ["RELOAD"] => Ok(Command::Reload),
            ["PREHEAT"] => Ok(Command::Preheat),
            ["FLUSH"] => Ok(Command::Flush),
            ["DOMAIN_STAT"] | ["DOMAINSTAT"] => Ok(Command::DomainStat),

            ["GET_MODE"] | ["GETMODE"] => Ok(Command::GetMode),
            ["SET_MODE", mode] | ["SETMODE", mode] => mode
                .parse::<ScalingMode>()
                .map(Command::SetMode)
                .map_err(|_| "usage: SET_MODE <0-3|CORE_ONLY|FREQ_CORE|DISABLED|TURBO>"),

            ["GET_MIN_FREQ"] => Ok(Command::GetMinFreq),
            ["SET_MIN_FREQ", step] => step
                .parse()
                .map(Command::SetMinFreq)
                .map_err(|_| "usage: SET_MIN_FREQ <step>"),
            ["GET_MAX_FREQ"] => Ok(Command::GetMaxFreq),
            ["SET_MAX_FREQ", step] => step
                .parse()
                .map(Command::SetMaxFreq)
                .map_err(|_| "usage: SET_MAX_FREQ <step>"),

            ["GET_MIN_PP"] => Ok(Command::GetMinPp),
            ["SET_MIN_PP", n] => n
                .parse()
                .map(Command::SetMinPp)
                .map_err(|_| "usage: SET_MIN_PP <cores>"),
            ["GET_MAX_PP"] => Ok(Command::GetMaxPp),
            ["SET_MAX_PP", n] => n
                .parse()
                .map(Command::SetMaxPp)
                .map_err(|_| "usage: SET_MAX_PP <cores>"),

            ["GET_FREQ"] | ["GETFREQ"] => Ok(Command::GetFreq),
            ["SET_FREQ", step] | ["SETFREQ", step] => step
                .parse()
                .map(Command::SetFreq)
                .map_err(|_| "usage: SET_FREQ <step>"),

            ["SUSPEND", phase] => parse_phase(phase)
                .map(Command::Suspend)
                .ok_or("usage: SUSPEND <LIGHT|DEEP>"),
            ["RESUME", phase] => parse_phase(phase)
                .map(Command::Resume)
                .ok_or("usage: RESUME <LIGHT|DEEP>"),

            ["SETLOG", level] | ["SET_LOG", level] => level
                .parse::<LogLevel>()
                .map(Command::SetLog)
                .map_err(|_| "usage: SETLOG <DEBUG|INFO|WARN|ERROR>"),

            _ => Err("unknown command (try HELP)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("PING".parse::<Command>(), Ok(Command::Ping));
        assert_eq!("SET_MODE 3".parse::<Command>(), Ok(Command::SetMode(ScalingMode::Turbo)));
        assert_eq!(
            "SETMODE core_only".parse::<Command>(),
            Ok(Command::SetMode(ScalingMode::CoreCountOnly))
        );
        assert_eq!("SET_MIN_FREQ 2".parse::<Command>(), Ok(Command::SetMinFreq(2)));
        assert_eq!("SET_MAX_PP  1".parse::<Command>(), Ok(Command::SetMaxPp(1)));
        assert_eq!("SUSPEND deep".parse::<Command>(), Ok(Command::Suspend(PowerPhase::Deep)));
        assert_eq!("SETLOG warn".parse::<Command>(), Ok(Command::SetLog(LogLevel::Warn)));
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        assert!("SET_MODE 4".parse::<Command>().is_err());
        assert!("SET_MIN_FREQ -1".parse::<Command>().is_err());
        assert!("SET_FREQ".parse::<Command>().is_err());
        assert!("RESUME warm".parse::<Command>().is_err());
        assert!("FROB".parse::<Command>().is_err());
    }
}
