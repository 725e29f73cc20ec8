use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "mpgpuctl")]
#[command(version, about = "mpgpu scaling daemon control CLI")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    #[arg(short, long, global = true)]
    pub socket: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    Status,
    Ping,
    Reload,

    GetMode,
    SetMode {
        #[arg(value_enum)]
        mode: Mode,
    },

    /// Show the lower and upper frequency step bounds
    GetBounds,
    SetMinFreq {
        step: usize,
    },
    SetMaxFreq {
        step: usize,
    },
    SetMinCores {
        cores: u32,
    },
    SetMaxCores {
        cores: u32,
    },

    GetFreq,
    /// Program a frequency step immediately, bypassing the policy
    SetFreq {
        step: usize,
    },

    Preheat,
    Flush,
    DomainStat,

    Suspend {
        #[arg(value_enum, default_value = "light")]
        phase: Phase,
    },
    Resume {
        #[arg(value_enum, default_value = "light")]
        phase: Phase,
    },

    SetLog {
        #[arg(value_enum)]
        level: LogLevel,
    },
}

#[derive(Clone, ValueEnum)]
pub enum Mode {
    CoreOnly,
    FreqCore,
    Disabled,
    Turbo,
}

impl Mode {
    pub fn to_upper_str(&self) -> &'static str {
        match self {
            Self::CoreOnly => "CORE_ONLY",
            Self::FreqCore => "FREQ_CORE",
            Self::Disabled => "DISABLED",
            Self::Turbo => "TURBO",
        }
    }
}

#[derive(Clone, ValueEnum)]
pub enum Phase {
    Light,
    Deep,
}

impl Phase {
    pub fn to_upper_str(&self) -> &'static str {
        match self {
            Self::Light => "LIGHT",
            Self::Deep => "DEEP",
        }
    }
}

#[derive(Clone, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_upper_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}
