use super::commands::{Command, PowerPhase};
use super::server::IpcHandles;
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info};

const MAX_LINE: usize = 256;

const HELP: &str = "CMDS:
        - HELP | ?
        - PING
        - QUIT
        - STATUS
        - GET_MODE | SET_MODE <0-3|CORE_ONLY|FREQ_CORE|DISABLED|TURBO>
        - GET_MIN_FREQ | SET_MIN_FREQ <step>
        - GET_MAX_FREQ | SET_MAX_FREQ <step>
        - GET_MIN_PP | SET_MIN_PP <cores>
        - GET_MAX_PP | SET_MAX_PP <cores>
        - GET_FREQ | SET_FREQ <step>
        - PREHEAT
        - FLUSH
        - DOMAIN_STAT
        - SUSPEND <LIGHT|DEEP> | RESUME <LIGHT|DEEP>
        - RELOAD
        - SETLOG <DEBUG|INFO|WARN|ERROR>
 ";

fn ok_or_err<E: std::fmt::Display>(name: &str, r: std::result::Result<(), E>) -> String {
    match r {
        Ok(()) => format!("OK {}\n", name),
        Err(e) => format!("ERR {} {}\n", name, e),
    }
}

/// Runs one parsed command against the controller and renders the reply
pub async fn respond(cmd: Command, h: &IpcHandles) -> String {
    let ctl = &h.controller;
    match cmd {
        Command::Help => HELP.to_string(),
        Command::Ping => "PONG\n".into(),
        Command::Quit => "BYE\n".into(),
        Command::Status => {
            let log_level = h
                .current_log_level
                .read()
                .map(|l| l.to_upper_str())
                .unwrap_or("UNKNOWN");
            let status = serde_json::json!({
                "controller": ctl.status(),
                "domain_stat": h.power.domain_status(),
                "max_cooling_level": ctl.max_cooling_level(),
                "log_level": log_level,
            });
            format!("{}\n", status)
        }
        Command::GetMode => {
            let mode = ctl.mode();
            format!("MODE={} {}\n", mode.as_u32(), mode.to_upper_str())
        }
        Command::SetMode(mode) => {
            ctl.set_mode(mode);
            format!("OK SET_MODE {}\n", mode.to_upper_str())
        }
        Command::GetMinFreq => format!("MIN_FREQ={}\n", ctl.snapshot().min_step),
        Command::SetMinFreq(step) => ok_or_err("SET_MIN_FREQ", ctl.set_min_step(step)),
        Command::GetMaxFreq => format!("MAX_FREQ={}\n", ctl.snapshot().max_step),
        Command::SetMaxFreq(step) => ok_or_err("SET_MAX_FREQ", ctl.set_max_step(step)),
        Command::GetMinPp => format!("MIN_PP={}\n", ctl.snapshot().min_cores),
        Command::SetMinPp(n) => ok_or_err("SET_MIN_PP", ctl.set_min_cores(n)),
        Command::GetMaxPp => format!("MAX_PP={}\n", ctl.snapshot().cores_total),
        Command::SetMaxPp(n) => ok_or_err("SET_MAX_PP", ctl.set_max_cores(n)),
        Command::GetFreq => {
            let snap = ctl.snapshot();
            format!("FREQ={} STEP={}\n", ctl.get_current_frequency_value(), snap.current_step)
        }
        Command::SetFreq(step) => {
            // programs the clock synchronously; keep it off the runtime thread
            let ctl = ctl.clone();
            match tokio::task::spawn_blocking(move || ctl.set_frequency(step)).await {
                Ok(res) => ok_or_err("SET_FREQ", res),
                Err(e) => format!("ERR SET_FREQ {}\n", e),
            }
        }
        Command::Preheat => format!("OK PREHEAT changed={}\n", ctl.preheat()),
        Command::Flush => {
            ctl.flush().await;
            ctl.rearm();
            "OK FLUSH\n".into()
        }
        Command::DomainStat => format!("DOMAIN_STAT={:#x}\n", h.power.domain_status()),
        Command::Suspend(PowerPhase::Light) => ok_or_err("SUSPEND", h.power.light_suspend()),
        Command::Suspend(PowerPhase::Deep) => ok_or_err("SUSPEND", h.power.deep_suspend().await),
        Command::Resume(PowerPhase::Light) => ok_or_err("RESUME", h.power.light_resume()),
        Command::Resume(PowerPhase::Deep) => ok_or_err("RESUME", h.power.deep_resume()),
        Command::Reload => match (h.reload_fn)() {
            Ok(name) => format!("OK RELOADED {}\n", name),
            Err(e) => format!("ERR RELOAD {:#}\n", e),
        },
        Command::SetLog(lvl) => {
            (h.set_log_level)(lvl);
            format!("OK SET_LOG {}\n", lvl.to_upper_str())
        }
    }
}

/// Handle a single IPC client connection.
pub async fn handle_client(stream: UnixStream, h: IpcHandles) -> Result<()> {
    let (r, mut w) = stream.into_split();
    let mut reader = BufReader::new(r);
    let mut line = String::new();
    w.write_all(b"OK MPGPU IPC\n").await?;

    while reader.read_line(&mut line).await? > 0 {
        let s = line.trim();
        if s.len() > MAX_LINE {
            w.write_all(b"ERR input too long\n").await?;
            line.clear();
            continue;
        }

        let resp = match s.parse::<Command>() {
            Ok(Command::Quit) => {
                w.write_all(b"BYE\n").await?;
                break;
            }
            Ok(cmd) => {
                debug!(target: "mpgpu::ipc", "IPC command: {:?}", cmd);
                if matches!(cmd, Command::SetMode(_) | Command::SetFreq(_) | Command::Suspend(_) | Command::Resume(_)) {
                    info!(target: "mpgpu::ipc", "IPC {}", s);
                }
                respond(cmd, &h).await
            }
            Err(e) => format!("ERR {}\n", e),
        };
        w.write_all(resp.as_bytes()).await?;
        line.clear();
    }
    Ok(())
}
