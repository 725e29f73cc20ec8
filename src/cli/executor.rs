use super::{app::*, client::IpcClient, output};
use crate::Result;
use crate::common::SOCKET_PATH;
use anyhow::bail;

pub async fn execute(cli: Cli) -> Result<()> {
    let socket = cli.socket.as_deref().unwrap_or(SOCKET_PATH);
    let client = IpcClient::with_path(socket);

    if !matches!(cli.command, Commands::Status) && !client.is_alive().await {
        bail!("Daemon is not running");
    }

    match cli.command {
        Commands::Status => {
            handle_status(&client).await?;
        }

        Commands::Ping => {
            if client.ping().await? {
                output::print_success("Daemon is alive (PONG)");
            } else {
                output::print_error("Daemon not responding");
            }
        }

        Commands::Reload => {
            let resp = client.send("RELOAD").await?;
            output::print_reply("Configuration reloaded", &resp);
        }

        Commands::GetMode => {
            let resp = client.send("GET_MODE").await?;
            println!("{}", resp);
        }

        Commands::SetMode { mode } => {
            let cmd = format!("SET_MODE {}", mode.to_upper_str());
            let resp = client.send(&cmd).await?;
            output::print_reply("Mode set", &resp);
        }

        Commands::GetBounds => {
            for cmd in ["GET_MIN_FREQ", "GET_MAX_FREQ", "GET_MIN_PP", "GET_MAX_PP"] {
                println!("{}", client.send(cmd).await?);
            }
        }

        Commands::SetMinFreq { step } => {
            let resp = client.send(&format!("SET_MIN_FREQ {}", step)).await?;
            output::print_reply("Minimum step set", &resp);
        }

        Commands::SetMaxFreq { step } => {
            let resp = client.send(&format!("SET_MAX_FREQ {}", step)).await?;
            output::print_reply("Maximum step set", &resp);
        }

        Commands::SetMinCores { cores } => {
            let resp = client.send(&format!("SET_MIN_PP {}", cores)).await?;
            output::print_reply("Minimum cores set", &resp);
        }

        Commands::SetMaxCores { cores } => {
            let resp = client.send(&format!("SET_MAX_PP {}", cores)).await?;
            output::print_reply("Maximum cores set", &resp);
        }

        Commands::GetFreq => {
            let resp = client.send("GET_FREQ").await?;
            println!("{}", resp);
        }

        Commands::SetFreq { step } => {
            let resp = client.send(&format!("SET_FREQ {}", step)).await?;
            output::print_reply("Frequency programmed", &resp);
        }

        Commands::Preheat => {
            let resp = client.send("PREHEAT").await?;
            output::print_reply("Preheat", &resp);
        }

        Commands::Flush => {
            let resp = client.send("FLUSH").await?;
            output::print_reply("Apply queue flushed", &resp);
        }

        Commands::DomainStat => {
            let resp = client.send("DOMAIN_STAT").await?;
            println!("{}", resp);
        }

        Commands::Suspend { phase } => {
            let resp = client
                .send(&format!("SUSPEND {}", phase.to_upper_str()))
                .await?;
            output::print_reply("Suspended", &resp);
        }

        Commands::Resume { phase } => {
            let resp = client
                .send(&format!("RESUME {}", phase.to_upper_str()))
                .await?;
            output::print_reply("Resumed", &resp);
        }

        Commands::SetLog { level } => {
            let cmd = format!("SETLOG {}", level.to_upper_str());
            let resp = client.send(&cmd).await?;
            output::print_reply("Log level set", &resp);
        }
    }

    Ok(())
}

async fn handle_status(client: &IpcClient) -> Result<()> {
    if !client.is_alive().await {
        output::print_daemon_stopped();
        return Ok(());
    }

    let response = client.send("STATUS").await?;
    output::print_status(&response);
    Ok(())
}
