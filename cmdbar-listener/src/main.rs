use std::time::Duration;

use clap::{Parser, Subcommand};
use cmdbar_core::{Command, DEFAULT_PORT, MAX_PORT_ATTEMPTS};
use cmdbar_listener::{CommandListener, ListenerConfig, notify::send_command};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cmdbar-listener")]
struct ListenerArgs {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Run the command listener without a desktop front end.
    Serve {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long, default_value_t = MAX_PORT_ATTEMPTS)]
        max_port_attempts: u16,
    },
    /// Report a running command to a listener.
    Send {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long)]
        id: i64,
        #[arg(long)]
        text: String,
        #[arg(long, default_value_t = 0.0)]
        duration_secs: f64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match ListenerArgs::parse().action {
        Action::Serve {
            port,
            max_port_attempts,
        } => serve(ListenerConfig {
            port,
            max_port_attempts,
        })
        .await,
        Action::Send {
            host,
            port,
            id,
            text,
            duration_secs,
        } => {
            let Ok(duration) = Duration::try_from_secs_f64(duration_secs) else {
                error!("invalid duration: {duration_secs}");
                std::process::exit(2);
            };
            let command = Command::new(id, text, duration);
            match send_command(&host, port, &command).await {
                Ok(port) => info!(port, "command delivered"),
                Err(err) => {
                    error!("{err}");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn serve(config: ListenerConfig) {
    let listener = CommandListener::new(config);
    let mut commands = listener.subscribe();

    if let Err(err) = listener.start().await {
        error!("{err}");
        std::process::exit(1);
    }

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                info!(
                    command_id = command.id,
                    text = %command.text,
                    duration_secs = command.duration_seconds(),
                    "command accepted"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("cannot listen for ctrl-c: {err}");
                }
                break;
            }
        }
    }

    listener.shutdown().await;
}
