//! The task runner's side of the wire: report a command to whichever port
//! the desktop process ended up on.

use std::time::Duration;

use cmdbar_core::{COMMAND_PATH, Command, EncodeError, MAX_PORT_ATTEMPTS, encode_command};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::debug;

/// Per-port budget; a live listener answers on loopback well within it.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("cannot build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("no listener accepted the command on ports {first}-{last}: {last_error}")]
    Unreachable {
        first: u16,
        last: u16,
        last_error: String,
    },
}

/// POSTs `command` to `base_port`, then to each fallback port the listener
/// may have shifted to. Returns the port that accepted it.
pub async fn send_command(host: &str, base_port: u16, command: &Command) -> Result<u16, NotifyError> {
    let body = encode_command(command)?;
    let client = reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .map_err(NotifyError::Client)?;

    let mut last = base_port;
    let mut last_error = String::from("no port attempted");
    for offset in 0..MAX_PORT_ATTEMPTS {
        let Some(port) = base_port.checked_add(offset) else {
            break;
        };
        last = port;

        let url = format!("http://{host}:{port}{COMMAND_PATH}");
        match client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.clone())
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(port, command_id = command.id, "command delivered");
                return Ok(port);
            }
            Ok(response) => {
                last_error = format!("port {port} answered {}", response.status());
            }
            Err(err) => {
                last_error = format!("port {port}: {err}");
            }
        }
        debug!(port, "{last_error}");
    }

    Err(NotifyError::Unreachable {
        first: base_port,
        last,
        last_error,
    })
}
