//! The network side of the desktop process.
//!
//! The listener runs on its own tokio runtime; everything it produces is
//! forwarded as [`UiEvent`]s over a std channel to the thread that owns the
//! [`Coordinator`](crate::coordinator::Coordinator).

use std::{io, sync::mpsc::Sender};

use cmdbar_core::Command;
use cmdbar_listener::{CommandListener, ListenerConfig, ListenerError, ListenerStatus};
use tokio::{
    runtime::Runtime,
    sync::{mpsc, watch},
};
use tracing::{debug, info, warn};

use crate::coordinator::UiEvent;

#[derive(Debug)]
pub struct IngestionHandle {
    runtime: Runtime,
    listener: CommandListener,
}

impl IngestionHandle {
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn bound_port(&self) -> Option<u16> {
        self.listener.bound_port()
    }

    /// Blocks until the listener has closed its socket. Idempotent, and also
    /// effective while the listener is still binding.
    pub fn shutdown(&self) {
        self.runtime.block_on(self.listener.shutdown());
    }
}

/// Starts the listener in the background and wires its output to
/// `ui_event_tx`. Must be called outside of any tokio runtime.
pub fn spawn_ingestion(
    config: ListenerConfig,
    ui_event_tx: Sender<UiEvent>,
) -> io::Result<IngestionHandle> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("cmdbar-net")
        .enable_all()
        .build()?;

    let listener = CommandListener::new(config);
    let commands = listener.subscribe();
    let status = listener.status();

    runtime.spawn(forward_status(status, ui_event_tx.clone()));
    runtime.spawn(forward_commands(listener.clone(), commands, ui_event_tx));

    Ok(IngestionHandle { runtime, listener })
}

async fn forward_status(mut status: watch::Receiver<ListenerStatus>, ui_event_tx: Sender<UiEvent>) {
    loop {
        let current = status.borrow_and_update().to_string();
        if ui_event_tx.send(UiEvent::ListenerStatus(current)).is_err() {
            debug!("ui thread gone; status forwarding stopped");
            return;
        }
        if status.changed().await.is_err() {
            return;
        }
    }
}

async fn forward_commands(
    listener: CommandListener,
    mut commands: mpsc::UnboundedReceiver<Command>,
    ui_event_tx: Sender<UiEvent>,
) {
    match listener.start().await {
        Ok(port) => info!(port, "accepting commands"),
        Err(ListenerError::Stopped) => {
            debug!("shut down before the listener came up");
            return;
        }
        Err(err) => {
            warn!("no commands will be accepted: {err}");
            return;
        }
    }

    while let Some(command) = commands.recv().await {
        if ui_event_tx.send(UiEvent::CommandAccepted(command)).is_err() {
            debug!("ui thread gone; command forwarding stopped");
            break;
        }
    }
}
