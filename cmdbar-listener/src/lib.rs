use std::{
    fmt,
    future::Future,
    io, mem,
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use cmdbar_core::{
    COMMAND_PATH, Command, DEFAULT_PORT, DecodeError, FieldError, MAX_COMMAND_BODY_BYTES,
    MAX_PORT_ATTEMPTS, decode_command,
};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

pub mod notify;

/// How long shutdown waits for in-flight exchanges before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerStatus {
    Starting,
    /// `port` was taken; the fallback scan continues with the next one.
    PortInUse { port: u16 },
    Running { port: u16 },
    Failed { reason: String },
    Stopped,
}

impl ListenerStatus {
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, ListenerStatus::Failed { .. })
    }
}

impl fmt::Display for ListenerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerStatus::Starting => write!(f, "Starting..."),
            ListenerStatus::PortInUse { port } => {
                write!(f, "Port {port} in use, trying alternatives...")
            }
            ListenerStatus::Running { port } => write!(f, "Server running on port {port}"),
            ListenerStatus::Failed { reason } => write!(f, "Server failed: {reason}"),
            ListenerStatus::Stopped => write!(f, "Server stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Preferred port. `0` lets the OS choose.
    pub port: u16,
    /// Ports probed in total, the preferred one included.
    pub max_port_attempts: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_port_attempts: MAX_PORT_ATTEMPTS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("ports {first}-{last} are all in use")]
    PortsExhausted { first: u16, last: u16 },
    #[error("cannot bind port {port}: {source}")]
    BindFatal {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("cannot read bound address: {0}")]
    LocalAddr(#[source] io::Error),
    #[error("listener is already starting")]
    AlreadyStarting,
    #[error("listener has been shut down")]
    Stopped,
}

#[derive(Debug)]
struct RunningServer {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// `Stopped` is final: a listener that has been shut down never binds again,
/// even when the shutdown arrived while the port scan was still running.
#[derive(Debug)]
enum Lifecycle {
    Idle,
    Starting,
    Running {
        addr: SocketAddr,
        server: RunningServer,
    },
    Stopped,
}

#[derive(Debug)]
struct Shared {
    subscriber: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    status_tx: watch::Sender<ListenerStatus>,
    lifecycle: Mutex<Lifecycle>,
}

/// Router state: the single place decoded commands are handed to.
#[derive(Debug, Clone)]
pub struct ListenerState {
    inner: Arc<Shared>,
}

impl ListenerState {
    fn new() -> Self {
        let (status_tx, _) = watch::channel(ListenerStatus::Starting);
        Self {
            inner: Arc::new(Shared {
                subscriber: Mutex::new(None),
                status_tx,
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    fn deliver(&self, command: Command) {
        let subscriber = lock(&self.inner.subscriber);
        let command_id = command.id;
        match subscriber.as_ref() {
            Some(tx) => {
                if tx.send(command).is_err() {
                    warn!(command_id, "subscriber went away; command dropped");
                }
            }
            None => warn!(command_id, "no subscriber registered; command dropped"),
        }
    }

    fn publish(&self, status: ListenerStatus) {
        info!(status = %status, "listener status");
        self.inner.status_tx.send_replace(status);
    }

    fn is_stopped(&self) -> bool {
        matches!(*lock(&self.inner.lifecycle), Lifecycle::Stopped)
    }
}

/// Loopback HTTP endpoint that turns `POST /command` requests into
/// [`Command`]s for one subscriber.
#[derive(Debug, Clone)]
pub struct CommandListener {
    config: ListenerConfig,
    state: ListenerState,
}

impl CommandListener {
    #[must_use]
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            state: ListenerState::new(),
        }
    }

    pub fn config(&self) -> ListenerConfig {
        self.config
    }

    /// Registers the consumer of decoded commands.
    ///
    /// There is only ever one subscriber: registering again replaces the
    /// previous one, whose receiver then reports the channel closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        if lock(&self.state.inner.subscriber).replace(tx).is_some() {
            debug!("replacing previous command subscriber");
        }
        rx
    }

    pub fn status(&self) -> watch::Receiver<ListenerStatus> {
        self.state.inner.status_tx.subscribe()
    }

    /// Port currently bound, which may be past the configured one after a
    /// fallback scan.
    pub fn bound_port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*lock(&self.state.inner.lifecycle) {
            Lifecycle::Running { addr, .. } => Some(*addr),
            _ => None,
        }
    }

    /// Binds and starts serving in the background. Returns the bound port.
    ///
    /// Calling it again once running returns the same port. A second call
    /// while the first one is still scanning ports fails with
    /// [`ListenerError::AlreadyStarting`].
    pub async fn start(&self) -> Result<u16, ListenerError> {
        self.start_with(|port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)))
            .await
    }

    async fn start_with<F, Fut>(&self, bind: F) -> Result<u16, ListenerError>
    where
        F: FnMut(u16) -> Fut,
        Fut: Future<Output = io::Result<TcpListener>>,
    {
        {
            let mut lifecycle = lock(&self.state.inner.lifecycle);
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Starting,
                Lifecycle::Starting => return Err(ListenerError::AlreadyStarting),
                Lifecycle::Running { addr, .. } => return Ok(addr.port()),
                Lifecycle::Stopped => return Err(ListenerError::Stopped),
            }
            self.state.publish(ListenerStatus::Starting);
        }

        let bound = match bind_with_fallback(self.config, &self.state, bind).await {
            Ok(listener) => listener
                .local_addr()
                .map(|addr| (listener, addr))
                .map_err(ListenerError::LocalAddr),
            Err(err) => Err(err),
        };

        let mut lifecycle = lock(&self.state.inner.lifecycle);
        if matches!(*lifecycle, Lifecycle::Stopped) {
            debug!("shut down while starting; releasing the socket");
            return Err(ListenerError::Stopped);
        }

        let (listener, addr) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                error!("listener failed to start: {err}");
                *lifecycle = Lifecycle::Idle;
                self.state.publish(ListenerStatus::Failed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = build_router(self.state.clone());
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = server.await {
                error!("listener exited: {err}");
            }
        });

        *lifecycle = Lifecycle::Running {
            addr,
            server: RunningServer { shutdown_tx, task },
        };
        self.state.publish(ListenerStatus::Running { port: addr.port() });
        Ok(addr.port())
    }

    /// Stops accepting and closes the socket. Safe to call more than once,
    /// and before or during [`CommandListener::start`].
    pub async fn shutdown(&self) {
        let previous = mem::replace(&mut *lock(&self.state.inner.lifecycle), Lifecycle::Stopped);
        let RunningServer {
            shutdown_tx,
            mut task,
        } = match previous {
            Lifecycle::Stopped => return,
            Lifecycle::Idle | Lifecycle::Starting => {
                self.state.publish(ListenerStatus::Stopped);
                return;
            }
            Lifecycle::Running { server, .. } => server,
        };

        let _ = shutdown_tx.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("in-flight connections still open after {SHUTDOWN_GRACE:?}; aborting");
            task.abort();
        }

        self.state.publish(ListenerStatus::Stopped);
    }
}

pub fn build_router(state: ListenerState) -> Router {
    Router::new()
        .route(COMMAND_PATH, post(command_handler).fallback(not_found_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_COMMAND_BODY_BYTES))
        .layer(middleware::map_response(close_connection))
        .with_state(state)
}

/// Tries `config.port` and the ports after it. Only `AddrInUse` moves the
/// scan on; the fallback is announced once, with the first port that was
/// taken.
async fn bind_with_fallback<F, Fut>(
    config: ListenerConfig,
    state: &ListenerState,
    mut bind: F,
) -> Result<TcpListener, ListenerError>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = io::Result<TcpListener>>,
{
    let first = config.port;
    let mut last = first;

    for offset in 0..config.max_port_attempts.max(1) {
        let Some(port) = first.checked_add(offset) else {
            break;
        };
        if state.is_stopped() {
            return Err(ListenerError::Stopped);
        }
        last = port;

        match bind(port).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                warn!(port, "port already in use");
                if offset == 0 {
                    state.publish(ListenerStatus::PortInUse { port });
                }
            }
            Err(source) => return Err(ListenerError::BindFatal { port, source }),
        }
    }

    Err(ListenerError::PortsExhausted { first, last })
}

async fn command_handler(State(state): State<ListenerState>, body: Bytes) -> Response {
    match decode_command(&body) {
        Ok(command) => {
            info!(
                command_id = command.id,
                text = %command.text,
                duration_secs = command.duration_seconds(),
                "command received"
            );
            state.deliver(command);
            (StatusCode::OK, "Command received").into_response()
        }
        Err(DecodeError::Malformed(FieldError::EmptyBody)) => {
            warn!("rejecting command without body");
            (StatusCode::BAD_REQUEST, "No body found").into_response()
        }
        Err(err) => {
            warn!("rejecting command: {err}");
            (StatusCode::BAD_REQUEST, "Invalid JSON").into_response()
        }
    }
}

async fn not_found_handler() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

// One request per connection: hyper closes the socket after writing a
// response that carries `Connection: close`.
async fn close_connection(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
