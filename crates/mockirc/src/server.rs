//! Lifecycle controller: listening socket, accept loop, and shutdown.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use strum::Display;
use tracing::{debug, info, trace, warn};

use crate::config::{ListenPort, ServerConfig};
use crate::dispatch::{Dispatcher, LineSink};
use crate::error::{ReadinessError, SendError, ServerError};
use crate::registry::{ResponseBuilder, TriggerRegistry};
use crate::session::{Session, SessionTable};
use crate::transcript::Transcript;

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);
const ACCEPT_THREAD_NAME: &str = "mockirc-accept";

/// Lifecycle of a [`MockIrcServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, not yet started.
    Idle,
    /// Binding the listener.
    Starting,
    /// Accepting connections.
    Running,
    /// Shutdown in progress.
    Stopping,
    /// Shut down; the server cannot be restarted.
    Stopped,
}

/// One-shot signal fired once the accept loop is live.
#[derive(Debug)]
pub struct Readiness {
    receiver: Receiver<()>,
}

impl Readiness {
    /// Blocks until the accept loop reports that it is running.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::Disconnected`] if the accept loop exited
    /// without signalling.
    pub fn wait(self) -> Result<(), ReadinessError> {
        self.receiver
            .recv()
            .map_err(|_| ReadinessError::Disconnected)
    }

    /// Like [`Readiness::wait`] but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::TimedOut`] when the deadline passes and
    /// [`ReadinessError::Disconnected`] if the accept loop exited first.
    pub fn wait_timeout(self, timeout: Duration) -> Result<(), ReadinessError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(ReadinessError::TimedOut(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ReadinessError::Disconnected),
        }
    }
}

/// State shared between the controller, the accept thread and session threads.
struct Shared {
    name: String,
    max_line_bytes: usize,
    dispatcher: Dispatcher,
    sessions: SessionTable,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }
}

/// Scriptable line-protocol server for client integration tests.
///
/// Register triggers with [`MockIrcServer::when`], then [`start`] the server
/// and wait on the returned [`Readiness`] before connecting clients.
///
/// [`start`]: MockIrcServer::start
pub struct MockIrcServer {
    config: ServerConfig,
    registry: TriggerRegistry,
    shared: Arc<Shared>,
    state: LifecycleState,
    local_addr: Option<SocketAddr>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MockIrcServer {
    /// Creates a server called `name` on `port`; port `0` selects
    /// [`DEFAULT_PORT`](crate::DEFAULT_PORT).
    #[must_use]
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self::with_config(ServerConfig::new(name).with_port(ListenPort::from_number(port)))
    }

    /// Creates a server from a full configuration.
    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        let registry = TriggerRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone(), Transcript::default());
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            max_line_bytes: config.max_line_bytes,
            dispatcher,
            sessions: SessionTable::default(),
        });
        Self {
            config,
            registry,
            shared,
            state: LifecycleState::Idle,
            local_addr: None,
            accept_thread: None,
        }
    }

    /// Registers `trigger` and returns a builder for its replies.
    ///
    /// Calling `when` again for the same trigger replaces its replies.
    pub fn when(&self, trigger: impl Into<String>) -> ResponseBuilder {
        self.registry.define(trigger)
    }

    /// Handle onto the trigger registry.
    #[must_use]
    pub const fn registry(&self) -> &TriggerRegistry {
        &self.registry
    }

    /// Server name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Configuration the server was built with.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Address the listener is bound to once started.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Every inbound line handled so far, across all sessions.
    #[must_use]
    pub fn received_lines(&self) -> Vec<String> {
        self.shared.dispatcher.transcript().received()
    }

    /// Inbound lines that matched no trigger.
    #[must_use]
    pub fn unmatched_lines(&self) -> Vec<String> {
        self.shared.dispatcher.transcript().unmatched()
    }

    /// Number of connections currently being served.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Binds the listener and spawns the accept loop.
    ///
    /// The returned [`Readiness`] fires once the accept loop is running.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidState`] unless the server is idle,
    /// [`ServerError::ZeroLineLimit`] when `max_line_bytes` is zero, and a
    /// resolve, bind or spawn error if the listener cannot be brought up. The
    /// server is left idle on any error.
    pub fn start(&mut self) -> Result<Readiness, ServerError> {
        if self.state != LifecycleState::Idle {
            return Err(ServerError::InvalidState { state: self.state });
        }
        self.state = LifecycleState::Starting;
        match self.launch() {
            Ok(readiness) => {
                self.state = LifecycleState::Running;
                Ok(readiness)
            }
            Err(error) => {
                self.shared.dispatcher.set_running(false);
                self.local_addr = None;
                self.state = LifecycleState::Idle;
                Err(error)
            }
        }
    }

    fn launch(&mut self) -> Result<Readiness, ServerError> {
        if self.config.max_line_bytes == 0 {
            return Err(ServerError::ZeroLineLimit);
        }
        let listener = bind_tcp(&self.config.host, self.config.port.bind_number())?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::Configure { source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| ServerError::Configure { source })?;

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        self.shared.dispatcher.set_running(true);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(ACCEPT_THREAD_NAME.to_owned())
            .spawn(move || run_accept_loop(&listener, &shared, ready_tx))
            .map_err(|source| ServerError::Spawn { source })?;

        info!(
            target: SERVER_TARGET,
            server = %self.config.name,
            addr = %addr,
            "mock server listening"
        );
        self.local_addr = Some(addr);
        self.accept_thread = Some(handle);
        Ok(Readiness { receiver: ready_rx })
    }

    /// Stops accepting, closes live sessions, and waits out the grace period.
    ///
    /// Calling `stop` on a server that is not running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ThreadPanic`] if the accept thread panicked.
    pub fn stop(&mut self) -> Result<(), ServerError> {
        if self.state != LifecycleState::Running {
            return Ok(());
        }
        self.state = LifecycleState::Stopping;
        let result = self.halt();
        thread::sleep(self.config.shutdown_grace);
        self.state = LifecycleState::Stopped;
        result
    }

    fn halt(&mut self) -> Result<(), ServerError> {
        self.shared.dispatcher.set_running(false);
        let joined = match self.accept_thread.take() {
            Some(handle) => handle.join().map_err(|_| ServerError::ThreadPanic),
            None => Ok(()),
        };
        let closed = self.shared.sessions.close_all();
        info!(
            target: SERVER_TARGET,
            server = %self.config.name,
            sessions = closed,
            "mock server stopped"
        );
        joined
    }

    /// Writes `text` as one line to the most recently active session.
    ///
    /// Nothing is sent, and `Ok(())` is returned, when the server is not
    /// running.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NoActiveSession`] when no client is connected and
    /// [`SendError::Write`] when the write fails.
    pub fn send(&self, text: &str) -> Result<(), SendError> {
        if !self.shared.is_running() {
            debug!(
                target: SERVER_TARGET,
                server = %self.config.name,
                "send skipped; server not running"
            );
            return Ok(());
        }
        let writer = self
            .shared
            .sessions
            .latest()
            .ok_or(SendError::NoActiveSession)?;
        writer.write_line(text).map_err(|source| {
            warn!(
                target: SERVER_TARGET,
                session = %writer.id(),
                error = %source,
                "out-of-band send failed"
            );
            SendError::Write {
                session: writer.id(),
                source,
            }
        })
    }
}

impl Drop for MockIrcServer {
    fn drop(&mut self) {
        if self.state == LifecycleState::Running {
            if let Err(error) = self.halt() {
                warn!(
                    target: SERVER_TARGET,
                    server = %self.config.name,
                    error = %error,
                    "mock server shutdown failed"
                );
            }
            self.state = LifecycleState::Stopped;
        }
    }
}

fn run_accept_loop(listener: &TcpListener, shared: &Arc<Shared>, ready: SyncSender<()>) {
    if ready.send(()).is_err() {
        trace!(target: SERVER_TARGET, "readiness receiver dropped");
    }
    drop(ready);

    let mut last_error = None::<io::ErrorKind>;
    while shared.is_running() {
        match listener.accept() {
            Ok((stream, peer)) => {
                last_error = None;
                if !shared.is_running() {
                    break;
                }
                spawn_session(shared, stream, peer);
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(error) => {
                if !shared.is_running() {
                    break;
                }
                let kind = error.kind();
                if last_error == Some(kind) {
                    trace!(target: SERVER_TARGET, error = %error, "socket accept error");
                } else {
                    warn!(
                        target: SERVER_TARGET,
                        server = %shared.name,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
            }
        }
    }
    debug!(target: SERVER_TARGET, server = %shared.name, "accept loop exited");
}

fn spawn_session(shared: &Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let id = shared.sessions.allocate_id();
    let session = match stream
        .set_nonblocking(false)
        .and_then(|()| Session::new(id, stream, shared.max_line_bytes))
    {
        Ok(session) => session,
        Err(error) => {
            warn!(
                target: SERVER_TARGET,
                peer = %peer,
                error = %error,
                "failed to prepare session"
            );
            return;
        }
    };
    shared.sessions.insert(session.writer());

    let worker = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("mockirc-session-{}", id.get()))
        .spawn(move || session.run(&worker.dispatcher, &worker.sessions));
    if let Err(error) = spawned {
        warn!(
            target: SERVER_TARGET,
            peer = %peer,
            error = %error,
            "failed to spawn session thread"
        );
        if let Some(writer) = shared.sessions.remove(id) {
            writer.close();
        }
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ServerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ServerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })
}
