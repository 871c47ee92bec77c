//! Error types surfaced by the mock server.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::server::LifecycleState;
use crate::session::SessionId;

/// Errors raised while starting or stopping the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured host and port could not be resolved.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Configured host.
        host: String,
        /// Port passed to the resolver.
        port: u16,
        /// Underlying resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no usable address.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Configured host.
        host: String,
        /// Port passed to the resolver.
        port: u16,
    },
    /// The listening socket could not be bound.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    Bind {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The bound listener could not be prepared for the accept loop.
    #[error("failed to configure TCP listener: {source}")]
    Configure {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be spawned.
    #[error("failed to spawn accept thread: {source}")]
    Spawn {
        /// Underlying thread error.
        #[source]
        source: io::Error,
    },
    /// The configured line limit cannot hold any line.
    #[error("max_line_bytes must be at least 1")]
    ZeroLineLimit,
    /// `start` was called when the server was not idle.
    #[error("cannot start server while {state}")]
    InvalidState {
        /// State at the time of the call.
        state: LifecycleState,
    },
    /// The accept thread panicked before it could be joined.
    #[error("accept thread panicked")]
    ThreadPanic,
}

/// Errors raised by out-of-band sends.
#[derive(Debug, Error)]
pub enum SendError {
    /// No client session is currently connected.
    #[error("no active session to send to")]
    NoActiveSession,
    /// Writing to the session's transport failed.
    #[error("failed to write to session {session}: {source}")]
    Write {
        /// Session the write was addressed to.
        session: SessionId,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
}

/// Errors raised while waiting on the readiness signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadinessError {
    /// The accept loop exited without signalling readiness.
    #[error("accept loop exited before signalling readiness")]
    Disconnected,
    /// Readiness was not signalled within the timeout.
    #[error("accept loop not ready after {0:?}")]
    TimedOut(Duration),
}
