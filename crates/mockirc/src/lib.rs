//! Scriptable line-protocol server double for chat client tests.
//!
//! `mockirc` listens on a TCP port and answers inbound lines with canned
//! replies. A test registers exact trigger lines and the ordered replies each
//! one should produce, starts the server, and points the client under test at
//! it. Lines are framed by `\r\n`; nothing beyond the framing is parsed.
//!
//! Every accepted connection is served on its own thread with its own session
//! state, so concurrent clients never share reader or writer buffers.
//! Shutdown is cooperative: [`MockIrcServer::stop`] clears the running flag,
//! closes the listener and every live connection, then waits out a short
//! grace period.
//!
//! # Example
//!
//! ```no_run
//! use std::io::{BufRead, BufReader, Write};
//! use std::net::TcpStream;
//!
//! use mockirc::MockIrcServer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MockIrcServer::new("irc.example.test", 6661);
//! server
//!     .when("PING irc.example.test")
//!     .respond(":PONG irc.example.test");
//! server.start()?.wait()?;
//!
//! let mut client = TcpStream::connect("127.0.0.1:6661")?;
//! client.write_all(b"PING irc.example.test\r\n")?;
//!
//! let mut reply = String::new();
//! BufReader::new(&client).read_line(&mut reply)?;
//! assert_eq!(reply, ":PONG irc.example.test\r\n");
//!
//! server.stop()?;
//! # Ok(())
//! # }
//! ```

mod config;
mod dispatch;
mod error;
mod registry;
mod server;
mod session;
pub mod telemetry;
mod transcript;

pub use config::{
    DEFAULT_HOST, DEFAULT_LOG_FILTER, DEFAULT_MAX_LINE_BYTES, DEFAULT_PORT, DEFAULT_SERVER_NAME,
    DEFAULT_SHUTDOWN_GRACE, ListenPort, LogFormat, LoggingConfig, ServerConfig,
};
pub use error::{ReadinessError, SendError, ServerError};
pub use registry::{ResponseBuilder, TriggerRegistry};
pub use server::{LifecycleState, MockIrcServer, Readiness};
pub use session::SessionId;
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
