//! Shared helpers for the server test suites.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::{ListenPort, LoggingConfig, MockIrcServer, ServerConfig, telemetry};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);
const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration used by every test server: ephemeral port, short grace.
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig::new("irc.test")
        .with_port(ListenPort::Ephemeral)
        .with_shutdown_grace(Duration::from_millis(20))
}

/// Builds an idle server with the PING/NICK triggers used across suites.
pub(crate) fn scripted_server() -> MockIrcServer {
    let _ = telemetry::initialise(&LoggingConfig {
        filter: "mockirc=debug".to_owned(),
        ..LoggingConfig::default()
    });
    let server = MockIrcServer::with_config(test_config());
    server.when("PING irc.test").respond(":PONG irc.test");
    server.when("NICK kyle").respond("R1").respond("R2");
    server
}

/// Starts `server` and waits for the accept loop.
pub(crate) fn start(server: &mut MockIrcServer) -> Result<SocketAddr> {
    server
        .start()
        .context("start server")?
        .wait_timeout(READY_TIMEOUT)
        .context("wait for readiness")?;
    server
        .local_addr()
        .ok_or_else(|| anyhow!("server did not report an address"))
}

/// Line-oriented client speaking to the mock server.
pub(crate) struct TestClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TestClient {
    pub(crate) fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).context("connect client")?;
        stream
            .set_read_timeout(Some(CLIENT_TIMEOUT))
            .context("set read timeout")?;
        let writer = stream.try_clone().context("clone client stream")?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Sends `line` with the standard terminator.
    pub(crate) fn send(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()
    }

    /// Reads one raw line, terminator included.
    pub(crate) fn read_raw(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed connection",
            ));
        }
        Ok(line)
    }

    /// Reads `count` raw lines.
    pub(crate) fn read_lines(&mut self, count: usize) -> Result<Vec<String>> {
        (0..count)
            .map(|index| {
                self.read_raw()
                    .with_context(|| format!("read reply line {index}"))
            })
            .collect()
    }

    /// Reports whether no reply arrives before the read timeout.
    ///
    /// A closed connection also counts as silent; use
    /// [`TestClient::is_closed`] to tell the two apart.
    pub(crate) fn is_silent(&mut self) -> bool {
        let mut line = String::new();
        matches!(self.reader.read_line(&mut line), Ok(0) | Err(_)) && line.is_empty()
    }

    /// Reports whether the server has closed the connection.
    ///
    /// A read that times out means the connection is still open.
    pub(crate) fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => true,
            Ok(_) => false,
            Err(error) => matches!(
                error.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            ),
        }
    }
}
