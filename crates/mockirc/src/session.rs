//! Per-connection session state and the line read loop.
//!
//! Each accepted connection owns one [`Session`]. The session thread is the
//! only reader of its transport; writes go through a [`SessionWriter`] whose
//! buffer is serialised behind a mutex so out-of-band sends never interleave
//! with dispatched replies.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strum::Display;
use tracing::{debug, info, trace, warn};

use crate::dispatch::{Dispatch, Dispatcher, LINE_TERMINATOR, LineSink};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Identifier assigned to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Numeric value of the identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "#{}", self.0)
    }
}

/// Why a session loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
enum Termination {
    Shutdown,
    EndOfStream,
    ReadFailed,
    WriteFailed,
}

/// Write half of a session, shareable with the session table.
#[derive(Debug, Clone)]
pub(crate) struct SessionWriter {
    id: SessionId,
    buffer: Arc<Mutex<BufWriter<TcpStream>>>,
    control: Arc<TcpStream>,
}

impl SessionWriter {
    pub(crate) const fn id(&self) -> SessionId {
        self.id
    }

    /// Shuts the transport down in both directions, waking a blocked reader.
    pub(crate) fn close(&self) {
        if let Err(error) = self.control.shutdown(Shutdown::Both)
            && error.kind() != io::ErrorKind::NotConnected
        {
            debug!(
                target: SESSION_TARGET,
                session = %self.id,
                error = %error,
                "failed to shut down session transport"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufWriter<TcpStream>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LineSink for SessionWriter {
    fn write_line(&self, text: &str) -> io::Result<()> {
        let mut writer = self.lock();
        writer.write_all(text.as_bytes())?;
        writer.write_all(LINE_TERMINATOR)?;
        writer.flush()
    }
}

/// State owned by the thread serving one connection.
pub(crate) struct Session {
    id: SessionId,
    peer: SocketAddr,
    reader: BufReader<TcpStream>,
    writer: SessionWriter,
    max_line_bytes: usize,
}

impl Session {
    pub(crate) fn new(id: SessionId, stream: TcpStream, max_line_bytes: usize) -> io::Result<Self> {
        let peer = stream.peer_addr()?;
        let write_half = stream.try_clone()?;
        let control = stream.try_clone()?;
        Ok(Self {
            id,
            peer,
            reader: BufReader::new(stream),
            writer: SessionWriter {
                id,
                buffer: Arc::new(Mutex::new(BufWriter::new(write_half))),
                control: Arc::new(control),
            },
            max_line_bytes,
        })
    }

    pub(crate) fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    /// Reads one line and strips its terminator.
    ///
    /// Returns `Ok(None)` at end of stream. A trailing fragment with no
    /// terminator is dropped.
    fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let limit = u64::try_from(self.max_line_bytes).unwrap_or(u64::MAX);
        let mut line = Vec::new();
        let read = Read::by_ref(&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut line)?;
        if read == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            if line.len() >= self.max_line_bytes {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum length",
                ));
            }
            trace!(
                target: SESSION_TARGET,
                session = %self.id,
                bytes = line.len(),
                "discarding unterminated trailing data"
            );
            return Ok(None);
        }
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Serves the connection until shutdown, end of stream, or an I/O error.
    pub(crate) fn run(mut self, dispatcher: &Dispatcher, table: &SessionTable) {
        debug!(
            target: SESSION_TARGET,
            session = %self.id,
            peer = %self.peer,
            "session opened"
        );
        let termination = self.pump(dispatcher, table);
        table.remove(self.id);
        self.writer.close();
        debug!(
            target: SESSION_TARGET,
            session = %self.id,
            peer = %self.peer,
            reason = %termination,
            "session closed"
        );
    }

    fn pump(&mut self, dispatcher: &Dispatcher, table: &SessionTable) -> Termination {
        loop {
            if !dispatcher.is_running() {
                return Termination::Shutdown;
            }
            let raw = match self.read_line() {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    if dispatcher.is_running() {
                        info!(
                            target: SESSION_TARGET,
                            session = %self.id,
                            peer = %self.peer,
                            "peer closed connection"
                        );
                    }
                    return Termination::EndOfStream;
                }
                Err(error) => {
                    if dispatcher.is_running() {
                        warn!(
                            target: SESSION_TARGET,
                            session = %self.id,
                            error = %error,
                            "session read failed"
                        );
                    }
                    return Termination::ReadFailed;
                }
            };
            table.touch(self.id);

            let Ok(line) = std::str::from_utf8(&raw) else {
                let lossy = String::from_utf8_lossy(&raw);
                debug!(
                    target: SESSION_TARGET,
                    session = %self.id,
                    line = %lossy,
                    "ignoring line that is not valid UTF-8"
                );
                if dispatcher.is_running() {
                    dispatcher.transcript().record_received(&lossy);
                    dispatcher.transcript().record_unmatched(&lossy);
                }
                continue;
            };

            match dispatcher.handle(line, &self.writer) {
                Ok(Dispatch::Replied(count)) => trace!(
                    target: SESSION_TARGET,
                    session = %self.id,
                    count,
                    "replies written"
                ),
                Ok(Dispatch::Unmatched | Dispatch::Discarded) => {}
                Err(error) => {
                    warn!(
                        target: SESSION_TARGET,
                        session = %self.id,
                        error = %error,
                        "session write failed"
                    );
                    return Termination::WriteFailed;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Live {
    writers: HashMap<SessionId, SessionWriter>,
    /// Live session ids, least recently active first.
    recency: Vec<SessionId>,
}

impl Live {
    fn forget(&mut self, id: SessionId) {
        self.recency.retain(|live| *live != id);
    }
}

/// Index of live sessions for one server.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    next_id: AtomicU64,
    live: Mutex<Live>,
}

impl SessionTable {
    pub(crate) fn allocate_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::SeqCst).saturating_add(1))
    }

    pub(crate) fn insert(&self, writer: SessionWriter) {
        let id = writer.id();
        let mut live = self.lock();
        live.forget(id);
        live.recency.push(id);
        live.writers.insert(id, writer);
    }

    /// Marks `id` as the most recently active session.
    pub(crate) fn touch(&self, id: SessionId) {
        let mut live = self.lock();
        if live.writers.contains_key(&id) {
            live.forget(id);
            live.recency.push(id);
        }
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<SessionWriter> {
        let mut live = self.lock();
        live.forget(id);
        live.writers.remove(&id)
    }

    /// Writer of the most recently active session still connected.
    ///
    /// When that session goes away the next most recent one takes over.
    pub(crate) fn latest(&self) -> Option<SessionWriter> {
        let live = self.lock();
        live.recency.last().and_then(|id| live.writers.get(id).cloned())
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().writers.len()
    }

    /// Shuts down every live transport and forgets the sessions.
    pub(crate) fn close_all(&self) -> usize {
        let writers: Vec<SessionWriter> = {
            let mut live = self.lock();
            live.recency.clear();
            live.writers.drain().map(|(_, writer)| writer).collect()
        };
        for writer in &writers {
            writer.close();
        }
        writers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Live> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
