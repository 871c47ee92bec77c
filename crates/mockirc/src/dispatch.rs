//! Matches inbound lines against the registry and writes the canned replies.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, trace};

use crate::registry::TriggerRegistry;
use crate::transcript::Transcript;

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Line terminator appended to every outbound line.
pub(crate) const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Destination for outbound lines.
pub(crate) trait LineSink {
    /// Writes `text` followed by the line terminator and flushes it.
    fn write_line(&self, text: &str) -> io::Result<()>;
}

/// What the dispatcher did with one inbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    /// The server is shutting down; the line was dropped unseen.
    Discarded,
    /// No trigger matched; nothing was written.
    Unmatched,
    /// A trigger matched and this many replies were written.
    Replied(usize),
}

/// Failure while writing replies for a matched trigger.
#[derive(Debug, Error)]
#[error("failed to write reply {index} for trigger '{trigger}': {source}")]
pub(crate) struct DispatchError {
    trigger: String,
    index: usize,
    #[source]
    source: io::Error,
}

/// Per-server dispatcher shared by every session thread.
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    registry: TriggerRegistry,
    running: Arc<AtomicBool>,
    transcript: Transcript,
}

impl Dispatcher {
    pub(crate) fn new(registry: TriggerRegistry, transcript: Transcript) -> Self {
        Self {
            registry,
            running: Arc::new(AtomicBool::new(false)),
            transcript,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Handles one inbound line with its terminator already stripped.
    pub(crate) fn handle<S>(&self, line: &str, sink: &S) -> Result<Dispatch, DispatchError>
    where
        S: LineSink + ?Sized,
    {
        if !self.is_running() {
            return Ok(Dispatch::Discarded);
        }
        self.transcript.record_received(line);

        let Some(replies) = self.registry.lookup(line) else {
            debug!(target: DISPATCH_TARGET, line, "nothing registered for line");
            self.transcript.record_unmatched(line);
            return Ok(Dispatch::Unmatched);
        };

        for (index, reply) in replies.iter().enumerate() {
            sink.write_line(reply).map_err(|source| DispatchError {
                trigger: line.to_owned(),
                index,
                source,
            })?;
        }
        trace!(
            target: DISPATCH_TARGET,
            line,
            replies = replies.len(),
            "trigger answered"
        );
        Ok(Dispatch::Replied(replies.len()))
    }
}
