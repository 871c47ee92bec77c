//! Record of inbound traffic kept for test assertions.

use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Lines {
    received: Vec<String>,
    unmatched: Vec<String>,
}

/// Shared log of lines seen by every session of one server.
#[derive(Debug, Clone, Default)]
pub(crate) struct Transcript {
    lines: Arc<Mutex<Lines>>,
}

impl Transcript {
    pub(crate) fn record_received(&self, line: &str) {
        self.with_lines(|lines| lines.received.push(line.to_owned()));
    }

    pub(crate) fn record_unmatched(&self, line: &str) {
        self.with_lines(|lines| lines.unmatched.push(line.to_owned()));
    }

    pub(crate) fn received(&self) -> Vec<String> {
        self.with_lines(|lines| lines.received.clone())
    }

    pub(crate) fn unmatched(&self) -> Vec<String> {
        self.with_lines(|lines| lines.unmatched.clone())
    }

    fn with_lines<T>(&self, f: impl FnOnce(&mut Lines) -> T) -> T {
        let mut guard = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
