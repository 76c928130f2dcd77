//! Staleness tracking for overlapping lookups.
//!
//! Each lookup takes a ticket before it starts. A finished lookup is only
//! applied if no newer ticket has been issued in the meantime; late
//! responses are dropped rather than cancelled.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestTicket(u64);

impl RequestTicket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct RequestSequencer {
    issued: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> RequestTicket {
        RequestTicket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        self.issued.load(Ordering::SeqCst) == ticket.0
    }
}

/// Holds the result of the newest lookup.
#[derive(Debug)]
pub struct LatestOutcome<T> {
    applied: Option<(RequestTicket, T)>,
}

impl<T> Default for LatestOutcome<T> {
    fn default() -> Self {
        Self { applied: None }
    }
}

impl<T> LatestOutcome<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `value` if `ticket` is still the newest issued. Returns whether it was applied.
    pub fn offer(&mut self, sequencer: &RequestSequencer, ticket: RequestTicket, value: T) -> bool {
        if !sequencer.is_current(ticket) {
            debug!(ticket = ticket.0, "discarding stale response");
            return false;
        }
        self.applied = Some((ticket, value));
        true
    }

    pub fn current(&self) -> Option<&T> {
        self.applied.as_ref().map(|(_, value)| value)
    }

    pub fn into_current(self) -> Option<T> {
        self.applied.map(|(_, value)| value)
    }
}
