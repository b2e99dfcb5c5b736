use std::sync::atomic::{AtomicU64, Ordering};

/// Handle pairing a [`ProgressSink::begin`] with its
/// [`ProgressSink::end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTicket(u64);

impl ProgressTicket {
    #[must_use]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Loading-indicator collaborator.
///
/// The client brackets every call with `begin`/`end`, on success and on
/// failure alike. Implementations must tolerate `end` with a ticket they
/// no longer know about.
pub trait ProgressSink: Send + Sync {
    fn begin(&self, message: &str) -> ProgressTicket;
    fn end(&self, ticket: ProgressTicket);
}

/// Default sink that shows nothing.
#[derive(Debug, Default)]
pub struct NoopProgress {
    counter: AtomicU64,
}

impl NoopProgress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for NoopProgress {
    fn begin(&self, _message: &str) -> ProgressTicket {
        ProgressTicket(self.counter.fetch_add(1, Ordering::Relaxed))
    }

    fn end(&self, _ticket: ProgressTicket) {}
}
