//! Terminal spinner wired into the client's progress hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use docport_client::{ProgressSink, ProgressTicket};
use indicatif::{ProgressBar, ProgressStyle};

/// One spinner per in-flight call, cleared when the call settles.
#[derive(Default)]
pub struct SpinnerProgress {
    next: AtomicU64,
    active: Mutex<HashMap<u64, ProgressBar>>,
}

impl SpinnerProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for SpinnerProgress {
    fn begin(&self, message: &str) -> ProgressTicket {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.blue} {msg}")
                .expect("valid spinner template"),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(80));

        let mut active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        active.insert(id, spinner);
        ProgressTicket::new(id)
    }

    fn end(&self, ticket: ProgressTicket) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(spinner) = active.remove(&ticket.value()) {
            spinner.finish_and_clear();
        }
    }
}
