//! Audit recorder: writes the trail, absorbs sink failures
//!
//! Every state transition is recorded through here before the operation
//! reports success. A failing sink must not take the business operation
//! down with it: appends are retried with a short backoff, and entries
//! that still cannot be written land in an in-memory dead-letter queue
//! an operator can drain and replay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use baton_types::{AuditEntry, WorkflowResult};
use tracing::{trace, warn};

use crate::store::{AuditQuery, AuditStore};

const MAX_APPEND_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(10);

/// Reliable front door to the [`AuditStore`].
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    dead_letters: Mutex<VecDeque<AuditEntry>>,
    appends: AtomicU64,
    dead_lettered: AtomicU64,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            dead_letters: Mutex::new(VecDeque::new()),
            appends: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    /// Record an entry, retrying transient sink failures.
    ///
    /// Infallible from the caller's point of view: after the final retry
    /// the entry is dead-lettered and the transition it describes stands.
    pub fn record(&self, entry: AuditEntry) {
        for attempt in 1..=MAX_APPEND_ATTEMPTS {
            match self.store.append(entry.clone()) {
                Ok(()) => {
                    self.appends.fetch_add(1, Ordering::Relaxed);
                    trace!(subject = %entry.subject, event = ?entry.event, "Audit entry recorded");
                    return;
                }
                Err(err) => {
                    warn!(
                        subject = %entry.subject,
                        event = ?entry.event,
                        attempt,
                        error = %err,
                        "Audit append failed"
                    );
                    if attempt < MAX_APPEND_ATTEMPTS {
                        thread::sleep(RETRY_BASE * attempt);
                    }
                }
            }
        }
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        warn!(
            subject = %entry.subject,
            event = ?entry.event,
            attempts = MAX_APPEND_ATTEMPTS,
            "Audit entry dead-lettered"
        );
        if let Ok(mut queue) = self.dead_letters.lock() {
            queue.push_back(entry);
        }
    }

    /// Query the underlying store.
    pub fn query(&self, query: &AuditQuery) -> WorkflowResult<Vec<AuditEntry>> {
        self.store.query(query)
    }

    /// Take every dead-lettered entry, oldest first.
    pub fn drain_dead_letters(&self) -> Vec<AuditEntry> {
        self.dead_letters
            .lock()
            .map(|mut queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters
            .lock()
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    /// Entries successfully appended since construction.
    pub fn recorded_count(&self) -> u64 {
        self.appends.load(Ordering::Relaxed)
    }

    /// Entries that exhausted their retries.
    pub fn dead_lettered_count(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("recorded", &self.recorded_count())
            .field("dead_lettered", &self.dead_lettered_count())
            .finish()
    }
}
