//! Notifier: fire-and-forget delivery of notification requests
//!
//! The engine hands finished [`NotificationRequest`]s to this trait and
//! moves on. Delivery failures never fail a workflow operation, so the
//! trait has no error channel; an implementation that talks to a real
//! gateway handles its own retries.

use std::sync::Mutex;

use baton_types::{NotificationKind, NotificationRequest};
use tracing::info;

pub trait Notifier: Send + Sync {
    fn notify(&self, request: NotificationRequest);
}

/// Logs each request. The default when no transport is wired up.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, request: NotificationRequest) {
        info!(
            kind = ?request.kind,
            tenant = %request.tenant_id,
            recipients = request.recipients.len(),
            subject = %request.subject,
            "Notification requested"
        );
    }
}

/// Captures requests so tests can assert on them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<NotificationRequest>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }

    pub fn of_kind(&self, kind: NotificationKind) -> Vec<NotificationRequest> {
        self.sent()
            .into_iter()
            .filter(|request| request.kind == kind)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, request: NotificationRequest) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(request);
        }
    }
}
