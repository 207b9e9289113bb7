//! Best-effort user-facing notices.
//!
//! The connection manager raises a notice when something the user should
//! know about happens (connection regained, connection lost, bad
//! credentials). Delivery is advisory: a notifier must not block and has no
//! way to fail the operation that raised the notice.

use tracing::info;

/// Severity of a user notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Normal lifecycle information.
    Info,
    /// Something is wrong and will not fix itself, e.g. rejected
    /// credentials.
    Warning,
}

/// Sink for user-facing notices.
pub trait UserNotifier: Send + Sync + 'static {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Notifier that writes notices to the log. The default for headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        info!(kind = ?kind, message, "user notice");
    }
}
