//! Single-slot transient notifications.

use crate::model::{Notification, NotificationKind};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

struct Visible {
    notification: Notification,
    expires_at: Instant,
}

/// Holds at most one visible notification together with its own expiry deadline.
///
/// The controller arms a sleep on `deadline()` and calls `expire` when it fires.
pub(crate) struct Notifier {
    ttl: Duration,
    current: Option<Visible>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, current: None }
    }

    /// Show `message`, replacing whatever is visible. The hide deadline is counted
    /// from this call, not from the notification being replaced.
    pub fn emit(
        &mut self,
        kind: NotificationKind,
        message: impl Into<String>,
        now: Instant,
    ) -> Notification {
        let notification = Notification {
            kind,
            message: message.into(),
            created_at: OffsetDateTime::now_utc(),
        };
        tracing::debug!(?kind, message = %notification.message, "notification");
        self.current = Some(Visible {
            notification: notification.clone(),
            expires_at: now + self.ttl,
        });
        notification
    }

    /// Hide the visible notification and cancel its pending expiry.
    pub fn dismiss(&mut self) -> Option<Notification> {
        self.current.take().map(|v| v.notification)
    }

    /// Hide the visible notification if its window has elapsed.
    pub fn expire(&mut self, now: Instant) -> bool {
        match &self.current {
            Some(v) if v.expires_at <= now => {
                self.current = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|v| v.expires_at)
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&Notification> {
        self.current.as_ref().map(|v| &v.notification)
    }
}
