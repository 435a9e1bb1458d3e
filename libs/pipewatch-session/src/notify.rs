//! User-visible error channel.
//!
//! One notice at a time: publishing replaces whatever is shown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Network,
    Auth,
    SessionExpired,
    Application,
    Other,
}

impl From<&SessionError> for NoticeKind {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Network(_) => Self::Network,
            SessionError::Auth(_) => Self::Auth,
            SessionError::SessionExpired(_) => Self::SessionExpired,
            SessionError::Application { .. } => Self::Application,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub message: String,
}

/// Cheaply clonable handle to the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Arc<watch::Sender<Option<Notice>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Show `err`, replacing the current notice.
    pub fn publish(&self, err: &SessionError) {
        self.publish_message(NoticeKind::from(err), err.to_string());
    }

    pub fn publish_message(&self, kind: NoticeKind, message: impl Into<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let notice = Notice {
            id,
            kind,
            message: message.into(),
        };
        tracing::debug!(id, kind = ?notice.kind, "notice published");
        self.tx.send_replace(Some(notice));
    }

    /// Clear the current notice.
    pub fn dismiss(&self) {
        self.tx.send_replace(None);
    }

    #[must_use]
    pub fn current(&self) -> Option<Notice> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Notice>> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn latest_notice_replaces_previous() {
        let notifier = Notifier::new();
        notifier.publish(&SessionError::Network("connection refused".into()));
        let first = notifier.current().unwrap().id;
        notifier.publish(&SessionError::Application {
            status: http::StatusCode::OK,
            message: "station offline".into(),
        });

        let current = notifier.current().unwrap();
        assert!(current.id > first);
        assert_eq!(current.kind, NoticeKind::Application);
        assert_eq!(current.message, "station offline");
    }

    #[test]
    fn dismiss_clears() {
        let notifier = Notifier::new();
        notifier.publish(&SessionError::Auth("no refresh token".into()));
        notifier.dismiss();
        assert!(notifier.current().is_none());
    }

    #[test]
    fn clones_share_the_channel() {
        let notifier = Notifier::new();
        let other = notifier.clone();
        other.publish_message(NoticeKind::Other, "boom");
        assert_eq!(notifier.current().unwrap().message, "boom");
    }

    #[tokio::test]
    async fn subscribers_are_woken() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        notifier.publish(&SessionError::SessionExpired("refresh rejected".into()));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().as_ref().map(|n| n.kind),
            Some(NoticeKind::SessionExpired)
        );
    }
}
