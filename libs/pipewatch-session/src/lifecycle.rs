use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 64;

/// Where the session currently is.
///
/// ```text
/// Unauthenticated → Authenticating → Authenticated
///   → RefreshPending → Authenticated
///   → RefreshFailed  → Unauthenticated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    RefreshPending,
    RefreshFailed,
}

/// Lifecycle notifications for subscribers such as the login redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    Refreshed,
    /// The session could not be renewed and was cleared.
    SessionExpired { reason: String },
    SignedOut,
}

/// State channel plus event fan-out.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "session state changed");
        }
    }

    pub(crate) fn signed_in(&self) {
        self.set_state(SessionState::Authenticated);
        self.emit(SessionEvent::SignedIn);
    }

    pub(crate) fn refresh_started(&self) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Authenticated {
                *state = SessionState::RefreshPending;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn refreshed(&self) {
        self.set_state(SessionState::Authenticated);
        self.emit(SessionEvent::Refreshed);
    }

    /// Terminal refresh failure. The caller guarantees this runs once per
    /// session.
    pub(crate) fn expired(&self, reason: &str) {
        self.set_state(SessionState::RefreshFailed);
        self.set_state(SessionState::Unauthenticated);
        tracing::warn!(reason, "session expired");
        self.emit(SessionEvent::SessionExpired {
            reason: reason.to_owned(),
        });
    }

    pub(crate) fn signed_out(&self) {
        self.set_state(SessionState::Unauthenticated);
        self.emit(SessionEvent::SignedOut);
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no session event subscribers");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn starts_unauthenticated() {
        assert_eq!(Lifecycle::new().state(), SessionState::Unauthenticated);
    }

    #[test]
    fn refresh_pending_only_from_authenticated() {
        let lifecycle = Lifecycle::new();
        lifecycle.refresh_started();
        assert_eq!(lifecycle.state(), SessionState::Unauthenticated);

        lifecycle.signed_in();
        lifecycle.refresh_started();
        assert_eq!(lifecycle.state(), SessionState::RefreshPending);

        lifecycle.refreshed();
        assert_eq!(lifecycle.state(), SessionState::Authenticated);
    }

    #[test]
    fn events_are_broadcast_in_order() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();

        lifecycle.signed_in();
        lifecycle.refreshed();
        lifecycle.expired("refresh rejected");

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::SignedIn);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Refreshed);
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::SessionExpired {
                reason: "refresh rejected".into()
            }
        );
        assert_eq!(lifecycle.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn state_watchers_see_changes() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.watch_state();
        lifecycle.signed_in();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Authenticated);
    }
}
