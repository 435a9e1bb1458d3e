use std::io;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::secret::SecretString;
use crate::types::{Session, TokenGrant};

/// Access tokens are treated as expired this long before their real expiry.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(30);

/// Durable home for the session.
///
/// Every [`TokenStore::set`] and [`TokenStore::clear`] is mirrored to each
/// registered sink. Sink failures are logged and never fail the in-memory
/// update.
pub trait TokenSink: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Write the whole session.
    ///
    /// # Errors
    ///
    /// Any I/O or encoding failure.
    fn persist(&self, session: &Session) -> io::Result<()>;

    /// Read a previously persisted session. Sinks that cannot reconstruct a
    /// full session return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Any I/O or decoding failure.
    fn load(&self) -> io::Result<Option<Session>>;

    /// Delete persisted state. Removing something already absent is `Ok`.
    ///
    /// # Errors
    ///
    /// Any I/O failure other than "not found".
    fn remove(&self) -> io::Result<()>;
}

/// Holds the current session and answers expiry questions.
///
/// The session lives behind an [`ArcSwapOption`], so readers always see a
/// whole session: either the previous pair or the new one, never a mix.
/// Writers take `write` for the swap and the sink updates together, so the
/// persisted copies end up matching memory.
pub struct TokenStore {
    current: ArcSwapOption<Session>,
    write: Mutex<()>,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn TokenSink>>,
    expiry_buffer: Duration,
}

impl TokenStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            write: Mutex::new(()),
            clock,
            sinks: Vec::new(),
            expiry_buffer: DEFAULT_EXPIRY_BUFFER,
        }
    }

    #[must_use]
    pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
        self.expiry_buffer = buffer;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn TokenSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Store a new token pair expiring `expires_in_secs` from now.
    pub fn set(
        &self,
        access: impl Into<SecretString>,
        refresh: impl Into<SecretString>,
        expires_in_secs: u64,
    ) {
        self.replace(self.session_expiring_in(access.into(), refresh.into(), expires_in_secs));
    }

    /// Store a token pair whose lifetime the server did not report.
    pub fn set_unbounded(
        &self,
        access: impl Into<SecretString>,
        refresh: impl Into<SecretString>,
    ) {
        self.replace(Session::new(access.into(), refresh.into(), None));
    }

    /// Store the tokens of a login or refresh response and return the stored
    /// session.
    #[must_use = "the stored session carries the new access token"]
    pub fn apply_grant(&self, grant: &TokenGrant) -> Arc<Session> {
        self.replace(self.session_from_grant(grant))
    }

    /// Store a refresh result only if `refreshed` is still the current
    /// session. Returns `None` when it was cleared or replaced meanwhile.
    pub(crate) fn apply_grant_if_current(
        &self,
        refreshed: &Arc<Session>,
        grant: &TokenGrant,
    ) -> Option<Arc<Session>> {
        let session = self.session_from_grant(grant);
        let _write = self.write.lock();
        if !self.is_current(refreshed) {
            tracing::debug!("session changed during refresh; grant discarded");
            return None;
        }
        Some(self.install(session))
    }

    fn session_from_grant(&self, grant: &TokenGrant) -> Session {
        let access = grant.access_token.clone();
        let refresh = grant.refresh_token.clone();
        match grant.expires_in {
            Some(secs) => self.session_expiring_in(access, refresh, secs),
            None => Session::new(access, refresh, None),
        }
    }

    fn is_current(&self, session: &Arc<Session>) -> bool {
        self.current
            .load()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    fn session_expiring_in(
        &self,
        access: SecretString,
        refresh: SecretString,
        expires_in_secs: u64,
    ) -> Session {
        let expires_at = self
            .clock
            .now_ms()
            .saturating_add(expires_in_secs.saturating_mul(1_000));
        Session::new(access, refresh, Some(expires_at))
    }

    fn replace(&self, session: Session) -> Arc<Session> {
        let _write = self.write.lock();
        self.install(session)
    }

    /// Caller holds `write`.
    fn install(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.current.store(Some(Arc::clone(&session)));
        tracing::debug!(expires_at_ms = ?session.expires_at_ms(), "session stored");

        for sink in &self.sinks {
            if let Err(e) = sink.persist(&session) {
                tracing::warn!(sink = sink.name(), error = %e, "failed to persist session");
            }
        }
        session
    }

    /// Snapshot of the current session.
    #[must_use]
    pub fn session(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    #[must_use]
    pub fn access_token(&self) -> Option<SecretString> {
        self.current
            .load()
            .as_ref()
            .map(|s| s.access_token().clone())
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.current
            .load()
            .as_ref()
            .map(|s| s.refresh_token().clone())
    }

    /// Presence check only; the token itself is not copied.
    #[must_use]
    pub fn has_access_token(&self) -> bool {
        self.current
            .load()
            .as_ref()
            .is_some_and(|s| !s.access_token().is_empty())
    }

    /// Remaining lifetime, clamped at zero.
    ///
    /// `None` when there is no session or its expiry is unknown.
    #[must_use]
    pub fn time_until_expiry(&self) -> Option<Duration> {
        let expires_at = self.current.load().as_ref()?.expires_at_ms()?;
        let remaining = expires_at.saturating_sub(self.clock.now_ms());
        Some(Duration::from_millis(remaining))
    }

    /// True without a session, or once `now` is within the expiry buffer of
    /// the expiry instant. A session with unknown expiry never expires
    /// locally; the server's 401 decides.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let guard = self.current.load();
        let Some(session) = guard.as_ref() else {
            return true;
        };
        let Some(expires_at) = session.expires_at_ms() else {
            return false;
        };
        let buffer_ms = u64::try_from(self.expiry_buffer.as_millis()).unwrap_or(u64::MAX);
        self.clock.now_ms() >= expires_at.saturating_sub(buffer_ms)
    }

    /// Drop the session and every persisted copy. Idempotent.
    pub fn clear(&self) {
        drop(self.take());
    }

    /// Clear, returning the session that was removed. Exactly one of several
    /// racing callers observes `Some`.
    pub(crate) fn take(&self) -> Option<Arc<Session>> {
        let _write = self.write.lock();
        self.remove_all()
    }

    /// Clear only if `expected` is still the current session.
    pub(crate) fn take_if_current(&self, expected: &Arc<Session>) -> Option<Arc<Session>> {
        let _write = self.write.lock();
        if !self.is_current(expected) {
            return None;
        }
        self.remove_all()
    }

    /// Caller holds `write`.
    fn remove_all(&self) -> Option<Arc<Session>> {
        let previous = self.current.swap(None);
        if previous.is_some() {
            tracing::debug!("session cleared");
        }

        for sink in &self.sinks {
            if let Err(e) = sink.remove() {
                tracing::warn!(sink = sink.name(), error = %e, "failed to remove persisted session");
            }
        }
        previous
    }

    /// Load the session from the first sink that has one.
    ///
    /// The restored session is written back to every sink so presence
    /// markers agree with it.
    #[must_use = "returns None when no sink had a session"]
    pub fn restore(&self) -> Option<Arc<Session>> {
        for sink in &self.sinks {
            match sink.load() {
                Ok(Some(session)) => {
                    tracing::info!(sink = sink.name(), "session restored");
                    return Some(self.replace(session));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(sink = sink.name(), error = %e, "failed to load persisted session");
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_session", &self.current.load().is_some())
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("expiry_buffer", &self.expiry_buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const NOW: u64 = 1_700_000_000_000;

    fn store() -> (Arc<ManualClock>, TokenStore) {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = TokenStore::new(clock.clone());
        (clock, store)
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Option<Session>>,
        removes: Mutex<usize>,
    }

    impl TokenSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn persist(&self, session: &Session) -> io::Result<()> {
            *self.saved.lock() = Some(session.clone());
            Ok(())
        }

        fn load(&self) -> io::Result<Option<Session>> {
            Ok(self.saved.lock().clone())
        }

        fn remove(&self) -> io::Result<()> {
            *self.saved.lock() = None;
            *self.removes.lock() += 1;
            Ok(())
        }
    }

    struct BrokenSink;

    impl TokenSink for BrokenSink {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn persist(&self, _: &Session) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }

        fn load(&self) -> io::Result<Option<Session>> {
            Err(io::Error::other("unreadable"))
        }

        fn remove(&self) -> io::Result<()> {
            Err(io::Error::other("read-only"))
        }
    }

    #[test]
    fn set_round_trip() {
        let (_, store) = store();
        store.set("a", "r", 60);

        assert_eq!(store.access_token().unwrap().expose(), "a");
        assert_eq!(store.refresh_token().unwrap().expose(), "r");
        assert_eq!(store.time_until_expiry(), Some(Duration::from_secs(60)));
        assert_eq!(store.session().unwrap().expires_at_ms(), Some(NOW + 60_000));
    }

    #[test]
    fn empty_store() {
        let (_, store) = store();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(store.time_until_expiry().is_none());
        assert!(store.is_expired());
        assert!(!store.has_access_token());
    }

    #[test]
    fn expiry_boundary_is_thirty_seconds_early() {
        let (clock, store) = store();
        store.set("a", "r", 60);

        clock.set(NOW + 60_000 - 30_001);
        assert!(!store.is_expired());

        clock.set(NOW + 60_000 - 30_000);
        assert!(store.is_expired());
    }

    #[test]
    fn custom_expiry_buffer() {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = TokenStore::new(clock.clone()).with_expiry_buffer(Duration::ZERO);
        store.set("a", "r", 60);

        clock.set(NOW + 59_999);
        assert!(!store.is_expired());
        clock.set(NOW + 60_000);
        assert!(store.is_expired());
    }

    #[test]
    fn time_until_expiry_clamps_at_zero() {
        let (clock, store) = store();
        store.set("a", "r", 1);
        clock.advance(Duration::from_secs(10));
        assert_eq!(store.time_until_expiry(), Some(Duration::ZERO));
    }

    #[test]
    fn unknown_expiry_is_not_expired() {
        let (_, store) = store();
        store.set_unbounded("a", "r");
        assert!(!store.is_expired());
        assert!(store.time_until_expiry().is_none());
    }

    #[test]
    fn apply_grant_uses_reported_lifetime() {
        let (_, store) = store();
        let grant = TokenGrant {
            access_token: "new-a".into(),
            refresh_token: "new-r".into(),
            expires_in: Some(900),
        };
        let session = store.apply_grant(&grant);
        assert_eq!(session.access_token().expose(), "new-a");
        assert_eq!(store.time_until_expiry(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn clear_is_idempotent() {
        let (_, store) = store();
        store.set("a", "r", 60);
        store.clear();
        store.clear();
        assert!(store.access_token().is_none());
        assert!(store.is_expired());
    }

    #[test]
    fn take_reports_the_removed_session_once() {
        let (_, store) = store();
        store.set("a", "r", 60);
        assert!(store.take().is_some());
        assert!(store.take().is_none());
    }

    #[test]
    fn grant_for_a_cleared_session_is_discarded() {
        let sink = Arc::new(RecordingSink::default());
        let store = TokenStore::new(Arc::new(ManualClock::new(NOW))).with_sink(sink.clone());
        store.set("a", "r", 60);
        let refreshed = store.session().unwrap();
        store.clear();

        let grant = TokenGrant {
            access_token: "late-a".into(),
            refresh_token: "late-r".into(),
            expires_in: Some(900),
        };
        assert!(store.apply_grant_if_current(&refreshed, &grant).is_none());
        assert!(store.session().is_none());
        assert!(sink.saved.lock().is_none());
    }

    #[test]
    fn grant_for_a_replaced_session_is_discarded() {
        let (_, store) = store();
        store.set("a", "r", 60);
        let refreshed = store.session().unwrap();
        store.set("b", "s", 60);

        let grant = TokenGrant {
            access_token: "late-a".into(),
            refresh_token: "late-r".into(),
            expires_in: None,
        };
        assert!(store.apply_grant_if_current(&refreshed, &grant).is_none());
        assert!(store.take_if_current(&refreshed).is_none());
        assert_eq!(store.access_token().unwrap().expose(), "b");

        let current = store.session().unwrap();
        let stored = store.apply_grant_if_current(&current, &grant).unwrap();
        assert_eq!(stored.access_token().expose(), "late-a");
        assert!(store.take_if_current(&stored).is_some());
    }

    #[test]
    fn racing_writers_leave_sinks_matching_memory() {
        let sink = Arc::new(RecordingSink::default());
        let store = TokenStore::new(Arc::new(ManualClock::new(NOW))).with_sink(sink.clone());

        for _ in 0..50 {
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    for i in 0..20 {
                        store.set(format!("a-{i}"), "r", 60);
                    }
                });
                scope.spawn(|| {
                    for _ in 0..20 {
                        store.clear();
                    }
                });
            });

            let in_memory = store.access_token().map(|t| t.expose().to_owned());
            let persisted = sink
                .saved
                .lock()
                .as_ref()
                .map(|s| s.access_token().expose().to_owned());
            assert_eq!(in_memory, persisted);
        }
    }

    #[test]
    fn sinks_mirror_set_and_clear() {
        let sink = Arc::new(RecordingSink::default());
        let store = TokenStore::new(Arc::new(ManualClock::new(NOW))).with_sink(sink.clone());

        store.set("a", "r", 60);
        assert_eq!(
            sink.saved.lock().as_ref().unwrap().access_token().expose(),
            "a"
        );

        store.clear();
        assert!(sink.saved.lock().is_none());
        assert_eq!(*sink.removes.lock(), 1);
    }

    #[test]
    fn failing_sink_does_not_block_memory_update() {
        let store = TokenStore::new(Arc::new(ManualClock::new(NOW))).with_sink(Arc::new(BrokenSink));
        store.set("a", "r", 60);
        assert!(store.has_access_token());
        store.clear();
        assert!(!store.has_access_token());
    }

    #[test]
    fn restore_skips_failing_sinks() {
        let good = Arc::new(RecordingSink::default());
        *good.saved.lock() = Some(Session::new("a".into(), "r".into(), Some(NOW + 5_000)));

        let store = TokenStore::new(Arc::new(ManualClock::new(NOW)))
            .with_sink(Arc::new(BrokenSink))
            .with_sink(good);

        let restored = store.restore().unwrap();
        assert_eq!(restored.refresh_token().expose(), "r");
        assert_eq!(store.time_until_expiry(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn restore_without_sinks_is_none() {
        let (_, store) = store();
        assert!(store.restore().is_none());
    }
}
