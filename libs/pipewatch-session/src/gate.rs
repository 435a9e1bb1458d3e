//! Single-flight gate for token refreshes triggered by 401 responses.
//!
//! The first caller to hit a 401 becomes the leader and performs the refresh;
//! everyone arriving while it runs gets a one-shot receiver and waits for the
//! leader's outcome.

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::secret::SecretString;

/// New access token, or why there is none.
pub type RefreshOutcome = Result<SecretString, SessionError>;

/// Waiting list of the in-flight refresh. `None` means no refresh is running.
#[derive(Debug, Default)]
pub struct RefreshGate {
    waiters: Mutex<Option<Vec<oneshot::Sender<RefreshOutcome>>>>,
}

#[derive(Debug)]
pub enum Admission<'a> {
    /// No refresh was running; the caller must perform one and settle the
    /// lease.
    Leader(RefreshLease<'a>),
    /// A refresh is running; await its outcome with [`wait`].
    Follower(oneshot::Receiver<RefreshOutcome>),
}

impl RefreshGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the leader of a new refresh or join the running one.
    #[must_use]
    pub fn admit(&self) -> Admission<'_> {
        let mut slot = self.waiters.lock();
        if let Some(waiters) = slot.as_mut() {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            Admission::Follower(rx)
        } else {
            *slot = Some(Vec::new());
            Admission::Leader(RefreshLease {
                gate: self,
                settled: false,
            })
        }
    }

    /// Join the running refresh, if any, without ever becoming the leader.
    #[must_use]
    pub fn follow(&self) -> Option<oneshot::Receiver<RefreshOutcome>> {
        let mut slot = self.waiters.lock();
        let waiters = slot.as_mut()?;
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        Some(rx)
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.waiters.lock().is_some()
    }

    fn settle(&self, outcome: RefreshOutcome) {
        // Taking the list clears the in-flight flag before anyone is woken,
        // so a waiter that immediately hits another 401 can lead a new refresh.
        let mut waiters = self.waiters.lock().take().unwrap_or_default();
        if !waiters.is_empty() {
            tracing::debug!(
                waiters = waiters.len(),
                success = outcome.is_ok(),
                "releasing requests queued behind token refresh"
            );
        }
        let last = waiters.pop();
        for tx in waiters {
            notify(tx, outcome.clone());
        }
        if let Some(tx) = last {
            notify(tx, outcome);
        }
    }
}

fn notify(tx: oneshot::Sender<RefreshOutcome>, outcome: RefreshOutcome) {
    if tx.send(outcome).is_err() {
        tracing::trace!("refresh waiter dropped before the outcome arrived");
    }
}

/// Obligation to report the outcome of a refresh.
///
/// Dropping an unsettled lease (the leader was cancelled) fails every waiter.
#[derive(Debug)]
#[must_use = "waiters hang until the lease is settled"]
pub struct RefreshLease<'a> {
    gate: &'a RefreshGate,
    settled: bool,
}

impl RefreshLease<'_> {
    pub fn settle(mut self, outcome: RefreshOutcome) {
        self.settled = true;
        self.gate.settle(outcome);
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("token refresh abandoned before completion");
            self.gate.settle(Err(abandoned()));
        }
    }
}

/// Await the outcome of a refresh joined via [`Admission::Follower`] or
/// [`RefreshGate::follow`].
///
/// # Errors
///
/// The leader's failure, or [`SessionError::SessionExpired`] if the leader
/// vanished without reporting.
pub async fn wait(rx: oneshot::Receiver<RefreshOutcome>) -> RefreshOutcome {
    rx.await.unwrap_or_else(|_| Err(abandoned()))
}

fn abandoned() -> SessionError {
    SessionError::SessionExpired("token refresh abandoned".to_owned())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn expect_leader(admission: Admission<'_>) -> RefreshLease<'_> {
        match admission {
            Admission::Leader(lease) => lease,
            Admission::Follower(_) => panic!("expected leader"),
        }
    }

    fn expect_follower(admission: Admission<'_>) -> oneshot::Receiver<RefreshOutcome> {
        match admission {
            Admission::Follower(rx) => rx,
            Admission::Leader(_) => panic!("expected follower"),
        }
    }

    #[tokio::test]
    async fn followers_receive_leader_outcome() {
        let gate = RefreshGate::new();
        let lease = expect_leader(gate.admit());
        let a = expect_follower(gate.admit());
        let b = expect_follower(gate.admit());
        assert!(gate.is_in_flight());

        lease.settle(Ok("fresh".into()));
        assert!(!gate.is_in_flight());

        assert_eq!(wait(a).await.unwrap().expose(), "fresh");
        assert_eq!(wait(b).await.unwrap().expose(), "fresh");
    }

    #[tokio::test]
    async fn failure_reaches_every_follower() {
        let gate = RefreshGate::new();
        let lease = expect_leader(gate.admit());
        let rx = expect_follower(gate.admit());

        lease.settle(Err(SessionError::SessionExpired("refresh rejected".into())));
        assert_eq!(
            wait(rx).await.unwrap_err(),
            SessionError::SessionExpired("refresh rejected".into())
        );
    }

    #[tokio::test]
    async fn dropped_lease_fails_followers() {
        let gate = RefreshGate::new();
        let lease = expect_leader(gate.admit());
        let rx = expect_follower(gate.admit());

        drop(lease);
        assert!(!gate.is_in_flight());
        assert!(matches!(
            wait(rx).await,
            Err(SessionError::SessionExpired(_))
        ));
    }

    #[test]
    fn gate_reopens_after_settle() {
        let gate = RefreshGate::new();
        expect_leader(gate.admit()).settle(Ok("one".into()));
        let second = expect_leader(gate.admit());
        second.settle(Ok("two".into()));
    }

    #[test]
    fn follow_without_refresh_is_none() {
        let gate = RefreshGate::new();
        assert!(gate.follow().is_none());
        let lease = expect_leader(gate.admit());
        assert!(gate.follow().is_some());
        lease.settle(Ok("t".into()));
    }
}
