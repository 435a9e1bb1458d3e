//! Proactive token refresh ahead of expiry.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RefreshPolicy;
use crate::dispatcher::SessionClient;
use crate::error::SessionError;
use crate::lifecycle::SessionEvent;

/// Delay until the next proactive refresh.
///
/// Unknown expiry uses the policy default; an already expired session
/// refreshes immediately; otherwise the configured share of the remaining
/// lifetime, rounded down to the millisecond.
#[must_use]
pub fn next_refresh_delay(time_until_expiry: Option<Duration>, policy: &RefreshPolicy) -> Duration {
    let Some(remaining) = time_until_expiry else {
        return policy.default_delay;
    };
    let ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
    let percent = u64::from(policy.refresh_at_percent.min(100));
    // floor(ms * percent / 100) without overflowing for large `ms`
    let delay_ms = ms / 100 * percent + ms % 100 * percent / 100;
    Duration::from_millis(delay_ms)
}

/// Owns the background refresh task. Dropping the handle cancels it.
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop the timer; an in-flight refresh call is not interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "refresh scheduler task failed");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns the proactive refresh loop for a [`SessionClient`].
pub struct RefreshScheduler;

impl RefreshScheduler {
    /// Start refreshing `client`'s session before it expires.
    ///
    /// The task ends when the handle is cancelled or dropped, when `cancel`
    /// (a parent token) fires, or when the session ends.
    #[must_use = "dropping the handle stops the scheduler"]
    pub fn spawn(client: SessionClient, parent: &CancellationToken) -> SchedulerHandle {
        let cancel = parent.child_token();
        let task = tokio::spawn(run(client, cancel.clone()));
        SchedulerHandle {
            cancel,
            task: Some(task),
        }
    }
}

async fn run(client: SessionClient, cancel: CancellationToken) {
    let policy = client.config().refresh.clone();
    let mut events = client.subscribe_events();

    loop {
        if client.token_store().session().is_none() {
            tracing::debug!("no session; refresh scheduler stopping");
            return;
        }

        let delay = next_refresh_delay(client.token_store().time_until_expiry(), &policy);
        tracing::debug!(delay_ms = delay.as_millis(), "next proactive refresh scheduled");

        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("refresh scheduler cancelled");
                return;
            }
            event = events.recv() => match event {
                // New expiry; recompute the timer.
                Ok(SessionEvent::SignedIn | SessionEvent::Refreshed) | Err(RecvError::Lagged(_)) => continue,
                Ok(SessionEvent::SessionExpired { .. } | SessionEvent::SignedOut) | Err(RecvError::Closed) => {
                    tracing::debug!("session ended; refresh scheduler stopping");
                    return;
                }
            },
            () = tokio::time::sleep(delay) => {}
        }

        if !refresh_with_backoff(&client, &policy, &cancel).await {
            return;
        }
    }
}

/// Refresh, retrying with exponential backoff. Returns `false` once the
/// session is over.
async fn refresh_with_backoff(
    client: &SessionClient,
    policy: &RefreshPolicy,
    cancel: &CancellationToken,
) -> bool {
    let mut backoff = policy.initial_backoff;
    let mut retries = 0_u32;

    loop {
        let err = match client.refresh_proactively().await {
            Ok(()) => return true,
            Err(e) => e,
        };

        if is_terminal(&err) || retries >= policy.max_retries {
            tracing::warn!(error = %err, attempts = retries + 1, "proactive refresh failed; ending session");
            client.terminate_session(&err.to_string());
            return false;
        }

        retries += 1;
        tracing::warn!(
            error = %err,
            retry = retries,
            backoff_ms = backoff.as_millis(),
            "proactive refresh failed; retrying"
        );

        tokio::select! {
            () = cancel.cancelled() => return false,
            () = tokio::time::sleep(backoff) => {}
        }
        backoff = backoff.saturating_mul(2);

        if client.token_store().session().is_none() {
            return false;
        }
    }
}

/// Failures that another attempt cannot fix.
fn is_terminal(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::Auth(_)
            | SessionError::SessionExpired(_)
            | SessionError::Config(_)
            | SessionError::Request(_)
    )
}
