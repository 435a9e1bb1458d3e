use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use pipewatch_session::{RefreshScheduler, SessionClient, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, CredentialsConfig};
use crate::poller::Poller;
use crate::signals::wait_for_shutdown;

/// How `run` behaves once signed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Poll every endpoint a single time, then exit.
    pub once: bool,
    /// Skip the logout on exit so a persisted session can be resumed.
    pub keep_session: bool,
}

/// Sign in, keep the session fresh, and poll until stopped.
///
/// # Errors
/// Returns an error if the client cannot be built, sign-in fails, the
/// session expires, or (with `once`) any endpoint fails.
pub async fn run(config: AgentConfig, options: RunOptions) -> Result<()> {
    let client = SessionClient::builder(config.session)
        .build()
        .context("failed to build session client")?;
    sign_in(&client, &config.credentials).await?;

    let shutdown = CancellationToken::new();
    let scheduler = RefreshScheduler::spawn(client.clone(), &shutdown);
    let interval = config.polling.interval;
    let poller = Poller::new(client.clone(), config.polling.endpoints);

    let result = if options.once {
        let report = poller.poll_once().await;
        if report.is_clean() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} of {} endpoint(s) failed",
                report.failed,
                report.failed + report.succeeded
            ))
        }
    } else {
        poll_until_stopped(&client, &poller, interval).await
    };

    // Stop refreshing before signing out.
    shutdown.cancel();
    scheduler.shutdown().await;
    if options.keep_session {
        tracing::info!("keeping session for the next start");
    } else if client.token_store().session().is_some() {
        client.logout().await;
    }

    result
}

async fn sign_in(client: &SessionClient, credentials: &CredentialsConfig) -> Result<()> {
    if client.restore() {
        tracing::info!("resumed persisted session");
        return Ok(());
    }
    let Some(credentials) = credentials.to_credentials() else {
        bail!(
            "no persisted session and no credentials configured (set credentials.username and credentials.password)"
        );
    };
    client.login(&credentials).await.context("login failed")?;
    Ok(())
}

async fn poll_until_stopped(
    client: &SessionClient,
    poller: &Poller,
    interval: Duration,
) -> Result<()> {
    let mut events = client.subscribe_events();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown_signal = wait_for_shutdown();
    tokio::pin!(shutdown_signal);

    tracing::info!(interval_ms = interval.as_millis(), "polling started");
    loop {
        tokio::select! {
            result = &mut shutdown_signal => {
                result?;
                tracing::info!("shutdown requested; stopping");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(SessionEvent::SessionExpired { reason }) => bail!("session expired: {reason}"),
                Ok(SessionEvent::SignedOut) | Err(RecvError::Closed) => bail!("session ended"),
                Ok(SessionEvent::SignedIn | SessionEvent::Refreshed) | Err(RecvError::Lagged(_)) => {}
            },
            _ = ticker.tick() => {
                let report = poller.poll_once().await;
                tracing::debug!(succeeded = report.succeeded, failed = report.failed, "poll pass complete");
            }
        }
    }
}
