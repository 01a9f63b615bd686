//! Log synchronizer: relays a function's remote log to a local consumer.
//!
//! The synchronizer is an explicit state machine:
//!
//! ```text
//! Idle -> Polling -> Delivering -> (Stopped | sleep -> Polling)
//!            |
//!            +-> Backoff -> Polling ... -> LogFetchExhausted
//! ```
//!
//! In one-shot mode it polls until the service stops advertising pages or the
//! poll budget is spent. In follow mode it polls forever, one poll interval
//! apart, until the [`CancellationToken`] fires. Cancellation is only observed
//! between polls, so a page is either delivered whole or not at all, and
//! [`LogSynchronizer::cursor`] is always the position to resume from.
//!
//! Waiting goes through the [`Sleeper`] trait so tests run without real time.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::LogSource;
use crate::error::{Error, Result};
use crate::log_entry::{LogCursor, LogEntry, LogPage};

/// Delay between polls in follow mode.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// First backoff delay after a transient failure; doubles per attempt.
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(3);

/// Attempts per poll before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Source of delays for polling and backoff.
pub trait Sleeper {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// What follow mode does once a poll exhausts its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExhaustionPolicy {
    /// Stop and return `Error::LogFetchExhausted`
    #[default]
    Abort,

    /// Log a warning and poll again after one poll interval
    KeepPolling,
}

/// Timing and retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Delay between polls in follow mode
    pub poll_interval: Duration,

    /// Delay after the first failed attempt
    pub base_backoff: Duration,

    /// Attempt ceiling per poll
    pub max_attempts: u32,

    /// Follow-mode behavior after the ceiling is hit
    pub on_exhausted: ExhaustionPolicy,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            on_exhausted: ExhaustionPolicy::Abort,
        }
    }
}

/// How long the synchronizer keeps polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Fetch what is available, at most `max_polls` pages
    OneShot { max_polls: u32 },

    /// Poll until cancelled
    Follow,
}

impl SyncMode {
    /// One-shot mode with a single poll.
    pub fn one_shot() -> Self {
        SyncMode::OneShot { max_polls: 1 }
    }

    pub fn is_follow(self) -> bool {
        matches!(self, SyncMode::Follow)
    }
}

/// Current state of the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Polling { attempt: u32 },
    Delivering,
    Backoff { attempt: u32, delay: Duration },
    Stopped,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The service sent no token for a further page
    CaughtUp,

    /// The one-shot poll budget ran out while more pages were advertised
    BudgetSpent,

    /// The cancellation token fired
    Cancelled,
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Entries handed to the consumer
    pub delivered: u64,

    /// Successful polls
    pub polls: u64,

    /// Position to resume from
    pub cursor: LogCursor,

    pub stop_reason: StopReason,
}

/// Polls a [`LogSource`] and relays entries in the order the service assigns.
#[derive(Debug)]
pub struct LogSynchronizer<S, D = TokioSleeper> {
    source: S,
    sleeper: D,
    policy: SyncPolicy,
    mode: SyncMode,
    cursor: LogCursor,
    state: SyncState,
}

impl<S: LogSource> LogSynchronizer<S, TokioSleeper> {
    /// Create a synchronizer starting at `cursor` with the default policy.
    pub fn new(source: S, mode: SyncMode, cursor: LogCursor) -> Self {
        Self::with_sleeper(source, TokioSleeper, mode, cursor)
    }
}

impl<S: LogSource, D: Sleeper> LogSynchronizer<S, D> {
    /// Create a synchronizer that waits through `sleeper`.
    pub fn with_sleeper(source: S, sleeper: D, mode: SyncMode, cursor: LogCursor) -> Self {
        Self {
            source,
            sleeper,
            policy: SyncPolicy::default(),
            mode,
            cursor,
            state: SyncState::Idle,
        }
    }

    /// Replace the timing and retry policy.
    pub fn with_policy(mut self, policy: SyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Position to resume from.
    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Run until the mode's stop condition, cancellation, or a fatal error.
    ///
    /// Entries are passed to `sink` one at a time, in arrival order.
    ///
    /// # Errors
    ///
    /// - `Error::LogFetchExhausted` when a poll fails transiently
    ///   `max_attempts` times (unless follow mode keeps polling)
    /// - the converted client error for any non-retryable failure
    pub async fn run<F>(&mut self, cancel: &CancellationToken, mut sink: F) -> Result<SyncOutcome>
    where
        F: FnMut(LogEntry),
    {
        let mut delivered: u64 = 0;
        let mut polls: u64 = 0;

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let page = match self.poll(cancel).await {
                Ok(Some(page)) => page,
                Ok(None) => break StopReason::Cancelled,
                Err(err @ Error::LogFetchExhausted { .. })
                    if self.mode.is_follow()
                        && self.policy.on_exhausted == ExhaustionPolicy::KeepPolling =>
                {
                    warn!(error = %err, "Log endpoint unavailable, keeping stream open");
                    if !self.pause(self.policy.poll_interval, cancel).await {
                        break StopReason::Cancelled;
                    }
                    continue;
                }
                Err(err) => {
                    self.state = SyncState::Stopped;
                    return Err(err);
                }
            };
            polls += 1;

            let has_more = page.has_more();
            delivered += self.deliver(page, &mut sink);

            match self.mode {
                SyncMode::OneShot { max_polls } => {
                    if !has_more {
                        break StopReason::CaughtUp;
                    }
                    if polls >= u64::from(max_polls) {
                        break StopReason::BudgetSpent;
                    }
                }
                SyncMode::Follow => {
                    if !self.pause(self.policy.poll_interval, cancel).await {
                        break StopReason::Cancelled;
                    }
                }
            }
        };

        self.state = SyncState::Stopped;
        info!(
            delivered = delivered,
            polls = polls,
            stop_reason = ?stop_reason,
            "Log synchronization stopped"
        );

        Ok(SyncOutcome {
            delivered,
            polls,
            cursor: self.cursor.clone(),
            stop_reason,
        })
    }

    /// Hand a page to the consumer and move the cursor past it.
    fn deliver<F>(&mut self, page: LogPage, sink: &mut F) -> u64
    where
        F: FnMut(LogEntry),
    {
        self.state = SyncState::Delivering;
        let next = self.cursor.advance(&page);
        let count = page.len() as u64;

        for entry in page.entries {
            sink(entry);
        }
        self.cursor = next;

        debug!(entries = count, cursor = ?self.cursor, "Delivered log page");
        count
    }

    /// One poll with bounded retry. `Ok(None)` means cancelled during backoff.
    async fn poll(&mut self, cancel: &CancellationToken) -> Result<Option<LogPage>> {
        let follow = self.mode.is_follow();
        let mut delay = self.policy.base_backoff;
        let mut attempt: u32 = 1;

        loop {
            self.state = SyncState::Polling { attempt };

            match self.source.fetch(&self.cursor, follow).await {
                Ok(page) => return Ok(Some(page)),
                Err(err) if err.is_retryable() => {
                    if attempt >= self.policy.max_attempts {
                        error!(
                            error = %err,
                            attempts = attempt,
                            "Log fetch failed, attempts exhausted"
                        );
                        return Err(Error::LogFetchExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }

                    self.state = SyncState::Backoff { attempt, delay };
                    warn!(
                        error = %err,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis(),
                        "Log fetch failed, backing off"
                    );
                    if !self.pause(delay, cancel).await {
                        return Ok(None);
                    }

                    attempt += 1;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => {
                    error!(error = %err, "Log fetch failed permanently");
                    return Err(err.into());
                }
            }
        }
    }

    /// Sleep for `delay`; returns `false` if cancelled first.
    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.sleeper.sleep(delay) => true,
        }
    }
}
