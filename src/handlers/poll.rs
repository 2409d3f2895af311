//! Bounded polling of a submitted render
//!
//! [`PollState::next`] is the whole transition table; [`RenderPoller`] only
//! feeds it status snapshots and sleeps on the injected [`Clock`] in between.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::error::ExportError;
use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::provider::{ProviderError, RenderProvider, RenderState, RenderStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Longest a render is waited for
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 60)
    }
}

impl From<&PollingConfig> for PollPolicy {
    fn from(config: &PollingConfig) -> Self {
        Self::new(config.interval.as_duration(), config.max_attempts)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Submitted,
    /// `attempt` status reads done, none terminal
    Polling { attempt: u32 },
    Completed(RenderStatus),
    Failed(String),
    TimedOut { attempts: u32 },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PollState::Completed(_) | PollState::Failed(_) | PollState::TimedOut { .. }
        )
    }

    /// Status reads performed so far
    pub fn attempts(&self) -> u32 {
        match self {
            PollState::Submitted => 0,
            PollState::Polling { attempt } => *attempt,
            PollState::TimedOut { attempts } => *attempts,
            PollState::Completed(_) | PollState::Failed(_) => 0,
        }
    }

    /// Advance after one status read. `None` means the read itself failed
    /// transiently; it still uses up an attempt.
    pub fn next(self, policy: &PollPolicy, snapshot: Option<RenderStatus>) -> PollState {
        if self.is_terminal() {
            return self;
        }
        let attempt = self.attempts() + 1;

        match snapshot {
            Some(status) if status.state == RenderState::Completed => PollState::Completed(status),
            Some(status) if status.state == RenderState::Failed => PollState::Failed(
                status
                    .error
                    .unwrap_or_else(|| "provider reported failure without a message".into()),
            ),
            _ if attempt >= policy.max_attempts => PollState::TimedOut { attempts: attempt },
            _ => PollState::Polling { attempt },
        }
    }
}

pub struct RenderPoller<'a> {
    provider: &'a dyn RenderProvider,
    clock: &'a dyn Clock,
    policy: PollPolicy,
}

impl<'a> RenderPoller<'a> {
    pub fn new(provider: &'a dyn RenderProvider, clock: &'a dyn Clock, policy: PollPolicy) -> Self {
        Self {
            provider,
            clock,
            policy,
        }
    }

    async fn read(&self, correlation_id: &str) -> Result<Option<RenderStatus>, ExportError> {
        match self.provider.status(correlation_id).await {
            Ok(status) => Ok(Some(status)),
            Err(ProviderError::Unavailable(e)) => {
                warn!(correlation_id, error = %e, "Status check failed, counting as in progress");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait-then-check until the render is terminal or the budget is spent.
    /// On timeout the render is cancelled best-effort.
    pub async fn wait(&self, correlation_id: &str) -> Result<RenderStatus, ExportError> {
        let mut state = PollState::Submitted;
        debug!(correlation_id, budget = ?self.policy.budget(), "Waiting for render");

        loop {
            match state {
                PollState::Completed(status) => return Ok(status),
                PollState::Failed(message) => return Err(ExportError::ProviderFailure(message)),
                PollState::TimedOut { attempts } => {
                    match self.provider.cancel(correlation_id).await {
                        Ok(cancelled) => info!(correlation_id, cancelled, "Cancelled timed out render"),
                        Err(e) => warn!(correlation_id, error = %e, "Cancel after timeout failed"),
                    }
                    return Err(ExportError::Timeout {
                        attempts,
                        waited: self.policy.interval * attempts,
                    });
                }
                PollState::Submitted | PollState::Polling { .. } => {
                    self.clock.sleep(self.policy.interval).await;
                    let snapshot = self.read(correlation_id).await?;
                    debug!(
                        correlation_id,
                        attempt = state.attempts() + 1,
                        state = ?snapshot.as_ref().map(|s| s.state),
                        "Polled render status"
                    );
                    state = state.next(&self.policy, snapshot);
                }
            }
        }
    }

    /// One immediate status read; anything but COMPLETED is a failure
    pub async fn check_once(&self, correlation_id: &str) -> Result<RenderStatus, ExportError> {
        let status = self.provider.status(correlation_id).await?;
        match status.state {
            RenderState::Completed => Ok(status),
            RenderState::Failed => Err(ExportError::ProviderFailure(
                status
                    .error
                    .unwrap_or_else(|| "provider reported failure without a message".into()),
            )),
            other => Err(ExportError::ProviderFailure(format!(
                "render not complete on first status check ({:?})",
                other
            ))),
        }
    }
}
