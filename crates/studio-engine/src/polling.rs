use std::time::Duration;

use studio_contracts::error::{StudioError, StudioResult};
use studio_contracts::media::{Credential, GenerationResult};
use tracing::debug;

use crate::providers::{AsyncHandle, GenerationAdapter, PollOutcome};
use crate::scheduler::{CancelToken, Scheduler};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Created,
    Polling { attempts: u32 },
    Done(GenerationResult),
    Failed(StudioError),
    TimedOut { attempts: u32 },
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done(_) | Self::Failed(_) | Self::TimedOut { .. }
        )
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Polling { attempts } | Self::TimedOut { attempts } => *attempts,
            _ => 0,
        }
    }
}

/// Drives one vendor-side operation to a terminal state.
///
/// Each `step` performs at most one poll. Once the operation is terminal,
/// `step` returns the cached outcome without calling the adapter again.
pub struct AsyncOperation<'a> {
    adapter: &'a dyn GenerationAdapter,
    handle: AsyncHandle,
    credential: Credential,
    policy: PollPolicy,
    state: OperationState,
}

impl<'a> AsyncOperation<'a> {
    pub fn new(
        adapter: &'a dyn GenerationAdapter,
        handle: AsyncHandle,
        credential: Credential,
        policy: PollPolicy,
    ) -> Self {
        Self {
            adapter,
            handle,
            credential,
            policy,
            state: OperationState::Created,
        }
    }

    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn handle(&self) -> &AsyncHandle {
        &self.handle
    }

    pub fn step(&mut self) -> &OperationState {
        if self.state.is_terminal() {
            return &self.state;
        }
        let attempts = self.state.attempts() + 1;
        debug!(
            provider = %self.handle.provider,
            operation = %self.handle.id,
            attempt = attempts,
            "polling async operation"
        );
        self.state = match self.adapter.poll(&self.handle, &self.credential) {
            Ok(PollOutcome::Done(result)) => OperationState::Done(result),
            Ok(PollOutcome::Failed(message)) => OperationState::Failed(StudioError::provider(
                self.handle.provider.as_str(),
                None,
                message,
            )),
            Ok(PollOutcome::Pending) if attempts >= self.policy.max_attempts => {
                OperationState::TimedOut { attempts }
            }
            Ok(PollOutcome::Pending) => OperationState::Polling { attempts },
            Err(err) => OperationState::Failed(err),
        };
        &self.state
    }

    /// Polls until terminal, sleeping `interval` between polls. Exactly
    /// `max_attempts` polls happen before a timeout.
    pub fn run_to_completion(
        &mut self,
        scheduler: &dyn Scheduler,
        cancel: &CancelToken,
        on_attempt: &mut dyn FnMut(u32, u32),
    ) -> StudioResult<GenerationResult> {
        loop {
            cancel.check()?;
            match self.step().clone() {
                OperationState::Done(result) => return Ok(result),
                OperationState::Failed(err) => return Err(err),
                OperationState::TimedOut { attempts } => {
                    return Err(StudioError::Timeout { attempts })
                }
                OperationState::Polling { attempts } => {
                    on_attempt(attempts, self.policy.max_attempts);
                    scheduler.sleep(self.policy.interval, cancel)?;
                }
                OperationState::Created => {}
            }
        }
    }
}
