//! Deadline-bounded execution of capacity-change commands.

use std::sync::Arc;
use std::time::Duration;

use stagger_core::clock::after;
use stagger_core::{Clock, Error, Result, RunConfig};
use tracing::{debug, warn};

use crate::backend::MutationBackend;
use crate::command::MutationCommand;
use crate::task::{DetachedTask, TaskState};

/// What the mutator observed. Never proof of the final ceiling: callers
/// re-read the ceiling after every outcome.
#[derive(Debug)]
pub enum MutationOutcome {
    /// The task finished and the backend reported success for this value.
    Applied(u64),
    /// The deadline passed; cancellation was requested.
    TimedOut,
    /// The task finished with an error.
    Failed(Error),
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Runs commands as detached tasks and polls them until a deadline.
pub struct RemoteMutator {
    backend: Arc<dyn MutationBackend>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    cancel_grace: Duration,
}

impl RemoteMutator {
    pub fn new(backend: Arc<dyn MutationBackend>, clock: Arc<dyn Clock>, config: &RunConfig) -> Self {
        Self {
            backend,
            clock,
            poll_interval: config.task_poll_interval,
            cancel_grace: config.cancel_grace,
        }
    }

    /// Authoritative current ceiling.
    pub fn current_capacity(&self, resource_id: &str) -> Result<u64> {
        self.backend.current_capacity(resource_id)
    }

    /// Apply `command`, giving up after `deadline` of clock time.
    pub async fn execute(&self, command: &MutationCommand, deadline: Duration) -> MutationOutcome {
        let started_at = self.clock.now();
        let expires_at = after(started_at, deadline);
        let mut task = DetachedTask::spawn(self.backend.clone(), command.clone(), started_at);

        loop {
            if task.poll() == TaskState::Completed {
                return match task.join().await {
                    Ok(()) => {
                        debug!("Applied {}", command);
                        MutationOutcome::Applied(command.target())
                    }
                    Err(e) => MutationOutcome::Failed(e),
                };
            }

            let now = self.clock.now();
            if now >= expires_at {
                break;
            }
            let remaining = (expires_at - now).to_std().unwrap_or_default();
            self.clock.sleep(self.poll_interval.min(remaining)).await;
        }

        warn!(
            "{} did not complete within {:?}; requesting cancellation",
            command, deadline
        );
        task.cancel(&self.backend, self.cancel_grace).await;
        MutationOutcome::TimedOut
    }
}
