//! Detached mutation tasks.
//!
//! A command is applied on tokio's blocking pool, outside the scheduler's
//! control task. Aborting the join handle cannot stop a blocking closure
//! that is already running, so cancellation is advisory: the backend is
//! asked to abort, and the task's outcome becomes [`TaskState::Unknown`]
//! until someone re-reads the ceiling.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stagger_core::{Error, Result};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::MutationBackend;
use crate::command::MutationCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Completed,
    CancelRequested,
    /// Cancellation was attempted; whether the command landed is unknown.
    Unknown,
}

/// A command running on the blocking pool.
pub struct DetachedTask {
    command: MutationCommand,
    handle: JoinHandle<Result<()>>,
    state: TaskState,
    started_at: DateTime<Utc>,
}

impl DetachedTask {
    /// Submit `command` to the blocking pool.
    pub fn spawn(
        backend: Arc<dyn MutationBackend>,
        command: MutationCommand,
        started_at: DateTime<Utc>,
    ) -> Self {
        let submitted = command.clone();
        let handle = tokio::task::spawn_blocking(move || backend.apply(&submitted));
        debug!("Submitted detached task: {}", command);
        Self {
            command,
            handle,
            state: TaskState::Running,
            started_at,
        }
    }

    pub fn command(&self) -> &MutationCommand {
        &self.command
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Refresh and return the state. Non-blocking.
    pub fn poll(&mut self) -> TaskState {
        if self.state == TaskState::Running && self.handle.is_finished() {
            self.state = TaskState::Completed;
        }
        self.state
    }

    /// Result of a completed task.
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!(
                "detached task for {} failed: {}",
                self.command.resource_id(),
                e
            ))),
        }
    }

    /// Ask the backend to abort the command, waiting at most `grace` for the
    /// request itself. Leaves the task in [`TaskState::Unknown`].
    pub async fn cancel(&mut self, backend: &Arc<dyn MutationBackend>, grace: Duration) {
        self.state = TaskState::CancelRequested;

        let backend = backend.clone();
        let command = self.command.clone();
        let request = tokio::task::spawn_blocking(move || backend.cancel(&command));
        match tokio::time::timeout(grace, request).await {
            Ok(Ok(Ok(()))) => debug!("Cancel requested: {}", self.command),
            Ok(Ok(Err(e))) => warn!("Cancel of {} failed: {}", self.command, e),
            Ok(Err(e)) => warn!("Cancel task for {} panicked: {}", self.command, e),
            Err(_) => warn!(
                "Cancel of {} did not return within {:?}",
                self.command, grace
            ),
        }

        self.handle.abort();
        self.state = TaskState::Unknown;
    }
}
