//! Runtime types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use stagger_core::{codes, Error, Result, RunConfig};
use uuid::Uuid;

/// Which half of a resource's cycle a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Lower the ceiling so the background reclaimer starts trimming.
    Lowering,
    /// Put the original ceiling back.
    Restoring,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lowering => write!(f, "lowering"),
            Self::Restoring => write!(f, "restoring"),
        }
    }
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupStep {
    pub resource_id: String,
    pub target_capacity: u64,
    pub scheduled_at: DateTime<Utc>,
    pub phase: Phase,
    /// Failed attempts so far.
    pub attempts: u32,
}

impl CleanupStep {
    pub fn lowering(resource_id: &str, target_capacity: u64, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(resource_id, target_capacity, scheduled_at, Phase::Lowering)
    }

    pub fn restoring(resource_id: &str, original_capacity: u64, scheduled_at: DateTime<Utc>) -> Self {
        Self::new(resource_id, original_capacity, scheduled_at, Phase::Restoring)
    }

    fn new(resource_id: &str, target_capacity: u64, scheduled_at: DateTime<Utc>, phase: Phase) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            target_capacity,
            scheduled_at,
            phase,
            attempts: 0,
        }
    }
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub resource_id: String,
    pub code: i64,
    pub message: String,
    pub phase: Phase,
    pub at: DateTime<Utc>,
    /// Set once the resource completed its cycle through its own restore step.
    pub resolved: bool,
}

/// Where a resource ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// Waiting for its lowering step.
    Pending,
    /// Lowered; waiting for its restore step.
    Lowered,
    /// Lowered and restored on schedule.
    Restored,
    /// Restored by the forced rollback at the end of the run.
    ForceRestored,
    /// The forced rollback failed; the ceiling may still be reduced.
    RestoreFailed,
    /// Never touched because the platform entry is unusable.
    Skipped,
}

/// Per-resource outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReport {
    pub resource_id: String,
    pub original_capacity: u64,
    pub lowered_capacity: u64,
    pub status: ResourceStatus,
    pub attempts: u32,
    /// Ceiling read back at the end of the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_capacity: Option<u64>,
}

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub config: RunConfig,
    pub started_at: DateTime<Utc>,
    pub stop_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Normal processing ended because the budget ran out.
    pub timed_out: bool,
    pub resources: Vec<ResourceReport>,
    /// Every failed attempt, resolved or not.
    pub errors: Vec<ErrorRecord>,
    /// Aggregated message when unresolved errors remain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl RunReport {
    pub fn resource(&self, resource_id: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.resource_id == resource_id)
    }

    pub fn unresolved_errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter().filter(|e| !e.resolved)
    }

    pub fn has_unresolved_errors(&self) -> bool {
        self.summary.is_some()
    }

    pub fn count(&self, status: ResourceStatus) -> usize {
        self.resources.iter().filter(|r| r.status == status).count()
    }

    /// The run's termination signal: `Err(RunFailed)` carrying the aggregated
    /// message when unresolved errors remain.
    pub fn into_result(self) -> Result<Self> {
        match &self.summary {
            Some(message) => Err(Error::RunFailed {
                code: codes::RUN_FAILED,
                message: message.clone(),
            }),
            None => Ok(self),
        }
    }
}
