//! Per-run failure log and the aggregated report built from it.

use chrono::{DateTime, Utc};

use crate::types::{ErrorRecord, Phase};

/// Note placed before the aggregated message when the budget ran out.
pub const TIME_BUDGET_NOTE: &str =
    "Time budget exhausted before every resource completed; pending resources were force-restored.";

/// Append-only log of failed attempts for one run.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    records: Vec<ErrorRecord>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        resource_id: &str,
        phase: Phase,
        code: i64,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) {
        self.records.push(ErrorRecord {
            resource_id: resource_id.to_string(),
            code,
            message: message.into(),
            phase,
            at,
            resolved: false,
        });
    }

    /// Mark a resource's records resolved. Returns how many were.
    pub fn resolve_resource(&mut self, resource_id: &str) -> usize {
        let mut count = 0;
        for record in self
            .records
            .iter_mut()
            .filter(|r| r.resource_id == resource_id && !r.resolved)
        {
            record.resolved = true;
            count += 1;
        }
        count
    }

    /// Whether any unresolved record exists.
    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|r| !r.resolved)
    }

    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter().filter(|r| !r.resolved)
    }

    /// One line per unresolved record, optionally after [`TIME_BUDGET_NOTE`].
    pub fn summary(&self, timed_out: bool) -> String {
        let mut lines = Vec::new();
        if timed_out {
            lines.push(TIME_BUDGET_NOTE.to_string());
        }
        lines.extend(self.unresolved().map(|r| {
            format!(
                "Error {} for resource {}: {}",
                r.code, r.resource_id, r.message
            )
        }));
        lines.join("\n")
    }

    pub fn into_records(self) -> Vec<ErrorRecord> {
        self.records
    }
}
