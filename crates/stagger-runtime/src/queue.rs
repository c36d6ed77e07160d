//! Pending steps, one per resource, ordered by due time.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::{CleanupStep, Phase};

#[derive(Debug, Default)]
pub struct StepQueue {
    steps: HashMap<String, CleanupStep>,
    /// (scheduled_at, resource_id) of every entry in `steps`.
    order: BTreeSet<(DateTime<Utc>, String)>,
}

impl StepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a step, replacing the resource's pending one.
    ///
    /// A Lowering step never replaces a Restoring step; returns false when
    /// the step was refused.
    pub fn schedule(&mut self, step: CleanupStep) -> bool {
        if let Some(existing) = self.steps.get(&step.resource_id) {
            if existing.phase == Phase::Restoring && step.phase == Phase::Lowering {
                warn!(
                    "Refusing to queue lowering for {} after its restore was scheduled",
                    step.resource_id
                );
                return false;
            }
        }
        self.remove(&step.resource_id);
        self.order
            .insert((step.scheduled_at, step.resource_id.clone()));
        self.steps.insert(step.resource_id.clone(), step);
        true
    }

    pub fn remove(&mut self, resource_id: &str) -> Option<CleanupStep> {
        let step = self.steps.remove(resource_id)?;
        self.order
            .remove(&(step.scheduled_at, step.resource_id.clone()));
        Some(step)
    }

    pub fn get(&self, resource_id: &str) -> Option<&CleanupStep> {
        self.steps.get(resource_id)
    }

    /// Remove and return every step due at or before `now`, earliest first,
    /// ties by resource id.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<CleanupStep> {
        let due: Vec<String> = self
            .order
            .iter()
            .take_while(|(at, _)| *at <= now)
            .map(|(_, id)| id.clone())
            .collect();
        due.iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Earliest scheduled time.
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        self.order.iter().next().map(|(at, _)| *at)
    }

    /// Remove everything, earliest first.
    pub fn drain(&mut self) -> Vec<CleanupStep> {
        self.pop_due(DateTime::<Utc>::MAX_UTC)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
