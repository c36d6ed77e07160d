//! Scheduler. Staggers lowering across resources, restores each one after
//! the reclaimer's processing window, and force-restores whatever is still
//! pending when the time budget runs out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stagger_core::clock::after;
use stagger_core::{codes, Clock, Error, Resource, ResourceDiscovery, Result, RunConfig};
use stagger_mutate::{MutationBackend, MutationCommand, MutationOutcome, Priority, RemoteMutator};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::ErrorCollector;
use crate::queue::StepQueue;
use crate::types::*;

/// How a verified mutation reached its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verified {
    /// The ceiling was already at the target; nothing was sent.
    AlreadyAtTarget,
    Applied,
    /// The mutator gave up but the command landed anyway.
    LandedAfterTimeout,
}

/// Mutable state of one run, owned by the control task.
struct RunState {
    queue: StepQueue,
    errors: ErrorCollector,
    resources: Vec<ResourceReport>,
    index: HashMap<String, usize>,
}

impl RunState {
    fn report_mut(&mut self, resource_id: &str) -> Option<&mut ResourceReport> {
        let i = *self.index.get(resource_id)?;
        self.resources.get_mut(i)
    }

    fn original_capacity(&self, resource_id: &str) -> Option<u64> {
        let i = *self.index.get(resource_id)?;
        self.resources.get(i).map(|r| r.original_capacity)
    }

    fn set_status(&mut self, resource_id: &str, status: ResourceStatus) {
        if let Some(report) = self.report_mut(resource_id) {
            report.status = status;
        }
    }
}

/// Drives one staggered cleanup run.
pub struct Scheduler {
    config: RunConfig,
    clock: Arc<dyn Clock>,
    discovery: Arc<dyn ResourceDiscovery>,
    mutator: RemoteMutator,
}

impl Scheduler {
    pub fn new(
        config: RunConfig,
        clock: Arc<dyn Clock>,
        discovery: Arc<dyn ResourceDiscovery>,
        backend: Arc<dyn MutationBackend>,
    ) -> Self {
        let mutator = RemoteMutator::new(backend, clock.clone(), &config);
        Self {
            config,
            clock,
            discovery,
            mutator,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Spacing between consecutive lowering steps for `n` resources.
    pub fn step_distance(n: usize, config: &RunConfig) -> Duration {
        if n <= 1 {
            return Duration::ZERO;
        }
        let window = config
            .total_run_budget
            .saturating_sub(config.per_resource_processing_budget);
        let gaps = u32::try_from(n - 1).unwrap_or(u32::MAX);
        window / gaps
    }

    /// Initial timeline: largest original capacity first (ties by id), one
    /// lowering step per resource at `start + rank * step_distance`.
    pub fn build_initial_steps(
        resources: &[Resource],
        config: &RunConfig,
        start: DateTime<Utc>,
    ) -> Vec<CleanupStep> {
        let mut ordered: Vec<&Resource> = resources.iter().collect();
        ordered.sort_by(|a, b| {
            b.original_capacity
                .cmp(&a.original_capacity)
                .then_with(|| a.id.cmp(&b.id))
        });

        let distance = Self::step_distance(ordered.len(), config);
        ordered
            .iter()
            .enumerate()
            .map(|(rank, resource)| {
                #[allow(clippy::cast_possible_truncation)]
                let offset = distance.saturating_mul(rank as u32);
                CleanupStep::lowering(
                    &resource.id,
                    config.lowered_capacity(resource.original_capacity),
                    after(start, offset),
                )
            })
            .collect()
    }

    /// Discover resources and return the timeline a run starting now would
    /// use. Mutates nothing.
    pub fn plan(&self) -> Result<Vec<CleanupStep>> {
        self.config.validate()?;
        let (resources, _) = self.discover()?;
        Ok(Self::build_initial_steps(
            &resources,
            &self.config,
            self.clock.now(),
        ))
    }

    /// Execute one run.
    ///
    /// Returns `Err` only when the run could not start (invalid config,
    /// discovery failure). Per-resource failures are in the report; use
    /// [`RunReport::into_result`] for the pass/fail signal.
    pub async fn run(&self) -> Result<RunReport> {
        self.config.validate()?;
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let stop_at = after(started_at, self.config.total_run_budget);

        let (resources, rejected) = self.discover()?;
        info!(
            "Run {} started: {} eligible resources, budget={:?}, keep={}%",
            run_id,
            resources.len(),
            self.config.total_run_budget,
            self.config.keep_percentage
        );

        let mut run = self.prepare(&resources, rejected, started_at);

        if resources.is_empty() {
            info!("Run {}: no eligible resources, nothing to do", run_id);
        } else {
            self.drive(&mut run, stop_at).await;
        }

        let timed_out = !run.queue.is_empty();
        if timed_out {
            self.force_restore_remaining(&mut run).await;
        }

        Ok(self.finish(run_id, run, started_at, stop_at, timed_out))
    }

    /// Eligible resources plus the entries that cannot be processed.
    fn discover(&self) -> Result<(Vec<Resource>, Vec<(Resource, Error)>)> {
        let found = self.discovery.list_eligible().map_err(|e| match e {
            Error::Discovery(_) => e,
            other => Error::Discovery(other.to_string()),
        })?;

        let mut seen = HashSet::new();
        let mut usable = Vec::with_capacity(found.len());
        let mut rejected = Vec::new();
        for resource in found {
            if !seen.insert(resource.id.clone()) {
                warn!("Duplicate resource {} in discovery result; ignoring", resource.id);
                continue;
            }
            match MutationCommand::build(&resource.id, resource.original_capacity, Priority::Low) {
                Ok(_) => usable.push(resource),
                Err(e) => rejected.push((resource, e)),
            }
        }
        Ok((usable, rejected))
    }

    fn prepare(
        &self,
        resources: &[Resource],
        rejected: Vec<(Resource, Error)>,
        started_at: DateTime<Utc>,
    ) -> RunState {
        let mut run = RunState {
            queue: StepQueue::new(),
            errors: ErrorCollector::new(),
            resources: Vec::new(),
            index: HashMap::new(),
        };

        for step in Self::build_initial_steps(resources, &self.config, started_at) {
            let original = resources
                .iter()
                .find(|r| r.id == step.resource_id)
                .map(|r| r.original_capacity)
                .unwrap_or(step.target_capacity);
            debug!(
                "Lowering {} to {} at {}",
                step.resource_id, step.target_capacity, step.scheduled_at
            );
            run.index.insert(step.resource_id.clone(), run.resources.len());
            run.resources.push(ResourceReport {
                resource_id: step.resource_id.clone(),
                original_capacity: original,
                lowered_capacity: step.target_capacity,
                status: ResourceStatus::Pending,
                attempts: 0,
                final_capacity: None,
            });
            run.queue.schedule(step);
        }

        for (resource, e) in rejected {
            warn!("Skipping {}: {}", resource.id, e);
            run.errors
                .record(&resource.id, Phase::Lowering, e.code(), e.to_string(), started_at);
            run.resources.push(ResourceReport {
                resource_id: resource.id,
                original_capacity: resource.original_capacity,
                lowered_capacity: resource.original_capacity,
                status: ResourceStatus::Skipped,
                attempts: 0,
                final_capacity: None,
            });
        }

        run
    }

    /// Main loop: process due steps until the queue empties or the budget ends.
    async fn drive(&self, run: &mut RunState, stop_at: DateTime<Utc>) {
        while self.clock.now() <= stop_at && !run.queue.is_empty() {
            let mut due = run.queue.pop_due(self.clock.now()).into_iter();
            while let Some(step) = due.next() {
                if self.clock.now() > stop_at {
                    run.queue.schedule(step);
                    for rest in due.by_ref() {
                        run.queue.schedule(rest);
                    }
                    break;
                }
                self.process_step(run, step).await;
            }

            if run.queue.is_empty() || self.clock.now() > stop_at {
                break;
            }
            self.clock.sleep(self.config.poll_interval).await;
        }
    }

    async fn process_step(&self, run: &mut RunState, mut step: CleanupStep) {
        let id = step.resource_id.clone();
        let result = self
            .apply_verified(
                &id,
                step.target_capacity,
                Priority::Low,
                self.config.mutation_deadline,
            )
            .await;
        let now = self.clock.now();

        match result {
            Ok(how) => match step.phase {
                Phase::Lowering => {
                    let original = run.original_capacity(&id).unwrap_or(step.target_capacity);
                    let restore_at = after(now, self.config.per_resource_processing_budget);
                    info!(
                        "Lowered {} to {} ({:?}); restore to {} at {}",
                        id, step.target_capacity, how, original, restore_at
                    );
                    run.queue
                        .schedule(CleanupStep::restoring(&id, original, restore_at));
                    run.set_status(&id, ResourceStatus::Lowered);
                }
                Phase::Restoring => {
                    run.queue.remove(&id);
                    let resolved = run.errors.resolve_resource(&id);
                    info!(
                        "Restored {} to {} ({:?}); {} earlier errors resolved",
                        id, step.target_capacity, how, resolved
                    );
                    run.set_status(&id, ResourceStatus::Restored);
                }
            },
            Err(e) => {
                step.attempts += 1;
                step.scheduled_at = after(now, self.config.retry_backoff);
                warn!(
                    "{} of {} failed (attempt {}): {}; retrying at {}",
                    step.phase, id, step.attempts, e, step.scheduled_at
                );
                run.errors
                    .record(&id, step.phase, e.code(), e.to_string(), now);
                if let Some(report) = run.report_mut(&id) {
                    report.attempts = step.attempts;
                }
                run.queue.schedule(step);
            }
        }
    }

    /// One forced, high-priority restore per resource still pending.
    async fn force_restore_remaining(&self, run: &mut RunState) {
        let pending = run.queue.drain();
        warn!(
            "Time budget exhausted with {} resources pending; forcing restore",
            pending.len()
        );

        for step in pending {
            let id = step.resource_id;
            let Some(original) = run.original_capacity(&id) else {
                continue;
            };
            let result = self
                .apply_verified(
                    &id,
                    original,
                    Priority::High,
                    self.config.forced_restore_deadline,
                )
                .await;
            match result {
                Ok(how) => {
                    info!("Force-restored {} to {} ({:?})", id, original, how);
                    run.set_status(&id, ResourceStatus::ForceRestored);
                }
                Err(e) => {
                    error!("Forced restore of {} to {} failed: {}", id, original, e);
                    run.errors.record(
                        &id,
                        Phase::Restoring,
                        e.code(),
                        format!("forced restore failed: {}", e),
                        self.clock.now(),
                    );
                    run.set_status(&id, ResourceStatus::RestoreFailed);
                }
            }
        }
    }

    /// Drive `resource_id` to `target` and confirm it by reading the
    /// ceiling back. The mutator's own outcome is only used to explain a
    /// failure.
    async fn apply_verified(
        &self,
        resource_id: &str,
        target: u64,
        priority: Priority,
        deadline: Duration,
    ) -> Result<Verified> {
        match self.mutator.current_capacity(resource_id) {
            Ok(current) if current == target => return Ok(Verified::AlreadyAtTarget),
            Ok(_) => {}
            Err(e) => debug!("Pre-check read of {} failed: {}", resource_id, e),
        }

        let command = MutationCommand::build(resource_id, target, priority)?;
        let outcome = self.mutator.execute(&command, deadline).await;

        match self.mutator.current_capacity(resource_id) {
            Ok(observed) if observed == target => Ok(match outcome {
                MutationOutcome::TimedOut => Verified::LandedAfterTimeout,
                _ => Verified::Applied,
            }),
            Ok(observed) => Err(match outcome {
                MutationOutcome::Failed(e) => e,
                MutationOutcome::TimedOut => Error::Mutation {
                    code: codes::TIMED_OUT,
                    message: format!(
                        "no completion within {:?}; capacity is {}, expected {}",
                        deadline, observed, target
                    ),
                },
                MutationOutcome::Applied(_) => Error::Mutation {
                    code: codes::MISMATCH,
                    message: format!(
                        "reported applied but capacity is {}, expected {}",
                        observed, target
                    ),
                },
            }),
            Err(read_error) => Err(match outcome {
                MutationOutcome::Failed(e) => e,
                _ => read_error,
            }),
        }
    }

    fn finish(
        &self,
        run_id: Uuid,
        mut run: RunState,
        started_at: DateTime<Utc>,
        stop_at: DateTime<Utc>,
        timed_out: bool,
    ) -> RunReport {
        for report in &mut run.resources {
            report.final_capacity = self.mutator.current_capacity(&report.resource_id).ok();
        }

        let summary = if run.errors.has_errors() {
            Some(run.errors.summary(timed_out))
        } else {
            None
        };

        let finished_at = self.clock.now();
        match &summary {
            Some(message) => error!("Run {} finished with errors:\n{}", run_id, message),
            None => info!(
                "Run {} finished: {} restored, {} force-restored, {} errors resolved",
                run_id,
                run.resources
                    .iter()
                    .filter(|r| r.status == ResourceStatus::Restored)
                    .count(),
                run.resources
                    .iter()
                    .filter(|r| r.status == ResourceStatus::ForceRestored)
                    .count(),
                run.errors.records().len()
            ),
        }

        RunReport {
            run_id,
            config: self.config.clone(),
            started_at,
            stop_at,
            finished_at,
            timed_out,
            resources: run.resources,
            errors: run.errors.into_records(),
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use stagger_core::ManualClock;

    fn start() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap()
    }

    #[test]
    fn test_step_distance() {
        let config = RunConfig::default();
        assert_eq!(Scheduler::step_distance(0, &config), Duration::ZERO);
        assert_eq!(Scheduler::step_distance(1, &config), Duration::ZERO);
        assert_eq!(
            Scheduler::step_distance(3, &config),
            Duration::from_secs(90 * 60)
        );

        let mut tight = config.clone();
        tight.per_resource_processing_budget = Duration::from_secs(300 * 60);
        assert_eq!(Scheduler::step_distance(5, &tight), Duration::ZERO);
    }

    #[test]
    fn test_single_resource_starts_immediately() {
        let steps = Scheduler::build_initial_steps(
            &[Resource::new("only", 800)],
            &RunConfig::default(),
            start(),
        );
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].scheduled_at, start());
        assert_eq!(steps[0].target_capacity, 400);
        assert_eq!(steps[0].phase, Phase::Lowering);
    }

    #[test]
    fn test_three_resource_timeline() {
        let resources = vec![
            Resource::new("small", 500),
            Resource::new("large", 2000),
            Resource::new("medium", 1000),
        ];
        let steps = Scheduler::build_initial_steps(&resources, &RunConfig::default(), start());

        let got: Vec<(&str, i64, u64)> = steps
            .iter()
            .map(|s| {
                (
                    s.resource_id.as_str(),
                    (s.scheduled_at - start()).num_minutes(),
                    s.target_capacity,
                )
            })
            .collect();
        assert_eq!(
            got,
            vec![("large", 0, 1000), ("medium", 90, 500), ("small", 180, 250)]
        );
    }

    #[test]
    fn test_ties_broken_by_id() {
        let resources = vec![Resource::new("b", 100), Resource::new("a", 100)];
        let config = RunConfig::default().with_minutes(120);
        let steps = Scheduler::build_initial_steps(&resources, &config, start());
        assert_eq!(steps[0].resource_id, "a");
        assert_eq!(steps[1].resource_id, "b");
        assert_eq!(steps[1].scheduled_at - start(), TimeDelta::minutes(60));
    }

    #[tokio::test]
    async fn test_plan_does_not_mutate() {
        let clock = Arc::new(ManualClock::new(start()));
        let platform = Arc::new(stagger_mutate::MemoryPlatform::new());
        platform.add_store("sales", 2000);
        platform.add_store("orders", 1000);

        let scheduler = Scheduler::new(
            RunConfig::default(),
            clock,
            platform.clone(),
            platform.clone(),
        );
        let plan = scheduler.plan().unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].resource_id, "sales");
        assert_eq!(platform.apply_count("sales"), 0);
        assert_eq!(platform.capacity("sales"), Some(2000));
    }

    #[tokio::test]
    async fn test_apply_verified_skips_when_at_target() {
        let clock = Arc::new(ManualClock::new(start()));
        let platform = Arc::new(stagger_mutate::MemoryPlatform::new());
        platform.add_store("sales", 2000);
        let scheduler = Scheduler::new(
            RunConfig::default(),
            clock,
            platform.clone(),
            platform.clone(),
        );

        for _ in 0..2 {
            let how = scheduler
                .apply_verified("sales", 2000, Priority::High, Duration::from_secs(15))
                .await
                .unwrap();
            assert_eq!(how, Verified::AlreadyAtTarget);
        }
        assert_eq!(platform.apply_count("sales"), 0);

        let how = scheduler
            .apply_verified("sales", 1000, Priority::Low, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(how, Verified::Applied);
        assert_eq!(platform.apply_count("sales"), 1);
    }

    #[tokio::test]
    async fn test_apply_verified_unknown_resource() {
        let clock = Arc::new(ManualClock::new(start()));
        let platform = Arc::new(stagger_mutate::MemoryPlatform::new());
        let scheduler = Scheduler::new(
            RunConfig::default(),
            clock,
            platform.clone(),
            platform,
        );
        let err = scheduler
            .apply_verified("ghost", 10, Priority::Low, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    fn memory_scheduler(
        config: RunConfig,
        clock: &ManualClock,
    ) -> (Scheduler, Arc<stagger_mutate::MemoryPlatform>) {
        let platform = Arc::new(
            stagger_mutate::MemoryPlatform::new().with_clock(Arc::new(clock.clone())),
        );
        platform.add_store("sales", 2000);
        let scheduler = Scheduler::new(
            config,
            Arc::new(clock.clone()),
            platform.clone(),
            platform.clone(),
        );
        (scheduler, platform)
    }

    #[tokio::test]
    async fn test_lowering_schedules_exactly_one_restore() {
        let clock = ManualClock::new(start());
        let config = RunConfig::default();
        let (scheduler, platform) = memory_scheduler(config.clone(), &clock);
        let mut run = scheduler.prepare(&[Resource::new("sales", 2000)], Vec::new(), clock.now());

        let mut due = run.queue.pop_due(clock.now());
        assert_eq!(due.len(), 1);
        scheduler.process_step(&mut run, due.remove(0)).await;
        let succeeded_at = clock.now();

        assert_eq!(platform.capacity("sales"), Some(1000));
        assert_eq!(run.queue.len(), 1);
        let restore = run.queue.get("sales").unwrap();
        assert_eq!(restore.phase, Phase::Restoring);
        assert_eq!(restore.target_capacity, 2000);
        assert_eq!(restore.attempts, 0);
        assert_eq!(
            restore.scheduled_at,
            succeeded_at + TimeDelta::minutes(60)
        );
        assert_eq!(run.resources[0].status, ResourceStatus::Lowered);
    }

    #[tokio::test]
    async fn test_failed_lowering_rescheduled_after_backoff() {
        let clock = ManualClock::new(start());
        let (scheduler, platform) = memory_scheduler(RunConfig::default(), &clock);
        platform.inject("sales", stagger_mutate::Fault::contention());
        let mut run = scheduler.prepare(&[Resource::new("sales", 2000)], Vec::new(), clock.now());

        let step = run.queue.pop_due(clock.now()).remove(0);
        scheduler.process_step(&mut run, step).await;
        let failed_at = clock.now();

        let retry = run.queue.get("sales").unwrap();
        assert_eq!(retry.phase, Phase::Lowering);
        assert_eq!(retry.attempts, 1);
        assert_eq!(retry.scheduled_at, failed_at + TimeDelta::seconds(30));
        assert_eq!(run.errors.records().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_config_rejected_before_mutating() {
        let clock = ManualClock::new(start());
        let mut config = RunConfig::default();
        config.per_resource_processing_budget = Duration::from_secs(u64::MAX / 2);
        let (scheduler, platform) = memory_scheduler(config, &clock);

        assert!(matches!(scheduler.run().await, Err(Error::Config(_))));
        assert!(matches!(scheduler.plan(), Err(Error::Config(_))));
        assert_eq!(platform.apply_count("sales"), 0);

        let clock = ManualClock::new(start());
        let config = RunConfig::default().with_minutes(200_000_000_000);
        let (scheduler, platform) = memory_scheduler(config, &clock);
        assert!(matches!(scheduler.run().await, Err(Error::Config(_))));
        assert!(matches!(scheduler.plan(), Err(Error::Config(_))));
        assert_eq!(platform.apply_count("sales"), 0);
    }

    #[tokio::test]
    async fn test_unvalidated_huge_processing_budget_still_rolls_back() {
        let clock = ManualClock::new(start());
        let mut config = RunConfig::default();
        config.per_resource_processing_budget = Duration::from_secs(u64::MAX / 2);
        let (scheduler, platform) = memory_scheduler(config, &clock);
        let mut run = scheduler.prepare(&[Resource::new("sales", 2000)], Vec::new(), clock.now());

        let step = run.queue.pop_due(clock.now()).remove(0);
        scheduler.process_step(&mut run, step).await;
        assert_eq!(platform.capacity("sales"), Some(1000));
        assert_eq!(
            run.queue.get("sales").unwrap().scheduled_at,
            DateTime::<Utc>::MAX_UTC
        );

        scheduler.force_restore_remaining(&mut run).await;
        assert_eq!(platform.capacity("sales"), Some(2000));
        assert_eq!(run.resources[0].status, ResourceStatus::ForceRestored);
    }

    #[test]
    fn test_initial_steps_saturate_on_huge_budget() {
        let resources = vec![Resource::new("a", 300), Resource::new("b", 200), Resource::new("c", 100)];
        let config = RunConfig::default().with_minutes(u64::MAX);
        let steps = Scheduler::build_initial_steps(&resources, &config, start());
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].scheduled_at, start());
        assert_eq!(steps[2].scheduled_at, DateTime::<Utc>::MAX_UTC);
    }
}
