//! Run configuration and data directory management.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MINUTE: u64 = 60;

/// Upper bound on every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * MINUTE);

/// Paths to all stagger data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Capacity catalog database directory (`data/catalog/`).
    pub catalog: PathBuf,
    /// Run reports (`data/reports/`).
    pub reports: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            catalog: root.join("catalog"),
            reports: root.join("reports"),
            root,
        };
        std::fs::create_dir_all(&paths.catalog)?;
        std::fs::create_dir_all(&paths.reports)?;
        Ok(paths)
    }

    /// Where the report of the most recent run is written.
    pub fn last_report(&self) -> PathBuf {
        self.reports.join("last-run.json")
    }
}

/// Parameters of one staggered cleanup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Window for normal processing; forced restores may run past it.
    pub total_run_budget: Duration,
    /// Lowered ceiling as a percentage of the original (1-100).
    pub keep_percentage: u8,
    /// Time the background reclaimer is given between lowering and restoring.
    pub per_resource_processing_budget: Duration,
    /// Deadline for one ordinary mutation.
    pub mutation_deadline: Duration,
    /// Deadline for the single forced restore at the end of the run.
    pub forced_restore_deadline: Duration,
    /// Delay before a failed step is retried.
    pub retry_backoff: Duration,
    /// Sleep between scheduler passes.
    pub poll_interval: Duration,
    /// How often the mutator checks on its detached task.
    pub task_poll_interval: Duration,
    /// Upper bound on a cancellation request.
    pub cancel_grace: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            total_run_budget: Duration::from_secs(240 * MINUTE),
            keep_percentage: 50,
            per_resource_processing_budget: Duration::from_secs(60 * MINUTE),
            mutation_deadline: Duration::from_secs(5),
            forced_restore_deadline: Duration::from_secs(15),
            retry_backoff: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            task_poll_interval: Duration::from_millis(250),
            cancel_grace: Duration::from_secs(2),
        }
    }
}

impl RunConfig {
    /// Defaults overridden by `STAGGER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(minutes) = env_value::<u64>("STAGGER_MINUTES")? {
            config.total_run_budget = minutes_to_duration("STAGGER_MINUTES", minutes)?;
        }
        if let Some(keep) = env_value::<u8>("STAGGER_KEEP_PERCENT")? {
            config = config.with_keep_percentage(keep);
        }
        if let Some(minutes) = env_value::<u64>("STAGGER_PROCESSING_MINUTES")? {
            config.per_resource_processing_budget =
                minutes_to_duration("STAGGER_PROCESSING_MINUTES", minutes)?;
        }
        if let Some(secs) = env_value::<u64>("STAGGER_MUTATION_DEADLINE_SECS")? {
            config.mutation_deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = env_value::<u64>("STAGGER_FORCED_RESTORE_DEADLINE_SECS")? {
            config.forced_restore_deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = env_value::<u64>("STAGGER_RETRY_BACKOFF_SECS")? {
            config.retry_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = env_value::<u64>("STAGGER_POLL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_minutes(mut self, minutes: u64) -> Self {
        self.total_run_budget = Duration::from_secs(minutes.saturating_mul(MINUTE));
        self
    }

    pub fn with_keep_percentage(mut self, keep: u8) -> Self {
        self.keep_percentage = keep;
        self
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.total_run_budget.is_zero() {
            return Err(Error::Config("run budget must be at least one minute".into()));
        }
        if !(1..=100).contains(&self.keep_percentage) {
            return Err(Error::Config(format!(
                "keep percentage must be between 1 and 100, got {}",
                self.keep_percentage
            )));
        }
        for (name, value) in [
            ("mutation deadline", self.mutation_deadline),
            ("forced restore deadline", self.forced_restore_deadline),
            ("poll interval", self.poll_interval),
            ("task poll interval", self.task_poll_interval),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be positive", name)));
            }
        }
        for (name, value) in [
            ("run budget", self.total_run_budget),
            ("processing budget", self.per_resource_processing_budget),
            ("mutation deadline", self.mutation_deadline),
            ("forced restore deadline", self.forced_restore_deadline),
            ("retry backoff", self.retry_backoff),
            ("poll interval", self.poll_interval),
            ("task poll interval", self.task_poll_interval),
            ("cancel grace", self.cancel_grace),
        ] {
            if value > MAX_DURATION {
                return Err(Error::Config(format!(
                    "{} of {:?} exceeds the maximum of {:?}",
                    name, value, MAX_DURATION
                )));
            }
        }
        Ok(())
    }

    /// Lowered ceiling for a resource, never below 1.
    pub fn lowered_capacity(&self, original: u64) -> u64 {
        let target = u128::from(original) * u128::from(self.keep_percentage) / 100;
        u64::try_from(target).unwrap_or(original).max(1)
    }
}

fn minutes_to_duration(key: &str, minutes: u64) -> Result<Duration> {
    minutes
        .checked_mul(MINUTE)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("{}={} is too large", key, minutes)))
}

fn env_value<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{}={:?} is not a valid value", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.total_run_budget, Duration::from_secs(240 * 60));
        assert_eq!(config.keep_percentage, 50);
        assert_eq!(config.mutation_deadline, Duration::from_secs(5));
        assert_eq!(config.forced_restore_deadline, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_keep_percentage() {
        assert!(RunConfig::default().with_keep_percentage(0).validate().is_err());
        assert!(RunConfig::default().with_keep_percentage(101).validate().is_err());
        assert!(RunConfig::default().with_keep_percentage(100).validate().is_ok());
    }

    #[test]
    fn test_validate_minutes() {
        assert!(RunConfig::default().with_minutes(0).validate().is_err());
        assert!(RunConfig::default().with_minutes(1).validate().is_ok());
        assert!(RunConfig::default().with_minutes(7 * 24 * 60).validate().is_ok());
        assert!(RunConfig::default()
            .with_minutes(7 * 24 * 60 + 1)
            .validate()
            .is_err());
        assert!(RunConfig::default()
            .with_minutes(200_000_000_000)
            .validate()
            .is_err());
        assert!(RunConfig::default().with_minutes(u64::MAX).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_durations() {
        let huge = Duration::from_secs(u64::MAX / 2);
        let setters: [fn(&mut RunConfig, Duration); 7] = [
            |c, d| c.per_resource_processing_budget = d,
            |c, d| c.mutation_deadline = d,
            |c, d| c.forced_restore_deadline = d,
            |c, d| c.retry_backoff = d,
            |c, d| c.poll_interval = d,
            |c, d| c.task_poll_interval = d,
            |c, d| c.cancel_grace = d,
        ];
        for set in setters {
            let mut config = RunConfig::default();
            set(&mut config, huge);
            assert!(matches!(config.validate(), Err(Error::Config(_))));

            let mut config = RunConfig::default();
            set(&mut config, MAX_DURATION);
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_minutes_to_duration_checked() {
        assert_eq!(
            minutes_to_duration("STAGGER_MINUTES", 2).unwrap(),
            Duration::from_secs(120)
        );
        assert!(matches!(
            minutes_to_duration("STAGGER_PROCESSING_MINUTES", u64::MAX),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_lowered_capacity() {
        let config = RunConfig::default();
        assert_eq!(config.lowered_capacity(2000), 1000);
        assert_eq!(config.lowered_capacity(1001), 500);
        assert_eq!(config.lowered_capacity(1), 1);

        let config = config.with_keep_percentage(1);
        assert_eq!(config.lowered_capacity(50), 1);
        assert_eq!(config.lowered_capacity(u64::MAX), u64::MAX / 100);
    }

    #[test]
    fn test_data_paths_created() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path().join("data")).unwrap();
        assert!(paths.catalog.is_dir());
        assert!(paths.reports.is_dir());
        assert!(paths.last_report().ends_with("reports/last-run.json"));
    }
}
