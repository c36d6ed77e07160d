//! Capacity-change commands.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use stagger_core::{Error, Result};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.$#@\-]{0,127}$").unwrap());

/// How a mutation behaves when it meets a competing writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Yield quickly on contention; a failure only costs a retry.
    Low,
    /// Wait for locks; used for forced restores, where failure leaves a
    /// resource stuck at a reduced ceiling.
    High,
}

impl Priority {
    /// How long the platform may wait on a competing lock.
    pub fn lock_wait(self) -> Duration {
        match self {
            Self::Low => Duration::from_millis(250),
            Self::High => Duration::from_secs(10),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A validated "set the ceiling of this resource" operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationCommand {
    resource_id: String,
    target: u64,
    priority: Priority,
}

impl MutationCommand {
    /// Build a command, rejecting identifiers outside the platform's naming
    /// rules and zero ceilings.
    pub fn build(resource_id: &str, target: u64, priority: Priority) -> Result<Self> {
        if !IDENTIFIER.is_match(resource_id) {
            return Err(Error::InvalidIdentifier(resource_id.to_string()));
        }
        if target == 0 {
            return Err(Error::InvalidTarget {
                resource: resource_id.to_string(),
                target,
            });
        }
        Ok(Self {
            resource_id: resource_id.to_string(),
            target,
            priority,
        })
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

impl std::fmt::Display for MutationCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SET MAX_CAPACITY {} = {} (priority {})",
            self.resource_id, self.target, self.priority
        )
    }
}
