//! Capacity-limited resources and the discovery seam.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One capacity-limited store eligible for staggered cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Unique name on the platform.
    pub id: String,
    /// Ceiling the resource is restored to at the end of its cycle.
    pub original_capacity: u64,
}

impl Resource {
    pub fn new(id: impl Into<String>, original_capacity: u64) -> Self {
        Self {
            id: id.into(),
            original_capacity,
        }
    }
}

/// Lists resources eligible for cleanup: size-based reclaim enabled,
/// time-based reclaim disabled, writable.
pub trait ResourceDiscovery: Send + Sync {
    fn list_eligible(&self) -> Result<Vec<Resource>>;
}
