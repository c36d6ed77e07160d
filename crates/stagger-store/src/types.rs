//! Catalog row types.

use serde::{Deserialize, Serialize};
use stagger_core::Resource;

/// A row of `capacity_stores`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreRecord {
    pub name: String,
    pub max_capacity_mb: u64,
    pub used_mb: u64,
    pub size_based_cleanup: bool,
    pub time_based_cleanup: bool,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl StoreRecord {
    /// A writable store with size-based cleanup only, i.e. eligible.
    pub fn eligible(name: impl Into<String>, max_capacity_mb: u64) -> Self {
        Self {
            name: name.into(),
            max_capacity_mb,
            used_mb: 0,
            size_based_cleanup: true,
            time_based_cleanup: false,
            read_only: false,
            updated_at: None,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.size_based_cleanup && !self.time_based_cleanup && !self.read_only
    }

    pub fn to_resource(&self) -> Resource {
        Resource::new(self.name.clone(), self.max_capacity_mb)
    }
}

/// A row of `capacity_changes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityChange {
    pub name: String,
    pub old_capacity_mb: u64,
    pub new_capacity_mb: u64,
    pub changed_at: i64,
}
