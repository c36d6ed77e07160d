//! Mutation backend trait.
//!
//! The `MutationBackend` trait abstracts over the platform that owns the
//! ceilings. Implementations:
//! - `SqliteCatalog`: the SQLite capacity catalog (see `sqlite.rs`)
//! - `MemoryPlatform`: in-memory platform with fault injection

use stagger_core::Result;

use crate::command::MutationCommand;

/// Applies ceiling changes and reads ceilings back.
pub trait MutationBackend: Send + Sync {
    /// Apply a command. Blocking; runs on a detached task and may block on
    /// contention for as long as the platform lets it.
    fn apply(&self, command: &MutationCommand) -> Result<()>;

    /// Ask the platform to abort an in-flight `apply` of this command.
    /// Advisory: the apply may still land. Must return promptly.
    fn cancel(&self, command: &MutationCommand) -> Result<()>;

    /// Authoritative current ceiling of a resource.
    fn current_capacity(&self, resource_id: &str) -> Result<u64>;
}
