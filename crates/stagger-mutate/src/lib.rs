//! Stagger Mutate: deadline-bounded capacity changes on detached tasks.
//!
//! Provides the `MutationBackend` trait for the platform that owns the
//! ceilings, the `MutationCommand` builder, and `RemoteMutator`, which runs
//! each command on a detached task and gives up after a deadline. A timed
//! out command may still land later; callers always re-read the ceiling.

pub mod backend;
pub mod command;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod mutator;
pub mod sqlite;
pub mod task;

pub use backend::MutationBackend;
pub use command::{MutationCommand, Priority};
#[cfg(any(test, feature = "testing"))]
pub use memory::{Fault, MemoryPlatform};
pub use mutator::{MutationOutcome, RemoteMutator};
pub use task::{DetachedTask, TaskState};
