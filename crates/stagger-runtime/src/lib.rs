//! Stagger Runtime: the scheduler that drives a cleanup run.
//!
//! Builds the lowering timeline from discovered resources, drives the
//! cooperative main loop with retries, and force-restores every resource
//! still pending when the time budget runs out.

pub mod errors;
pub mod queue;
pub mod scheduler;
pub mod types;

pub use errors::ErrorCollector;
pub use queue::StepQueue;
pub use scheduler::Scheduler;
pub use types::*;
