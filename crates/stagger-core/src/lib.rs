//! Stagger Core: shared types for the cleanup run and its configuration.

pub mod clock;
pub mod config;
pub mod error;
pub mod resource;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DataPaths, RunConfig};
pub use error::{codes, Error, Result};
pub use resource::{Resource, ResourceDiscovery};
