//! Stagger Store: SQLite capacity catalog of eligible stores.

pub mod schema;
pub mod sqlite;
pub mod types;

pub use sqlite::SqliteCatalog;
pub use types::*;
