//! Error types for stagger.

use thiserror::Error;

/// Numeric classification codes carried by error records and the final
/// aggregated failure.
pub mod codes {
    pub const DISCOVERY: i64 = 100;
    pub const DATABASE: i64 = 200;
    pub const INVALID_IDENTIFIER: i64 = 300;
    pub const INVALID_TARGET: i64 = 301;
    pub const CONFIG: i64 = 400;
    pub const IO: i64 = 500;
    pub const JSON: i64 = 501;
    pub const INTERNAL: i64 = 900;

    /// The detached mutation did not finish before its deadline and the
    /// verification read shows it did not apply.
    pub const TIMED_OUT: i64 = 1001;
    /// The mutation reported success but the verification read disagrees.
    pub const MISMATCH: i64 = 1002;
    /// The platform aborted the mutation because it was cancelled.
    pub const CANCELLED: i64 = 1003;
    /// The platform was busy (lock contention) and the mutation yielded.
    pub const CONTENTION: i64 = 1205;

    /// Raised once at the end of a run that left unresolved errors.
    pub const RUN_FAILED: i64 = 50_000;
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Mutation error {code}: {message}")]
    Mutation { code: i64, message: String },

    #[error("Invalid resource identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Invalid target capacity {target} for {resource}")]
    InvalidTarget { resource: String, target: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    RunFailed { code: i64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric classification of this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::Discovery(_) => codes::DISCOVERY,
            Self::Database(_) | Self::NotFound(_) => codes::DATABASE,
            Self::Mutation { code, .. } | Self::RunFailed { code, .. } => *code,
            Self::InvalidIdentifier(_) => codes::INVALID_IDENTIFIER,
            Self::InvalidTarget { .. } => codes::INVALID_TARGET,
            Self::Config(_) => codes::CONFIG,
            Self::Io(_) => codes::IO,
            Self::Json(_) => codes::JSON,
            Self::Internal(_) => codes::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let err = Error::Mutation {
            code: codes::CONTENTION,
            message: "database is locked".into(),
        };
        assert_eq!(err.code(), 1205);
        assert_eq!(err.to_string(), "Mutation error 1205: database is locked");
        assert_eq!(Error::Discovery("x".into()).code(), codes::DISCOVERY);
    }

    #[test]
    fn test_run_failed_displays_message_only() {
        let err = Error::RunFailed {
            code: codes::RUN_FAILED,
            message: "Error 1001 for resource sales: timed out".into(),
        };
        assert_eq!(err.code(), 50_000);
        assert_eq!(err.to_string(), "Error 1001 for resource sales: timed out");
    }
}
