//! Submitter error types.

use thiserror::Error;

use kiln_core::ConfigError;
use kiln_provider::ProviderError;

/// Errors that can occur while coordinating a submission.
#[derive(Debug, Error)]
pub enum SubmitterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("could not parse placement token: {0}")]
    MalformedToken(String),

    /// The deterministic-naming invariant was violated: after an
    /// already-exists condition, the re-query found zero or multiple
    /// clusters for a name only one creator can own.
    #[error("expected exactly one cluster named {cluster}, found {found}")]
    PoolInconsistency { cluster: String, found: usize },

    #[error("timed out after {waited_secs}s waiting for history files to be moved")]
    HistoryDrainTimeout { waited_secs: u64 },
}

pub type SubmitterResult<T> = Result<T, SubmitterError>;
