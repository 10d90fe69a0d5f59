use serde::{Deserialize, Serialize};

use crate::config::ValueType;

/// Represents a result type for operations in the Prefab core.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Prefab core.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Error evaluating a config.
    #[error(transparent)]
    EvaluationError(#[from] EvaluationError),

    /// Configuration payload could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigurationParse(String),

    /// Invalid resolver configuration (e.g., unparseable environment override).
    #[error("invalid resolver configuration: {0}")]
    InvalidConfig(String),
}

/// Errors that can happen during evaluation and are worth surfacing to the caller.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum EvaluationError {
    /// Requested config has a different type than the caller expected.
    #[error("invalid config type (expected: {expected:?}, found: {found:?})")]
    TypeMismatch {
        /// Expected type of the value.
        expected: ValueType,
        /// Actual type of the value.
        found: ValueType,
    },

    /// The value names a decryption key config that could not be resolved to a string.
    #[error("decryption key config is missing or is not a string")]
    DecryptionKeyMissing,

    /// The value could not be decrypted with the resolved key.
    #[error("failed to decrypt value")]
    DecryptionFailed,

    /// Configuration is structurally invalid for this library (e.g., weighted values without any
    /// variants). This should normally never happen and is likely a producer/consumer mismatch.
    #[error("unexpected configuration error")]
    UnexpectedConfigurationError,
}

/// `EvaluationFailure` is used internally to distinguish normal outcomes (a missing config, no
/// matching value) from errors that must be reported.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EvaluationFailure {
    #[error(transparent)]
    Error(EvaluationError),

    /// Config is not present in the resolved snapshot.
    #[error("config not found")]
    ConfigNotFound,

    /// Config is present but none of its conditional values matched the context.
    #[error("no conditional value matched")]
    NoMatch,
}

impl From<EvaluationError> for EvaluationFailure {
    fn from(value: EvaluationError) -> Self {
        Self::Error(value)
    }
}
