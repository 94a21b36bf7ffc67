//! Error types

use thiserror::Error;

/// Conflict errors raised by a [`ConflictResolver`](crate::ConflictResolver).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("Write rejected: a value is already present")]
    ExistingValue,
}

/// Configuration errors, raised synchronously at build time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("Option not supported by the eviction engine: {option}")]
    Unsupported { option: String },

    #[error("No tokio runtime available to host the background worker")]
    NoRuntime,

    #[error("A cache named {name} is already registered")]
    DuplicateCache { name: String },
}

/// Lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Cache {cache} is shut down and no longer accepts writes")]
    ShutDown { cache: String },

    #[error("Flush lock poisoned for cache {cache}")]
    LockPoisoned { cache: String },

    #[error("Background worker for cache {cache} failed: {reason}")]
    WorkerFailed { cache: String, reason: String },

    #[error("Eviction engine for cache {cache} returned an unexpected result: {reason}")]
    Engine { cache: String, reason: String },
}

/// Error reported by a [`CacheWriter`](crate::CacheWriter) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct WriteError {
    reason: String,
    retryable: bool,
}

impl WriteError {
    /// A failure that is expected to succeed on a later attempt.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// A failure that will not go away by retrying.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// A writer failure observed during a flush pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Flush of {entries} entries for cache {cache} failed: {source}")]
pub struct WriteFailure {
    pub cache: String,
    pub entries: usize,
    #[source]
    pub source: WriteError,
}

/// Master error type for all cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Conflict on key {key} in cache {cache}: {source}")]
    Conflict {
        cache: String,
        key: String,
        #[source]
        source: ConflictError,
    },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Write error: {0}")]
    Write(#[from] WriteFailure),
}

impl CacheError {
    /// True for write failures whose entries were re-queued and may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::Write(failure) if failure.source.is_retryable())
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for [`CacheWriter`](crate::CacheWriter) calls.
pub type WriteResult<T> = Result<T, WriteError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_incompatible() {
        let err = ConfigError::IncompatibleOptions {
            option_a: "maximum_size".to_string(),
            option_b: "maximum_weight".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("maximum_size"));
        assert!(msg.contains("maximum_weight"));
    }

    #[test]
    fn test_conflict_error_wraps_key_and_cache() {
        let err = CacheError::Conflict {
            cache: "sessions".to_string(),
            key: "\"alice\"".to_string(),
            source: ConflictError::ExistingValue,
        };
        let msg = err.to_string();
        assert!(msg.contains("sessions"));
        assert!(msg.contains("alice"));
        assert!(msg.contains("already present"));
    }

    #[test]
    fn test_write_failure_from_conversion() {
        let failure = WriteFailure {
            cache: "profiles".to_string(),
            entries: 3,
            source: WriteError::transient("connection reset"),
        };
        let err: CacheError = failure.into();
        assert!(matches!(err, CacheError::Write(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_permanent_write_error_not_retryable() {
        let err: CacheError = WriteFailure {
            cache: "profiles".to_string(),
            entries: 1,
            source: WriteError::permanent("schema mismatch"),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_state_error_display() {
        let err = StateError::ShutDown {
            cache: "orders".to_string(),
        };
        assert!(err.to_string().contains("no longer accepts writes"));
    }
}
