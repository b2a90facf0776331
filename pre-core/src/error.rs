//! Error types for pre-core.

use thiserror::Error;

/// Result type alias using pre-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the Plan-Retrieve-Execute loop.
#[derive(Error, Debug)]
pub enum Error {
    /// An agent's output did not match its parser, even after the one
    /// temperature-bumped retry.
    #[error("agent parse error: role={role} round={round}: {message}")]
    AgentParse {
        role: String,
        round: u32,
        message: String,
    },

    /// An agent's `generate` call did not return before its deadline, even
    /// after retry.
    #[error("agent timeout: role={role} after {duration_ms}ms")]
    AgentTimeout { role: String, duration_ms: u64 },

    /// The executor reported a runtime error in the candidate code.
    #[error("executor runtime error: {message}")]
    ExecutorRuntime { message: String },

    /// The executor did not finish before its deadline.
    #[error("executor timeout after {duration_ms}ms")]
    ExecutorTimeout { duration_ms: u64 },

    /// The executor ran out of memory.
    #[error("executor out of memory")]
    ExecutorOom,

    /// Three or more consecutive rounds failed with an identical error
    /// signature.
    #[error("repeated identical errors across {count} consecutive rounds: {signature}")]
    RepeatedErrors { count: u32, signature: String },

    /// The Finalizer could not produce output matching the question's
    /// format hints, even on its second attempt.
    #[error("format violation at finalize: {message}")]
    FormatViolation { message: String },

    /// The corpus directory could not be read before the loop started.
    #[error("corpus unavailable at {path}: {message}")]
    CorpusUnavailable { path: String, message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from preprocessing or artifact recording.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error (invalid or contradictory config values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal invariant violation; should never surface from a correct
    /// caller, but reported instead of panicking.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an agent parse error.
    pub fn agent_parse(role: impl Into<String>, round: u32, message: impl Into<String>) -> Self {
        Self::AgentParse {
            role: role.into(),
            round,
            message: message.into(),
        }
    }

    /// Create an agent timeout error.
    pub fn agent_timeout(role: impl Into<String>, duration_ms: u64) -> Self {
        Self::AgentTimeout {
            role: role.into(),
            duration_ms,
        }
    }

    /// Create an executor runtime error.
    pub fn executor_runtime(message: impl Into<String>) -> Self {
        Self::ExecutorRuntime {
            message: message.into(),
        }
    }

    /// Create a corpus-unavailable error.
    pub fn corpus_unavailable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorpusUnavailable {
            path: path.into(),
            message: message.into(),
        }
    }
}
