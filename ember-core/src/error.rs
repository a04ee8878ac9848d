//! Error types at the loader and session seams.

use thiserror::Error;

/// Failure reported by an engine factory while initializing a model.
///
/// Carries only the human-readable message. Whether the failure is worth
/// falling back over is decided by [`FallbackPolicy`], not encoded here,
/// since the wording depends entirely on the underlying engine.
///
/// [`FallbackPolicy`]: crate::policy::FallbackPolicy
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    message: String,
}

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure reported by an engine while generating a reply.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GenerateError {
    message: String,
}

impl GenerateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A fallback list must contain at least one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("candidate list must not be empty")]
pub struct EmptyCandidateList;

/// The requested model id is not part of the configured fallback list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown model '{0}'")]
pub struct UnknownModel(pub String);
