//! The inference-engine capability consumed by the loader and session.
//!
//! Engines are opaque: creation may involve downloads and weight
//! compilation reported through a progress callback, and generation
//! answers a single-turn prompt. Everything else (tokenization, device
//! scheduling, memory management) lives behind these traits.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GenerateError, LoadError};

/// One progress report from an in-flight engine initialization.
///
/// `fraction` is advisory and may arrive out of order; consumers clamp
/// for display instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProgress {
    /// Completed fraction of the initialization pipeline, 0.0..=1.0.
    pub fraction: f32,
    /// Optional human-readable stage description.
    pub text: Option<String>,
}

/// Callback handed to factories for initialization progress.
pub type ProgressSink = Box<dyn Fn(LoadProgress) + Send + Sync>;

/// A ready inference runtime.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Identifier of the model this engine was initialized with.
    fn model_id(&self) -> &str;

    /// Generate a reply for a single-turn prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;
}

/// Creates engines for model identifiers.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Initialize an engine for `model_id`, reporting progress along
    /// the way. Errors carry the engine's own message wording.
    async fn create(
        &self,
        model_id: &str,
        progress: ProgressSink,
    ) -> Result<Arc<dyn Engine>, LoadError>;
}
