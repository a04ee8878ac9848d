//! Ember Core -- model-loading fallback and chat session state.
//!
//! The loader tries an ordered list of model candidates, largest first,
//! and falls back to the next one when initialization dies of resource
//! exhaustion. The chat session owns the transcript and resolves one
//! pending reply at a time against whatever engine the loader currently
//! holds. Both publish observable snapshots through watch channels.
//!
//! The inference engine itself is a capability behind the [`Engine`] /
//! [`EngineFactory`] traits; this crate never touches model weights.

pub mod candidates;
pub mod engine;
pub mod error;
pub mod loader;
pub mod policy;
pub mod session;

pub use candidates::{CandidateList, ModelCandidate};
pub use engine::{Engine, EngineFactory, LoadProgress, ProgressSink};
pub use error::{EmptyCandidateList, GenerateError, LoadError, UnknownModel};
pub use loader::{LoadPhase, LoaderState, ModelLoader};
pub use policy::FallbackPolicy;
pub use session::{ChatSession, Message, Role, SubmitOutcome, NOT_READY_REPLY};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
