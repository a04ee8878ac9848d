//! Classifying load failures: fall back to a smaller model, or stop.

use std::fmt;
use std::sync::Arc;

use crate::error::LoadError;

/// Default signatures of a device that ran out of resources. Matched
/// case-insensitively as substrings of the load error message.
const RESOURCE_EXHAUSTION_PATTERNS: &[&str] = &[
    "device was lost",
    "device lost",
    "out of memory",
    "out-of-memory",
    "oom",
    "allocation failed",
];

/// Decides whether a failed attempt is worth retrying on a smaller model.
///
/// All non-matching errors (bad model id, network failure, unsupported
/// hardware) are terminal for the load run and surfaced as-is. The exact
/// wording of exhaustion errors depends on the engine, so the predicate
/// is injectable rather than fixed.
#[derive(Clone)]
pub struct FallbackPolicy {
    predicate: Arc<dyn Fn(&LoadError) -> bool + Send + Sync>,
}

impl FallbackPolicy {
    /// Policy from an arbitrary predicate over the load error.
    pub fn from_fn(predicate: impl Fn(&LoadError) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Case-insensitive substring matching against `patterns`.
    pub fn substrings<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| p.as_ref().to_lowercase())
            .collect();
        Self::from_fn(move |err| {
            let message = err.message().to_lowercase();
            patterns.iter().any(|p| message.contains(p))
        })
    }

    /// Never fall back; every failure is terminal.
    pub fn never() -> Self {
        Self::from_fn(|_| false)
    }

    pub fn should_fall_back(&self, error: &LoadError) -> bool {
        (self.predicate)(error)
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::substrings(RESOURCE_EXHAUSTION_PATTERNS.iter().copied())
    }
}

impl fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FallbackPolicy(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_device_loss_and_oom() {
        let policy = FallbackPolicy::default();
        assert!(policy.should_fall_back(&LoadError::new("Device was lost")));
        assert!(policy.should_fall_back(&LoadError::new(
            "WebGPU device ran Out Of Memory during compilation"
        )));
        assert!(policy.should_fall_back(&LoadError::new("buffer allocation failed")));
    }

    #[test]
    fn default_rejects_other_errors() {
        let policy = FallbackPolicy::default();
        assert!(!policy.should_fall_back(&LoadError::new("invalid model format")));
        assert!(!policy.should_fall_back(&LoadError::new("404 not found")));
    }

    #[test]
    fn custom_predicate_wins() {
        let policy = FallbackPolicy::from_fn(|e| e.message().starts_with("retryable:"));
        assert!(policy.should_fall_back(&LoadError::new("retryable: shader timeout")));
        assert!(!policy.should_fall_back(&LoadError::new("out of memory")));
    }

    #[test]
    fn never_is_always_terminal() {
        let policy = FallbackPolicy::never();
        assert!(!policy.should_fall_back(&LoadError::new("out of memory")));
    }
}
