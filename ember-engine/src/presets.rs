//! Built-in model catalog: the fallback ladder, largest first.

use ember_core::CandidateList;

/// One downloadable model the engine knows how to load.
#[derive(Debug, Clone, Copy)]
pub struct ModelPreset {
    /// Candidate id used throughout the fallback machinery.
    pub id: &'static str,
    /// HuggingFace repo holding the GGUF export.
    pub repo: &'static str,
    /// Quantized weights filename within the repo.
    pub file: &'static str,
    /// Approximate download size, for display.
    pub size_mb: u32,
}

/// The fallback ladder, most capable first. All entries are
/// Qwen3-family GGUF exports loadable by `quantized_qwen3`.
pub const PRESETS: &[ModelPreset] = &[
    ModelPreset {
        id: "qwen3-4b",
        repo: "Qwen/Qwen3-4B-GGUF",
        file: "Qwen3-4B-Q4_K_M.gguf",
        size_mb: 2497,
    },
    ModelPreset {
        id: "qwen3-1.7b",
        repo: "Qwen/Qwen3-1.7B-GGUF",
        file: "Qwen3-1.7B-Q4_K_M.gguf",
        size_mb: 1107,
    },
    ModelPreset {
        id: "qwen3-0.6b",
        repo: "Qwen/Qwen3-0.6B-GGUF",
        file: "Qwen3-0.6B-Q4_K_M.gguf",
        size_mb: 484,
    },
];

/// Look up a preset by candidate id.
pub fn find(id: &str) -> Option<&'static ModelPreset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// The default fallback list: the full catalog in order.
pub fn default_candidates() -> CandidateList {
    CandidateList::new(PRESETS.iter().map(|p| p.id))
        .expect("preset catalog is non-empty")
}
