//! Resolving candidate ids to local model files.
//!
//! A candidate id is one of:
//! 1. a built-in preset id (see [`crate::presets`]),
//! 2. a local path to a `.gguf` file with `tokenizer.json` alongside,
//! 3. an explicit `owner/repo:file.gguf` HuggingFace spec.
//!
//! Remote files go through the hf-hub cache, so repeat loads are
//! download-free. Stage boundaries are reported through the progress
//! sink; hf-hub's blocking `get` gives no byte-level callbacks, so the
//! fractions step at stage granularity.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ember_core::{LoadProgress, ProgressSink};
use hf_hub::api::sync::Api;

use crate::presets;

/// Local paths for everything a model needs.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub gguf: PathBuf,
    pub tokenizer: PathBuf,
}

/// Resolve a candidate id to local files, downloading as needed.
pub fn resolve(model_id: &str, progress: &ProgressSink) -> Result<ModelFiles> {
    let path = Path::new(model_id);
    if path.extension().is_some_and(|e| e == "gguf") {
        if !path.exists() {
            bail!("GGUF file not found: {}", path.display());
        }
        let dir = path.parent().unwrap_or(Path::new("."));
        let tokenizer = dir.join("tokenizer.json");
        if !tokenizer.exists() {
            bail!(
                "tokenizer.json not found next to GGUF file (looked in {})",
                dir.display()
            );
        }
        report(progress, 0.6, format!("using local file {}", path.display()));
        return Ok(ModelFiles {
            gguf: path.to_path_buf(),
            tokenizer,
        });
    }

    let (repo_id, filename) = match presets::find(model_id) {
        Some(preset) => (preset.repo.to_string(), preset.file.to_string()),
        None => parse_repo_spec(model_id)?,
    };

    download(&repo_id, &filename, progress)
}

/// Parse an explicit `owner/repo:file.gguf` spec.
fn parse_repo_spec(model_id: &str) -> Result<(String, String)> {
    if let Some((repo, file)) = model_id.split_once(':') {
        if repo.contains('/') && file.ends_with(".gguf") {
            return Ok((repo.to_string(), file.to_string()));
        }
    }
    bail!(
        "unknown model '{model_id}'; use a catalog id (see `ember models`), \
         a local .gguf path, or 'owner/repo:file.gguf'"
    );
}

fn download(repo_id: &str, filename: &str, progress: &ProgressSink) -> Result<ModelFiles> {
    report(progress, 0.05, format!("connecting to HuggingFace Hub for {repo_id}"));
    let api = Api::new().context("failed to initialize HuggingFace Hub API")?;
    let repo = api.model(repo_id.to_string());

    report(progress, 0.1, "fetching tokenizer.json");
    let tokenizer = repo
        .get("tokenizer.json")
        .with_context(|| format!("failed to fetch tokenizer.json from {repo_id}"))?;

    report(progress, 0.2, format!("fetching {filename}"));
    tracing::info!(repo = repo_id, file = filename, "fetching model weights");
    let gguf = repo
        .get(filename)
        .with_context(|| format!("failed to fetch {filename} from {repo_id}"))?;

    report(progress, 0.6, "model files cached");
    Ok(ModelFiles { gguf, tokenizer })
}

/// Emit one staged progress report.
pub(crate) fn report(progress: &ProgressSink, fraction: f32, text: impl Into<String>) {
    progress(LoadProgress {
        fraction,
        text: Some(text.into()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> ProgressSink {
        Box::new(|_| {})
    }

    #[test]
    fn repo_spec_needs_owner_and_gguf_file() {
        let (repo, file) = parse_repo_spec("Qwen/Qwen3-4B-GGUF:Qwen3-4B-Q8_0.gguf").unwrap();
        assert_eq!(repo, "Qwen/Qwen3-4B-GGUF");
        assert_eq!(file, "Qwen3-4B-Q8_0.gguf");

        assert!(parse_repo_spec("not-a-spec").is_err());
        assert!(parse_repo_spec("repo-without-owner:file.gguf").is_err());
        assert!(parse_repo_spec("owner/repo:file.bin").is_err());
    }

    #[test]
    fn missing_local_gguf_is_an_error() {
        let err = resolve("/definitely/not/here/model.gguf", &sink()).unwrap_err();
        assert!(err.to_string().contains("GGUF file not found"));
    }
}
