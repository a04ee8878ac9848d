//! The ordered fallback list of model candidates.

use serde::{Deserialize, Serialize};

use crate::error::EmptyCandidateList;

/// One model identifier in the fallback ladder.
///
/// The id is opaque to the loader; the engine factory decides what it
/// names (a catalog entry, a local file, a remote repo).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    id: String,
}

impl ModelCandidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Non-empty ordered list of candidates, most capable first.
///
/// The order is fixed for the lifetime of a loading run; fallback only
/// ever moves forward through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateList {
    candidates: Vec<ModelCandidate>,
}

impl CandidateList {
    /// Build from ids in fallback order. Rejects an empty iterator.
    pub fn new<I, S>(ids: I) -> Result<Self, EmptyCandidateList>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let candidates: Vec<ModelCandidate> =
            ids.into_iter().map(ModelCandidate::new).collect();
        if candidates.is_empty() {
            return Err(EmptyCandidateList);
        }
        Ok(Self { candidates })
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ModelCandidate> {
        self.candidates.get(index)
    }

    /// Position of a candidate id within the list.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.candidates.iter().position(|c| c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelCandidate> {
        self.candidates.iter()
    }
}
