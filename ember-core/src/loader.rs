//! The model-loading fallback state machine.
//!
//! A load run walks the candidate list in order, asking the factory for
//! an engine and consulting the [`FallbackPolicy`] on failure. State is
//! published through a watch channel; the engine handle lives beside it
//! because handles are not cloneable state.
//!
//! Each run owns a cancellation token. Switching models or reloading
//! cancels the previous run before starting a fresh one; a superseded
//! run discards its results at every continuation point instead of
//! mutating current state. Nothing preemptively kills the underlying
//! download/compile work.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::candidates::CandidateList;
use crate::engine::{Engine, EngineFactory, LoadProgress, ProgressSink};
use crate::error::UnknownModel;
use crate::policy::FallbackPolicy;

/// Lifecycle phase of the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadPhase {
    /// No engine held and no attempt in flight.
    Idle,
    /// An initialization attempt is in flight.
    Loading,
    /// An engine is held and valid.
    Ready,
    /// The run ended without an engine; `error` holds the reason.
    Failed,
}

/// Observable snapshot of the loader.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoaderState {
    pub phase: LoadPhase,
    /// Index into the candidate list of the attempt in flight, or of
    /// the loaded model once ready.
    pub current: Option<usize>,
    /// Candidate ids attempted so far, in order. Append-only within a
    /// run; reset when a fresh run starts.
    pub tried: Vec<String>,
    /// Displayed progress 0..=100, non-decreasing within one attempt.
    pub progress: u8,
    /// Last diagnostic text reported by the engine factory.
    pub detail: Option<String>,
    /// Terminal error text when `phase == Failed`.
    pub error: Option<String>,
}

impl LoaderState {
    fn initial() -> Self {
        Self {
            phase: LoadPhase::Idle,
            current: None,
            tried: Vec::new(),
            progress: 0,
            detail: None,
            error: None,
        }
    }

    /// Whether the run has finished, one way or the other.
    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, LoadPhase::Ready | LoadPhase::Failed)
    }
}

struct Shared {
    engine: Option<Arc<dyn Engine>>,
    active: Option<CancellationToken>,
    preferred: usize,
    /// True while a run is in flight. The watch `phase` only turns
    /// `Loading` after the lock is released, so the in-flight guard
    /// cannot rely on it.
    loading: bool,
}

/// Owns the fallback sequence and the engine handle it produces.
pub struct ModelLoader {
    factory: Arc<dyn EngineFactory>,
    policy: FallbackPolicy,
    candidates: CandidateList,
    state: watch::Sender<LoaderState>,
    shared: Mutex<Shared>,
}

impl ModelLoader {
    pub fn new(
        factory: Arc<dyn EngineFactory>,
        candidates: CandidateList,
        policy: FallbackPolicy,
    ) -> Self {
        let (state, _) = watch::channel(LoaderState::initial());
        Self {
            factory,
            policy,
            candidates,
            state,
            shared: Mutex::new(Shared {
                engine: None,
                active: None,
                preferred: 0,
                loading: false,
            }),
        }
    }

    /// Use `id` as the starting candidate for the next load run.
    pub fn with_preferred(self, id: &str) -> Result<Self, UnknownModel> {
        let index = self
            .candidates
            .index_of(id)
            .ok_or_else(|| UnknownModel(id.to_string()))?;
        self.shared().preferred = index;
        Ok(self)
    }

    pub fn subscribe(&self) -> watch::Receiver<LoaderState> {
        self.state.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> LoaderState {
        self.state.borrow().clone()
    }

    /// The engine produced by the last successful run, if any.
    pub fn engine(&self) -> Option<Arc<dyn Engine>> {
        self.shared().engine.clone()
    }

    pub fn candidates(&self) -> &CandidateList {
        &self.candidates
    }

    /// Start loading from the preferred candidate, driving the run to
    /// completion. A no-op while an engine is held, while a run is in
    /// flight, or after a terminal failure (failed runs are only
    /// retried through [`reload`](Self::reload) or
    /// [`switch_to`](Self::switch_to)).
    pub async fn ensure_loaded(&self) {
        let (start, token) = {
            let mut shared = self.shared();
            if shared.engine.is_some() || shared.loading {
                return;
            }
            if self.state.borrow().phase != LoadPhase::Idle {
                return;
            }
            let token = CancellationToken::new();
            shared.loading = true;
            shared.active = Some(token.clone());
            (shared.preferred, token)
        };
        self.run(start, token).await;
    }

    /// Cancel any in-flight attempt, drop the held engine, and load
    /// starting at `id`. The fresh run still falls back down the rest
    /// of the list on resource exhaustion.
    pub async fn switch_to(&self, id: &str) -> Result<(), UnknownModel> {
        let index = self
            .candidates
            .index_of(id)
            .ok_or_else(|| UnknownModel(id.to_string()))?;
        let token = self.restart_at(index);
        self.run(index, token).await;
        Ok(())
    }

    /// Cancel-then-restart from the current selection.
    pub async fn reload(&self) {
        let index = self.shared().preferred;
        let token = self.restart_at(index);
        self.run(index, token).await;
    }

    /// Cooperatively cancel the in-flight attempt, if any. The held
    /// engine, when present, is unaffected.
    pub fn cancel(&self) {
        {
            let mut shared = self.shared();
            if let Some(token) = shared.active.take() {
                token.cancel();
            }
            shared.loading = false;
        }
        self.state.send_modify(|s| {
            if s.phase == LoadPhase::Loading {
                s.phase = LoadPhase::Idle;
            }
        });
    }

    /// Begin a fresh run at `index`: supersede the old token, drop the
    /// engine, reset state.
    fn restart_at(&self, index: usize) -> CancellationToken {
        let token = CancellationToken::new();
        {
            let mut shared = self.shared();
            if let Some(old) = shared.active.take() {
                old.cancel();
            }
            shared.engine = None;
            shared.preferred = index;
            shared.loading = true;
            shared.active = Some(token.clone());
        }
        self.state.send_replace(LoaderState::initial());
        token
    }

    async fn run(&self, start: usize, token: CancellationToken) {
        let mut index = start;
        loop {
            // Start indexes are validated and fallback stops at the
            // last candidate, so the lookup holds.
            let candidate = match self.candidates.get(index) {
                Some(c) => c.id().to_string(),
                None => {
                    let mut shared = self.shared();
                    if !token.is_cancelled() {
                        shared.loading = false;
                    }
                    return;
                }
            };

            if token.is_cancelled() {
                return;
            }

            tracing::info!(model = %candidate, attempt = index, "initializing engine");
            self.state.send_modify(|s| {
                s.phase = LoadPhase::Loading;
                s.current = Some(index);
                s.tried.push(candidate.clone());
                s.progress = 0;
                s.detail = None;
                s.error = None;
            });

            let sink = self.progress_sink(token.clone());
            let result = self.factory.create(&candidate, sink).await;

            match result {
                Ok(engine) => {
                    {
                        let mut shared = self.shared();
                        // Supersession is decided under the lock;
                        // restart_at cancels under the same lock.
                        if token.is_cancelled() {
                            return;
                        }
                        shared.engine = Some(engine);
                        shared.loading = false;
                    }
                    self.state.send_modify(|s| {
                        s.phase = LoadPhase::Ready;
                        s.progress = 100;
                        s.error = None;
                    });
                    tracing::info!(model = %candidate, "engine ready");
                    return;
                }
                Err(err) => {
                    if token.is_cancelled() {
                        return;
                    }
                    let fall_back = self.policy.should_fall_back(&err);
                    if fall_back && index + 1 < self.candidates.len() {
                        tracing::warn!(
                            model = %candidate,
                            error = %err,
                            "resource exhaustion, falling back to smaller model"
                        );
                        index += 1;
                        continue;
                    }
                    {
                        // Superseded runs must not clear the flag the
                        // new run just set.
                        let mut shared = self.shared();
                        if token.is_cancelled() {
                            return;
                        }
                        shared.loading = false;
                    }
                    if fall_back {
                        tracing::error!(model = %candidate, error = %err, "fallback list exhausted");
                    } else {
                        tracing::error!(model = %candidate, error = %err, "engine initialization failed");
                    }
                    self.state.send_modify(|s| {
                        s.phase = LoadPhase::Failed;
                        s.error = Some(err.to_string());
                    });
                    return;
                }
            }
        }
    }

    /// Progress callback for one attempt. Ignores reports once the
    /// owning run is cancelled, clamps the displayed percentage
    /// non-decreasing, and tolerates out-of-order delivery.
    fn progress_sink(&self, token: CancellationToken) -> ProgressSink {
        let state = self.state.clone();
        Box::new(move |p: LoadProgress| {
            if token.is_cancelled() {
                return;
            }
            let pct = (p.fraction.clamp(0.0, 1.0) * 100.0).round() as u8;
            state.send_modify(|s| {
                if pct > s.progress {
                    s.progress = pct;
                }
                if let Some(text) = p.text {
                    s.detail = Some(text);
                }
            });
        })
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}
