//! End-to-end fallback scenarios against a scripted engine factory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use ember_core::{
    CandidateList, ChatSession, Engine, EngineFactory, FallbackPolicy, GenerateError,
    LoadError, LoadPhase, LoadProgress, ModelLoader, ProgressSink, SubmitOutcome,
};

struct StubEngine {
    model_id: String,
}

#[async_trait]
impl Engine for StubEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        Ok(format!("[{}] {}", self.model_id, prompt))
    }
}

/// Resolves each candidate according to a script: `Ok` yields a stub
/// engine, `Err` the given load error message. Records creation order.
struct ScriptedFactory {
    outcomes: HashMap<String, Result<(), String>>,
    calls: Mutex<Vec<String>>,
    /// When set, creation of this candidate parks until released.
    gate: Option<(String, Arc<Notify>)>,
}

impl ScriptedFactory {
    fn new<'a>(outcomes: impl IntoIterator<Item = (&'a str, Result<(), &'a str>)>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: outcomes
                .into_iter()
                .map(|(id, r)| (id.to_string(), r.map_err(str::to_string)))
                .collect(),
            calls: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn create(
        &self,
        model_id: &str,
        progress: ProgressSink,
    ) -> Result<Arc<dyn Engine>, LoadError> {
        self.calls.lock().unwrap().push(model_id.to_string());
        progress(LoadProgress {
            fraction: 0.5,
            text: Some(format!("fetching {model_id}")),
        });

        if let Some((gated, notify)) = &self.gate {
            if gated == model_id {
                notify.notified().await;
            }
        }

        match self.outcomes.get(model_id) {
            Some(Ok(())) => Ok(Arc::new(StubEngine {
                model_id: model_id.to_string(),
            })),
            Some(Err(message)) => Err(LoadError::new(message.clone())),
            None => Err(LoadError::new(format!("no weights for '{model_id}'"))),
        }
    }
}

fn loader(factory: Arc<ScriptedFactory>, ids: &[&str]) -> ModelLoader {
    ModelLoader::new(
        factory,
        CandidateList::new(ids.iter().copied()).unwrap(),
        FallbackPolicy::default(),
    )
}

#[tokio::test]
async fn first_success_stops_at_the_first_candidate() {
    let factory = ScriptedFactory::new([("A", Ok(()))]);
    let loader = loader(factory.clone(), &["A", "B", "C"]);

    loader.ensure_loaded().await;

    let state = loader.state();
    assert_eq!(state.phase, LoadPhase::Ready);
    assert_eq!(state.tried, vec!["A"]);
    assert_eq!(state.error, None);
    assert_eq!(factory.calls(), vec!["A"]);
    assert_eq!(loader.engine().unwrap().model_id(), "A");
}

#[tokio::test]
async fn device_loss_falls_back_through_the_list() {
    let factory = ScriptedFactory::new([
        ("A", Err("Device was lost")),
        ("B", Err("Device was lost")),
        ("C", Ok(())),
    ]);
    let loader = loader(factory.clone(), &["A", "B", "C"]);

    loader.ensure_loaded().await;

    let state = loader.state();
    assert_eq!(state.phase, LoadPhase::Ready);
    assert_eq!(state.tried, vec!["A", "B", "C"]);
    assert_eq!(state.error, None);
    assert_eq!(loader.engine().unwrap().model_id(), "C");
}

#[tokio::test]
async fn terminal_error_stops_the_fallback() {
    let factory = ScriptedFactory::new([
        ("A", Err("invalid model format")),
        ("B", Ok(())),
    ]);
    let loader = loader(factory.clone(), &["A", "B"]);

    loader.ensure_loaded().await;

    let state = loader.state();
    assert_eq!(state.phase, LoadPhase::Failed);
    assert_eq!(state.tried, vec!["A"]);
    assert_eq!(state.error.as_deref(), Some("invalid model format"));
    assert!(loader.engine().is_none());
    assert_eq!(factory.calls(), vec!["A"], "B must never be attempted");
}

#[tokio::test]
async fn exhausted_list_tries_every_candidate_once_and_keeps_the_last_error() {
    let factory = ScriptedFactory::new([
        ("A", Err("out of memory")),
        ("B", Err("Device was lost")),
        ("C", Err("out of memory while mapping buffer")),
    ]);
    let loader = loader(factory.clone(), &["A", "B", "C"]);

    loader.ensure_loaded().await;

    let state = loader.state();
    assert_eq!(state.phase, LoadPhase::Failed);
    assert_eq!(state.tried, vec!["A", "B", "C"]);
    assert_eq!(
        state.error.as_deref(),
        Some("out of memory while mapping buffer")
    );
    assert!(loader.engine().is_none());
    assert_eq!(factory.calls(), vec!["A", "B", "C"]);

    // Terminal failure stays put; no implicit retry.
    loader.ensure_loaded().await;
    assert_eq!(factory.calls(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn preferred_candidate_starts_the_run_and_still_falls_back() {
    let factory = ScriptedFactory::new([("B", Err("out of memory")), ("C", Ok(()))]);
    let loader = loader(factory.clone(), &["A", "B", "C"])
        .with_preferred("B")
        .unwrap();

    loader.ensure_loaded().await;

    let state = loader.state();
    assert_eq!(state.phase, LoadPhase::Ready);
    assert_eq!(state.tried, vec!["B", "C"]);
    assert_eq!(factory.calls(), vec!["B", "C"], "A is never attempted");
    assert_eq!(loader.engine().unwrap().model_id(), "C");
}

#[tokio::test]
async fn cancelled_attempt_cannot_touch_state_when_it_resolves() {
    let notify = Arc::new(Notify::new());
    let mut factory = ScriptedFactory::new([("A", Ok(()))]);
    Arc::get_mut(&mut factory).unwrap().gate = Some(("A".to_string(), notify.clone()));
    let loader = Arc::new(loader(factory.clone(), &["A"]));

    let task = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.ensure_loaded().await })
    };

    // Wait until the attempt is parked inside the factory.
    let mut rx = loader.subscribe();
    while rx.borrow().phase != LoadPhase::Loading {
        rx.changed().await.expect("loader dropped");
    }

    loader.cancel();
    let after_cancel = loader.state();
    assert_eq!(after_cancel.phase, LoadPhase::Idle);

    // Release the parked attempt; its success must be discarded.
    notify.notify_one();
    task.await.expect("load task");

    assert_eq!(loader.state(), after_cancel);
    assert!(loader.engine().is_none());
}

#[tokio::test]
async fn switching_models_supersedes_the_inflight_attempt() {
    let notify = Arc::new(Notify::new());
    let mut factory = ScriptedFactory::new([("A", Ok(())), ("B", Ok(()))]);
    Arc::get_mut(&mut factory).unwrap().gate = Some(("A".to_string(), notify.clone()));
    let loader = Arc::new(loader(factory.clone(), &["A", "B"]));

    let task = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.ensure_loaded().await })
    };

    let mut rx = loader.subscribe();
    while rx.borrow().phase != LoadPhase::Loading {
        rx.changed().await.expect("loader dropped");
    }

    // Explicit switch while A is still parked.
    loader.switch_to("B").await.unwrap();
    assert_eq!(loader.engine().unwrap().model_id(), "B");

    // A's late success must not replace B's engine or audit trail.
    notify.notify_one();
    task.await.expect("load task");

    let state = loader.state();
    assert_eq!(state.phase, LoadPhase::Ready);
    assert_eq!(state.tried, vec!["B"]);
    assert_eq!(loader.engine().unwrap().model_id(), "B");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ensure_loaded_starts_a_single_run() {
    let factory = ScriptedFactory::new([("A", Ok(()))]);
    let loader = Arc::new(loader(factory.clone(), &["A"]));

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let loader = loader.clone();
            tokio::spawn(async move { loader.ensure_loaded().await })
        })
        .collect();
    for task in tasks {
        task.await.expect("load task");
    }

    // The in-flight claim is taken under one lock, so however the
    // callers interleave only one run reaches the factory.
    assert_eq!(factory.calls(), vec!["A"]);
    assert_eq!(loader.state().phase, LoadPhase::Ready);
}

#[tokio::test]
async fn cancel_lets_a_fresh_run_start() {
    let notify = Arc::new(Notify::new());
    let mut factory = ScriptedFactory::new([("A", Ok(()))]);
    Arc::get_mut(&mut factory).unwrap().gate = Some(("A".to_string(), notify.clone()));
    let loader = Arc::new(loader(factory.clone(), &["A"]));

    let task = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.ensure_loaded().await })
    };
    let mut rx = loader.subscribe();
    while rx.borrow().phase != LoadPhase::Loading {
        rx.changed().await.expect("loader dropped");
    }

    loader.cancel();
    notify.notify_one();
    task.await.expect("load task");

    // Cancellation released the in-flight claim; a new run may start.
    notify.notify_one();
    loader.ensure_loaded().await;

    assert_eq!(factory.calls(), vec!["A", "A"]);
    assert_eq!(loader.state().phase, LoadPhase::Ready);
    assert!(loader.engine().is_some());
}

#[tokio::test]
async fn chat_uses_whatever_engine_the_loader_holds() {
    let factory = ScriptedFactory::new([("A", Err("Device was lost")), ("B", Ok(()))]);
    let loader = loader(factory, &["A", "B"]);
    let session = ChatSession::new("welcome");

    // Before the load: inline not-ready reply.
    let outcome = session.submit(loader.engine(), "anyone home?").await;
    assert_eq!(outcome, SubmitOutcome::NotReady);

    loader.ensure_loaded().await;

    let outcome = session.submit(loader.engine(), "hello").await;
    assert_eq!(outcome, SubmitOutcome::Replied);
    let transcript = session.transcript();
    assert_eq!(transcript.last().unwrap().content, "[B] hello");
}
