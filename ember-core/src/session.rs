//! Chat transcript state and the single-generation-in-flight guard.
//!
//! The transcript is append-ordered. The only permitted mutation is
//! resolving the pending placeholder of an in-flight generation: its
//! content is replaced in place, the pending flag cleared, id and
//! position untouched. At most one generation runs at a time, so
//! placeholder resolution cannot race.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::engine::Engine;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    User,
    System,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: u64,
    pub role: Role,
    pub content: String,
    /// True while the entry is the placeholder for an in-flight reply.
    pub pending: bool,
}

/// What [`ChatSession::submit`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Placeholder resolved to a generated reply or an inline error.
    Replied,
    /// No engine held; placeholder resolved to the not-ready notice.
    NotReady,
    /// Empty or whitespace-only input; transcript untouched.
    RejectedEmpty,
    /// A generation was already in flight; transcript untouched.
    RejectedBusy,
}

/// Reply placed into the placeholder when no engine is held yet.
pub const NOT_READY_REPLY: &str =
    "The model is still loading. Give it a moment and try again.";

/// Shown in the placeholder while a reply is being generated.
const PLACEHOLDER: &str = "…";

/// Owns the message transcript and turns user input into generation
/// requests against whatever engine the loader currently holds.
pub struct ChatSession {
    transcript: watch::Sender<Vec<Message>>,
    busy: AtomicBool,
    next_id: AtomicU64,
    greeting: String,
}

impl ChatSession {
    /// New session whose transcript starts with a system greeting.
    pub fn new(greeting: impl Into<String>) -> Self {
        let session = Self {
            transcript: watch::channel(Vec::new()).0,
            busy: AtomicBool::new(false),
            next_id: AtomicU64::new(0),
            greeting: greeting.into(),
        };
        session.reset_transcript();
        session
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.transcript.subscribe()
    }

    /// Snapshot of the transcript.
    pub fn transcript(&self) -> Vec<Message> {
        self.transcript.borrow().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Submit user input against the currently held engine.
    ///
    /// Appends the user message and a pending placeholder before the
    /// first suspension point, then resolves the placeholder in place.
    /// Generation failures become the placeholder's content; nothing
    /// propagates to the caller. The prompt is single-turn: only the
    /// new user text is sent to the engine.
    pub async fn submit(
        &self,
        engine: Option<Arc<dyn Engine>>,
        input: &str,
    ) -> SubmitOutcome {
        let text = input.trim();
        if text.is_empty() {
            return SubmitOutcome::RejectedEmpty;
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return SubmitOutcome::RejectedBusy;
        }

        let user_id = self.alloc_id();
        let placeholder_id = self.alloc_id();
        let content = text.to_string();
        self.transcript.send_modify(|t| {
            t.push(Message {
                id: user_id,
                role: Role::User,
                content,
                pending: false,
            });
            t.push(Message {
                id: placeholder_id,
                role: Role::System,
                content: PLACEHOLDER.to_string(),
                pending: true,
            });
        });

        let Some(engine) = engine else {
            self.resolve(placeholder_id, NOT_READY_REPLY.to_string());
            self.busy.store(false, Ordering::SeqCst);
            return SubmitOutcome::NotReady;
        };

        let reply = match engine.generate(text).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "generation failed");
                format!("Something went wrong while generating a reply: {err}")
            }
        };

        self.resolve(placeholder_id, reply);
        self.busy.store(false, Ordering::SeqCst);
        SubmitOutcome::Replied
    }

    /// Reset the transcript to a fresh greeting. Returns false (and
    /// leaves the transcript alone) while a generation is in flight.
    pub fn clear(&self) -> bool {
        if self.is_busy() {
            return false;
        }
        self.reset_transcript();
        true
    }

    fn reset_transcript(&self) {
        let message = Message {
            id: self.alloc_id(),
            role: Role::System,
            content: self.greeting.clone(),
            pending: false,
        };
        self.transcript.send_replace(vec![message]);
    }

    fn resolve(&self, id: u64, content: String) {
        self.transcript.send_modify(|t| {
            if let Some(message) = t.iter_mut().find(|m| m.id == id && m.pending) {
                message.content = content;
                message.pending = false;
            }
        });
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}
