//! `ember chat` — the interactive REPL.
//!
//! Loads a model (with a progress bar fed by the loader's watch
//! channel), then reads lines from stdin. Slash commands cover model
//! switching, reloading, and clearing the transcript; anything else is
//! submitted as a chat message. Input is only read again once the
//! pending reply has resolved, so at most one generation is in flight.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

use ember_core::{
    CandidateList, ChatSession, FallbackPolicy, LoadPhase, ModelLoader, SubmitOutcome,
};
use ember_engine::{default_candidates, GenerationOptions, LocalEngineFactory, PRESETS};

use crate::progress;

const GREETING: &str = "Hi! Ask me anything.";

pub async fn execute(
    model: Option<String>,
    max_tokens: usize,
    temperature: f64,
    cpu: bool,
) -> Result<()> {
    let device = ember_engine::select_device(cpu)?;
    tracing::info!(device = ?device, "starting chat");
    let factory = Arc::new(LocalEngineFactory::new(
        device,
        GenerationOptions {
            temperature,
            max_tokens,
            ..Default::default()
        },
    ));

    // Ids outside the catalog (local paths, explicit repo specs) go in
    // front; the built-in ladder stays behind them as fallback.
    let candidates = match &model {
        Some(id) if default_candidates().index_of(id).is_none() => CandidateList::new(
            std::iter::once(id.clone()).chain(PRESETS.iter().map(|p| p.id.to_string())),
        )?,
        _ => default_candidates(),
    };

    let mut loader = ModelLoader::new(factory, candidates, FallbackPolicy::default());
    if let Some(id) = &model {
        loader = loader.with_preferred(id)?;
    }
    let loader = Arc::new(loader);
    let session = ChatSession::new(GREETING);

    println!("{GREETING}");
    println!("Commands: /model <id>, /models, /reload, /clear, /quit");
    println!();

    load_with_progress(&loader, loader.ensure_loaded()).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt_marker()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(command, &loader, &session).await {
                break;
            }
            continue;
        }

        match session.submit(loader.engine(), &line).await {
            SubmitOutcome::Replied | SubmitOutcome::NotReady => {
                if let Some(reply) = session.transcript().last() {
                    println!("{}", reply.content);
                }
            }
            SubmitOutcome::RejectedEmpty | SubmitOutcome::RejectedBusy => {}
        }
    }

    Ok(())
}

/// Returns false when the REPL should exit.
async fn handle_command(command: &str, loader: &Arc<ModelLoader>, session: &ChatSession) -> bool {
    let mut parts = command.split_whitespace();
    match parts.next() {
        Some("quit") | Some("exit") => return false,
        Some("clear") => {
            if session.clear() {
                println!("transcript cleared");
            } else {
                println!("still generating; try again in a moment");
            }
        }
        Some("models") => print_candidates(loader),
        Some("reload") => {
            if loader.state().phase == LoadPhase::Loading {
                println!("a load is already in progress");
            } else {
                load_with_progress(loader, loader.reload()).await;
            }
        }
        Some("model") => {
            let Some(id) = parts.next() else {
                println!("usage: /model <id>");
                return true;
            };
            if loader.state().phase == LoadPhase::Loading {
                println!("a load is already in progress");
            } else if loader.candidates().index_of(id).is_none() {
                println!("unknown model '{id}'; /models lists the options");
            } else {
                let id = id.to_string();
                tracing::info!(model = %id, "switching model");
                load_with_progress(loader, async {
                    // The id was checked against the list above.
                    let _ = loader.switch_to(&id).await;
                })
                .await;
            }
        }
        Some(other) => println!("unknown command: /{other}"),
        None => {}
    }
    true
}

/// Drive a load future to completion while rendering the progress bar,
/// then print the outcome.
async fn load_with_progress<F: Future>(loader: &ModelLoader, load: F) -> F::Output {
    let mut rx = loader.subscribe();
    let bar = progress::load_bar();

    tokio::pin!(load);
    let output = loop {
        tokio::select! {
            output = &mut load => break output,
            changed = rx.changed() => match changed {
                Ok(()) => progress::update(&bar, &rx.borrow_and_update()),
                Err(_) => break (&mut load).await,
            },
        }
    };
    bar.finish_and_clear();

    let state = loader.state();
    match state.phase {
        LoadPhase::Ready => {
            if let Some(engine) = loader.engine() {
                if state.tried.len() > 1 {
                    println!(
                        "model ready: {} (fell back from {})",
                        engine.model_id(),
                        state.tried[..state.tried.len() - 1].join(", ")
                    );
                } else {
                    println!("model ready: {}", engine.model_id());
                }
            }
        }
        LoadPhase::Failed => {
            println!(
                "model failed to load: {}",
                state.error.as_deref().unwrap_or("unknown error")
            );
            println!("pick another model with /model <id> or retry with /reload");
        }
        LoadPhase::Idle | LoadPhase::Loading => {}
    }
    output
}

fn print_candidates(loader: &ModelLoader) {
    let active = loader.engine().map(|e| e.model_id().to_string());
    println!("models (fallback order):");
    for candidate in loader.candidates().iter() {
        let marker = if active.as_deref() == Some(candidate.id()) {
            "*"
        } else {
            " "
        };
        println!("  {marker} {}", candidate.id());
    }
}

fn prompt_marker() -> Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}
