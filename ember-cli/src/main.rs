//! Ember — local chat that falls back to smaller models when loading fails.

mod cmd;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ember",
    about = "Local chat with automatic model fallback",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session.
    Chat {
        /// Starting model: catalog id, local .gguf path, or
        /// 'owner/repo:file.gguf'.
        #[arg(short, long)]
        model: Option<String>,

        /// Maximum tokens per reply.
        #[arg(long, default_value_t = 512)]
        max_tokens: usize,

        /// Sampling temperature.
        #[arg(long, default_value_t = 0.7)]
        temperature: f64,

        /// Force CPU even when an accelerator backend is compiled in.
        #[arg(long)]
        cpu: bool,
    },
    /// List the built-in model catalog.
    Models,
    /// Show available backends and device info.
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            model,
            max_tokens,
            temperature,
            cpu,
        } => cmd::chat::execute(model, max_tokens, temperature, cpu).await,
        Commands::Models => cmd::models::execute(),
        Commands::Info => cmd::info::execute(),
    }
}
