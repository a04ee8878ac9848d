//! `ember models` — list the built-in model catalog.

use anyhow::Result;

use ember_engine::PRESETS;

/// Print the catalog in fallback order.
pub fn execute() -> Result<()> {
    println!("Built-in models (fallback order):");
    println!();
    for preset in PRESETS {
        println!("  {:<12} {:>5} MB", preset.id, preset.size_mb);
        println!("               {} ({})", preset.repo, preset.file);
    }
    println!();
    println!("`--model` also accepts a local .gguf path or an explicit");
    println!("`owner/repo:file.gguf` spec; either is tried first, with the");
    println!("catalog as fallback.");

    Ok(())
}
