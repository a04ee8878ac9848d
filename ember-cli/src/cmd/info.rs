//! `ember info` — print version and device availability.

use anyhow::Result;

/// Print runtime info to stdout.
pub fn execute() -> Result<()> {
    println!("ember v{}", ember_core::VERSION);
    println!();

    let device = ember_engine::select_device(false)?;
    println!("Default device: {device:?}");
    println!();

    println!("Compiled backends:");
    #[cfg(feature = "metal")]
    println!("  Metal");
    #[cfg(feature = "cuda")]
    println!("  CUDA");
    println!("  CPU (always available)");

    Ok(())
}
