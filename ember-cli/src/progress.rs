//! Indicatif rendering of loader progress.

use ember_core::LoaderState;
use indicatif::{ProgressBar, ProgressStyle};

/// A 0-100 bar for model initialization.
pub fn load_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .expect("valid template")
            .progress_chars("=>-"),
    );
    bar
}

/// Apply a loader snapshot to the bar.
pub fn update(bar: &ProgressBar, state: &LoaderState) {
    bar.set_position(u64::from(state.progress));
    if let Some(detail) = &state.detail {
        bar.set_message(detail.clone());
    }
}
