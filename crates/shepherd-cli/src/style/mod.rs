//! Terminal output for the CLI: semantic colors, status lines, node tables
//! and spinners for long waits.

use std::sync::atomic::{AtomicBool, Ordering};

pub mod colors;
pub mod output;
pub mod spinner;
pub mod table;

pub use output::*;
pub use spinner::*;
pub use table::*;

static NO_COLOR: AtomicBool = AtomicBool::new(false);

/// Disables colors for the rest of the process (`--no-color` or `NO_COLOR`).
pub fn set_no_color(value: bool) {
    NO_COLOR.store(value, Ordering::SeqCst);
}

pub fn no_color() -> bool {
    NO_COLOR.load(Ordering::SeqCst)
}
