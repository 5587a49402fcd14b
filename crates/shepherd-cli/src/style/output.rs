//! One-line status messages.

use super::colors::SemanticStyle;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".success(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".error(), msg);
}

pub fn print_warn(msg: &str) {
    println!("{} {}", "⚠".warning(), msg);
}

/// Prints a follow-up suggestion, e.g. the command to run next.
pub fn print_hint(msg: &str) {
    println!("{} {}", "→".muted(), msg.muted());
}

pub fn print_labeled(key: &str, value: &str) {
    println!("  {}: {}", key.muted(), value);
}
