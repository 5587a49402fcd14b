//! Semantic color palette.

use owo_colors::{OwoColorize, Style};

fn success_style() -> Style {
    Style::new().green().bold()
}

fn error_style() -> Style {
    Style::new().red().bold()
}

fn warning_style() -> Style {
    Style::new().yellow()
}

fn muted_style() -> Style {
    Style::new().dimmed()
}

fn code_style() -> Style {
    Style::new().blue()
}

/// Styles any displayable value, falling back to plain text when colors
/// are off.
pub trait SemanticStyle {
    fn success(&self) -> String;
    fn error(&self) -> String;
    fn warning(&self) -> String;
    fn muted(&self) -> String;
    /// Commands, paths and server names.
    fn code(&self) -> String;
}

fn styled<T: std::fmt::Display + ?Sized>(value: &T, style: Style) -> String {
    paint(value, style, super::no_color())
}

fn paint<T: std::fmt::Display + ?Sized>(value: &T, style: Style, plain: bool) -> String {
    if plain {
        value.to_string()
    } else {
        value.style(style).to_string()
    }
}

impl<T: std::fmt::Display + ?Sized> SemanticStyle for T {
    fn success(&self) -> String {
        styled(self, success_style())
    }

    fn error(&self) -> String {
        styled(self, error_style())
    }

    fn warning(&self) -> String {
        styled(self, warning_style())
    }

    fn muted(&self) -> String {
        styled(self, muted_style())
    }

    fn code(&self) -> String {
        styled(self, code_style())
    }
}
