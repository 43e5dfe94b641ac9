//! Error and warning reporting infrastructure.
//!
//! Every pipeline stage reports problems through a [`Handler`], either
//! directly or via the fluent [`DiagnosticBuilder`]. User-level errors and
//! internal invariant failures are distinct [`Level`]s so a test harness can
//! assert that the compiler itself is sound even while feeding it bad
//! programs.
//!
//! # Examples
//!
//! ```
//! use cowc_util::diagnostic::{DiagnosticBuilder, Handler};
//! use cowc_util::span::Pos;
//!
//! let mut handler = Handler::new();
//! DiagnosticBuilder::error("unexpected token")
//!     .pos(Pos::DUMMY)
//!     .note("expected `;`")
//!     .emit(&mut handler);
//! assert!(handler.has_errors());
//! ```

use std::fmt;

use crate::span::Pos;

/// Diagnostic severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// A user error that prevents compilation.
    Error,
    /// A warning that doesn't prevent compilation.
    Warning,
    /// Additional information attached to another diagnostic.
    Note,
    /// An internal invariant failure: the compiler contradicted itself.
    Ice,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
            Level::Ice => write!(f, "internal compiler error"),
        }
    }
}

/// A diagnostic message with severity, location and attached notes.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub pos: Option<Pos>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            pos: None,
            notes: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>, pos: Pos) -> Self {
        let mut d = Self::new(Level::Error, message);
        d.pos = Some(pos);
        d
    }
}

/// Fluent builder for diagnostics.
#[derive(Debug)]
pub struct DiagnosticBuilder {
    diag: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            diag: Diagnostic::new(level, message),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    /// An internal invariant failure; reserved for contradictions the
    /// compiler cannot recover from.
    pub fn ice(message: impl Into<String>) -> Self {
        Self::new(Level::Ice, message)
    }

    pub fn pos(mut self, pos: Pos) -> Self {
        self.diag.pos = Some(pos);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.diag.notes.push(note.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        self.diag
    }

    pub fn emit(self, handler: &mut Handler) {
        handler.report(self.diag);
    }
}

/// Collects diagnostics for one compilation.
#[derive(Debug, Default)]
pub struct Handler {
    diagnostics: Vec<Diagnostic>,
}

impl Handler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diag: Diagnostic) {
        self.diagnostics.push(diag);
    }

    pub fn error(&mut self, message: impl Into<String>, pos: Pos) {
        self.report(Diagnostic::error(message, pos));
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d.level, Level::Error | Level::Ice))
    }

    /// True if any internal invariant failure was reported.
    pub fn has_ices(&self) -> bool {
        self.diagnostics.iter().any(|d| d.level == Level::Ice)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.level, Level::Error | Level::Ice))
            .count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Number of diagnostics reported so far; pairs with [`truncate`]
    /// (Self::truncate) for speculative parses.
    pub fn mark(&self) -> usize {
        self.diagnostics.len()
    }

    /// Drop diagnostics reported after `mark`. Used when a speculative
    /// parse is abandoned.
    pub fn truncate(&mut self, mark: usize) {
        self.diagnostics.truncate(mark);
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_counts_errors() {
        let mut h = Handler::new();
        assert!(!h.has_errors());
        h.error("bad", Pos::DUMMY);
        DiagnosticBuilder::warning("meh").emit(&mut h);
        assert!(h.has_errors());
        assert_eq!(h.error_count(), 1);
        assert_eq!(h.diagnostics().len(), 2);
    }

    #[test]
    fn test_ice_is_distinct_from_user_error() {
        let mut h = Handler::new();
        h.error("user mistake", Pos::DUMMY);
        assert!(!h.has_ices());
        DiagnosticBuilder::ice("expression without a type").emit(&mut h);
        assert!(h.has_ices());
    }

    #[test]
    fn test_builder_attaches_notes_and_pos() {
        let d = DiagnosticBuilder::error("type mismatch")
            .pos(Pos::new(crate::span::FileId(1), 4, 9))
            .note("expected uint8")
            .note("found int16")
            .build();
        assert_eq!(d.level, Level::Error);
        assert_eq!(d.notes.len(), 2);
        assert_eq!(d.pos.unwrap().line, 4);
    }
}
