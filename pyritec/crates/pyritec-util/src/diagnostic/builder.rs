//! Fluent builder for diagnostics.
//!
//! Stage code constructs diagnostics through this builder so the common path
//! reads as one chain:
//!
//! ```
//! use pyritec_util::diagnostic::{DiagnosticBuilder, DiagnosticCode, Handler};
//! use pyritec_util::span::Span;
//! use pyritec_util::symbol::Symbol;
//!
//! let handler = Handler::new();
//! DiagnosticBuilder::error("cannot use moved value 'data'")
//!     .code(DiagnosticCode::USE_OF_MOVED)
//!     .span(Span::new(30, 34, 3, 1))
//!     .label(Span::new(10, 14, 1, 5), "value moved here")
//!     .var_name(Symbol::intern("data"))
//!     .suggest_fixes()
//!     .emit(&handler);
//! ```

use super::{Diagnostic, DiagnosticCode, FixSuggestion, Handler, Label, Level};
use crate::span::Span;
use crate::symbol::Symbol;

/// Fluent builder for [`Diagnostic`]
pub struct DiagnosticBuilder {
    diagnostic: Diagnostic,
}

impl DiagnosticBuilder {
    /// Start a new diagnostic with an explicit level
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            diagnostic: Diagnostic::new(level, DiagnosticCode::INTERNAL, message, Span::DUMMY),
        }
    }

    /// Start an error diagnostic
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    /// Start a warning diagnostic
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Level::Warning, message)
    }

    /// Set the stable code
    pub fn code(mut self, code: DiagnosticCode) -> Self {
        self.diagnostic.code = code;
        self
    }

    /// Set the primary span
    pub fn span(mut self, span: Span) -> Self {
        self.diagnostic.span = span;
        self
    }

    /// Add a secondary labeled span
    pub fn label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.diagnostic.labels.push(Label::new(span, message));
        self
    }

    /// Record the variable this diagnostic is about
    pub fn var_name(mut self, name: Symbol) -> Self {
        self.diagnostic.var_name = Some(name);
        self
    }

    /// Add a note
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.diagnostic.notes.push(note.into());
        self
    }

    /// Add a free-form help message
    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.diagnostic.helps.push(help.into());
        self
    }

    /// Attach an explicit fix suggestion
    pub fn fix(mut self, fix: FixSuggestion) -> Self {
        self.diagnostic.fixes.push(fix);
        self
    }

    /// Populate fixes from the per-code catalog
    ///
    /// Call after `code` and `var_name` so the catalog sees both.
    pub fn suggest_fixes(mut self) -> Self {
        self.diagnostic = self.diagnostic.with_suggested_fixes();
        self
    }

    /// Finish building
    pub fn build(self) -> Diagnostic {
        self.diagnostic
    }

    /// Finish building and emit into a handler
    pub fn emit(self, handler: &Handler) {
        handler.emit_diagnostic(self.diagnostic);
    }
}
