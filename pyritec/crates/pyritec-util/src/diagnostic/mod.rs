//! Diagnostic module - structured error and warning reporting.
//!
//! Diagnostics are structured records, not text: a stable [`DiagnosticCode`],
//! a severity [`Level`], a primary [`Span`], secondary labeled spans, the
//! variable the diagnostic is about (when there is one), and optional
//! [`FixSuggestion`]s. The host decides how to render them; the middle-end
//! only accumulates them in a [`Handler`].
//!
//! # Examples
//!
//! ```
//! use pyritec_util::diagnostic::{DiagnosticBuilder, DiagnosticCode, Handler};
//! use pyritec_util::span::Span;
//!
//! let handler = Handler::new();
//! DiagnosticBuilder::error("cannot use moved value 'data'")
//!     .code(DiagnosticCode::USE_OF_MOVED)
//!     .span(Span::new(10, 14, 2, 5))
//!     .emit(&handler);
//!
//! assert!(handler.has_errors());
//! ```

mod builder;
mod codes;
mod fixes;

pub use builder::DiagnosticBuilder;
pub use codes::{CodeCategory, CodeParseError, DiagnosticCode};
pub use fixes::{suggest_fixes, FixConfidence, FixSuggestion};

use crate::span::Span;
use crate::symbol::Symbol;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::fmt;

/// Diagnostic severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    /// An error that prevents compilation
    Error,
    /// A warning that doesn't prevent compilation
    Warning,
    /// Additional information about a diagnostic
    Note,
    /// A suggestion for fixing an issue
    Help,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "error"),
            Level::Warning => write!(f, "warning"),
            Level::Note => write!(f, "note"),
            Level::Help => write!(f, "help"),
        }
    }
}

/// A secondary span with an explanatory label
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Label {
    /// Where the label points
    pub span: Span,
    /// What the label says, e.g. "value moved here"
    pub message: String,
}

impl Label {
    /// Create a new label
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }
}

/// A structured diagnostic record
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level
    pub level: Level,
    /// Stable code, e.g. `P0234`
    pub code: DiagnosticCode,
    /// Main diagnostic message
    pub message: String,
    /// Primary source location
    pub span: Span,
    /// Secondary spans with labels
    pub labels: Vec<Label>,
    /// The variable this diagnostic is about, when there is one
    pub var_name: Option<Symbol>,
    /// Suggested fixes
    pub fixes: Vec<FixSuggestion>,
    /// Additional notes for context
    pub notes: Vec<String>,
    /// Help suggestions (free-form, unlike the structured fixes)
    pub helps: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic
    pub fn new(level: Level, code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            level,
            code,
            message: message.into(),
            span,
            labels: Vec::new(),
            var_name: None,
            fixes: Vec::new(),
            notes: Vec::new(),
            helps: Vec::new(),
        }
    }

    /// Create an error diagnostic
    pub fn error(code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Error, code, message, span)
    }

    /// Create a warning diagnostic
    pub fn warning(code: DiagnosticCode, message: impl Into<String>, span: Span) -> Self {
        Self::new(Level::Warning, code, message, span)
    }

    /// Populate `fixes` from the per-code suggestion catalog
    ///
    /// Replaces nothing if the catalog has no entry for the code.
    pub fn with_suggested_fixes(mut self) -> Self {
        let suggested = fixes::suggest_fixes(self.code, self.var_name);
        if !suggested.is_empty() {
            self.fixes = suggested;
        }
        self
    }
}

/// Handler for collecting and reporting diagnostics
///
/// The `Handler` is the per-unit diagnostic sink. Stages push structured
/// records into it; at the end of the pipeline [`Handler::take_sorted`]
/// hands them to the host ordered by primary span.
///
/// The host may install an allow-list of codes to silence, and performance
/// advisories (`P10xx`) are dropped unless explicitly enabled.
pub struct Handler {
    /// Collected diagnostics
    diagnostics: RefCell<Vec<Diagnostic>>,
    /// Codes the host has chosen to silence
    allow_list: RefCell<FxHashSet<DiagnosticCode>>,
    /// Whether `P10xx` advisories are emitted (off by default)
    emit_advisories: RefCell<bool>,
}

impl Handler {
    /// Create a new handler
    pub fn new() -> Self {
        Self {
            diagnostics: RefCell::new(Vec::new()),
            allow_list: RefCell::new(FxHashSet::default()),
            emit_advisories: RefCell::new(false),
        }
    }

    /// Silence a code: matching diagnostics are filtered at emit
    pub fn allow(&self, code: DiagnosticCode) {
        self.allow_list.borrow_mut().insert(code);
    }

    /// Enable `P10xx` performance advisories
    pub fn enable_advisories(&self) {
        *self.emit_advisories.borrow_mut() = true;
    }

    /// Emit a pre-built diagnostic
    ///
    /// Diagnostics on the allow-list, and advisories while advisories are
    /// disabled, are dropped here.
    pub fn emit_diagnostic(&self, diagnostic: Diagnostic) {
        if self.allow_list.borrow().contains(&diagnostic.code) {
            return;
        }
        if diagnostic.code.is_advisory() && !*self.emit_advisories.borrow() {
            return;
        }
        self.diagnostics.borrow_mut().push(diagnostic);
    }

    /// Create a builder for an error at a span
    pub fn build_error(
        &self,
        code: DiagnosticCode,
        span: Span,
        message: impl Into<String>,
    ) -> DiagnosticBuilder {
        DiagnosticBuilder::error(message).code(code).span(span)
    }

    /// Create a builder for a warning at a span
    pub fn build_warning(
        &self,
        code: DiagnosticCode,
        span: Span,
        message: impl Into<String>,
    ) -> DiagnosticBuilder {
        DiagnosticBuilder::warning(message).code(code).span(span)
    }

    /// Check if any errors have been reported
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .borrow()
            .iter()
            .any(|d| d.level == Level::Error)
    }

    /// Number of errors
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == Level::Error)
            .count()
    }

    /// Number of warnings
    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .borrow()
            .iter()
            .filter(|d| d.level == Level::Warning)
            .count()
    }

    /// Snapshot of all diagnostics in emission order
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    /// Drain all diagnostics, sorted by primary span
    ///
    /// The sort is stable, so diagnostics at the same position keep their
    /// emission order.
    pub fn take_sorted(&self) -> Vec<Diagnostic> {
        let mut diags = std::mem::take(&mut *self.diagnostics.borrow_mut());
        diags.sort_by_key(|d| d.span);
        diags
    }

    /// Clear all diagnostics
    pub fn clear(&self) {
        self.diagnostics.borrow_mut().clear();
    }
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}
