//! Auto-fix suggestions for well-known diagnostic codes.
//!
//! A fixed set of codes (use-of-moved, borrow conflicts, type mismatch,
//! dangling borrow) carries machine-readable fix suggestions: a description,
//! an example code change, and a confidence tier. Hosts render them after
//! the primary message; the LSP uses them for quick-fix actions.

use super::DiagnosticCode;
use crate::symbol::Symbol;

/// How likely a suggestion is to be the right fix
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixConfidence {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for FixConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixConfidence::High => f.write_str("high"),
            FixConfidence::Medium => f.write_str("medium"),
            FixConfidence::Low => f.write_str("low"),
        }
    }
}

/// A single suggested fix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixSuggestion {
    /// What the fix does, in one sentence
    pub description: String,
    /// Example code change illustrating the fix
    pub code_change: String,
    /// Confidence tier
    pub confidence: FixConfidence,
}

impl FixSuggestion {
    fn new(
        description: impl Into<String>,
        code_change: impl Into<String>,
        confidence: FixConfidence,
    ) -> Self {
        Self {
            description: description.into(),
            code_change: code_change.into(),
            confidence,
        }
    }
}

/// Generate the suggestion catalog entry for a code
///
/// `var` is the variable the diagnostic is about, when known; it is spliced
/// into the example code changes.
pub fn suggest_fixes(code: DiagnosticCode, var: Option<Symbol>) -> Vec<FixSuggestion> {
    let name = var.map(|s| s.as_str()).unwrap_or("value");
    match code {
        DiagnosticCode::USE_OF_MOVED => vec![
            FixSuggestion::new(
                format!("borrow '{name}' instead of moving it"),
                format!("process(&{name})"),
                FixConfidence::High,
            ),
            FixSuggestion::new(
                format!("clone '{name}' before the move if both copies are needed"),
                format!("process({name}.clone())"),
                FixConfidence::Medium,
            ),
        ],
        DiagnosticCode::BORROW_OF_MOVED => vec![
            FixSuggestion::new(
                format!("borrow '{name}' before it is moved"),
                format!("let r = &{name}  # take the reference first"),
                FixConfidence::High,
            ),
            FixSuggestion::new(
                format!("clone '{name}' so the original stays available to borrow"),
                format!("consume({name}.clone())"),
                FixConfidence::Medium,
            ),
        ],
        DiagnosticCode::MUTABLE_WHILE_SHARED => vec![
            FixSuggestion::new(
                "end the immutable borrow in its own scope before mutating",
                "{ let r = &data; read(r) }  # shared borrow ends here\nlet m = &mut data",
                FixConfidence::High,
            ),
            FixSuggestion::new(
                format!("clone '{name}' and mutate the clone"),
                format!("let mut copy = {name}.clone()"),
                FixConfidence::Low,
            ),
        ],
        DiagnosticCode::DOUBLE_MUTABLE_BORROW => vec![
            FixSuggestion::new(
                "split the two mutable borrows into separate scopes",
                "{ let a = &mut data; ... }  # first borrow ends\nlet b = &mut data",
                FixConfidence::High,
            ),
            FixSuggestion::new(
                "pass the existing mutable reference along instead of re-borrowing",
                "helper(a)  # reuse the first &mut",
                FixConfidence::Medium,
            ),
        ],
        DiagnosticCode::TYPE_MISMATCH => vec![
            FixSuggestion::new(
                "cast the value to the expected type",
                "let x: i64 = n as i64",
                FixConfidence::Medium,
            ),
            FixSuggestion::new(
                "change the declared type to match the value",
                "let x: String = ...",
                FixConfidence::Low,
            ),
        ],
        DiagnosticCode::DOES_NOT_LIVE_LONG_ENOUGH => vec![
            FixSuggestion::new(
                "return an owned value instead of a reference to a local",
                format!("return {name}  # move it out rather than borrowing"),
                FixConfidence::High,
            ),
            FixSuggestion::new(
                "take the storage as a parameter so the caller owns it",
                "fn fill(out: &mut String)",
                FixConfidence::Medium,
            ),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_use_of_moved_suggests_borrow_and_clone() {
        let fixes = suggest_fixes(DiagnosticCode::USE_OF_MOVED, Some(Symbol::intern("data")));
        assert!(!fixes.is_empty());
        assert!(fixes
            .iter()
            .any(|f| f.description.contains("borrow") || f.description.contains("reference")));
        assert!(fixes.iter().any(|f| f.description.contains("clone")));
        assert!(fixes.iter().all(|f| !f.description.is_empty() && !f.code_change.is_empty()));
    }

    #[test]
    fn test_mutable_while_shared_suggests_scope_and_clone() {
        let fixes = suggest_fixes(DiagnosticCode::MUTABLE_WHILE_SHARED, Some(Symbol::intern("data")));
        assert!(fixes.iter().any(|f| f.description.contains("scope")));
        assert!(fixes.iter().any(|f| f.description.contains("clone")));
    }

    #[test]
    fn test_type_mismatch_suggests_cast() {
        let fixes = suggest_fixes(DiagnosticCode::TYPE_MISMATCH, None);
        assert!(fixes.iter().any(|f| f.description.contains("cast")));
        assert!(fixes.iter().any(|f| f.description.contains("type")));
    }

    #[test]
    fn test_dangling_borrow_suggests_owned_return() {
        let fixes = suggest_fixes(DiagnosticCode::DOES_NOT_LIVE_LONG_ENOUGH, None);
        assert!(fixes
            .iter()
            .any(|f| f.description.contains("owned") || f.description.contains("return")));
    }

    #[test]
    fn test_unknown_codes_have_no_fixes() {
        assert!(suggest_fixes(DiagnosticCode::UNDEFINED_NAME, None).is_empty());
    }

    #[test]
    fn test_var_name_spliced_into_examples() {
        let fixes = suggest_fixes(DiagnosticCode::USE_OF_MOVED, Some(Symbol::intern("conn")));
        assert!(fixes.iter().any(|f| f.code_change.contains("conn")));
    }
}
