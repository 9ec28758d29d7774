//! Module resolution contract.
//!
//! The middle-end does no I/O. When the resolver meets an import it hands the
//! path segments to a host-supplied [`ModuleLoader`], which returns either a
//! parsed syntax tree (fed back through the declaration pass into a module
//! scope) or a [`ModuleError`]. Circular imports are detected by the loader
//! and surfaced as their own error kind so the resolver can report them with
//! a dedicated code.

use pyritec_ast::Program;
use thiserror::Error;

/// Host callback resolving an import path to a parsed module
pub trait ModuleLoader {
    /// Load the module at `path`, e.g. `["std", "collections", "list"]`
    fn load(&self, path: &[&str]) -> Result<Program, ModuleError>;
}

/// Why a module failed to load
#[derive(Debug, Error)]
pub enum ModuleError {
    /// No module exists at the path
    #[error("module not found: {}", .0.join("::"))]
    NotFound(Vec<String>),

    /// The import chain loops back on itself
    #[error("circular import: {}", .0.join(" -> "))]
    Circular(Vec<String>),

    /// The module exists but did not parse
    #[error("module {} failed to parse: {1}", .0.join("::"))]
    Parse(Vec<String>, String),
}
