//! pyritec-util - Foundation Types for the Pyrite Middle-End
//!
//! ============================================================================
//! MODULE OVERVIEW
//! ============================================================================
//!
//! This crate provides the fundamental utilities shared by every stage of the
//! pyritec semantic pipeline:
//!
//! - Typed index vectors ([`IndexVec`]) so that symbol ids, scope ids, type
//!   ids and type-variable ids can never be mixed up.
//! - A global string interner ([`Symbol`]) giving O(1) name comparison.
//! - Source spans ([`Span`]) carried verbatim from the parser into every
//!   diagnostic.
//! - Structured diagnostics ([`Diagnostic`], [`Handler`]) with stable `P####`
//!   codes, secondary labeled spans, and auto-fix suggestions.
//!
//! DESIGN PRINCIPLES:
//! ------------------
//! 1. ZERO-COST ABSTRACTIONS
//!    Typed indices compile down to plain integer indexing.
//!
//! 2. TYPE SAFETY
//!    Each arena gets its own index type via [`define_idx!`]; an id from one
//!    arena does not index another.
//!
//! 3. DETERMINISM
//!    Everything observable (interner indices aside) iterates in insertion
//!    order; diagnostics sort by source position before they are handed to
//!    the host.

pub mod diagnostic;
pub mod index_vec;
pub mod span;
pub mod symbol;

pub use diagnostic::{
    Diagnostic, DiagnosticBuilder, DiagnosticCode, FixConfidence, FixSuggestion, Handler, Label,
    Level,
};
pub use index_vec::{Idx, IndexVec};
pub use span::{FileId, Span};
pub use symbol::Symbol;

// Re-export commonly used hash collections
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;

/// Macro to define index types easily
///
/// # Examples
///
/// ```
/// use pyritec_util::{define_idx, Idx};
///
/// define_idx!(ExprId);
///
/// let id = ExprId::from_usize(3);
/// assert_eq!(id.index(), 3);
/// ```
#[macro_export]
macro_rules! define_idx {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u32);

        impl $crate::Idx for $name {
            fn from_usize(idx: usize) -> Self {
                assert!(idx <= u32::MAX as usize);
                $name(idx as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}
