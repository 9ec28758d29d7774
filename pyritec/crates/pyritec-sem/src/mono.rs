//! Monomorphization request collection.
//!
//! The middle-end never instantiates generic bodies. Every generic call,
//! struct/enum instantiation, and trait-method dispatch with concrete
//! arguments emits a request keyed by a content hash of the callee name and
//! the fully resolved type and compile-time arguments. The set is
//! deduplicated, and emission order matches the first syntactic occurrence
//! of the instantiating expression, so identical inputs produce identical
//! request lists.

use crate::symbols::{DefId, SymbolTable};
use crate::ty::{ConstValue, TyId, TyPool};
use pyritec_util::{FxHashSet, Span, Symbol};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// One specialization the code generator must emit
#[derive(Clone, Debug)]
pub struct MonoRequest {
    /// The generic definition being instantiated
    pub target: DefId,
    /// Its name, for host-side rendering
    pub name: Symbol,
    /// Resolved type arguments
    pub ty_args: Vec<TyId>,
    /// Resolved compile-time arguments
    pub const_args: Vec<ConstValue>,
    /// Content hash identifying the specialization
    pub key: u64,
    /// First occurrence that demanded this specialization
    pub span: Span,
}

/// The deduplicated request set
#[derive(Debug, Default)]
pub struct MonoRequests {
    seen: FxHashSet<u64>,
    requests: Vec<MonoRequest>,
}

impl MonoRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content hash of a specialization
    ///
    /// Hashes the rendered forms rather than raw ids so the key is a
    /// function of type *structure*, stable across pools.
    pub fn key_of(
        name: Symbol,
        ty_args: &[TyId],
        const_args: &[ConstValue],
        pool: &TyPool,
        symbols: &SymbolTable,
    ) -> u64 {
        let mut hasher = FxHasher::default();
        name.as_str().hash(&mut hasher);
        for &arg in ty_args {
            pool.display(arg, symbols).hash(&mut hasher);
        }
        for arg in const_args {
            arg.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Record an instantiation; duplicates are dropped
    ///
    /// Returns true when the request was new.
    pub fn record(
        &mut self,
        target: DefId,
        name: Symbol,
        ty_args: Vec<TyId>,
        const_args: Vec<ConstValue>,
        span: Span,
        pool: &TyPool,
        symbols: &SymbolTable,
    ) -> bool {
        let key = Self::key_of(name, &ty_args, &const_args, pool, symbols);
        if !self.seen.insert(key) {
            return false;
        }
        self.requests.push(MonoRequest {
            target,
            name,
            ty_args,
            const_args,
            key,
            span,
        });
        true
    }

    /// All requests in first-occurrence order
    pub fn requests(&self) -> &[MonoRequest] {
        &self.requests
    }

    /// Number of unique requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// True when no requests were recorded
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drain the requests
    pub fn take(&mut self) -> Vec<MonoRequest> {
        self.seen.clear();
        std::mem::take(&mut self.requests)
    }
}
