//! pyritec-sem - Semantic Analysis for Pyrite
//!
//! ============================================================================
//! THE SEMANTIC MIDDLE-END
//! ============================================================================
//!
//! This crate turns a parsed syntax tree into a fully typed, ownership-
//! validated, desugared form ready for code generation. It is organized as a
//! fixed pipeline over one mutable per-unit [`Context`]:
//!
//! 1. RESOLVER - build per-scope symbol tables, resolve identifiers, link
//!    impl blocks to their types and traits.
//! 2. DESUGAR - rewrite `with` into `let` + `defer { close() }`, index
//!    `defer` blocks for LIFO execution, leave `try` for the checker.
//! 3. TYPE CHECKER - elaborate every expression with an interned type,
//!    unify inference variables, check trait obligations and associated
//!    types, evaluate constants in type position, and collect
//!    monomorphization requests.
//! 4. OWNERSHIP ANALYZER - per-binding owned/moved/partially-moved flow
//!    analysis across all control flow, closure captures, defer bodies.
//! 5. BORROW CHECKER - shared-XOR-exclusive over live borrows, owner-use
//!    rules, return-lifetime containment, optional ownership timeline.
//! 6. CLOSURE-INLINE PASS - call-site inlining of compile-time parameter
//!    closures (re-entering checks for the inlined region) and environment
//!    layout for runtime closures.
//!
//! The pipeline continues past failing stages: an error taints the node, the
//! node carries the error type, and downstream stages stay silent about it.
//! Given the same tree and flags, every output (annotations, diagnostics,
//! monomorphization set) is identical across runs.
//!
//! The surrounding lexer, parser, code generator, and driver are external:
//! the crate consumes a [`pyritec_ast::Program`] plus a [`ModuleLoader`]
//! callback and produces an [`AnalysisOutput`]. It performs no I/O.

pub mod borrow;
pub mod check;
pub mod context;
pub mod cost;
pub mod desugar;
pub mod inline;
pub mod layout;
pub mod module;
pub mod mono;
pub mod ownership;
pub mod resolve;
pub mod symbols;
pub mod timeline;
pub mod ty;

#[cfg(test)]
mod edge_cases;
#[cfg(test)]
pub(crate) mod testutil;

pub use context::{Context, FeatureFlags};
pub use cost::{CostKind, CostRecord};
pub use inline::{ClosureLayout, SpecializedFn};
pub use module::{ModuleError, ModuleLoader};
pub use mono::MonoRequest;
pub use symbols::{DefId, SymbolTable};
pub use timeline::{EventKind, OwnershipEvent, Timeline};
pub use ty::{TyId, TyKind, TyPool};

use pyritec_ast::{NodeId, NodeIdAllocator, Program};
use pyritec_util::{Diagnostic, FxHashMap, FxHashSet};

/// Everything the middle-end produces for one translation unit
pub struct AnalysisOutput {
    /// The desugared tree; annotations key off its node ids
    pub program: Program,
    /// Structured diagnostics in source-position order
    pub diagnostics: Vec<Diagnostic>,
    /// Deduplicated monomorphization requests in first-occurrence order
    pub mono_requests: Vec<MonoRequest>,
    /// Allocation and implicit-copy records (with `track_costs`)
    pub cost_records: Vec<CostRecord>,
    /// Environment layouts for runtime closures
    pub closure_layouts: Vec<ClosureLayout>,
    /// Call-site specializations from parameter-closure inlining
    pub specialized_fns: Vec<SpecializedFn>,
    /// Ownership event log (with `track_timeline`)
    pub timeline: Vec<OwnershipEvent>,
    /// LIFO index per `defer` statement within its lexical scope
    pub defer_order: FxHashMap<NodeId, u32>,
    /// Inferred type per node; tainted nodes carry the error type
    pub node_types: FxHashMap<NodeId, TyId>,
    /// Resolved symbol per identifier-bearing node
    pub node_defs: FxHashMap<NodeId, DefId>,
    /// Nodes whose resolution or type could not be established
    pub tainted: FxHashSet<NodeId>,
    /// The interned type pool
    pub types: TyPool,
    /// The per-unit symbol table
    pub symbols: SymbolTable,
}

impl AnalysisOutput {
    /// The node's type, unless it was never typed
    pub fn type_of(&self, node: NodeId) -> Option<TyId> {
        self.node_types.get(&node).copied()
    }

    /// The node's resolved symbol
    pub fn def_of(&self, node: NodeId) -> Option<DefId> {
        self.node_defs.get(&node).copied()
    }

    /// True if the node was tainted by an error
    pub fn is_tainted(&self, node: NodeId) -> bool {
        self.tainted.contains(&node)
    }

    /// True if any error-level diagnostic was emitted
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.level == pyritec_util::Level::Error)
    }

    /// Diagnostics whose code matches
    pub fn diagnostics_with_code(&self, code: pyritec_util::DiagnosticCode) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.code == code).collect()
    }
}

/// Run the full pipeline over one translation unit
///
/// `ids` must be the parser's allocator (or one past its high-water mark) so
/// nodes synthesized by desugaring and inlining get unique ids.
pub fn analyze_unit(
    program: Program,
    flags: FeatureFlags,
    loader: Option<&dyn ModuleLoader>,
    ids: NodeIdAllocator,
) -> AnalysisOutput {
    let mut ctx = Context::new(flags, loader, ids);

    resolve::resolve(&mut ctx, &program);
    let program = desugar::desugar(&mut ctx, program);
    check::check(&mut ctx, &program);
    ownership::analyze_ownership(&mut ctx, &program);
    borrow::check_borrows(&mut ctx, &program);
    let specialized_fns = inline::run_closure_pass(&mut ctx, &program);
    cost::analyze_costs(&mut ctx, &program);

    AnalysisOutput {
        program,
        diagnostics: ctx.diag.take_sorted(),
        mono_requests: ctx.mono.take(),
        cost_records: std::mem::take(&mut ctx.costs),
        closure_layouts: std::mem::take(&mut ctx.closure_layouts),
        specialized_fns,
        timeline: ctx.timeline.take_events(),
        defer_order: std::mem::take(&mut ctx.defer_order),
        node_types: std::mem::take(&mut ctx.node_types),
        node_defs: std::mem::take(&mut ctx.node_defs),
        tainted: std::mem::take(&mut ctx.tainted),
        types: std::mem::replace(&mut ctx.types, TyPool::new()),
        symbols: std::mem::take(&mut ctx.symbols),
    }
}
