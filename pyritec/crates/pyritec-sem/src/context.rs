//! The per-unit compilation context.
//!
//! One [`Context`] is created per translation unit and threaded through every
//! pipeline stage in sequence. It owns the symbol table, the interned type
//! pool, the diagnostic sink, and the side tables that annotate the syntax
//! tree: resolved symbols, inferred types, and the taint set.
//!
//! TAINT:
//! ------
//! An error on a node marks the node *tainted* instead of installing a bogus
//! annotation. Downstream stages see the taint and stay silent, so one
//! undefined name never produces a cloud of derived failures. Tainted
//! expressions carry the error type, which unifies with everything.

use crate::cost::CostRecord;
use crate::desugar::CloseObligation;
use crate::inline::ClosureLayout;
use crate::module::ModuleLoader;
use crate::mono::MonoRequests;
use crate::symbols::{DefId, ImplId, ScopeId, SymbolTable};
use crate::timeline::Timeline;
use crate::ty::{TyId, TyPool};
use pyritec_ast::{NodeId, NodeIdAllocator, Program};
use pyritec_util::{FxHashMap, FxHashSet, Handler};

/// Host-controlled switches
#[derive(Clone, Debug)]
pub struct FeatureFlags {
    /// Record the per-variable ownership event log
    pub track_timeline: bool,
    /// Record allocation sites and implicit copies
    pub track_costs: bool,
    /// Emit `P10xx` advisories for the recorded costs
    pub warn_costs: bool,
    /// Locale tag for host-side message rendering; codes are stable across locales
    pub language: String,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            track_timeline: false,
            track_costs: false,
            warn_costs: false,
            language: "en".to_owned(),
        }
    }
}

/// Everything the pipeline stages share for one translation unit
pub struct Context<'a> {
    pub symbols: SymbolTable,
    pub types: TyPool,
    pub diag: Handler,
    pub flags: FeatureFlags,
    pub loader: Option<&'a dyn ModuleLoader>,
    /// Continues from the parser's high-water mark for synthesized nodes
    pub ids: NodeIdAllocator,

    /// Resolved symbol per identifier-bearing node
    pub node_defs: FxHashMap<NodeId, DefId>,
    /// Inferred type per expression/pattern node
    pub node_types: FxHashMap<NodeId, TyId>,
    /// Nodes whose resolution or type could not be established
    pub tainted: FxHashSet<NodeId>,
    /// Type of each value definition (bindings, params, functions as values)
    pub def_types: FxHashMap<DefId, TyId>,

    /// Deduplicated monomorphization request set
    pub mono: MonoRequests,
    /// Allocation and implicit-copy records (when `track_costs`)
    pub costs: Vec<CostRecord>,
    /// Ownership event log (when `track_timeline`)
    pub timeline: Timeline,
    /// Environment layouts for runtime closures
    pub closure_layouts: Vec<ClosureLayout>,
    /// LIFO index per `defer` statement within its scope
    pub defer_order: FxHashMap<NodeId, u32>,
    /// `with` initializers whose types must implement `Closeable`
    pub close_obligations: Vec<CloseObligation>,

    /// Generic-parameter scope per item
    pub item_scopes: FxHashMap<NodeId, ScopeId>,
    /// Function body scope per function item
    pub fn_scopes: FxHashMap<NodeId, ScopeId>,
    /// Linked impl record per impl item
    pub impl_map: FxHashMap<NodeId, ImplId>,
    /// Resolved where-clause bounds per function item: (bound type node, traits)
    pub fn_where_bounds: FxHashMap<NodeId, Vec<(NodeId, Vec<DefId>)>>,
    /// Imported module trees, kept for signature elaboration
    pub loaded_modules: Vec<Program>,
}

impl<'a> Context<'a> {
    /// Create a fresh context
    pub fn new(
        flags: FeatureFlags,
        loader: Option<&'a dyn ModuleLoader>,
        ids: NodeIdAllocator,
    ) -> Self {
        let diag = Handler::new();
        if flags.warn_costs {
            diag.enable_advisories();
        }
        let timeline = Timeline::new(flags.track_timeline);
        Self {
            symbols: SymbolTable::new(),
            types: TyPool::new(),
            diag,
            flags,
            loader,
            ids,
            node_defs: FxHashMap::default(),
            node_types: FxHashMap::default(),
            tainted: FxHashSet::default(),
            def_types: FxHashMap::default(),
            mono: MonoRequests::new(),
            costs: Vec::new(),
            timeline,
            closure_layouts: Vec::new(),
            defer_order: FxHashMap::default(),
            close_obligations: Vec::new(),
            item_scopes: FxHashMap::default(),
            fn_scopes: FxHashMap::default(),
            impl_map: FxHashMap::default(),
            fn_where_bounds: FxHashMap::default(),
            loaded_modules: Vec::new(),
        }
    }

    /// Mark a node tainted
    pub fn taint(&mut self, node: NodeId) {
        self.tainted.insert(node);
    }

    /// True if the node is tainted
    pub fn is_tainted(&self, node: NodeId) -> bool {
        self.tainted.contains(&node)
    }

    /// Record a node's resolved symbol
    pub fn set_node_def(&mut self, node: NodeId, def: DefId) {
        self.node_defs.insert(node, def);
    }

    /// The node's resolved symbol, unless tainted or never resolved
    pub fn node_def(&self, node: NodeId) -> Option<DefId> {
        self.node_defs.get(&node).copied()
    }

    /// Record a node's inferred type
    pub fn set_node_type(&mut self, node: NodeId, ty: TyId) {
        self.node_types.insert(node, ty);
    }

    /// The node's inferred type, unless tainted or never checked
    pub fn node_type(&self, node: NodeId) -> Option<TyId> {
        self.node_types.get(&node).copied()
    }

    /// Taint a node and give it the error type so downstream stages
    /// have something to propagate silently
    pub fn taint_with_error_type(&mut self, node: NodeId) -> TyId {
        self.taint(node);
        let err = self.types.common.error;
        self.set_node_type(node, err);
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyritec_ast::NodeId;

    #[test]
    fn test_taint_tracking() {
        let mut ctx = Context::new(FeatureFlags::default(), None, NodeIdAllocator::new());
        let node = NodeId(1);
        assert!(!ctx.is_tainted(node));
        ctx.taint(node);
        assert!(ctx.is_tainted(node));
    }

    #[test]
    fn test_taint_with_error_type_installs_error() {
        let mut ctx = Context::new(FeatureFlags::default(), None, NodeIdAllocator::new());
        let node = NodeId(2);
        let ty = ctx.taint_with_error_type(node);
        assert_eq!(ty, ctx.types.common.error);
        assert!(ctx.is_tainted(node));
        assert_eq!(ctx.node_type(node), Some(ty));
    }

    #[test]
    fn test_warn_costs_enables_advisories() {
        let flags = FeatureFlags {
            warn_costs: true,
            ..Default::default()
        };
        let ctx = Context::new(flags, None, NodeIdAllocator::new());
        ctx.diag.emit_diagnostic(pyritec_util::Diagnostic::warning(
            pyritec_util::DiagnosticCode::ALLOC_IN_LOOP,
            "allocation inside a loop",
            pyritec_util::Span::DUMMY,
        ));
        assert_eq!(ctx.diag.warning_count(), 1);
    }

    #[test]
    fn test_timeline_respects_flag() {
        let ctx = Context::new(FeatureFlags::default(), None, NodeIdAllocator::new());
        assert!(!ctx.timeline.is_enabled());

        let flags = FeatureFlags {
            track_timeline: true,
            ..Default::default()
        };
        let ctx = Context::new(flags, None, NodeIdAllocator::new());
        assert!(ctx.timeline.is_enabled());
    }
}
