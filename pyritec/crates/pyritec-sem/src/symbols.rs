//! Symbol table, scopes, and impl records.
//!
//! ============================================================================
//! SYMBOLS AND SCOPES
//! ============================================================================
//!
//! All definitions live in one arena per translation unit, indexed by
//! [`DefId`]. Cross-references between symbols (impl -> trait -> type) are
//! plain arena indices, never owned pointers, so the symbol graph needs no
//! back-pointers and has no cyclic-ownership question.
//!
//! A scope owns two name maps - one per namespace - and a parent pointer.
//! Lookups walk the parent chain. Declaring the same name twice in one scope
//! is an error, except that `Value` bindings may shadow.

use crate::ty::TyId;
use indexmap::IndexMap;
use pyritec_ast::SelfKind;
use pyritec_util::{define_idx, FxHashMap, IndexVec, Span, Symbol};

define_idx!(DefId);
define_idx!(ScopeId);
define_idx!(ImplId);

/// Which name space a lookup searches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Namespace {
    /// Bindings, functions, consts
    Value,
    /// Structs, enums, traits, opaques, modules, type params
    Type,
}

/// What kind of scope a scope is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
    Loop,
}

/// One scope: name maps plus parent pointer
#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    values: FxHashMap<Symbol, DefId>,
    types: FxHashMap<Symbol, DefId>,
}

impl Scope {
    fn map(&self, ns: Namespace) -> &FxHashMap<Symbol, DefId> {
        match ns {
            Namespace::Value => &self.values,
            Namespace::Type => &self.types,
        }
    }

    fn map_mut(&mut self, ns: Namespace) -> &mut FxHashMap<Symbol, DefId> {
        match ns {
            Namespace::Value => &mut self.values,
            Namespace::Type => &mut self.types,
        }
    }
}

/// A definition
#[derive(Debug)]
pub struct SymbolData {
    pub name: Symbol,
    pub span: Span,
    pub kind: SymbolKind,
}

/// Definition kinds
#[derive(Debug)]
pub enum SymbolKind {
    /// A local binding or parameter
    Value { mutable: bool },
    /// A function or method
    Function(FnSigData),
    /// A struct definition
    Struct(StructDef),
    /// An enum definition
    Enum(EnumDef),
    /// A trait definition
    Trait(TraitDef),
    /// A generic type parameter
    TypeParam { bounds: Vec<DefId> },
    /// A compile-time parameter
    ConstParam { ty: TyId },
    /// A `const` item
    Const { ty: TyId, value: Option<crate::ty::ConstValue> },
    /// An opaque FFI handle type
    Opaque,
    /// An imported module with its own scope
    Module { scope: ScopeId },
}

/// Function signature, filled in by signature elaboration
#[derive(Debug, Clone)]
pub struct FnSigData {
    pub generics: Vec<DefId>,
    pub const_params: Vec<DefId>,
    pub self_param: Option<SelfKind>,
    pub param_names: Vec<Symbol>,
    pub params: Vec<TyId>,
    pub ret: TyId,
    /// `T -> [trait defs]` bounds from the where clause and inline bounds
    pub where_bounds: Vec<(TyId, Vec<DefId>)>,
    pub is_extern: bool,
}

impl Default for FnSigData {
    fn default() -> Self {
        Self {
            generics: Vec::new(),
            const_params: Vec::new(),
            self_param: None,
            param_names: Vec::new(),
            params: Vec::new(),
            // The error type's id; TyPool interns it first
            ret: TyId(0),
            where_bounds: Vec::new(),
            is_extern: false,
        }
    }
}

/// Struct definition data
#[derive(Debug, Default)]
pub struct StructDef {
    /// Field order is declaration order
    pub fields: IndexMap<Symbol, TyId>,
    pub generics: Vec<DefId>,
    pub const_params: Vec<DefId>,
    pub attributes: Vec<Symbol>,
}

/// Enum definition data
#[derive(Debug, Default)]
pub struct EnumDef {
    /// `None` field list marks a unit variant
    pub variants: IndexMap<Symbol, Option<Vec<TyId>>>,
    pub generics: Vec<DefId>,
}

/// Trait definition data
#[derive(Debug, Default)]
pub struct TraitDef {
    pub methods: IndexMap<Symbol, FnSigData>,
    pub assoc_types: Vec<Symbol>,
    pub generics: Vec<DefId>,
}

/// A linked impl block
#[derive(Debug)]
pub struct ImplData {
    /// Base definition the impl targets
    pub target: DefId,
    /// Lowered self type; `None` until signature elaboration
    pub self_ty: Option<TyId>,
    /// Trait implemented, if any
    pub trait_def: Option<DefId>,
    /// Method name -> function symbol
    pub methods: FxHashMap<Symbol, DefId>,
    /// Associated type name -> lowered binding
    pub assoc_bindings: FxHashMap<Symbol, TyId>,
    pub span: Span,
}

/// The per-unit symbol table
pub struct SymbolTable {
    symbols: IndexVec<DefId, SymbolData>,
    scopes: IndexVec<ScopeId, Scope>,
    pub impls: IndexVec<ImplId, ImplData>,
    /// Impls indexed by target definition
    pub impls_by_target: FxHashMap<DefId, Vec<ImplId>>,
    root: ScopeId,
}

impl SymbolTable {
    /// Create a table with an empty root module scope
    pub fn new() -> Self {
        let mut scopes = IndexVec::new();
        let root = scopes.push(Scope {
            parent: None,
            kind: ScopeKind::Module,
            values: FxHashMap::default(),
            types: FxHashMap::default(),
        });
        Self {
            symbols: IndexVec::new(),
            scopes,
            impls: IndexVec::new(),
            impls_by_target: FxHashMap::default(),
            root,
        }
    }

    /// The root module scope
    pub fn root_scope(&self) -> ScopeId {
        self.root
    }

    /// Open a child scope
    pub fn new_scope(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            kind,
            values: FxHashMap::default(),
            types: FxHashMap::default(),
        })
    }

    /// Access a symbol
    ///
    /// # Panics
    ///
    /// Panics on a foreign id; ids are only minted by this table.
    pub fn symbol(&self, def: DefId) -> &SymbolData {
        &self.symbols[def]
    }

    /// Access a symbol mutably
    pub fn symbol_mut(&mut self, def: DefId) -> &mut SymbolData {
        &mut self.symbols[def]
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// True if no symbols were declared
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Declare a name in a scope
    ///
    /// Returns `Err(existing)` on same-scope redefinition. `Value` symbols
    /// shadow silently, per the language rules.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        ns: Namespace,
        data: SymbolData,
    ) -> Result<DefId, DefId> {
        let name = data.name;
        let shadows = matches!(data.kind, SymbolKind::Value { .. });
        if !shadows {
            if let Some(&existing) = self.scopes[scope].map(ns).get(&name) {
                return Err(existing);
            }
        }
        let def = self.symbols.push(data);
        self.scopes[scope].map_mut(ns).insert(name, def);
        Ok(def)
    }

    /// Resolve a name, walking the parent chain
    pub fn lookup(&self, scope: ScopeId, ns: Namespace, name: Symbol) -> Option<DefId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = &self.scopes[id];
            if let Some(&def) = s.map(ns).get(&name) {
                return Some(def);
            }
            current = s.parent;
        }
        None
    }

    /// Resolve a name in exactly one scope, no parent walk
    pub fn lookup_in(&self, scope: ScopeId, ns: Namespace, name: Symbol) -> Option<DefId> {
        self.scopes[scope].map(ns).get(&name).copied()
    }

    /// Add a symbol to the arena without binding it in any scope
    ///
    /// Used for impl methods and body-local bindings, which are reached
    /// through their impl record or their binding site rather than by
    /// top-level name lookup.
    pub fn add_symbol(&mut self, data: SymbolData) -> DefId {
        self.symbols.push(data)
    }

    /// Bind an already-allocated symbol in a scope
    pub fn bind_existing(&mut self, scope: ScopeId, ns: Namespace, name: Symbol, def: DefId) {
        self.scopes[scope].map_mut(ns).insert(name, def);
    }

    /// Record a linked impl
    pub fn add_impl(&mut self, data: ImplData) -> ImplId {
        let target = data.target;
        let id = self.impls.push(data);
        self.impls_by_target.entry(target).or_default().push(id);
        id
    }

    /// Impls whose target is the given definition
    pub fn impls_for(&self, target: DefId) -> &[ImplId] {
        self.impls_by_target
            .get(&target)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
