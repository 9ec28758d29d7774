//! Name resolution.
//!
//! ============================================================================
//! RESOLUTION
//! ============================================================================
//!
//! Two passes over the top-level items, then a walk over function bodies:
//!
//! 1. DECLARATION PASS - visit items in source order and create a symbol for
//!    each (function, struct, enum, trait, const, opaque type, import).
//!    Generic parameters get their own scope per item so forward references
//!    between items work. Impl blocks are queued, not linked: their target
//!    type may be declared later in the file.
//!
//! 2. LINKING PASS - resolve each queued impl's target type and trait,
//!    attach its methods and associated-type names to an [`ImplData`]
//!    record, and check the name-level contract: the trait exists, every
//!    required method is present, and no associated type is supplied that
//!    the trait never declared.
//!
//! 3. BODY PASS - walk each function body with a scope chain, declaring
//!    `let`/`with`/`for`/pattern bindings and annotating every identifier-
//!    bearing node with its resolved symbol. Unresolved names taint the node
//!    and emit `P0201`; downstream stages stay silent on tainted nodes.
//!
//! Identifiers resolve in the value namespace and types in the type
//! namespace; `A::B` resolves `A` in the type/module namespace and then
//! looks `B` up within it. `Value` bindings may shadow; everything else
//! fails on same-scope redefinition.

use crate::context::Context;
use crate::symbols::{
    DefId, EnumDef, FnSigData, ImplData, Namespace, ScopeId, ScopeKind, StructDef, SymbolData,
    SymbolKind, TraitDef,
};
use pyritec_ast::{
    Block, ConstParam, Expr, ExprKind, FnItem, GenericParam, Ident, ImplItem, Item, Pattern,
    PatternKind, Program, Stmt, StmtKind, TypeExpr, TypeExprKind, UseItem,
};
use pyritec_util::symbol::sym;
use pyritec_util::{DiagnosticCode, FxHashMap, Span, Symbol};

/// Names that lower directly to primitive types and are never declared
pub fn is_primitive_name(name: Symbol) -> bool {
    matches!(
        name.as_str(),
        "i8" | "i16"
            | "i32"
            | "i64"
            | "u8"
            | "u16"
            | "u32"
            | "u64"
            | "f32"
            | "f64"
            | "bool"
            | "char"
            | "void"
            | "none"
            | "string"
    )
}

/// Run name resolution over a translation unit
pub fn resolve(ctx: &mut Context<'_>, program: &Program) {
    let mut resolver = Resolver { ctx, loop_depth: 0 };
    resolver.declare_builtins();
    let root = resolver.ctx.symbols.root_scope();
    resolver.declare_items(&program.items, root);
    resolver.link_impls(&program.items, root);
    resolver.resolve_bodies(&program.items, root);
}

pub(crate) struct Resolver<'c, 'a> {
    pub ctx: &'c mut Context<'a>,
    loop_depth: u32,
}

impl<'c, 'a> Resolver<'c, 'a> {
    pub(crate) fn new(ctx: &'c mut Context<'a>) -> Self {
        Self { ctx, loop_depth: 0 }
    }

    /// Pre-declare the handful of built-in functions every unit can call
    fn declare_builtins(&mut self) {
        let root = self.ctx.symbols.root_scope();
        for name in ["print", "println", "drop"] {
            let _ = self.ctx.symbols.declare(
                root,
                Namespace::Value,
                SymbolData {
                    name: Symbol::intern(name),
                    span: Span::DUMMY,
                    kind: SymbolKind::Function(FnSigData {
                        is_extern: true,
                        ..Default::default()
                    }),
                },
            );
        }
    }

    // =========================================================================
    // PASS 1 - DECLARATIONS
    // =========================================================================

    fn declare_items(&mut self, items: &[Item], scope: ScopeId) {
        for item in items {
            match item {
                Item::Fn(func) => self.declare_fn(func, scope),
                Item::Struct(s) => {
                    let generic_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Block);
                    let generics = self.declare_generics(&s.generics, generic_scope);
                    let const_params = self.declare_const_params(&s.const_params, generic_scope);
                    let def = self.declare(
                        scope,
                        Namespace::Type,
                        s.name,
                        s.span,
                        SymbolKind::Struct(StructDef {
                            fields: Default::default(),
                            generics,
                            const_params,
                            attributes: s.attributes.clone(),
                        }),
                    );
                    if let Some(def) = def {
                        self.ctx.set_node_def(s.id, def);
                        self.ctx.item_scopes.insert(s.id, generic_scope);
                    }
                }
                Item::Enum(e) => {
                    let generic_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Block);
                    let generics = self.declare_generics(&e.generics, generic_scope);
                    let def = self.declare(
                        scope,
                        Namespace::Type,
                        e.name,
                        e.span,
                        SymbolKind::Enum(EnumDef {
                            variants: Default::default(),
                            generics,
                        }),
                    );
                    if let Some(def) = def {
                        self.ctx.set_node_def(e.id, def);
                        self.ctx.item_scopes.insert(e.id, generic_scope);
                    }
                }
                Item::Trait(t) => {
                    let generic_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Block);
                    let generics = self.declare_generics(&t.generics, generic_scope);
                    let mut def_data = TraitDef {
                        methods: Default::default(),
                        assoc_types: t.assoc_types.iter().map(|a| a.name).collect(),
                        generics,
                    };
                    // Method names are recorded now so the linking pass can
                    // check impls; signatures are elaborated by the checker.
                    for sig in &t.methods {
                        def_data.methods.insert(sig.name.name, FnSigData::default());
                    }
                    let def = self.declare(
                        scope,
                        Namespace::Type,
                        t.name,
                        t.span,
                        SymbolKind::Trait(def_data),
                    );
                    if let Some(def) = def {
                        self.ctx.set_node_def(t.id, def);
                        self.ctx.item_scopes.insert(t.id, generic_scope);
                    }
                }
                Item::Const(c) => {
                    let error = self.ctx.types.common.error;
                    let def = self.declare(
                        scope,
                        Namespace::Value,
                        c.name,
                        c.span,
                        SymbolKind::Const {
                            ty: error,
                            value: None,
                        },
                    );
                    if let Some(def) = def {
                        self.ctx.set_node_def(c.id, def);
                    }
                }
                Item::Opaque(o) => {
                    let def = self.declare(scope, Namespace::Type, o.name, o.span, SymbolKind::Opaque);
                    if let Some(def) = def {
                        self.ctx.set_node_def(o.id, def);
                    }
                }
                Item::Use(u) => self.declare_import(u, scope),
                Item::Impl(_) => {
                    // Queued; the target type may be forward-declared
                }
            }
        }
    }

    pub(crate) fn declare_fn(&mut self, func: &FnItem, scope: ScopeId) {
        let generic_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Block);
        let generics = self.declare_generics(&func.generics, generic_scope);
        let const_params = self.declare_const_params(&func.const_params, generic_scope);
        let def = self.declare(
            scope,
            Namespace::Value,
            func.name,
            func.span,
            SymbolKind::Function(FnSigData {
                generics,
                const_params,
                self_param: func.self_param,
                is_extern: func.is_extern,
                ..Default::default()
            }),
        );
        if let Some(def) = def {
            self.ctx.set_node_def(func.id, def);
            self.ctx.item_scopes.insert(func.id, generic_scope);
        }
    }

    fn declare_generics(&mut self, generics: &[GenericParam], scope: ScopeId) -> Vec<DefId> {
        let mut defs = Vec::new();
        for param in generics {
            let def = self.declare(
                scope,
                Namespace::Type,
                param.name,
                param.name.span,
                SymbolKind::TypeParam { bounds: Vec::new() },
            );
            if let Some(def) = def {
                defs.push(def);
            }
        }
        defs
    }

    fn declare_const_params(&mut self, params: &[ConstParam], scope: ScopeId) -> Vec<DefId> {
        let mut defs = Vec::new();
        for param in params {
            let error = self.ctx.types.common.error;
            let def = self.declare(
                scope,
                Namespace::Value,
                param.name,
                param.name.span,
                SymbolKind::ConstParam { ty: error },
            );
            if let Some(def) = def {
                defs.push(def);
            }
        }
        defs
    }

    fn declare_import(&mut self, item: &UseItem, scope: ScopeId) {
        let Some(loader) = self.ctx.loader else {
            self.ctx
                .diag
                .build_error(
                    DiagnosticCode::MODULE_NOT_FOUND,
                    item.span,
                    format!(
                        "cannot import `{}`: no module loader configured",
                        join_path(&item.path)
                    ),
                )
                .emit(&self.ctx.diag);
            self.ctx.taint(item.id);
            return;
        };
        let segments: Vec<&str> = item.path.iter().map(|s| s.as_str()).collect();
        match loader.load(&segments) {
            Ok(module) => {
                let root = self.ctx.symbols.root_scope();
                let module_scope = self.ctx.symbols.new_scope(root, ScopeKind::Module);
                self.declare_items(&module.items, module_scope);
                self.link_impls(&module.items, module_scope);
                self.resolve_bodies(&module.items, module_scope);
                let name = *item.path.last().expect("import path is non-empty");
                let def = self.declare(
                    scope,
                    Namespace::Type,
                    Ident::new(name, item.span),
                    item.span,
                    SymbolKind::Module {
                        scope: module_scope,
                    },
                );
                if let Some(def) = def {
                    self.ctx.set_node_def(item.id, def);
                }
                self.ctx.loaded_modules.push(module);
            }
            Err(err) => {
                let code = match &err {
                    crate::module::ModuleError::Circular(_) => DiagnosticCode::CIRCULAR_IMPORT,
                    _ => DiagnosticCode::MODULE_NOT_FOUND,
                };
                self.ctx
                    .diag
                    .build_error(code, item.span, err.to_string())
                    .emit(&self.ctx.diag);
                self.ctx.taint(item.id);
            }
        }
    }

    fn declare(
        &mut self,
        scope: ScopeId,
        ns: Namespace,
        name: Ident,
        span: Span,
        kind: SymbolKind,
    ) -> Option<DefId> {
        match self.ctx.symbols.declare(
            scope,
            ns,
            SymbolData {
                name: name.name,
                span,
                kind,
            },
        ) {
            Ok(def) => Some(def),
            Err(existing) => {
                let previous = self.ctx.symbols.symbol(existing).span;
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::DUPLICATE_DEFINITION,
                        name.span,
                        format!("duplicate definition of `{}`", name.name),
                    )
                    .label(previous, "previous definition here")
                    .var_name(name.name)
                    .emit(&self.ctx.diag);
                None
            }
        }
    }

    // =========================================================================
    // PASS 2 - IMPL LINKING
    // =========================================================================

    fn link_impls(&mut self, items: &[Item], scope: ScopeId) {
        for item in items {
            if let Item::Impl(imp) = item {
                self.link_impl(imp, scope);
            }
        }
        // Generic bounds and where-clause trait names also need every trait
        // declared first, so they resolve here rather than in pass 1.
        for item in items {
            match item {
                Item::Fn(f) => {
                    self.resolve_bound_paths(&f.generics, f.id, scope);
                }
                Item::Struct(s) => self.resolve_bound_paths(&s.generics, s.id, scope),
                Item::Enum(e) => self.resolve_bound_paths(&e.generics, e.id, scope),
                Item::Trait(t) => self.resolve_bound_paths(&t.generics, t.id, scope),
                Item::Impl(imp) => {
                    for method in &imp.methods {
                        self.resolve_bound_paths(&method.generics, method.id, scope);
                    }
                }
                _ => {}
            }
        }
    }

    fn resolve_bound_paths(
        &mut self,
        generics: &[GenericParam],
        item_id: pyritec_ast::NodeId,
        scope: ScopeId,
    ) {
        let Some(&generic_scope) = self.ctx.item_scopes.get(&item_id) else {
            return;
        };
        for param in generics {
            let Some(param_def) =
                self.ctx
                    .symbols
                    .lookup_in(generic_scope, Namespace::Type, param.name.name)
            else {
                continue;
            };
            let mut bounds = Vec::new();
            for path in &param.bounds {
                let name = path.last();
                match self.ctx.symbols.lookup(scope, Namespace::Type, name.name) {
                    Some(def)
                        if matches!(self.ctx.symbols.symbol(def).kind, SymbolKind::Trait(_)) =>
                    {
                        bounds.push(def)
                    }
                    _ => {
                        self.ctx
                            .diag
                            .build_error(
                                DiagnosticCode::UNDECLARED_TRAIT,
                                name.span,
                                format!("unknown trait `{}` in bound", name.name),
                            )
                            .emit(&self.ctx.diag);
                    }
                }
            }
            if let SymbolKind::TypeParam { bounds: slot } =
                &mut self.ctx.symbols.symbol_mut(param_def).kind
            {
                *slot = bounds;
            }
        }
    }

    fn link_impl(&mut self, imp: &ImplItem, scope: ScopeId) {
        // Resolve the target type's base name
        let target = match &imp.self_ty.kind {
            TypeExprKind::Named { path, .. } => {
                let name = path.last();
                match self.ctx.symbols.lookup(scope, Namespace::Type, name.name) {
                    Some(def) => {
                        let is_type = matches!(
                            self.ctx.symbols.symbol(def).kind,
                            SymbolKind::Struct(_) | SymbolKind::Enum(_) | SymbolKind::Opaque
                        );
                        if is_type {
                            Some(def)
                        } else {
                            self.ctx
                                .diag
                                .build_error(
                                    DiagnosticCode::IMPL_TARGET_NOT_TYPE,
                                    imp.self_ty.span,
                                    format!("`{}` is not a type", name.name),
                                )
                                .emit(&self.ctx.diag);
                            None
                        }
                    }
                    None => {
                        self.ctx
                            .diag
                            .build_error(
                                DiagnosticCode::UNDEFINED_NAME,
                                imp.self_ty.span,
                                format!("undefined type `{}`", name.name),
                            )
                            .emit(&self.ctx.diag);
                        None
                    }
                }
            }
            _ => {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::IMPL_TARGET_NOT_TYPE,
                        imp.self_ty.span,
                        "impl target must be a named type",
                    )
                    .emit(&self.ctx.diag);
                None
            }
        };

        // Resolve the trait, if present
        let trait_def = imp.trait_ref.as_ref().and_then(|path| {
            let name = path.last();
            match self.ctx.symbols.lookup(scope, Namespace::Type, name.name) {
                Some(def) if matches!(self.ctx.symbols.symbol(def).kind, SymbolKind::Trait(_)) => {
                    Some(def)
                }
                _ => {
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::UNDECLARED_TRAIT,
                            name.span,
                            format!("trait `{}` is not declared", name.name),
                        )
                        .emit(&self.ctx.diag);
                    None
                }
            }
        });

        let Some(target) = target else {
            self.ctx.taint(imp.id);
            return;
        };

        // Declare the methods (arena-only; they are reached through the impl)
        let mut methods: FxHashMap<Symbol, DefId> = FxHashMap::default();
        for method in &imp.methods {
            let generic_scope = self
                .ctx
                .symbols
                .new_scope(self.ctx.symbols.root_scope(), ScopeKind::Block);
            let generics = self.declare_generics(&method.generics, generic_scope);
            let const_params = self.declare_const_params(&method.const_params, generic_scope);
            if methods.contains_key(&method.name.name) {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::DUPLICATE_DEFINITION,
                        method.name.span,
                        format!("duplicate method `{}` in impl", method.name.name),
                    )
                    .emit(&self.ctx.diag);
                continue;
            }
            let def = self.ctx.symbols.add_symbol(SymbolData {
                name: method.name.name,
                span: method.span,
                kind: SymbolKind::Function(FnSigData {
                    generics,
                    const_params,
                    self_param: method.self_param,
                    is_extern: method.is_extern,
                    ..Default::default()
                }),
            });
            methods.insert(method.name.name, def);
            self.ctx.set_node_def(method.id, def);
            self.ctx.item_scopes.insert(method.id, generic_scope);
        }

        // Name-level trait conformance
        if let Some(trait_def) = trait_def {
            let (required_methods, declared_assoc): (Vec<Symbol>, Vec<Symbol>) =
                match &self.ctx.symbols.symbol(trait_def).kind {
                    SymbolKind::Trait(t) => (
                        t.methods.keys().copied().collect(),
                        t.assoc_types.clone(),
                    ),
                    _ => (Vec::new(), Vec::new()),
                };
            for required in &required_methods {
                if !methods.contains_key(required) {
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::TRAIT_METHOD_MISSING,
                            imp.span,
                            format!(
                                "impl is missing trait method `{}` required by `{}`",
                                required,
                                self.ctx.symbols.symbol(trait_def).name
                            ),
                        )
                        .emit(&self.ctx.diag);
                }
            }
            for binding in &imp.assoc_types {
                if !declared_assoc.contains(&binding.name.name) {
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::ASSOC_TYPE_NOT_DECLARED,
                            binding.span,
                            format!(
                                "associated type `{}` not declared by trait `{}`",
                                binding.name.name,
                                self.ctx.symbols.symbol(trait_def).name
                            ),
                        )
                        .emit(&self.ctx.diag);
                }
            }
            for declared in &declared_assoc {
                if !imp.assoc_types.iter().any(|b| b.name.name == *declared) {
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::ASSOC_TYPE_MISSING,
                            imp.span,
                            format!(
                                "impl is missing associated type `{}` declared by trait `{}`",
                                declared,
                                self.ctx.symbols.symbol(trait_def).name
                            ),
                        )
                        .emit(&self.ctx.diag);
                }
            }
        } else {
            // Inherent impls cannot bind associated types
            for binding in &imp.assoc_types {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::ASSOC_TYPE_NOT_DECLARED,
                        binding.span,
                        format!(
                            "associated type `{}` requires a trait impl",
                            binding.name.name
                        ),
                    )
                    .emit(&self.ctx.diag);
            }
        }

        let impl_id = self.ctx.symbols.add_impl(ImplData {
            target,
            self_ty: None,
            trait_def,
            methods,
            assoc_bindings: FxHashMap::default(),
            span: imp.span,
        });
        self.ctx.impl_map.insert(imp.id, impl_id);
    }

    // =========================================================================
    // PASS 3 - FUNCTION BODIES
    // =========================================================================

    fn resolve_bodies(&mut self, items: &[Item], scope: ScopeId) {
        for item in items {
            match item {
                Item::Fn(func) => self.resolve_fn_body(func, scope),
                Item::Impl(imp) => {
                    for method in &imp.methods {
                        self.resolve_fn_body(method, scope);
                    }
                    self.resolve_type_expr(&imp.self_ty, scope);
                    for binding in &imp.assoc_types {
                        self.resolve_type_expr(&binding.ty, scope);
                    }
                }
                Item::Const(c) => {
                    self.resolve_type_expr(&c.ty, scope);
                    self.resolve_expr(&c.value, scope);
                }
                Item::Struct(s) => {
                    let field_scope = self
                        .ctx
                        .item_scopes
                        .get(&s.id)
                        .copied()
                        .unwrap_or(scope);
                    for field in &s.fields {
                        self.resolve_type_expr(&field.ty, field_scope);
                    }
                }
                Item::Enum(e) => {
                    let variant_scope = self
                        .ctx
                        .item_scopes
                        .get(&e.id)
                        .copied()
                        .unwrap_or(scope);
                    for variant in &e.variants {
                        for field in variant.fields.iter().flatten() {
                            self.resolve_type_expr(field, variant_scope);
                        }
                    }
                }
                Item::Trait(t) => {
                    let trait_scope = self
                        .ctx
                        .item_scopes
                        .get(&t.id)
                        .copied()
                        .unwrap_or(scope);
                    for sig in &t.methods {
                        for param in &sig.params {
                            self.resolve_type_expr(&param.ty, trait_scope);
                        }
                        if let Some(ret) = &sig.ret_type {
                            self.resolve_type_expr(ret, trait_scope);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Resolve one function's signature types and body
    pub(crate) fn resolve_fn_body(&mut self, func: &FnItem, outer: ScopeId) {
        let generic_scope = self
            .ctx
            .item_scopes
            .get(&func.id)
            .copied()
            .unwrap_or(outer);
        // Signature type expressions resolve inside the generic scope
        for param in &func.params {
            self.resolve_type_expr(&param.ty, generic_scope);
        }
        for cp in &func.const_params {
            self.resolve_type_expr(&cp.ty, generic_scope);
        }
        if let Some(ret) = &func.ret_type {
            self.resolve_type_expr(ret, generic_scope);
        }
        for bound in &func.where_clause {
            self.resolve_type_expr(&bound.ty, generic_scope);
            let mut traits = Vec::new();
            for path in &bound.traits {
                let name = path.last();
                match self.ctx.symbols.lookup(outer, Namespace::Type, name.name) {
                    Some(def)
                        if matches!(self.ctx.symbols.symbol(def).kind, SymbolKind::Trait(_)) =>
                    {
                        traits.push(def)
                    }
                    _ => {
                        self.ctx
                            .diag
                            .build_error(
                                DiagnosticCode::UNDECLARED_TRAIT,
                                name.span,
                                format!("unknown trait `{}` in where clause", name.name),
                            )
                            .emit(&self.ctx.diag);
                    }
                }
            }
            self.ctx
                .fn_where_bounds
                .entry(func.id)
                .or_default()
                .push((bound.ty.id, traits));
        }

        let Some(body) = &func.body else {
            return;
        };

        let fn_scope = self.ctx.symbols.new_scope(generic_scope, ScopeKind::Function);
        self.ctx.fn_scopes.insert(func.id, fn_scope);

        // `self` receiver
        if func.self_param.is_some() {
            let def = self.ctx.symbols.add_symbol(SymbolData {
                name: sym::SELF_LOWER,
                span: func.span,
                kind: SymbolKind::Value {
                    mutable: matches!(func.self_param, Some(pyritec_ast::SelfKind::RefMut)),
                },
            });
            self.bind_value(fn_scope, sym::SELF_LOWER, def);
        }

        for param in &func.params {
            let def = self.ctx.symbols.add_symbol(SymbolData {
                name: param.name.name,
                span: param.name.span,
                kind: SymbolKind::Value {
                    mutable: param.mutable,
                },
            });
            self.bind_value(fn_scope, param.name.name, def);
            self.ctx.set_node_def(param.id, def);
        }

        self.resolve_block(body, fn_scope);
    }

    fn bind_value(&mut self, scope: ScopeId, name: Symbol, def: DefId) {
        self.ctx.symbols.bind_existing(scope, Namespace::Value, name, def);
    }

    fn resolve_block(&mut self, block: &Block, parent: ScopeId) {
        let scope = self.ctx.symbols.new_scope(parent, ScopeKind::Block);
        for stmt in &block.stmts {
            self.resolve_stmt(stmt, scope);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt, scope: ScopeId) {
        match &stmt.kind {
            StmtKind::Let(let_stmt) => {
                if let Some(ty) = &let_stmt.ty {
                    self.resolve_type_expr(ty, scope);
                }
                if let Some(init) = &let_stmt.init {
                    self.resolve_expr(init, scope);
                }
                let def = self.ctx.symbols.add_symbol(SymbolData {
                    name: let_stmt.name.name,
                    span: let_stmt.name.span,
                    kind: SymbolKind::Value {
                        mutable: let_stmt.mutable,
                    },
                });
                self.bind_value(scope, let_stmt.name.name, def);
                self.ctx.set_node_def(stmt.id, def);
            }
            StmtKind::Expr(expr) => self.resolve_expr(expr, scope),
            StmtKind::While(w) => {
                self.resolve_expr(&w.cond, scope);
                self.loop_depth += 1;
                self.resolve_block(&w.body, scope);
                self.loop_depth -= 1;
            }
            StmtKind::For(f) => {
                self.resolve_expr(&f.iter, scope);
                let loop_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Loop);
                let def = self.ctx.symbols.add_symbol(SymbolData {
                    name: f.var.name,
                    span: f.var.span,
                    kind: SymbolKind::Value { mutable: false },
                });
                self.bind_value(loop_scope, f.var.name, def);
                self.ctx.set_node_def(stmt.id, def);
                self.loop_depth += 1;
                self.resolve_block(&f.body, loop_scope);
                self.loop_depth -= 1;
            }
            StmtKind::With(w) => {
                self.resolve_expr(&w.init, scope);
                let with_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Block);
                let def = self.ctx.symbols.add_symbol(SymbolData {
                    name: w.name.name,
                    span: w.name.span,
                    kind: SymbolKind::Value { mutable: true },
                });
                self.bind_value(with_scope, w.name.name, def);
                self.ctx.set_node_def(stmt.id, def);
                self.resolve_block(&w.body, with_scope);
            }
            StmtKind::Defer(d) => self.resolve_block(&d.body, scope),
            StmtKind::Unsafe(b) => self.resolve_block(b, scope),
        }
    }

    fn resolve_expr(&mut self, expr: &Expr, scope: ScopeId) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Break | ExprKind::Continue => {}
            ExprKind::Path(path) => self.resolve_path_expr(expr, path, scope),
            ExprKind::Binary(b) => {
                self.resolve_expr(&b.lhs, scope);
                self.resolve_expr(&b.rhs, scope);
            }
            ExprKind::Unary(u) => self.resolve_expr(&u.operand, scope),
            ExprKind::Reference(r) => self.resolve_expr(&r.operand, scope),
            ExprKind::Call(call) => {
                self.resolve_expr(&call.callee, scope);
                for ty in &call.ty_args {
                    self.resolve_type_expr(ty, scope);
                }
                for arg in &call.const_args {
                    self.resolve_expr(arg, scope);
                }
                for arg in &call.args {
                    self.resolve_expr(arg, scope);
                }
            }
            ExprKind::MethodCall(call) => {
                self.resolve_expr(&call.receiver, scope);
                for ty in &call.ty_args {
                    self.resolve_type_expr(ty, scope);
                }
                for arg in &call.args {
                    self.resolve_expr(arg, scope);
                }
            }
            ExprKind::FieldAccess(f) => self.resolve_expr(&f.object, scope),
            ExprKind::Index(i) => {
                self.resolve_expr(&i.object, scope);
                self.resolve_expr(&i.index, scope);
            }
            ExprKind::Block(b) => self.resolve_block(b, scope),
            ExprKind::If(i) => {
                self.resolve_expr(&i.cond, scope);
                self.resolve_block(&i.then_block, scope);
                if let Some(e) = &i.else_branch {
                    self.resolve_expr(e, scope);
                }
            }
            ExprKind::Match(m) => {
                self.resolve_expr(&m.scrutinee, scope);
                for arm in &m.arms {
                    let arm_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Block);
                    self.resolve_pattern(&arm.pattern, arm_scope);
                    if let Some(guard) = &arm.guard {
                        self.resolve_expr(guard, arm_scope);
                    }
                    self.resolve_block(&arm.body, arm_scope);
                }
            }
            ExprKind::Closure(c) => {
                let closure_scope = self.ctx.symbols.new_scope(scope, ScopeKind::Function);
                for param in &c.params {
                    if let Some(ty) = &param.ty {
                        self.resolve_type_expr(ty, scope);
                    }
                    let def = self.ctx.symbols.add_symbol(SymbolData {
                        name: param.name.name,
                        span: param.name.span,
                        kind: SymbolKind::Value { mutable: false },
                    });
                    self.bind_value(closure_scope, param.name.name, def);
                    self.ctx.set_node_def(param.id, def);
                }
                self.resolve_expr(&c.body, closure_scope);
            }
            ExprKind::Assign(a) => {
                self.resolve_expr(&a.place, scope);
                self.resolve_expr(&a.value, scope);
            }
            ExprKind::CompoundAssign(a) => {
                self.resolve_expr(&a.place, scope);
                self.resolve_expr(&a.value, scope);
            }
            ExprKind::Try(inner) => self.resolve_expr(inner, scope),
            ExprKind::Return(inner) => {
                if let Some(e) = inner {
                    self.resolve_expr(e, scope);
                }
            }
            ExprKind::Tuple(elems) | ExprKind::Array(elems) => {
                for e in elems {
                    self.resolve_expr(e, scope);
                }
            }
            ExprKind::Range(r) => {
                self.resolve_expr(&r.lo, scope);
                self.resolve_expr(&r.hi, scope);
            }
            ExprKind::Cast(c) => {
                self.resolve_expr(&c.expr, scope);
                self.resolve_type_expr(&c.ty, scope);
            }
            ExprKind::StructLiteral(lit) => {
                match self
                    .ctx
                    .symbols
                    .lookup(scope, Namespace::Type, lit.name.name)
                {
                    Some(def) => self.ctx.set_node_def(expr.id, def),
                    None => self.undefined(expr.id, lit.name),
                }
                for ty in &lit.ty_args {
                    self.resolve_type_expr(ty, scope);
                }
                for (_, value) in &lit.fields {
                    self.resolve_expr(value, scope);
                }
            }
            ExprKind::EnumVariant(v) => {
                match self
                    .ctx
                    .symbols
                    .lookup(scope, Namespace::Type, v.enum_name.name)
                {
                    Some(def) => self.ctx.set_node_def(expr.id, def),
                    None => self.undefined(expr.id, v.enum_name),
                }
                for ty in &v.ty_args {
                    self.resolve_type_expr(ty, scope);
                }
                for arg in &v.args {
                    self.resolve_expr(arg, scope);
                }
            }
        }
    }

    fn resolve_path_expr(&mut self, expr: &Expr, path: &pyritec_ast::Path, scope: ScopeId) {
        if path.is_ident() {
            let name = path.last();
            if let Some(def) = self.ctx.symbols.lookup(scope, Namespace::Value, name.name) {
                self.ctx.set_node_def(expr.id, def);
                return;
            }
            // A bare type name in value position: static method receiver
            // (`List.new()`) or an enum in variant position.
            if let Some(def) = self.ctx.symbols.lookup(scope, Namespace::Type, name.name) {
                self.ctx.set_node_def(expr.id, def);
                return;
            }
            self.undefined(expr.id, name);
            return;
        }

        // `A::B` - resolve A in the type/module namespace, then B within
        let first = path.segments[0];
        let second = path.segments[1];
        let Some(container) = self
            .ctx
            .symbols
            .lookup(scope, Namespace::Type, first.name)
        else {
            self.undefined(expr.id, first);
            return;
        };
        match &self.ctx.symbols.symbol(container).kind {
            SymbolKind::Module { scope: module_scope } => {
                let module_scope = *module_scope;
                let found = self
                    .ctx
                    .symbols
                    .lookup_in(module_scope, Namespace::Value, second.name)
                    .or_else(|| {
                        self.ctx
                            .symbols
                            .lookup_in(module_scope, Namespace::Type, second.name)
                    });
                match found {
                    Some(def) => self.ctx.set_node_def(expr.id, def),
                    None => self.undefined(expr.id, second),
                }
            }
            SymbolKind::Enum(_) | SymbolKind::Struct(_) | SymbolKind::Trait(_) => {
                // `Enum::Variant` / `Type::method`: annotate the container;
                // the checker resolves the member through the type.
                self.ctx.set_node_def(expr.id, container);
            }
            _ => self.undefined(expr.id, second),
        }
    }

    fn resolve_pattern(&mut self, pattern: &Pattern, scope: ScopeId) {
        match &pattern.kind {
            PatternKind::Wildcard | PatternKind::Literal(_) => {}
            PatternKind::Binding { name, mutable } => {
                let def = self.ctx.symbols.add_symbol(SymbolData {
                    name: name.name,
                    span: name.span,
                    kind: SymbolKind::Value { mutable: *mutable },
                });
                self.bind_value(scope, name.name, def);
                self.ctx.set_node_def(pattern.id, def);
            }
            PatternKind::Tuple(pats) => {
                for p in pats {
                    self.resolve_pattern(p, scope);
                }
            }
            PatternKind::Struct { name, fields } => {
                match self.ctx.symbols.lookup(scope, Namespace::Type, name.name) {
                    Some(def) => self.ctx.set_node_def(pattern.id, def),
                    None => self.undefined(pattern.id, *name),
                }
                for (_, p) in fields {
                    self.resolve_pattern(p, scope);
                }
            }
            PatternKind::EnumVariant {
                enum_name, fields, ..
            } => {
                match self
                    .ctx
                    .symbols
                    .lookup(scope, Namespace::Type, enum_name.name)
                {
                    Some(def) => self.ctx.set_node_def(pattern.id, def),
                    None => self.undefined(pattern.id, *enum_name),
                }
                for p in fields {
                    self.resolve_pattern(p, scope);
                }
            }
        }
    }

    /// Resolve the names inside a type expression
    pub(crate) fn resolve_type_expr(&mut self, ty: &TypeExpr, scope: ScopeId) {
        match &ty.kind {
            TypeExprKind::Named {
                path,
                ty_args,
                const_args,
            } => {
                let name = path.last();
                if path.is_ident() && is_primitive_name(name.name) {
                    // Primitives lower by name; nothing to resolve
                } else {
                    match self.ctx.symbols.lookup(scope, Namespace::Type, name.name) {
                        Some(def) => self.ctx.set_node_def(ty.id, def),
                        None => self.undefined(ty.id, name),
                    }
                }
                for arg in ty_args {
                    self.resolve_type_expr(arg, scope);
                }
                for arg in const_args {
                    self.resolve_expr(arg, scope);
                }
            }
            TypeExprKind::Ref { inner, .. } => self.resolve_type_expr(inner, scope),
            TypeExprKind::Ptr { inner, .. } => self.resolve_type_expr(inner, scope),
            TypeExprKind::Array { elem, size } => {
                self.resolve_type_expr(elem, scope);
                self.resolve_expr(size, scope);
            }
            TypeExprKind::Slice(elem) => self.resolve_type_expr(elem, scope),
            TypeExprKind::Tuple(elems) => {
                for e in elems {
                    self.resolve_type_expr(e, scope);
                }
            }
            TypeExprKind::Fn { params, ret, .. } => {
                for p in params {
                    self.resolve_type_expr(p, scope);
                }
                self.resolve_type_expr(ret, scope);
            }
            TypeExprKind::SelfType => {}
            TypeExprKind::Assoc { trait_name, .. } => {
                if let Some(trait_name) = trait_name {
                    match self
                        .ctx
                        .symbols
                        .lookup(scope, Namespace::Type, trait_name.name)
                    {
                        Some(def) => self.ctx.set_node_def(ty.id, def),
                        None => self.undefined(ty.id, *trait_name),
                    }
                }
            }
        }
    }

    fn undefined(&mut self, node: pyritec_ast::NodeId, name: Ident) {
        self.ctx
            .diag
            .build_error(
                DiagnosticCode::UNDEFINED_NAME,
                name.span,
                format!("undefined name `{}`", name.name),
            )
            .var_name(name.name)
            .emit(&self.ctx.diag);
        self.ctx.taint(node);
    }
}

fn join_path(path: &[Symbol]) -> String {
    path.iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join("::")
}
