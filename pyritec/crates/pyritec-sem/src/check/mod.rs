//! Type checking.
//!
//! ============================================================================
//! TYPE CHECKER
//! ============================================================================
//!
//! Two phases over the resolved, desugared tree:
//!
//! 1. SIGNATURE ELABORATION - lower every declared type expression to an
//!    interned type: struct fields, enum variants, trait method signatures,
//!    function signatures (with lifetime elision), const declarations, impl
//!    self types and associated-type bindings. Trait impls are compared
//!    against their trait's signatures after `Self` and associated types
//!    substitute.
//!
//! 2. BODY CHECKING - walk each function body assigning an interned type to
//!    every expression and pattern, unifying inference variables, checking
//!    trait obligations at calls, evaluating constant expressions in type
//!    position, and recording monomorphization requests for every generic
//!    instantiation. Unresolved integer literals default to `i32` and float
//!    literals to `f64` at the end of the body.
//!
//! Tainted nodes carry the error type, which unifies with everything, so a
//! resolution failure never produces secondary type errors.

pub mod consteval;
pub mod elision;
pub mod traits;
pub mod unify;

use crate::context::Context;
use crate::symbols::{DefId, FnSigData, SymbolKind};
use crate::ty::{ConstValue, IntTy, TyId, TyKind};
use consteval::{eval_const_expr, ConstEvalError};
use elision::apply_elision;
use pyritec_ast::{
    Block, CallExpr, Expr, ExprKind, FnItem, Item, Literal, MethodCallExpr, NodeId, Pattern,
    PatternKind, Program, SelfKind, Stmt, StmtKind, TypeExpr, TypeExprKind,
};
use pyritec_util::symbol::sym;
use pyritec_util::{DiagnosticCode, FxHashMap, Span, Symbol};
use traits::{lookup_method, substitute, type_implements, MethodLookup};
use unify::{InferCtxt, UnifyError, VarClass};

/// Run the type checker over a resolved, desugared program
pub fn check(ctx: &mut Context<'_>, program: &Program) {
    // Imported modules contribute signatures only; their bodies belong to
    // their own translation units.
    let modules = std::mem::take(&mut ctx.loaded_modules);
    for module in &modules {
        collect_signatures(ctx, &module.items);
    }
    collect_signatures(ctx, &program.items);
    ctx.loaded_modules = modules;

    check_bodies(ctx, program);
    check_close_obligations(ctx);
}

/// Check every function body in the program
pub(crate) fn check_bodies(ctx: &mut Context<'_>, program: &Program) {
    for item in &program.items {
        match item {
            Item::Fn(func) => check_fn_body(ctx, func, None),
            Item::Impl(imp) => {
                let self_ty = ctx
                    .impl_map
                    .get(&imp.id)
                    .and_then(|&impl_id| ctx.symbols.impls[impl_id].self_ty);
                for method in &imp.methods {
                    check_fn_body(ctx, method, self_ty);
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// TYPE LOWERING
// ============================================================================

/// Lower a type expression to an interned type
///
/// Named paths were resolved by the resolver; primitives lower by name.
/// `current_trait` gives `Self::Name` projections their trait inside trait
/// declarations.
pub(crate) fn lower_type_expr(
    ctx: &mut Context<'_>,
    ty: &TypeExpr,
    current_trait: Option<DefId>,
) -> TyId {
    match &ty.kind {
        TypeExprKind::Named { path, ty_args, const_args } => {
            if path.is_ident() {
                if let Some(prim) = lower_primitive(ctx, path.last().name) {
                    return prim;
                }
            }
            let Some(def) = ctx.node_def(ty.id) else {
                // The resolver already reported and tainted
                return ctx.types.common.error;
            };
            match &ctx.symbols.symbol(def).kind {
                SymbolKind::Struct(_) | SymbolKind::Enum(_) => {
                    if ty_args.is_empty() && const_args.is_empty() {
                        ctx.types.intern(TyKind::Adt(def))
                    } else {
                        let ty_args: Vec<TyId> = ty_args
                            .iter()
                            .map(|a| lower_type_expr(ctx, a, current_trait))
                            .collect();
                        let const_args: Vec<ConstValue> = const_args
                            .iter()
                            .map(|a| eval_const_arg(ctx, a, IntTy::I64))
                            .collect();
                        ctx.types.intern(TyKind::Generic {
                            base: def,
                            ty_args,
                            const_args,
                        })
                    }
                }
                SymbolKind::Opaque => ctx.types.intern(TyKind::Opaque(def)),
                SymbolKind::TypeParam { .. } => ctx.types.intern(TyKind::Param(def)),
                SymbolKind::Trait(_) => {
                    ctx.diag
                        .build_error(
                            DiagnosticCode::TYPE_MISMATCH,
                            ty.span,
                            format!(
                                "trait `{}` cannot be used as a type here",
                                ctx.symbols.symbol(def).name
                            ),
                        )
                        .emit(&ctx.diag);
                    ctx.taint(ty.id);
                    ctx.types.common.error
                }
                _ => {
                    ctx.diag
                        .build_error(
                            DiagnosticCode::TYPE_MISMATCH,
                            ty.span,
                            format!("`{}` is not a type", ctx.symbols.symbol(def).name),
                        )
                        .emit(&ctx.diag);
                    ctx.taint(ty.id);
                    ctx.types.common.error
                }
            }
        }
        TypeExprKind::Ref {
            inner,
            mutable,
            lifetime,
        } => {
            let inner = lower_type_expr(ctx, inner, current_trait);
            ctx.types.intern(TyKind::Ref {
                inner,
                mutable: *mutable,
                lifetime: *lifetime,
            })
        }
        TypeExprKind::Ptr { inner, mutable } => {
            let inner = lower_type_expr(ctx, inner, current_trait);
            ctx.types.intern(TyKind::Ptr {
                inner,
                mutable: *mutable,
            })
        }
        TypeExprKind::Array { elem, size } => {
            let elem = lower_type_expr(ctx, elem, current_trait);
            match eval_const_expr(ctx, size, IntTy::I64) {
                Ok(ConstValue::Int(n)) if n < 0 => {
                    ctx.diag
                        .build_error(
                            DiagnosticCode::CONST_NEGATIVE_SIZE,
                            size.span,
                            format!("array size is negative: {n}"),
                        )
                        .emit(&ctx.diag);
                    ctx.taint(ty.id);
                    ctx.types.common.error
                }
                Ok(ConstValue::Bool(_)) => {
                    ctx.diag
                        .build_error(
                            DiagnosticCode::TYPE_MISMATCH,
                            size.span,
                            "array size must be an integer",
                        )
                        .emit(&ctx.diag);
                    ctx.taint(ty.id);
                    ctx.types.common.error
                }
                Ok(size) => ctx.types.intern(TyKind::Array(elem, size)),
                Err(err) => {
                    report_const_error(ctx, &err, size.span);
                    ctx.taint(ty.id);
                    ctx.types.common.error
                }
            }
        }
        TypeExprKind::Slice(elem) => {
            let elem = lower_type_expr(ctx, elem, current_trait);
            ctx.types.intern(TyKind::Slice(elem))
        }
        TypeExprKind::Tuple(elems) => {
            let elems: Vec<TyId> = elems
                .iter()
                .map(|e| lower_type_expr(ctx, e, current_trait))
                .collect();
            ctx.types.intern(TyKind::Tuple(elems))
        }
        TypeExprKind::Fn {
            params,
            ret,
            extern_abi,
        } => {
            let params: Vec<TyId> = params
                .iter()
                .map(|p| lower_type_expr(ctx, p, current_trait))
                .collect();
            let ret = lower_type_expr(ctx, ret, current_trait);
            ctx.types.intern(TyKind::Fn {
                params,
                ret,
                extern_abi: *extern_abi,
            })
        }
        TypeExprKind::SelfType => ctx.types.intern(TyKind::SelfType),
        TypeExprKind::Assoc { trait_name, name } => {
            let trait_def = match trait_name {
                Some(_) => ctx.node_def(ty.id),
                None => current_trait,
            };
            match trait_def {
                Some(trait_def) => ctx.types.intern(TyKind::Assoc {
                    trait_def,
                    name: name.name,
                }),
                None => {
                    // `Self::Name` outside a trait or a failed trait lookup
                    ctx.taint(ty.id);
                    ctx.types.common.error
                }
            }
        }
    }
}

fn lower_primitive(ctx: &mut Context<'_>, name: Symbol) -> Option<TyId> {
    let ty = match name.as_str() {
        "i8" => ctx.types.intern(TyKind::Int(IntTy::I8)),
        "i16" => ctx.types.intern(TyKind::Int(IntTy::I16)),
        "i32" => ctx.types.common.i32_,
        "i64" => ctx.types.common.i64_,
        "u8" => ctx.types.intern(TyKind::Int(IntTy::U8)),
        "u16" => ctx.types.intern(TyKind::Int(IntTy::U16)),
        "u32" => ctx.types.intern(TyKind::Int(IntTy::U32)),
        "u64" => ctx.types.intern(TyKind::Int(IntTy::U64)),
        "f32" => ctx.types.intern(TyKind::Float(crate::ty::FloatTy::F32)),
        "f64" => ctx.types.common.f64_,
        "bool" => ctx.types.common.bool_,
        "char" => ctx.types.common.char_,
        "void" => ctx.types.common.void,
        "none" => ctx.types.common.none,
        "string" => ctx.types.common.str_,
        _ => return None,
    };
    Some(ty)
}

fn eval_const_arg(ctx: &mut Context<'_>, expr: &Expr, width: IntTy) -> ConstValue {
    match eval_const_expr(ctx, expr, width) {
        Ok(value) => value,
        Err(err) => {
            report_const_error(ctx, &err, expr.span);
            ctx.taint(expr.id);
            ConstValue::Int(0)
        }
    }
}

fn report_const_error(ctx: &Context<'_>, err: &ConstEvalError, span: Span) {
    let code = match err {
        ConstEvalError::DivisionByZero => DiagnosticCode::CONST_DIV_ZERO,
        ConstEvalError::Overflow(_) => DiagnosticCode::CONST_OVERFLOW,
        _ => DiagnosticCode::NOT_CONST,
    };
    ctx.diag.build_error(code, span, err.to_string()).emit(&ctx.diag);
}

// ============================================================================
// PHASE 1 - SIGNATURES
// ============================================================================

fn collect_signatures(ctx: &mut Context<'_>, items: &[Item]) {
    // Nominal types, traits, consts, and free functions first
    for item in items {
        match item {
            Item::Struct(s) => {
                let Some(def) = ctx.node_def(s.id) else { continue };
                let mut fields = indexmap::IndexMap::new();
                for field in &s.fields {
                    let ty = lower_type_expr(ctx, &field.ty, None);
                    if fields.insert(field.name.name, ty).is_some() {
                        ctx.diag
                            .build_error(
                                DiagnosticCode::DUPLICATE_DEFINITION,
                                field.span,
                                format!("duplicate field `{}`", field.name.name),
                            )
                            .emit(&ctx.diag);
                    }
                }
                if let SymbolKind::Struct(data) = &mut ctx.symbols.symbol_mut(def).kind {
                    data.fields = fields;
                }
            }
            Item::Enum(e) => {
                let Some(def) = ctx.node_def(e.id) else { continue };
                let mut variants = indexmap::IndexMap::new();
                for variant in &e.variants {
                    let fields = variant.fields.as_ref().map(|fs| {
                        fs.iter()
                            .map(|f| lower_type_expr(ctx, f, None))
                            .collect::<Vec<_>>()
                    });
                    if variants.insert(variant.name.name, fields).is_some() {
                        ctx.diag
                            .build_error(
                                DiagnosticCode::DUPLICATE_DEFINITION,
                                variant.span,
                                format!("duplicate variant `{}`", variant.name.name),
                            )
                            .emit(&ctx.diag);
                    }
                }
                if let SymbolKind::Enum(data) = &mut ctx.symbols.symbol_mut(def).kind {
                    data.variants = variants;
                }
            }
            Item::Trait(t) => {
                let Some(def) = ctx.node_def(t.id) else { continue };
                let mut methods = indexmap::IndexMap::new();
                for sig in &t.methods {
                    let params: Vec<TyId> = sig
                        .params
                        .iter()
                        .map(|p| lower_type_expr(ctx, &p.ty, Some(def)))
                        .collect();
                    let ret = sig
                        .ret_type
                        .as_ref()
                        .map(|r| lower_type_expr(ctx, r, Some(def)))
                        .unwrap_or(ctx.types.common.void);
                    let (params, ret) = apply_elision(&mut ctx.types, params, ret);
                    methods.insert(
                        sig.name.name,
                        FnSigData {
                            self_param: sig.self_param,
                            param_names: sig.params.iter().map(|p| p.name.name).collect(),
                            params,
                            ret,
                            ..Default::default()
                        },
                    );
                }
                if let SymbolKind::Trait(data) = &mut ctx.symbols.symbol_mut(def).kind {
                    data.methods = methods;
                }
            }
            Item::Const(c) => {
                let Some(def) = ctx.node_def(c.id) else { continue };
                let ty = lower_type_expr(ctx, &c.ty, None);
                let width = match ctx.types.kind(ty) {
                    TyKind::Int(w) => *w,
                    _ => IntTy::I64,
                };
                let value = match eval_const_expr(ctx, &c.value, width) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        report_const_error(ctx, &err, c.value.span);
                        None
                    }
                };
                ctx.def_types.insert(def, ty);
                if let SymbolKind::Const { ty: slot, value: vslot } =
                    &mut ctx.symbols.symbol_mut(def).kind
                {
                    *slot = ty;
                    *vslot = value;
                }
            }
            Item::Fn(func) => lower_fn_sig(ctx, func, None),
            _ => {}
        }
    }

    // Impls second: they reference the nominals and traits lowered above
    for item in items {
        let Item::Impl(imp) = item else { continue };
        let Some(&impl_id) = ctx.impl_map.get(&imp.id) else {
            continue;
        };
        let self_ty = lower_type_expr(ctx, &imp.self_ty, None);
        ctx.symbols.impls[impl_id].self_ty = Some(self_ty);
        let trait_def = ctx.symbols.impls[impl_id].trait_def;

        for binding in &imp.assoc_types {
            let bound = lower_type_expr(ctx, &binding.ty, trait_def);
            ctx.symbols.impls[impl_id]
                .assoc_bindings
                .insert(binding.name.name, bound);
        }

        for method in &imp.methods {
            lower_fn_sig(ctx, method, trait_def);
        }

        if let Some(trait_def) = trait_def {
            compare_trait_impl(ctx, imp, impl_id, trait_def, self_ty);
        }
    }
}

pub(crate) fn lower_fn_sig(ctx: &mut Context<'_>, func: &FnItem, current_trait: Option<DefId>) {
    let Some(def) = ctx.node_def(func.id) else {
        return;
    };
    let params: Vec<TyId> = func
        .params
        .iter()
        .map(|p| lower_type_expr(ctx, &p.ty, current_trait))
        .collect();
    let ret = func
        .ret_type
        .as_ref()
        .map(|r| lower_type_expr(ctx, r, current_trait))
        .unwrap_or(ctx.types.common.void);
    let (params, ret) = apply_elision(&mut ctx.types, params, ret);

    // Compile-time parameter types
    let const_param_defs = match &ctx.symbols.symbol(def).kind {
        SymbolKind::Function(sig) => sig.const_params.clone(),
        _ => Vec::new(),
    };
    for (cp_def, cp_ast) in const_param_defs.iter().zip(func.const_params.iter()) {
        let cp_ty = lower_type_expr(ctx, &cp_ast.ty, current_trait);
        if let SymbolKind::ConstParam { ty } = &mut ctx.symbols.symbol_mut(*cp_def).kind {
            *ty = cp_ty;
        }
    }

    // Where-clause bounds, resolved trait names from the resolver
    let mut where_bounds = Vec::new();
    let resolved_bounds = ctx.fn_where_bounds.get(&func.id).cloned().unwrap_or_default();
    for bound in &func.where_clause {
        let bound_ty = lower_type_expr(ctx, &bound.ty, current_trait);
        let traits = resolved_bounds
            .iter()
            .find(|(id, _)| *id == bound.ty.id)
            .map(|(_, traits)| traits.clone())
            .unwrap_or_default();
        where_bounds.push((bound_ty, traits));
    }

    let fn_ty = ctx.types.intern(TyKind::Fn {
        params: params.clone(),
        ret,
        extern_abi: func.extern_abi,
    });
    ctx.def_types.insert(def, fn_ty);

    if let SymbolKind::Function(sig) = &mut ctx.symbols.symbol_mut(def).kind {
        sig.self_param = func.self_param;
        sig.param_names = func.params.iter().map(|p| p.name.name).collect();
        sig.params = params;
        sig.ret = ret;
        sig.where_bounds = where_bounds;
        sig.is_extern = func.is_extern;
    }
}

/// Compare a trait impl's method signatures against the trait's, after
/// substituting `Self` and the impl's associated-type bindings
fn compare_trait_impl(
    ctx: &mut Context<'_>,
    imp: &pyritec_ast::ImplItem,
    impl_id: crate::symbols::ImplId,
    trait_def: DefId,
    self_ty: TyId,
) {
    let trait_methods: Vec<(Symbol, FnSigData)> = match &ctx.symbols.symbol(trait_def).kind {
        SymbolKind::Trait(t) => t
            .methods
            .iter()
            .map(|(name, sig)| (*name, sig.clone()))
            .collect(),
        _ => return,
    };
    let empty = FxHashMap::default();
    for (name, trait_sig) in trait_methods {
        let Some(&impl_fn) = ctx.symbols.impls[impl_id].methods.get(&name) else {
            continue; // already reported by the linking pass
        };
        let impl_sig = match &ctx.symbols.symbol(impl_fn).kind {
            SymbolKind::Function(sig) => sig.clone(),
            _ => continue,
        };
        let method_span = imp
            .methods
            .iter()
            .find(|m| m.name.name == name)
            .map(|m| m.span)
            .unwrap_or(imp.span);

        if trait_sig.params.len() != impl_sig.params.len() {
            ctx.diag
                .build_error(
                    DiagnosticCode::TYPE_MISMATCH,
                    method_span,
                    format!(
                        "method `{}` has {} parameters but the trait declares {}",
                        name,
                        impl_sig.params.len(),
                        trait_sig.params.len()
                    ),
                )
                .emit(&ctx.diag);
            continue;
        }
        let pairs: Vec<(TyId, TyId)> = trait_sig
            .params
            .iter()
            .zip(impl_sig.params.iter())
            .map(|(t, i)| (*t, *i))
            .chain(std::iter::once((trait_sig.ret, impl_sig.ret)))
            .collect();
        for (trait_side, impl_side) in pairs {
            let expected = substitute(
                &mut ctx.types,
                &ctx.symbols,
                trait_side,
                Some(self_ty),
                &empty,
            );
            let found = substitute(
                &mut ctx.types,
                &ctx.symbols,
                impl_side,
                Some(self_ty),
                &empty,
            );
            if expected != found
                && !matches!(ctx.types.kind(expected), TyKind::Error)
                && !matches!(ctx.types.kind(found), TyKind::Error)
            {
                let expected_str = ctx.types.display(expected, &ctx.symbols);
                let found_str = ctx.types.display(found, &ctx.symbols);
                ctx.diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        method_span,
                        format!(
                            "method `{}` is incompatible with trait `{}`: expected `{}`, found `{}`",
                            name,
                            ctx.symbols.symbol(trait_def).name,
                            expected_str,
                            found_str
                        ),
                    )
                    .emit(&ctx.diag);
                break;
            }
        }
    }
}

// ============================================================================
// PHASE 2 - FUNCTION BODIES
// ============================================================================

/// Check one function body
pub(crate) fn check_fn_body(ctx: &mut Context<'_>, func: &FnItem, self_ty: Option<TyId>) {
    let Some(def) = ctx.node_def(func.id) else {
        return;
    };
    let Some(body) = &func.body else {
        return;
    };
    let sig = match &ctx.symbols.symbol(def).kind {
        SymbolKind::Function(sig) => sig.clone(),
        _ => return,
    };

    let mut ck = BodyChecker {
        ctx,
        infcx: InferCtxt::new(),
        ret_ty: sig.ret,
        self_ty,
        written_nodes: Vec::new(),
        written_defs: Vec::new(),
    };

    // Bind parameters
    for (param, ty) in func.params.iter().zip(sig.params.iter()) {
        if let Some(pdef) = ck.ctx.node_def(param.id) {
            ck.write_def(pdef, *ty);
        }
    }
    // Bind the receiver
    if let (Some(kind), Some(self_ty)) = (sig.self_param, self_ty) {
        if let Some(&fn_scope) = ck.ctx.fn_scopes.get(&func.id) {
            if let Some(self_def) = ck.ctx.symbols.lookup_in(
                fn_scope,
                crate::symbols::Namespace::Value,
                sym::SELF_LOWER,
            ) {
                let ty = match kind {
                    SelfKind::Value => self_ty,
                    SelfKind::Ref => ck.ctx.types.mk_ref(self_ty, false),
                    SelfKind::RefMut => ck.ctx.types.mk_ref(self_ty, true),
                };
                ck.write_def(self_def, ty);
            }
        }
    }

    ck.check_block(body);
    ck.finish();
}

struct BodyChecker<'c, 'a> {
    ctx: &'c mut Context<'a>,
    infcx: InferCtxt,
    ret_ty: TyId,
    self_ty: Option<TyId>,
    written_nodes: Vec<NodeId>,
    written_defs: Vec<DefId>,
}

impl BodyChecker<'_, '_> {
    /// Default leftover literals, then resolve everything written
    fn finish(mut self) {
        self.infcx.default_literals(&self.ctx.types);
        for node in std::mem::take(&mut self.written_nodes) {
            if let Some(ty) = self.ctx.node_type(node) {
                let resolved = self.infcx.resolve(&mut self.ctx.types, ty);
                self.ctx.set_node_type(node, resolved);
            }
        }
        for def in std::mem::take(&mut self.written_defs) {
            if let Some(&ty) = self.ctx.def_types.get(&def) {
                let resolved = self.infcx.resolve(&mut self.ctx.types, ty);
                self.ctx.def_types.insert(def, resolved);
            }
        }
    }

    fn write(&mut self, node: NodeId, ty: TyId) -> TyId {
        self.ctx.set_node_type(node, ty);
        self.written_nodes.push(node);
        ty
    }

    fn write_def(&mut self, def: DefId, ty: TyId) {
        self.ctx.def_types.insert(def, ty);
        self.written_defs.push(def);
    }

    fn error_ty(&self) -> TyId {
        self.ctx.types.common.error
    }

    fn fresh(&mut self, class: VarClass) -> TyId {
        self.infcx.new_var(&mut self.ctx.types, class)
    }

    fn display(&mut self, ty: TyId) -> String {
        let resolved = self.infcx.resolve(&mut self.ctx.types, ty);
        self.ctx.types.display(resolved, &self.ctx.symbols)
    }

    fn unify_or_report(&mut self, expected: TyId, actual: TyId, span: Span) -> bool {
        match self.infcx.unify(&mut self.ctx.types, expected, actual) {
            Ok(()) => true,
            Err(UnifyError::Mismatch) => {
                let expected_str = self.display(expected);
                let found_str = self.display(actual);
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        span,
                        format!("mismatched types: expected `{expected_str}`, found `{found_str}`"),
                    )
                    .suggest_fixes()
                    .emit(&self.ctx.diag);
                false
            }
            Err(UnifyError::Occurs) => {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        span,
                        "cannot construct an infinite type",
                    )
                    .emit(&self.ctx.diag);
                false
            }
        }
    }

    fn resolved_kind(&mut self, ty: TyId) -> TyKind {
        let shallow = self.infcx.shallow_resolve(&self.ctx.types, ty);
        self.ctx.types.kind(shallow).clone()
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn check_block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.check_stmt(stmt);
        }
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Let(let_stmt) => {
                let declared = let_stmt
                    .ty
                    .as_ref()
                    .map(|t| lower_type_expr(self.ctx, t, None));
                let init_ty = let_stmt.init.as_ref().map(|e| self.check_expr(e));
                let var_ty = match (declared, init_ty) {
                    (Some(decl), Some(init)) => {
                        let span = let_stmt.init.as_ref().map(|e| e.span).unwrap_or(stmt.span);
                        self.unify_or_report(decl, init, span);
                        decl
                    }
                    (Some(decl), None) => decl,
                    (None, Some(init)) => init,
                    (None, None) => self.fresh(VarClass::General),
                };
                if let Some(def) = self.ctx.node_def(stmt.id) {
                    self.write_def(def, var_ty);
                }
            }
            StmtKind::Expr(expr) => {
                self.check_expr(expr);
            }
            StmtKind::While(w) => {
                let cond = self.check_expr(&w.cond);
                let bool_ = self.ctx.types.common.bool_;
                self.unify_or_report(bool_, cond, w.cond.span);
                self.check_block(&w.body);
            }
            StmtKind::For(f) => {
                let elem_ty = self.check_for_iter(&f.iter);
                if let Some(def) = self.ctx.node_def(stmt.id) {
                    self.write_def(def, elem_ty);
                }
                self.check_block(&f.body);
            }
            StmtKind::With(w) => {
                // Normally removed by desugaring; checked defensively
                self.check_expr(&w.init);
                self.check_block(&w.body);
            }
            StmtKind::Defer(d) => self.check_block(&d.body),
            StmtKind::Unsafe(b) => self.check_block(b),
        }
    }

    /// The element type a `for` loop variable takes from its iterable
    fn check_for_iter(&mut self, iter: &Expr) -> TyId {
        if let ExprKind::Range(range) = &iter.kind {
            let lo = self.check_expr(&range.lo);
            let hi = self.check_expr(&range.hi);
            self.unify_or_report(lo, hi, iter.span);
            self.write(iter.id, lo);
            return lo;
        }
        let iter_ty = self.check_expr(iter);
        match self.resolved_kind(iter_ty) {
            TyKind::Array(elem, _) | TyKind::Slice(elem) => elem,
            TyKind::Generic { base, ty_args, .. }
                if self.ctx.symbols.symbol(base).name == sym::LIST
                    || self.ctx.symbols.symbol(base).name == sym::SET =>
            {
                ty_args.first().copied().unwrap_or_else(|| self.error_ty())
            }
            TyKind::Error => self.error_ty(),
            _ => {
                let found = self.display(iter_ty);
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        iter.span,
                        format!("`{found}` is not iterable"),
                    )
                    .emit(&self.ctx.diag);
                self.error_ty()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn check_expr(&mut self, expr: &Expr) -> TyId {
        let ty = match &expr.kind {
            ExprKind::Literal(lit) => self.literal_ty(lit),
            ExprKind::Path(_) => self.check_path(expr),
            ExprKind::Binary(bin) => {
                let lhs = self.check_expr(&bin.lhs);
                let rhs = self.check_expr(&bin.rhs);
                if bin.op.is_logical() {
                    let bool_ = self.ctx.types.common.bool_;
                    self.unify_or_report(bool_, lhs, bin.lhs.span);
                    self.unify_or_report(bool_, rhs, bin.rhs.span);
                    bool_
                } else {
                    self.unify_or_report(lhs, rhs, expr.span);
                    if bin.op.is_comparison() {
                        self.ctx.types.common.bool_
                    } else {
                        self.check_arith_operand(lhs, bin.op, expr.span);
                        lhs
                    }
                }
            }
            ExprKind::Unary(unary) => {
                let operand = self.check_expr(&unary.operand);
                match unary.op {
                    pyritec_ast::UnOp::Neg => {
                        self.check_arith_operand(operand, pyritec_ast::BinOp::Sub, expr.span);
                        operand
                    }
                    pyritec_ast::UnOp::Not => {
                        let bool_ = self.ctx.types.common.bool_;
                        self.unify_or_report(bool_, operand, unary.operand.span);
                        bool_
                    }
                    pyritec_ast::UnOp::Deref => match self.resolved_kind(operand) {
                        TyKind::Ref { inner, .. } | TyKind::Ptr { inner, .. } => inner,
                        TyKind::Error => self.error_ty(),
                        _ => {
                            let found = self.display(operand);
                            self.ctx
                                .diag
                                .build_error(
                                    DiagnosticCode::TYPE_MISMATCH,
                                    expr.span,
                                    format!("cannot dereference `{found}`"),
                                )
                                .emit(&self.ctx.diag);
                            self.error_ty()
                        }
                    },
                }
            }
            ExprKind::Reference(r) => {
                let inner = self.check_expr(&r.operand);
                self.ctx.types.intern(TyKind::Ref {
                    inner,
                    mutable: r.mutable,
                    lifetime: None,
                })
            }
            ExprKind::Call(call) => return self.check_call(expr, call),
            ExprKind::MethodCall(call) => return self.check_method_call(expr, call),
            ExprKind::FieldAccess(access) => {
                let obj = self.check_expr(&access.object);
                self.field_type(obj, access.field.name, access.field.span)
            }
            ExprKind::Index(index) => {
                let obj = self.check_expr(&index.object);
                let idx = self.check_expr(&index.index);
                let i64_ = self.ctx.types.common.i64_;
                self.unify_or_report(i64_, idx, index.index.span);
                match self.resolved_kind(obj) {
                    TyKind::Array(elem, _) | TyKind::Slice(elem) => elem,
                    TyKind::Generic { base, ty_args, .. }
                        if self.ctx.symbols.symbol(base).name == sym::LIST =>
                    {
                        ty_args.first().copied().unwrap_or_else(|| self.error_ty())
                    }
                    TyKind::Error => self.error_ty(),
                    _ => {
                        let found = self.display(obj);
                        self.ctx
                            .diag
                            .build_error(
                                DiagnosticCode::TYPE_MISMATCH,
                                expr.span,
                                format!("`{found}` cannot be indexed"),
                            )
                            .emit(&self.ctx.diag);
                        self.error_ty()
                    }
                }
            }
            ExprKind::Block(b) => {
                // A block in expression position yields its trailing
                // expression statement's value
                self.check_block(b);
                match b.stmts.last() {
                    Some(Stmt {
                        kind: StmtKind::Expr(tail),
                        ..
                    }) => self
                        .ctx
                        .node_type(tail.id)
                        .unwrap_or(self.ctx.types.common.void),
                    _ => self.ctx.types.common.void,
                }
            }
            ExprKind::If(if_expr) => {
                let cond = self.check_expr(&if_expr.cond);
                let bool_ = self.ctx.types.common.bool_;
                self.unify_or_report(bool_, cond, if_expr.cond.span);
                self.check_block(&if_expr.then_block);
                if let Some(else_branch) = &if_expr.else_branch {
                    self.check_expr(else_branch);
                }
                self.ctx.types.common.void
            }
            ExprKind::Match(m) => {
                let scrutinee = self.check_expr(&m.scrutinee);
                for arm in &m.arms {
                    self.check_pattern(&arm.pattern, scrutinee);
                    if let Some(guard) = &arm.guard {
                        let g = self.check_expr(guard);
                        let bool_ = self.ctx.types.common.bool_;
                        self.unify_or_report(bool_, g, guard.span);
                    }
                    self.check_block(&arm.body);
                }
                self.ctx.types.common.void
            }
            ExprKind::Closure(c) => {
                let params: Vec<TyId> = c
                    .params
                    .iter()
                    .map(|p| match &p.ty {
                        Some(t) => lower_type_expr(self.ctx, t, None),
                        None => self.fresh(VarClass::General),
                    })
                    .collect();
                for (param, ty) in c.params.iter().zip(params.iter()) {
                    if let Some(def) = self.ctx.node_def(param.id) {
                        self.write_def(def, *ty);
                    }
                }
                let ret = self.check_expr(&c.body);
                self.ctx.types.mk_fn(params, ret)
            }
            ExprKind::Assign(assign) => {
                let place = self.check_expr(&assign.place);
                let value = self.check_expr(&assign.value);
                self.unify_or_report(place, value, assign.value.span);
                self.ctx.types.common.void
            }
            ExprKind::CompoundAssign(assign) => {
                let place = self.check_expr(&assign.place);
                let value = self.check_expr(&assign.value);
                self.unify_or_report(place, value, assign.value.span);
                self.check_arith_operand(place, assign.op, expr.span);
                self.ctx.types.common.void
            }
            ExprKind::Try(inner) => return self.check_try(expr, inner),
            ExprKind::Return(inner) => {
                let ret_ty = self.ret_ty;
                match inner {
                    Some(value) => {
                        let value_ty = self.check_expr(value);
                        self.unify_or_report(ret_ty, value_ty, value.span);
                    }
                    None => {
                        let void = self.ctx.types.common.void;
                        self.unify_or_report(ret_ty, void, expr.span);
                    }
                }
                self.ctx.types.common.void
            }
            ExprKind::Break | ExprKind::Continue => self.ctx.types.common.void,
            ExprKind::Tuple(elems) => {
                let tys: Vec<TyId> = elems.iter().map(|e| self.check_expr(e)).collect();
                self.ctx.types.intern(TyKind::Tuple(tys))
            }
            ExprKind::Array(elems) => {
                let elem_ty = self.fresh(VarClass::General);
                for e in elems {
                    let t = self.check_expr(e);
                    self.unify_or_report(elem_ty, t, e.span);
                }
                self.ctx
                    .types
                    .intern(TyKind::Array(elem_ty, ConstValue::Int(elems.len() as i64)))
            }
            ExprKind::Range(range) => {
                let lo = self.check_expr(&range.lo);
                let hi = self.check_expr(&range.hi);
                self.unify_or_report(lo, hi, expr.span);
                lo
            }
            ExprKind::Cast(cast) => {
                self.check_expr(&cast.expr);
                lower_type_expr(self.ctx, &cast.ty, None)
            }
            ExprKind::StructLiteral(_) => return self.check_struct_literal(expr),
            ExprKind::EnumVariant(_) => return self.check_enum_variant(expr),
        };
        self.write(expr.id, ty)
    }

    fn literal_ty(&mut self, lit: &Literal) -> TyId {
        match lit {
            Literal::Int(_) => self.fresh(VarClass::IntLit),
            Literal::Float(_) => self.fresh(VarClass::FloatLit),
            Literal::String(_) => self.ctx.types.common.str_,
            Literal::Char(_) => self.ctx.types.common.char_,
            Literal::Bool(_) => self.ctx.types.common.bool_,
            Literal::Unit => self.ctx.types.common.void,
        }
    }

    fn check_arith_operand(&mut self, ty: TyId, op: pyritec_ast::BinOp, span: Span) {
        let ok = match self.resolved_kind(ty) {
            TyKind::Int(_) | TyKind::Float(_) | TyKind::Var(_) | TyKind::Error => true,
            // String concatenation
            TyKind::Str => op == pyritec_ast::BinOp::Add,
            _ => false,
        };
        if !ok {
            let found = self.display(ty);
            self.ctx
                .diag
                .build_error(
                    DiagnosticCode::TYPE_MISMATCH,
                    span,
                    format!("arithmetic requires numeric operands, found `{found}`"),
                )
                .emit(&self.ctx.diag);
        }
    }

    fn check_path(&mut self, expr: &Expr) -> TyId {
        let Some(def) = self.ctx.node_def(expr.id) else {
            return self.error_ty();
        };
        match &self.ctx.symbols.symbol(def).kind {
            SymbolKind::Value { .. } => self
                .ctx
                .def_types
                .get(&def)
                .copied()
                .unwrap_or_else(|| self.error_ty()),
            SymbolKind::Function(_) => self
                .ctx
                .def_types
                .get(&def)
                .copied()
                .unwrap_or_else(|| self.error_ty()),
            SymbolKind::Const { ty, .. } => *ty,
            SymbolKind::ConstParam { ty } => *ty,
            // A type name in value position is only meaningful as a static
            // method receiver; `check_method_call` intercepts that case.
            SymbolKind::Struct(_)
            | SymbolKind::Enum(_)
            | SymbolKind::Trait(_)
            | SymbolKind::Opaque
            | SymbolKind::TypeParam { .. }
            | SymbolKind::Module { .. } => {
                let name = self.ctx.symbols.symbol(def).name;
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        expr.span,
                        format!("`{name}` is a type, not a value"),
                    )
                    .emit(&self.ctx.diag);
                self.error_ty()
            }
        }
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    fn check_call(&mut self, expr: &Expr, call: &CallExpr) -> TyId {
        // Known function symbol?
        if let ExprKind::Path(_) = &call.callee.kind {
            if let Some(def) = self.ctx.node_def(call.callee.id) {
                if let SymbolKind::Function(sig) = &self.ctx.symbols.symbol(def).kind {
                    let sig = sig.clone();
                    let fn_ty = self
                        .ctx
                        .def_types
                        .get(&def)
                        .copied()
                        .unwrap_or_else(|| self.error_ty());
                    self.write(call.callee.id, fn_ty);
                    return self.check_known_call(expr, def, sig, call);
                }
            }
        }

        // Otherwise the callee is a first-class function value
        let callee_ty = self.check_expr(&call.callee);
        match self.resolved_kind(callee_ty) {
            TyKind::Fn { params, ret, .. } => {
                if call.args.len() != params.len() {
                    self.wrong_arg_count(expr.span, params.len(), call.args.len());
                } else {
                    for (param, arg) in params.iter().zip(call.args.iter()) {
                        let arg_ty = self.check_expr(arg);
                        self.unify_or_report(*param, arg_ty, arg.span);
                    }
                }
                self.write(expr.id, ret)
            }
            TyKind::Error => {
                for arg in &call.args {
                    self.check_expr(arg);
                }
                self.write(expr.id, self.error_ty())
            }
            _ => {
                let found = self.display(callee_ty);
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        call.callee.span,
                        format!("`{found}` is not callable"),
                    )
                    .emit(&self.ctx.diag);
                self.write(expr.id, self.error_ty())
            }
        }
    }

    fn is_builtin(&self, def: DefId, sig: &FnSigData) -> bool {
        if !sig.is_extern || !sig.params.is_empty() || !sig.generics.is_empty() {
            return false;
        }
        matches!(
            self.ctx.symbols.symbol(def).name.as_str(),
            "print" | "println" | "drop"
        )
    }

    fn check_known_call(
        &mut self,
        expr: &Expr,
        def: DefId,
        sig: FnSigData,
        call: &CallExpr,
    ) -> TyId {
        // Variadic-ish builtins accept anything
        if self.is_builtin(def, &sig) {
            for arg in &call.args {
                self.check_expr(arg);
            }
            let void = self.ctx.types.common.void;
            return self.write(expr.id, void);
        }

        // Generic arguments: explicit or fresh
        let param_map = self.instantiate_generics(&sig.generics, &call.ty_args, expr.span);

        // Compile-time arguments
        let mut const_vals: Vec<ConstValue> = Vec::new();
        if call.const_args.len() != sig.const_params.len() {
            self.ctx
                .diag
                .build_error(
                    DiagnosticCode::WRONG_ARG_COUNT,
                    expr.span,
                    format!(
                        "expected {} compile-time arguments, found {}",
                        sig.const_params.len(),
                        call.const_args.len()
                    ),
                )
                .emit(&self.ctx.diag);
        } else {
            for (cp_def, arg) in sig.const_params.iter().zip(call.const_args.iter()) {
                let cp_ty = match &self.ctx.symbols.symbol(*cp_def).kind {
                    SymbolKind::ConstParam { ty } => *ty,
                    _ => self.error_ty(),
                };
                if matches!(self.ctx.types.kind(cp_ty), TyKind::Fn { .. }) {
                    // Parameter closure: type-checked here, inlined later
                    let expected =
                        substitute(&mut self.ctx.types, &self.ctx.symbols, cp_ty, None, &param_map);
                    let arg_ty = self.check_expr(arg);
                    self.unify_or_report(expected, arg_ty, arg.span);
                } else {
                    let width = match self.ctx.types.kind(cp_ty) {
                        TyKind::Int(w) => *w,
                        _ => IntTy::I64,
                    };
                    const_vals.push(eval_const_arg(self.ctx, arg, width));
                }
            }
        }

        // Value arguments
        if call.args.len() != sig.params.len() {
            self.wrong_arg_count(expr.span, sig.params.len(), call.args.len());
            for arg in &call.args {
                self.check_expr(arg);
            }
        } else {
            for (param, arg) in sig.params.iter().zip(call.args.iter()) {
                let expected =
                    substitute(&mut self.ctx.types, &self.ctx.symbols, *param, None, &param_map);
                let arg_ty = self.check_expr(arg);
                self.unify_or_report(expected, arg_ty, arg.span);
            }
        }

        self.check_bounds(&sig, &param_map, expr.span);
        self.record_mono(def, &param_map, &sig.generics, const_vals, expr.span);

        let ret = substitute(&mut self.ctx.types, &self.ctx.symbols, sig.ret, None, &param_map);
        self.write(expr.id, ret)
    }

    fn instantiate_generics(
        &mut self,
        generics: &[DefId],
        ty_args: &[TypeExpr],
        span: Span,
    ) -> FxHashMap<DefId, TyId> {
        let mut map = FxHashMap::default();
        if generics.is_empty() {
            return map;
        }
        if !ty_args.is_empty() && ty_args.len() != generics.len() {
            self.ctx
                .diag
                .build_error(
                    DiagnosticCode::WRONG_ARG_COUNT,
                    span,
                    format!(
                        "expected {} type arguments, found {}",
                        generics.len(),
                        ty_args.len()
                    ),
                )
                .emit(&self.ctx.diag);
        }
        for (i, &gdef) in generics.iter().enumerate() {
            let ty = match ty_args.get(i) {
                Some(arg) => lower_type_expr(self.ctx, arg, None),
                None => self.fresh(VarClass::General),
            };
            map.insert(gdef, ty);
        }
        map
    }

    /// Check `where` bounds and inline generic-parameter bounds at a call
    fn check_bounds(&mut self, sig: &FnSigData, param_map: &FxHashMap<DefId, TyId>, span: Span) {
        for &gdef in &sig.generics {
            let bounds = match &self.ctx.symbols.symbol(gdef).kind {
                SymbolKind::TypeParam { bounds } => bounds.clone(),
                _ => continue,
            };
            let Some(&assigned) = param_map.get(&gdef) else {
                continue;
            };
            let resolved = self.infcx.resolve(&mut self.ctx.types, assigned);
            self.check_bound_list(resolved, &bounds, span);
        }
        for (bound_ty, traits) in &sig.where_bounds {
            let concrete =
                substitute(&mut self.ctx.types, &self.ctx.symbols, *bound_ty, None, param_map);
            let resolved = self.infcx.resolve(&mut self.ctx.types, concrete);
            self.check_bound_list(resolved, traits, span);
        }
    }

    fn check_bound_list(&mut self, ty: TyId, traits: &[DefId], span: Span) {
        if self.infcx.is_unsolved_var(&self.ctx.types, ty) {
            return;
        }
        for &trait_def in traits {
            if !type_implements(&self.ctx.symbols, &self.ctx.types, ty, trait_def) {
                let ty_str = self.display(ty);
                let trait_name = self.ctx.symbols.symbol(trait_def).name;
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::UNSATISFIED_BOUND,
                        span,
                        format!("`{ty_str}` does not satisfy the bound `{trait_name}`"),
                    )
                    .emit(&self.ctx.diag);
            }
        }
    }

    fn record_mono(
        &mut self,
        target: DefId,
        param_map: &FxHashMap<DefId, TyId>,
        generics: &[DefId],
        const_vals: Vec<ConstValue>,
        span: Span,
    ) {
        if generics.is_empty() && const_vals.is_empty() {
            return;
        }
        let ty_args: Vec<TyId> = generics
            .iter()
            .map(|g| {
                let assigned = param_map.get(g).copied().unwrap_or_else(|| self.error_ty());
                self.infcx.resolve(&mut self.ctx.types, assigned)
            })
            .collect();
        let name = self.ctx.symbols.symbol(target).name;
        self.ctx.mono.record(
            target,
            name,
            ty_args,
            const_vals,
            span,
            &self.ctx.types,
            &self.ctx.symbols,
        );
    }

    fn wrong_arg_count(&mut self, span: Span, expected: usize, found: usize) {
        self.ctx
            .diag
            .build_error(
                DiagnosticCode::WRONG_ARG_COUNT,
                span,
                format!("expected {expected} arguments, found {found}"),
            )
            .emit(&self.ctx.diag);
    }

    fn check_method_call(&mut self, expr: &Expr, call: &MethodCallExpr) -> TyId {
        // Static call on a type name: `List.new()`
        if let ExprKind::Path(_) = &call.receiver.kind {
            if let Some(def) = self.ctx.node_def(call.receiver.id) {
                let is_type = matches!(
                    self.ctx.symbols.symbol(def).kind,
                    SymbolKind::Struct(_) | SymbolKind::Enum(_) | SymbolKind::Opaque
                );
                if is_type {
                    let err = self.error_ty();
                    self.write(call.receiver.id, err);
                    return self.check_static_method(expr, def, call);
                }
            }
        }

        let recv_ty = self.check_expr(&call.receiver);
        if matches!(self.resolved_kind(recv_ty), TyKind::Error) {
            for arg in &call.args {
                self.check_expr(arg);
            }
            return self.write(expr.id, self.error_ty());
        }
        let recv_resolved = self.infcx.resolve(&mut self.ctx.types, recv_ty);

        match lookup_method(
            &self.ctx.symbols,
            &self.ctx.types,
            recv_resolved,
            call.method.name,
        ) {
            MethodLookup::Inherent { fn_def, .. } | MethodLookup::FromTrait { fn_def, .. } => {
                // Later passes need the resolved callee (receiver mode, inlining)
                self.ctx.set_node_def(expr.id, fn_def);
                self.check_resolved_method(expr, fn_def, recv_resolved, call)
            }
            MethodLookup::Ambiguous { traits } => {
                let names: Vec<&str> = traits
                    .iter()
                    .map(|t| self.ctx.symbols.symbol(*t).name.as_str())
                    .collect();
                let recv_str = self.display(recv_resolved);
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::AMBIGUOUS_METHOD,
                        call.method.span,
                        format!(
                            "method `{}` on `{}` is supplied by multiple traits: {}",
                            call.method.name,
                            recv_str,
                            names.join(", ")
                        ),
                    )
                    .help(format!(
                        "qualify the call, e.g. `<{} as {}>::{}`",
                        recv_str, names[0], call.method.name
                    ))
                    .emit(&self.ctx.diag);
                for arg in &call.args {
                    self.check_expr(arg);
                }
                self.write(expr.id, self.error_ty())
            }
            MethodLookup::NotFound => {
                for arg in &call.args {
                    self.check_expr(arg);
                }
                // A synthesized `with` close() call stays silent here; the
                // close obligation owns that diagnostic and reports at the
                // `with` form
                let is_with_close = self
                    .ctx
                    .close_obligations
                    .iter()
                    .any(|ob| ob.close_call == expr.id);
                if !is_with_close {
                    let recv_str = self.display(recv_resolved);
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::NO_SUCH_METHOD,
                            call.method.span,
                            format!("no method `{}` found for `{}`", call.method.name, recv_str),
                        )
                        .emit(&self.ctx.diag);
                }
                self.write(expr.id, self.error_ty())
            }
        }
    }

    fn check_static_method(&mut self, expr: &Expr, type_def: DefId, call: &MethodCallExpr) -> TyId {
        // Find the method across the type's impls
        let mut found: Option<DefId> = None;
        for &impl_id in self.ctx.symbols.impls_for(type_def) {
            if let Some(&fn_def) = self.ctx.symbols.impls[impl_id].methods.get(&call.method.name) {
                found = Some(fn_def);
                break;
            }
        }
        if let Some(fn_def) = found {
            self.ctx.set_node_def(expr.id, fn_def);
        }
        let Some(fn_def) = found else {
            for arg in &call.args {
                self.check_expr(arg);
            }
            let type_name = self.ctx.symbols.symbol(type_def).name;
            self.ctx
                .diag
                .build_error(
                    DiagnosticCode::NO_SUCH_METHOD,
                    call.method.span,
                    format!("no method `{}` on type `{}`", call.method.name, type_name),
                )
                .emit(&self.ctx.diag);
            return self.write(expr.id, self.error_ty());
        };

        // The receiver type: the type's generics instantiate from ty_args
        let type_generics = match &self.ctx.symbols.symbol(type_def).kind {
            SymbolKind::Struct(s) => s.generics.clone(),
            SymbolKind::Enum(e) => e.generics.clone(),
            _ => Vec::new(),
        };
        let param_map = self.instantiate_generics(&type_generics, &call.ty_args, expr.span);
        let self_ty = if type_generics.is_empty() {
            self.ctx.types.intern(TyKind::Adt(type_def))
        } else {
            let ty_args: Vec<TyId> = type_generics
                .iter()
                .map(|g| param_map[g])
                .collect();
            self.ctx.types.intern(TyKind::Generic {
                base: type_def,
                ty_args,
                const_args: Vec::new(),
            })
        };

        let sig = match &self.ctx.symbols.symbol(fn_def).kind {
            SymbolKind::Function(sig) => sig.clone(),
            _ => return self.write(expr.id, self.error_ty()),
        };
        if call.args.len() != sig.params.len() {
            self.wrong_arg_count(expr.span, sig.params.len(), call.args.len());
            for arg in &call.args {
                self.check_expr(arg);
            }
        } else {
            for (param, arg) in sig.params.iter().zip(call.args.iter()) {
                let expected = substitute(
                    &mut self.ctx.types,
                    &self.ctx.symbols,
                    *param,
                    Some(self_ty),
                    &param_map,
                );
                let arg_ty = self.check_expr(arg);
                self.unify_or_report(expected, arg_ty, arg.span);
            }
        }
        if !type_generics.is_empty() {
            self.record_mono(type_def, &param_map, &type_generics, Vec::new(), expr.span);
        }
        let ret = substitute(
            &mut self.ctx.types,
            &self.ctx.symbols,
            sig.ret,
            Some(self_ty),
            &param_map,
        );
        self.write(expr.id, ret)
    }

    fn check_resolved_method(
        &mut self,
        expr: &Expr,
        fn_def: DefId,
        recv_ty: TyId,
        call: &MethodCallExpr,
    ) -> TyId {
        let sig = match &self.ctx.symbols.symbol(fn_def).kind {
            SymbolKind::Function(sig) => sig.clone(),
            _ => return self.write(expr.id, self.error_ty()),
        };

        // One-step auto-ref/deref: strip a reference to find the value type
        let (self_value_ty, recv_is_shared_ref) = match self.ctx.types.kind(recv_ty) {
            TyKind::Ref { inner, mutable, .. } => (*inner, !*mutable),
            _ => (recv_ty, false),
        };
        if sig.self_param == Some(SelfKind::RefMut) && recv_is_shared_ref {
            let recv_str = self.display(recv_ty);
            self.ctx
                .diag
                .build_error(
                    DiagnosticCode::TYPE_MISMATCH,
                    call.receiver.span,
                    format!(
                        "method `{}` needs an exclusive borrow, but the receiver is `{recv_str}`",
                        call.method.name
                    ),
                )
                .emit(&self.ctx.diag);
        }

        // The receiver's generic arguments flow into the signature
        let mut param_map = FxHashMap::default();
        if let TyKind::Generic { base, ty_args, .. } = self.ctx.types.kind(self_value_ty).clone() {
            let type_generics = match &self.ctx.symbols.symbol(base).kind {
                SymbolKind::Struct(s) => s.generics.clone(),
                SymbolKind::Enum(e) => e.generics.clone(),
                _ => Vec::new(),
            };
            for (gdef, arg) in type_generics.iter().zip(ty_args.iter()) {
                param_map.insert(*gdef, *arg);
            }
        }
        // Method's own generics
        let method_map = self.instantiate_generics(&sig.generics, &call.ty_args, expr.span);
        param_map.extend(method_map);

        if call.args.len() != sig.params.len() {
            self.wrong_arg_count(expr.span, sig.params.len(), call.args.len());
            for arg in &call.args {
                self.check_expr(arg);
            }
        } else {
            for (param, arg) in sig.params.iter().zip(call.args.iter()) {
                let expected = substitute(
                    &mut self.ctx.types,
                    &self.ctx.symbols,
                    *param,
                    Some(self_value_ty),
                    &param_map,
                );
                let arg_ty = self.check_expr(arg);
                self.unify_or_report(expected, arg_ty, arg.span);
            }
        }

        self.check_bounds(&sig, &param_map, expr.span);
        if matches!(self.ctx.types.kind(self_value_ty), TyKind::Generic { .. })
            || !sig.generics.is_empty()
        {
            let generics: Vec<DefId> = param_map.keys().copied().collect();
            let mut ordered = generics;
            ordered.sort();
            self.record_mono(fn_def, &param_map, &ordered, Vec::new(), expr.span);
        }

        let ret = substitute(
            &mut self.ctx.types,
            &self.ctx.symbols,
            sig.ret,
            Some(self_value_ty),
            &param_map,
        );
        self.write(expr.id, ret)
    }

    // ------------------------------------------------------------------------
    // try
    // ------------------------------------------------------------------------

    fn check_try(&mut self, expr: &Expr, inner: &Expr) -> TyId {
        let inner_ty = self.check_expr(inner);
        let resolved = self.infcx.resolve(&mut self.ctx.types, inner_ty);
        match self.ctx.types.kind(resolved).clone() {
            TyKind::Error => self.write(expr.id, self.error_ty()),
            TyKind::Generic { base, ty_args, .. }
                if self.ctx.symbols.symbol(base).name == sym::RESULT && ty_args.len() == 2 =>
            {
                let ok_ty = ty_args[0];
                let err_ty = ty_args[1];
                // The enclosing function must return a Result with the same
                // error type
                let ret = self.infcx.resolve(&mut self.ctx.types, self.ret_ty);
                match self.ctx.types.kind(ret).clone() {
                    TyKind::Generic {
                        base: ret_base,
                        ty_args: ret_args,
                        ..
                    } if self.ctx.symbols.symbol(ret_base).name == sym::RESULT
                        && ret_args.len() == 2 =>
                    {
                        if self
                            .infcx
                            .unify(&mut self.ctx.types, ret_args[1], err_ty)
                            .is_err()
                        {
                            let expected = self.display(ret_args[1]);
                            let found = self.display(err_ty);
                            self.ctx
                                .diag
                                .build_error(
                                    DiagnosticCode::TRY_BAD_RETURN,
                                    expr.span,
                                    format!(
                                        "`try` error type `{found}` does not match the \
                                         function's error type `{expected}`"
                                    ),
                                )
                                .emit(&self.ctx.diag);
                        }
                    }
                    TyKind::Error => {}
                    // In a void function the error aborts outward; only a
                    // non-void, non-Result return type rejects `try`
                    TyKind::Void => {}
                    _ => {
                        self.ctx
                            .diag
                            .build_error(
                                DiagnosticCode::TRY_BAD_RETURN,
                                expr.span,
                                "`try` requires the enclosing function to return `Result`",
                            )
                            .emit(&self.ctx.diag);
                    }
                }
                self.write(expr.id, ok_ty)
            }
            _ => {
                let found = self.display(resolved);
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TRY_NOT_RESULT,
                        expr.span,
                        format!("`try` applied to `{found}`, which is not a `Result`"),
                    )
                    .emit(&self.ctx.diag);
                self.write(expr.id, self.error_ty())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Aggregates
    // ------------------------------------------------------------------------

    fn field_type(&mut self, obj_ty: TyId, field: Symbol, span: Span) -> TyId {
        let stripped = match self.resolved_kind(obj_ty) {
            TyKind::Ref { inner, .. } => inner,
            _ => self.infcx.shallow_resolve(&self.ctx.types, obj_ty),
        };
        match self.ctx.types.kind(stripped).clone() {
            TyKind::Error => self.error_ty(),
            TyKind::Adt(def) => {
                let field_ty = match &self.ctx.symbols.symbol(def).kind {
                    SymbolKind::Struct(s) => s.fields.get(&field).copied(),
                    _ => None,
                };
                match field_ty {
                    Some(ty) => ty,
                    None => self.no_such_field(def, field, span),
                }
            }
            TyKind::Generic { base, ty_args, .. } => {
                let (field_ty, generics) = match &self.ctx.symbols.symbol(base).kind {
                    SymbolKind::Struct(s) => (s.fields.get(&field).copied(), s.generics.clone()),
                    _ => (None, Vec::new()),
                };
                match field_ty {
                    Some(ty) => {
                        let mut map = FxHashMap::default();
                        for (g, a) in generics.iter().zip(ty_args.iter()) {
                            map.insert(*g, *a);
                        }
                        substitute(&mut self.ctx.types, &self.ctx.symbols, ty, Some(stripped), &map)
                    }
                    None => self.no_such_field(base, field, span),
                }
            }
            _ => {
                let found = self.display(obj_ty);
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::NO_SUCH_FIELD,
                        span,
                        format!("`{found}` has no fields"),
                    )
                    .emit(&self.ctx.diag);
                self.error_ty()
            }
        }
    }

    fn no_such_field(&self, def: DefId, field: Symbol, span: Span) -> TyId {
        let type_name = self.ctx.symbols.symbol(def).name;
        self.ctx
            .diag
            .build_error(
                DiagnosticCode::NO_SUCH_FIELD,
                span,
                format!("no field `{field}` on `{type_name}`"),
            )
            .var_name(field)
            .emit(&self.ctx.diag);
        self.error_ty()
    }

    fn check_struct_literal(&mut self, expr: &Expr) -> TyId {
        let ExprKind::StructLiteral(lit) = &expr.kind else {
            return self.write(expr.id, self.error_ty());
        };
        let Some(def) = self.ctx.node_def(expr.id) else {
            return self.write(expr.id, self.error_ty());
        };
        let (fields, generics) = match &self.ctx.symbols.symbol(def).kind {
            SymbolKind::Struct(s) => (s.fields.clone(), s.generics.clone()),
            _ => {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        expr.span,
                        format!("`{}` is not a struct", lit.name.name),
                    )
                    .emit(&self.ctx.diag);
                return self.write(expr.id, self.error_ty());
            }
        };

        let param_map = self.instantiate_generics(&generics, &lit.ty_args, expr.span);
        for (field_name, value) in &lit.fields {
            match fields.get(&field_name.name) {
                Some(&field_ty) => {
                    let expected = substitute(
                        &mut self.ctx.types,
                        &self.ctx.symbols,
                        field_ty,
                        None,
                        &param_map,
                    );
                    let value_ty = self.check_expr(value);
                    self.unify_or_report(expected, value_ty, value.span);
                }
                None => {
                    self.no_such_field(def, field_name.name, field_name.span);
                    self.check_expr(value);
                }
            }
        }
        for field_name in fields.keys() {
            if !lit.fields.iter().any(|(n, _)| n.name == *field_name) {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::NO_SUCH_FIELD,
                        expr.span,
                        format!("missing field `{field_name}` in `{}` literal", lit.name.name),
                    )
                    .var_name(*field_name)
                    .emit(&self.ctx.diag);
            }
        }

        let ty = if generics.is_empty() {
            self.ctx.types.intern(TyKind::Adt(def))
        } else {
            let ty_args: Vec<TyId> = generics
                .iter()
                .map(|g| {
                    let assigned = param_map[g];
                    self.infcx.resolve(&mut self.ctx.types, assigned)
                })
                .collect();
            self.record_mono(def, &param_map, &generics, Vec::new(), expr.span);
            self.ctx.types.intern(TyKind::Generic {
                base: def,
                ty_args,
                const_args: Vec::new(),
            })
        };
        self.write(expr.id, ty)
    }

    fn check_enum_variant(&mut self, expr: &Expr) -> TyId {
        let ExprKind::EnumVariant(variant) = &expr.kind else {
            return self.write(expr.id, self.error_ty());
        };
        let Some(def) = self.ctx.node_def(expr.id) else {
            for arg in &variant.args {
                self.check_expr(arg);
            }
            return self.write(expr.id, self.error_ty());
        };
        let (variants, generics) = match &self.ctx.symbols.symbol(def).kind {
            SymbolKind::Enum(e) => (e.variants.clone(), e.generics.clone()),
            _ => {
                self.ctx
                    .diag
                    .build_error(
                        DiagnosticCode::TYPE_MISMATCH,
                        expr.span,
                        format!("`{}` is not an enum", variant.enum_name.name),
                    )
                    .emit(&self.ctx.diag);
                return self.write(expr.id, self.error_ty());
            }
        };

        let Some(field_tys) = variants.get(&variant.variant.name) else {
            self.ctx
                .diag
                .build_error(
                    DiagnosticCode::NO_SUCH_FIELD,
                    variant.variant.span,
                    format!(
                        "no variant `{}` on enum `{}`",
                        variant.variant.name, variant.enum_name.name
                    ),
                )
                .emit(&self.ctx.diag);
            for arg in &variant.args {
                self.check_expr(arg);
            }
            return self.write(expr.id, self.error_ty());
        };
        let field_tys = field_tys.clone().unwrap_or_default();

        let param_map = self.instantiate_generics(&generics, &variant.ty_args, expr.span);
        if variant.args.len() != field_tys.len() {
            self.wrong_arg_count(expr.span, field_tys.len(), variant.args.len());
            for arg in &variant.args {
                self.check_expr(arg);
            }
        } else {
            for (field_ty, arg) in field_tys.iter().zip(variant.args.iter()) {
                let expected = substitute(
                    &mut self.ctx.types,
                    &self.ctx.symbols,
                    *field_ty,
                    None,
                    &param_map,
                );
                let arg_ty = self.check_expr(arg);
                self.unify_or_report(expected, arg_ty, arg.span);
            }
        }

        let ty = if generics.is_empty() {
            self.ctx.types.intern(TyKind::Adt(def))
        } else {
            let ty_args: Vec<TyId> = generics
                .iter()
                .map(|g| {
                    let assigned = param_map[g];
                    self.infcx.resolve(&mut self.ctx.types, assigned)
                })
                .collect();
            self.record_mono(def, &param_map, &generics, Vec::new(), expr.span);
            self.ctx.types.intern(TyKind::Generic {
                base: def,
                ty_args,
                const_args: Vec::new(),
            })
        };
        self.write(expr.id, ty)
    }

    // ------------------------------------------------------------------------
    // Patterns
    // ------------------------------------------------------------------------

    fn check_pattern(&mut self, pattern: &Pattern, expected: TyId) {
        match &pattern.kind {
            PatternKind::Wildcard => {}
            PatternKind::Binding { .. } => {
                if let Some(def) = self.ctx.node_def(pattern.id) {
                    self.write_def(def, expected);
                }
            }
            PatternKind::Literal(lit) => {
                let lit_ty = self.literal_ty(lit);
                self.unify_or_report(expected, lit_ty, pattern.span);
            }
            PatternKind::Tuple(pats) => match self.resolved_kind(expected) {
                TyKind::Tuple(elems) if elems.len() == pats.len() => {
                    for (pat, elem) in pats.iter().zip(elems.iter()) {
                        self.check_pattern(pat, *elem);
                    }
                }
                TyKind::Error => {
                    for pat in pats {
                        let err = self.error_ty();
                        self.check_pattern(pat, err);
                    }
                }
                _ => {
                    let found = self.display(expected);
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::TYPE_MISMATCH,
                            pattern.span,
                            format!("tuple pattern cannot match `{found}`"),
                        )
                        .emit(&self.ctx.diag);
                }
            },
            PatternKind::Struct { fields, .. } => {
                for (field_name, pat) in fields {
                    let field_ty = self.field_type(expected, field_name.name, field_name.span);
                    self.check_pattern(pat, field_ty);
                }
            }
            PatternKind::EnumVariant {
                variant, fields, ..
            } => {
                let Some(def) = self.ctx.node_def(pattern.id) else {
                    for pat in fields {
                        let err = self.error_ty();
                        self.check_pattern(pat, err);
                    }
                    return;
                };
                // The scrutinee must be this enum
                let enum_matches = match self.resolved_kind(expected) {
                    TyKind::Adt(base) | TyKind::Generic { base, .. } => base == def,
                    TyKind::Error => true,
                    _ => false,
                };
                if !enum_matches {
                    let found = self.display(expected);
                    self.ctx
                        .diag
                        .build_error(
                            DiagnosticCode::TYPE_MISMATCH,
                            pattern.span,
                            format!("pattern expects an enum, scrutinee is `{found}`"),
                        )
                        .emit(&self.ctx.diag);
                }
                let (variants, generics) = match &self.ctx.symbols.symbol(def).kind {
                    SymbolKind::Enum(e) => (e.variants.clone(), e.generics.clone()),
                    _ => return,
                };
                let field_tys = variants
                    .get(&variant.name)
                    .cloned()
                    .flatten()
                    .unwrap_or_default();
                let mut param_map = FxHashMap::default();
                if let TyKind::Generic { ty_args, .. } = self.resolved_kind(expected) {
                    for (g, a) in generics.iter().zip(ty_args.iter()) {
                        param_map.insert(*g, *a);
                    }
                }
                for (pat, field_ty) in fields.iter().zip(field_tys.iter()) {
                    let concrete = substitute(
                        &mut self.ctx.types,
                        &self.ctx.symbols,
                        *field_ty,
                        None,
                        &param_map,
                    );
                    self.check_pattern(pat, concrete);
                }
                self.write(pattern.id, expected);
            }
        }
        if !matches!(pattern.kind, PatternKind::EnumVariant { .. }) {
            self.write(pattern.id, expected);
        }
    }
}

// ============================================================================
// CLOSE OBLIGATIONS (from `with` desugaring)
// ============================================================================

fn check_close_obligations(ctx: &mut Context<'_>) {
    let obligations = std::mem::take(&mut ctx.close_obligations);
    for ob in obligations {
        let ty = ob
            .binding_def
            .and_then(|def| ctx.def_types.get(&def).copied())
            .or_else(|| ctx.node_type(ob.init_node));
        let Some(ty) = ty else { continue };
        if matches!(ctx.types.kind(ty), TyKind::Error) {
            continue;
        }
        let has_close = matches!(
            lookup_method(&ctx.symbols, &ctx.types, ty, sym::CLOSE),
            MethodLookup::Inherent { .. } | MethodLookup::FromTrait { .. }
        );
        if !has_close {
            let ty_str = ctx.types.display(ty, &ctx.symbols);
            ctx.diag
                .build_error(
                    DiagnosticCode::NOT_CLOSEABLE,
                    ob.with_span,
                    format!("`{ty_str}` does not implement `Closeable`"),
                )
                .note("`with` requires a `close(&mut self)` method on the initializer's type")
                .var_name(ob.var)
                .emit(&ctx.diag);
            ctx.taint(ob.close_call);
        }
    }
}
