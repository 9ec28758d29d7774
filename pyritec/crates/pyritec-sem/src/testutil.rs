//! Test helpers: a compact builder for syntax trees.
//!
//! The external parser normally produces the tree; tests construct it
//! directly. The builder hands out fresh node ids and distinct spans (one
//! source line per created node) so diagnostics order deterministically and
//! span assertions stay meaningful.

use crate::{analyze_unit, AnalysisOutput, FeatureFlags};
use pyritec_ast::*;
use pyritec_util::{Span, Symbol};

pub(crate) struct B {
    pub ids: NodeIdAllocator,
    line: u32,
}

impl B {
    pub fn new() -> Self {
        Self::with_ids(NodeIdAllocator::new())
    }

    /// Build with a specific allocator; module fixtures use a disjoint range
    pub fn with_ids(ids: NodeIdAllocator) -> Self {
        Self { ids, line: 0 }
    }

    pub fn sp(&mut self) -> Span {
        self.line += 1;
        Span::new(self.line * 10, self.line * 10 + 5, self.line, 1)
    }

    fn id(&mut self) -> NodeId {
        self.ids.fresh()
    }

    pub fn ident(&mut self, name: &str) -> Ident {
        let span = self.sp();
        Ident::new(Symbol::intern(name), span)
    }

    fn expr(&mut self, kind: ExprKind) -> Expr {
        Expr {
            id: self.id(),
            span: self.sp(),
            kind,
        }
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    pub fn int(&mut self, n: i64) -> Expr {
        self.expr(ExprKind::Literal(Literal::Int(n)))
    }

    pub fn string(&mut self, s: &str) -> Expr {
        let sym = Symbol::intern(s);
        self.expr(ExprKind::Literal(Literal::String(sym)))
    }

    pub fn boolean(&mut self, b: bool) -> Expr {
        self.expr(ExprKind::Literal(Literal::Bool(b)))
    }

    pub fn var(&mut self, name: &str) -> Expr {
        let ident = self.ident(name);
        self.expr(ExprKind::Path(Path::ident(ident)))
    }

    pub fn bin(&mut self, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(ExprKind::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }))
    }

    pub fn call(&mut self, name: &str, args: Vec<Expr>) -> Expr {
        let callee = self.var(name);
        self.call_expr(callee, args)
    }

    pub fn call_expr(&mut self, callee: Expr, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call(CallExpr {
            callee: Box::new(callee),
            ty_args: Vec::new(),
            const_args: Vec::new(),
            args,
        }))
    }

    /// A two-segment path expression, `a::b`
    pub fn path2(&mut self, a: &str, b: &str) -> Expr {
        let first = self.ident(a);
        let second = self.ident(b);
        self.expr(ExprKind::Path(Path {
            span: first.span,
            segments: vec![first, second],
        }))
    }

    pub fn call_generic(&mut self, name: &str, ty_args: Vec<TypeExpr>, args: Vec<Expr>) -> Expr {
        let callee = self.var(name);
        self.expr(ExprKind::Call(CallExpr {
            callee: Box::new(callee),
            ty_args,
            const_args: Vec::new(),
            args,
        }))
    }

    pub fn call_ct(&mut self, name: &str, const_args: Vec<Expr>, args: Vec<Expr>) -> Expr {
        let callee = self.var(name);
        self.expr(ExprKind::Call(CallExpr {
            callee: Box::new(callee),
            ty_args: Vec::new(),
            const_args,
            args,
        }))
    }

    pub fn method(&mut self, receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
        let method = self.ident(name);
        self.expr(ExprKind::MethodCall(MethodCallExpr {
            receiver: Box::new(receiver),
            method,
            ty_args: Vec::new(),
            args,
        }))
    }

    pub fn field(&mut self, object: Expr, name: &str) -> Expr {
        let field = self.ident(name);
        self.expr(ExprKind::FieldAccess(FieldAccessExpr {
            object: Box::new(object),
            field,
        }))
    }

    pub fn reference(&mut self, operand: Expr, mutable: bool) -> Expr {
        self.expr(ExprKind::Reference(ReferenceExpr {
            mutable,
            operand: Box::new(operand),
        }))
    }

    pub fn try_(&mut self, inner: Expr) -> Expr {
        self.expr(ExprKind::Try(Box::new(inner)))
    }

    pub fn ret(&mut self, value: Option<Expr>) -> Expr {
        self.expr(ExprKind::Return(value.map(Box::new)))
    }

    pub fn closure(&mut self, params: &[&str], body: Expr, is_move: bool) -> Expr {
        let params = params
            .iter()
            .map(|p| {
                let name = self.ident(p);
                ClosureParam {
                    id: self.id(),
                    name,
                    ty: None,
                }
            })
            .collect();
        self.expr(ExprKind::Closure(ClosureExpr {
            params,
            body: Box::new(body),
            is_move,
        }))
    }

    pub fn variant(&mut self, enum_name: &str, variant: &str, args: Vec<Expr>) -> Expr {
        let enum_name = self.ident(enum_name);
        let variant = self.ident(variant);
        self.expr(ExprKind::EnumVariant(EnumVariantExpr {
            enum_name,
            variant,
            ty_args: Vec::new(),
            args,
        }))
    }

    pub fn struct_lit(&mut self, name: &str, fields: Vec<(&str, Expr)>) -> Expr {
        let name = self.ident(name);
        let fields = fields
            .into_iter()
            .map(|(n, e)| (self.ident(n), e))
            .collect();
        self.expr(ExprKind::StructLiteral(StructLiteralExpr {
            name,
            ty_args: Vec::new(),
            fields,
        }))
    }

    pub fn assign(&mut self, place: Expr, value: Expr) -> Expr {
        self.expr(ExprKind::Assign(AssignExpr {
            place: Box::new(place),
            value: Box::new(value),
        }))
    }

    // ------------------------------------------------------------------------
    // Statements and blocks
    // ------------------------------------------------------------------------

    fn stmt_of(&mut self, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.id(),
            span: self.sp(),
            kind,
        }
    }

    pub fn let_(&mut self, name: &str, init: Expr) -> Stmt {
        let name = self.ident(name);
        self.stmt_of(StmtKind::Let(LetStmt {
            name,
            mutable: false,
            ty: None,
            init: Some(init),
        }))
    }

    pub fn let_mut(&mut self, name: &str, init: Expr) -> Stmt {
        let name = self.ident(name);
        self.stmt_of(StmtKind::Let(LetStmt {
            name,
            mutable: true,
            ty: None,
            init: Some(init),
        }))
    }

    pub fn let_ty(&mut self, name: &str, ty: TypeExpr, init: Expr) -> Stmt {
        let name = self.ident(name);
        self.stmt_of(StmtKind::Let(LetStmt {
            name,
            mutable: false,
            ty: Some(ty),
            init: Some(init),
        }))
    }

    pub fn stmt(&mut self, expr: Expr) -> Stmt {
        self.stmt_of(StmtKind::Expr(expr))
    }

    pub fn defer_stmt(&mut self, stmts: Vec<Stmt>) -> Stmt {
        let body = self.block(stmts);
        self.stmt_of(StmtKind::Defer(DeferStmt { body }))
    }

    pub fn with_stmt(&mut self, name: &str, init: Expr, body: Vec<Stmt>) -> Stmt {
        let name = self.ident(name);
        let body = self.block(body);
        self.stmt_of(StmtKind::With(WithStmt { name, init, body }))
    }

    pub fn while_stmt(&mut self, cond: Expr, body: Vec<Stmt>) -> Stmt {
        let body = self.block(body);
        self.stmt_of(StmtKind::While(WhileStmt { cond, body }))
    }

    pub fn if_stmt(&mut self, cond: Expr, then: Vec<Stmt>, else_: Option<Vec<Stmt>>) -> Stmt {
        let then_block = self.block(then);
        let else_branch = else_.map(|stmts| {
            let block = self.block(stmts);
            Box::new(self.expr(ExprKind::Block(block)))
        });
        let if_expr = self.expr(ExprKind::If(IfExpr {
            cond: Box::new(cond),
            then_block,
            else_branch,
        }));
        self.stmt_of(StmtKind::Expr(if_expr))
    }

    pub fn block(&mut self, stmts: Vec<Stmt>) -> Block {
        Block {
            id: self.id(),
            stmts,
            span: self.sp(),
        }
    }

    // ------------------------------------------------------------------------
    // Type expressions
    // ------------------------------------------------------------------------

    pub fn ty(&mut self, name: &str) -> TypeExpr {
        let ident = self.ident(name);
        TypeExpr {
            id: self.id(),
            span: ident.span,
            kind: TypeExprKind::Named {
                path: Path::ident(ident),
                ty_args: Vec::new(),
                const_args: Vec::new(),
            },
        }
    }

    pub fn ty_args(&mut self, name: &str, ty_args: Vec<TypeExpr>) -> TypeExpr {
        let ident = self.ident(name);
        TypeExpr {
            id: self.id(),
            span: ident.span,
            kind: TypeExprKind::Named {
                path: Path::ident(ident),
                ty_args,
                const_args: Vec::new(),
            },
        }
    }

    pub fn ty_array(&mut self, elem: TypeExpr, size: Expr) -> TypeExpr {
        TypeExpr {
            id: self.id(),
            span: elem.span,
            kind: TypeExprKind::Array {
                elem: Box::new(elem),
                size: Box::new(size),
            },
        }
    }

    pub fn ty_ref(&mut self, inner: TypeExpr, mutable: bool) -> TypeExpr {
        TypeExpr {
            id: self.id(),
            span: inner.span,
            kind: TypeExprKind::Ref {
                inner: Box::new(inner),
                mutable,
                lifetime: None,
            },
        }
    }

    pub fn ty_fn(&mut self, params: Vec<TypeExpr>, ret: TypeExpr) -> TypeExpr {
        let span = self.sp();
        TypeExpr {
            id: self.id(),
            span,
            kind: TypeExprKind::Fn {
                params,
                ret: Box::new(ret),
                extern_abi: None,
            },
        }
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    pub fn func(
        &mut self,
        name: &str,
        params: Vec<(&str, TypeExpr)>,
        ret: Option<TypeExpr>,
        body: Vec<Stmt>,
    ) -> FnItem {
        let name = self.ident(name);
        let params = params
            .into_iter()
            .map(|(n, ty)| {
                let pname = self.ident(n);
                Param {
                    id: self.id(),
                    name: pname,
                    ty,
                    mutable: false,
                }
            })
            .collect();
        let body = self.block(body);
        FnItem {
            id: self.id(),
            name,
            generics: Vec::new(),
            const_params: Vec::new(),
            self_param: None,
            params,
            ret_type: ret,
            where_clause: Vec::new(),
            body: Some(body),
            is_extern: false,
            extern_abi: None,
            span: name.span,
        }
    }

    pub fn func_ct(
        &mut self,
        name: &str,
        const_params: Vec<(&str, TypeExpr)>,
        params: Vec<(&str, TypeExpr)>,
        ret: Option<TypeExpr>,
        body: Vec<Stmt>,
    ) -> FnItem {
        let mut item = self.func(name, params, ret, body);
        item.const_params = const_params
            .into_iter()
            .map(|(n, ty)| ConstParam {
                name: self.ident(n),
                ty,
            })
            .collect();
        item
    }

    pub fn generic_func(
        &mut self,
        name: &str,
        generics: &[&str],
        params: Vec<(&str, TypeExpr)>,
        ret: Option<TypeExpr>,
        body: Vec<Stmt>,
    ) -> FnItem {
        let mut item = self.func(name, params, ret, body);
        item.generics = generics
            .iter()
            .map(|g| GenericParam {
                name: self.ident(g),
                bounds: Vec::new(),
            })
            .collect();
        item
    }

    pub fn method_item(
        &mut self,
        name: &str,
        self_param: SelfKind,
        params: Vec<(&str, TypeExpr)>,
        ret: Option<TypeExpr>,
        body: Vec<Stmt>,
    ) -> FnItem {
        let mut item = self.func(name, params, ret, body);
        item.self_param = Some(self_param);
        item
    }

    pub fn strukt(&mut self, name: &str, fields: Vec<(&str, TypeExpr)>) -> Item {
        let name = self.ident(name);
        let fields = fields
            .into_iter()
            .map(|(n, ty)| {
                let fname = self.ident(n);
                Field {
                    name: fname,
                    ty,
                    span: fname.span,
                }
            })
            .collect();
        Item::Struct(StructItem {
            id: self.id(),
            name,
            generics: Vec::new(),
            const_params: Vec::new(),
            fields,
            attributes: Vec::new(),
            span: name.span,
        })
    }

    pub fn enum_generic(
        &mut self,
        name: &str,
        generics: &[&str],
        variants: Vec<(&str, Option<Vec<TypeExpr>>)>,
    ) -> Item {
        let name = self.ident(name);
        let generics = generics
            .iter()
            .map(|g| GenericParam {
                name: self.ident(g),
                bounds: Vec::new(),
            })
            .collect();
        let variants = variants
            .into_iter()
            .map(|(n, fields)| {
                let vname = self.ident(n);
                Variant {
                    name: vname,
                    fields,
                    span: vname.span,
                }
            })
            .collect();
        Item::Enum(EnumItem {
            id: self.id(),
            name,
            generics,
            variants,
            span: name.span,
        })
    }

    pub fn enum_(&mut self, name: &str, variants: Vec<(&str, Option<Vec<TypeExpr>>)>) -> Item {
        self.enum_generic(name, &[], variants)
    }

    pub fn trait_(&mut self, name: &str, methods: Vec<FnSig>, assoc_types: &[&str]) -> Item {
        let name = self.ident(name);
        let assoc_types = assoc_types.iter().map(|a| self.ident(a)).collect();
        Item::Trait(TraitItem {
            id: self.id(),
            name,
            generics: Vec::new(),
            where_clause: Vec::new(),
            methods,
            assoc_types,
            span: name.span,
        })
    }

    pub fn fn_sig(
        &mut self,
        name: &str,
        self_param: Option<SelfKind>,
        params: Vec<(&str, TypeExpr)>,
        ret: Option<TypeExpr>,
    ) -> FnSig {
        let name = self.ident(name);
        let params = params
            .into_iter()
            .map(|(n, ty)| {
                let pname = self.ident(n);
                Param {
                    id: self.id(),
                    name: pname,
                    ty,
                    mutable: false,
                }
            })
            .collect();
        FnSig {
            name,
            generics: Vec::new(),
            self_param,
            params,
            ret_type: ret,
            span: name.span,
        }
    }

    pub fn impl_(
        &mut self,
        trait_name: Option<&str>,
        self_ty: TypeExpr,
        methods: Vec<FnItem>,
        assoc_types: Vec<(&str, TypeExpr)>,
    ) -> Item {
        let trait_ref = trait_name.map(|t| {
            let ident = self.ident(t);
            Path::ident(ident)
        });
        let assoc_types = assoc_types
            .into_iter()
            .map(|(n, ty)| {
                let name = self.ident(n);
                AssocTypeBinding {
                    name,
                    ty,
                    span: name.span,
                }
            })
            .collect();
        let span = self.sp();
        Item::Impl(ImplItem {
            id: self.id(),
            generics: Vec::new(),
            trait_ref,
            self_ty,
            methods,
            assoc_types,
            span,
        })
    }

    pub fn const_item(&mut self, name: &str, ty: TypeExpr, value: Expr) -> Item {
        let name = self.ident(name);
        Item::Const(ConstItem {
            id: self.id(),
            name,
            ty,
            value,
            span: name.span,
        })
    }

    pub fn use_item(&mut self, path: &[&str]) -> Item {
        let span = self.sp();
        Item::Use(UseItem {
            id: self.id(),
            path: path.iter().map(|s| Symbol::intern(s)).collect(),
            span,
        })
    }

    // ------------------------------------------------------------------------
    // Fixtures
    // ------------------------------------------------------------------------

    /// `enum Result[T, E]: Ok(T), Err(E)`
    pub fn result_enum(&mut self) -> Item {
        let t = self.ty("T");
        let e = self.ty("E");
        self.enum_generic("Result", &["T", "E"], vec![
            ("Ok", Some(vec![t])),
            ("Err", Some(vec![e])),
        ])
    }

    /// `struct Data: name: string, id: i64`
    pub fn data_struct(&mut self) -> Item {
        let string_ty = self.ty("string");
        let id_ty = self.ty("i64");
        self.strukt("Data", vec![("name", string_ty), ("id", id_ty)])
    }

    // ------------------------------------------------------------------------
    // Running the pipeline
    // ------------------------------------------------------------------------

    pub fn run(self, items: Vec<Item>) -> AnalysisOutput {
        self.run_flags(items, FeatureFlags::default())
    }

    pub fn run_flags(self, items: Vec<Item>, flags: FeatureFlags) -> AnalysisOutput {
        analyze_unit(Program { items }, flags, None, self.ids)
    }

    pub fn run_with_loader(
        self,
        items: Vec<Item>,
        loader: &dyn crate::ModuleLoader,
    ) -> AnalysisOutput {
        analyze_unit(
            Program { items },
            FeatureFlags::default(),
            Some(loader),
            self.ids,
        )
    }
}

/// Codes of all error-level diagnostics, in order
pub(crate) fn error_codes(output: &AnalysisOutput) -> Vec<String> {
    output
        .diagnostics
        .iter()
        .filter(|d| d.level == pyritec_util::Level::Error)
        .map(|d| d.code.as_str())
        .collect()
}
