//! Cross-stage scenario tests.
//!
//! Each test drives the whole pipeline over a hand-built tree and checks the
//! observable contract: diagnostics (by stable code), annotations, the
//! monomorphization set, desugaring output, closure layouts, and the
//! determinism guarantees.

use crate::symbols::SymbolKind;
use crate::testutil::{error_codes, B};
use crate::ty::TyKind;
use crate::{FeatureFlags, ModuleError, ModuleLoader};
use pyritec_ast::{BinOp, ExprKind, Item, NodeIdAllocator, Program, SelfKind, StmtKind};
use pyritec_util::{DiagnosticCode, Symbol};

// ============================================================================
// Lifetime elision
// ============================================================================

#[test]
fn test_lifetime_elision_single_reference_input() {
    let mut b = B::new();
    let s_ref = b.ty("string");
    let s_ref = b.ty_ref(s_ref, false);
    let ret_ref = b.ty("string");
    let ret_ref = b.ty_ref(ret_ref, false);
    let value = b.var("s");
    let ret = b.ret(Some(value));
    let ret = b.stmt(ret);
    let func = b.func("first", vec![("s", s_ref)], Some(ret_ref), vec![ret]);
    let func_id = func.id;

    let out = b.run(vec![Item::Fn(func)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);

    let def = out.def_of(func_id).unwrap();
    let sig = match &out.symbols.symbol(def).kind {
        SymbolKind::Function(sig) => sig.clone(),
        other => panic!("expected a function, got {other:?}"),
    };
    let label = Symbol::intern("a");
    assert!(matches!(
        out.types.kind(sig.params[0]),
        TyKind::Ref { lifetime: Some(l), .. } if *l == label
    ));
    assert!(matches!(
        out.types.kind(sig.ret),
        TyKind::Ref { lifetime: Some(l), .. } if *l == label
    ));
    // Same label, same structure: one interned type
    assert_eq!(sig.params[0], sig.ret);
}

#[test]
fn test_lifetime_elision_skipped_with_two_reference_inputs() {
    let mut b = B::new();
    let p1 = b.ty("string");
    let p1 = b.ty_ref(p1, false);
    let p2 = b.ty("string");
    let p2 = b.ty_ref(p2, false);
    let ret_ty = b.ty("string");
    let ret_ty = b.ty_ref(ret_ty, false);
    let value = b.var("s1");
    let ret = b.ret(Some(value));
    let ret = b.stmt(ret);
    let func = b.func("choose", vec![("s1", p1), ("s2", p2)], Some(ret_ty), vec![ret]);
    let func_id = func.id;

    let out = b.run(vec![Item::Fn(func)]);

    let def = out.def_of(func_id).unwrap();
    let sig = match &out.symbols.symbol(def).kind {
        SymbolKind::Function(sig) => sig.clone(),
        _ => unreachable!(),
    };
    assert!(matches!(out.types.kind(sig.params[0]), TyKind::Ref { lifetime: None, .. }));
    assert!(matches!(out.types.kind(sig.params[1]), TyKind::Ref { lifetime: None, .. }));
    assert!(matches!(out.types.kind(sig.ret), TyKind::Ref { lifetime: None, .. }));
}

// ============================================================================
// Partial moves
// ============================================================================

fn partial_move_prelude(b: &mut B) -> Vec<pyritec_ast::Stmt> {
    let name_value = b.string("test");
    let id_value = b.int(1);
    let lit = b.struct_lit("Data", vec![("name", name_value), ("id", id_value)]);
    let let_d = b.let_("d", lit);
    let d_name = b.var("d");
    let d_name = b.field(d_name, "name");
    let let_n = b.let_("n", d_name);
    vec![let_d, let_n]
}

#[test]
fn test_partial_move_leaves_other_fields_usable() {
    let mut b = B::new();
    let data = b.data_struct();
    let mut stmts = partial_move_prelude(&mut b);
    let d_id = b.var("d");
    let d_id = b.field(d_id, "id");
    let print = b.call("print", vec![d_id]);
    stmts.push(b.stmt(print));
    let func = b.func("test", vec![], None, stmts);

    let out = b.run(vec![data, Item::Fn(func)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
}

#[test]
fn test_use_of_already_moved_field() {
    let mut b = B::new();
    let data = b.data_struct();
    let mut stmts = partial_move_prelude(&mut b);
    let d_name = b.var("d");
    let d_name = b.field(d_name, "name");
    stmts.push(b.let_("n2", d_name));
    let func = b.func("test", vec![], None, stmts);

    let out = b.run(vec![data, Item::Fn(func)]);
    assert!(error_codes(&out).contains(&"P0235".to_owned()));
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.message.contains("already moved field 'name'")));
}

#[test]
fn test_whole_use_after_partial_move() {
    let mut b = B::new();
    let data = b.data_struct();
    let mut stmts = partial_move_prelude(&mut b);
    let d = b.var("d");
    stmts.push(b.let_("d2", d));
    let func = b.func("test", vec![], None, stmts);

    let out = b.run(vec![data, Item::Fn(func)]);
    assert!(error_codes(&out).contains(&"P0236".to_owned()));
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.message.contains("partially moved fields")));
}

// ============================================================================
// Moves and borrows
// ============================================================================

#[test]
fn test_use_after_move_carries_fix_suggestions() {
    let mut b = B::new();
    let s_ty = b.ty("string");
    let consume = b.func("consume", vec![("s", s_ty)], None, vec![]);
    let init = b.string("hello");
    let let_data = b.let_("data", init);
    let arg = b.var("data");
    let call = b.call("consume", vec![arg]);
    let consume_stmt = b.stmt(call);
    let again = b.var("data");
    let call2 = b.call("consume", vec![again]);
    let reuse = b.stmt(call2);
    let main = b.func("main", vec![], None, vec![let_data, consume_stmt, reuse]);

    let out = b.run(vec![Item::Fn(consume), Item::Fn(main)]);
    let moved = out.diagnostics_with_code(DiagnosticCode::USE_OF_MOVED);
    assert_eq!(moved.len(), 1);
    let diag = moved[0];
    assert!(diag.message.contains("cannot use moved value 'data'"));
    assert_eq!(diag.var_name, Some(Symbol::intern("data")));
    assert!(!diag.fixes.is_empty(), "P0234 should carry fix suggestions");
    assert!(diag.labels.iter().any(|l| l.message.contains("moved here")));
}

#[test]
fn test_conditionally_moved_reports_on_merged_path() {
    let mut b = B::new();
    let s_ty = b.ty("string");
    let consume = b.func("consume", vec![("s", s_ty)], None, vec![]);
    let init = b.string("hello");
    let let_data = b.let_("data", init);
    let cond = b.boolean(true);
    let arg = b.var("data");
    let call = b.call("consume", vec![arg]);
    let then_stmt = b.stmt(call);
    let branch = b.if_stmt(cond, vec![then_stmt], None);
    let again = b.var("data");
    let call2 = b.call("consume", vec![again]);
    let reuse = b.stmt(call2);
    let main = b.func("main", vec![], None, vec![let_data, branch, reuse]);

    let out = b.run(vec![Item::Fn(consume), Item::Fn(main)]);
    let moved = out.diagnostics_with_code(DiagnosticCode::USE_OF_MOVED);
    assert_eq!(moved.len(), 1);
    assert!(moved[0]
        .notes
        .iter()
        .any(|n| n.contains("only some paths")));
}

#[test]
fn test_reassignment_restores_ownership() {
    let mut b = B::new();
    let s_ty = b.ty("string");
    let consume = b.func("consume", vec![("s", s_ty)], None, vec![]);
    let init = b.string("one");
    let let_data = b.let_mut("data", init);
    let arg = b.var("data");
    let call = b.call("consume", vec![arg]);
    let move_stmt = b.stmt(call);
    let place = b.var("data");
    let fresh = b.string("two");
    let assign = b.assign(place, fresh);
    let reinit = b.stmt(assign);
    let again = b.var("data");
    let call2 = b.call("consume", vec![again]);
    let reuse = b.stmt(call2);
    let main = b.func("main", vec![], None, vec![let_data, move_stmt, reinit, reuse]);

    let out = b.run(vec![Item::Fn(consume), Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
}

#[test]
fn test_exclusive_borrow_while_shared_live() {
    let mut b = B::new();
    let init = b.string("x");
    let let_v = b.let_mut("v", init);
    let v1 = b.var("v");
    let r1_init = b.reference(v1, false);
    let let_r1 = b.let_("r1", r1_init);
    let v2 = b.var("v");
    let r2_init = b.reference(v2, true);
    let let_r2 = b.let_("r2", r2_init);
    let r1_use = b.var("r1");
    let print = b.call("print", vec![r1_use]);
    let use_stmt = b.stmt(print);
    let main = b.func("main", vec![], None, vec![let_v, let_r1, let_r2, use_stmt]);

    let out = b.run(vec![Item::Fn(main)]);
    assert!(error_codes(&out).contains(&"P0502".to_owned()));
}

#[test]
fn test_second_exclusive_borrow_rejected() {
    let mut b = B::new();
    let init = b.string("x");
    let let_v = b.let_mut("v", init);
    let v1 = b.var("v");
    let a_init = b.reference(v1, true);
    let let_a = b.let_("a", a_init);
    let v2 = b.var("v");
    let b_init = b.reference(v2, true);
    let let_b = b.let_("b", b_init);
    let a_use = b.var("a");
    let use_a = b.stmt(a_use);
    let main = b.func("main", vec![], None, vec![let_v, let_a, let_b, use_a]);

    let out = b.run(vec![Item::Fn(main)]);
    assert!(error_codes(&out).contains(&"P0499".to_owned()));
}

#[test]
fn test_owner_use_while_mutably_borrowed() {
    let mut b = B::new();
    let init = b.string("x");
    let let_v = b.let_mut("v", init);
    let v1 = b.var("v");
    let r_init = b.reference(v1, true);
    let let_r = b.let_("r", r_init);
    let v_use = b.var("v");
    let print = b.call("print", vec![v_use]);
    let owner_use = b.stmt(print);
    let r_use = b.var("r");
    let keep_live = b.stmt(r_use);
    let main = b.func("main", vec![], None, vec![let_v, let_r, owner_use, keep_live]);

    let out = b.run(vec![Item::Fn(main)]);
    assert!(error_codes(&out).contains(&"P0503".to_owned()));
}

#[test]
fn test_disjoint_field_borrows_coexist() {
    let mut b = B::new();
    let data = b.data_struct();
    let name_value = b.string("n");
    let id_value = b.int(1);
    let lit = b.struct_lit("Data", vec![("name", name_value), ("id", id_value)]);
    let let_d = b.let_mut("d", lit);
    let d1 = b.var("d");
    let d1 = b.field(d1, "name");
    let ra_init = b.reference(d1, true);
    let let_ra = b.let_("ra", ra_init);
    let d2 = b.var("d");
    let d2 = b.field(d2, "id");
    let rb_init = b.reference(d2, true);
    let let_rb = b.let_("rb", rb_init);
    let ra = b.var("ra");
    let rb = b.var("rb");
    let use_both = b.call("print", vec![ra, rb]);
    let use_stmt = b.stmt(use_both);
    let main = b.func("main", vec![], None, vec![let_d, let_ra, let_rb, use_stmt]);

    let out = b.run(vec![data, Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
}

#[test]
fn test_returning_reference_to_local_rejected() {
    let mut b = B::new();
    let ret_ty = b.ty("string");
    let ret_ty = b.ty_ref(ret_ty, false);
    let init = b.string("local");
    let let_s = b.let_("s", init);
    let s = b.var("s");
    let borrowed = b.reference(s, false);
    let ret = b.ret(Some(borrowed));
    let ret_stmt = b.stmt(ret);
    let func = b.func("bad", vec![], Some(ret_ty), vec![let_s, ret_stmt]);

    let out = b.run(vec![Item::Fn(func)]);
    assert!(error_codes(&out).contains(&"P0505".to_owned()));
}

// ============================================================================
// try operator
// ============================================================================

#[test]
fn test_try_unwraps_ok_type() {
    let mut b = B::new();
    let result = b.result_enum();
    let i64_ty = b.ty("i64");
    let string_ty = b.ty("string");
    let ret_ty = b.ty_args("Result", vec![i64_ty, string_ty]);
    let payload = b.int(42);
    let ok = b.variant("Result", "Ok", vec![payload]);
    let ret = b.ret(Some(ok));
    let ret_stmt = b.stmt(ret);
    let get = b.func("get", vec![], Some(ret_ty), vec![ret_stmt]);

    let call = b.call("get", vec![]);
    let tried = b.try_(call);
    let tried_id = tried.id;
    let let_x = b.let_("x", tried);
    let main = b.func("main", vec![], None, vec![let_x]);

    let out = b.run(vec![result, Item::Fn(get), Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
    let ty = out.type_of(tried_id).unwrap();
    assert_eq!(out.types.display(ty, &out.symbols), "i64");
}

#[test]
fn test_try_on_non_result_rejected() {
    let mut b = B::new();
    let result = b.result_enum();
    let value = b.int(42);
    let tried = b.try_(value);
    let let_x = b.let_("x", tried);
    let main = b.func("main", vec![], None, vec![let_x]);

    let out = b.run(vec![result, Item::Fn(main)]);
    assert!(error_codes(&out).contains(&"P0312".to_owned()));
}

#[test]
fn test_try_error_type_must_match_enclosing_result() {
    let mut b = B::new();
    let result = b.result_enum();
    let i64_ty = b.ty("i64");
    let string_ty = b.ty("string");
    let get_ret = b.ty_args("Result", vec![i64_ty, string_ty]);
    let payload = b.int(1);
    let ok = b.variant("Result", "Ok", vec![payload]);
    let ret = b.ret(Some(ok));
    let ret_stmt = b.stmt(ret);
    let get = b.func("get", vec![], Some(get_ret), vec![ret_stmt]);

    // fn f() -> Result[i64, i64] cannot `try` a Result[_, string]
    let a = b.ty("i64");
    let e = b.ty("i64");
    let f_ret = b.ty_args("Result", vec![a, e]);
    let call = b.call("get", vec![]);
    let tried = b.try_(call);
    let let_x = b.let_("x", tried);
    let zero = b.int(0);
    let ok_ret = b.variant("Result", "Ok", vec![zero]);
    let ret2 = b.ret(Some(ok_ret));
    let ret2 = b.stmt(ret2);
    let f = b.func("f", vec![], Some(f_ret), vec![let_x, ret2]);

    let out = b.run(vec![result, Item::Fn(get), Item::Fn(f)]);
    assert!(error_codes(&out).contains(&"P0313".to_owned()));
}

// ============================================================================
// with / defer desugaring
// ============================================================================

/// `struct File` with an inherent `close(&mut self)` plus `fn open() -> File`
fn closeable_file(b: &mut B) -> Vec<Item> {
    let file = b.strukt("File", vec![]);
    let close = b.method_item("close", SelfKind::RefMut, vec![], None, vec![]);
    let self_ty = b.ty("File");
    let file_impl = b.impl_(None, self_ty, vec![close], vec![]);
    let ret_ty = b.ty("File");
    let lit = b.struct_lit("File", vec![]);
    let ret = b.ret(Some(lit));
    let ret_stmt = b.stmt(ret);
    let open = b.func("open", vec![], Some(ret_ty), vec![ret_stmt]);
    vec![file, file_impl, Item::Fn(open)]
}

#[test]
fn test_with_desugars_to_let_defer_close() {
    let mut b = B::new();
    let mut items = closeable_file(&mut b);
    let init = b.call("open", vec![]);
    let f_use = b.var("f");
    let print = b.call("print", vec![f_use]);
    let body_stmt = b.stmt(print);
    let with_stmt = b.with_stmt("f", init, vec![body_stmt]);
    let main = b.func("main", vec![], None, vec![with_stmt]);
    items.push(Item::Fn(main));

    let out = b.run(items);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);

    let Some(Item::Fn(main)) = out.program.items.last() else {
        panic!("main is last");
    };
    let stmts = &main.body.as_ref().unwrap().stmts;
    assert_eq!(stmts.len(), 3, "let + defer + body");

    let StmtKind::Let(let_stmt) = &stmts[0].kind else {
        panic!("first statement should be the synthesized let");
    };
    assert_eq!(let_stmt.name.name, Symbol::intern("f"));
    assert!(let_stmt.mutable);

    let StmtKind::Defer(defer) = &stmts[1].kind else {
        panic!("second statement should be the synthesized defer");
    };
    assert_eq!(defer.body.stmts.len(), 1);
    let StmtKind::Expr(close_call) = &defer.body.stmts[0].kind else {
        panic!("defer body should be one expression");
    };
    let ExprKind::MethodCall(call) = &close_call.kind else {
        panic!("defer body should call close()");
    };
    assert_eq!(call.method.name, Symbol::intern("close"));
    assert!(matches!(call.receiver.kind, ExprKind::Path(_)));

    // The defer got the first LIFO index in its scope
    assert_eq!(out.defer_order.get(&stmts[1].id), Some(&0));
}

#[test]
fn test_with_on_non_closeable_type_reports_at_with_form() {
    let mut b = B::new();
    let init = b.string("not closeable");
    let body = b.int(0);
    let body_stmt = b.stmt(body);
    let with_stmt = b.with_stmt("s", init, vec![body_stmt]);
    let with_span = with_stmt.span;
    let main = b.func("main", vec![], None, vec![with_stmt]);

    let out = b.run(vec![Item::Fn(main)]);
    let errors = out.diagnostics_with_code(DiagnosticCode::NOT_CLOSEABLE);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("Closeable"));
    assert_eq!(errors[0].span, with_span, "error attaches to the with form");
}

#[test]
fn test_defer_indices_increase_per_scope() {
    let mut b = B::new();
    let one = b.int(1);
    let p1 = b.call("print", vec![one]);
    let s1 = b.stmt(p1);
    let first = b.defer_stmt(vec![s1]);
    let first_id = first.id;
    let two = b.int(2);
    let p2 = b.call("print", vec![two]);
    let s2 = b.stmt(p2);
    let second = b.defer_stmt(vec![s2]);
    let second_id = second.id;
    let main = b.func("main", vec![], None, vec![first, second]);

    let out = b.run(vec![Item::Fn(main)]);
    assert_eq!(out.defer_order.get(&first_id), Some(&0));
    assert_eq!(out.defer_order.get(&second_id), Some(&1));
}

#[test]
fn test_desugar_is_idempotent() {
    use crate::context::Context;

    let mut b = B::new();
    let mut items = closeable_file(&mut b);
    let init = b.call("open", vec![]);
    let body = b.int(0);
    let body_stmt = b.stmt(body);
    let with_stmt = b.with_stmt("f", init, vec![body_stmt]);
    let main = b.func("main", vec![], None, vec![with_stmt]);
    items.push(Item::Fn(main));
    let program = Program { items };

    let mut ctx = Context::new(FeatureFlags::default(), None, b.ids);
    crate::resolve::resolve(&mut ctx, &program);
    let once = crate::desugar::desugar(&mut ctx, program);
    let rendered_once = format!("{once:?}");
    let twice = crate::desugar::desugar(&mut ctx, once);
    assert_eq!(rendered_once, format!("{twice:?}"));
}

#[test]
fn test_move_after_defer_still_needs_it() {
    let mut b = B::new();
    let s_ty = b.ty("string");
    let consume = b.func("consume", vec![("s", s_ty)], None, vec![]);
    let init = b.string("held");
    let let_data = b.let_("data", init);
    let data_in_defer = b.var("data");
    let call = b.call("consume", vec![data_in_defer]);
    let defer_body = b.stmt(call);
    let defer_stmt = b.defer_stmt(vec![defer_body]);
    let moved = b.var("data");
    let let_other = b.let_("other", moved);
    let main = b.func("main", vec![], None, vec![let_data, defer_stmt, let_other]);

    let out = b.run(vec![Item::Fn(consume), Item::Fn(main)]);
    assert!(error_codes(&out).contains(&"P0238".to_owned()));
}

// ============================================================================
// Constant evaluation in type position
// ============================================================================

#[test]
fn test_const_item_value_is_evaluated() {
    let mut b = B::new();
    let ty = b.ty("i64");
    let two = b.int(2);
    let three = b.int(3);
    let four = b.int(4);
    let product = b.bin(BinOp::Mul, three, four);
    let sum = b.bin(BinOp::Add, two, product);
    let item = b.const_item("X", ty, sum);
    let item_id = match &item {
        Item::Const(c) => c.id,
        _ => unreachable!(),
    };

    let out = b.run(vec![item]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
    let def = out.def_of(item_id).unwrap();
    match &out.symbols.symbol(def).kind {
        SymbolKind::Const { value, .. } => {
            assert_eq!(*value, Some(crate::ty::ConstValue::Int(14)));
        }
        other => panic!("expected a const, got {other:?}"),
    }
}

#[test]
fn test_negative_array_size_rejected() {
    let mut b = B::new();
    let elem = b.ty("i64");
    let two = b.int(2);
    let five = b.int(5);
    let size = b.bin(BinOp::Sub, two, five);
    let arr_ty = b.ty_array(elem, size);
    let one = b.int(1);
    let init = pyritec_ast::Expr {
        id: b.ids.fresh(),
        span: one.span,
        kind: ExprKind::Array(vec![one]),
    };
    let let_arr = b.let_ty("arr", arr_ty, init);
    let func = b.func("test", vec![], None, vec![let_arr]);

    let out = b.run(vec![Item::Fn(func)]);
    assert!(error_codes(&out).contains(&"P0321".to_owned()));
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.message.contains("negative")));
}

#[test]
fn test_division_by_zero_in_array_size() {
    let mut b = B::new();
    let elem = b.ty("i64");
    let ten = b.int(10);
    let zero = b.int(0);
    let size = b.bin(BinOp::Div, ten, zero);
    let arr_ty = b.ty_array(elem, size);
    let one = b.int(1);
    let init = pyritec_ast::Expr {
        id: b.ids.fresh(),
        span: one.span,
        kind: ExprKind::Array(vec![one]),
    };
    let let_arr = b.let_ty("arr", arr_ty, init);
    let func = b.func("test", vec![], None, vec![let_arr]);

    let out = b.run(vec![Item::Fn(func)]);
    assert!(error_codes(&out).contains(&"P0320".to_owned()));
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.message.to_lowercase().contains("division by zero")));
}

#[test]
fn test_enum_variant_construction_is_fresh_ownership() {
    let mut b = B::new();
    let kinds = b.enum_(
        "Kind",
        vec![("BoolKind", None), ("CharKind", None), ("StringKind", None)],
    );
    let ret_ty = b.ty("Kind");
    let value = b.variant("Kind", "BoolKind", vec![]);
    let ret = b.ret(Some(value));
    let ret_stmt = b.stmt(ret);
    let func = b.func("bool_kind", vec![], Some(ret_ty), vec![ret_stmt]);

    let out = b.run(vec![kinds, Item::Fn(func)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
}

// ============================================================================
// Traits and associated types
// ============================================================================

fn iterator_trait(b: &mut B) -> Item {
    let ret = b.ty("i64");
    let next = b.fn_sig("next", Some(SelfKind::Ref), vec![], Some(ret));
    b.trait_("Iter", vec![next], &["Item"])
}

#[test]
fn test_trait_impl_with_associated_type_accepted() {
    let mut b = B::new();
    let data = b.data_struct();
    let tr = iterator_trait(&mut b);
    let ret_ty = b.ty("i64");
    let one = b.int(1);
    let ret = b.ret(Some(one));
    let ret_stmt = b.stmt(ret);
    let next = b.method_item("next", SelfKind::Ref, vec![], Some(ret_ty), vec![ret_stmt]);
    let self_ty = b.ty("Data");
    let item_ty = b.ty("i64");
    let imp = b.impl_(Some("Iter"), self_ty, vec![next], vec![("Item", item_ty)]);
    let out = b.run(vec![data, tr, imp]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
}

#[test]
fn test_missing_associated_type_rejected() {
    let mut b = B::new();
    let data = b.data_struct();
    let tr = iterator_trait(&mut b);
    let ret_ty = b.ty("i64");
    let one = b.int(1);
    let ret = b.ret(Some(one));
    let ret_stmt = b.stmt(ret);
    let next = b.method_item("next", SelfKind::Ref, vec![], Some(ret_ty), vec![ret_stmt]);
    let self_ty = b.ty("Data");
    let imp = b.impl_(Some("Iter"), self_ty, vec![next], vec![]);
    let out = b.run(vec![data, tr, imp]);
    assert!(error_codes(&out).contains(&"P0403".to_owned()));
}

#[test]
fn test_undeclared_associated_type_rejected() {
    let mut b = B::new();
    let data = b.data_struct();
    let tr = iterator_trait(&mut b);
    let ret_ty = b.ty("i64");
    let one = b.int(1);
    let ret = b.ret(Some(one));
    let ret_stmt = b.stmt(ret);
    let next = b.method_item("next", SelfKind::Ref, vec![], Some(ret_ty), vec![ret_stmt]);
    let self_ty = b.ty("Data");
    let item_ty = b.ty("i64");
    let bogus_ty = b.ty("i64");
    let imp = b.impl_(
        Some("Iter"),
        self_ty,
        vec![next],
        vec![("Item", item_ty), ("Invalid", bogus_ty)],
    );
    let out = b.run(vec![data, tr, imp]);
    assert!(error_codes(&out).contains(&"P0205".to_owned()));
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.message.contains("not declared")));
}

#[test]
fn test_missing_trait_method_rejected() {
    let mut b = B::new();
    let data = b.data_struct();
    let tr = iterator_trait(&mut b);
    let self_ty = b.ty("Data");
    let item_ty = b.ty("i64");
    let imp = b.impl_(Some("Iter"), self_ty, vec![], vec![("Item", item_ty)]);
    let out = b.run(vec![data, tr, imp]);
    assert!(error_codes(&out).contains(&"P0204".to_owned()));
}

#[test]
fn test_undeclared_trait_in_impl() {
    let mut b = B::new();
    let data = b.data_struct();
    let self_ty = b.ty("Data");
    let imp = b.impl_(Some("Ghost"), self_ty, vec![], vec![]);
    let out = b.run(vec![data, imp]);
    assert!(error_codes(&out).contains(&"P0206".to_owned()));
}

#[test]
fn test_ambiguous_method_across_traits() {
    let mut b = B::new();
    let data = b.data_struct();
    let r1 = b.ty("i64");
    let sig1 = b.fn_sig("next", Some(SelfKind::Ref), vec![], Some(r1));
    let tr1 = b.trait_("Iterator", vec![sig1], &[]);
    let r2 = b.ty("i64");
    let sig2 = b.fn_sig("next", Some(SelfKind::Ref), vec![], Some(r2));
    let tr2 = b.trait_("Cursor", vec![sig2], &[]);

    let mut impls = Vec::new();
    for trait_name in ["Iterator", "Cursor"] {
        let ret_ty = b.ty("i64");
        let one = b.int(1);
        let ret = b.ret(Some(one));
        let ret_stmt = b.stmt(ret);
        let next = b.method_item("next", SelfKind::Ref, vec![], Some(ret_ty), vec![ret_stmt]);
        let self_ty = b.ty("Data");
        impls.push(b.impl_(Some(trait_name), self_ty, vec![next], vec![]));
    }

    let name_value = b.string("n");
    let id_value = b.int(1);
    let lit = b.struct_lit("Data", vec![("name", name_value), ("id", id_value)]);
    let let_d = b.let_("d", lit);
    let recv = b.var("d");
    let call = b.method(recv, "next", vec![]);
    let call_stmt = b.stmt(call);
    let main = b.func("main", vec![], None, vec![let_d, call_stmt]);

    let mut items = vec![data, tr1, tr2];
    items.extend(impls);
    items.push(Item::Fn(main));
    let out = b.run(items);
    assert!(error_codes(&out).contains(&"P0401".to_owned()));
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.helps.iter().any(|h| h.contains("as "))));
}

// ============================================================================
// Generics and monomorphization
// ============================================================================

#[test]
fn test_mono_requests_deduplicate_and_keep_order() {
    let mut b = B::new();
    let t_param = b.ty("T");
    let t_ret = b.ty("T");
    let x = b.var("x");
    let ret = b.ret(Some(x));
    let ret_stmt = b.stmt(ret);
    let id_fn = b.generic_func("id", &["T"], vec![("x", t_param)], Some(t_ret), vec![ret_stmt]);

    let mut stmts = Vec::new();
    for (ty_name, value) in [("i32", 1), ("i32", 2), ("i64", 3)] {
        let ty = b.ty(ty_name);
        let arg = b.int(value);
        let call = b.call_generic("id", vec![ty], vec![arg]);
        stmts.push(b.stmt(call));
    }
    let main = b.func("main", vec![], None, vec![stmts.remove(0), stmts.remove(0), stmts.remove(0)]);

    let out = b.run(vec![Item::Fn(id_fn), Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
    assert_eq!(out.mono_requests.len(), 2, "i32 twice dedupes, i64 is new");
    assert_eq!(
        out.types.display(out.mono_requests[0].ty_args[0], &out.symbols),
        "i32"
    );
    assert_eq!(
        out.types.display(out.mono_requests[1].ty_args[0], &out.symbols),
        "i64"
    );
}

#[test]
fn test_unsatisfied_bound_rejected() {
    let mut b = B::new();
    let tr = b.trait_("Printable", vec![], &[]);
    let t_param = b.ty("T");
    let mut show = b.generic_func("show", &["T"], vec![("x", t_param)], None, vec![]);
    // T: Printable
    let bound_path = {
        let ident = b.ident("Printable");
        pyritec_ast::Path::ident(ident)
    };
    show.generics[0].bounds.push(bound_path);

    let arg = b.int(5);
    let i64_ty = b.ty("i64");
    let call = b.call_generic("show", vec![i64_ty], vec![arg]);
    let call_stmt = b.stmt(call);
    let main = b.func("main", vec![], None, vec![call_stmt]);

    let out = b.run(vec![tr, Item::Fn(show), Item::Fn(main)]);
    assert!(error_codes(&out).contains(&"P0402".to_owned()));
}

#[test]
fn test_pipeline_outputs_are_deterministic() {
    fn build() -> (Vec<String>, Vec<u64>) {
        let mut b = B::new();
        let t_param = b.ty("T");
        let t_ret = b.ty("T");
        let x = b.var("x");
        let ret = b.ret(Some(x));
        let ret_stmt = b.stmt(ret);
        let id_fn =
            b.generic_func("id", &["T"], vec![("x", t_param)], Some(t_ret), vec![ret_stmt]);
        let i32_ty = b.ty("i32");
        let arg = b.int(1);
        let call = b.call_generic("id", vec![i32_ty], vec![arg]);
        let call_stmt = b.stmt(call);
        let missing = b.var("nope");
        let bad = b.stmt(missing);
        let main = b.func("main", vec![], None, vec![call_stmt, bad]);
        let out = b.run(vec![Item::Fn(id_fn), Item::Fn(main)]);
        (
            out.diagnostics.iter().map(|d| d.code.as_str()).collect(),
            out.mono_requests.iter().map(|r| r.key).collect(),
        )
    }

    assert_eq!(build(), build());
}

// ============================================================================
// Resolution
// ============================================================================

#[test]
fn test_undefined_name_reports_once() {
    let mut b = B::new();
    let missing = b.var("ghost");
    let missing_id = missing.id;
    let one = b.int(1);
    let sum = b.bin(BinOp::Add, missing, one);
    let let_x = b.let_("x", sum);
    let x = b.var("x");
    let two = b.int(2);
    let sum2 = b.bin(BinOp::Add, x, two);
    let let_y = b.let_("y", sum2);
    let main = b.func("main", vec![], None, vec![let_x, let_y]);

    let out = b.run(vec![Item::Fn(main)]);
    // One undefined-name error; the dependent arithmetic stays silent
    assert_eq!(error_codes(&out), vec!["P0201".to_owned()]);
    assert!(out.is_tainted(missing_id));
}

#[test]
fn test_duplicate_definition_reports_previous_site() {
    let mut b = B::new();
    let f1 = b.strukt("Thing", vec![]);
    let f2 = b.strukt("Thing", vec![]);
    let out = b.run(vec![f1, f2]);
    let dups = out.diagnostics_with_code(DiagnosticCode::DUPLICATE_DEFINITION);
    assert_eq!(dups.len(), 1);
    assert!(dups[0]
        .labels
        .iter()
        .any(|l| l.message.contains("previous definition")));
}

#[test]
fn test_value_shadowing_is_not_a_duplicate() {
    let mut b = B::new();
    let one = b.int(1);
    let first = b.let_("x", one);
    let x = b.var("x");
    let two = b.int(2);
    let sum = b.bin(BinOp::Add, x, two);
    let second = b.let_("x", sum);
    let main = b.func("main", vec![], None, vec![first, second]);
    let out = b.run(vec![Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
}

// ============================================================================
// Modules
// ============================================================================

struct FixtureLoader;

impl ModuleLoader for FixtureLoader {
    fn load(&self, path: &[&str]) -> Result<Program, ModuleError> {
        match path {
            ["std", "util"] => {
                // Loader-produced trees use a disjoint node-id range
                let mut mb = B::with_ids(NodeIdAllocator::starting_at(1_000_000));
                let ret_ty = mb.ty("i64");
                let one = mb.int(7);
                let ret = mb.ret(Some(one));
                let ret_stmt = mb.stmt(ret);
                let helper = mb.func("helper", vec![], Some(ret_ty), vec![ret_stmt]);
                Ok(Program {
                    items: vec![Item::Fn(helper)],
                })
            }
            ["std", "cycle"] => Err(ModuleError::Circular(vec![
                "std::cycle".into(),
                "std::other".into(),
                "std::cycle".into(),
            ])),
            _ => Err(ModuleError::NotFound(
                path.iter().map(|s| s.to_string()).collect(),
            )),
        }
    }
}

#[test]
fn test_imported_module_function_callable() {
    let mut b = B::new();
    let import = b.use_item(&["std", "util"]);
    let callee = b.path2("util", "helper");
    let call = b.call_expr(callee, vec![]);
    let call_id = call.id;
    let let_x = b.let_("x", call);
    let main = b.func("main", vec![], None, vec![let_x]);

    let out = b.run_with_loader(vec![import, Item::Fn(main)], &FixtureLoader);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
    let ty = out.type_of(call_id).unwrap();
    assert_eq!(out.types.display(ty, &out.symbols), "i64");
}

#[test]
fn test_circular_import_surfaces_dedicated_code() {
    let mut b = B::new();
    let import = b.use_item(&["std", "cycle"]);
    let out = b.run_with_loader(vec![import], &FixtureLoader);
    assert!(error_codes(&out).contains(&"P0211".to_owned()));
}

#[test]
fn test_missing_module_reports_not_found() {
    let mut b = B::new();
    let import = b.use_item(&["std", "nothing"]);
    let out = b.run_with_loader(vec![import], &FixtureLoader);
    assert!(error_codes(&out).contains(&"P0210".to_owned()));
}

// ============================================================================
// Closures
// ============================================================================

#[test]
fn test_parameter_closure_inlines_at_call_site() {
    let mut b = B::new();
    let p_i64 = b.ty("i64");
    let r_i64 = b.ty("i64");
    let f_ty = b.ty_fn(vec![p_i64], r_i64);
    let x_ty = b.ty("i64");
    let ret_ty = b.ty("i64");
    let x = b.var("x");
    let inner_call = b.call("f", vec![x]);
    let ret = b.ret(Some(inner_call));
    let ret_stmt = b.stmt(ret);
    let apply = b.func_ct(
        "apply",
        vec![("f", f_ty)],
        vec![("x", x_ty)],
        Some(ret_ty),
        vec![ret_stmt],
    );

    let v = b.var("v");
    let one = b.int(1);
    let body = b.bin(BinOp::Add, v, one);
    let closure = b.closure(&["v"], body, false);
    let five = b.int(5);
    let call = b.call_ct("apply", vec![closure], vec![five]);
    let let_y = b.let_("y", call);
    let main = b.func("main", vec![], None, vec![let_y]);

    let out = b.run(vec![Item::Fn(apply), Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
    assert_eq!(out.specialized_fns.len(), 1);
    let specialized = &out.specialized_fns[0];
    assert!(specialized
        .item
        .name
        .name
        .as_str()
        .starts_with("__apply_inline_"));
    // The closure parameter is gone from the specialized signature
    assert!(specialized.item.const_params.is_empty());
    // The consumed closure gets no runtime environment layout
    assert!(out.closure_layouts.is_empty());
}

#[test]
fn test_runtime_closure_environment_layout() {
    let mut b = B::new();
    let init = b.int(10);
    let let_a = b.let_("a", init);
    let x = b.var("x");
    let a = b.var("a");
    let body = b.bin(BinOp::Add, x, a);
    let capturing = b.closure(&["x"], body, false);
    let let_f = b.let_("f", capturing);
    let y = b.var("y");
    let plain = b.closure(&["y"], y, false);
    let let_g = b.let_("g", plain);
    let main = b.func("main", vec![], None, vec![let_a, let_f, let_g]);

    let out = b.run(vec![Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
    assert_eq!(out.closure_layouts.len(), 2);

    let capturing = &out.closure_layouts[0];
    assert_eq!(capturing.symbol, Symbol::intern("__closure_0"));
    assert_eq!(capturing.captures.len(), 1);
    assert_eq!(capturing.captures[0].0, Symbol::intern("a"));
    assert!(!capturing.fn_ptr_only);

    let plain = &out.closure_layouts[1];
    assert!(plain.captures.is_empty());
    assert!(plain.fn_ptr_only, "zero captures degenerate to a fn pointer");
}

#[test]
fn test_move_closure_moves_captures() {
    let mut b = B::new();
    let s_ty = b.ty("string");
    let consume = b.func("consume", vec![("s", s_ty)], None, vec![]);
    let init = b.string("captured");
    let let_data = b.let_("data", init);
    let data_ref = b.var("data");
    let closure = b.closure(&[], data_ref, true);
    let let_f = b.let_("f", closure);
    let use_after = b.var("data");
    let call = b.call("consume", vec![use_after]);
    let reuse = b.stmt(call);
    let main = b.func("main", vec![], None, vec![let_data, let_f, reuse]);

    let out = b.run(vec![Item::Fn(consume), Item::Fn(main)]);
    assert!(error_codes(&out).contains(&"P0234".to_owned()));
}

// ============================================================================
// Timeline and costs
// ============================================================================

#[test]
fn test_timeline_records_events_when_enabled() {
    let mut b = B::new();
    let init = b.string("x");
    let let_data = b.let_("data", init);
    let data = b.var("data");
    let borrowed = b.reference(data, false);
    let let_r = b.let_("r", borrowed);
    let r = b.var("r");
    let keep = b.stmt(r);
    let main = b.func("main", vec![], None, vec![let_data, let_r, keep]);

    let flags = FeatureFlags {
        track_timeline: true,
        ..Default::default()
    };
    let out = b.run_flags(vec![Item::Fn(main)], flags);
    let data_sym = Symbol::intern("data");
    let kinds: Vec<_> = out
        .timeline
        .iter()
        .filter(|e| e.variable == data_sym)
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&crate::EventKind::Allocate));
    assert!(kinds.contains(&crate::EventKind::Borrow));
}

#[test]
fn test_timeline_disabled_by_default() {
    let mut b = B::new();
    let init = b.string("x");
    let let_data = b.let_("data", init);
    let main = b.func("main", vec![], None, vec![let_data]);
    let out = b.run(vec![Item::Fn(main)]);
    assert!(out.timeline.is_empty());
}

#[test]
fn test_allocation_in_loop_advisory() {
    let mut b = B::new();
    let lhs = b.string("a");
    let rhs = b.string("b");
    let concat = b.bin(BinOp::Add, lhs, rhs);
    let let_s = b.let_("s", concat);
    let cond = b.boolean(true);
    let loop_stmt = b.while_stmt(cond, vec![let_s]);
    let main = b.func("main", vec![], None, vec![loop_stmt]);

    let flags = FeatureFlags {
        track_costs: true,
        warn_costs: true,
        ..Default::default()
    };
    let out = b.run_flags(vec![Item::Fn(main)], flags);
    assert!(!out.cost_records.is_empty());
    assert!(out
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::ALLOC_IN_LOOP));
}

#[test]
fn test_costs_silent_by_default() {
    let mut b = B::new();
    let lhs = b.string("a");
    let rhs = b.string("b");
    let concat = b.bin(BinOp::Add, lhs, rhs);
    let let_s = b.let_("s", concat);
    let main = b.func("main", vec![], None, vec![let_s]);
    let out = b.run(vec![Item::Fn(main)]);
    assert!(out.cost_records.is_empty());
    assert!(!out
        .diagnostics
        .iter()
        .any(|d| d.code == DiagnosticCode::ALLOC_IN_LOOP));
}

// ============================================================================
// Interning invariants
// ============================================================================

#[test]
fn test_every_checked_expression_has_an_interned_type() {
    let mut b = B::new();
    let data = b.data_struct();
    let name_value = b.string("n");
    let id_value = b.int(1);
    let lit = b.struct_lit("Data", vec![("name", name_value), ("id", id_value)]);
    let let_d = b.let_("d", lit);
    let d = b.var("d");
    let access = b.field(d, "id");
    let one = b.int(1);
    let sum = b.bin(BinOp::Add, access, one);
    let let_x = b.let_("x", sum);
    let main = b.func("main", vec![], None, vec![let_d, let_x]);

    let out = b.run(vec![data, Item::Fn(main)]);
    assert!(!out.has_errors(), "unexpected: {:?}", out.diagnostics);
    // Every annotated node's type id resolves in the pool
    for (&node, &ty) in &out.node_types {
        let _ = out.types.kind(ty);
        assert!(!out.is_tainted(node) || ty == out.types.common.error);
    }
}
