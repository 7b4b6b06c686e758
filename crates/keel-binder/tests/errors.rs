//! Diagnostic behaviors: error kinds, recovery, and leftover-event
//! reporting order.

use keel_binder::BinderState;
use keel_common::{Diagnostic, ErrorCode};
use keel_hir::builder::ProgramBuilder;
use keel_hir::{BinOp, FuncKind};

fn bind_err(b: ProgramBuilder) -> Vec<Diagnostic> {
    let mut state = BinderState::new(b.finish());
    state.bind().expect_err("expected diagnostics")
}

fn bind_ok(b: ProgramBuilder) -> BinderState {
    let mut state = BinderState::new(b.finish());
    if let Err(diags) = state.bind() {
        panic!("unexpected diagnostics: {diags:?}");
    }
    state
}

#[test]
fn undefined_identifier_survives_drain() {
    let mut b = ProgramBuilder::new();
    let missing = b.ident_expr("missing");
    b.expr_stmt(missing);
    let diags = bind_err(b);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, ErrorCode::UndefinedIdentifier);
    assert!(diags[0].message.contains("missing"));
}

#[test]
fn undefined_idents_report_before_undetermined_returns() {
    let mut b = ProgramBuilder::new();
    // `loop_` never resolves its return type; `ghost` never resolves at
    // all. The undefined identifier is the root cause and reports first.
    b.begin_function("loop_", FuncKind::Plain, &["n"]);
    let callee = b.ident_expr("loop_");
    let n = b.ident_expr("n");
    let call = b.call(callee, &[n]);
    b.return_stmt(Some(call));
    b.end_function();
    let callee = b.ident_expr("loop_");
    let one = b.uint_lit(1, 32);
    let call = b.call(callee, &[one]);
    b.expr_stmt(call);
    let ghost = b.ident_expr("ghost");
    b.expr_stmt(ghost);

    let diags = bind_err(b);
    let undefined = diags
        .iter()
        .position(|d| d.code == ErrorCode::UndefinedIdentifier)
        .expect("undefined identifier reported");
    let ret = diags
        .iter()
        .position(|d| d.code == ErrorCode::UndeterminedReturn)
        .expect("undetermined return reported");
    assert!(undefined < ret);
}

#[test]
fn const_write_is_rejected() {
    let mut b = ProgramBuilder::new();
    let var = b.local_var("limit");
    b.hir_mut().var_mut(var).is_const = true;
    let value = b.uint_lit(10, 32);
    b.assign_var_stmt("limit", value);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::ConstWrite));
}

#[test]
fn op_assign_requires_a_matching_operand() {
    let mut b = ProgramBuilder::new();
    let init = b.string_lit("a");
    b.assign_var_stmt("x", init);
    let lhs = b.ident_expr("x");
    let rhs = b.string_lit("b");
    b.op_assign_stmt(BinOp::Sub, lhs, rhs);
    let diags = bind_err(b);
    assert!(diags
        .iter()
        .any(|d| d.code == ErrorCode::OverloadResolutionFailure));
}

#[test]
fn op_assign_joins_like_its_operator() {
    let mut b = ProgramBuilder::new();
    let init = b.uint_lit(1, 32);
    b.assign_var_stmt("x", init);
    let lhs = b.ident_expr("x");
    let rhs = b.uint_lit(2, 32);
    b.op_assign_stmt(BinOp::Add, lhs, rhs);
    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    let atom = state.hir.interner.get("x").unwrap();
    let ident = state.hir.find_ident(state.hir.root, atom).unwrap();
    let keel_hir::IdentTarget::Var(var) = state.hir.ident(ident).target else {
        panic!("x should be a variable");
    };
    assert_eq!(state.var_type(main, var), Some(state.types.uint(32)));
}

#[test]
fn width_mismatch_is_a_type_error() {
    let mut b = ProgramBuilder::new();
    let a = b.uint_lit(1, 32);
    let c = b.uint_lit(1, 64);
    let sum = b.add(a, c);
    b.assign_var_stmt("x", sum);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::TypeMismatch));
}

#[test]
fn autocast_narrows_unsuffixed_literals() {
    let mut b = ProgramBuilder::new();
    let auto = b.auto_int(5);
    let narrow = b.uint_lit(1, 16);
    let sum = b.add(auto, narrow);
    b.assign_var_stmt("x", sum);
    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    assert_eq!(state.expr_type(main, sum), Some(state.types.uint(16)));
    assert_eq!(state.expr_type(main, auto), Some(state.types.uint(16)));
}

#[test]
fn autocast_overflow_is_reported_at_bind_time() {
    let mut b = ProgramBuilder::new();
    let auto = b.auto_int(300);
    let narrow = b.uint_lit(1, 8);
    let sum = b.add(auto, narrow);
    b.assign_var_stmt("x", sum);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::SyntaxAtBindTime));
}

#[test]
fn bad_cast_is_rejected() {
    let mut b = ProgramBuilder::new();
    let target = b.bool_type();
    let value = b.string_lit("nope");
    let cast = b.cast(target, value);
    b.assign_var_stmt("x", cast);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::BadCast));
}

#[test]
fn cast_preserves_source_secrecy() {
    let mut b = ProgramBuilder::new();
    let target = b.uint_type(16);
    let value = b.rand_uint(16);
    let cast = b.cast(target, value);
    b.assign_var_stmt("x", cast);
    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    let ty = state.expr_type(main, cast).unwrap();
    // The cast target was plain; the result is still secret.
    assert!(state.types.secret(ty));
}

#[test]
fn class_cast_requires_matching_ref_width() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("P", FuncKind::Constructor, &["self"]);
    b.end_function();
    b.make_template(ctor, 32);
    let callee = b.ident_expr("P");
    let call = b.call(callee, &[]);
    b.assign_var_stmt("p", call);
    let target = b.uint_type(16);
    let p = b.ident_expr("p");
    let cast = b.cast(target, p);
    b.assign_var_stmt("x", cast);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::BadCast));
}

#[test]
fn secret_index_is_rejected() {
    let mut b = ProgramBuilder::new();
    let e1 = b.uint_lit(1, 8);
    let lit = b.array_lit(&[e1]);
    b.assign_var_stmt("a", lit);
    let a = b.ident_expr("a");
    let idx = b.rand_uint(64);
    let index = b.index(a, idx);
    b.assign_var_stmt("x", index);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::BadSecrecy));
}

#[test]
fn secret_print_is_rejected() {
    let mut b = ProgramBuilder::new();
    let secret = b.rand_uint(32);
    b.println_stmt(&[secret]);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::BadSecrecy));
}

#[test]
fn secret_shift_amount_is_rejected() {
    let mut b = ProgramBuilder::new();
    let value = b.uint_lit(4, 32);
    let amount = b.rand_uint(32);
    let shifted = b.binary(BinOp::Shl, value, amount);
    b.assign_var_stmt("x", shifted);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::BadSecrecy));
}

#[test]
fn secret_arithmetic_taints_the_result() {
    let mut b = ProgramBuilder::new();
    let secret = b.rand_uint(32);
    let plain = b.uint_lit(1, 32);
    let sum = b.add(secret, plain);
    b.assign_var_stmt("x", sum);
    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    let ty = state.expr_type(main, sum).unwrap();
    assert!(state.types.secret(ty));
    assert_eq!(state.types.term(ty), keel_types::Term::Uint(32));
}

#[test]
fn modular_region_types_arithmetic() {
    // (3u32 + 4u32) mod 7u32
    let mut b = ProgramBuilder::new();
    let three = b.uint_lit(3, 32);
    let four = b.uint_lit(4, 32);
    let sum = b.add(three, four);
    let seven = b.uint_lit(7, 32);
    let modded = b.modint(sum, seven);
    b.assign_var_stmt("x", modded);
    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    let ty = state.expr_type(main, sum).unwrap();
    assert!(matches!(state.types.term(ty), keel_types::Term::Modint(_)));
    assert_eq!(state.expr_type(main, modded), Some(ty));
}

#[test]
fn modular_exponent_rejects_secret_base() {
    let mut b = ProgramBuilder::new();
    let base = b.rand_uint(32);
    let exp = b.uint_lit(3, 32);
    let power = b.binary(BinOp::Exp, base, exp);
    let p = b.uint_lit(7, 32);
    let modded = b.modint(power, p);
    b.assign_var_stmt("x", modded);
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::BadSecrecy));
}

#[test]
fn operator_overload_dispatches_to_class_method() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("Vec1", FuncKind::Constructor, &["self", "x"]);
    b.template_param(ctor, 1);
    {
        let self1 = b.ident_expr("self");
        let dot_x = b.dot(self1, "x");
        let x = b.ident_expr("x");
        b.assign_stmt(dot_x, x);
        b.begin_function("+", FuncKind::Operator, &["self", "other"]);
        let s = b.ident_expr("self");
        let sx = b.dot(s, "x");
        let o = b.ident_expr("other");
        let ox = b.dot(o, "x");
        let sum = b.add(sx, ox);
        b.return_stmt(Some(sum));
        b.end_function();
    }
    b.end_function();
    b.make_template(ctor, 32);
    let c1 = b.ident_expr("Vec1");
    let one = b.uint_lit(1, 32);
    let call1 = b.call(c1, &[one]);
    b.assign_var_stmt("a", call1);
    let c2 = b.ident_expr("Vec1");
    let two = b.uint_lit(2, 32);
    let call2 = b.call(c2, &[two]);
    b.assign_var_stmt("bv", call2);
    let a = b.ident_expr("a");
    let bv = b.ident_expr("bv");
    let sum = b.add(a, bv);
    b.assign_var_stmt("c", sum);

    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    // `a + bv` rewrote to `a.+(bv)` and took the method's return type.
    assert_eq!(state.hir.expr(sum).kind, keel_hir::ExprKind::Call);
    assert_eq!(state.expr_type(main, sum), Some(state.types.uint(32)));
}

#[test]
fn missing_operator_overload_is_reported() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("Bag", FuncKind::Constructor, &["self"]);
    b.end_function();
    b.make_template(ctor, 32);
    let callee = b.ident_expr("Bag");
    let call = b.call(callee, &[]);
    b.assign_var_stmt("a", call);
    let a = b.ident_expr("a");
    let one = b.uint_lit(1, 32);
    let sum = b.add(a, one);
    b.assign_var_stmt("x", sum);
    let diags = bind_err(b);
    assert!(diags
        .iter()
        .any(|d| d.code == ErrorCode::OverloadResolutionFailure));
}

#[test]
fn typeswitch_selects_first_matching_case() {
    let mut b = ProgramBuilder::new();
    let x = b.uint_lit(5, 32);
    b.assign_var_stmt("x", x);
    let scrutinee = b.ident_expr("x");
    b.begin_typeswitch(scrutinee);
    let u32_arm = b.uint_type(32);
    let taken = b.begin_case(&[u32_arm]);
    let x_use = b.ident_expr("x");
    b.assign_var_stmt("y", x_use);
    b.end_block();
    let str_arm = b.string_type();
    let skipped = b.begin_case(&[str_arm]);
    let s = b.string_lit("never");
    b.assign_var_stmt("z", s);
    b.end_block();
    b.end_block();

    let state = bind_ok(b);
    assert!(state.hir.stmt(taken).instantiated);
    assert!(!state.hir.stmt(skipped).instantiated);
    // The selected arm's body bound; the other arm's never did.
    let root = state.hir.root;
    let y = state.hir.interner.get("y").unwrap();
    assert!(state.hir.find_ident(root, y).is_none());
    let taken_block = state.hir.stmt(taken).sub_block.unwrap();
    assert!(state.hir.find_ident(taken_block, y).is_some());
    let z = state.hir.interner.get("z");
    let skipped_block = state.hir.stmt(skipped).sub_block.unwrap();
    assert!(z.is_none_or(|z| state.hir.find_in_block(skipped_block, z).is_none()));
}

#[test]
fn typeswitch_without_match_or_default_is_an_error() {
    let mut b = ProgramBuilder::new();
    let x = b.uint_lit(5, 32);
    b.assign_var_stmt("x", x);
    let scrutinee = b.ident_expr("x");
    b.begin_typeswitch(scrutinee);
    let str_arm = b.string_type();
    b.begin_case(&[str_arm]);
    b.end_block();
    b.end_block();
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::TypeMismatch));
}

#[test]
fn switch_case_types_must_match_scrutinee() {
    let mut b = ProgramBuilder::new();
    let x = b.uint_lit(5, 32);
    b.assign_var_stmt("x", x);
    let scrutinee = b.ident_expr("x");
    b.begin_switch(scrutinee);
    let bad = b.string_lit("nope");
    b.begin_case(&[bad]);
    b.end_block();
    b.end_block();
    let diags = bind_err(b);
    assert!(diags.iter().any(|d| d.code == ErrorCode::TypeMismatch));
}

#[test]
fn constraint_violation_is_reported() {
    let mut b = ProgramBuilder::new();
    let var = b.local_var("x");
    let constraint = b.string_type();
    b.hir_mut().var_mut(var).type_constraint = Some(constraint);
    let value = b.uint_lit(5, 32);
    b.assign_var_stmt("x", value);
    let diags = bind_err(b);
    assert!(diags
        .iter()
        .any(|d| d.code == ErrorCode::ConstraintViolation));
}

#[test]
fn union_constraint_accepts_either_arm() {
    let mut b = ProgramBuilder::new();
    let var = b.local_var("x");
    let u32_arm = b.uint_type(32);
    let u64_arm = b.uint_type(64);
    let union = b.binary(BinOp::BitOr, u32_arm, u64_arm);
    b.hir_mut().var_mut(var).type_constraint = Some(union);
    let value = b.uint_lit(5, 64);
    b.assign_var_stmt("x", value);
    bind_ok(b);
}

#[test]
fn diagnostics_carry_call_chain_context() {
    // The failure is inside g, reached through f's call: the diagnostic
    // carries the specialization chain.
    let mut b = ProgramBuilder::new();
    b.begin_function("g", FuncKind::Plain, &["x"]);
    let x = b.ident_expr("x");
    let one = b.uint_lit(1, 64);
    let sum = b.add(x, one);
    b.return_stmt(Some(sum));
    b.end_function();
    b.begin_function("f", FuncKind::Plain, &["x"]);
    let callee = b.ident_expr("g");
    let x2 = b.ident_expr("x");
    let call = b.call(callee, &[x2]);
    b.return_stmt(Some(call));
    b.end_function();
    let callee = b.ident_expr("f");
    let arg = b.uint_lit(2, 32);
    let call = b.call(callee, &[arg]);
    b.expr_stmt(call);

    let diags = bind_err(b);
    let mismatch = diags
        .iter()
        .find(|d| d.code == ErrorCode::TypeMismatch)
        .expect("the add fails");
    assert!(!mismatch.related.is_empty());
}
