//! Unit tests for the engine internals: seeding, event ordering,
//! signature canonicalization, and idempotent re-binding.

use keel_hir::builder::ProgramBuilder;
use keel_hir::{FuncKind, IdentTarget};
use keel_types::TypeId;

use crate::BinderState;

fn bind_ok(b: ProgramBuilder) -> BinderState {
    let mut state = BinderState::new(b.finish());
    if let Err(diags) = state.bind() {
        panic!("unexpected diagnostics: {diags:?}");
    }
    state
}

#[test]
fn empty_program_binds() {
    let state = bind_ok(ProgramBuilder::new());
    assert!(state.main_sig().is_some());
    let main = state.main_sig().unwrap();
    assert!(state.sig(main).bound);
    assert_eq!(state.sig(main).ret, Some(TypeId::NONE));
}

#[test]
fn signature_lookup_is_idempotent() {
    let mut b = ProgramBuilder::new();
    let f = b.begin_function("f", FuncKind::Plain, &["x"]);
    let x = b.ident_expr("x");
    b.return_stmt(Some(x));
    b.end_function();
    let f_ident = b.ident_expr("f");
    let arg = b.uint_lit(2, 32);
    let call = b.call(f_ident, &[arg]);
    b.expr_stmt(call);
    let f_ident2 = b.ident_expr("f");
    let arg2 = b.uint_lit(3, 32);
    let call2 = b.call(f_ident2, &[arg2]);
    b.expr_stmt(call2);

    let state = bind_ok(b);
    let u32_ty = state.types.uint(32);
    let sid = state
        .lookup_signature(f, &[Some(u32_ty)])
        .expect("specialized once");
    // Both call sites share the canonical signature.
    assert_eq!(state.sigs_of(f).count(), 1);
    assert_eq!(state.sig(sid).ret, Some(u32_ty));
}

#[test]
fn rebinding_a_bound_program_adds_no_queue_entries() {
    let mut b = ProgramBuilder::new();
    let x = b.uint_lit(7, 16);
    b.assign_var_stmt("x", x);
    let mut state = BinderState::new(b.finish());
    state.bind().expect("clean program");
    assert!(state.runnable.is_empty());
    let types_before = state.expr_types.clone();
    state.run_queue();
    assert_eq!(types_before, state.expr_types);
}

#[test]
fn waiters_wake_in_park_order() {
    // Three readers of `x` park before the assignment binds; they must
    // wake FIFO. The program builds the readers first so their bindings
    // spawn (and park) ahead of the defining assignment.
    let mut b = ProgramBuilder::new();
    let r1 = b.ident_expr("x");
    b.expr_stmt(r1);
    let r2 = b.ident_expr("x");
    b.expr_stmt(r2);
    let r3 = b.ident_expr("x");
    b.expr_stmt(r3);
    let value = b.uint_lit(1, 64);
    b.assign_var_stmt("x", value);

    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    let u64_ty = state.types.uint(64);
    assert_eq!(state.expr_type(main, r1), Some(u64_ty));
    assert_eq!(state.expr_type(main, r2), Some(u64_ty));
    assert_eq!(state.expr_type(main, r3), Some(u64_ty));
}

#[test]
fn lazy_variable_creation_retargets_the_undefined_ident() {
    let mut b = ProgramBuilder::new();
    let r = b.ident_expr("x");
    b.expr_stmt(r);
    let value = b.bool_lit(true);
    b.assign_var_stmt("x", value);
    let state = bind_ok(b);
    let root = state.hir.root;
    let atom = state.hir.interner.get("x").unwrap();
    let ident = state.hir.find_ident(root, atom).unwrap();
    assert!(matches!(state.hir.ident(ident).target, IdentTarget::Var(_)));
    let main = state.main_sig().unwrap();
    assert_eq!(state.expr_type(main, r), Some(TypeId::BOOL));
}

#[test]
fn var_key_scopes_locals_per_signature() {
    // One body, two specializations: the local `y` gets a distinct type
    // per signature.
    let mut b = ProgramBuilder::new();
    let f = b.begin_function("id", FuncKind::Plain, &["x"]);
    let x = b.ident_expr("x");
    b.assign_var_stmt("y", x);
    let y = b.ident_expr("y");
    b.return_stmt(Some(y));
    b.end_function();
    let c1 = {
        let callee = b.ident_expr("id");
        let arg = b.uint_lit(1, 32);
        b.call(callee, &[arg])
    };
    b.expr_stmt(c1);
    let c2 = {
        let callee = b.ident_expr("id");
        let arg = b.string_lit("s");
        b.call(callee, &[arg])
    };
    b.expr_stmt(c2);

    let state = bind_ok(b);
    let main = state.main_sig().unwrap();
    let u32_ty = state.types.uint(32);
    assert_eq!(state.expr_type(main, c1), Some(u32_ty));
    assert_eq!(state.expr_type(main, c2), Some(TypeId::STR));
    let s1 = state.lookup_signature(f, &[Some(u32_ty)]).unwrap();
    let s2 = state.lookup_signature(f, &[Some(TypeId::STR)]).unwrap();
    let y_var = {
        let block = state.hir.func(f).block;
        let atom = state.hir.interner.get("y").unwrap();
        let ident = state.hir.find_ident(block, atom).unwrap();
        match state.hir.ident(ident).target {
            IdentTarget::Var(var) => var,
            other => panic!("expected variable, got {other:?}"),
        }
    };
    assert_eq!(state.var_type(s1, y_var), Some(u32_ty));
    assert_eq!(state.var_type(s2, y_var), Some(TypeId::STR));
}

#[test]
fn paramspec_bits_copy_down_on_finalize() {
    let mut b = ProgramBuilder::new();
    let f = b.begin_function("g", FuncKind::Plain, &["x"]);
    let x = b.ident_expr("x");
    b.return_stmt(Some(x));
    b.end_function();
    let callee = b.ident_expr("g");
    let arg = b.uint_lit(5, 8);
    let call = b.call(callee, &[arg]);
    b.expr_stmt(call);
    let state = bind_ok(b);
    let u8_ty = state.types.uint(8);
    let sid = state.lookup_signature(f, &[Some(u8_ty)]).unwrap();
    let specs = state.paramspecs(sid);
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].datatype, Some(u8_ty));
    assert!(specs[0].instantiated);
    assert!(!specs[0].is_type);
}
