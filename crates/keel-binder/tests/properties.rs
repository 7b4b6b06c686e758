//! Cross-cutting properties: determinism, boundary behaviors, RPC
//! seeding, and post-binding refinement.

use keel_binder::BinderState;
use keel_hir::builder::ProgramBuilder;
use keel_hir::{FuncKind, IdentTarget, Linkage};
use keel_types::TypeId;

fn bind_ok(b: ProgramBuilder) -> BinderState {
    let mut state = BinderState::new(b.finish());
    if let Err(diags) = state.bind() {
        panic!("unexpected diagnostics: {diags:?}");
    }
    state
}

fn sample_program() -> ProgramBuilder {
    let mut b = ProgramBuilder::with_builtins();
    let _f = b.begin_function("twice", FuncKind::Plain, &["x"]);
    let x = b.ident_expr("x");
    let two = b.uint_lit(2, 32);
    let product = b.mul(x, two);
    b.return_stmt(Some(product));
    b.end_function();
    let callee = b.ident_expr("twice");
    let five = b.uint_lit(5, 32);
    let call = b.call(callee, &[five]);
    b.assign_var_stmt("a", call);
    let e1 = b.uint_lit(1, 32);
    let e2 = b.uint_lit(2, 32);
    let lit = b.array_lit(&[e1, e2]);
    b.assign_var_stmt("xs", lit);
    let iterand = b.ident_expr("xs");
    b.begin_foreach("v", iterand);
    let v = b.ident_expr("v");
    b.println_stmt(&[v]);
    b.end_block();
    b
}

#[test]
fn binding_is_deterministic() {
    let first = bind_ok(sample_program());
    let second = bind_ok(sample_program());
    assert_eq!(first.expr_type_snapshot(), second.expr_type_snapshot());
}

#[test]
fn empty_parameter_constructor_uses_the_default_class() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("Singleton", FuncKind::Constructor, &["self"]);
    b.end_function();
    let template = b.make_template(ctor, 32);
    let callee = b.ident_expr("Singleton");
    let call = b.call(callee, &[]);
    b.assign_var_stmt("s", call);
    let state = bind_ok(b);
    assert_eq!(state.hir.template(template).classes.len(), 1);
}

#[test]
fn empty_call_to_parameterized_template_is_rejected() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("Box", FuncKind::Constructor, &["self", "v"]);
    b.template_param(ctor, 1);
    b.end_function();
    b.make_template(ctor, 32);
    let callee = b.ident_expr("Box");
    let call = b.call(callee, &[]);
    b.assign_var_stmt("s", call);
    let mut state = BinderState::new(b.finish());
    let diags = state.bind().unwrap_err();
    assert!(diags
        .iter()
        .any(|d| d.code == keel_common::ErrorCode::TypeMismatch));
}

#[test]
fn recursion_resolves_from_the_base_case() {
    // fact(n) { if n == 0u32 { return 1u32 } return n * fact(n - 1u32) }
    let mut b = ProgramBuilder::new();
    let fact = b.begin_function("fact", FuncKind::Plain, &["n"]);
    {
        let n = b.ident_expr("n");
        let zero = b.uint_lit(0, 32);
        let cond = b.eq(n, zero);
        b.begin_if(cond);
        let one = b.uint_lit(1, 32);
        b.return_stmt(Some(one));
        b.end_block();
        let n2 = b.ident_expr("n");
        let callee = b.ident_expr("fact");
        let n3 = b.ident_expr("n");
        let one2 = b.uint_lit(1, 32);
        let minus = b.sub(n3, one2);
        let rec = b.call(callee, &[minus]);
        let product = b.mul(n2, rec);
        b.return_stmt(Some(product));
    }
    b.end_function();
    let callee = b.ident_expr("fact");
    let ten = b.uint_lit(10, 32);
    let call = b.call(callee, &[ten]);
    b.expr_stmt(call);

    let state = bind_ok(b);
    let u32_ty = state.types.uint(32);
    let sid = state.lookup_signature(fact, &[Some(u32_ty)]).unwrap();
    assert_eq!(state.sig(sid).ret, Some(u32_ty));
}

#[test]
fn funcaddr_marks_the_signature_address_taken() {
    let mut b = ProgramBuilder::new();
    let f = b.begin_function("handler", FuncKind::Plain, &["x"]);
    let x = b.ident_expr("x");
    b.return_stmt(Some(x));
    b.end_function();
    let callee = b.ident_expr("handler");
    let arg = b.uint_lit(1, 8);
    let call = b.call(callee, &[arg]);
    let addr = b.funcaddr(call);
    b.assign_var_stmt("p", addr);

    let state = bind_ok(b);
    let u8_ty = state.types.uint(8);
    let sid = state.lookup_signature(f, &[Some(u8_ty)]).unwrap();
    assert!(state.sig(sid).address_taken);
    assert!(state.paramspecs(sid).iter().all(|p| p.instantiated));
    let main = state.main_sig().unwrap();
    let ty = state.expr_type(main, addr).unwrap();
    assert_eq!(
        state.types.term(ty),
        keel_types::Term::Funcptr(u8_ty, vec![u8_ty])
    );
}

#[test]
fn extern_rpcs_bind_after_the_main_fixpoint() {
    let mut b = ProgramBuilder::new();
    let rpc = b.begin_function_with("fetch", FuncKind::Plain, Linkage::ExternRpc, &["key"]);
    let key_constraint = b.string_type();
    b.set_param_constraint(rpc, 0, key_constraint);
    let ret_constraint = b.uint_type(64);
    b.set_ret_constraint(rpc, ret_constraint);
    b.end_function();

    let mut state = BinderState::new(b.finish());
    state.bind().expect("main fixpoint is clean");
    assert!(state.lookup_signature(rpc, &[Some(TypeId::STR)]).is_none());
    state.bind_rpcs().expect("rpc fixpoint is clean");
    let sid = state
        .lookup_signature(rpc, &[Some(TypeId::STR)])
        .expect("rpc signature created");
    assert_eq!(state.sig(sid).ret, Some(state.types.uint(64)));
    assert!(state.sig(sid).instantiated);
}

#[test]
fn refine_access_narrows_nullable_placeholders() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("Cell", FuncKind::Constructor, &["self"]);
    b.end_function();
    b.make_template(ctor, 32);
    let ty = b.ident_expr("Cell");
    let null = b.null_expr(ty);
    let target = b.ident_expr("slot");
    b.assign_stmt(target, null);
    let callee = b.ident_expr("Cell");
    let call = b.call(callee, &[]);
    b.assign_var_stmt("made", call);

    let mut state = bind_ok(b);
    let main = state.main_sig().unwrap();
    let nullable = state.expr_type(main, target).unwrap();
    assert!(state.types.nullable(nullable));
    let concrete = state.types.set_nullable(nullable, false).unwrap();

    assert!(state.refine_access(main, target, concrete));
    let atom = state.hir.interner.get("slot").unwrap();
    let ident = state.hir.find_ident(state.hir.root, atom).unwrap();
    let IdentTarget::Var(var) = state.hir.ident(ident).target else {
        panic!("slot should be a variable");
    };
    assert_eq!(state.var_type(main, var), Some(concrete));

    // Refinement refuses unrelated overwrites.
    assert!(!state.refine_access(main, target, TypeId::STR));
}

#[test]
fn diagnostics_serialize_for_machine_output() {
    let mut b = ProgramBuilder::new();
    let missing = b.ident_expr("nowhere");
    b.expr_stmt(missing);
    let mut state = BinderState::new(b.finish());
    let diags = state.bind().unwrap_err();
    let json = serde_json::to_string(&diags).expect("diagnostics serialize");
    assert!(json.contains("UndefinedIdentifier"));
}
