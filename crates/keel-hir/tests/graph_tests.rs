//! Graph-level behaviors across the public API: mutation primitives,
//! deep copy, and destruction cascades.

use keel_hir::builder::ProgramBuilder;
use keel_hir::{BlockOwner, FuncKind, IdentTarget, StmtKind};

#[test]
fn statements_keep_block_order_through_insertions() {
    let mut b = ProgramBuilder::new();
    let first = b.uint_lit(1, 8);
    let s1 = b.assign_var_stmt("a", first);
    let second = b.uint_lit(2, 8);
    let s2 = b.assign_var_stmt("c", second);
    let mut hir = b.finish();
    let root = hir.root;
    assert_eq!(hir.block(root).stmts, vec![s1, s2]);

    let detached = hir.new_detached_stmt(root, StmtKind::Return, None, None, keel_common::Loc::dummy());
    hir.prepend_stmt(root, detached);
    assert_eq!(hir.block(root).stmts, vec![detached, s1, s2]);
    hir.remove_stmt(detached);
    assert_eq!(hir.block(root).stmts, vec![s1, s2]);
    assert!(hir.stmt(detached).dead);
}

#[test]
fn rename_ident_keeps_the_binding() {
    let mut b = ProgramBuilder::new();
    let var = b.local_var("old");
    let mut hir = b.finish();
    let root = hir.root;
    let old = hir.interner.get("old").unwrap();
    let new = hir.interner.intern("new");
    hir.rename_ident(root, old, new).expect("old was bound");
    assert!(hir.find_ident(root, old).is_none());
    let found = hir.find_ident(root, new).unwrap();
    assert_eq!(hir.ident(found).target, IdentTarget::Var(var));
}

#[test]
fn deep_copy_reproduces_nested_structure() {
    let mut b = ProgramBuilder::new();
    let f = b.begin_function("src", FuncKind::Plain, &["p"]);
    let cond = b.bool_lit(true);
    b.begin_if(cond);
    let p = b.ident_expr("p");
    b.return_stmt(Some(p));
    b.end_block();
    b.end_function();
    let mut hir = b.finish();
    let src = hir.func(f).block;
    let root = hir.root;
    let (dst, top) = hir.copy_block_deep(src, Some(root), BlockOwner::Stmt, None);
    assert_eq!(top.len(), 1);
    assert_eq!(hir.stmt(top[0]).kind, StmtKind::If);
    let inner = hir.stmt(top[0]).sub_block.expect("if body copied");
    assert_eq!(hir.block(inner).stmts.len(), 1);
    // The copied parameter is a fresh variable in the new block.
    assert_eq!(hir.block(dst).vars.len(), 1);
    assert_ne!(hir.block(dst).vars[0], hir.block(src).vars[0]);
}

#[test]
fn killing_a_template_unbinds_its_constructor() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("Gone", FuncKind::Constructor, &["self"]);
    b.end_function();
    let mut hir = b.finish();
    let template = hir.new_template(ctor, 16);
    let class = hir.instantiate_class(template);
    hir.kill_template(template);
    assert!(hir.template(template).dead);
    assert!(hir.class(class).dead);
    assert!(hir.func(ctor).dead);
    let name = hir.interner.get("Gone").unwrap();
    assert!(hir.find_ident(hir.root, name).is_none());
}
