//! Transformer execution: compile-time evaluation, code injection with
//! textual substitution, relation registration, and garbage collection.

use keel_binder::BinderState;
use keel_hir::builder::ProgramBuilder;
use keel_hir::{FuncKind, IdentTarget};

fn bind_ok(b: ProgramBuilder) -> BinderState {
    let mut state = BinderState::new(b.finish());
    if let Err(diags) = state.bind() {
        panic!("unexpected diagnostics: {diags:?}");
    }
    state
}

#[test]
fn transform_injects_substituted_code_into_the_caller() {
    let mut b = ProgramBuilder::new();
    // transformer addCounter(prefix) { appendcode { $prefix$_count = 0u32 } }
    b.begin_function("addCounter", FuncKind::Transformer, &["prefix"]);
    b.begin_appendcode(None);
    let zero = b.uint_lit(0, 32);
    b.assign_var_stmt("$prefix$_count", zero);
    b.end_block();
    b.end_function();
    // transform addCounter("hit")
    let callee = b.ident_expr("addCounter");
    let prefix = b.string_lit("hit");
    let call = b.call(callee, &[prefix]);
    b.transform_stmt(call);

    let state = bind_ok(b);
    let root = state.hir.root;
    let name = state
        .hir
        .interner
        .get("hit_count")
        .expect("substituted name interned");
    let ident = state
        .hir
        .find_ident(root, name)
        .expect("injected assignment defined the variable");
    let IdentTarget::Var(var) = state.hir.ident(ident).target else {
        panic!("expected a variable");
    };
    let main = state.main_sig().unwrap();
    assert_eq!(state.var_type(main, var), Some(state.types.uint(32)));
}

#[test]
fn relation_injects_methods_reachable_from_class_instances() {
    let mut b = ProgramBuilder::new();
    // class Node(self, v)
    let node_ctor = b.begin_function("Node", FuncKind::Constructor, &["self", "v"]);
    b.template_param(node_ctor, 1);
    let self1 = b.ident_expr("self");
    let dot_v = b.dot(self1, "v");
    let v = b.ident_expr("v");
    b.assign_stmt(dot_v, v);
    b.end_function();
    let node = b.make_template(node_ctor, 32);
    // class Listed(self)
    let listed_ctor = b.begin_function("Listed", FuncKind::Constructor, &["self"]);
    b.end_function();
    let listed = b.make_template(listed_ctor, 32);
    // transformer linked(parent, child, label) {
    //     appendcode Node { mark(self) { return 1u32 } }
    // }
    b.begin_function("linked", FuncKind::Transformer, &["parent", "child", "label"]);
    let dest = b.ident_expr("Node");
    b.begin_appendcode(Some(dest));
    b.begin_function("mark", FuncKind::Plain, &["self"]);
    let one = b.uint_lit(1, 32);
    b.return_stmt(Some(one));
    b.end_function();
    b.end_block();
    b.end_function();
    // relation linked(Node, Listed, "owner")
    let callee = b.ident_expr("linked");
    let parent_arg = b.ident_expr("Node");
    let child_arg = b.ident_expr("Listed");
    let label = b.string_lit("owner");
    let rel_call = b.call(callee, &[parent_arg, child_arg, label]);
    b.relation_stmt(rel_call);
    // n = Node(5u32); m = n.mark()
    let ctor_use = b.ident_expr("Node");
    let five = b.uint_lit(5, 32);
    let new_node = b.call(ctor_use, &[five]);
    b.assign_var_stmt("n", new_node);
    let n = b.ident_expr("n");
    let mark_call = b.method_call(n, "mark", &[]);
    b.assign_var_stmt("m", mark_call);
    // keep Listed alive
    let listed_use = b.ident_expr("Listed");
    let new_listed = b.call(listed_use, &[]);
    b.assign_var_stmt("l", new_listed);

    let state = bind_ok(b);
    // The relation record links the two templates.
    let relation = state
        .hir
        .relations()
        .next()
        .map(|(_, r)| (r.parent, r.child))
        .expect("relation registered");
    assert_eq!(relation, (node, listed));
    // The injected method bound through the class instance.
    let main = state.main_sig().unwrap();
    assert_eq!(state.expr_type(main, mark_call), Some(state.types.uint(32)));
}

#[test]
fn unused_template_is_garbage_collected() {
    let mut b = ProgramBuilder::new();
    let unused_ctor = b.begin_function("Unused", FuncKind::Constructor, &["self"]);
    b.end_function();
    let unused = b.make_template(unused_ctor, 32);
    let used_ctor = b.begin_function("Used", FuncKind::Constructor, &["self"]);
    b.end_function();
    let used = b.make_template(used_ctor, 32);
    let callee = b.ident_expr("Used");
    let call = b.call(callee, &[]);
    b.assign_var_stmt("u", call);

    let state = bind_ok(b);
    assert!(state.hir.template(unused).dead);
    assert!(state.hir.func(unused_ctor).dead);
    assert!(!state.hir.template(used).dead);
}

#[test]
fn cascade_relation_collects_the_child_template() {
    let mut b = ProgramBuilder::new();
    let parent_ctor = b.begin_function("Parent", FuncKind::Constructor, &["self"]);
    b.end_function();
    let parent = b.make_template(parent_ctor, 32);
    let child_ctor = b.begin_function("Child", FuncKind::Constructor, &["self"]);
    b.end_function();
    let child = b.make_template(child_ctor, 32);
    // An empty transformer that only registers the relation.
    b.begin_function("owns", FuncKind::Transformer, &["parent", "child", "cascade"]);
    b.end_function();
    let callee = b.ident_expr("owns");
    let parent_arg = b.ident_expr("Parent");
    let child_arg = b.ident_expr("Child");
    let cascade = b.bool_lit(true);
    let rel_call = b.call(callee, &[parent_arg, child_arg, cascade]);
    b.relation_stmt(rel_call);
    // Child is instantiated, Parent is not: collecting Parent cascades
    // through the relation and collects Child too.
    let child_use = b.ident_expr("Child");
    let new_child = b.call(child_use, &[]);
    b.assign_var_stmt("c", new_child);

    let state = bind_ok(b);
    assert!(state.hir.template(parent).dead);
    assert!(state.hir.template(child).dead);
}

#[test]
fn labels_expand_uniquely_per_execution() {
    let mut b = ProgramBuilder::new();
    // Each execution of the transformer gets a distinct `$L` label.
    b.begin_function("emit", FuncKind::Transformer, &["tag"]);
    b.begin_appendcode(None);
    let one = b.uint_lit(1, 8);
    b.assign_var_stmt("$Lflag_$tag", one);
    b.end_block();
    b.end_function();
    let c1 = b.ident_expr("emit");
    let a_tag = b.string_lit("a");
    let call1 = b.call(c1, &[a_tag]);
    b.transform_stmt(call1);
    let c2 = b.ident_expr("emit");
    let b_tag = b.string_lit("b");
    let call2 = b.call(c2, &[b_tag]);
    b.transform_stmt(call2);

    let state = bind_ok(b);
    let names: Vec<&str> = ["L1flag_a", "L2flag_b"]
        .iter()
        .copied()
        .filter(|n| state.hir.interner.get(n).is_some())
        .collect();
    assert_eq!(names.len(), 2, "both labeled variables were injected");
}
