use keel_hir::builder::ProgramBuilder;
use keel_hir::{FuncKind, Hir};

use crate::{Term, TypeError, TypeId, TypeInterner};

fn empty_hir() -> Hir {
    Hir::new()
}

#[test]
fn interner_pre_registers_fixed_ids() {
    let interner = TypeInterner::new();
    assert_eq!(interner.term(TypeId::NONE), Term::None);
    assert_eq!(interner.term(TypeId::BOOL), Term::Bool);
    assert_eq!(interner.term(TypeId::STR), Term::String);
}

#[test]
fn interner_deduplicates() {
    let interner = TypeInterner::new();
    let a = interner.uint(32);
    let b = interner.uint(32);
    let c = interner.uint(64);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn boundary_widths_are_legal() {
    let interner = TypeInterner::new();
    assert_eq!(interner.term(interner.uint(1)), Term::Uint(1));
    assert_eq!(interner.term(interner.uint(16_384)), Term::Uint(16_384));
    assert_eq!(interner.term(interner.uint(65_535)), Term::Uint(65_535));
}

#[test]
fn secret_bit_changes_identity_and_is_idempotent() {
    let interner = TypeInterner::new();
    let plain = interner.uint(64);
    let secret = interner.set_secret(plain, true).unwrap();
    assert_ne!(plain, secret);
    assert!(interner.secret(secret));
    // set_secret(set_secret(dt, true), true) = set_secret(dt, true)
    assert_eq!(interner.set_secret(secret, true).unwrap(), secret);
    assert_eq!(interner.set_secret(secret, false).unwrap(), plain);
}

#[test]
fn secret_rejected_on_object_references() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("P", FuncKind::Constructor, &["self"]);
    b.end_function();
    let template = b.hir_mut().new_template(ctor, 32);
    let class = b.hir_mut().instantiate_class(template);
    let _hir = b.finish();

    let interner = TypeInterner::new();
    let class_ty = interner.class(class);
    let template_ty = interner.template(template);
    assert_eq!(
        interner.set_secret(class_ty, true),
        Err(TypeError::SecretObject)
    );
    assert_eq!(
        interner.set_secret(template_ty, true),
        Err(TypeError::SecretObject)
    );
}

#[test]
fn nullable_only_on_classes() {
    let interner = TypeInterner::new();
    let uint = interner.uint(8);
    assert_eq!(
        interner.set_nullable(uint, true),
        Err(TypeError::NullableNonClass)
    );
}

#[test]
fn unify_is_reflexive() {
    let hir = empty_hir();
    let interner = TypeInterner::new();
    let a = interner.array(interner.uint(32));
    assert_eq!(interner.unify(a, a, &hir), Some(a));
}

#[test]
fn unify_joins_secret_bits() {
    let hir = empty_hir();
    let interner = TypeInterner::new();
    let plain = interner.uint(32);
    let secret = interner.set_secret(plain, true).unwrap();
    assert_eq!(interner.unify(plain, secret, &hir), Some(secret));
}

#[test]
fn unify_recurses_through_tuples() {
    let hir = empty_hir();
    let interner = TypeInterner::new();
    let u32_ty = interner.uint(32);
    let secret_u32 = interner.set_secret(u32_ty, true).unwrap();
    let a = interner.tuple(vec![u32_ty, TypeId::STR]);
    let b = interner.tuple(vec![secret_u32, TypeId::STR]);
    let joined = interner.unify(a, b, &hir).unwrap();
    let Term::Tuple(fields) = interner.term(joined) else {
        panic!("expected tuple");
    };
    assert_eq!(fields, vec![secret_u32, TypeId::STR]);
}

#[test]
fn unify_rejects_width_mismatch() {
    let hir = empty_hir();
    let interner = TypeInterner::new();
    assert_eq!(interner.unify(interner.uint(8), interner.uint(16), &hir), None);
    assert_eq!(interner.unify(interner.uint(8), interner.int(8), &hir), None);
}

#[test]
fn unify_widens_class_nullability() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("L", FuncKind::Constructor, &["self"]);
    b.end_function();
    let template = b.hir_mut().new_template(ctor, 32);
    let class = b.hir_mut().instantiate_class(template);
    let hir = b.finish();

    let interner = TypeInterner::new();
    let class_ty = interner.class(class);
    let nullable = interner.set_nullable(class_ty, true).unwrap();
    assert_eq!(interner.unify(class_ty, nullable, &hir), Some(nullable));
}

#[test]
fn unify_joins_distinct_classes_of_one_template_via_nullable() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("L", FuncKind::Constructor, &["self", "v"]);
    b.template_param(ctor, 1);
    b.end_function();
    let template = b.hir_mut().new_template(ctor, 32);
    let c1 = b.hir_mut().instantiate_class(template);
    let c2 = b.hir_mut().instantiate_class(template);
    let hir = b.finish();

    let interner = TypeInterner::new();
    let t1 = interner.class(c1);
    let t2_nullable = interner
        .set_nullable(interner.class(c2), true)
        .unwrap();
    // The instantiated side's class wins; the join is nullable.
    let joined = interner.unify(t1, t2_nullable, &hir).unwrap();
    assert_eq!(interner.term(joined), Term::Class(c1));
    assert!(interner.nullable(joined));
    // Two non-nullable distinct classes do not join.
    assert_eq!(interner.unify(t1, interner.class(c2), &hir), None);
}

#[test]
fn concreteness_sees_through_structure() {
    let mut b = ProgramBuilder::new();
    let ctor = b.begin_function("P", FuncKind::Constructor, &["self"]);
    b.end_function();
    let template = b.hir_mut().new_template(ctor, 32);
    let class = b.hir_mut().instantiate_class(template);
    let _hir = b.finish();

    let interner = TypeInterner::new();
    assert!(interner.is_concrete(interner.uint(32)));
    assert!(interner.is_concrete(interner.class(class)));
    let template_ty = interner.template(template);
    assert!(!interner.is_concrete(template_ty));
    assert!(!interner.is_concrete(interner.array(template_ty)));
    assert!(!interner.is_concrete(interner.tuple(vec![TypeId::BOOL, template_ty])));
}

#[test]
fn find_template_maps_primitives_to_builtins() {
    let b = ProgramBuilder::with_builtins();
    let hir = b.finish();
    let interner = TypeInterner::new();
    assert_eq!(
        interner.find_template(interner.array(TypeId::STR), &hir),
        hir.builtins.array
    );
    assert_eq!(interner.find_template(interner.uint(32), &hir), hir.builtins.uint);
    assert_eq!(interner.find_template(TypeId::STR, &hir), hir.builtins.string);
    assert_eq!(interner.find_template(TypeId::NONE, &hir), None);
}

#[test]
fn display_renders_bits_and_structure() {
    let hir = empty_hir();
    let interner = TypeInterner::new();
    let u8_ty = interner.uint(8);
    assert_eq!(interner.display(u8_ty, &hir), "u8");
    let secret = interner.set_secret(interner.uint(64), true).unwrap();
    assert_eq!(interner.display(secret, &hir), "secret u64");
    let tuple = interner.tuple(vec![interner.uint(32), TypeId::STR]);
    assert_eq!(interner.display(tuple, &hir), "(u32, string)");
    assert_eq!(
        interner.display(interner.array(u8_ty), &hir),
        "[u8]"
    );
}
