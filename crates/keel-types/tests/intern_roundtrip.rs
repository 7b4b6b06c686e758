//! Interning round-trips across the public API.

use keel_hir::Hir;
use keel_types::{Term, TypeId, TypeInterner};

#[test]
fn unify_with_self_is_identity() {
    let hir = Hir::new();
    let interner = TypeInterner::new();
    let candidates = [
        TypeId::NONE,
        TypeId::BOOL,
        TypeId::STR,
        interner.uint(1),
        interner.int(63),
        interner.float(32),
        interner.array(interner.uint(8)),
        interner.tuple(vec![TypeId::BOOL, TypeId::STR]),
        interner.funcptr(TypeId::NONE, vec![interner.uint(32)]),
    ];
    for ty in candidates {
        assert_eq!(interner.unify(ty, ty, &hir), Some(ty));
    }
}

#[test]
fn structural_reconstruction_hits_the_same_handle() {
    let interner = TypeInterner::new();
    let a = interner.tuple(vec![interner.uint(32), interner.array(TypeId::STR)]);
    let b = interner.tuple(vec![interner.uint(32), interner.array(TypeId::STR)]);
    assert_eq!(a, b);
    assert_eq!(
        interner.term(a),
        Term::Tuple(vec![interner.uint(32), interner.array(TypeId::STR)])
    );
}

#[test]
fn bit_toggles_round_trip() {
    let interner = TypeInterner::new();
    let base = interner.uint(128);
    let secret = interner.set_secret(base, true).unwrap();
    let back = interner.set_secret(secret, false).unwrap();
    assert_eq!(back, base);
    assert_ne!(secret, base);
}
