//! Unification: the central join on datatypes.
//!
//! `unify(a, b)` returns the unique common refinement of two datatypes, or
//! `None` on mismatch. The `secret` and `nullable` bits join by OR;
//! structured terms join elementwise; classes of the same template join to
//! the nullable class when exactly one side is nullable.

use keel_hir::Hir;

use crate::intern::TypeInterner;
use crate::type_def::{Term, TypeId};

impl TypeInterner {
    /// Join two datatypes. Identity is the fast path; the slow paths
    /// rebuild the joined term and re-intern it.
    #[must_use]
    pub fn unify(&self, a: TypeId, b: TypeId, hir: &Hir) -> Option<TypeId> {
        if a == b {
            return Some(a);
        }
        let ka = self.lookup(a).expect("valid type id");
        let kb = self.lookup(b).expect("valid type id");
        let secret = ka.secret || kb.secret;
        let nullable = ka.nullable || kb.nullable;

        // Equal modulo bits: the join is the term with the bits OR'd.
        if ka.term == kb.term {
            return Some(self.with_bits(ka.term, secret, nullable));
        }

        let term = match (&ka.term, &kb.term) {
            (Term::Array(x), Term::Array(y)) => {
                let elem = self.unify(*x, *y, hir)?;
                Term::Array(elem)
            }
            (Term::Tuple(xs), Term::Tuple(ys)) => {
                if xs.len() != ys.len() {
                    return None;
                }
                let fields = xs
                    .iter()
                    .zip(ys)
                    .map(|(&x, &y)| self.unify(x, y, hir))
                    .collect::<Option<Vec<_>>>()?;
                Term::Tuple(fields)
            }
            (Term::Struct(f, xs), Term::Struct(g, ys)) => {
                if f != g || xs.len() != ys.len() {
                    return None;
                }
                let fields = xs
                    .iter()
                    .zip(ys)
                    .map(|(&(name, x), &(other, y))| {
                        if name != other {
                            return None;
                        }
                        Some((name, self.unify(x, y, hir)?))
                    })
                    .collect::<Option<Vec<_>>>()?;
                Term::Struct(*f, fields)
            }
            (Term::Funcptr(r1, p1), Term::Funcptr(r2, p2)) => {
                if p1.len() != p2.len() {
                    return None;
                }
                let ret = self.unify(*r1, *r2, hir)?;
                let params = p1
                    .iter()
                    .zip(p2)
                    .map(|(&x, &y)| self.unify(x, y, hir))
                    .collect::<Option<Vec<_>>>()?;
                Term::Funcptr(ret, params)
            }
            // Distinct classes of one template join only when exactly one
            // side is nullable; the instantiated (non-nullable) side wins
            // and the join is nullable.
            (Term::Class(c1), Term::Class(c2)) => {
                if hir.class(*c1).template != hir.class(*c2).template {
                    return None;
                }
                match (ka.nullable, kb.nullable) {
                    (true, false) => Term::Class(*c2),
                    (false, true) => Term::Class(*c1),
                    _ => return None,
                }
            }
            _ => return None,
        };
        Some(self.with_bits(term, secret, nullable))
    }

    /// Equivalence modulo the `secret` bit, as the relational operators
    /// require.
    #[must_use]
    pub fn equal_modulo_secret(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        let ka = self.lookup(a).expect("valid type id");
        let kb = self.lookup(b).expect("valid type id");
        ka.term == kb.term && ka.nullable == kb.nullable
    }
}
