//! Post-binding access refinement.
//!
//! Later passes discover more specific class types for values that bound
//! as nullable placeholders (a `null(T)` default filled in by a concrete
//! assignment downstream). `refine_access` narrows the variable, tuple
//! field, or array element reachable from an assignment target.
//!
//! Policy: refinement is a narrowing overwrite, not a unification. A
//! nullable class slot may be replaced by a class of the same template;
//! anything else is refused. Refinement runs after the fixpoint and fires
//! no events.

use keel_hir::{ExprId, ExprKind, IdentTarget};
use keel_types::{Term, TypeId};
use tracing::debug;

use crate::state::{BinderState, SigId};

impl BinderState {
    /// Narrow the slot an assignment target names to `value_type`.
    /// Returns whether a slot was rewritten.
    pub fn refine_access(&mut self, sig: SigId, target: ExprId, value_type: TypeId) -> bool {
        match self.hir.expr(target).kind.clone() {
            ExprKind::Ident { .. } | ExprKind::Dot => {
                let Some(var) = self.target_variable(target) else {
                    return false;
                };
                let key = self.var_key(sig, var);
                let Some(&current) = self.var_types.get(&key) else {
                    return false;
                };
                let Some(refined) = self.refine_type(current, value_type) else {
                    return false;
                };
                if refined != current {
                    debug!(var = var.0, "refined access type");
                    self.var_types.insert(key, refined);
                }
                true
            }
            ExprKind::Index => {
                let receiver = self.hir.expr(target).children[0];
                let index = self.hir.expr(target).children[1];
                let Some(var) = self.target_variable(receiver) else {
                    return false;
                };
                let key = self.var_key(sig, var);
                let Some(&current) = self.var_types.get(&key) else {
                    return false;
                };
                let refined = match self.types.term(current) {
                    Term::Array(element) => self
                        .refine_type(element, value_type)
                        .map(|e| self.types.array(e)),
                    Term::Tuple(mut fields) => {
                        let position = match self.hir.expr(index).kind {
                            ExprKind::UintLit { value, .. } => value as usize,
                            ExprKind::AutoIntLit { value } if value >= 0 => value as usize,
                            _ => return false,
                        };
                        if position >= fields.len() {
                            return false;
                        }
                        match self.refine_type(fields[position], value_type) {
                            Some(f) => {
                                fields[position] = f;
                                Some(self.types.tuple(fields))
                            }
                            None => None,
                        }
                    }
                    _ => None,
                };
                let Some(refined) = refined else {
                    return false;
                };
                if refined != current {
                    debug!(var = var.0, "refined element type");
                    self.var_types.insert(key, refined);
                }
                true
            }
            _ => false,
        }
    }

    fn target_variable(&self, target: ExprId) -> Option<keel_hir::VarId> {
        let ident = match self.hir.expr(target).kind {
            ExprKind::Ident { .. } => self.hir.expr(target).ident?,
            ExprKind::Dot => {
                let member = self.hir.expr(target).children[1];
                self.hir.expr(member).ident?
            }
            _ => return None,
        };
        match self.hir.ident(ident).target {
            IdentTarget::Var(var) => Some(var),
            _ => None,
        }
    }

    /// A nullable class narrows to a class of the same template; identical
    /// types pass through; everything else refuses.
    fn refine_type(&self, current: TypeId, value: TypeId) -> Option<TypeId> {
        if current == value {
            return Some(current);
        }
        let (Term::Class(from), Term::Class(to)) =
            (self.types.term(current), self.types.term(value))
        else {
            return None;
        };
        if !self.types.nullable(current) {
            return None;
        }
        if self.hir.class(from).template != self.hir.class(to).template {
            return None;
        }
        Some(value)
    }
}
