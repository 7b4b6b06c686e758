//! Built-in call binding.
//!
//! Functions with `Linkage::Builtin` have no bindable body; their
//! signatures finalize immediately with a result type computed here. The
//! driver may install its own `BuiltinCallBinder` for a richer built-in
//! surface; `DefaultBuiltins` covers the primitive-template methods the
//! engine itself relies on.

use keel_hir::{FuncId, Hir};
use keel_types::{Term, TypeId, TypeInterner};

/// Result-type hook for built-in functions.
///
/// Receives the function and the bound parameter datatypes (`self` first
/// for methods); returns the call's result datatype, or `None` when the
/// built-in rejects those parameter types.
pub trait BuiltinCallBinder {
    fn bind(
        &self,
        hir: &Hir,
        types: &TypeInterner,
        func: FuncId,
        params: &[Option<TypeId>],
    ) -> Option<TypeId>;
}

/// The built-in surface backing the primitive templates: `values`,
/// `length`, `append`, `toString`, `abs`.
pub struct DefaultBuiltins;

impl BuiltinCallBinder for DefaultBuiltins {
    fn bind(
        &self,
        hir: &Hir,
        types: &TypeInterner,
        func: FuncId,
        params: &[Option<TypeId>],
    ) -> Option<TypeId> {
        let name = hir.name(hir.func(func).name);
        let receiver = params.first().copied().flatten();
        match name {
            // Iterator over an array's elements; over a string's bytes.
            "values" => match types.term(receiver?) {
                Term::Array(element) => Some(element),
                Term::String => Some(types.uint(8)),
                _ => None,
            },
            "length" => match types.term(receiver?) {
                Term::Array(_) | Term::String => Some(types.uint(64)),
                _ => None,
            },
            "append" => match types.term(receiver?) {
                Term::Array(element) => {
                    let value = params.get(1).copied().flatten()?;
                    (value == element).then_some(TypeId::NONE)
                }
                _ => None,
            },
            // Generated class `toString` methods land here too.
            "toString" => Some(TypeId::STR),
            "abs" => {
                let ty = receiver?;
                types.term(ty).is_number().then_some(ty)
            }
            _ => None,
        }
    }
}
