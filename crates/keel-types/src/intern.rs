//! The datatype interner.
//!
//! Construction goes through kind-specific methods that return interned
//! handles; `lookup` recovers the key. Interior mutability keeps the
//! construction API `&self` so the binder can intern while holding graph
//! borrows; the engine is single-threaded.

use std::cell::RefCell;

use keel_hir::{ClassId, ExprId, FuncId, Hir, TemplateId};
use keel_common::Atom;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::type_def::{Term, TypeId, TypeKey};

/// Errors from datatype construction and bit manipulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeError {
    /// Object/class/template datatypes may not be marked secret.
    SecretObject,
    /// `nullable` applies only to class datatypes.
    NullableNonClass,
}

#[derive(Default)]
struct Store {
    entries: Vec<TypeKey>,
    index: FxHashMap<TypeKey, TypeId>,
}

/// Hash-consing store for datatypes.
pub struct TypeInterner {
    store: RefCell<Store>,
}

impl TypeInterner {
    #[must_use]
    pub fn new() -> Self {
        let interner = TypeInterner {
            store: RefCell::new(Store::default()),
        };
        // Pre-register the fixed ids.
        let none = interner.intern(TypeKey::plain(Term::None));
        let bool_ = interner.intern(TypeKey::plain(Term::Bool));
        let string = interner.intern(TypeKey::plain(Term::String));
        debug_assert_eq!(none, TypeId::NONE);
        debug_assert_eq!(bool_, TypeId::BOOL);
        debug_assert_eq!(string, TypeId::STR);
        interner
    }

    fn intern(&self, key: TypeKey) -> TypeId {
        let mut store = self.store.borrow_mut();
        if let Some(&id) = store.index.get(&key) {
            return id;
        }
        let id = TypeId(store.entries.len() as u32);
        store.entries.push(key.clone());
        store.index.insert(key, id);
        trace!(id = id.0, "interned datatype");
        id
    }

    /// Recover the key for an id.
    #[must_use]
    pub fn lookup(&self, id: TypeId) -> Option<TypeKey> {
        self.store.borrow().entries.get(id.0 as usize).cloned()
    }

    /// The structural term for an id.
    #[must_use]
    pub fn term(&self, id: TypeId) -> Term {
        self.store.borrow().entries[id.0 as usize].term.clone()
    }

    #[must_use]
    pub fn secret(&self, id: TypeId) -> bool {
        self.store.borrow().entries[id.0 as usize].secret
    }

    #[must_use]
    pub fn nullable(&self, id: TypeId) -> bool {
        self.store.borrow().entries[id.0 as usize].nullable
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.borrow().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.borrow().entries.is_empty()
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    #[must_use]
    pub fn none(&self) -> TypeId {
        TypeId::NONE
    }

    #[must_use]
    pub fn bool_ty(&self) -> TypeId {
        TypeId::BOOL
    }

    #[must_use]
    pub fn string_ty(&self) -> TypeId {
        TypeId::STR
    }

    #[must_use]
    pub fn uint(&self, width: u16) -> TypeId {
        assert!(width >= 1, "integer width must be at least 1");
        self.intern(TypeKey::plain(Term::Uint(width)))
    }

    #[must_use]
    pub fn int(&self, width: u16) -> TypeId {
        assert!(width >= 1, "integer width must be at least 1");
        self.intern(TypeKey::plain(Term::Int(width)))
    }

    #[must_use]
    pub fn float(&self, width: u16) -> TypeId {
        self.intern(TypeKey::plain(Term::Float(width)))
    }

    #[must_use]
    pub fn modint(&self, modulus: ExprId) -> TypeId {
        self.intern(TypeKey::plain(Term::Modint(modulus)))
    }

    #[must_use]
    pub fn array(&self, element: TypeId) -> TypeId {
        self.intern(TypeKey::plain(Term::Array(element)))
    }

    #[must_use]
    pub fn tuple(&self, fields: Vec<TypeId>) -> TypeId {
        self.intern(TypeKey::plain(Term::Tuple(fields)))
    }

    #[must_use]
    pub fn struct_ty(&self, func: FuncId, fields: Vec<(Atom, TypeId)>) -> TypeId {
        self.intern(TypeKey::plain(Term::Struct(func, fields)))
    }

    #[must_use]
    pub fn enum_ty(&self, func: FuncId) -> TypeId {
        self.intern(TypeKey::plain(Term::Enum(func)))
    }

    #[must_use]
    pub fn enumclass(&self, func: FuncId) -> TypeId {
        self.intern(TypeKey::plain(Term::Enumclass(func)))
    }

    #[must_use]
    pub fn function(&self, func: FuncId) -> TypeId {
        self.intern(TypeKey::plain(Term::Function(func)))
    }

    #[must_use]
    pub fn template(&self, template: TemplateId) -> TypeId {
        self.intern(TypeKey::plain(Term::Template(template)))
    }

    #[must_use]
    pub fn class(&self, class: ClassId) -> TypeId {
        self.intern(TypeKey::plain(Term::Class(class)))
    }

    #[must_use]
    pub fn funcptr(&self, ret: TypeId, params: Vec<TypeId>) -> TypeId {
        self.intern(TypeKey::plain(Term::Funcptr(ret, params)))
    }

    #[must_use]
    pub fn expr_ty(&self) -> TypeId {
        self.intern(TypeKey::plain(Term::Expr))
    }

    // =========================================================================
    // Bits
    // =========================================================================

    /// Return the datatype with the `secret` bit set or cleared.
    ///
    /// Object references cannot be secret: taint applies to values, not to
    /// class, template, or function handles.
    pub fn set_secret(&self, id: TypeId, secret: bool) -> Result<TypeId, TypeError> {
        let key = self.lookup(id).expect("valid type id");
        if secret
            && matches!(
                key.term,
                Term::Class(_) | Term::Template(_) | Term::Function(_)
            )
        {
            return Err(TypeError::SecretObject);
        }
        if key.secret == secret {
            return Ok(id);
        }
        Ok(self.intern(TypeKey { secret, ..key }))
    }

    /// Return the datatype with the `nullable` bit set or cleared.
    pub fn set_nullable(&self, id: TypeId, nullable: bool) -> Result<TypeId, TypeError> {
        let key = self.lookup(id).expect("valid type id");
        if nullable && !matches!(key.term, Term::Class(_)) {
            return Err(TypeError::NullableNonClass);
        }
        if key.nullable == nullable {
            return Ok(id);
        }
        Ok(self.intern(TypeKey { nullable, ..key }))
    }

    /// Re-intern a term with explicit bits. Callers guarantee the bits are
    /// legal for the term.
    pub(crate) fn with_bits(&self, term: Term, secret: bool, nullable: bool) -> TypeId {
        self.intern(TypeKey {
            term,
            secret,
            nullable,
        })
    }

    // =========================================================================
    // Structure queries
    // =========================================================================

    /// A datatype is concrete iff no transitively-reachable subterm is a
    /// template. Concreteness gates variable and signature events.
    #[must_use]
    pub fn is_concrete(&self, id: TypeId) -> bool {
        match self.term(id) {
            Term::Template(_) => false,
            Term::Array(e) => self.is_concrete(e),
            Term::Tuple(fields) => fields.iter().all(|&f| self.is_concrete(f)),
            Term::Struct(_, fields) => fields.iter().all(|&(_, f)| self.is_concrete(f)),
            Term::Funcptr(ret, params) => {
                self.is_concrete(ret) && params.iter().all(|&p| self.is_concrete(p))
            }
            _ => true,
        }
    }

    /// The template that built-in typed values originate from, so that
    /// method lookup on primitive receivers works uniformly.
    #[must_use]
    pub fn find_template(&self, id: TypeId, hir: &Hir) -> Option<TemplateId> {
        match self.term(id) {
            Term::Class(c) => Some(hir.class(c).template),
            Term::Template(t) => Some(t),
            Term::Array(_) => hir.builtins.array,
            Term::Uint(_) | Term::Modint(_) => hir.builtins.uint,
            Term::Int(_) => hir.builtins.int,
            Term::Float(_) => hir.builtins.float,
            Term::String => hir.builtins.string,
            Term::Bool => hir.builtins.bool_,
            _ => None,
        }
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}
