//! Core datatype definitions.

use keel_common::Atom;
use keel_hir::{ClassId, ExprId, FuncId, TemplateId};

/// Unique identifier for an interned datatype.
///
/// Interning guarantees `a == b` iff the datatypes are structurally equal
/// with equal `secret`/`nullable` bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// Pre-registered: the `none` datatype (statement results, functions
    /// with no return value).
    pub const NONE: TypeId = TypeId(0);
    /// Pre-registered: `bool`.
    pub const BOOL: TypeId = TypeId(1);
    /// Pre-registered: `string`.
    pub const STR: TypeId = TypeId(2);
}

/// The structural part of a datatype.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Term {
    None,
    Bool,
    String,
    /// Unsigned integer of the given bit width (1..=65535).
    Uint(u16),
    Int(u16),
    Float(u16),
    /// Modular integer; the modulus is a bound expression.
    Modint(ExprId),
    Array(TypeId),
    Tuple(Vec<TypeId>),
    /// Struct function with its ordered named fields.
    Struct(FuncId, Vec<(Atom, TypeId)>),
    /// The nominal value type of an enum entry.
    Enumclass(FuncId),
    /// The underlying integer-convertible enum type.
    Enum(FuncId),
    /// A function referred to by name.
    Function(FuncId),
    /// The family of classes of a template.
    Template(TemplateId),
    /// One specific instantiation.
    Class(ClassId),
    /// Function pointer: return type, then parameter types.
    Funcptr(TypeId, Vec<TypeId>),
    /// A transformer expression value.
    Expr,
}

impl Term {
    /// Integer terms (modint included).
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Term::Uint(_) | Term::Int(_) | Term::Modint(_))
    }

    /// Terms the arithmetic rules treat as numbers.
    #[must_use]
    pub fn is_number(&self) -> bool {
        self.is_integer() || matches!(self, Term::Float(_))
    }

    /// Bit width of a numeric term, if it has a fixed one.
    #[must_use]
    pub fn width(&self) -> Option<u16> {
        match self {
            Term::Uint(w) | Term::Int(w) | Term::Float(w) => Some(*w),
            _ => None,
        }
    }
}

/// Interning key: the structural term plus the two orthogonal bits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeKey {
    pub term: Term,
    pub secret: bool,
    pub nullable: bool,
}

impl TypeKey {
    #[must_use]
    pub fn plain(term: Term) -> Self {
        TypeKey {
            term,
            secret: false,
            nullable: false,
        }
    }
}
