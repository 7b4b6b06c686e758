//! Expression-tree nodes.
//!
//! Expressions are arena nodes with a kind, ordered children, and flags.
//! Datatypes are not stored here; the binder keeps them in side tables so
//! the graph stays purely syntactic.

use keel_common::{Atom, Loc};
use smallvec::SmallVec;

use crate::decl::IdentId;

/// Unique identifier for an expression node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub u32);

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    /// `%`: integer remainder, or the format operator when the left side
    /// is a string.
    Rem,
    /// `**`
    Exp,
    Shl,
    Shr,
    Rotl,
    Rotr,
    BitAnd,
    BitOr,
    BitXor,
    /// `&&`
    And,
    /// `||`
    Or,
    /// `^^`
    LogXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinOp {
    /// Operator-method name for class operand overloads.
    #[must_use]
    pub const fn method_name(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Exp => "**",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Rotl => "<<<",
            BinOp::Rotr => ">>>",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::LogXor => "^^",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Negate,
    BitNot,
    Not,
}

/// Expression node kinds.
///
/// Children are stored in `Expr::children`; the comments note the child
/// layout for kinds that have one.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    /// Integer literal with an explicit unsigned width suffix (`2u32`).
    UintLit { value: u64, width: u16 },
    /// Integer literal with an explicit signed width suffix (`-2i8`).
    IntLit { value: i64, width: u16 },
    /// Integer literal with no suffix; width is chosen by autocast.
    AutoIntLit { value: i64 },
    FloatLit { value: f64, width: u16 },
    BoolLit { value: bool },
    StringLit { value: String },
    /// Random unsigned literal (`rand32`): a secret `uN` value.
    RandUintLit { width: u16 },
    /// An identifier use. `Expr::ident` holds the resolution.
    Ident { name: Atom },
    /// Children: `[lhs, rhs]`.
    Binary { op: BinOp },
    /// Children: `[operand]`.
    Unary { op: UnOp },
    /// Children: `[lhs, rhs]`. `op` is set for the `+=` family.
    Assign { op: Option<BinOp> },
    /// Member access. Children: `[scope, member-ident]`.
    Dot,
    /// `name = value` in an argument list. Children: `[name-ident, value]`.
    NamedParam,
    /// Children: `[callee, args...]`.
    Call,
    /// Template instantiation `T<args...>`. Children: `[template, args...]`.
    TypeInst,
    /// Children: `[receiver, index]`.
    Index,
    /// Children: `[receiver, lower, upper]`.
    Slice,
    /// Children: `[selector, on-true, on-false]`.
    Select,
    /// Modular region `value mod modulus`. Children: `[value, modulus]`.
    Modint,
    /// Children: `[type, value]`.
    Cast,
    /// `null(T)`. Children: `[type]`.
    Null,
    /// `arrayof(T)`. Children: `[type]`.
    Arrayof,
    /// Children: `[value]`.
    Typeof,
    /// Children: `[value]`.
    Widthof,
    /// Children: `[value]`.
    Isnull,
    /// `&f(...)`. Children: `[call]`.
    Funcaddr,
    /// Children are the elements.
    TupleLit,
    /// Children are the elements; element types must be uniform.
    ArrayLit,
    /// A bare expression list (typeswitch case type lists, print
    /// arguments). Children are the entries.
    List,
    /// Primitive type literals, produced by the parser for type positions.
    UintType { width: u16 },
    IntType { width: u16 },
    FloatType { width: u16 },
    StringType,
    BoolType,
    NoneType,
    /// `secret(T)` type expression. Children: `[type]`.
    SecretType,
}

/// An expression-tree node.
#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub children: SmallVec<[ExprId; 2]>,
    pub loc: Loc,
    /// The expression denotes a type, not a value.
    pub is_type: bool,
    /// The expression is an assignment target.
    pub is_lhs: bool,
    /// Storage for values produced here will exist at runtime.
    pub instantiating: bool,
    /// Width-unspecified literal (or expression over such literals) that
    /// may be rewritten in place to match a sibling.
    pub autocast: bool,
    /// Compile-time constant.
    pub is_const: bool,
    /// Resolution of an `Ident` expression.
    pub ident: Option<IdentId>,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, children: SmallVec<[ExprId; 2]>, loc: Loc) -> Self {
        let is_const = matches!(
            kind,
            ExprKind::UintLit { .. }
                | ExprKind::IntLit { .. }
                | ExprKind::AutoIntLit { .. }
                | ExprKind::FloatLit { .. }
                | ExprKind::BoolLit { .. }
                | ExprKind::StringLit { .. }
        );
        let is_type = matches!(
            kind,
            ExprKind::UintType { .. }
                | ExprKind::IntType { .. }
                | ExprKind::FloatType { .. }
                | ExprKind::StringType
                | ExprKind::BoolType
                | ExprKind::NoneType
                | ExprKind::SecretType
        );
        Expr {
            kind,
            children,
            loc,
            is_type,
            is_lhs: false,
            instantiating: false,
            autocast: false,
            is_const,
            ident: None,
        }
    }
}
