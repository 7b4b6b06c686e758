//! Statement nodes.

use keel_common::Loc;

use crate::expr::ExprId;
use crate::hir::BlockId;

/// Unique identifier for a statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub u32);

/// Statement kinds.
///
/// The root expression and optional sub-block live on `Statement`; the
/// comments note what each kind keeps in them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StmtKind {
    /// Expression is an `Assign` expression.
    Assign,
    /// Expression is a `Call` expression evaluated for effect.
    Call,
    /// Expression is the condition; sub-block is the body.
    If,
    ElseIf,
    /// Sub-block only.
    Else,
    /// Expression is the scrutinee; sub-block holds `Case`/`Default`.
    Switch,
    /// Expression is a `List` of values (switch) or types (typeswitch);
    /// sub-block is the body.
    Case,
    /// Sub-block only.
    Default,
    /// Expression is the scrutinee; sub-block holds `Case`/`Default` with
    /// type lists.
    Typeswitch,
    While,
    Do,
    /// Expression is a `List` of `[init, cond, step]` expressions.
    For,
    /// Expression is the iterand; the loop variable is the sub-block's
    /// first variable.
    Foreach,
    Return,
    Yield,
    /// Expression is a `List` of printable arguments.
    Print,
    Println,
    Assert,
    Panic,
    /// Expression is a `List`; the first argument must be an enum value.
    Raise,
    Try,
    Except,
    /// Transformer body: code to append at the destination. Expression is
    /// an optional destination path; sub-block is the code.
    AppendCode,
    PrependCode,
    /// Expression is a call to a relation-registering transformer.
    Relation,
    /// Expression is a call to a plain transformer.
    Transform,
    Ref,
    Unref,
    Import,
    ImportLib,
    ImportRpc,
    Use,
}

/// A statement in a block.
#[derive(Clone, Debug)]
pub struct Statement {
    pub kind: StmtKind,
    pub block: BlockId,
    pub expr: Option<ExprId>,
    pub sub_block: Option<BlockId>,
    pub loc: Loc,
    /// Typeswitch case selection: set on the case chosen for the bound
    /// scrutinee type.
    pub instantiated: bool,
    pub dead: bool,
}
