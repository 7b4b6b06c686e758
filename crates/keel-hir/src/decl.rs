//! Declaration entities: functions, templates, classes, variables, idents,
//! and relations.

use keel_common::{Atom, Loc};

use crate::hir::BlockId;
use crate::expr::ExprId;
use crate::stmt::StmtId;

/// Unique identifier for a function in the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

/// Unique identifier for a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

/// Unique identifier for an ident (a name bound in a block).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentId(pub u32);

/// Unique identifier for a template.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(pub u32);

/// Unique identifier for a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Unique identifier for a relation between two templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(pub u32);

/// What a function is, syntactically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuncKind {
    Plain,
    Constructor,
    Destructor,
    Iterator,
    Operator,
    Struct,
    Enum,
    Module,
    Package,
    Transformer,
    Final,
}

/// How a function is linked and called.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    Module,
    Package,
    Libcall,
    ExternC,
    ExternRpc,
    Rpc,
    Builtin,
}

/// A named callable with a sub-block for its body.
///
/// Parameters are the leading prefix of the sub-block's variables
/// (`num_params` of them).
#[derive(Clone, Debug)]
pub struct Function {
    pub name: Atom,
    pub kind: FuncKind,
    pub linkage: Linkage,
    pub block: BlockId,
    /// Type-constraint expression for the return type, if declared.
    pub ret_constraint: Option<ExprId>,
    /// Number of leading parameter variables in `block`.
    pub num_params: u32,
    /// Set when this function is a template-instantiable constructor.
    pub template: Option<TemplateId>,
    pub loc: Loc,
    pub dead: bool,
}

/// Marks a constructor as template-instantiable and owns its classes.
#[derive(Clone, Debug)]
pub struct Template {
    pub constructor: FuncId,
    /// Reference width for class handles, in bits (1..=64).
    pub ref_width: u32,
    pub classes: Vec<ClassId>,
    pub dead: bool,
}

/// A concrete instantiation of a template.
///
/// Owns a sub-block copied from the constructor's block; methods resolve
/// identifiers through it.
#[derive(Clone, Debug)]
pub struct Class {
    pub template: TemplateId,
    pub block: BlockId,
    /// True once a constructor signature has been created for this class.
    /// Classes reached only through type instantiation expressions stay
    /// uninstantiated and are garbage-collected with their template.
    pub instantiated: bool,
    pub dead: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Parameter,
    Local,
    GlobalArray,
    EnumEntry,
}

/// A named storage slot owned by a block.
#[derive(Clone, Debug)]
pub struct Variable {
    pub name: Atom,
    pub kind: VarKind,
    pub block: BlockId,
    /// Initializer / default-value expression.
    pub init: Option<ExprId>,
    /// Type-constraint expression (`x: T = v`).
    pub type_constraint: Option<ExprId>,
    pub is_const: bool,
    /// Carries a type rather than a value.
    pub is_type: bool,
    /// Storage will exist at runtime. Monotone: once set, stays set.
    pub instantiated: bool,
    /// Constructor parameters only: participates in class identity.
    pub in_class_signature: bool,
    pub loc: Loc,
}

/// What a name in a block is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentTarget {
    Var(VarId),
    Func(FuncId),
    Undefined,
}

/// A name bound inside a block.
///
/// `uses` holds back-references to the identifier expressions that resolved
/// through this ident, so that later definition (or renaming) can find them.
#[derive(Clone, Debug)]
pub struct Ident {
    pub name: Atom,
    pub block: BlockId,
    pub target: IdentTarget,
    pub uses: Vec<ExprId>,
}

/// A generator-established relation between two templates.
///
/// Injected statements and functions are registered here so that template
/// garbage collection can remove them together with the relation.
#[derive(Clone, Debug)]
pub struct Relation {
    pub parent: TemplateId,
    pub child: TemplateId,
    pub label: Atom,
    pub cascade_delete: bool,
    pub injected_stmts: Vec<StmtId>,
    pub injected_funcs: Vec<FuncId>,
    pub dead: bool,
}
