//! Program graph (HIR) for the keel compiler.
//!
//! This crate provides the arena-backed mutable program graph the binder
//! operates on:
//! - `Hir` - the graph itself, with typed arenas and mutation primitives
//! - Entity definitions: blocks, functions, templates, classes, variables,
//!   idents, statements, expressions, relations
//! - Scope resolution with class-block and package augmentations
//! - Deep block copy with identifier re-pointing
//! - `builder::ProgramBuilder` - construction API for drivers and tests

pub mod decl;
pub mod expr;
pub mod hir;
pub mod stmt;

pub mod copy;
mod scope;

pub mod builder;

pub use copy::Substitution;
pub use decl::{
    Class, ClassId, FuncId, FuncKind, Function, Ident, IdentId, IdentTarget, Linkage, Relation,
    RelationId, Template, TemplateId, VarId, VarKind, Variable,
};
pub use expr::{BinOp, Expr, ExprId, ExprKind, UnOp};
pub use hir::{Block, BlockId, BlockOwner, BuiltinTemplates, Hir};
pub use stmt::{Statement, StmtId, StmtKind};
