//! Type-binding engine for the keel compiler.
//!
//! The binder drives a fully-parsed, mutable program graph to a fixpoint in
//! which every reachable expression has a datatype, every instantiated
//! function has a specialized signature, and every instantiated template
//! has a concrete class.
//!
//! This crate provides:
//! - `BinderState` - the engine: signature table, binding queue, events
//! - The expression binder and statement post-processor
//! - The transformer executor for relation/transform statements
//! - The compile-time value evaluator and format-string checker
//! - `BuiltinCallBinder` - the hook for built-in function result types

pub mod builtins;
pub mod eval;
pub mod format;

mod state;
mod state_call_binding;
mod state_expr_binding;
mod state_refine;
mod state_resolution;
mod state_scheduling;
mod state_signatures;
mod state_statement_binding;
mod state_transform;

pub use builtins::{BuiltinCallBinder, DefaultBuiltins};
pub use eval::Value;
pub use state::{
    Binding, BindingId, BindingKind, Event, EventId, EventKind, Paramspec, SigId, Signature,
    BinderState,
};

#[cfg(test)]
mod state_tests;
