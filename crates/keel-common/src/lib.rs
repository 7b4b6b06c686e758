//! Common types and utilities for the keel compiler.
//!
//! This crate provides foundational types used across all keel crates:
//! - String interning (`Atom`, `Interner`)
//! - Source locations (`Loc`)
//! - Structured diagnostics (`Diagnostic`, `Diagnostics`, `ErrorCode`)
//! - Centralized limits and thresholds

// String interning for identifier deduplication
pub mod interner;
pub use interner::{Atom, Interner};

// Source location tracking (line numbers assigned by the parser)
pub mod position;
pub use position::Loc;

// Structured diagnostics
pub mod diagnostics;
pub use diagnostics::{Diagnostic, DiagnosticCategory, Diagnostics, ErrorCode};

// Centralized limits and thresholds
pub mod limits;
