//! Structured diagnostics for the binder.
//!
//! Diagnostics are plain values accumulated in a `Diagnostics` buffer and
//! returned to the driver at the end of the run. Each carries a source
//! location, an error code, a message, and optional related locations
//! (call-chain context from signature creation sites).

use crate::position::Loc;
use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum DiagnosticCategory {
    Warning,
    Error,
}

/// Stable error codes, one per error kind the binder can produce.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    /// Format-string errors, literal overflow, bad escapes.
    SyntaxAtBindTime,
    /// Unification failure.
    TypeMismatch,
    /// An undefined-identifier event survived drain.
    UndefinedIdentifier,
    /// A variable event survived drain.
    UndeterminedType,
    /// A signature event survived drain.
    UndeterminedReturn,
    /// Operator on invalid types with no user overload.
    OverloadResolutionFailure,
    /// A variable or return-type constraint does not match.
    ConstraintViolation,
    /// Assignment to a const variable.
    ConstWrite,
    /// Cast not in the permitted matrix.
    BadCast,
    /// Secret taint misuse: secret object reference, secret index,
    /// or a cast that changes secrecy.
    BadSecrecy,
    /// Template used where a concrete class is required, bad argument
    /// counts, and similar.
    TemplateMisuse,
    /// Assertion failure inside the binder.
    Internal,
}

impl ErrorCode {
    /// Numeric code for machine-readable output.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            ErrorCode::SyntaxAtBindTime => 1001,
            ErrorCode::TypeMismatch => 1002,
            ErrorCode::UndefinedIdentifier => 1003,
            ErrorCode::UndeterminedType => 1004,
            ErrorCode::UndeterminedReturn => 1005,
            ErrorCode::OverloadResolutionFailure => 1006,
            ErrorCode::ConstraintViolation => 1007,
            ErrorCode::ConstWrite => 1008,
            ErrorCode::BadCast => 1009,
            ErrorCode::BadSecrecy => 1010,
            ErrorCode::TemplateMisuse => 1011,
            ErrorCode::Internal => 1099,
        }
    }

    /// Whether this error aborts the run immediately.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, ErrorCode::Internal)
    }
}

/// A related location attached to a diagnostic (e.g. one frame of the
/// call chain leading to the signature being bound).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedInformation {
    pub loc: Loc,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub category: DiagnosticCategory,
    pub code: ErrorCode,
    pub loc: Loc,
    pub message: String,
    pub related: Vec<RelatedInformation>,
}

impl Diagnostic {
    pub fn error(loc: Loc, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            category: DiagnosticCategory::Error,
            code,
            loc,
            message: message.into(),
            related: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_related(mut self, loc: Loc, message: impl Into<String>) -> Self {
        self.related.push(RelatedInformation {
            loc,
            message: message.into(),
        });
        self
    }

    /// Attach one call-chain frame: "specialized from the call at line N".
    #[must_use]
    pub fn with_call_site(self, loc: Loc, callee: &str) -> Self {
        let message = format!("in specialization of `{callee}`");
        self.with_related(loc, message)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: error[{}]: {}", self.loc, self.code.code(), self.message)?;
        for rel in &self.related {
            write!(f, "\n  {}: {}", rel.loc, rel.message)?;
        }
        Ok(())
    }
}

/// Accumulating diagnostic sink.
///
/// The binder reports recoverable errors here and keeps going; the driver
/// drains the buffer at the end of the run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    buffer: Vec<Diagnostic>,
}

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, diag: Diagnostic) {
        self.buffer.push(diag);
    }

    pub fn error(&mut self, loc: Loc, code: ErrorCode, message: impl Into<String>) {
        self.report(Diagnostic::error(loc, code, message));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.buffer.iter()
    }

    /// Drain the buffer, leaving it empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_display_includes_related() {
        let d = Diagnostic::error(Loc::new(3), ErrorCode::TypeMismatch, "u32 vs string")
            .with_call_site(Loc::new(10), "f");
        let text = d.to_string();
        assert!(text.contains("line 3"));
        assert!(text.contains("1002"));
        assert!(text.contains("specialization of `f`"));
    }

    #[test]
    fn codes_are_unique() {
        let codes = [
            ErrorCode::SyntaxAtBindTime,
            ErrorCode::TypeMismatch,
            ErrorCode::UndefinedIdentifier,
            ErrorCode::UndeterminedType,
            ErrorCode::UndeterminedReturn,
            ErrorCode::OverloadResolutionFailure,
            ErrorCode::ConstraintViolation,
            ErrorCode::ConstWrite,
            ErrorCode::BadCast,
            ErrorCode::BadSecrecy,
            ErrorCode::TemplateMisuse,
            ErrorCode::Internal,
        ];
        let mut seen: Vec<u32> = codes.iter().map(|c| c.code()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), codes.len());
    }

    #[test]
    fn diagnostics_serialize() {
        let mut sink = Diagnostics::new();
        sink.error(Loc::new(1), ErrorCode::BadCast, "no such cast");
        let json = serde_json::to_string(&sink.take()).unwrap();
        assert!(json.contains("BadCast"));
    }
}
