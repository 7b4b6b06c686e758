//! Source location tracking.
//!
//! The binder never sees raw source text; the parser assigns a line number
//! to every graph entity and diagnostics point back at those lines. A `Loc`
//! is small (4 bytes) and cheap to copy.

use serde::Serialize;

/// A source location: a 1-based line number assigned by the parser.
///
/// Synthetic entities (transformer-injected statements, generated methods)
/// carry the location of the construct that produced them, or a dummy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Loc {
    pub line: u32,
}

impl Loc {
    #[inline]
    #[must_use]
    pub const fn new(line: u32) -> Self {
        Loc { line }
    }

    /// A dummy/invalid location (used for synthetic nodes).
    #[inline]
    #[must_use]
    pub const fn dummy() -> Self {
        Loc { line: u32::MAX }
    }

    #[inline]
    #[must_use]
    pub const fn is_dummy(self) -> bool {
        self.line == u32::MAX
    }
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_dummy() {
            write!(f, "<generated>")
        } else {
            write!(f, "line {}", self.line)
        }
    }
}
