//! String interning for identifier deduplication.
//!
//! Every identifier, member name, and string literal that participates in
//! lookup is interned once and referred to by a copyable `Atom`. Atom
//! equality is integer equality, which keeps scope tables and datatype
//! keys cheap to hash and compare.

use rustc_hash::FxHashMap;
use serde::Serialize;

/// An interned string handle.
///
/// Atoms are only meaningful relative to the `Interner` that produced them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Atom(pub u32);

impl Atom {
    pub const DUMMY: Atom = Atom(u32::MAX);

    #[must_use]
    pub fn is_dummy(self) -> bool {
        self.0 == u32::MAX
    }
}

/// Append-only string interner.
///
/// Interned strings live for the whole binder run; there is no removal.
#[derive(Debug, Default)]
pub struct Interner {
    strings: Vec<String>,
    index: FxHashMap<String, Atom>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning the canonical atom for it.
    pub fn intern(&mut self, s: &str) -> Atom {
        if let Some(&atom) = self.index.get(s) {
            return atom;
        }
        let atom = Atom(u32::try_from(self.strings.len()).expect("interner overflow"));
        self.strings.push(s.to_string());
        self.index.insert(s.to_string(), atom);
        atom
    }

    /// Resolve an atom back to its string.
    #[must_use]
    pub fn resolve(&self, atom: Atom) -> &str {
        &self.strings[atom.0 as usize]
    }

    /// Look up an already-interned string without interning it.
    #[must_use]
    pub fn get(&self, s: &str) -> Option<Atom> {
        self.index.get(s).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates() {
        let mut interner = Interner::new();
        let a = interner.intern("x");
        let b = interner.intern("x");
        let c = interner.intern("y");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "x");
        assert_eq!(interner.resolve(c), "y");
    }

    #[test]
    fn get_does_not_intern() {
        let mut interner = Interner::new();
        assert!(interner.get("missing").is_none());
        let a = interner.intern("present");
        assert_eq!(interner.get("present"), Some(a));
    }
}
