//! Format-string verification.
//!
//! A `%` operator whose left side is a string runs this checker: the
//! format must be a constant string, its specifiers must match the
//! argument tuple element by element, and the checker produces a rewritten
//! format with explicit widths for the backend.
//!
//! Specifiers: `%b %s %i %u %x %f`, with an optional width (`%u32`), plus
//! nested `[...]` for arrays and `(...,...)` for tuples. Accepted escapes:
//! `\" \\ \n \t \a \b \e \f \r \v` and `\xHH`.

use keel_hir::Hir;
use keel_types::{Term, TypeId, TypeInterner};

/// A format error with a human-readable message; the caller attaches the
/// source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatError {
    pub message: String,
}

impl FormatError {
    fn new(message: impl Into<String>) -> Self {
        FormatError {
            message: message.into(),
        }
    }
}

struct Checker<'a> {
    types: &'a TypeInterner,
    hir: &'a Hir,
    bytes: &'a [u8],
    pos: usize,
    out: String,
}

/// Verify `fmt` against the argument types and return the rewritten format
/// string with explicit widths.
pub fn check_format(
    types: &TypeInterner,
    hir: &Hir,
    fmt: &str,
    args: &[TypeId],
) -> Result<String, FormatError> {
    let mut checker = Checker {
        types,
        hir,
        bytes: fmt.as_bytes(),
        pos: 0,
        out: String::with_capacity(fmt.len()),
    };
    let mut next_arg = 0usize;
    while let Some(byte) = checker.peek() {
        match byte {
            b'\\' => checker.escape()?,
            b'%' => {
                checker.bump();
                if checker.peek() == Some(b'%') {
                    checker.bump();
                    checker.out.push_str("%%");
                    continue;
                }
                let Some(&arg) = args.get(next_arg) else {
                    return Err(FormatError::new("too few arguments for format string"));
                };
                if types.secret(arg) {
                    return Err(FormatError::new("cannot format a secret value"));
                }
                checker.out.push('%');
                checker.specifier(arg)?;
                next_arg += 1;
            }
            _ => {
                checker.out.push(byte as char);
                checker.bump();
            }
        }
    }
    if next_arg < args.len() {
        return Err(FormatError::new("too many arguments for format string"));
    }
    Ok(checker.out)
}

impl Checker<'_> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn escape(&mut self) -> Result<(), FormatError> {
        self.out.push('\\');
        self.bump();
        let Some(escaped) = self.peek() else {
            return Err(FormatError::new("dangling escape at end of format string"));
        };
        match escaped {
            b'"' | b'\\' | b'n' | b't' | b'a' | b'b' | b'e' | b'f' | b'r' | b'v' => {
                self.out.push(escaped as char);
                self.bump();
                Ok(())
            }
            b'x' => {
                self.out.push('x');
                self.bump();
                for _ in 0..2 {
                    let Some(digit) = self.peek().filter(u8::is_ascii_hexdigit) else {
                        return Err(FormatError::new("\\x escape needs two hex digits"));
                    };
                    self.out.push(digit as char);
                    self.bump();
                }
                Ok(())
            }
            other => Err(FormatError::new(format!(
                "unknown escape sequence \\{}",
                other as char
            ))),
        }
    }

    /// One specifier, matched against one argument datatype. The argument
    /// datatype supplies the width written into the rewritten string.
    fn specifier(&mut self, arg: TypeId) -> Result<(), FormatError> {
        let Some(spec) = self.peek() else {
            return Err(FormatError::new("dangling % at end of format string"));
        };
        match spec {
            b'[' => {
                self.bump();
                let Term::Array(element) = self.types.term(arg) else {
                    return Err(self.mismatch("[...]", arg));
                };
                self.out.push('[');
                self.specifier_inner(element)?;
                if self.peek() != Some(b']') {
                    return Err(FormatError::new("unterminated [ in format string"));
                }
                self.bump();
                self.out.push(']');
                Ok(())
            }
            b'(' => {
                self.bump();
                let Term::Tuple(fields) = self.types.term(arg) else {
                    return Err(self.mismatch("(...)", arg));
                };
                self.out.push('(');
                for (i, &field) in fields.iter().enumerate() {
                    if i > 0 {
                        if self.peek() != Some(b',') {
                            return Err(FormatError::new("tuple specifier arity mismatch"));
                        }
                        self.bump();
                        self.out.push(',');
                    }
                    self.specifier_inner(field)?;
                }
                if self.peek() != Some(b')') {
                    return Err(FormatError::new("unterminated ( in format string"));
                }
                self.bump();
                self.out.push(')');
                Ok(())
            }
            _ => {
                self.bump();
                let width = self.width()?;
                self.match_scalar(spec, width, arg)
            }
        }
    }

    /// A nested element inside `[...]`/`(...)`: the leading `%` is implied
    /// by the surrounding specifier in the source syntax but normalized in
    /// the rewritten string.
    fn specifier_inner(&mut self, arg: TypeId) -> Result<(), FormatError> {
        if self.peek() == Some(b'%') {
            self.bump();
        }
        self.out.push('%');
        self.specifier(arg)
    }

    fn width(&mut self) -> Result<Option<u32>, FormatError> {
        let mut digits = 0u32;
        let mut value: u32 = 0;
        while let Some(digit) = self.peek().filter(u8::is_ascii_digit) {
            digits += 1;
            value = value * 10 + u32::from(digit - b'0');
            if value > keel_common::limits::MAX_INT_WIDTH {
                return Err(FormatError::new(format!(
                    "format width {value} exceeds {}",
                    keel_common::limits::MAX_INT_WIDTH
                )));
            }
            self.bump();
        }
        Ok((digits > 0).then_some(value))
    }

    fn match_scalar(
        &mut self,
        spec: u8,
        declared_width: Option<u32>,
        arg: TypeId,
    ) -> Result<(), FormatError> {
        let term = self.types.term(arg);
        let actual_width = term.width().map(u32::from);
        if let (Some(declared), Some(actual)) = (declared_width, actual_width)
            && declared != actual
        {
            return Err(FormatError::new(format!(
                "format width {declared} does not match argument width {actual}"
            )));
        }
        let matched = match spec {
            b'b' => matches!(term, Term::Bool),
            b's' => matches!(term, Term::String),
            b'i' => matches!(term, Term::Int(_)),
            b'u' => matches!(term, Term::Uint(_)),
            b'x' => matches!(term, Term::Uint(_) | Term::Int(_)),
            b'f' => matches!(term, Term::Float(_)),
            other => {
                return Err(FormatError::new(format!(
                    "unknown format specifier %{}",
                    other as char
                )));
            }
        };
        if !matched {
            return Err(self.mismatch(&format!("%{}", spec as char), arg));
        }
        // The rewritten format carries the explicit width for the backend.
        self.out.push(spec as char);
        if let Some(width) = actual_width {
            self.out.push_str(&width.to_string());
        }
        Ok(())
    }

    fn mismatch(&self, spec: &str, arg: TypeId) -> FormatError {
        FormatError::new(format!(
            "format specifier {spec} does not match argument type {}",
            self.types.display(arg, self.hir)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_hir::Hir;

    fn setup() -> (TypeInterner, Hir) {
        (TypeInterner::new(), Hir::new())
    }

    #[test]
    fn widths_are_inserted() {
        let (types, hir) = setup();
        let rewritten =
            check_format(&types, &hir, "x=%u y=%s", &[types.uint(32), TypeId::STR]).unwrap();
        assert_eq!(rewritten, "x=%u32 y=%s");
    }

    #[test]
    fn declared_width_must_match() {
        let (types, hir) = setup();
        let rewritten = check_format(&types, &hir, "x=%u32", &[types.uint(32)]).unwrap();
        assert_eq!(rewritten, "x=%u32");
        assert!(check_format(&types, &hir, "x=%u16", &[types.uint(32)]).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let (types, hir) = setup();
        let err = check_format(&types, &hir, "x=%u y=%s", &[types.uint(32), types.uint(32)])
            .unwrap_err();
        assert!(err.message.contains("%s"));
    }

    #[test]
    fn arity_is_checked_both_ways() {
        let (types, hir) = setup();
        assert!(check_format(&types, &hir, "%u %u", &[types.uint(8)]).is_err());
        assert!(check_format(&types, &hir, "%u", &[types.uint(8), types.uint(8)]).is_err());
    }

    #[test]
    fn nested_array_and_tuple_specifiers() {
        let (types, hir) = setup();
        let array = types.array(types.uint(8));
        assert_eq!(check_format(&types, &hir, "%[u]", &[array]).unwrap(), "%[%u8]");
        let tuple = types.tuple(vec![types.uint(32), TypeId::STR]);
        assert_eq!(
            check_format(&types, &hir, "%(u,s)", &[tuple]).unwrap(),
            "%(%u32,%s)"
        );
    }

    #[test]
    fn escapes_validated() {
        let (types, hir) = setup();
        assert!(check_format(&types, &hir, "ok\\n", &[]).is_ok());
        assert!(check_format(&types, &hir, "ok\\xAB", &[]).is_ok());
        assert!(check_format(&types, &hir, "bad\\q", &[]).is_err());
        assert!(check_format(&types, &hir, "bad\\x1", &[]).is_err());
    }

    #[test]
    fn secret_arguments_rejected() {
        let (types, hir) = setup();
        let secret = types.set_secret(types.uint(32), true).unwrap();
        assert!(check_format(&types, &hir, "%u", &[secret]).is_err());
    }

    #[test]
    fn oversized_width_rejected_at_parse() {
        let (types, hir) = setup();
        // 65535 is the last legal width; 65536 fails at width parse.
        assert!(check_format(&types, &hir, "%u65536", &[types.uint(32)]).is_err());
    }
}
