//! Printable type strings for diagnostics.

use keel_hir::Hir;

use crate::intern::TypeInterner;
use crate::type_def::{Term, TypeId};

impl TypeInterner {
    /// Render a datatype the way diagnostics print it: `u32`, `[u8]`,
    /// `(u32, string)`, `secret u64`, `Point?`.
    #[must_use]
    pub fn display(&self, id: TypeId, hir: &Hir) -> String {
        let key = self.lookup(id).expect("valid type id");
        let mut out = String::new();
        if key.secret {
            out.push_str("secret ");
        }
        out.push_str(&self.display_term(&key.term, hir));
        if key.nullable {
            out.push('?');
        }
        out
    }

    fn display_term(&self, term: &Term, hir: &Hir) -> String {
        match term {
            Term::None => "none".to_string(),
            Term::Bool => "bool".to_string(),
            Term::String => "string".to_string(),
            Term::Uint(w) => format!("u{w}"),
            Term::Int(w) => format!("i{w}"),
            Term::Float(w) => format!("f{w}"),
            Term::Modint(_) => "modint".to_string(),
            Term::Array(e) => format!("[{}]", self.display(*e, hir)),
            Term::Tuple(fields) => {
                let inner: Vec<String> = fields.iter().map(|&f| self.display(f, hir)).collect();
                format!("({})", inner.join(", "))
            }
            Term::Struct(func, fields) => {
                let name = hir.name(hir.func(*func).name);
                let inner: Vec<String> = fields
                    .iter()
                    .map(|&(field, ty)| format!("{}: {}", hir.name(field), self.display(ty, hir)))
                    .collect();
                format!("{name}{{{}}}", inner.join(", "))
            }
            Term::Enumclass(func) | Term::Enum(func) => {
                format!("enum {}", hir.name(hir.func(*func).name))
            }
            Term::Function(func) => format!("func {}", hir.name(hir.func(*func).name)),
            Term::Template(template) => {
                let ctor = hir.template(*template).constructor;
                hir.name(hir.func(ctor).name).to_string()
            }
            Term::Class(class) => {
                let template = hir.class(*class).template;
                let ctor = hir.template(template).constructor;
                let name = hir.name(hir.func(ctor).name);
                let ordinal = hir
                    .template(template)
                    .classes
                    .iter()
                    .position(|&c| c == *class)
                    .map_or(0, |i| i + 1);
                format!("{name}#{ordinal}")
            }
            Term::Funcptr(ret, params) => {
                let inner: Vec<String> = params.iter().map(|&p| self.display(p, hir)).collect();
                format!("&({}) -> {}", inner.join(", "), self.display(*ret, hir))
            }
            Term::Expr => "expr".to_string(),
        }
    }
}
