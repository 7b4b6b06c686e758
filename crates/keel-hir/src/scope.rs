//! Scope resolution.
//!
//! `find_ident` walks from a block up its lexical ancestors to the root.
//! `find_in_block` is local, with two augmentations: a class sub-block also
//! searches the constructor's template block for function idents (method
//! inheritance), and a package function sub-block also searches the
//! canonical sub-module ident named `package`.

use keel_common::Atom;
use keel_common::limits::MAX_SCOPE_WALK_ITERATIONS;
use tracing::trace;

use crate::decl::{FuncKind, IdentId, IdentTarget};
use crate::hir::{BlockId, BlockOwner, Hir};

impl Hir {
    /// Local lookup with class and package augmentations. A local
    /// undefined-ident record does not shadow a defined augmented name; it
    /// is returned only when nothing else resolves.
    #[must_use]
    pub fn find_in_block(&self, block: BlockId, name: Atom) -> Option<IdentId> {
        let local = self.block(block).idents.get(&name).copied();
        if let Some(id) = local
            && self.ident(id).target != IdentTarget::Undefined
        {
            return Some(id);
        }
        let augmented = match self.block(block).owner {
            // A class sub-block inherits methods from the constructor's
            // template block.
            BlockOwner::Class(class) => {
                let template = self.class(class).template;
                let ctor = self.template(template).constructor;
                let ctor_block = self.func(ctor).block;
                self.block(ctor_block)
                    .idents
                    .get(&name)
                    .copied()
                    .filter(|&id| matches!(self.ident(id).target, IdentTarget::Func(_)))
            }
            // A package function body also searches its canonical
            // sub-module, bound under the name `package`.
            BlockOwner::Func(func) if self.func(func).kind == FuncKind::Package => {
                self.interner
                    .get("package")
                    .and_then(|package| self.block(block).idents.get(&package).copied())
                    .and_then(|sub| match self.ident(sub).target {
                        IdentTarget::Func(module) => {
                            let module_block = self.func(module).block;
                            self.block(module_block).idents.get(&name).copied()
                        }
                        _ => None,
                    })
            }
            _ => None,
        };
        augmented.or(local)
    }

    /// Lexical lookup: walk from `block` up its ancestors to the root.
    #[must_use]
    pub fn find_ident(&self, block: BlockId, name: Atom) -> Option<IdentId> {
        let mut current = Some(block);
        let mut iterations = 0usize;
        while let Some(b) = current {
            iterations += 1;
            if iterations > MAX_SCOPE_WALK_ITERATIONS {
                trace!(block = b.0, "scope walk guard hit");
                return None;
            }
            if let Some(id) = self.find_in_block(b, name) {
                return Some(id);
            }
            current = self.block(b).parent;
        }
        None
    }

    /// Resolve a sequence of dotted names, descending through function
    /// sub-blocks after the first segment.
    #[must_use]
    pub fn find_path(&self, block: BlockId, names: &[Atom]) -> Option<IdentId> {
        let (&first, rest) = names.split_first()?;
        let mut id = self.find_ident(block, first)?;
        for &segment in rest {
            let scope = match self.ident(id).target {
                IdentTarget::Func(func) => self.func(func).block,
                _ => return None,
            };
            id = self.find_in_block(scope, segment)?;
        }
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::ProgramBuilder;
    use crate::decl::{FuncKind, IdentTarget, Linkage};

    #[test]
    fn lexical_walk_reaches_root() {
        let mut b = ProgramBuilder::new();
        let x = b.local_var("x");
        let f = b.begin_function("f", FuncKind::Plain, &[]);
        let inner = b.hir().func(f).block;
        b.end_function();
        let hir = b.finish();
        let atom = hir.interner.get("x").unwrap();
        let found = hir.find_ident(inner, atom).expect("x visible from f");
        assert_eq!(hir.ident(found).target, IdentTarget::Var(x));
    }

    #[test]
    fn class_block_inherits_template_functions() {
        let mut b = ProgramBuilder::new();
        let ctor = b.begin_function("List", FuncKind::Constructor, &["self"]);
        let method = b.begin_function("push", FuncKind::Plain, &["self"]);
        b.end_function();
        b.end_function();
        let template = b.hir_mut().new_template(ctor, 32);
        let class = b.hir_mut().instantiate_class(template);
        let hir = b.finish();

        let class_block = hir.class(class).block;
        let push = hir.interner.get("push").unwrap();
        let found = hir
            .find_in_block(class_block, push)
            .expect("inherited method");
        assert_eq!(hir.ident(found).target, IdentTarget::Func(method));
    }

    #[test]
    fn package_block_searches_sub_module() {
        let mut b = ProgramBuilder::new();
        let pkg = b.begin_function_with("math", FuncKind::Package, Linkage::Package, &[]);
        b.begin_function_with("package", FuncKind::Module, Linkage::Module, &[]);
        let gcd = b.begin_function("gcd", FuncKind::Plain, &[]);
        b.end_function();
        b.end_function();
        b.end_function();
        let hir = b.finish();

        let pkg_block = hir.func(pkg).block;
        let atom = hir.interner.get("gcd").unwrap();
        let found = hir.find_in_block(pkg_block, atom).expect("via sub-module");
        assert_eq!(hir.ident(found).target, IdentTarget::Func(gcd));
    }
}
