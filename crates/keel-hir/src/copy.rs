//! Deep block copy with identifier re-pointing, and class instantiation.
//!
//! The transformer executor copies `appendcode`/`prependcode` bodies into
//! destination blocks, expanding `$name` textual substitutions first;
//! identifier-bearing expressions in the copied tree are then re-pointed by
//! scope lookup in the destination.

use keel_common::Atom;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::decl::{ClassId, FuncId, IdentTarget, VarId};
use crate::expr::{ExprId, ExprKind};
use crate::hir::{BlockId, BlockOwner, Hir};
use crate::stmt::StmtId;
use crate::TemplateId;

/// Textual substitution applied during a transformer copy.
///
/// Identifiers and string literals containing `$name` or `$name$` are
/// expanded against the transformer's variable values; `$L` prefixes a
/// unique label for this expansion.
#[derive(Debug, Default)]
pub struct Substitution {
    pub values: FxHashMap<Atom, String>,
    /// Unique suffix for `$L` labels, one per transformer execution.
    pub label: String,
}

impl Substitution {
    /// Expand `$` escapes in `text`. Returns `None` when nothing changed.
    #[must_use]
    pub fn expand(&self, hir: &Hir, text: &str) -> Option<String> {
        if !text.contains('$') {
            return None;
        }
        let mut out = String::with_capacity(text.len());
        let bytes = text.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'$' {
                out.push(bytes[i] as char);
                i += 1;
                continue;
            }
            i += 1;
            // `$L...` expands to a label unique to this execution.
            if i < bytes.len() && bytes[i] == b'L' {
                out.push('L');
                out.push_str(&self.label);
                i += 1;
                continue;
            }
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let name = &text[start..i];
            // A trailing `$` delimits the name inside a longer identifier.
            if i < bytes.len() && bytes[i] == b'$' {
                i += 1;
            }
            match self.lookup(hir, name) {
                Some(value) => out.push_str(value),
                None => {
                    // Unknown substitution: keep the text as written.
                    out.push('$');
                    out.push_str(name);
                }
            }
        }
        Some(out)
    }

    fn lookup<'a>(&'a self, hir: &Hir, name: &str) -> Option<&'a String> {
        let atom = hir.interner.get(name)?;
        self.values.get(&atom)
    }
}

/// Copy state threaded through one deep copy: destination contexts for the
/// re-pointing pass.
struct CopyCtx<'a> {
    subst: Option<&'a Substitution>,
    /// Copied identifier expressions with the block they must resolve in.
    repoint: Vec<(ExprId, BlockId)>,
}

impl Hir {
    /// Instantiate a class of a template.
    ///
    /// The class sub-block starts with no members of its own; member
    /// variables materialize when the constructor body binds `self.x`
    /// assignments, and methods resolve through the template block
    /// augmentation. The block parents into the constructor's block so
    /// lexical resolution escapes outward.
    pub fn instantiate_class(&mut self, template: TemplateId) -> ClassId {
        let ctor = self.template(template).constructor;
        let ctor_block = self.func(ctor).block;
        let id = ClassId(self.classes.len() as u32);
        let block = self.new_block(Some(ctor_block), BlockOwner::Class(id));
        self.classes.push(crate::decl::Class {
            template,
            block,
            instantiated: false,
            dead: false,
        });
        self.template_mut(template).classes.push(id);
        debug!(template = template.0, class = id.0, "instantiated class");
        id
    }

    /// Deep-copy a block's contents (statements, expressions, variables,
    /// nested functions, idents) into a fresh block under `parent`,
    /// applying `subst` and re-pointing copied identifier expressions in
    /// the new scope.
    ///
    /// Returns the new block and the copied top-level statements.
    pub fn copy_block_deep(
        &mut self,
        src: BlockId,
        parent: Option<BlockId>,
        owner: BlockOwner,
        subst: Option<&Substitution>,
    ) -> (BlockId, Vec<StmtId>) {
        let mut ctx = CopyCtx {
            subst,
            repoint: Vec::new(),
        };
        let dst = self.new_block(parent, owner);
        self.copy_block_contents(src, dst, &mut ctx);
        let top: Vec<StmtId> = self.block(dst).stmts.clone();
        // Textual substitution ran during the copy; only now are the
        // copied identifier expressions re-pointed in their new scope.
        for (expr, scope) in std::mem::take(&mut ctx.repoint) {
            let ExprKind::Ident { name } = self.expr(expr).kind else {
                continue;
            };
            if let Some(ident) = self.find_ident(scope, name) {
                self.add_use(ident, expr);
            }
        }
        (dst, top)
    }

    /// Deep-copy a block's contents directly into an existing block,
    /// returning the copied top-level statements in order. This is the
    /// transformer injection path: the destination is a live block and the
    /// copied statements land at its end (the caller repositions them for
    /// prepends).
    pub fn copy_into_block(
        &mut self,
        src: BlockId,
        dst: BlockId,
        subst: Option<&Substitution>,
    ) -> Vec<StmtId> {
        let mut ctx = CopyCtx {
            subst,
            repoint: Vec::new(),
        };
        let before = self.block(dst).stmts.len();
        self.copy_block_contents(src, dst, &mut ctx);
        let top: Vec<StmtId> = self.block(dst).stmts[before..].to_vec();
        for (expr, scope) in std::mem::take(&mut ctx.repoint) {
            let ExprKind::Ident { name } = self.expr(expr).kind else {
                continue;
            };
            if let Some(ident) = self.find_ident(scope, name) {
                self.add_use(ident, expr);
            }
        }
        top
    }

    fn copy_block_contents(&mut self, src: BlockId, dst: BlockId, ctx: &mut CopyCtx<'_>) {
        // Variables first: statements may reference them.
        let vars: Vec<VarId> = self.block(src).vars.clone();
        for var in vars {
            self.copy_variable(var, dst, ctx);
        }
        // Nested functions declared in this block.
        let funcs: Vec<(Atom, FuncId)> = self
            .block(src)
            .idents
            .values()
            .filter_map(|&id| match self.ident(id).target {
                IdentTarget::Func(f) => {
                    let declared_here = self.block(self.func(f).block).parent == Some(src);
                    declared_here.then_some((self.ident(id).name, f))
                }
                _ => None,
            })
            .collect();
        for (_, func) in funcs {
            self.copy_function(func, dst, ctx);
        }
        let stmts: Vec<StmtId> = self.block(src).stmts.clone();
        for stmt in stmts {
            self.copy_stmt(stmt, dst, ctx);
        }
    }

    fn copy_variable(&mut self, var: VarId, dst: BlockId, ctx: &mut CopyCtx<'_>) -> VarId {
        let src = self.var(var).clone();
        let name = self.subst_atom(src.name, ctx);
        let copy = self.new_variable(dst, name, src.kind, src.loc);
        let init = src.init.map(|e| self.copy_expr(e, dst, ctx));
        let constraint = src.type_constraint.map(|e| self.copy_expr(e, dst, ctx));
        let v = self.var_mut(copy);
        v.init = init;
        v.type_constraint = constraint;
        v.is_const = src.is_const;
        v.is_type = src.is_type;
        v.in_class_signature = src.in_class_signature;
        copy
    }

    fn copy_function(&mut self, func: FuncId, dst: BlockId, ctx: &mut CopyCtx<'_>) -> FuncId {
        let src = self.func(func).clone();
        let name = self.subst_atom(src.name, ctx);
        let copy = self.new_function(dst, name, src.kind, src.linkage, src.loc);
        let copy_block = self.func(copy).block;
        self.copy_block_contents(src.block, copy_block, ctx);
        let ret_constraint = src
            .ret_constraint
            .map(|e| self.copy_expr(e, copy_block, ctx));
        let f = self.func_mut(copy);
        f.num_params = src.num_params;
        f.ret_constraint = ret_constraint;
        copy
    }

    fn copy_stmt(&mut self, stmt: StmtId, dst: BlockId, ctx: &mut CopyCtx<'_>) -> StmtId {
        let src = self.stmt(stmt).clone();
        let expr = src.expr.map(|e| self.copy_expr(e, dst, ctx));
        let sub_block = src.sub_block.map(|b| {
            let sub = self.new_block(Some(dst), BlockOwner::Stmt);
            self.copy_block_contents(b, sub, ctx);
            sub
        });
        self.new_stmt(dst, src.kind, expr, sub_block, src.loc)
    }

    fn copy_expr(&mut self, expr: ExprId, scope: BlockId, ctx: &mut CopyCtx<'_>) -> ExprId {
        let src = self.expr(expr).clone();
        let kind = match src.kind {
            ExprKind::Ident { name } => ExprKind::Ident {
                name: self.subst_atom(name, ctx),
            },
            ExprKind::StringLit { value } => {
                let expanded = ctx
                    .subst
                    .and_then(|s| s.expand(self, &value))
                    .unwrap_or(value);
                ExprKind::StringLit { value: expanded }
            }
            other => other,
        };
        let children: SmallVec<[ExprId; 2]> = src
            .children
            .iter()
            .map(|&c| self.copy_expr(c, scope, ctx))
            .collect();
        let copy = self.new_expr(kind, children, src.loc);
        {
            let e = self.expr_mut(copy);
            e.is_type = src.is_type;
            e.is_lhs = src.is_lhs;
            e.is_const = src.is_const;
        }
        if matches!(self.expr(copy).kind, ExprKind::Ident { .. }) {
            ctx.repoint.push((copy, scope));
        }
        copy
    }

    fn subst_atom(&mut self, atom: Atom, ctx: &mut CopyCtx<'_>) -> Atom {
        let Some(subst) = ctx.subst else {
            return atom;
        };
        let text = self.interner.resolve(atom).to_string();
        match subst.expand(self, &text) {
            Some(expanded) if expanded != text => self.interner.intern(&expanded),
            _ => atom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ProgramBuilder;
    use crate::decl::FuncKind;

    fn substitution(hir: &mut Hir, pairs: &[(&str, &str)]) -> Substitution {
        let mut subst = Substitution {
            label: "1".to_string(),
            ..Default::default()
        };
        for (name, value) in pairs {
            let atom = hir.interner.intern(name);
            subst.values.insert(atom, (*value).to_string());
        }
        subst
    }

    #[test]
    fn expand_name_and_delimited_name() {
        let mut b = ProgramBuilder::new();
        let hir = b.hir_mut();
        let subst = substitution(hir, &[("A", "Point")]);
        assert_eq!(subst.expand(hir, "$A"), Some("Point".to_string()));
        assert_eq!(subst.expand(hir, "new$A$List"), Some("newPointList".to_string()));
        assert_eq!(subst.expand(hir, "plain"), None);
    }

    #[test]
    fn expand_label_is_unique_per_execution() {
        let mut b = ProgramBuilder::new();
        let hir = b.hir_mut();
        let subst = substitution(hir, &[]);
        assert_eq!(subst.expand(hir, "$Ldone"), Some("L1done".to_string()));
    }

    #[test]
    fn unknown_substitution_left_as_written() {
        let mut b = ProgramBuilder::new();
        let hir = b.hir_mut();
        let subst = substitution(hir, &[("A", "Point")]);
        assert_eq!(subst.expand(hir, "$B"), Some("$B".to_string()));
    }

    #[test]
    fn copied_idents_repoint_into_destination() {
        let mut b = ProgramBuilder::new();
        // Source block: a variable `x` and a statement `x`.
        let f = b.begin_function("src", FuncKind::Plain, &[]);
        let x = b.local_var("x");
        let use_x = b.ident_expr("x");
        b.expr_stmt(use_x);
        b.end_function();
        let src_block = b.hir().func(f).block;
        let root = b.hir().root;
        let hir = b.hir_mut();
        let (dst, stmts) = hir.copy_block_deep(src_block, Some(root), BlockOwner::Stmt, None);
        assert_eq!(stmts.len(), 1);
        // The copy has its own variable, and the copied use resolves to it.
        assert_eq!(hir.block(dst).vars.len(), 1);
        let copied_var = hir.block(dst).vars[0];
        assert_ne!(copied_var, x);
        let copied_use = hir.stmt(stmts[0]).expr.unwrap();
        let ident = hir.expr(copied_use).ident.expect("re-pointed");
        assert_eq!(hir.ident(ident).target, IdentTarget::Var(copied_var));
    }
}
