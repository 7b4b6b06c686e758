//! The transformer executor.
//!
//! `relation` and `transform` statements call a transformer: a declarative
//! code-generating function whose parameters are evaluated at compile
//! time. The executor deep-copies the transformer's `appendcode` /
//! `prependcode` sub-blocks with `$name` textual substitution, splices the
//! result into the destination block, registers relation records, and
//! re-queues the injected statements under every signature that now
//! reaches them.

use keel_common::{Atom, ErrorCode};
use keel_hir::copy::Substitution;
use keel_hir::{
    BlockId, ExprId, ExprKind, FuncId, FuncKind, IdentTarget, RelationId, StmtId, StmtKind,
    TemplateId,
};
use tracing::debug;

use crate::eval::Value;
use crate::state::{BinderState, BindingId, Diagnosed, SigId};

impl BinderState {
    pub(crate) fn execute_transformer(
        &mut self,
        binding: BindingId,
        stmt: StmtId,
    ) -> Result<(), Diagnosed> {
        let sig = self.binding(binding).sig;
        let loc = self.hir.stmt(stmt).loc;
        let caller_block = self.hir.stmt(stmt).block;
        let call = self.hir.stmt(stmt).expr.expect("transform carries a call");
        let children: Vec<ExprId> = self.hir.expr(call).children.to_vec();

        let transformer = self.resolve_transformer(sig, caller_block, children[0])?;
        let mut values = Vec::with_capacity(children.len() - 1);
        for &arg in &children[1..] {
            match self.eval_expr(caller_block, arg, None) {
                Some(value) => values.push(value),
                None => {
                    let arg_loc = self.hir.expr(arg).loc;
                    return Err(self.diag(
                        sig,
                        arg_loc,
                        ErrorCode::SyntaxAtBindTime,
                        "transformer argument is not compile-time evaluable",
                    ));
                }
            }
        }

        let params = self.hir.params(transformer).to_vec();
        if values.len() != params.len() {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!(
                    "transformer takes {} arguments, got {}",
                    params.len(),
                    values.len()
                ),
            ));
        }

        self.label_counter += 1;
        let mut subst = Substitution {
            label: self.label_counter.to_string(),
            ..Default::default()
        };
        for (&var, value) in params.iter().zip(&values) {
            let name = self.hir.var(var).name;
            subst.values.insert(name, value.substitution_text(self));
        }

        // Relation statements register the parent/child template link.
        let relation = if self.hir.stmt(stmt).kind == StmtKind::Relation {
            Some(self.register_relation(sig, stmt, &values)?)
        } else {
            None
        };

        let default_dest = match relation {
            Some(rel) => {
                let parent = self.hir.relation(rel).parent;
                let ctor = self.hir.template(parent).constructor;
                self.hir.func(ctor).block
            }
            None => caller_block,
        };

        let body = self.hir.func(transformer).block;
        let body_stmts = self.hir.block(body).stmts.clone();
        for tstmt in body_stmts {
            let kind = self.hir.stmt(tstmt).kind;
            if !matches!(kind, StmtKind::AppendCode | StmtKind::PrependCode) {
                continue;
            }
            let dest = match self.hir.stmt(tstmt).expr {
                Some(path) => self.resolve_destination(sig, caller_block, path)?,
                None => default_dest,
            };
            let Some(code) = self.hir.stmt(tstmt).sub_block else {
                continue;
            };
            let injected = self.hir.copy_into_block(code, dest, Some(&subst));
            if kind == StmtKind::PrependCode {
                // copy_into_block appends; rotate the copies to the front.
                self.hir.block_mut(dest).stmts.rotate_right(injected.len());
            }
            debug!(
                dest = dest.0,
                count = injected.len(),
                "transformer injected statements"
            );
            if let Some(rel) = relation {
                self.hir
                    .relation_mut(rel)
                    .injected_stmts
                    .extend(injected.iter().copied());
                let funcs = self.injected_functions(dest, code);
                self.hir.relation_mut(rel).injected_funcs.extend(funcs);
            }
            self.notify_injected_idents(dest);
            self.requeue_injected(dest, &injected);
        }
        Ok(())
    }

    fn resolve_transformer(
        &mut self,
        sig: SigId,
        block: BlockId,
        callee: ExprId,
    ) -> Result<FuncId, Diagnosed> {
        let loc = self.hir.expr(callee).loc;
        let ExprKind::Ident { name } = self.hir.expr(callee).kind else {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TemplateMisuse,
                "transformer callee must be a name",
            ));
        };
        let target = self
            .hir
            .find_ident(block, name)
            .map(|id| self.hir.ident(id).target);
        match target {
            Some(IdentTarget::Func(func)) if self.hir.func(func).kind == FuncKind::Transformer => {
                Ok(func)
            }
            _ => {
                let shown = self.hir.name(name).to_string();
                Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TemplateMisuse,
                    format!("`{shown}` is not a transformer"),
                ))
            }
        }
    }

    /// The relation record: the first two template-valued arguments are the
    /// parent and child, a string argument labels the relation, and a bool
    /// argument requests cascading delete.
    fn register_relation(
        &mut self,
        sig: SigId,
        stmt: StmtId,
        values: &[Value],
    ) -> Result<RelationId, Diagnosed> {
        let loc = self.hir.stmt(stmt).loc;
        let mut templates: Vec<TemplateId> = Vec::new();
        let mut label: Option<Atom> = None;
        let mut cascade = false;
        for value in values {
            match value {
                Value::Template(t) => templates.push(*t),
                Value::Class(c) => templates.push(self.hir.class(*c).template),
                Value::Str(s) => {
                    if label.is_none() {
                        label = Some(self.hir.interner.intern(s));
                    }
                }
                Value::Bool(b) => cascade = *b,
                _ => {}
            }
        }
        if templates.len() < 2 {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TemplateMisuse,
                "relation needs a parent and a child template",
            ));
        }
        let label = label.unwrap_or_else(|| self.hir.interner.intern(""));
        let relation = self
            .hir
            .new_relation(templates[0], templates[1], label, cascade);
        Ok(relation)
    }

    /// An explicit destination path evaluates to a template, class, or
    /// function whose block receives the code.
    fn resolve_destination(
        &mut self,
        sig: SigId,
        block: BlockId,
        path: ExprId,
    ) -> Result<BlockId, Diagnosed> {
        let loc = self.hir.expr(path).loc;
        match self.eval_expr(block, path, None) {
            Some(Value::Template(t)) => {
                let ctor = self.hir.template(t).constructor;
                Ok(self.hir.func(ctor).block)
            }
            Some(Value::Class(c)) => Ok(self.hir.class(c).block),
            Some(Value::Func(f)) => Ok(self.hir.func(f).block),
            _ => Err(self.diag(
                sig,
                loc,
                ErrorCode::TemplateMisuse,
                "destination path must name a template, class, or function",
            )),
        }
    }

    /// Functions the copy just declared in the destination, for relation
    /// cleanup registration.
    fn injected_functions(&self, dest: BlockId, source: BlockId) -> Vec<FuncId> {
        let source_names: Vec<Atom> = self
            .hir
            .block(source)
            .idents
            .values()
            .filter(|&&id| matches!(self.hir.ident(id).target, IdentTarget::Func(_)))
            .map(|&id| self.hir.ident(id).name)
            .collect();
        self.hir
            .block(dest)
            .idents
            .values()
            .filter_map(|&id| match self.hir.ident(id).target {
                IdentTarget::Func(f) if source_names.contains(&self.hir.ident(id).name) => Some(f),
                _ => None,
            })
            .collect()
    }

    /// Names the injection defined may have undefined-ident waiters, both
    /// in the destination and (for template blocks) in the class blocks
    /// that resolve through it.
    fn notify_injected_idents(&mut self, dest: BlockId) {
        let defined: Vec<(keel_hir::IdentId, Atom)> = self
            .hir
            .block(dest)
            .idents
            .iter()
            .filter(|&(_, &id)| self.hir.ident(id).target != IdentTarget::Undefined)
            .map(|(&name, &id)| (id, name))
            .collect();
        for &(ident, _) in &defined {
            if let Some(&event) = self.ident_events.get(&ident) {
                self.fire_event(event);
            }
        }
        if let keel_hir::BlockOwner::Func(func) = self.hir.block(dest).owner
            && let Some(template) = self.hir.func(func).template
        {
            for (_, name) in defined {
                self.note_template_member_defined(template, name);
            }
        }
    }

    /// Injected statements bind under every live signature whose function
    /// block they landed in.
    fn requeue_injected(&mut self, dest: BlockId, injected: &[StmtId]) {
        let sigs: Vec<SigId> = self
            .sigs
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.destroyed && self.hir.func(s.func).block == dest)
            .map(|(i, _)| SigId(i as u32))
            .collect();
        for target in sigs {
            let instantiating = self.sig(target).instantiated;
            for &stmt in injected {
                self.queue_statement(target, stmt, instantiating);
            }
        }
        if dest == self.hir.root
            && let Some(main) = self.main_sig
        {
            for &stmt in injected {
                self.queue_statement(main, stmt, true);
            }
        }
    }
}
