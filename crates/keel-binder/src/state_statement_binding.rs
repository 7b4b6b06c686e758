//! Statement post-processing.
//!
//! When a binding's expression queue drains, its post-processor runs:
//! return-type unification, typeswitch case selection, condition checks,
//! print rewriting, and foreach desugaring all happen here. Post-processing
//! may mutate the tree and ask for a rebind, or park on an event.

use keel_common::ErrorCode;
use keel_hir::{ExprId, ExprKind, FuncKind, Linkage, StmtId, StmtKind};
use keel_types::{Term, TypeId};
use smallvec::smallvec;
use tracing::trace;

use crate::state::{BinderState, BindingId, BindingKind, Diagnosed, SigId};
use crate::state_scheduling::PostOutcome;

impl BinderState {
    pub(crate) fn post_process(&mut self, binding: BindingId) -> Result<PostOutcome, Diagnosed> {
        let sig = self.binding(binding).sig;
        match self.binding(binding).kind {
            BindingKind::Statement(stmt) => self.post_process_stmt(binding, sig, stmt),
            BindingKind::DefaultValue(index) => {
                let func = self.sig(sig).func;
                let var = self.hir.params(func)[index];
                let init = self.hir.var(var).init.expect("default binding has init");
                let ty = self.child_type(sig, init)?;
                self.sig_mut(sig).paramspecs[index].datatype = Some(ty);
                self.set_var_type(sig, var, ty);
                Ok(PostOutcome::Done)
            }
            BindingKind::VarConstraint(var) => {
                let Some(constraint) = self.hir.var(var).type_constraint else {
                    return Ok(PostOutcome::Done);
                };
                let key = self.var_key(sig, var);
                let Some(&ty) = self.var_types.get(&key) else {
                    // The constrained variable has no datatype yet; check
                    // on the wakeup after it gets one.
                    let event = self.var_event(key);
                    return Ok(PostOutcome::Park(event));
                };
                if !self.constraint_matches(sig, ty, constraint) {
                    let loc = self.hir.var(var).loc;
                    let name = self.hir.name(self.hir.var(var).name).to_string();
                    let shown = self.type_name(ty);
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::ConstraintViolation,
                        format!("`{name}` has type {shown}, violating its constraint"),
                    ));
                }
                Ok(PostOutcome::Done)
            }
            BindingKind::FuncConstraint => {
                let func = self.sig(sig).func;
                let f = self.hir.func(func).clone();
                let Some(constraint) = f.ret_constraint else {
                    return Ok(PostOutcome::Done);
                };
                // Extern declarations take their return type from the
                // constraint; everything else is checked at finalize.
                if matches!(
                    f.linkage,
                    Linkage::ExternC | Linkage::ExternRpc | Linkage::Rpc | Linkage::Libcall
                ) && self.sig(sig).ret.is_none()
                {
                    let ty = self.child_type(sig, constraint)?;
                    self.resolve_return(sig, ty)?;
                }
                Ok(PostOutcome::Done)
            }
        }
    }

    fn post_process_stmt(
        &mut self,
        binding: BindingId,
        sig: SigId,
        stmt: StmtId,
    ) -> Result<PostOutcome, Diagnosed> {
        let kind = self.hir.stmt(stmt).kind;
        let loc = self.hir.stmt(stmt).loc;
        trace!(stmt = stmt.0, ?kind, "post-process");
        match kind {
            StmtKind::Return | StmtKind::Yield => {
                let ty = match self.hir.stmt(stmt).expr {
                    Some(expr) => self.child_type(sig, expr)?,
                    None => TypeId::NONE,
                };
                let prior = self.sig(sig).ret;
                match prior {
                    None => self.resolve_return(sig, ty)?,
                    Some(prior) => match self.types.unify(prior, ty, &self.hir) {
                        Some(joined) => self.resolve_return(sig, joined)?,
                        None => {
                            let a = self.type_name(prior);
                            let b = self.type_name(ty);
                            return Err(self.diag(
                                sig,
                                loc,
                                ErrorCode::TypeMismatch,
                                format!("return type {b} conflicts with {a}"),
                            ));
                        }
                    },
                }
                Ok(PostOutcome::Done)
            }
            StmtKind::If | StmtKind::ElseIf | StmtKind::While | StmtKind::Do => {
                if let Some(cond) = self.hir.stmt(stmt).expr {
                    self.require_bool(sig, cond)?;
                }
                Ok(PostOutcome::Done)
            }
            StmtKind::For => {
                // [init, condition, step]
                if let Some(list) = self.hir.stmt(stmt).expr {
                    let children: Vec<ExprId> = self.hir.expr(list).children.to_vec();
                    if let Some(&cond) = children.get(1) {
                        self.require_bool(sig, cond)?;
                    }
                }
                Ok(PostOutcome::Done)
            }
            StmtKind::Switch => self.post_switch(binding, sig, stmt),
            StmtKind::Typeswitch => self.post_typeswitch(binding, sig, stmt),
            StmtKind::Foreach => self.post_foreach(binding, sig, stmt),
            StmtKind::Print | StmtKind::Println | StmtKind::Assert | StmtKind::Panic => {
                self.post_print(binding, sig, stmt)
            }
            StmtKind::Raise => {
                let list = self.hir.stmt(stmt).expr.expect("raise carries arguments");
                let children: Vec<ExprId> = self.hir.expr(list).children.to_vec();
                let Some(&first) = children.first() else {
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        "raise needs an enum value",
                    ));
                };
                let ty = self.child_type(sig, first)?;
                if !matches!(self.types.term(ty), Term::Enum(_) | Term::Enumclass(_)) {
                    let shown = self.type_name(ty);
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("raise needs an enum value, got {shown}"),
                    ));
                }
                Ok(PostOutcome::Done)
            }
            StmtKind::Relation | StmtKind::Transform => {
                self.execute_transformer(binding, stmt)?;
                Ok(PostOutcome::Done)
            }
            _ => Ok(PostOutcome::Done),
        }
    }

    /// Record a return type; fire the signature's return event on the
    /// first usable value.
    fn resolve_return(&mut self, sig: SigId, ty: TypeId) -> Result<(), Diagnosed> {
        self.sig_mut(sig).ret = Some(ty);
        if !self.sig(sig).ret_fired && (ty == TypeId::NONE || self.types.is_concrete(ty)) {
            self.sig_mut(sig).ret_fired = true;
            if let Some(event) = self.sig(sig).ret_event {
                self.fire_event(event);
            }
        }
        Ok(())
    }

    fn require_bool(&mut self, sig: SigId, expr: ExprId) -> Result<(), Diagnosed> {
        let ty = self.child_type(sig, expr)?;
        if self.types.term(ty) != Term::Bool {
            let loc = self.hir.expr(expr).loc;
            let shown = self.type_name(ty);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("condition must be bool, got {shown}"),
            ));
        }
        Ok(())
    }

    fn post_switch(
        &mut self,
        _binding: BindingId,
        sig: SigId,
        stmt: StmtId,
    ) -> Result<PostOutcome, Diagnosed> {
        let scrutinee = self.hir.stmt(stmt).expr.expect("switch has a scrutinee");
        let st = self.child_type(sig, scrutinee)?;
        let cases = self
            .hir
            .stmt(stmt)
            .sub_block
            .map(|b| self.hir.block(b).stmts.clone())
            .unwrap_or_default();
        for case in cases {
            if self.hir.stmt(case).kind != StmtKind::Case {
                continue;
            }
            let list = self.hir.stmt(case).expr.expect("case has values");
            let entries: Vec<ExprId> = self.hir.expr(list).children.to_vec();
            for entry in entries {
                let et = self.child_type(sig, entry)?;
                if !self.types.equal_modulo_secret(et, st) {
                    let loc = self.hir.expr(entry).loc;
                    let a = self.type_name(et);
                    let b = self.type_name(st);
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("case type {a} does not match switch type {b}"),
                    ));
                }
            }
        }
        Ok(PostOutcome::Done)
    }

    /// Linear scan: the first case whose type list matches the scrutinee's
    /// datatype is marked instantiated and its statements join the
    /// signature's work.
    fn post_typeswitch(
        &mut self,
        binding: BindingId,
        sig: SigId,
        stmt: StmtId,
    ) -> Result<PostOutcome, Diagnosed> {
        let loc = self.hir.stmt(stmt).loc;
        let scrutinee = self.hir.stmt(stmt).expr.expect("typeswitch has a scrutinee");
        let st = self.child_type(sig, scrutinee)?;
        let instantiating = self.binding(binding).instantiating;
        let cases = self
            .hir
            .stmt(stmt)
            .sub_block
            .map(|b| self.hir.block(b).stmts.clone())
            .unwrap_or_default();
        let mut default: Option<StmtId> = None;
        for case in cases {
            match self.hir.stmt(case).kind {
                StmtKind::Default => {
                    default = Some(case);
                }
                StmtKind::Case => {
                    let list = self.hir.stmt(case).expr.expect("case has types");
                    let entries: Vec<ExprId> = self.hir.expr(list).children.to_vec();
                    let mut matched = false;
                    for entry in entries {
                        let et = self.child_type(sig, entry)?;
                        if et == st
                            || self
                                .types
                                .unify(st, et, &self.hir)
                                .is_some_and(|joined| joined == et)
                        {
                            matched = true;
                            break;
                        }
                    }
                    if matched {
                        self.hir.stmt_mut(case).instantiated = true;
                        self.enqueue_case_body(sig, case, instantiating);
                        return Ok(PostOutcome::Done);
                    }
                }
                _ => {}
            }
        }
        if let Some(default) = default {
            self.hir.stmt_mut(default).instantiated = true;
            self.enqueue_case_body(sig, default, instantiating);
            return Ok(PostOutcome::Done);
        }
        let shown = self.type_name(st);
        Err(self.diag(
            sig,
            loc,
            ErrorCode::TypeMismatch,
            format!("no typeswitch case matches {shown}"),
        ))
    }

    fn enqueue_case_body(&mut self, sig: SigId, case: StmtId, instantiating: bool) {
        if let Some(body) = self.hir.stmt(case).sub_block {
            let stmts = self.hir.block(body).stmts.clone();
            for inner in stmts {
                self.queue_statement(sig, inner, instantiating);
            }
        }
    }

    /// Foreach over a non-iterator is rewritten to iterate
    /// `iterand.values()`; over an iterator call, the loop variable takes
    /// the yield type.
    fn post_foreach(
        &mut self,
        binding: BindingId,
        sig: SigId,
        stmt: StmtId,
    ) -> Result<PostOutcome, Diagnosed> {
        let loc = self.hir.stmt(stmt).loc;
        let iterand = self.hir.stmt(stmt).expr.expect("foreach has an iterand");
        let ty = self.child_type(sig, iterand)?;
        let iterator_sig = self
            .expr_sigs
            .get(&(sig, iterand))
            .copied()
            .filter(|&s| self.hir.func(self.sig(s).func).kind == FuncKind::Iterator);
        if let Some(_iter) = iterator_sig {
            let body = self.hir.stmt(stmt).sub_block.expect("foreach has a body");
            let var = *self
                .hir
                .block(body)
                .vars
                .first()
                .expect("foreach body declares the loop variable");
            let instantiating = self.binding(binding).instantiating;
            if instantiating {
                self.hir.var_mut(var).instantiated = true;
            }
            self.set_var_type(sig, var, ty);
            return Ok(PostOutcome::Done);
        }
        // Rewrite to `iterand.values()` and rebind, once: a `values` call
        // that still is not an iterator is an error, not another rewrite.
        let values = self.hir.interner.intern("values");
        if self.hir.expr(iterand).kind == ExprKind::Call {
            let callee = self.hir.expr(iterand).children[0];
            let already_values = self.hir.expr(callee).kind == ExprKind::Dot
                && matches!(
                    self.hir.expr(self.hir.expr(callee).children[1]).kind,
                    ExprKind::Ident { name } if name == values
                );
            if already_values {
                let shown = self.type_name(ty);
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("`values` is not an iterator on {shown}"),
                ));
            }
        }
        let member = self
            .hir
            .new_expr(ExprKind::Ident { name: values }, smallvec![], loc);
        let callee = self
            .hir
            .new_expr(ExprKind::Dot, smallvec![iterand, member], loc);
        let call = self.hir.new_expr(ExprKind::Call, smallvec![callee], loc);
        self.hir.stmt_mut(stmt).expr = Some(call);
        Ok(PostOutcome::Rebind)
    }

    /// Printable-argument walk: class arguments are rewritten to
    /// `arg.toString()` calls; secret arguments are rejected.
    fn post_print(
        &mut self,
        _binding: BindingId,
        sig: SigId,
        stmt: StmtId,
    ) -> Result<PostOutcome, Diagnosed> {
        let Some(list) = self.hir.stmt(stmt).expr else {
            return Ok(PostOutcome::Done);
        };
        let children: Vec<ExprId> = self.hir.expr(list).children.to_vec();
        for (index, &arg) in children.iter().enumerate() {
            let ty = self.child_type(sig, arg)?;
            if self.types.secret(ty) {
                let loc = self.hir.expr(arg).loc;
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::BadSecrecy,
                    "cannot print a secret value",
                ));
            }
            if matches!(self.types.term(ty), Term::Class(_)) {
                let loc = self.hir.expr(arg).loc;
                let to_string = self.hir.interner.intern("toString");
                let member = self
                    .hir
                    .new_expr(ExprKind::Ident { name: to_string }, smallvec![], loc);
                let callee = self.hir.new_expr(ExprKind::Dot, smallvec![arg, member], loc);
                let call = self.hir.new_expr(ExprKind::Call, smallvec![callee], loc);
                self.hir.expr_mut(list).children[index] = call;
                return Ok(PostOutcome::Rebind);
            }
        }
        Ok(PostOutcome::Done)
    }
}
