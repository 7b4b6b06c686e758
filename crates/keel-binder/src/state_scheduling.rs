//! The binding queue, scheduler loop, queue construction, termination,
//! garbage collection, and leftover-event reporting.
//!
//! The engine is single-threaded and cooperative: the only suspension
//! point is a binding parking itself on an event, at the granularity of
//! one expression. FIFO ordering of the runnable queue and of event waiter
//! lists, together with the monotone type lattice, makes the fixpoint
//! deterministic and confluent.

use std::collections::VecDeque;

use keel_common::{Diagnostic, ErrorCode, Loc};
use keel_hir::{ExprId, ExprKind, FuncId, FuncKind, Linkage, StmtId, StmtKind, TemplateId};
use keel_types::TypeId;
use tracing::{debug, trace};

use crate::state::{
    BinderState, BindingId, BindingKind, Diagnosed, EventKind, ExprOutcome, SigId,
};

/// Outcome of a binding's post-processing step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PostOutcome {
    Done,
    /// The tree was mutated (foreach desugaring, print rewriting);
    /// rebuild the queue and run again.
    Rebind,
    /// Post-processing needs information that is not concrete yet.
    Park(crate::state::EventId),
}

/// Context threaded through queue construction.
#[derive(Clone, Copy)]
struct QueueCtx {
    is_lhs: bool,
    type_pos: bool,
    instantiating: bool,
    modulus: Option<ExprId>,
    depth: usize,
}

impl BinderState {
    // =========================================================================
    // Entry points
    // =========================================================================

    /// Run the fixpoint over the whole program: seed the main signature,
    /// drain the queue, garbage-collect unused templates, and report any
    /// events that survived the drain.
    pub fn bind(&mut self) -> Result<(), Vec<Diagnostic>> {
        self.seed_main();
        self.run_queue();
        self.collect_garbage();
        self.report_leftover_events();
        if self.diags.is_empty() {
            Ok(())
        } else {
            Err(self.diags.take())
        }
    }

    /// After the main fixpoint: create fully-specified signatures for every
    /// extern RPC function and re-run the fixpoint, so that RPC entry
    /// points are bound even when nothing local calls them.
    pub fn bind_rpcs(&mut self) -> Result<(), Vec<Diagnostic>> {
        let rpcs: Vec<FuncId> = self
            .hir
            .funcs()
            .filter(|(_, f)| f.linkage == Linkage::ExternRpc)
            .map(|(id, _)| id)
            .collect();
        for func in rpcs {
            let params = self.hir.params(func).to_vec();
            let block = self.hir.func(func).block;
            let mut key: Vec<Option<TypeId>> = Vec::with_capacity(params.len());
            let mut ok = true;
            for var in &params {
                let Some(constraint) = self.hir.var(*var).type_constraint else {
                    let loc = self.hir.var(*var).loc;
                    let name = self.hir.name(self.hir.var(*var).name).to_string();
                    self.diags.error(
                        loc,
                        ErrorCode::ConstraintViolation,
                        format!("rpc parameter `{name}` needs an explicit type"),
                    );
                    ok = false;
                    break;
                };
                match self.type_annotation(block, constraint) {
                    Some(ty) => key.push(Some(ty)),
                    None => {
                        let loc = self.hir.expr(constraint).loc;
                        self.diags.error(
                            loc,
                            ErrorCode::ConstraintViolation,
                            "rpc parameter type must be fully specified",
                        );
                        ok = false;
                        break;
                    }
                }
            }
            if ok && self.lookup_signature(func, &key).is_none() {
                self.create_signature(func, key, None, true);
            }
        }
        self.run_queue();
        self.report_leftover_events();
        if self.diags.is_empty() {
            Ok(())
        } else {
            Err(self.diags.take())
        }
    }

    fn seed_main(&mut self) {
        let start = self.hir.interner.intern("__start");
        let root = self.hir.root;
        let main = self.hir.new_function(
            root,
            start,
            FuncKind::Plain,
            Linkage::Module,
            Loc::dummy(),
        );
        let sig = self.create_signature(main, Vec::new(), None, true);
        self.main_sig = Some(sig);
        // Root-level declarations with type constraints check under main.
        let root_vars = self.hir.block(root).vars.clone();
        for var in root_vars {
            if self.hir.var(var).type_constraint.is_some() {
                self.spawn_binding(sig, BindingKind::VarConstraint(var), false);
            }
        }
        let stmts = self.hir.block(root).stmts.clone();
        for stmt in stmts {
            self.queue_statement(sig, stmt, true);
        }
        debug!(sig = sig.0, "seeded main signature");
    }

    // =========================================================================
    // Public seeding API (transformer-injected work, HIR builder)
    // =========================================================================

    /// Queue every statement of a signature's function body.
    pub fn queue_signature(&mut self, sig: SigId) {
        let func = self.sig(sig).func;
        let block = self.hir.func(func).block;
        let instantiating = self.sig(sig).instantiated;
        let stmts = self.hir.block(block).stmts.clone();
        for stmt in stmts {
            self.queue_statement(sig, stmt, instantiating);
        }
    }

    /// Queue one statement (and its bindable sub-blocks) under a signature.
    pub fn queue_statement(&mut self, sig: SigId, stmt: StmtId, instantiating: bool) {
        if self.hir.stmt(stmt).dead {
            return;
        }
        let kind = self.hir.stmt(stmt).kind;
        match kind {
            // Transformer body material never binds in place.
            StmtKind::AppendCode | StmtKind::PrependCode => return,
            // Case arms belong to their switch statement's binding.
            StmtKind::Case | StmtKind::Default => return,
            _ => {}
        }
        self.spawn_binding(sig, BindingKind::Statement(stmt), instantiating);
        match kind {
            // Typeswitch arms bind only when case selection picks one.
            StmtKind::Typeswitch => {}
            StmtKind::Switch => {
                let cases = self
                    .hir
                    .stmt(stmt)
                    .sub_block
                    .map(|b| self.hir.block(b).stmts.clone())
                    .unwrap_or_default();
                for case in cases {
                    if let Some(body) = self.hir.stmt(case).sub_block {
                        let stmts = self.hir.block(body).stmts.clone();
                        for inner in stmts {
                            self.queue_statement(sig, inner, instantiating);
                        }
                    }
                }
            }
            _ => {
                if let Some(body) = self.hir.stmt(stmt).sub_block {
                    let stmts = self.hir.block(body).stmts.clone();
                    for inner in stmts {
                        self.queue_statement(sig, inner, instantiating);
                    }
                }
            }
        }
    }

    /// Append one expression tree to an existing binding's queue.
    pub fn queue_expression(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        instantiating: bool,
        is_lhs: bool,
    ) {
        let sig = self.binding(binding).sig;
        let mut queue = std::mem::take(&mut self.binding_mut(binding).queue);
        let ctx = QueueCtx {
            is_lhs,
            type_pos: false,
            instantiating,
            modulus: None,
            depth: 0,
        };
        self.push_expr_tree(&mut queue, sig, expr, ctx);
        self.binding_mut(binding).queue = queue;
    }

    // =========================================================================
    // Queue construction
    // =========================================================================

    /// Rebuild a binding's expression queue from its current tree:
    /// post-order, with the special orderings for dot, named parameters,
    /// assignment targets, modular regions, and type positions.
    pub(crate) fn build_queue(&mut self, binding: BindingId) {
        let sig = self.binding(binding).sig;
        let instantiating = self.binding(binding).instantiating;
        let mut queue = VecDeque::new();
        let value_ctx = QueueCtx {
            is_lhs: false,
            type_pos: false,
            instantiating,
            modulus: None,
            depth: 0,
        };
        let type_ctx = QueueCtx {
            type_pos: true,
            instantiating: false,
            ..value_ctx
        };
        match self.binding(binding).kind {
            BindingKind::Statement(stmt) => {
                let kind = self.hir.stmt(stmt).kind;
                let expr = self.hir.stmt(stmt).expr;
                match kind {
                    // The transformer executor evaluates these itself.
                    StmtKind::Relation | StmtKind::Transform => {}
                    // Module plumbing has nothing to bind.
                    StmtKind::Import
                    | StmtKind::ImportLib
                    | StmtKind::ImportRpc
                    | StmtKind::Use => {}
                    StmtKind::Switch | StmtKind::Typeswitch => {
                        if let Some(scrutinee) = expr {
                            self.push_expr_tree(&mut queue, sig, scrutinee, value_ctx);
                        }
                        // Case lists bind inside this binding so selection
                        // has every entry's datatype in hand.
                        let arm_ctx = if kind == StmtKind::Typeswitch {
                            type_ctx
                        } else {
                            value_ctx
                        };
                        let cases = self
                            .hir
                            .stmt(stmt)
                            .sub_block
                            .map(|b| self.hir.block(b).stmts.clone())
                            .unwrap_or_default();
                        for case in cases {
                            if let Some(list) = self.hir.stmt(case).expr {
                                self.push_expr_tree(&mut queue, sig, list, arm_ctx);
                            }
                        }
                    }
                    _ => {
                        if let Some(root) = expr {
                            self.push_expr_tree(&mut queue, sig, root, value_ctx);
                        }
                    }
                }
            }
            BindingKind::DefaultValue(_) => {
                if let Some(root) = self.binding_root(binding) {
                    self.push_expr_tree(&mut queue, sig, root, value_ctx);
                }
            }
            BindingKind::VarConstraint(_) | BindingKind::FuncConstraint => {
                if let Some(root) = self.binding_root(binding) {
                    self.push_expr_tree(&mut queue, sig, root, type_ctx);
                }
            }
        }
        self.binding_mut(binding).queue = queue;
    }

    fn push_expr_tree(
        &mut self,
        queue: &mut VecDeque<ExprId>,
        sig: SigId,
        expr: ExprId,
        ctx: QueueCtx,
    ) {
        if ctx.depth > keel_common::limits::MAX_EXPR_DEPTH {
            let loc = self.hir.expr(expr).loc;
            self.diags.error(
                loc,
                ErrorCode::SyntaxAtBindTime,
                "expression nests too deeply",
            );
            return;
        }
        {
            let e = self.hir.expr_mut(expr);
            e.is_lhs = ctx.is_lhs;
            e.instantiating = ctx.instantiating && !ctx.type_pos;
            if ctx.type_pos {
                e.is_type = true;
            }
        }
        if let Some(modulus) = ctx.modulus {
            self.expr_modulus.insert((sig, expr), modulus);
        }
        let child = QueueCtx {
            is_lhs: false,
            depth: ctx.depth + 1,
            ..ctx
        };
        let children: Vec<ExprId> = self.hir.expr(expr).children.iter().copied().collect();
        match self.hir.expr(expr).kind.clone() {
            // The member ident binds only after the scope is known.
            ExprKind::Dot => {
                if let Some(&scope) = children.first() {
                    self.push_expr_tree(queue, sig, scope, child);
                }
            }
            // The name ident binds at call time.
            ExprKind::NamedParam => {
                if let Some(&value) = children.get(1) {
                    self.push_expr_tree(queue, sig, value, child);
                }
            }
            // The target ident (or member) may not exist yet; the
            // assignment handler creates it.
            ExprKind::Assign { .. } => {
                let lhs = children[0];
                match self.hir.expr(lhs).kind {
                    ExprKind::Ident { .. } => {
                        self.hir.expr_mut(lhs).is_lhs = true;
                    }
                    ExprKind::Dot => {
                        self.hir.expr_mut(lhs).is_lhs = true;
                        let scope = self.hir.expr(lhs).children[0];
                        self.push_expr_tree(queue, sig, scope, child);
                    }
                    _ => {
                        self.push_expr_tree(
                            queue,
                            sig,
                            lhs,
                            QueueCtx {
                                is_lhs: true,
                                ..child
                            },
                        );
                    }
                }
                self.push_expr_tree(queue, sig, children[1], child);
            }
            // The modulus binds first; the value subtree binds inside the
            // modular region.
            ExprKind::Modint => {
                self.push_expr_tree(queue, sig, children[1], child);
                let region = QueueCtx {
                    modulus: Some(children[1]),
                    ..child
                };
                self.push_expr_tree(queue, sig, children[0], region);
                self.expr_modulus.insert((sig, expr), children[1]);
            }
            // Type position children.
            ExprKind::Cast => {
                let ty_ctx = QueueCtx {
                    type_pos: true,
                    instantiating: false,
                    ..child
                };
                self.push_expr_tree(queue, sig, children[0], ty_ctx);
                self.push_expr_tree(queue, sig, children[1], child);
            }
            ExprKind::Null | ExprKind::Arrayof | ExprKind::SecretType => {
                let ty_ctx = QueueCtx {
                    type_pos: true,
                    instantiating: false,
                    ..child
                };
                for &c in &children {
                    self.push_expr_tree(queue, sig, c, ty_ctx);
                }
            }
            // Bound as type expressions: instantiating forced off.
            ExprKind::Typeof | ExprKind::Widthof | ExprKind::Funcaddr => {
                let off = QueueCtx {
                    instantiating: false,
                    ..child
                };
                for &c in &children {
                    self.push_expr_tree(queue, sig, c, off);
                }
            }
            ExprKind::TypeInst => {
                if let Some(&template) = children.first() {
                    self.push_expr_tree(queue, sig, template, child);
                }
                let ty_ctx = QueueCtx {
                    type_pos: true,
                    instantiating: false,
                    ..child
                };
                for &arg in &children[1..] {
                    self.push_expr_tree(queue, sig, arg, ty_ctx);
                }
            }
            _ => {
                for &c in &children {
                    self.push_expr_tree(queue, sig, c, child);
                }
            }
        }
        queue.push_back(expr);
    }

    // =========================================================================
    // The scheduler loop
    // =========================================================================

    pub(crate) fn run_queue(&mut self) {
        while let Some(binding) = self.runnable.pop_front() {
            if self.binding(binding).destroyed {
                continue;
            }
            self.run_binding(binding);
        }
    }

    fn run_binding(&mut self, binding: BindingId) {
        loop {
            let Some(&expr) = self.binding(binding).queue.front() else {
                match self.post_process(binding) {
                    Ok(PostOutcome::Done) => self.finish_binding(binding),
                    Ok(PostOutcome::Rebind) => {
                        self.build_queue(binding);
                        continue;
                    }
                    Ok(PostOutcome::Park(event)) => self.park(binding, event),
                    Err(Diagnosed) => self.destroy_binding(binding),
                }
                return;
            };
            match self.bind_expression(binding, expr) {
                Ok(ExprOutcome::Ok) => {
                    self.binding_mut(binding).queue.pop_front();
                }
                Ok(ExprOutcome::Blocked(event)) => {
                    self.park(binding, event);
                    return;
                }
                Ok(ExprOutcome::Rebind) => {
                    self.build_queue(binding);
                }
                Err(Diagnosed) => {
                    self.destroy_binding(binding);
                    return;
                }
            }
        }
    }

    fn finish_binding(&mut self, binding: BindingId) {
        trace!(binding = binding.0, "binding complete");
        self.binding_mut(binding).destroyed = true;
        let sig = self.binding(binding).sig;
        self.release_sig_binding(sig);
    }

    pub(crate) fn destroy_binding(&mut self, binding: BindingId) {
        if self.binding(binding).destroyed {
            return;
        }
        trace!(binding = binding.0, "binding destroyed");
        self.binding_mut(binding).destroyed = true;
        let sig = self.binding(binding).sig;
        self.release_sig_binding(sig);
    }

    fn release_sig_binding(&mut self, sig: SigId) {
        let s = self.sig_mut(sig);
        debug_assert!(s.pending > 0);
        s.pending = s.pending.saturating_sub(1);
        let finalize = s.pending == 0 && !s.bound && !s.destroyed;
        if finalize {
            self.finalize_signature(sig);
        }
    }

    // =========================================================================
    // Termination: garbage collection and leftover events
    // =========================================================================

    /// Destroy templates that never produced an instantiated class, and
    /// cascade through their relations.
    pub(crate) fn collect_garbage(&mut self) {
        loop {
            let unused = self.hir.templates().find_map(|(id, t)| {
                let ctor_builtin = self.hir.func(t.constructor).linkage == Linkage::Builtin;
                let has_instance = t
                    .classes
                    .iter()
                    .any(|&c| self.hir.class(c).instantiated);
                (!ctor_builtin && !has_instance).then_some(id)
            });
            let Some(template) = unused else { break };
            self.destroy_template(template);
        }
        self.sweep_empty_events();
    }

    pub(crate) fn destroy_template(&mut self, template: TemplateId) {
        debug!(template = template.0, "gc template");
        let relations: Vec<_> = self
            .hir
            .relations()
            .filter(|(_, r)| r.parent == template || r.child == template)
            .map(|(id, r)| (id, r.child, r.cascade_delete))
            .collect();
        for (relation, child, cascade) in relations {
            self.hir.kill_relation(relation);
            if cascade && child != template && !self.hir.template(child).dead {
                self.destroy_template(child);
            }
        }
        let ctor = self.hir.template(template).constructor;
        let sigs: Vec<SigId> = self.sigs_of(ctor).collect();
        for sig in sigs {
            self.destroy_signature(sig);
        }
        self.hir.kill_template(template);
    }

    pub(crate) fn destroy_signature(&mut self, sig: SigId) {
        if self.sig(sig).destroyed {
            return;
        }
        self.sig_mut(sig).destroyed = true;
        let func = self.sig(sig).func;
        let key = self.sig(sig).key.clone();
        self.sig_index.remove(&(func, key));
        let owned: Vec<BindingId> = self
            .bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.destroyed && b.sig == sig)
            .map(|(i, _)| BindingId(i as u32))
            .collect();
        for binding in owned {
            self.binding_mut(binding).destroyed = true;
        }
        if let Some(event) = self.sig(sig).ret_event {
            self.event_mut(event).dead = true;
        }
    }

    /// Events whose waiter lists hold only destroyed bindings die.
    fn sweep_empty_events(&mut self) {
        for i in 0..self.events.len() {
            if self.events[i].dead {
                continue;
            }
            let all_dead = self.events[i]
                .waiters
                .iter()
                .all(|&w| self.bindings[w.0 as usize].destroyed);
            if all_dead {
                self.events[i].dead = true;
            }
        }
    }

    /// Remaining events with live waiters become diagnostics: undefined
    /// identifiers first (root causes), undetermined variables second,
    /// undetermined returns last.
    pub(crate) fn report_leftover_events(&mut self) {
        self.sweep_empty_events();
        let mut undefined: Vec<usize> = Vec::new();
        let mut variables: Vec<usize> = Vec::new();
        let mut returns: Vec<usize> = Vec::new();
        for (i, event) in self.events.iter().enumerate() {
            if event.dead {
                continue;
            }
            match event.kind {
                EventKind::UndefinedIdent(_) => undefined.push(i),
                EventKind::VarType(..) => variables.push(i),
                EventKind::SigReturn(_) => returns.push(i),
            }
        }
        for i in undefined {
            let EventKind::UndefinedIdent(ident) = self.events[i].kind else {
                continue;
            };
            let name = self.hir.name(self.hir.ident(ident).name).to_string();
            let loc = self.event_waiter_loc(i);
            self.diags.error(
                loc,
                ErrorCode::UndefinedIdentifier,
                format!("undefined identifier `{name}`"),
            );
            self.events[i].dead = true;
        }
        for i in variables {
            let EventKind::VarType(_, var) = self.events[i].kind else {
                continue;
            };
            let name = self.hir.name(self.hir.var(var).name).to_string();
            let loc = self.hir.var(var).loc;
            self.diags.error(
                loc,
                ErrorCode::UndeterminedType,
                format!("could not determine the type of `{name}`"),
            );
            self.events[i].dead = true;
        }
        for i in returns {
            let EventKind::SigReturn(sig) = self.events[i].kind else {
                continue;
            };
            if self.sig(sig).destroyed {
                self.events[i].dead = true;
                continue;
            }
            let name = self.sig_name(sig);
            let loc = self.hir.func(self.sig(sig).func).loc;
            self.diags.error(
                loc,
                ErrorCode::UndeterminedReturn,
                format!("could not determine the return type of `{name}`"),
            );
            self.events[i].dead = true;
        }
    }

    fn event_waiter_loc(&self, event_index: usize) -> Loc {
        self.events[event_index]
            .waiters
            .iter()
            .find(|&&w| !self.binding(w).destroyed)
            .and_then(|&w| self.binding(w).queue.front().copied())
            .map_or_else(Loc::dummy, |expr| self.hir.expr(expr).loc)
    }
}
