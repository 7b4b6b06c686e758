//! Event plumbing, variable datatype resolution, and scope helpers for
//! `BinderState`.
//!
//! Events are the rendezvous between bindings: a binding that needs
//! monotone information (a return type, a variable type, an identifier
//! definition) parks on the event for it; resolution fires the event and
//! the waiters re-enter the runnable queue in park order.

use keel_common::{ErrorCode, Loc};
use keel_hir::{BlockId, ExprId, FuncKind, IdentId, VarId};
use keel_types::{Term, TypeId};
use tracing::{debug, trace};

use crate::state::{
    BinderState, Binding, BindingId, BindingKind, Diagnosed, Event, EventId, EventKind, SigId,
};

impl BinderState {
    // =========================================================================
    // Events
    // =========================================================================

    fn new_event(&mut self, kind: EventKind) -> EventId {
        let id = EventId(self.events.len() as u32);
        self.events.push(Event {
            kind,
            waiters: Vec::new(),
            dead: false,
        });
        id
    }

    /// Get or create the return event of a signature.
    pub(crate) fn sig_ret_event(&mut self, sig: SigId) -> EventId {
        if let Some(ev) = self.sig(sig).ret_event {
            return ev;
        }
        let ev = self.new_event(EventKind::SigReturn(sig));
        self.sig_mut(sig).ret_event = Some(ev);
        ev
    }

    /// Get or create the event for a variable's first concrete datatype.
    pub(crate) fn var_event(&mut self, key: (Option<SigId>, VarId)) -> EventId {
        if let Some(&ev) = self.var_events.get(&key) {
            return ev;
        }
        let ev = self.new_event(EventKind::VarType(key.0, key.1));
        self.var_events.insert(key, ev);
        ev
    }

    /// Get or create the event for an undefined ident becoming defined.
    pub(crate) fn ident_event(&mut self, ident: IdentId) -> EventId {
        if let Some(&ev) = self.ident_events.get(&ident) {
            return ev;
        }
        let ev = self.new_event(EventKind::UndefinedIdent(ident));
        self.ident_events.insert(ident, ev);
        ev
    }

    /// Park a binding on an event; it re-enters the runnable queue when the
    /// event fires.
    pub(crate) fn park(&mut self, binding: BindingId, event: EventId) {
        trace!(binding = binding.0, event = event.0, "park");
        self.event_mut(event).waiters.push(binding);
    }

    /// Fire an event: waiters move to the runnable FIFO in park order and
    /// the event record dies.
    pub(crate) fn fire_event(&mut self, event: EventId) {
        if self.event(event).dead {
            return;
        }
        let kind = self.event(event).kind;
        let waiters = std::mem::take(&mut self.event_mut(event).waiters);
        debug!(event = event.0, waiters = waiters.len(), ?kind, "fire event");
        for waiter in waiters {
            if !self.binding(waiter).destroyed {
                self.runnable.push_back(waiter);
            }
        }
        self.event_mut(event).dead = true;
        match kind {
            EventKind::SigReturn(sig) => {
                self.sig_mut(sig).ret_event = None;
            }
            EventKind::VarType(sig, var) => {
                self.var_events.remove(&(sig, var));
            }
            EventKind::UndefinedIdent(ident) => {
                self.ident_events.remove(&ident);
            }
        }
    }

    // =========================================================================
    // Variable datatypes
    // =========================================================================

    /// Record a variable's datatype, firing its event on the first
    /// transition to concrete. Concreteness is monotone per variable.
    pub(crate) fn set_var_type(&mut self, sig: SigId, var: VarId, ty: TypeId) {
        let key = self.var_key(sig, var);
        let was_concrete = self
            .var_types
            .get(&key)
            .is_some_and(|&prior| self.types.is_concrete(prior));
        self.var_types.insert(key, ty);
        if !was_concrete && self.types.is_concrete(ty) {
            if let Some(&ev) = self.var_events.get(&key) {
                self.fire_event(ev);
            }
        }
    }

    /// Unify an assignment's value type into a variable, diagnosing
    /// mismatches against the variable's established datatype.
    pub(crate) fn unify_var_type(
        &mut self,
        sig: SigId,
        var: VarId,
        ty: TypeId,
        loc: Loc,
    ) -> Result<TypeId, Diagnosed> {
        let key = self.var_key(sig, var);
        let joined = match self.var_types.get(&key) {
            Some(&prior) => match self.types.unify(prior, ty, &self.hir) {
                Some(joined) => joined,
                None => {
                    let prior_name = self.type_name(prior);
                    let ty_name = self.type_name(ty);
                    let var_name = self.hir.name(self.hir.var(var).name).to_string();
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("cannot assign {ty_name} to `{var_name}` of type {prior_name}"),
                    ));
                }
            },
            None => ty,
        };
        self.set_var_type(sig, var, joined);
        Ok(joined)
    }

    // =========================================================================
    // Ident definition notifications
    // =========================================================================

    /// A name just became defined in a block: fire any undefined-ident
    /// event parked on it.
    pub(crate) fn note_defined(&mut self, block: BlockId, name: keel_common::Atom) {
        if let Some(&ident) = self.hir.block(block).idents.get(&name)
            && let Some(&ev) = self.ident_events.get(&ident)
        {
            self.fire_event(ev);
        }
    }

    // =========================================================================
    // Scope helpers
    // =========================================================================

    /// The block a binding resolves identifiers in.
    pub(crate) fn binding_scope(&self, binding: BindingId) -> BlockId {
        let b = self.binding(binding);
        match b.kind {
            BindingKind::Statement(stmt) => self.hir.stmt(stmt).block,
            BindingKind::DefaultValue(index) => {
                let func = self.sig(b.sig).func;
                let var = self.hir.params(func)[index];
                self.hir.var(var).block
            }
            BindingKind::VarConstraint(var) => self.hir.var(var).block,
            BindingKind::FuncConstraint => {
                let func = self.sig(b.sig).func;
                self.hir.func(func).block
            }
        }
    }

    /// The scope block a dot expression searches, given the left side's
    /// datatype. Nullable class receivers auto-unwrap.
    pub(crate) fn scope_block_of(&self, ty: TypeId) -> Option<BlockId> {
        match self.types.term(ty) {
            Term::Class(class) => Some(self.hir.class(class).block),
            Term::Template(template) => {
                let ctor = self.hir.template(template).constructor;
                Some(self.hir.func(ctor).block)
            }
            Term::Struct(func, _) | Term::Enum(func) | Term::Enumclass(func) => {
                Some(self.hir.func(func).block)
            }
            Term::Function(func) => {
                let f = self.hir.func(func);
                matches!(
                    f.kind,
                    FuncKind::Module | FuncKind::Package | FuncKind::Enum | FuncKind::Struct
                )
                .then_some(f.block)
            }
            // Primitive receivers resolve methods through their built-in
            // template's block.
            _ => {
                let template = self.types.find_template(ty, &self.hir)?;
                let ctor = self.hir.template(template).constructor;
                Some(self.hir.func(ctor).block)
            }
        }
    }

    /// Allocate a binding and enqueue it as runnable.
    pub(crate) fn spawn_binding(
        &mut self,
        sig: SigId,
        kind: BindingKind,
        instantiating: bool,
    ) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        self.bindings.push(Binding {
            kind,
            sig,
            queue: std::collections::VecDeque::new(),
            instantiating,
            destroyed: false,
        });
        self.sig_mut(sig).pending += 1;
        self.build_queue(id);
        self.runnable.push_back(id);
        trace!(binding = id.0, sig = sig.0, ?kind, "spawn binding");
        id
    }

    /// The root expression a binding's queue is built from.
    pub(crate) fn binding_root(&self, binding: BindingId) -> Option<ExprId> {
        let b = self.binding(binding);
        match b.kind {
            BindingKind::Statement(stmt) => self.hir.stmt(stmt).expr,
            BindingKind::DefaultValue(index) => {
                let func = self.sig(b.sig).func;
                let var = self.hir.params(func)[index];
                self.hir.var(var).init
            }
            BindingKind::VarConstraint(var) => self.hir.var(var).type_constraint,
            BindingKind::FuncConstraint => {
                let func = self.sig(b.sig).func;
                self.hir.func(func).ret_constraint
            }
        }
    }
}
