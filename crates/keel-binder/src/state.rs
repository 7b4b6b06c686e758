//! Binder state: signatures, bindings, events, and side tables.
//!
//! The graph stays purely syntactic; every datatype the binder discovers
//! lives in side tables here, keyed by the owning signature where the same
//! source tree can be specialized more than once.

use std::collections::VecDeque;

use keel_common::{Diagnostic, Diagnostics, ErrorCode, Loc};
use keel_hir::{ClassId, ExprId, FuncId, Hir, IdentId, StmtId, TemplateId, VarId};
use keel_types::{TypeId, TypeInterner};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::builtins::{BuiltinCallBinder, DefaultBuiltins};

/// Unique identifier for a signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SigId(pub u32);

/// Unique identifier for a binding (a unit of in-flight work).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BindingId(pub u32);

/// Unique identifier for an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventId(pub u32);

/// Per-parameter record on a signature.
#[derive(Clone, Debug)]
pub struct Paramspec {
    pub var: VarId,
    /// Bound datatype; `None` until a default-value binding discovers it.
    pub datatype: Option<TypeId>,
    /// The parameter carries a type rather than a value.
    pub is_type: bool,
    /// Storage for the parameter will exist at runtime.
    pub instantiated: bool,
}

/// A specialization of a function for a specific parameter datatype tuple.
#[derive(Clone, Debug)]
pub struct Signature {
    pub func: FuncId,
    /// Canonical key: one slot per source parameter; `None` marks a
    /// defaulted parameter whose type is still being discovered.
    pub key: Vec<Option<TypeId>>,
    pub paramspecs: Vec<Paramspec>,
    /// Return datatype, set lazily by return/yield post-processing.
    pub ret: Option<TypeId>,
    /// Event fired when the return type becomes usable.
    pub ret_event: Option<EventId>,
    pub ret_fired: bool,
    /// All bindings completed and the signature finalized. Monotone.
    pub bound: bool,
    /// Reached from an instantiating context. Monotone.
    pub instantiated: bool,
    pub address_taken: bool,
    /// Constructor signatures: the class this specialization constructs.
    pub class: Option<ClassId>,
    /// Creation site for call-chain diagnostics.
    pub call_site: Option<(SigId, Loc)>,
    /// Outstanding bindings; the signature finalizes when this drains.
    pub pending: u32,
    pub destroyed: bool,
}

/// Binding kinds; see the glossary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// One statement's expression tree.
    Statement(StmtId),
    /// A defaulted parameter's initializer, discovered during signature
    /// creation. The index is the parameter position.
    DefaultValue(usize),
    /// A variable's type-constraint expression.
    VarConstraint(VarId),
    /// The function's return-type-constraint expression.
    FuncConstraint,
}

/// A unit of in-flight work for one expression tree, pinned to a signature.
#[derive(Clone, Debug)]
pub struct Binding {
    pub kind: BindingKind,
    pub sig: SigId,
    /// Pending expressions, front = next to bind.
    pub queue: VecDeque<ExprId>,
    /// Values produced under this binding will have runtime storage.
    pub instantiating: bool,
    pub destroyed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// Waiting for a signature's return type.
    SigReturn(SigId),
    /// Waiting for a variable's datatype to become concrete. The optional
    /// signature scopes locals of multiply-specialized functions.
    VarType(Option<SigId>, VarId),
    /// Waiting for a name in a specific block to become defined.
    UndefinedIdent(IdentId),
}

/// A rendezvous point with a waiter list of bindings, in park order.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub waiters: Vec<BindingId>,
    pub dead: bool,
}

/// Outcome of offering one expression to the expression binder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExprOutcome {
    /// The expression acquired a datatype.
    Ok,
    /// Park on the event and resume when it fires.
    Blocked(EventId),
    /// The tree was mutated; rebuild the queue and retry.
    Rebind,
}

/// Marker for "a diagnostic was already reported"; the binding is
/// destroyed and the scheduler moves on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Diagnosed;

pub(crate) type BindResult = Result<ExprOutcome, Diagnosed>;

/// The binder engine.
pub struct BinderState {
    pub hir: Hir,
    pub types: TypeInterner,
    pub diags: Diagnostics,

    pub(crate) sigs: Vec<Signature>,
    pub(crate) sig_index: FxHashMap<(FuncId, Vec<Option<TypeId>>), SigId>,

    pub(crate) bindings: Vec<Binding>,
    pub(crate) events: Vec<Event>,
    pub(crate) runnable: VecDeque<BindingId>,

    // Event lookup, one live event per key.
    pub(crate) var_events: FxHashMap<(Option<SigId>, VarId), EventId>,
    pub(crate) ident_events: FxHashMap<IdentId, EventId>,

    // Side tables: discovered datatypes and call-site specializations.
    pub(crate) expr_types: FxHashMap<(SigId, ExprId), TypeId>,
    pub(crate) var_types: FxHashMap<(Option<SigId>, VarId), TypeId>,
    pub(crate) expr_sigs: FxHashMap<(SigId, ExprId), SigId>,
    /// Modular-int region context: arithmetic nodes inside `x mod p`.
    pub(crate) expr_modulus: FxHashMap<(SigId, ExprId), ExprId>,
    /// Rewritten format strings with explicit widths, for the backend.
    pub(crate) format_rewrites: FxHashMap<ExprId, String>,

    // Class canonicalization per (template, template-parameter tuple).
    pub(crate) class_index: FxHashMap<(TemplateId, Vec<TypeId>), ClassId>,
    pub(crate) class_args: FxHashMap<ClassId, Vec<TypeId>>,

    pub(crate) builtin_binder: Box<dyn BuiltinCallBinder>,
    pub(crate) label_counter: u32,
    pub(crate) main_sig: Option<SigId>,
}

impl BinderState {
    #[must_use]
    pub fn new(hir: Hir) -> Self {
        BinderState {
            hir,
            types: TypeInterner::new(),
            diags: Diagnostics::new(),
            sigs: Vec::new(),
            sig_index: FxHashMap::default(),
            bindings: Vec::new(),
            events: Vec::new(),
            runnable: VecDeque::new(),
            var_events: FxHashMap::default(),
            ident_events: FxHashMap::default(),
            expr_types: FxHashMap::default(),
            var_types: FxHashMap::default(),
            expr_sigs: FxHashMap::default(),
            expr_modulus: FxHashMap::default(),
            format_rewrites: FxHashMap::default(),
            class_index: FxHashMap::default(),
            class_args: FxHashMap::default(),
            builtin_binder: Box::new(DefaultBuiltins),
            label_counter: 0,
            main_sig: None,
        }
    }

    /// Replace the built-in call binder (the driver installs its own).
    pub fn set_builtin_binder(&mut self, binder: Box<dyn BuiltinCallBinder>) {
        self.builtin_binder = binder;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn sig(&self, id: SigId) -> &Signature {
        &self.sigs[id.0 as usize]
    }

    pub(crate) fn sig_mut(&mut self, id: SigId) -> &mut Signature {
        &mut self.sigs[id.0 as usize]
    }

    #[must_use]
    pub fn binding(&self, id: BindingId) -> &Binding {
        &self.bindings[id.0 as usize]
    }

    pub(crate) fn binding_mut(&mut self, id: BindingId) -> &mut Binding {
        &mut self.bindings[id.0 as usize]
    }

    #[must_use]
    pub fn event(&self, id: EventId) -> &Event {
        &self.events[id.0 as usize]
    }

    pub(crate) fn event_mut(&mut self, id: EventId) -> &mut Event {
        &mut self.events[id.0 as usize]
    }

    /// The signature the whole-program fixpoint was seeded with.
    #[must_use]
    pub fn main_sig(&self) -> Option<SigId> {
        self.main_sig
    }

    /// The datatype bound for an expression under a signature.
    #[must_use]
    pub fn expr_type(&self, sig: SigId, expr: ExprId) -> Option<TypeId> {
        self.expr_types.get(&(sig, expr)).copied()
    }

    /// The datatype bound for a variable (signature-scoped for locals of
    /// the signature's own function, global otherwise).
    #[must_use]
    pub fn var_type(&self, sig: SigId, var: VarId) -> Option<TypeId> {
        let key = self.var_key(sig, var);
        self.var_types.get(&key).copied()
    }

    /// The call-site signature recorded on a call expression.
    #[must_use]
    pub fn call_sig(&self, sig: SigId, expr: ExprId) -> Option<SigId> {
        self.expr_sigs.get(&(sig, expr)).copied()
    }

    /// The rewritten format string stored on a `%` expression.
    #[must_use]
    pub fn format_rewrite(&self, expr: ExprId) -> Option<&str> {
        self.format_rewrites.get(&expr).map(String::as_str)
    }

    /// Deterministic dump of every bound expression datatype, for
    /// determinism checks and driver debugging.
    #[must_use]
    pub fn expr_type_snapshot(&self) -> Vec<((u32, u32), TypeId)> {
        let mut entries: Vec<((u32, u32), TypeId)> = self
            .expr_types
            .iter()
            .map(|(&(sig, expr), &ty)| ((sig.0, expr.0), ty))
            .collect();
        entries.sort_unstable();
        entries
    }

    /// All live signatures of a function.
    pub fn sigs_of(&self, func: FuncId) -> impl Iterator<Item = SigId> + '_ {
        self.sigs
            .iter()
            .enumerate()
            .filter(move |(_, s)| !s.destroyed && s.func == func)
            .map(|(i, _)| SigId(i as u32))
    }

    /// Side-table key for a variable access: locals of the signature's own
    /// function are per-signature; globals, class members, and foreign
    /// locals share one slot.
    pub(crate) fn var_key(&self, sig: SigId, var: VarId) -> (Option<SigId>, VarId) {
        let mut block = self.hir.var(var).block;
        let sig_func = self.sig(sig).func;
        loop {
            match self.hir.block(block).owner {
                keel_hir::BlockOwner::Stmt => match self.hir.block(block).parent {
                    Some(parent) => block = parent,
                    None => return (None, var),
                },
                keel_hir::BlockOwner::Func(f) if f == sig_func => return (Some(sig), var),
                _ => return (None, var),
            }
        }
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Report a recoverable binding-time error with call-chain context.
    pub(crate) fn diag(
        &mut self,
        sig: SigId,
        loc: Loc,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Diagnosed {
        let mut diagnostic = Diagnostic::error(loc, code, message);
        // Walk the signature-creation sites for the call chain: each frame
        // names the specialization entered at that site.
        let mut current = sig;
        let mut depth = 0;
        while let Some((caller, site)) = self.sig(current).call_site {
            if depth >= 5 {
                break;
            }
            let callee = self.sig_name(current);
            diagnostic = diagnostic.with_call_site(site, &callee);
            current = caller;
            depth += 1;
        }
        debug!(?code, line = loc.line, "diagnostic");
        self.diags.report(diagnostic);
        Diagnosed
    }

    pub(crate) fn sig_name(&self, sig: SigId) -> String {
        let func = self.sig(sig).func;
        self.hir.name(self.hir.func(func).name).to_string()
    }

    pub(crate) fn type_name(&self, ty: TypeId) -> String {
        self.types.display(ty, &self.hir)
    }
}
