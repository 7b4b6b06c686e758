//! Call binding, argument matching, template instantiation, function
//! addresses, and assignment.
//!
//! A call identifies its callee (function, template constructor, function
//! pointer, or built-in), collects the parameter datatype tuple, and looks
//! up or creates the signature for it. If the signature has no return type
//! yet the binding parks on its return event.

use keel_common::ErrorCode;
use keel_hir::{BinOp, ExprId, ExprKind, FuncId, FuncKind, IdentTarget, VarKind};
use keel_types::{Term, TypeId};

use crate::state::{BinderState, BindingId, BindResult, Diagnosed, ExprOutcome, SigId};

impl BinderState {
    // =========================================================================
    // Calls
    // =========================================================================

    pub(crate) fn bind_call(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
        let callee = children[0];
        let args = &children[1..];
        let callee_ty = self.child_type(sig, callee)?;

        let func = match self.types.term(callee_ty) {
            Term::Function(func) => func,
            Term::Template(template) => self.hir.template(template).constructor,
            Term::Funcptr(ret, params) => {
                return self.bind_funcptr_call(binding, expr, args, ret, &params);
            }
            _ => {
                let shown = self.type_name(callee_ty);
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("type {shown} is not callable"),
                ));
            }
        };

        if matches!(self.hir.func(func).kind, FuncKind::Enum) {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                "enums are not callable",
            ));
        }

        // Method calls prepend the receiver as `self`; qualified calls
        // through modules, packages, and enums do not.
        let receiver_ty = self.method_receiver(sig, callee);
        let key = self.collect_arguments(binding, expr, func, args, receiver_ty)?;

        let instantiating = self.hir.expr(expr).instantiating;
        let sid = match self.lookup_signature(func, &key) {
            Some(sid) => {
                if instantiating && !self.sig(sid).instantiated {
                    self.sig_mut(sid).instantiated = true;
                }
                sid
            }
            None => self.create_signature(func, key, Some((sig, loc)), instantiating),
        };
        self.expr_sigs.insert((sig, expr), sid);

        // A bound builtin with no result type rejected its parameters.
        if self.hir.func(func).linkage == keel_hir::Linkage::Builtin
            && self.sig(sid).ret.is_none()
        {
            let shown = self.hir.name(self.hir.func(func).name).to_string();
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("invalid arguments to builtin `{shown}`"),
            ));
        }

        match self.sig(sid).ret {
            Some(ret) => {
                self.set_expr_type(sig, expr, ret);
                Ok(ExprOutcome::Ok)
            }
            None => {
                let event = self.sig_ret_event(sid);
                Ok(ExprOutcome::Blocked(event))
            }
        }
    }

    /// The receiver type for `obj.method(...)` calls: the dot's scope when
    /// it is a value (class instance or primitive), not a namespace.
    fn method_receiver(&self, sig: SigId, callee: ExprId) -> Option<TypeId> {
        if self.hir.expr(callee).kind != ExprKind::Dot {
            return None;
        }
        let scope = self.hir.expr(callee).children[0];
        let ty = self.expr_type(sig, scope)?;
        match self.types.term(ty) {
            Term::Function(_) | Term::Template(_) | Term::Enum(_) | Term::Enumclass(_) => None,
            _ => Some(ty),
        }
    }

    /// Build the parameter datatype tuple: positional arguments first,
    /// named arguments after the first named one, defaulted parameters as
    /// unknown slots for their DefaultValue bindings to fill.
    fn collect_arguments(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        func: FuncId,
        args: &[ExprId],
        receiver_ty: Option<TypeId>,
    ) -> Result<Vec<Option<TypeId>>, Diagnosed> {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let params = self.hir.params(func).to_vec();
        let mut slots: Vec<Option<TypeId>> = vec![None; params.len()];
        let is_ctor = self.hir.func(func).kind == FuncKind::Constructor
            && self.hir.func(func).template.is_some();
        let implicit_self = is_ctor || receiver_ty.is_some();

        let mut position = 0usize;
        if implicit_self {
            if params.is_empty() {
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    "callee takes no self parameter",
                ));
            }
            // Constructors compute self from the class; methods take the
            // receiver.
            if let Some(receiver) = receiver_ty {
                slots[0] = Some(receiver);
            }
            position = 1;
        }

        let mut named = false;
        for &arg in args {
            if self.hir.expr(arg).kind == ExprKind::NamedParam {
                named = true;
                let name_expr = self.hir.expr(arg).children[0];
                let ExprKind::Ident { name } = self.hir.expr(name_expr).kind else {
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::Internal,
                        "named argument without a name",
                    ));
                };
                let Some(index) = params
                    .iter()
                    .position(|&var| self.hir.var(var).name == name)
                else {
                    let shown = self.hir.name(name).to_string();
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("no parameter named `{shown}`"),
                    ));
                };
                slots[index] = Some(self.child_type(sig, arg)?);
                continue;
            }
            if named {
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::SyntaxAtBindTime,
                    "positional argument after a named argument",
                ));
            }
            if position >= params.len() {
                let shown = self.hir.name(self.hir.func(func).name).to_string();
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("too many arguments to `{shown}`"),
                ));
            }
            slots[position] = Some(self.child_type(sig, arg)?);
            position += 1;
        }

        // Unfilled slots need a default initializer; the signature spawns
        // a DefaultValue binding per empty slot.
        for (index, slot) in slots.iter().enumerate() {
            if slot.is_none() && !(implicit_self && index == 0) {
                let var = params[index];
                if self.hir.var(var).init.is_none() {
                    let shown = self.hir.name(self.hir.var(var).name).to_string();
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("missing argument `{shown}`"),
                    ));
                }
            }
        }
        Ok(slots)
    }

    fn bind_funcptr_call(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        args: &[ExprId],
        ret: TypeId,
        params: &[TypeId],
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        if args.len() != params.len() {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!(
                    "function pointer takes {} arguments, got {}",
                    params.len(),
                    args.len()
                ),
            ));
        }
        for (&arg, &param) in args.iter().zip(params) {
            let at = self.child_type(sig, arg)?;
            if at != param {
                let a = self.type_name(at);
                let p = self.type_name(param);
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("argument type {a} does not match parameter type {p}"),
                ));
            }
        }
        self.set_expr_type(sig, expr, ret);
        Ok(ExprOutcome::Ok)
    }

    // =========================================================================
    // Template instantiation
    // =========================================================================

    /// `T<args...>`: look up or create the class for the argument tuple.
    pub(crate) fn bind_type_inst(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
        let target_ty = self.child_type(sig, children[0])?;
        let Term::Template(template) = self.types.term(target_ty) else {
            let shown = self.type_name(target_ty);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TemplateMisuse,
                format!("{shown} is not a template"),
            ));
        };
        let ctor = self.hir.template(template).constructor;
        let expected = self
            .hir
            .params(ctor)
            .iter()
            .filter(|&&v| self.hir.var(v).in_class_signature)
            .count();
        if children.len() - 1 != expected {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TemplateMisuse,
                format!(
                    "template takes {expected} arguments, got {}",
                    children.len() - 1
                ),
            ));
        }
        let mut args = Vec::with_capacity(expected);
        for &arg in &children[1..] {
            let ty = self.child_type(sig, arg)?;
            if !self.hir.expr(arg).is_type && !self.types.is_concrete(ty) {
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TemplateMisuse,
                    "template arguments must be fully-qualified types",
                ));
            }
            args.push(ty);
        }
        let class = match self.class_index.get(&(template, args.clone())) {
            Some(&class) => class,
            None => {
                let class = self.hir.instantiate_class(template);
                self.class_index.insert((template, args.clone()), class);
                self.class_args.insert(class, args);
                class
            }
        };
        let ty = self.types.class(class);
        self.hir.expr_mut(expr).is_type = true;
        self.set_expr_type(sig, expr, ty);
        Ok(ExprOutcome::Ok)
    }

    // =========================================================================
    // Function addresses
    // =========================================================================

    /// `&f(...)`: requires the bound call child; marks the signature
    /// address-taken and instantiates every paramspec.
    pub(crate) fn bind_funcaddr(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let call = self.hir.expr(expr).children[0];
        let Some(target) = self.expr_sigs.get(&(sig, call)).copied() else {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                "funcaddr needs a direct call expression",
            ));
        };
        {
            let s = self.sig_mut(target);
            s.address_taken = true;
            for spec in &mut s.paramspecs {
                spec.instantiated = true;
            }
        }
        let vars: Vec<_> = self.sig(target).paramspecs.iter().map(|p| p.var).collect();
        for var in vars {
            self.hir.var_mut(var).instantiated = true;
        }
        let ret = self.sig(target).ret.unwrap_or(TypeId::NONE);
        let params: Vec<TypeId> = self
            .sig(target)
            .paramspecs
            .iter()
            .map(|p| p.datatype.unwrap_or(TypeId::NONE))
            .collect();
        let ty = self.types.funcptr(ret, params);
        self.set_expr_type(sig, expr, ty);
        Ok(ExprOutcome::Ok)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// `a = v` finds or creates the target; `self.x = v` finds or creates
    /// a class member; other targets (index, slice) unify in place.
    pub(crate) fn bind_assign(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        op: Option<BinOp>,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let lhs = self.hir.expr(expr).children[0];
        let rhs = self.hir.expr(expr).children[1];
        let rt = self.child_type(sig, rhs)?;
        match self.hir.expr(lhs).kind.clone() {
            ExprKind::Ident { name } => self.assign_ident(binding, expr, lhs, rhs, name, rt, op),
            ExprKind::Dot => self.assign_member(binding, expr, lhs, rhs, rt, op),
            _ => {
                let loc = self.hir.expr(expr).loc;
                let lt = self.child_type(sig, lhs)?;
                let Some(joined) = self.types.unify(lt, rt, &self.hir) else {
                    let a = self.type_name(lt);
                    let b = self.type_name(rt);
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("cannot assign {b} to an element of type {a}"),
                    ));
                };
                self.set_expr_type(sig, expr, joined);
                Ok(ExprOutcome::Ok)
            }
        }
    }

    fn assign_ident(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        lhs: ExprId,
        rhs: ExprId,
        name: keel_common::Atom,
        rt: TypeId,
        op: Option<BinOp>,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let scope = self.binding_scope(binding);
        let instantiating = self.binding(binding).instantiating;
        let existing = self.hir.find_ident(scope, name);
        match existing.map(|id| (id, self.hir.ident(id).target)) {
            Some((ident, IdentTarget::Var(var))) => {
                self.hir.add_use(ident, lhs);
                if self.hir.var(var).is_const {
                    let shown = self.hir.name(name).to_string();
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::ConstWrite,
                        format!("cannot assign to const `{shown}`"),
                    ));
                }
                let rt = self.adapt_assigned_value(binding, var, rhs, rt)?;
                if op.is_some() {
                    // Read-modify-write needs an established left side.
                    if self.var_type(sig, var).is_none() {
                        let key = self.var_key(sig, var);
                        let event = self.var_event(key);
                        return Ok(ExprOutcome::Blocked(event));
                    }
                }
                let joined = self.unify_var_type(sig, var, rt, loc)?;
                if let Some(op) = op {
                    self.check_op_assign(sig, loc, op, joined)?;
                }
                if instantiating {
                    self.hir.var_mut(var).instantiated = true;
                }
                self.set_expr_type(sig, lhs, joined);
                self.set_expr_type(sig, expr, joined);
                Ok(ExprOutcome::Ok)
            }
            Some((_, IdentTarget::Func(_))) => {
                let shown = self.hir.name(name).to_string();
                Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("cannot assign to function `{shown}`"),
                ))
            }
            Some((ident, IdentTarget::Undefined)) => {
                // A forward use created the record; the assignment defines
                // it in the block the use appeared in.
                let block = self.hir.ident(ident).block;
                self.create_assigned_var(binding, expr, lhs, block, name, rt, instantiating)
            }
            None => {
                if op.is_some() {
                    let shown = self.hir.name(name).to_string();
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::UndefinedIdentifier,
                        format!("`{shown}` is not defined"),
                    ));
                }
                self.create_assigned_var(binding, expr, lhs, scope, name, rt, instantiating)
            }
        }
    }

    fn create_assigned_var(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        lhs: ExprId,
        block: keel_hir::BlockId,
        name: keel_common::Atom,
        rt: TypeId,
        instantiating: bool,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let var = self.hir.new_variable(block, name, VarKind::Local, loc);
        self.hir.var_mut(var).instantiated = instantiating;
        self.set_var_type(sig, var, rt);
        if let Some(ident) = self.hir.find_in_block(block, name) {
            self.hir.add_use(ident, lhs);
        }
        self.note_defined(block, name);
        self.set_expr_type(sig, lhs, rt);
        self.set_expr_type(sig, expr, rt);
        Ok(ExprOutcome::Ok)
    }

    fn assign_member(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        lhs: ExprId,
        rhs: ExprId,
        rt: TypeId,
        op: Option<BinOp>,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let instantiating = self.binding(binding).instantiating;
        let scope_expr = self.hir.expr(lhs).children[0];
        let member_expr = self.hir.expr(lhs).children[1];
        let ExprKind::Ident { name } = self.hir.expr(member_expr).kind else {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::Internal,
                "dot member must be an identifier",
            ));
        };
        let mut scope_ty = self.child_type(sig, scope_expr)?;
        if self.types.nullable(scope_ty) {
            scope_ty = self
                .types
                .set_nullable(scope_ty, false)
                .expect("nullable implies class");
        }
        let Some(scope_block) = self.scope_block_of(scope_ty) else {
            let shown = self.type_name(scope_ty);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("type {shown} has no members"),
            ));
        };
        let is_class_scope = matches!(self.types.term(scope_ty), Term::Class(_));
        match self
            .hir
            .find_in_block(scope_block, name)
            .map(|id| (id, self.hir.ident(id).target))
        {
            Some((ident, IdentTarget::Var(var))) => {
                self.hir.add_use(ident, member_expr);
                if self.hir.var(var).is_const {
                    let shown = self.hir.name(name).to_string();
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::ConstWrite,
                        format!("cannot assign to const `{shown}`"),
                    ));
                }
                let rt = self.adapt_assigned_value(binding, var, rhs, rt)?;
                if op.is_some() && self.var_type(sig, var).is_none() {
                    let key = self.var_key(sig, var);
                    let event = self.var_event(key);
                    return Ok(ExprOutcome::Blocked(event));
                }
                let joined = self.unify_var_type(sig, var, rt, loc)?;
                if let Some(op) = op {
                    self.check_op_assign(sig, loc, op, joined)?;
                }
                if instantiating {
                    self.hir.var_mut(var).instantiated = true;
                }
                self.set_expr_type(sig, member_expr, joined);
                self.set_expr_type(sig, lhs, joined);
                self.set_expr_type(sig, expr, joined);
                Ok(ExprOutcome::Ok)
            }
            Some((_, IdentTarget::Func(_))) => {
                let shown = self.hir.name(name).to_string();
                Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("cannot assign to method `{shown}`"),
                ))
            }
            Some((_, IdentTarget::Undefined)) | None if is_class_scope => {
                // Lazy member creation: `self.x = v` materializes the
                // member variable on the class sub-block.
                let var = self.hir.new_variable(scope_block, name, VarKind::Local, loc);
                self.hir.var_mut(var).instantiated = instantiating;
                self.set_var_type(sig, var, rt);
                self.note_defined(scope_block, name);
                self.set_expr_type(sig, member_expr, rt);
                self.set_expr_type(sig, lhs, rt);
                self.set_expr_type(sig, expr, rt);
                Ok(ExprOutcome::Ok)
            }
            _ => {
                let shown = self.hir.name(name).to_string();
                let scope_shown = self.type_name(scope_ty);
                Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::UndefinedIdentifier,
                    format!("{scope_shown} has no member `{shown}`"),
                ))
            }
        }
    }

    /// The `op=` assignment forms accept the same operand types as their
    /// binary operators.
    fn check_op_assign(
        &mut self,
        sig: SigId,
        loc: keel_common::Loc,
        op: BinOp,
        ty: TypeId,
    ) -> Result<(), Diagnosed> {
        let term = self.types.term(ty);
        let ok = match op {
            BinOp::Add => {
                term.is_number() || matches!(term, Term::String | Term::Array(_))
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div => term.is_number(),
            BinOp::Rem
            | BinOp::Exp
            | BinOp::Shl
            | BinOp::Shr
            | BinOp::Rotl
            | BinOp::Rotr
            | BinOp::BitAnd
            | BinOp::BitOr => term.is_integer(),
            BinOp::BitXor => term.is_integer() || term == Term::String,
            BinOp::And | BinOp::Or | BinOp::LogXor => term == Term::Bool,
            _ => false,
        };
        if ok {
            return Ok(());
        }
        let shown = self.type_name(ty);
        Err(self.diag(
            sig,
            loc,
            ErrorCode::OverloadResolutionFailure,
            format!("operator {}= cannot take {shown}", op.method_name()),
        ))
    }

    /// Autocast an assigned literal toward the target's established or
    /// constrained type.
    fn adapt_assigned_value(
        &mut self,
        binding: BindingId,
        var: keel_hir::VarId,
        rhs: ExprId,
        rt: TypeId,
    ) -> Result<TypeId, Diagnosed> {
        let sig = self.binding(binding).sig;
        if !self.hir.expr(rhs).autocast {
            return Ok(rt);
        }
        let target = self.var_type(sig, var).or_else(|| {
            let constraint = self.hir.var(var).type_constraint?;
            let block = self.hir.var(var).block;
            self.type_annotation(block, constraint)
        });
        match target {
            Some(target) if self.types.term(target).is_number() => {
                self.autocast_to(sig, rhs, target)?;
                self.child_type(sig, rhs)
            }
            _ => Ok(rt),
        }
    }
}
