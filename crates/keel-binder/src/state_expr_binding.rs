//! Per-expression typing rules.
//!
//! Expressions bind bottom-up: the queue builder guarantees children are
//! bound before their parent, except for the special forms (dot members,
//! named parameters, assignment targets) whose trailing idents the parent
//! handler resolves itself.

use keel_common::ErrorCode;
use keel_hir::{BinOp, ExprId, ExprKind, IdentTarget, UnOp, VarKind};
use keel_types::{Term, TypeId};
use smallvec::smallvec;

use crate::state::{BinderState, BindingId, BindResult, Diagnosed, ExprOutcome, SigId};

impl BinderState {
    pub(crate) fn set_expr_type(&mut self, sig: SigId, expr: ExprId, ty: TypeId) {
        self.expr_types.insert((sig, expr), ty);
    }

    /// A child's already-bound datatype. Children are queued before their
    /// parents, so a missing entry is an engine bug.
    pub(crate) fn child_type(
        &mut self,
        sig: SigId,
        expr: ExprId,
    ) -> Result<TypeId, Diagnosed> {
        match self.expr_type(sig, expr) {
            Some(ty) => Ok(ty),
            None => {
                let loc = self.hir.expr(expr).loc;
                Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::Internal,
                    "expression bound out of order",
                ))
            }
        }
    }

    /// Offer one expression to the binder.
    pub(crate) fn bind_expression(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let kind = self.hir.expr(expr).kind.clone();
        let loc = self.hir.expr(expr).loc;
        match kind {
            ExprKind::UintLit { value, width } => {
                if !uint_fits(value, width) {
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::SyntaxAtBindTime,
                        format!("literal {value} overflows u{width}"),
                    ));
                }
                let ty = self.types.uint(width);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::IntLit { value, width } => {
                if !int_fits(value, width) {
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::SyntaxAtBindTime,
                        format!("literal {value} overflows i{width}"),
                    ));
                }
                let ty = self.types.int(width);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            // Width-unspecified literals take the default width and stay
            // autocast so a width-specified sibling can narrow them.
            ExprKind::AutoIntLit { value } => {
                let width = keel_common::limits::DEFAULT_INT_WIDTH;
                let ty = if value >= 0 {
                    self.types.uint(width)
                } else {
                    self.types.int(width)
                };
                self.hir.expr_mut(expr).autocast = true;
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::FloatLit { width, .. } => {
                let ty = self.types.float(width);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::BoolLit { .. } => {
                self.set_expr_type(sig, expr, TypeId::BOOL);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::StringLit { .. } => {
                self.set_expr_type(sig, expr, TypeId::STR);
                Ok(ExprOutcome::Ok)
            }
            // Random values are secret at birth.
            ExprKind::RandUintLit { width } => {
                let ty = self.types.uint(width);
                let ty = self
                    .types
                    .set_secret(ty, true)
                    .expect("integers may be secret");
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::Ident { name } => self.bind_ident_expr(binding, expr, name),
            ExprKind::Binary { op } => self.bind_binary(binding, expr, op),
            ExprKind::Unary { op } => self.bind_unary(binding, expr, op),
            ExprKind::Assign { op } => self.bind_assign(binding, expr, op),
            ExprKind::Dot => self.bind_dot(binding, expr),
            ExprKind::NamedParam => {
                let value = self.hir.expr(expr).children[1];
                let name_expr = self.hir.expr(expr).children[0];
                let ty = self.child_type(sig, value)?;
                self.set_expr_type(sig, name_expr, ty);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::Call => self.bind_call(binding, expr),
            ExprKind::TypeInst => self.bind_type_inst(binding, expr),
            ExprKind::Index => self.bind_index(binding, expr),
            ExprKind::Slice => self.bind_slice(binding, expr),
            ExprKind::Select => self.bind_select(binding, expr),
            ExprKind::Modint => {
                let value = self.hir.expr(expr).children[0];
                let ty = self.child_type(sig, value)?;
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::Cast => self.bind_cast(binding, expr),
            ExprKind::Null => self.bind_null(binding, expr),
            ExprKind::Arrayof => self.bind_arrayof(binding, expr),
            ExprKind::Typeof => {
                let child = self.hir.expr(expr).children[0];
                let ty = self.child_type(sig, child)?;
                self.hir.expr_mut(expr).is_type = true;
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::Widthof => {
                let child = self.hir.expr(expr).children[0];
                let ty = self.child_type(sig, child)?;
                if !self.types.term(ty).is_number() {
                    let shown = self.type_name(ty);
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("widthof needs a number, got {shown}"),
                    ));
                }
                let ty = self.types.uint(32);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::Isnull => {
                let child = self.hir.expr(expr).children[0];
                let ty = self.child_type(sig, child)?;
                if !matches!(self.types.term(ty), Term::Class(_)) {
                    let shown = self.type_name(ty);
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TypeMismatch,
                        format!("isnull needs a class value, got {shown}"),
                    ));
                }
                self.set_expr_type(sig, expr, TypeId::BOOL);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::Funcaddr => self.bind_funcaddr(binding, expr),
            ExprKind::TupleLit => {
                let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
                let mut fields = Vec::with_capacity(children.len());
                for child in children {
                    fields.push(self.child_type(sig, child)?);
                }
                let ty = self.types.tuple(fields);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::ArrayLit => self.bind_array_lit(binding, expr),
            ExprKind::List => {
                self.set_expr_type(sig, expr, TypeId::NONE);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::UintType { width } => {
                let ty = self.types.uint(width);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::IntType { width } => {
                let ty = self.types.int(width);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::FloatType { width } => {
                let ty = self.types.float(width);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::StringType => {
                self.set_expr_type(sig, expr, TypeId::STR);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::BoolType => {
                self.set_expr_type(sig, expr, TypeId::BOOL);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::NoneType => {
                self.set_expr_type(sig, expr, TypeId::NONE);
                Ok(ExprOutcome::Ok)
            }
            ExprKind::SecretType => {
                let child = self.hir.expr(expr).children[0];
                let inner = self.child_type(sig, child)?;
                match self.types.set_secret(inner, true) {
                    Ok(ty) => {
                        self.set_expr_type(sig, expr, ty);
                        Ok(ExprOutcome::Ok)
                    }
                    Err(_) => Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::BadSecrecy,
                        "object references cannot be secret",
                    )),
                }
            }
        }
    }

    // =========================================================================
    // Identifiers
    // =========================================================================

    fn bind_ident_expr(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        name: keel_common::Atom,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let scope = self.binding_scope(binding);
        let Some(ident) = self.hir.find_ident(scope, name) else {
            // Allocate the undefined-ident record in the current block and
            // park until something defines the name.
            let ident = self.hir.undefined_ident(scope, name);
            self.hir.add_use(ident, expr);
            let event = self.ident_event(ident);
            return Ok(ExprOutcome::Blocked(event));
        };
        self.hir.add_use(ident, expr);
        match self.hir.ident(ident).target {
            IdentTarget::Var(var) => {
                let key = self.var_key(sig, var);
                let is_type_var = self.hir.var(var).is_type;
                match self.var_types.get(&key).copied() {
                    // Type-carrying variables may hold template types;
                    // value reads wait for concreteness.
                    Some(ty) if is_type_var || self.types.is_concrete(ty) => {
                        if is_type_var {
                            self.hir.expr_mut(expr).is_type = true;
                        }
                        self.set_expr_type(sig, expr, ty);
                        Ok(ExprOutcome::Ok)
                    }
                    _ => {
                        let event = self.var_event(key);
                        Ok(ExprOutcome::Blocked(event))
                    }
                }
            }
            IdentTarget::Func(func) => {
                let ty = match self.hir.func(func).template {
                    Some(template) => self.types.template(template),
                    None => self.types.function(func),
                };
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            IdentTarget::Undefined => {
                let event = self.ident_event(ident);
                Ok(ExprOutcome::Blocked(event))
            }
        }
    }

    // =========================================================================
    // Dot
    // =========================================================================

    fn bind_dot(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let scope_expr = self.hir.expr(expr).children[0];
        let member_expr = self.hir.expr(expr).children[1];
        let ExprKind::Ident { name } = self.hir.expr(member_expr).kind else {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::Internal,
                "dot member must be an identifier",
            ));
        };
        let mut scope_ty = self.child_type(sig, scope_expr)?;
        // Class-nullable receivers auto-unwrap.
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
        let Some(ident) = self.hir.find_in_block(scope_block, name) else {
            // Members of classes and templates can still appear (lazy
            // member creation, transformer injection): park on the name.
            if matches!(self.types.term(scope_ty), Term::Class(_) | Term::Template(_)) {
                let ident = self.hir.undefined_ident(scope_block, name);
                self.hir.add_use(ident, member_expr);
                let event = self.ident_event(ident);
                return Ok(ExprOutcome::Blocked(event));
            }
            let shown = self.hir.name(name).to_string();
            let scope_shown = self.type_name(scope_ty);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::UndefinedIdentifier,
                format!("{scope_shown} has no member `{shown}`"),
            ));
        };
        self.hir.add_use(ident, member_expr);
        let ty = match self.hir.ident(ident).target {
            IdentTarget::Var(var) => {
                if self.hir.var(var).kind == VarKind::EnumEntry {
                    let owner = self
                        .hir
                        .owning_func(self.hir.var(var).block)
                        .expect("enum entries live in enum blocks");
                    self.types.enumclass(owner)
                } else {
                    let key = self.var_key(sig, var);
                    match self.var_types.get(&key).copied() {
                        Some(ty) if self.types.is_concrete(ty) => ty,
                        _ => {
                            let event = self.var_event(key);
                            return Ok(ExprOutcome::Blocked(event));
                        }
                    }
                }
            }
            IdentTarget::Func(func) => match self.hir.func(func).template {
                Some(template) => self.types.template(template),
                None => self.types.function(func),
            },
            IdentTarget::Undefined => {
                let event = self.ident_event(ident);
                return Ok(ExprOutcome::Blocked(event));
            }
        };
        self.set_expr_type(sig, member_expr, ty);
        self.set_expr_type(sig, expr, ty);
        Ok(ExprOutcome::Ok)
    }

    // =========================================================================
    // Binary operators
    // =========================================================================

    fn bind_binary(&mut self, binding: BindingId, expr: ExprId, op: BinOp) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let lhs = self.hir.expr(expr).children[0];
        let rhs = self.hir.expr(expr).children[1];
        let lt = self.child_type(sig, lhs)?;
        let rt = self.child_type(sig, rhs)?;

        // Type union: `u32 | u64` in a constraint position.
        if op == BinOp::BitOr && self.hir.expr(lhs).is_type && self.hir.expr(rhs).is_type {
            self.hir.expr_mut(expr).is_type = true;
            self.set_expr_type(sig, expr, TypeId::NONE);
            return Ok(ExprOutcome::Ok);
        }

        // Operators on class operands try the user overload first; numeric
        // promotion between classes and numbers does not exist. Equality
        // without an overload falls back to reference identity.
        if matches!(self.types.term(lt), Term::Class(_)) {
            if self.has_operator_overload(lt, op.method_name()) {
                return self.rewrite_operator_overload(binding, expr, op.method_name(), lt);
            }
            if !matches!(op, BinOp::Eq | BinOp::Ne) {
                return Err(self.operand_error(sig, loc, op, lt, rt));
            }
        }

        // Format operator.
        if op == BinOp::Rem && self.types.term(lt) == Term::String {
            return self.bind_format(binding, expr, lhs, rhs);
        }

        // Inside a `mod p` region every arithmetic node is modular.
        if let Some(&modulus) = self.expr_modulus.get(&(sig, expr)) {
            return self.bind_modular_binary(binding, expr, op, modulus);
        }

        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let (ty, _) = self.autocast_pair(binding, expr, lhs, rhs)?;
                let term = self.types.term(ty);
                let ok = match term {
                    Term::Uint(_) | Term::Int(_) => true,
                    Term::Float(_) => op != BinOp::Rem,
                    Term::String | Term::Array(_) => op == BinOp::Add,
                    _ => false,
                };
                if !ok {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                let ty = self.join_secret(ty, lt, rt);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            BinOp::Exp => {
                if !self.types.term(lt).is_integer() {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                self.require_plain_uint(sig, rhs, "exponent")?;
                self.set_expr_type(sig, expr, lt);
                Ok(ExprOutcome::Ok)
            }
            BinOp::Shl | BinOp::Shr | BinOp::Rotl | BinOp::Rotr => {
                if !self.types.term(lt).is_integer() {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                self.require_plain_uint(sig, rhs, "shift amount")?;
                self.set_expr_type(sig, expr, lt);
                self.propagate_autocast(expr, lhs);
                Ok(ExprOutcome::Ok)
            }
            BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                // `^` doubles as string xor.
                if op == BinOp::BitXor
                    && self.types.term(lt) == Term::String
                    && self.types.term(rt) == Term::String
                {
                    let ty = self.join_secret(TypeId::STR, lt, rt);
                    self.set_expr_type(sig, expr, ty);
                    return Ok(ExprOutcome::Ok);
                }
                let (ty, _) = self.autocast_pair(binding, expr, lhs, rhs)?;
                if !matches!(self.types.term(ty), Term::Uint(_) | Term::Int(_)) {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                let ty = self.join_secret(ty, lt, rt);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            BinOp::And | BinOp::Or | BinOp::LogXor => {
                if self.types.term(lt) != Term::Bool || self.types.term(rt) != Term::Bool {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                let ty = self.join_secret(TypeId::BOOL, lt, rt);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let (ty, _) = self.autocast_pair(binding, expr, lhs, rhs)?;
                let ordered = matches!(
                    self.types.term(ty),
                    Term::Uint(_) | Term::Int(_) | Term::Float(_) | Term::String | Term::Array(_)
                );
                if !ordered {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                let result = self.join_secret(TypeId::BOOL, lt, rt);
                self.set_expr_type(sig, expr, result);
                Ok(ExprOutcome::Ok)
            }
            BinOp::Eq | BinOp::Ne => {
                self.autocast_siblings(binding, expr, lhs, rhs)?;
                let lt = self.child_type(sig, lhs)?;
                let rt = self.child_type(sig, rhs)?;
                if self.types.unify(lt, rt, &self.hir).is_none() {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                let result = self.join_secret(TypeId::BOOL, lt, rt);
                self.set_expr_type(sig, expr, result);
                Ok(ExprOutcome::Ok)
            }
        }
    }

    fn bind_modular_binary(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        op: BinOp,
        modulus: ExprId,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let lhs = self.hir.expr(expr).children[0];
        let rhs = self.hir.expr(expr).children[1];
        let lt = self.child_type(sig, lhs)?;
        let rt = self.child_type(sig, rhs)?;
        let modular = self.types.modint(modulus);
        let operand_ok = |state: &Self, ty: TypeId| {
            state.types.term(ty).is_integer()
        };
        match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                if !operand_ok(self, lt) || !operand_ok(self, rt) {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                let ty = self.join_secret(modular, lt, rt);
                self.set_expr_type(sig, expr, ty);
                Ok(ExprOutcome::Ok)
            }
            // Modular exponentiation rejects secrets on both sides.
            BinOp::Exp => {
                if !operand_ok(self, lt) {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                if self.types.secret(lt) {
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::BadSecrecy,
                        "modular exponentiation base cannot be secret",
                    ));
                }
                self.require_plain_uint(sig, rhs, "exponent")?;
                self.set_expr_type(sig, expr, modular);
                Ok(ExprOutcome::Ok)
            }
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if !operand_ok(self, lt) || !operand_ok(self, rt) {
                    return Err(self.operand_error(sig, loc, op, lt, rt));
                }
                let result = self.join_secret(TypeId::BOOL, lt, rt);
                self.set_expr_type(sig, expr, result);
                Ok(ExprOutcome::Ok)
            }
            _ => Err(self.diag(
                sig,
                loc,
                ErrorCode::OverloadResolutionFailure,
                format!("operator {} is not modular", op.method_name()),
            )),
        }
    }

    fn bind_format(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        lhs: ExprId,
        rhs: ExprId,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let ExprKind::StringLit { value: fmt } = self.hir.expr(lhs).kind.clone() else {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::SyntaxAtBindTime,
                "format string must be a string constant",
            ));
        };
        let rt = self.child_type(sig, rhs)?;
        let args: Vec<TypeId> = match self.types.term(rt) {
            Term::Tuple(fields) => fields,
            _ => vec![rt],
        };
        match crate::format::check_format(&self.types, &self.hir, &fmt, &args) {
            Ok(rewritten) => {
                self.format_rewrites.insert(expr, rewritten);
                self.set_expr_type(sig, expr, TypeId::STR);
                Ok(ExprOutcome::Ok)
            }
            Err(err) => {
                let code = if err.message.contains("does not match")
                    || err.message.contains("arguments")
                {
                    ErrorCode::TypeMismatch
                } else if err.message.contains("secret") {
                    ErrorCode::BadSecrecy
                } else {
                    ErrorCode::SyntaxAtBindTime
                };
                Err(self.diag(sig, loc, code, err.message))
            }
        }
    }

    // =========================================================================
    // Unary operators
    // =========================================================================

    fn bind_unary(&mut self, binding: BindingId, expr: ExprId, op: UnOp) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let operand = self.hir.expr(expr).children[0];
        let ty = self.child_type(sig, operand)?;
        if matches!(self.types.term(ty), Term::Class(_)) {
            let method = match op {
                UnOp::Negate => "-",
                UnOp::BitNot => "~",
                UnOp::Not => "!",
            };
            return self.rewrite_operator_overload(binding, expr, method, ty);
        }
        let ok = match op {
            UnOp::Negate => self.types.term(ty).is_number(),
            UnOp::BitNot => self.types.term(ty).is_integer(),
            UnOp::Not => self.types.term(ty) == Term::Bool,
        };
        if !ok {
            let shown = self.type_name(ty);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::OverloadResolutionFailure,
                format!("invalid operand type {shown}"),
            ));
        }
        self.set_expr_type(sig, expr, ty);
        self.propagate_autocast(expr, operand);
        Ok(ExprOutcome::Ok)
    }

    pub(crate) fn has_operator_overload(&mut self, class_ty: TypeId, method: &str) -> bool {
        let Some(scope) = self.scope_block_of(class_ty) else {
            return false;
        };
        let atom = self.hir.interner.intern(method);
        self.hir
            .find_in_block(scope, atom)
            .is_some_and(|id| matches!(self.hir.ident(id).target, IdentTarget::Func(_)))
    }

    /// Rewrite an operator whose class operand declares a matching operator
    /// method into a call to that method, and rebind.
    fn rewrite_operator_overload(
        &mut self,
        binding: BindingId,
        expr: ExprId,
        method: &str,
        class_ty: TypeId,
    ) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let scope = self
            .scope_block_of(class_ty)
            .expect("classes have scope blocks");
        let atom = self.hir.interner.intern(method);
        let found = self
            .hir
            .find_in_block(scope, atom)
            .filter(|&id| matches!(self.hir.ident(id).target, IdentTarget::Func(_)));
        if found.is_none() {
            let shown = self.type_name(class_ty);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::OverloadResolutionFailure,
                format!("{shown} does not overload operator {method}"),
            ));
        }
        let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
        let receiver = children[0];
        let member = self
            .hir
            .new_expr(ExprKind::Ident { name: atom }, smallvec![], loc);
        let callee = self
            .hir
            .new_expr(ExprKind::Dot, smallvec![receiver, member], loc);
        let mut call_children = smallvec![callee];
        call_children.extend(children[1..].iter().copied());
        let e = self.hir.expr_mut(expr);
        e.kind = ExprKind::Call;
        e.children = call_children;
        Ok(ExprOutcome::Rebind)
    }

    // =========================================================================
    // Indexing, slicing, select
    // =========================================================================

    fn bind_index(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let receiver = self.hir.expr(expr).children[0];
        let index = self.hir.expr(expr).children[1];
        let rt = self.child_type(sig, receiver)?;
        let it = self.child_type(sig, index)?;
        let ty = match self.types.term(rt) {
            Term::Array(element) => {
                self.require_plain_uint(sig, index, "index")?;
                element
            }
            Term::String => {
                self.require_plain_uint(sig, index, "index")?;
                self.types.uint(8)
            }
            Term::Tuple(fields) => {
                let position = self.const_index(sig, index, fields.len())?;
                fields[position]
            }
            Term::Struct(_, fields) => {
                let position = self.const_index(sig, index, fields.len())?;
                fields[position].1
            }
            _ => {
                let shown = self.type_name(rt);
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("type {shown} cannot be indexed"),
                ));
            }
        };
        let ty = self.join_secret(ty, rt, it);
        self.set_expr_type(sig, expr, ty);
        Ok(ExprOutcome::Ok)
    }

    fn const_index(
        &mut self,
        sig: SigId,
        index: ExprId,
        len: usize,
    ) -> Result<usize, Diagnosed> {
        let loc = self.hir.expr(index).loc;
        let value = match self.hir.expr(index).kind {
            ExprKind::UintLit { value, .. } => Some(value),
            ExprKind::AutoIntLit { value } if value >= 0 => Some(value as u64),
            _ => None,
        };
        match value {
            Some(v) if (v as usize) < len => Ok(v as usize),
            Some(v) => Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("index {v} is out of bounds for {len} fields"),
            )),
            None => Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                "tuple index must be a constant integer",
            )),
        }
    }

    fn bind_slice(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
        let rt = self.child_type(sig, children[0])?;
        if !matches!(self.types.term(rt), Term::Array(_) | Term::String) {
            let shown = self.type_name(rt);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("type {shown} cannot be sliced"),
            ));
        }
        for &bound in &children[1..] {
            self.require_plain_uint(sig, bound, "slice bound")?;
        }
        self.set_expr_type(sig, expr, rt);
        Ok(ExprOutcome::Ok)
    }

    fn bind_select(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
        let st = self.child_type(sig, children[0])?;
        if self.types.term(st) != Term::Bool {
            let shown = self.type_name(st);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("selector must be bool, got {shown}"),
            ));
        }
        self.autocast_siblings(binding, expr, children[1], children[2])?;
        let tt = self.child_type(sig, children[1])?;
        let ft = self.child_type(sig, children[2])?;
        let Some(joined) = self.types.unify(tt, ft, &self.hir) else {
            let a = self.type_name(tt);
            let b = self.type_name(ft);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("select branches disagree: {a} vs {b}"),
            ));
        };
        let ty = self.join_secret(joined, joined, st);
        self.set_expr_type(sig, expr, ty);
        Ok(ExprOutcome::Ok)
    }

    // =========================================================================
    // Casts, null, arrayof
    // =========================================================================

    fn bind_cast(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let target_expr = self.hir.expr(expr).children[0];
        let value_expr = self.hir.expr(expr).children[1];
        let mut target = self.child_type(sig, target_expr)?;
        let source = self.child_type(sig, value_expr)?;

        // Enum-class casts are rewritten to enum casts.
        if let Term::Enumclass(func) = self.types.term(target) {
            target = self.types.enum_ty(func);
        }

        let tt = self.types.term(target);
        let st = self.types.term(source);
        let permitted = match (&st, &tt) {
            _ if st.is_number() && tt.is_number() => true,
            // enum <-> integer, in both directions.
            (Term::Enum(_) | Term::Enumclass(_), t) if t.is_integer() => true,
            (s, Term::Enum(_)) if s.is_integer() => true,
            // string <-> [u8]
            (Term::String, Term::Array(e)) | (Term::Array(e), Term::String) => {
                self.types.term(*e) == Term::Uint(8)
            }
            // integer <-> array of uints
            (s, Term::Array(e)) if s.is_integer() => {
                matches!(self.types.term(*e), Term::Uint(_))
            }
            (Term::Array(e), t) if t.is_integer() => {
                matches!(self.types.term(*e), Term::Uint(_))
            }
            // class <-> integer of the template's ref width
            (Term::Class(class), Term::Uint(w) | Term::Int(w)) => {
                let template = self.hir.class(*class).template;
                u32::from(*w) == self.hir.template(template).ref_width
            }
            (Term::Uint(w) | Term::Int(w), Term::Class(class)) => {
                let template = self.hir.class(*class).template;
                u32::from(*w) == self.hir.template(template).ref_width
            }
            _ => false,
        };
        if !permitted {
            let from = self.type_name(source);
            let to = self.type_name(target);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::BadCast,
                format!("cannot cast {from} to {to}"),
            ));
        }
        // Secrecy of the result is forced to the source's: casting cannot
        // launder taint in either direction.
        let ty = match self.types.set_secret(target, self.types.secret(source)) {
            Ok(ty) => ty,
            Err(_) => {
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::BadSecrecy,
                    "cannot cast a secret value to an object reference",
                ));
            }
        };
        self.set_expr_type(sig, expr, ty);
        Ok(ExprOutcome::Ok)
    }

    fn bind_null(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
        // Bare `null` in a constructor defaults to the class under
        // construction.
        if children.is_empty() {
            let Some(class) = self.sig(sig).class else {
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TemplateMisuse,
                    "null needs a class type here",
                ));
            };
            let ty = self.types.class(class);
            let ty = self.types.set_nullable(ty, true).expect("class datatype");
            self.set_expr_type(sig, expr, ty);
            return Ok(ExprOutcome::Ok);
        }
        let ty = self.child_type(sig, children[0])?;
        let result = match self.types.term(ty) {
            Term::Class(_) => self.types.set_nullable(ty, true).expect("class datatype"),
            Term::Template(template) => {
                let Some(class) = self.default_class(template) else {
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::TemplateMisuse,
                        "null of a template needs a concrete class",
                    ));
                };
                let class_ty = self.types.class(class);
                self.types
                    .set_nullable(class_ty, true)
                    .expect("class datatype")
            }
            // Initializable primitives: null is the zero value.
            Term::Uint(_) | Term::Int(_) | Term::Float(_) | Term::Bool | Term::String => ty,
            _ => {
                let shown = self.type_name(ty);
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TemplateMisuse,
                    format!("null cannot produce a {shown}"),
                ));
            }
        };
        self.set_expr_type(sig, expr, result);
        Ok(ExprOutcome::Ok)
    }

    fn bind_arrayof(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let child = self.hir.expr(expr).children[0];
        let mut ty = self.child_type(sig, child)?;
        if let Term::Template(template) = self.types.term(ty) {
            let Some(class) = self.default_class(template) else {
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TemplateMisuse,
                    "arrayof a template needs a concrete class",
                ));
            };
            ty = self.types.class(class);
        }
        let result = self.types.array(ty);
        self.hir.expr_mut(expr).is_type = true;
        self.set_expr_type(sig, expr, result);
        Ok(ExprOutcome::Ok)
    }

    fn bind_array_lit(&mut self, binding: BindingId, expr: ExprId) -> BindResult {
        let sig = self.binding(binding).sig;
        let loc = self.hir.expr(expr).loc;
        let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
        if children.is_empty() {
            let ty = self.types.array(TypeId::NONE);
            self.set_expr_type(sig, expr, ty);
            return Ok(ExprOutcome::Ok);
        }
        // Autocast literals adopt the first width-specified element.
        let anchor = children
            .iter()
            .find(|&&c| !self.hir.expr(c).autocast)
            .copied();
        if let Some(anchor) = anchor {
            let target = self.child_type(sig, anchor)?;
            for &child in &children {
                if self.hir.expr(child).autocast {
                    self.autocast_to(sig, child, target)?;
                }
            }
        }
        let mut element = self.child_type(sig, children[0])?;
        for &child in &children[1..] {
            let ty = self.child_type(sig, child)?;
            let Some(joined) = self.types.unify(element, ty, &self.hir) else {
                let a = self.type_name(element);
                let b = self.type_name(ty);
                return Err(self.diag(
                    sig,
                    loc,
                    ErrorCode::TypeMismatch,
                    format!("array elements disagree: {a} vs {b}"),
                ));
            };
            element = joined;
        }
        let ty = self.types.array(element);
        self.set_expr_type(sig, expr, ty);
        Ok(ExprOutcome::Ok)
    }

    // =========================================================================
    // Autocast
    // =========================================================================

    /// Rewrite whichever sibling is a width-unspecified literal to the
    /// other's type. If both sides are autocast the parent stays autocast.
    fn autocast_siblings(
        &mut self,
        binding: BindingId,
        parent: ExprId,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<(), Diagnosed> {
        let sig = self.binding(binding).sig;
        let la = self.hir.expr(lhs).autocast;
        let ra = self.hir.expr(rhs).autocast;
        if la && !ra {
            let target = self.child_type(sig, rhs)?;
            if self.types.term(target).is_number() {
                self.autocast_to(sig, lhs, target)?;
            }
        } else if ra && !la {
            let target = self.child_type(sig, lhs)?;
            if self.types.term(target).is_number() {
                self.autocast_to(sig, rhs, target)?;
            }
        } else if la && ra {
            self.hir.expr_mut(parent).autocast = true;
        }
        Ok(())
    }

    /// Resolve the autocast pairing between two siblings and require the
    /// results to agree modulo secrecy.
    pub(crate) fn autocast_pair(
        &mut self,
        binding: BindingId,
        parent: ExprId,
        lhs: ExprId,
        rhs: ExprId,
    ) -> Result<(TypeId, TypeId), Diagnosed> {
        let sig = self.binding(binding).sig;
        self.autocast_siblings(binding, parent, lhs, rhs)?;
        let lt = self.child_type(sig, lhs)?;
        let rt = self.child_type(sig, rhs)?;
        if !self.types.equal_modulo_secret(lt, rt) {
            let loc = self.hir.expr(parent).loc;
            let a = self.type_name(lt);
            let b = self.type_name(rt);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("operand types disagree: {a} vs {b}"),
            ));
        }
        Ok((lt, rt))
    }

    /// Rewrite a width-unspecified literal (recursively through constant
    /// subexpressions) to the target datatype.
    pub(crate) fn autocast_to(
        &mut self,
        sig: SigId,
        expr: ExprId,
        target: TypeId,
    ) -> Result<(), Diagnosed> {
        let loc = self.hir.expr(expr).loc;
        match self.hir.expr(expr).kind.clone() {
            ExprKind::AutoIntLit { value } => {
                let fits = match self.types.term(target) {
                    Term::Uint(w) => value >= 0 && uint_fits(value as u64, w),
                    Term::Int(w) => int_fits(value, w),
                    Term::Float(_) => true,
                    Term::Modint(_) => value >= 0,
                    _ => false,
                };
                if !fits {
                    let shown = self.type_name(target);
                    return Err(self.diag(
                        sig,
                        loc,
                        ErrorCode::SyntaxAtBindTime,
                        format!("literal {value} does not fit {shown}"),
                    ));
                }
                // Secrecy belongs to the context, not the literal.
                let plain = self
                    .types
                    .set_secret(target, false)
                    .expect("numbers may clear secret");
                self.set_expr_type(sig, expr, plain);
                Ok(())
            }
            ExprKind::Binary { .. } | ExprKind::Unary { .. } | ExprKind::Select => {
                let children: Vec<ExprId> = self.hir.expr(expr).children.to_vec();
                for child in children {
                    if self.hir.expr(child).autocast {
                        self.autocast_to(sig, child, target)?;
                    }
                }
                let plain = self
                    .types
                    .set_secret(target, false)
                    .expect("numbers may clear secret");
                self.set_expr_type(sig, expr, plain);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn propagate_autocast(&mut self, parent: ExprId, child: ExprId) {
        if self.hir.expr(child).autocast {
            self.hir.expr_mut(parent).autocast = true;
        }
    }

    // =========================================================================
    // Shared checks
    // =========================================================================

    /// The result keeps `base`'s term with the OR of both operands' secret
    /// bits.
    pub(crate) fn join_secret(&self, base: TypeId, a: TypeId, b: TypeId) -> TypeId {
        let secret = self.types.secret(a) || self.types.secret(b);
        if self.types.secret(base) == secret {
            return base;
        }
        self.types.set_secret(base, secret).unwrap_or(base)
    }

    /// Shift amounts, exponents, and index expressions must be plain
    /// (non-secret) unsigned integers.
    pub(crate) fn require_plain_uint(
        &mut self,
        sig: SigId,
        expr: ExprId,
        what: &str,
    ) -> Result<(), Diagnosed> {
        let ty = self.child_type(sig, expr)?;
        let loc = self.hir.expr(expr).loc;
        if !matches!(self.types.term(ty), Term::Uint(_)) {
            let shown = self.type_name(ty);
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::TypeMismatch,
                format!("{what} must be an unsigned integer, got {shown}"),
            ));
        }
        if self.types.secret(ty) {
            return Err(self.diag(
                sig,
                loc,
                ErrorCode::BadSecrecy,
                format!("{what} cannot be secret"),
            ));
        }
        Ok(())
    }

    fn operand_error(
        &mut self,
        sig: SigId,
        loc: keel_common::Loc,
        op: BinOp,
        lt: TypeId,
        rt: TypeId,
    ) -> Diagnosed {
        let a = self.type_name(lt);
        let b = self.type_name(rt);
        self.diag(
            sig,
            loc,
            ErrorCode::OverloadResolutionFailure,
            format!("operator {} cannot take {a} and {b}", op.method_name()),
        )
    }
}

pub(crate) fn uint_fits(value: u64, width: u16) -> bool {
    width >= 64 || value < (1u64 << width)
}

pub(crate) fn int_fits(value: i64, width: u16) -> bool {
    if width >= 64 {
        return true;
    }
    let bound = 1i64 << (width - 1);
    value >= -bound && value < bound
}
