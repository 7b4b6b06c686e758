//! Compile-time value evaluator.
//!
//! The transformer executor evaluates its parameters with this small
//! interpreter: integer/float arithmetic, string concatenation, boolean
//! equality, identifier/path/dot lookup, and modular reduction. Anything
//! outside that surface is an evaluation failure the caller diagnoses.

use keel_hir::{BinOp, BlockId, ClassId, ExprId, ExprKind, FuncId, IdentTarget, TemplateId, UnOp};

use crate::state::BinderState;

/// A compile-time value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i128),
    Float(f64),
    Bool(bool),
    Str(String),
    Class(ClassId),
    Template(TemplateId),
    Func(FuncId),
}

impl Value {
    /// Render for `$name` textual substitution.
    #[must_use]
    pub fn substitution_text(&self, state: &BinderState) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Class(c) => {
                let template = state.hir.class(*c).template;
                let ctor = state.hir.template(template).constructor;
                state.hir.name(state.hir.func(ctor).name).to_string()
            }
            Value::Template(t) => {
                let ctor = state.hir.template(*t).constructor;
                state.hir.name(state.hir.func(ctor).name).to_string()
            }
            Value::Func(f) => state.hir.name(state.hir.func(*f).name).to_string(),
        }
    }
}

impl BinderState {
    /// Evaluate an expression to a compile-time value, reducing integers
    /// by `modulus` when one is in force.
    pub fn eval_expr(
        &self,
        block: BlockId,
        expr: ExprId,
        modulus: Option<i128>,
    ) -> Option<Value> {
        let kind = self.hir.expr(expr).kind.clone();
        let children: Vec<ExprId> = self.hir.expr(expr).children.iter().copied().collect();
        let value = match kind {
            ExprKind::UintLit { value, .. } => Value::Int(i128::from(value)),
            ExprKind::IntLit { value, .. } | ExprKind::AutoIntLit { value } => {
                Value::Int(i128::from(value))
            }
            ExprKind::FloatLit { value, .. } => Value::Float(value),
            ExprKind::BoolLit { value } => Value::Bool(value),
            ExprKind::StringLit { value } => Value::Str(value),
            ExprKind::Ident { name } => {
                let ident = self.hir.find_ident(block, name)?;
                self.eval_ident(ident, modulus)?
            }
            ExprKind::Dot => {
                let scope = self.eval_expr(block, children[0], modulus)?;
                let ExprKind::Ident { name } = self.hir.expr(children[1]).kind else {
                    return None;
                };
                let scope_block = match scope {
                    Value::Func(f) => self.hir.func(f).block,
                    Value::Template(t) => {
                        let ctor = self.hir.template(t).constructor;
                        self.hir.func(ctor).block
                    }
                    Value::Class(c) => self.hir.class(c).block,
                    _ => return None,
                };
                let ident = self.hir.find_in_block(scope_block, name)?;
                self.eval_ident(ident, modulus)?
            }
            ExprKind::Binary { op } => {
                let lhs = self.eval_expr(block, children[0], modulus)?;
                let rhs = self.eval_expr(block, children[1], modulus)?;
                eval_binary(op, lhs, rhs, modulus)?
            }
            ExprKind::Unary { op } => {
                let operand = self.eval_expr(block, children[0], modulus)?;
                match (op, operand) {
                    (UnOp::Negate, Value::Int(v)) => Value::Int(reduce(-v, modulus)),
                    (UnOp::Negate, Value::Float(v)) => Value::Float(-v),
                    (UnOp::Not, Value::Bool(v)) => Value::Bool(!v),
                    _ => return None,
                }
            }
            ExprKind::Modint => {
                let m = match self.eval_expr(block, children[1], None)? {
                    Value::Int(m) if m > 0 => m,
                    _ => return None,
                };
                self.eval_expr(block, children[0], Some(m))?
            }
            _ => return None,
        };
        Some(value)
    }

    fn eval_ident(&self, ident: keel_hir::IdentId, modulus: Option<i128>) -> Option<Value> {
        match self.hir.ident(ident).target {
            // A variable evaluates through its initializer, in its own
            // declaring block.
            IdentTarget::Var(var) => {
                let v = self.hir.var(var);
                let init = v.init?;
                let home = v.block;
                self.eval_expr(home, init, modulus)
            }
            IdentTarget::Func(func) => match self.hir.func(func).template {
                Some(template) => Some(Value::Template(template)),
                None => Some(Value::Func(func)),
            },
            IdentTarget::Undefined => None,
        }
    }
}

fn reduce(v: i128, modulus: Option<i128>) -> i128 {
    match modulus {
        Some(m) if m > 0 => v.rem_euclid(m),
        _ => v,
    }
}

fn eval_binary(op: BinOp, lhs: Value, rhs: Value, modulus: Option<i128>) -> Option<Value> {
    let value = match (op, lhs, rhs) {
        (BinOp::Add, Value::Int(a), Value::Int(b)) => Value::Int(reduce(a.checked_add(b)?, modulus)),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => Value::Int(reduce(a.checked_sub(b)?, modulus)),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => Value::Int(reduce(a.checked_mul(b)?, modulus)),
        (BinOp::Div, Value::Int(a), Value::Int(b)) => Value::Int(reduce(a.checked_div(b)?, modulus)),
        (BinOp::Rem, Value::Int(a), Value::Int(b)) => Value::Int(a.checked_rem(b)?),
        (BinOp::Add, Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (BinOp::Sub, Value::Float(a), Value::Float(b)) => Value::Float(a - b),
        (BinOp::Mul, Value::Float(a), Value::Float(b)) => Value::Float(a * b),
        (BinOp::Div, Value::Float(a), Value::Float(b)) => Value::Float(a / b),
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Value::Str(a + &b),
        (BinOp::Eq, Value::Bool(a), Value::Bool(b)) => Value::Bool(a == b),
        (BinOp::Eq, Value::Int(a), Value::Int(b)) => Value::Bool(a == b),
        (BinOp::Eq, Value::Str(a), Value::Str(b)) => Value::Bool(a == b),
        (BinOp::Ne, Value::Int(a), Value::Int(b)) => Value::Bool(a != b),
        _ => return None,
    };
    Some(value)
}
