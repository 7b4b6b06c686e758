//! Program construction API.
//!
//! `ProgramBuilder` is the surface the parser-side HIR builder drives, and
//! the way tests write programs. It keeps a current-block stack so nested
//! functions and statement sub-blocks read like the source they model.

use keel_common::{Atom, Loc};
use smallvec::{SmallVec, smallvec};

use crate::decl::{FuncId, FuncKind, Linkage, TemplateId, VarId, VarKind};
use crate::expr::{BinOp, ExprId, ExprKind, UnOp};
use crate::hir::{BlockId, BlockOwner, Hir};
use crate::stmt::{StmtId, StmtKind};

pub struct ProgramBuilder {
    hir: Hir,
    block_stack: Vec<BlockId>,
    func_stack: Vec<FuncId>,
    next_line: u32,
}

impl ProgramBuilder {
    #[must_use]
    pub fn new() -> Self {
        let hir = Hir::new();
        let root = hir.root;
        ProgramBuilder {
            hir,
            block_stack: vec![root],
            func_stack: Vec::new(),
            next_line: 1,
        }
    }

    /// A builder with the built-in templates installed (`Array`, `Uint`,
    /// `Int`, `Float`, `String`), so primitive method lookup and foreach
    /// desugaring work.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut b = Self::new();
        b.install_builtins();
        b
    }

    #[must_use]
    pub fn hir(&self) -> &Hir {
        &self.hir
    }

    pub fn hir_mut(&mut self) -> &mut Hir {
        &mut self.hir
    }

    #[must_use]
    pub fn finish(self) -> Hir {
        assert_eq!(self.block_stack.len(), 1, "unbalanced begin/end");
        self.hir
    }

    pub fn intern(&mut self, s: &str) -> Atom {
        self.hir.interner.intern(s)
    }

    #[must_use]
    pub fn current_block(&self) -> BlockId {
        *self.block_stack.last().expect("builder has a current block")
    }

    fn next_loc(&mut self) -> Loc {
        let loc = Loc::new(self.next_line);
        self.next_line += 1;
        loc
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    pub fn begin_function(&mut self, name: &str, kind: FuncKind, params: &[&str]) -> FuncId {
        self.begin_function_with(name, kind, Linkage::Module, params)
    }

    pub fn begin_function_with(
        &mut self,
        name: &str,
        kind: FuncKind,
        linkage: Linkage,
        params: &[&str],
    ) -> FuncId {
        let atom = self.intern(name);
        let loc = self.next_loc();
        let parent = self.current_block();
        let func = self.hir.new_function(parent, atom, kind, linkage, loc);
        for param in params {
            let param_atom = self.intern(param);
            let param_loc = self.next_loc();
            self.hir.new_param(func, param_atom, param_loc);
        }
        self.block_stack.push(self.hir.func(func).block);
        self.func_stack.push(func);
        func
    }

    pub fn end_function(&mut self) {
        self.func_stack.pop().expect("inside a function");
        self.block_stack.pop();
    }

    /// Make the function just declared a template-instantiable constructor.
    pub fn make_template(&mut self, constructor: FuncId, ref_width: u32) -> TemplateId {
        self.hir.new_template(constructor, ref_width)
    }

    /// Mark a constructor parameter as participating in class identity.
    pub fn template_param(&mut self, func: FuncId, index: usize) {
        let var = self.hir.params(func)[index];
        self.hir.var_mut(var).in_class_signature = true;
    }

    #[must_use]
    pub fn param(&self, func: FuncId, index: usize) -> VarId {
        self.hir.params(func)[index]
    }

    pub fn set_param_default(&mut self, func: FuncId, index: usize, init: ExprId) {
        let var = self.hir.params(func)[index];
        self.hir.var_mut(var).init = Some(init);
    }

    pub fn set_param_constraint(&mut self, func: FuncId, index: usize, constraint: ExprId) {
        let var = self.hir.params(func)[index];
        self.hir.var_mut(var).type_constraint = Some(constraint);
    }

    pub fn set_ret_constraint(&mut self, func: FuncId, constraint: ExprId) {
        self.hir.func_mut(func).ret_constraint = Some(constraint);
    }

    /// Declare a local variable in the current block (no initializer; the
    /// binder normally creates locals lazily from assignments).
    pub fn local_var(&mut self, name: &str) -> VarId {
        let atom = self.intern(name);
        let loc = self.next_loc();
        let block = self.current_block();
        self.hir.new_variable(block, atom, VarKind::Local, loc)
    }

    /// Declare an enum entry variable in the current (enum function) block.
    pub fn enum_entry(&mut self, name: &str, value: ExprId) -> VarId {
        let atom = self.intern(name);
        let loc = self.next_loc();
        let block = self.current_block();
        let var = self.hir.new_variable(block, atom, VarKind::EnumEntry, loc);
        self.hir.var_mut(var).init = Some(value);
        self.hir.var_mut(var).is_const = true;
        var
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr(&mut self, kind: ExprKind, children: SmallVec<[ExprId; 2]>) -> ExprId {
        let loc = Loc::new(self.next_line.saturating_sub(1).max(1));
        self.hir.new_expr(kind, children, loc)
    }

    pub fn uint_lit(&mut self, value: u64, width: u16) -> ExprId {
        self.expr(ExprKind::UintLit { value, width }, smallvec![])
    }

    pub fn int_lit(&mut self, value: i64, width: u16) -> ExprId {
        self.expr(ExprKind::IntLit { value, width }, smallvec![])
    }

    /// Width-unspecified integer literal; the binder autocasts it.
    pub fn auto_int(&mut self, value: i64) -> ExprId {
        self.expr(ExprKind::AutoIntLit { value }, smallvec![])
    }

    pub fn float_lit(&mut self, value: f64, width: u16) -> ExprId {
        self.expr(ExprKind::FloatLit { value, width }, smallvec![])
    }

    pub fn bool_lit(&mut self, value: bool) -> ExprId {
        self.expr(ExprKind::BoolLit { value }, smallvec![])
    }

    pub fn string_lit(&mut self, value: &str) -> ExprId {
        self.expr(
            ExprKind::StringLit {
                value: value.to_string(),
            },
            smallvec![],
        )
    }

    pub fn rand_uint(&mut self, width: u16) -> ExprId {
        self.expr(ExprKind::RandUintLit { width }, smallvec![])
    }

    pub fn ident_expr(&mut self, name: &str) -> ExprId {
        let atom = self.intern(name);
        self.expr(ExprKind::Ident { name: atom }, smallvec![])
    }

    pub fn binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.expr(ExprKind::Binary { op }, smallvec![lhs, rhs])
    }

    pub fn add(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.binary(BinOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.binary(BinOp::Mul, lhs, rhs)
    }

    pub fn eq(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.binary(BinOp::Eq, lhs, rhs)
    }

    pub fn unary(&mut self, op: UnOp, operand: ExprId) -> ExprId {
        self.expr(ExprKind::Unary { op }, smallvec![operand])
    }

    pub fn assign_expr(&mut self, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.hir.expr_mut(lhs).is_lhs = true;
        self.expr(ExprKind::Assign { op: None }, smallvec![lhs, rhs])
    }

    pub fn op_assign_expr(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.hir.expr_mut(lhs).is_lhs = true;
        self.expr(ExprKind::Assign { op: Some(op) }, smallvec![lhs, rhs])
    }

    /// `scope.member`
    pub fn dot(&mut self, scope: ExprId, member: &str) -> ExprId {
        let member_expr = self.ident_expr(member);
        self.expr(ExprKind::Dot, smallvec![scope, member_expr])
    }

    pub fn named_param(&mut self, name: &str, value: ExprId) -> ExprId {
        let name_expr = self.ident_expr(name);
        self.expr(ExprKind::NamedParam, smallvec![name_expr, value])
    }

    pub fn call(&mut self, callee: ExprId, args: &[ExprId]) -> ExprId {
        let mut children: SmallVec<[ExprId; 2]> = smallvec![callee];
        children.extend_from_slice(args);
        self.expr(ExprKind::Call, children)
    }

    /// `receiver.method(args...)`
    pub fn method_call(&mut self, receiver: ExprId, method: &str, args: &[ExprId]) -> ExprId {
        let callee = self.dot(receiver, method);
        self.call(callee, args)
    }

    /// `T<args...>`
    pub fn type_inst(&mut self, template: ExprId, args: &[ExprId]) -> ExprId {
        let mut children: SmallVec<[ExprId; 2]> = smallvec![template];
        children.extend_from_slice(args);
        self.expr(ExprKind::TypeInst, children)
    }

    pub fn index(&mut self, receiver: ExprId, idx: ExprId) -> ExprId {
        self.expr(ExprKind::Index, smallvec![receiver, idx])
    }

    pub fn slice(&mut self, receiver: ExprId, lower: ExprId, upper: ExprId) -> ExprId {
        self.expr(ExprKind::Slice, smallvec![receiver, lower, upper])
    }

    pub fn select(&mut self, selector: ExprId, on_true: ExprId, on_false: ExprId) -> ExprId {
        self.expr(ExprKind::Select, smallvec![selector, on_true, on_false])
    }

    /// `value mod modulus`
    pub fn modint(&mut self, value: ExprId, modulus: ExprId) -> ExprId {
        self.expr(ExprKind::Modint, smallvec![value, modulus])
    }

    /// `<type> value`
    pub fn cast(&mut self, ty: ExprId, value: ExprId) -> ExprId {
        self.expr(ExprKind::Cast, smallvec![ty, value])
    }

    pub fn null_expr(&mut self, ty: ExprId) -> ExprId {
        self.expr(ExprKind::Null, smallvec![ty])
    }

    /// Bare `null`: in a constructor default it takes the class under
    /// construction.
    pub fn bare_null(&mut self) -> ExprId {
        self.expr(ExprKind::Null, smallvec![])
    }

    pub fn arrayof(&mut self, ty: ExprId) -> ExprId {
        self.expr(ExprKind::Arrayof, smallvec![ty])
    }

    pub fn typeof_expr(&mut self, value: ExprId) -> ExprId {
        self.expr(ExprKind::Typeof, smallvec![value])
    }

    pub fn widthof(&mut self, value: ExprId) -> ExprId {
        self.expr(ExprKind::Widthof, smallvec![value])
    }

    pub fn isnull(&mut self, value: ExprId) -> ExprId {
        self.expr(ExprKind::Isnull, smallvec![value])
    }

    pub fn funcaddr(&mut self, call: ExprId) -> ExprId {
        self.expr(ExprKind::Funcaddr, smallvec![call])
    }

    pub fn tuple_lit(&mut self, elements: &[ExprId]) -> ExprId {
        self.expr(ExprKind::TupleLit, SmallVec::from_slice(elements))
    }

    pub fn array_lit(&mut self, elements: &[ExprId]) -> ExprId {
        self.expr(ExprKind::ArrayLit, SmallVec::from_slice(elements))
    }

    pub fn list(&mut self, elements: &[ExprId]) -> ExprId {
        self.expr(ExprKind::List, SmallVec::from_slice(elements))
    }

    pub fn uint_type(&mut self, width: u16) -> ExprId {
        self.expr(ExprKind::UintType { width }, smallvec![])
    }

    pub fn int_type(&mut self, width: u16) -> ExprId {
        self.expr(ExprKind::IntType { width }, smallvec![])
    }

    pub fn float_type(&mut self, width: u16) -> ExprId {
        self.expr(ExprKind::FloatType { width }, smallvec![])
    }

    pub fn string_type(&mut self) -> ExprId {
        self.expr(ExprKind::StringType, smallvec![])
    }

    pub fn bool_type(&mut self) -> ExprId {
        self.expr(ExprKind::BoolType, smallvec![])
    }

    pub fn none_type(&mut self) -> ExprId {
        self.expr(ExprKind::NoneType, smallvec![])
    }

    pub fn secret_type(&mut self, inner: ExprId) -> ExprId {
        self.expr(ExprKind::SecretType, smallvec![inner])
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn stmt(&mut self, kind: StmtKind, expr: Option<ExprId>) -> StmtId {
        let loc = self.next_loc();
        let block = self.current_block();
        self.hir.new_stmt(block, kind, expr, None, loc)
    }

    fn begin_stmt(&mut self, kind: StmtKind, expr: Option<ExprId>) -> StmtId {
        let loc = self.next_loc();
        let block = self.current_block();
        let sub = self.hir.new_block(Some(block), BlockOwner::Stmt);
        let stmt = self.hir.new_stmt(block, kind, expr, Some(sub), loc);
        self.block_stack.push(sub);
        stmt
    }

    pub fn end_block(&mut self) {
        assert!(self.block_stack.len() > 1, "unbalanced end_block");
        self.block_stack.pop();
    }

    /// `lhs = rhs` as a statement.
    pub fn assign_stmt(&mut self, lhs: ExprId, rhs: ExprId) -> StmtId {
        let assign = self.assign_expr(lhs, rhs);
        self.stmt(StmtKind::Assign, Some(assign))
    }

    /// `name = rhs` as a statement.
    pub fn assign_var_stmt(&mut self, name: &str, rhs: ExprId) -> StmtId {
        let lhs = self.ident_expr(name);
        self.assign_stmt(lhs, rhs)
    }

    /// `lhs op= rhs` as a statement.
    pub fn op_assign_stmt(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> StmtId {
        let assign = self.op_assign_expr(op, lhs, rhs);
        self.stmt(StmtKind::Assign, Some(assign))
    }

    /// An expression evaluated for effect.
    pub fn expr_stmt(&mut self, expr: ExprId) -> StmtId {
        self.stmt(StmtKind::Call, Some(expr))
    }

    pub fn return_stmt(&mut self, expr: Option<ExprId>) -> StmtId {
        self.stmt(StmtKind::Return, expr)
    }

    pub fn yield_stmt(&mut self, expr: ExprId) -> StmtId {
        self.stmt(StmtKind::Yield, Some(expr))
    }

    pub fn print_stmt(&mut self, args: &[ExprId]) -> StmtId {
        let list = self.list(args);
        self.stmt(StmtKind::Print, Some(list))
    }

    pub fn println_stmt(&mut self, args: &[ExprId]) -> StmtId {
        let list = self.list(args);
        self.stmt(StmtKind::Println, Some(list))
    }

    pub fn assert_stmt(&mut self, args: &[ExprId]) -> StmtId {
        let list = self.list(args);
        self.stmt(StmtKind::Assert, Some(list))
    }

    pub fn panic_stmt(&mut self, args: &[ExprId]) -> StmtId {
        let list = self.list(args);
        self.stmt(StmtKind::Panic, Some(list))
    }

    pub fn raise_stmt(&mut self, args: &[ExprId]) -> StmtId {
        let list = self.list(args);
        self.stmt(StmtKind::Raise, Some(list))
    }

    pub fn ref_stmt(&mut self, expr: ExprId) -> StmtId {
        self.stmt(StmtKind::Ref, Some(expr))
    }

    pub fn unref_stmt(&mut self, expr: ExprId) -> StmtId {
        self.stmt(StmtKind::Unref, Some(expr))
    }

    pub fn begin_if(&mut self, cond: ExprId) -> StmtId {
        self.begin_stmt(StmtKind::If, Some(cond))
    }

    pub fn begin_elseif(&mut self, cond: ExprId) -> StmtId {
        self.begin_stmt(StmtKind::ElseIf, Some(cond))
    }

    pub fn begin_else(&mut self) -> StmtId {
        self.begin_stmt(StmtKind::Else, None)
    }

    pub fn begin_while(&mut self, cond: ExprId) -> StmtId {
        self.begin_stmt(StmtKind::While, Some(cond))
    }

    pub fn begin_do(&mut self, cond: ExprId) -> StmtId {
        self.begin_stmt(StmtKind::Do, Some(cond))
    }

    /// `for name in iterand { ... }`. The loop variable is the sub-block's
    /// first variable.
    pub fn begin_foreach(&mut self, name: &str, iterand: ExprId) -> (StmtId, VarId) {
        let stmt = self.begin_stmt(StmtKind::Foreach, Some(iterand));
        let var = self.local_var(name);
        (stmt, var)
    }

    pub fn begin_switch(&mut self, scrutinee: ExprId) -> StmtId {
        self.begin_stmt(StmtKind::Switch, Some(scrutinee))
    }

    pub fn begin_typeswitch(&mut self, scrutinee: ExprId) -> StmtId {
        self.begin_stmt(StmtKind::Typeswitch, Some(scrutinee))
    }

    /// A `case` with its list of values (switch) or types (typeswitch).
    pub fn begin_case(&mut self, entries: &[ExprId]) -> StmtId {
        let list = self.list(entries);
        self.begin_stmt(StmtKind::Case, Some(list))
    }

    pub fn begin_default(&mut self) -> StmtId {
        self.begin_stmt(StmtKind::Default, None)
    }

    pub fn relation_stmt(&mut self, call: ExprId) -> StmtId {
        self.stmt(StmtKind::Relation, Some(call))
    }

    pub fn transform_stmt(&mut self, call: ExprId) -> StmtId {
        self.stmt(StmtKind::Transform, Some(call))
    }

    pub fn begin_appendcode(&mut self, path: Option<ExprId>) -> StmtId {
        self.begin_stmt(StmtKind::AppendCode, path)
    }

    pub fn begin_prependcode(&mut self, path: Option<ExprId>) -> StmtId {
        self.begin_stmt(StmtKind::PrependCode, path)
    }

    // =========================================================================
    // Built-in templates
    // =========================================================================

    /// Install the built-in templates that back primitive values, so that
    /// method lookup on arrays/integers/strings resolves uniformly.
    pub fn install_builtins(&mut self) {
        let array = self.install_builtin_template("Array", &["values", "length", "append"]);
        let uint = self.install_builtin_template("Uint", &["toString", "abs"]);
        let int = self.install_builtin_template("Int", &["toString", "abs"]);
        let float = self.install_builtin_template("Float", &["toString"]);
        let string = self.install_builtin_template("String", &["length", "toString"]);
        let builtins = &mut self.hir.builtins;
        builtins.array = Some(array);
        builtins.uint = Some(uint);
        builtins.int = Some(int);
        builtins.float = Some(float);
        builtins.string = Some(string);
    }

    fn install_builtin_template(&mut self, name: &str, methods: &[&str]) -> TemplateId {
        let ctor =
            self.begin_function_with(name, FuncKind::Constructor, Linkage::Builtin, &["self"]);
        for method in methods {
            // `append` takes a value; the iterator method is an Iterator
            // function so foreach accepts it without rewriting.
            let kind = if *method == "values" {
                FuncKind::Iterator
            } else {
                FuncKind::Plain
            };
            let params: &[&str] = if *method == "append" {
                &["self", "value"]
            } else {
                &["self"]
            };
            self.begin_function_with(method, kind, Linkage::Builtin, params);
            self.end_function();
        }
        self.end_function();
        self.make_template(ctor, 64)
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_function_with_params() {
        let mut b = ProgramBuilder::new();
        let f = b.begin_function("f", FuncKind::Plain, &["x", "y"]);
        let x = b.ident_expr("x");
        let one = b.uint_lit(1, 32);
        let sum = b.add(x, one);
        b.return_stmt(Some(sum));
        b.end_function();
        let hir = b.finish();
        assert_eq!(hir.params(f).len(), 2);
        assert_eq!(hir.block(hir.func(f).block).stmts.len(), 1);
    }

    #[test]
    fn builtins_installed_with_iterator_values() {
        let b = ProgramBuilder::with_builtins();
        let hir = b.finish();
        let array = hir.builtins.array.expect("array template");
        let ctor = hir.template(array).constructor;
        let values = hir.interner.get("values").unwrap();
        let ident = hir
            .find_in_block(hir.func(ctor).block, values)
            .expect("values method");
        let crate::decl::IdentTarget::Func(f) = hir.ident(ident).target else {
            panic!("values should be a function");
        };
        assert_eq!(hir.func(f).kind, FuncKind::Iterator);
    }
}
