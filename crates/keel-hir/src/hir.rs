//! The program graph arena and its mutation primitives.
//!
//! All entities live in typed arenas on `Hir` and are addressed by `u32`
//! newtype ids. Destruction tombstones entries (sets `dead`); ids are never
//! reused within a run, so cross-references cannot dangle.

use keel_common::{Atom, Interner, Loc};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::decl::{
    Class, ClassId, FuncId, FuncKind, Function, Ident, IdentId, IdentTarget, Linkage, Relation,
    RelationId, Template, TemplateId, VarId, VarKind, Variable,
};
use crate::expr::{Expr, ExprId, ExprKind};
use crate::stmt::{Statement, StmtId, StmtKind};

/// Unique identifier for a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// What a block belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockOwner {
    Root,
    Func(FuncId),
    Class(ClassId),
    /// Statement sub-blocks (if/while/case bodies).
    Stmt,
}

/// An ordered sequence of statements plus a set of idents.
#[derive(Clone, Debug)]
pub struct Block {
    pub owner: BlockOwner,
    /// Lexical parent, `None` for the root.
    pub parent: Option<BlockId>,
    pub stmts: Vec<StmtId>,
    pub idents: FxHashMap<Atom, IdentId>,
    pub vars: Vec<VarId>,
    pub dead: bool,
}

/// Templates backing the built-in value kinds, so that method lookup on
/// primitive receivers works uniformly.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinTemplates {
    pub array: Option<TemplateId>,
    pub uint: Option<TemplateId>,
    pub int: Option<TemplateId>,
    pub float: Option<TemplateId>,
    pub string: Option<TemplateId>,
    pub bool_: Option<TemplateId>,
}

/// The program graph.
pub struct Hir {
    pub interner: Interner,
    pub builtins: BuiltinTemplates,
    pub root: BlockId,
    pub(crate) blocks: Vec<Block>,
    pub(crate) funcs: Vec<Function>,
    pub(crate) vars: Vec<Variable>,
    pub(crate) idents: Vec<Ident>,
    pub(crate) stmts: Vec<Statement>,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) templates: Vec<Template>,
    pub(crate) classes: Vec<Class>,
    pub(crate) relations: Vec<Relation>,
}

impl Hir {
    #[must_use]
    pub fn new() -> Self {
        let mut hir = Hir {
            interner: Interner::new(),
            builtins: BuiltinTemplates::default(),
            root: BlockId(0),
            blocks: Vec::new(),
            funcs: Vec::new(),
            vars: Vec::new(),
            idents: Vec::new(),
            stmts: Vec::new(),
            exprs: Vec::new(),
            templates: Vec::new(),
            classes: Vec::new(),
            relations: Vec::new(),
        };
        hir.root = hir.new_block(None, BlockOwner::Root);
        hir
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0 as usize]
    }

    #[must_use]
    pub fn func(&self, id: FuncId) -> &Function {
        &self.funcs[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.funcs[id.0 as usize]
    }

    #[must_use]
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.0 as usize]
    }

    #[must_use]
    pub fn ident(&self, id: IdentId) -> &Ident {
        &self.idents[id.0 as usize]
    }

    pub fn ident_mut(&mut self, id: IdentId) -> &mut Ident {
        &mut self.idents[id.0 as usize]
    }

    #[must_use]
    pub fn stmt(&self, id: StmtId) -> &Statement {
        &self.stmts[id.0 as usize]
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> &mut Statement {
        &mut self.stmts[id.0 as usize]
    }

    #[must_use]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.0 as usize]
    }

    #[must_use]
    pub fn template(&self, id: TemplateId) -> &Template {
        &self.templates[id.0 as usize]
    }

    pub fn template_mut(&mut self, id: TemplateId) -> &mut Template {
        &mut self.templates[id.0 as usize]
    }

    #[must_use]
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    #[must_use]
    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.0 as usize]
    }

    pub fn relation_mut(&mut self, id: RelationId) -> &mut Relation {
        &mut self.relations[id.0 as usize]
    }

    pub fn templates(&self) -> impl Iterator<Item = (TemplateId, &Template)> {
        self.templates
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.dead)
            .map(|(i, t)| (TemplateId(i as u32), t))
    }

    pub fn relations(&self) -> impl Iterator<Item = (RelationId, &Relation)> {
        self.relations
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.dead)
            .map(|(i, r)| (RelationId(i as u32), r))
    }

    pub fn funcs(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.funcs
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.dead)
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    /// Parameter variables of a function: the leading prefix of its
    /// block's variables.
    #[must_use]
    pub fn params(&self, func: FuncId) -> &[VarId] {
        let f = self.func(func);
        let vars = &self.block(f.block).vars;
        &vars[..f.num_params as usize]
    }

    #[must_use]
    pub fn name(&self, atom: Atom) -> &str {
        self.interner.resolve(atom)
    }

    /// The function or class a block ultimately belongs to, for scope
    /// diagnostics.
    #[must_use]
    pub fn owning_func(&self, mut block: BlockId) -> Option<FuncId> {
        let mut guard = 0usize;
        loop {
            guard += 1;
            if guard > keel_common::limits::MAX_SCOPE_WALK_ITERATIONS {
                return None;
            }
            match self.block(block).owner {
                BlockOwner::Func(f) => return Some(f),
                BlockOwner::Class(c) => {
                    let tpl = self.class(c).template;
                    return Some(self.template(tpl).constructor);
                }
                BlockOwner::Root => return None,
                BlockOwner::Stmt => match self.block(block).parent {
                    Some(p) => block = p,
                    None => return None,
                },
            }
        }
    }

    // =========================================================================
    // Creation primitives
    // =========================================================================

    pub fn new_block(&mut self, parent: Option<BlockId>, owner: BlockOwner) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            owner,
            parent,
            stmts: Vec::new(),
            idents: FxHashMap::default(),
            vars: Vec::new(),
            dead: false,
        });
        id
    }

    pub fn new_expr(&mut self, kind: ExprKind, children: SmallVec<[ExprId; 2]>, loc: Loc) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr::new(kind, children, loc));
        id
    }

    /// Append a statement to a block.
    pub fn new_stmt(
        &mut self,
        block: BlockId,
        kind: StmtKind,
        expr: Option<ExprId>,
        sub_block: Option<BlockId>,
        loc: Loc,
    ) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Statement {
            kind,
            block,
            expr,
            sub_block,
            loc,
            instantiated: false,
            dead: false,
        });
        self.block_mut(block).stmts.push(id);
        id
    }

    /// Create a statement without inserting it anywhere (block copy and
    /// transformer injection position it explicitly).
    pub fn new_detached_stmt(
        &mut self,
        block: BlockId,
        kind: StmtKind,
        expr: Option<ExprId>,
        sub_block: Option<BlockId>,
        loc: Loc,
    ) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Statement {
            kind,
            block,
            expr,
            sub_block,
            loc,
            instantiated: false,
            dead: false,
        });
        id
    }

    pub fn append_stmt(&mut self, block: BlockId, stmt: StmtId) {
        self.stmt_mut(stmt).block = block;
        self.block_mut(block).stmts.push(stmt);
    }

    pub fn prepend_stmt(&mut self, block: BlockId, stmt: StmtId) {
        self.stmt_mut(stmt).block = block;
        self.block_mut(block).stmts.insert(0, stmt);
    }

    /// Remove a statement from its block and tombstone it.
    pub fn remove_stmt(&mut self, stmt: StmtId) {
        let block = self.stmt(stmt).block;
        self.block_mut(block).stmts.retain(|&s| s != stmt);
        self.stmt_mut(stmt).dead = true;
    }

    /// Create a variable in a block and bind its name there.
    pub fn new_variable(
        &mut self,
        block: BlockId,
        name: Atom,
        kind: VarKind,
        loc: Loc,
    ) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(Variable {
            name,
            kind,
            block,
            init: None,
            type_constraint: None,
            is_const: false,
            is_type: false,
            instantiated: false,
            in_class_signature: false,
            loc,
        });
        self.block_mut(block).vars.push(id);
        self.bind_ident(block, name, IdentTarget::Var(id));
        trace!(name = self.name(name), var = id.0, "new variable");
        id
    }

    /// Create a function with its body block, and bind its name in the
    /// enclosing block.
    pub fn new_function(
        &mut self,
        parent: BlockId,
        name: Atom,
        kind: FuncKind,
        linkage: Linkage,
        loc: Loc,
    ) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        let block = self.new_block(Some(parent), BlockOwner::Func(id));
        self.funcs.push(Function {
            name,
            kind,
            linkage,
            block,
            ret_constraint: None,
            num_params: 0,
            template: None,
            loc,
            dead: false,
        });
        self.bind_ident(parent, name, IdentTarget::Func(id));
        id
    }

    /// Add a parameter variable to a function. Parameters must be added
    /// before any local variable.
    pub fn new_param(&mut self, func: FuncId, name: Atom, loc: Loc) -> VarId {
        let block = self.func(func).block;
        debug_assert_eq!(
            self.block(block).vars.len(),
            self.func(func).num_params as usize,
            "parameters must precede locals"
        );
        let var = self.new_variable(block, name, VarKind::Parameter, loc);
        self.func_mut(func).num_params += 1;
        var
    }

    pub fn new_template(&mut self, constructor: FuncId, ref_width: u32) -> TemplateId {
        assert!(
            (1..=keel_common::limits::MAX_REF_WIDTH).contains(&ref_width),
            "class ref-width out of range"
        );
        let id = TemplateId(self.templates.len() as u32);
        self.templates.push(Template {
            constructor,
            ref_width,
            classes: Vec::new(),
            dead: false,
        });
        self.func_mut(constructor).template = Some(id);
        id
    }

    pub fn new_relation(
        &mut self,
        parent: TemplateId,
        child: TemplateId,
        label: Atom,
        cascade_delete: bool,
    ) -> RelationId {
        let id = RelationId(self.relations.len() as u32);
        self.relations.push(Relation {
            parent,
            child,
            label,
            cascade_delete,
            injected_stmts: Vec::new(),
            injected_funcs: Vec::new(),
            dead: false,
        });
        id
    }

    // =========================================================================
    // Ident primitives
    // =========================================================================

    /// Bind a name in a block, creating the ident or re-targeting an
    /// existing (possibly undefined) one.
    pub fn bind_ident(&mut self, block: BlockId, name: Atom, target: IdentTarget) -> IdentId {
        if let Some(&id) = self.block(block).idents.get(&name) {
            self.idents[id.0 as usize].target = target;
            return id;
        }
        let id = IdentId(self.idents.len() as u32);
        self.idents.push(Ident {
            name,
            block,
            target,
            uses: Vec::new(),
        });
        self.block_mut(block).idents.insert(name, id);
        id
    }

    /// Get or create the undefined ident for a name in a block.
    pub fn undefined_ident(&mut self, block: BlockId, name: Atom) -> IdentId {
        if let Some(&id) = self.block(block).idents.get(&name) {
            return id;
        }
        self.bind_ident(block, name, IdentTarget::Undefined)
    }

    /// Record that an expression resolves through an ident.
    pub fn add_use(&mut self, ident: IdentId, expr: ExprId) {
        let record = self.ident_mut(ident);
        if !record.uses.contains(&expr) {
            record.uses.push(expr);
        }
        self.expr_mut(expr).ident = Some(ident);
    }

    /// Rename an ident within its block. The target keeps its binding; any
    /// ident already holding the new name in that block is replaced.
    pub fn rename_ident(&mut self, block: BlockId, old: Atom, new: Atom) -> Option<IdentId> {
        let id = self.block_mut(block).idents.remove(&old)?;
        self.ident_mut(id).name = new;
        self.block_mut(block).idents.insert(new, id);
        Some(id)
    }

    // =========================================================================
    // Destruction (tombstoning)
    // =========================================================================

    pub fn kill_func(&mut self, func: FuncId) {
        let f = self.func_mut(func);
        f.dead = true;
        let name = f.name;
        let block = f.block;
        self.block_mut(block).dead = true;
        // Unbind the name where it was declared.
        if let Some(parent) = self.block(block).parent
            && let Some(&id) = self.block(parent).idents.get(&name)
            && self.ident(id).target == IdentTarget::Func(func)
        {
            self.block_mut(parent).idents.remove(&name);
        }
    }

    pub fn kill_class(&mut self, class: ClassId) {
        let tpl = self.class(class).template;
        self.class_mut(class).dead = true;
        let block = self.class(class).block;
        self.block_mut(block).dead = true;
        self.template_mut(tpl).classes.retain(|&c| c != class);
    }

    pub fn kill_template(&mut self, template: TemplateId) {
        let t = self.template_mut(template);
        t.dead = true;
        let ctor = t.constructor;
        let classes: Vec<ClassId> = std::mem::take(&mut self.template_mut(template).classes);
        for class in classes {
            self.kill_class(class);
        }
        self.func_mut(ctor).template = None;
        self.kill_func(ctor);
    }

    pub fn kill_relation(&mut self, relation: RelationId) {
        let (stmts, funcs) = {
            let r = self.relation_mut(relation);
            r.dead = true;
            (
                std::mem::take(&mut r.injected_stmts),
                std::mem::take(&mut r.injected_funcs),
            )
        };
        for stmt in stmts {
            if !self.stmt(stmt).dead {
                self.remove_stmt(stmt);
            }
        }
        for func in funcs {
            if !self.func(func).dead {
                self.kill_func(func);
            }
        }
    }
}

impl Default for Hir {
    fn default() -> Self {
        Self::new()
    }
}
