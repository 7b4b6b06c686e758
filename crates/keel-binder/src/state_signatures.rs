//! Signature table: creation, paramspecs, class linkage, finalization.
//!
//! A signature is the specialization of a function for one parameter
//! datatype tuple; the table canonicalizes them per `(function, tuple)`.
//! Constructor signatures additionally look up or create the class for
//! their template-parameter tuple, so `self` has a datatype while the body
//! binds.

use keel_common::Loc;
use keel_hir::{BlockId, ClassId, ExprId, ExprKind, FuncId, FuncKind, Linkage, TemplateId};
use keel_types::TypeId;
use tracing::debug;

use crate::state::{BinderState, BindingKind, Paramspec, SigId, Signature};

impl BinderState {
    #[must_use]
    pub fn lookup_signature(&self, func: FuncId, key: &[Option<TypeId>]) -> Option<SigId> {
        self.sig_index.get(&(func, key.to_vec())).copied()
    }

    /// Create the signature for `(func, key)`, allocate paramspecs, spawn
    /// the bindings that discover the rest (default values, constraints,
    /// body statements), and link the constructed class for constructors.
    pub(crate) fn create_signature(
        &mut self,
        func: FuncId,
        key: Vec<Option<TypeId>>,
        call_site: Option<(SigId, Loc)>,
        instantiating: bool,
    ) -> SigId {
        debug_assert!(self.lookup_signature(func, &key).is_none());
        let params = self.hir.params(func).to_vec();
        debug_assert_eq!(params.len(), key.len());

        let id = SigId(self.sigs.len() as u32);
        let paramspecs = params
            .iter()
            .zip(&key)
            .map(|(&var, &datatype)| Paramspec {
                var,
                datatype,
                is_type: self.hir.var(var).is_type,
                instantiated: false,
            })
            .collect();
        self.sigs.push(Signature {
            func,
            key: key.clone(),
            paramspecs,
            ret: None,
            ret_event: None,
            ret_fired: false,
            bound: false,
            instantiated: instantiating,
            address_taken: false,
            class: None,
            call_site,
            pending: 0,
            destroyed: false,
        });
        self.sig_index.insert((func, key.clone()), id);
        debug!(sig = id.0, func = func.0, "create signature");

        // Parameter datatypes are known up front for provided slots.
        for (index, &var) in params.iter().enumerate() {
            if let Some(ty) = key[index] {
                self.set_var_type(id, var, ty);
                if instantiating && !self.hir.var(var).is_type {
                    self.hir.var_mut(var).instantiated = true;
                }
            }
        }

        let f = self.hir.func(func).clone();

        // Built-ins have no bindable body: the result type comes from the
        // built-in call binder and the signature finalizes at once.
        if f.linkage == Linkage::Builtin {
            let ret = self
                .builtin_binder
                .bind(&self.hir, &self.types, func, &key);
            let sig = self.sig_mut(id);
            sig.ret = ret;
            sig.bound = true;
            sig.ret_fired = true;
            return id;
        }

        // Constructors: the class exists as soon as its first signature
        // does. `self` gets the class datatype; the return type is the
        // class datatype, so call sites never park on constructors.
        if f.kind == FuncKind::Constructor
            && let Some(template) = f.template
        {
            let class = self.class_for(template, &params, &key);
            self.hir.class_mut(class).instantiated = true;
            let class_ty = self.types.class(class);
            let sig = self.sig_mut(id);
            sig.class = Some(class);
            sig.ret = Some(class_ty);
            sig.ret_fired = true;
            if let Some(spec) = self.sig_mut(id).paramspecs.first_mut() {
                spec.datatype = Some(class_ty);
            }
            if let Some(&self_var) = params.first() {
                self.set_var_type(id, self_var, class_ty);
            }
        }

        // Defaulted parameters with unknown types: a DefaultValue binding
        // discovers each one from its initializer.
        for (index, &var) in params.iter().enumerate() {
            if key[index].is_none() && self.hir.var(var).init.is_some() {
                self.spawn_binding(id, BindingKind::DefaultValue(index), instantiating);
            }
        }

        // Type constraints on the function's own variables.
        let block_vars = self.hir.block(f.block).vars.clone();
        for var in block_vars {
            if self.hir.var(var).type_constraint.is_some() {
                self.spawn_binding(id, BindingKind::VarConstraint(var), false);
            }
        }
        if f.ret_constraint.is_some() {
            self.spawn_binding(id, BindingKind::FuncConstraint, false);
        }

        self.queue_signature(id);

        // Nothing to bind at all (extern declarations, empty bodies).
        if self.sig(id).pending == 0 {
            self.finalize_signature(id);
        }
        id
    }

    /// Look up or create the class for a constructor call: class identity
    /// is the tuple of template-parameter datatypes.
    fn class_for(
        &mut self,
        template: TemplateId,
        params: &[keel_hir::VarId],
        key: &[Option<TypeId>],
    ) -> ClassId {
        let args: Vec<TypeId> = params
            .iter()
            .zip(key)
            .filter(|&(&var, _)| self.hir.var(var).in_class_signature)
            .map(|(_, &slot)| slot.unwrap_or(TypeId::NONE))
            .collect();
        if let Some(&class) = self.class_index.get(&(template, args.clone())) {
            return class;
        }
        let class = self.hir.instantiate_class(template);
        self.class_index.insert((template, args.clone()), class);
        self.class_args.insert(class, args);
        class
    }

    /// The default class of a template with no template parameters, for
    /// `null(T)` and `arrayof(T)`.
    pub(crate) fn default_class(&mut self, template: TemplateId) -> Option<ClassId> {
        let ctor = self.hir.template(template).constructor;
        let has_template_params = self
            .hir
            .params(ctor)
            .iter()
            .any(|&v| self.hir.var(v).in_class_signature);
        if has_template_params {
            return None;
        }
        if let Some(&class) = self.class_index.get(&(template, Vec::new())) {
            return Some(class);
        }
        let class = self.hir.instantiate_class(template);
        self.class_index.insert((template, Vec::new()), class);
        self.class_args.insert(class, Vec::new());
        Some(class)
    }

    /// Finalize a signature once its last binding completes: copy the
    /// paramspec bits down from the variables, fix the return type
    /// (defaulting to `none`), fire the return event, and generate default
    /// methods for a newly bound class.
    pub(crate) fn finalize_signature(&mut self, sig: SigId) {
        let func = self.sig(sig).func;
        let f = self.hir.func(func).clone();
        debug!(sig = sig.0, func = self.hir.name(f.name), "finalize signature");

        let specs = self.sig(sig).paramspecs.clone();
        let updated: Vec<Paramspec> = specs
            .into_iter()
            .map(|mut spec| {
                let var = self.hir.var(spec.var);
                spec.is_type = var.is_type;
                spec.instantiated = var.instantiated;
                spec
            })
            .collect();
        self.sig_mut(sig).paramspecs = updated;

        // Struct signatures: the return type is a struct over the
        // parameters, materialized only now that all of them are bound.
        if f.kind == FuncKind::Struct {
            let fields: Vec<(keel_common::Atom, TypeId)> = self
                .sig(sig)
                .paramspecs
                .iter()
                .map(|spec| {
                    let name = self.hir.var(spec.var).name;
                    (name, spec.datatype.unwrap_or(TypeId::NONE))
                })
                .collect();
            let ty = self.types.struct_ty(func, fields);
            self.sig_mut(sig).ret = Some(ty);
        }

        if self.sig(sig).ret.is_none() {
            self.sig_mut(sig).ret = Some(TypeId::NONE);
        }
        // Declared return constraints check against the final return type.
        if let Some(constraint) = f.ret_constraint
            && !matches!(
                f.linkage,
                Linkage::ExternC | Linkage::ExternRpc | Linkage::Rpc | Linkage::Libcall
            )
        {
            let ret = self.sig(sig).ret.expect("return fixed above");
            if self.expr_type(sig, constraint).is_some()
                && !self.constraint_matches(sig, ret, constraint)
            {
                let shown = self.type_name(ret);
                let name = self.hir.name(f.name).to_string();
                self.diags.error(
                    f.loc,
                    keel_common::ErrorCode::ConstraintViolation,
                    format!("`{name}` returns {shown}, violating its constraint"),
                );
            }
        }
        self.sig_mut(sig).bound = true;
        if !self.sig(sig).ret_fired {
            self.sig_mut(sig).ret_fired = true;
            if let Some(event) = self.sig(sig).ret_event {
                self.fire_event(event);
            }
        }

        if let Some(class) = self.sig(sig).class {
            self.generate_default_methods(class);
        }
    }

    /// Default-method generation for a newly bound class: a builtin-linkage
    /// `toString` on the template block, unless one is already declared.
    fn generate_default_methods(&mut self, class: ClassId) {
        let template = self.hir.class(class).template;
        let ctor = self.hir.template(template).constructor;
        let block = self.hir.func(ctor).block;
        let to_string = self.hir.interner.intern("toString");
        if self.hir.find_in_block(block, to_string).is_some() {
            return;
        }
        let method = self.hir.new_function(
            block,
            to_string,
            FuncKind::Plain,
            Linkage::Builtin,
            Loc::dummy(),
        );
        let self_atom = self.hir.interner.intern("self");
        self.hir.new_param(method, self_atom, Loc::dummy());
        self.note_template_member_defined(template, to_string);
    }

    /// A name just landed on a template's block: waiters parked on it
    /// through any of the template's class blocks can resolve via the
    /// augmentation now.
    pub(crate) fn note_template_member_defined(
        &mut self,
        template: TemplateId,
        name: keel_common::Atom,
    ) {
        let ctor = self.hir.template(template).constructor;
        let block = self.hir.func(ctor).block;
        self.note_defined(block, name);
        let classes = self.hir.template(template).classes.clone();
        for class in classes {
            let class_block = self.hir.class(class).block;
            self.note_defined(class_block, name);
        }
    }

    /// Resolve a simple, fully-specified type annotation synchronously.
    /// Used for extern RPC parameters and constrained-literal autocasting;
    /// anything requiring the fixpoint returns `None`.
    pub(crate) fn type_annotation(&mut self, block: BlockId, expr: ExprId) -> Option<TypeId> {
        let kind = self.hir.expr(expr).kind.clone();
        let children: Vec<ExprId> = self.hir.expr(expr).children.iter().copied().collect();
        match kind {
            ExprKind::UintType { width } => Some(self.types.uint(width)),
            ExprKind::IntType { width } => Some(self.types.int(width)),
            ExprKind::FloatType { width } => Some(self.types.float(width)),
            ExprKind::StringType => Some(TypeId::STR),
            ExprKind::BoolType => Some(TypeId::BOOL),
            ExprKind::NoneType => Some(TypeId::NONE),
            ExprKind::SecretType => {
                let inner = self.type_annotation(block, children[0])?;
                self.types.set_secret(inner, true).ok()
            }
            ExprKind::Arrayof => {
                let inner = self.type_annotation(block, children[0])?;
                Some(self.types.array(inner))
            }
            ExprKind::TupleLit => {
                let fields = children
                    .iter()
                    .map(|&c| self.type_annotation(block, c))
                    .collect::<Option<Vec<_>>>()?;
                Some(self.types.tuple(fields))
            }
            ExprKind::Ident { name } => {
                let ident = self.hir.find_ident(block, name)?;
                match self.hir.ident(ident).target {
                    keel_hir::IdentTarget::Func(f) => {
                        let template = self.hir.func(f).template?;
                        let class = self.default_class(template)?;
                        Some(self.types.class(class))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Does a datatype satisfy a bound type-constraint expression? Union
    /// constraints (`u32 | u64`) accept any arm.
    pub(crate) fn constraint_matches(&self, sig: SigId, ty: TypeId, constraint: ExprId) -> bool {
        if let ExprKind::Binary {
            op: keel_hir::BinOp::BitOr,
        } = self.hir.expr(constraint).kind
        {
            let children: Vec<ExprId> = self.hir.expr(constraint).children.to_vec();
            if self.hir.expr(constraint).is_type {
                return children.iter().any(|&arm| self.constraint_matches(sig, ty, arm));
            }
        }
        match self.expr_type(sig, constraint) {
            Some(expected) => {
                ty == expected
                    || self
                        .types
                        .unify(ty, expected, &self.hir)
                        .is_some_and(|joined| joined == expected)
            }
            None => false,
        }
    }

    /// Paramspec view for diagnostics and tests.
    #[must_use]
    pub fn paramspecs(&self, sig: SigId) -> &[Paramspec] {
        &self.sig(sig).paramspecs
    }

    /// The class a type-instantiation or constructor produced, if any.
    #[must_use]
    pub fn class_of_sig(&self, sig: SigId) -> Option<ClassId> {
        self.sig(sig).class
    }

    /// The template-parameter datatype tuple that identifies a class.
    #[must_use]
    pub fn class_parameters(&self, class: ClassId) -> &[TypeId] {
        self.class_args
            .get(&class)
            .map_or(&[][..], Vec::as_slice)
    }
}
