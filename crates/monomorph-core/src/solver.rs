//! Worklist-driven fixpoint solver.
//!
//! Pops dirty nodes from a stable FIFO queue and propagates type sets along
//! copy edges, re-resolves receiver-dependent attribute/element uses,
//! re-evaluates operator constraints combination-wise, and re-keys call
//! sites — minting function Variants on demand, keyed by the structural
//! tuple of current argument type sets. Recursion needs no special
//! handling: a Variant is simply revisited until its sets stabilize.
//!
//! Termination: every set draws from the finite tag universe and only
//! grows, so the number of (node, added-tag) events is finite. Variant
//! growth is bounded separately by the per-function threshold, recovered
//! via widening.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::builder::{self, BuildOutput};
use crate::catalog::{AttrResolution, BinaryResolution, BuiltinFn, BuiltinMethod, Catalog, FuncId};
use crate::config::{InferenceConfig, WideningPolicy};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::CoreError;
use crate::graph::{CallId, Callee, ConstraintGraph, NodeId, OpId, OpKind, Scope, UseId, UseKind};
use crate::hir::{Program, Span};
use crate::types::{TypeSet, TypeTag};
use crate::variants::{FunctionTable, Variant, VariantId, VariantKey};

/// Counters reported after the solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveStats {
    /// Worklist entries processed.
    pub steps: usize,
    pub variants_minted: usize,
    pub widenings: usize,
}

/// The solver, holding exclusive ownership of the graph and Variant tables
/// for the duration of the solve. Strictly sequential: any node's update
/// can transitively affect arbitrarily distant nodes.
pub struct Solver<'p> {
    program: &'p Program,
    catalog: &'p Catalog,
    pub graph: ConstraintGraph,
    pub funcs: FunctionTable,
    pub diagnostics: Vec<Diagnostic>,
    config: InferenceConfig,
    worklist: VecDeque<NodeId>,
    pending_calls: VecDeque<CallId>,
    stats: SolveStats,
    budget_spent: bool,
}

impl<'p> Solver<'p> {
    pub fn new(program: &'p Program, catalog: &'p Catalog, build: BuildOutput, config: InferenceConfig) -> Self {
        let BuildOutput {
            graph,
            funcs,
            seeds,
            pending_calls,
        } = build;
        let mut solver = Self {
            program,
            catalog,
            graph,
            funcs,
            diagnostics: Vec::new(),
            config,
            worklist: VecDeque::new(),
            pending_calls: VecDeque::new(),
            stats: SolveStats::default(),
            budget_spent: false,
        };
        for node in seeds {
            solver.enqueue(node);
        }
        // Builder-created call sites arrive with their pending flag set.
        solver.pending_calls.extend(pending_calls);
        solver
    }

    pub fn stats(&self) -> SolveStats {
        self.stats
    }

    /// Drive the worklist to the global fixpoint.
    pub fn run(&mut self) -> Result<(), CoreError> {
        loop {
            if let Some(node) = self.worklist.pop_front() {
                self.graph.node_mut(node).dirty = false;
                self.step(node)?;
                continue;
            }
            if let Some(call) = self.pending_calls.pop_front() {
                self.graph.calls[call.0 as usize].pending = false;
                self.eval_call(call)?;
                continue;
            }
            break;
        }
        debug!(
            steps = self.stats.steps,
            variants = self.stats.variants_minted,
            widenings = self.stats.widenings,
            "solve reached fixpoint"
        );
        Ok(())
    }

    fn enqueue(&mut self, node: NodeId) {
        let n = self.graph.node_mut(node);
        if !n.dirty {
            n.dirty = true;
            self.worklist.push_back(node);
        }
    }

    fn enqueue_call(&mut self, call: CallId) {
        let c = &mut self.graph.calls[call.0 as usize];
        if !c.pending {
            c.pending = true;
            self.pending_calls.push_back(call);
        }
    }

    /// Process one dirty node: flow along copy edges, then re-evaluate
    /// everything that depends on this node's type set.
    fn step(&mut self, node: NodeId) -> Result<(), CoreError> {
        self.stats.steps += 1;
        self.check_budget()?;

        let types = self.graph.node(node).types.clone();
        let poisoned = self.graph.node(node).poisoned;

        let succs: Vec<NodeId> = self.graph.node(node).succs.to_vec();
        for succ in succs {
            let dest = self.graph.node_mut(succ);
            let mut grew = dest.types.union_with(&types);
            if poisoned && !dest.poisoned {
                dest.poisoned = true;
                grew = true;
            }
            if grew {
                self.enqueue(succ);
            }
        }

        if let Some(uses) = self.graph.uses_by_receiver.get(&node).map(|u| u.to_vec()) {
            for use_id in uses {
                self.eval_use(use_id)?;
            }
        }
        if let Some(ops) = self.graph.ops_by_operand.get(&node).map(|o| o.to_vec()) {
            for op_id in ops {
                self.eval_op(op_id)?;
            }
        }
        if let Some(calls) = self.graph.calls_by_node.get(&node).map(|c| c.to_vec()) {
            for call_id in calls {
                self.enqueue_call(call_id);
            }
        }
        Ok(())
    }

    /// Once the optional step budget is spent, collapse every
    /// multi-variant function instead of aborting.
    fn check_budget(&mut self) -> Result<(), CoreError> {
        let Some(budget) = self.config.max_solver_steps else {
            return Ok(());
        };
        if self.stats.steps <= budget || self.budget_spent {
            return Ok(());
        }
        self.budget_spent = true;
        debug!(budget, "solver step budget exhausted; forcing widening");
        for func in self.catalog.func_ids() {
            if self.funcs.state(func).variants.len() > 1 {
                self.widen_function(func, WideningPolicy::CollapseAll)?;
            }
        }
        Ok(())
    }

    /// Union tags into a node, enqueueing it if it grew.
    fn grow(&mut self, node: NodeId, tags: &[TypeTag]) {
        let mut grew = false;
        for &tag in tags {
            grew |= self.graph.node_mut(node).types.insert(tag);
        }
        if grew {
            self.enqueue(node);
        }
    }

    fn flow(&mut self, from: NodeId, to: NodeId) {
        if self.graph.add_copy_edge(from, to) {
            self.enqueue(to);
        }
    }

    fn poison(&mut self, node: NodeId) {
        if self.graph.mark_poisoned(node) {
            self.enqueue(node);
        }
    }

    /// Re-resolve a receiver-dependent use for any receiver tags that have
    /// not been materialized yet.
    fn eval_use(&mut self, use_id: UseId) -> Result<(), CoreError> {
        let record = self.graph.uses[use_id.0 as usize].clone();
        let recv_types = self.graph.node(record.receiver).types.clone();

        for tag in recv_types.iter() {
            if self.graph.uses[use_id.0 as usize].seen.contains(tag) {
                continue;
            }
            self.graph.uses[use_id.0 as usize].seen.insert(tag);
            self.materialize_use(&record.kind, tag, record.span)?;
        }

        if self.graph.node(record.receiver).poisoned {
            match &record.kind {
                UseKind::AttrLoad { result, .. }
                | UseKind::IndexLoad { result, .. }
                | UseKind::IterLoad { target: result } => self.poison(*result),
                UseKind::AttrStore { .. } | UseKind::IndexStore { .. } => {}
            }
        }
        Ok(())
    }

    fn materialize_use(&mut self, kind: &UseKind, tag: TypeTag, span: Span) -> Result<(), CoreError> {
        match kind {
            UseKind::AttrLoad { attr, result } => match tag {
                TypeTag::Object(class) => match self.catalog.resolve_attr(class, attr) {
                    Some(AttrResolution::Field { owner }) => {
                        let module = self.catalog.class(owner).module;
                        let slot = self.graph.field_slot(owner, attr, module);
                        self.flow(slot, *result);
                    }
                    Some(AttrResolution::Method(_)) => {
                        self.diagnostics.report(Diagnostic::error(
                            span,
                            format!("method '{}' used as a value", attr),
                        ));
                        self.poison(*result);
                    }
                    None => {
                        self.unresolved_attribute(attr, &self.catalog.class(class).name.clone(), span);
                        self.poison(*result);
                    }
                },
                other => {
                    self.unresolved_attribute(attr, &other.to_string(), span);
                    self.poison(*result);
                }
            },
            UseKind::AttrStore { attr, value } => match tag {
                TypeTag::Object(class) => match self.catalog.resolve_attr(class, attr) {
                    Some(AttrResolution::Field { owner }) => {
                        let module = self.catalog.class(owner).module;
                        let slot = self.graph.field_slot(owner, attr, module);
                        self.flow(*value, slot);
                    }
                    Some(AttrResolution::Method(_)) => {
                        self.diagnostics
                            .report(Diagnostic::error(span, format!("cannot assign to method '{}'", attr)));
                    }
                    None => {
                        self.unresolved_attribute(attr, &self.catalog.class(class).name.clone(), span);
                    }
                },
                other => {
                    self.unresolved_attribute(attr, &other.to_string(), span);
                }
            },
            UseKind::IterLoad { target } => match tag {
                TypeTag::List(site) => {
                    let elem = self.graph.site(site).elem;
                    self.flow(elem, *target);
                }
                TypeTag::Dict(site) => {
                    let key = self.graph.site(site).key.expect("dict site has a key node");
                    self.flow(key, *target);
                }
                TypeTag::Str => self.grow(*target, &[TypeTag::Str]),
                other => {
                    self.diagnostics
                        .report(Diagnostic::error(span, format!("'{}' is not iterable", other)));
                    self.poison(*target);
                }
            },
            UseKind::IndexLoad { result, .. } => match tag {
                TypeTag::List(site) => {
                    let elem = self.graph.site(site).elem;
                    self.flow(elem, *result);
                }
                TypeTag::Dict(site) => {
                    let elem = self.graph.site(site).elem;
                    self.flow(elem, *result);
                }
                TypeTag::Str => self.grow(*result, &[TypeTag::Str]),
                other => {
                    self.diagnostics
                        .report(Diagnostic::error(span, format!("'{}' is not subscriptable", other)));
                    self.poison(*result);
                }
            },
            UseKind::IndexStore { index, value } => match tag {
                TypeTag::List(site) => {
                    let elem = self.graph.site(site).elem;
                    self.flow(*value, elem);
                }
                TypeTag::Dict(site) => {
                    let (elem, key) = {
                        let site_nodes = self.graph.site(site);
                        (site_nodes.elem, site_nodes.key.expect("dict site has a key node"))
                    };
                    self.flow(*index, key);
                    self.flow(*value, elem);
                }
                other => {
                    self.diagnostics
                        .report(Diagnostic::error(span, format!("'{}' does not support item assignment", other)));
                }
            },
        }
        Ok(())
    }

    fn unresolved_attribute(&mut self, attr: &str, on: &str, span: Span) {
        let error = CoreError::UnresolvedAttribute {
            attr: attr.to_string(),
            class: on.to_string(),
            span,
        };
        self.diagnostics.report(Diagnostic::error(span, error.to_string()));
    }

    /// Re-evaluate an operator constraint combination-wise over the
    /// current operand sets.
    fn eval_op(&mut self, op_id: OpId) -> Result<(), CoreError> {
        let constraint = self.graph.ops[op_id.0 as usize].clone();
        match constraint.kind {
            OpKind::Binary { op, left, right } => {
                let left_types = self.graph.node(left).types.clone();
                let right_types = self.graph.node(right).types.clone();
                for lt in left_types.iter() {
                    for rt in right_types.iter() {
                        let first_look = !self.graph.ops[op_id.0 as usize].seen.contains(&(lt, rt));
                        if first_look {
                            self.graph.ops[op_id.0 as usize].seen.push((lt, rt));
                        }
                        match self.catalog.binary_result(op, lt, rt) {
                            BinaryResolution::Tags(tags) => self.grow(constraint.result, &tags),
                            BinaryResolution::ClassOperator { class, method } => {
                                self.apply_class_operator(class, method, rt, constraint.result, constraint.span, first_look)?;
                            }
                            // Combinations without a signature contribute
                            // no types; an entirely unresolvable operand
                            // surfaces later as UnresolvedType if it
                            // reaches emission.
                            BinaryResolution::NoSignature => {}
                        }
                    }
                }
                if self.graph.node(left).poisoned || self.graph.node(right).poisoned {
                    self.poison(constraint.result);
                }
            }
            OpKind::Unary { op, operand } => {
                let operand_types = self.graph.node(operand).types.clone();
                for tag in operand_types.iter() {
                    if let Some(result_tag) = self.catalog.unary_result(op, tag) {
                        self.grow(constraint.result, &[result_tag]);
                    }
                }
                if self.graph.node(operand).poisoned {
                    self.poison(constraint.result);
                }
            }
        }
        Ok(())
    }

    fn apply_class_operator(
        &mut self,
        class: crate::types::ClassId,
        method: &str,
        right: TypeTag,
        result: NodeId,
        span: Span,
        first_look: bool,
    ) -> Result<(), CoreError> {
        match self.catalog.resolve_attr(class, method) {
            Some(AttrResolution::Method(func)) => {
                let def = self.catalog.func_def(self.program, func);
                if def.params.len() != 2 {
                    if first_look {
                        self.diagnostics.report(Diagnostic::error(
                            span,
                            format!("operator method '{}' must take exactly one operand", method),
                        ));
                    }
                    return Ok(());
                }
                let key = VariantKey(vec![
                    TypeSet::single(TypeTag::Object(class)),
                    TypeSet::single(right),
                ]);
                let variant = self.ensure_variant(func, key)?;
                let ret = self.funcs.variant(variant).ret;
                self.flow(ret, result);
            }
            _ => {
                if first_look {
                    self.unresolved_attribute(method, &self.catalog.class(class).name.clone(), span);
                    self.poison(result);
                }
            }
        }
        Ok(())
    }

    /// Re-evaluate a call site: look up or mint the Variant for the
    /// current argument type sets and wire the flow.
    fn eval_call(&mut self, call_id: CallId) -> Result<(), CoreError> {
        let call = self.graph.calls[call_id.0 as usize].clone();
        match &call.callee {
            Callee::Direct(func) => {
                if let Some(key) = self.key_from_args(&call.args) {
                    let variant = self.ensure_variant(*func, key)?;
                    self.wire_call(call_id, variant, 0, true);
                }
            }
            Callee::Ctor(class) => {
                let Some(init) = self.catalog.constructor(*class) else {
                    return Ok(());
                };
                if let Some(mut key) = self.key_from_args(&call.args) {
                    key.0.insert(0, TypeSet::single(TypeTag::Object(*class)));
                    // The constructor's return value is discarded; the
                    // call result already carries the instance tag.
                    let variant = self.ensure_variant(init, key)?;
                    self.wire_call(call_id, variant, 1, false);
                }
            }
            Callee::Method { name } => self.eval_method_call(call_id, name)?,
            Callee::Builtin(builtin) => self.eval_builtin_call(call_id, *builtin),
        }

        let poisoned = call.args.iter().any(|&a| self.graph.node(a).poisoned)
            || call.receiver.is_some_and(|r| self.graph.node(r).poisoned);
        if poisoned {
            self.poison(call.result);
        }
        Ok(())
    }

    fn eval_method_call(&mut self, call_id: CallId, name: &str) -> Result<(), CoreError> {
        let call = self.graph.calls[call_id.0 as usize].clone();
        let receiver = call.receiver.expect("method call has a receiver");
        let recv_types = self.graph.node(receiver).types.clone();

        for tag in recv_types.iter() {
            let first_look = !self.graph.calls[call_id.0 as usize].seen.contains(tag);
            if first_look {
                self.graph.calls[call_id.0 as usize].seen.insert(tag);
            }
            match tag {
                TypeTag::Object(class) => match self.catalog.resolve_attr(class, name) {
                    Some(AttrResolution::Method(func)) => {
                        let def = self.catalog.func_def(self.program, func);
                        if def.params.len() != call.args.len() + 1 {
                            if first_look {
                                self.diagnostics.report(Diagnostic::error(
                                    call.span,
                                    format!(
                                        "method '{}' expects {} argument(s), got {}",
                                        name,
                                        def.params.len().saturating_sub(1),
                                        call.args.len()
                                    ),
                                ));
                                self.poison(call.result);
                            }
                            continue;
                        }
                        if let Some(mut key) = self.key_from_args(&call.args) {
                            key.0.insert(0, TypeSet::single(tag));
                            let variant = self.ensure_variant(func, key)?;
                            self.wire_call(call_id, variant, 1, true);
                        }
                    }
                    Some(AttrResolution::Field { .. }) => {
                        if first_look {
                            self.diagnostics
                                .report(Diagnostic::error(call.span, format!("field '{}' is not callable", name)));
                            self.poison(call.result);
                        }
                    }
                    None => {
                        if first_look {
                            self.unresolved_attribute(name, &self.catalog.class(class).name.clone(), call.span);
                            self.poison(call.result);
                        }
                    }
                },
                other => match Catalog::builtin_method(other, name) {
                    Some(method) => self.apply_builtin_method(call_id, method, other, first_look),
                    None => {
                        if first_look {
                            self.unresolved_attribute(name, &other.to_string(), call.span);
                            self.poison(call.result);
                        }
                    }
                },
            }
        }
        Ok(())
    }

    fn apply_builtin_method(&mut self, call_id: CallId, method: BuiltinMethod, receiver_tag: TypeTag, first_look: bool) {
        let call = self.graph.calls[call_id.0 as usize].clone();
        let arity_ok = |want: usize| call.args.len() == want;
        let arity_error = |solver: &mut Self, want: usize| {
            if first_look {
                solver.diagnostics.report(Diagnostic::error(
                    call.span,
                    format!("builtin method expects {} argument(s), got {}", want, call.args.len()),
                ));
            }
        };

        match method {
            BuiltinMethod::ListAppend => {
                if !arity_ok(1) {
                    return arity_error(self, 1);
                }
                if let TypeTag::List(site) = receiver_tag {
                    let elem = self.graph.site(site).elem;
                    self.flow(call.args[0], elem);
                }
                self.grow(call.result, &[TypeTag::None]);
            }
            BuiltinMethod::ListPop => {
                if let TypeTag::List(site) = receiver_tag {
                    let elem = self.graph.site(site).elem;
                    self.flow(elem, call.result);
                }
            }
            BuiltinMethod::ListClear | BuiltinMethod::ListReverse | BuiltinMethod::DictClear => {
                self.grow(call.result, &[TypeTag::None]);
            }
            BuiltinMethod::DictGet => {
                if !arity_ok(1) {
                    return arity_error(self, 1);
                }
                if let TypeTag::Dict(site) = receiver_tag {
                    let elem = self.graph.site(site).elem;
                    self.flow(elem, call.result);
                }
                // Absent keys surface as None.
                self.grow(call.result, &[TypeTag::None]);
            }
            BuiltinMethod::StrUpper | BuiltinMethod::StrLower | BuiltinMethod::StrStrip => {
                self.grow(call.result, &[TypeTag::Str]);
            }
            BuiltinMethod::StrSplit => {
                let site = call.result_site.expect("split call sites carry a result site");
                let elem = self.graph.site(site).elem;
                self.grow(elem, &[TypeTag::Str]);
                self.grow(call.result, &[TypeTag::List(site)]);
            }
            BuiltinMethod::StrFind => self.grow(call.result, &[TypeTag::Int]),
            BuiltinMethod::StrStartswith => self.grow(call.result, &[TypeTag::Bool]),
        }
    }

    /// `abs`/`min`/`max`: scalar pass-through of the argument tags.
    fn eval_builtin_call(&mut self, call_id: CallId, builtin: BuiltinFn) {
        let call = self.graph.calls[call_id.0 as usize].clone();
        debug_assert!(matches!(builtin, BuiltinFn::Abs | BuiltinFn::Min | BuiltinFn::Max));
        let mut tags: Vec<TypeTag> = Vec::new();
        for &arg in &call.args {
            for tag in self.graph.node(arg).types.iter() {
                if tag.is_numeric() || (tag == TypeTag::Str && !matches!(builtin, BuiltinFn::Abs)) {
                    tags.push(tag);
                }
            }
        }
        self.grow(call.result, &tags);
    }

    /// The specialization key for the current argument sets, or `None`
    /// while any argument is still bottom (unreachable so far).
    fn key_from_args(&self, args: &[NodeId]) -> Option<VariantKey> {
        let mut sets = Vec::with_capacity(args.len());
        for &arg in args {
            let types = self.graph.node(arg).types.clone();
            if types.is_empty() {
                return None;
            }
            sets.push(types);
        }
        Some(VariantKey(sets))
    }

    fn ensure_variant(&mut self, func: FuncId, key: VariantKey) -> Result<VariantId, CoreError> {
        if let Some(existing) = self.funcs.lookup(func, &key) {
            return Ok(existing);
        }
        self.mint_variant(func, key, false)
    }

    /// Mint a new Variant: fresh parameter/return nodes seeded from the
    /// key, then instantiate the function body template into the Variant's
    /// scope. The Variant is registered before its body is lowered so
    /// recursive calls resolve to it instead of recursing forever.
    fn mint_variant(&mut self, func: FuncId, key: VariantKey, widened: bool) -> Result<VariantId, CoreError> {
        let def = self.catalog.func_def(self.program, func);
        let variant_id = VariantId(self.funcs.variants.len() as u32);
        trace!(func = %def.name, variant = variant_id.0, widened, "minting variant");

        let mut params = Vec::with_capacity(key.0.len());
        for set in &key.0 {
            let node = self.graph.add_node(Scope::Variant(variant_id), Some(def.span));
            self.graph.node_mut(node).types.union_with(set);
            self.enqueue(node);
            params.push(node);
        }
        let ret = self.graph.add_node(Scope::Variant(variant_id), Some(def.span));

        let inserted = self.funcs.insert(
            func,
            Variant {
                func,
                key,
                params: params.clone(),
                ret,
                locals: Default::default(),
                expr_nodes: Default::default(),
                live: false,
                widened,
            },
        );
        debug_assert_eq!(inserted, variant_id);

        let body = builder::lower_function_body(
            &mut self.graph,
            self.catalog,
            self.program,
            func,
            variant_id,
            &params,
            ret,
        )?;
        let variant = self.funcs.variant_mut(variant_id);
        variant.locals = body.locals;
        variant.expr_nodes = body.expr_nodes;
        for seed in body.seeds {
            self.enqueue(seed);
        }
        // Freshly lowered call sites already carry the pending flag.
        self.pending_calls.extend(body.pending);
        self.stats.variants_minted += 1;

        if !widened {
            self.maybe_widen(func)?;
        }
        Ok(variant_id)
    }

    fn maybe_widen(&mut self, func: FuncId) -> Result<(), CoreError> {
        // Past the step budget, every function is held to one generalized
        // variant; otherwise the configured threshold and policy apply.
        if self.budget_spent && self.funcs.state(func).variants.len() > 1 {
            return self.widen_function(func, WideningPolicy::CollapseAll);
        }
        if self.funcs.state(func).variants.len() > self.config.max_variants_per_function {
            self.widen_function(func, self.config.widening)?;
        }
        Ok(())
    }

    /// Merge Variant keys into one generalized key per the policy; future
    /// lookups subsumed by it reuse the generalized Variant. Existing
    /// Variants are never destroyed — superseded ones fall out as dead in
    /// the Specializer.
    fn widen_function(&mut self, func: FuncId, policy: WideningPolicy) -> Result<(), CoreError> {
        let state = self.funcs.state(func);
        let keys: Vec<VariantKey> = state.variants.keys().cloned().collect();
        if keys.len() < 2 {
            return Ok(());
        }
        let merged = match policy {
            WideningPolicy::MergeOldest => keys[0].generalize(&keys[1]),
            WideningPolicy::CollapseAll => {
                let mut acc = keys[0].clone();
                for key in &keys[1..] {
                    acc = acc.generalize(key);
                }
                acc
            }
            WideningPolicy::MergeLeastSpecific => {
                let mut by_cardinality: Vec<&VariantKey> = keys.iter().collect();
                // Stable: ties keep first-seen order.
                by_cardinality.sort_by_key(|key| std::cmp::Reverse(key.cardinality()));
                by_cardinality[0].generalize(by_cardinality[1])
            }
        };
        let merged = match &state.widened_key {
            Some(existing) => merged.generalize(existing),
            None => merged,
        };

        let name = self.catalog.func(func).name.clone();
        let count = self.funcs.state(func).variants.len();
        let warning = CoreError::ExcessSpecialization {
            function: name.clone(),
            count,
        };
        self.diagnostics.report(Diagnostic::warning(None, warning.to_string()));
        self.stats.widenings += 1;
        debug!(func = %name, count, "widening specialization");

        if !self.funcs.state(func).variants.contains_key(&merged) {
            self.mint_variant(func, merged.clone(), true)?;
        }
        self.funcs.states[func.0 as usize].widened_key = Some(merged);
        Ok(())
    }

    /// Wire argument→parameter and return→result flow for one target
    /// Variant. Edges to previously targeted Variants persist; retargeting
    /// only ever adds flow.
    fn wire_call(&mut self, call_id: CallId, variant_id: VariantId, param_offset: usize, wire_ret: bool) {
        if !self.graph.calls[call_id.0 as usize].targets.insert(variant_id) {
            return;
        }
        let args = self.graph.calls[call_id.0 as usize].args.clone();
        let result = self.graph.calls[call_id.0 as usize].result;
        let variant = self.funcs.variant(variant_id);
        let params: Vec<NodeId> = variant.params.iter().skip(param_offset).copied().collect();
        let ret = variant.ret;
        for (&arg, &param) in args.iter().zip(params.iter()) {
            self.flow(arg, param);
        }
        if wire_ret {
            self.flow(ret, result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AssignTarget, BinOp, Expr, ExprKind, FunctionDef, Literal, Module, ModuleId, Stmt};
    use smallvec::SmallVec;

    fn sp() -> Span {
        Span::new(ModuleId(0), 1, 1)
    }

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, sp())
    }

    fn int(value: i64) -> Expr {
        expr(ExprKind::Literal(Literal::Int(value)))
    }

    fn float(value: f64) -> Expr {
        expr(ExprKind::Literal(Literal::Float(value)))
    }

    fn name(n: &str) -> Expr {
        expr(ExprKind::Name(n.to_string()))
    }

    fn call(func: &str, args: Vec<Expr>) -> Expr {
        expr(ExprKind::Call {
            func: func.to_string(),
            args,
        })
    }

    fn assign(target: &str, value: Expr) -> Stmt {
        Stmt::Assign {
            target: AssignTarget::Symbol(target.to_string()),
            value,
            span: sp(),
        }
    }

    fn ret(value: Expr) -> Stmt {
        Stmt::Return {
            value: Some(value),
            span: sp(),
        }
    }

    fn func(name: &str, params: &[&str], body: Vec<Stmt>) -> FunctionDef {
        FunctionDef {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect::<SmallVec<[String; 4]>>(),
            body,
            span: sp(),
        }
    }

    fn solve(body: Vec<Stmt>, functions: Vec<FunctionDef>) -> (Program, Catalog, InferenceConfig) {
        let mut program = Program::new(vec![Module {
            name: "main".to_string(),
            imports: vec![],
            classes: vec![],
            functions,
            body,
        }]);
        program.finalize().unwrap();
        let catalog = Catalog::build(&program).unwrap();
        (program, catalog, InferenceConfig::default())
    }

    fn run_solver<'p>(program: &'p Program, catalog: &'p Catalog, config: InferenceConfig) -> Solver<'p> {
        let build = crate::builder::build(program, catalog).unwrap();
        let mut solver = Solver::new(program, catalog, build, config);
        solver.run().unwrap();
        solver
    }

    fn add_expr(a: Expr, b: Expr) -> Expr {
        expr(ExprKind::Binary {
            op: BinOp::Add,
            left: Box::new(a),
            right: Box::new(b),
        })
    }

    #[test]
    fn test_two_argument_types_mint_two_variants() {
        let increment = func("increment", &["x"], vec![ret(add_expr(name("x"), int(1)))]);
        let (program, catalog, config) = solve(
            vec![
                assign("a", call("increment", vec![int(3)])),
                assign("b", call("increment", vec![float(3.5)])),
            ],
            vec![increment],
        );
        let solver = run_solver(&program, &catalog, config);

        let f = FuncId(0);
        let variants: Vec<VariantId> = solver.funcs.variants_of(f).collect();
        assert_eq!(variants.len(), 2);

        let int_variant = solver.funcs.variant(variants[0]);
        assert_eq!(int_variant.key.0[0], TypeSet::single(TypeTag::Int));
        assert_eq!(solver.graph.node(int_variant.ret).types, TypeSet::single(TypeTag::Int));

        let float_variant = solver.funcs.variant(variants[1]);
        assert_eq!(float_variant.key.0[0], TypeSet::single(TypeTag::Float));
        assert_eq!(solver.graph.node(float_variant.ret).types, TypeSet::single(TypeTag::Float));

        // The call results pick up each variant's return type.
        let a = solver.graph.module_scopes[0].globals["a"];
        let b = solver.graph.module_scopes[0].globals["b"];
        assert_eq!(solver.graph.node(a).types, TypeSet::single(TypeTag::Int));
        assert_eq!(solver.graph.node(b).types, TypeSet::single(TypeTag::Float));
    }

    #[test]
    fn test_same_key_reuses_one_variant() {
        let identity = func("identity", &["x"], vec![ret(name("x"))]);
        let (program, catalog, config) = solve(
            vec![
                assign("a", call("identity", vec![int(1)])),
                assign("b", call("identity", vec![int(2)])),
            ],
            vec![identity],
        );
        let solver = run_solver(&program, &catalog, config);
        assert_eq!(solver.funcs.variants_of(FuncId(0)).count(), 1);
    }

    #[test]
    fn test_recursive_function_converges_to_one_variant() {
        // fact(n): 1 if n == 0 else n * fact(n - 1)
        let fact = func(
            "fact",
            &["n"],
            vec![ret(expr(ExprKind::Ternary {
                cond: Box::new(expr(ExprKind::Binary {
                    op: BinOp::Eq,
                    left: Box::new(name("n")),
                    right: Box::new(int(0)),
                })),
                then: Box::new(int(1)),
                orelse: Box::new(expr(ExprKind::Binary {
                    op: BinOp::Mul,
                    left: Box::new(name("n")),
                    right: Box::new(call(
                        "fact",
                        vec![expr(ExprKind::Binary {
                            op: BinOp::Sub,
                            left: Box::new(name("n")),
                            right: Box::new(int(1)),
                        })],
                    )),
                })),
            }))],
        );
        let (program, catalog, config) = solve(vec![assign("r", call("fact", vec![int(5)]))], vec![fact]);
        let solver = run_solver(&program, &catalog, config);

        let variants: Vec<VariantId> = solver.funcs.variants_of(FuncId(0)).collect();
        assert_eq!(variants.len(), 1);
        let variant = solver.funcs.variant(variants[0]);
        assert_eq!(solver.graph.node(variant.params[0]).types, TypeSet::single(TypeTag::Int));
        assert_eq!(solver.graph.node(variant.ret).types, TypeSet::single(TypeTag::Int));
    }

    #[test]
    fn test_mixed_set_stays_precise_on_integer_path() {
        // x is int in one branch, str in the other; y = x + 1 only
        // resolves the integer combination.
        let (program, catalog, config) = solve(
            vec![
                Stmt::If {
                    condition: expr(ExprKind::Literal(Literal::Bool(true))),
                    then_body: vec![assign("x", int(1))],
                    else_body: Some(vec![assign("x", expr(ExprKind::Literal(Literal::Str("s".into()))))]),
                },
                assign("y", add_expr(name("x"), int(1))),
            ],
            vec![],
        );
        let solver = run_solver(&program, &catalog, config);

        let x = solver.graph.module_scopes[0].globals["x"];
        let y = solver.graph.module_scopes[0].globals["y"];
        assert_eq!(solver.graph.node(x).types.len(), 2);
        assert_eq!(solver.graph.node(y).types, TypeSet::single(TypeTag::Int));
        assert!(solver.diagnostics.is_empty());
    }

    #[test]
    fn test_widening_kicks_in_past_threshold() {
        let identity = func("identity", &["x"], vec![ret(name("x"))]);
        let mut body = vec![
            assign("a", call("identity", vec![int(1)])),
            assign("b", call("identity", vec![float(1.0)])),
            assign("c", call("identity", vec![expr(ExprKind::Literal(Literal::Str("s".into())))])),
        ];
        body.push(assign(
            "d",
            call("identity", vec![expr(ExprKind::Literal(Literal::Bool(true)))]),
        ));
        let (program, catalog, mut config) = solve(body, vec![identity]);
        config.max_variants_per_function = 2;
        let solver = run_solver(&program, &catalog, config);

        let state = solver.funcs.state(FuncId(0));
        assert!(state.widened_key.is_some());
        assert!(solver.stats().widenings >= 1);
        assert!(solver
            .diagnostics
            .iter()
            .any(|d| d.severity == crate::diagnostics::Severity::Warning));

        // Lookups subsumed by the widened key reuse the generalized
        // variant instead of minting new ones.
        let widened = state.widened_key.clone().unwrap();
        let sub = VariantKey(vec![widened.0[0].iter().take(1).collect()]);
        assert_eq!(solver.funcs.lookup(FuncId(0), &sub), solver.funcs.lookup(FuncId(0), &widened));
    }

    #[test]
    fn test_solver_is_idempotent_at_fixpoint() {
        let increment = func("increment", &["x"], vec![ret(add_expr(name("x"), int(1)))]);
        let (program, catalog, config) = solve(
            vec![assign("a", call("increment", vec![int(3)]))],
            vec![increment],
        );
        let mut solver = run_solver(&program, &catalog, config);

        let snapshot: Vec<TypeSet> = solver.graph.nodes.iter().map(|n| n.types.clone()).collect();
        let minted = solver.stats().variants_minted;

        // Re-enqueue everything and run again: no growth, no new variants.
        for id in 0..solver.graph.nodes.len() as u32 {
            solver.enqueue(NodeId(id));
        }
        for id in 0..solver.graph.calls.len() as u32 {
            solver.enqueue_call(CallId(id));
        }
        solver.run().unwrap();

        let after: Vec<TypeSet> = solver.graph.nodes.iter().map(|n| n.types.clone()).collect();
        assert_eq!(snapshot, after);
        assert_eq!(solver.stats().variants_minted, minted);
    }

    #[test]
    fn test_step_budget_forces_collapse() {
        let identity = func("identity", &["x"], vec![ret(name("x"))]);
        let (program, catalog, mut config) = solve(
            vec![
                assign("a", call("identity", vec![int(1)])),
                assign("b", call("identity", vec![float(1.0)])),
            ],
            vec![identity],
        );
        config.max_solver_steps = Some(1);
        let solver = run_solver(&program, &catalog, config);

        // The budget recovered via widening instead of aborting; the
        // fixpoint was still reached.
        assert!(solver.funcs.state(FuncId(0)).widened_key.is_some());
    }
}
