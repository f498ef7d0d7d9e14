//! Specializer: finalizes the Variant set once the worklist has emptied.
//!
//! Recomputes each call site's targets against the stable graph, merges
//! structurally identical Variants, marks Variants unreachable from module
//! entry code as dead (dead-code elimination falls out as a byproduct), and
//! flags call sites whose resolved target set still holds more than one
//! concrete Variant as polymorphic — those need dynamic dispatch in the
//! emitted code.

use fnv::FnvHashMap;
use tracing::debug;

use crate::catalog::{AttrResolution, Catalog};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::graph::{CallId, CallSite, Callee, ConstraintGraph, Scope};
use crate::hir::Program;
use crate::types::{TypeSet, TypeTag};
use crate::variants::{FunctionTable, VariantId, VariantKey};

/// Summary of the finalization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecializationStats {
    pub live_variants: usize,
    pub dead_variants: usize,
    pub polymorphic_calls: usize,
}

pub fn finalize(
    program: &Program,
    catalog: &Catalog,
    graph: &mut ConstraintGraph,
    funcs: &mut FunctionTable,
    diagnostics: &mut Vec<Diagnostic>,
) -> SpecializationStats {
    // Structural dedup: two Variants of one function whose finalized
    // parameter/return sets coincide collapse onto the first-seen one.
    let mut retarget: FnvHashMap<VariantId, VariantId> = FnvHashMap::default();
    for func in catalog.func_ids() {
        let mut signatures: Vec<(Vec<TypeSet>, TypeSet, VariantId)> = Vec::new();
        for variant_id in funcs.variants_of(func) {
            let variant = funcs.variant(variant_id);
            let params: Vec<TypeSet> = variant.params.iter().map(|&p| graph.node(p).types.clone()).collect();
            let ret = graph.node(variant.ret).types.clone();
            match signatures.iter().find(|(p, r, _)| *p == params && *r == ret) {
                Some(&(_, _, canonical)) => {
                    retarget.insert(variant_id, canonical);
                }
                None => signatures.push((params, ret, variant_id)),
            }
        }
    }

    // Final targets per call site, after retargeting.
    for call_id in 0..graph.calls.len() {
        let call = graph.calls[call_id].clone();
        let mut targets = Vec::new();
        for target in final_targets(graph, catalog, funcs, program, &call) {
            let canonical = retarget.get(&target).copied().unwrap_or(target);
            if !targets.contains(&canonical) {
                targets.push(canonical);
            }
        }
        let site = &mut graph.calls[call_id];
        site.polymorphic = targets.len() > 1;
        site.live_targets = targets;
    }

    // Reachability from module entry code.
    let mut calls_in_variant: FnvHashMap<VariantId, Vec<CallId>> = FnvHashMap::default();
    let mut roots: Vec<CallId> = Vec::new();
    for (index, call) in graph.calls.iter().enumerate() {
        let id = CallId(index as u32);
        match call.scope {
            Scope::Module(_) => roots.push(id),
            Scope::Variant(owner) => calls_in_variant.entry(owner).or_default().push(id),
        }
    }
    let mut stack: Vec<VariantId> = Vec::new();
    for root in roots {
        stack.extend(graph.calls[root.0 as usize].live_targets.iter().copied());
    }
    while let Some(variant_id) = stack.pop() {
        if funcs.variant(variant_id).live {
            continue;
        }
        funcs.variant_mut(variant_id).live = true;
        if let Some(inner) = calls_in_variant.get(&variant_id) {
            for &call in inner {
                stack.extend(graph.calls[call.0 as usize].live_targets.iter().copied());
            }
        }
    }

    let mut stats = SpecializationStats::default();
    for variant_id in funcs.variant_ids() {
        let variant = funcs.variant(variant_id);
        if variant.live {
            stats.live_variants += 1;
        } else {
            stats.dead_variants += 1;
            let decl = catalog.func(variant.func);
            let def = catalog.func_def(program, variant.func);
            diagnostics.report(Diagnostic::note(
                Some(def.span),
                format!("specialization of '{}' is unreachable and will not be emitted", decl.name),
            ));
        }
    }
    stats.polymorphic_calls = graph.calls.iter().filter(|c| c.polymorphic).count();

    debug!(
        live = stats.live_variants,
        dead = stats.dead_variants,
        polymorphic = stats.polymorphic_calls,
        "specialization finalized"
    );
    stats
}

/// The Variants a call site targets at fixpoint, recomputed from the
/// stable argument/receiver sets. Builtin callees contribute none.
fn final_targets(
    graph: &ConstraintGraph,
    catalog: &Catalog,
    funcs: &FunctionTable,
    program: &Program,
    call: &CallSite,
) -> Vec<VariantId> {
    match &call.callee {
        Callee::Direct(func) => key_from_args(graph, &call.args)
            .and_then(|key| funcs.lookup(*func, &key))
            .into_iter()
            .collect(),
        Callee::Ctor(class) => {
            let Some(init) = catalog.constructor(*class) else {
                return Vec::new();
            };
            key_from_args(graph, &call.args)
                .and_then(|mut key| {
                    key.0.insert(0, TypeSet::single(TypeTag::Object(*class)));
                    funcs.lookup(init, &key)
                })
                .into_iter()
                .collect()
        }
        Callee::Method { name } => {
            let Some(receiver) = call.receiver else {
                return Vec::new();
            };
            let mut targets = Vec::new();
            for tag in graph.node(receiver).types.iter() {
                let TypeTag::Object(class) = tag else { continue };
                let Some(AttrResolution::Method(func)) = catalog.resolve_attr(class, name) else {
                    continue;
                };
                if catalog.func_def(program, func).params.len() != call.args.len() + 1 {
                    continue;
                }
                if let Some(mut key) = key_from_args(graph, &call.args) {
                    key.0.insert(0, TypeSet::single(tag));
                    if let Some(variant) = funcs.lookup(func, &key) {
                        targets.push(variant);
                    }
                }
            }
            targets
        }
        Callee::Builtin(_) => Vec::new(),
    }
}

fn key_from_args(graph: &ConstraintGraph, args: &[crate::graph::NodeId]) -> Option<VariantKey> {
    let mut sets = Vec::with_capacity(args.len());
    for &arg in args {
        let types = graph.node(arg).types.clone();
        if types.is_empty() {
            return None;
        }
        sets.push(types);
    }
    Some(VariantKey(sets))
}
