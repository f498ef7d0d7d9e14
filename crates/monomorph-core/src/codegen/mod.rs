//! Code generation: one Rust translation unit per module.
//!
//! Emission order follows the module import DAG (strongly-connected
//! components collapse cycles; declaration order inside a unit is free in
//! the target representation, which is how cycles are broken without
//! touching analysis results). Per live Variant one monomorphic `fn` is
//! emitted; per class one struct; module top-level code becomes the unit's
//! entry function. Emission failures are contained per Variant: a single
//! unresolved function does not block unrelated units.

mod func_gen;
mod keywords;
mod type_gen;

use fnv::FnvHashMap;
use indexmap::IndexSet;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};
use tracing::{debug, warn};

use crate::catalog::{AttrResolution, Catalog, SymbolEntry};
use crate::error::CoreError;
use crate::graph::{CallId, NodeId};
use crate::hir::{ModuleId, Program};
use crate::types::ClassId;
use crate::variants::{FunctionTable, VariantId};
use crate::Analysis;
use self::type_gen::{rust_type, UnionRegistry};

/// One emitted translation unit.
#[derive(Debug, Clone)]
pub struct EmittedUnit {
    pub module: String,
    pub source: String,
}

/// Everything the code generator produced: as many units as possible, plus
/// the per-Variant failures that blocked the rest.
#[derive(Debug, Default)]
pub struct CodegenOutput {
    pub units: Vec<EmittedUnit>,
    pub failures: Vec<CoreError>,
}

/// Walk modules in dependency order and emit each translation unit.
pub fn generate(analysis: &Analysis) -> CodegenOutput {
    let program = analysis.program;
    let catalog = &analysis.catalog;
    let graph = &analysis.graph;
    let funcs = &analysis.functions;

    let fn_names = variant_fn_names(program, catalog, funcs);
    let calls_by_result: FnvHashMap<NodeId, CallId> = graph
        .calls
        .iter()
        .enumerate()
        .map(|(index, call)| (call.result, CallId(index as u32)))
        .collect();

    let mut unions = UnionRegistry::default();
    let mut output = CodegenOutput::default();
    let multi_module = program.modules.len() > 1;

    for module_id in emission_order(program) {
        let module = program.module(module_id);
        let mut items: Vec<TokenStream> = Vec::new();

        // Module globals live behind thread-local cells so every Variant
        // of this module's functions can reach them.
        let mut cells = Vec::new();
        for (name, &node) in &graph.module_scopes[module_id.0 as usize].globals {
            let set = graph.node(node).types.clone();
            if set.is_empty() {
                continue;
            }
            let Some(repr) = unions.repr_of_set(&set, graph, catalog) else {
                continue;
            };
            let ty = rust_type(&repr, catalog);
            let ident = format_ident!("G_{}_{}", keywords::upper(&module.name), keywords::upper(name));
            cells.push(quote! { static #ident: RefCell<#ty> = RefCell::new(Default::default()); });
        }
        if !cells.is_empty() {
            items.push(quote! { thread_local! { #(#cells)* } });
        }

        for class_def in &module.classes {
            let Some(SymbolEntry::Class(class_id)) = catalog.lookup_symbol(module_id, &class_def.name) else {
                continue;
            };
            items.push(emit_class_struct(class_id, catalog, graph, &mut unions));
        }

        for func in catalog.func_ids() {
            if catalog.func(func).module != module_id {
                continue;
            }
            for variant_id in funcs.variants_of(func) {
                if !funcs.variant(variant_id).live {
                    continue;
                }
                match func_gen::emit_variant_fn(
                    program,
                    catalog,
                    graph,
                    funcs,
                    &mut unions,
                    &fn_names,
                    &calls_by_result,
                    variant_id,
                ) {
                    Ok(tokens) => items.push(tokens),
                    Err(error) => output.failures.push(error),
                }
            }
        }

        match func_gen::emit_entry_fn(
            program,
            catalog,
            graph,
            funcs,
            &mut unions,
            &fn_names,
            &calls_by_result,
            module_id,
        ) {
            Ok(tokens) => items.push(tokens),
            Err(error) => output.failures.push(error),
        }

        // Tagged unions first needed by this unit are defined here.
        items.extend(unions.emit_pending(graph, catalog));

        let imports = if multi_module {
            quote! { use super::*; }
        } else {
            quote! {}
        };
        let body = quote! {
            use std::cell::RefCell;
            use std::collections::HashMap;
            use std::rc::Rc;
            #imports
            #(#items)*
        };
        let source = format!("#![allow(unused)]\n{}", body);
        if let Err(parse_error) = syn::parse_file(&source) {
            warn!(module = %module.name, %parse_error, "emitted unit does not parse");
        }
        output.units.push(EmittedUnit {
            module: module.name.clone(),
            source,
        });
    }

    debug!(
        units = output.units.len(),
        failures = output.failures.len(),
        "code generation finished"
    );
    output
}

/// Modules in dependency-first order; the SCC condensation collapses
/// import cycles into one deterministic group.
fn emission_order(program: &Program) -> Vec<ModuleId> {
    let mut dag = DiGraph::<u32, ()>::new();
    for index in 0..program.modules.len() {
        dag.add_node(index as u32);
    }
    for (index, module) in program.modules.iter().enumerate() {
        for import in &module.imports {
            let target = program
                .modules
                .iter()
                .position(|m| &m.name == import)
                .expect("imports validated by Program::finalize");
            dag.add_edge(
                petgraph::graph::NodeIndex::new(index),
                petgraph::graph::NodeIndex::new(target),
                (),
            );
        }
    }
    // Reverse topological order of importer→importee edges puts
    // dependencies first.
    let mut order = Vec::with_capacity(program.modules.len());
    for component in tarjan_scc(&dag) {
        let mut members: Vec<u32> = component.iter().map(|n| dag[*n]).collect();
        members.sort_unstable();
        order.extend(members.into_iter().map(ModuleId));
    }
    order
}

/// Stable function names for emitted Variants: `base_v<n>` in first-seen
/// key order, with the module name prefixed only when two modules declare
/// the same base.
fn variant_fn_names(program: &Program, catalog: &Catalog, funcs: &FunctionTable) -> FnvHashMap<VariantId, String> {
    let bases: Vec<String> = catalog
        .func_ids()
        .map(|func| {
            let decl = catalog.func(func);
            let trimmed = decl.name.trim_matches('_');
            let trimmed = if trimmed.is_empty() { "fn" } else { trimmed };
            match decl.class {
                Some(class) => format!("{}_{}", catalog.class(class).name.to_lowercase(), trimmed),
                None => trimmed.to_string(),
            }
        })
        .collect();

    let mut names = FnvHashMap::default();
    for (index, func) in catalog.func_ids().enumerate() {
        let duplicated = bases.iter().enumerate().any(|(other, base)| other != index && base == &bases[index]);
        let base = if duplicated {
            let module = catalog.func(func).module;
            let module_name = keywords::upper(&program.module(module).name).to_lowercase();
            format!("{}_{}", module_name, bases[index])
        } else {
            bases[index].clone()
        };
        for (variant_index, variant_id) in funcs.variants_of(func).enumerate() {
            names.insert(variant_id, format!("{}_v{}", base, variant_index));
        }
    }
    names
}

/// One struct per class, fields flattened through the linearization and
/// typed from the finalized slot nodes. Fields that never materialized a
/// slot are dead and omitted.
fn emit_class_struct(
    class_id: ClassId,
    catalog: &Catalog,
    graph: &crate::graph::ConstraintGraph,
    unions: &mut UnionRegistry,
) -> TokenStream {
    let desc = catalog.class(class_id);
    let name = format_ident!("{}", desc.name);
    let mut seen = IndexSet::new();
    let mut fields = Vec::new();
    for &ancestor in &desc.linearization {
        for field in &catalog.class(ancestor).fields {
            if !seen.insert(field.clone()) {
                continue;
            }
            let Some(AttrResolution::Field { owner }) = catalog.resolve_attr(class_id, field) else {
                continue;
            };
            let Some(&slot) = graph.field_slots.get(&(owner, field.clone())) else {
                continue;
            };
            let set = graph.node(slot).types.clone();
            if set.is_empty() {
                continue;
            }
            let Some(repr) = unions.repr_of_set(&set, graph, catalog) else {
                continue;
            };
            let ty = rust_type(&repr, catalog);
            let ident = format_ident!("{}", keywords::escape(field));
            fields.push(quote! { pub #ident: #ty });
        }
    }
    quote! {
        #[derive(Debug, Default, Clone, PartialEq)]
        pub struct #name { #(#fields),* }
    }
}
