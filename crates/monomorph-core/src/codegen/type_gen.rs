//! Type representation selection for emitted code.
//!
//! Singleton type sets map to plain Rust types. Non-singleton sets get the
//! richest common representation able to hold every member: a generated
//! tagged union, deduplicated globally by type set, with runtime tag checks
//! emitted only where members need different physical handling.

use indexmap::{IndexMap, IndexSet};
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use crate::catalog::Catalog;
use crate::graph::ConstraintGraph;
use crate::types::{ClassId, SiteId, TypeSet, TypeTag};

/// The physical representation of a type set in emitted code.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Repr {
    Unit,
    Int,
    Float,
    Bool,
    Str,
    List(Box<Repr>),
    Dict(Box<Repr>, Box<Repr>),
    Object(ClassId),
    /// A generated tagged union; the name keys into the registry.
    Union(String),
}

/// One generated tagged union.
#[derive(Debug, Clone)]
pub(crate) struct UnionDef {
    pub name: String,
    pub members: TypeSet,
    pub emitted: bool,
}

/// Registry of tagged unions, deduplicated by member set. Each union is
/// emitted once, into the first translation unit that needs it.
#[derive(Debug, Default)]
pub(crate) struct UnionRegistry {
    defs: IndexMap<TypeSet, UnionDef>,
    names: IndexSet<String>,
}

impl UnionRegistry {
    /// The representation of a whole type set.
    pub fn repr_of_set(&mut self, set: &TypeSet, graph: &ConstraintGraph, catalog: &Catalog) -> Option<Repr> {
        let mut visiting = IndexSet::new();
        self.repr_of_set_inner(set, graph, catalog, &mut visiting)
    }

    fn repr_of_set_inner(
        &mut self,
        set: &TypeSet,
        graph: &ConstraintGraph,
        catalog: &Catalog,
        visiting: &mut IndexSet<SiteId>,
    ) -> Option<Repr> {
        match set.len() {
            0 => None,
            1 => Some(self.repr_of_tag(set.iter().next().expect("nonempty"), graph, catalog, visiting)),
            _ => {
                let name = self.register(set, catalog);
                Some(Repr::Union(name))
            }
        }
    }

    /// The representation of one concrete tag.
    pub fn repr_of_tag(
        &mut self,
        tag: TypeTag,
        graph: &ConstraintGraph,
        catalog: &Catalog,
        visiting: &mut IndexSet<SiteId>,
    ) -> Repr {
        match tag {
            TypeTag::Int => Repr::Int,
            TypeTag::Float => Repr::Float,
            TypeTag::Bool => Repr::Bool,
            TypeTag::Str => Repr::Str,
            TypeTag::None => Repr::Unit,
            TypeTag::Object(class) => Repr::Object(class),
            TypeTag::List(site) => {
                if !visiting.insert(site) {
                    // Self-nested container; the element collapses to unit.
                    return Repr::List(Box::new(Repr::Unit));
                }
                let elem_set = graph.node(graph.site(site).elem).types.clone();
                let elem = self
                    .repr_of_set_inner(&elem_set, graph, catalog, visiting)
                    .unwrap_or(Repr::Unit);
                visiting.swap_remove(&site);
                Repr::List(Box::new(elem))
            }
            TypeTag::Dict(site) => {
                if !visiting.insert(site) {
                    return Repr::Dict(Box::new(Repr::Unit), Box::new(Repr::Unit));
                }
                let site_nodes = graph.site(site);
                let key_set = graph
                    .node(site_nodes.key.expect("dict site has a key node"))
                    .types
                    .clone();
                let value_set = graph.node(site_nodes.elem).types.clone();
                let key = self
                    .repr_of_set_inner(&key_set, graph, catalog, visiting)
                    .unwrap_or(Repr::Unit);
                let value = self
                    .repr_of_set_inner(&value_set, graph, catalog, visiting)
                    .unwrap_or(Repr::Unit);
                visiting.swap_remove(&site);
                Repr::Dict(Box::new(key), Box::new(value))
            }
        }
    }

    /// Register a union for a multi-member set, returning its name.
    pub fn register(&mut self, set: &TypeSet, catalog: &Catalog) -> String {
        if let Some(def) = self.defs.get(set) {
            return def.name.clone();
        }
        let mut name = set
            .iter()
            .map(|tag| variant_name(tag, catalog))
            .collect::<Vec<_>>()
            .join("Or");
        while !self.names.insert(name.clone()) {
            name.push('X');
        }
        self.defs.insert(
            set.clone(),
            UnionDef {
                name: name.clone(),
                members: set.clone(),
                emitted: false,
            },
        );
        name
    }

    pub fn union_name(&self, set: &TypeSet) -> Option<&str> {
        self.defs.get(set).map(|d| d.name.as_str())
    }

    /// Drain every union registered but not yet emitted. Emitting a union
    /// can register payload unions in turn, so this loops to exhaustion.
    pub fn emit_pending(&mut self, graph: &ConstraintGraph, catalog: &Catalog) -> Vec<TokenStream> {
        let mut items = Vec::new();
        loop {
            let next = self
                .defs
                .values()
                .find(|def| !def.emitted)
                .map(|def| (def.name.clone(), def.members.clone()));
            let Some((name, members)) = next else {
                break;
            };
            self.defs.get_mut(&members).expect("registered").emitted = true;
            items.push(self.emit_union(&name, &members, graph, catalog));
        }
        items
    }

    fn emit_union(&mut self, name: &str, members: &TypeSet, graph: &ConstraintGraph, catalog: &Catalog) -> TokenStream {
        let ident = format_ident!("{}", name);
        let mut arms = Vec::new();
        for tag in members.iter() {
            let variant = format_ident!("{}", variant_name(tag, catalog));
            if tag == TypeTag::None {
                arms.push(quote! { #variant });
            } else {
                let mut visiting = IndexSet::new();
                let repr = self.repr_of_tag(tag, graph, catalog, &mut visiting);
                let ty = rust_type(&repr, catalog);
                arms.push(quote! { #variant(#ty) });
            }
        }

        // Default is the first member, so locals can be pre-declared.
        let first = members.iter().next().expect("unions have members");
        let first_variant = format_ident!("{}", variant_name(first, catalog));
        let default_value = if first == TypeTag::None {
            quote! { #ident::#first_variant }
        } else {
            quote! { #ident::#first_variant(Default::default()) }
        };

        quote! {
            #[derive(Debug, Clone, PartialEq)]
            pub enum #ident { #(#arms),* }

            impl Default for #ident {
                fn default() -> Self {
                    #default_value
                }
            }
        }
    }
}

/// Enum variant name for a tag.
pub(crate) fn variant_name(tag: TypeTag, catalog: &Catalog) -> String {
    match tag {
        TypeTag::Int => "Int".to_string(),
        TypeTag::Float => "Float".to_string(),
        TypeTag::Bool => "Bool".to_string(),
        TypeTag::Str => "Str".to_string(),
        TypeTag::None => "Nil".to_string(),
        TypeTag::List(site) => format!("List{}", site.0),
        TypeTag::Dict(site) => format!("Dict{}", site.0),
        TypeTag::Object(class) => catalog.class(class).name.clone(),
    }
}

/// The Rust type for a representation. Objects and containers live behind
/// `Rc<RefCell<..>>` so the emitted code keeps the source language's
/// aliasing semantics.
pub(crate) fn rust_type(repr: &Repr, catalog: &Catalog) -> TokenStream {
    match repr {
        Repr::Unit => quote! { () },
        Repr::Int => quote! { i64 },
        Repr::Float => quote! { f64 },
        Repr::Bool => quote! { bool },
        Repr::Str => quote! { String },
        Repr::List(elem) => {
            let inner = rust_type(elem, catalog);
            quote! { Rc<RefCell<Vec<#inner>>> }
        }
        Repr::Dict(key, value) => {
            let k = rust_type(key, catalog);
            let v = rust_type(value, catalog);
            quote! { Rc<RefCell<HashMap<#k, #v>>> }
        }
        Repr::Object(class) => {
            let ident = format_ident!("{}", catalog.class(*class).name);
            quote! { Rc<RefCell<#ident>> }
        }
        Repr::Union(name) => {
            let ident = format_ident!("{}", name);
            quote! { #ident }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Scope, SiteKind};
    use crate::hir::{Module, ModuleId, Program, Span};

    fn empty_catalog() -> Catalog {
        let mut program = Program::new(vec![Module {
            name: "main".to_string(),
            imports: vec![],
            classes: vec![],
            functions: vec![],
            body: vec![],
        }]);
        program.finalize().unwrap();
        Catalog::build(&program).unwrap()
    }

    #[test]
    fn test_singleton_sets_map_to_plain_types() {
        let catalog = empty_catalog();
        let graph = ConstraintGraph::new(1);
        let mut registry = UnionRegistry::default();

        let repr = registry
            .repr_of_set(&TypeSet::single(TypeTag::Int), &graph, &catalog)
            .unwrap();
        assert_eq!(repr, Repr::Int);
        assert_eq!(rust_type(&repr, &catalog).to_string(), "i64");
    }

    #[test]
    fn test_empty_set_has_no_representation() {
        let catalog = empty_catalog();
        let graph = ConstraintGraph::new(1);
        let mut registry = UnionRegistry::default();
        assert!(registry.repr_of_set(&TypeSet::empty(), &graph, &catalog).is_none());
    }

    #[test]
    fn test_union_is_registered_once_per_set() {
        let catalog = empty_catalog();
        let graph = ConstraintGraph::new(1);
        let mut registry = UnionRegistry::default();
        let set = TypeSet::from_tags(&[TypeTag::Int, TypeTag::Str]);

        let a = registry.repr_of_set(&set, &graph, &catalog).unwrap();
        let b = registry.repr_of_set(&set, &graph, &catalog).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Repr::Union("IntOrStr".to_string()));

        let items = registry.emit_pending(&graph, &catalog);
        assert_eq!(items.len(), 1);
        let source = items[0].to_string();
        assert!(source.contains("enum IntOrStr"));
        assert!(source.contains("Int (i64)"));
        assert!(source.contains("Str (String)"));
        // Emitting again produces nothing new.
        assert!(registry.emit_pending(&graph, &catalog).is_empty());
    }

    #[test]
    fn test_list_repr_uses_element_node() {
        let catalog = empty_catalog();
        let mut graph = ConstraintGraph::new(1);
        let span = Span::new(ModuleId(0), 1, 1);
        let site = graph.new_site(SiteKind::List, Scope::Module(ModuleId(0)), span);
        let elem = graph.site(site).elem;
        graph.node_mut(elem).types.insert(TypeTag::Float);

        let mut registry = UnionRegistry::default();
        let repr = registry
            .repr_of_set(&TypeSet::single(TypeTag::List(site)), &graph, &catalog)
            .unwrap();
        assert_eq!(repr, Repr::List(Box::new(Repr::Float)));
        assert_eq!(rust_type(&repr, &catalog).to_string().replace(' ', ""), "Rc<RefCell<Vec<f64>>>");
    }

    #[test]
    fn test_none_member_is_payloadless() {
        let catalog = empty_catalog();
        let graph = ConstraintGraph::new(1);
        let mut registry = UnionRegistry::default();
        let set = TypeSet::from_tags(&[TypeTag::Int, TypeTag::None]);
        registry.register(&set, &catalog);

        let items = registry.emit_pending(&graph, &catalog);
        let source = items[0].to_string();
        assert!(source.contains("enum IntOrNil"));
        assert!(source.contains("Nil"));
        assert!(!source.contains("Nil ("));
    }
}
