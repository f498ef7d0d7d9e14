//! The constraint graph: an arena of dataflow nodes with copy edges,
//! deferred receiver-dependent uses, operator constraints, and call sites.
//!
//! Nodes are addressed by stable `u32` indices and never deleted; edges are
//! only ever added. Monotonicity of the solve is preserved entirely by
//! growing type sets, never by structural edits after an edge exists.

use fnv::FnvHashMap;
use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use crate::catalog::{BuiltinFn, FuncId};
use crate::hir::{BinOp, ExprId, ModuleId, Span, UnaryOp};
use crate::types::{ClassId, SiteId, TypeSet};
use crate::variants::VariantId;

/// Index of a dataflow node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Index of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(pub u32);

/// Index of a deferred receiver-dependent use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UseId(pub u32);

/// Index of an operator constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub u32);

/// The scope owning a node: a module top level or one function variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Module(ModuleId),
    Variant(VariantId),
}

/// One dataflow point: a variable, parameter, return slot, expression
/// result, attribute slot, or container-element slot.
#[derive(Debug, Clone)]
pub struct Node {
    pub types: TypeSet,
    /// Copy-edge successors.
    pub succs: SmallVec<[NodeId; 4]>,
    pub scope: Scope,
    pub span: Option<Span>,
    /// Queued-for-reprocessing flag; owned by the solver.
    pub dirty: bool,
    /// Set when an unresolved attribute poisons this node; propagates to
    /// successors so downstream consumers observe the same unresolved
    /// state instead of an arbitrary fallback type.
    pub poisoned: bool,
}

/// What kind of container a site is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    List,
    Dict,
}

/// The element node(s) of one container identity.
#[derive(Debug, Clone)]
pub struct SiteNodes {
    pub kind: SiteKind,
    /// List elements, or dict values.
    pub elem: NodeId,
    /// Dict keys.
    pub key: Option<NodeId>,
}

/// A receiver-dependent use, re-evaluated whenever the receiver's type set
/// grows rather than propagated structurally.
#[derive(Debug, Clone)]
pub enum UseKind {
    AttrLoad { attr: String, result: NodeId },
    AttrStore { attr: String, value: NodeId },
    /// `for target in receiver`.
    IterLoad { target: NodeId },
    IndexLoad { index: NodeId, result: NodeId },
    IndexStore { index: NodeId, value: NodeId },
}

#[derive(Debug, Clone)]
pub struct UseRecord {
    pub receiver: NodeId,
    pub kind: UseKind,
    pub span: Span,
    /// Receiver tags already materialized; bounds re-resolution work and
    /// keeps diagnostics one-per-class.
    pub seen: TypeSet,
}

/// An operator constraint. Resolution is combination-wise over the current
/// operand sets against the builtin signature table (or a class operator
/// method), so it is re-evaluated when either operand grows.
#[derive(Debug, Clone)]
pub enum OpKind {
    Binary { op: BinOp, left: NodeId, right: NodeId },
    Unary { op: UnaryOp, operand: NodeId },
}

#[derive(Debug, Clone)]
pub struct OpConstraint {
    pub kind: OpKind,
    pub result: NodeId,
    pub span: Span,
    /// Operand tag pairs already looked up (diagnostic dedup).
    pub seen: Vec<(crate::types::TypeTag, crate::types::TypeTag)>,
}

/// Who a call site calls.
#[derive(Debug, Clone)]
pub enum Callee {
    /// Direct call to a known function.
    Direct(FuncId),
    /// Class instantiation; runs the constructor if the class has one.
    Ctor(ClassId),
    /// Method call; resolved per receiver tag at solve time.
    Method { name: String },
    /// Builtin whose result depends on argument types.
    Builtin(BuiltinFn),
}

/// One call expression: its callee, argument nodes, and result node, plus
/// the Variants it has been wired to so far.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub callee: Callee,
    pub receiver: Option<NodeId>,
    pub args: Vec<NodeId>,
    pub result: NodeId,
    pub span: Span,
    pub scope: Scope,
    /// Pre-allocated container identity for builtin methods that produce a
    /// fresh container (e.g. `str.split`).
    pub result_site: Option<SiteId>,
    /// Every Variant this site was ever wired to (superseded keys stay;
    /// the Specializer decides which targets are live at fixpoint).
    pub targets: IndexSet<VariantId>,
    /// Final targets at fixpoint; filled by the Specializer.
    pub live_targets: Vec<VariantId>,
    /// True iff more than one concrete live target remains at fixpoint.
    pub polymorphic: bool,
    /// Receiver tags already inspected (diagnostic dedup for method calls).
    pub seen: TypeSet,
    /// Queued-for-re-evaluation flag; owned by the solver.
    pub pending: bool,
}

/// Per-module top-level scope: global variable nodes and the
/// expression→node map used by the code generator.
#[derive(Debug, Clone, Default)]
pub struct ModuleScope {
    pub globals: IndexMap<String, NodeId>,
    pub expr_nodes: FnvHashMap<ExprId, NodeId>,
}

/// The whole mutable dataflow graph.
#[derive(Debug)]
pub struct ConstraintGraph {
    pub nodes: Vec<Node>,
    pub sites: Vec<SiteNodes>,
    pub uses: Vec<UseRecord>,
    pub uses_by_receiver: FnvHashMap<NodeId, SmallVec<[UseId; 2]>>,
    pub ops: Vec<OpConstraint>,
    pub ops_by_operand: FnvHashMap<NodeId, SmallVec<[OpId; 2]>>,
    pub calls: Vec<CallSite>,
    pub calls_by_node: FnvHashMap<NodeId, SmallVec<[CallId; 2]>>,
    /// One slot node per (declaring class, field name), created lazily as
    /// receivers materialize.
    pub field_slots: IndexMap<(ClassId, String), NodeId>,
    pub module_scopes: Vec<ModuleScope>,
}

impl ConstraintGraph {
    pub fn new(num_modules: usize) -> Self {
        Self {
            nodes: Vec::new(),
            sites: Vec::new(),
            uses: Vec::new(),
            uses_by_receiver: FnvHashMap::default(),
            ops: Vec::new(),
            ops_by_operand: FnvHashMap::default(),
            calls: Vec::new(),
            calls_by_node: FnvHashMap::default(),
            field_slots: IndexMap::new(),
            module_scopes: vec![ModuleScope::default(); num_modules],
        }
    }

    pub fn add_node(&mut self, scope: Scope, span: Option<Span>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            types: TypeSet::empty(),
            succs: SmallVec::new(),
            scope,
            span,
            dirty: false,
            poisoned: false,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// Add a copy edge and immediately flow the source's current types
    /// across it. Returns whether the destination grew. Duplicate edges are
    /// collapsed; an edge, once present, is never removed.
    pub fn add_copy_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        if from == to {
            return false;
        }
        let node = &mut self.nodes[from.0 as usize];
        if !node.succs.contains(&to) {
            node.succs.push(to);
        }
        let source = self.nodes[from.0 as usize].types.clone();
        let poisoned = self.nodes[from.0 as usize].poisoned;
        let dest = &mut self.nodes[to.0 as usize];
        let mut grew = dest.types.union_with(&source);
        if poisoned && !dest.poisoned {
            dest.poisoned = true;
            grew = true;
        }
        grew
    }

    /// Allocate a fresh container identity with its element node(s).
    pub fn new_site(&mut self, kind: SiteKind, scope: Scope, span: Span) -> SiteId {
        let elem = self.add_node(scope, Some(span));
        let key = match kind {
            SiteKind::List => None,
            SiteKind::Dict => Some(self.add_node(scope, Some(span))),
        };
        let id = SiteId(self.sites.len() as u32);
        self.sites.push(SiteNodes { kind, elem, key });
        id
    }

    pub fn site(&self, id: SiteId) -> &SiteNodes {
        &self.sites[id.0 as usize]
    }

    pub fn add_use(&mut self, record: UseRecord) -> UseId {
        let id = UseId(self.uses.len() as u32);
        self.uses_by_receiver.entry(record.receiver).or_default().push(id);
        self.uses.push(record);
        id
    }

    pub fn add_op(&mut self, constraint: OpConstraint) -> OpId {
        let id = OpId(self.ops.len() as u32);
        match constraint.kind {
            OpKind::Binary { left, right, .. } => {
                self.ops_by_operand.entry(left).or_default().push(id);
                if right != left {
                    self.ops_by_operand.entry(right).or_default().push(id);
                }
            }
            OpKind::Unary { operand, .. } => {
                self.ops_by_operand.entry(operand).or_default().push(id);
            }
        }
        self.ops.push(constraint);
        id
    }

    pub fn add_call(&mut self, call: CallSite) -> CallId {
        let id = CallId(self.calls.len() as u32);
        for &arg in &call.args {
            self.calls_by_node.entry(arg).or_default().push(id);
        }
        if let Some(receiver) = call.receiver {
            self.calls_by_node.entry(receiver).or_default().push(id);
        }
        self.calls.push(call);
        id
    }

    /// The slot node for a field, keyed by its declaring class.
    pub fn field_slot(&mut self, owner: ClassId, field: &str, module: ModuleId) -> NodeId {
        if let Some(&node) = self.field_slots.get(&(owner, field.to_string())) {
            return node;
        }
        let node = self.add_node(Scope::Module(module), None);
        self.field_slots.insert((owner, field.to_string()), node);
        node
    }

    /// Mark a node poisoned, reporting whether that is new information.
    pub fn mark_poisoned(&mut self, id: NodeId) -> bool {
        let node = &mut self.nodes[id.0 as usize];
        if node.poisoned {
            false
        } else {
            node.poisoned = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTag;

    fn scope() -> Scope {
        Scope::Module(ModuleId(0))
    }

    #[test]
    fn test_copy_edge_flows_immediately() {
        let mut graph = ConstraintGraph::new(1);
        let a = graph.add_node(scope(), None);
        let b = graph.add_node(scope(), None);
        graph.node_mut(a).types.insert(TypeTag::Int);

        assert!(graph.add_copy_edge(a, b));
        assert!(graph.node(b).types.contains(TypeTag::Int));
        // Re-adding the same edge neither duplicates nor grows.
        assert!(!graph.add_copy_edge(a, b));
        assert_eq!(graph.node(a).succs.len(), 1);
    }

    #[test]
    fn test_self_edge_is_ignored() {
        let mut graph = ConstraintGraph::new(1);
        let a = graph.add_node(scope(), None);
        assert!(!graph.add_copy_edge(a, a));
        assert!(graph.node(a).succs.is_empty());
    }

    #[test]
    fn test_copy_edge_carries_poison() {
        let mut graph = ConstraintGraph::new(1);
        let a = graph.add_node(scope(), None);
        let b = graph.add_node(scope(), None);
        graph.mark_poisoned(a);

        assert!(graph.add_copy_edge(a, b));
        assert!(graph.node(b).poisoned);
    }

    #[test]
    fn test_dict_site_has_key_node() {
        let mut graph = ConstraintGraph::new(1);
        let span = Span::new(ModuleId(0), 1, 1);
        let list = graph.new_site(SiteKind::List, scope(), span);
        let dict = graph.new_site(SiteKind::Dict, scope(), span);
        assert!(graph.site(list).key.is_none());
        assert!(graph.site(dict).key.is_some());
    }

    #[test]
    fn test_field_slot_is_shared_per_declaring_class() {
        let mut graph = ConstraintGraph::new(1);
        let owner = ClassId(0);
        let a = graph.field_slot(owner, "name", ModuleId(0));
        let b = graph.field_slot(owner, "name", ModuleId(0));
        let c = graph.field_slot(ClassId(1), "name", ModuleId(0));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
