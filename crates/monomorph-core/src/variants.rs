//! Function Variants: monomorphic instantiations keyed by argument types.
//!
//! A Variant owns fresh copies of its function's parameter, local, and
//! return nodes. Keys compare structurally — two call sites observing the
//! same argument type sets share one Variant — and a Variant, once minted,
//! is never destroyed during the solve; its key never changes.

use fnv::FnvHashMap;
use indexmap::IndexMap;

use crate::catalog::FuncId;
use crate::graph::NodeId;
use crate::hir::ExprId;
use crate::types::TypeSet;

/// Index of a Variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantId(pub u32);

/// Specialization key: the tuple of argument type sets, compared
/// structurally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey(pub Vec<TypeSet>);

impl VariantKey {
    /// Positionwise set inclusion; used for widened-key subsumption.
    pub fn is_subsumed_by(&self, other: &VariantKey) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.is_subset_of(b))
    }

    /// Positionwise union; used to build generalized keys when widening.
    pub fn generalize(&self, other: &VariantKey) -> VariantKey {
        let mut merged = self.clone();
        for (slot, extra) in merged.0.iter_mut().zip(&other.0) {
            slot.union_with(extra);
        }
        merged
    }

    /// Total tag count across all positions; the widening heuristic's
    /// measure of how unspecific a key already is.
    pub fn cardinality(&self) -> usize {
        self.0.iter().map(TypeSet::len).sum()
    }
}

/// One monomorphic instantiation of a function.
#[derive(Debug, Clone)]
pub struct Variant {
    pub func: FuncId,
    pub key: VariantKey,
    pub params: Vec<NodeId>,
    pub ret: NodeId,
    pub locals: IndexMap<String, NodeId>,
    /// Expression→node map for this instantiation, consumed by codegen.
    pub expr_nodes: FnvHashMap<ExprId, NodeId>,
    /// Reachable from module entry code at fixpoint; set by the
    /// Specializer. Dead variants are excluded from emission.
    pub live: bool,
    /// Minted by widening rather than by an observed key.
    pub widened: bool,
}

/// Per-function variant state.
#[derive(Debug, Clone, Default)]
pub struct FunctionState {
    /// Distinct keys in first-seen order; this order is the stable
    /// emission order of the function's variants.
    pub variants: IndexMap<VariantKey, VariantId>,
    /// Once widening has struck, the generalized key that subsumes future
    /// lookups.
    pub widened_key: Option<VariantKey>,
}

/// All variant state, indexed by [`FuncId`] and [`VariantId`].
#[derive(Debug, Default)]
pub struct FunctionTable {
    pub states: Vec<FunctionState>,
    pub variants: Vec<Variant>,
}

impl FunctionTable {
    pub fn new(num_funcs: usize) -> Self {
        Self {
            states: vec![FunctionState::default(); num_funcs],
            variants: Vec::new(),
        }
    }

    pub fn state(&self, func: FuncId) -> &FunctionState {
        &self.states[func.0 as usize]
    }

    pub fn variant(&self, id: VariantId) -> &Variant {
        &self.variants[id.0 as usize]
    }

    pub fn variant_mut(&mut self, id: VariantId) -> &mut Variant {
        &mut self.variants[id.0 as usize]
    }

    /// Find the Variant for a key: an exact structural match, or the
    /// generalized variant once this function has been widened past the
    /// key.
    pub fn lookup(&self, func: FuncId, key: &VariantKey) -> Option<VariantId> {
        let state = &self.states[func.0 as usize];
        if let Some(&id) = state.variants.get(key) {
            return Some(id);
        }
        if let Some(widened) = &state.widened_key {
            if key.is_subsumed_by(widened) {
                return state.variants.get(widened).copied();
            }
        }
        None
    }

    /// Record a freshly minted Variant under its key.
    pub fn insert(&mut self, func: FuncId, variant: Variant) -> VariantId {
        let id = VariantId(self.variants.len() as u32);
        self.states[func.0 as usize].variants.insert(variant.key.clone(), id);
        self.variants.push(variant);
        id
    }

    /// Variants of one function in first-seen key order.
    pub fn variants_of(&self, func: FuncId) -> impl Iterator<Item = VariantId> + '_ {
        self.states[func.0 as usize].variants.values().copied()
    }

    pub fn variant_ids(&self) -> impl Iterator<Item = VariantId> {
        (0..self.variants.len() as u32).map(VariantId)
    }
}
