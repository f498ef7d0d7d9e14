//! Analysis configuration.

use serde::{Deserialize, Serialize};

/// Policy for choosing which Variants to merge when a function exceeds the
/// specialization threshold. The choice trades precision against output
/// size; it never affects termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WideningPolicy {
    /// Merge the two variants whose keys carry the largest total type-set
    /// cardinality. Loses the least precision per merge (those variants
    /// were already the least specific) at the cost of scanning the variant
    /// table on each overflow.
    MergeLeastSpecific,
    /// Merge the two earliest-minted variants. Cheapest and most
    /// predictable output order, but can generalize a hot monomorphic
    /// variant.
    MergeOldest,
    /// Union every key into one generalized variant. Smallest output,
    /// worst precision. Also forced for every over-threshold function when
    /// the solver step budget runs out.
    CollapseAll,
}

impl Default for WideningPolicy {
    fn default() -> Self {
        WideningPolicy::MergeLeastSpecific
    }
}

/// Tunables for the solve. All bounds trigger widening, never an abort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Variant-count threshold per function before widening kicks in.
    pub max_variants_per_function: usize,
    /// Optional budget on solver steps (popped worklist entries) to bound
    /// worst-case analysis time on pathological inputs. Exceeding it forces
    /// [`WideningPolicy::CollapseAll`] on every multi-variant function.
    pub max_solver_steps: Option<usize>,
    /// Which variants to merge on threshold overflow.
    pub widening: WideningPolicy,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_variants_per_function: 8,
            max_solver_steps: None,
            widening: WideningPolicy::default(),
        }
    }
}
