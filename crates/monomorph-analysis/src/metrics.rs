//! Analysis metrics over a finalized solve: how much of the graph ended
//! up concretely typed, and how specialization played out per function.

use monomorph_core::Analysis;
use serde::Serialize;
use tracing::debug;

/// How much of the constraint graph acquired types.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeCoverage {
    pub total_nodes: usize,
    /// Nodes with a non-empty type set.
    pub typed_nodes: usize,
    /// Nodes whose final set is a single concrete tag - fully
    /// monomorphic program points.
    pub singleton_nodes: usize,
    pub coverage_percentage: f64,
}

/// Specialization outcome for one function.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSpecialization {
    pub name: String,
    pub variants: usize,
    pub live_variants: usize,
    pub widened: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisMetrics {
    pub type_coverage: TypeCoverage,
    pub functions: Vec<FunctionSpecialization>,
    pub polymorphic_call_sites: usize,
    pub dead_variants: usize,
}

/// Collect metrics from a finalized analysis.
pub fn collect(analysis: &Analysis) -> AnalysisMetrics {
    let total_nodes = analysis.graph.nodes.len();
    let typed_nodes = analysis.graph.nodes.iter().filter(|n| !n.types.is_empty()).count();
    let singleton_nodes = analysis.graph.nodes.iter().filter(|n| n.types.len() == 1).count();
    let coverage_percentage = if total_nodes == 0 {
        100.0
    } else {
        typed_nodes as f64 / total_nodes as f64 * 100.0
    };

    let mut functions = Vec::new();
    for func in analysis.catalog.func_ids() {
        let state = analysis.functions.state(func);
        if state.variants.is_empty() {
            continue;
        }
        let live = analysis
            .functions
            .variants_of(func)
            .filter(|&v| analysis.functions.variant(v).live)
            .count();
        functions.push(FunctionSpecialization {
            name: analysis.catalog.func(func).name.clone(),
            variants: state.variants.len(),
            live_variants: live,
            widened: state.widened_key.is_some(),
        });
    }

    let metrics = AnalysisMetrics {
        type_coverage: TypeCoverage {
            total_nodes,
            typed_nodes,
            singleton_nodes,
            coverage_percentage,
        },
        functions,
        polymorphic_call_sites: analysis.specialization.polymorphic_calls,
        dead_variants: analysis.specialization.dead_variants,
    };
    debug!(
        coverage = metrics.type_coverage.coverage_percentage,
        functions = metrics.functions.len(),
        "metrics collected"
    );
    metrics
}
