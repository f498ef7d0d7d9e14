//! # Monomorph Core
//!
//! Whole-program type inference and monomorphizing code generation for
//! dynamically-typed source programs. Given an annotation-free AST, the
//! engine recovers a concrete type set for every variable, expression,
//! attribute and function, then emits one monomorphic routine per observed
//! argument-type combination, falling back to dynamic dispatch only at
//! call sites inference left polymorphic.
//!
//! ## Pipeline
//!
//! - **[`catalog`]** - finite type lattice, class descriptors, builtin
//!   signature fact base
//! - **[`builder`]** - single-pass constraint graph construction from the
//!   [`hir`] program model
//! - **[`solver`]** - worklist fixpoint propagation, Variant minting,
//!   widening
//! - **[`specialize`]** - live/dead Variant finalization and polymorphic
//!   call-site marking
//! - **[`codegen`]** - one Rust translation unit per module
//!
//! ## Quick Start
//!
//! ```ignore
//! use monomorph_core::{analyze, generate_code, InferenceConfig};
//!
//! let mut program = build_program();
//! program.finalize()?;
//! let analysis = analyze(&program, InferenceConfig::default())?;
//! let output = generate_code(&analysis);
//! for unit in &output.units {
//!     println!("// {}\n{}", unit.module, unit.source);
//! }
//! ```

pub mod builder;
pub mod catalog;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod hir;
pub mod solver;
pub mod specialize;
pub mod types;
pub mod variants;

use anyhow::Result;

pub use codegen::{CodegenOutput, EmittedUnit};
pub use config::{InferenceConfig, WideningPolicy};
pub use diagnostics::{Diagnostic, DiagnosticSink, Severity};
pub use error::CoreError;
pub use solver::SolveStats;
pub use specialize::SpecializationStats;

use catalog::Catalog;
use graph::ConstraintGraph;
use hir::Program;
use variants::FunctionTable;

/// The finalized result of a whole-program solve: the stable constraint
/// graph, the catalog, the Variant tables, and every diagnostic recorded
/// along the way. This is the explicit context object threaded through the
/// pipeline; there is no process-wide analysis state.
pub struct Analysis<'p> {
    pub program: &'p Program,
    pub catalog: Catalog,
    pub graph: ConstraintGraph,
    pub functions: FunctionTable,
    pub diagnostics: Vec<Diagnostic>,
    pub solve_stats: SolveStats,
    pub specialization: SpecializationStats,
}

/// Run the whole analysis: catalog construction, constraint graph build,
/// fixpoint solve, and specialization finalization.
///
/// The program must have been [`Program::finalize`]d. Only structurally
/// invalid input fails; unresolved attributes and excess specialization
/// surface as diagnostics on the returned [`Analysis`].
pub fn analyze(program: &Program, config: InferenceConfig) -> Result<Analysis<'_>, CoreError> {
    let catalog = Catalog::build(program)?;
    let build = builder::build(program, &catalog)?;
    let mut solver = solver::Solver::new(program, &catalog, build, config);
    solver.run()?;

    let solve_stats = solver.stats();
    let solver::Solver { mut graph, mut funcs, mut diagnostics, .. } = solver;
    let specialization = specialize::finalize(program, &catalog, &mut graph, &mut funcs, &mut diagnostics);

    Ok(Analysis {
        program,
        catalog,
        graph,
        functions: funcs,
        diagnostics,
        solve_stats,
        specialization,
    })
}

/// Emit one translation unit per module from a finalized analysis.
pub fn generate_code(analysis: &Analysis) -> CodegenOutput {
    codegen::generate(analysis)
}

/// Convenience wrapper running the full pipeline in one call.
pub fn transpile(program: &Program, config: InferenceConfig) -> Result<(Vec<EmittedUnit>, Vec<Diagnostic>)> {
    let analysis = analyze(program, config)?;
    let output = generate_code(&analysis);
    let mut diagnostics = analysis.diagnostics;
    for failure in &output.failures {
        diagnostics.push(Diagnostic {
            span: failure.span(),
            severity: Severity::Error,
            message: failure.to_string(),
        });
    }
    Ok((output.units, diagnostics))
}
