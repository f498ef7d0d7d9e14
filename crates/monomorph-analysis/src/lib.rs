//! # Monomorph Analysis
//!
//! Read-only consumers of a finalized [`monomorph_core::Analysis`]: the
//! annotation export (final type set per source location) and analysis
//! metrics (type coverage, specialization statistics). Everything here is
//! a pure read of the stable graph; nothing feeds back into the solve.
//!
//! ## Modules
//!
//! - **[`annotate`]** - per-location type sets as serializable records
//! - **[`metrics`]** - type coverage and specialization metrics

pub mod annotate;
pub mod metrics;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::annotate::{annotate, AnnotationRecord};
    pub use crate::metrics::{collect, AnalysisMetrics, FunctionSpecialization, TypeCoverage};
}

pub use annotate::{annotate, AnnotationRecord};
pub use metrics::{collect, AnalysisMetrics, FunctionSpecialization, TypeCoverage};
