//! Core error taxonomy.
//!
//! Only [`CoreError::MalformedProgram`] aborts before solving. Unresolved
//! attributes are recorded as diagnostics and poison dependent nodes;
//! unresolved types block emission of the affected variant only; excess
//! specialization is recovered via widening and surfaces as a warning.

use thiserror::Error;

use crate::hir::Span;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Structurally invalid input: a flow relation with no resolvable
    /// endpoint, unknown names, duplicate declarations. Fatal before the
    /// solve starts.
    #[error("malformed program at {span}: {message}")]
    MalformedProgram { message: String, span: Span },

    /// A class in some receiver's type set lacks a required attribute.
    #[error("unresolved attribute '{attr}' on '{class}' at {span}")]
    UnresolvedAttribute { attr: String, class: String, span: Span },

    /// A node reachable from emitted code never acquired any type. Fatal
    /// for code generation of the affected variant only.
    #[error("unresolved type at {span}")]
    UnresolvedType { span: Span },

    /// A function exceeded the configured variant threshold; recovered by
    /// widening, reported as a warning.
    #[error("function '{function}' exceeded the specialization threshold ({count} variants)")]
    ExcessSpecialization { function: String, count: usize },
}

impl CoreError {
    pub fn span(&self) -> Option<Span> {
        match self {
            CoreError::MalformedProgram { span, .. }
            | CoreError::UnresolvedAttribute { span, .. }
            | CoreError::UnresolvedType { span } => Some(*span),
            CoreError::ExcessSpecialization { .. } => None,
        }
    }
}
