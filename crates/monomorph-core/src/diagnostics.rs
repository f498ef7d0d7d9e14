//! Diagnostic records handed to the external diagnostics sink.
//!
//! The core records `(source location, severity, message)` tuples in
//! deterministic order and never formats them for display; rendering is the
//! sink's concern.

use serde::Serialize;

use crate::hir::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub span: Option<Span>,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn error(span: Span, message: impl Into<String>) -> Self {
        Self {
            span: Some(span),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            span,
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn note(span: Option<Span>, message: impl Into<String>) -> Self {
        Self {
            span,
            severity: Severity::Note,
            message: message.into(),
        }
    }
}

/// Collaborator contract for diagnostic consumers.
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}
