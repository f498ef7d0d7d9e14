//! Annotation export: the final type set computed for every source
//! location, as data for human-readable tooling to render. The core never
//! formats these itself.

use monomorph_core::hir::Span;
use monomorph_core::Analysis;
use serde::Serialize;

/// One annotated source location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRecord {
    pub span: Span,
    /// Rendered tags, in set order.
    pub types: Vec<String>,
}

/// Collect the finalized type set of every located node, ordered by
/// source position (module, line, column) and deduplicated per location
/// by union.
pub fn annotate(analysis: &Analysis) -> Vec<AnnotationRecord> {
    let mut by_span: indexmap::IndexMap<Span, Vec<String>> = indexmap::IndexMap::new();
    for node in &analysis.graph.nodes {
        let Some(span) = node.span else { continue };
        if node.types.is_empty() {
            continue;
        }
        let entry = by_span.entry(span).or_default();
        for tag in node.types.iter() {
            let rendered = tag.to_string();
            if !entry.contains(&rendered) {
                entry.push(rendered);
            }
        }
    }
    let mut records: Vec<AnnotationRecord> = by_span
        .into_iter()
        .map(|(span, types)| AnnotationRecord { span, types })
        .collect();
    records.sort_by_key(|r| (r.span.module, r.span.line, r.span.col));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use monomorph_core::hir::{
        AssignTarget, Expr, ExprKind, Literal, Module, ModuleId, Program, Stmt,
    };
    use monomorph_core::{analyze, InferenceConfig};

    fn program_with_literal() -> Program {
        let span = Span::new(ModuleId(0), 3, 5);
        let mut program = Program::new(vec![Module {
            name: "main".to_string(),
            imports: vec![],
            classes: vec![],
            functions: vec![],
            body: vec![Stmt::Assign {
                target: AssignTarget::Symbol("x".to_string()),
                value: Expr::new(ExprKind::Literal(Literal::Int(7)), span),
                span,
            }],
        }]);
        program.finalize().unwrap();
        program
    }

    #[test]
    fn test_annotations_carry_locations_and_types() {
        let program = program_with_literal();
        let analysis = analyze(&program, InferenceConfig::default()).unwrap();
        let records = annotate(&analysis);

        assert!(!records.is_empty());
        let record = records.iter().find(|r| r.span.line == 3).unwrap();
        assert_eq!(record.types, vec!["int".to_string()]);
    }

    #[test]
    fn test_annotations_serialize() {
        let program = program_with_literal();
        let analysis = analyze(&program, InferenceConfig::default()).unwrap();
        let records = annotate(&analysis);
        let json = serde_json::to_string(&records).unwrap();
        assert!(json.contains("\"types\""));
    }
}
