//! Property-based checks of the analysis algebra: lattice laws of type
//! sets, determinism of the whole pipeline, specialization-key reuse, and
//! termination within the finite-universe bound.

use monomorph_core::hir::{
    AssignTarget, BinOp, Expr, ExprKind, FunctionDef, Literal, Module, ModuleId, Program, Span, Stmt,
};
use monomorph_core::types::{TypeSet, TypeTag};
use monomorph_core::{analyze, generate_code, InferenceConfig};
use proptest::prelude::*;
use quickcheck_macros::quickcheck;

fn tag_from(byte: u8) -> TypeTag {
    match byte % 5 {
        0 => TypeTag::Int,
        1 => TypeTag::Float,
        2 => TypeTag::Bool,
        3 => TypeTag::Str,
        _ => TypeTag::None,
    }
}

fn set_from(bytes: &[u8]) -> TypeSet {
    bytes.iter().map(|&b| tag_from(b)).collect()
}

#[quickcheck]
fn prop_union_is_monotone(a: Vec<u8>, b: Vec<u8>) -> bool {
    let mut x = set_from(&a);
    let y = set_from(&b);
    let before = x.clone();
    x.union_with(&y);
    before.is_subset_of(&x) && y.is_subset_of(&x)
}

#[quickcheck]
fn prop_union_is_idempotent(a: Vec<u8>) -> bool {
    let mut x = set_from(&a);
    let snapshot = x.clone();
    !x.union_with(&snapshot) && x == snapshot
}

#[quickcheck]
fn prop_union_is_commutative(a: Vec<u8>, b: Vec<u8>) -> bool {
    let mut x = set_from(&a);
    x.union_with(&set_from(&b));
    let mut y = set_from(&b);
    y.union_with(&set_from(&a));
    x == y
}

#[quickcheck]
fn prop_insertion_order_is_irrelevant(a: Vec<u8>) -> bool {
    let forward = set_from(&a);
    let reversed: Vec<u8> = a.iter().rev().copied().collect();
    forward == set_from(&reversed)
}

fn sp() -> Span {
    Span::new(ModuleId(0), 1, 1)
}

fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, sp())
}

fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::Assign {
        target: AssignTarget::Symbol(target.to_string()),
        value,
        span: sp(),
    }
}

fn name(n: &str) -> Expr {
    expr(ExprKind::Name(n.to_string()))
}

fn int(v: i64) -> Expr {
    expr(ExprKind::Literal(Literal::Int(v)))
}

/// A chain of assignments feeding one specialized call; a small but
/// fully-exercised pipeline.
fn chain_program(values: &[i64]) -> Program {
    let mut body = Vec::new();
    for (i, &v) in values.iter().enumerate() {
        let value = if i == 0 {
            int(v)
        } else {
            expr(ExprKind::Binary {
                op: BinOp::Add,
                left: Box::new(name(&format!("x{}", i - 1))),
                right: Box::new(int(v)),
            })
        };
        body.push(assign(&format!("x{}", i), value));
    }
    let last = format!("x{}", values.len() - 1);
    body.push(assign(
        "result",
        expr(ExprKind::Call {
            func: "bump".to_string(),
            args: vec![name(&last)],
        }),
    ));

    let bump = FunctionDef {
        name: "bump".to_string(),
        params: vec!["v".to_string()].into(),
        body: vec![Stmt::Return {
            value: Some(expr(ExprKind::Binary {
                op: BinOp::Add,
                left: Box::new(name("v")),
                right: Box::new(int(1)),
            })),
            span: sp(),
        }],
        span: sp(),
    };

    let mut program = Program::new(vec![Module {
        name: "main".to_string(),
        imports: vec![],
        classes: vec![],
        functions: vec![bump],
        body,
    }]);
    program.finalize().unwrap();
    program
}

proptest! {
    #[test]
    fn prop_pipeline_is_deterministic(values in prop::collection::vec(-50i64..50, 1..8)) {
        let program = chain_program(&values);

        let first = analyze(&program, InferenceConfig::default()).unwrap();
        let second = analyze(&program, InferenceConfig::default()).unwrap();

        let sets = |a: &monomorph_core::Analysis| -> Vec<TypeSet> {
            a.graph.nodes.iter().map(|n| n.types.clone()).collect()
        };
        prop_assert_eq!(sets(&first), sets(&second));
        prop_assert_eq!(first.diagnostics.clone(), second.diagnostics.clone());

        let out_first = generate_code(&first);
        let out_second = generate_code(&second);
        let sources = |o: &monomorph_core::CodegenOutput| -> Vec<String> {
            o.units.iter().map(|u| u.source.clone()).collect()
        };
        prop_assert_eq!(sources(&out_first), sources(&out_second));
    }

    #[test]
    fn prop_every_node_stays_int_typed(values in prop::collection::vec(-50i64..50, 1..8)) {
        let program = chain_program(&values);
        let analysis = analyze(&program, InferenceConfig::default()).unwrap();

        for scope in &analysis.graph.module_scopes {
            for (_, &node) in &scope.globals {
                prop_assert_eq!(analysis.graph.node(node).types.clone(), TypeSet::single(TypeTag::Int));
            }
        }
        prop_assert!(analysis.diagnostics.is_empty());
    }

    #[test]
    fn prop_same_key_calls_share_one_variant(call_count in 1usize..6) {
        let mut body = Vec::new();
        for i in 0..call_count {
            body.push(assign(
                &format!("r{}", i),
                expr(ExprKind::Call {
                    func: "bump".to_string(),
                    args: vec![int(i as i64)],
                }),
            ));
        }
        let bump = FunctionDef {
            name: "bump".to_string(),
            params: vec!["v".to_string()].into(),
            body: vec![Stmt::Return { value: Some(name("v")), span: sp() }],
            span: sp(),
        };
        let mut program = Program::new(vec![Module {
            name: "main".to_string(),
            imports: vec![],
            classes: vec![],
            functions: vec![bump],
            body,
        }]);
        program.finalize().unwrap();

        let analysis = analyze(&program, InferenceConfig::default()).unwrap();
        prop_assert_eq!(
            analysis.functions.variants_of(monomorph_core::catalog::FuncId(0)).count(),
            1
        );
    }

    #[test]
    fn prop_solver_terminates_within_finite_bound(values in prop::collection::vec(-50i64..50, 1..8)) {
        let program = chain_program(&values);
        let analysis = analyze(&program, InferenceConfig::default()).unwrap();

        // Each step either drains a clean pop or grew some set; the
        // number of (node, added-tag) events bounds the whole solve.
        let nodes = analysis.graph.nodes.len();
        let edges: usize = analysis.graph.nodes.iter().map(|n| n.succs.len()).sum();
        let universe = 8;
        prop_assert!(analysis.solve_stats.steps <= (nodes + edges + analysis.graph.calls.len() + 1) * universe);
    }
}
