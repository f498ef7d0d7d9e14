//! Error containment: unresolved attributes surface as diagnostics and
//! poison dependents without aborting the solve, and a single blocked
//! emission never takes unrelated Variants down with it.

use monomorph_core::hir::{
    AssignTarget, BinOp, ClassDef, Expr, ExprKind, FunctionDef, Literal, Module, ModuleId, Program, Span, Stmt,
};
use monomorph_core::types::{TypeSet, TypeTag};
use monomorph_core::{analyze, generate_code, CoreError, InferenceConfig, Severity};

fn sp() -> Span {
    Span::new(ModuleId(0), 1, 1)
}

fn sp_at(line: u32) -> Span {
    Span::new(ModuleId(0), line, 1)
}

fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, sp())
}

fn int(value: i64) -> Expr {
    expr(ExprKind::Literal(Literal::Int(value)))
}

fn string(value: &str) -> Expr {
    expr(ExprKind::Literal(Literal::Str(value.to_string())))
}

fn name(n: &str) -> Expr {
    expr(ExprKind::Name(n.to_string()))
}

fn call(func: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        func: func.to_string(),
        args,
    })
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    expr(ExprKind::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn assign(target: &str, value: Expr) -> Stmt {
    Stmt::Assign {
        target: AssignTarget::Symbol(target.to_string()),
        value,
        span: sp(),
    }
}

fn ret(value: Expr) -> Stmt {
    Stmt::Return {
        value: Some(value),
        span: sp(),
    }
}

fn func(name: &str, params: &[&str], body: Vec<Stmt>) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect::<Vec<_>>().into(),
        body,
        span: sp(),
    }
}

fn method(name: &str, body: Vec<Stmt>) -> FunctionDef {
    FunctionDef {
        name: name.to_string(),
        params: vec!["self".to_string()].into(),
        body,
        span: sp(),
    }
}

fn class(name: &str, methods: Vec<FunctionDef>) -> ClassDef {
    ClassDef {
        name: name.to_string(),
        bases: vec![],
        methods,
        span: sp(),
    }
}

#[test]
fn test_missing_attribute_reports_one_diagnostic_and_spares_the_rest() {
    // One of the receiver's two possible classes lacks `go`; the other
    // function in the program must still emit.
    let a = class("Alpha", vec![method("go", vec![ret(int(1))])]);
    let b = class("Beta", vec![method("idle", vec![ret(int(2))])]);
    let fine = func("fine", &["n"], vec![ret(binary(BinOp::Add, name("n"), int(1)))]);

    let mut program = Program::new(vec![Module {
        name: "main".to_string(),
        imports: vec![],
        classes: vec![a, b],
        functions: vec![fine],
        body: vec![
            Stmt::If {
                condition: expr(ExprKind::Literal(Literal::Bool(true))),
                then_body: vec![assign("x", call("Alpha", vec![]))],
                else_body: Some(vec![assign("x", call("Beta", vec![]))]),
            },
            Stmt::Assign {
                target: AssignTarget::Symbol("y".to_string()),
                value: Expr::new(
                    ExprKind::MethodCall {
                        object: Box::new(name("x")),
                        method: "go".to_string(),
                        args: vec![],
                    },
                    sp_at(9),
                ),
                span: sp_at(9),
            },
            assign("z", call("fine", vec![int(1)])),
        ],
    }]);
    program.finalize().unwrap();

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    let unresolved: Vec<_> = analysis
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error && d.message.contains("unresolved attribute 'go'"))
        .collect();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].span.map(|s| s.line), Some(9));

    // The resolvable class still contributed its return type.
    let y = analysis.graph.module_scopes[0].globals["y"];
    assert_eq!(analysis.graph.node(y).types, TypeSet::single(TypeTag::Int));
    assert!(analysis.graph.node(y).poisoned);

    // The unrelated function emits; the blocked entry code is reported
    // per unit, not globally.
    let output = generate_code(&analysis);
    let source = &output.units[0].source;
    assert!(source.contains("fn fine_v0"));
    assert!(output
        .failures
        .iter()
        .any(|f| matches!(f, CoreError::UnresolvedType { span } if span.line == 9)));
}

#[test]
fn test_mixed_branch_variable_keeps_integer_path_precise() {
    // x may be int or str; the downstream add only resolves the integer
    // combination, with no spurious diagnostics or failures.
    let mut program = Program::new(vec![Module {
        name: "main".to_string(),
        imports: vec![],
        classes: vec![],
        functions: vec![],
        body: vec![
            Stmt::If {
                condition: expr(ExprKind::Literal(Literal::Bool(true))),
                then_body: vec![assign("x", int(1))],
                else_body: Some(vec![assign("x", string("fallback"))]),
            },
            assign("y", binary(BinOp::Add, name("x"), int(1))),
        ],
    }]);
    program.finalize().unwrap();

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    let x = analysis.graph.module_scopes[0].globals["x"];
    let y = analysis.graph.module_scopes[0].globals["y"];
    assert_eq!(
        analysis.graph.node(x).types,
        TypeSet::from_tags(&[TypeTag::Int, TypeTag::Str])
    );
    assert_eq!(analysis.graph.node(y).types, TypeSet::single(TypeTag::Int));
    assert!(analysis.diagnostics.is_empty());

    let output = generate_code(&analysis);
    assert!(output.failures.is_empty());
    let source = output.units[0].source.replace(' ', "");
    syn::parse_file(&output.units[0].source).unwrap();
    // x is physically a tagged union; the add extracts the int member
    // behind a runtime tag check.
    assert!(source.contains("enumIntOrStr"));
    assert!(source.contains("IntOrStr::Int"));
}

#[test]
fn test_poison_propagates_along_copy_flow() {
    let holder = class("Holder", vec![method("idle", vec![ret(int(0))])]);
    let mut program = Program::new(vec![Module {
        name: "main".to_string(),
        imports: vec![],
        classes: vec![holder],
        functions: vec![],
        body: vec![
            assign("h", call("Holder", vec![])),
            assign(
                "bad",
                expr(ExprKind::Attribute {
                    object: Box::new(name("h")),
                    attr: "missing".to_string(),
                }),
            ),
            assign("worse", name("bad")),
        ],
    }]);
    program.finalize().unwrap();

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    let bad = analysis.graph.module_scopes[0].globals["bad"];
    let worse = analysis.graph.module_scopes[0].globals["worse"];
    assert!(analysis.graph.node(bad).poisoned);
    assert!(analysis.graph.node(worse).poisoned);
    assert!(analysis.graph.node(worse).types.is_empty());

    // The empty node reaches emitted code, so the entry unit is blocked
    // with an unresolved type at that location.
    let output = generate_code(&analysis);
    assert!(output
        .failures
        .iter()
        .any(|f| matches!(f, CoreError::UnresolvedType { .. })));
}
