//! End-to-end specialization behavior: distinct argument-type
//! combinations mint distinct Variants, equal combinations share one, and
//! Variants unreachable at fixpoint are dead.

use monomorph_core::catalog::FuncId;
use monomorph_core::hir::{
    AssignTarget, BinOp, Expr, ExprKind, FunctionDef, Literal, Module, ModuleId, Program, Span, Stmt,
};
use monomorph_core::types::{TypeSet, TypeTag};
use monomorph_core::{analyze, generate_code, InferenceConfig, Severity};

fn sp() -> Span {
    Span::new(ModuleId(0), 1, 1)
}

fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, sp())
}

fn int(value: i64) -> Expr {
    expr(ExprKind::Literal(Literal::Int(value)))
}

fn float(value: f64) -> Expr {
    expr(ExprKind::Literal(Literal::Float(value)))
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

fn method_call(object: Expr, method: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::MethodCall {
        object: Box::new(object),
        method: method.to_string(),
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

fn program(body: Vec<Stmt>, functions: Vec<FunctionDef>) -> Program {
    let mut program = Program::new(vec![Module {
        name: "main".to_string(),
        imports: vec![],
        classes: vec![],
        functions,
        body,
    }]);
    program.finalize().unwrap();
    program
}

#[test]
fn test_int_and_float_calls_mint_two_monomorphic_variants() {
    let increment = func("increment", &["x"], vec![ret(binary(BinOp::Add, name("x"), int(1)))]);
    let program = program(
        vec![
            assign("a", call("increment", vec![int(3)])),
            assign("b", call("increment", vec![float(3.5)])),
        ],
        vec![increment],
    );

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    let f = FuncId(0);
    let variants: Vec<_> = analysis.functions.variants_of(f).collect();
    assert_eq!(variants.len(), 2);

    let first = analysis.functions.variant(variants[0]);
    let second = analysis.functions.variant(variants[1]);
    assert_eq!(first.key.0[0], TypeSet::single(TypeTag::Int));
    assert_eq!(second.key.0[0], TypeSet::single(TypeTag::Float));
    assert_eq!(analysis.graph.node(first.ret).types, TypeSet::single(TypeTag::Int));
    assert_eq!(analysis.graph.node(second.ret).types, TypeSet::single(TypeTag::Float));
    assert!(first.live && second.live);

    // The two call sites resolve to different single targets.
    let targets: Vec<_> = analysis
        .graph
        .calls
        .iter()
        .map(|c| c.live_targets.clone())
        .collect();
    assert_eq!(targets.len(), 2);
    assert_ne!(targets[0], targets[1]);
    assert!(analysis.graph.calls.iter().all(|c| !c.polymorphic));

    // No tagged union means no dynamic dispatch in the emitted unit.
    let output = generate_code(&analysis);
    assert!(output.failures.is_empty());
    let source = &output.units[0].source;
    syn::parse_file(source).unwrap();
    assert!(source.contains("fn increment_v0"));
    assert!(source.contains("fn increment_v1"));
    assert!(!source.contains("enum "));
}

#[test]
fn test_equal_keys_share_one_variant() {
    let identity = func("identity", &["x"], vec![ret(name("x"))]);
    let program = program(
        vec![
            assign("a", call("identity", vec![int(1)])),
            assign("b", call("identity", vec![int(2)])),
        ],
        vec![identity],
    );

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    assert_eq!(analysis.functions.variants_of(FuncId(0)).count(), 1);
    assert_eq!(analysis.specialization.live_variants, 1);
}

#[test]
fn test_recursive_factorial_converges_to_one_int_variant() {
    let fact = func(
        "fact",
        &["n"],
        vec![ret(expr(ExprKind::Ternary {
            cond: Box::new(binary(BinOp::Eq, name("n"), int(0))),
            then: Box::new(int(1)),
            orelse: Box::new(binary(
                BinOp::Mul,
                name("n"),
                call("fact", vec![binary(BinOp::Sub, name("n"), int(1))]),
            )),
        }))],
    );
    let program = program(vec![assign("r", call("fact", vec![int(6)]))], vec![fact]);

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    let variants: Vec<_> = analysis.functions.variants_of(FuncId(0)).collect();
    assert_eq!(variants.len(), 1);
    let variant = analysis.functions.variant(variants[0]);
    assert_eq!(analysis.graph.node(variant.params[0]).types, TypeSet::single(TypeTag::Int));
    assert_eq!(analysis.graph.node(variant.ret).types, TypeSet::single(TypeTag::Int));

    let output = generate_code(&analysis);
    assert!(output.failures.is_empty());
    let source = &output.units[0].source;
    syn::parse_file(source).unwrap();
    assert!(source.contains("fn fact_v0"));
    // The recursive call targets the same specialization.
    assert!(source.matches("fact_v0").count() >= 2);
}

#[test]
fn test_uncalled_function_is_never_materialized() {
    let unused = func("unused", &[], vec![ret(int(1))]);
    let program = program(vec![assign("x", int(1))], vec![unused]);

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    assert_eq!(analysis.functions.variants_of(FuncId(0)).count(), 0);

    let output = generate_code(&analysis);
    assert!(output.failures.is_empty());
    assert!(!output.units[0].source.contains("fn unused"));
}

#[test]
fn test_superseded_key_variant_goes_dead() {
    // The element type of xs grows after the call site was first keyed:
    // the early {int} variant is superseded by the {int|float} one and
    // must be swept as dead.
    let double = func("double", &["x"], vec![ret(binary(BinOp::Add, name("x"), int(1)))]);
    let program = program(
        vec![
            assign("xs", expr(ExprKind::List(vec![]))),
            Stmt::Expr(method_call(name("xs"), "append", vec![int(1)])),
            assign(
                "r",
                call(
                    "double",
                    vec![expr(ExprKind::Index {
                        base: Box::new(name("xs")),
                        index: Box::new(int(0)),
                    })],
                ),
            ),
            Stmt::Expr(method_call(name("xs"), "append", vec![float(2.5)])),
        ],
        vec![double],
    );

    let analysis = analyze(&program, InferenceConfig::default()).unwrap();
    let variants: Vec<_> = analysis.functions.variants_of(FuncId(0)).collect();
    assert_eq!(variants.len(), 2);

    let live: Vec<_> = variants.iter().filter(|&&v| analysis.functions.variant(v).live).collect();
    assert_eq!(live.len(), 1);
    let live_variant = analysis.functions.variant(*live[0]);
    assert_eq!(
        live_variant.key.0[0],
        TypeSet::from_tags(&[TypeTag::Int, TypeTag::Float])
    );
    assert_eq!(analysis.specialization.dead_variants, 1);
    assert!(analysis
        .diagnostics
        .iter()
        .any(|d| d.severity == Severity::Note && d.message.contains("unreachable")));

    // The widened live variant carries a tagged union through codegen.
    let output = generate_code(&analysis);
    assert!(output.failures.is_empty());
    let source = &output.units[0].source;
    syn::parse_file(source).unwrap();
    assert!(source.contains("enum IntOrFloat"));
}
