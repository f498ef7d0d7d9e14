//! Constraint graph construction.
//!
//! One pass over each module's top level produces all nodes and static
//! copy/call/container edges and seeds the worklist from statically
//! apparent type sources (literals, constructor results, fixed-result
//! builtins). Attribute and container-element accesses are registered as
//! deferred receiver-dependent uses rather than built eagerly.
//!
//! Function bodies are templates: the same lowering runs again per Variant
//! at minting time, so every instantiation owns fresh parameter, local and
//! expression nodes. Bodies are validated against a scratch graph up front
//! so a structurally invalid program fails before the solve starts.

use fnv::FnvHashMap;
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::catalog::{BuiltinFn, Catalog, FuncId, SymbolEntry};
use crate::error::CoreError;
use crate::graph::{
    CallSite, Callee, ConstraintGraph, NodeId, OpConstraint, OpKind, Scope, SiteKind, UseKind, UseRecord,
};
use crate::graph::CallId;
use crate::hir::{AssignTarget, Expr, ExprId, ExprKind, Literal, ModuleId, Program, Span, Stmt};
use crate::types::TypeTag;
use crate::variants::{FunctionTable, VariantId};

/// Result of the build pass: the graph, empty variant tables, and the
/// initial solver work.
#[derive(Debug)]
pub struct BuildOutput {
    pub graph: ConstraintGraph,
    pub funcs: FunctionTable,
    pub seeds: Vec<NodeId>,
    pub pending_calls: Vec<CallId>,
}

/// Build the constraint graph for every module top level.
pub fn build(program: &Program, catalog: &Catalog) -> Result<BuildOutput, CoreError> {
    let mut graph = ConstraintGraph::new(program.modules.len());
    let funcs = FunctionTable::new(catalog.num_funcs());
    let mut seeds = Vec::new();
    let mut pending_calls = Vec::new();

    // Global variable nodes first, so reads anywhere in a module body bind
    // regardless of statement order.
    for (m, module) in program.modules.iter().enumerate() {
        let module_id = ModuleId(m as u32);
        let mut assigned = IndexSet::new();
        collect_assigned(&module.body, &mut assigned);
        for name in assigned {
            let node = graph.add_node(Scope::Module(module_id), None);
            graph.module_scopes[m].globals.insert(name, node);
        }
    }

    for (m, module) in program.modules.iter().enumerate() {
        let module_id = ModuleId(m as u32);
        let locals = graph.module_scopes[m].globals.clone();
        let mut lowerer = BodyLowerer {
            graph: &mut graph,
            catalog,
            program,
            module: module_id,
            scope: Scope::Module(module_id),
            locals,
            globals: IndexMap::new(),
            expr_nodes: FnvHashMap::default(),
            ret: None,
            seeds: &mut seeds,
            pending: &mut pending_calls,
        };
        lowerer.lower_body(&module.body)?;
        let expr_nodes = lowerer.expr_nodes;
        graph.module_scopes[m].expr_nodes = expr_nodes;
    }

    // Validate every function body now; minting must not surface
    // malformed-program errors mid-solve.
    for func in catalog.func_ids() {
        validate_function(program, catalog, func)?;
    }

    debug!(
        nodes = graph.nodes.len(),
        calls = graph.calls.len(),
        seeds = seeds.len(),
        "constraint graph built"
    );

    Ok(BuildOutput {
        graph,
        funcs,
        seeds,
        pending_calls,
    })
}

/// A function body lowered into one Variant's scope.
pub(crate) struct LoweredBody {
    pub locals: IndexMap<String, NodeId>,
    pub expr_nodes: FnvHashMap<ExprId, NodeId>,
    pub seeds: Vec<NodeId>,
    pub pending: Vec<CallId>,
}

/// Instantiate a function body for a freshly minted Variant. Parameter
/// nodes are supplied by the solver (already seeded from the key); locals
/// get fresh nodes owned by the Variant's scope.
pub(crate) fn lower_function_body(
    graph: &mut ConstraintGraph,
    catalog: &Catalog,
    program: &Program,
    func: FuncId,
    variant: VariantId,
    params: &[NodeId],
    ret: NodeId,
) -> Result<LoweredBody, CoreError> {
    let def = catalog.func_def(program, func);
    let module = catalog.func(func).module;
    let scope = Scope::Variant(variant);

    let mut locals: IndexMap<String, NodeId> = def.params.iter().cloned().zip(params.iter().copied()).collect();
    let mut assigned = IndexSet::new();
    collect_assigned(&def.body, &mut assigned);
    for name in assigned {
        if !locals.contains_key(&name) {
            let node = graph.add_node(scope, None);
            locals.insert(name, node);
        }
    }

    let globals = graph.module_scopes[module.0 as usize].globals.clone();
    let mut seeds = Vec::new();
    let mut pending = Vec::new();
    let mut lowerer = BodyLowerer {
        graph,
        catalog,
        program,
        module,
        scope,
        locals,
        globals,
        expr_nodes: FnvHashMap::default(),
        ret: Some(ret),
        seeds: &mut seeds,
        pending: &mut pending,
    };
    lowerer.lower_body(&def.body)?;
    if !always_returns(&def.body) {
        lowerer.seed(ret, TypeTag::None);
    }
    let locals = lowerer.locals;
    let expr_nodes = lowerer.expr_nodes;

    Ok(LoweredBody {
        locals,
        expr_nodes,
        seeds,
        pending,
    })
}

/// Run a function body through the lowerer against a scratch graph so
/// structural errors surface before solving.
fn validate_function(program: &Program, catalog: &Catalog, func: FuncId) -> Result<(), CoreError> {
    let def = catalog.func_def(program, func);
    let module = catalog.func(func).module;
    let mut scratch = ConstraintGraph::new(program.modules.len());
    let scope = Scope::Module(module);

    let mut globals = IndexMap::new();
    let mut module_assigned = IndexSet::new();
    collect_assigned(&program.module(module).body, &mut module_assigned);
    for name in module_assigned {
        let node = scratch.add_node(scope, None);
        globals.insert(name, node);
    }

    let mut locals: IndexMap<String, NodeId> = IndexMap::new();
    for param in &def.params {
        let node = scratch.add_node(scope, None);
        locals.insert(param.clone(), node);
    }
    let mut assigned = IndexSet::new();
    collect_assigned(&def.body, &mut assigned);
    for name in assigned {
        if !locals.contains_key(&name) {
            let node = scratch.add_node(scope, None);
            locals.insert(name, node);
        }
    }
    let ret = scratch.add_node(scope, None);

    let mut seeds = Vec::new();
    let mut pending = Vec::new();
    let mut lowerer = BodyLowerer {
        graph: &mut scratch,
        catalog,
        program,
        module,
        scope,
        locals,
        globals,
        expr_nodes: FnvHashMap::default(),
        ret: Some(ret),
        seeds: &mut seeds,
        pending: &mut pending,
    };
    lowerer.lower_body(&def.body)
}

/// Names assigned anywhere in a body (including loop targets); these become
/// the scope's variable nodes.
fn collect_assigned(body: &[Stmt], out: &mut IndexSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign {
                target: AssignTarget::Symbol(name),
                ..
            } => {
                out.insert(name.clone());
            }
            Stmt::Assign { .. } => {}
            Stmt::If {
                then_body, else_body, ..
            } => {
                collect_assigned(then_body, out);
                if let Some(else_stmts) = else_body {
                    collect_assigned(else_stmts, out);
                }
            }
            Stmt::While { body, .. } => collect_assigned(body, out),
            Stmt::For { target, body, .. } => {
                out.insert(target.clone());
                collect_assigned(body, out);
            }
            _ => {}
        }
    }
}

/// Whether every path through a body ends in an explicit return; when it
/// does not, the function can fall off the end and yields `None`.
pub(crate) fn always_returns(body: &[Stmt]) -> bool {
    match body.last() {
        Some(Stmt::Return { .. }) => true,
        Some(Stmt::If {
            then_body,
            else_body: Some(else_stmts),
            ..
        }) => always_returns(then_body) && always_returns(else_stmts),
        _ => false,
    }
}

struct BodyLowerer<'a, 'p> {
    graph: &'a mut ConstraintGraph,
    catalog: &'p Catalog,
    program: &'p Program,
    module: ModuleId,
    scope: Scope,
    /// Scope variables (the globals map itself at module scope).
    locals: IndexMap<String, NodeId>,
    /// Enclosing module globals, for reads from function bodies.
    globals: IndexMap<String, NodeId>,
    expr_nodes: FnvHashMap<ExprId, NodeId>,
    ret: Option<NodeId>,
    seeds: &'a mut Vec<NodeId>,
    pending: &'a mut Vec<CallId>,
}

impl BodyLowerer<'_, '_> {
    fn lower_body(&mut self, body: &[Stmt]) -> Result<(), CoreError> {
        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CoreError> {
        match stmt {
            Stmt::Assign { target, value, span } => {
                match target {
                    AssignTarget::Symbol(name) => {
                        let value_node = self.lower_expr(value)?;
                        let var = self.assigned_local(name, *span)?;
                        self.copy(value_node, var);
                    }
                    AssignTarget::Attribute { object, attr } => {
                        let receiver = self.lower_expr(object)?;
                        let value_node = self.lower_expr(value)?;
                        self.graph.add_use(UseRecord {
                            receiver,
                            kind: UseKind::AttrStore {
                                attr: attr.clone(),
                                value: value_node,
                            },
                            span: *span,
                            seen: Default::default(),
                        });
                    }
                    AssignTarget::Index { base, index } => {
                        let receiver = self.lower_expr(base)?;
                        let index_node = self.lower_expr(index)?;
                        let value_node = self.lower_expr(value)?;
                        self.graph.add_use(UseRecord {
                            receiver,
                            kind: UseKind::IndexStore {
                                index: index_node,
                                value: value_node,
                            },
                            span: *span,
                            seen: Default::default(),
                        });
                    }
                }
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            Stmt::Return { value, span } => {
                let Some(ret) = self.ret else {
                    return Err(CoreError::MalformedProgram {
                        message: "return outside a function".to_string(),
                        span: *span,
                    });
                };
                match value {
                    Some(expr) => {
                        let node = self.lower_expr(expr)?;
                        self.copy(node, ret);
                    }
                    None => self.seed(ret, TypeTag::None),
                }
                Ok(())
            }
            Stmt::If {
                condition,
                then_body,
                else_body,
            } => {
                self.lower_expr(condition)?;
                self.lower_body(then_body)?;
                if let Some(else_stmts) = else_body {
                    self.lower_body(else_stmts)?;
                }
                Ok(())
            }
            Stmt::While { condition, body } => {
                self.lower_expr(condition)?;
                self.lower_body(body)
            }
            Stmt::For { target, iter, body } => {
                let iter_node = self.lower_expr(iter)?;
                let target_node = self.assigned_local(target, iter.span)?;
                self.graph.add_use(UseRecord {
                    receiver: iter_node,
                    kind: UseKind::IterLoad { target: target_node },
                    span: iter.span,
                    seen: Default::default(),
                });
                self.lower_body(body)
            }
            Stmt::Pass => Ok(()),
        }
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<NodeId, CoreError> {
        let node = match &expr.kind {
            ExprKind::Literal(lit) => {
                let node = self.fresh(expr.span);
                self.seed(node, literal_tag(lit));
                node
            }
            ExprKind::Name(name) => self.resolve_name(name, expr.span)?,
            ExprKind::Binary { op, left, right } => {
                let left_node = self.lower_expr(left)?;
                let right_node = self.lower_expr(right)?;
                let result = self.fresh(expr.span);
                self.graph.add_op(OpConstraint {
                    kind: OpKind::Binary {
                        op: *op,
                        left: left_node,
                        right: right_node,
                    },
                    result,
                    span: expr.span,
                    seen: Vec::new(),
                });
                result
            }
            ExprKind::Unary { op, operand } => {
                let operand_node = self.lower_expr(operand)?;
                let result = self.fresh(expr.span);
                self.graph.add_op(OpConstraint {
                    kind: OpKind::Unary {
                        op: *op,
                        operand: operand_node,
                    },
                    result,
                    span: expr.span,
                    seen: Vec::new(),
                });
                result
            }
            ExprKind::Ternary { cond, then, orelse } => {
                self.lower_expr(cond)?;
                let then_node = self.lower_expr(then)?;
                let else_node = self.lower_expr(orelse)?;
                let result = self.fresh(expr.span);
                self.copy(then_node, result);
                self.copy(else_node, result);
                result
            }
            ExprKind::Call { func, args } => self.lower_call(func, args, expr)?,
            ExprKind::MethodCall { object, method, args } => {
                let receiver = self.lower_expr(object)?;
                let mut arg_nodes = Vec::with_capacity(args.len());
                for arg in args {
                    arg_nodes.push(self.lower_expr(arg)?);
                }
                let result = self.fresh(expr.span);
                // `split` always yields a fresh list; that list's identity
                // is this call expression.
                let result_site = if method == "split" {
                    Some(self.graph.new_site(SiteKind::List, self.scope, expr.span))
                } else {
                    None
                };
                let call_id = self.graph.add_call(CallSite {
                    callee: Callee::Method { name: method.clone() },
                    receiver: Some(receiver),
                    args: arg_nodes,
                    result,
                    span: expr.span,
                    scope: self.scope,
                    result_site,
                    targets: Default::default(),
                    live_targets: Vec::new(),
                    polymorphic: false,
                    seen: Default::default(),
                    pending: true,
                });
                self.pending.push(call_id);
                result
            }
            ExprKind::Attribute { object, attr } => {
                let receiver = self.lower_expr(object)?;
                let result = self.fresh(expr.span);
                self.graph.add_use(UseRecord {
                    receiver,
                    kind: UseKind::AttrLoad {
                        attr: attr.clone(),
                        result,
                    },
                    span: expr.span,
                    seen: Default::default(),
                });
                result
            }
            ExprKind::Index { base, index } => {
                let receiver = self.lower_expr(base)?;
                let index_node = self.lower_expr(index)?;
                let result = self.fresh(expr.span);
                self.graph.add_use(UseRecord {
                    receiver,
                    kind: UseKind::IndexLoad {
                        index: index_node,
                        result,
                    },
                    span: expr.span,
                    seen: Default::default(),
                });
                result
            }
            ExprKind::List(elems) => {
                let site = self.graph.new_site(SiteKind::List, self.scope, expr.span);
                let elem = self.graph.site(site).elem;
                for e in elems {
                    let value = self.lower_expr(e)?;
                    self.copy(value, elem);
                }
                let node = self.fresh(expr.span);
                self.seed(node, TypeTag::List(site));
                node
            }
            ExprKind::Dict(items) => {
                let site = self.graph.new_site(SiteKind::Dict, self.scope, expr.span);
                let elem = self.graph.site(site).elem;
                let key = self.graph.site(site).key.expect("dict site has a key node");
                for (k, v) in items {
                    let key_node = self.lower_expr(k)?;
                    let value_node = self.lower_expr(v)?;
                    self.copy(key_node, key);
                    self.copy(value_node, elem);
                }
                let node = self.fresh(expr.span);
                self.seed(node, TypeTag::Dict(site));
                node
            }
        };
        self.expr_nodes.insert(expr.id, node);
        Ok(node)
    }

    fn lower_call(&mut self, func: &str, args: &[Expr], expr: &Expr) -> Result<NodeId, CoreError> {
        let mut arg_nodes = Vec::with_capacity(args.len());
        for arg in args {
            arg_nodes.push(self.lower_expr(arg)?);
        }

        if let Some(entry) = self.catalog.lookup_symbol(self.module, func) {
            return match entry {
                SymbolEntry::Func(f) => {
                    let arity = self.catalog.func_def(self.program, f).params.len();
                    self.expect_arity(arity == args.len(), func, arity, args.len(), expr.span)?;
                    let result = self.fresh(expr.span);
                    let call_id = self.plain_call(Callee::Direct(f), None, arg_nodes, result, expr.span);
                    self.pending.push(call_id);
                    Ok(result)
                }
                SymbolEntry::Class(class) => {
                    let result = self.fresh(expr.span);
                    self.seed(result, TypeTag::Object(class));
                    match self.catalog.constructor(class) {
                        Some(init) => {
                            let arity = self.catalog.func_def(self.program, init).params.len();
                            // `self` is implicit at the call site.
                            self.expect_arity(arity == args.len() + 1, func, arity.saturating_sub(1), args.len(), expr.span)?;
                            let call_id = self.plain_call(Callee::Ctor(class), None, arg_nodes, result, expr.span);
                            self.pending.push(call_id);
                        }
                        None => {
                            if !args.is_empty() {
                                return Err(CoreError::MalformedProgram {
                                    message: format!("class '{}' has no constructor but was called with arguments", func),
                                    span: expr.span,
                                });
                            }
                        }
                    }
                    Ok(result)
                }
            };
        }

        if let Some(builtin) = Catalog::builtin_fn(func) {
            let result = self.fresh(expr.span);
            match builtin {
                BuiltinFn::Len => {
                    self.expect_arity(args.len() == 1, func, 1, args.len(), expr.span)?;
                    self.seed(result, TypeTag::Int);
                }
                BuiltinFn::Range => {
                    self.expect_arity((1..=2).contains(&args.len()), func, 1, args.len(), expr.span)?;
                    let site = self.graph.new_site(SiteKind::List, self.scope, expr.span);
                    let elem = self.graph.site(site).elem;
                    self.seed(elem, TypeTag::Int);
                    self.seed(result, TypeTag::List(site));
                }
                BuiltinFn::Print => {
                    self.seed(result, TypeTag::None);
                }
                BuiltinFn::Str => {
                    self.expect_arity(args.len() == 1, func, 1, args.len(), expr.span)?;
                    self.seed(result, TypeTag::Str);
                }
                BuiltinFn::Int => {
                    self.expect_arity(args.len() == 1, func, 1, args.len(), expr.span)?;
                    self.seed(result, TypeTag::Int);
                }
                BuiltinFn::Float => {
                    self.expect_arity(args.len() == 1, func, 1, args.len(), expr.span)?;
                    self.seed(result, TypeTag::Float);
                }
                BuiltinFn::Bool => {
                    self.expect_arity(args.len() == 1, func, 1, args.len(), expr.span)?;
                    self.seed(result, TypeTag::Bool);
                }
                BuiltinFn::Abs => {
                    self.expect_arity(args.len() == 1, func, 1, args.len(), expr.span)?;
                    let call_id = self.plain_call(Callee::Builtin(builtin), None, arg_nodes, result, expr.span);
                    self.pending.push(call_id);
                }
                BuiltinFn::Min | BuiltinFn::Max => {
                    self.expect_arity(args.len() == 2, func, 2, args.len(), expr.span)?;
                    let call_id = self.plain_call(Callee::Builtin(builtin), None, arg_nodes, result, expr.span);
                    self.pending.push(call_id);
                }
            }
            return Ok(result);
        }

        Err(CoreError::MalformedProgram {
            message: format!("call to undefined function '{}'", func),
            span: expr.span,
        })
    }

    fn plain_call(
        &mut self,
        callee: Callee,
        receiver: Option<NodeId>,
        args: Vec<NodeId>,
        result: NodeId,
        span: Span,
    ) -> CallId {
        self.graph.add_call(CallSite {
            callee,
            receiver,
            args,
            result,
            span,
            scope: self.scope,
            result_site: None,
            targets: Default::default(),
            live_targets: Vec::new(),
            polymorphic: false,
            seen: Default::default(),
            pending: true,
        })
    }

    fn expect_arity(&self, ok: bool, func: &str, want: usize, got: usize, span: Span) -> Result<(), CoreError> {
        if ok {
            Ok(())
        } else {
            Err(CoreError::MalformedProgram {
                message: format!("'{}' expects {} argument(s), got {}", func, want, got),
                span,
            })
        }
    }

    fn assigned_local(&mut self, name: &str, span: Span) -> Result<NodeId, CoreError> {
        self.locals.get(name).copied().ok_or_else(|| CoreError::MalformedProgram {
            message: format!("assignment target '{}' was not pre-declared", name),
            span,
        })
    }

    fn resolve_name(&self, name: &str, span: Span) -> Result<NodeId, CoreError> {
        if let Some(&node) = self.locals.get(name) {
            return Ok(node);
        }
        if let Some(&node) = self.globals.get(name) {
            return Ok(node);
        }
        if self.catalog.lookup_symbol(self.module, name).is_some() {
            return Err(CoreError::MalformedProgram {
                message: format!(
                    "'{}' names a function or class; first-class function values are not supported",
                    name
                ),
                span,
            });
        }
        Err(CoreError::MalformedProgram {
            message: format!("undefined name '{}'", name),
            span,
        })
    }

    fn fresh(&mut self, span: Span) -> NodeId {
        self.graph.add_node(self.scope, Some(span))
    }

    fn seed(&mut self, node: NodeId, tag: TypeTag) {
        if self.graph.node_mut(node).types.insert(tag) {
            self.seeds.push(node);
        }
    }

    fn copy(&mut self, from: NodeId, to: NodeId) {
        if self.graph.add_copy_edge(from, to) {
            self.seeds.push(to);
        }
    }
}

fn literal_tag(lit: &Literal) -> TypeTag {
    match lit {
        Literal::Int(_) => TypeTag::Int,
        Literal::Float(_) => TypeTag::Float,
        Literal::Bool(_) => TypeTag::Bool,
        Literal::Str(_) => TypeTag::Str,
        Literal::None => TypeTag::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{FunctionDef, Module};
    use smallvec::SmallVec;

    fn sp() -> Span {
        Span::new(ModuleId(0), 1, 1)
    }

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, sp())
    }

    fn int(value: i64) -> Expr {
        expr(ExprKind::Literal(Literal::Int(value)))
    }

    fn name(n: &str) -> Expr {
        expr(ExprKind::Name(n.to_string()))
    }

    fn assign(target: &str, value: Expr) -> Stmt {
        Stmt::Assign {
            target: AssignTarget::Symbol(target.to_string()),
            value,
            span: sp(),
        }
    }

    fn single_module(body: Vec<Stmt>, functions: Vec<FunctionDef>) -> Program {
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

    fn func(name: &str, params: &[&str], body: Vec<Stmt>) -> FunctionDef {
        FunctionDef {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect::<SmallVec<[String; 4]>>(),
            body,
            span: sp(),
        }
    }

    #[test]
    fn test_literal_assignment_seeds_worklist() {
        let program = single_module(vec![assign("x", int(42))], vec![]);
        let catalog = Catalog::build(&program).unwrap();
        let out = build(&program, &catalog).unwrap();

        let x = out.graph.module_scopes[0].globals["x"];
        assert!(out.graph.node(x).types.contains(TypeTag::Int));
        assert!(!out.seeds.is_empty());
    }

    #[test]
    fn test_undefined_name_is_malformed() {
        let program = single_module(vec![assign("x", name("missing"))], vec![]);
        let catalog = Catalog::build(&program).unwrap();
        let err = build(&program, &catalog).unwrap_err();
        assert!(matches!(err, CoreError::MalformedProgram { .. }));
    }

    #[test]
    fn test_call_arity_mismatch_is_malformed() {
        let program = single_module(
            vec![Stmt::Expr(expr(ExprKind::Call {
                func: "f".to_string(),
                args: vec![int(1), int(2)],
            }))],
            vec![func("f", &["x"], vec![])],
        );
        let catalog = Catalog::build(&program).unwrap();
        let err = build(&program, &catalog).unwrap_err();
        assert!(matches!(err, CoreError::MalformedProgram { .. }));
    }

    #[test]
    fn test_function_bodies_validated_before_solve() {
        // The bad name is inside a function that is never called; it must
        // still fail the build, not the solve.
        let program = single_module(
            vec![],
            vec![func(
                "broken",
                &[],
                vec![Stmt::Return {
                    value: Some(name("missing")),
                    span: sp(),
                }],
            )],
        );
        let catalog = Catalog::build(&program).unwrap();
        let err = build(&program, &catalog).unwrap_err();
        assert!(matches!(err, CoreError::MalformedProgram { .. }));
    }

    #[test]
    fn test_return_at_top_level_is_malformed() {
        let program = single_module(
            vec![Stmt::Return {
                value: None,
                span: sp(),
            }],
            vec![],
        );
        let catalog = Catalog::build(&program).unwrap();
        let err = build(&program, &catalog).unwrap_err();
        assert!(matches!(err, CoreError::MalformedProgram { .. }));
    }

    #[test]
    fn test_list_display_wires_elements_into_site() {
        let program = single_module(
            vec![assign(
                "xs",
                expr(ExprKind::List(vec![int(1), int(2)])),
            )],
            vec![],
        );
        let catalog = Catalog::build(&program).unwrap();
        let out = build(&program, &catalog).unwrap();

        let xs = out.graph.module_scopes[0].globals["xs"];
        let tags: Vec<TypeTag> = out.graph.node(xs).types.iter().collect();
        assert_eq!(tags.len(), 1);
        let TypeTag::List(site) = tags[0] else {
            panic!("expected a list tag");
        };
        let elem = out.graph.site(site).elem;
        assert!(out.graph.node(elem).types.contains(TypeTag::Int));
    }

    #[test]
    fn test_direct_call_is_deferred_to_solver() {
        let program = single_module(
            vec![Stmt::Expr(expr(ExprKind::Call {
                func: "f".to_string(),
                args: vec![int(1)],
            }))],
            vec![func(
                "f",
                &["x"],
                vec![Stmt::Return {
                    value: Some(name("x")),
                    span: sp(),
                }],
            )],
        );
        let catalog = Catalog::build(&program).unwrap();
        let out = build(&program, &catalog).unwrap();

        assert_eq!(out.graph.calls.len(), 1);
        assert_eq!(out.pending_calls.len(), 1);
        // No variant is minted at build time.
        assert!(out.funcs.variants.is_empty());
    }
}
