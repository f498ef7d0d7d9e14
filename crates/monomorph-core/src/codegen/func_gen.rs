//! Per-Variant function emission.
//!
//! Each live Variant becomes one monomorphic `fn` whose parameter, local
//! and return types are read directly off the finalized node sets. Runtime
//! tag checks are emitted only where a set's members need different
//! physical handling: mixed-type operators, union coercions, and
//! polymorphic method dispatch.

use fnv::FnvHashMap;
use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use super::keywords;
use super::type_gen::{rust_type, variant_name, Repr, UnionRegistry};
use crate::catalog::{AttrResolution, BinaryResolution, BuiltinFn, Catalog};
use crate::error::CoreError;
use crate::graph::{CallId, ConstraintGraph, ModuleScope, NodeId};
use crate::hir::{AssignTarget, BinOp, Expr, ExprKind, Literal, ModuleId, Program, Span, Stmt, UnaryOp};
use crate::types::{TypeSet, TypeTag};
use crate::variants::{Variant, VariantId};

/// Everything function emission needs, threaded explicitly.
pub(crate) struct FnCtx<'a, 'p> {
    pub program: &'p Program,
    pub catalog: &'p Catalog,
    pub graph: &'a ConstraintGraph,
    pub funcs: &'a crate::variants::FunctionTable,
    pub unions: &'a mut UnionRegistry,
    pub fn_names: &'a FnvHashMap<VariantId, String>,
    pub calls_by_result: &'a FnvHashMap<NodeId, CallId>,
    pub module: ModuleId,
    pub scope: FnScope<'a>,
    tmp: u32,
}

pub(crate) enum FnScope<'a> {
    Variant(&'a Variant),
    Module(&'a ModuleScope),
}

/// Emit one live Variant as a monomorphic function.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_variant_fn(
    program: &Program,
    catalog: &Catalog,
    graph: &ConstraintGraph,
    funcs: &crate::variants::FunctionTable,
    unions: &mut UnionRegistry,
    fn_names: &FnvHashMap<VariantId, String>,
    calls_by_result: &FnvHashMap<NodeId, CallId>,
    variant_id: VariantId,
) -> Result<TokenStream, CoreError> {
    let variant = funcs.variant(variant_id);
    let def = catalog.func_def(program, variant.func);
    let module = catalog.func(variant.func).module;

    let mut ctx = FnCtx {
        program,
        catalog,
        graph,
        funcs,
        unions,
        fn_names,
        calls_by_result,
        module,
        scope: FnScope::Variant(variant),
        tmp: 0,
    };

    let name = format_ident!("{}", &fn_names[&variant_id]);
    let mut params = Vec::new();
    for (param_name, &param_node) in def.params.iter().zip(&variant.params) {
        let set = graph.node(param_node).types.clone();
        let repr = ctx.repr(&set, def.span)?;
        let ty = rust_type(&repr, catalog);
        let ident = format_ident!("{}", keywords::escape(param_name));
        params.push(quote! { mut #ident: #ty });
    }

    let ret_set = graph.node(variant.ret).types.clone();
    let ret_repr = ctx.repr(&ret_set, def.span)?;
    let ret_clause = match ret_repr {
        Repr::Unit => quote! {},
        ref repr => {
            let ty = rust_type(repr, catalog);
            quote! { -> #ty }
        }
    };

    // Locals are pre-declared so assignment order never matters.
    let mut locals = Vec::new();
    for (local_name, &local_node) in &variant.locals {
        if def.params.iter().any(|p| p == local_name) {
            continue;
        }
        let set = graph.node(local_node).types.clone();
        if set.is_empty() {
            // Never acquired a type; any use will fail at its own span.
            continue;
        }
        let repr = ctx.repr(&set, def.span)?;
        let ty = rust_type(&repr, catalog);
        let ident = format_ident!("{}", keywords::escape(local_name));
        locals.push(quote! { let mut #ident: #ty = Default::default(); });
    }

    let body = ctx.emit_body(&def.body)?;
    let tail = if matches!(ret_repr, Repr::Unit) || crate::builder::always_returns(&def.body) {
        quote! {}
    } else {
        // The source can fall off the end, yielding `None`.
        let fallthrough = ctx.coerce(quote! { () }, &TypeSet::single(TypeTag::None), &ret_set, def.span)?;
        quote! { return #fallthrough; }
    };

    Ok(quote! {
        pub fn #name(#(#params),*) #ret_clause {
            #(#locals)*
            #body
            #tail
        }
    })
}

/// Emit a module's top-level statements as its entry function.
pub(crate) fn emit_entry_fn(
    program: &Program,
    catalog: &Catalog,
    graph: &ConstraintGraph,
    funcs: &crate::variants::FunctionTable,
    unions: &mut UnionRegistry,
    fn_names: &FnvHashMap<VariantId, String>,
    calls_by_result: &FnvHashMap<NodeId, CallId>,
    module: ModuleId,
) -> Result<TokenStream, CoreError> {
    let module_def = program.module(module);
    let scope = &graph.module_scopes[module.0 as usize];
    let mut ctx = FnCtx {
        program,
        catalog,
        graph,
        funcs,
        unions,
        fn_names,
        calls_by_result,
        module,
        scope: FnScope::Module(scope),
        tmp: 0,
    };
    let body = ctx.emit_body(&module_def.body)?;
    let name = format_ident!("{}_entry", keywords::escape(&module_def.name));
    Ok(quote! {
        pub fn #name() {
            #body
        }
    })
}

impl FnCtx<'_, '_> {
    fn fresh(&mut self, prefix: &str) -> proc_macro2::Ident {
        self.tmp += 1;
        format_ident!("__{}{}", prefix, self.tmp)
    }

    fn expr_node(&self, expr: &Expr) -> Result<NodeId, CoreError> {
        let map = match &self.scope {
            FnScope::Variant(variant) => &variant.expr_nodes,
            FnScope::Module(scope) => &scope.expr_nodes,
        };
        map.get(&expr.id).copied().ok_or(CoreError::UnresolvedType { span: expr.span })
    }

    fn node_set(&self, node: NodeId) -> TypeSet {
        self.graph.node(node).types.clone()
    }

    fn repr(&mut self, set: &TypeSet, span: Span) -> Result<Repr, CoreError> {
        self.unions
            .repr_of_set(set, self.graph, self.catalog)
            .ok_or(CoreError::UnresolvedType { span })
    }

    /// A scope-local variable's node, if the name is local here.
    fn local_node(&self, name: &str) -> Option<NodeId> {
        match &self.scope {
            FnScope::Variant(variant) => variant.locals.get(name).copied(),
            FnScope::Module(_) => None,
        }
    }

    fn global_node(&self, name: &str) -> Option<NodeId> {
        self.graph.module_scopes[self.module.0 as usize].globals.get(name).copied()
    }

    fn global_ident(&self, name: &str) -> proc_macro2::Ident {
        let module_name = &self.program.module(self.module).name;
        format_ident!("G_{}_{}", keywords::upper(module_name), keywords::upper(name))
    }

    fn emit_body(&mut self, body: &[Stmt]) -> Result<TokenStream, CoreError> {
        let mut out = TokenStream::new();
        for stmt in body {
            let tokens = self.emit_stmt(stmt)?;
            out.extend(tokens);
        }
        Ok(out)
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<TokenStream, CoreError> {
        match stmt {
            Stmt::Assign { target, value, span } => match target {
                AssignTarget::Symbol(name) => {
                    let (tokens, set) = self.emit_expr(value)?;
                    self.emit_var_store(name, tokens, &set, *span)
                }
                AssignTarget::Attribute { object, attr } => {
                    let (obj, obj_set) = self.emit_expr(object)?;
                    let (val, val_set) = self.emit_expr(value)?;
                    let val_binder = self.fresh("val");
                    let span = *span;
                    let attr = attr.clone();
                    let store = self.dispatch_tags(obj, &obj_set, span, |ctx, bound, tag| {
                        let TypeTag::Object(class) = tag else {
                            return Ok(quote! { panic!("attribute store on non-object value") });
                        };
                        let Some(AttrResolution::Field { owner }) = ctx.catalog.resolve_attr(class, &attr) else {
                            return Ok(quote! { panic!("unresolved attribute store") });
                        };
                        let slot = ctx
                            .graph
                            .field_slots
                            .get(&(owner, attr.clone()))
                            .copied()
                            .ok_or(CoreError::UnresolvedType { span })?;
                        let slot_set = ctx.node_set(slot);
                        let coerced = ctx.coerce(quote! { #val_binder.clone() }, &val_set, &slot_set, span)?;
                        let field = format_ident!("{}", keywords::escape(&attr));
                        Ok(quote! { { #bound.borrow_mut().#field = #coerced; } })
                    })?;
                    Ok(quote! { { let #val_binder = #val; #store; } })
                }
                AssignTarget::Index { base, index } => {
                    let (base_tokens, base_set) = self.emit_expr(base)?;
                    let (index_tokens, index_set) = self.emit_expr(index)?;
                    let (val, val_set) = self.emit_expr(value)?;
                    let val_binder = self.fresh("val");
                    let idx_binder = self.fresh("idx");
                    let span = *span;
                    let store = self.dispatch_tags(base_tokens, &base_set, span, |ctx, bound, tag| match tag {
                        TypeTag::List(site) => {
                            let elem_set = ctx.node_set(ctx.graph.site(site).elem);
                            let coerced = ctx.coerce(quote! { #val_binder.clone() }, &val_set, &elem_set, span)?;
                            let idx = ctx.coerce(
                                quote! { #idx_binder.clone() },
                                &index_set,
                                &TypeSet::single(TypeTag::Int),
                                span,
                            )?;
                            Ok(quote! { { #bound.borrow_mut()[(#idx) as usize] = #coerced; } })
                        }
                        TypeTag::Dict(site) => {
                            let site_nodes = ctx.graph.site(site);
                            let key_set = ctx.node_set(site_nodes.key.expect("dict site has a key node"));
                            let elem_set = ctx.node_set(site_nodes.elem);
                            let key = ctx.coerce(quote! { #idx_binder.clone() }, &index_set, &key_set, span)?;
                            let coerced = ctx.coerce(quote! { #val_binder.clone() }, &val_set, &elem_set, span)?;
                            Ok(quote! { { #bound.borrow_mut().insert(#key, #coerced); } })
                        }
                        _ => Ok(quote! { panic!("item assignment on unsupported value") }),
                    })?;
                    Ok(quote! { { let #val_binder = #val; let #idx_binder = #index_tokens; #store; } })
                }
            },
            Stmt::Expr(expr) => {
                let (tokens, _) = self.emit_expr(expr)?;
                Ok(quote! { let _ = #tokens; })
            }
            Stmt::Return { value, span } => {
                let ret_set = match &self.scope {
                    FnScope::Variant(variant) => self.node_set(variant.ret),
                    FnScope::Module(_) => {
                        return Err(CoreError::UnresolvedType { span: *span });
                    }
                };
                let ret_repr = self.repr(&ret_set, *span)?;
                match value {
                    Some(expr) => {
                        let (tokens, set) = self.emit_expr(expr)?;
                        if matches!(ret_repr, Repr::Unit) {
                            Ok(quote! { { let _ = #tokens; return; } })
                        } else {
                            let coerced = self.coerce(tokens, &set, &ret_set, *span)?;
                            Ok(quote! { return #coerced; })
                        }
                    }
                    None => {
                        if matches!(ret_repr, Repr::Unit) {
                            Ok(quote! { return; })
                        } else {
                            let coerced =
                                self.coerce(quote! { () }, &TypeSet::single(TypeTag::None), &ret_set, *span)?;
                            Ok(quote! { return #coerced; })
                        }
                    }
                }
            }
            Stmt::If {
                condition,
                then_body,
                else_body,
            } => {
                let (cond, cond_set) = self.emit_expr(condition)?;
                let test = self.truthy(cond, &cond_set, condition.span)?;
                let then_tokens = self.emit_body(then_body)?;
                match else_body {
                    Some(else_stmts) => {
                        let else_tokens = self.emit_body(else_stmts)?;
                        Ok(quote! { if #test { #then_tokens } else { #else_tokens } })
                    }
                    None => Ok(quote! { if #test { #then_tokens } }),
                }
            }
            Stmt::While { condition, body } => {
                let (cond, cond_set) = self.emit_expr(condition)?;
                let test = self.truthy(cond, &cond_set, condition.span)?;
                let body_tokens = self.emit_body(body)?;
                Ok(quote! { while #test { #body_tokens } })
            }
            Stmt::For { target, iter, body } => {
                let (iter_tokens, iter_set) = self.emit_expr(iter)?;
                let body_tokens = self.emit_body(body)?;
                let span = iter.span;
                let item = self.fresh("it");
                let target = target.clone();
                self.dispatch_tags(iter_tokens, &iter_set, span, |ctx, bound, tag| {
                    let (loop_head, item_set) = match tag {
                        TypeTag::List(site) => {
                            let elem_set = ctx.node_set(ctx.graph.site(site).elem);
                            (quote! { for #item in #bound.borrow().clone() }, elem_set)
                        }
                        TypeTag::Dict(site) => {
                            let key_set =
                                ctx.node_set(ctx.graph.site(site).key.expect("dict site has a key node"));
                            (
                                quote! { for #item in #bound.borrow().keys().cloned().collect::<Vec<_>>() },
                                key_set,
                            )
                        }
                        TypeTag::Str => (
                            quote! { for #item in #bound.chars().map(|__c| __c.to_string()).collect::<Vec<_>>() },
                            TypeSet::single(TypeTag::Str),
                        ),
                        _ => return Ok(quote! { panic!("iteration over unsupported value") }),
                    };
                    let store = ctx.emit_var_store(&target, quote! { #item }, &item_set, span)?;
                    Ok(quote! { #loop_head { #store #body_tokens } })
                })
            }
            Stmt::Pass => Ok(quote! {}),
        }
    }

    /// Store a value into a scope variable or module global.
    fn emit_var_store(
        &mut self,
        name: &str,
        tokens: TokenStream,
        value_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        if let Some(node) = self.local_node(name) {
            let target_set = self.node_set(node);
            let coerced = self.coerce(tokens, value_set, &target_set, span)?;
            let ident = format_ident!("{}", keywords::escape(name));
            return Ok(quote! { #ident = #coerced; });
        }
        let node = self.global_node(name).ok_or(CoreError::UnresolvedType { span })?;
        let target_set = self.node_set(node);
        let coerced = self.coerce(tokens, value_set, &target_set, span)?;
        let global = self.global_ident(name);
        let tmp = self.fresh("tmp");
        // The value is computed before the cell borrow so it may read the
        // same global.
        Ok(quote! { { let #tmp = #coerced; #global.with(|__g| { *__g.borrow_mut() = #tmp; }); } })
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<(TokenStream, TypeSet), CoreError> {
        let node = self.expr_node(expr)?;
        let set = self.node_set(node);
        if set.is_empty() {
            // Bottom reached emitted code: the program point never
            // acquired a type.
            return Err(CoreError::UnresolvedType { span: expr.span });
        }
        let tokens = match &expr.kind {
            ExprKind::Literal(lit) => self.emit_literal(lit),
            ExprKind::Name(name) => self.emit_name(name, expr.span)?,
            ExprKind::Binary { op, left, right } => self.emit_binary(*op, left, right, &set, expr.span)?,
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand, &set, expr.span)?,
            ExprKind::Ternary { cond, then, orelse } => {
                let (cond_tokens, cond_set) = self.emit_expr(cond)?;
                let test = self.truthy(cond_tokens, &cond_set, cond.span)?;
                let (then_tokens, then_set) = self.emit_expr(then)?;
                let (else_tokens, else_set) = self.emit_expr(orelse)?;
                let then_coerced = self.coerce(then_tokens, &then_set, &set, expr.span)?;
                let else_coerced = self.coerce(else_tokens, &else_set, &set, expr.span)?;
                quote! { if #test { #then_coerced } else { #else_coerced } }
            }
            ExprKind::Call { func, args } => self.emit_call(func, args, node, &set, expr.span)?,
            ExprKind::MethodCall { object, method, args } => {
                self.emit_method_call(object, method, args, node, &set, expr.span)?
            }
            ExprKind::Attribute { object, attr } => {
                let (obj, obj_set) = self.emit_expr(object)?;
                let attr = attr.clone();
                let span = expr.span;
                let result_set = set.clone();
                self.dispatch_tags(obj, &obj_set, span, |ctx, bound, tag| {
                    let TypeTag::Object(class) = tag else {
                        return Ok(quote! { panic!("attribute access on non-object value") });
                    };
                    let Some(AttrResolution::Field { owner }) = ctx.catalog.resolve_attr(class, &attr) else {
                        return Ok(quote! { panic!("unresolved attribute") });
                    };
                    let slot = ctx
                        .graph
                        .field_slots
                        .get(&(owner, attr.clone()))
                        .copied()
                        .ok_or(CoreError::UnresolvedType { span })?;
                    let slot_set = ctx.node_set(slot);
                    let field = format_ident!("{}", keywords::escape(&attr));
                    ctx.coerce(quote! { #bound.borrow().#field.clone() }, &slot_set, &result_set, span)
                })?
            }
            ExprKind::Index { base, index } => {
                let (base_tokens, base_set) = self.emit_expr(base)?;
                let (index_tokens, index_set) = self.emit_expr(index)?;
                let idx_binder = self.fresh("idx");
                let span = expr.span;
                let result_set = set.clone();
                let access = self.dispatch_tags(base_tokens, &base_set, span, |ctx, bound, tag| match tag {
                    TypeTag::List(site) => {
                        let elem_set = ctx.node_set(ctx.graph.site(site).elem);
                        let idx = ctx.coerce(
                            quote! { #idx_binder.clone() },
                            &index_set,
                            &TypeSet::single(TypeTag::Int),
                            span,
                        )?;
                        ctx.coerce(
                            quote! { #bound.borrow()[(#idx) as usize].clone() },
                            &elem_set,
                            &result_set,
                            span,
                        )
                    }
                    TypeTag::Dict(site) => {
                        let site_nodes = ctx.graph.site(site);
                        let key_set = ctx.node_set(site_nodes.key.expect("dict site has a key node"));
                        let elem_set = ctx.node_set(site_nodes.elem);
                        let key = ctx.coerce(quote! { #idx_binder.clone() }, &index_set, &key_set, span)?;
                        ctx.coerce(
                            quote! { #bound.borrow().get(&#key).cloned().unwrap() },
                            &elem_set,
                            &result_set,
                            span,
                        )
                    }
                    TypeTag::Str => {
                        let idx = ctx.coerce(
                            quote! { #idx_binder.clone() },
                            &index_set,
                            &TypeSet::single(TypeTag::Int),
                            span,
                        )?;
                        ctx.coerce(
                            quote! { #bound.chars().nth((#idx) as usize).unwrap().to_string() },
                            &TypeSet::single(TypeTag::Str),
                            &result_set,
                            span,
                        )
                    }
                    _ => Ok(quote! { panic!("subscript on unsupported value") }),
                })?;
                quote! { { let #idx_binder = #index_tokens; #access } }
            }
            ExprKind::List(elems) => {
                let TypeTag::List(site) = single_tag(&set, expr.span)? else {
                    return Err(CoreError::UnresolvedType { span: expr.span });
                };
                let elem_node = self.graph.site(site).elem;
                let elem_set = self.node_set(elem_node);
                let elem_repr = if elem_set.is_empty() {
                    Repr::Unit
                } else {
                    self.repr(&elem_set, expr.span)?
                };
                let elem_ty = rust_type(&elem_repr, self.catalog);
                let mut pushes = Vec::new();
                for elem in elems {
                    let (tokens, elem_value_set) = self.emit_expr(elem)?;
                    let coerced = self.coerce(tokens, &elem_value_set, &elem_set, elem.span)?;
                    pushes.push(quote! { __v.push(#coerced); });
                }
                quote! {
                    Rc::new(RefCell::new({
                        let mut __v: Vec<#elem_ty> = Vec::new();
                        #(#pushes)*
                        __v
                    }))
                }
            }
            ExprKind::Dict(items) => {
                let TypeTag::Dict(site) = single_tag(&set, expr.span)? else {
                    return Err(CoreError::UnresolvedType { span: expr.span });
                };
                let site_nodes = self.graph.site(site);
                let key_node = site_nodes.key.expect("dict site has a key node");
                let elem_node = site_nodes.elem;
                let key_set = self.node_set(key_node);
                let elem_set = self.node_set(elem_node);
                let key_repr = if key_set.is_empty() {
                    Repr::Unit
                } else {
                    self.repr(&key_set, expr.span)?
                };
                let elem_repr = if elem_set.is_empty() {
                    Repr::Unit
                } else {
                    self.repr(&elem_set, expr.span)?
                };
                let key_ty = rust_type(&key_repr, self.catalog);
                let elem_ty = rust_type(&elem_repr, self.catalog);
                let mut inserts = Vec::new();
                for (k, v) in items {
                    let (key_tokens, k_set) = self.emit_expr(k)?;
                    let (val_tokens, v_set) = self.emit_expr(v)?;
                    let key_coerced = self.coerce(key_tokens, &k_set, &key_set, k.span)?;
                    let val_coerced = self.coerce(val_tokens, &v_set, &elem_set, v.span)?;
                    inserts.push(quote! { __m.insert(#key_coerced, #val_coerced); });
                }
                quote! {
                    Rc::new(RefCell::new({
                        let mut __m: HashMap<#key_ty, #elem_ty> = HashMap::new();
                        #(#inserts)*
                        __m
                    }))
                }
            }
        };
        Ok((tokens, set))
    }

    fn emit_literal(&self, lit: &Literal) -> TokenStream {
        match lit {
            Literal::Int(value) => {
                let lit = proc_macro2::Literal::i64_suffixed(*value);
                quote! { #lit }
            }
            Literal::Float(value) => {
                let lit = proc_macro2::Literal::f64_suffixed(*value);
                quote! { #lit }
            }
            Literal::Bool(value) => {
                if *value {
                    quote! { true }
                } else {
                    quote! { false }
                }
            }
            Literal::Str(value) => quote! { #value.to_string() },
            Literal::None => quote! { () },
        }
    }

    fn emit_name(&mut self, name: &str, span: Span) -> Result<TokenStream, CoreError> {
        if self.local_node(name).is_some() {
            let ident = format_ident!("{}", keywords::escape(name));
            return Ok(quote! { #ident.clone() });
        }
        if self.global_node(name).is_some() {
            let global = self.global_ident(name);
            return Ok(quote! { #global.with(|__g| __g.borrow().clone()) });
        }
        Err(CoreError::UnresolvedType { span })
    }

    fn emit_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        let (tokens, set) = self.emit_expr(operand)?;
        match op {
            UnaryOp::Not => {
                let test = self.truthy(tokens, &set, span)?;
                self.coerce(quote! { (!#test) }, &TypeSet::single(TypeTag::Bool), result_set, span)
            }
            UnaryOp::Neg => {
                let result = result_set.clone();
                self.dispatch_tags(tokens, &set, span, |ctx, bound, tag| match tag {
                    TypeTag::Int => ctx.coerce(quote! { (-#bound) }, &TypeSet::single(TypeTag::Int), &result, span),
                    TypeTag::Float => {
                        ctx.coerce(quote! { (-#bound) }, &TypeSet::single(TypeTag::Float), &result, span)
                    }
                    _ => Ok(quote! { panic!("negation of non-numeric value") }),
                })
            }
        }
    }

    fn emit_binary(
        &mut self,
        op: BinOp,
        left: &Expr,
        right: &Expr,
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        let (left_tokens, left_set) = self.emit_expr(left)?;
        let (right_tokens, right_set) = self.emit_expr(right)?;
        let result = result_set.clone();
        self.dispatch_tags(left_tokens, &left_set, span, |ctx, left_bound, lt| {
            let right_tokens = right_tokens.clone();
            let result = result.clone();
            let left_bound = left_bound.clone();
            ctx.dispatch_tags(right_tokens, &right_set.clone(), span, move |ctx, right_bound, rt| {
                ctx.emit_binary_combo(op, left_bound.clone(), lt, right_bound, rt, &result, span)
            })
        })
    }

    /// One concrete operand combination. This is the point where mixed
    /// sets require different physical handling, so any tag checks have
    /// already been compiled into the surrounding match.
    fn emit_binary_combo(
        &mut self,
        op: BinOp,
        left: TokenStream,
        lt: TypeTag,
        right: TokenStream,
        rt: TypeTag,
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        use TypeTag::*;

        if matches!(op, BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq) {
            let value = self.emit_comparison(op, left, lt, right, rt);
            return self.coerce(value, &TypeSet::single(Bool), result_set, span);
        }
        if matches!(op, BinOp::And | BinOp::Or) {
            let l = self.truthy_tag(left, lt);
            let r = self.truthy_tag(right, rt);
            let value = match op {
                BinOp::And => quote! { (#l && #r) },
                _ => quote! { (#l || #r) },
            };
            return self.coerce(value, &TypeSet::single(Bool), result_set, span);
        }

        match self.catalog.binary_result(op, lt, rt) {
            BinaryResolution::Tags(_) => {
                let (value, value_set) = self.emit_arith(op, left, lt, right, rt, span)?;
                self.coerce(value, &value_set, result_set, span)
            }
            BinaryResolution::ClassOperator { class, method } => {
                let Some(AttrResolution::Method(func)) = self.catalog.resolve_attr(class, method) else {
                    return Ok(quote! { panic!("unsupported operand types") });
                };
                let key = crate::variants::VariantKey(vec![
                    TypeSet::single(TypeTag::Object(class)),
                    TypeSet::single(rt),
                ]);
                let Some(variant_id) = self.funcs.lookup(func, &key) else {
                    return Err(CoreError::UnresolvedType { span });
                };
                let variant = self.funcs.variant(variant_id);
                let self_set = self.node_set(variant.params[0]);
                let other_set = self.node_set(variant.params[1]);
                let ret_set = self.node_set(variant.ret);
                let name = format_ident!("{}", &self.fn_names[&variant_id]);
                let receiver = self.coerce(left, &TypeSet::single(TypeTag::Object(class)), &self_set, span)?;
                let arg = self.coerce(right, &TypeSet::single(rt), &other_set, span)?;
                self.coerce(quote! { #name(#receiver, #arg) }, &ret_set, result_set, span)
            }
            BinaryResolution::NoSignature => Ok(quote! { panic!("unsupported operand types") }),
        }
    }

    fn emit_comparison(&mut self, op: BinOp, left: TokenStream, lt: TypeTag, right: TokenStream, rt: TypeTag) -> TokenStream {
        use TypeTag::*;
        let ordered = |l: TokenStream, r: TokenStream| match op {
            BinOp::Lt => quote! { (#l < #r) },
            BinOp::LtEq => quote! { (#l <= #r) },
            BinOp::Gt => quote! { (#l > #r) },
            BinOp::GtEq => quote! { (#l >= #r) },
            BinOp::Eq => quote! { (#l == #r) },
            _ => quote! { (#l != #r) },
        };
        match (lt, rt) {
            (Int, Int) | (Float, Float) | (Bool, Bool) | (Str, Str) => ordered(left, right),
            (Int, Float) | (Float, Int) => ordered(quote! { ((#left) as f64) }, quote! { ((#right) as f64) }),
            (Object(_), Object(_)) => match op {
                BinOp::Eq => quote! { Rc::ptr_eq(&#left, &#right) },
                BinOp::NotEq => quote! { (!Rc::ptr_eq(&#left, &#right)) },
                _ => quote! { panic!("unsupported comparison") },
            },
            (None, None) => match op {
                BinOp::Eq => quote! { true },
                BinOp::NotEq => quote! { false },
                _ => quote! { panic!("unsupported comparison") },
            },
            _ => match op {
                // Values of different concrete types are simply unequal.
                BinOp::Eq => quote! { { let _ = (#left, #right); false } },
                BinOp::NotEq => quote! { { let _ = (#left, #right); true } },
                _ => quote! { panic!("unsupported comparison") },
            },
        }
    }

    /// Arithmetic over one primitive combination, returning the value and
    /// its concrete type set.
    fn emit_arith(
        &mut self,
        op: BinOp,
        left: TokenStream,
        lt: TypeTag,
        right: TokenStream,
        rt: TypeTag,
        span: Span,
    ) -> Result<(TokenStream, TypeSet), CoreError> {
        use TypeTag::*;
        let value = match (op, lt, rt) {
            (BinOp::Div, a, b) if a.is_numeric() && b.is_numeric() => {
                let l = float_cast(left, lt);
                let r = float_cast(right, rt);
                return Ok((quote! { (#l / #r) }, TypeSet::single(Float)));
            }
            (BinOp::Add, Int, Int) => quote! { (#left + #right) },
            (BinOp::Sub, Int, Int) => quote! { (#left - #right) },
            (BinOp::Mul, Int, Int) => quote! { (#left * #right) },
            (BinOp::FloorDiv, Int, Int) => quote! { (#left).div_euclid(#right) },
            (BinOp::Mod, Int, Int) => quote! { (#left).rem_euclid(#right) },
            (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FloorDiv | BinOp::Mod, a, b)
                if a.is_numeric() && b.is_numeric() =>
            {
                let l = float_cast(left, lt);
                let r = float_cast(right, rt);
                let value = match op {
                    BinOp::Add => quote! { (#l + #r) },
                    BinOp::Sub => quote! { (#l - #r) },
                    BinOp::Mul => quote! { (#l * #r) },
                    BinOp::FloorDiv => quote! { (#l / #r).floor() },
                    _ => quote! { (#l).rem_euclid(#r) },
                };
                return Ok((value, TypeSet::single(Float)));
            }
            (BinOp::Add, Str, Str) => {
                return Ok((quote! { format!("{}{}", #left, #right) }, TypeSet::single(Str)));
            }
            (BinOp::Add, List(a), List(b)) => {
                // Concatenation keeps the left identity; sites with
                // incompatible element layouts cannot share a vector.
                let left_elem = self.node_set(self.graph.site(a).elem);
                let right_elem = self.node_set(self.graph.site(b).elem);
                let left_repr = self.repr(&left_elem, span).ok();
                let right_repr = self.repr(&right_elem, span).ok();
                if left_repr.is_some() && left_repr == right_repr {
                    let value = quote! {
                        {
                            let mut __v = #left.borrow().clone();
                            __v.extend(#right.borrow().iter().cloned());
                            Rc::new(RefCell::new(__v))
                        }
                    };
                    return Ok((value, TypeSet::single(List(a))));
                }
                return Ok((quote! { panic!("unsupported operand types") }, TypeSet::single(List(a))));
            }
            _ => return Ok((quote! { panic!("unsupported operand types") }, TypeSet::single(Int))),
        };
        Ok((value, TypeSet::single(Int)))
    }

    fn emit_call(
        &mut self,
        func: &str,
        args: &[Expr],
        node: NodeId,
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        use crate::catalog::SymbolEntry;
        match self.catalog.lookup_symbol(self.module, func) {
            Some(SymbolEntry::Func(_)) => {
                let call_id = self.calls_by_result[&node];
                let call = &self.graph.calls[call_id.0 as usize];
                let Some(&target) = call.live_targets.first() else {
                    return Err(CoreError::UnresolvedType { span });
                };
                let variant = self.funcs.variant(target);
                let param_sets: Vec<TypeSet> = variant.params.iter().map(|&p| self.node_set(p)).collect();
                let ret_set = self.node_set(variant.ret);
                let name = format_ident!("{}", &self.fn_names[&target]);
                let mut arg_tokens = Vec::new();
                for (arg, param_set) in args.iter().zip(&param_sets) {
                    let (tokens, set) = self.emit_expr(arg)?;
                    arg_tokens.push(self.coerce(tokens, &set, param_set, arg.span)?);
                }
                self.coerce(quote! { #name(#(#arg_tokens),*) }, &ret_set, result_set, span)
            }
            Some(SymbolEntry::Class(class)) => {
                let class_ident = format_ident!("{}", self.catalog.class(class).name);
                if self.catalog.constructor(class).is_none() {
                    return Ok(quote! { Rc::new(RefCell::new(#class_ident::default())) });
                }
                let fresh_obj = self.fresh("obj");
                let call_id = self.calls_by_result[&node];
                let call = &self.graph.calls[call_id.0 as usize];
                let Some(&target) = call.live_targets.first() else {
                    return Err(CoreError::UnresolvedType { span });
                };
                let variant = self.funcs.variant(target);
                let param_sets: Vec<TypeSet> = variant.params.iter().skip(1).map(|&p| self.node_set(p)).collect();
                let init_name = format_ident!("{}", &self.fn_names[&target]);
                let mut arg_tokens = Vec::new();
                for (arg, param_set) in args.iter().zip(&param_sets) {
                    let (tokens, set) = self.emit_expr(arg)?;
                    arg_tokens.push(self.coerce(tokens, &set, param_set, arg.span)?);
                }
                Ok(quote! {
                    {
                        let #fresh_obj = Rc::new(RefCell::new(#class_ident::default()));
                        #init_name(#fresh_obj.clone() #(, #arg_tokens)*);
                        #fresh_obj
                    }
                })
            }
            None => {
                let builtin = Catalog::builtin_fn(func).ok_or(CoreError::UnresolvedType { span })?;
                self.emit_builtin_call(builtin, args, result_set, span)
            }
        }
    }

    fn emit_builtin_call(
        &mut self,
        builtin: BuiltinFn,
        args: &[Expr],
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        match builtin {
            BuiltinFn::Len => {
                let (tokens, set) = self.emit_expr(&args[0])?;
                let value = self.dispatch_tags(tokens, &set, span, |_, bound, tag| match tag {
                    TypeTag::List(_) | TypeTag::Dict(_) => Ok(quote! { (#bound.borrow().len() as i64) }),
                    TypeTag::Str => Ok(quote! { (#bound.len() as i64) }),
                    _ => Ok(quote! { panic!("len of unsupported value") }),
                })?;
                self.coerce(value, &TypeSet::single(TypeTag::Int), result_set, span)
            }
            BuiltinFn::Range => {
                let int_set = TypeSet::single(TypeTag::Int);
                let (start_tokens, start_set) = self.emit_expr(&args[0])?;
                let start = self.coerce(start_tokens, &start_set, &int_set, span)?;
                let bounds = if args.len() == 2 {
                    let (end_tokens, end_set) = self.emit_expr(&args[1])?;
                    let end = self.coerce(end_tokens, &end_set, &int_set, span)?;
                    quote! { (#start..#end) }
                } else {
                    quote! { (0i64..#start) }
                };
                Ok(quote! { Rc::new(RefCell::new(#bounds.collect::<Vec<i64>>())) })
            }
            BuiltinFn::Print => {
                let mut placeholders = Vec::new();
                let mut values = Vec::new();
                for arg in args {
                    let (tokens, set) = self.emit_expr(arg)?;
                    let repr = self.repr(&set, arg.span)?;
                    placeholders.push(match repr {
                        Repr::Int | Repr::Float | Repr::Bool | Repr::Str => "{}",
                        _ => "{:?}",
                    });
                    values.push(tokens);
                }
                let fmt = placeholders.join(" ");
                Ok(quote! { println!(#fmt #(, #values)*) })
            }
            BuiltinFn::Str => {
                let (tokens, set) = self.emit_expr(&args[0])?;
                let value = self.dispatch_tags(tokens, &set, span, |_, bound, tag| match tag {
                    TypeTag::Str => Ok(quote! { #bound }),
                    TypeTag::Int | TypeTag::Float | TypeTag::Bool => Ok(quote! { format!("{}", #bound) }),
                    _ => Ok(quote! { format!("{:?}", #bound) }),
                })?;
                self.coerce(value, &TypeSet::single(TypeTag::Str), result_set, span)
            }
            BuiltinFn::Int => {
                let (tokens, set) = self.emit_expr(&args[0])?;
                let value = self.dispatch_tags(tokens, &set, span, |_, bound, tag| match tag {
                    TypeTag::Int => Ok(quote! { #bound }),
                    TypeTag::Float => Ok(quote! { (#bound as i64) }),
                    TypeTag::Bool => Ok(quote! { (#bound as i64) }),
                    TypeTag::Str => Ok(quote! { #bound.trim().parse::<i64>().unwrap() }),
                    _ => Ok(quote! { panic!("int() of unsupported value") }),
                })?;
                self.coerce(value, &TypeSet::single(TypeTag::Int), result_set, span)
            }
            BuiltinFn::Float => {
                let (tokens, set) = self.emit_expr(&args[0])?;
                let value = self.dispatch_tags(tokens, &set, span, |_, bound, tag| match tag {
                    TypeTag::Float => Ok(quote! { #bound }),
                    TypeTag::Int => Ok(quote! { (#bound as f64) }),
                    TypeTag::Bool => Ok(quote! { ((#bound as i64) as f64) }),
                    TypeTag::Str => Ok(quote! { #bound.trim().parse::<f64>().unwrap() }),
                    _ => Ok(quote! { panic!("float() of unsupported value") }),
                })?;
                self.coerce(value, &TypeSet::single(TypeTag::Float), result_set, span)
            }
            BuiltinFn::Bool => {
                let (tokens, set) = self.emit_expr(&args[0])?;
                let value = self.truthy(tokens, &set, span)?;
                self.coerce(value, &TypeSet::single(TypeTag::Bool), result_set, span)
            }
            BuiltinFn::Abs => {
                let (tokens, set) = self.emit_expr(&args[0])?;
                let result = result_set.clone();
                self.dispatch_tags(tokens, &set, span, |ctx, bound, tag| match tag {
                    TypeTag::Int => ctx.coerce(quote! { (#bound).abs() }, &TypeSet::single(TypeTag::Int), &result, span),
                    TypeTag::Float => {
                        ctx.coerce(quote! { (#bound).abs() }, &TypeSet::single(TypeTag::Float), &result, span)
                    }
                    _ => Ok(quote! { panic!("abs of non-numeric value") }),
                })
            }
            BuiltinFn::Min | BuiltinFn::Max => {
                let (left_tokens, left_set) = self.emit_expr(&args[0])?;
                let (right_tokens, right_set) = self.emit_expr(&args[1])?;
                let result = result_set.clone();
                let is_min = matches!(builtin, BuiltinFn::Min);
                self.dispatch_tags(left_tokens, &left_set, span, move |ctx, left_bound, lt| {
                    let right_tokens = right_tokens.clone();
                    let result = result.clone();
                    let left_bound = left_bound.clone();
                    ctx.dispatch_tags(right_tokens, &right_set.clone(), span, move |ctx, right_bound, rt| {
                        let (value, value_set) = match (lt, rt) {
                            (TypeTag::Int, TypeTag::Int) => {
                                let value = if is_min {
                                    quote! { std::cmp::min(#left_bound, #right_bound) }
                                } else {
                                    quote! { std::cmp::max(#left_bound, #right_bound) }
                                };
                                (value, TypeSet::single(TypeTag::Int))
                            }
                            (TypeTag::Str, TypeTag::Str) => {
                                let value = if is_min {
                                    quote! { std::cmp::min(#left_bound, #right_bound) }
                                } else {
                                    quote! { std::cmp::max(#left_bound, #right_bound) }
                                };
                                (value, TypeSet::single(TypeTag::Str))
                            }
                            (a, b) if a.is_numeric() && b.is_numeric() => {
                                let l = float_cast(left_bound.clone(), a);
                                let r = float_cast(right_bound, b);
                                let value = if is_min {
                                    quote! { (#l).min(#r) }
                                } else {
                                    quote! { (#l).max(#r) }
                                };
                                (value, TypeSet::single(TypeTag::Float))
                            }
                            _ => return Ok(quote! { panic!("unsupported operand types") }),
                        };
                        ctx.coerce(value, &value_set, &result, span)
                    })
                })
            }
        }
    }

    fn emit_method_call(
        &mut self,
        object: &Expr,
        method: &str,
        args: &[Expr],
        node: NodeId,
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        let (recv_tokens, recv_set) = self.emit_expr(object)?;
        let call_id = self.calls_by_result[&node];

        let mut arg_values = Vec::new();
        for arg in args {
            let value = self.emit_expr(arg)?;
            arg_values.push(value);
        }

        let method = method.to_string();
        let result = result_set.clone();
        self.dispatch_tags(recv_tokens, &recv_set, span, |ctx, bound, tag| match tag {
            TypeTag::Object(class) => {
                ctx.emit_class_method_arm(call_id, class, bound, &arg_values, &result, span)
            }
            TypeTag::List(site) => ctx.emit_list_method_arm(site, &method, bound, &arg_values, &result, span),
            TypeTag::Dict(site) => ctx.emit_dict_method_arm(site, &method, bound, &arg_values, &result, span),
            TypeTag::Str => ctx.emit_str_method_arm(&method, bound, &arg_values, &result, span),
            _ => Ok(quote! { panic!("method call on unsupported value") }),
        })
    }

    /// One arm of (possibly polymorphic) method dispatch: the receiver is
    /// known to be `class` here, so the call resolves to that class's
    /// Variant — a match arm per class is the emitted dynamic dispatch.
    fn emit_class_method_arm(
        &mut self,
        call_id: CallId,
        class: crate::types::ClassId,
        bound: TokenStream,
        arg_values: &[(TokenStream, TypeSet)],
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        let call = &self.graph.calls[call_id.0 as usize];
        let class_set = TypeSet::single(TypeTag::Object(class));
        // An exact per-class key, or the widened Variant that subsumed it.
        let target = call
            .live_targets
            .iter()
            .copied()
            .find(|&v| self.funcs.variant(v).key.0.first() == Some(&class_set))
            .or_else(|| {
                call.live_targets.iter().copied().find(|&v| {
                    self.funcs
                        .variant(v)
                        .key
                        .0
                        .first()
                        .is_some_and(|k| k.contains(TypeTag::Object(class)))
                })
            })
            .ok_or(CoreError::UnresolvedType { span })?;
        let variant = self.funcs.variant(target);
        let self_set = self.node_set(variant.params[0]);
        let param_sets: Vec<TypeSet> = variant.params.iter().skip(1).map(|&p| self.node_set(p)).collect();
        let ret_set = self.node_set(variant.ret);
        let name = format_ident!("{}", &self.fn_names[&target]);
        let self_arg = self.coerce(bound, &class_set, &self_set, span)?;
        let mut arg_tokens = Vec::new();
        for ((tokens, set), param_set) in arg_values.iter().zip(&param_sets) {
            arg_tokens.push(self.coerce(tokens.clone(), set, param_set, span)?);
        }
        self.coerce(quote! { #name(#self_arg #(, #arg_tokens)*) }, &ret_set, result_set, span)
    }

    fn emit_list_method_arm(
        &mut self,
        site: crate::types::SiteId,
        method: &str,
        bound: TokenStream,
        arg_values: &[(TokenStream, TypeSet)],
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        let elem_set = self.node_set(self.graph.site(site).elem);
        let none_set = TypeSet::single(TypeTag::None);
        match method {
            "append" => {
                let (tokens, set) = &arg_values[0];
                let coerced = self.coerce(tokens.clone(), set, &elem_set, span)?;
                let value = quote! { { #bound.borrow_mut().push(#coerced); } };
                self.coerce(value, &none_set, result_set, span)
            }
            "pop" => self.coerce(quote! { #bound.borrow_mut().pop().unwrap() }, &elem_set, result_set, span),
            "clear" => self.coerce(quote! { { #bound.borrow_mut().clear(); } }, &none_set, result_set, span),
            "reverse" => self.coerce(quote! { { #bound.borrow_mut().reverse(); } }, &none_set, result_set, span),
            _ => Ok(quote! { panic!("unsupported list method") }),
        }
    }

    fn emit_dict_method_arm(
        &mut self,
        site: crate::types::SiteId,
        method: &str,
        bound: TokenStream,
        arg_values: &[(TokenStream, TypeSet)],
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        let site_nodes = self.graph.site(site);
        let key_set = self.node_set(site_nodes.key.expect("dict site has a key node"));
        let elem_set = self.node_set(site_nodes.elem);
        let none_set = TypeSet::single(TypeTag::None);
        match method {
            "get" => {
                let (tokens, set) = &arg_values[0];
                let key = self.coerce(tokens.clone(), set, &key_set, span)?;
                let found = self.coerce(quote! { __hit.clone() }, &elem_set, result_set, span)?;
                let missing = self.coerce(quote! { () }, &none_set, result_set, span)?;
                Ok(quote! {
                    match #bound.borrow().get(&#key) {
                        Some(__hit) => #found,
                        None => #missing,
                    }
                })
            }
            "clear" => self.coerce(quote! { { #bound.borrow_mut().clear(); } }, &none_set, result_set, span),
            _ => Ok(quote! { panic!("unsupported dict method") }),
        }
    }

    fn emit_str_method_arm(
        &mut self,
        method: &str,
        bound: TokenStream,
        arg_values: &[(TokenStream, TypeSet)],
        result_set: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        let str_set = TypeSet::single(TypeTag::Str);
        match method {
            "upper" => self.coerce(quote! { #bound.to_uppercase() }, &str_set, result_set, span),
            "lower" => self.coerce(quote! { #bound.to_lowercase() }, &str_set, result_set, span),
            "strip" => self.coerce(quote! { #bound.trim().to_string() }, &str_set, result_set, span),
            "split" => {
                let pieces = if arg_values.is_empty() {
                    quote! { #bound.split_whitespace().map(|__s| __s.to_string()).collect::<Vec<String>>() }
                } else {
                    let (tokens, set) = &arg_values[0];
                    let sep = self.coerce(tokens.clone(), set, &str_set, span)?;
                    quote! { #bound.split(#sep.as_str()).map(|__s| __s.to_string()).collect::<Vec<String>>() }
                };
                Ok(quote! { Rc::new(RefCell::new(#pieces)) })
            }
            "find" => {
                let (tokens, set) = &arg_values[0];
                let pat = self.coerce(tokens.clone(), set, &str_set, span)?;
                self.coerce(
                    quote! { #bound.find(#pat.as_str()).map(|__i| __i as i64).unwrap_or(-1) },
                    &TypeSet::single(TypeTag::Int),
                    result_set,
                    span,
                )
            }
            "startswith" => {
                let (tokens, set) = &arg_values[0];
                let pat = self.coerce(tokens.clone(), set, &str_set, span)?;
                self.coerce(
                    quote! { #bound.starts_with(#pat.as_str()) },
                    &TypeSet::single(TypeTag::Bool),
                    result_set,
                    span,
                )
            }
            _ => Ok(quote! { panic!("unsupported string method") }),
        }
    }

    /// Compile a value of `set` down to per-tag arms. Singleton sets pass
    /// straight through; union values get one `match` arm per member —
    /// the only places emitted code checks tags at runtime.
    fn dispatch_tags(
        &mut self,
        tokens: TokenStream,
        set: &TypeSet,
        span: Span,
        mut per_tag: impl FnMut(&mut Self, TokenStream, TypeTag) -> Result<TokenStream, CoreError>,
    ) -> Result<TokenStream, CoreError> {
        match set.len() {
            0 => Err(CoreError::UnresolvedType { span }),
            1 => {
                let tag = set.iter().next().expect("nonempty");
                per_tag(self, tokens, tag)
            }
            _ => {
                let union_name = self.unions.register(set, self.catalog);
                let union_ident = format_ident!("{}", union_name);
                let mut arms = Vec::new();
                for tag in set.iter() {
                    let variant = format_ident!("{}", variant_name(tag, self.catalog));
                    if tag == TypeTag::None {
                        let body = per_tag(self, quote! { () }, tag)?;
                        arms.push(quote! { #union_ident::#variant => #body });
                    } else {
                        let binder = self.fresh("v");
                        let body = per_tag(self, quote! { #binder }, tag)?;
                        arms.push(quote! { #union_ident::#variant(#binder) => #body });
                    }
                }
                Ok(quote! { match #tokens { #(#arms),* } })
            }
        }
    }

    /// Adapt a value from one type set's representation to another's.
    /// Injections and extractions around tagged unions happen here; equal
    /// representations pass through untouched.
    fn coerce(
        &mut self,
        tokens: TokenStream,
        from: &TypeSet,
        to: &TypeSet,
        span: Span,
    ) -> Result<TokenStream, CoreError> {
        if from == to {
            return Ok(tokens);
        }
        let from_repr = self.repr(from, span)?;
        let to_repr = self.repr(to, span)?;
        if from_repr == to_repr {
            return Ok(tokens);
        }
        match (&from_repr, &to_repr) {
            (_, Repr::Union(to_name)) if from.len() == 1 => {
                let tag = from.iter().next().expect("nonempty");
                let to_ident = format_ident!("{}", to_name);
                if !to.contains(tag) {
                    return Ok(quote! { { let _ = #tokens; panic!("runtime type confusion") } });
                }
                let variant = format_ident!("{}", variant_name(tag, self.catalog));
                if tag == TypeTag::None {
                    Ok(quote! { { #tokens; #to_ident::#variant } })
                } else {
                    Ok(quote! { #to_ident::#variant(#tokens) })
                }
            }
            (Repr::Union(_), Repr::Union(to_name)) => {
                let to_ident = format_ident!("{}", to_name.clone());
                self.dispatch_tags(tokens, &from.clone(), span, |ctx, bound, tag| {
                    if !to.contains(tag) {
                        return Ok(quote! { { let _ = #bound; panic!("runtime type confusion") } });
                    }
                    let variant = format_ident!("{}", variant_name(tag, ctx.catalog));
                    if tag == TypeTag::None {
                        Ok(quote! { { #bound; #to_ident::#variant } })
                    } else {
                        Ok(quote! { #to_ident::#variant(#bound) })
                    }
                })
            }
            (Repr::Union(_), _) => {
                // Runtime tag check: extract the single expected member.
                let to_tag = to.iter().next().expect("nonempty");
                self.dispatch_tags(tokens, &from.clone(), span, |_, bound, tag| {
                    if tag == to_tag {
                        Ok(bound)
                    } else {
                        Ok(quote! { { let _ = #bound; panic!("runtime type confusion") } })
                    }
                })
            }
            _ => Ok(quote! { { let _ = #tokens; panic!("runtime type confusion") } }),
        }
    }

    /// Truth test for a value of `set`.
    fn truthy(&mut self, tokens: TokenStream, set: &TypeSet, span: Span) -> Result<TokenStream, CoreError> {
        self.dispatch_tags(tokens, set, span, |ctx, bound, tag| Ok(ctx.truthy_tag(bound, tag)))
    }

    fn truthy_tag(&self, tokens: TokenStream, tag: TypeTag) -> TokenStream {
        match tag {
            TypeTag::Int => quote! { (#tokens != 0i64) },
            TypeTag::Float => quote! { (#tokens != 0f64) },
            TypeTag::Bool => quote! { #tokens },
            TypeTag::Str => quote! { (!#tokens.is_empty()) },
            TypeTag::List(_) | TypeTag::Dict(_) => quote! { (!#tokens.borrow().is_empty()) },
            TypeTag::None => quote! { { #tokens; false } },
            TypeTag::Object(_) => quote! { { let _ = #tokens; true } },
        }
    }
}

fn float_cast(tokens: TokenStream, tag: TypeTag) -> TokenStream {
    if tag == TypeTag::Int {
        quote! { ((#tokens) as f64) }
    } else {
        quote! { (#tokens) }
    }
}

fn single_tag(set: &TypeSet, span: Span) -> Result<TypeTag, CoreError> {
    if set.len() == 1 {
        Ok(set.iter().next().expect("nonempty"))
    } else {
        Err(CoreError::UnresolvedType { span })
    }
}
