//! Input program model: the AST contract consumed by the analysis core.
//!
//! The front end (lexer/parser, module discovery) lives outside this crate;
//! it hands the core a [`Program`] built from these types. The shapes here
//! are the minimum the inference engine needs: literal type tags, variable /
//! attribute / call / operator expression forms, class and function
//! declarations, and enough control flow to determine reachability. Nothing
//! carries a type annotation — recovering types is the engine's job.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

use crate::error::CoreError;

/// Index of a module within a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

/// Stable identity of an expression, assigned by [`Program::finalize`].
///
/// Expression identities let the solver key per-variant dataflow nodes to
/// source expressions without relying on pointer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl ExprId {
    /// Sentinel for expressions not yet numbered by [`Program::finalize`].
    pub const UNASSIGNED: ExprId = ExprId(u32::MAX);
}

/// A stable source-location tag: module, line, column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub module: ModuleId,
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(module: ModuleId, line: u32, col: u32) -> Self {
        Self { module, line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}:{}:{}", self.module.0, self.line, self.col)
    }
}

/// Literal values, each carrying a statically-apparent type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinOp {
    /// Comparison and logical operators always produce a boolean.
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq | BinOp::And | BinOp::Or
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// An expression with its stable identity and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub id: ExprId,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            id: ExprId::UNASSIGNED,
            span,
        }
    }
}

/// Expression shapes understood by the constraint graph builder.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    /// Variable reference.
    Name(String),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Conditional expression: `then if cond else orelse`.
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// Direct call to a function, class constructor or builtin, optionally
    /// qualified with an imported module name (`"mod.func"`).
    Call {
        func: String,
        args: Vec<Expr>,
    },
    /// Method call through a receiver expression.
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// Attribute load.
    Attribute {
        object: Box<Expr>,
        attr: String,
    },
    /// Subscript load (`base[index]`).
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// List display. Each display is one container identity.
    List(Vec<Expr>),
    /// Dict display. Each display is one container identity.
    Dict(Vec<(Expr, Expr)>),
}

/// Assignment targets.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Symbol(String),
    Attribute { object: Expr, attr: String },
    Index { base: Expr, index: Expr },
}

/// Statement shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: AssignTarget,
        value: Expr,
        span: Span,
    },
    Expr(Expr),
    Return {
        value: Option<Expr>,
        span: Span,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Pass,
}

/// A function or method declaration. Methods take an explicit `self` as
/// their first parameter; `__init__` is the constructor body.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: SmallVec<[String; 4]>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// A class declaration with an ordered, possibly multiple, base list.
/// Instance fields are not declared; they are discovered from statically
/// visible `self.field = ...` stores in method bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub bases: Vec<String>,
    pub methods: Vec<FunctionDef>,
    pub span: Span,
}

/// One source module: imports, declarations, and top-level statement body.
/// The top-level body is the emitted entry code for the module's
/// translation unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    pub imports: Vec<String>,
    pub classes: Vec<ClassDef>,
    pub functions: Vec<FunctionDef>,
    pub body: Vec<Stmt>,
}

/// A whole program: the unit of analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub modules: Vec<Module>,
    expr_count: u32,
}

impl Program {
    pub fn new(modules: Vec<Module>) -> Self {
        Self { modules, expr_count: 0 }
    }

    /// Number of expressions numbered by [`Program::finalize`].
    pub fn expr_count(&self) -> u32 {
        self.expr_count
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    /// Assign stable expression identities and check structural
    /// well-formedness: duplicate module names, duplicate declarations
    /// within a module, imports of unknown modules.
    ///
    /// Must be called once before analysis; ordinary type uncertainty is
    /// never an error here.
    pub fn finalize(&mut self) -> Result<(), CoreError> {
        let names: Vec<String> = self.modules.iter().map(|m| m.name.clone()).collect();
        for (i, m) in self.modules.iter().enumerate() {
            if names.iter().take(i).any(|n| n == &m.name) {
                return Err(CoreError::MalformedProgram {
                    message: format!("duplicate module '{}'", m.name),
                    span: Span::new(ModuleId(i as u32), 0, 0),
                });
            }
            for imp in &m.imports {
                if !names.iter().any(|n| n == imp) {
                    return Err(CoreError::MalformedProgram {
                        message: format!("module '{}' imports unknown module '{}'", m.name, imp),
                        span: Span::new(ModuleId(i as u32), 0, 0),
                    });
                }
            }
            check_unique(m.functions.iter().map(|f| (&f.name, f.span)), "function")?;
            check_unique(m.classes.iter().map(|c| (&c.name, c.span)), "class")?;
            for class in &m.classes {
                check_unique(class.methods.iter().map(|f| (&f.name, f.span)), "method")?;
            }
        }

        let mut next = self.expr_count;
        for module in &mut self.modules {
            for stmt in &mut module.body {
                number_stmt(stmt, &mut next);
            }
            for func in &mut module.functions {
                for stmt in &mut func.body {
                    number_stmt(stmt, &mut next);
                }
            }
            for class in &mut module.classes {
                for method in &mut class.methods {
                    for stmt in &mut method.body {
                        number_stmt(stmt, &mut next);
                    }
                }
            }
        }
        self.expr_count = next;
        Ok(())
    }
}

fn check_unique<'a>(items: impl Iterator<Item = (&'a String, Span)>, what: &str) -> Result<(), CoreError> {
    let mut seen: Vec<&str> = Vec::new();
    for (name, span) in items {
        if seen.contains(&name.as_str()) {
            return Err(CoreError::MalformedProgram {
                message: format!("duplicate {} '{}'", what, name),
                span,
            });
        }
        seen.push(name);
    }
    Ok(())
}

fn number_stmt(stmt: &mut Stmt, next: &mut u32) {
    match stmt {
        Stmt::Assign { target, value, .. } => {
            match target {
                AssignTarget::Symbol(_) => {}
                AssignTarget::Attribute { object, .. } => number_expr(object, next),
                AssignTarget::Index { base, index } => {
                    number_expr(base, next);
                    number_expr(index, next);
                }
            }
            number_expr(value, next);
        }
        Stmt::Expr(e) => number_expr(e, next),
        Stmt::Return { value, .. } => {
            if let Some(e) = value {
                number_expr(e, next);
            }
        }
        Stmt::If {
            condition,
            then_body,
            else_body,
        } => {
            number_expr(condition, next);
            for s in then_body {
                number_stmt(s, next);
            }
            if let Some(else_stmts) = else_body {
                for s in else_stmts {
                    number_stmt(s, next);
                }
            }
        }
        Stmt::While { condition, body } => {
            number_expr(condition, next);
            for s in body {
                number_stmt(s, next);
            }
        }
        Stmt::For { iter, body, .. } => {
            number_expr(iter, next);
            for s in body {
                number_stmt(s, next);
            }
        }
        Stmt::Pass => {}
    }
}

fn number_expr(expr: &mut Expr, next: &mut u32) {
    expr.id = ExprId(*next);
    *next += 1;
    match &mut expr.kind {
        ExprKind::Literal(_) | ExprKind::Name(_) => {}
        ExprKind::Binary { left, right, .. } => {
            number_expr(left, next);
            number_expr(right, next);
        }
        ExprKind::Unary { operand, .. } => number_expr(operand, next),
        ExprKind::Ternary { cond, then, orelse } => {
            number_expr(cond, next);
            number_expr(then, next);
            number_expr(orelse, next);
        }
        ExprKind::Call { args, .. } => {
            for a in args {
                number_expr(a, next);
            }
        }
        ExprKind::MethodCall { object, args, .. } => {
            number_expr(object, next);
            for a in args {
                number_expr(a, next);
            }
        }
        ExprKind::Attribute { object, .. } => number_expr(object, next),
        ExprKind::Index { base, index } => {
            number_expr(base, next);
            number_expr(index, next);
        }
        ExprKind::List(elems) => {
            for e in elems {
                number_expr(e, next);
            }
        }
        ExprKind::Dict(items) => {
            for (k, v) in items {
                number_expr(k, next);
                number_expr(v, next);
            }
        }
    }
}
