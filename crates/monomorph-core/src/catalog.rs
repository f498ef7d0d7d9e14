//! Type lattice and class catalog.
//!
//! Built once from the program's static declarations plus a fixed table of
//! builtin operator/method signatures, then immutable for the whole solve.
//! Attribute resolution walks an explicit linearization over the declared
//! base-class lists (depth-first with de-duplication) — never a host
//! language inheritance mechanism.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::hir::{AssignTarget, BinOp, ClassDef, ExprKind, FunctionDef, ModuleId, Program, Stmt, UnaryOp};
use crate::types::{ClassId, TypeSet, TypeTag};

/// Identity of a function or method declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FuncId(pub u32);

/// Where a function's AST lives inside the [`Program`].
#[derive(Debug, Clone, Copy)]
enum FuncLocator {
    TopLevel { module: ModuleId, index: usize },
    Method { module: ModuleId, class: usize, method: usize },
}

/// A registered function or method.
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub module: ModuleId,
    /// Declaring class for methods.
    pub class: Option<ClassId>,
    locator: FuncLocator,
}

/// A user class: identity, ordered base list, attribute tables, and the
/// precomputed resolution order.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    pub name: String,
    pub module: ModuleId,
    pub bases: Vec<ClassId>,
    /// All transitive subclasses; answers "who could this dispatch reach".
    pub subclasses: IndexSet<ClassId>,
    /// Attribute resolution order: the class itself first, then bases
    /// depth-first with duplicates removed.
    pub linearization: Vec<ClassId>,
    /// Field names discovered from statically visible `self.f = ...`
    /// stores in this class's own methods.
    pub fields: IndexSet<String>,
    /// Methods declared directly on this class.
    pub methods: IndexMap<String, FuncId>,
}

/// A name visible at module scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolEntry {
    Class(ClassId),
    Func(FuncId),
}

/// Result of resolving an attribute on one concrete class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrResolution {
    /// A field slot, keyed by the class that declares it so subclasses
    /// inheriting the field share one slot node.
    Field { owner: ClassId },
    Method(FuncId),
}

/// Builtin free functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    Len,
    Range,
    Print,
    Str,
    Int,
    Float,
    Bool,
    Abs,
    Min,
    Max,
}

/// Builtin methods on primitive and container receivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMethod {
    ListAppend,
    ListPop,
    ListClear,
    ListReverse,
    DictGet,
    DictClear,
    StrUpper,
    StrLower,
    StrStrip,
    StrSplit,
    StrFind,
    StrStartswith,
}

/// Outcome of a binary-operator signature lookup for one tag pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryResolution {
    /// Resolves to these result tags.
    Tags(SmallVec<[TypeTag; 2]>),
    /// Left operand is a user class; resolve through its operator method.
    ClassOperator { class: ClassId, method: &'static str },
    /// No signature for this combination. Not an error: the combination
    /// simply contributes no types, so mixed sets stay precise along the
    /// paths that do resolve.
    NoSignature,
}

/// The immutable class catalog and builtin fact base.
#[derive(Debug)]
pub struct Catalog {
    classes: Vec<ClassDescriptor>,
    funcs: Vec<FuncDecl>,
    /// Per-module name tables.
    symbols: Vec<IndexMap<String, SymbolEntry>>,
    /// Per-module resolved import lists.
    imports: Vec<Vec<(String, ModuleId)>>,
}

impl Catalog {
    /// Build the catalog from all static declarations. Fails with
    /// [`CoreError::MalformedProgram`] on unknown base classes or
    /// inheritance cycles; type uncertainty is not an error here.
    pub fn build(program: &Program) -> Result<Self, CoreError> {
        let mut catalog = Catalog {
            classes: Vec::new(),
            funcs: Vec::new(),
            symbols: vec![IndexMap::new(); program.modules.len()],
            imports: vec![Vec::new(); program.modules.len()],
        };

        // Pass 1: register every class and top-level function so bases and
        // qualified references can resolve regardless of declaration order.
        for (m, module) in program.modules.iter().enumerate() {
            let module_id = ModuleId(m as u32);
            for (c, class) in module.classes.iter().enumerate() {
                let class_id = ClassId(catalog.classes.len() as u32);
                catalog.classes.push(ClassDescriptor {
                    name: class.name.clone(),
                    module: module_id,
                    bases: Vec::new(),
                    subclasses: IndexSet::new(),
                    linearization: Vec::new(),
                    fields: IndexSet::new(),
                    methods: IndexMap::new(),
                });
                catalog.symbols[m].insert(class.name.clone(), SymbolEntry::Class(class_id));
                for (i, method) in class.methods.iter().enumerate() {
                    let func_id = FuncId(catalog.funcs.len() as u32);
                    catalog.funcs.push(FuncDecl {
                        name: method.name.clone(),
                        module: module_id,
                        class: Some(class_id),
                        locator: FuncLocator::Method {
                            module: module_id,
                            class: c,
                            method: i,
                        },
                    });
                    catalog.classes[class_id.0 as usize].methods.insert(method.name.clone(), func_id);
                }
            }
            for (i, func) in module.functions.iter().enumerate() {
                let func_id = FuncId(catalog.funcs.len() as u32);
                catalog.funcs.push(FuncDecl {
                    name: func.name.clone(),
                    module: module_id,
                    class: None,
                    locator: FuncLocator::TopLevel { module: module_id, index: i },
                });
                if catalog.symbols[m].contains_key(&func.name) {
                    return Err(CoreError::MalformedProgram {
                        message: format!("'{}' declared as both class and function", func.name),
                        span: func.span,
                    });
                }
                catalog.symbols[m].insert(func.name.clone(), SymbolEntry::Func(func_id));
            }
            for import in &module.imports {
                let target = program
                    .modules
                    .iter()
                    .position(|other| &other.name == import)
                    .expect("imports validated by Program::finalize");
                catalog.imports[m].push((import.clone(), ModuleId(target as u32)));
            }
        }

        // Pass 2: resolve base lists.
        for (m, module) in program.modules.iter().enumerate() {
            for class in &module.classes {
                let class_id = catalog.expect_class(ModuleId(m as u32), &class.name);
                let mut bases = Vec::new();
                for base in &class.bases {
                    match catalog.lookup_symbol(ModuleId(m as u32), base) {
                        Some(SymbolEntry::Class(base_id)) => bases.push(base_id),
                        _ => {
                            return Err(CoreError::MalformedProgram {
                                message: format!("class '{}' has unknown base '{}'", class.name, base),
                                span: class.span,
                            });
                        }
                    }
                }
                catalog.classes[class_id.0 as usize].bases = bases;
            }
        }

        // Pass 3: linearize, then invert into subclass sets.
        for id in 0..catalog.classes.len() {
            let class_id = ClassId(id as u32);
            let mut order = Vec::new();
            let mut visiting = Vec::new();
            catalog.linearize(class_id, &mut order, &mut visiting, program)?;
            catalog.classes[id].linearization = order;
        }
        for id in 0..catalog.classes.len() {
            let class_id = ClassId(id as u32);
            let ancestors: Vec<ClassId> = catalog.classes[id].linearization[1..].to_vec();
            for ancestor in ancestors {
                catalog.classes[ancestor.0 as usize].subclasses.insert(class_id);
            }
        }

        // Pass 4: discover fields from statically visible self-stores.
        for (m, module) in program.modules.iter().enumerate() {
            for class in &module.classes {
                let class_id = catalog.expect_class(ModuleId(m as u32), &class.name);
                let mut fields = IndexSet::new();
                for method in &class.methods {
                    collect_self_fields(&method.body, &mut fields);
                }
                catalog.classes[class_id.0 as usize].fields = fields;
            }
        }

        Ok(catalog)
    }

    fn expect_class(&self, module: ModuleId, name: &str) -> ClassId {
        match self.symbols[module.0 as usize].get(name) {
            Some(SymbolEntry::Class(id)) => *id,
            _ => unreachable!("class registered in pass 1"),
        }
    }

    fn linearize(
        &mut self,
        class: ClassId,
        order: &mut Vec<ClassId>,
        visiting: &mut Vec<ClassId>,
        program: &Program,
    ) -> Result<(), CoreError> {
        if visiting.contains(&class) {
            let desc = &self.classes[class.0 as usize];
            let def = class_def(program, desc);
            return Err(CoreError::MalformedProgram {
                message: format!("inheritance cycle through class '{}'", desc.name),
                span: def.span,
            });
        }
        if order.contains(&class) {
            return Ok(());
        }
        order.push(class);
        visiting.push(class);
        let bases = self.classes[class.0 as usize].bases.clone();
        for base in bases {
            self.linearize(base, order, visiting, program)?;
        }
        visiting.pop();
        Ok(())
    }

    pub fn class(&self, id: ClassId) -> &ClassDescriptor {
        &self.classes[id.0 as usize]
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn func(&self, id: FuncId) -> &FuncDecl {
        &self.funcs[id.0 as usize]
    }

    pub fn num_funcs(&self) -> usize {
        self.funcs.len()
    }

    pub fn func_ids(&self) -> impl Iterator<Item = FuncId> {
        (0..self.funcs.len() as u32).map(FuncId)
    }

    /// Borrow a function's AST out of the program.
    pub fn func_def<'p>(&self, program: &'p Program, id: FuncId) -> &'p FunctionDef {
        match self.funcs[id.0 as usize].locator {
            FuncLocator::TopLevel { module, index } => &program.module(module).functions[index],
            FuncLocator::Method { module, class, method } => &program.module(module).classes[class].methods[method],
        }
    }

    /// Resolve a plain or `mod.name`-qualified symbol from a module scope.
    pub fn lookup_symbol(&self, module: ModuleId, name: &str) -> Option<SymbolEntry> {
        if let Some((qualifier, rest)) = name.split_once('.') {
            let target = self.imports[module.0 as usize]
                .iter()
                .find(|(alias, _)| alias == qualifier)
                .map(|(_, id)| *id)?;
            return self.symbols[target.0 as usize].get(rest).copied();
        }
        self.symbols[module.0 as usize].get(name).copied()
    }

    /// Resolve an attribute on one concrete class by walking its
    /// linearization.
    pub fn resolve_attr(&self, class: ClassId, attr: &str) -> Option<AttrResolution> {
        for &candidate in &self.classes[class.0 as usize].linearization {
            let desc = &self.classes[candidate.0 as usize];
            if let Some(&func) = desc.methods.get(attr) {
                return Some(AttrResolution::Method(func));
            }
            if desc.fields.contains(attr) {
                return Some(AttrResolution::Field { owner: candidate });
            }
        }
        None
    }

    /// Per-class attribute resolution over a whole receiver set. Classes
    /// lacking the attribute come back as `None`; the caller records the
    /// hard `UnresolvedAttribute` diagnostic.
    pub fn classes_of(&self, set: &TypeSet, attr: &str) -> Vec<(ClassId, Option<AttrResolution>)> {
        set.iter()
            .filter_map(|tag| match tag {
                TypeTag::Object(class) => Some((class, self.resolve_attr(class, attr))),
                _ => None,
            })
            .collect()
    }

    /// Subtype check over the explicit class graph.
    pub fn is_subtype(&self, a: ClassId, b: ClassId) -> bool {
        self.classes[a.0 as usize].linearization.contains(&b)
    }

    /// The constructor body a class instantiation runs, if any class in
    /// the linearization declares one.
    pub fn constructor(&self, class: ClassId) -> Option<FuncId> {
        match self.resolve_attr(class, "__init__") {
            Some(AttrResolution::Method(func)) => Some(func),
            _ => None,
        }
    }

    /// Builtin free-function lookup. User declarations shadow builtins.
    pub fn builtin_fn(name: &str) -> Option<BuiltinFn> {
        Some(match name {
            "len" => BuiltinFn::Len,
            "range" => BuiltinFn::Range,
            "print" => BuiltinFn::Print,
            "str" => BuiltinFn::Str,
            "int" => BuiltinFn::Int,
            "float" => BuiltinFn::Float,
            "bool" => BuiltinFn::Bool,
            "abs" => BuiltinFn::Abs,
            "min" => BuiltinFn::Min,
            "max" => BuiltinFn::Max,
            _ => return None,
        })
    }

    /// Builtin method lookup for one receiver tag.
    pub fn builtin_method(receiver: TypeTag, name: &str) -> Option<BuiltinMethod> {
        Some(match (receiver, name) {
            (TypeTag::List(_), "append") => BuiltinMethod::ListAppend,
            (TypeTag::List(_), "pop") => BuiltinMethod::ListPop,
            (TypeTag::List(_), "clear") => BuiltinMethod::ListClear,
            (TypeTag::List(_), "reverse") => BuiltinMethod::ListReverse,
            (TypeTag::Dict(_), "get") => BuiltinMethod::DictGet,
            (TypeTag::Dict(_), "clear") => BuiltinMethod::DictClear,
            (TypeTag::Str, "upper") => BuiltinMethod::StrUpper,
            (TypeTag::Str, "lower") => BuiltinMethod::StrLower,
            (TypeTag::Str, "strip") => BuiltinMethod::StrStrip,
            (TypeTag::Str, "split") => BuiltinMethod::StrSplit,
            (TypeTag::Str, "find") => BuiltinMethod::StrFind,
            (TypeTag::Str, "startswith") => BuiltinMethod::StrStartswith,
            _ => return None,
        })
    }

    /// Operator method name for class operands.
    pub fn operator_method(op: BinOp) -> Option<&'static str> {
        Some(match op {
            BinOp::Add => "__add__",
            BinOp::Sub => "__sub__",
            BinOp::Mul => "__mul__",
            BinOp::Div => "__div__",
            BinOp::FloorDiv => "__floordiv__",
            BinOp::Mod => "__mod__",
            _ => return None,
        })
    }

    /// Binary-operator signature lookup for one concrete tag pair.
    pub fn binary_result(&self, op: BinOp, left: TypeTag, right: TypeTag) -> BinaryResolution {
        use TypeTag::*;

        // Comparisons and logical operators always produce a boolean.
        if op.is_boolean() {
            return BinaryResolution::Tags(SmallVec::from_slice(&[Bool]));
        }

        if let Object(class) = left {
            return match Self::operator_method(op) {
                Some(method) => BinaryResolution::ClassOperator { class, method },
                Option::None => BinaryResolution::NoSignature,
            };
        }

        let tags: &[TypeTag] = match (op, left, right) {
            (BinOp::Div, a, b) if a.is_numeric() && b.is_numeric() => &[Float],
            (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FloorDiv | BinOp::Mod, Int, Int) => &[Int],
            (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::FloorDiv | BinOp::Mod, a, b)
                if a.is_numeric() && b.is_numeric() =>
            {
                &[Float]
            }
            (BinOp::Add, Str, Str) => &[Str],
            (BinOp::Add, List(a), List(b)) => {
                return BinaryResolution::Tags(SmallVec::from_slice(&[List(a), List(b)]));
            }
            _ => return BinaryResolution::NoSignature,
        };
        BinaryResolution::Tags(SmallVec::from_slice(tags))
    }

    /// Unary-operator signature lookup.
    pub fn unary_result(&self, op: UnaryOp, operand: TypeTag) -> Option<TypeTag> {
        match (op, operand) {
            (UnaryOp::Not, _) => Some(TypeTag::Bool),
            (UnaryOp::Neg, TypeTag::Int) => Some(TypeTag::Int),
            (UnaryOp::Neg, TypeTag::Float) => Some(TypeTag::Float),
            _ => None,
        }
    }
}

fn class_def<'p>(program: &'p Program, desc: &ClassDescriptor) -> &'p ClassDef {
    program
        .module(desc.module)
        .classes
        .iter()
        .find(|c| c.name == desc.name)
        .expect("descriptor built from this module")
}

fn collect_self_fields(body: &[Stmt], fields: &mut IndexSet<String>) {
    for stmt in body {
        match stmt {
            Stmt::Assign {
                target: AssignTarget::Attribute { object, attr },
                ..
            } => {
                if matches!(&object.kind, ExprKind::Name(name) if name == "self") {
                    fields.insert(attr.clone());
                }
            }
            Stmt::If {
                then_body, else_body, ..
            } => {
                collect_self_fields(then_body, fields);
                if let Some(else_stmts) = else_body {
                    collect_self_fields(else_stmts, fields);
                }
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => collect_self_fields(body, fields),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{Expr, Literal, Module, Span};
    use smallvec::smallvec;

    fn sp() -> Span {
        Span::new(ModuleId(0), 1, 1)
    }

    fn method(name: &str, body: Vec<Stmt>) -> FunctionDef {
        let mut params: SmallVec<[String; 4]> = smallvec!["self".to_string()];
        if name == "__init__" {
            params.push("value".to_string());
        }
        FunctionDef {
            name: name.to_string(),
            params,
            body,
            span: sp(),
        }
    }

    fn self_store(field: &str) -> Stmt {
        Stmt::Assign {
            target: AssignTarget::Attribute {
                object: Expr::new(ExprKind::Name("self".to_string()), sp()),
                attr: field.to_string(),
            },
            value: Expr::new(ExprKind::Literal(Literal::Int(0)), sp()),
            span: sp(),
        }
    }

    fn class(name: &str, bases: &[&str], methods: Vec<FunctionDef>) -> ClassDef {
        ClassDef {
            name: name.to_string(),
            bases: bases.iter().map(|b| b.to_string()).collect(),
            methods,
            span: sp(),
        }
    }

    fn build(classes: Vec<ClassDef>) -> Catalog {
        let mut program = Program::new(vec![Module {
            name: "main".to_string(),
            imports: vec![],
            classes,
            functions: vec![],
            body: vec![],
        }]);
        program.finalize().unwrap();
        Catalog::build(&program).unwrap()
    }

    #[test]
    fn test_linearization_depth_first_with_dedup() {
        // D(B, C), B(A), C(A): resolution order D, B, A, C.
        let catalog = build(vec![
            class("A", &[], vec![]),
            class("B", &["A"], vec![]),
            class("C", &["A"], vec![]),
            class("D", &["B", "C"], vec![]),
        ]);
        let d = match catalog.lookup_symbol(ModuleId(0), "D").unwrap() {
            SymbolEntry::Class(id) => id,
            _ => panic!(),
        };
        let names: Vec<&str> = catalog.class(d).linearization.iter().map(|&c| catalog.class(c).name.as_str()).collect();
        assert_eq!(names, vec!["D", "B", "A", "C"]);
    }

    #[test]
    fn test_override_resolves_before_base() {
        let catalog = build(vec![
            class("Animal", &[], vec![method("speak", vec![])]),
            class("Dog", &["Animal"], vec![method("speak", vec![])]),
        ]);
        let dog = match catalog.lookup_symbol(ModuleId(0), "Dog").unwrap() {
            SymbolEntry::Class(id) => id,
            _ => panic!(),
        };
        let resolved = catalog.resolve_attr(dog, "speak").unwrap();
        let AttrResolution::Method(func) = resolved else {
            panic!("expected method");
        };
        assert_eq!(catalog.func(func).class.map(|c| catalog.class(c).name.clone()), Some("Dog".to_string()));
    }

    #[test]
    fn test_inherited_field_shares_declaring_class_slot() {
        let catalog = build(vec![
            class("Animal", &[], vec![method("__init__", vec![self_store("name")])]),
            class("Dog", &["Animal"], vec![]),
        ]);
        let (animal, dog) = (
            match catalog.lookup_symbol(ModuleId(0), "Animal").unwrap() {
                SymbolEntry::Class(id) => id,
                _ => panic!(),
            },
            match catalog.lookup_symbol(ModuleId(0), "Dog").unwrap() {
                SymbolEntry::Class(id) => id,
                _ => panic!(),
            },
        );
        assert_eq!(catalog.resolve_attr(dog, "name"), Some(AttrResolution::Field { owner: animal }));
        assert!(catalog.is_subtype(dog, animal));
        assert!(!catalog.is_subtype(animal, dog));
        assert!(catalog.class(animal).subclasses.contains(&dog));
    }

    #[test]
    fn test_missing_attribute_is_reported_per_class() {
        let catalog = build(vec![
            class("A", &[], vec![method("go", vec![])]),
            class("B", &[], vec![]),
        ]);
        let (a, b) = (
            match catalog.lookup_symbol(ModuleId(0), "A").unwrap() {
                SymbolEntry::Class(id) => id,
                _ => panic!(),
            },
            match catalog.lookup_symbol(ModuleId(0), "B").unwrap() {
                SymbolEntry::Class(id) => id,
                _ => panic!(),
            },
        );
        let set = TypeSet::from_tags(&[TypeTag::Object(a), TypeTag::Object(b), TypeTag::Int]);
        let resolved = catalog.classes_of(&set, "go");
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().any(|(c, r)| *c == a && r.is_some()));
        assert!(resolved.iter().any(|(c, r)| *c == b && r.is_none()));
    }

    #[test]
    fn test_inheritance_cycle_is_malformed() {
        let mut program = Program::new(vec![Module {
            name: "main".to_string(),
            imports: vec![],
            classes: vec![class("A", &["B"], vec![]), class("B", &["A"], vec![])],
            functions: vec![],
            body: vec![],
        }]);
        program.finalize().unwrap();
        let err = Catalog::build(&program).unwrap_err();
        assert!(matches!(err, CoreError::MalformedProgram { .. }));
    }

    #[test]
    fn test_binary_signatures() {
        let catalog = build(vec![]);
        assert_eq!(
            catalog.binary_result(BinOp::Add, TypeTag::Int, TypeTag::Int),
            BinaryResolution::Tags(SmallVec::from_slice(&[TypeTag::Int]))
        );
        assert_eq!(
            catalog.binary_result(BinOp::Add, TypeTag::Int, TypeTag::Float),
            BinaryResolution::Tags(SmallVec::from_slice(&[TypeTag::Float]))
        );
        assert_eq!(
            catalog.binary_result(BinOp::Div, TypeTag::Int, TypeTag::Int),
            BinaryResolution::Tags(SmallVec::from_slice(&[TypeTag::Float]))
        );
        assert_eq!(
            catalog.binary_result(BinOp::Add, TypeTag::Str, TypeTag::Int),
            BinaryResolution::NoSignature
        );
        assert_eq!(
            catalog.binary_result(BinOp::Lt, TypeTag::Str, TypeTag::Str),
            BinaryResolution::Tags(SmallVec::from_slice(&[TypeTag::Bool]))
        );
    }

    #[test]
    fn test_builtin_lookups() {
        assert_eq!(Catalog::builtin_fn("len"), Some(BuiltinFn::Len));
        assert_eq!(Catalog::builtin_fn("nope"), None);
        assert_eq!(
            Catalog::builtin_method(TypeTag::List(crate::types::SiteId(0)), "append"),
            Some(BuiltinMethod::ListAppend)
        );
        assert_eq!(Catalog::builtin_method(TypeTag::Str, "append"), None);
    }
}
