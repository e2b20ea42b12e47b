//! Monomorphization engine.
//!
//! Generic functions and structs are instantiated on demand: a call or type
//! reference supplying concrete type arguments requests an instantiation,
//! the engine mangles the name (`Generic<T1, T2>` → `Generic_T1_T2`) and
//! remembers the `(declaration, type-args)` pair so each combination is
//! emitted exactly once. During emission of a monomorphized body the active
//! `(type_params, type_args)` pair is pushed as a context frame; every type
//! query substitutes through the top frame and the previous context is
//! restored on exit.

use std::collections::HashSet;

use crate::parser::ast::{
    Block, Declaration, Expression, ForIterable, Pattern, Program, SizeofArg, Statement, TypeName,
};

/// Mangled spelling of one type argument. Pointer arguments become
/// `ptr_Inner`; compound arguments flatten recursively.
pub fn mangle_type(ty: &TypeName) -> String {
    match ty {
        TypeName::Named {
            name, type_args, ..
        } => {
            if type_args.is_empty() {
                name.clone()
            } else {
                mangle_name(name, type_args)
            }
        }
        TypeName::Pointer { inner, .. } => format!("ptr_{}", mangle_type(inner)),
        TypeName::Array { element, size, .. } => match size.literal() {
            Some(n) => format!("arr{n}_{}", mangle_type(element)),
            None => format!("arr_{}", mangle_type(element)),
        },
        TypeName::Slice { element, .. } => format!("slice_{}", mangle_type(element)),
        TypeName::Tuple(items, _) => {
            let inner = items.iter().map(mangle_type).collect::<Vec<_>>().join("_");
            format!("tuple_{inner}")
        }
        TypeName::Fn { .. } => "fnptr".to_string(),
        TypeName::ErrorUnion { payload, .. } => format!("err_{}", mangle_type(payload)),
        TypeName::Atomic { inner, .. } => mangle_type(inner),
    }
}

/// `Generic<T1, T2, ...>` → `Generic_T1_T2_...`. Deterministic: the same
/// declaration and argument list always produce the same bytes.
pub fn mangle_name(base: &str, type_args: &[TypeName]) -> String {
    if type_args.is_empty() {
        return base.to_string();
    }
    let suffix = type_args
        .iter()
        .map(mangle_type)
        .collect::<Vec<_>>()
        .join("_");
    format!("{base}_{suffix}")
}

/// Reverse lookup: given a monomorphized name such as `Container_i32` or
/// `Pair_i32_i64`, find the generic declaration it came from. The tail is
/// stripped at each `_` whose following token looks like a type (a base
/// type, `ptr_...`, or a capitalized user type); the first prefix that
/// names a known generic wins.
pub fn generic_base_of<'a, F>(mono_name: &'a str, is_known_generic: F) -> Option<&'a str>
where
    F: Fn(&str) -> bool,
{
    for (idx, _) in mono_name.match_indices('_') {
        let after = &mono_name[idx + 1..];
        let first = after.split('_').next().unwrap_or("");
        let looks_like_type = TypeName::is_base_type_name(first)
            || first == "ptr"
            || first.chars().next().is_some_and(|c| c.is_ascii_uppercase());
        if !looks_like_type {
            continue;
        }
        let prefix = &mono_name[..idx];
        if is_known_generic(prefix) {
            return Some(prefix);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonoKind {
    Function,
    Struct,
}

/// One requested instantiation.
#[derive(Debug, Clone, PartialEq)]
pub struct MonoRequest {
    pub kind: MonoKind,
    pub generic_name: String,
    pub mangled: String,
    pub type_args: Vec<TypeName>,
}

/// Active substitution frame while a monomorphized body is being emitted.
#[derive(Debug, Clone)]
pub struct MonoFrame {
    pub type_params: Vec<String>,
    pub type_args: Vec<TypeName>,
}

#[derive(Debug, Default)]
pub struct MonoEngine {
    requests: Vec<MonoRequest>,
    seen: HashSet<String>,
    context: Vec<MonoFrame>,
}

impl MonoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an instantiation request and return its mangled name. Repeated
    /// requests for the same `(decl, type-args)` pair return the same name
    /// without queuing a second copy.
    pub fn request(&mut self, kind: MonoKind, generic_name: &str, type_args: &[TypeName]) -> String {
        let mangled = mangle_name(generic_name, type_args);
        if self.seen.insert(mangled.clone()) {
            self.requests.push(MonoRequest {
                kind,
                generic_name: generic_name.to_string(),
                mangled: mangled.clone(),
                type_args: type_args.to_vec(),
            });
        }
        mangled
    }

    /// Whether an instantiation by this mangled name has been requested.
    pub fn knows(&self, mangled: &str) -> bool {
        self.seen.contains(mangled)
    }

    /// Instantiations in request order. Emission drains this queue, which
    /// may grow while bodies are emitted (an instantiation can request
    /// further instantiations).
    pub fn requests(&self) -> &[MonoRequest] {
        &self.requests
    }

    pub fn request_at(&self, index: usize) -> Option<MonoRequest> {
        self.requests.get(index).cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn push_context(&mut self, type_params: Vec<String>, type_args: Vec<TypeName>) {
        self.context.push(MonoFrame {
            type_params,
            type_args,
        });
    }

    pub fn pop_context(&mut self) {
        self.context.pop();
    }

    pub fn in_generic_context(&self) -> bool {
        !self.context.is_empty()
    }

    /// Substitute type parameters of the innermost context frame, rebuilding
    /// compound types around substituted leaves. Attributes (borrow flag,
    /// array size expression) are preserved.
    pub fn substitute(&self, ty: &TypeName) -> TypeName {
        let Some(frame) = self.context.last() else {
            return ty.clone();
        };
        substitute_in(ty, &frame.type_params, &frame.type_args)
    }
}

pub fn substitute_in(ty: &TypeName, params: &[String], args: &[TypeName]) -> TypeName {
    match ty {
        TypeName::Named {
            name,
            type_args,
            position,
        } => {
            if type_args.is_empty() {
                if let Some(i) = params.iter().position(|p| p == name) {
                    if let Some(replacement) = args.get(i) {
                        return replacement.clone();
                    }
                }
                ty.clone()
            } else {
                TypeName::Named {
                    name: name.clone(),
                    type_args: type_args
                        .iter()
                        .map(|a| substitute_in(a, params, args))
                        .collect(),
                    position: position.clone(),
                }
            }
        }
        TypeName::Pointer {
            inner,
            borrowed,
            position,
        } => TypeName::Pointer {
            inner: Box::new(substitute_in(inner, params, args)),
            borrowed: *borrowed,
            position: position.clone(),
        },
        TypeName::Array {
            element,
            size,
            position,
        } => TypeName::Array {
            element: Box::new(substitute_in(element, params, args)),
            size: size.clone(),
            position: position.clone(),
        },
        TypeName::Slice { element, position } => TypeName::Slice {
            element: Box::new(substitute_in(element, params, args)),
            position: position.clone(),
        },
        TypeName::Tuple(items, position) => TypeName::Tuple(
            items
                .iter()
                .map(|i| substitute_in(i, params, args))
                .collect(),
            position.clone(),
        ),
        TypeName::Fn {
            params: fn_params,
            return_type,
            position,
        } => TypeName::Fn {
            params: fn_params
                .iter()
                .map(|p| substitute_in(p, params, args))
                .collect(),
            return_type: Box::new(substitute_in(return_type, params, args)),
            position: position.clone(),
        },
        TypeName::ErrorUnion { payload, position } => TypeName::ErrorUnion {
            payload: Box::new(substitute_in(payload, params, args)),
            position: position.clone(),
        },
        TypeName::Atomic { inner, position } => TypeName::Atomic {
            inner: Box::new(substitute_in(inner, params, args)),
            position: position.clone(),
        },
    }
}

/// Walk the whole program and queue every generic instantiation it demands:
/// explicit type references (`Container<i32>`), call-site type arguments
/// (`id<i32>(x)`), and struct literals with type arguments. Each newly
/// requested declaration is walked in turn under its substitution frame so
/// nested instantiations are found until the queue is stable.
pub fn discover(program: &Program, engine: &mut MonoEngine) {
    for decl in &program.declarations {
        match decl {
            Declaration::Function(f) | Declaration::Extern(f) => {
                if f.is_generic() {
                    continue;
                }
                for param in &f.params {
                    walk_type(program, engine, &param.type_name);
                }
                walk_type(program, engine, &f.return_type);
                if let Some(body) = &f.body {
                    walk_block(program, engine, body);
                }
            }
            Declaration::Struct(s) => {
                if s.is_generic() {
                    continue;
                }
                for field in &s.fields {
                    walk_type(program, engine, &field.type_name);
                }
                for method in &s.methods {
                    if let Some(body) = &method.body {
                        walk_block(program, engine, body);
                    }
                }
            }
            Declaration::Impl(block) => {
                for method in &block.methods {
                    if let Some(body) = &method.body {
                        walk_block(program, engine, body);
                    }
                }
            }
            Declaration::MethodBlock(block) => {
                for method in &block.methods {
                    if let Some(body) = &method.body {
                        walk_block(program, engine, body);
                    }
                }
            }
            Declaration::TestBlock(t) => walk_block(program, engine, &t.body),
            Declaration::Global(var) => {
                if let Some(ty) = &var.type_name {
                    walk_type(program, engine, ty);
                }
                if let Some(init) = &var.init {
                    walk_expr(program, engine, init);
                }
            }
            Declaration::Enum(_) | Declaration::Error(_) => {}
        }
    }
}

fn request_and_walk(
    program: &Program,
    engine: &mut MonoEngine,
    kind: MonoKind,
    name: &str,
    type_args: &[TypeName],
) {
    let args: Vec<TypeName> = type_args.iter().map(|a| engine.substitute(a)).collect();
    let before = engine.request_count();
    engine.request(kind, name, &args);
    if engine.request_count() == before {
        return;
    }

    // newly requested: walk the generic declaration under its frame to find
    // nested instantiations
    match kind {
        MonoKind::Function => {
            if let Some(decl) = program.find_function(name) {
                engine.push_context(decl.type_params.clone(), args);
                for param in &decl.params {
                    let ty = engine.substitute(&param.type_name);
                    walk_type(program, engine, &ty);
                }
                let ret = engine.substitute(&decl.return_type);
                walk_type(program, engine, &ret);
                if let Some(body) = &decl.body {
                    walk_block(program, engine, body);
                }
                engine.pop_context();
            }
        }
        MonoKind::Struct => {
            if let Some(decl) = program.find_struct(name) {
                engine.push_context(decl.type_params.clone(), args);
                for field in &decl.fields {
                    let ty = engine.substitute(&field.type_name);
                    walk_type(program, engine, &ty);
                }
                for method in &decl.methods {
                    if let Some(body) = &method.body {
                        walk_block(program, engine, body);
                    }
                }
                if let Some(block) = program.method_block_for(name) {
                    for method in &block.methods {
                        if let Some(body) = &method.body {
                            walk_block(program, engine, body);
                        }
                    }
                }
                engine.pop_context();
            }
        }
    }
}

fn walk_type(program: &Program, engine: &mut MonoEngine, ty: &TypeName) {
    match ty {
        TypeName::Named {
            name, type_args, ..
        } => {
            if !type_args.is_empty() && program.find_struct(name).is_some() {
                request_and_walk(program, engine, MonoKind::Struct, name, type_args);
            }
            for arg in type_args {
                walk_type(program, engine, arg);
            }
        }
        TypeName::Pointer { inner, .. } | TypeName::Atomic { inner, .. } => {
            walk_type(program, engine, inner)
        }
        TypeName::Array { element, .. } | TypeName::Slice { element, .. } => {
            walk_type(program, engine, element)
        }
        TypeName::Tuple(items, _) => {
            for item in items {
                walk_type(program, engine, item);
            }
        }
        TypeName::Fn {
            params,
            return_type,
            ..
        } => {
            for param in params {
                walk_type(program, engine, param);
            }
            walk_type(program, engine, return_type);
        }
        TypeName::ErrorUnion { payload, .. } => walk_type(program, engine, payload),
    }
}

fn walk_block(program: &Program, engine: &mut MonoEngine, block: &Block) {
    for stmt in &block.statements {
        walk_stmt(program, engine, stmt);
    }
}

fn walk_stmt(program: &Program, engine: &mut MonoEngine, stmt: &Statement) {
    match stmt {
        Statement::VarDecl(decl) => {
            if let Some(ty) = &decl.type_name {
                let ty = engine.substitute(ty);
                walk_type(program, engine, &ty);
            }
            if let Some(init) = &decl.init {
                walk_expr(program, engine, init);
            }
        }
        Statement::Return(ret) => {
            if let Some(expr) = &ret.expr {
                walk_expr(program, engine, expr);
            }
        }
        Statement::If(stmt) => {
            walk_expr(program, engine, &stmt.condition);
            walk_block(program, engine, &stmt.then_branch);
            if let Some(else_branch) = &stmt.else_branch {
                walk_stmt(program, engine, else_branch);
            }
        }
        Statement::While(stmt) => {
            walk_expr(program, engine, &stmt.condition);
            walk_block(program, engine, &stmt.body);
        }
        Statement::For(stmt) => {
            match &stmt.iterable {
                ForIterable::Value(expr) => walk_expr(program, engine, expr),
                ForIterable::Range(start, end) => {
                    walk_expr(program, engine, start);
                    walk_expr(program, engine, end);
                }
            }
            walk_block(program, engine, &stmt.body);
        }
        Statement::Defer(stmt) => walk_block(program, engine, &stmt.body),
        Statement::ErrDefer(stmt) => walk_block(program, engine, &stmt.body),
        Statement::Block(block) => walk_block(program, engine, block),
        Statement::Expression(expr) => walk_expr(program, engine, expr),
        Statement::Break(_) | Statement::Continue(_) => {}
    }
}

fn walk_expr(program: &Program, engine: &mut MonoEngine, expr: &Expression) {
    match expr {
        Expression::Call(call) => {
            if !call.type_args.is_empty() {
                if let Some(name) = call.callee_name() {
                    if program
                        .find_function(name)
                        .is_some_and(|f| f.is_generic())
                    {
                        request_and_walk(
                            program,
                            engine,
                            MonoKind::Function,
                            name,
                            &call.type_args,
                        );
                    }
                }
            }
            walk_expr(program, engine, &call.callee);
            for arg in &call.args {
                walk_expr(program, engine, arg);
            }
        }
        Expression::StructInit(init) => {
            if !init.type_args.is_empty() && program.find_struct(&init.name).is_some() {
                request_and_walk(program, engine, MonoKind::Struct, &init.name, &init.type_args);
            }
            for field in &init.fields {
                walk_expr(program, engine, &field.value);
            }
        }
        Expression::Unary(inner) => walk_expr(program, engine, &inner.operand),
        Expression::Binary(inner) => {
            walk_expr(program, engine, &inner.left);
            walk_expr(program, engine, &inner.right);
        }
        Expression::Assignment(inner) => {
            walk_expr(program, engine, &inner.lvalue);
            walk_expr(program, engine, &inner.rvalue);
        }
        Expression::MemberAccess(inner) => walk_expr(program, engine, &inner.object),
        Expression::ArrayAccess(inner) => {
            walk_expr(program, engine, &inner.array);
            walk_expr(program, engine, &inner.index);
        }
        Expression::ArrayLiteral(lit) => {
            for element in &lit.elements {
                walk_expr(program, engine, element);
            }
        }
        Expression::TupleLiteral(lit) => {
            for element in &lit.elements {
                walk_expr(program, engine, element);
            }
        }
        Expression::Match(inner) => {
            walk_expr(program, engine, &inner.scrutinee);
            for arm in &inner.arms {
                if let Pattern::Literal(pattern) = &arm.pattern {
                    walk_expr(program, engine, pattern);
                }
                walk_expr(program, engine, &arm.body);
            }
        }
        Expression::Catch(inner) => {
            walk_expr(program, engine, &inner.expr);
            walk_expr(program, engine, &inner.body);
        }
        Expression::Cast(inner) => {
            walk_expr(program, engine, &inner.expr);
            let target = engine.substitute(&inner.target);
            walk_type(program, engine, &target);
        }
        Expression::Sizeof(inner) => match &inner.arg {
            SizeofArg::Type(ty) => {
                let ty = engine.substitute(ty);
                walk_type(program, engine, &ty);
            }
            SizeofArg::Expr(expr) => walk_expr(program, engine, expr),
        },
        Expression::Alignof(inner) => {
            let ty = engine.substitute(&inner.target);
            walk_type(program, engine, &ty);
        }
        Expression::Len(inner) => walk_expr(program, engine, &inner.target),
        Expression::StringInterpolation(interp) => {
            for segment in &interp.segments {
                if let crate::parser::ast::InterpSegment::Expr { expr, .. } = segment {
                    walk_expr(program, engine, expr);
                }
            }
        }
        Expression::Block(block) => walk_block(program, engine, block),
        Expression::Num(_) | Expression::Bool(_) | Expression::AstString(_) | Expression::Id(_) => {
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Span;
    use crate::parser::ast::ArraySize;

    fn named(name: &str) -> TypeName {
        TypeName::named(name, Span::default())
    }

    fn ptr(inner: TypeName) -> TypeName {
        TypeName::Pointer {
            inner: Box::new(inner),
            borrowed: false,
            position: Span::default(),
        }
    }

    #[test]
    fn test_mangling_is_deterministic() {
        let args = vec![named("i32"), named("bool")];
        assert_eq!(mangle_name("Pair", &args), mangle_name("Pair", &args));
        assert_eq!(mangle_name("Pair", &args), "Pair_i32_bool");
    }

    #[test]
    fn test_pointer_argument_mangling() {
        assert_eq!(mangle_name("Box", &[ptr(named("Node"))]), "Box_ptr_Node");
    }

    #[test]
    fn test_request_is_unique_per_args() {
        let mut engine = MonoEngine::new();
        let a = engine.request(MonoKind::Function, "id", &[named("i32")]);
        let b = engine.request(MonoKind::Function, "id", &[named("i32")]);
        let c = engine.request(MonoKind::Function, "id", &[named("i64")]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(engine.request_count(), 2);
    }

    #[test]
    fn test_discovery_finds_call_site_instantiations() {
        let source = "fn id<T>(x: T) T { return x; }\nfn main() i32 { return id<i32>(42) + id<i32>(1); }";
        let tokens = crate::lexer::Lexer::new(source, "t.uya").lex().unwrap();
        let (program, errors) = crate::parser::parse_program(tokens);
        assert!(errors.is_empty(), "{errors:?}");

        let mut engine = MonoEngine::new();
        discover(&program, &mut engine);
        let mangled: Vec<&str> = engine.requests().iter().map(|r| r.mangled.as_str()).collect();
        assert_eq!(mangled, vec!["id_i32"]);
    }

    #[test]
    fn test_discovery_follows_nested_generics() {
        let source = "struct Box<T> { value: T }\nfn wrap<T>(x: T) Box<T> { return Box<T>{value: x}; }\nfn main() i32 { var b = wrap<i32>(5); return b.value; }";
        let tokens = crate::lexer::Lexer::new(source, "t.uya").lex().unwrap();
        let (program, errors) = crate::parser::parse_program(tokens);
        assert!(errors.is_empty(), "{errors:?}");

        let mut engine = MonoEngine::new();
        discover(&program, &mut engine);
        assert!(engine.knows("wrap_i32"));
        assert!(engine.knows("Box_i32"));
    }

    #[test]
    fn test_reverse_lookup_single_param() {
        let known = |name: &str| name == "Container";
        assert_eq!(
            generic_base_of("Container_i32", known),
            Some("Container")
        );
    }

    #[test]
    fn test_reverse_lookup_multi_param() {
        let known = |name: &str| name == "Pair";
        assert_eq!(generic_base_of("Pair_i32_i64", known), Some("Pair"));
    }

    #[test]
    fn test_reverse_lookup_user_type_arg() {
        let known = |name: &str| name == "List";
        assert_eq!(generic_base_of("List_Point", known), Some("List"));
    }

    #[test]
    fn test_reverse_lookup_rejects_non_generic() {
        let known = |_: &str| false;
        assert_eq!(generic_base_of("snake_case_fn", known), None);
    }

    #[test]
    fn test_substitution_preserves_structure() {
        let params = vec!["T".to_string()];
        let args = vec![named("i32")];

        let ty = TypeName::Array {
            element: Box::new(ptr(named("T"))),
            size: ArraySize::Literal(4),
            position: Span::default(),
        };
        let substituted = substitute_in(&ty, &params, &args);
        assert_eq!(substituted.to_string(), "[*i32: 4]");
    }

    #[test]
    fn test_substitution_through_context_stack() {
        let mut engine = MonoEngine::new();
        engine.push_context(vec!["T".to_string()], vec![named("bool")]);
        assert_eq!(engine.substitute(&named("T")).to_string(), "bool");
        engine.pop_context();
        assert_eq!(engine.substitute(&named("T")).to_string(), "T");
    }
}
