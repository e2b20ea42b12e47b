//! Function, method and monomorphized-instantiation emission for the C99
//! backend.

use crate::diagnostics::DiagnosticKind;
use crate::mono::{self, MonoKind};
use crate::parser::ast::*;

use super::types::{self, safe_ident};
use super::C99Emitter;

/// Extern declarations matching these names are not redeclared; the headers
/// in the preamble already provide them (with `const char *` string
/// parameters).
fn is_stdlib_function(name: &str) -> bool {
    matches!(
        name,
        "printf"
            | "sprintf"
            | "fprintf"
            | "snprintf"
            | "scanf"
            | "sscanf"
            | "puts"
            | "fputs"
            | "putchar"
            | "getchar"
            | "fgets"
            | "memcpy"
            | "memcmp"
            | "memset"
            | "strlen"
            | "strcmp"
            | "strstr"
            | "fopen"
            | "fread"
            | "fwrite"
            | "fclose"
            | "fgetc"
            | "fputc"
            | "fflush"
    )
}

impl<'a> C99Emitter<'a> {
    /// Return type spelling; `[T: N]` returns are rewritten to `T *`.
    fn return_type_c(&mut self, ty: &TypeName) -> String {
        let ty = self.mono.substitute(ty);
        if let TypeName::Array { element, .. } = &ty {
            let element_c = self.type_to_c(element);
            return format!("{element_c} *");
        }
        self.type_to_c(&ty)
    }

    fn signature_param_c(&mut self, param: &Parameter, owner: Option<&str>) -> String {
        let name = safe_ident(&param.name);
        let ty = self.mono.substitute(&param.type_name);

        if let TypeName::Named { name: tn, .. } = &ty {
            if tn == "Self" {
                let owner = owner.unwrap_or("void");
                return format!("struct {} *{name}", safe_ident(owner));
            }
        }

        match &ty {
            TypeName::Array { .. } => {
                let type_c = self.type_to_c(&ty);
                types::format_declarator(&type_c, &format!("{name}_param"))
            }
            TypeName::Slice { .. } => {
                let type_c = self.type_to_c(&ty);
                format!("{type_c} *{name}")
            }
            _ => {
                let type_c = self.type_to_c(&ty);
                types::format_declarator(&type_c, &name)
            }
        }
    }

    /// Extern import parameter, applying the System V rewrites: structs
    /// larger than 16 bytes pass by pointer, `*byte` strings become
    /// `const char *`.
    fn extern_param_c(&mut self, param: &Parameter) -> String {
        let name = safe_ident(&param.name);
        let ty = self.mono.substitute(&param.type_name);

        if let Some(struct_name) = self.value_struct_name(&ty) {
            let size = types::size_and_align(self.program, &ty)
                .map(|(s, _)| s)
                .unwrap_or(0);
            if size > 16 {
                return format!("struct {} *{name}", safe_ident(&struct_name));
            }
        }

        if let TypeName::Pointer { inner, .. } = &ty {
            if matches!(inner.as_ref(), TypeName::Named { name, .. } if name == "byte") {
                return format!("const char *{name}");
            }
        }

        let type_c = self.type_to_c(&ty);
        types::format_declarator(&type_c, &name)
    }

    // ---- prototypes ----

    pub(crate) fn emit_all_prototypes(&mut self) {
        for decl in &self.program.declarations.clone() {
            match decl {
                Declaration::Function(f) => {
                    if f.is_generic() {
                        continue;
                    }
                    self.emit_fn_prototype(f, None);
                }
                Declaration::Extern(f) => self.emit_extern_prototype(f),
                Declaration::Struct(s) if !s.is_generic() => {
                    for method in &s.methods {
                        self.emit_fn_prototype(method, Some(&s.name));
                    }
                }
                Declaration::MethodBlock(block) => {
                    if self.program.find_struct(&block.struct_name).map(|s| s.is_generic())
                        != Some(false)
                    {
                        continue;
                    }
                    for method in &block.methods {
                        self.emit_fn_prototype(method, Some(&block.struct_name));
                    }
                }
                Declaration::Impl(block) => {
                    for method in &block.methods {
                        self.emit_fn_prototype(method, Some(&block.struct_name));
                    }
                }
                Declaration::TestBlock(_) => {}
                _ => {}
            }
        }

        let mut test_index = 0usize;
        for decl in &self.program.declarations.clone() {
            if let Declaration::TestBlock(_) = decl {
                self.emit(&format!("void uya_test_{test_index}(void);\n"));
                test_index += 1;
            }
        }

        // monomorphized instantiations
        for request in self.mono.requests().to_vec() {
            match request.kind {
                MonoKind::Function => {
                    let Some(decl) = self.program.find_function(&request.generic_name).cloned()
                    else {
                        continue;
                    };
                    self.mono
                        .push_context(decl.type_params.clone(), request.type_args.clone());
                    let mut instance = decl;
                    instance.name = request.mangled.clone();
                    self.emit_fn_prototype(&instance, None);
                    self.mono.pop_context();
                }
                MonoKind::Struct => {
                    let Some(decl) = self.program.find_struct(&request.generic_name).cloned()
                    else {
                        continue;
                    };
                    self.mono
                        .push_context(decl.type_params.clone(), request.type_args.clone());
                    for method in self.methods_of_struct(&request.generic_name) {
                        self.emit_fn_prototype(&method, Some(&request.mangled));
                    }
                    self.mono.pop_context();
                }
            }
        }
        self.emit("\n");
    }

    fn emit_fn_prototype(&mut self, f: &FunctionDeclaration, owner: Option<&str>) {
        let return_c = self.return_type_c(&f.return_type);
        let name = match owner {
            Some(owner) => format!("uya_{}_{}", safe_ident(owner), safe_ident(&f.name)),
            None if f.name == "main" => {
                self.emit(&format!("{return_c} uya_main(void);\n"));
                return;
            }
            None => safe_ident(&f.name),
        };

        let mut params = vec![];
        for param in &f.params {
            params.push(self.signature_param_c(param, owner));
        }
        if f.is_varargs {
            params.push("...".to_string());
        }
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        self.emit(&format!("{return_c} {name}({params});\n"));
    }

    fn emit_extern_prototype(&mut self, f: &FunctionDeclaration) {
        // an extern with a body is an exported definition, not an import
        if f.body.is_some() {
            self.emit_fn_prototype(f, None);
            return;
        }
        if is_stdlib_function(&f.name) {
            return;
        }

        let return_c = self.return_type_c(&f.return_type);
        let mut params = vec![];
        for param in &f.params.clone() {
            params.push(self.extern_param_c(param));
        }
        if f.is_varargs {
            params.push("...".to_string());
        }
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        self.emit(&format!(
            "extern {return_c} {}({params});\n",
            safe_ident(&f.name)
        ));
    }

    // ---- definitions ----

    pub(crate) fn emit_all_definitions(&mut self) {
        for decl in &self.program.declarations.clone() {
            match decl {
                Declaration::Function(f) => {
                    if f.is_generic() {
                        continue;
                    }
                    self.gen_function(f, None);
                }
                Declaration::Extern(f) => {
                    if f.body.is_some() {
                        self.gen_function(f, None);
                    }
                }
                Declaration::Struct(s) if !s.is_generic() => {
                    let name = s.name.clone();
                    for method in &s.methods {
                        self.gen_function(method, Some(&name));
                    }
                }
                Declaration::MethodBlock(block) => {
                    if self.program.find_struct(&block.struct_name).map(|s| s.is_generic())
                        != Some(false)
                    {
                        continue;
                    }
                    for method in &block.methods {
                        self.gen_function(method, Some(&block.struct_name));
                    }
                }
                Declaration::Impl(block) => {
                    for method in &block.methods {
                        self.gen_function(method, Some(&block.struct_name));
                    }
                }
                Declaration::TestBlock(_) => {}
                _ => {}
            }
        }

        let mut test_index = 0usize;
        for decl in &self.program.declarations.clone() {
            if let Declaration::TestBlock(t) = decl {
                self.gen_test_function(t, test_index);
                test_index += 1;
            }
        }

        // drain the instantiation queue; emitting one body may request more
        let mut next = 0usize;
        while next < self.mono.request_count() {
            let request = self.mono.request_at(next).unwrap();
            next += 1;
            match request.kind {
                MonoKind::Function => {
                    let Some(decl) = self.program.find_function(&request.generic_name).cloned()
                    else {
                        self.sink.push(crate::diagnostics::Diagnostic::new(
                            DiagnosticKind::Resolution,
                            Default::default(),
                            format!("unknown generic function '{}'", request.generic_name),
                        ));
                        continue;
                    };
                    self.mono
                        .push_context(decl.type_params.clone(), request.type_args.clone());
                    let mut instance = decl;
                    instance.name = request.mangled.clone();
                    self.gen_function(&instance, None);
                    self.mono.pop_context();
                }
                MonoKind::Struct => {
                    let Some(decl) = self.program.find_struct(&request.generic_name).cloned()
                    else {
                        continue;
                    };
                    self.mono
                        .push_context(decl.type_params.clone(), request.type_args.clone());
                    for method in self.methods_of_struct(&request.generic_name) {
                        self.gen_function(&method, Some(&request.mangled));
                    }
                    self.mono.pop_context();
                }
            }
        }
    }

    pub(crate) fn methods_of_struct(&self, name: &str) -> Vec<FunctionDeclaration> {
        let mut methods = vec![];
        if let Some(decl) = self.program.find_struct(name) {
            methods.extend(decl.methods.iter().cloned());
        }
        if let Some(block) = self.program.method_block_for(name) {
            methods.extend(block.methods.iter().cloned());
        }
        for block in self.program.impl_blocks_for(name) {
            methods.extend(block.methods.iter().cloned());
        }
        methods
    }

    fn gen_function(&mut self, f: &FunctionDeclaration, owner: Option<&str>) {
        let Some(body) = f.body.clone() else { return };

        self.emit_line_directive(&f.position);

        let return_type = self.mono.substitute(&f.return_type);
        let return_c = self.return_type_c(&return_type);
        let is_main = owner.is_none() && f.name == "main";
        let name = match owner {
            Some(owner) => format!("uya_{}_{}", safe_ident(owner), safe_ident(&f.name)),
            None if is_main => "uya_main".to_string(),
            None => safe_ident(&f.name),
        };

        let mut params = vec![];
        if !is_main {
            for param in &f.params.clone() {
                params.push(self.signature_param_c(param, owner));
            }
            if f.is_varargs {
                params.push("...".to_string());
            }
        }
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };

        self.emit(&format!("{return_c} {name}({params}) {{\n"));
        self.indent();

        // function emission context
        let saved_return = self.current_return_type.replace(return_type.clone());
        let saved_method_struct = match owner {
            Some(owner) => self.current_method_struct.replace(owner.to_string()),
            None => self.current_method_struct.take(),
        };
        let saved_locals = std::mem::take(&mut self.locals);
        let saved_defers = std::mem::take(&mut self.defer_stack);
        let saved_depth = self.scope_depth;
        self.scope_depth = 0;

        // parameter copy-in and registration
        for param in &f.params.clone() {
            let ty = self.mono.substitute(&param.type_name);
            let ty = match (&ty, owner) {
                (TypeName::Named { name, position, .. }, Some(owner)) if name == "Self" => {
                    TypeName::Pointer {
                        inner: Box::new(TypeName::named(owner, position.clone())),
                        borrowed: false,
                        position: position.clone(),
                    }
                }
                _ => ty,
            };
            match &ty {
                TypeName::Array { .. } => {
                    // by-value array semantics: copy the caller's data
                    let type_c = self.type_to_c(&ty);
                    let safe = safe_ident(&param.name);
                    let declarator = types::format_declarator(&type_c, &safe);
                    self.emit_line(&format!("{declarator};"));
                    self.emit_line(&format!(
                        "memcpy({safe}, {safe}_param, sizeof({safe}));"
                    ));
                    self.add_local(&param.name, ty);
                }
                TypeName::Slice { .. } => self.add_indirect_local(&param.name, ty),
                _ => self.add_local(&param.name, ty),
            }
        }

        for stmt in &body.statements {
            self.gen_stmt(stmt);
        }

        // implicit returns
        let has_trailing_return = body
            .statements
            .iter()
            .rev()
            .find(|s| !matches!(s, Statement::Defer(_) | Statement::ErrDefer(_)))
            .map(|s| matches!(s, Statement::Return(_)))
            .unwrap_or(false);

        if !has_trailing_return {
            if return_type.is_error_union() && return_type.error_union_payload().is_void() {
                let ret_c = self.type_to_c(&return_type);
                self.emit_line("{");
                self.indent();
                self.emit_line(&format!("{ret_c} _uya_ret = ({ret_c}){{ .error_id = 0 }};"));
                self.emit_return_cleanups(Some("_uya_ret"), true);
                self.emit_line("return _uya_ret;");
                self.dedent();
                self.emit_line("}");
            } else if return_type.is_void() {
                self.emit_return_cleanups(None, false);
            }
        }

        self.current_return_type = saved_return;
        self.current_method_struct = saved_method_struct;
        self.locals = saved_locals;
        self.defer_stack = saved_defers;
        self.scope_depth = saved_depth;

        self.dedent();
        self.emit_line("}");
        self.emit("\n");
    }

    fn gen_test_function(&mut self, t: &TestBlock, index: usize) {
        self.emit_line_directive(&t.position);
        self.emit(&format!("void uya_test_{index}(void) {{\n"));
        self.indent();

        let saved_return = self.current_return_type.take();
        let saved_locals = std::mem::take(&mut self.locals);
        let saved_defers = std::mem::take(&mut self.defer_stack);

        for stmt in &t.body.statements.clone() {
            self.gen_stmt(stmt);
        }
        self.emit_return_cleanups(None, false);

        self.current_return_type = saved_return;
        self.locals = saved_locals;
        self.defer_stack = saved_defers;

        self.dedent();
        self.emit_line("}");
        self.emit("\n");
    }

    // ---- structural equality helpers ----

    /// One `uya_eq_S` per emitted struct: scalar fields compare with `==`,
    /// nested composites with `memcmp` on the field, all folded with `&&`.
    /// Whole structs are never memcmp'd (padding bytes are undefined).
    pub(crate) fn emit_struct_eq_helpers(&mut self) {
        let mut targets: Vec<(String, StructDeclaration, Vec<String>, Vec<TypeName>)> = vec![];

        for decl in &self.program.declarations {
            if let Declaration::Struct(s) = decl {
                if !s.is_generic() {
                    targets.push((s.name.clone(), s.clone(), vec![], vec![]));
                }
            }
        }
        for request in self.mono.requests().to_vec() {
            if request.kind != MonoKind::Struct {
                continue;
            }
            if let Some(decl) = self.program.find_struct(&request.generic_name) {
                targets.push((
                    request.mangled.clone(),
                    decl.clone(),
                    decl.type_params.clone(),
                    request.type_args.clone(),
                ));
            }
        }

        for (name, decl, params, args) in targets {
            let safe = safe_ident(&name);
            self.emit(&format!(
                "static bool uya_eq_{safe}(struct {safe} a, struct {safe} b) {{\n"
            ));
            if decl.fields.is_empty() {
                self.emit("    return true;\n}\n");
                continue;
            }

            let mut parts = vec![];
            for field in &decl.fields {
                let field_ty = mono::substitute_in(&field.type_name, &params, &args);
                let field_name = safe_ident(&field.name);
                if is_scalar_field(self.program, &field_ty) {
                    parts.push(format!("a.{field_name} == b.{field_name}"));
                } else {
                    parts.push(format!(
                        "memcmp(&a.{field_name}, &b.{field_name}, sizeof(a.{field_name})) == 0"
                    ));
                }
            }
            self.emit(&format!("    return {};\n}}\n", parts.join(" && ")));
        }
        self.emit("\n");
    }
}

fn is_scalar_field(program: &Program, ty: &TypeName) -> bool {
    match ty {
        TypeName::Named { name, .. } => {
            types::base_type_to_c(name).is_some() || program.find_enum(name).is_some()
        }
        TypeName::Pointer { .. } | TypeName::Fn { .. } => true,
        TypeName::Atomic { inner, .. } => is_scalar_field(program, inner),
        _ => false,
    }
}
