//! C99 textual backend.
//!
//! Emits one self-contained translation unit: fixed preamble, enum
//! declarations, struct forward declarations, struct bodies in dependency
//! order, slice / tuple / error-union typedefs, structural equality helpers,
//! global constants, function prototypes (including monomorphized
//! instantiations) and finally the definitions. `#line` directives preserve
//! source locations. Lowering failures accumulate as diagnostics; the unit
//! is only returned when the diagnostic count is zero.

mod expr;
mod function;
mod infer;
mod preamble;
mod stmt;
mod types;

use std::collections::BTreeMap;

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::lexer::Span;
use crate::mono::{self, MonoEngine, MonoKind};
use crate::parser::ast::*;

pub(crate) struct LocalVar {
    pub name: String,
    pub ty: TypeName,
    pub depth: usize,
    /// The C variable holds a pointer to the value (slice parameters).
    pub indirect: bool,
}

#[derive(Clone)]
pub(crate) struct DeferEntry {
    pub body: Block,
    pub on_error: bool,
}

pub struct C99Emitter<'a> {
    pub(crate) program: &'a Program,
    pub(crate) out: String,
    pub(crate) indent_level: usize,
    pub(crate) mono: MonoEngine,
    pub(crate) sink: DiagnosticSink,
    pub(crate) locals: Vec<LocalVar>,
    pub(crate) scope_depth: usize,
    pub(crate) defer_stack: Vec<DeferEntry>,
    pub(crate) current_return_type: Option<TypeName>,
    pub(crate) current_method_struct: Option<String>,
    pub(crate) temp_counter: usize,
    /// Declarations hoisted to the top of the current function body
    /// (interpolation buffers).
    pub(crate) prelude: Vec<String>,
    pub(crate) slice_typedefs: BTreeMap<String, TypeName>,
    pub(crate) tuple_typedefs: BTreeMap<String, Vec<TypeName>>,
    pub(crate) err_typedefs: BTreeMap<String, TypeName>,
}

/// Emit the translation unit for `program`. Returns the C source on success
/// or the accumulated diagnostics when any lowering step failed.
pub fn emit_translation_unit(program: &Program) -> Result<String, DiagnosticSink> {
    let mut emitter = C99Emitter::new(program);
    let code = emitter.run();
    if emitter.sink.is_empty() {
        Ok(code)
    } else {
        Err(emitter.sink)
    }
}

impl<'a> C99Emitter<'a> {
    pub fn new(program: &'a Program) -> Self {
        C99Emitter {
            program,
            out: String::new(),
            indent_level: 0,
            mono: MonoEngine::new(),
            sink: DiagnosticSink::new(),
            locals: vec![],
            scope_depth: 0,
            defer_stack: vec![],
            current_return_type: None,
            current_method_struct: None,
            temp_counter: 0,
            prelude: vec![],
            slice_typedefs: BTreeMap::new(),
            tuple_typedefs: BTreeMap::new(),
            err_typedefs: BTreeMap::new(),
        }
    }

    fn run(&mut self) -> String {
        log::debug!(
            "emitting C99 translation unit for {} declarations",
            self.program.declarations.len()
        );
        mono::discover(self.program, &mut self.mono);

        // definitions go to a side buffer first so the typedefs and mono
        // prototypes they demand can be placed ahead of them in the file
        let definitions = self.buffered(|e| e.emit_all_definitions());
        let globals = self.buffered(|e| e.emit_globals());
        let prototypes = self.buffered(|e| e.emit_all_prototypes());
        let eq_helpers = self.buffered(|e| e.emit_struct_eq_helpers());

        let mut unit = String::new();
        unit.push_str(preamble::PREAMBLE);
        unit.push('\n');

        unit.push_str(&self.buffered(|e| e.emit_struct_forward_decls()));
        unit.push_str(&self.buffered(|e| e.emit_enums()));
        unit.push_str(&self.buffered(|e| e.emit_simple_typedefs()));
        unit.push_str(&self.buffered(|e| e.emit_struct_bodies()));
        unit.push_str(&self.buffered(|e| e.emit_composite_typedefs()));
        unit.push_str(&eq_helpers);
        unit.push_str(&globals);
        unit.push_str(&prototypes);
        unit.push_str(&definitions);

        unit
    }

    /// Run `f` with `self.out` swapped for a fresh buffer and return what it
    /// wrote.
    fn buffered(&mut self, f: impl FnOnce(&mut Self)) -> String {
        let saved = std::mem::take(&mut self.out);
        f(self);
        std::mem::replace(&mut self.out, saved)
    }

    // ---- writing helpers ----

    pub(crate) fn emit(&mut self, text: &str) {
        self.out.push_str(text);
    }

    pub(crate) fn emit_indent(&mut self) {
        for _ in 0..self.indent_level {
            self.out.push_str("    ");
        }
    }

    pub(crate) fn emit_line(&mut self, text: &str) {
        self.emit_indent();
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub(crate) fn indent(&mut self) {
        self.indent_level += 1;
    }

    pub(crate) fn dedent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    pub(crate) fn emit_line_directive(&mut self, span: &Span) {
        if span.filename.is_empty() {
            return;
        }
        self.emit(&format!("#line {} \"{}\"\n", span.line(), span.filename));
    }

    pub(crate) fn fresh_temp(&mut self, stem: &str) -> String {
        let id = self.temp_counter;
        self.temp_counter += 1;
        format!("_uya_{stem}{id}")
    }

    // ---- diagnostics ----

    pub(crate) fn diag(&mut self, kind: DiagnosticKind, span: &Span, message: impl ToString) {
        self.sink.push(Diagnostic::new(kind, span.clone(), message));
    }

    // ---- variable table ----

    pub(crate) fn enter_scope(&mut self) {
        self.scope_depth += 1;
    }

    pub(crate) fn exit_scope(&mut self) {
        self.locals.retain(|v| v.depth < self.scope_depth);
        self.scope_depth -= 1;
    }

    pub(crate) fn add_local(&mut self, name: &str, ty: TypeName) {
        self.locals.push(LocalVar {
            name: name.to_string(),
            ty,
            depth: self.scope_depth,
            indirect: false,
        });
    }

    pub(crate) fn add_indirect_local(&mut self, name: &str, ty: TypeName) {
        self.locals.push(LocalVar {
            name: name.to_string(),
            ty,
            depth: self.scope_depth,
            indirect: true,
        });
    }

    pub(crate) fn lookup_var(&self, name: &str) -> Option<&TypeName> {
        if let Some(local) = self.locals.iter().rev().find(|v| v.name == name) {
            return Some(&local.ty);
        }
        self.program.declarations.iter().find_map(|decl| match decl {
            Declaration::Global(var) if var.name == name => var.type_name.as_ref(),
            _ => None,
        })
    }

    // ---- sections ----

    fn emit_enums(&mut self) {
        let mut wrote = false;
        for decl in &self.program.declarations {
            let Declaration::Enum(e) = decl else { continue };
            wrote = true;

            let underlying = e
                .underlying_type
                .as_ref()
                .map(|t| self.type_to_c(t))
                .unwrap_or_else(|| "int32_t".to_string());
            let safe = types::safe_ident(&e.name);
            self.emit(&format!("typedef {underlying} {safe};\n"));
            self.emit("enum {\n");
            for (name, value) in e.discriminants() {
                let variant = types::safe_ident(&format!("{}_{}", e.name, name));
                self.emit(&format!("    {variant} = {value},\n"));
            }
            self.emit("};\n");
        }
        if wrote {
            self.emit("\n");
        }
    }

    fn emit_struct_forward_decls(&mut self) {
        let mut wrote = false;
        for decl in &self.program.declarations {
            if let Declaration::Struct(s) = decl {
                if s.is_generic() {
                    continue;
                }
                wrote = true;
                let safe = types::safe_ident(&s.name);
                self.emit(&format!("struct {safe};\n"));
            }
        }
        for request in self.mono.requests().to_vec() {
            if request.kind == MonoKind::Struct {
                wrote = true;
                let safe = types::safe_ident(&request.mangled);
                self.emit(&format!("struct {safe};\n"));
            }
        }
        if wrote {
            self.emit("\n");
        }
    }

    /// Typedefs that reference struct types through pointers only, plus any
    /// composite typedefs over plain base types. Safe ahead of the struct
    /// bodies.
    fn emit_simple_typedefs(&mut self) {
        self.collect_static_types();

        for (name, element) in self.slice_typedefs.clone() {
            let element_c = self.type_to_c(&element);
            self.emit(&format!(
                "typedef struct {{ {element_c} *ptr; size_t len; }} {name};\n"
            ));
        }

        for (name, payload) in self.err_typedefs.clone() {
            if types::embeds_struct_value(self.program, &payload) {
                continue;
            }
            self.emit_err_typedef(&name, &payload);
        }
        for (name, items) in self.tuple_typedefs.clone() {
            if items
                .iter()
                .any(|t| types::embeds_struct_value(self.program, t))
            {
                continue;
            }
            self.emit_tuple_typedef(&name, &items);
        }
        self.emit("\n");
    }

    /// Typedefs that embed struct values; these need the struct bodies.
    fn emit_composite_typedefs(&mut self) {
        for (name, payload) in self.err_typedefs.clone() {
            if !types::embeds_struct_value(self.program, &payload) {
                continue;
            }
            self.emit_err_typedef(&name, &payload);
        }
        for (name, items) in self.tuple_typedefs.clone() {
            if !items
                .iter()
                .any(|t| types::embeds_struct_value(self.program, t))
            {
                continue;
            }
            self.emit_tuple_typedef(&name, &items);
        }
        self.emit("\n");
    }

    fn emit_err_typedef(&mut self, name: &str, payload: &TypeName) {
        if payload.is_void() {
            self.emit(&format!("typedef struct {{ uint32_t error_id; }} {name};\n"));
        } else {
            let payload_c = self.type_to_c(payload);
            let declarator = types::format_declarator(&payload_c, "value");
            self.emit(&format!(
                "typedef struct {{ uint32_t error_id; {declarator}; }} {name};\n"
            ));
        }
    }

    fn emit_tuple_typedef(&mut self, name: &str, items: &[TypeName]) {
        self.emit("typedef struct { ");
        for (i, item) in items.iter().enumerate() {
            let item_c = self.type_to_c(item);
            let declarator = types::format_declarator(&item_c, &format!("_{i}"));
            self.emit(&format!("{declarator}; "));
        }
        self.emit(&format!("}} {name};\n"));
    }

    /// Struct bodies in dependency order: a struct that embeds another by
    /// value comes after it. Pointer fields do not order (the forward
    /// declarations cover them).
    fn emit_struct_bodies(&mut self) {
        let mut pending: Vec<(String, StructDeclaration)> = vec![];

        for decl in &self.program.declarations {
            if let Declaration::Struct(s) = decl {
                if !s.is_generic() {
                    pending.push((s.name.clone(), s.clone()));
                }
            }
        }
        for request in self.mono.requests().to_vec() {
            if request.kind != MonoKind::Struct {
                continue;
            }
            let Some(generic) = self.program.find_struct(&request.generic_name) else {
                continue;
            };
            let mut instance = generic.clone();
            instance.name = request.mangled.clone();
            for field in &mut instance.fields {
                field.type_name = mono::substitute_in(
                    &field.type_name,
                    &generic.type_params,
                    &request.type_args,
                );
            }
            instance.type_params.clear();
            pending.push((request.mangled.clone(), instance));
        }

        let mut emitted: Vec<String> = vec![];
        while !pending.is_empty() {
            let mut progressed = false;
            let mut next_round = vec![];
            for (name, decl) in pending {
                let ready = decl.fields.iter().all(|field| {
                    match types::embedded_struct_name(&field.type_name) {
                        Some(dep) if dep != name => emitted.iter().any(|e| e == &dep),
                        _ => true,
                    }
                });
                if ready {
                    self.emit_struct_body(&decl);
                    emitted.push(name);
                    progressed = true;
                } else {
                    next_round.push((name, decl));
                }
            }
            pending = next_round;
            if !progressed {
                // cycle through by-value embedding: report and emit anyway
                for (name, decl) in pending.drain(..) {
                    self.diag(
                        DiagnosticKind::Resolution,
                        &decl.position,
                        format!("struct '{name}' participates in a by-value field cycle"),
                    );
                    self.emit_struct_body(&decl);
                }
            }
        }
        self.emit("\n");
    }

    fn emit_struct_body(&mut self, decl: &StructDeclaration) {
        let safe = types::safe_ident(&decl.name);
        self.emit(&format!("struct {safe} {{\n"));
        if decl.fields.is_empty() {
            // C99 forbids empty structs
            self.emit("    char _empty;\n");
        }
        for field in &decl.fields.clone() {
            let field_c = self.type_to_c(&field.type_name);
            let declarator = types::format_declarator(&field_c, &types::safe_ident(&field.name));
            self.emit(&format!("    {declarator};\n"));
        }
        self.emit("};\n");
    }

    fn emit_globals(&mut self) {
        let mut wrote = false;
        for decl in &self.program.declarations {
            let Declaration::Global(var) = decl else {
                continue;
            };
            wrote = true;

            let ty = match (&var.type_name, &var.init) {
                (Some(ty), _) => ty.clone(),
                (None, Some(init)) => self
                    .infer_type(init)
                    .unwrap_or_else(|| TypeName::named("i32", var.position.clone())),
                (None, None) => TypeName::named("i32", var.position.clone()),
            };
            let type_c = self.type_to_c(&ty);
            let qualifier = if var.is_const { "const " } else { "" };
            let declarator = types::format_declarator(&type_c, &types::safe_ident(&var.name));

            match &var.init {
                Some(init) => match self.expr_to_c(init) {
                    Ok(value) => {
                        self.emit(&format!("{qualifier}{declarator} = {value};\n"));
                    }
                    Err(diag) => {
                        self.sink.push(diag);
                        self.emit(&format!("{qualifier}{declarator};\n"));
                    }
                },
                None => self.emit(&format!("{qualifier}{declarator};\n")),
            }
        }
        if wrote {
            self.emit("\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::parse_program;

    fn emit(source: &str) -> String {
        let tokens = Lexer::new(source, "test.uya").lex().expect("lexes");
        let (program, errors) = parse_program(tokens);
        assert!(errors.is_empty(), "{errors:?}");
        match emit_translation_unit(&program) {
            Ok(code) => code,
            Err(sink) => panic!("diagnostics:\n{}", sink.render_all()),
        }
    }

    #[test]
    fn test_main_is_renamed() {
        let code = emit("fn main() i32 { return 5; }");
        assert!(code.contains("int32_t uya_main(void)"));
        assert!(!code.contains("int32_t main("));
    }

    #[test]
    fn test_error_union_try_catch_scenario() {
        let code = emit(
            "error DivZero;\n\
             fn div(a: i32, b: i32) !i32 { if (b == 0) return error.DivZero; return a/b; }\n\
             fn main() !i32 {\n\
               const x = try div(10, 2);\n\
               const y = div(10, 0) catch 0;\n\
               return x - y;\n\
             }",
        );
        assert!(code.contains("UyaErr_i32"));
        assert!(code.contains(".error_id ="));
        // try propagates through the enclosing return type
        assert!(code.contains("error_id != 0"));
    }

    #[test]
    fn test_generic_identity_is_emitted_once() {
        let code = emit(
            "fn id<T>(x: T) T { return x; }\n\
             fn main() i32 { return id<i32>(42) + id<i32>(-40); }",
        );
        let definitions = code.matches("int32_t id_i32(int32_t x) {").count();
        assert_eq!(definitions, 1, "exactly one definition:\n{code}");
        assert!(code.contains("id_i32(42)"));
    }

    #[test]
    fn test_array_param_copies_by_value() {
        let code = emit(
            "fn bump(a: [i32: 3]) i32 { a[0] = 99; return a[0]; }\n\
             fn main() i32 { var x: [i32: 3] = [1, 2, 3]; var b = bump(x); return b - x[0]; }",
        );
        assert!(code.contains("int32_t a_param[3]"));
        assert!(code.contains("memcpy(a, a_param, sizeof(a));"));
    }

    #[test]
    fn test_struct_equality_is_field_wise() {
        let code = emit(
            "struct P { x: i32, y: i32 }\n\
             fn main() i32 {\n\
               const a = P{x: 1, y: 2};\n\
               const b = P{x: 1, y: 2};\n\
               if (!(a == b)) return 1;\n\
               return 0;\n\
             }",
        );
        assert!(code.contains("static bool uya_eq_P(struct P a, struct P b)"));
        assert!(code.contains("a.x == b.x && a.y == b.y"));
        assert!(code.contains("uya_eq_P(a, b)"));
        // never a whole-struct memcmp for the top-level comparison
        assert!(!code.contains("memcmp(&a, &b"));
    }

    #[test]
    fn test_defer_runs_before_return_in_reverse_order() {
        let code = emit(
            "extern fn hook(n: i32) void;\n\
             fn main() i32 {\n\
               defer { hook(1); }\n\
               defer { hook(2); }\n\
               return 0;\n\
             }",
        );
        let first = code.find("hook(2)").expect("second defer emitted");
        let second = code.find("hook(1)").expect("first defer emitted");
        let ret = code.find("return _uya_ret;").expect("staged return");
        assert!(first < second, "defers run in reverse order:\n{code}");
        assert!(second < ret, "defers run before the return:\n{code}");
    }

    #[test]
    fn test_extern_large_struct_passes_by_pointer() {
        let code = emit(
            "struct Big { a: i64, b: i64, c: i64 }\n\
             extern fn consume(s: Big) i32;\n\
             fn main() i32 { const b = Big{a: 1, b: 2, c: 3}; return consume(b); }",
        );
        assert!(code.contains("extern int32_t consume(struct Big *s);"));
        assert!(code.contains("consume((&b))"));
    }

    #[test]
    fn test_stdlib_extern_is_not_redeclared() {
        let code = emit(
            "extern fn printf(fmt: *byte, ...) i32;\n\
             fn main() i32 { printf(\"hi\"); return 0; }",
        );
        assert!(!code.contains("extern int32_t printf"));
    }

    #[test]
    fn test_interpolation_uses_buffer_and_sprintf() {
        let code = emit(
            "fn main() i32 { var n = 41; var s = \"n = ${n}!\"; return 0; }",
        );
        assert!(code.contains("char _uya_msg"));
        assert!(code.contains("sprintf("));
        assert!(code.contains("%d"));
        assert!(code.contains("memcpy("));
    }

    #[test]
    fn test_match_lowers_to_if_chain() {
        let code = emit(
            "fn classify(n: i32) i32 { return match n { 0 => 10, 1 => 20, else => 30 }; }\n\
             fn main() i32 { return classify(1); }",
        );
        assert!(code.contains("== 0)"));
        assert!(code.contains("else"));
    }

    #[test]
    fn test_enum_discriminants_and_underlying_type() {
        let code = emit(
            "enum Status : u8 { Ok = 0, Bad = 4, Next }\n\
             fn main() i32 { const s = Status.Next; return 0; }",
        );
        assert!(code.contains("typedef uint8_t Status;"));
        assert!(code.contains("Status_Bad = 4"));
        assert!(code.contains("Status_Next = 5"));
    }

    #[test]
    fn test_syscall_wraps_negative_returns() {
        let code = emit(
            "fn main() !i32 { const r = try @syscall(39); return 0; }",
        );
        assert!(code.contains("uya_syscall0("));
        assert!(code.contains("(uint32_t)(-"));
    }

    #[test]
    fn test_for_array_uses_sizeof_bound() {
        let code = emit(
            "fn main() i32 {\n\
               var xs: [i32: 3] = [1, 2, 3];\n\
               var total = 0;\n\
               for xs |x| { total = total + x; }\n\
               return total;\n\
             }",
        );
        assert!(code.contains("sizeof(xs) / sizeof(xs[0])"));
    }

    #[test]
    fn test_line_directives_are_present() {
        let code = emit("fn main() i32 { return 0; }");
        assert!(code.contains("#line 1 \"test.uya\""));
    }

    #[test]
    fn test_method_name_mangling() {
        let code = emit(
            "struct Point { x: i32, y: i32, fn sum(self) i32 { return self.x + self.y; } }\n\
             fn main() i32 { const p = Point{x: 2, y: 3}; return p.sum(); }",
        );
        assert!(code.contains("uya_Point_sum(struct Point *self)"));
        assert!(code.contains("uya_Point_sum((&p))"));
    }

    #[test]
    fn test_saturating_mul_clamps_toward_product_sign() {
        let code = emit(
            "fn main() i32 {\n\
               var a = 100000;\n\
               var b = -100000;\n\
               return a *| b;\n\
             }",
        );
        assert!(code.contains("__builtin_mul_overflow"));
        // signs-equal saturates to MAX, signs-differ to MIN — never the
        // additive operand-sign rule
        assert!(code.contains(">= 0)) ? INT32_MAX : INT32_MIN"), "{code}");
    }

    #[test]
    fn test_saturating_mul_unsigned_clamps_to_max() {
        let code = emit(
            "fn main() i32 {\n\
               var a: u32 = 3000000000;\n\
               var b: u32 = 2;\n\
               var c = a *| b;\n\
               return 0;\n\
             }",
        );
        assert!(code.contains("__builtin_mul_overflow"));
        assert!(code.contains("UINT32_MAX"), "{code}");
    }

    #[test]
    fn test_saturating_add_clamps_toward_operand_sign() {
        let code = emit("fn main() i32 { var a = 1; var b = 2; return a +| b; }");
        assert!(code.contains("__builtin_add_overflow"));
        // additive overflow follows the operands' shared sign
        assert!(code.contains("(_uya_sat_a0 >= 0) ? INT32_MAX : INT32_MIN"), "{code}");
    }

    #[test]
    fn test_errdefer_is_guarded_by_error_tag() {
        let code = emit(
            "error Boom;\n\
             extern fn cleanup(n: i32) void;\n\
             fn risky(flag: bool) !i32 {\n\
               errdefer { cleanup(1); }\n\
               if (flag) return error.Boom;\n\
               return 7;\n\
             }\n\
             fn main() !i32 { return try risky(false); }",
        );
        assert!(code.contains("if (_uya_ret.error_id != 0)"));
    }
}
