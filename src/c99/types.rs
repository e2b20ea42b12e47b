//! Type mapping and identifier safety for the C99 backend.

use crate::diagnostics::DiagnosticKind;
use crate::mono::{self, MonoKind};
use crate::parser::ast::*;

use super::C99Emitter;

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while",
];

/// Map a source identifier to a safe C identifier: keyword collisions get a
/// trailing underscore, forbidden characters are rewritten.
pub(crate) fn safe_ident(name: &str) -> String {
    if C_KEYWORDS.contains(&name) {
        return format!("{name}_");
    }
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return name.to_string();
    }
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn base_type_to_c(name: &str) -> Option<&'static str> {
    Some(match name {
        "i8" => "int8_t",
        "i16" => "int16_t",
        "i32" => "int32_t",
        "i64" => "int64_t",
        "u8" => "uint8_t",
        "u16" => "uint16_t",
        "u32" => "uint32_t",
        "u64" => "uint64_t",
        "byte" => "uint8_t",
        "usize" => "size_t",
        "f32" => "float",
        "f64" => "double",
        "bool" => "bool",
        "void" => "void",
        _ => return None,
    })
}

/// Place `name` into a C declaration of type `type_c`, handling array
/// suffixes (`int32_t[3]` → `int32_t name[3]`) and function pointers
/// (`int32_t (*)(int32_t)` → `int32_t (*name)(int32_t)`).
pub(crate) fn format_declarator(type_c: &str, name: &str) -> String {
    if let Some(marker) = type_c.find("(*)") {
        let (before, after) = type_c.split_at(marker);
        let after = &after[3..];
        return format!("{before}(*{name}){after}");
    }
    if let Some(bracket) = type_c.find('[') {
        let (element, dims) = type_c.split_at(bracket);
        return format!("{} {name}{dims}", element.trim_end());
    }
    format!("{type_c} {name}")
}

/// Name of the struct a type embeds by value, if any. Used to order struct
/// body emission; pointers and slices do not order.
pub(crate) fn embedded_struct_name(ty: &TypeName) -> Option<String> {
    match ty {
        TypeName::Named {
            name, type_args, ..
        } => {
            if base_type_to_c(name).is_some() {
                None
            } else if type_args.is_empty() {
                Some(name.clone())
            } else {
                Some(mono::mangle_name(name, type_args))
            }
        }
        TypeName::Array { element, .. } => embedded_struct_name(element),
        TypeName::Atomic { inner, .. } => embedded_struct_name(inner),
        _ => None,
    }
}

/// Whether lowering this type embeds a struct by value (directly or inside
/// an array/tuple/error union).
pub(crate) fn embeds_struct_value(program: &Program, ty: &TypeName) -> bool {
    match ty {
        TypeName::Named {
            name, type_args, ..
        } => {
            if base_type_to_c(name).is_some() || program.find_enum(name).is_some() {
                false
            } else {
                !type_args.is_empty() || program.find_struct(name).is_some()
            }
        }
        TypeName::Array { element, .. } => embeds_struct_value(program, element),
        TypeName::Tuple(items, _) => items.iter().any(|i| embeds_struct_value(program, i)),
        TypeName::ErrorUnion { payload, .. } => embeds_struct_value(program, payload),
        TypeName::Atomic { inner, .. } => embeds_struct_value(program, inner),
        _ => false,
    }
}

/// printf conversion for a `${expr}` segment with no explicit format spec.
pub(crate) fn default_format(ty: Option<&TypeName>) -> &'static str {
    let Some(ty) = ty else { return "%d" };
    match ty {
        TypeName::Named { name, .. } => match name.as_str() {
            "i64" => "%ld",
            "u8" | "u16" | "u32" | "byte" => "%u",
            "u64" => "%lu",
            "usize" => "%zu",
            "f32" | "f64" => "%f",
            _ => "%d",
        },
        TypeName::Pointer { inner, .. } => match inner.as_ref() {
            TypeName::Named { name, .. } if name == "byte" => "%s",
            _ => "%p",
        },
        TypeName::Atomic { inner, .. } => default_format(Some(inner)),
        _ => "%d",
    }
}

/// `(size, align)` of a lowered type on x86-64, for ABI decisions.
pub(crate) fn size_and_align(program: &Program, ty: &TypeName) -> Option<(u64, u64)> {
    match ty {
        TypeName::Named {
            name, type_args, ..
        } => {
            if let Some(base) = base_size(name) {
                return Some(base);
            }
            if let Some(e) = program.find_enum(name) {
                let underlying = e
                    .underlying_type
                    .as_ref()
                    .and_then(|t| match t {
                        TypeName::Named { name, .. } => base_size(name),
                        _ => None,
                    })
                    .unwrap_or((4, 4));
                return Some(underlying);
            }
            let decl = program.find_struct(name)?;
            if type_args.is_empty() {
                struct_size(program, decl, &[], &[])
            } else {
                struct_size(program, decl, &decl.type_params.clone(), type_args)
            }
        }
        TypeName::Pointer { .. } | TypeName::Fn { .. } => Some((8, 8)),
        TypeName::Array { element, size, .. } => {
            let (elem_size, align) = size_and_align(program, element)?;
            let n = size.literal()? as u64;
            Some((elem_size * n, align))
        }
        TypeName::Slice { .. } => Some((16, 8)),
        TypeName::Tuple(items, _) => {
            let mut size = 0u64;
            let mut align = 1u64;
            for item in items {
                let (item_size, item_align) = size_and_align(program, item)?;
                size = round_up(size, item_align) + item_size;
                align = align.max(item_align);
            }
            Some((round_up(size.max(1), align), align))
        }
        TypeName::ErrorUnion { payload, .. } => {
            if payload.is_void() {
                return Some((4, 4));
            }
            let (payload_size, payload_align) = size_and_align(program, payload)?;
            let align = payload_align.max(4);
            Some((round_up(round_up(4, payload_align) + payload_size, align), align))
        }
        TypeName::Atomic { inner, .. } => size_and_align(program, inner),
    }
}

fn struct_size(
    program: &Program,
    decl: &StructDeclaration,
    params: &[String],
    args: &[TypeName],
) -> Option<(u64, u64)> {
    let mut size = 0u64;
    let mut align = 1u64;
    for field in &decl.fields {
        let field_ty = mono::substitute_in(&field.type_name, params, args);
        let (field_size, field_align) = size_and_align(program, &field_ty)?;
        size = round_up(size, field_align) + field_size;
        align = align.max(field_align);
    }
    Some((round_up(size.max(1), align), align))
}

fn base_size(name: &str) -> Option<(u64, u64)> {
    Some(match name {
        "i8" | "u8" | "byte" | "bool" => (1, 1),
        "i16" | "u16" => (2, 2),
        "i32" | "u32" | "f32" => (4, 4),
        "i64" | "u64" | "usize" | "f64" => (8, 8),
        "void" => (0, 1),
        _ => return None,
    })
}

fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

impl<'a> C99Emitter<'a> {
    /// Lower a type to its C spelling, registering any slice / tuple /
    /// error-union typedef and generic struct instantiation it requires.
    pub(crate) fn type_to_c(&mut self, ty: &TypeName) -> String {
        let ty = self.mono.substitute(ty);
        match &ty {
            TypeName::Named {
                name,
                type_args,
                position,
            } => {
                if name == "Self" {
                    let owner = self
                        .current_method_struct
                        .clone()
                        .unwrap_or_else(|| "void".to_string());
                    return format!("struct {} *", safe_ident(&owner));
                }
                if let Some(base) = base_type_to_c(name) {
                    return base.to_string();
                }
                if let Some(e) = self.program.find_enum(name) {
                    return match &e.underlying_type {
                        Some(ty) => self.type_to_c(&ty.clone()),
                        None => "int32_t".to_string(),
                    };
                }
                if self.program.find_struct(name).is_some() {
                    if type_args.is_empty() {
                        return format!("struct {}", safe_ident(name));
                    }
                    let mangled = self.mono.request(MonoKind::Struct, name, type_args);
                    return format!("struct {}", safe_ident(&mangled));
                }
                if self.mono.knows(name) {
                    return format!("struct {}", safe_ident(name));
                }
                self.diag(
                    DiagnosticKind::Resolution,
                    position,
                    format!("unknown type '{name}'"),
                );
                "int32_t".to_string()
            }
            TypeName::Pointer { inner, .. } => {
                if inner.is_void() {
                    return "void *".to_string();
                }
                let inner_c = self.type_to_c(inner);
                if inner_c.ends_with('*') {
                    format!("{inner_c}*")
                } else {
                    format!("{inner_c} *")
                }
            }
            TypeName::Array { element, size, .. } => {
                let element_c = self.type_to_c(element);
                match size.literal() {
                    Some(n) => format!("{element_c}[{n}]"),
                    None => {
                        self.diag(
                            DiagnosticKind::Resolution,
                            &ty.position(),
                            "array size did not resolve to a constant",
                        );
                        format!("{element_c}[1]")
                    }
                }
            }
            TypeName::Slice { element, .. } => {
                let name = format!("UyaSlice_{}", safe_ident(&mono::mangle_type(element)));
                self.slice_typedefs
                    .entry(name.clone())
                    .or_insert_with(|| element.as_ref().clone());
                name
            }
            TypeName::Tuple(items, _) => {
                let suffix = items
                    .iter()
                    .map(mono::mangle_type)
                    .collect::<Vec<_>>()
                    .join("_");
                let name = format!("UyaTuple_{}", safe_ident(&suffix));
                self.tuple_typedefs
                    .entry(name.clone())
                    .or_insert_with(|| items.clone());
                name
            }
            TypeName::Fn {
                params,
                return_type,
                ..
            } => {
                let return_c = self.type_to_c(return_type);
                let params_c = if params.is_empty() {
                    "void".to_string()
                } else {
                    params
                        .iter()
                        .map(|p| self.type_to_c(p))
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("{return_c} (*)({params_c})")
            }
            TypeName::ErrorUnion { payload, .. } => self.err_union_c(payload),
            TypeName::Atomic { inner, .. } => self.type_to_c(inner),
        }
    }

    /// Typedef name for the error union over `payload`; the base-type
    /// unions (`void`, `i32`, `i64`) live in the preamble.
    pub(crate) fn err_union_c(&mut self, payload: &TypeName) -> String {
        let payload = self.mono.substitute(payload);
        let name = format!("UyaErr_{}", safe_ident(&mono::mangle_type(&payload)));
        if !matches!(name.as_str(), "UyaErr_void" | "UyaErr_i32" | "UyaErr_i64") {
            self.err_typedefs
                .entry(name.clone())
                .or_insert_with(|| payload.clone());
        }
        name
    }

    /// Register the typedefs demanded by every statically visible type.
    pub(crate) fn collect_static_types(&mut self) {
        for decl in &self.program.declarations.clone() {
            match decl {
                Declaration::Function(f) | Declaration::Extern(f) => {
                    if f.is_generic() {
                        continue;
                    }
                    for param in &f.params {
                        self.type_to_c(&param.type_name);
                    }
                    self.type_to_c(&f.return_type);
                }
                Declaration::Struct(s) if !s.is_generic() => {
                    for field in &s.fields {
                        self.type_to_c(&field.type_name);
                    }
                    for method in &s.methods {
                        for param in &method.params {
                            self.type_to_c(&param.type_name);
                        }
                        self.type_to_c(&method.return_type);
                    }
                }
                Declaration::MethodBlock(block) => {
                    for method in &block.methods {
                        for param in &method.params {
                            if !matches!(&param.type_name, TypeName::Named { name, .. } if name == "Self")
                            {
                                self.type_to_c(&param.type_name);
                            }
                        }
                        self.type_to_c(&method.return_type);
                    }
                }
                Declaration::Global(var) => {
                    if let Some(ty) = &var.type_name {
                        self.type_to_c(ty);
                    }
                }
                _ => {}
            }
        }

        for request in self.mono.requests().to_vec() {
            match request.kind {
                MonoKind::Function => {
                    if let Some(decl) = self.program.find_function(&request.generic_name) {
                        let params = decl.type_params.clone();
                        for param in decl.params.clone() {
                            let ty =
                                mono::substitute_in(&param.type_name, &params, &request.type_args);
                            self.type_to_c(&ty);
                        }
                        let ret = mono::substitute_in(
                            &decl.return_type.clone(),
                            &params,
                            &request.type_args,
                        );
                        self.type_to_c(&ret);
                    }
                }
                MonoKind::Struct => {
                    if let Some(decl) = self.program.find_struct(&request.generic_name) {
                        let params = decl.type_params.clone();
                        for field in decl.fields.clone() {
                            let ty =
                                mono::substitute_in(&field.type_name, &params, &request.type_args);
                            self.type_to_c(&ty);
                        }
                    }
                }
            }
        }
    }

    /// Struct declaration (plus substitution arguments) behind a type name,
    /// accepting plain names, generic references and monomorphized names.
    pub(crate) fn struct_decl_for(
        &self,
        name: &str,
    ) -> Option<(StructDeclaration, Vec<String>, Vec<TypeName>)> {
        if let Some(decl) = self.program.find_struct(name) {
            return Some((decl.clone(), vec![], vec![]));
        }
        // monomorphized name: recover the generic declaration
        let request = self
            .mono
            .requests()
            .iter()
            .find(|r| r.kind == MonoKind::Struct && r.mangled == name)?
            .clone();
        let decl = self.program.find_struct(&request.generic_name)?;
        Some((decl.clone(), decl.type_params.clone(), request.type_args))
    }

    /// Type of `struct_name.field`, with generic substitution applied.
    pub(crate) fn struct_field_type(&self, struct_name: &str, field: &str) -> Option<TypeName> {
        let (decl, params, args) = self.struct_decl_for(struct_name)?;
        let field = decl.field(field)?;
        Some(mono::substitute_in(&field.type_name, &params, &args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::parse_program;

    #[test]
    fn test_safe_ident_avoids_c_keywords() {
        assert_eq!(safe_ident("register"), "register_");
        assert_eq!(safe_ident("value"), "value");
        assert_eq!(safe_ident("@syscall"), "_syscall");
    }

    #[test]
    fn test_declarator_placement() {
        assert_eq!(format_declarator("int32_t", "x"), "int32_t x");
        assert_eq!(format_declarator("int32_t[3]", "xs"), "int32_t xs[3]");
        assert_eq!(
            format_declarator("int32_t (*)(int32_t)", "callback"),
            "int32_t (*callback)(int32_t)"
        );
    }

    #[test]
    fn test_abi_sizes_for_the_interesting_struct_shapes() {
        let source = "struct Empty { }\n\
                      struct One { a: i32 }\n\
                      struct Two { a: i32, b: i32 }\n\
                      struct Three { a: i32, b: i32, c: i32 }\n\
                      struct Four { a: i32, b: i32, c: i32, d: i32 }\n\
                      struct Seventeen { a: i64, b: i64, c: i8 }";
        let tokens = Lexer::new(source, "t.uya").lex().unwrap();
        let (program, errors) = parse_program(tokens);
        assert!(errors.is_empty());

        let size = |name: &str| {
            let ty = TypeName::named(name, Default::default());
            size_and_align(&program, &ty).unwrap().0
        };
        // the documented System V probe points: 0, 4, 8, 12, 16, 17(+pad)
        assert_eq!(size("Empty"), 1); // C99 structs cannot be empty
        assert_eq!(size("One"), 4);
        assert_eq!(size("Two"), 8);
        assert_eq!(size("Three"), 12);
        assert_eq!(size("Four"), 16);
        assert_eq!(size("Seventeen"), 24);
    }

    #[test]
    fn test_default_formats() {
        let named = |n: &str| TypeName::named(n, Default::default());
        assert_eq!(default_format(Some(&named("i32"))), "%d");
        assert_eq!(default_format(Some(&named("i64"))), "%ld");
        assert_eq!(default_format(Some(&named("u32"))), "%u");
        assert_eq!(default_format(Some(&named("usize"))), "%zu");
        assert_eq!(default_format(Some(&named("f64"))), "%f");
        let byte_ptr = TypeName::Pointer {
            inner: Box::new(named("byte")),
            borrowed: false,
            position: Default::default(),
        };
        assert_eq!(default_format(Some(&byte_ptr)), "%s");
    }
}
