//! Type lowering for the LLVM backend.

use inkwell::types::{BasicType, BasicTypeEnum, IntType, StructType};
use inkwell::AddressSpace;

use crate::mono::{self, MonoKind};
use crate::parser::ast::*;

use super::{CodegenContext, CodegenError, CodegenResult};

impl<'a, 'ctx> CodegenContext<'a, 'ctx> {
    /// Pointer-sized integer type backing `usize`.
    pub fn usize_type(&self) -> IntType<'ctx> {
        match self.pointer_bytes {
            4 => self.context.i32_type(),
            _ => self.context.i64_type(),
        }
    }

    /// Lower a source type to an LLVM value type. `void` is rejected here;
    /// signature construction handles it separately.
    pub fn lower_type(&self, ty: &TypeName) -> CodegenResult<BasicTypeEnum<'ctx>> {
        let ty = self.subst(ty);
        match &ty {
            TypeName::Named {
                name,
                type_args,
                position,
            } => {
                if name == "Self" {
                    return Ok(self.context.ptr_type(AddressSpace::default()).into());
                }
                match name.as_str() {
                    "i8" | "u8" | "byte" => return Ok(self.context.i8_type().into()),
                    "i16" | "u16" => return Ok(self.context.i16_type().into()),
                    "i32" | "u32" => return Ok(self.context.i32_type().into()),
                    "i64" | "u64" => return Ok(self.context.i64_type().into()),
                    "usize" => return Ok(self.usize_type().into()),
                    "bool" => return Ok(self.context.bool_type().into()),
                    "f32" => return Ok(self.context.f32_type().into()),
                    "f64" => return Ok(self.context.f64_type().into()),
                    "void" => {
                        return Err(CodegenError::lowering(
                            position,
                            "'void' is not a value type",
                        ))
                    }
                    _ => {}
                }

                if let Some(e) = self.program.find_enum(name) {
                    return Ok(self.enum_backing_type(e).into());
                }

                let struct_name = if type_args.is_empty() {
                    name.clone()
                } else {
                    self.mono
                        .borrow_mut()
                        .request(MonoKind::Struct, name, type_args)
                };
                match self.struct_type_for(&struct_name) {
                    Some(struct_type) => Ok(struct_type.into()),
                    None => Err(CodegenError::resolution(
                        position,
                        format!("unknown type '{name}'"),
                    )),
                }
            }
            // opaque pointers: every pointer lowers to `ptr`
            TypeName::Pointer { .. } | TypeName::Fn { .. } => {
                Ok(self.context.ptr_type(AddressSpace::default()).into())
            }
            TypeName::Array {
                element,
                size,
                position,
            } => {
                let element_ty = self.lower_type(element)?;
                let n = size.literal().ok_or_else(|| {
                    CodegenError::resolution(
                        position,
                        "array size did not resolve to a constant",
                    )
                })?;
                Ok(element_ty.array_type(n as u32).into())
            }
            TypeName::Slice { .. } => {
                let ptr = self.context.ptr_type(AddressSpace::default());
                Ok(self
                    .context
                    .struct_type(&[ptr.into(), self.usize_type().into()], false)
                    .into())
            }
            TypeName::Tuple(items, _) => {
                let mut fields = vec![];
                for item in items {
                    fields.push(self.lower_type(item)?);
                }
                Ok(self.context.struct_type(&fields, false).into())
            }
            TypeName::ErrorUnion { payload, .. } => {
                Ok(self.err_union_type(payload)?.into())
            }
            TypeName::Atomic { inner, .. } => self.lower_type(inner),
        }
    }

    /// Enums lower to `i32` unless an explicit underlying type names a
    /// different width.
    pub fn enum_backing_type(&self, decl: &EnumDeclaration) -> IntType<'ctx> {
        match &decl.underlying_type {
            Some(TypeName::Named { name, .. }) => match name.as_str() {
                "i8" | "u8" | "byte" => self.context.i8_type(),
                "i16" | "u16" => self.context.i16_type(),
                "i64" | "u64" => self.context.i64_type(),
                "usize" => self.usize_type(),
                _ => self.context.i32_type(),
            },
            _ => self.context.i32_type(),
        }
    }

    /// `{ i32 error_id, T value }`; a void payload drops the value slot.
    pub fn err_union_type(&self, payload: &TypeName) -> CodegenResult<StructType<'ctx>> {
        let payload = self.subst(payload);
        if payload.is_void() {
            return Ok(self
                .context
                .struct_type(&[self.context.i32_type().into()], false));
        }
        let payload_ty = self.lower_type(&payload)?;
        Ok(self
            .context
            .struct_type(&[self.context.i32_type().into(), payload_ty], false))
    }

    pub fn struct_type_for(&self, name: &str) -> Option<StructType<'ctx>> {
        self.struct_types.borrow().get(name).cloned()
    }

    /// Two-phase struct registration: reserve opaque handles for every
    /// struct (monomorphized instances included) at name-binding time, then
    /// complete each body once all handles exist. Cyclic references resolve
    /// through the pointer indirection.
    pub fn register_struct_types(&self) {
        let mut instances: Vec<(String, StructDeclaration, Vec<String>, Vec<TypeName>)> = vec![];

        for decl in &self.program.declarations {
            if let Declaration::Struct(s) = decl {
                if !s.is_generic() {
                    instances.push((s.name.clone(), s.clone(), vec![], vec![]));
                }
            }
        }
        for request in self.mono.borrow().requests() {
            if request.kind != MonoKind::Struct {
                continue;
            }
            if let Some(decl) = self.program.find_struct(&request.generic_name) {
                instances.push((
                    request.mangled.clone(),
                    decl.clone(),
                    decl.type_params.clone(),
                    request.type_args.clone(),
                ));
            }
        }

        for (name, _, _, _) in &instances {
            let opaque = self.context.opaque_struct_type(name);
            self.struct_types.borrow_mut().insert(name.clone(), opaque);
        }

        for (name, decl, params, args) in &instances {
            let mut fields = vec![];
            let mut ok = true;
            for field in &decl.fields {
                let field_ty = mono::substitute_in(&field.type_name, params, args);
                match self.lower_type(&field_ty) {
                    Ok(lowered) => fields.push(lowered),
                    Err(error) => {
                        self.diag(error);
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }
            if let Some(struct_type) = self.struct_type_for(name) {
                struct_type.set_body(&fields, false);
            }
        }
    }

    /// Struct declaration (with substitution arguments) behind a possibly
    /// monomorphized struct name.
    pub fn struct_decl_for(
        &self,
        name: &str,
    ) -> Option<(StructDeclaration, Vec<String>, Vec<TypeName>)> {
        if let Some(decl) = self.program.find_struct(name) {
            if !decl.is_generic() {
                return Some((decl.clone(), vec![], vec![]));
            }
        }
        let mono = self.mono.borrow();
        let request = mono
            .requests()
            .iter()
            .find(|r| r.kind == MonoKind::Struct && r.mangled == name)?;
        let decl = self.program.find_struct(&request.generic_name)?;
        Some((
            decl.clone(),
            decl.type_params.clone(),
            request.type_args.clone(),
        ))
    }

    pub fn struct_field_type(&self, struct_name: &str, field: &str) -> Option<TypeName> {
        let (decl, params, args) = self.struct_decl_for(struct_name)?;
        let field = decl.field(field)?;
        Some(mono::substitute_in(&field.type_name, &params, &args))
    }

    /// Byte size of a lowered type on the target; drives the extern ABI
    /// classification.
    pub fn byte_size_of(&self, ty: &TypeName) -> Option<u64> {
        self.size_and_align_of(ty).map(|(size, _)| size)
    }

    pub fn size_and_align_of(&self, ty: &TypeName) -> Option<(u64, u64)> {
        let ty = self.subst(ty);
        match &ty {
            TypeName::Named {
                name, type_args, ..
            } => {
                match name.as_str() {
                    "i8" | "u8" | "byte" | "bool" => return Some((1, 1)),
                    "i16" | "u16" => return Some((2, 2)),
                    "i32" | "u32" | "f32" => return Some((4, 4)),
                    "i64" | "u64" | "f64" => return Some((8, 8)),
                    "usize" => {
                        let w = self.pointer_bytes as u64;
                        return Some((w, w));
                    }
                    "void" => return Some((0, 1)),
                    _ => {}
                }
                if let Some(e) = self.program.find_enum(name) {
                    let width = self.enum_backing_type(e).get_bit_width() as u64 / 8;
                    return Some((width, width));
                }
                let struct_name = if type_args.is_empty() {
                    name.clone()
                } else {
                    mono::mangle_name(name, type_args)
                };
                let (decl, params, args) = self.struct_decl_for(&struct_name)?;
                let mut size = 0u64;
                let mut align = 1u64;
                for field in &decl.fields {
                    let field_ty = mono::substitute_in(&field.type_name, &params, &args);
                    let (field_size, field_align) = self.size_and_align_of(&field_ty)?;
                    size = round_up(size, field_align) + field_size;
                    align = align.max(field_align);
                }
                Some((round_up(size.max(1), align), align))
            }
            TypeName::Pointer { .. } | TypeName::Fn { .. } => {
                let w = self.pointer_bytes as u64;
                Some((w, w))
            }
            TypeName::Array { element, size, .. } => {
                let (elem, align) = self.size_and_align_of(element)?;
                Some((elem * size.literal()? as u64, align))
            }
            TypeName::Slice { .. } => {
                let w = self.pointer_bytes as u64;
                Some((2 * w, w))
            }
            TypeName::Tuple(items, _) => {
                let mut size = 0u64;
                let mut align = 1u64;
                for item in items {
                    let (item_size, item_align) = self.size_and_align_of(item)?;
                    size = round_up(size, item_align) + item_size;
                    align = align.max(item_align);
                }
                Some((round_up(size.max(1), align), align))
            }
            TypeName::ErrorUnion { payload, .. } => {
                if payload.is_void() {
                    return Some((4, 4));
                }
                let (payload_size, payload_align) = self.size_and_align_of(payload)?;
                let align = payload_align.max(4);
                Some((
                    round_up(round_up(4, payload_align) + payload_size, align),
                    align,
                ))
            }
            TypeName::Atomic { inner, .. } => self.size_and_align_of(inner),
        }
    }

    pub fn is_unsigned_type(&self, ty: &TypeName) -> bool {
        match ty {
            TypeName::Named { name, .. } => TypeName::is_unsigned_name(name),
            TypeName::Atomic { inner, .. } => self.is_unsigned_type(inner),
            _ => false,
        }
    }

    pub fn is_usize_type(&self, ty: &TypeName) -> bool {
        matches!(ty, TypeName::Named { name, .. } if name == "usize")
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}
