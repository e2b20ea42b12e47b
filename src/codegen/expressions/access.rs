//! Unary operators, assignment, member access, literals and casts.

use inkwell::types::BasicType;
use inkwell::values::{BasicValue, BasicValueEnum};

use crate::diagnostics::error_id;
use crate::mono::MonoKind;
use crate::parser::ast::*;

use super::super::{CodegenContext, CodegenError, CodegenResult};
use super::is_null_literal;

pub fn gen_unary<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    unary: &UnaryExpression,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    match unary.operator {
        UnaryOperator::Minus => {
            let value = ctx.gen_value(&unary.operand)?;
            let negated: BasicValueEnum = if value.is_float_value() {
                ctx.builder
                    .build_float_neg(value.into_float_value(), "")
                    .unwrap()
                    .as_basic_value_enum()
            } else {
                ctx.builder
                    .build_int_neg(value.into_int_value(), "")
                    .unwrap()
                    .as_basic_value_enum()
            };
            Ok(Some(negated))
        }
        UnaryOperator::Not => {
            let value = ctx.gen_value(&unary.operand)?.into_int_value();
            Ok(Some(
                ctx.builder
                    .build_xor(value, ctx.context.bool_type().const_int(1, false), "")
                    .unwrap()
                    .as_basic_value_enum(),
            ))
        }
        UnaryOperator::AddressOf => {
            let (ptr, _) = ctx.lvalue_address(&unary.operand)?;
            Ok(Some(ptr.as_basic_value_enum()))
        }
        UnaryOperator::Deref => {
            let pointee = match ctx.infer_type(&unary.operand) {
                Some(TypeName::Pointer { inner, .. }) => *inner,
                _ => {
                    return Err(CodegenError::lowering(
                        &unary.position,
                        "cannot dereference a non-pointer value",
                    ))
                }
            };
            let pointer = ctx.gen_value(&unary.operand)?.into_pointer_value();
            ctx.load_lvalue(pointer, &pointee).map(Some)
        }
        UnaryOperator::Try => super::control::gen_try(ctx, unary),
    }
}

pub fn gen_assignment<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    assign: &Assignment,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    let (ptr, slot_ty) = ctx.lvalue_address(&assign.lvalue)?;

    let value = if is_null_literal(&assign.rvalue) {
        ctx.null_pointer()
    } else {
        ctx.gen_value(&assign.rvalue)?
    };
    let _ = slot_ty;
    ctx.builder.build_store(ptr, value).unwrap();
    Ok(Some(value))
}

pub fn gen_member_access<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    access: &MemberAccess,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    // `error.Name` builds an error union of the enclosing return type
    if let Expression::Id(Id { name, .. }) = &access.object {
        if name == "error" {
            return gen_error_value(ctx, &access.field, &access.position);
        }
        if let Some(decl) = ctx.program.find_enum(name) {
            let value = decl.discriminant_of(&access.field).ok_or_else(|| {
                CodegenError::resolution(
                    &access.position,
                    format!("enum '{name}' has no variant '{}'", access.field),
                )
            })?;
            let backing = ctx.enum_backing_type(decl);
            return Ok(backing.const_int(value as u64, true).as_basic_value_enum());
        }
    }

    let (ptr, ty) = ctx.lvalue_address(&Expression::MemberAccess(Box::new(access.clone())))?;
    ctx.load_lvalue(ptr, &ty)
}

/// An error value: the error union of the enclosing function's return type
/// with the stable hash of the error name in the tag slot.
pub fn gen_error_value<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    name: &str,
    span: &crate::lexer::Span,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    if ctx.program.find_error(name).is_none() {
        ctx.diag(CodegenError::resolution(
            span,
            format!("unknown error '{name}'"),
        ));
    }

    let return_type = ctx.state.borrow().return_type.clone();
    let Some(return_type) = return_type else {
        return Err(CodegenError::lowering(
            span,
            "error value outside of a function",
        ));
    };
    if !return_type.is_error_union() {
        return Err(CodegenError::lowering(
            span,
            "error value requires the enclosing function to return an error union",
        ));
    }

    let payload = return_type.error_union_payload().clone();
    let union_ty = ctx.err_union_type(&payload)?;
    let tag = ctx
        .context
        .i32_type()
        .const_int(error_id(name) as u64, false);

    let undef = union_ty.get_undef();
    let with_tag = ctx
        .builder
        .build_insert_value(undef, tag, 0, "")
        .unwrap()
        .into_struct_value();
    Ok(with_tag.as_basic_value_enum())
}

pub fn gen_struct_init<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    init: &StructInitialisation,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let struct_name = if init.type_args.is_empty() {
        init.name.clone()
    } else {
        ctx.mono
            .borrow_mut()
            .request(MonoKind::Struct, &init.name, &init.type_args)
    };

    let struct_ty = ctx.struct_type_for(&struct_name).ok_or_else(|| {
        CodegenError::resolution(
            &init.position,
            format!("unknown struct '{}'", init.name),
        )
    })?;
    let (decl, _, _) = ctx.struct_decl_for(&struct_name).ok_or_else(|| {
        CodegenError::resolution(
            &init.position,
            format!("unknown struct '{}'", init.name),
        )
    })?;

    let mut value = struct_ty.get_undef().as_basic_value_enum();
    for field in &init.fields {
        let index = decl.field_index(&field.name).ok_or_else(|| {
            CodegenError::resolution(
                &field.position,
                format!(
                    "struct '{}' has no field '{}'",
                    init.name, field.name
                ),
            )
        })?;
        let field_value = ctx.gen_value(&field.value)?;
        value = ctx
            .builder
            .build_insert_value(
                value.into_struct_value(),
                field_value,
                index as u32,
                "",
            )
            .unwrap()
            .as_basic_value_enum();
    }
    Ok(value)
}

pub fn gen_array_literal<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    lit: &ArrayLiteral,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let element_ty = lit
        .elements
        .first()
        .and_then(|e| ctx.infer_type(e))
        .ok_or_else(|| {
            CodegenError::lowering(&lit.position, "cannot type an empty array literal")
        })?;
    let element = ctx.lower_type(&element_ty)?;
    let array_ty = element.array_type(lit.elements.len() as u32);

    let mut value = array_ty.get_undef();
    for (i, expr) in lit.elements.iter().enumerate() {
        let element_value = ctx.gen_value(expr)?;
        value = ctx
            .builder
            .build_insert_value(value, element_value, i as u32, "")
            .unwrap()
            .into_array_value();
    }
    Ok(value.as_basic_value_enum())
}

pub fn gen_tuple_literal<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    lit: &TupleLiteral,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let mut item_types = vec![];
    for element in &lit.elements {
        let ty = ctx.infer_type(element).ok_or_else(|| {
            CodegenError::lowering(&lit.position, "cannot type this tuple element")
        })?;
        item_types.push(ctx.lower_type(&ty)?);
    }
    let tuple_ty = ctx.context.struct_type(&item_types, false);

    let mut value = tuple_ty.get_undef();
    for (i, expr) in lit.elements.iter().enumerate() {
        let element_value = ctx.gen_value(expr)?;
        value = ctx
            .builder
            .build_insert_value(value, element_value, i as u32, "")
            .unwrap()
            .into_struct_value();
    }
    Ok(value.as_basic_value_enum())
}

/// `expr as T`: integer width changes respect source signedness, int/float
/// conversions go through si/ui fp casts, pointer casts are free under
/// opaque pointers.
pub fn gen_cast<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    cast: &CastExpression,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let source_ty = ctx.infer_type(&cast.expr);
    let value = ctx.gen_value(&cast.expr)?;
    let target = ctx.subst(&cast.target);
    let target_lowered = ctx.lower_type(&target)?;

    let source_unsigned = source_ty
        .as_ref()
        .map(|t| ctx.is_unsigned_type(t))
        .unwrap_or(false);
    let target_unsigned = ctx.is_unsigned_type(&target);

    let result: BasicValueEnum = match (value, target_lowered) {
        (BasicValueEnum::IntValue(int), inkwell::types::BasicTypeEnum::IntType(target_int)) => {
            let src_width = int.get_type().get_bit_width();
            let dst_width = target_int.get_bit_width();
            if src_width == dst_width {
                int.as_basic_value_enum()
            } else if src_width > dst_width {
                ctx.builder
                    .build_int_truncate(int, target_int, "")
                    .unwrap()
                    .as_basic_value_enum()
            } else if source_unsigned || src_width == 1 {
                ctx.builder
                    .build_int_z_extend(int, target_int, "")
                    .unwrap()
                    .as_basic_value_enum()
            } else {
                ctx.builder
                    .build_int_s_extend(int, target_int, "")
                    .unwrap()
                    .as_basic_value_enum()
            }
        }
        (
            BasicValueEnum::IntValue(int),
            inkwell::types::BasicTypeEnum::FloatType(target_float),
        ) => {
            if source_unsigned {
                ctx.builder
                    .build_unsigned_int_to_float(int, target_float, "")
                    .unwrap()
                    .as_basic_value_enum()
            } else {
                ctx.builder
                    .build_signed_int_to_float(int, target_float, "")
                    .unwrap()
                    .as_basic_value_enum()
            }
        }
        (
            BasicValueEnum::FloatValue(float),
            inkwell::types::BasicTypeEnum::IntType(target_int),
        ) => {
            if target_unsigned {
                ctx.builder
                    .build_float_to_unsigned_int(float, target_int, "")
                    .unwrap()
                    .as_basic_value_enum()
            } else {
                ctx.builder
                    .build_float_to_signed_int(float, target_int, "")
                    .unwrap()
                    .as_basic_value_enum()
            }
        }
        (
            BasicValueEnum::FloatValue(float),
            inkwell::types::BasicTypeEnum::FloatType(target_float),
        ) => {
            let src_bits = if float.get_type() == ctx.context.f32_type() {
                32
            } else {
                64
            };
            let dst_bits = if target_float == ctx.context.f32_type() {
                32
            } else {
                64
            };
            if src_bits < dst_bits {
                ctx.builder
                    .build_float_ext(float, target_float, "")
                    .unwrap()
                    .as_basic_value_enum()
            } else if src_bits > dst_bits {
                ctx.builder
                    .build_float_trunc(float, target_float, "")
                    .unwrap()
                    .as_basic_value_enum()
            } else {
                float.as_basic_value_enum()
            }
        }
        (BasicValueEnum::PointerValue(ptr), inkwell::types::BasicTypeEnum::PointerType(_)) => {
            ptr.as_basic_value_enum()
        }
        (BasicValueEnum::PointerValue(ptr), inkwell::types::BasicTypeEnum::IntType(target_int)) => {
            ctx.builder
                .build_ptr_to_int(ptr, target_int, "")
                .unwrap()
                .as_basic_value_enum()
        }
        (BasicValueEnum::IntValue(int), inkwell::types::BasicTypeEnum::PointerType(target_ptr)) => {
            ctx.builder
                .build_int_to_ptr(int, target_ptr, "")
                .unwrap()
                .as_basic_value_enum()
        }
        (value, _) => {
            return Err(CodegenError::lowering(
                &cast.position,
                format!("unsupported cast to {target} from {:?}", value.get_type()),
            ))
        }
    };
    Ok(result)
}
