//! Call lowering: direct and indirect calls, method dispatch, call-site
//! monomorphization, the builtins (`slice`, `@syscall`) and the System V
//! extern ABI (small-struct register packing, large-struct memory passing).

use inkwell::types::BasicType;
use inkwell::values::{BasicMetadataValueEnum, BasicValue, BasicValueEnum, IntValue};

use crate::mono::{self, MonoKind};
use crate::parser::ast::*;

use super::super::statements::ensure_instantiation_declared;
use super::super::{CodegenContext, CodegenError, CodegenResult, FuncEntry};

/// System V classification of an extern parameter or return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiClass {
    /// Scalar or pointer: passed through unchanged.
    Direct,
    /// Empty aggregate: takes no register.
    Ignore,
    /// Aggregate of at most eight bytes: one integer register of this width.
    IntRegister(u32),
    /// Aggregate of nine to sixteen bytes: two `i64` registers.
    TwoIntRegisters,
    /// Larger than sixteen bytes: passed or returned through memory.
    Memory,
}

/// Classify a type for an extern C signature.
pub fn classify_extern_type<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    ty: &TypeName,
) -> AbiClass {
    let ty = ctx.subst(ty);
    let is_aggregate = matches!(
        &ty,
        TypeName::Named { .. } | TypeName::Tuple(..) | TypeName::Slice { .. }
    ) && matches!(ctx.lower_type(&ty), Ok(t) if t.is_struct_type());

    if !is_aggregate {
        return AbiClass::Direct;
    }

    match ctx.byte_size_of(&ty) {
        Some(0) => AbiClass::Ignore,
        Some(size) if size <= 8 => AbiClass::IntRegister((size * 8) as u32),
        Some(size) if size <= 16 => AbiClass::TwoIntRegisters,
        Some(_) => AbiClass::Memory,
        None => AbiClass::Direct,
    }
}

pub fn gen_call<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    call: &CallExpression,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    if let Some(name) = call.callee_name() {
        match name {
            "@syscall" => return gen_syscall(ctx, call).map(Some),
            "slice" if call.args.len() == 3 => return gen_slice(ctx, call).map(Some),
            _ => {}
        }
    }

    if let Expression::MemberAccess(access) = &call.callee {
        let is_plain_object = matches!(&access.object, Expression::Id(Id { name, .. })
            if name == "error" || ctx.program.find_enum(name).is_some());
        if !is_plain_object {
            return gen_method_call(ctx, call, access);
        }
    }

    let Some(name) = call.callee_name().map(|s| s.to_string()) else {
        return gen_indirect_call(ctx, call);
    };

    // call-site monomorphization
    let lookup_name = if call.type_args.is_empty() {
        name.clone()
    } else {
        let mangled = ctx
            .mono
            .borrow_mut()
            .request(MonoKind::Function, &name, &call.type_args);
        ensure_instantiation_declared(ctx, &mangled);
        mangled
    };

    let Some(entry) = ctx.find_func(&lookup_name) else {
        // not a known function: maybe a local holding a function pointer
        if ctx.find_var(&name).is_some() {
            return gen_indirect_call(ctx, call);
        }
        return Err(CodegenError::resolution(
            &call.position,
            format!("unknown function '{name}'"),
        ));
    };

    if entry.is_extern_import {
        return gen_extern_call(ctx, call, &entry);
    }

    let mut args: Vec<BasicMetadataValueEnum> = vec![];
    for (i, arg) in call.args.iter().enumerate() {
        let value = gen_adapted_arg(ctx, arg, entry.param_types.get(i))?;
        args.push(value.into());
    }

    let result = ctx
        .builder
        .build_call(entry.value, &args, "")
        .unwrap()
        .try_as_basic_value();
    Ok(result.left())
}

/// Adapt one argument to the declared parameter type: when the callee
/// expects `*S` but the source passes an `S` value, the value is spilled to
/// a stack slot and its address is passed.
fn gen_adapted_arg<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    arg: &Expression,
    param_ty: Option<&TypeName>,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    if let Some(param_ty) = param_ty {
        let param_ty = ctx.subst(param_ty);
        if let TypeName::Pointer { .. } = &param_ty {
            let arg_ty = ctx.infer_type(arg);
            let arg_is_pointer = matches!(arg_ty, Some(TypeName::Pointer { .. }));
            if !arg_is_pointer && !super::is_null_literal(arg) {
                let (ptr, _) = ctx.lvalue_address(arg)?;
                return Ok(ptr.as_basic_value_enum());
            }
        }
        if super::is_null_literal(arg) {
            return Ok(ctx.null_pointer());
        }
    }
    ctx.gen_value(arg)
}

fn gen_indirect_call<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    call: &CallExpression,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    let callee_ty = ctx.infer_type(&call.callee).ok_or_else(|| {
        CodegenError::resolution(&call.position, "cannot type this call target")
    })?;
    let TypeName::Fn {
        params,
        return_type,
        ..
    } = ctx.subst(&callee_ty)
    else {
        return Err(CodegenError::lowering(
            &call.position,
            "call target is not a function",
        ));
    };

    let mut param_types = vec![];
    for param in &params {
        param_types.push(ctx.lower_type(param)?.into());
    }
    let fn_type = if return_type.is_void() {
        ctx.context.void_type().fn_type(&param_types, false)
    } else {
        let ret = ctx.lower_type(&return_type)?;
        ret.fn_type(&param_types, false)
    };

    let pointer = ctx.gen_value(&call.callee)?.into_pointer_value();
    let mut args: Vec<BasicMetadataValueEnum> = vec![];
    for arg in &call.args {
        args.push(ctx.gen_value(arg)?.into());
    }

    let result = ctx
        .builder
        .build_indirect_call(fn_type, pointer, &args, "")
        .unwrap()
        .try_as_basic_value();
    Ok(result.left())
}

fn gen_method_call<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    call: &CallExpression,
    access: &MemberAccess,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    let object_ty = ctx.infer_type(&access.object).ok_or_else(|| {
        CodegenError::resolution(
            &access.position,
            format!("cannot resolve a method receiver for '{}'", access.field),
        )
    })?;

    let (receiver_ty, object_is_pointer) = match ctx.subst(&object_ty) {
        TypeName::Pointer { inner, .. } => (*inner, true),
        other => (other, false),
    };
    let TypeName::Named {
        name, type_args, ..
    } = receiver_ty
    else {
        return Err(CodegenError::lowering(
            &access.position,
            "method receiver is not a struct",
        ));
    };
    let struct_name = if type_args.is_empty() {
        name
    } else {
        mono::mangle_name(&name, &type_args)
    };

    // reverse lookup through the monomorphized name when needed
    let method = ctx
        .program
        .find_method(&struct_name, &access.field)
        .cloned()
        .or_else(|| {
            let base = mono::generic_base_of(&struct_name, |prefix| {
                ctx.program
                    .find_struct(prefix)
                    .is_some_and(|s| s.is_generic())
            })?;
            ctx.program.find_method(base, &access.field).cloned()
        })
        .ok_or_else(|| {
            CodegenError::resolution(
                &access.position,
                format!("struct '{struct_name}' has no method '{}'", access.field),
            )
        })?;

    let symbol = format!("uya_{struct_name}_{}", access.field);
    ensure_instantiation_declared(ctx, &symbol);
    let entry = ctx.find_func(&symbol).ok_or_else(|| {
        CodegenError::resolution(
            &access.position,
            format!("method '{symbol}' was never declared"),
        )
    })?;

    let receiver_by_pointer = method
        .params
        .first()
        .map(|p| {
            matches!(&p.type_name, TypeName::Pointer { .. })
                || matches!(&p.type_name, TypeName::Named { name, .. } if name == "Self")
        })
        .unwrap_or(false);

    let receiver: BasicValueEnum = if object_is_pointer {
        ctx.gen_value(&access.object)?
    } else if receiver_by_pointer {
        let (ptr, _) = ctx.lvalue_address(&access.object)?;
        ptr.as_basic_value_enum()
    } else {
        ctx.gen_value(&access.object)?
    };

    let mut args: Vec<BasicMetadataValueEnum> = vec![receiver.into()];
    for (i, arg) in call.args.iter().enumerate() {
        let value = gen_adapted_arg(ctx, arg, entry.param_types.get(i + 1))?;
        args.push(value.into());
    }

    let result = ctx
        .builder
        .build_call(entry.value, &args, "")
        .unwrap()
        .try_as_basic_value();
    Ok(result.left())
}

/// Extern C call under the modeled System V ABI.
fn gen_extern_call<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    call: &CallExpression,
    entry: &FuncEntry<'ctx>,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    let i64_ty = ctx.context.i64_type();
    let i8_ty = ctx.context.i8_type();
    let mut args: Vec<BasicMetadataValueEnum> = vec![];

    // memory-class returns arrive through a hidden out-parameter
    let ret_class = classify_extern_type(ctx, &entry.return_type);
    let mut sret_slot = None;
    if ret_class == AbiClass::Memory {
        let ret_lowered = ctx.lower_type(&entry.return_type)?;
        let slot = ctx.build_entry_alloca(ret_lowered, "sret")?;
        args.push(slot.as_basic_value_enum().into());
        sret_slot = Some((slot, ret_lowered));
    }

    for (i, arg) in call.args.iter().enumerate() {
        let Some(param_ty) = entry.param_types.get(i) else {
            // varargs tail: C default argument promotions
            let value = ctx.gen_value(arg)?;
            args.push(promote_vararg(ctx, value).into());
            continue;
        };

        match classify_extern_type(ctx, param_ty) {
            AbiClass::Direct => {
                let value = gen_adapted_arg(ctx, arg, Some(param_ty))?;
                args.push(value.into());
            }
            AbiClass::Ignore => {
                let _ = ctx.gen_value(arg)?;
            }
            AbiClass::IntRegister(bits) => {
                // pack through memory: spill into a register-sized slot,
                // reload as one integer
                let value = ctx.gen_value(arg)?;
                let slot = ctx.build_entry_alloca(i64_ty.into(), "abi_pack")?;
                ctx.builder.build_store(slot, i64_ty.const_zero()).unwrap();
                ctx.builder.build_store(slot, value).unwrap();
                let int_ty = ctx.context.custom_width_int_type(bits);
                let packed = ctx.builder.build_load(int_ty, slot, "").unwrap();
                args.push(packed.into());
            }
            AbiClass::TwoIntRegisters => {
                // a two-register slot keeps the second load in bounds for
                // 9..16-byte aggregates
                let value = ctx.gen_value(arg)?;
                let pair_ty = i64_ty.array_type(2);
                let slot = ctx.build_entry_alloca(pair_ty.into(), "abi_pack")?;
                ctx.builder
                    .build_store(slot, pair_ty.const_zero())
                    .unwrap();
                ctx.builder.build_store(slot, value).unwrap();
                let low = ctx.builder.build_load(i64_ty, slot, "").unwrap();
                let eight = i64_ty.const_int(8, false);
                let high_ptr = unsafe {
                    ctx.builder
                        .build_in_bounds_gep(i8_ty, slot, &[eight], "")
                        .unwrap()
                };
                let high = ctx.builder.build_load(i64_ty, high_ptr, "").unwrap();
                args.push(low.into());
                args.push(high.into());
            }
            AbiClass::Memory => {
                let (ptr, _) = ctx.lvalue_address(arg)?;
                args.push(ptr.as_basic_value_enum().into());
            }
        }
    }

    let call_value = ctx.builder.build_call(entry.value, &args, "").unwrap();

    match ret_class {
        AbiClass::Direct | AbiClass::Ignore => Ok(call_value.try_as_basic_value().left()),
        AbiClass::Memory => {
            let (slot, lowered) = sret_slot.unwrap();
            Ok(Some(
                ctx.builder
                    .build_load(lowered, slot, "")
                    .unwrap()
                    .as_basic_value_enum(),
            ))
        }
        AbiClass::IntRegister(_) => {
            // unpack through an alloca round-trip
            let packed = call_value.try_as_basic_value().left().ok_or_else(|| {
                CodegenError::abi(&call.position, "extern call produced no value")
            })?;
            let ret_lowered = ctx.lower_type(&entry.return_type)?;
            let slot = ctx.build_entry_alloca(i64_ty.into(), "abi_ret")?;
            ctx.builder.build_store(slot, i64_ty.const_zero()).unwrap();
            ctx.builder.build_store(slot, packed).unwrap();
            Ok(Some(
                ctx.builder
                    .build_load(ret_lowered, slot, "")
                    .unwrap()
                    .as_basic_value_enum(),
            ))
        }
        AbiClass::TwoIntRegisters => {
            let pair = call_value
                .try_as_basic_value()
                .left()
                .ok_or_else(|| {
                    CodegenError::abi(&call.position, "extern call produced no value")
                })?
                .into_struct_value();
            let low = ctx.builder.build_extract_value(pair, 0, "").unwrap();
            let high = ctx.builder.build_extract_value(pair, 1, "").unwrap();

            let ret_lowered = ctx.lower_type(&entry.return_type)?;
            let pair_ty = i64_ty.array_type(2);
            let slot = ctx.build_entry_alloca(pair_ty.into(), "abi_ret")?;
            ctx.builder.build_store(slot, low).unwrap();
            let eight = i64_ty.const_int(8, false);
            let high_ptr = unsafe {
                ctx.builder
                    .build_in_bounds_gep(i8_ty, slot, &[eight], "")
                    .unwrap()
            };
            ctx.builder.build_store(high_ptr, high).unwrap();
            Ok(Some(
                ctx.builder
                    .build_load(ret_lowered, slot, "")
                    .unwrap()
                    .as_basic_value_enum(),
            ))
        }
    }
}

/// C default argument promotions for the varargs tail.
fn promote_vararg<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    value: BasicValueEnum<'ctx>,
) -> BasicValueEnum<'ctx> {
    match value {
        BasicValueEnum::FloatValue(float) if float.get_type() == ctx.context.f32_type() => ctx
            .builder
            .build_float_ext(float, ctx.context.f64_type(), "")
            .unwrap()
            .as_basic_value_enum(),
        BasicValueEnum::IntValue(int) if int.get_type().get_bit_width() < 32 => ctx
            .builder
            .build_int_s_extend(int, ctx.context.i32_type(), "")
            .unwrap()
            .as_basic_value_enum(),
        other => other,
    }
}

/// `slice(base, start, len)`: a `{ ptr, usize }` value viewing into the
/// base buffer.
fn gen_slice<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    call: &CallExpression,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let base_ty = ctx.infer_type(&call.args[0]).ok_or_else(|| {
        CodegenError::lowering(&call.position, "cannot type the sliced expression")
    })?;

    let start = ctx.gen_value(&call.args[1])?.into_int_value();
    let len = ctx.gen_value(&call.args[2])?.into_int_value();

    let (data_ptr, element_ty) = match &base_ty {
        TypeName::Array { element, .. } => {
            let (base_ptr, _) = ctx.lvalue_address(&call.args[0])?;
            let array_ty = ctx.lower_type(&base_ty)?;
            let zero = ctx.context.i32_type().const_zero();
            let ptr = unsafe {
                ctx.builder
                    .build_in_bounds_gep(array_ty, base_ptr, &[zero, start], "")
                    .unwrap()
            };
            (ptr, element.as_ref().clone())
        }
        TypeName::Slice { element, .. } => {
            let value = ctx.gen_value(&call.args[0])?.into_struct_value();
            let base = ctx
                .builder
                .build_extract_value(value, 0, "")
                .unwrap()
                .into_pointer_value();
            let lowered = ctx.lower_type(element)?;
            let ptr = unsafe {
                ctx.builder
                    .build_in_bounds_gep(lowered, base, &[start], "")
                    .unwrap()
            };
            (ptr, element.as_ref().clone())
        }
        TypeName::Pointer { inner, .. } => {
            let base = ctx.gen_value(&call.args[0])?.into_pointer_value();
            let lowered = ctx.lower_type(inner)?;
            let ptr = unsafe {
                ctx.builder
                    .build_in_bounds_gep(lowered, base, &[start], "")
                    .unwrap()
            };
            (ptr, inner.as_ref().clone())
        }
        other => {
            return Err(CodegenError::lowering(
                &call.position,
                format!("cannot slice a value of type {other}"),
            ))
        }
    };

    let slice_ty = ctx.lower_type(&TypeName::Slice {
        element: Box::new(element_ty),
        position: call.position.clone(),
    })?;
    let len = widen_to_usize(ctx, len);

    let undef = slice_ty.into_struct_type().get_undef();
    let with_ptr = ctx
        .builder
        .build_insert_value(undef, data_ptr, 0, "")
        .unwrap()
        .into_struct_value();
    let complete = ctx
        .builder
        .build_insert_value(with_ptr, len, 1, "")
        .unwrap()
        .into_struct_value();
    Ok(complete.as_basic_value_enum())
}

fn widen_to_usize<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    value: IntValue<'ctx>,
) -> IntValue<'ctx> {
    let usize_ty = ctx.usize_type();
    if value.get_type().get_bit_width() == usize_ty.get_bit_width() {
        value
    } else if value.get_type().get_bit_width() < usize_ty.get_bit_width() {
        ctx.builder.build_int_z_extend(value, usize_ty, "").unwrap()
    } else {
        ctx.builder.build_int_truncate(value, usize_ty, "").unwrap()
    }
}

/// `@syscall(n, ...)` through the runtime's `uya_syscallN` symbols. A
/// negative return maps to `{ error_id = -ret }`, otherwise the value rides
/// in the success slot.
fn gen_syscall<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    call: &CallExpression,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    if call.args.is_empty() || call.args.len() > 7 {
        return Err(CodegenError::lowering(
            &call.position,
            "@syscall takes a syscall number plus at most six arguments",
        ));
    }

    let i64_ty = ctx.context.i64_type();
    let helper_name = format!("uya_syscall{}", call.args.len() - 1);
    let helper = match ctx.module.get_function(&helper_name) {
        Some(f) => f,
        None => {
            let params: Vec<inkwell::types::BasicMetadataTypeEnum> =
                (0..call.args.len()).map(|_| i64_ty.into()).collect();
            ctx.module
                .add_function(&helper_name, i64_ty.fn_type(&params, false), None)
        }
    };

    let mut args: Vec<BasicMetadataValueEnum> = vec![];
    for arg in &call.args {
        let value = ctx.gen_value(arg)?;
        let as_i64: IntValue = match value {
            BasicValueEnum::IntValue(int) => {
                if int.get_type().get_bit_width() == 64 {
                    int
                } else {
                    ctx.builder.build_int_s_extend(int, i64_ty, "").unwrap()
                }
            }
            BasicValueEnum::PointerValue(ptr) => {
                ctx.builder.build_ptr_to_int(ptr, i64_ty, "").unwrap()
            }
            other => {
                return Err(CodegenError::lowering(
                    &call.position,
                    format!("@syscall argument has unsupported shape {:?}", other.get_type()),
                ))
            }
        };
        args.push(as_i64.into());
    }

    let ret = ctx
        .builder
        .build_call(helper, &args, "")
        .unwrap()
        .try_as_basic_value()
        .left()
        .unwrap()
        .into_int_value();

    let zero64 = i64_ty.const_zero();
    let failed = ctx
        .builder
        .build_int_compare(inkwell::IntPredicate::SLT, ret, zero64, "")
        .unwrap();
    let negated = ctx.builder.build_int_neg(ret, "").unwrap();
    let tag64 = ctx
        .builder
        .build_select(failed, negated, zero64, "")
        .unwrap()
        .into_int_value();
    let tag = ctx
        .builder
        .build_int_truncate(tag64, ctx.context.i32_type(), "")
        .unwrap();
    let value = ctx
        .builder
        .build_select(failed, zero64, ret, "")
        .unwrap()
        .into_int_value();

    let union_ty = ctx.context.struct_type(
        &[ctx.context.i32_type().into(), i64_ty.into()],
        false,
    );
    let undef = union_ty.get_undef();
    let with_tag = ctx
        .builder
        .build_insert_value(undef, tag, 0, "")
        .unwrap()
        .into_struct_value();
    let complete = ctx
        .builder
        .build_insert_value(with_tag, value, 1, "")
        .unwrap()
        .into_struct_value();
    Ok(complete.as_basic_value_enum())
}
