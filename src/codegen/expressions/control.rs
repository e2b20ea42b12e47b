//! Control-flow expressions: `try`, `catch`, `match`, block expressions,
//! `len` and string interpolation.

use inkwell::values::{BasicValue, BasicValueEnum, IntValue, PointerValue};
use inkwell::AddressSpace;

use crate::parser::ast::*;

use super::super::{CodeGen, CodegenContext, CodegenError, CodegenResult};

/// `try expr`: evaluate the error union; a nonzero tag runs the deferred
/// cleanups and propagates through the synthesized return path, otherwise
/// the payload is the value.
pub fn gen_try<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    unary: &UnaryExpression,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    let payload = match ctx.infer_type(&unary.operand) {
        Some(TypeName::ErrorUnion { payload, .. }) => *payload,
        _ => {
            return Err(CodegenError::lowering(
                &unary.position,
                "operand of 'try' is not an error union",
            ))
        }
    };

    let (return_type, ret_slot, ret_block) = {
        let state = ctx.state.borrow();
        (
            state.return_type.clone(),
            state.ret_slot,
            state.ret_block,
        )
    };
    let Some(return_type) = return_type else {
        return Err(CodegenError::lowering(
            &unary.position,
            "'try' outside of a function",
        ));
    };
    if !return_type.is_error_union() {
        let mut error = CodegenError::lowering(
            &unary.position,
            "'try' requires the enclosing function to return an error union",
        );
        error.suggestion = Some("change the return type to !T".into());
        return Err(error);
    }

    let value = ctx.gen_value(&unary.operand)?.into_struct_value();
    let tag = ctx
        .builder
        .build_extract_value(value, 0, "error_id")
        .unwrap()
        .into_int_value();
    let is_error = ctx
        .builder
        .build_int_compare(
            inkwell::IntPredicate::NE,
            tag,
            ctx.context.i32_type().const_zero(),
            "",
        )
        .unwrap();

    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .unwrap();
    let id = ctx.next_block_id();
    let propagate_bb = ctx
        .context
        .append_basic_block(function, &format!("try_propagate.{id}"));
    let continue_bb = ctx
        .context
        .append_basic_block(function, &format!("try_continue.{id}"));

    ctx.builder
        .build_conditional_branch(is_error, propagate_bb, continue_bb)
        .unwrap();

    // error path: cleanups, then the enclosing error union with the same tag
    ctx.builder.position_at_end(propagate_bb);
    ctx.emit_defer_bodies(true)?;

    let ret_payload = return_type.error_union_payload().clone();
    let ret_union_ty = ctx.err_union_type(&ret_payload)?;
    let undef = ret_union_ty.get_undef();
    let propagated = ctx
        .builder
        .build_insert_value(undef, tag, 0, "")
        .unwrap()
        .into_struct_value();

    match (ret_slot, ret_block) {
        (Some(slot), Some(block)) => {
            ctx.builder.build_store(slot, propagated).unwrap();
            ctx.builder.build_unconditional_branch(block).unwrap();
        }
        _ => {
            ctx.builder
                .build_return(Some(&propagated.as_basic_value_enum()))
                .unwrap();
        }
    }

    ctx.builder.position_at_end(continue_bb);
    if payload.is_void() {
        Ok(None)
    } else {
        Ok(Some(
            ctx.builder
                .build_extract_value(value, 1, "payload")
                .unwrap(),
        ))
    }
}

/// `expr catch [|err|] body`: bind the error id and run the handler when
/// the tag is nonzero; the handler's value (or the payload) flows through a
/// result slot.
pub fn gen_catch<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    catch: &CatchExpression,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    let payload = match ctx.infer_type(&catch.expr) {
        Some(TypeName::ErrorUnion { payload, .. }) => *payload,
        _ => {
            return Err(CodegenError::lowering(
                &catch.position,
                "operand of 'catch' is not an error union",
            ))
        }
    };

    let value = ctx.gen_value(&catch.expr)?.into_struct_value();
    let tag = ctx
        .builder
        .build_extract_value(value, 0, "error_id")
        .unwrap()
        .into_int_value();
    let is_error = ctx
        .builder
        .build_int_compare(
            inkwell::IntPredicate::NE,
            tag,
            ctx.context.i32_type().const_zero(),
            "",
        )
        .unwrap();

    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .unwrap();
    let id = ctx.next_block_id();
    let handler_bb = ctx
        .context
        .append_basic_block(function, &format!("catch_handler.{id}"));
    let ok_bb = ctx
        .context
        .append_basic_block(function, &format!("catch_ok.{id}"));
    let merge_bb = ctx
        .context
        .append_basic_block(function, &format!("catch_merge.{id}"));

    let result_slot = if payload.is_void() {
        None
    } else {
        let lowered = ctx.lower_type(&payload)?;
        Some((ctx.build_entry_alloca(lowered, "catch_result")?, lowered))
    };

    ctx.builder
        .build_conditional_branch(is_error, handler_bb, ok_bb)
        .unwrap();

    // handler: bind |err| and evaluate the body
    ctx.builder.position_at_end(handler_bb);
    ctx.enter_scope();
    if let Some(error_var) = &catch.error_var {
        let slot = ctx.build_entry_alloca(ctx.context.i32_type().into(), error_var)?;
        ctx.builder.build_store(slot, tag).unwrap();
        ctx.add_var(
            error_var,
            slot,
            ctx.context.i32_type().into(),
            TypeName::named("u32", catch.position.clone()),
        );
    }
    let handler_value = gen_body_value(ctx, &catch.body)?;
    if ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_terminator())
        .is_none()
    {
        if let (Some((slot, _)), Some(handler_value)) = (result_slot, handler_value) {
            ctx.builder.build_store(slot, handler_value).unwrap();
        }
        ctx.builder.build_unconditional_branch(merge_bb).unwrap();
    }
    ctx.exit_scope();

    // success: the payload is the value
    ctx.builder.position_at_end(ok_bb);
    if let Some((slot, _)) = result_slot {
        let payload_value = ctx.builder.build_extract_value(value, 1, "").unwrap();
        ctx.builder.build_store(slot, payload_value).unwrap();
    }
    ctx.builder.build_unconditional_branch(merge_bb).unwrap();

    ctx.builder.position_at_end(merge_bb);
    match result_slot {
        Some((slot, lowered)) => Ok(Some(
            ctx.builder
                .build_load(lowered, slot, "")
                .unwrap()
                .as_basic_value_enum(),
        )),
        None => Ok(None),
    }
}

/// Value of a catch/match body: a block yields its trailing expression, a
/// bare expression yields itself.
fn gen_body_value<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    body: &Expression,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    match body {
        Expression::Block(block) => gen_block_expr(ctx, block),
        other => other.codegen(ctx),
    }
}

pub fn gen_block_expr<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    block: &Block,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    ctx.enter_scope();
    let upto = match block.trailing_expression() {
        Some(_) => block.statements.len() - 1,
        None => block.statements.len(),
    };
    for stmt in &block.statements[..upto] {
        stmt.codegen(ctx)?;
        if ctx
            .builder
            .get_insert_block()
            .and_then(|bb| bb.get_terminator())
            .is_some()
        {
            ctx.exit_scope();
            return Ok(None);
        }
    }
    let value = match block.trailing_expression() {
        Some(expr) => expr.codegen(ctx)?,
        None => None,
    };
    ctx.exit_scope();
    Ok(value)
}

/// `match` as a branch chain in declaration order with a result slot; a
/// bound identifier or `else` arm is the unconditional tail.
pub fn gen_match<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    m: &MatchExpression,
) -> CodegenResult<Option<BasicValueEnum<'ctx>>> {
    let scrutinee_ty = ctx.infer_type(&m.scrutinee);
    let scrutinee = ctx.gen_value(&m.scrutinee)?;

    let result_ty = m.arms.first().and_then(|arm| ctx.infer_type(&arm.body));
    let result_slot = match &result_ty {
        Some(ty) if !ty.is_void() => {
            let lowered = ctx.lower_type(ty)?;
            Some((ctx.build_entry_alloca(lowered, "match_result")?, lowered))
        }
        _ => None,
    };

    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .unwrap();
    let id = ctx.next_block_id();
    let merge_bb = ctx
        .context
        .append_basic_block(function, &format!("match_merge.{id}"));

    for (arm_index, arm) in m.arms.iter().enumerate() {
        let arm_bb = ctx
            .context
            .append_basic_block(function, &format!("match_arm.{id}.{arm_index}"));
        let next_bb = ctx
            .context
            .append_basic_block(function, &format!("match_next.{id}.{arm_index}"));

        match &arm.pattern {
            Pattern::Literal(pattern) => {
                let matched = gen_pattern_test(ctx, scrutinee, pattern)?;
                ctx.builder
                    .build_conditional_branch(matched, arm_bb, next_bb)
                    .unwrap();
            }
            Pattern::Binding(_, _) | Pattern::CatchAll(_) => {
                ctx.builder.build_unconditional_branch(arm_bb).unwrap();
            }
        }

        ctx.builder.position_at_end(arm_bb);
        ctx.enter_scope();
        if let Pattern::Binding(name, position) = &arm.pattern {
            let binding_ty = scrutinee_ty
                .clone()
                .unwrap_or_else(|| TypeName::named("i32", position.clone()));
            let lowered = ctx.lower_type(&binding_ty)?;
            let slot = ctx.build_entry_alloca(lowered, name)?;
            ctx.builder.build_store(slot, scrutinee).unwrap();
            ctx.add_var(name, slot, lowered, binding_ty);
        }
        let body_value = gen_body_value(ctx, &arm.body)?;
        if ctx
            .builder
            .get_insert_block()
            .and_then(|bb| bb.get_terminator())
            .is_none()
        {
            if let (Some((slot, _)), Some(body_value)) = (result_slot, body_value) {
                ctx.builder.build_store(slot, body_value).unwrap();
            }
            ctx.builder.build_unconditional_branch(merge_bb).unwrap();
        }
        ctx.exit_scope();

        ctx.builder.position_at_end(next_bb);
    }

    // no arm matched
    ctx.builder.build_unconditional_branch(merge_bb).unwrap();

    ctx.builder.position_at_end(merge_bb);
    match result_slot {
        Some((slot, lowered)) => Ok(Some(
            ctx.builder
                .build_load(lowered, slot, "")
                .unwrap()
                .as_basic_value_enum(),
        )),
        None => Ok(None),
    }
}

fn gen_pattern_test<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    scrutinee: BasicValueEnum<'ctx>,
    pattern: &Expression,
) -> CodegenResult<IntValue<'ctx>> {
    match pattern {
        Expression::TupleLiteral(lit) => {
            let mut result = ctx.context.bool_type().const_int(1, false);
            for (i, element) in lit.elements.iter().enumerate() {
                let scrutinee_elem = ctx
                    .builder
                    .build_extract_value(scrutinee.into_struct_value(), i as u32, "")
                    .unwrap();
                let eq = gen_pattern_test(ctx, scrutinee_elem, element)?;
                result = ctx.builder.build_and(result, eq, "").unwrap();
            }
            Ok(result)
        }
        Expression::AstString(s) => Err(CodegenError::lowering(
            &s.position,
            "string patterns are not supported in this backend",
        )),
        other => {
            let mut pattern_value = ctx.gen_value(other)?;

            // widen the pattern literal to the scrutinee's width
            if let (BasicValueEnum::IntValue(s), BasicValueEnum::IntValue(p)) =
                (scrutinee, pattern_value)
            {
                if s.get_type() != p.get_type() {
                    let adjusted = if s.get_type().get_bit_width()
                        > p.get_type().get_bit_width()
                    {
                        ctx.builder
                            .build_int_s_extend(p, s.get_type(), "")
                            .unwrap()
                    } else {
                        ctx.builder
                            .build_int_truncate(p, s.get_type(), "")
                            .unwrap()
                    };
                    pattern_value = adjusted.as_basic_value_enum();
                }
            }

            match (scrutinee, pattern_value) {
                (BasicValueEnum::IntValue(s), BasicValueEnum::IntValue(p)) => Ok(ctx
                    .builder
                    .build_int_compare(inkwell::IntPredicate::EQ, s, p, "")
                    .unwrap()),
                (BasicValueEnum::FloatValue(s), BasicValueEnum::FloatValue(p)) => Ok(ctx
                    .builder
                    .build_float_compare(inkwell::FloatPredicate::OEQ, s, p, "")
                    .unwrap()),
                _ => Err(CodegenError::lowering(
                    &other.position(),
                    "unsupported pattern shape",
                )),
            }
        }
    }
}

/// `len(x)`: fixed arrays are compile-time constants, slices read their
/// length slot.
pub fn gen_len<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    l: &LenExpression,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    match ctx.infer_type(&l.target) {
        Some(TypeName::Array { size, .. }) => {
            let n = size.literal().ok_or_else(|| {
                CodegenError::resolution(&l.position, "array size did not resolve")
            })?;
            Ok(ctx
                .usize_type()
                .const_int(n as u64, false)
                .as_basic_value_enum())
        }
        Some(TypeName::Slice { .. }) => {
            let value = ctx.gen_value(&l.target)?.into_struct_value();
            Ok(ctx.builder.build_extract_value(value, 1, "len").unwrap())
        }
        _ => Err(CodegenError::lowering(
            &l.position,
            "len() takes an array or a slice",
        )),
    }
}

/// String interpolation through a fixed-size stack buffer: literal runs
/// `memcpy` from private globals, `${expr}` segments go through `sprintf`.
pub fn gen_interpolation<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    interp: &StringInterpolation,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let i8_ty = ctx.context.i8_type();
    let usize_ty = ctx.usize_type();

    let buffer_ty = i8_ty.array_type(512);
    let buffer = ctx.build_entry_alloca(buffer_ty.into(), "msg")?;
    let len_slot = ctx.build_entry_alloca(usize_ty.into(), "msg_len")?;
    ctx.builder
        .build_store(len_slot, usize_ty.const_zero())
        .unwrap();

    let cursor = |ctx: &CodegenContext<'a, 'ctx>| -> PointerValue<'ctx> {
        let len = ctx
            .builder
            .build_load(usize_ty, len_slot, "")
            .unwrap()
            .into_int_value();
        unsafe {
            ctx.builder
                .build_in_bounds_gep(i8_ty, buffer, &[len], "")
                .unwrap()
        }
    };

    for segment in &interp.segments {
        match segment {
            InterpSegment::Text(text) => {
                let content = unescape::unescape(text).unwrap_or_else(|| text.clone());
                let global = ctx
                    .builder
                    .build_global_string_ptr(&content, "interp_text")
                    .unwrap();
                let dest = cursor(ctx);
                let byte_len = usize_ty.const_int(content.len() as u64, false);
                let memcpy = get_memcpy(ctx);
                ctx.builder
                    .build_call(
                        memcpy,
                        &[
                            dest.into(),
                            global.as_pointer_value().into(),
                            byte_len.into(),
                        ],
                        "",
                    )
                    .unwrap();
                let len = ctx
                    .builder
                    .build_load(usize_ty, len_slot, "")
                    .unwrap()
                    .into_int_value();
                let new_len = ctx.builder.build_int_add(len, byte_len, "").unwrap();
                ctx.builder.build_store(len_slot, new_len).unwrap();
            }
            InterpSegment::Expr { expr, format } => {
                let spec = match format {
                    Some(spec) => render_format_spec(spec),
                    None => default_format(ctx, expr).to_string(),
                };
                let format_global = ctx
                    .builder
                    .build_global_string_ptr(&spec, "interp_fmt")
                    .unwrap();
                let value = ctx.gen_value(expr)?;
                let promoted = promote_format_arg(ctx, value);

                let dest = cursor(ctx);
                let sprintf = get_sprintf(ctx);
                let written = ctx
                    .builder
                    .build_call(
                        sprintf,
                        &[
                            dest.into(),
                            format_global.as_pointer_value().into(),
                            promoted.into(),
                        ],
                        "",
                    )
                    .unwrap()
                    .try_as_basic_value()
                    .left()
                    .unwrap()
                    .into_int_value();
                let written = ctx
                    .builder
                    .build_int_z_extend_or_bit_cast(written, usize_ty, "")
                    .unwrap();
                let len = ctx
                    .builder
                    .build_load(usize_ty, len_slot, "")
                    .unwrap()
                    .into_int_value();
                let new_len = ctx.builder.build_int_add(len, written, "").unwrap();
                ctx.builder.build_store(len_slot, new_len).unwrap();
            }
        }
    }

    // terminating NUL
    let dest = cursor(ctx);
    ctx.builder
        .build_store(dest, i8_ty.const_zero())
        .unwrap();

    Ok(buffer.as_basic_value_enum())
}

fn get_memcpy<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>) -> inkwell::values::FunctionValue<'ctx> {
    if let Some(f) = ctx.module.get_function("memcpy") {
        return f;
    }
    let ptr = ctx.context.ptr_type(AddressSpace::default());
    let fn_type = ptr.fn_type(
        &[ptr.into(), ptr.into(), ctx.usize_type().into()],
        false,
    );
    ctx.module.add_function("memcpy", fn_type, None)
}

fn get_sprintf<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>) -> inkwell::values::FunctionValue<'ctx> {
    if let Some(f) = ctx.module.get_function("sprintf") {
        return f;
    }
    let ptr = ctx.context.ptr_type(AddressSpace::default());
    let fn_type = ctx
        .context
        .i32_type()
        .fn_type(&[ptr.into(), ptr.into()], true);
    ctx.module.add_function("sprintf", fn_type, None)
}

fn render_format_spec(spec: &FormatSpec) -> String {
    let mut out = String::from("%");
    out.push_str(&spec.flags);
    if let Some(width) = spec.width {
        out.push_str(&width.to_string());
    }
    if let Some(precision) = spec.precision {
        out.push_str(&format!(".{precision}"));
    }
    out.push(spec.type_char.unwrap_or('d'));
    out
}

fn default_format<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    expr: &Expression,
) -> &'static str {
    match ctx.infer_type(expr) {
        Some(TypeName::Named { name, .. }) => match name.as_str() {
            "i64" => "%ld",
            "u8" | "u16" | "u32" | "byte" => "%u",
            "u64" => "%lu",
            "usize" => "%zu",
            "f32" | "f64" => "%f",
            _ => "%d",
        },
        Some(TypeName::Pointer { inner, .. })
            if matches!(inner.as_ref(), TypeName::Named { name, .. } if name == "byte") =>
        {
            "%s"
        }
        Some(TypeName::Pointer { .. }) => "%p",
        _ => "%d",
    }
}

/// Varargs promotions for the `sprintf` call.
fn promote_format_arg<'a, 'ctx>(
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
            .build_int_z_extend(int, ctx.context.i32_type(), "")
            .unwrap()
            .as_basic_value_enum(),
        other => other,
    }
}
