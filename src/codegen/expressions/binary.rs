//! Binary expression lowering: arithmetic with usize widening and
//! signedness-directed instruction selection, short-circuit logical
//! operators, peer-typed `null`, and structural struct comparison.

use inkwell::intrinsics::Intrinsic;
use inkwell::values::{BasicValue, BasicValueEnum, IntValue};
use inkwell::{FloatPredicate, IntPredicate};

use crate::mono;
use crate::parser::ast::*;

use super::super::{CodeGen, CodegenContext, CodegenError, CodegenResult};
use super::is_null_literal;

impl<'ctx> CodeGen<'ctx> for BinaryExpression {
    type ReturnValue = CodegenResult<BasicValueEnum<'ctx>>;

    fn codegen<'a>(&self, ctx: &CodegenContext<'a, 'ctx>) -> Self::ReturnValue {
        use BinaryOperator::*;

        if self.operator.is_logical() {
            return gen_short_circuit(ctx, self);
        }

        // `null` adopts the peer operand's pointer type
        if matches!(self.operator, Equals | NotEquals)
            && (is_null_literal(&self.left) || is_null_literal(&self.right))
        {
            return gen_null_comparison(ctx, self);
        }

        // structural struct comparison
        if matches!(self.operator, Equals | NotEquals) {
            if let Some(struct_name) = struct_operand_name(ctx, &self.left) {
                let left = ctx.gen_value(&self.left)?;
                let right = ctx.gen_value(&self.right)?;
                let eq = gen_struct_comparison(ctx, left, right, &struct_name, &self.position)?;
                let result = if self.operator == NotEquals {
                    ctx.builder
                        .build_xor(eq, ctx.context.bool_type().const_int(1, false), "")
                        .unwrap()
                } else {
                    eq
                };
                return Ok(result.as_basic_value_enum());
            }
        }

        let left_ty = ctx.infer_type(&self.left);
        let right_ty = ctx.infer_type(&self.right);
        let left = ctx.gen_value(&self.left)?;
        let right = ctx.gen_value(&self.right)?;

        if left.is_float_value() || right.is_float_value() {
            return gen_float_op(ctx, self, left, right);
        }

        let unsigned = left_ty
            .as_ref()
            .map(|t| ctx.is_unsigned_type(t))
            .unwrap_or(false)
            || right_ty
                .as_ref()
                .map(|t| ctx.is_unsigned_type(t))
                .unwrap_or(false);

        let (left, right) = widen_ints(ctx, left.into_int_value(), right.into_int_value(), unsigned);

        let value: BasicValueEnum = match self.operator {
            Add => ctx.builder.build_int_add(left, right, "").unwrap().into(),
            Substract => ctx.builder.build_int_sub(left, right, "").unwrap().into(),
            Multiply => ctx.builder.build_int_mul(left, right, "").unwrap().into(),
            // wrapping spellings map onto LLVM's two's-complement semantics
            AddWrapping => ctx.builder.build_int_add(left, right, "").unwrap().into(),
            SubstractWrapping => ctx.builder.build_int_sub(left, right, "").unwrap().into(),
            MultiplyWrapping => ctx.builder.build_int_mul(left, right, "").unwrap().into(),
            Divide => {
                if unsigned {
                    ctx.builder
                        .build_int_unsigned_div(left, right, "")
                        .unwrap()
                        .into()
                } else {
                    ctx.builder
                        .build_int_signed_div(left, right, "")
                        .unwrap()
                        .into()
                }
            }
            Remainder => {
                if unsigned {
                    ctx.builder
                        .build_int_unsigned_rem(left, right, "")
                        .unwrap()
                        .into()
                } else {
                    ctx.builder
                        .build_int_signed_rem(left, right, "")
                        .unwrap()
                        .into()
                }
            }
            AddSaturating => {
                gen_saturating(ctx, "add", left, right, unsigned, &self.position)?
            }
            SubstractSaturating => {
                gen_saturating(ctx, "sub", left, right, unsigned, &self.position)?
            }
            MultiplySaturating => {
                gen_saturating_mul(ctx, left, right, unsigned, &self.position)?
            }
            Equals => cmp(ctx, IntPredicate::EQ, left, right),
            NotEquals => cmp(ctx, IntPredicate::NE, left, right),
            LessThan => cmp(
                ctx,
                if unsigned {
                    IntPredicate::ULT
                } else {
                    IntPredicate::SLT
                },
                left,
                right,
            ),
            LessOrEqual => cmp(
                ctx,
                if unsigned {
                    IntPredicate::ULE
                } else {
                    IntPredicate::SLE
                },
                left,
                right,
            ),
            GreaterThan => cmp(
                ctx,
                if unsigned {
                    IntPredicate::UGT
                } else {
                    IntPredicate::SGT
                },
                left,
                right,
            ),
            GreaterOrEqual => cmp(
                ctx,
                if unsigned {
                    IntPredicate::UGE
                } else {
                    IntPredicate::SGE
                },
                left,
                right,
            ),
            And | Or => unreachable!("logical operators take the short-circuit path"),
        };
        Ok(value)
    }
}

fn cmp<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    predicate: IntPredicate,
    left: IntValue<'ctx>,
    right: IntValue<'ctx>,
) -> BasicValueEnum<'ctx> {
    ctx.builder
        .build_int_compare(predicate, left, right, "")
        .unwrap()
        .as_basic_value_enum()
}

/// Mixed-width integer operands widen to the larger width; a usize-width
/// peer zero-extends the other side.
fn widen_ints<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    left: IntValue<'ctx>,
    right: IntValue<'ctx>,
    unsigned: bool,
) -> (IntValue<'ctx>, IntValue<'ctx>) {
    let lw = left.get_type().get_bit_width();
    let rw = right.get_type().get_bit_width();
    if lw == rw {
        return (left, right);
    }
    let target = if lw > rw {
        left.get_type()
    } else {
        right.get_type()
    };
    let extend = |value: IntValue<'ctx>| {
        if value.get_type().get_bit_width() == target.get_bit_width() {
            value
        } else if unsigned || target == ctx.usize_type() {
            ctx.builder.build_int_z_extend(value, target, "").unwrap()
        } else {
            ctx.builder.build_int_s_extend(value, target, "").unwrap()
        }
    };
    (extend(left), extend(right))
}

fn gen_float_op<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    binary: &BinaryExpression,
    left: BasicValueEnum<'ctx>,
    right: BasicValueEnum<'ctx>,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    use BinaryOperator::*;

    let f64_ty = ctx.context.f64_type();
    let to_float = |value: BasicValueEnum<'ctx>| {
        if value.is_float_value() {
            value.into_float_value()
        } else {
            // int operand in a mixed expression
            ctx.builder
                .build_signed_int_to_float(value.into_int_value(), f64_ty, "")
                .unwrap()
        }
    };
    let mut left = to_float(left);
    let mut right = to_float(right);

    // f32 extends to f64 when mixed
    if left.get_type() != right.get_type() {
        if left.get_type() == ctx.context.f32_type() {
            left = ctx.builder.build_float_ext(left, f64_ty, "").unwrap();
        }
        if right.get_type() == ctx.context.f32_type() {
            right = ctx.builder.build_float_ext(right, f64_ty, "").unwrap();
        }
    }

    let value: BasicValueEnum = match binary.operator {
        Add => ctx.builder.build_float_add(left, right, "").unwrap().into(),
        Substract => ctx.builder.build_float_sub(left, right, "").unwrap().into(),
        Multiply => ctx.builder.build_float_mul(left, right, "").unwrap().into(),
        Divide => ctx.builder.build_float_div(left, right, "").unwrap().into(),
        Remainder => {
            return Err(CodegenError::lowering(
                &binary.position,
                "'%' is not defined for floating point operands",
            ))
        }
        Equals => fcmp(ctx, FloatPredicate::OEQ, left, right),
        NotEquals => fcmp(ctx, FloatPredicate::ONE, left, right),
        LessThan => fcmp(ctx, FloatPredicate::OLT, left, right),
        LessOrEqual => fcmp(ctx, FloatPredicate::OLE, left, right),
        GreaterThan => fcmp(ctx, FloatPredicate::OGT, left, right),
        GreaterOrEqual => fcmp(ctx, FloatPredicate::OGE, left, right),
        other => {
            return Err(CodegenError::lowering(
                &binary.position,
                format!("operator {other:?} is not defined for floating point operands"),
            ))
        }
    };
    Ok(value)
}

fn fcmp<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    predicate: FloatPredicate,
    left: inkwell::values::FloatValue<'ctx>,
    right: inkwell::values::FloatValue<'ctx>,
) -> BasicValueEnum<'ctx> {
    ctx.builder
        .build_float_compare(predicate, left, right, "")
        .unwrap()
        .as_basic_value_enum()
}

/// Short-circuit `&&` / `||`: three basic blocks plus an entry alloca for
/// the `i1` result; the non-evaluated side stores the constant.
fn gen_short_circuit<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    binary: &BinaryExpression,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .ok_or_else(|| {
            CodegenError::lowering(&binary.position, "logical operator outside a function")
        })?;

    let bool_ty = ctx.context.bool_type();
    let result = ctx.build_entry_alloca(bool_ty.into(), "bool_result")?;

    let id = ctx.next_block_id();
    let then_bb = ctx
        .context
        .append_basic_block(function, &format!("logical_then.{id}"));
    let else_bb = ctx
        .context
        .append_basic_block(function, &format!("logical_else.{id}"));
    let merge_bb = ctx
        .context
        .append_basic_block(function, &format!("logical_merge.{id}"));

    let left = ctx.gen_value(&binary.left)?.into_int_value();
    ctx.builder
        .build_conditional_branch(left, then_bb, else_bb)
        .unwrap();

    match binary.operator {
        BinaryOperator::And => {
            // then: evaluate the right side; else: the result is false
            ctx.builder.position_at_end(then_bb);
            let right = ctx.gen_value(&binary.right)?.into_int_value();
            ctx.builder.build_store(result, right).unwrap();
            ctx.builder.build_unconditional_branch(merge_bb).unwrap();

            ctx.builder.position_at_end(else_bb);
            ctx.builder
                .build_store(result, bool_ty.const_int(0, false))
                .unwrap();
            ctx.builder.build_unconditional_branch(merge_bb).unwrap();
        }
        BinaryOperator::Or => {
            // then: the result is true; else: evaluate the right side
            ctx.builder.position_at_end(then_bb);
            ctx.builder
                .build_store(result, bool_ty.const_int(1, false))
                .unwrap();
            ctx.builder.build_unconditional_branch(merge_bb).unwrap();

            ctx.builder.position_at_end(else_bb);
            let right = ctx.gen_value(&binary.right)?.into_int_value();
            ctx.builder.build_store(result, right).unwrap();
            ctx.builder.build_unconditional_branch(merge_bb).unwrap();
        }
        _ => unreachable!(),
    }

    ctx.builder.position_at_end(merge_bb);
    Ok(ctx
        .builder
        .build_load(bool_ty, result, "")
        .unwrap()
        .as_basic_value_enum())
}

fn gen_null_comparison<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    binary: &BinaryExpression,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let (peer, _null_side) = if is_null_literal(&binary.left) {
        (&binary.right, &binary.left)
    } else {
        (&binary.left, &binary.right)
    };

    let peer_value = ctx.gen_value(peer)?;
    if !peer_value.is_pointer_value() {
        return Err(CodegenError::lowering(
            &binary.position,
            "'null' can only compare against pointers",
        ));
    }
    let null = ctx
        .context
        .ptr_type(inkwell::AddressSpace::default())
        .const_null();

    let predicate = if binary.operator == BinaryOperator::NotEquals {
        IntPredicate::NE
    } else {
        IntPredicate::EQ
    };
    Ok(ctx
        .builder
        .build_int_compare(predicate, peer_value.into_pointer_value(), null, "")
        .unwrap()
        .as_basic_value_enum())
}

fn struct_operand_name<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    expr: &Expression,
) -> Option<String> {
    match ctx.infer_type(expr)? {
        TypeName::Named {
            name, type_args, ..
        } => {
            if ctx.program.find_enum(&name).is_some() {
                return None;
            }
            if type_args.is_empty() {
                if ctx.program.find_struct(&name).is_some() {
                    Some(name)
                } else {
                    None
                }
            } else {
                Some(mono::mangle_name(&name, &type_args))
            }
        }
        _ => None,
    }
}

/// Field-wise equality, recursing into nested structs and unrolling fixed
/// arrays element-wise; the folded result reduces with `and`.
pub fn gen_struct_comparison<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    left: BasicValueEnum<'ctx>,
    right: BasicValueEnum<'ctx>,
    struct_name: &str,
    span: &crate::lexer::Span,
) -> CodegenResult<IntValue<'ctx>> {
    let (decl, params, args) = ctx.struct_decl_for(struct_name).ok_or_else(|| {
        CodegenError::resolution(span, format!("unknown struct '{struct_name}'"))
    })?;

    let bool_ty = ctx.context.bool_type();
    if decl.fields.is_empty() {
        return Ok(bool_ty.const_int(1, false));
    }

    let mut result: Option<IntValue<'ctx>> = None;
    for (i, field) in decl.fields.iter().enumerate() {
        let left_field = ctx
            .builder
            .build_extract_value(left.into_struct_value(), i as u32, "")
            .unwrap();
        let right_field = ctx
            .builder
            .build_extract_value(right.into_struct_value(), i as u32, "")
            .unwrap();

        let field_ty = mono::substitute_in(&field.type_name, &params, &args);
        let field_eq = gen_value_equality(ctx, left_field, right_field, &field_ty, span)?;

        result = Some(match result {
            Some(acc) => ctx.builder.build_and(acc, field_eq, "").unwrap(),
            None => field_eq,
        });
    }
    Ok(result.unwrap())
}

fn gen_value_equality<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    left: BasicValueEnum<'ctx>,
    right: BasicValueEnum<'ctx>,
    ty: &TypeName,
    span: &crate::lexer::Span,
) -> CodegenResult<IntValue<'ctx>> {
    match (left, right) {
        (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) => Ok(ctx
            .builder
            .build_int_compare(IntPredicate::EQ, l, r, "")
            .unwrap()),
        (BasicValueEnum::FloatValue(l), BasicValueEnum::FloatValue(r)) => Ok(ctx
            .builder
            .build_float_compare(FloatPredicate::OEQ, l, r, "")
            .unwrap()),
        (BasicValueEnum::PointerValue(l), BasicValueEnum::PointerValue(r)) => Ok(ctx
            .builder
            .build_int_compare(IntPredicate::EQ, l, r, "")
            .unwrap()),
        (BasicValueEnum::StructValue(_), BasicValueEnum::StructValue(_)) => {
            let nested_name = match ty {
                TypeName::Named {
                    name, type_args, ..
                } => {
                    if type_args.is_empty() {
                        name.clone()
                    } else {
                        mono::mangle_name(name, type_args)
                    }
                }
                other => {
                    return Err(CodegenError::lowering(
                        span,
                        format!("cannot compare values of type {other}"),
                    ))
                }
            };
            gen_struct_comparison(ctx, left, right, &nested_name, span)
        }
        (BasicValueEnum::ArrayValue(l), BasicValueEnum::ArrayValue(r)) => {
            let element_ty = match ty {
                TypeName::Array { element, .. } => element.as_ref().clone(),
                other => {
                    return Err(CodegenError::lowering(
                        span,
                        format!("cannot compare values of type {other}"),
                    ))
                }
            };
            let n = l.get_type().len();
            let bool_ty = ctx.context.bool_type();
            let mut result = bool_ty.const_int(1, false);
            for i in 0..n {
                let le = ctx.builder.build_extract_value(l, i, "").unwrap();
                let re = ctx.builder.build_extract_value(r, i, "").unwrap();
                let eq = gen_value_equality(ctx, le, re, &element_ty, span)?;
                result = ctx.builder.build_and(result, eq, "").unwrap();
            }
            Ok(result)
        }
        _ => Err(CodegenError::lowering(
            span,
            "mismatched operand shapes in structural comparison",
        )),
    }
}

fn gen_saturating<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    op: &str,
    left: IntValue<'ctx>,
    right: IntValue<'ctx>,
    unsigned: bool,
    span: &crate::lexer::Span,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let prefix = if unsigned { "u" } else { "s" };
    let name = format!("llvm.{prefix}{op}.sat");
    let intrinsic = Intrinsic::find(&name).ok_or_else(|| {
        CodegenError::lowering(span, format!("saturating intrinsic {name} unavailable"))
    })?;
    let declaration = intrinsic
        .get_declaration(&ctx.module, &[left.get_type().into()])
        .ok_or_else(|| {
            CodegenError::lowering(span, format!("cannot declare intrinsic {name}"))
        })?;
    let call = ctx
        .builder
        .build_call(declaration, &[left.into(), right.into()], "")
        .unwrap();
    Ok(call.try_as_basic_value().left().unwrap())
}

/// `*|`: no saturating-multiply intrinsic exists, so clamp on the overflow
/// flag of `llvm.smul.with.overflow` / `llvm.umul.with.overflow`.
fn gen_saturating_mul<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    left: IntValue<'ctx>,
    right: IntValue<'ctx>,
    unsigned: bool,
    span: &crate::lexer::Span,
) -> CodegenResult<BasicValueEnum<'ctx>> {
    let name = if unsigned {
        "llvm.umul.with.overflow"
    } else {
        "llvm.smul.with.overflow"
    };
    let intrinsic = Intrinsic::find(name).ok_or_else(|| {
        CodegenError::lowering(span, format!("overflow intrinsic {name} unavailable"))
    })?;
    let declaration = intrinsic
        .get_declaration(&ctx.module, &[left.get_type().into()])
        .ok_or_else(|| CodegenError::lowering(span, format!("cannot declare intrinsic {name}")))?;
    let call = ctx
        .builder
        .build_call(declaration, &[left.into(), right.into()], "")
        .unwrap();
    let pair = call.try_as_basic_value().left().unwrap().into_struct_value();

    let product = ctx
        .builder
        .build_extract_value(pair, 0, "")
        .unwrap()
        .into_int_value();
    let overflowed = ctx
        .builder
        .build_extract_value(pair, 1, "")
        .unwrap()
        .into_int_value();

    let int_ty = left.get_type();
    let width = int_ty.get_bit_width();
    let clamp: IntValue = if unsigned {
        int_ty.const_all_ones()
    } else {
        // the sign of the true product picks the bound: mixed operand signs
        // overflow negative, matching signs positive
        let max = int_ty.const_int((1u64 << (width - 1)) - 1, false);
        let min = int_ty.const_int(1u64 << (width - 1), false);
        let sign_mix = ctx.builder.build_xor(left, right, "").unwrap();
        let product_negative = ctx
            .builder
            .build_int_compare(IntPredicate::SLT, sign_mix, int_ty.const_zero(), "")
            .unwrap();
        ctx.builder
            .build_select(product_negative, min, max, "")
            .unwrap()
            .into_int_value()
    };

    Ok(ctx
        .builder
        .build_select(overflowed, clamp, product, "")
        .unwrap())
}
