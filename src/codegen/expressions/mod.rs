//! Expression lowering. Each expression node implements [`CodeGen`] and
//! yields `Ok(Some(value))`, or `Ok(None)` for void-producing expressions
//! (calls to void functions, `try` on `!void`).

pub mod access;
pub mod binary;
pub mod call;
pub mod control;

use inkwell::values::{BasicValue, BasicValueEnum};

use crate::parser::ast::*;

use super::{CodeGen, CodegenContext, CodegenError, CodegenResult};

impl<'a, 'ctx> CodegenContext<'a, 'ctx> {
    /// Lower an expression that must produce a value.
    pub fn gen_value(&self, expr: &Expression) -> CodegenResult<BasicValueEnum<'ctx>> {
        match expr.codegen(self)? {
            Some(value) => Ok(value),
            None => Err(CodegenError::lowering(
                &expr.position(),
                "expected a value, but the expression produces none",
            )),
        }
    }

    /// `null` adopts the type of its peer operand; with opaque pointers
    /// every pointer constant is `ptr null`.
    pub fn null_pointer(&self) -> BasicValueEnum<'ctx> {
        self.context
            .ptr_type(inkwell::AddressSpace::default())
            .const_null()
            .as_basic_value_enum()
    }
}

pub(crate) fn is_null_literal(expr: &Expression) -> bool {
    matches!(expr, Expression::Id(Id { name, .. }) if name == "null")
}

impl<'ctx> CodeGen<'ctx> for Expression {
    type ReturnValue = CodegenResult<Option<BasicValueEnum<'ctx>>>;

    fn codegen<'a>(&self, ctx: &CodegenContext<'a, 'ctx>) -> Self::ReturnValue {
        match self {
            Expression::Num(Num::Integer(value, _)) => Ok(Some(
                ctx.context
                    .i32_type()
                    .const_int(*value as u64, true)
                    .as_basic_value_enum(),
            )),
            Expression::Num(Num::FloatingPoint(value, _)) => Ok(Some(
                ctx.context
                    .f64_type()
                    .const_float(*value)
                    .as_basic_value_enum(),
            )),
            Expression::Bool(b) => Ok(Some(
                ctx.context
                    .bool_type()
                    .const_int(b.value as u64, false)
                    .as_basic_value_enum(),
            )),
            Expression::AstString(s) => {
                let content = unescape::unescape(&s.value).unwrap_or_else(|| s.value.clone());
                let global = ctx
                    .builder
                    .build_global_string_ptr(&content, "str")
                    .unwrap();
                Ok(Some(global.as_pointer_value().as_basic_value_enum()))
            }
            Expression::StringInterpolation(interp) => {
                control::gen_interpolation(ctx, interp).map(Some)
            }
            Expression::Id(id) => {
                if id.name == "null" {
                    return Ok(Some(ctx.null_pointer()));
                }
                if let Some(entry) = ctx.find_var(&id.name) {
                    return ctx.load_lvalue(entry.ptr, &entry.ast_ty).map(Some);
                }
                // a bare function name is a function pointer value
                if let Some(func) = ctx.find_func(&id.name) {
                    return Ok(Some(
                        func.value
                            .as_global_value()
                            .as_pointer_value()
                            .as_basic_value_enum(),
                    ));
                }
                Err(CodegenError::resolution(
                    &id.position,
                    format!("unknown identifier '{}'", id.name),
                ))
            }
            Expression::Unary(unary) => access::gen_unary(ctx, unary),
            Expression::Binary(binary) => binary.codegen(ctx).map(Some),
            Expression::Assignment(assign) => access::gen_assignment(ctx, assign),
            Expression::Call(call) => call::gen_call(ctx, call),
            Expression::MemberAccess(access) => access::gen_member_access(ctx, access).map(Some),
            Expression::ArrayAccess(array_access) => {
                let (ptr, ty) = ctx.lvalue_address(&Expression::ArrayAccess(Box::new(
                    array_access.as_ref().clone(),
                )))?;
                ctx.load_lvalue(ptr, &ty).map(Some)
            }
            Expression::StructInit(init) => access::gen_struct_init(ctx, init).map(Some),
            Expression::ArrayLiteral(lit) => access::gen_array_literal(ctx, lit).map(Some),
            Expression::TupleLiteral(lit) => access::gen_tuple_literal(ctx, lit).map(Some),
            Expression::Match(m) => control::gen_match(ctx, m),
            Expression::Catch(c) => control::gen_catch(ctx, c),
            Expression::Cast(cast) => access::gen_cast(ctx, cast).map(Some),
            Expression::Sizeof(s) => {
                let ty = match &s.arg {
                    SizeofArg::Type(ty) => match ty {
                        // a bare identifier naming a variable sizes the
                        // variable's type
                        TypeName::Named {
                            name, type_args, ..
                        } if type_args.is_empty() && ctx.byte_size_of(ty).is_none() => {
                            match ctx.find_var(name) {
                                Some(var) => var.ast_ty.clone(),
                                None => ty.clone(),
                            }
                        }
                        _ => ty.clone(),
                    },
                    SizeofArg::Expr(expr) => ctx.infer_type(expr).ok_or_else(|| {
                        CodegenError::lowering(
                            &s.position,
                            "cannot determine the type of this sizeof operand",
                        )
                    })?,
                };
                let size = ctx.byte_size_of(&ty).ok_or_else(|| {
                    CodegenError::lowering(&s.position, format!("type {ty} has no size"))
                })?;
                Ok(Some(
                    ctx.usize_type().const_int(size, false).as_basic_value_enum(),
                ))
            }
            Expression::Alignof(a) => {
                let (_, align) = ctx.size_and_align_of(&a.target).ok_or_else(|| {
                    CodegenError::lowering(
                        &a.position,
                        format!("type {} has no alignment", a.target),
                    )
                })?;
                Ok(Some(
                    ctx.usize_type()
                        .const_int(align, false)
                        .as_basic_value_enum(),
                ))
            }
            Expression::Len(l) => control::gen_len(ctx, l).map(Some),
            Expression::Block(block) => control::gen_block_expr(ctx, block),
        }
    }
}
