//! Statement lowering and program emission for the LLVM backend.

mod function;

pub use function::{emit_program, ensure_instantiation_declared};

use inkwell::values::BasicValue;

use crate::parser::ast::*;

use super::{CodeGen, CodegenContext, CodegenError, CodegenResult};

impl<'ctx> CodeGen<'ctx> for Statement {
    type ReturnValue = CodegenResult<()>;

    fn codegen<'a>(&self, ctx: &CodegenContext<'a, 'ctx>) -> Self::ReturnValue {
        match self {
            Statement::VarDecl(decl) => gen_var_decl(ctx, decl),
            Statement::Return(ret) => gen_return(ctx, ret),
            Statement::If(stmt) => gen_if(ctx, stmt),
            Statement::While(stmt) => gen_while(ctx, stmt),
            Statement::For(stmt) => gen_for(ctx, stmt),
            Statement::Defer(stmt) => {
                ctx.state
                    .borrow_mut()
                    .defer_stack
                    .push((stmt.body.clone(), false));
                Ok(())
            }
            Statement::ErrDefer(stmt) => {
                ctx.state
                    .borrow_mut()
                    .defer_stack
                    .push((stmt.body.clone(), true));
                Ok(())
            }
            Statement::Break(span) => {
                let target = ctx.state.borrow().loop_exit;
                let Some(target) = target else {
                    return Err(CodegenError::lowering(span, "'break' outside of a loop"));
                };
                ctx.builder.build_unconditional_branch(target).unwrap();
                Ok(())
            }
            Statement::Continue(span) => {
                let target = ctx.state.borrow().loop_continue;
                let Some(target) = target else {
                    return Err(CodegenError::lowering(span, "'continue' outside of a loop"));
                };
                ctx.builder.build_unconditional_branch(target).unwrap();
                Ok(())
            }
            Statement::Block(block) => {
                ctx.enter_scope();
                let result = gen_statements(ctx, &block.statements);
                ctx.exit_scope();
                result
            }
            Statement::Expression(expr) => {
                expr.codegen(ctx)?;
                Ok(())
            }
        }
    }
}

/// Lower a statement list, stopping after a terminator (a return, break or
/// continue ends the block).
pub(crate) fn gen_statements<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    statements: &[Statement],
) -> CodegenResult<()> {
    for stmt in statements {
        stmt.codegen(ctx)?;
        if ctx
            .builder
            .get_insert_block()
            .and_then(|bb| bb.get_terminator())
            .is_some()
        {
            break;
        }
    }
    Ok(())
}

fn gen_var_decl<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    decl: &VariableDeclaration,
) -> CodegenResult<()> {
    let ty = match (&decl.type_name, &decl.init) {
        (Some(ty), _) => ctx.subst(ty),
        (None, Some(init)) => ctx.infer_type(init).ok_or_else(|| {
            CodegenError::resolution(
                &decl.position,
                format!("cannot infer a type for '{}'", decl.name),
            )
        })?,
        (None, None) => {
            return Err(CodegenError::resolution(
                &decl.position,
                format!("'{}' has neither a type nor an initialiser", decl.name),
            ))
        }
    };

    let lowered = ctx.lower_type(&ty)?;
    let slot = ctx.build_entry_alloca(lowered, &decl.name)?;

    if let Some(init) = &decl.init {
        let value = if super::expressions::is_null_literal(init) {
            ctx.null_pointer()
        } else {
            ctx.gen_value(init)?
        };

        // a plain payload initialising an error-union variable wraps into
        // the success slot
        let value = match (&ty, ctx.infer_type(init)) {
            (TypeName::ErrorUnion { payload, .. }, Some(init_ty))
                if !init_ty.is_error_union() =>
            {
                wrap_success_value(ctx, payload, Some(value))?
            }
            _ => value,
        };
        ctx.builder.build_store(slot, value).unwrap();
    }

    ctx.add_var(&decl.name, slot, lowered, ty);
    Ok(())
}

/// Build `{ error_id = 0, value }` of the enclosing payload type.
pub(crate) fn wrap_success_value<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    payload: &TypeName,
    value: Option<inkwell::values::BasicValueEnum<'ctx>>,
) -> CodegenResult<inkwell::values::BasicValueEnum<'ctx>> {
    let union_ty = ctx.err_union_type(payload)?;
    let zero = ctx.context.i32_type().const_zero();
    let undef = union_ty.get_undef();
    let with_tag = ctx
        .builder
        .build_insert_value(undef, zero, 0, "")
        .unwrap()
        .into_struct_value();
    if payload.is_void() {
        return Ok(with_tag.as_basic_value_enum());
    }
    let Some(value) = value else {
        return Ok(with_tag.as_basic_value_enum());
    };
    Ok(ctx
        .builder
        .build_insert_value(with_tag, value, 1, "")
        .unwrap()
        .into_struct_value()
        .as_basic_value_enum())
}

/// `return expr`: stage the value in the `_uya_ret` slot, run the defer
/// stack in reverse (errdefer frames check the staged tag at run time),
/// then branch to the synthesized return block.
fn gen_return<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    ret: &ReturnStatement,
) -> CodegenResult<()> {
    let (return_type, ret_slot, ret_block) = {
        let state = ctx.state.borrow();
        (
            state.return_type.clone(),
            state.ret_slot,
            state.ret_block,
        )
    };
    let Some(ret_block) = ret_block else {
        return Err(CodegenError::lowering(
            &ret.position,
            "'return' outside of a function",
        ));
    };

    let is_err_union = return_type
        .as_ref()
        .map(|t| t.is_error_union())
        .unwrap_or(false);

    if let (Some(slot), Some(return_type)) = (ret_slot, return_type.as_ref()) {
        let value = match &ret.expr {
            Some(expr) => {
                let raw = expr.codegen(ctx)?;
                if is_err_union {
                    let expr_is_union = expr.as_error_value().is_some()
                        || matches!(
                            ctx.infer_type(expr),
                            Some(TypeName::ErrorUnion { .. })
                        );
                    if expr_is_union {
                        raw
                    } else {
                        Some(wrap_success_value(
                            ctx,
                            return_type.error_union_payload(),
                            raw,
                        )?)
                    }
                } else {
                    raw
                }
            }
            None if is_err_union => Some(wrap_success_value(
                ctx,
                return_type.error_union_payload(),
                None,
            )?),
            None => None,
        };

        if let Some(value) = value {
            ctx.builder.build_store(slot, value).unwrap();
        }
    } else if let Some(expr) = &ret.expr {
        // void function returning an expression: evaluate for effects
        expr.codegen(ctx)?;
    }

    ctx.emit_return_defers(is_err_union)?;
    ctx.builder.build_unconditional_branch(ret_block).unwrap();
    Ok(())
}

impl<'a, 'ctx> CodegenContext<'a, 'ctx> {
    /// Deferred cleanups for the synthesized return path: walked in reverse
    /// registration order; errdefer frames branch on the staged return
    /// value's tag and no-op on success returns.
    pub fn emit_return_defers(&self, is_err_union: bool) -> CodegenResult<()> {
        let frames: Vec<(Block, bool)> = self
            .state
            .borrow()
            .defer_stack
            .iter()
            .rev()
            .cloned()
            .collect();

        for (body, on_error) in frames {
            if on_error {
                if !is_err_union {
                    continue;
                }
                let ret_slot = self.state.borrow().ret_slot;
                let Some(ret_slot) = ret_slot else { continue };

                let tag = {
                    let tag_ptr = self
                        .builder
                        .build_struct_gep(
                            self.err_union_type(
                                self.state
                                    .borrow()
                                    .return_type
                                    .as_ref()
                                    .unwrap()
                                    .error_union_payload(),
                            )?,
                            ret_slot,
                            0,
                            "",
                        )
                        .unwrap();
                    self.builder
                        .build_load(self.context.i32_type(), tag_ptr, "")
                        .unwrap()
                        .into_int_value()
                };
                let is_error = self
                    .builder
                    .build_int_compare(
                        inkwell::IntPredicate::NE,
                        tag,
                        self.context.i32_type().const_zero(),
                        "",
                    )
                    .unwrap();

                let function = self
                    .builder
                    .get_insert_block()
                    .and_then(|bb| bb.get_parent())
                    .unwrap();
                let id = self.next_block_id();
                let run_bb = self
                    .context
                    .append_basic_block(function, &format!("errdefer.{id}"));
                let skip_bb = self
                    .context
                    .append_basic_block(function, &format!("errdefer_skip.{id}"));
                self.builder
                    .build_conditional_branch(is_error, run_bb, skip_bb)
                    .unwrap();

                self.builder.position_at_end(run_bb);
                self.enter_scope();
                gen_statements(self, &body.statements)?;
                self.exit_scope();
                if self
                    .builder
                    .get_insert_block()
                    .and_then(|bb| bb.get_terminator())
                    .is_none()
                {
                    self.builder.build_unconditional_branch(skip_bb).unwrap();
                }
                self.builder.position_at_end(skip_bb);
            } else {
                self.enter_scope();
                gen_statements(self, &body.statements)?;
                self.exit_scope();
            }
        }
        Ok(())
    }

    /// Deferred cleanups on a path where the error outcome is already known
    /// (`try` propagation): every frame runs, errdefer included.
    pub fn emit_defer_bodies(&self, include_errdefer: bool) -> CodegenResult<()> {
        let frames: Vec<(Block, bool)> = self
            .state
            .borrow()
            .defer_stack
            .iter()
            .rev()
            .cloned()
            .collect();
        for (body, on_error) in frames {
            if on_error && !include_errdefer {
                continue;
            }
            self.enter_scope();
            gen_statements(self, &body.statements)?;
            self.exit_scope();
        }
        Ok(())
    }
}

fn gen_if<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>, stmt: &IfStatement) -> CodegenResult<()> {
    let condition = ctx.gen_value(&stmt.condition)?.into_int_value();

    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .unwrap();
    let id = ctx.next_block_id();
    let then_bb = ctx
        .context
        .append_basic_block(function, &format!("if_then.{id}"));
    let else_bb = ctx
        .context
        .append_basic_block(function, &format!("if_else.{id}"));
    let merge_bb = ctx
        .context
        .append_basic_block(function, &format!("if_merge.{id}"));

    ctx.builder
        .build_conditional_branch(condition, then_bb, else_bb)
        .unwrap();

    ctx.builder.position_at_end(then_bb);
    ctx.enter_scope();
    gen_statements(ctx, &stmt.then_branch.statements)?;
    ctx.exit_scope();
    if ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_terminator())
        .is_none()
    {
        ctx.builder.build_unconditional_branch(merge_bb).unwrap();
    }

    ctx.builder.position_at_end(else_bb);
    if let Some(else_branch) = &stmt.else_branch {
        else_branch.codegen(ctx)?;
    }
    if ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_terminator())
        .is_none()
    {
        ctx.builder.build_unconditional_branch(merge_bb).unwrap();
    }

    ctx.builder.position_at_end(merge_bb);
    Ok(())
}

fn gen_while<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    stmt: &WhileLoop,
) -> CodegenResult<()> {
    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .unwrap();
    let id = ctx.next_block_id();
    let cond_bb = ctx
        .context
        .append_basic_block(function, &format!("while_cond.{id}"));
    let body_bb = ctx
        .context
        .append_basic_block(function, &format!("while_body.{id}"));
    let end_bb = ctx
        .context
        .append_basic_block(function, &format!("while_end.{id}"));

    ctx.builder.build_unconditional_branch(cond_bb).unwrap();

    ctx.builder.position_at_end(cond_bb);
    let condition = ctx.gen_value(&stmt.condition)?.into_int_value();
    ctx.builder
        .build_conditional_branch(condition, body_bb, end_bb)
        .unwrap();

    ctx.builder.position_at_end(body_bb);
    let (saved_exit, saved_continue) = {
        let mut state = ctx.state.borrow_mut();
        let saved = (state.loop_exit, state.loop_continue);
        state.loop_exit = Some(end_bb);
        state.loop_continue = Some(cond_bb);
        saved
    };

    ctx.enter_scope();
    gen_statements(ctx, &stmt.body.statements)?;
    ctx.exit_scope();
    if ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_terminator())
        .is_none()
    {
        ctx.builder.build_unconditional_branch(cond_bb).unwrap();
    }

    {
        let mut state = ctx.state.borrow_mut();
        state.loop_exit = saved_exit;
        state.loop_continue = saved_continue;
    }

    ctx.builder.position_at_end(end_bb);
    Ok(())
}

fn gen_for<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>, stmt: &ForLoop) -> CodegenResult<()> {
    match &stmt.iterable {
        ForIterable::Range(start, end) => gen_for_range(ctx, stmt, start, end),
        ForIterable::Value(iterable) => gen_for_value(ctx, stmt, iterable),
    }
}

/// `for a..b |i|`: a classic counted loop with the loop variable as the
/// item binding.
fn gen_for_range<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    stmt: &ForLoop,
    start: &Expression,
    end: &Expression,
) -> CodegenResult<()> {
    let item_ty = ctx
        .infer_type(start)
        .unwrap_or_else(|| TypeName::named("i32", stmt.position.clone()));
    let lowered = ctx.lower_type(&item_ty)?;

    let slot = ctx.build_entry_alloca(lowered, &stmt.item_var)?;
    let start_value = ctx.gen_value(start)?;
    ctx.builder.build_store(slot, start_value).unwrap();

    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .unwrap();
    let id = ctx.next_block_id();
    let cond_bb = ctx
        .context
        .append_basic_block(function, &format!("for_cond.{id}"));
    let body_bb = ctx
        .context
        .append_basic_block(function, &format!("for_body.{id}"));
    let inc_bb = ctx
        .context
        .append_basic_block(function, &format!("for_inc.{id}"));
    let end_bb = ctx
        .context
        .append_basic_block(function, &format!("for_end.{id}"));

    ctx.builder.build_unconditional_branch(cond_bb).unwrap();

    ctx.builder.position_at_end(cond_bb);
    let current = ctx
        .builder
        .build_load(lowered, slot, "")
        .unwrap()
        .into_int_value();
    let end_value = ctx.gen_value(end)?.into_int_value();
    let keep_going = ctx
        .builder
        .build_int_compare(inkwell::IntPredicate::SLT, current, end_value, "")
        .unwrap();
    ctx.builder
        .build_conditional_branch(keep_going, body_bb, end_bb)
        .unwrap();

    ctx.builder.position_at_end(body_bb);
    let (saved_exit, saved_continue) = {
        let mut state = ctx.state.borrow_mut();
        let saved = (state.loop_exit, state.loop_continue);
        state.loop_exit = Some(end_bb);
        state.loop_continue = Some(inc_bb);
        saved
    };

    ctx.enter_scope();
    ctx.add_var(&stmt.item_var, slot, lowered, item_ty);
    gen_statements(ctx, &stmt.body.statements)?;
    ctx.exit_scope();
    if ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_terminator())
        .is_none()
    {
        ctx.builder.build_unconditional_branch(inc_bb).unwrap();
    }

    ctx.builder.position_at_end(inc_bb);
    let current = ctx
        .builder
        .build_load(lowered, slot, "")
        .unwrap()
        .into_int_value();
    let one = current.get_type().const_int(1, false);
    let next = ctx.builder.build_int_add(current, one, "").unwrap();
    ctx.builder.build_store(slot, next).unwrap();
    ctx.builder.build_unconditional_branch(cond_bb).unwrap();

    {
        let mut state = ctx.state.borrow_mut();
        state.loop_exit = saved_exit;
        state.loop_continue = saved_continue;
    }

    ctx.builder.position_at_end(end_bb);
    Ok(())
}

/// `for arr |x|` / `for arr |x, i|`: iterate a fixed array or slice by
/// index, copying the element into the item binding each round.
fn gen_for_value<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    stmt: &ForLoop,
    iterable: &Expression,
) -> CodegenResult<()> {
    let iterable_ty = ctx.infer_type(iterable).ok_or_else(|| {
        CodegenError::lowering(&stmt.position, "cannot type the loop iterable")
    })?;
    let usize_ty = ctx.usize_type();

    let (element_ty, bound, base_ptr) = match &iterable_ty {
        TypeName::Array { element, size, .. } => {
            let n = size.literal().ok_or_else(|| {
                CodegenError::resolution(&stmt.position, "array size did not resolve")
            })?;
            let (ptr, _) = ctx.lvalue_address(iterable)?;
            (
                element.as_ref().clone(),
                usize_ty.const_int(n as u64, false),
                ptr,
            )
        }
        TypeName::Slice { element, .. } => {
            let value = ctx.gen_value(iterable)?.into_struct_value();
            let data = ctx
                .builder
                .build_extract_value(value, 0, "")
                .unwrap()
                .into_pointer_value();
            let len = ctx
                .builder
                .build_extract_value(value, 1, "")
                .unwrap()
                .into_int_value();
            (element.as_ref().clone(), len, data)
        }
        other => {
            return Err(CodegenError::lowering(
                &stmt.position,
                format!("cannot iterate a value of type {other}"),
            ))
        }
    };
    let is_array = matches!(&iterable_ty, TypeName::Array { .. });

    let element_lowered = ctx.lower_type(&element_ty)?;
    let index_slot = ctx.build_entry_alloca(usize_ty.into(), "idx")?;
    ctx.builder
        .build_store(index_slot, usize_ty.const_zero())
        .unwrap();
    let item_slot = ctx.build_entry_alloca(element_lowered, &stmt.item_var)?;

    let function = ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_parent())
        .unwrap();
    let id = ctx.next_block_id();
    let cond_bb = ctx
        .context
        .append_basic_block(function, &format!("for_cond.{id}"));
    let body_bb = ctx
        .context
        .append_basic_block(function, &format!("for_body.{id}"));
    let inc_bb = ctx
        .context
        .append_basic_block(function, &format!("for_inc.{id}"));
    let end_bb = ctx
        .context
        .append_basic_block(function, &format!("for_end.{id}"));

    ctx.builder.build_unconditional_branch(cond_bb).unwrap();

    ctx.builder.position_at_end(cond_bb);
    let index = ctx
        .builder
        .build_load(usize_ty, index_slot, "")
        .unwrap()
        .into_int_value();
    let keep_going = ctx
        .builder
        .build_int_compare(inkwell::IntPredicate::ULT, index, bound, "")
        .unwrap();
    ctx.builder
        .build_conditional_branch(keep_going, body_bb, end_bb)
        .unwrap();

    ctx.builder.position_at_end(body_bb);
    let index = ctx
        .builder
        .build_load(usize_ty, index_slot, "")
        .unwrap()
        .into_int_value();
    let element_ptr = if is_array {
        let array_lowered = ctx.lower_type(&iterable_ty)?;
        let zero = ctx.context.i32_type().const_zero();
        unsafe {
            ctx.builder
                .build_in_bounds_gep(array_lowered, base_ptr, &[zero, index], "")
                .unwrap()
        }
    } else {
        unsafe {
            ctx.builder
                .build_in_bounds_gep(element_lowered, base_ptr, &[index], "")
                .unwrap()
        }
    };
    let element = ctx
        .builder
        .build_load(element_lowered, element_ptr, "")
        .unwrap();
    ctx.builder.build_store(item_slot, element).unwrap();

    let (saved_exit, saved_continue) = {
        let mut state = ctx.state.borrow_mut();
        let saved = (state.loop_exit, state.loop_continue);
        state.loop_exit = Some(end_bb);
        state.loop_continue = Some(inc_bb);
        saved
    };

    ctx.enter_scope();
    ctx.add_var(&stmt.item_var, item_slot, element_lowered, element_ty);
    if let Some(index_var) = &stmt.index_var {
        ctx.add_var(
            index_var,
            index_slot,
            usize_ty.into(),
            TypeName::named("usize", stmt.position.clone()),
        );
    }
    gen_statements(ctx, &stmt.body.statements)?;
    ctx.exit_scope();
    if ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_terminator())
        .is_none()
    {
        ctx.builder.build_unconditional_branch(inc_bb).unwrap();
    }

    ctx.builder.position_at_end(inc_bb);
    let index = ctx
        .builder
        .build_load(usize_ty, index_slot, "")
        .unwrap()
        .into_int_value();
    let next = ctx
        .builder
        .build_int_add(index, usize_ty.const_int(1, false), "")
        .unwrap();
    ctx.builder.build_store(index_slot, next).unwrap();
    ctx.builder.build_unconditional_branch(cond_bb).unwrap();

    {
        let mut state = ctx.state.borrow_mut();
        state.loop_exit = saved_exit;
        state.loop_continue = saved_continue;
    }

    ctx.builder.position_at_end(end_bb);
    Ok(())
}
