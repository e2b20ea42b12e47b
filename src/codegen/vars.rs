//! Stack slots, lvalue address computation and backend-local typing.

use inkwell::types::BasicTypeEnum;
use inkwell::values::{BasicValue, PointerValue};

use crate::mono;
use crate::parser::ast::*;

use super::{CodeGen, CodegenContext, CodegenError, CodegenResult};

impl<'a, 'ctx> CodegenContext<'a, 'ctx> {
    /// Allocate a stack slot in the entry basic block of the current
    /// function, before any other instruction, so it dominates all uses.
    pub fn build_entry_alloca(
        &self,
        ty: BasicTypeEnum<'ctx>,
        name: &str,
    ) -> CodegenResult<PointerValue<'ctx>> {
        let current = self.builder.get_insert_block().ok_or_else(|| {
            CodegenError::lowering(&Default::default(), "no active basic block for alloca")
        })?;
        let function = current.get_parent().ok_or_else(|| {
            CodegenError::lowering(&Default::default(), "basic block without a parent function")
        })?;
        let entry = function.get_first_basic_block().ok_or_else(|| {
            CodegenError::lowering(&Default::default(), "function without an entry block")
        })?;

        let tmp_builder = self.context.create_builder();
        match entry.get_first_instruction() {
            Some(first) => tmp_builder.position_before(&first),
            None => tmp_builder.position_at_end(entry),
        }
        Ok(tmp_builder.build_alloca(ty, name).unwrap())
    }

    /// Walk an lvalue expression to a pointer to its storage plus the
    /// source-level type of that storage.
    pub fn lvalue_address(
        &self,
        expr: &Expression,
    ) -> CodegenResult<(PointerValue<'ctx>, TypeName)> {
        match expr {
            Expression::Id(id) => {
                let entry = self.find_var(&id.name).ok_or_else(|| {
                    CodegenError::resolution(
                        &id.position,
                        format!("unknown variable '{}'", id.name),
                    )
                })?;
                Ok((entry.ptr, entry.ast_ty))
            }
            Expression::Unary(unary) if unary.operator == UnaryOperator::Deref => {
                let pointee = match self.infer_type(&unary.operand) {
                    Some(TypeName::Pointer { inner, .. }) => *inner,
                    _ => {
                        return Err(CodegenError::lowering(
                            &unary.position,
                            "cannot dereference a non-pointer value",
                        ))
                    }
                };
                let value = self.gen_value(&unary.operand)?;
                Ok((value.into_pointer_value(), pointee))
            }
            Expression::MemberAccess(access) => self.member_address(access),
            Expression::ArrayAccess(access) => self.element_address(access),
            // rvalue base (a call result, a literal): spill to an entry slot
            other => {
                let ty = self.infer_type(other).ok_or_else(|| {
                    CodegenError::lowering(
                        &other.position(),
                        "cannot take the address of this expression",
                    )
                })?;
                let lowered = self.lower_type(&ty)?;
                let value = self.gen_value(other)?;
                let slot = self.build_entry_alloca(lowered, "spill")?;
                self.builder.build_store(slot, value).unwrap();
                Ok((slot, ty))
            }
        }
    }

    fn member_address(
        &self,
        access: &MemberAccess,
    ) -> CodegenResult<(PointerValue<'ctx>, TypeName)> {
        let (mut base_ptr, mut base_ty) = self.lvalue_address(&access.object)?;

        // a pointer-typed base holds the struct's address: load it first
        if let TypeName::Pointer { inner, .. } = &self.subst(&base_ty) {
            let ptr_ty = self.context.ptr_type(inkwell::AddressSpace::default());
            base_ptr = self
                .builder
                .build_load(ptr_ty, base_ptr, "")
                .unwrap()
                .into_pointer_value();
            base_ty = inner.as_ref().clone();
        }
        let base_ty = self.subst(&base_ty);

        match &base_ty {
            TypeName::Named {
                name, type_args, ..
            } => {
                let struct_name = if type_args.is_empty() {
                    name.clone()
                } else {
                    mono::mangle_name(name, type_args)
                };
                let (decl, params, args) =
                    self.struct_decl_for(&struct_name).ok_or_else(|| {
                        CodegenError::resolution(
                            &access.position,
                            format!("unknown struct '{struct_name}'"),
                        )
                    })?;
                let index = decl.field_index(&access.field).ok_or_else(|| {
                    CodegenError::resolution(
                        &access.position,
                        format!("struct '{struct_name}' has no field '{}'", access.field),
                    )
                })?;
                let struct_ty = self.struct_type_for(&struct_name).ok_or_else(|| {
                    CodegenError::resolution(
                        &access.position,
                        format!("struct type '{struct_name}' was never registered"),
                    )
                })?;
                let field_ptr = self
                    .builder
                    .build_struct_gep(struct_ty, base_ptr, index as u32, &access.field)
                    .unwrap();
                let field_ty =
                    mono::substitute_in(&decl.fields[index].type_name, &params, &args);
                Ok((field_ptr, field_ty))
            }
            TypeName::Tuple(items, _) => {
                let index: usize = access.field.parse().map_err(|_| {
                    CodegenError::lowering(
                        &access.position,
                        format!("'{}' is not a tuple index", access.field),
                    )
                })?;
                let item_ty = items.get(index).cloned().ok_or_else(|| {
                    CodegenError::lowering(
                        &access.position,
                        format!("tuple has no element {index}"),
                    )
                })?;
                let tuple_ty = self.lower_type(&base_ty)?.into_struct_type();
                let field_ptr = self
                    .builder
                    .build_struct_gep(tuple_ty, base_ptr, index as u32, "")
                    .unwrap();
                Ok((field_ptr, item_ty))
            }
            TypeName::Slice { .. } if access.field == "len" => {
                let slice_ty = self.lower_type(&base_ty)?.into_struct_type();
                let len_ptr = self
                    .builder
                    .build_struct_gep(slice_ty, base_ptr, 1, "len")
                    .unwrap();
                Ok((len_ptr, TypeName::named("usize", access.position.clone())))
            }
            other => Err(CodegenError::lowering(
                &access.position,
                format!("member access on a non-struct value of type {other}"),
            )),
        }
    }

    /// Address of `base[index]`. Fixed arrays use a two-index GEP with a
    /// leading zero; pointer-as-array uses a single-index GEP against the
    /// element type; slices load the data pointer first.
    fn element_address(
        &self,
        access: &ArrayAccess,
    ) -> CodegenResult<(PointerValue<'ctx>, TypeName)> {
        let (base_ptr, base_ty) = self.lvalue_address(&access.array)?;
        let base_ty = self.subst(&base_ty);
        let index = self.gen_value(&access.index)?.into_int_value();

        match &base_ty {
            TypeName::Array { element, .. } => {
                let array_ty = self.lower_type(&base_ty)?;
                let zero = self.context.i32_type().const_zero();
                let ptr = unsafe {
                    self.builder
                        .build_in_bounds_gep(array_ty, base_ptr, &[zero, index], "")
                        .unwrap()
                };
                Ok((ptr, element.as_ref().clone()))
            }
            TypeName::Pointer { inner, .. } => {
                let ptr_ty = self.context.ptr_type(inkwell::AddressSpace::default());
                let pointer = self
                    .builder
                    .build_load(ptr_ty, base_ptr, "")
                    .unwrap()
                    .into_pointer_value();
                let element_ty = self.lower_type(inner)?;
                let ptr = unsafe {
                    self.builder
                        .build_in_bounds_gep(element_ty, pointer, &[index], "")
                        .unwrap()
                };
                Ok((ptr, inner.as_ref().clone()))
            }
            TypeName::Slice { element, .. } => {
                let slice_ty = self.lower_type(&base_ty)?.into_struct_type();
                let data_ptr_slot = self
                    .builder
                    .build_struct_gep(slice_ty, base_ptr, 0, "")
                    .unwrap();
                let ptr_ty = self.context.ptr_type(inkwell::AddressSpace::default());
                let data_ptr = self
                    .builder
                    .build_load(ptr_ty, data_ptr_slot, "")
                    .unwrap()
                    .into_pointer_value();
                let element_ty = self.lower_type(element)?;
                let ptr = unsafe {
                    self.builder
                        .build_in_bounds_gep(element_ty, data_ptr, &[index], "")
                        .unwrap()
                };
                Ok((ptr, element.as_ref().clone()))
            }
            other => Err(CodegenError::lowering(
                &access.position,
                format!("cannot index a value of type {other}"),
            )),
        }
    }

    /// Load an lvalue as a value.
    pub fn load_lvalue(
        &self,
        ptr: PointerValue<'ctx>,
        ast_ty: &TypeName,
    ) -> CodegenResult<inkwell::values::BasicValueEnum<'ctx>> {
        let lowered = self.lower_type(ast_ty)?;
        Ok(self
            .builder
            .build_load(lowered, ptr, "")
            .unwrap()
            .as_basic_value_enum())
    }

    // ---- backend-local typing ----

    pub fn infer_type(&self, expr: &Expression) -> Option<TypeName> {
        let span = expr.position();
        match expr {
            Expression::Num(Num::Integer(..)) => Some(TypeName::named("i32", span)),
            Expression::Num(Num::FloatingPoint(..)) => Some(TypeName::named("f64", span)),
            Expression::Bool(_) => Some(TypeName::named("bool", span)),
            Expression::AstString(_) | Expression::StringInterpolation(_) => {
                Some(TypeName::Pointer {
                    inner: Box::new(TypeName::named("byte", span.clone())),
                    borrowed: false,
                    position: span,
                })
            }
            Expression::Id(id) => self.find_var(&id.name).map(|v| self.subst(&v.ast_ty)),
            Expression::Unary(unary) => match unary.operator {
                UnaryOperator::Minus => self.infer_type(&unary.operand),
                UnaryOperator::Not => Some(TypeName::named("bool", span)),
                UnaryOperator::AddressOf => {
                    let inner = self.infer_type(&unary.operand)?;
                    Some(TypeName::Pointer {
                        inner: Box::new(inner),
                        borrowed: true,
                        position: span,
                    })
                }
                UnaryOperator::Deref => match self.infer_type(&unary.operand)? {
                    TypeName::Pointer { inner, .. } => Some(*inner),
                    _ => None,
                },
                UnaryOperator::Try => match self.infer_type(&unary.operand)? {
                    TypeName::ErrorUnion { payload, .. } => Some(*payload),
                    _ => None,
                },
            },
            Expression::Binary(binary) => {
                if binary.operator.is_comparison() || binary.operator.is_logical() {
                    return Some(TypeName::named("bool", span));
                }
                self.infer_type(&binary.left)
                    .or_else(|| self.infer_type(&binary.right))
            }
            Expression::Assignment(assign) => self.infer_type(&assign.rvalue),
            Expression::Call(call) => self.infer_call_type(call),
            Expression::MemberAccess(access) => self.infer_member_type(access),
            Expression::ArrayAccess(access) => match self.infer_type(&access.array)? {
                TypeName::Array { element, .. } | TypeName::Slice { element, .. } => {
                    Some(*element)
                }
                TypeName::Pointer { inner, .. } => Some(*inner),
                _ => None,
            },
            Expression::StructInit(init) => Some(TypeName::Named {
                name: init.name.clone(),
                type_args: init.type_args.clone(),
                position: span,
            }),
            Expression::ArrayLiteral(lit) => {
                let element = lit.elements.first().and_then(|e| self.infer_type(e))?;
                Some(TypeName::Array {
                    element: Box::new(element),
                    size: ArraySize::Literal(lit.elements.len() as i64),
                    position: span,
                })
            }
            Expression::TupleLiteral(lit) => {
                let items = lit
                    .elements
                    .iter()
                    .map(|e| self.infer_type(e))
                    .collect::<Option<Vec<_>>>()?;
                Some(TypeName::Tuple(items, span))
            }
            Expression::Match(m) => m.arms.first().and_then(|arm| self.infer_type(&arm.body)),
            Expression::Catch(c) => match self.infer_type(&c.expr)? {
                TypeName::ErrorUnion { payload, .. } => Some(*payload),
                _ => None,
            },
            Expression::Cast(cast) => Some(self.subst(&cast.target)),
            Expression::Sizeof(_) | Expression::Alignof(_) | Expression::Len(_) => {
                Some(TypeName::named("usize", span))
            }
            Expression::Block(block) => {
                let trailing = block.trailing_expression()?;
                self.infer_type(trailing)
            }
        }
    }

    fn infer_call_type(&self, call: &CallExpression) -> Option<TypeName> {
        if let Some(name) = call.callee_name() {
            match name {
                "@syscall" => {
                    return Some(TypeName::ErrorUnion {
                        payload: Box::new(TypeName::named("i64", call.position.clone())),
                        position: call.position.clone(),
                    })
                }
                "slice" if call.args.len() == 3 => {
                    let element = match self.infer_type(&call.args[0])? {
                        TypeName::Array { element, .. } | TypeName::Slice { element, .. } => {
                            *element
                        }
                        TypeName::Pointer { inner, .. } => *inner,
                        _ => return None,
                    };
                    return Some(TypeName::Slice {
                        element: Box::new(element),
                        position: call.position.clone(),
                    });
                }
                _ => {}
            }

            if let Some(decl) = self.program.find_function(name) {
                if call.type_args.is_empty() {
                    return Some(self.subst(&decl.return_type));
                }
                let args: Vec<TypeName> =
                    call.type_args.iter().map(|a| self.subst(a)).collect();
                return Some(mono::substitute_in(
                    &decl.return_type,
                    &decl.type_params,
                    &args,
                ));
            }
        }

        if let Expression::MemberAccess(access) = &call.callee {
            let receiver = match self.infer_type(&access.object)? {
                TypeName::Pointer { inner, .. } => *inner,
                other => other,
            };
            if let TypeName::Named {
                name, type_args, ..
            } = receiver
            {
                let struct_name = if type_args.is_empty() {
                    name
                } else {
                    mono::mangle_name(&name, &type_args)
                };
                return self.method_return_type(&struct_name, &access.field);
            }
        }

        if let TypeName::Fn { return_type, .. } = self.infer_type(&call.callee)? {
            return Some(*return_type);
        }
        None
    }

    pub fn method_return_type(&self, struct_name: &str, method: &str) -> Option<TypeName> {
        if let Some(found) = self.program.find_method(struct_name, method) {
            return Some(found.return_type.clone());
        }
        let (decl, params, args) = self.struct_decl_for(struct_name)?;
        let found = self.program.find_method(&decl.name, method)?;
        Some(mono::substitute_in(&found.return_type, &params, &args))
    }

    fn infer_member_type(&self, access: &MemberAccess) -> Option<TypeName> {
        if let Expression::Id(Id { name, .. }) = &access.object {
            if name == "error" {
                return self.state.borrow().return_type.clone();
            }
            if let Some(e) = self.program.find_enum(name) {
                return Some(TypeName::named(&e.name, access.position.clone()));
            }
        }

        let object_ty = match self.infer_type(&access.object)? {
            TypeName::Pointer { inner, .. } => *inner,
            other => other,
        };

        match object_ty {
            TypeName::Named {
                name, type_args, ..
            } => {
                let struct_name = if type_args.is_empty() {
                    name
                } else {
                    mono::mangle_name(&name, &type_args)
                };
                self.struct_field_type(&struct_name, &access.field)
            }
            TypeName::Tuple(items, _) => {
                let index: usize = access.field.parse().ok()?;
                items.get(index).cloned()
            }
            TypeName::Slice { .. } if access.field == "len" => {
                Some(TypeName::named("usize", access.position.clone()))
            }
            _ => None,
        }
    }
}
