//! Backend-local expression typing.
//!
//! The backend carries no semantic-analysis results; the variable table,
//! function signatures and struct registry are enough to reconstruct the
//! type of any expression the lowering needs to reason about (struct
//! comparisons, default format specs, ABI sizes, error-union payloads).

use crate::mono;
use crate::parser::ast::*;

use super::C99Emitter;

impl<'a> C99Emitter<'a> {
    pub(crate) fn infer_type(&self, expr: &Expression) -> Option<TypeName> {
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
            Expression::Id(id) => {
                let ty = self.lookup_var(&id.name)?.clone();
                Some(self.mono.substitute(&ty))
            }
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
            Expression::Cast(cast) => Some(self.mono.substitute(&cast.target)),
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
                    return Some(self.mono.substitute(&decl.return_type));
                }
                let args: Vec<TypeName> = call
                    .type_args
                    .iter()
                    .map(|a| self.mono.substitute(a))
                    .collect();
                return Some(mono::substitute_in(
                    &decl.return_type,
                    &decl.type_params,
                    &args,
                ));
            }
        }

        // method call
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

        // function pointer value
        if let TypeName::Fn { return_type, .. } = self.infer_type(&call.callee)? {
            return Some(*return_type);
        }
        None
    }

    fn method_return_type(&self, struct_name: &str, method: &str) -> Option<TypeName> {
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
                return self.current_return_type.clone();
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
