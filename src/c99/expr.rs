//! Expression lowering for the C99 backend.
//!
//! Every expression lowers to a C expression string; constructs with control
//! flow (`try`, `catch`, `match`, interpolation, `@syscall`) use GNU
//! statement expressions so they stay usable in expression position. String
//! interpolation additionally registers its buffer declarations on the
//! function prelude so the buffer outlives the statement expression.

use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::mono::{self, MonoKind};
use crate::parser::ast::*;

use super::types::{self, safe_ident};
use super::C99Emitter;

type ExprResult = Result<String, Diagnostic>;

impl<'a> C99Emitter<'a> {
    pub(crate) fn expr_to_c(&mut self, expr: &Expression) -> ExprResult {
        match expr {
            Expression::Num(Num::Integer(value, _)) => Ok(value.to_string()),
            Expression::Num(Num::FloatingPoint(value, _)) => Ok(format!("{value:?}")),
            Expression::Bool(b) => Ok(if b.value { "true" } else { "false" }.to_string()),
            Expression::AstString(s) => Ok(format!("(uint8_t *)\"{}\"", s.value)),
            Expression::StringInterpolation(interp) => self.interp_to_c(interp),
            Expression::Id(id) => Ok(self.id_to_c(id)),
            Expression::Unary(unary) => self.unary_to_c(unary),
            Expression::Binary(binary) => self.binary_to_c(binary),
            Expression::Assignment(assign) => self.assignment_to_c(assign),
            Expression::Call(call) => self.call_to_c(call),
            Expression::MemberAccess(access) => self.member_access_to_c(access),
            Expression::ArrayAccess(access) => {
                let base = self.expr_to_c(&access.array)?;
                let index = self.expr_to_c(&access.index)?;
                match self.infer_type(&access.array) {
                    Some(TypeName::Slice { .. }) => Ok(format!("{base}.ptr[{index}]")),
                    _ => Ok(format!("{base}[{index}]")),
                }
            }
            Expression::StructInit(init) => self.struct_init_to_c(init),
            Expression::ArrayLiteral(lit) => {
                let element = lit
                    .elements
                    .first()
                    .and_then(|e| self.infer_type(e))
                    .unwrap_or_else(|| TypeName::named("i32", lit.position.clone()));
                let element_c = self.type_to_c(&element);
                let values = self.expr_list_to_c(&lit.elements)?;
                Ok(format!("({element_c}[]){{{values}}}"))
            }
            Expression::TupleLiteral(lit) => {
                let items: Vec<TypeName> = lit
                    .elements
                    .iter()
                    .map(|e| {
                        self.infer_type(e)
                            .unwrap_or_else(|| TypeName::named("i32", lit.position.clone()))
                    })
                    .collect();
                let tuple_c = self.type_to_c(&TypeName::Tuple(items, lit.position.clone()));
                let mut fields = vec![];
                for (i, element) in lit.elements.iter().enumerate() {
                    fields.push(format!("._{i} = {}", self.expr_to_c(element)?));
                }
                Ok(format!("({tuple_c}){{{}}}", fields.join(", ")))
            }
            Expression::Match(m) => self.match_to_c(m),
            Expression::Catch(c) => self.catch_to_c(c),
            Expression::Cast(cast) => {
                let target_c = self.type_to_c(&cast.target);
                let inner = self.expr_to_c(&cast.expr)?;
                Ok(format!("(({target_c})({inner}))"))
            }
            Expression::Sizeof(s) => match &s.arg {
                SizeofArg::Type(ty) => {
                    // a bare identifier parses as a type; when it names a
                    // variable instead, size the variable
                    if let TypeName::Named {
                        name, type_args, ..
                    } = ty
                    {
                        if type_args.is_empty()
                            && types::base_type_to_c(name).is_none()
                            && self.program.find_enum(name).is_none()
                            && self.program.find_struct(name).is_none()
                            && self.lookup_var(name).is_some()
                        {
                            return Ok(format!("sizeof({})", safe_ident(name)));
                        }
                    }
                    let type_c = self.type_to_c(ty);
                    Ok(format!("sizeof({type_c})"))
                }
                SizeofArg::Expr(expr) => {
                    let inner = self.expr_to_c(expr)?;
                    Ok(format!("sizeof({inner})"))
                }
            },
            Expression::Alignof(a) => {
                let type_c = self.type_to_c(&a.target);
                Ok(format!("__alignof__({type_c})"))
            }
            Expression::Len(l) => {
                let target = self.expr_to_c(&l.target)?;
                match self.infer_type(&l.target) {
                    Some(TypeName::Array { size, .. }) => match size.literal() {
                        Some(n) => Ok(format!("(size_t){n}")),
                        None => Ok(format!("(sizeof({target}) / sizeof(({target})[0]))")),
                    },
                    Some(TypeName::Slice { .. }) => Ok(format!("{target}.len")),
                    _ => Ok(format!("(sizeof({target}) / sizeof(({target})[0]))")),
                }
            }
            Expression::Block(block) => {
                let block = block.clone();
                let body = self.block_to_inline_string(&block);
                let tail = match block.trailing_expression() {
                    Some(expr) => self.expr_to_c(&expr.clone())?,
                    None => "(void)0".to_string(),
                };
                Ok(format!("({{ {body} {tail}; }})"))
            }
        }
    }

    fn id_to_c(&mut self, id: &Id) -> String {
        if id.name == "null" && self.lookup_var("null").is_none() {
            return "NULL".to_string();
        }
        // slice parameters arrive by pointer; normalise them to values
        if let Some(local) = self.locals.iter().rev().find(|v| v.name == id.name) {
            if local.indirect {
                return format!("(*{})", safe_ident(&id.name));
            }
        }
        safe_ident(&id.name)
    }

    fn unary_to_c(&mut self, unary: &UnaryExpression) -> ExprResult {
        match unary.operator {
            UnaryOperator::Minus => Ok(format!("(-({}))", self.expr_to_c(&unary.operand)?)),
            UnaryOperator::Not => Ok(format!("(!({}))", self.expr_to_c(&unary.operand)?)),
            UnaryOperator::AddressOf => Ok(format!("(&{})", self.expr_to_c(&unary.operand)?)),
            UnaryOperator::Deref => Ok(format!("(*({}))", self.expr_to_c(&unary.operand)?)),
            UnaryOperator::Try => self.try_to_c(unary),
        }
    }

    /// `try expr`: evaluate into a temporary of the operand's error-union
    /// type; a nonzero tag runs the deferred cleanups for the error path and
    /// propagates, otherwise the payload is the value.
    fn try_to_c(&mut self, unary: &UnaryExpression) -> ExprResult {
        let operand_ty = self.infer_type(&unary.operand);
        let payload = match &operand_ty {
            Some(TypeName::ErrorUnion { payload, .. }) => payload.as_ref().clone(),
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::Lowering,
                    unary.position.clone(),
                    "operand of 'try' is not an error union",
                ))
            }
        };

        let Some(return_type) = self.current_return_type.clone() else {
            return Err(Diagnostic::new(
                DiagnosticKind::Lowering,
                unary.position.clone(),
                "'try' outside of a function",
            ));
        };
        if !return_type.is_error_union() {
            return Err(Diagnostic::new(
                DiagnosticKind::Lowering,
                unary.position.clone(),
                "'try' requires the enclosing function to return an error union",
            )
            .with_suggestion("change the return type to !T"));
        }

        let err_c = self.err_union_c(&payload);
        let ret_c = self.type_to_c(&return_type);
        let tmp = self.fresh_temp("try");
        let operand = self.expr_to_c(&unary.operand)?;
        let cleanups = self.deferred_cleanup_string(true);

        let tail = if payload.is_void() {
            "(void)0".to_string()
        } else {
            format!("{tmp}.value")
        };
        Ok(format!(
            "({{ {err_c} {tmp} = {operand}; if ({tmp}.error_id != 0) {{ {cleanups}return ({ret_c}){{ .error_id = {tmp}.error_id }}; }} {tail}; }})"
        ))
    }

    /// `expr catch [|err|] body`
    fn catch_to_c(&mut self, catch: &CatchExpression) -> ExprResult {
        let payload = match self.infer_type(&catch.expr) {
            Some(TypeName::ErrorUnion { payload, .. }) => payload.as_ref().clone(),
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::Lowering,
                    catch.position.clone(),
                    "operand of 'catch' is not an error union",
                ))
            }
        };

        let err_c = self.err_union_c(&payload);
        let tmp = self.fresh_temp("err");
        let operand = self.expr_to_c(&catch.expr)?;

        let binding = match &catch.error_var {
            Some(name) => format!("uint32_t {} = {tmp}.error_id; ", safe_ident(name)),
            None => String::new(),
        };

        if payload.is_void() {
            let handler = self.catch_body_statements(&catch.body, None)?;
            return Ok(format!(
                "({{ {err_c} {tmp} = {operand}; if ({tmp}.error_id != 0) {{ {binding}{handler}}} (void)0; }})"
            ));
        }

        let payload_c = self.type_to_c(&payload);
        let value = self.fresh_temp("val");
        let declarator = types::format_declarator(&payload_c, &value);
        let handler = self.catch_body_statements(&catch.body, Some(&value))?;

        Ok(format!(
            "({{ {err_c} {tmp} = {operand}; {declarator}; if ({tmp}.error_id != 0) {{ {binding}{handler}}} else {{ {value} = {tmp}.value; }} {value}; }})"
        ))
    }

    /// Statements of a catch body; when `value_var` is set, the body's value
    /// (bare expression or block trailing expression) is assigned to it.
    fn catch_body_statements(
        &mut self,
        body: &Expression,
        value_var: Option<&str>,
    ) -> ExprResult {
        match body {
            Expression::Block(block) => {
                let block = block.clone();
                let mut out = self.block_to_inline_string(&block);
                if let (Some(value_var), Some(trailing)) =
                    (value_var, block.trailing_expression())
                {
                    let tail = self.expr_to_c(&trailing.clone())?;
                    out.push_str(&format!("{value_var} = {tail}; "));
                }
                Ok(out)
            }
            other => {
                let value = self.expr_to_c(other)?;
                match value_var {
                    Some(value_var) => Ok(format!("{value_var} = {value}; ")),
                    None => Ok(format!("(void)({value}); ")),
                }
            }
        }
    }

    /// Lower a block's statements into a single-line string (for statement
    /// expressions). Trailing expressions are skipped; callers decide what
    /// to do with them.
    pub(crate) fn block_to_inline_string(&mut self, block: &Block) -> String {
        self.block_statements_string(block, true)
    }

    /// Like [`Self::block_to_inline_string`], but keeps a trailing
    /// expression statement (defer bodies want every statement).
    pub(crate) fn block_statements_string(
        &mut self,
        block: &Block,
        skip_trailing: bool,
    ) -> String {
        let statements: Vec<Statement> = block.statements.clone();
        let upto = match block.trailing_expression() {
            Some(_) if skip_trailing => statements.len() - 1,
            _ => statements.len(),
        };
        let rendered = self.buffered(|e| {
            e.enter_scope();
            for stmt in &statements[..upto] {
                e.gen_stmt(stmt);
            }
            e.exit_scope();
        });
        let mut flat = rendered.replace('\n', " ");
        if !flat.ends_with(' ') {
            flat.push(' ');
        }
        flat
    }

    fn binary_to_c(&mut self, binary: &BinaryExpression) -> ExprResult {
        use BinaryOperator::*;

        // structural struct comparison
        if matches!(binary.operator, Equals | NotEquals) {
            if let Some(struct_name) = self
                .infer_type(&binary.left)
                .and_then(|t| self.value_struct_name(&t))
            {
                let left = self.expr_to_c(&binary.left)?;
                let right = self.expr_to_c(&binary.right)?;
                let helper = format!("uya_eq_{}", safe_ident(&struct_name));
                let call = format!("{helper}({left}, {right})");
                return Ok(match binary.operator {
                    NotEquals => format!("(!{call})"),
                    _ => call,
                });
            }
        }

        match binary.operator {
            AddWrapping | SubstractWrapping | MultiplyWrapping => {
                return self.wrapping_to_c(binary)
            }
            AddSaturating | SubstractSaturating | MultiplySaturating => {
                return self.saturating_to_c(binary)
            }
            _ => {}
        }

        let left = self.expr_to_c(&binary.left)?;
        let right = self.expr_to_c(&binary.right)?;
        let op = match binary.operator {
            Add => "+",
            Substract => "-",
            Multiply => "*",
            Divide => "/",
            Remainder => "%",
            Equals => "==",
            NotEquals => "!=",
            LessThan => "<",
            LessOrEqual => "<=",
            GreaterThan => ">",
            GreaterOrEqual => ">=",
            And => "&&",
            Or => "||",
            AddSaturating | SubstractSaturating | MultiplySaturating | AddWrapping
            | SubstractWrapping | MultiplyWrapping => unreachable!(),
        };
        Ok(format!("({left} {op} {right})"))
    }

    /// `+%`, `-%`, `*%`: two's-complement wraparound through the unsigned
    /// counterpart of the operand type.
    fn wrapping_to_c(&mut self, binary: &BinaryExpression) -> ExprResult {
        let ty = self
            .infer_type(&binary.left)
            .or_else(|| self.infer_type(&binary.right));
        let name = match &ty {
            Some(TypeName::Named { name, .. }) => name.clone(),
            _ => "i32".to_string(),
        };
        let (signed_c, unsigned_c) = int_and_unsigned(&name).ok_or_else(|| {
            Diagnostic::new(
                DiagnosticKind::Lowering,
                binary.position.clone(),
                format!("wrapping arithmetic on non-integer type '{name}'"),
            )
        })?;

        let left = self.expr_to_c(&binary.left)?;
        let right = self.expr_to_c(&binary.right)?;
        let op = match binary.operator {
            BinaryOperator::AddWrapping => "+",
            BinaryOperator::SubstractWrapping => "-",
            _ => "*",
        };
        Ok(format!(
            "(({signed_c})(({unsigned_c})({left}) {op} ({unsigned_c})({right})))"
        ))
    }

    /// `+|`, `-|`, `*|`: clamp to the type bounds on overflow.
    fn saturating_to_c(&mut self, binary: &BinaryExpression) -> ExprResult {
        let ty = self
            .infer_type(&binary.left)
            .or_else(|| self.infer_type(&binary.right));
        let name = match &ty {
            Some(TypeName::Named { name, .. }) => name.clone(),
            _ => "i32".to_string(),
        };
        let Some((type_c, max_c, min_c)) = saturation_limits(&name) else {
            return Err(Diagnostic::new(
                DiagnosticKind::Lowering,
                binary.position.clone(),
                format!("saturating arithmetic on non-integer type '{name}'"),
            ));
        };

        let left = self.expr_to_c(&binary.left)?;
        let right = self.expr_to_c(&binary.right)?;
        let builtin = match binary.operator {
            BinaryOperator::AddSaturating => "__builtin_add_overflow",
            BinaryOperator::SubstractSaturating => "__builtin_sub_overflow",
            _ => "__builtin_mul_overflow",
        };
        let a = self.fresh_temp("sat_a");
        let b = self.fresh_temp("sat_b");
        let r = self.fresh_temp("sat_r");
        let clamp = if min_c == "0" {
            // unsigned: direction decides the bound
            match binary.operator {
                BinaryOperator::SubstractSaturating => min_c.to_string(),
                _ => max_c.to_string(),
            }
        } else {
            match binary.operator {
                BinaryOperator::SubstractSaturating => {
                    format!("(({a} >= 0) ? {max_c} : {min_c})")
                }
                // multiplication saturates toward the product's sign:
                // matching signs overflow positive, mixed signs negative
                BinaryOperator::MultiplySaturating => {
                    format!("((({a} >= 0) == ({b} >= 0)) ? {max_c} : {min_c})")
                }
                _ => format!("((({a} >= 0) == ({b} >= 0)) ? (({a} >= 0) ? {max_c} : {min_c}) : (({a} >= 0) ? {min_c} : {max_c}))"),
            }
        };
        Ok(format!(
            "({{ {type_c} {a} = {left}; {type_c} {b} = {right}; {type_c} {r}; if ({builtin}({a}, {b}, &{r})) {{ {r} = {clamp}; }} {r}; }})"
        ))
    }

    fn assignment_to_c(&mut self, assign: &Assignment) -> ExprResult {
        let lvalue = self.expr_to_c(&assign.lvalue)?;
        let rvalue = self.expr_to_c(&assign.rvalue)?;

        // whole-array assignment must copy
        if let Some(TypeName::Array { .. }) = self.infer_type(&assign.lvalue) {
            return Ok(format!(
                "memcpy({lvalue}, {rvalue}, sizeof({lvalue}))"
            ));
        }
        Ok(format!("{lvalue} = {rvalue}"))
    }

    fn struct_init_to_c(&mut self, init: &StructInitialisation) -> ExprResult {
        let struct_c = if init.type_args.is_empty() {
            format!("struct {}", safe_ident(&init.name))
        } else {
            let mangled = self
                .mono
                .request(MonoKind::Struct, &init.name, &init.type_args.clone());
            format!("struct {}", safe_ident(&mangled))
        };

        let mut fields = vec![];
        for field in &init.fields {
            let value = self.expr_to_c(&field.value)?;
            fields.push(format!(".{} = {value}", safe_ident(&field.name)));
        }
        Ok(format!("({struct_c}){{{}}}", fields.join(", ")))
    }

    fn member_access_to_c(&mut self, access: &MemberAccess) -> ExprResult {
        // `error.Name` constructs an error value of the enclosing return type
        if let Expression::Id(Id { name, .. }) = &access.object {
            if name == "error" {
                let id = crate::diagnostics::error_id(&access.field);
                let ret_c = match self.current_return_type.clone() {
                    Some(ty) if ty.is_error_union() => self.type_to_c(&ty),
                    _ => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::Lowering,
                            access.position.clone(),
                            "error value outside a function returning an error union",
                        ))
                    }
                };
                if self.program.find_error(&access.field).is_none() {
                    self.diag(
                        DiagnosticKind::Resolution,
                        &access.position,
                        format!("unknown error '{}'", access.field),
                    );
                }
                return Ok(format!("({ret_c}){{ .error_id = {id}u }}"));
            }

            // enum constant: Color.Red
            if self.program.find_enum(name).is_some() {
                return Ok(safe_ident(&format!("{}_{}", name, access.field)));
            }
        }

        let object = self.expr_to_c(&access.object)?;
        let sep = match self.infer_type(&access.object) {
            Some(TypeName::Pointer { .. }) => "->",
            _ => ".",
        };

        // tuple field access spells fields as _0, _1, ...
        if access.field.chars().all(|c| c.is_ascii_digit()) {
            return Ok(format!("{object}{sep}_{}", access.field));
        }
        Ok(format!("{object}{sep}{}", safe_ident(&access.field)))
    }

    fn expr_list_to_c(&mut self, exprs: &[Expression]) -> ExprResult {
        let mut parts = vec![];
        for expr in exprs {
            parts.push(self.expr_to_c(expr)?);
        }
        Ok(parts.join(", "))
    }

    fn call_to_c(&mut self, call: &CallExpression) -> ExprResult {
        if let Some(name) = call.callee_name() {
            if name == "@syscall" {
                return self.syscall_to_c(call);
            }
            if name == "slice" && call.args.len() == 3 {
                return self.slice_call_to_c(call);
            }
        }

        // method call: obj.method(args)
        if let Expression::MemberAccess(access) = &call.callee {
            if !matches!(&access.object, Expression::Id(Id { name, .. })
                if name == "error" || self.program.find_enum(name).is_some())
            {
                return self.method_call_to_c(call, access);
            }
        }

        let Some(name) = call.callee_name().map(|s| s.to_string()) else {
            // function-pointer value
            let callee = self.expr_to_c(&call.callee)?;
            let args = self.expr_list_to_c(&call.args)?;
            return Ok(format!("({callee})({args})"));
        };

        // generic instantiation at the call site
        if !call.type_args.is_empty() {
            let mangled = self
                .mono
                .request(MonoKind::Function, &name, &call.type_args.clone());
            let args = self.expr_list_to_c(&call.args)?;
            return Ok(format!("{}({args})", safe_ident(&mangled)));
        }

        let decl = self.program.find_function(&name).cloned();
        if decl.is_none() && self.lookup_var(&name).is_none() && !self.mono.knows(&name) {
            self.diag(
                DiagnosticKind::Resolution,
                &call.position,
                format!("unknown function '{name}'"),
            );
        }
        let mut args_c = vec![];
        for (i, arg) in call.args.iter().enumerate() {
            let param_ty = decl
                .as_ref()
                .and_then(|d| d.params.get(i))
                .map(|p| p.type_name.clone());
            args_c.push(self.call_arg_to_c(arg, param_ty.as_ref(), decl.as_ref())?);
        }

        Ok(format!("{}({})", safe_ident(&name), args_c.join(", ")))
    }

    /// One call argument, applying the extern ABI rewrites: large structs
    /// and slices pass by pointer, string literals adapt to `*byte`
    /// parameters.
    fn call_arg_to_c(
        &mut self,
        arg: &Expression,
        param_ty: Option<&TypeName>,
        decl: Option<&FunctionDeclaration>,
    ) -> ExprResult {
        let is_extern = decl.map(|d| d.is_extern && d.body.is_none()).unwrap_or(false);

        if let Some(param_ty) = param_ty {
            if is_extern {
                if let Some(struct_name) = self.value_struct_name(param_ty) {
                    let size = types::size_and_align(self.program, param_ty)
                        .map(|(s, _)| s)
                        .unwrap_or(0);
                    if size > 16 {
                        return self.address_of_value(arg, &struct_name);
                    }
                }
            }

            if let TypeName::Slice { .. } = param_ty {
                let slice_c = self.type_to_c(param_ty);
                let value = self.expr_to_c(arg)?;
                return Ok(format!("({slice_c}[]){{{value}}}"));
            }
        }

        self.expr_to_c(arg)
    }

    /// Address of a struct-typed argument: `&name` for lvalues, a one-element
    /// compound literal for rvalues.
    fn address_of_value(&mut self, arg: &Expression, struct_name: &str) -> ExprResult {
        let value = self.expr_to_c(arg)?;
        match arg {
            Expression::Id(_) | Expression::MemberAccess(_) | Expression::ArrayAccess(_) => {
                Ok(format!("(&{value})"))
            }
            _ => Ok(format!(
                "(struct {}[]){{{value}}}",
                safe_ident(struct_name)
            )),
        }
    }

    fn method_call_to_c(
        &mut self,
        call: &CallExpression,
        access: &MemberAccess,
    ) -> ExprResult {
        let object_ty = self.infer_type(&access.object);
        let (struct_name, object_is_pointer) = match &object_ty {
            Some(TypeName::Named { .. }) => (
                object_ty.as_ref().and_then(|t| self.value_struct_name(t)),
                false,
            ),
            Some(TypeName::Pointer { inner, .. }) => {
                (self.value_struct_name(inner), true)
            }
            _ => (None, false),
        };

        let Some(struct_name) = struct_name else {
            return Err(Diagnostic::new(
                DiagnosticKind::Resolution,
                access.position.clone(),
                format!("cannot resolve a method receiver for '{}'", access.field),
            ));
        };

        let method = self.find_method_via_mono(&struct_name, &access.field);
        let Some(method) = method else {
            return Err(Diagnostic::new(
                DiagnosticKind::Resolution,
                access.position.clone(),
                format!("struct '{struct_name}' has no method '{}'", access.field),
            ));
        };

        let c_name = format!(
            "uya_{}_{}",
            safe_ident(&struct_name),
            safe_ident(&access.field)
        );

        // receiver: methods taking `self`/pointer receive an address
        let receiver_by_pointer = method
            .params
            .first()
            .map(|p| {
                matches!(&p.type_name, TypeName::Pointer { .. })
                    || matches!(&p.type_name, TypeName::Named { name, .. } if name == "Self")
            })
            .unwrap_or(false);

        let object = self.expr_to_c(&access.object)?;
        let receiver = if object_is_pointer {
            object
        } else if receiver_by_pointer {
            match &access.object {
                Expression::Id(_) | Expression::MemberAccess(_) | Expression::ArrayAccess(_) => {
                    format!("(&{object})")
                }
                _ => format!("(struct {}[]){{{object}}}", safe_ident(&struct_name)),
            }
        } else {
            object
        };

        let mut args = vec![receiver];
        for arg in &call.args {
            args.push(self.expr_to_c(arg)?);
        }
        Ok(format!("{c_name}({})", args.join(", ")))
    }

    /// Method lookup that also follows monomorphized struct names back to
    /// their generic declaration.
    pub(crate) fn find_method_via_mono(
        &self,
        struct_name: &str,
        method: &str,
    ) -> Option<FunctionDeclaration> {
        if let Some(found) = self.program.find_method(struct_name, method) {
            return Some(found.clone());
        }
        let base = mono::generic_base_of(struct_name, |prefix| {
            self.program
                .find_struct(prefix)
                .is_some_and(|s| s.is_generic())
        })?;
        self.program.find_method(base, method).cloned()
    }

    /// `arr[start:len]` (already desugared to `slice(arr, start, len)`).
    fn slice_call_to_c(&mut self, call: &CallExpression) -> ExprResult {
        let base_ty = self.infer_type(&call.args[0]);
        let element = match &base_ty {
            Some(TypeName::Array { element, .. }) | Some(TypeName::Slice { element, .. }) => {
                element.as_ref().clone()
            }
            Some(TypeName::Pointer { inner, .. }) => inner.as_ref().clone(),
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::Lowering,
                    call.position.clone(),
                    "cannot slice this expression",
                ))
            }
        };

        let slice_c = self.type_to_c(&TypeName::Slice {
            element: Box::new(element),
            position: call.position.clone(),
        });
        let base = self.expr_to_c(&call.args[0])?;
        let start = self.expr_to_c(&call.args[1])?;
        let len = self.expr_to_c(&call.args[2])?;

        let ptr = match base_ty {
            Some(TypeName::Slice { .. }) => format!("{base}.ptr + ({start})"),
            _ => format!("{base} + ({start})"),
        };
        Ok(format!(
            "({slice_c}){{ .ptr = {ptr}, .len = (size_t)({len}) }}"
        ))
    }

    /// `@syscall(n, args...)` through the preamble helpers; a negative
    /// return carries the error id.
    fn syscall_to_c(&mut self, call: &CallExpression) -> ExprResult {
        if call.args.is_empty() || call.args.len() > 7 {
            return Err(Diagnostic::new(
                DiagnosticKind::Lowering,
                call.position.clone(),
                "@syscall takes a syscall number plus at most six arguments",
            ));
        }

        let helper = format!("uya_syscall{}", call.args.len() - 1);
        let mut args = vec![];
        for arg in &call.args {
            args.push(format!("(long)({})", self.expr_to_c(arg)?));
        }

        let tmp = self.fresh_temp("sc");
        Ok(format!(
            "({{ long {tmp} = {helper}({args}); (UyaErr_i64){{ .error_id = {tmp} < 0 ? (uint32_t)(-{tmp}) : 0u, .value = {tmp} < 0 ? 0 : {tmp} }}; }})",
            args = args.join(", ")
        ))
    }

    /// `match` in expression position: a statement expression holding the
    /// result variable, lowered to an if/else chain in declaration order.
    fn match_to_c(&mut self, m: &MatchExpression) -> ExprResult {
        let result_ty = m
            .arms
            .first()
            .and_then(|arm| self.infer_type(&arm.body))
            .unwrap_or_else(|| TypeName::named("i32", m.position.clone()));
        let result_c = self.type_to_c(&result_ty);
        let result = self.fresh_temp("match");
        let declarator = types::format_declarator(&result_c, &result);

        let scrutinee_ty = self
            .infer_type(&m.scrutinee)
            .unwrap_or_else(|| TypeName::named("i32", m.position.clone()));
        let scrutinee_c = self.type_to_c(&scrutinee_ty);
        let scrutinee_var = self.fresh_temp("scrut");
        let scrutinee_decl =
            types::format_declarator(&scrutinee_c, &scrutinee_var);
        let scrutinee = self.expr_to_c(&m.scrutinee)?;

        let mut chain = String::new();
        let mut first = true;
        for arm in &m.arms.clone() {
            let assign = self.match_arm_value(&arm.body, &result)?;
            match &arm.pattern {
                Pattern::Literal(pattern) => {
                    let condition = self.pattern_condition(&scrutinee_var, pattern)?;
                    if first {
                        chain.push_str(&format!("if ({condition}) {{ {assign} }}"));
                        first = false;
                    } else {
                        chain.push_str(&format!(" else if ({condition}) {{ {assign} }}"));
                    }
                }
                Pattern::Binding(name, _) => {
                    let binding = types::format_declarator(&scrutinee_c, &safe_ident(name));
                    let body = format!("{binding} = {scrutinee_var}; {assign}");
                    if first {
                        chain.push_str(&format!("{{ {body} }}"));
                        first = false;
                    } else {
                        chain.push_str(&format!(" else {{ {body} }}"));
                    }
                }
                Pattern::CatchAll(_) => {
                    if first {
                        chain.push_str(&format!("{{ {assign} }}"));
                        first = false;
                    } else {
                        chain.push_str(&format!(" else {{ {assign} }}"));
                    }
                }
            }
        }

        Ok(format!(
            "({{ {declarator}; {scrutinee_decl} = {scrutinee}; {chain} {result}; }})"
        ))
    }

    fn match_arm_value(&mut self, body: &Expression, result: &str) -> ExprResult {
        match body {
            Expression::Block(block) => {
                let block = block.clone();
                let mut out = self.block_to_inline_string(&block);
                if let Some(trailing) = block.trailing_expression() {
                    let tail = self.expr_to_c(&trailing.clone())?;
                    out.push_str(&format!("{result} = {tail};"));
                }
                Ok(out)
            }
            other => {
                let value = self.expr_to_c(other)?;
                Ok(format!("{result} = {value};"))
            }
        }
    }

    pub(crate) fn pattern_condition(
        &mut self,
        scrutinee_var: &str,
        pattern: &Expression,
    ) -> ExprResult {
        match pattern {
            Expression::TupleLiteral(lit) => {
                let mut parts = vec![];
                for (i, element) in lit.elements.iter().enumerate() {
                    let value = self.expr_to_c(element)?;
                    parts.push(format!("{scrutinee_var}._{i} == {value}"));
                }
                Ok(format!("({})", parts.join(" && ")))
            }
            other => {
                let value = self.expr_to_c(other)?;
                Ok(format!("{scrutinee_var} == {value}"))
            }
        }
    }

    /// String interpolation: a fixed-size buffer declared on the function
    /// prelude, filled with `memcpy` for literal runs and `sprintf` for
    /// interpolated expressions.
    fn interp_to_c(&mut self, interp: &StringInterpolation) -> ExprResult {
        let buffer = self.fresh_temp("msg");
        let len = self.fresh_temp("len");
        self.prelude
            .push(format!("char {buffer}[512]; size_t {len} = 0;"));

        let mut fills = String::new();
        for segment in &interp.segments.clone() {
            match segment {
                InterpSegment::Text(text) => {
                    let byte_len = unescape::unescape(text)
                        .map(|s| s.len())
                        .unwrap_or(text.len());
                    fills.push_str(&format!(
                        "memcpy({buffer} + {len}, \"{text}\", {byte_len}); {len} += {byte_len}; "
                    ));
                }
                InterpSegment::Expr { expr, format } => {
                    let spec = match format {
                        Some(spec) => render_format_spec(spec),
                        None => {
                            let ty = self.infer_type(expr);
                            types::default_format(ty.as_ref()).to_string()
                        }
                    };
                    let value = self.expr_to_c(expr)?;
                    fills.push_str(&format!(
                        "{len} += (size_t)sprintf({buffer} + {len}, \"{spec}\", {value}); "
                    ));
                }
            }
        }

        Ok(format!(
            "({{ {fills}{buffer}[{len}] = 0; (uint8_t *){buffer}; }})"
        ))
    }

    /// Struct name behind a type when the type is a (possibly generic)
    /// struct value.
    pub(crate) fn value_struct_name(&mut self, ty: &TypeName) -> Option<String> {
        match ty {
            TypeName::Named {
                name, type_args, ..
            } => {
                if types::base_type_to_c(name).is_some() || self.program.find_enum(name).is_some() {
                    return None;
                }
                if type_args.is_empty() {
                    if self.program.find_struct(name).is_some() || self.mono.knows(name) {
                        Some(name.clone())
                    } else {
                        None
                    }
                } else {
                    Some(self.mono.request(MonoKind::Struct, name, type_args))
                }
            }
            TypeName::Atomic { inner, .. } => self.value_struct_name(inner),
            _ => None,
        }
    }
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

fn int_and_unsigned(name: &str) -> Option<(&'static str, &'static str)> {
    Some(match name {
        "i8" => ("int8_t", "uint8_t"),
        "i16" => ("int16_t", "uint16_t"),
        "i32" => ("int32_t", "uint32_t"),
        "i64" => ("int64_t", "uint64_t"),
        "u8" | "byte" => ("uint8_t", "uint8_t"),
        "u16" => ("uint16_t", "uint16_t"),
        "u32" => ("uint32_t", "uint32_t"),
        "u64" => ("uint64_t", "uint64_t"),
        "usize" => ("size_t", "size_t"),
        _ => return None,
    })
}

fn saturation_limits(name: &str) -> Option<(&'static str, &'static str, &'static str)> {
    Some(match name {
        "i8" => ("int8_t", "INT8_MAX", "INT8_MIN"),
        "i16" => ("int16_t", "INT16_MAX", "INT16_MIN"),
        "i32" => ("int32_t", "INT32_MAX", "INT32_MIN"),
        "i64" => ("int64_t", "INT64_MAX", "INT64_MIN"),
        "u8" | "byte" => ("uint8_t", "UINT8_MAX", "0"),
        "u16" => ("uint16_t", "UINT16_MAX", "0"),
        "u32" => ("uint32_t", "UINT32_MAX", "0"),
        "u64" => ("uint64_t", "UINT64_MAX", "0"),
        "usize" => ("size_t", "SIZE_MAX", "0"),
        _ => return None,
    })
}
