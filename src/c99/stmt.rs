//! Statement lowering for the C99 backend.
//!
//! `return` stages its value in `_uya_ret` so the deferred cleanups can run
//! between evaluation and the actual `return`; `defer` and `errdefer`
//! register on a per-function stack that every return walks in reverse.

use crate::diagnostics::DiagnosticKind;
use crate::parser::ast::*;

use super::types::{self, safe_ident};
use super::{C99Emitter, DeferEntry};

impl<'a> C99Emitter<'a> {
    pub(crate) fn gen_block(&mut self, block: &Block) {
        self.emit_line("{");
        self.indent();
        self.enter_scope();
        for stmt in &block.statements.clone() {
            self.gen_stmt(stmt);
        }
        self.exit_scope();
        self.dedent();
        self.emit_line("}");
    }

    pub(crate) fn gen_stmt(&mut self, stmt: &Statement) {
        match stmt {
            Statement::VarDecl(decl) => self.gen_var_decl(decl),
            Statement::Return(ret) => self.gen_return(ret),
            Statement::If(stmt) => self.gen_if(stmt),
            Statement::While(stmt) => self.gen_while(stmt),
            Statement::For(stmt) => self.gen_for(stmt),
            Statement::Defer(stmt) => {
                self.defer_stack.push(DeferEntry {
                    body: stmt.body.clone(),
                    on_error: false,
                });
            }
            Statement::ErrDefer(stmt) => {
                self.defer_stack.push(DeferEntry {
                    body: stmt.body.clone(),
                    on_error: true,
                });
            }
            Statement::Break(_) => self.emit_line("break;"),
            Statement::Continue(_) => self.emit_line("continue;"),
            Statement::Block(block) => self.gen_block(block),
            Statement::Expression(Expression::Match(m)) => self.gen_match_stmt(m),
            Statement::Expression(expr) => match self.expr_to_c(expr) {
                Ok(code) => {
                    self.flush_prelude();
                    // a bare expression statement only matters for effects
                    if matches!(expr, Expression::Assignment(_) | Expression::Call(_)) {
                        self.emit_line(&format!("{code};"));
                    } else {
                        self.emit_line(&format!("(void)({code});"));
                    }
                }
                Err(diag) => {
                    self.sink.push(diag);
                    self.emit_line("/* lowering failed */;");
                }
            },
        }
    }

    /// Interpolation buffers registered while lowering the pending
    /// expression are declared just before the statement that uses them.
    fn flush_prelude(&mut self) {
        for line in std::mem::take(&mut self.prelude) {
            self.emit_line(&line);
        }
    }

    fn gen_var_decl(&mut self, decl: &VariableDeclaration) {
        let ty = match (&decl.type_name, &decl.init) {
            (Some(ty), _) => self.mono.substitute(ty),
            (None, Some(init)) => match self.infer_type(init) {
                Some(ty) => ty,
                None => {
                    self.diag(
                        DiagnosticKind::Resolution,
                        &decl.position,
                        format!("cannot infer a type for '{}'", decl.name),
                    );
                    TypeName::named("i32", decl.position.clone())
                }
            },
            (None, None) => {
                self.diag(
                    DiagnosticKind::Resolution,
                    &decl.position,
                    format!("'{}' has neither a type nor an initialiser", decl.name),
                );
                TypeName::named("i32", decl.position.clone())
            }
        };

        let type_c = self.type_to_c(&ty);
        let declarator = types::format_declarator(&type_c, &safe_ident(&decl.name));
        self.add_local(&decl.name, ty.clone());

        let Some(init) = &decl.init else {
            self.emit_line(&format!("{declarator};"));
            return;
        };

        // array variables initialise with a brace list, not a compound
        // literal
        if let (TypeName::Array { .. }, Expression::ArrayLiteral(lit)) = (&ty, init) {
            match self.expr_list_of(&lit.elements) {
                Ok(values) => {
                    self.flush_prelude();
                    self.emit_line(&format!("{declarator} = {{{values}}};"));
                }
                Err(diag) => {
                    self.sink.push(diag);
                    self.emit_line(&format!("{declarator};"));
                }
            }
            return;
        }

        match self.expr_to_c(init) {
            Ok(value) => {
                self.flush_prelude();
                self.emit_line(&format!("{declarator} = {value};"));
            }
            Err(diag) => {
                self.sink.push(diag);
                self.emit_line(&format!("{declarator};"));
            }
        }
    }

    fn expr_list_of(
        &mut self,
        exprs: &[Expression],
    ) -> Result<String, crate::diagnostics::Diagnostic> {
        let mut parts = vec![];
        for expr in exprs {
            parts.push(self.expr_to_c(expr)?);
        }
        Ok(parts.join(", "))
    }

    fn gen_if(&mut self, stmt: &IfStatement) {
        let condition = match self.expr_to_c(&stmt.condition) {
            Ok(code) => code,
            Err(diag) => {
                self.sink.push(diag);
                "0".to_string()
            }
        };
        self.flush_prelude();
        self.emit_indent();
        self.emit(&format!("if ({condition}) "));
        self.gen_branch_block(&stmt.then_branch);

        if let Some(else_branch) = &stmt.else_branch {
            self.emit_indent();
            self.emit("else ");
            match else_branch.as_ref() {
                Statement::If(nested) => {
                    self.emit("\n");
                    self.indent();
                    self.gen_if(nested);
                    self.dedent();
                }
                Statement::Block(block) => self.gen_branch_block(block),
                other => {
                    self.emit("\n");
                    self.indent();
                    self.gen_stmt(other);
                    self.dedent();
                }
            }
        }
    }

    fn gen_branch_block(&mut self, block: &Block) {
        self.emit("{\n");
        self.indent();
        self.enter_scope();
        for stmt in &block.statements.clone() {
            self.gen_stmt(stmt);
        }
        self.exit_scope();
        self.dedent();
        self.emit_line("}");
    }

    fn gen_while(&mut self, stmt: &WhileLoop) {
        let condition = match self.expr_to_c(&stmt.condition) {
            Ok(code) => code,
            Err(diag) => {
                self.sink.push(diag);
                "0".to_string()
            }
        };
        self.flush_prelude();
        self.emit_indent();
        self.emit(&format!("while ({condition}) "));
        self.gen_branch_block(&stmt.body);
    }

    /// `for arr |x|` iterates by index with `sizeof(arr)/sizeof(arr[0])`;
    /// `for arr |x, i|` additionally binds the index; `for a..b |i|` is a
    /// classic range loop. Slices iterate their `len`.
    fn gen_for(&mut self, stmt: &ForLoop) {
        match &stmt.iterable {
            ForIterable::Range(start, end) => {
                let start_ty = self
                    .infer_type(start)
                    .unwrap_or_else(|| TypeName::named("i32", stmt.position.clone()));
                let type_c = self.type_to_c(&start_ty);
                let item = safe_ident(&stmt.item_var);
                let (start_c, end_c) = match (self.expr_to_c(start), self.expr_to_c(end)) {
                    (Ok(s), Ok(e)) => (s, e),
                    (Err(diag), _) | (_, Err(diag)) => {
                        self.sink.push(diag);
                        return;
                    }
                };
                self.flush_prelude();
                self.emit_indent();
                self.emit(&format!(
                    "for ({type_c} {item} = {start_c}; {item} < {end_c}; {item}++) "
                ));
                self.enter_scope();
                self.add_local(&stmt.item_var, start_ty);
                self.gen_for_body(&stmt.body, None);
                self.exit_scope();
            }
            ForIterable::Value(iterable) => {
                let iterable_ty = self.infer_type(iterable);
                let index = self.fresh_temp("i");
                let iterable_c = match self.expr_to_c(iterable) {
                    Ok(code) => code,
                    Err(diag) => {
                        self.sink.push(diag);
                        return;
                    }
                };

                let (element_ty, bound, element_expr) = match &iterable_ty {
                    Some(TypeName::Array { element, .. }) => (
                        element.as_ref().clone(),
                        format!("sizeof({iterable_c}) / sizeof({iterable_c}[0])"),
                        format!("{iterable_c}[{index}]"),
                    ),
                    Some(TypeName::Slice { element, .. }) => (
                        element.as_ref().clone(),
                        format!("{iterable_c}.len"),
                        format!("{iterable_c}.ptr[{index}]"),
                    ),
                    _ => {
                        self.diag(
                            DiagnosticKind::Lowering,
                            &stmt.position,
                            "for loop iterable is neither an array nor a slice",
                        );
                        return;
                    }
                };

                let element_c = self.type_to_c(&element_ty);
                let item = safe_ident(&stmt.item_var);
                self.flush_prelude();
                self.emit_indent();
                self.emit(&format!(
                    "for (size_t {index} = 0; {index} < {bound}; {index}++) "
                ));

                self.enter_scope();
                self.add_local(&stmt.item_var, element_ty);
                let item_decl = types::format_declarator(&element_c, &item);
                let preface = format!("{item_decl} = {element_expr};");
                let index_binding = stmt.index_var.as_ref().map(|index_var| {
                    self.add_local(index_var, TypeName::named("usize", stmt.position.clone()));
                    format!("size_t {} = {index};", safe_ident(index_var))
                });

                self.emit("{\n");
                self.indent();
                self.emit_line(&preface);
                if let Some(binding) = index_binding {
                    self.emit_line(&binding);
                }
                for body_stmt in &stmt.body.statements.clone() {
                    self.gen_stmt(body_stmt);
                }
                self.dedent();
                self.emit_line("}");
                self.exit_scope();
            }
        }
    }

    fn gen_for_body(&mut self, body: &Block, preface: Option<&str>) {
        self.emit("{\n");
        self.indent();
        if let Some(preface) = preface {
            self.emit_line(preface);
        }
        for stmt in &body.statements.clone() {
            self.gen_stmt(stmt);
        }
        self.dedent();
        self.emit_line("}");
    }

    /// `match` in statement position: a plain if/else chain, no result
    /// temporary.
    fn gen_match_stmt(&mut self, m: &MatchExpression) {
        let scrutinee_ty = self
            .infer_type(&m.scrutinee)
            .unwrap_or_else(|| TypeName::named("i32", m.position.clone()));
        let scrutinee_c = self.type_to_c(&scrutinee_ty);
        let scrutinee_var = self.fresh_temp("scrut");
        let scrutinee = match self.expr_to_c(&m.scrutinee) {
            Ok(code) => code,
            Err(diag) => {
                self.sink.push(diag);
                return;
            }
        };
        self.flush_prelude();
        let declarator = types::format_declarator(&scrutinee_c, &scrutinee_var);
        self.emit_line("{");
        self.indent();
        self.emit_line(&format!("{declarator} = {scrutinee};"));

        let mut first = true;
        for arm in &m.arms.clone() {
            let header = match &arm.pattern {
                Pattern::Literal(pattern) => {
                    match self.pattern_condition(&scrutinee_var, pattern) {
                        Ok(condition) => {
                            if first {
                                format!("if ({condition}) ")
                            } else {
                                format!("else if ({condition}) ")
                            }
                        }
                        Err(diag) => {
                            self.sink.push(diag);
                            continue;
                        }
                    }
                }
                Pattern::Binding(_, _) | Pattern::CatchAll(_) => {
                    if first {
                        String::new()
                    } else {
                        "else ".to_string()
                    }
                }
            };
            first = false;

            self.emit_indent();
            self.emit(&header);
            self.emit("{\n");
            self.indent();
            self.enter_scope();
            if let Pattern::Binding(name, _) = &arm.pattern {
                let binding = types::format_declarator(&scrutinee_c, &safe_ident(name));
                self.emit_line(&format!("{binding} = {scrutinee_var};"));
                self.add_local(name, scrutinee_ty.clone());
            }
            match &arm.body {
                Expression::Block(block) => {
                    for stmt in &block.statements.clone() {
                        self.gen_stmt(stmt);
                    }
                }
                other => match self.expr_to_c(other) {
                    Ok(code) => self.emit_line(&format!("(void)({code});")),
                    Err(diag) => self.sink.push(diag),
                },
            }
            self.exit_scope();
            self.dedent();
            self.emit_line("}");
        }

        self.dedent();
        self.emit_line("}");
    }

    /// `return expr;` → stage in `_uya_ret`, run the defer stack in reverse
    /// (errdefer frames only on error-carrying returns), then return.
    fn gen_return(&mut self, ret: &ReturnStatement) {
        let return_type = self.current_return_type.clone();
        let is_err_union = return_type
            .as_ref()
            .map(|t| t.is_error_union())
            .unwrap_or(false);

        let value = match &ret.expr {
            Some(expr) => match self.expr_to_c(expr) {
                Ok(code) => {
                    // a plain payload returned from a !T function wraps into
                    // the success slot
                    if is_err_union && !self.expr_is_error_union(expr) {
                        let ret_c = self.type_to_c(&return_type.clone().unwrap());
                        let payload = return_type
                            .as_ref()
                            .map(|t| t.error_union_payload().clone());
                        if payload.map(|p| p.is_void()).unwrap_or(false) {
                            Some(format!("({ret_c}){{ .error_id = 0 }}"))
                        } else {
                            Some(format!("({ret_c}){{ .error_id = 0, .value = {code} }}"))
                        }
                    } else {
                        Some(code)
                    }
                }
                Err(diag) => {
                    self.sink.push(diag);
                    self.emit_line("/* lowering failed */;");
                    return;
                }
            },
            None if is_err_union => {
                let ret_c = self.type_to_c(&return_type.clone().unwrap());
                Some(format!("({ret_c}){{ .error_id = 0 }}"))
            }
            None => None,
        };

        self.flush_prelude();

        match value {
            Some(value) => {
                let ret_c = match &return_type {
                    Some(ty) => self.type_to_c(&ty.clone()),
                    None => "int32_t".to_string(),
                };
                self.emit_line("{");
                self.indent();
                let declarator = types::format_declarator(&ret_c, "_uya_ret");
                self.emit_line(&format!("{declarator} = {value};"));
                self.emit_return_cleanups(Some("_uya_ret"), is_err_union);
                self.emit_line("return _uya_ret;");
                self.dedent();
                self.emit_line("}");
            }
            None => {
                self.emit_return_cleanups(None, false);
                self.emit_line("return;");
            }
        }
    }

    /// Whether an expression already evaluates to the enclosing error-union
    /// type (error values, direct calls returning `!T`, catch of nothing).
    fn expr_is_error_union(&self, expr: &Expression) -> bool {
        if expr.as_error_value().is_some() {
            return true;
        }
        matches!(
            self.infer_type(expr),
            Some(TypeName::ErrorUnion { .. })
        )
    }

    pub(crate) fn emit_return_cleanups(&mut self, ret_var: Option<&str>, is_err_union: bool) {
        for entry in self.defer_stack.clone().iter().rev() {
            if entry.on_error {
                let Some(ret_var) = ret_var else { continue };
                if !is_err_union {
                    continue;
                }
                self.emit_indent();
                self.emit(&format!("if ({ret_var}.error_id != 0) "));
                self.gen_branch_block(&entry.body);
            } else {
                self.gen_branch_block_indented(&entry.body);
            }
        }
    }

    fn gen_branch_block_indented(&mut self, block: &Block) {
        self.emit_indent();
        self.gen_branch_block(block);
    }

    /// Rendered cleanup statements for an error path inside a statement
    /// expression (`try` propagation): every frame runs, errdefer included.
    pub(crate) fn deferred_cleanup_string(&mut self, _error_path: bool) -> String {
        let entries: Vec<Block> = self
            .defer_stack
            .iter()
            .rev()
            .map(|e| e.body.clone())
            .collect();
        let mut out = String::new();
        for body in entries {
            out.push_str(&self.block_statements_string(&body, false));
        }
        out
    }
}
