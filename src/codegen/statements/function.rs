//! Function declaration and definition for the LLVM backend.
//!
//! Emission is two-pass: every function (externs, methods, test blocks and
//! already-discovered monomorphized instances) is declared first so forward
//! references and recursion resolve, then bodies are defined. The
//! monomorphization queue is drained afterwards; defining one instance may
//! request further ones.
//!
//! A function walks the states NotStarted → Declared → InBody →
//! EmittingReturn → Done. Declared-only functions (no body) stop at
//! Declared. Entering the body creates the entry block, allocates parameter
//! slots and stores the incoming values; every `return` stores `_uya_ret`
//! and branches to the synthesized return block, which alone issues `ret`.

use inkwell::types::{BasicMetadataTypeEnum, BasicType, FunctionType};
use inkwell::AddressSpace;

use crate::mono::{self, MonoKind};
use crate::parser::ast::*;

use super::super::expressions::call::{classify_extern_type, AbiClass};
use super::super::{CodegenContext, CodegenError, CodegenResult, FuncEntry, FunctionState};
use super::gen_statements;

pub fn emit_program<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>) {
    ctx.register_struct_types();
    emit_globals(ctx);

    // pass 1: declarations
    for decl in &ctx.program.declarations {
        match decl {
            Declaration::Function(f) if !f.is_generic() => {
                declare_function(ctx, f, &f.name, None);
            }
            Declaration::Extern(f) => {
                declare_function(ctx, f, &f.name, None);
            }
            Declaration::Struct(s) if !s.is_generic() => {
                for method in &s.methods {
                    let symbol = format!("uya_{}_{}", s.name, method.name);
                    declare_function(ctx, method, &symbol, Some(&s.name));
                }
            }
            Declaration::MethodBlock(block) => {
                if owner_is_generic(ctx, &block.struct_name) {
                    continue;
                }
                for method in &block.methods {
                    let symbol = format!("uya_{}_{}", block.struct_name, method.name);
                    declare_function(ctx, method, &symbol, Some(&block.struct_name));
                }
            }
            Declaration::Impl(block) => {
                if owner_is_generic(ctx, &block.struct_name) {
                    continue;
                }
                for method in &block.methods {
                    let symbol = format!("uya_{}_{}", block.struct_name, method.name);
                    declare_function(ctx, method, &symbol, Some(&block.struct_name));
                }
            }
            _ => {}
        }
    }
    let mut test_index = 0usize;
    for decl in &ctx.program.declarations {
        if let Declaration::TestBlock(t) = decl {
            declare_test(ctx, t, test_index);
            test_index += 1;
        }
    }

    // pass 2: definitions
    for decl in &ctx.program.declarations {
        match decl {
            Declaration::Function(f) if !f.is_generic() => {
                define_function(ctx, f, &f.name, None);
            }
            Declaration::Extern(f) if f.body.is_some() => {
                define_function(ctx, f, &f.name, None);
            }
            Declaration::Struct(s) if !s.is_generic() => {
                for method in &s.methods {
                    let symbol = format!("uya_{}_{}", s.name, method.name);
                    define_function(ctx, method, &symbol, Some(&s.name));
                }
            }
            Declaration::MethodBlock(block) => {
                if owner_is_generic(ctx, &block.struct_name) {
                    continue;
                }
                for method in &block.methods {
                    let symbol = format!("uya_{}_{}", block.struct_name, method.name);
                    define_function(ctx, method, &symbol, Some(&block.struct_name));
                }
            }
            Declaration::Impl(block) => {
                if owner_is_generic(ctx, &block.struct_name) {
                    continue;
                }
                for method in &block.methods {
                    let symbol = format!("uya_{}_{}", block.struct_name, method.name);
                    define_function(ctx, method, &symbol, Some(&block.struct_name));
                }
            }
            _ => {}
        }
    }
    let mut test_index = 0usize;
    for decl in &ctx.program.declarations {
        if let Declaration::TestBlock(t) = decl {
            define_test(ctx, t, test_index);
            test_index += 1;
        }
    }

    // drain the instantiation queue; definitions may grow it
    let mut next = 0usize;
    loop {
        let count = ctx.mono.borrow().request_count();
        if next >= count {
            break;
        }
        let request = ctx.mono.borrow().request_at(next).unwrap();
        next += 1;

        match request.kind {
            MonoKind::Function => {
                let Some(decl) = ctx.program.find_function(&request.generic_name).cloned()
                else {
                    continue;
                };
                ctx.mono
                    .borrow_mut()
                    .push_context(decl.type_params.clone(), request.type_args.clone());
                declare_function(ctx, &decl, &request.mangled, None);
                define_function(ctx, &decl, &request.mangled, None);
                ctx.mono.borrow_mut().pop_context();
            }
            MonoKind::Struct => {
                let Some(decl) = ctx.program.find_struct(&request.generic_name).cloned()
                else {
                    continue;
                };
                let methods = methods_of(ctx, &request.generic_name);
                ctx.mono
                    .borrow_mut()
                    .push_context(decl.type_params.clone(), request.type_args.clone());
                for method in &methods {
                    let symbol = format!("uya_{}_{}", request.mangled, method.name);
                    declare_function(ctx, method, &symbol, Some(&request.mangled));
                    define_function(ctx, method, &symbol, Some(&request.mangled));
                }
                ctx.mono.borrow_mut().pop_context();
            }
        }
    }
}

fn owner_is_generic<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>, name: &str) -> bool {
    ctx.program
        .find_struct(name)
        .map(|s| s.is_generic())
        .unwrap_or(false)
}

fn methods_of<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    struct_name: &str,
) -> Vec<FunctionDeclaration> {
    let mut methods = vec![];
    if let Some(decl) = ctx.program.find_struct(struct_name) {
        methods.extend(decl.methods.iter().cloned());
    }
    if let Some(block) = ctx.program.method_block_for(struct_name) {
        methods.extend(block.methods.iter().cloned());
    }
    for block in ctx.program.impl_blocks_for(struct_name) {
        methods.extend(block.methods.iter().cloned());
    }
    methods
}

fn emit_globals<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>) {
    for decl in &ctx.program.declarations {
        let Declaration::Global(var) = decl else {
            continue;
        };

        let ty = match (&var.type_name, &var.init) {
            (Some(ty), _) => ty.clone(),
            (None, Some(Expression::Num(Num::Integer(_, span)))) => {
                TypeName::named("i32", span.clone())
            }
            (None, Some(Expression::Num(Num::FloatingPoint(_, span)))) => {
                TypeName::named("f64", span.clone())
            }
            (None, Some(Expression::Bool(b))) => TypeName::named("bool", b.position.clone()),
            _ => {
                ctx.diag(CodegenError::resolution(
                    &var.position,
                    format!("global '{}' needs a type annotation", var.name),
                ));
                continue;
            }
        };

        let lowered = match ctx.lower_type(&ty) {
            Ok(lowered) => lowered,
            Err(error) => {
                ctx.diag(error);
                continue;
            }
        };

        let global = ctx.module.add_global(lowered, None, &var.name);
        match &var.init {
            Some(Expression::Num(Num::Integer(value, _))) => {
                if let inkwell::types::BasicTypeEnum::IntType(int_ty) = lowered {
                    global.set_initializer(&int_ty.const_int(*value as u64, true));
                }
            }
            Some(Expression::Num(Num::FloatingPoint(value, _))) => {
                if let inkwell::types::BasicTypeEnum::FloatType(float_ty) = lowered {
                    global.set_initializer(&float_ty.const_float(*value));
                }
            }
            Some(Expression::Bool(b)) => {
                if let inkwell::types::BasicTypeEnum::IntType(int_ty) = lowered {
                    global.set_initializer(&int_ty.const_int(b.value as u64, false));
                }
            }
            Some(other) => {
                ctx.diag(CodegenError::lowering(
                    &other.position(),
                    format!("global '{}' needs a literal initialiser", var.name),
                ));
                global.set_initializer(&lowered.const_zero());
            }
            None => global.set_initializer(&lowered.const_zero()),
        }

        ctx.globals.borrow_mut().push(super::super::VarEntry {
            name: var.name.clone(),
            ptr: global.as_pointer_value(),
            llvm_ty: lowered,
            ast_ty: ty,
            depth: 0,
        });
    }
}

/// Substituted source-level parameter types, with `Self` resolved to a
/// pointer to the owning struct.
fn signature_types<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    decl: &FunctionDeclaration,
    owner: Option<&str>,
) -> (Vec<TypeName>, TypeName) {
    let params = decl
        .params
        .iter()
        .map(|p| {
            let ty = ctx.subst(&p.type_name);
            match (&ty, owner) {
                (TypeName::Named { name, position, .. }, Some(owner)) if name == "Self" => {
                    TypeName::Pointer {
                        inner: Box::new(TypeName::named(owner, position.clone())),
                        borrowed: false,
                        position: position.clone(),
                    }
                }
                _ => ty,
            }
        })
        .collect();
    (params, ctx.subst(&decl.return_type))
}

/// NotStarted → Declared.
fn declare_function<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    decl: &FunctionDeclaration,
    symbol: &str,
    owner: Option<&str>,
) {
    if ctx.find_func(symbol).is_some() {
        return;
    }

    let (param_types, return_type) = signature_types(ctx, decl, owner);
    let is_extern_import = decl.is_extern && decl.body.is_none();

    let fn_type = match build_fn_type(ctx, decl, &param_types, &return_type, is_extern_import) {
        Ok(fn_type) => fn_type,
        Err(error) => {
            ctx.diag(error);
            return;
        }
    };

    let value = ctx.module.add_function(symbol, fn_type, None);
    ctx.func_map.borrow_mut().insert(
        symbol.to_string(),
        FuncEntry {
            value,
            decl: decl.clone(),
            param_types,
            return_type,
            is_extern_import,
        },
    );
}

fn build_fn_type<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    decl: &FunctionDeclaration,
    param_types: &[TypeName],
    return_type: &TypeName,
    is_extern_import: bool,
) -> CodegenResult<FunctionType<'ctx>> {
    let mut lowered_params: Vec<BasicMetadataTypeEnum<'ctx>> = vec![];

    // memory-class extern returns go through a hidden pointer parameter
    let ret_class = if is_extern_import {
        classify_extern_type(ctx, return_type)
    } else {
        AbiClass::Direct
    };
    if ret_class == AbiClass::Memory {
        lowered_params.push(ctx.context.ptr_type(AddressSpace::default()).into());
    }

    for param_ty in param_types {
        if is_extern_import {
            match classify_extern_type(ctx, param_ty) {
                AbiClass::Direct => lowered_params.push(ctx.lower_type(param_ty)?.into()),
                AbiClass::Ignore => {}
                AbiClass::IntRegister(bits) => {
                    lowered_params.push(ctx.context.custom_width_int_type(bits).into())
                }
                AbiClass::TwoIntRegisters => {
                    lowered_params.push(ctx.context.i64_type().into());
                    lowered_params.push(ctx.context.i64_type().into());
                }
                AbiClass::Memory => {
                    lowered_params.push(ctx.context.ptr_type(AddressSpace::default()).into())
                }
            }
        } else {
            lowered_params.push(ctx.lower_type(param_ty)?.into());
        }
    }

    let fn_type = match ret_class {
        AbiClass::Memory => ctx
            .context
            .void_type()
            .fn_type(&lowered_params, decl.is_varargs),
        AbiClass::IntRegister(bits) => ctx
            .context
            .custom_width_int_type(bits)
            .fn_type(&lowered_params, decl.is_varargs),
        AbiClass::TwoIntRegisters => {
            let i64_ty = ctx.context.i64_type();
            ctx.context
                .struct_type(&[i64_ty.into(), i64_ty.into()], false)
                .fn_type(&lowered_params, decl.is_varargs)
        }
        _ => {
            if return_type.is_void() {
                ctx.context
                    .void_type()
                    .fn_type(&lowered_params, decl.is_varargs)
            } else {
                ctx.lower_type(return_type)?
                    .fn_type(&lowered_params, decl.is_varargs)
            }
        }
    };
    Ok(fn_type)
}

/// Declared → InBody → EmittingReturn → Done. Declared-only functions stop
/// after declaration.
fn define_function<'a, 'ctx>(
    ctx: &CodegenContext<'a, 'ctx>,
    decl: &FunctionDeclaration,
    symbol: &str,
    owner: Option<&str>,
) {
    let Some(body) = &decl.body else { return };
    let Some(entry) = ctx.find_func(symbol) else {
        return;
    };
    let function = entry.value;
    if function.count_basic_blocks() > 0 {
        return;
    }

    // InBody: entry block, return machinery, parameter slots
    let entry_bb = ctx.context.append_basic_block(function, "entry");
    ctx.builder.position_at_end(entry_bb);

    let saved_state = std::mem::take(&mut *ctx.state.borrow_mut());
    let saved_locals = std::mem::take(&mut *ctx.locals.borrow_mut());
    let saved_depth = *ctx.scope_depth.borrow();
    *ctx.scope_depth.borrow_mut() = 0;

    let ret_bb = ctx.context.append_basic_block(function, "return");
    let ret_slot = if entry.return_type.is_void() {
        None
    } else {
        match ctx.lower_type(&entry.return_type) {
            Ok(lowered) => match ctx.build_entry_alloca_in(entry_bb, lowered, "_uya_ret") {
                Ok(slot) => Some((slot, lowered)),
                Err(error) => {
                    ctx.diag(error);
                    None
                }
            },
            Err(error) => {
                ctx.diag(error);
                None
            }
        }
    };

    {
        let mut state = ctx.state.borrow_mut();
        state.function = Some(function);
        state.return_type = Some(entry.return_type.clone());
        state.ret_slot = ret_slot.map(|(slot, _)| slot);
        state.ret_block = Some(ret_bb);
        state.method_struct = owner.map(|s| s.to_string());
    }

    let mut failed = false;
    for (i, param) in decl.params.iter().enumerate() {
        let Some(ast_ty) = entry.param_types.get(i).cloned() else {
            continue;
        };
        let incoming = match function.get_nth_param(i as u32) {
            Some(value) => value,
            None => continue,
        };
        match ctx.lower_type(&ast_ty) {
            Ok(lowered) => match ctx.build_entry_alloca_in(entry_bb, lowered, &param.name) {
                Ok(slot) => {
                    ctx.builder.build_store(slot, incoming).unwrap();
                    ctx.add_var(&param.name, slot, lowered, ast_ty);
                }
                Err(error) => {
                    ctx.diag(error);
                    failed = true;
                }
            },
            Err(error) => {
                ctx.diag(error);
                failed = true;
            }
        }
    }

    if !failed {
        if let Err(error) = gen_statements(ctx, &body.statements) {
            ctx.diag(error);
            failed = true;
        }
    }

    // EmittingReturn: fall-through termination
    if ctx
        .builder
        .get_insert_block()
        .and_then(|bb| bb.get_terminator())
        .is_none()
    {
        if failed {
            ctx.builder.build_unreachable().unwrap();
        } else if entry.return_type.is_error_union()
            && entry.return_type.error_union_payload().is_void()
        {
            // implicit success return for !void
            match super::wrap_success_value(
                ctx,
                entry.return_type.error_union_payload(),
                None,
            ) {
                Ok(success) => {
                    if let Some((slot, _)) = ret_slot {
                        ctx.builder.build_store(slot, success).unwrap();
                    }
                    if let Err(error) = ctx.emit_return_defers(true) {
                        ctx.diag(error);
                    }
                    ctx.builder.build_unconditional_branch(ret_bb).unwrap();
                }
                Err(error) => {
                    ctx.diag(error);
                    ctx.builder.build_unreachable().unwrap();
                }
            }
        } else if entry.return_type.is_void() {
            if let Err(error) = ctx.emit_return_defers(false) {
                ctx.diag(error);
            }
            ctx.builder.build_unconditional_branch(ret_bb).unwrap();
        } else {
            ctx.builder.build_unreachable().unwrap();
        }
    }

    // Done: the synthesized return block loads `_uya_ret` and issues `ret`
    ctx.builder.position_at_end(ret_bb);
    match ret_slot {
        Some((slot, lowered)) => {
            let value = ctx.builder.build_load(lowered, slot, "_uya_ret").unwrap();
            ctx.builder.build_return(Some(&value)).unwrap();
        }
        None => {
            ctx.builder.build_return(None).unwrap();
        }
    }

    *ctx.state.borrow_mut() = saved_state;
    *ctx.locals.borrow_mut() = saved_locals;
    *ctx.scope_depth.borrow_mut() = saved_depth;
}

fn declare_test<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>, t: &TestBlock, index: usize) {
    let symbol = format!("uya_test_{index}");
    let decl = FunctionDeclaration {
        name: symbol.clone(),
        type_params: vec![],
        params: vec![],
        return_type: TypeName::void(t.position.clone()),
        body: Some(t.body.clone()),
        is_extern: false,
        is_varargs: false,
        position: t.position.clone(),
    };
    declare_function(ctx, &decl, &symbol, None);
}

fn define_test<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>, t: &TestBlock, index: usize) {
    let symbol = format!("uya_test_{index}");
    let decl = FunctionDeclaration {
        name: symbol.clone(),
        type_params: vec![],
        params: vec![],
        return_type: TypeName::void(t.position.clone()),
        body: Some(t.body.clone()),
        is_extern: false,
        is_varargs: false,
        position: t.position.clone(),
    };
    define_function(ctx, &decl, &symbol, None);
}

/// Declare a monomorphized instantiation (function or struct method) the
/// moment a call site needs it; the definition follows in the drain loop.
pub fn ensure_instantiation_declared<'a, 'ctx>(ctx: &CodegenContext<'a, 'ctx>, symbol: &str) {
    if ctx.find_func(symbol).is_some() {
        return;
    }

    // monomorphized function
    let request = ctx
        .mono
        .borrow()
        .requests()
        .iter()
        .find(|r| r.kind == MonoKind::Function && r.mangled == symbol)
        .cloned();
    if let Some(request) = request {
        if let Some(decl) = ctx.program.find_function(&request.generic_name).cloned() {
            ctx.mono
                .borrow_mut()
                .push_context(decl.type_params.clone(), request.type_args.clone());
            declare_function(ctx, &decl, symbol, None);
            ctx.mono.borrow_mut().pop_context();
        }
        return;
    }

    // method symbol: uya_<struct>_<method>
    let Some(rest) = symbol.strip_prefix("uya_") else {
        return;
    };
    let mut owners: Vec<String> = ctx
        .program
        .declarations
        .iter()
        .filter_map(|d| match d {
            Declaration::Struct(s) => Some(s.name.clone()),
            _ => None,
        })
        .collect();
    owners.extend(
        ctx.mono
            .borrow()
            .requests()
            .iter()
            .filter(|r| r.kind == MonoKind::Struct)
            .map(|r| r.mangled.clone()),
    );

    for owner in owners {
        let Some(method_name) = rest.strip_prefix(&format!("{owner}_")) else {
            continue;
        };
        let method = ctx
            .program
            .find_method(&owner, method_name)
            .cloned()
            .or_else(|| {
                let base = mono::generic_base_of(&owner, |prefix| {
                    ctx.program
                        .find_struct(prefix)
                        .is_some_and(|s| s.is_generic())
                })?;
                ctx.program.find_method(base, method_name).cloned()
            });
        let Some(method) = method else { continue };

        // a monomorphized owner supplies its substitution frame
        let frame = ctx
            .mono
            .borrow()
            .requests()
            .iter()
            .find(|r| r.kind == MonoKind::Struct && r.mangled == owner)
            .map(|r| (r.generic_name.clone(), r.type_args.clone()));
        match frame {
            Some((generic_name, type_args)) => {
                if let Some(generic) = ctx.program.find_struct(&generic_name) {
                    ctx.mono
                        .borrow_mut()
                        .push_context(generic.type_params.clone(), type_args);
                    declare_function(ctx, &method, symbol, Some(&owner));
                    ctx.mono.borrow_mut().pop_context();
                }
            }
            None => declare_function(ctx, &method, symbol, Some(&owner)),
        }
        return;
    }
}

impl<'a, 'ctx> CodegenContext<'a, 'ctx> {
    /// Entry alloca against an explicit entry block (used before the body
    /// statements reposition the builder).
    pub fn build_entry_alloca_in(
        &self,
        entry: inkwell::basic_block::BasicBlock<'ctx>,
        ty: inkwell::types::BasicTypeEnum<'ctx>,
        name: &str,
    ) -> CodegenResult<inkwell::values::PointerValue<'ctx>> {
        let tmp_builder = self.context.create_builder();
        match entry.get_first_instruction() {
            Some(first) => tmp_builder.position_before(&first),
            None => tmp_builder.position_at_end(entry),
        }
        Ok(tmp_builder.build_alloca(ty, name).unwrap())
    }
}
