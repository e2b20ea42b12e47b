//! LLVM code generation.
//!
//! Builds a single module in an owned context with opaque pointers. The
//! central coordination is the [`CodegenContext`]: LLVM handles, the struct
//! registry (two-phase: opaque declaration then `set_body`), the function
//! map, the variable side tables and the per-function emission state
//! (return slot, defer stack, method owner, monomorphization frames).
//!
//! Every stack slot is allocated in the function's entry basic block so it
//! dominates all uses. A construct that cannot be lowered produces a typed
//! [`CodegenError`] which aborts that function's emission with a diagnostic;
//! emission then continues with the next function, and a nonzero diagnostic
//! count fails the compilation as a whole.

pub mod expressions;
pub mod statements;
mod types;
mod vars;

use std::cell::RefCell;
use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::{InitializationConfig, Target, TargetMachine};
use inkwell::types::{BasicTypeEnum, StructType};
use inkwell::values::{FunctionValue, PointerValue};

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::lexer::Span;
use crate::mono::MonoEngine;
use crate::parser::ast::*;

#[derive(Debug, Clone)]
pub struct CodegenError {
    pub kind: DiagnosticKind,
    pub span: Span,
    pub message: String,
    pub suggestion: Option<String>,
}

impl CodegenError {
    pub fn lowering(span: &Span, message: impl ToString) -> Self {
        CodegenError {
            kind: DiagnosticKind::Lowering,
            span: span.clone(),
            message: message.to_string(),
            suggestion: None,
        }
    }

    pub fn resolution(span: &Span, message: impl ToString) -> Self {
        CodegenError {
            kind: DiagnosticKind::Resolution,
            span: span.clone(),
            message: message.to_string(),
            suggestion: None,
        }
    }

    pub fn abi(span: &Span, message: impl ToString) -> Self {
        CodegenError {
            kind: DiagnosticKind::Abi,
            span: span.clone(),
            message: message.to_string(),
            suggestion: None,
        }
    }
}

impl From<CodegenError> for Diagnostic {
    fn from(error: CodegenError) -> Self {
        let mut diag = Diagnostic::new(error.kind, error.span, error.message);
        if let Some(suggestion) = error.suggestion {
            diag = diag.with_suggestion(suggestion);
        }
        diag
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// One entry of the local/global variable side tables: the stack slot, its
/// lowered type and the source-level type the lowering reasons with.
#[derive(Debug, Clone)]
pub struct VarEntry<'ctx> {
    pub name: String,
    pub ptr: PointerValue<'ctx>,
    pub llvm_ty: BasicTypeEnum<'ctx>,
    pub ast_ty: TypeName,
    pub depth: usize,
}

/// Signature information kept alongside each declared function.
#[derive(Debug, Clone)]
pub struct FuncEntry<'ctx> {
    pub value: FunctionValue<'ctx>,
    pub decl: FunctionDeclaration,
    /// Substituted parameter types (monomorphized instances carry concrete
    /// types here).
    pub param_types: Vec<TypeName>,
    pub return_type: TypeName,
    pub is_extern_import: bool,
}

/// Per-function emission state; saved and restored around nested emission.
#[derive(Debug, Default)]
pub struct FunctionState<'ctx> {
    pub function: Option<FunctionValue<'ctx>>,
    pub return_type: Option<TypeName>,
    pub ret_slot: Option<PointerValue<'ctx>>,
    pub ret_block: Option<BasicBlock<'ctx>>,
    pub method_struct: Option<String>,
    pub defer_stack: Vec<(Block, bool)>,
    pub loop_exit: Option<BasicBlock<'ctx>>,
    pub loop_continue: Option<BasicBlock<'ctx>>,
}

pub struct CodegenContext<'a, 'ctx> {
    pub context: &'ctx Context,
    pub module: Module<'ctx>,
    pub builder: Builder<'ctx>,
    pub program: &'a Program,

    pub pointer_bytes: u32,

    pub struct_types: RefCell<HashMap<String, StructType<'ctx>>>,
    pub func_map: RefCell<HashMap<String, FuncEntry<'ctx>>>,
    pub locals: RefCell<Vec<VarEntry<'ctx>>>,
    pub globals: RefCell<Vec<VarEntry<'ctx>>>,
    pub scope_depth: RefCell<usize>,

    pub mono: RefCell<MonoEngine>,
    pub sink: RefCell<DiagnosticSink>,
    pub state: RefCell<FunctionState<'ctx>>,
    pub basic_block_counter: RefCell<usize>,
}

/// Core trait for LLVM code generation; every AST node that lowers to IR
/// implements it against the shared context.
pub trait CodeGen<'ctx> {
    type ReturnValue;

    fn codegen<'a>(&self, ctx: &CodegenContext<'a, 'ctx>) -> Self::ReturnValue;
}

impl<'a, 'ctx> CodegenContext<'a, 'ctx> {
    pub fn new(context: &'ctx Context, program: &'a Program) -> Self {
        let module = context.create_module("uya");
        let builder = context.create_builder();

        // the data layout must be in place before any size query so usize
        // matches the pointer width
        let mut pointer_bytes = 8;
        if Target::initialize_native(&InitializationConfig::default()).is_ok() {
            let triple = TargetMachine::get_default_triple();
            if let Ok(target) = Target::from_triple(&triple) {
                if let Some(machine) = target.create_target_machine(
                    &triple,
                    "generic",
                    "",
                    inkwell::OptimizationLevel::None,
                    inkwell::targets::RelocMode::Default,
                    inkwell::targets::CodeModel::Default,
                ) {
                    let target_data = machine.get_target_data();
                    pointer_bytes = target_data.get_pointer_byte_size(None);
                    module.set_triple(&triple);
                    module.set_data_layout(&target_data.get_data_layout());
                }
            }
        }

        CodegenContext {
            context,
            module,
            builder,
            program,
            pointer_bytes,
            struct_types: RefCell::new(HashMap::new()),
            func_map: RefCell::new(HashMap::new()),
            locals: RefCell::new(vec![]),
            globals: RefCell::new(vec![]),
            scope_depth: RefCell::new(0),
            mono: RefCell::new(MonoEngine::new()),
            sink: RefCell::new(DiagnosticSink::new()),
            state: RefCell::new(FunctionState::default()),
            basic_block_counter: RefCell::new(0),
        }
    }

    pub fn diag(&self, error: CodegenError) {
        self.sink.borrow_mut().push(error.into());
    }

    pub fn next_block_id(&self) -> usize {
        let mut counter = self.basic_block_counter.borrow_mut();
        let id = *counter;
        *counter += 1;
        id
    }

    pub fn enter_scope(&self) {
        *self.scope_depth.borrow_mut() += 1;
    }

    pub fn exit_scope(&self) {
        let depth = *self.scope_depth.borrow();
        self.locals.borrow_mut().retain(|v| v.depth < depth);
        *self.scope_depth.borrow_mut() -= 1;
    }

    pub fn add_var(
        &self,
        name: &str,
        ptr: PointerValue<'ctx>,
        llvm_ty: BasicTypeEnum<'ctx>,
        ast_ty: TypeName,
    ) {
        self.locals.borrow_mut().push(VarEntry {
            name: name.to_string(),
            ptr,
            llvm_ty,
            ast_ty,
            depth: *self.scope_depth.borrow(),
        });
    }

    pub fn find_var(&self, name: &str) -> Option<VarEntry<'ctx>> {
        if let Some(entry) = self
            .locals
            .borrow()
            .iter()
            .rev()
            .find(|v| v.name == name)
        {
            return Some(entry.clone());
        }
        self.globals
            .borrow()
            .iter()
            .find(|v| v.name == name)
            .cloned()
    }

    pub fn find_func(&self, name: &str) -> Option<FuncEntry<'ctx>> {
        self.func_map.borrow().get(name).cloned()
    }

    /// Substitute the active monomorphization frame into a type.
    pub fn subst(&self, ty: &TypeName) -> TypeName {
        self.mono.borrow().substitute(ty)
    }
}

/// Emit the whole program and return the textual IR, or the collected
/// diagnostics when any function failed to lower.
pub fn emit_module_ir(program: &Program) -> Result<String, DiagnosticSink> {
    let context = Context::create();
    let ctx = CodegenContext::new(&context, program);
    log::debug!(
        "lowering {} declarations to LLVM IR (pointer width {} bytes)",
        program.declarations.len(),
        ctx.pointer_bytes
    );

    crate::mono::discover(program, &mut ctx.mono.borrow_mut());

    statements::emit_program(&ctx);

    if !ctx.sink.borrow().is_empty() {
        return Err(std::mem::take(&mut *ctx.sink.borrow_mut()));
    }

    if let Err(message) = ctx.module.verify() {
        let mut sink = DiagnosticSink::new();
        sink.push(Diagnostic::new(
            DiagnosticKind::Lowering,
            Span::default(),
            format!("module verification failed: {}", message.to_string()),
        ));
        return Err(sink);
    }

    Ok(ctx.module.print_to_string().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::parse_program;

    fn emit(source: &str) -> String {
        let tokens = Lexer::new(source, "test.uya").lex().expect("lexes");
        let (program, errors) = parse_program(tokens);
        assert!(errors.is_empty(), "{errors:?}");
        match emit_module_ir(&program) {
            Ok(ir) => ir,
            Err(sink) => panic!("diagnostics:\n{}", sink.render_all()),
        }
    }

    #[test]
    fn test_short_circuit_emits_three_blocks() {
        let ir = emit(
            "fn trap() bool { return true; }\n\
             fn main() i32 { if (false && trap()) { return 1; } return 0; }",
        );
        assert!(ir.contains("logical_then"), "{ir}");
        assert!(ir.contains("logical_else"));
        assert!(ir.contains("logical_merge"));
        // the right operand is only evaluated in the conditional path
        let then_at = ir.find("logical_then.").unwrap();
        let call_at = ir.find("call i1 @trap").unwrap();
        assert!(call_at > then_at);
    }

    #[test]
    fn test_entry_allocas_precede_body() {
        let ir = emit("fn main() i32 { var a = 1; var b = 2; return a + b; }");
        let entry = ir.find("entry:").unwrap();
        let first_alloca = ir.find("alloca").unwrap();
        let first_store = ir.find("store").unwrap();
        assert!(entry < first_alloca);
        assert!(first_alloca < first_store, "allocas come first:\n{ir}");
    }

    #[test]
    fn test_return_goes_through_synthesized_block() {
        let ir = emit("fn main() i32 { return 5; }");
        assert!(ir.contains("_uya_ret"));
        assert!(ir.contains("return:"), "{ir}");
    }

    #[test]
    fn test_generic_instantiation_unique() {
        let ir = emit(
            "fn id<T>(x: T) T { return x; }\n\
             fn main() i32 { return id<i32>(42) + id<i32>(-40); }",
        );
        let definitions = ir.matches("define i32 @id_i32").count();
        assert_eq!(definitions, 1, "{ir}");
        assert_eq!(ir.matches("declare i32 @id_i32").count(), 0);
    }

    #[test]
    fn test_error_union_shape_and_try() {
        let ir = emit(
            "error DivZero;\n\
             fn div(a: i32, b: i32) !i32 { if (b == 0) { return error.DivZero; } return a / b; }\n\
             fn main() !i32 { const x = try div(10, 2); return x; }",
        );
        assert!(ir.contains("{ i32, i32 }"), "error union lowers to a pair:\n{ir}");
        assert!(ir.contains("try_propagate"));
        assert!(ir.contains("try_continue"));
    }

    #[test]
    fn test_struct_comparison_reduces_with_and() {
        let ir = emit(
            "struct P { x: i32, y: i32 }\n\
             fn main() i32 {\n\
               const a = P{x: 1, y: 2};\n\
               const b = P{x: 1, y: 2};\n\
               if (a == b) { return 0; }\n\
               return 1;\n\
             }",
        );
        assert!(ir.contains("icmp eq"));
        assert!(ir.contains("and i1"));
    }

    #[test]
    fn test_extern_small_struct_packs_into_i64() {
        let ir = emit(
            "struct SmallStruct { x: i32, y: i32 }\n\
             extern fn c_small(s: SmallStruct) i32;\n\
             fn main() i32 { return c_small(SmallStruct{x: 100, y: 200}); }",
        );
        assert!(
            ir.contains("declare i32 @c_small(i64)"),
            "8-byte struct becomes one i64:\n{ir}"
        );
        assert!(ir.contains("load i64"));
    }

    #[test]
    fn test_extern_sixteen_byte_struct_uses_two_registers() {
        let ir = emit(
            "struct Quad { a: i32, b: i32, c: i32, d: i32 }\n\
             extern fn c_quad(q: Quad) i32;\n\
             fn main() i32 { return c_quad(Quad{a: 1, b: 2, c: 3, d: 4}); }",
        );
        assert!(ir.contains("declare i32 @c_quad(i64, i64)"), "{ir}");
    }

    #[test]
    fn test_extern_large_struct_passes_by_memory() {
        let ir = emit(
            "struct Big { a: i64, b: i64, c: i8 }\n\
             extern fn c_big(s: Big) i32;\n\
             fn main() i32 { const b = Big{a: 1, b: 2, c: 3}; return c_big(b); }",
        );
        assert!(ir.contains("declare i32 @c_big(ptr)"), "{ir}");
    }

    #[test]
    fn test_by_value_array_parameter() {
        let ir = emit(
            "fn bump(a: [i32: 3]) i32 { a[0] = 99; return a[0]; }\n\
             fn main() i32 { var x: [i32: 3] = [1, 2, 3]; return bump(x); }",
        );
        // the parameter is an array value stored into a local slot
        assert!(ir.contains("[3 x i32]"), "{ir}");
    }

    #[test]
    fn test_enum_lowering_width() {
        let ir = emit(
            "enum Color { Red, Green, Blue }\n\
             enum Wide : u64 { A, B }\n\
             fn main() i32 { const c = Color.Green; const w = Wide.B; return 0; }",
        );
        assert!(ir.contains("i32 1"), "default enums are i32:\n{ir}");
        assert!(ir.contains("i64 1"), "explicit underlying type is honored:\n{ir}");
    }

    #[test]
    fn test_implicit_success_return_for_void_error_union() {
        let ir = emit("fn noop() !void { }\nfn main() !void { try noop(); }");
        assert!(ir.contains("{ i32 }"), "{ir}");
        assert!(ir.contains("store { i32 } zeroinitializer") || ir.contains("i32 0"));
    }

    #[test]
    fn test_match_lowers_to_branch_chain() {
        let ir = emit(
            "fn classify(n: i32) i32 { return match n { 0 => 10, 1 => 20, else => 30 }; }\n\
             fn main() i32 { return classify(1); }",
        );
        assert!(ir.contains("match_arm"));
        assert!(ir.contains("match_merge"));
    }

    #[test]
    fn test_saturating_mul_sign_picks_the_bound() {
        let ir = emit(
            "fn main() i32 { var a = 100000; var b = -100000; return a *| b; }",
        );
        assert!(ir.contains("smul.with.overflow"), "{ir}");
        // the clamp derives from the product's sign (xor of the operands),
        // so a mixed-sign overflow can reach the negative bound
        assert!(ir.contains("xor i32"), "{ir}");
        assert!(ir.contains("-2147483648"), "{ir}");
        assert!(ir.contains("2147483647"), "{ir}");
    }

    #[test]
    fn test_saturating_add_uses_the_intrinsic() {
        let ir = emit("fn main() i32 { var a = 1; var b = 2; return a +| b; }");
        assert!(ir.contains("sadd.sat"), "{ir}");
    }

    #[test]
    fn test_null_compares_against_peer_pointer() {
        let ir = emit(
            "fn main() i32 { var p: *i32 = null; if (p == null) { return 0; } return 1; }",
        );
        assert!(ir.contains("icmp eq ptr"), "{ir}");
    }
}
