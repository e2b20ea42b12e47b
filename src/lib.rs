//! Compiler front end and backends for the Uya language: a hand-written
//! recursive-descent parser over the lexer's token stream, a C99 textual
//! backend and an LLVM backend, joined by a shared monomorphization engine
//! and a diagnostics channel.

use anyhow::{bail, Result};

pub mod c99;
pub mod codegen;
pub mod diagnostics;
pub mod lexer;
pub mod mono;
pub mod parser;

use parser::ast::Program;

/// Lex and parse one compilation unit. Parse errors are rendered into the
/// failure so a driver can print them verbatim.
pub fn parse_source(source: &str, filename: &str) -> Result<Program> {
    let tokens = match lexer::Lexer::new(source, filename).lex() {
        Ok(tokens) => tokens,
        Err(error) => bail!("{error}"),
    };

    let (program, errors) = parser::parse_program(tokens);
    if !errors.is_empty() {
        let rendered = errors
            .iter()
            .map(|e| diagnostics::Diagnostic::from(e.clone()).render())
            .collect::<Vec<_>>()
            .join("\n");
        bail!("{rendered}");
    }
    Ok(program)
}

/// Compile a source file to a self-contained C99 translation unit.
pub fn compile_to_c(source: &str, filename: &str) -> Result<String> {
    let program = parse_source(source, filename)?;
    match c99::emit_translation_unit(&program) {
        Ok(code) => Ok(code),
        Err(sink) => bail!("{}", sink.render_all()),
    }
}

/// Compile a source file to textual LLVM IR for the host target.
pub fn compile_to_ir(source: &str, filename: &str) -> Result<String> {
    let program = parse_source(source, filename)?;
    match codegen::emit_module_ir(&program) {
        Ok(ir) => Ok(ir),
        Err(sink) => bail!("{}", sink.render_all()),
    }
}
