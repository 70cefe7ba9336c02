//! Compiler for iota, a tiny Java-like language with integers, booleans,
//! and static methods. Programs are lowered through JVM bytecode into the
//! instruction set of the Marvin register machine and emitted as textual
//! assembly.

pub mod backend;
pub mod classfile;
pub mod frontend;

use backend::{AllocatorKind, BackendError, MarvinEmitter};
use classfile::ClassFile;
use frontend::analysis::SemanticErrors;
use frontend::emitter::EmitterError;
use frontend::lexer::LexicalError;
use frontend::parser::ParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Lexical error: {0}")]
    Lexical(#[from] LexicalError),

    #[error("Syntax error: {0}")]
    Parse(#[from] ParseError),

    #[error("Semantic error(s):\n{0}")]
    Semantic(#[from] SemanticErrors),

    #[error("Bytecode error: {0}")]
    Bytecode(#[from] EmitterError),

    #[error("Internal compiler error: {0}")]
    Backend(#[from] BackendError),
}

/// Compiles source text through the front end to the class-file form the
/// back end consumes.
pub fn compile_to_class(source: &str) -> Result<ClassFile, CompileError> {
    let tokens = frontend::lexer::tokenize(source)?;
    let mut program = frontend::parser::Parser::new(tokens).parse_program()?;
    frontend::analysis::analyze(&mut program)?;
    Ok(frontend::emitter::emit_program(&program)?)
}

/// Compiles source text all the way to Marvin assembly (naive allocator).
pub fn compile_to_marvin(source: &str) -> Result<String, CompileError> {
    compile_to_marvin_with_allocator(AllocatorKind::Naive, source)
}

/// Compiles source text to Marvin assembly with a specific allocator.
pub fn compile_to_marvin_with_allocator(
    kind: AllocatorKind,
    source: &str,
) -> Result<String, CompileError> {
    let class = compile_to_class(source)?;
    let mut emitter = MarvinEmitter::new(kind, false);
    emitter.compile(&class)?;
    let mut out = Vec::new();
    emitter.write_program(&mut out)?;
    Ok(String::from_utf8(out).expect("assembly text is UTF-8"))
}
