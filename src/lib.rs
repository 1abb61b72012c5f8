//! The lib crate for a chat bytecode compiler and interpreter.
#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]

/// vm is the bits about running code.
pub mod vm;

/// scanner scans!
pub mod scanner;

/// Takes tokens from the scanner and emits bytecode
pub mod compiler;

use vm::{ChatError, Heap, Vm};

/// Compile and run one expression, printing its value to stdout on success and
/// diagnostics to stderr on failure. Every call gets a fresh scanner, parser,
/// heap, and VM; nothing is shared between calls.
pub fn interpret(source: &str) -> Result<(), ChatError> {
    let scanner = scanner::Scanner::new(source);
    let mut heap = Heap::new();
    let chunk = compiler::compile(scanner, &mut heap).ok_or(ChatError::SyntaxError)?;
    let mut vm = Vm::new_with_heap(chunk, heap);
    vm.run()
}
