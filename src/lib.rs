//! Covi: a compiler for a small teaching language, a bytecode assembler and
//! disassembler, and the stack VM that runs the result.

pub mod bytecode;
pub mod runtime;
