pub mod asm;
pub mod compile;
pub mod compile_error;
pub mod decode;
pub mod disasm;
pub mod format_error;
pub mod module;
pub mod op;

pub use compile::Compiler;
pub use compile_error::CompileError;
pub use format_error::{DecodeError, LoadError};
pub use module::{Magic, Module};
pub use op::{Op, Opcode};
