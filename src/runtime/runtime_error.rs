use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::bytecode::format_error::{DecodeError, LoadError};

/// A well-formed instruction could not execute.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("stack overflow: capacity {capacity} exceeded")]
    StackOverflow { capacity: usize },

    #[error("stack underflow in {op}")]
    StackUnderflow { op: &'static str },

    #[error("undefined variable {}", crate::bytecode::op::format_var(*id))]
    UndefinedVariable { id: u8 },

    #[error("type mismatch in {op}: expected {expected}, found {found}")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("cannot resolve call to '{name}' (no file at '{}' and no imported module)", path.display())]
    UnresolvedCall { name: String, path: PathBuf },

    #[error("call depth limit exceeded ({limit}), possible infinite recursion")]
    CallDepthExceeded { limit: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RuntimeErrorKind {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Fault(#[from] Fault),
}

/// Error returned from a VM run, with the chain of module names it passed
/// through on the way out (innermost first).
#[derive(Debug)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub call_stack: Vec<String>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error: {}", self.kind)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        std::error::Error::source(&self.kind)
    }
}

impl RuntimeError {
    pub fn new(kind: impl Into<RuntimeErrorKind>) -> Self {
        RuntimeError {
            kind: kind.into(),
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }

    pub fn fault(&self) -> Option<&Fault> {
        match &self.kind {
            RuntimeErrorKind::Fault(f) => Some(f),
            _ => None,
        }
    }
}

impl From<LoadError> for RuntimeError {
    fn from(e: LoadError) -> Self {
        RuntimeError::new(e)
    }
}

impl From<DecodeError> for RuntimeError {
    fn from(e: DecodeError) -> Self {
        RuntimeError::new(e)
    }
}

impl From<Fault> for RuntimeError {
    fn from(e: Fault) -> Self {
        RuntimeError::new(e)
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::new(Fault::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_call_stack() {
        let err = RuntimeError::from(Fault::StackUnderflow { op: "ADD" });
        assert_eq!(err.to_string(), "runtime error: stack underflow in ADD");
    }

    #[test]
    fn test_display_lists_frames_innermost_first() {
        let err = RuntimeError::from(Fault::CallDepthExceeded { limit: 64 })
            .with_context("inner")
            .with_context("outer");
        let msg = err.to_string();
        let inner = msg.find("0: inner").unwrap();
        let outer = msg.find("1: outer").unwrap();
        assert!(inner < outer);
        assert!(msg.contains("call stack:"));
    }

    #[test]
    fn test_undefined_variable_shows_char() {
        let err = Fault::UndefinedVariable { id: b'x' };
        assert_eq!(err.to_string(), "undefined variable 'x'");
    }

    #[test]
    fn test_fault_accessor() {
        let err = RuntimeError::from(DecodeError::UnknownOpcode {
            opcode: 0x77,
            offset: 0,
        });
        assert!(err.fault().is_none());
        assert!(err.to_string().contains("unknown opcode 0x77"));
    }

    #[test]
    fn test_io_error_is_a_fault() {
        let err = RuntimeError::from(std::io::Error::other("pipe closed"));
        assert!(matches!(err.fault(), Some(Fault::Io(_))));
        assert!(err.to_string().contains("pipe closed"));
    }
}
