use thiserror::Error;

/// Unrecoverable compile-time failure. Compilation stops at the first one and
/// nothing is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("compile error: no `main {{ ... }}` block found")]
    MissingMain,

    #[error("compile error: line {line}: malformed assignment '{text}'")]
    MalformedAssignment { line: usize, text: String },

    #[error("compile error: line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    #[error("compile error: line {line}: unsupported comparison operator '{op}'")]
    UnsupportedOperator { line: usize, op: String },

    #[error("compile error: line {line}: constant '{value}' does not fit in a byte")]
    ConstantOutOfRange { line: usize, value: String },

    #[error("compile error: line {line}: invalid identifier '{name}'")]
    InvalidIdentifier { line: usize, name: String },

    #[error("compile error: line {line}: unknown statement '{text}'")]
    UnknownStatement { line: usize, text: String },

    #[error("compile error: line {line}: block is never closed")]
    UnclosedBlock { line: usize },

    #[error("compile error: line {line}: `else` without a matching `if`")]
    UnexpectedElse { line: usize },

    #[error("compile error: line {line}: string of {len} bytes exceeds the 255-byte operand limit")]
    StringTooLong { line: usize, len: usize },

    #[error("compile error: line {line}: jump distance {distance} does not fit in 16 bits")]
    JumpTooFar { line: usize, distance: isize },

    #[error("compile error: line {line}: more than {limit} multi-character variable names")]
    TooManyVariables { line: usize, limit: usize },

    #[error("compile error: line {line}: unsupported syscall '{name}'")]
    UnsupportedSyscall { line: usize, name: String },

    #[error("compile error: line {line}: call to '{name}' cannot take arguments")]
    CallArguments { line: usize, name: String },

    #[error("compile error: line {line}: expected {expected}, found '{found}'")]
    Expected {
        line: usize,
        expected: &'static str,
        found: String,
    },
}

impl CompileError {
    pub fn expected(line: usize, expected: &'static str, found: impl Into<String>) -> Self {
        CompileError::Expected {
            line,
            expected,
            found: found.into(),
        }
    }

    pub fn malformed_assignment(line: usize, text: impl Into<String>) -> Self {
        CompileError::MalformedAssignment {
            line,
            text: text.into(),
        }
    }

    pub fn unknown_statement(line: usize, text: impl Into<String>) -> Self {
        CompileError::UnknownStatement {
            line,
            text: text.into(),
        }
    }

    /// 1-based source line, when the error is tied to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::MissingMain => None,
            CompileError::MalformedAssignment { line, .. }
            | CompileError::UnterminatedString { line }
            | CompileError::UnsupportedOperator { line, .. }
            | CompileError::ConstantOutOfRange { line, .. }
            | CompileError::InvalidIdentifier { line, .. }
            | CompileError::UnknownStatement { line, .. }
            | CompileError::UnclosedBlock { line }
            | CompileError::UnexpectedElse { line }
            | CompileError::StringTooLong { line, .. }
            | CompileError::JumpTooFar { line, .. }
            | CompileError::TooManyVariables { line, .. }
            | CompileError::UnsupportedSyscall { line, .. }
            | CompileError::CallArguments { line, .. }
            | CompileError::Expected { line, .. } => Some(*line),
        }
    }

    pub fn hint(&self) -> Option<&'static str> {
        match self {
            CompileError::MissingMain => {
                Some("put statements inside `main { ... }`, or use a bare printnl(\"...\") call")
            }
            CompileError::MalformedAssignment { .. } => Some("assignments look like `let x = 5`"),
            CompileError::UnsupportedOperator { .. } => Some("conditions support `<` and `>`"),
            CompileError::ConstantOutOfRange { .. } => {
                Some("values are single bytes, use 0 through 255")
            }
            CompileError::UnclosedBlock { .. } => Some("add the missing `}`"),
            CompileError::JumpTooFar { .. } => Some("split the block into smaller pieces"),
            CompileError::UnknownStatement { .. } => Some(
                "statements are let, input, if, while, print, printnl, import, calls and @SysCall",
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_main_display() {
        let err = CompileError::MissingMain;
        assert!(err.to_string().contains("main"));
        assert!(err.hint().is_some());
        assert_eq!(err.line(), None);
    }

    #[test]
    fn test_malformed_assignment_display() {
        let err = CompileError::malformed_assignment(3, "let x 5");
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("let x 5"));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_unsupported_operator_display() {
        let err = CompileError::UnsupportedOperator {
            line: 2,
            op: "==".to_string(),
        };
        assert!(err.to_string().contains("'=='"));
        assert!(err.hint().unwrap().contains('<'));
    }

    #[test]
    fn test_expected_display() {
        let err = CompileError::expected(9, "a variable name", "42");
        assert_eq!(
            err.to_string(),
            "compile error: line 9: expected a variable name, found '42'"
        );
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CompileError::UnterminatedString { line: 1 };
        let _: &dyn std::error::Error = &err;
    }

    #[test]
    fn test_error_clone() {
        let err1 = CompileError::unknown_statement(4, "goto 10");
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }
}
