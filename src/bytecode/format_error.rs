use std::path::PathBuf;

use thiserror::Error;

/// A module could not be turned into an executable instruction stream.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module is {len} bytes, too small to contain the 4-byte magic number")]
    TooShort { len: usize },

    #[error("invalid magic number 0x{0:08X}")]
    UnknownMagic(u32),

    #[error("invalid hex bytecode: {0}")]
    InvalidHex(String),
}

/// The instruction stream is malformed. Always fatal: decoding is sequential,
/// so nothing after the bad instruction can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error(
        "truncated operand for opcode 0x{opcode:02X} at offset {offset}: needed {needed} byte(s), {available} available"
    )]
    Truncated {
        opcode: u8,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unknown opcode 0x{opcode:02X} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("unknown syscall id 0x{id:02X} at offset {offset}")]
    UnknownSyscall { id: u8, offset: usize },

    #[error("jump at offset {offset} targets {target}, outside 0..={len}")]
    JumpOutOfRange {
        offset: usize,
        target: isize,
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_display() {
        let err = DecodeError::Truncated {
            opcode: 0x50,
            offset: 7,
            needed: 3,
            available: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x50"));
        assert!(msg.contains("offset 7"));
        assert!(msg.contains("needed 3"));
    }

    #[test]
    fn test_unknown_magic_display() {
        let msg = LoadError::UnknownMagic(0xFAACBEED).to_string();
        assert!(msg.contains("0xFAACBEED"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = LoadError::Io {
            path: PathBuf::from("missing.cb"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("missing.cb"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
