use std::fmt;

// =============================================================================
// OPCODE - one byte selecting VM behavior
// =============================================================================

/// Native module marker, big-endian in the first four bytes of a module.
pub const NATIVE_MAGIC: u32 = 0x00DE_FCAA;

/// Java class file marker. Recognized so it can be rejected politely.
pub const FOREIGN_MAGIC: u32 = 0xCAFE_BABE;

/// Longest byte string a length-prefixed operand can carry.
pub const MAX_STR_LEN: usize = u8::MAX as usize;

/// `SYSCALL` id: write a string (followed by a 4-byte integer argument).
pub const SYSCALL_WRITE: u8 = 0x30;

/// `SYSCALL` id: write a newline.
pub const SYSCALL_NEXT_LINE: u8 = 0x31;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // literals & arithmetic
    Push = 0x01,
    Add = 0x02,

    // output
    Print = 0x03,
    Println = 0x0A,
    PrintNoNl = 0x1A,

    // control flow
    JumpIfZero = 0x05,
    Jump = 0x06,

    // variables
    PushVar = 0x11,
    LoadVar = 0x12,
    Input = 0x20,
    PrintVar = 0x2A,

    /// Stray byte emitted by early compilers; executes as a no-op.
    Nop = 0x1F,

    // strings
    PushStr = 0x40,
    LoadString = 0x50,
    ToString = 0x51,
    Concat = 0x52,
    Compare = 0x53,

    // modules & host
    Call = 0x60,
    Import = 0x61,
    Syscall = 0x62,

    Halt = 0xFF,
}

impl Opcode {
    pub const ALL: [Opcode; 21] = [
        Opcode::Push,
        Opcode::Add,
        Opcode::Print,
        Opcode::Println,
        Opcode::PrintNoNl,
        Opcode::JumpIfZero,
        Opcode::Jump,
        Opcode::PushVar,
        Opcode::LoadVar,
        Opcode::Input,
        Opcode::PrintVar,
        Opcode::Nop,
        Opcode::PushStr,
        Opcode::LoadString,
        Opcode::ToString,
        Opcode::Concat,
        Opcode::Compare,
        Opcode::Call,
        Opcode::Import,
        Opcode::Syscall,
        Opcode::Halt,
    ];

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Push => "PUSH",
            Opcode::Add => "ADD",
            Opcode::Print => "PRINT",
            Opcode::Println => "PRINTLN",
            Opcode::PrintNoNl => "PRINT_NO_NL",
            Opcode::JumpIfZero => "JUMP_IF_ZERO",
            Opcode::Jump => "JUMP",
            Opcode::PushVar => "PUSH_VAR",
            Opcode::LoadVar => "LOAD_VAR",
            Opcode::Input => "INPUT",
            Opcode::PrintVar => "PRINT_VAR",
            Opcode::Nop => "NOP",
            Opcode::PushStr => "PUSH_STR",
            Opcode::LoadString => "LOAD_STRING",
            Opcode::ToString => "TO_STRING",
            Opcode::Concat => "CONCAT",
            Opcode::Compare => "COMPARE",
            Opcode::Call => "CALL",
            Opcode::Import => "IMPORT",
            Opcode::Syscall => "SYSCALL",
            Opcode::Halt => "HALT",
        }
    }

    /// Case-insensitive lookup used by the assembler.
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| *op as u8 == value)
            .ok_or(value)
    }
}

// =============================================================================
// OP - a decoded instruction with its operands
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall<'a> {
    /// The integer argument is carried on the wire but not used by the writer.
    Write { text: &'a [u8], arg: i32 },
    NextLine,
}

/// A single instruction. String operands borrow from the module's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op<'a> {
    Push(u8),
    Add,

    Print,
    Println,
    PrintNoNl,

    /// Relative to the end of the offset operand.
    JumpIfZero(i16),
    /// Relative to the end of the offset operand. Negative offsets loop back.
    Jump(i16),

    PushVar { var: u8, value: u8 },
    LoadVar(u8),
    Input(u8),
    PrintVar(u8),

    Nop,

    PushStr(&'a [u8]),
    LoadString(&'a [u8]),
    ToString,
    Concat,
    Compare,

    Call(&'a [u8]),
    Import(&'a [u8]),
    Syscall(Syscall<'a>),

    Halt,
}

impl Op<'_> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Op::Push(_) => Opcode::Push,
            Op::Add => Opcode::Add,
            Op::Print => Opcode::Print,
            Op::Println => Opcode::Println,
            Op::PrintNoNl => Opcode::PrintNoNl,
            Op::JumpIfZero(_) => Opcode::JumpIfZero,
            Op::Jump(_) => Opcode::Jump,
            Op::PushVar { .. } => Opcode::PushVar,
            Op::LoadVar(_) => Opcode::LoadVar,
            Op::Input(_) => Opcode::Input,
            Op::PrintVar(_) => Opcode::PrintVar,
            Op::Nop => Opcode::Nop,
            Op::PushStr(_) => Opcode::PushStr,
            Op::LoadString(_) => Opcode::LoadString,
            Op::ToString => Opcode::ToString,
            Op::Concat => Opcode::Concat,
            Op::Compare => Opcode::Compare,
            Op::Call(_) => Opcode::Call,
            Op::Import(_) => Opcode::Import,
            Op::Syscall(_) => Opcode::Syscall,
            Op::Halt => Opcode::Halt,
        }
    }

    /// Total encoded width in bytes, opcode included.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Op::Push(_) | Op::LoadVar(_) | Op::Input(_) | Op::PrintVar(_) => 1,
            Op::PushVar { .. } => 2,
            Op::JumpIfZero(_) | Op::Jump(_) => 2,
            Op::PushStr(s) | Op::LoadString(s) | Op::Call(s) | Op::Import(s) => 1 + s.len(),
            Op::Syscall(Syscall::Write { text, .. }) => 1 + 1 + text.len() + 4,
            Op::Syscall(Syscall::NextLine) => 1,
            Op::Add
            | Op::Print
            | Op::Println
            | Op::PrintNoNl
            | Op::Nop
            | Op::ToString
            | Op::Concat
            | Op::Compare
            | Op::Halt => 0,
        }
    }

    /// Appends the wire form of this instruction.
    ///
    /// Byte-string operands must be at most [`MAX_STR_LEN`] long; the compiler
    /// and assembler reject longer strings before building an `Op`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode() as u8);

        match self {
            Op::Push(v) | Op::LoadVar(v) | Op::Input(v) | Op::PrintVar(v) => out.push(*v),
            Op::PushVar { var, value } => {
                out.push(*var);
                out.push(*value);
            }
            Op::JumpIfZero(offset) | Op::Jump(offset) => {
                out.extend_from_slice(&offset.to_be_bytes());
            }
            Op::PushStr(s) | Op::LoadString(s) | Op::Call(s) | Op::Import(s) => {
                push_str(out, s);
            }
            Op::Syscall(Syscall::Write { text, arg }) => {
                out.push(SYSCALL_WRITE);
                push_str(out, text);
                out.extend_from_slice(&arg.to_be_bytes());
            }
            Op::Syscall(Syscall::NextLine) => out.push(SYSCALL_NEXT_LINE),
            Op::Add
            | Op::Print
            | Op::Println
            | Op::PrintNoNl
            | Op::Nop
            | Op::ToString
            | Op::Concat
            | Op::Compare
            | Op::Halt => {}
        }
    }
}

fn push_str(out: &mut Vec<u8>, s: &[u8]) {
    debug_assert!(s.len() <= MAX_STR_LEN);
    out.push(s.len() as u8);
    out.extend_from_slice(s);
}

/// Renders a variable id as `'c'` when printable, otherwise as hex.
pub fn format_var(id: u8) -> String {
    if id.is_ascii_graphic() {
        format!("'{}'", id as char)
    } else {
        format!("0x{:02X}", id)
    }
}

/// Renders a byte string as a quoted, escaped literal.
pub fn format_bytes(bytes: &[u8]) -> String {
    let escaped: String = bytes
        .iter()
        .flat_map(|b| std::ascii::escape_default(*b))
        .map(char::from)
        .collect();
    format!("\"{}\"", escaped)
}

impl fmt::Display for Op<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().mnemonic();
        match self {
            Op::Push(v) => write!(f, "{:<12} {}", name, v),
            Op::PushVar { var, value } => {
                write!(f, "{:<12} {} {}", name, format_var(*var), value)
            }
            Op::LoadVar(v) | Op::Input(v) | Op::PrintVar(v) => {
                write!(f, "{:<12} {}", name, format_var(*v))
            }
            Op::JumpIfZero(offset) | Op::Jump(offset) => write!(f, "{:<12} {:+}", name, offset),
            Op::PushStr(s) | Op::LoadString(s) | Op::Call(s) | Op::Import(s) => {
                write!(f, "{:<12} {}", name, format_bytes(s))
            }
            Op::Syscall(Syscall::Write { text, arg }) => {
                write!(f, "{:<12} WRITE {} {}", name, format_bytes(text), arg)
            }
            Op::Syscall(Syscall::NextLine) => write!(f, "{:<12} NEXTLINE", name),
            _ => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trips_through_byte() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op as u8), Ok(op));
        }
    }

    #[test]
    fn test_unknown_opcode_byte() {
        assert_eq!(Opcode::try_from(0x04), Err(0x04));
        assert_eq!(Opcode::try_from(0x99), Err(0x99));
    }

    #[test]
    fn test_mnemonic_lookup_is_case_insensitive() {
        assert_eq!(Opcode::from_mnemonic("jump_if_zero"), Some(Opcode::JumpIfZero));
        assert_eq!(Opcode::from_mnemonic("HALT"), Some(Opcode::Halt));
        assert_eq!(Opcode::from_mnemonic("JMP"), None);
    }

    #[test]
    fn test_opcode_bytes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for op in Opcode::ALL {
            assert!(seen.insert(op as u8), "duplicate opcode {:?}", op);
        }
    }

    #[test]
    fn test_encode_push_var() {
        let mut out = Vec::new();
        Op::PushVar { var: b'x', value: 5 }.encode(&mut out);
        assert_eq!(out, vec![0x11, b'x', 5]);
    }

    #[test]
    fn test_encode_jump_offsets_are_big_endian() {
        let mut out = Vec::new();
        Op::JumpIfZero(0x0102).encode(&mut out);
        Op::Jump(-3).encode(&mut out);
        assert_eq!(out, vec![0x05, 0x01, 0x02, 0x06, 0xFF, 0xFD]);
    }

    #[test]
    fn test_encode_length_prefixed() {
        let mut out = Vec::new();
        Op::LoadString(b"n=").encode(&mut out);
        assert_eq!(out, vec![0x50, 2, b'n', b'=']);
    }

    #[test]
    fn test_encode_syscall_write() {
        let mut out = Vec::new();
        Op::Syscall(Syscall::Write { text: b"hi", arg: 2 }).encode(&mut out);
        assert_eq!(out, vec![0x62, 0x30, 2, b'h', b'i', 0, 0, 0, 2]);
    }

    #[test]
    fn test_encoded_len_matches_encoding() {
        let ops = [
            Op::Push(1),
            Op::Add,
            Op::PushVar { var: 1, value: 2 },
            Op::Jump(7),
            Op::PushStr(b"abc"),
            Op::Syscall(Syscall::Write { text: b"xy", arg: 0 }),
            Op::Syscall(Syscall::NextLine),
            Op::Halt,
        ];
        for op in ops {
            let mut out = Vec::new();
            op.encode(&mut out);
            assert_eq!(out.len(), op.encoded_len(), "{:?}", op);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Op::LoadVar(b'x').to_string(), "LOAD_VAR     'x'");
        assert_eq!(Op::Jump(-4).to_string(), "JUMP         -4");
        assert_eq!(Op::Halt.to_string(), "HALT");
        assert_eq!(format_bytes(b"a\n"), "\"a\\n\"");
        assert_eq!(format_var(0x80), "0x80");
    }
}
