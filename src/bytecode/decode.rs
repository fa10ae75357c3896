//! Sequential instruction decoding.
//!
//! There is no boundary table: instruction `n + 1` starts where instruction
//! `n` ends. Every operand read is checked against the remaining stream
//! before the cursor moves.

use crate::bytecode::format_error::DecodeError;
use crate::bytecode::op::{Op, Opcode, SYSCALL_NEXT_LINE, SYSCALL_WRITE, Syscall};

/// One decoded instruction and where the next one starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub offset: usize,
    pub op: Op<'a>,
    pub next: usize,
}

impl Instruction<'_> {
    /// Absolute target of a jump instruction, `None` for anything else.
    pub fn jump_target(&self, len: usize) -> Option<Result<usize, DecodeError>> {
        match self.op {
            Op::Jump(offset) | Op::JumpIfZero(offset) => {
                Some(resolve_jump(self.offset, self.next, offset, len))
            }
            _ => None,
        }
    }
}

/// Resolves a relative offset against the end of the jump's operand.
pub fn resolve_jump(
    at: usize,
    next: usize,
    offset: i16,
    len: usize,
) -> Result<usize, DecodeError> {
    let target = next as isize + offset as isize;
    if target < 0 || target as usize > len {
        return Err(DecodeError::JumpOutOfRange {
            offset: at,
            target,
            len,
        });
    }
    Ok(target as usize)
}

struct Cursor<'a> {
    code: &'a [u8],
    start: usize,
    pos: usize,
    opcode: u8,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.code.len() - self.pos;
        if n > available {
            return Err(DecodeError::Truncated {
                opcode: self.opcode,
                offset: self.start,
                needed: n,
                available,
            });
        }
        let bytes = &self.code[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, DecodeError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn str(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u8()? as usize;
        self.take(len)
    }
}

/// Decodes the instruction starting at `offset`.
///
/// `offset` must be inside the stream; callers stop at `code.len()`.
pub fn decode_at(code: &[u8], offset: usize) -> Result<Instruction<'_>, DecodeError> {
    let Some(&byte) = code.get(offset) else {
        return Err(DecodeError::Truncated {
            opcode: 0,
            offset,
            needed: 1,
            available: 0,
        });
    };

    let opcode = Opcode::try_from(byte)
        .map_err(|opcode| DecodeError::UnknownOpcode { opcode, offset })?;

    let mut cur = Cursor {
        code,
        start: offset,
        pos: offset + 1,
        opcode: byte,
    };

    let op = match opcode {
        Opcode::Push => Op::Push(cur.u8()?),
        Opcode::Add => Op::Add,
        Opcode::Print => Op::Print,
        Opcode::Println => Op::Println,
        Opcode::PrintNoNl => Op::PrintNoNl,
        Opcode::JumpIfZero => Op::JumpIfZero(cur.i16()?),
        Opcode::Jump => Op::Jump(cur.i16()?),
        Opcode::PushVar => {
            let var = cur.u8()?;
            let value = cur.u8()?;
            Op::PushVar { var, value }
        }
        Opcode::LoadVar => Op::LoadVar(cur.u8()?),
        Opcode::Input => Op::Input(cur.u8()?),
        Opcode::PrintVar => Op::PrintVar(cur.u8()?),
        Opcode::Nop => Op::Nop,
        Opcode::PushStr => Op::PushStr(cur.str()?),
        Opcode::LoadString => Op::LoadString(cur.str()?),
        Opcode::ToString => Op::ToString,
        Opcode::Concat => Op::Concat,
        Opcode::Compare => Op::Compare,
        Opcode::Call => Op::Call(cur.str()?),
        Opcode::Import => Op::Import(cur.str()?),
        Opcode::Syscall => {
            let id = cur.u8()?;
            match id {
                SYSCALL_WRITE => {
                    let text = cur.str()?;
                    let arg = cur.i32()?;
                    Op::Syscall(Syscall::Write { text, arg })
                }
                SYSCALL_NEXT_LINE => Op::Syscall(Syscall::NextLine),
                _ => return Err(DecodeError::UnknownSyscall { id, offset }),
            }
        }
        Opcode::Halt => Op::Halt,
    };

    Ok(Instruction {
        offset,
        op,
        next: cur.pos,
    })
}

/// Linear walk over a whole stream, in encoding order.
pub struct Decoder<'a> {
    code: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            pos: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<Instruction<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.code.len() {
            return None;
        }
        match decode_at(self.code, self.pos) {
            Ok(instr) => {
                self.pos = instr.next;
                Some(Ok(instr))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
