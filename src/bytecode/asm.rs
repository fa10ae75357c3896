//! Text assembler for hand-written Covi bytecode.
//!
//! # Syntax
//!
//! ```text
//! label:  MNEMONIC operand operand   ; optional comment
//! ```
//!
//! - Mnemonics are case-insensitive (`push`, `PUSH`)
//! - Integers are decimal, `0x` hex, negative, or a `'c'` character
//! - Strings are double-quoted with `\n`, `\t`, `\\` and `\"` escapes
//! - `CALL` and `IMPORT` also take bare names (`CALL port.srsl`)
//! - `JUMP` / `JUMP_IF_ZERO` take a label or a raw signed offset
//! - `SYSCALL WRITE "text" n` and `SYSCALL NEXTLINE`
//! - Commas between operands are optional
//!
//! Assembly is two-pass: the first pass sizes every instruction and records
//! label offsets, the second encodes with labels resolved relative to the end
//! of each jump's operand.

use std::collections::HashMap;
use std::fmt::Write;

use thiserror::Error;
use tracing::debug;

use crate::bytecode::module::Module;
use crate::bytecode::op::{
    MAX_STR_LEN, Op, Opcode, SYSCALL_NEXT_LINE, SYSCALL_WRITE, Syscall,
};

const COMMENT_CHAR: u8 = b';';
const LABEL_SUFFIX: char = ':';
const JUMP_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("unknown mnemonic '{name}'")]
    UnknownMnemonic { line: usize, col: usize, name: String },

    #[error("{mnemonic} takes {expected} operand(s), found {found}")]
    Arity {
        line: usize,
        col: usize,
        mnemonic: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("bad operand '{text}': {reason}")]
    BadOperand {
        line: usize,
        col: usize,
        text: String,
        reason: &'static str,
    },

    #[error("duplicate label '{label}'")]
    DuplicateLabel { line: usize, col: usize, label: String },

    #[error("undefined label '{label}'")]
    UndefinedLabel { line: usize, col: usize, label: String },

    #[error("jump to '{label}' spans {distance} bytes, outside the 16-bit offset range")]
    OffsetOutOfRange {
        line: usize,
        col: usize,
        label: String,
        distance: isize,
    },

    #[error("unterminated literal (missing closing quote)")]
    UnterminatedLiteral { line: usize, col: usize },
}

impl AsmError {
    /// 1-based line and column.
    pub fn location(&self) -> (usize, usize) {
        match self {
            AsmError::UnknownMnemonic { line, col, .. }
            | AsmError::Arity { line, col, .. }
            | AsmError::BadOperand { line, col, .. }
            | AsmError::DuplicateLabel { line, col, .. }
            | AsmError::UndefinedLabel { line, col, .. }
            | AsmError::OffsetOutOfRange { line, col, .. }
            | AsmError::UnterminatedLiteral { line, col } => (*line, *col),
        }
    }

    /// Compiler-style diagnostic pointing at the offending column.
    pub fn render(&self, file: &str, source: &str) -> String {
        let (line, col) = self.location();
        let mut diag = String::new();
        let _ = writeln!(diag, "error: {}", self);
        let _ = writeln!(diag, " --> {}:{}:{}", file, line, col);

        if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
            let underline = " ".repeat(col.saturating_sub(1));
            let _ = writeln!(diag, "  |");
            let _ = writeln!(diag, "{:>4} | {}", line, raw_line.trim_end_matches('\r'));
            let _ = writeln!(diag, "  | {}^", underline);
        }
        diag
    }
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column.
    col: usize,
}

/// Splits a line into tokens. `;` starts a comment, commas and whitespace
/// separate, and quoted literals stay whole.
fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token<'_>>, AsmError> {
    let mut out = Vec::with_capacity(4);
    let bytes = line.as_bytes();

    let mut start: Option<usize> = None;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            COMMENT_CHAR => break,
            b'"' | b'\'' => {
                start.get_or_insert(i);
                quote = Some(b);
            }
            b',' | b' ' | b'\t' | b'\r' => {
                if let Some(s) = start.take() {
                    out.push(Token {
                        text: &line[s..i],
                        col: s + 1,
                    });
                }
            }
            _ => {
                start.get_or_insert(i);
            }
        }
        i += 1;
    }

    if quote.is_some() {
        return Err(AsmError::UnterminatedLiteral {
            line: line_no,
            col: start.map_or(1, |s| s + 1),
        });
    }

    if let Some(s) = start {
        let end = i.min(line.len());
        out.push(Token {
            text: &line[s..end],
            col: s + 1,
        });
    }

    Ok(out)
}

/// An instruction after the first pass: either fully encoded or a jump
/// waiting for its label.
enum Pending {
    Encoded(Vec<u8>),
    Jump {
        opcode: Opcode,
        label: String,
        line: usize,
        col: usize,
    },
}

impl Pending {
    fn len(&self) -> usize {
        match self {
            Pending::Encoded(bytes) => bytes.len(),
            Pending::Jump { .. } => JUMP_LEN,
        }
    }
}

#[derive(Default)]
struct Assembler {
    labels: HashMap<String, usize>,
    items: Vec<(usize, Pending)>,
    offset: usize,
}

impl Assembler {
    fn define_label(&mut self, line: usize, tok: Token<'_>) -> Result<(), AsmError> {
        let name = &tok.text[..tok.text.len() - 1];
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
            return Err(AsmError::BadOperand {
                line,
                col: tok.col,
                text: tok.text.to_string(),
                reason: "labels are letters, digits, '_' and '.'",
            });
        }
        if self.labels.insert(name.to_string(), self.offset).is_some() {
            return Err(AsmError::DuplicateLabel {
                line,
                col: tok.col,
                label: name.to_string(),
            });
        }
        Ok(())
    }

    fn push(&mut self, pending: Pending) {
        let at = self.offset;
        self.offset += pending.len();
        self.items.push((at, pending));
    }

    fn finish(self) -> Result<Vec<u8>, AsmError> {
        let mut code = Vec::with_capacity(self.offset);

        for (at, item) in self.items {
            match item {
                Pending::Encoded(bytes) => code.extend(bytes),
                Pending::Jump {
                    opcode,
                    label,
                    line,
                    col,
                } => {
                    let Some(&target) = self.labels.get(&label) else {
                        return Err(AsmError::UndefinedLabel { line, col, label });
                    };
                    let distance = target as isize - (at + JUMP_LEN) as isize;
                    let offset = i16::try_from(distance).map_err(|_| {
                        AsmError::OffsetOutOfRange {
                            line,
                            col,
                            label: label.clone(),
                            distance,
                        }
                    })?;
                    let op = match opcode {
                        Opcode::Jump => Op::Jump(offset),
                        _ => Op::JumpIfZero(offset),
                    };
                    op.encode(&mut code);
                }
            }
        }

        Ok(code)
    }
}

/// Assembles a listing into a native module.
pub fn assemble(source: &str) -> Result<Module, AsmError> {
    let mut asm = Assembler::default();

    for (idx, line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let mut tokens = tokenize(line_no, line)?;

        if let Some(first) = tokens.first().copied() {
            if first.text.ends_with(LABEL_SUFFIX) && !first.text.starts_with(['"', '\'']) {
                asm.define_label(line_no, first)?;
                tokens.remove(0);
            }
        }

        let Some((mnemonic, operands)) = tokens.split_first() else {
            continue;
        };
        let pending = parse_instruction(line_no, *mnemonic, operands)?;
        asm.push(pending);
    }

    let labels = asm.labels.len();
    let code = asm.finish()?;
    debug!(bytes = code.len(), labels, "assembled listing");
    Ok(Module::new(code))
}

fn parse_instruction(
    line: usize,
    mnemonic: Token<'_>,
    operands: &[Token<'_>],
) -> Result<Pending, AsmError> {
    let opcode = Opcode::from_mnemonic(mnemonic.text).ok_or_else(|| AsmError::UnknownMnemonic {
        line,
        col: mnemonic.col,
        name: mnemonic.text.to_string(),
    })?;

    let arity = |expected: usize| -> Result<(), AsmError> {
        if operands.len() != expected {
            return Err(AsmError::Arity {
                line,
                col: mnemonic.col,
                mnemonic: opcode.mnemonic(),
                expected,
                found: operands.len(),
            });
        }
        Ok(())
    };

    let mut out = Vec::new();

    match opcode {
        Opcode::Push => {
            arity(1)?;
            Op::Push(parse_byte(line, operands[0])?).encode(&mut out);
        }
        Opcode::PushVar => {
            arity(2)?;
            let var = parse_byte(line, operands[0])?;
            let value = parse_byte(line, operands[1])?;
            Op::PushVar { var, value }.encode(&mut out);
        }
        Opcode::LoadVar | Opcode::Input | Opcode::PrintVar => {
            arity(1)?;
            let var = parse_byte(line, operands[0])?;
            let op = match opcode {
                Opcode::LoadVar => Op::LoadVar(var),
                Opcode::Input => Op::Input(var),
                _ => Op::PrintVar(var),
            };
            op.encode(&mut out);
        }
        Opcode::Jump | Opcode::JumpIfZero => {
            arity(1)?;
            let tok = operands[0];
            if let Some(value) = parse_int(tok.text) {
                let offset = i16::try_from(value).map_err(|_| bad(line, tok, "offset must fit in 16 bits"))?;
                let op = match opcode {
                    Opcode::Jump => Op::Jump(offset),
                    _ => Op::JumpIfZero(offset),
                };
                op.encode(&mut out);
            } else {
                return Ok(Pending::Jump {
                    opcode,
                    label: tok.text.to_string(),
                    line,
                    col: tok.col,
                });
            }
        }
        Opcode::PushStr | Opcode::LoadString => {
            arity(1)?;
            let text = parse_string(line, operands[0])?;
            let op = match opcode {
                Opcode::PushStr => Op::PushStr(&text),
                _ => Op::LoadString(&text),
            };
            op.encode(&mut out);
        }
        Opcode::Call | Opcode::Import => {
            arity(1)?;
            let tok = operands[0];
            let name = if tok.text.starts_with('"') {
                parse_string(line, tok)?
            } else {
                check_len(line, tok, tok.text.as_bytes().to_vec())?
            };
            let op = match opcode {
                Opcode::Call => Op::Call(&name),
                _ => Op::Import(&name),
            };
            op.encode(&mut out);
        }
        Opcode::Syscall => parse_syscall(line, mnemonic, operands, &mut out)?,
        Opcode::Add
        | Opcode::Print
        | Opcode::Println
        | Opcode::PrintNoNl
        | Opcode::Nop
        | Opcode::ToString
        | Opcode::Concat
        | Opcode::Compare
        | Opcode::Halt => {
            arity(0)?;
            out.push(opcode as u8);
        }
    }

    Ok(Pending::Encoded(out))
}

fn parse_syscall(
    line: usize,
    mnemonic: Token<'_>,
    operands: &[Token<'_>],
    out: &mut Vec<u8>,
) -> Result<(), AsmError> {
    let Some((&id_tok, rest)) = operands.split_first() else {
        return Err(AsmError::Arity {
            line,
            col: mnemonic.col,
            mnemonic: Opcode::Syscall.mnemonic(),
            expected: 1,
            found: 0,
        });
    };

    let id = if id_tok.text.eq_ignore_ascii_case("write") {
        SYSCALL_WRITE
    } else if id_tok.text.eq_ignore_ascii_case("nextline") {
        SYSCALL_NEXT_LINE
    } else {
        parse_byte(line, id_tok)?
    };

    let expected = match id {
        SYSCALL_WRITE => 2,
        SYSCALL_NEXT_LINE => 0,
        _ => return Err(bad(line, id_tok, "syscall is WRITE (0x30) or NEXTLINE (0x31)")),
    };
    if rest.len() != expected {
        return Err(AsmError::Arity {
            line,
            col: mnemonic.col,
            mnemonic: Opcode::Syscall.mnemonic(),
            expected: expected + 1,
            found: operands.len(),
        });
    }

    if id == SYSCALL_WRITE {
        let text = parse_string(line, rest[0])?;
        let arg = parse_int(rest[1].text)
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| bad(line, rest[1], "expected a 32-bit integer"))?;
        Op::Syscall(Syscall::Write { text: &text, arg }).encode(out);
    } else {
        Op::Syscall(Syscall::NextLine).encode(out);
    }
    Ok(())
}

// =============================================================================
// Operand parsing
// =============================================================================

fn bad(line: usize, tok: Token<'_>, reason: &'static str) -> AsmError {
    AsmError::BadOperand {
        line,
        col: tok.col,
        text: tok.text.to_string(),
        reason,
    }
}

/// Decimal, `0x` hex, optionally negative, or a `'c'` character literal.
fn parse_int(text: &str) -> Option<i64> {
    if let Some(body) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        let bytes = unescape(body)?;
        return match bytes.as_slice() {
            [b] => Some(*b as i64),
            _ => None,
        };
    }

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i64>().ok()?,
    };
    Some(if negative { -value } else { value })
}

fn parse_byte(line: usize, tok: Token<'_>) -> Result<u8, AsmError> {
    let value = parse_int(tok.text).ok_or_else(|| bad(line, tok, "expected an integer or 'c'"))?;
    u8::try_from(value).map_err(|_| bad(line, tok, "value must be 0 through 255"))
}

fn parse_string(line: usize, tok: Token<'_>) -> Result<Vec<u8>, AsmError> {
    let body = tok
        .text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .filter(|_| tok.text.len() >= 2)
        .ok_or_else(|| bad(line, tok, "expected a double-quoted string"))?;
    let bytes = unescape(body).ok_or_else(|| bad(line, tok, "unknown escape sequence"))?;
    check_len(line, tok, bytes)
}

fn check_len(line: usize, tok: Token<'_>, bytes: Vec<u8>) -> Result<Vec<u8>, AsmError> {
    if bytes.len() > MAX_STR_LEN {
        return Err(bad(line, tok, "longer than 255 bytes"));
    }
    Ok(bytes)
}

fn unescape(body: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.bytes();

    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let escaped = match bytes.next()? {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'0' => 0,
            b'\\' => b'\\',
            b'"' => b'"',
            b'\'' => b'\'',
            _ => return None,
        };
        out.push(escaped);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::decode::Decoder;

    fn asm(source: &str) -> Vec<u8> {
        assemble(source).unwrap().code().to_vec()
    }

    fn asm_err(source: &str) -> AsmError {
        assemble(source).unwrap_err()
    }

    #[test]
    fn test_empty_source() {
        assert!(asm("").is_empty());
        assert!(asm("; only a comment\n\n   \n").is_empty());
    }

    #[test]
    fn test_simple_program() {
        let code = asm("PUSH 65\nPUSH 1\nADD\nPRINT\nHALT");
        assert_eq!(code, vec![0x01, 65, 0x01, 1, 0x02, 0x03, 0xFF]);
    }

    #[test]
    fn test_lowercase_and_commas() {
        let code = asm("push_var 'x', 7 ; x = 7\nprint_var 'x'\n");
        assert_eq!(code, vec![0x11, b'x', 7, 0x2A, b'x']);
    }

    #[test]
    fn test_number_forms() {
        let code = asm("PUSH 0x41\nPUSH 'A'\nPUSH 65");
        assert_eq!(code, vec![0x01, 0x41, 0x01, 0x41, 0x01, 0x41]);
    }

    #[test]
    fn test_space_char_literal() {
        assert_eq!(asm("PUSH ' '"), vec![0x01, b' ']);
    }

    #[test]
    fn test_strings_with_escapes() {
        let code = asm("PUSH_STR \"a \\\"b\\\"\\n\"");
        assert_eq!(code, vec![0x40, 6, b'a', b' ', b'"', b'b', b'"', b'\n']);
    }

    #[test]
    fn test_semicolon_inside_string_is_not_comment() {
        let code = asm("LOAD_STRING \"a;b\" ; trailing");
        assert_eq!(code, vec![0x50, 3, b'a', b';', b'b']);
    }

    #[test]
    fn test_bare_call_and_import_names() {
        let code = asm("IMPORT port.col\nCALL port.srsl\nCALL \"x y\"");
        let ops: Vec<Op<'_>> = Decoder::new(&code).map(|r| r.unwrap().op).collect();
        assert_eq!(
            ops,
            vec![Op::Import(b"port.col"), Op::Call(b"port.srsl"), Op::Call(b"x y")]
        );
    }

    #[test]
    fn test_syscalls() {
        let code = asm("SYSCALL WRITE \"hi\" 2\nSYSCALL nextline\nSYSCALL 0x31");
        assert_eq!(
            code,
            vec![0x62, 0x30, 2, b'h', b'i', 0, 0, 0, 2, 0x62, 0x31, 0x62, 0x31]
        );
    }

    #[test]
    fn test_forward_and_backward_labels() {
        let src = "\
top:
    LOAD_VAR 'x'
    JUMP_IF_ZERO done
    NOP
    JUMP top
done: HALT
";
        let code = asm(src);
        // 0 LOAD_VAR, 2 JZ, 5 NOP, 6 JUMP, 9 HALT
        assert_eq!(
            code,
            vec![0x12, b'x', 0x05, 0x00, 0x04, 0x1F, 0x06, 0xFF, 0xF7, 0xFF]
        );
    }

    #[test]
    fn test_raw_jump_offset() {
        assert_eq!(asm("JUMP -3"), vec![0x06, 0xFF, 0xFD]);
    }

    #[test]
    fn test_unknown_mnemonic() {
        let err = asm_err("PUSH 1\nFROB 2");
        assert!(matches!(err, AsmError::UnknownMnemonic { line: 2, col: 1, ref name } if name == "FROB"));
    }

    #[test]
    fn test_arity() {
        let err = asm_err("ADD 1");
        assert!(matches!(err, AsmError::Arity { expected: 0, found: 1, .. }));

        let err = asm_err("PUSH_VAR 'x'");
        assert!(matches!(err, AsmError::Arity { expected: 2, found: 1, .. }));

        let err = asm_err("SYSCALL WRITE \"x\"");
        assert!(matches!(err, AsmError::Arity { .. }));
    }

    #[test]
    fn test_bad_operands() {
        assert!(matches!(asm_err("PUSH 256"), AsmError::BadOperand { .. }));
        assert!(matches!(asm_err("PUSH -1"), AsmError::BadOperand { .. }));
        assert!(matches!(asm_err("PUSH abc"), AsmError::BadOperand { .. }));
        assert!(matches!(asm_err("PUSH_STR bare"), AsmError::BadOperand { .. }));
        assert!(matches!(asm_err("SYSCALL 0x40"), AsmError::BadOperand { .. }));
        assert!(matches!(asm_err("JUMP 40000"), AsmError::BadOperand { .. }));
    }

    #[test]
    fn test_long_string_rejected() {
        let src = format!("PUSH_STR \"{}\"", "a".repeat(256));
        assert!(matches!(asm_err(&src), AsmError::BadOperand { .. }));
    }

    #[test]
    fn test_labels() {
        let err = asm_err("a: NOP\na: NOP");
        assert!(matches!(err, AsmError::DuplicateLabel { line: 2, .. }));

        let err = asm_err("JUMP nowhere");
        assert!(matches!(err, AsmError::UndefinedLabel { line: 1, col: 6, .. }));
    }

    #[test]
    fn test_unterminated_literal() {
        let err = asm_err("PUSH_STR \"abc");
        assert_eq!(err, AsmError::UnterminatedLiteral { line: 1, col: 10 });
    }

    #[test]
    fn test_render_diagnostic() {
        let src = "PUSH 1\nPUSH 999\n";
        let err = asm_err(src);
        let diag = err.render("prog.casm", src);
        assert!(diag.contains("error: bad operand '999'"));
        assert!(diag.contains(" --> prog.casm:2:6"));
        assert!(diag.contains("   2 | PUSH 999"));
    }
}
