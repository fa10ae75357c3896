use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::decode::{Decoder, Instruction};
use crate::bytecode::format_error::DecodeError;
use crate::bytecode::module::{Magic, Module};
use crate::bytecode::op::Op;

const RULE: &str = "════════════════════════════════════════";

/// A decoded instruction stream. Decoding stops at the first malformed
/// instruction; everything before it is still listed.
#[derive(Debug)]
pub struct Disassembly<'a> {
    pub instructions: Vec<Instruction<'a>>,
    pub error: Option<DecodeError>,
    len: usize,
}

impl Disassembly<'_> {
    /// Offsets that some jump lands on, in order. Targets outside the stream
    /// are left out.
    pub fn jump_targets(&self) -> BTreeSet<usize> {
        self.instructions
            .iter()
            .filter_map(|instr| instr.jump_target(self.len))
            .filter_map(Result::ok)
            .collect()
    }
}

pub fn disassemble(code: &[u8]) -> Disassembly<'_> {
    let mut instructions = Vec::new();
    let mut error = None;

    for item in Decoder::new(code) {
        match item {
            Ok(instr) => instructions.push(instr),
            Err(e) => error = Some(e),
        }
    }

    Disassembly {
        instructions,
        error,
        len: code.len(),
    }
}

/// Renders a module as a human-readable listing.
pub fn render_module(name: &str, module: &Module) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, " {}", name);

    if module.magic() == Magic::Foreign {
        let _ = writeln!(out, " foreign module (Java class file), not disassembled");
        let _ = writeln!(out, "{}", RULE);
        return out;
    }

    let listing = disassemble(module.code());
    let _ = writeln!(
        out,
        " magic 0x{:08X}, {} bytes, {} instructions",
        module.magic().value(),
        module.code().len(),
        listing.instructions.len()
    );
    let _ = writeln!(out, "{}", RULE);

    render_listing(&listing, &mut out);
    out
}

fn render_listing(listing: &Disassembly<'_>, out: &mut String) {
    let targets = listing.jump_targets();

    for instr in &listing.instructions {
        let is_target = targets.contains(&instr.offset);
        if is_target {
            let _ = writeln!(out, "      ┌──────────────────────────────────");
        }

        let marker = if is_target { "► " } else { "  " };
        let _ = write!(out, "{:04} {}{}", instr.offset, marker, instr.op);

        match instr.jump_target(listing.len) {
            Some(Ok(target)) => {
                let direction = if target <= instr.offset { "↑" } else { "↓" };
                let _ = write!(out, " {} (→ {:04})", direction, target);
            }
            Some(Err(_)) => {
                let _ = write!(out, " (→ out of range)");
            }
            None => {
                if let Some(effect) = stack_effect(&instr.op) {
                    let _ = write!(out, "   ; {}", effect);
                }
            }
        }
        out.push('\n');
    }

    if let Some(err) = &listing.error {
        let _ = writeln!(out, "!!!! {}", err);
    }
}

fn stack_effect(op: &Op<'_>) -> Option<&'static str> {
    match op {
        Op::Push(_) | Op::LoadVar(_) => Some("( -- n )"),
        Op::Add => Some("( a b -- a+b )"),
        Op::Print | Op::PrintNoNl => Some("( v -- )"),
        Op::Println => Some("( ... -- )"),
        Op::PushStr(_) => Some("( -- str )"),
        Op::ToString => Some("( v -- )"),
        Op::Compare => Some("( a b -- a>b )"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_collects_instructions() {
        let code = [0x01, 1, 0x01, 2, 0x02, 0x03, 0xFF];
        let listing = disassemble(&code);
        assert_eq!(listing.instructions.len(), 5);
        assert!(listing.error.is_none());
        assert_eq!(listing.instructions[2].offset, 4);
    }

    #[test]
    fn test_disassemble_keeps_prefix_before_error() {
        let code = [0x01, 1, 0x77];
        let listing = disassemble(&code);
        assert_eq!(listing.instructions.len(), 1);
        assert!(matches!(
            listing.error,
            Some(DecodeError::UnknownOpcode { opcode: 0x77, offset: 2 })
        ));
    }

    #[test]
    fn test_jump_targets() {
        // 0: JUMP_IF_ZERO +1 -> 4 ; 3: NOP ; 4: JUMP -7 -> 0 ; 7: HALT
        let code = [0x05, 0x00, 0x01, 0x1F, 0x06, 0xFF, 0xF9, 0xFF];
        let listing = disassemble(&code);
        let targets: Vec<usize> = listing.jump_targets().into_iter().collect();
        assert_eq!(targets, vec![0, 4]);
    }

    #[test]
    fn test_render_marks_targets() {
        let module = Module::new(vec![0x05, 0x00, 0x01, 0x1F, 0x06, 0xFF, 0xF9, 0xFF]);
        let text = render_module("loop.cb", &module);
        assert!(text.contains("loop.cb"));
        assert!(text.contains("0000 ► JUMP_IF_ZERO"));
        assert!(text.contains("↓ (→ 0004)"));
        assert!(text.contains("0004 ► JUMP"));
        assert!(text.contains("↑ (→ 0000)"));
        assert!(text.contains("0007   HALT"));
    }

    #[test]
    fn test_render_reports_out_of_range_jump() {
        let module = Module::new(vec![0x06, 0x00, 0x10]);
        let text = render_module("bad", &module);
        assert!(text.contains("out of range"));
    }

    #[test]
    fn test_render_reports_decode_error() {
        let module = Module::new(vec![0x50, 9, b'a']);
        let text = render_module("trunc", &module);
        assert!(text.contains("!!!! truncated operand"));
    }

    #[test]
    fn test_render_foreign_module() {
        let module = Module::from_bytes(&[0xCA, 0xFE, 0xBA, 0xBE, 0x01]).unwrap();
        let text = render_module("Main.class", &module);
        assert!(text.contains("foreign module"));
        assert!(!text.contains("0000"));
    }
}
