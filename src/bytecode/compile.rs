use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::module::Module;
use crate::bytecode::op::{MAX_STR_LEN, Op, Opcode, Syscall};

/// Ids handed out to multi-character variable names. Single ASCII characters
/// keep their own byte so hand-written bytecode and compiled code agree.
const FIRST_NAMED_VAR: u8 = 0x80;
const NAMED_VAR_LIMIT: usize = 0x80;

const BUILTIN_PRINT: &str = "print";
const BUILTIN_PRINTNL: &str = "printnl";

/// Compiles Covi source text into a native [`Module`].
///
/// One recursive-descent pass over raw lines: statements are dispatched on
/// their first keyword and nested blocks recurse.
pub struct Compiler {
    /// Module names already imported in this unit.
    imported: HashSet<String>,

    /// Multi-character variable names -> allocated ids.
    variables: HashMap<String, u8>,
}

/// How a block ended.
#[derive(Debug, PartialEq, Eq)]
enum BlockEnd {
    /// `}`
    Close,
    /// `} else {`
    Else { line: usize },
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, Copy)]
enum Operand {
    Const(u8),
    Var(u8),
}

struct Lines<'s> {
    lines: Vec<(usize, &'s str)>,
    pos: usize,
}

impl<'s> Lines<'s> {
    fn next_line(&mut self) -> Option<(usize, &'s str)> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            imported: HashSet::new(),
            variables: HashMap::new(),
        }
    }

    pub fn compile_source(mut self, source: &str) -> Result<Module, CompileError> {
        let all: Vec<(usize, &str)> = source
            .lines()
            .enumerate()
            .map(|(i, text)| (i + 1, text))
            .collect();

        let Some(main_idx) = all.iter().position(|(_, text)| is_main_header(text)) else {
            return self.compile_bare_calls(&all, source);
        };

        let mut code = Vec::new();

        // imports ahead of main are part of the unit
        for (line, text) in &all[..main_idx] {
            let text = clean(text);
            if keyword(text) == "import" {
                self.compile_import(*line, rest_after_keyword(text), &mut code)?;
            }
        }

        let (main_line, main_text) = all[main_idx];
        let after_brace = main_text.find('{').map_or("", |b| &main_text[b + 1..]);
        let mut block_lines = vec![(main_line, after_brace)];
        block_lines.extend_from_slice(&all[main_idx + 1..]);

        let mut lines = Lines {
            lines: block_lines,
            pos: 0,
        };

        let (body, end) = self.compile_block(&mut lines, main_line)?;
        if let BlockEnd::Else { line } = end {
            return Err(CompileError::UnexpectedElse { line });
        }
        code.extend(body);
        Op::Halt.encode(&mut code);

        debug!(bytes = code.len(), "compiled main block");
        Ok(Module::new(code))
    }

    /// Fallback for sources without any block structure: only the built-in
    /// call forms (and imports) are recognized.
    fn compile_bare_calls(
        &mut self,
        all: &[(usize, &str)],
        source: &str,
    ) -> Result<Module, CompileError> {
        if source.contains('{') {
            return Err(CompileError::MissingMain);
        }

        let mut code = Vec::new();
        let mut calls = 0;

        for (line, text) in all {
            let text = clean(text);
            if keyword(text) == "import" {
                self.compile_import(*line, rest_after_keyword(text), &mut code)?;
                continue;
            }
            if let Some((name, args)) = split_call(text) {
                if is_builtin(name) {
                    self.compile_call(*line, name, args, &mut code)?;
                    calls += 1;
                }
            }
        }

        if calls == 0 {
            return Err(CompileError::MissingMain);
        }

        Op::Halt.encode(&mut code);
        Ok(Module::new(code))
    }

    /// Compiles statements until the closing `}` of the current block.
    fn compile_block(
        &mut self,
        lines: &mut Lines<'_>,
        open_line: usize,
    ) -> Result<(Vec<u8>, BlockEnd), CompileError> {
        let mut code = Vec::new();

        while let Some((line, raw)) = lines.next_line() {
            let text = clean(raw);
            if text.is_empty() {
                continue;
            }

            if let Some(after) = text.strip_prefix('}') {
                let after = after.trim();
                if after.is_empty() {
                    return Ok((code, BlockEnd::Close));
                }
                if keyword(after) == "else" && rest_after_keyword(after) == "{" {
                    return Ok((code, BlockEnd::Else { line }));
                }
                return Err(CompileError::unknown_statement(line, text));
            }

            self.compile_statement(line, text, lines, &mut code)?;
        }

        Err(CompileError::UnclosedBlock { line: open_line })
    }

    fn compile_statement(
        &mut self,
        line: usize,
        text: &str,
        lines: &mut Lines<'_>,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        if let Some(rest) = strip_prefix_ignore_case(text, "@syscall") {
            return self.compile_syscall(line, rest.trim(), code);
        }

        let kw = keyword(text);
        let rest = rest_after_keyword(text);

        match kw.as_str() {
            "let" => self.compile_assignment(line, rest, code),
            "input" => {
                let var = self.var_id(line, strip_parens(rest))?;
                Op::Input(var).encode(code);
                Ok(())
            }
            "if" => self.compile_if(line, rest, lines, code),
            "while" => self.compile_while(line, rest, lines, code),
            "import" => self.compile_import(line, rest, code),
            "else" => Err(CompileError::UnexpectedElse { line }),
            _ => {
                if let Some((name, args)) = split_call(text) {
                    return self.compile_call(line, name, args, code);
                }
                match kw.as_str() {
                    BUILTIN_PRINT => self.compile_print(line, rest, false, code),
                    BUILTIN_PRINTNL => self.compile_print(line, rest, true, code),
                    _ => Err(CompileError::unknown_statement(line, text)),
                }
            }
        }
    }

    // =========================================================================
    // Simple statements
    // =========================================================================

    fn compile_assignment(
        &mut self,
        line: usize,
        rest: &str,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        let Some((name, value)) = rest.split_once('=') else {
            return Err(CompileError::malformed_assignment(line, format!("let {}", rest)));
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || value.is_empty() {
            return Err(CompileError::malformed_assignment(line, format!("let {}", rest)));
        }

        let var = self.var_id(line, name)?;
        let value = match parse_byte(line, value) {
            Ok(v) => v,
            Err(CompileError::Expected { .. }) => {
                return Err(CompileError::malformed_assignment(line, format!("let {}", rest)));
            }
            Err(e) => return Err(e),
        };

        Op::PushVar { var, value }.encode(code);
        Ok(())
    }

    fn compile_import(
        &mut self,
        line: usize,
        rest: &str,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        let name = rest.trim().trim_matches('"');
        if name.is_empty() {
            return Err(CompileError::expected(line, "a module name", rest));
        }
        check_str_len(line, name.as_bytes())?;

        if self.imported.insert(name.to_string()) {
            Op::Import(name.as_bytes()).encode(code);
        } else {
            debug!(module = name, line, "duplicate import elided");
        }
        Ok(())
    }

    /// `print "a" + x + "b"` style statements: characters are pushed and
    /// printed one at a time, variables are printed as numbers.
    fn compile_print(
        &mut self,
        line: usize,
        expr: &str,
        newline: bool,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        let expr = expr.trim();

        if expr.is_empty() && !newline {
            return Err(CompileError::expected(line, "something to print", expr));
        }

        if !expr.is_empty() {
            for segment in split_concat(line, expr)? {
                let segment = segment.trim();
                if segment.is_empty() {
                    return Err(CompileError::expected(line, "an operand around '+'", expr));
                }
                if segment.starts_with('"') {
                    for &byte in quoted(line, segment)?.as_bytes() {
                        Op::Push(byte).encode(code);
                        Op::Print.encode(code);
                    }
                } else {
                    let var = self.var_id(line, segment)?;
                    Op::PrintVar(var).encode(code);
                }
            }
        }

        if newline {
            Op::Println.encode(code);
        }
        Ok(())
    }

    /// `name(args)` call forms. The two built-ins map straight to opcodes;
    /// everything else becomes a generic CALL resolved at run time.
    fn compile_call(
        &mut self,
        line: usize,
        name: &str,
        args: &str,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        let newline = name.eq_ignore_ascii_case(BUILTIN_PRINTNL);

        if is_builtin(name) {
            let args = args.trim();
            if args.is_empty() {
                if !newline {
                    return Err(CompileError::expected(line, "an argument to print()", args));
                }
            } else if args.starts_with('"') {
                let text = quoted(line, args)?;
                check_str_len(line, text.as_bytes())?;
                Op::PushStr(text.as_bytes()).encode(code);
                if !newline {
                    Op::Print.encode(code);
                }
            } else {
                let var = self.var_id(line, args)?;
                Op::PrintVar(var).encode(code);
            }

            if newline {
                Op::Println.encode(code);
            }
            return Ok(());
        }

        if !args.trim().is_empty() {
            return Err(CompileError::CallArguments {
                line,
                name: name.to_string(),
            });
        }
        check_str_len(line, name.as_bytes())?;
        Op::Call(name.as_bytes()).encode(code);
        Ok(())
    }

    /// `@SysCall write("text", n)` and `@SysCall nextLine()`.
    fn compile_syscall(
        &mut self,
        line: usize,
        text: &str,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        let Some((name, args)) = split_call(text) else {
            return Err(CompileError::expected(line, "a syscall like write(...)", text));
        };

        if name.eq_ignore_ascii_case("write") {
            let parts = split_top_level(line, args, ',')?;
            let [message, arg] = parts.as_slice() else {
                return Err(CompileError::expected(line, "write(\"text\", number)", args));
            };
            let message = quoted(line, message.trim())?;
            check_str_len(line, message.as_bytes())?;
            let arg = parse_i32(line, arg.trim())?;
            Op::Syscall(Syscall::Write {
                text: message.as_bytes(),
                arg,
            })
            .encode(code);
            Ok(())
        } else if name.eq_ignore_ascii_case("nextline") {
            if !args.trim().is_empty() {
                return Err(CompileError::CallArguments {
                    line,
                    name: name.to_string(),
                });
            }
            Op::Syscall(Syscall::NextLine).encode(code);
            Ok(())
        } else {
            Err(CompileError::UnsupportedSyscall {
                line,
                name: name.to_string(),
            })
        }
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    /// ```text
    ///   <condition>           ; leaves 1 or 0
    ///   JUMP_IF_ZERO  else    ; skip then-block and the JUMP below
    ///   <then-block>
    ///   JUMP          end     ; skip else-block (offset 0 without else)
    /// else:
    ///   <else-block>
    /// end:
    /// ```
    fn compile_if(
        &mut self,
        line: usize,
        header: &str,
        lines: &mut Lines<'_>,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        let mut out = self.compile_condition(line, header)?;

        let (then_block, end) = self.compile_block(lines, line)?;
        let else_block = match end {
            BlockEnd::Close => Vec::new(),
            BlockEnd::Else { line: else_line } => {
                let (block, end) = self.compile_block(lines, else_line)?;
                if let BlockEnd::Else { line } = end {
                    return Err(CompileError::UnexpectedElse { line });
                }
                block
            }
        };

        let skip_then = emit_jump_placeholder(&mut out, Opcode::JumpIfZero);
        out.extend(then_block);
        let skip_else = emit_jump_placeholder(&mut out, Opcode::Jump);
        let else_start = out.len();
        out.extend(else_block);
        let end = out.len();

        patch_jump(&mut out, skip_then, else_start, line)?;
        patch_jump(&mut out, skip_else, end, line)?;

        code.extend(out);
        Ok(())
    }

    /// ```text
    /// top:
    ///   <condition>
    ///   JUMP_IF_ZERO  end
    ///   <body>
    ///   JUMP          top     ; negative offset
    /// end:
    /// ```
    fn compile_while(
        &mut self,
        line: usize,
        header: &str,
        lines: &mut Lines<'_>,
        code: &mut Vec<u8>,
    ) -> Result<(), CompileError> {
        let mut out = self.compile_condition(line, header)?;

        let (body, end) = self.compile_block(lines, line)?;
        if let BlockEnd::Else { line } = end {
            return Err(CompileError::UnexpectedElse { line });
        }

        let exit = emit_jump_placeholder(&mut out, Opcode::JumpIfZero);
        out.extend(body);
        let back = emit_jump_placeholder(&mut out, Opcode::Jump);
        let end = out.len();

        patch_jump(&mut out, exit, end, line)?;
        patch_jump(&mut out, back, 0, line)?;

        code.extend(out);
        Ok(())
    }

    /// `x > 3 {` / `x < limit {`. COMPARE only knows "greater than", so `<`
    /// swaps the operands: `x < c` is evaluated as `c > x`.
    fn compile_condition(&mut self, line: usize, header: &str) -> Result<Vec<u8>, CompileError> {
        let Some(cond) = header.trim().strip_suffix('{') else {
            return Err(CompileError::expected(line, "'{' at the end of the line", header));
        };
        let cond = strip_parens(cond.trim());

        let lhs_len = cond
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(cond.len());
        let lhs = &cond[..lhs_len];
        let after = cond[lhs_len..].trim_start();

        let op_len = after
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '!'))
            .unwrap_or(after.len());
        let op = &after[..op_len];
        let rhs = strip_parens(after[op_len..].trim());

        if op.is_empty() {
            return Err(CompileError::expected(line, "a comparison operator", cond));
        }
        if op != "<" && op != ">" {
            return Err(CompileError::UnsupportedOperator {
                line,
                op: op.to_string(),
            });
        }

        let lhs = self.var_id(line, lhs)?;
        let rhs = self.operand(line, rhs)?;

        let mut out = Vec::new();
        if op == ">" {
            Op::LoadVar(lhs).encode(&mut out);
            emit_operand(rhs, &mut out);
        } else {
            emit_operand(rhs, &mut out);
            Op::LoadVar(lhs).encode(&mut out);
        }
        Op::Compare.encode(&mut out);
        Ok(out)
    }

    fn operand(&mut self, line: usize, text: &str) -> Result<Operand, CompileError> {
        if text.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
            Ok(Operand::Const(parse_byte(line, text)?))
        } else {
            Ok(Operand::Var(self.var_id(line, text)?))
        }
    }

    // =========================================================================
    // Variables
    // =========================================================================

    fn var_id(&mut self, line: usize, name: &str) -> Result<u8, CompileError> {
        let name = name.trim();
        if !is_identifier(name) {
            return Err(CompileError::InvalidIdentifier {
                line,
                name: name.to_string(),
            });
        }

        if name.len() == 1 {
            return Ok(name.as_bytes()[0]);
        }

        if let Some(id) = self.variables.get(name) {
            return Ok(*id);
        }

        if self.variables.len() >= NAMED_VAR_LIMIT {
            return Err(CompileError::TooManyVariables {
                line,
                limit: NAMED_VAR_LIMIT,
            });
        }
        let id = FIRST_NAMED_VAR + self.variables.len() as u8;
        self.variables.insert(name.to_string(), id);
        Ok(id)
    }
}

// =============================================================================
// Jump back-patching
// =============================================================================

/// Emits a jump with a zero offset and returns the position of its operand.
fn emit_jump_placeholder(code: &mut Vec<u8>, opcode: Opcode) -> usize {
    code.push(opcode as u8);
    let operand = code.len();
    code.extend_from_slice(&[0, 0]);
    operand
}

/// Rewrites the placeholder at `operand` so the jump lands on `target`.
/// Offsets count from the end of the 2-byte operand.
fn patch_jump(
    code: &mut [u8],
    operand: usize,
    target: usize,
    line: usize,
) -> Result<(), CompileError> {
    let distance = target as isize - (operand + 2) as isize;
    let offset =
        i16::try_from(distance).map_err(|_| CompileError::JumpTooFar { line, distance })?;
    code[operand..operand + 2].copy_from_slice(&offset.to_be_bytes());
    Ok(())
}

fn emit_operand(operand: Operand, out: &mut Vec<u8>) {
    match operand {
        Operand::Const(v) => Op::Push(v).encode(out),
        Operand::Var(id) => Op::LoadVar(id).encode(out),
    }
}

// =============================================================================
// Line-level helpers
// =============================================================================

fn is_main_header(text: &str) -> bool {
    let text = clean(text);
    !text.is_empty() && text.contains('{') && text.split(|c: char| !c.is_alphanumeric()).any(|w| w == "main")
}

/// Trims the line, drops a `//` comment and a trailing `;`.
fn clean(text: &str) -> &str {
    let text = strip_comment(text).trim();
    text.strip_suffix(';').map(str::trim_end).unwrap_or(text)
}

/// Cuts the line at the first `//` outside a string literal.
fn strip_comment(text: &str) -> &str {
    let mut in_str = false;
    let mut prev = ' ';
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_str = !in_str,
            '/' if prev == '/' && !in_str => return &text[..i - 1],
            _ => {}
        }
        prev = c;
    }
    text
}

fn keyword(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Everything after the keyword. A `(` ends the keyword and stays in the rest.
fn rest_after_keyword(text: &str) -> &str {
    match text.find(|c: char| c.is_whitespace() || c == '(') {
        Some(i) => text[i..].trim(),
        None => "",
    }
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

/// Removes parentheses that wrap the whole of `text`.
fn strip_parens(text: &str) -> &str {
    let mut text = text;
    while wrapped_in_parens(text) {
        text = text[1..text.len() - 1].trim();
    }
    text
}

fn wrapped_in_parens(text: &str) -> bool {
    if !text.starts_with('(') {
        return false;
    }
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return i + 1 == text.len();
                }
            }
            _ => {}
        }
    }
    false
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_call_name(name: &str) -> bool {
    !name.is_empty() && name.split('.').all(is_identifier)
}

fn is_builtin(name: &str) -> bool {
    name.eq_ignore_ascii_case(BUILTIN_PRINT) || name.eq_ignore_ascii_case(BUILTIN_PRINTNL)
}

/// Splits `name(args)` into its parts when the line is a call form.
fn split_call(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let name = text[..open].trim();
    let args = text[open + 1..].strip_suffix(')')?;
    is_call_name(name).then_some((name, args))
}

/// Contents of a `"..."` literal that must span the whole of `text`.
fn quoted(line: usize, text: &str) -> Result<&str, CompileError> {
    let Some(body) = text.strip_prefix('"') else {
        return Err(CompileError::expected(line, "a string literal", text));
    };
    match body.find('"') {
        None => Err(CompileError::UnterminatedString { line }),
        Some(end) if end + 1 == body.len() => Ok(&body[..end]),
        Some(_) => Err(CompileError::expected(line, "a single string literal", text)),
    }
}

/// Splits on `sep` outside of string literals.
fn split_top_level(line: usize, text: &str, sep: char) -> Result<Vec<&str>, CompileError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_str = false;

    for (i, c) in text.char_indices() {
        if c == '"' {
            in_str = !in_str;
        } else if c == sep && !in_str {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }

    if in_str {
        return Err(CompileError::UnterminatedString { line });
    }
    parts.push(&text[start..]);
    Ok(parts)
}

fn split_concat(line: usize, expr: &str) -> Result<Vec<&str>, CompileError> {
    split_top_level(line, expr, '+')
}

fn check_str_len(line: usize, bytes: &[u8]) -> Result<(), CompileError> {
    if bytes.len() > MAX_STR_LEN {
        return Err(CompileError::StringTooLong {
            line,
            len: bytes.len(),
        });
    }
    Ok(())
}

fn parse_byte(line: usize, text: &str) -> Result<u8, CompileError> {
    let value: i64 = text
        .parse()
        .map_err(|_| CompileError::expected(line, "an integer", text))?;
    u8::try_from(value).map_err(|_| CompileError::ConstantOutOfRange {
        line,
        value: text.to_string(),
    })
}

fn parse_i32(line: usize, text: &str) -> Result<i32, CompileError> {
    let value: i64 = text
        .parse()
        .map_err(|_| CompileError::expected(line, "an integer", text))?;
    i32::try_from(value).map_err(|_| CompileError::ConstantOutOfRange {
        line,
        value: text.to_string(),
    })
}
