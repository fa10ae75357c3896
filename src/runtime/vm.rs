use std::collections::HashMap;

use tracing::{debug, warn};

use crate::bytecode::decode::{decode_at, resolve_jump};
use crate::bytecode::module::{Magic, Module};
use crate::bytecode::op::{Op, Syscall};
use crate::runtime::config::VmConfig;
use crate::runtime::io::HostIo;
use crate::runtime::loader::ModuleLoader;
use crate::runtime::runtime_error::{Fault, RuntimeError};
use crate::runtime::value::{OperandStack, StringHeap, Value};

const BUILTIN_PRINT: &str = "print";
const BUILTIN_PRINTNL: &str = "printnl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Ready,
    Running,
    Halted,
    Faulted,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// HALT or end of stream.
    Halted,
    /// The module carried the foreign marker and was not executed.
    ForeignSkipped,
}

enum Flow {
    Next,
    Jump(i16),
    Halt,
}

pub struct Vm<'c> {
    config: &'c VmConfig,
    state: VmState,
    stack: OperandStack,
    heap: StringHeap,
    vars: HashMap<u8, u8>,
    // string work registers
    literal: Vec<u8>,
    operand: Vec<u8>,
    import_cache: Option<(String, Module)>,
    depth: usize,
}

impl<'c> Vm<'c> {
    pub fn new(config: &'c VmConfig) -> Self {
        Self::at_depth(config, 0)
    }

    fn at_depth(config: &'c VmConfig, depth: usize) -> Self {
        Self {
            config,
            state: VmState::Ready,
            stack: OperandStack::new(config.max_stack_size),
            heap: StringHeap::default(),
            vars: HashMap::new(),
            literal: Vec::new(),
            operand: Vec::new(),
            import_cache: None,
            depth,
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn stack(&self) -> &[Value] {
        self.stack.as_slice()
    }

    pub fn variable(&self, id: u8) -> Option<u8> {
        self.vars.get(&id).copied()
    }

    /// Name of the module currently held by the import cache.
    pub fn imported(&self) -> Option<&str> {
        self.import_cache.as_ref().map(|(name, _)| name.as_str())
    }

    /// Loads a module from raw file contents (binary or hex) and runs it.
    pub fn run_bytes(
        &mut self,
        bytes: &[u8],
        io: &mut dyn HostIo,
    ) -> Result<ExitStatus, RuntimeError> {
        let module = match Module::from_bytes(bytes) {
            Ok(module) => module,
            Err(e) => {
                self.state = VmState::Faulted;
                return Err(e.into());
            }
        };
        self.run_module(&module, io)
    }

    pub fn run_module(
        &mut self,
        module: &Module,
        io: &mut dyn HostIo,
    ) -> Result<ExitStatus, RuntimeError> {
        if module.magic() == Magic::Foreign {
            warn!("Java class files are not supported; nothing executed");
            self.state = VmState::Halted;
            return Ok(ExitStatus::ForeignSkipped);
        }

        self.state = VmState::Running;
        match self.exec(module.code(), io) {
            Ok(()) => {
                self.state = VmState::Halted;
                Ok(ExitStatus::Halted)
            }
            Err(e) => {
                self.state = VmState::Faulted;
                Err(e)
            }
        }
    }

    fn exec(&mut self, code: &[u8], io: &mut dyn HostIo) -> Result<(), RuntimeError> {
        let mut ip = 0;

        while ip < code.len() {
            let instr = decode_at(code, ip)?;

            if self.config.trace {
                debug!(
                    target: "covi::trace",
                    depth = self.depth,
                    offset = instr.offset,
                    "{}",
                    instr.op
                );
            }

            match self.step(instr.op, io)? {
                Flow::Next => ip = instr.next,
                Flow::Jump(offset) => {
                    ip = resolve_jump(instr.offset, instr.next, offset, code.len())?;
                }
                Flow::Halt => break,
            }
        }

        Ok(())
    }

    fn step(&mut self, op: Op<'_>, io: &mut dyn HostIo) -> Result<Flow, RuntimeError> {
        match op {
            Op::Push(v) => self.stack.push(Value::Byte(v))?,
            Op::Add => {
                let b = self.stack.pop_byte("ADD")?;
                let a = self.stack.pop_byte("ADD")?;
                self.stack.push(Value::Byte(a.wrapping_add(b)))?;
            }
            Op::Print => self.print(io, "PRINT")?,
            Op::PrintNoNl => self.print(io, "PRINT_NO_NL")?,
            Op::Println => self.println(io)?,

            Op::JumpIfZero(offset) => {
                if self.stack.pop_byte("JUMP_IF_ZERO")? == 0 {
                    return Ok(Flow::Jump(offset));
                }
            }
            Op::Jump(offset) => return Ok(Flow::Jump(offset)),

            Op::PushVar { var, value } => {
                self.vars.insert(var, value);
            }
            Op::LoadVar(var) => {
                let value = self.load_var(var)?;
                self.stack.push(Value::Byte(value))?;
            }
            Op::Input(var) => {
                let line = io.read_line()?;
                let value = line.as_deref().map_or(0, parse_leading_int);
                self.vars.insert(var, value as u8);
            }
            Op::PrintVar(var) => {
                let value = self.load_var(var)?;
                io.emit(value.to_string().as_bytes())?;
            }
            Op::Nop => {}

            Op::PushStr(bytes) => {
                let handle = self.heap.alloc(bytes);
                self.stack.push(Value::Str(handle))?;
            }
            Op::LoadString(bytes) => {
                self.literal.clear();
                self.literal.extend_from_slice(bytes);
            }
            Op::ToString => {
                let value = self.stack.pop("TO_STRING")?;
                self.operand = self.render(value);
            }
            Op::Concat => {
                self.literal.extend_from_slice(&self.operand);
            }
            Op::Compare => {
                let b = self.stack.pop_byte("COMPARE")?;
                let a = self.stack.pop_byte("COMPARE")?;
                self.stack.push(Value::Byte(u8::from(a > b)))?;
            }

            Op::Call(name) => self.call(&String::from_utf8_lossy(name), io)?,
            Op::Import(name) => self.import(&String::from_utf8_lossy(name))?,
            Op::Syscall(Syscall::Write { text, .. }) => io.emit(text)?,
            Op::Syscall(Syscall::NextLine) => io.emit_line(&[])?,

            Op::Halt => return Ok(Flow::Halt),
        }

        Ok(Flow::Next)
    }

    // =========================================================================
    // Output
    // =========================================================================

    fn print(&mut self, io: &mut dyn HostIo, op: &'static str) -> Result<(), RuntimeError> {
        if !self.literal.is_empty() {
            io.emit(&self.literal)?;
            self.clear_registers();
            return Ok(());
        }

        let value = self.stack.pop(op)?;
        match value {
            Value::Byte(b) => io.emit(&[b])?,
            Value::Str(handle) => io.emit(&self.heap.release(handle))?,
        }
        Ok(())
    }

    /// Pending literal plus newline, or else the whole stack in push order.
    fn println(&mut self, io: &mut dyn HostIo) -> Result<(), RuntimeError> {
        if !self.literal.is_empty() {
            io.emit_line(&self.literal)?;
            self.clear_registers();
            return Ok(());
        }

        let mut line = Vec::new();
        for value in self.stack.drain() {
            match value {
                Value::Byte(b) => line.push(b),
                Value::Str(handle) => line.extend(self.heap.release(handle)),
            }
        }
        io.emit_line(&line)?;
        Ok(())
    }

    fn clear_registers(&mut self) {
        self.literal.clear();
        self.operand.clear();
    }

    fn render(&mut self, value: Value) -> Vec<u8> {
        match value {
            Value::Byte(b) => b.to_string().into_bytes(),
            Value::Str(handle) => self.heap.release(handle),
        }
    }

    fn load_var(&self, id: u8) -> Result<u8, Fault> {
        self.vars
            .get(&id)
            .copied()
            .ok_or(Fault::UndefinedVariable { id })
    }

    // =========================================================================
    // Modules
    // =========================================================================

    fn import(&mut self, name: &str) -> Result<(), RuntimeError> {
        if self.imported() == Some(name) {
            return Ok(());
        }
        let module = ModuleLoader::new(self.config).load_import(name)?;
        self.import_cache = Some((name.to_string(), module));
        Ok(())
    }

    fn call(&mut self, name: &str, io: &mut dyn HostIo) -> Result<(), RuntimeError> {
        if name.eq_ignore_ascii_case(BUILTIN_PRINT) {
            return self.print(io, "CALL print");
        }
        if name.eq_ignore_ascii_case(BUILTIN_PRINTNL) {
            return self.println(io);
        }

        let loader = ModuleLoader::new(self.config);
        if let Some(module) = loader.load_function(name)? {
            return self.run_nested(name, &module, io);
        }

        match &self.import_cache {
            Some((imported, module)) if !module.is_empty() => {
                debug!(function = name, module = %imported, "call served by imported module");
                self.run_nested(imported, module, io)
            }
            _ => Err(Fault::UnresolvedCall {
                name: name.to_string(),
                path: loader.function_path(name),
            }
            .into()),
        }
    }

    /// Runs `module` on a fresh VM one level deeper.
    fn run_nested(
        &self,
        name: &str,
        module: &Module,
        io: &mut dyn HostIo,
    ) -> Result<(), RuntimeError> {
        let limit = self.config.max_call_depth;
        if self.depth + 1 > limit {
            return Err(RuntimeError::from(Fault::CallDepthExceeded { limit }).with_context(name));
        }

        debug!(module = name, depth = self.depth + 1, "entering module");
        let mut sub = Vm::at_depth(self.config, self.depth + 1);
        sub.run_module(module, io)
            .map(|_| ())
            .map_err(|e| e.with_context(name))
    }
}

/// Leading integer of a line: optional whitespace, optional sign, digits.
/// Anything unparsable (or out of `i32` range) is 0.
fn parse_leading_int(line: &str) -> i32 {
    let s = line.trim_start();
    let (sign, digits) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());

    digits[..end]
        .parse::<i64>()
        .ok()
        .map(|v| v * sign)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}
