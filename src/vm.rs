//! Register-window virtual machine.
//!
//! A flat value stack holds every frame's registers; each call frame is a
//! 256-slot window starting at its base slot. Frames overlap Lua-style: a
//! callee's window begins right after the callee register in the caller's
//! window, which is also how arguments become the callee's first registers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use thiserror::Error;

use crate::bytecode::{
    Chunk, OpCode, RK_CONSTANT, SETLIST_BATCH, decode_a, decode_b, decode_bx, decode_c, decode_op,
    decode_sbx, format_instruction,
};
use crate::parser::source_line_at;
use crate::runtime::object::{Instance, ObjectMap, array_get, array_set, string_get};
use crate::runtime::value::{NativeFn, Value};

/// Flat stack size in value slots.
pub const STACK_SIZE: usize = 4096;

/// Register window of one call frame.
pub const FRAME_WINDOW: usize = 256;

/// Per-`run` instruction budget; the only escape from non-terminating
/// programs.
pub const EXECUTION_LIMIT: u64 = 1_000_000;

/// Host module loader registered under a name for `impor`.
pub type ModuleLoader = fn(&mut Vm) -> Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("[ERROR RUNTIME] Baris {line}: {message}")]
pub struct RuntimeError {
    pub message: String,
    pub line: u32,
    pub offset: u32,
}

struct CallFrame {
    chunk: Rc<Chunk>,
    pc: usize,
    base: usize,
    /// Caller register that receives the return value; `None` for entry
    /// frames and constructor calls, whose result must not be overwritten.
    return_reg: Option<u8>,
}

struct TryHandler {
    /// `frames.len()` when the handler was installed; recovery truncates
    /// back to this depth.
    frame_depth: usize,
    catch_pc: usize,
    /// Absolute stack slot that receives the error message.
    catch_slot: usize,
}

enum OutputSink {
    Stdout,
    Buffer(Vec<u8>),
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<String, Value>,
    handlers: Vec<TryHandler>,
    modules: HashMap<String, ModuleLoader>,
    source: String,
    last_result: Value,
    output: OutputSink,
    pub debug: bool,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            stack: vec![Value::Nil; STACK_SIZE],
            frames: Vec::new(),
            globals: HashMap::new(),
            handlers: Vec::new(),
            modules: HashMap::new(),
            source: String::new(),
            last_result: Value::Nil,
            output: OutputSink::Stdout,
            debug: false,
        };
        crate::builtins::install(&mut vm);
        vm
    }

    /// A VM whose program output is collected instead of written to
    /// stdout; read it back with [`Vm::take_output`].
    pub fn with_captured_output() -> Self {
        let mut vm = Self::new();
        vm.output = OutputSink::Buffer(Vec::new());
        vm
    }

    pub fn define_native(&mut self, name: &str, function: NativeFn) {
        self.globals.insert(name.to_string(), Value::Native(function));
    }

    pub fn register_module(&mut self, name: &str, loader: ModuleLoader) {
        self.modules.insert(name.to_string(), loader);
    }

    /// Resolves a registered host module by invoking its loader.
    pub fn load_module(&mut self, name: &str) -> Option<Value> {
        let loader = self.modules.get(name).copied()?;
        Some(loader(self))
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    pub fn last_result(&self) -> Value {
        self.last_result.clone()
    }

    pub fn write_output(&mut self, text: &str) {
        match &mut self.output {
            OutputSink::Stdout => {
                let mut stdout = io::stdout();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            OutputSink::Buffer(buffer) => buffer.extend_from_slice(text.as_bytes()),
        }
    }

    /// Drains the captured output buffer. Empty for stdout-backed VMs.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            OutputSink::Stdout => String::new(),
            OutputSink::Buffer(buffer) => {
                String::from_utf8_lossy(&std::mem::take(buffer)).into_owned()
            }
        }
    }

    /// Builds a runtime error located at the instruction the top frame is
    /// currently executing. Native functions use this to signal failure;
    /// the dispatch loop unwinds the current `run` with it.
    pub fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let (line, offset) = match self.frames.last() {
            Some(frame) => {
                let pc = frame.pc.min(frame.chunk.code.len().saturating_sub(1));
                (
                    frame.chunk.lines.get(pc).copied().unwrap_or(0),
                    frame.chunk.offsets.get(pc).copied().unwrap_or(0),
                )
            }
            None => (0, 0),
        };
        RuntimeError {
            message: message.into(),
            line,
            offset,
        }
    }

    /// Executes a compiled chunk. Re-entrant: native functions may call
    /// this recursively; the inner run returns once the frame depth drops
    /// back to its own entry depth. The chunk's final computed value is
    /// returned and also kept as `last_result`.
    pub fn interpret(&mut self, chunk: Rc<Chunk>, source: &str) -> Result<Value, RuntimeError> {
        if chunk.code.is_empty() {
            return Ok(Value::Nil);
        }

        let saved_source = std::mem::replace(&mut self.source, source.to_string());
        let base = match self.frames.last() {
            Some(frame) => frame.base + FRAME_WINDOW,
            None => {
                self.reset_stack();
                0
            }
        };
        if base + FRAME_WINDOW > self.stack.len() {
            self.source = saved_source;
            return Err(self.runtime_error("Batas rekursi tercapai (Interpret)"));
        }

        let entry_depth = self.frames.len();
        self.frames.push(CallFrame {
            chunk,
            pc: 0,
            base,
            return_reg: None,
        });

        let result = self.run(entry_depth);
        self.source = saved_source;
        result.map(|_| self.last_result.clone())
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.stack.resize(STACK_SIZE, Value::Nil);
        self.frames.clear();
        self.handlers.clear();
    }

    /// Fetch-decode-dispatch until the frame depth returns to
    /// `entry_depth`. Runtime errors first consult the try-handler stack;
    /// an unhandled error at the outermost run is reported with the full
    /// diagnostic before the stack is reset.
    fn run(&mut self, entry_depth: usize) -> Result<(), RuntimeError> {
        let mut executed: u64 = 0;
        loop {
            executed += 1;
            if executed > EXECUTION_LIMIT {
                // A blown budget is an abort, not a catchable error: it
                // bypasses try handlers entirely.
                let err = self.runtime_error(format!(
                    "Batas eksekusi tercapai ({EXECUTION_LIMIT} instruksi)"
                ));
                if entry_depth == 0 {
                    self.report_runtime_error(&err);
                    self.reset_stack();
                }
                return Err(err);
            }

            match self.step(entry_depth) {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Done) => return Ok(()),
                Err(err) => {
                    self.unwind(err, entry_depth)?;
                }
            }
        }
    }

    /// Recovers into the innermost live handler belonging to this run, or
    /// propagates the error (reporting + reset at the outermost run).
    fn unwind(&mut self, err: RuntimeError, entry_depth: usize) -> Result<(), RuntimeError> {
        if let Some(handler) = self.handlers.last()
            && handler.frame_depth > entry_depth
            && handler.frame_depth <= self.frames.len()
        {
            let handler = self.handlers.pop().expect("handler presence just checked");
            self.frames.truncate(handler.frame_depth);
            let frame = self.frames.last_mut().expect("handler frame is live");
            frame.pc = handler.catch_pc;
            self.stack[handler.catch_slot] = Value::from_string(&err.message);
            return Ok(());
        }

        if entry_depth == 0 {
            self.report_runtime_error(&err);
            self.reset_stack();
        }
        Err(err)
    }

    fn step(&mut self, entry_depth: usize) -> Result<StepOutcome, RuntimeError> {
        let frame = self.frames.last().expect("run with no frames");
        let chunk = Rc::clone(&frame.chunk);
        let base = frame.base;
        let mut pc = frame.pc;

        let Some(&instruction) = chunk.code.get(pc) else {
            return Err(self.runtime_error("Melampaui akhir chunk"));
        };
        let Some(op) = decode_op(instruction) else {
            return Err(self.runtime_error("Unknown opcode"));
        };

        if self.debug {
            eprintln!("[TRACE] {pc}: {}", format_instruction(instruction));
        }

        pc += 1;
        let a = decode_a(instruction) as usize;

        match op {
            OpCode::Move => {
                let b = decode_b(instruction) as usize;
                self.stack[base + a] = self.stack[base + b].clone();
            }
            OpCode::LoadK => {
                let bx = decode_bx(instruction) as usize;
                self.stack[base + a] = chunk.constants.get(bx).cloned().unwrap_or(Value::Nil);
            }
            OpCode::LoadBool => {
                self.stack[base + a] = Value::Bool(decode_b(instruction) != 0);
                if decode_c(instruction) != 0 {
                    pc += 1;
                }
            }
            OpCode::LoadNil => {
                let b = decode_b(instruction) as usize;
                for slot in 0..=b {
                    self.stack[base + a + slot] = Value::Nil;
                }
            }
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Pow => {
                let vb = self.rk(&chunk, base, decode_b(instruction));
                let vc = self.rk(&chunk, base, decode_c(instruction));
                match (&vb, &vc) {
                    (Value::Number(x), Value::Number(y)) => {
                        let result = match op {
                            OpCode::Add => x + y,
                            OpCode::Sub => x - y,
                            OpCode::Mul => x * y,
                            // IEEE-754: division by zero is inf/nan, not
                            // an error.
                            OpCode::Div => x / y,
                            OpCode::Mod => x % y,
                            OpCode::Pow => x.powf(*y),
                            _ => unreachable!(),
                        };
                        self.stack[base + a] = Value::Number(result);
                    }
                    _ if op == OpCode::Add
                        && (matches!(vb, Value::Str(_)) || matches!(vc, Value::Str(_))) =>
                    {
                        let joined = format!("{}{}", vb.to_output(), vc.to_output());
                        self.stack[base + a] = Value::from_string(joined);
                    }
                    _ if matches!(vb, Value::Instance(_)) || matches!(vc, Value::Instance(_)) => {
                        self.arith_metamethod(op, a, vb.clone(), vc.clone(), base, pc)?;
                        return Ok(StepOutcome::Continue);
                    }
                    _ => {
                        return Err(self.runtime_error(format!(
                            "Operan aritmatika tidak valid ({} dan {})",
                            vb.type_name(),
                            vc.type_name()
                        )));
                    }
                }
            }
            OpCode::Unm => {
                let b = decode_b(instruction) as usize;
                match &self.stack[base + b] {
                    Value::Number(n) => self.stack[base + a] = Value::Number(-n),
                    other => {
                        return Err(self.runtime_error(format!(
                            "Operan negasi harus angka, bukan {}",
                            other.type_name()
                        )));
                    }
                }
            }
            OpCode::Not => {
                let b = decode_b(instruction) as usize;
                let truthy = self.stack[base + b].is_truthy();
                self.stack[base + a] = Value::Bool(!truthy);
            }
            OpCode::BNot => {
                let b = decode_b(instruction) as usize;
                match &self.stack[base + b] {
                    Value::Number(n) => {
                        self.stack[base + a] = Value::Number(!(*n as i64) as f64);
                    }
                    other => {
                        return Err(self.runtime_error(format!(
                            "Operan bitwise harus angka, bukan {}",
                            other.type_name()
                        )));
                    }
                }
            }
            OpCode::BAnd | OpCode::BOr | OpCode::BXor | OpCode::Shl | OpCode::Shr => {
                let vb = self.rk(&chunk, base, decode_b(instruction));
                let vc = self.rk(&chunk, base, decode_c(instruction));
                let (Value::Number(x), Value::Number(y)) = (&vb, &vc) else {
                    return Err(self.runtime_error(format!(
                        "Operan bitwise harus angka ({} dan {})",
                        vb.type_name(),
                        vc.type_name()
                    )));
                };
                let (x, y) = (*x as i64, *y as i64);
                let result = match op {
                    OpCode::BAnd => x & y,
                    OpCode::BOr => x | y,
                    OpCode::BXor => x ^ y,
                    OpCode::Shl => x.wrapping_shl(y as u32 & 63),
                    // Arithmetic shift: the sign bit propagates.
                    OpCode::Shr => x.wrapping_shr(y as u32 & 63),
                    _ => unreachable!(),
                };
                self.stack[base + a] = Value::Number(result as f64);
            }
            OpCode::Eq | OpCode::Lt | OpCode::Le => {
                let vb = self.rk(&chunk, base, decode_b(instruction));
                let vc = self.rk(&chunk, base, decode_c(instruction));
                let result = match op {
                    OpCode::Eq => vb.equals(&vc),
                    _ => match (&vb, &vc) {
                        (Value::Number(x), Value::Number(y)) => {
                            if op == OpCode::Lt {
                                x < y
                            } else {
                                x <= y
                            }
                        }
                        (Value::Str(x), Value::Str(y)) => {
                            if op == OpCode::Lt {
                                x < y
                            } else {
                                x <= y
                            }
                        }
                        _ => false,
                    },
                };
                if result != (a != 0) {
                    pc += 1;
                }
            }
            OpCode::Jmp => {
                pc = offset_pc(pc, decode_sbx(instruction));
            }
            OpCode::Test => {
                let truthy = self.stack[base + a].is_truthy();
                if truthy != (decode_c(instruction) != 0) {
                    pc += 1;
                }
            }
            OpCode::TestSet => {
                let b = decode_b(instruction) as usize;
                let value = self.stack[base + b].clone();
                if value.is_truthy() == (decode_c(instruction) != 0) {
                    self.stack[base + a] = value;
                } else {
                    pc += 1;
                }
            }
            OpCode::GetGlobal => {
                let bx = decode_bx(instruction) as usize;
                if let Some(Value::Str(name)) = chunk.constants.get(bx) {
                    match self.globals.get(name.as_ref()) {
                        Some(value) => self.stack[base + a] = value.clone(),
                        None => {
                            if self.debug {
                                eprintln!("[DEBUG] Global tidak ditemukan: '{name}'");
                            }
                            self.stack[base + a] = Value::Nil;
                        }
                    }
                }
            }
            OpCode::SetGlobal => {
                let bx = decode_bx(instruction) as usize;
                if let Some(Value::Str(name)) = chunk.constants.get(bx) {
                    let name = name.to_string();
                    self.globals.insert(name, self.stack[base + a].clone());
                }
            }
            OpCode::Call => {
                self.frames.last_mut().expect("frame is live").pc = pc;
                let nargs = (decode_b(instruction) as usize).saturating_sub(1);
                self.call_value(a, nargs, base)?;
                return Ok(StepOutcome::Continue);
            }
            OpCode::Return => {
                let nresults = decode_b(instruction) as usize;
                let result = if nresults > 1 {
                    self.stack[base + a].clone()
                } else {
                    Value::Nil
                };

                let finished = self.frames.pop().expect("returning frame is live");
                while self
                    .handlers
                    .last()
                    .is_some_and(|handler| handler.frame_depth > self.frames.len())
                {
                    self.handlers.pop();
                }

                if self.frames.len() == entry_depth {
                    self.last_result = result;
                    return Ok(StepOutcome::Done);
                }
                if let Some(return_reg) = finished.return_reg {
                    let caller_base = self.frames.last().expect("caller frame is live").base;
                    self.stack[caller_base + return_reg as usize] = result;
                }
                return Ok(StepOutcome::Continue);
            }
            OpCode::GetTable => {
                let b = decode_b(instruction) as usize;
                let object = self.stack[base + b].clone();
                let key = self.rk(&chunk, base, decode_c(instruction));
                self.stack[base + a] = self.table_get(&object, &key)?;
            }
            OpCode::SetTable => {
                let object = self.stack[base + a].clone();
                let key = self.rk(&chunk, base, decode_b(instruction));
                let value = self.rk(&chunk, base, decode_c(instruction));
                self.table_set(&object, &key, value)?;
            }
            OpCode::NewTable => {
                self.stack[base + a] = Value::new_object(ObjectMap::new());
            }
            OpCode::NewArray => {
                let capacity = decode_b(instruction) as usize;
                self.stack[base + a] = Value::Array(Rc::new(RefCell::new(Vec::with_capacity(
                    capacity,
                ))));
            }
            OpCode::NewClass => {
                let bx = decode_bx(instruction) as usize;
                let name = match chunk.constants.get(bx) {
                    Some(Value::Str(name)) => name.to_string(),
                    _ => String::new(),
                };
                self.stack[base + a] = Value::Class(Rc::new(RefCell::new(
                    crate::runtime::object::Class::new(name),
                )));
            }
            OpCode::SetList => {
                let count = decode_b(instruction) as usize;
                let batch = decode_c(instruction) as usize;
                let Value::Array(elements) = self.stack[base + a].clone() else {
                    return Err(self.runtime_error("SETLIST pada nilai yang bukan array"));
                };
                for j in 1..=count {
                    let index = ((batch - 1) * SETLIST_BATCH + j) as f64;
                    let value = self.stack[base + a + j].clone();
                    array_set(&mut elements.borrow_mut(), index, value)
                        .map_err(|msg| self.runtime_error(msg))?;
                }
            }
            OpCode::GetSlice => {
                let b = decode_b(instruction) as usize;
                let object = self.stack[base + b].clone();
                let start = self.rk(&chunk, base, decode_c(instruction));
                let Some(&end_word) = chunk.code.get(pc) else {
                    return Err(self.runtime_error("Chunk terpotong (GETSLICE)"));
                };
                pc += 1;
                let end = self.rk(&chunk, base, end_word as u16);

                self.stack[base + a] = match object {
                    Value::Array(elements) => {
                        let elements = elements.borrow();
                        let len = elements.len() as i64;
                        let s = match start {
                            Value::Nil => 1,
                            Value::Number(n) => n as i64,
                            _ => 1,
                        }
                        .max(1);
                        let e = match end {
                            Value::Nil => len,
                            Value::Number(n) => n as i64,
                            _ => len,
                        }
                        .min(len);
                        if e >= s {
                            let slice: Vec<Value> =
                                elements[(s - 1) as usize..e as usize].to_vec();
                            Value::new_array(slice)
                        } else {
                            Value::new_array(Vec::new())
                        }
                    }
                    _ => Value::Nil,
                };
            }
            OpCode::Try => {
                self.handlers.push(TryHandler {
                    frame_depth: self.frames.len(),
                    catch_pc: offset_pc(pc, decode_sbx(instruction)),
                    catch_slot: base + a,
                });
            }
            OpCode::EndTry => {
                self.handlers.pop();
            }
        }

        self.frames.last_mut().expect("frame is live").pc = pc;
        Ok(StepOutcome::Continue)
    }

    /// CALL dispatch on the callee tag: native invocation, bytecode frame
    /// push, or class construction.
    fn call_value(&mut self, a: usize, nargs: usize, base: usize) -> Result<(), RuntimeError> {
        let callee = self.stack[base + a].clone();
        match callee {
            Value::Native(function) => {
                let args: Vec<Value> =
                    self.stack[base + a + 1..base + a + 1 + nargs].to_vec();
                let result = function(self, &args)?;
                // The native's result lands in the callee's own register.
                self.stack[base + a] = result;
                Ok(())
            }
            Value::Function(chunk) => {
                let next_base = base + a + 1;
                if next_base + FRAME_WINDOW > self.stack.len() {
                    return Err(self.runtime_error("Tumpukan Meluap (Stack Overflow)"));
                }
                self.frames.push(CallFrame {
                    chunk,
                    pc: 0,
                    base: next_base,
                    return_reg: Some(a as u8),
                });
                Ok(())
            }
            Value::Class(class) => {
                let instance =
                    Value::Instance(Rc::new(RefCell::new(Instance::new(Rc::clone(&class)))));
                let initializer = class.borrow().methods.get("inisiasi");
                match initializer {
                    Some(Value::Function(chunk)) => {
                        // `self` sits in the callee register, making it
                        // R(0) of the constructor frame; the arguments are
                        // already in place after it. The constructor's
                        // return value is discarded so the instance
                        // survives in R(A).
                        let next_base = base + a;
                        if next_base + FRAME_WINDOW > self.stack.len() {
                            return Err(self.runtime_error("Tumpukan Meluap (Stack Overflow)"));
                        }
                        self.stack[base + a] = instance;
                        self.frames.push(CallFrame {
                            chunk,
                            pc: 0,
                            base: next_base,
                            return_reg: None,
                        });
                        Ok(())
                    }
                    _ => {
                        self.stack[base + a] = instance;
                        Ok(())
                    }
                }
            }
            other => Err(self.runtime_error(format!(
                "Panggilan ke non-fungsi (tipe {})",
                other.tag()
            ))),
        }
    }

    /// Dispatches `__jumlah`/`__kurang`/`__kali`/`__bagi` on an instance
    /// operand as a regular bytecode call whose result replaces R(A).
    fn arith_metamethod(
        &mut self,
        op: OpCode,
        a: usize,
        vb: Value,
        vc: Value,
        base: usize,
        pc: usize,
    ) -> Result<(), RuntimeError> {
        let method_name = match op {
            OpCode::Add => "__jumlah",
            OpCode::Sub => "__kurang",
            OpCode::Mul => "__kali",
            OpCode::Div => "__bagi",
            _ => {
                return Err(self.runtime_error(format!(
                    "Operan aritmatika tidak valid ({} dan {})",
                    vb.type_name(),
                    vc.type_name()
                )));
            }
        };

        let instance = match (&vb, &vc) {
            (Value::Instance(instance), _) | (_, Value::Instance(instance)) => Rc::clone(instance),
            _ => unreachable!("caller checked for an instance operand"),
        };
        let method = instance.borrow().class.borrow().methods.get(method_name);
        let Some(Value::Function(chunk)) = method else {
            return Err(self.runtime_error(format!(
                "Metamethod '{method_name}' tidak ditemukan pada objek"
            )));
        };

        let next_base = base + a + 1;
        if next_base + FRAME_WINDOW > self.stack.len() {
            return Err(self.runtime_error("Tumpukan Meluap (Stack Overflow)"));
        }
        self.frames.last_mut().expect("frame is live").pc = pc;
        self.stack[base + a + 1] = vb;
        self.stack[base + a + 2] = vc;
        self.frames.push(CallFrame {
            chunk,
            pc: 0,
            base: next_base,
            return_reg: Some(a as u8),
        });
        Ok(())
    }

    /// GETTABLE dispatch over the container tag.
    fn table_get(&self, object: &Value, key: &Value) -> Result<Value, RuntimeError> {
        match object {
            Value::Nil => Err(self.runtime_error("Mencoba mengakses properti pada 'nil'")),
            Value::Object(map) => match key {
                Value::Str(name) => Ok(map.borrow().get(name).unwrap_or(Value::Nil)),
                _ => Err(self.runtime_error("Kunci properti harus string")),
            },
            Value::Instance(instance) => match key {
                Value::Str(name) => {
                    let instance = instance.borrow();
                    // Fields shadow class methods.
                    if let Some(value) = instance.fields.get(name)
                        && !matches!(value, Value::Nil)
                    {
                        return Ok(value);
                    }
                    Ok(instance
                        .class
                        .borrow()
                        .methods
                        .get(name)
                        .unwrap_or(Value::Nil))
                }
                _ => Err(self.runtime_error("Kunci properti harus string")),
            },
            Value::Class(class) => match key {
                Value::Str(name) => Ok(class.borrow().methods.get(name).unwrap_or(Value::Nil)),
                _ => Err(self.runtime_error("Kunci properti harus string")),
            },
            Value::Array(elements) => match key {
                Value::Number(index) => Ok(array_get(&elements.borrow(), *index)),
                _ => Err(self.runtime_error("Indeks array harus angka")),
            },
            Value::Str(s) => match key {
                Value::Number(index) => Ok(string_get(s, *index)),
                _ => Err(self.runtime_error("Indeks string harus angka")),
            },
            _ => Err(self.runtime_error(
                "Tipe tidak dapat di-index (bukan array/objek/string)",
            )),
        }
    }

    /// SETTABLE dispatch, mirroring `table_get`.
    fn table_set(&self, object: &Value, key: &Value, value: Value) -> Result<(), RuntimeError> {
        match object {
            Value::Nil => Err(self.runtime_error("Mencoba mengubah properti pada 'nil'")),
            Value::Object(map) => match key {
                Value::Str(name) => {
                    map.borrow_mut().set(name, value);
                    Ok(())
                }
                _ => Err(self.runtime_error("Kunci properti harus string")),
            },
            Value::Instance(instance) => match key {
                Value::Str(name) => {
                    instance.borrow_mut().fields.set(name, value);
                    Ok(())
                }
                _ => Err(self.runtime_error("Kunci properti harus string")),
            },
            Value::Class(class) => match key {
                Value::Str(name) => {
                    class.borrow_mut().methods.set(name, value);
                    Ok(())
                }
                _ => Err(self.runtime_error("Kunci properti harus string")),
            },
            Value::Array(elements) => match key {
                Value::Number(index) => array_set(&mut elements.borrow_mut(), *index, value)
                    .map_err(|msg| self.runtime_error(msg)),
                _ => Err(self.runtime_error("Indeks array harus angka")),
            },
            _ => Err(self.runtime_error("Tipe tidak dapat diubah lewat indeks")),
        }
    }

    fn rk(&self, chunk: &Chunk, base: usize, operand: u16) -> Value {
        if operand < RK_CONSTANT {
            self.stack[base + operand as usize].clone()
        } else {
            chunk
                .constants
                .get((operand - RK_CONSTANT) as usize)
                .cloned()
                .unwrap_or(Value::Nil)
        }
    }

    /// Full diagnostic on stderr: header, source caret, register dump
    /// window and the frame-by-frame stack trace.
    fn report_runtime_error(&self, err: &RuntimeError) {
        eprintln!("\n[ERROR RUNTIME] Baris {}", err.line);

        if !self.source.is_empty() {
            let (line_text, column) = source_line_at(&self.source, err.offset as usize);
            eprintln!("  {line_text}");
            let mut caret = String::from("  ");
            for c in line_text.chars().take(column) {
                caret.push(if c == '\t' { '\t' } else { ' ' });
            }
            caret.push('^');
            eprintln!("{caret}");
        }

        eprintln!("-> {}", err.message);

        if let Some(frame) = self.frames.last() {
            eprintln!("\nRegister Dump (base={}):", frame.base);
            for j in 0..16 {
                let value = &self.stack[frame.base + j];
                eprintln!("  R({j}): tipe={}, val={}", value.tag(), value.to_output());
            }
        }

        eprintln!("\nJejak tumpukan (Stack Trace):");
        for frame in self.frames.iter().rev() {
            let pc = frame.pc.saturating_sub(1);
            let line = frame.chunk.lines.get(pc).copied().unwrap_or(0);
            let name = if frame.chunk.name.is_empty() {
                "<anonim>"
            } else {
                &frame.chunk.name
            };
            eprintln!("  pada {name} (baris {line})");
        }
        eprintln!();
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

enum StepOutcome {
    Continue,
    Done,
}

fn offset_pc(pc: usize, sbx: i32) -> usize {
    (pc as i64 + sbx as i64).max(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::parser::parse_source;
    use indoc::indoc;

    fn run_source(source: &str) -> Result<String, RuntimeError> {
        let parsed = parse_source(source);
        assert!(!parsed.had_error, "parse failed: {:?}", parsed.diagnostics);
        let chunk = compile(&parsed.statements, "uji").expect("compile should succeed");
        let mut vm = Vm::with_captured_output();
        vm.interpret(chunk, source)?;
        Ok(vm.take_output())
    }

    fn expect_output(source: &str, expected: &str) {
        let output = run_source(source).expect("program should run");
        assert_eq!(output, expected, "source:\n{source}");
    }

    #[test]
    fn arithmetic_precedence_end_to_end() {
        expect_output("lokal x = 1 + 2 * 3  println(x)", "7\n");
    }

    #[test]
    fn for_loop_counts_inclusive() {
        expect_output("untuk i = 1 ke 3 lakukan println(i) tutup", "1\n2\n3\n");
    }

    #[test]
    fn for_loop_honors_step() {
        expect_output(
            "untuk i = 1 ke 7 langkah 3 lakukan println(i) tutup",
            "1\n4\n7\n",
        );
    }

    #[test]
    fn function_call_returns_value() {
        expect_output(
            "fungsi tambah(a,b) kembali a+b tutup  println(tambah(10,20))",
            "30\n",
        );
    }

    #[test]
    fn recursion_computes_factorial() {
        expect_output(
            indoc! {"
                fungsi fakt(n)
                    jika n <= 1 maka kembali 1 tutup
                    kembali n * fakt(n-1)
                tutup
                println(fakt(5))
            "},
            "120\n",
        );
    }

    #[test]
    fn arrays_are_one_based() {
        expect_output(
            "lokal a = [10, 20, 30]  println(a[2])  println(a[1] + a[3])",
            "20\n40\n",
        );
    }

    #[test]
    fn out_of_range_array_reads_are_nil() {
        expect_output(
            "lokal a = [10]  println(a[0])  println(a[2])",
            "nil\nnil\n",
        );
    }

    #[test]
    fn object_literal_field_access() {
        expect_output(
            "lokal o = {nama: \"Ada\", usia: 36}  println(o.nama)  println(o.usia + 1)",
            "Ada\n37\n",
        );
    }

    #[test]
    fn if_else_takes_true_branch() {
        expect_output(
            "jika 2 > 1 maka println(\"ya\") sebaliknya println(\"tidak\") tutup",
            "ya\n",
        );
    }

    #[test]
    fn string_concatenation() {
        expect_output("lokal s = \"halo\" + \" \" + \"dunia\"  println(s)", "halo dunia\n");
    }

    #[test]
    fn while_loop_runs_until_condition_fails() {
        expect_output(
            indoc! {"
                lokal i = 0
                selama i < 3 lakukan
                    i = i + 1
                    println(i)
                tutup
            "},
            "1\n2\n3\n",
        );
    }

    #[test]
    fn truthiness_of_not() {
        expect_output(
            indoc! {"
                println(!nil)
                println(!salah)
                println(!0)
                println(!1)
                println(!\"\")
                println(!!42)
            "},
            "true\ntrue\ntrue\nfalse\nfalse\ntrue\n",
        );
    }

    #[test]
    fn logical_and_short_circuits() {
        expect_output(
            indoc! {"
                fungsi efek() println(\"dipanggil\") kembali benar tutup
                lokal a = salah dan efek()
                println(a)
                lokal b = benar atau efek()
                println(b)
            "},
            "false\ntrue\n",
        );
    }

    #[test]
    fn logical_operators_evaluate_right_side_when_needed() {
        expect_output(
            indoc! {"
                println(benar dan 5)
                println(salah atau \"cadangan\")
                println(nil atau nil)
            "},
            "5\ncadangan\nnil\n",
        );
    }

    #[test]
    fn for_loop_variable_is_scoped() {
        expect_output(
            indoc! {"
                lokal i = 99
                untuk i = 1 ke 2 lakukan tutup
                println(i)
            "},
            "99\n",
        );
    }

    #[test]
    fn class_with_initializer_and_method() {
        expect_output(
            indoc! {"
                kelas Titik maka
                    fungsi inisiasi(x, y)
                        self.x = x
                        self.y = y
                    tutup
                    fungsi jumlah()
                        kembali self.x + self.y
                    tutup
                tutup
                lokal t = Titik(3, 4)
                println(t.x)
                println(t.jumlah())
            "},
            "3\n7\n",
        );
    }

    #[test]
    fn arithmetic_metamethod_on_instances() {
        expect_output(
            indoc! {"
                kelas Uang maka
                    fungsi inisiasi(n) self.n = n tutup
                    fungsi __jumlah(lain) kembali self.n + lain.n tutup
                tutup
                println(Uang(2) + Uang(3))
            "},
            "5\n",
        );
    }

    #[test]
    fn try_catch_recovers_with_message() {
        expect_output(
            indoc! {"
                coba
                    lokal x = nil
                    println(x.panjang)
                tangkap pesan
                    println(\"tertangkap\")
                    println(pesan)
                tutup
                println(\"lanjut\")
            "},
            "tertangkap\nMencoba mengakses properti pada 'nil'\nlanjut\n",
        );
    }

    #[test]
    fn try_without_error_skips_catch() {
        expect_output(
            indoc! {"
                coba
                    println(\"aman\")
                tangkap e
                    println(\"tidak sampai\")
                tutup
            "},
            "aman\n",
        );
    }

    #[test]
    fn try_catches_error_raised_inside_function() {
        expect_output(
            indoc! {"
                fungsi meledak()
                    kembali nil.apa
                tutup
                coba
                    meledak()
                tangkap e
                    println(\"pulih\")
                tutup
            "},
            "pulih\n",
        );
    }

    #[test]
    fn calling_non_function_is_a_runtime_error() {
        let err = run_source("lokal x = 5 x()").expect_err("call must fail");
        assert!(err.message.contains("Panggilan ke non-fungsi"));
    }

    #[test]
    fn runaway_loop_hits_execution_budget() {
        let err = run_source("selama benar lakukan tutup").expect_err("must abort");
        assert!(err.message.contains("Batas eksekusi"));
    }

    #[test]
    fn deep_recursion_overflows_the_stack() {
        let err = run_source(indoc! {"
            fungsi turun(n) kembali turun(n + 1) tutup
            turun(1)
        "})
        .expect_err("must overflow");
        assert!(err.message.contains("Tumpukan Meluap"));
    }

    #[test]
    fn shift_and_bitwise_operators() {
        expect_output(
            indoc! {"
                println(1 << 4)
                println(-8 >> 1)
                println(6 & 3)
                println(6 | 3)
                println(6 ^ 3)
                println(~0)
            "},
            "16\n-4\n2\n7\n5\n-1\n",
        );
    }

    #[test]
    fn compound_assignment_forms() {
        expect_output(
            indoc! {"
                lokal x = 10
                x += 5
                x -= 3
                x *= 2
                x /= 4
                x %= 4
                println(x)
            "},
            "2\n",
        );
    }

    #[test]
    fn string_indexing_is_one_based() {
        expect_output(
            "lokal s = \"halo\" println(s[1]) println(s[4]) println(s[9])",
            "h\no\nnil\n",
        );
    }

    #[test]
    fn array_slices() {
        expect_output(
            indoc! {"
                lokal a = [1, 2, 3, 4, 5]
                println(a[2:4])
                println(a[:2])
                println(a[4:])
                println(a[:])
            "},
            "[2, 3, 4]\n[1, 2]\n[4, 5]\n[1, 2, 3, 4, 5]\n",
        );
    }

    #[test]
    fn auto_growing_array_write() {
        expect_output(
            indoc! {"
                lokal a = [1]
                a[4] = 9
                println(a)
            "},
            "[1, nil, nil, 9]\n",
        );
    }

    #[test]
    fn object_keys_iterate_in_insertion_order() {
        expect_output(
            indoc! {"
                lokal o = {b: 1, a: 2}
                o.c = 3
                o.b = 9
                println(o)
            "},
            "{b: 9, a: 2, c: 3}\n",
        );
    }

    #[test]
    fn function_expression_assigned_to_local() {
        expect_output(
            "lokal dua_kali = fungsi(n) kembali n * 2 tutup println(dua_kali(21))",
            "42\n",
        );
    }

    #[test]
    fn division_by_zero_follows_ieee() {
        expect_output("println(1 / 0)", "inf\n");
    }

    #[test]
    fn last_result_carries_final_expression_value() {
        let source = "1 + 2";
        let parsed = parse_source(source);
        let chunk = compile(&parsed.statements, "uji").unwrap();
        let mut vm = Vm::with_captured_output();
        vm.interpret(chunk, source).unwrap();
        // Statement results are discarded; the chunk returns nil.
        assert!(matches!(vm.last_result(), Value::Nil));
    }

    #[test]
    fn native_functions_receive_args_and_return() {
        fn twice(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
            match args.first() {
                Some(Value::Number(n)) => Ok(Value::Number(n * 2.0)),
                _ => Ok(Value::Nil),
            }
        }
        let mut vm = Vm::with_captured_output();
        vm.define_native("gandakan", twice);

        let source = "println(gandakan(21))";
        let parsed = parse_source(source);
        let chunk = compile(&parsed.statements, "uji").unwrap();
        vm.interpret(chunk, source).unwrap();
        assert_eq!(vm.take_output(), "42\n");
    }

    #[test]
    fn registered_module_is_importable() {
        fn host_module(_vm: &mut Vm) -> Value {
            let mut map = ObjectMap::new();
            map.set("versi", Value::Number(3.0));
            Value::new_object(map)
        }
        let mut vm = Vm::with_captured_output();
        vm.register_module("info", host_module);

        let source = "lokal m = impor(\"info\") println(m.versi)";
        let parsed = parse_source(source);
        let chunk = compile(&parsed.statements, "uji").unwrap();
        vm.interpret(chunk, source).unwrap();
        assert_eq!(vm.take_output(), "3\n");
    }

    #[test]
    fn missing_module_import_errors() {
        let err = run_source("impor(\"tidak-ada\")").expect_err("import must fail");
        assert!(err.message.contains("Modul tidak ditemukan"));
    }

    #[test]
    fn method_called_as_free_function_gets_no_receiver() {
        // Without the method-call form there is no implicit receiver: the
        // explicit argument lands in the `self` slot.
        expect_output(
            indoc! {"
                kelas K maka
                    fungsi diri() kembali self tutup
                tutup
                lokal k = K()
                lokal bebas = k.diri
                println(bebas(7))
            "},
            "7\n",
        );
    }

    #[test]
    fn global_functions_see_later_globals() {
        expect_output(
            indoc! {"
                fungsi panggil() kembali nilai tutup
                nilai = 5
                println(panggil())
            "},
            "5\n",
        );
    }
}
