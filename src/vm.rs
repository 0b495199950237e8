//! The virtual machine.
//!
//! A cooperative, single-threaded fetch/decode/execute loop over the code
//! segment of a loaded [`Executable`](struct.Executable.html). The VM owns
//! the value stack, the global chunk memory, the current error handler and
//! the pause flag; blocking only ever happens inside the injected
//! [`InputSource`](trait.InputSource.html).

use crate::address;
use crate::error::{RuntimeError, VmError};
use crate::executable::Executable;
use crate::io::{InputSource, OutputSink};
use crate::library::Library;
use crate::memory::Memory;
use crate::opcodes::{mnemonic, type_tag, Opcode};
use crate::stack::Stack;
use crate::symbol::SymbolKind;
use crate::types::Type;
use crate::value::Value;
use crate::Word;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

/// One live FOR loop. `FOR` pops step and limit and pushes a frame; `NEXT`
/// steps the variable and jumps back to `body` while the loop condition
/// holds.
struct ForFrame {
    addr: u32,
    limit: f64,
    step: f64,
    body: usize,
}

pub struct Vm {
    executable: Option<Arc<Executable>>,
    stack: Stack,
    /// Instruction pointer; `None` once execution has terminated.
    cptr: Option<usize>,
    current_line: u32,
    request_pause: bool,
    mem: Memory,
    library: Library,
    error_handler: u32,
    /// Microseconds to sleep after each instruction.
    slowdown: u32,
    for_frames: Vec<ForFrame>,
}

impl Vm {
    pub fn new(input: Arc<dyn InputSource>, out: Arc<dyn OutputSink>) -> Vm {
        Vm {
            executable: None,
            stack: Stack::new(),
            cptr: None,
            current_line: 0,
            request_pause: false,
            mem: Memory::new(),
            library: Library::new(input, out),
            error_handler: 0,
            slowdown: 0,
            for_frames: Vec::new(),
        }
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Loads an executable: resets the code pointer and sets up global
    /// memory with the chunk count declared by the `ENTRY` header. Does not
    /// clear the stack.
    pub fn load(&mut self, x: Arc<Executable>) {
        self.current_line = 0;
        self.for_frames.clear();
        let code = x.code();
        if code.len() >= 2 && mnemonic(code[0]) == Some(Opcode::ENTRY) {
            self.mem.reset(code[1]);
            self.cptr = Some(2);
        } else {
            self.mem.reset(0);
            self.cptr = None;
        }
        self.executable = Some(x);
    }

    pub fn is_executable_loaded(&self) -> bool {
        self.executable.is_some()
    }

    /// Runs the loaded executable from the top until halt or pause.
    pub fn run(&mut self) -> Result<(), VmError> {
        let runnable = match self.executable.as_ref() {
            Some(x) => x.code().len() >= 2,
            None => return Ok(()),
        };
        self.error_handler = 0;
        self.cptr = if runnable { Some(2) } else { None };
        self.stack.clear();
        self.for_frames.clear();
        self.exec_loop(0)
    }

    /// Convenience: load and run.
    pub fn run_executable(&mut self, x: Arc<Executable>) -> Result<(), VmError> {
        self.load(x);
        self.run()
    }

    /// Requests a cooperative pause; observed before the next fetch.
    pub fn pause(&mut self) {
        self.request_pause = true;
    }

    pub fn is_paused(&self) -> bool {
        self.request_pause && self.resumable()
    }

    /// Re-enters the execution loop at the current code pointer.
    pub fn resume(&mut self) -> Result<(), VmError> {
        if self.resumable() {
            self.exec_loop(0)
        } else {
            Ok(())
        }
    }

    fn resumable(&self) -> bool {
        match (self.cptr, self.executable.as_ref()) {
            (Some(pc), Some(x)) => match x.code().get(pc) {
                Some(word) => mnemonic(*word) != Some(Opcode::END),
                None => false,
            },
            _ => false,
        }
    }

    /// Reads a variable or constant by symbol name; intended for hosts
    /// inspecting state while the VM is paused.
    pub fn value_of(&self, kind: SymbolKind, name: &str, index: i32) -> Value {
        let x = match self.executable.as_ref() {
            Some(x) => x,
            None => return Value::Invalid,
        };
        let symbol = match x.find_symbol(name, kind) {
            Some(s) => s,
            None => return Value::Invalid,
        };
        let addr = address::index(symbol.address());
        match kind {
            SymbolKind::Variable => self
                .mem
                .value(addr, index)
                .cloned()
                .unwrap_or(Value::Invalid),
            SymbolKind::Constant => x.constant(addr, index).unwrap_or(Value::Invalid),
            SymbolKind::Function => Value::Invalid,
        }
    }

    pub fn set_slowdown(&mut self, microseconds: u32) {
        self.slowdown = microseconds;
    }

    pub fn slowdown(&self) -> u32 {
        self.slowdown
    }

    /// Points the library at a disk directory and resets its file state.
    pub fn set_disk(&mut self, path: &str) {
        self.library.reset();
        self.library.set_disk(path);
    }

    pub fn hires_page(&self) -> &[u8] {
        self.library.hires_page()
    }

    pub fn chained_file(&self) -> &str {
        self.library.chained_file()
    }

    #[cfg(test)]
    pub(crate) fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    #[cfg(test)]
    pub(crate) fn memory(&self) -> &Memory {
        &self.mem
    }

    fn exec_loop(&mut self, depth: u32) -> Result<(), VmError> {
        self.request_pause = false;
        loop {
            if self.request_pause || self.cptr.is_none() {
                return Ok(());
            }
            if let Err(err) = self.step() {
                if self.error_handler != 0 && depth < 1 {
                    debug!("dispatching to error handler: {}", err);
                    self.cptr = Some(self.error_handler as usize);
                    return self.exec_loop(depth + 1);
                }
                return Err(VmError {
                    line: self.current_line,
                    offset: self.cptr.unwrap_or(0),
                    source: err,
                });
            }
            if self.slowdown > 0 {
                std::thread::sleep(Duration::from_micros(u64::from(self.slowdown)));
            }
        }
    }

    /// Executes a single instruction.
    fn step(&mut self) -> Result<(), RuntimeError> {
        let op = self.fetch()?;
        let opcode = mnemonic(op).ok_or(RuntimeError::UnknownOpcode(op))?;
        match opcode {
            Opcode::NOP | Opcode::ENTRY => {}
            Opcode::PUSH => self.op_push(op)?,
            Opcode::POP => {
                self.stack.pop()?;
            }
            Opcode::DUP => {
                let v = self.stack.pop()?;
                self.stack.push(v.clone());
                self.stack.push(v);
            }
            Opcode::SWAP => self.stack.swap()?,
            Opcode::STO => self.op_store(op, false)?,
            Opcode::STOI => self.op_store(op, true)?,
            Opcode::RCL => self.op_recall(op, false)?,
            Opcode::RCLI => self.op_recall(op, true)?,
            Opcode::CLR => self.op_clr(op)?,
            Opcode::RSZ => self.op_rsz(op)?,
            Opcode::INC => self.op_incdec(true)?,
            Opcode::DEC => self.op_incdec(false)?,
            Opcode::ARIADD
            | Opcode::ARISUB
            | Opcode::ARIMUL
            | Opcode::ARIDIV
            | Opcode::ARIMOD => self.op_ari(opcode)?,
            Opcode::ARIEQ
            | Opcode::ARINE
            | Opcode::ARIGE
            | Opcode::ARILE
            | Opcode::ARIGT
            | Opcode::ARILT => self.op_cmp(opcode)?,
            Opcode::ARIAND | Opcode::ARIOR => self.op_bit(opcode)?,
            Opcode::ARINOT => {
                let v = self.stack.pop()?;
                self.stack.push(v.logical_not()?);
            }
            Opcode::AND | Opcode::OR => self.op_logic(opcode)?,
            Opcode::NEG => {
                let mut v = self.stack.pop()?;
                v.negate()?;
                self.stack.push(v);
            }
            Opcode::CAST => self.op_cast(op)?,
            Opcode::JUMP => {
                let target = self.fetch()?;
                self.cptr = Some(target as usize);
            }
            Opcode::JZ => {
                let target = self.fetch()?;
                if self.stack.pop()?.as_int()? == 0 {
                    self.cptr = Some(target as usize);
                }
            }
            Opcode::JNZ => {
                let target = self.fetch()?;
                if self.stack.pop()?.as_int()? != 0 {
                    self.cptr = Some(target as usize);
                }
            }
            Opcode::JSR => {
                let target = self.fetch()?;
                // The fetches above already advanced past the operand; the
                // top of stack is the return offset.
                let ret = self.pc()?;
                self.stack.push(Value::Int32(ret as i32));
                self.cptr = Some(target as usize);
            }
            Opcode::RET => {
                let ret = self.stack.pop()?.as_int()?;
                if ret < 0 {
                    return Err(RuntimeError::BadAddress(ret as u32));
                }
                self.cptr = Some(ret as usize);
            }
            Opcode::CALL => self.op_call()?,
            Opcode::ERRHDL => {
                self.error_handler = self.fetch()?;
            }
            Opcode::FOR => self.op_for(op)?,
            Opcode::NEXT => self.op_next()?,
            Opcode::END => {
                self.request_pause = true;
                // Stay on the END word so a resume cannot run past the
                // halt.
                if let Some(pc) = self.cptr {
                    self.cptr = Some(pc - 1);
                }
            }
            Opcode::LINE => {
                self.current_line = self.fetch()?;
            }
        }
        Ok(())
    }

    fn executable(&self) -> Result<&Arc<Executable>, RuntimeError> {
        self.executable
            .as_ref()
            .ok_or(RuntimeError::BadAddress(0))
    }

    fn pc(&self) -> Result<usize, RuntimeError> {
        self.cptr.ok_or(RuntimeError::BadAddress(0))
    }

    fn fetch(&mut self) -> Result<Word, RuntimeError> {
        let pc = self.pc()?;
        let word = *self
            .executable()?
            .code()
            .get(pc)
            .ok_or(RuntimeError::BadAddress(pc as u32))?;
        self.cptr = Some(pc + 1);
        Ok(word)
    }

    fn op_push(&mut self, op: Word) -> Result<(), RuntimeError> {
        let t = type_tag(op);
        if t == Type::Int32 {
            let v = self.fetch()? as i32;
            self.stack.push(Value::Int32(v));
        } else if t == Type::Double {
            let low = self.fetch()?;
            let high = self.fetch()?;
            let bits = u64::from(low) | (u64::from(high) << 32);
            self.stack.push(Value::Double(f64::from_bits(bits)));
        } else if t == Type::Str {
            let addr = self.fetch()?;
            let v = self.executable()?.constant(address::index(addr), 0)?;
            self.stack.push(Value::Str(v.as_str()));
        } else if t.is_array() {
            let addr = self.fetch()?;
            let x = Arc::clone(self.executable()?);
            let values = x.constant_array(address::index(addr))?;
            for v in values {
                self.stack.push(v.clone());
            }
            self.stack.push(Value::Int32(values.len() as i32));
        }
        Ok(())
    }

    fn op_ari(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let v2 = self.stack.pop()?;
        let v1 = self.stack.pop()?;
        let result = match opcode {
            Opcode::ARIADD => v1.add(&v2)?,
            Opcode::ARISUB => v1.sub(&v2)?,
            Opcode::ARIMUL => v1.mul(&v2)?,
            Opcode::ARIDIV => v1.div(&v2)?,
            _ => v1.rem(&v2)?,
        };
        self.stack.push(result);
        Ok(())
    }

    fn op_cmp(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        use std::cmp::Ordering;
        let v2 = self.stack.pop()?;
        let v1 = self.stack.pop()?;
        let ordering = v1.compare(&v2);
        let result = match opcode {
            Opcode::ARIEQ => ordering == Ordering::Equal,
            Opcode::ARINE => ordering != Ordering::Equal,
            Opcode::ARIGE => ordering != Ordering::Less,
            Opcode::ARILE => ordering != Ordering::Greater,
            Opcode::ARIGT => ordering == Ordering::Greater,
            _ => ordering == Ordering::Less,
        };
        self.stack.push(Value::Int32(if result { 1 } else { 0 }));
        Ok(())
    }

    fn op_bit(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let v2 = self.stack.pop()?;
        let v1 = self.stack.pop()?;
        let result = if opcode == Opcode::ARIAND {
            v1.bit_and(&v2)?
        } else {
            v1.bit_or(&v2)?
        };
        self.stack.push(result);
        Ok(())
    }

    fn op_logic(&mut self, opcode: Opcode) -> Result<(), RuntimeError> {
        let v2 = self.stack.pop()?;
        let v1 = self.stack.pop()?;
        let result = if opcode == Opcode::AND {
            v1.logical_and(&v2)?
        } else {
            v1.logical_or(&v2)?
        };
        self.stack.push(Value::Int32(if result { 1 } else { 0 }));
        Ok(())
    }

    fn op_cast(&mut self, op: Word) -> Result<(), RuntimeError> {
        let t = type_tag(op);
        let v = self.stack.pop()?;
        let result = match t {
            Type::Int32 => Value::Int32(v.as_int()?),
            Type::Double => Value::Double(v.as_double()?),
            Type::Str => Value::Str(v.as_str()),
            _ => v,
        };
        self.stack.push(result);
        Ok(())
    }

    fn op_clr(&mut self, op: Word) -> Result<(), RuntimeError> {
        let t = type_tag(op);
        let a = self.fetch()?;
        if address::is_global(a) {
            self.mem.clr(&Value::zero(t), address::index(a))?;
        }
        Ok(())
    }

    fn op_rsz(&mut self, op: Word) -> Result<(), RuntimeError> {
        let t = type_tag(op);
        let a = self.fetch()?;
        let size = self.stack.pop()?.as_int()?;
        if size < 0 {
            return Err(RuntimeError::IllegalQuantity);
        }
        if address::is_global(a) {
            let addr = address::index(a);
            self.mem.resize(addr, size as u32)?;
            self.mem.clr(&Value::zero(t), addr)?;
        }
        Ok(())
    }

    fn op_incdec(&mut self, inc: bool) -> Result<(), RuntimeError> {
        let a = self.fetch()?;
        // Constants are read-only; a store to one is a no-op.
        if address::is_constant(a) {
            return Ok(());
        }
        if inc {
            self.mem.inc(address::index(a))
        } else {
            self.mem.dec(address::index(a))
        }
    }

    fn op_store(&mut self, op: Word, indexed: bool) -> Result<(), RuntimeError> {
        let t = type_tag(op);
        let a = self.fetch()?;
        if !address::is_global(a) {
            return Ok(());
        }
        let addr = address::index(a);
        let offset = if indexed {
            self.stack.pop()?.as_int()?
        } else {
            0
        };
        // Stored values always take the variable's type.
        if t == Type::Int32 {
            let v = self.stack.pop()?.as_int()?;
            self.mem.store(Value::Int32(v), addr, offset)
        } else if t == Type::Double {
            let v = self.stack.pop()?.as_double()?;
            self.mem.store(Value::Double(v), addr, offset)
        } else if t == Type::Str {
            let v = self.stack.pop()?.as_str();
            self.mem.store(Value::Str(v), addr, offset)
        } else if t.is_array() {
            self.op_store_array(addr.wrapping_add(offset as u32), t)
        } else {
            let v = self.stack.pop()?;
            self.mem.store(v, addr, offset)
        }
    }

    fn op_store_array(&mut self, addr: u32, t: Type) -> Result<(), RuntimeError> {
        let n = self.stack.pop()?.as_int()?;
        let scalar = t.scalar_type();
        for i in (0..n).rev() {
            let v = self.stack.pop()?;
            let v = match scalar {
                Type::Int32 => Value::Int32(v.as_int()?),
                Type::Str => Value::Str(v.as_str()),
                _ => Value::Double(v.as_double()?),
            };
            self.mem.store(v, addr, i)?;
        }
        Ok(())
    }

    fn op_recall(&mut self, op: Word, indexed: bool) -> Result<(), RuntimeError> {
        let t = type_tag(op);
        let a = self.fetch()?;
        let offset = if indexed {
            self.stack.pop()?.as_int()?
        } else {
            0
        };
        if address::is_global(a) {
            let addr = address::index(a);
            if t.is_array() {
                let n = self.stack.pop()?.as_int()?;
                for i in 0..n {
                    let v = self.mem.value(addr.wrapping_add(offset as u32), i)?.clone();
                    self.stack.push(v);
                }
                self.stack.push(Value::Int32(n));
            } else if indexed {
                let v = self.mem.value(addr, offset)?.clone();
                self.stack.push(v);
            } else {
                let v = self.mem.value(addr, 0)?.clone();
                self.stack.push(v);
            }
        } else {
            let v = self.executable()?.constant(address::index(a), offset)?;
            self.stack.push(v);
        }
        Ok(())
    }

    fn op_call(&mut self) -> Result<(), RuntimeError> {
        let id = (self.fetch()? & 0xFFFF) as u16;
        let x = Arc::clone(self.executable()?);
        self.library.execute(id, &mut self.mem, &mut self.stack, &x)?;
        if self.library.is_terminate_requested() {
            debug!("library requested termination");
            self.cptr = None;
        }
        Ok(())
    }

    fn op_for(&mut self, _op: Word) -> Result<(), RuntimeError> {
        let a = self.fetch()?;
        let addr = address::index(a);
        let step = self.stack.pop()?.as_double()?;
        let limit = self.stack.pop()?.as_double()?;
        // Re-entering a loop for a variable that already has a frame drops
        // that frame and everything above it.
        if let Some(pos) = self.for_frames.iter().rposition(|f| f.addr == addr) {
            self.for_frames.truncate(pos);
        }
        let body = self.pc()?;
        self.for_frames.push(ForFrame {
            addr,
            limit,
            step,
            body,
        });
        Ok(())
    }

    fn op_next(&mut self) -> Result<(), RuntimeError> {
        let frame = self
            .for_frames
            .last()
            .ok_or(RuntimeError::IllegalOperation)?;
        let addr = frame.addr;
        let step = frame.step;
        let limit = frame.limit;
        let body = frame.body;
        let current = self.mem.value(addr, 0)?;
        let next = current.as_double()? + step;
        let stored = match current {
            Value::Int32(_) => Value::Int32(next.round() as i32),
            _ => Value::Double(next),
        };
        self.mem.store(stored, addr, 0)?;
        let continues = if step >= 0.0 {
            next <= limit
        } else {
            next >= limit
        };
        if continues {
            self.cptr = Some(body);
        } else {
            self.for_frames.pop();
        }
        Ok(())
    }
}
