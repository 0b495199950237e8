//! The built-in function library and the DOS command emulation.
//!
//! Library functions are invoked by the VM's `CALL` instruction through a
//! 16-bit id. Arguments travel on the value stack; variadic calls (`print`,
//! `printf`, `input`) carry a type tag per argument and an argument count on
//! top.
//!
//! Printing a string whose first byte is CTRL-D switches the library into
//! DOS command mode: subsequent print arguments are accumulated into a
//! command buffer until an argument starting with a newline flushes and
//! executes the buffer as a DOS 3.3 command (`OPEN`, `READ`, `WRITE`,
//! `RUN`, ...).

use crate::diskfile::{self, DiskFile, FileSpec};
use crate::error::RuntimeError;
use crate::executable::Executable;
use crate::io::{InputSource, OutputSink, ScreenMode};
use crate::memory::Memory;
use crate::stack::Stack;
use crate::types::Type;
use crate::value::{format_double, parse_leading_double, parse_leading_int, Value};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const F_PRINT: u16 = 0;
const F_INPUT: u16 = 1;
const F_READ: u16 = 2;
const F_SIN: u16 = 3;
const F_COS: u16 = 4;
const F_TAN: u16 = 5;
const F_ASIN: u16 = 6;
const F_ACOS: u16 = 7;
const F_ATAN: u16 = 8;
const F_ATAN2: u16 = 9;
const F_SQRT: u16 = 10;
const F_EXP: u16 = 11;
const F_LOG: u16 = 12;
const F_LOG10: u16 = 13;
const F_LOG2: u16 = 14;
const F_ABS: u16 = 15;
const F_TAB: u16 = 16;
const F_SIGN: u16 = 17;
const F_RND: u16 = 18;
const F_INT: u16 = 19;
const F_PRINTF: u16 = 20;
const F_LEFT: u16 = 21;
const F_MID: u16 = 22;
const F_MID1: u16 = 23;
const F_RIGHT: u16 = 24;
const F_LEN: u16 = 25;
const F_ASC: u16 = 26;
const F_CHR: u16 = 27;
const F_VAL: u16 = 28;
const F_STR: u16 = 29;
const F_POW: u16 = 30;
const F_PEEK: u16 = 31;
const F_POKE: u16 = 32;
const F_GET: u16 = 33;
const F_INVERSE: u16 = 34;
const F_NORMAL: u16 = 35;
const F_VTAB: u16 = 36;
const F_HTAB: u16 = 37;
const F_SPC: u16 = 38;
const F_HOME: u16 = 39;
const F_FLASH: u16 = 40;
const F_TEXT: u16 = 41;
const F_FRE: u16 = 42;

/// One entry of the built-in function table.
pub struct LibraryFunction {
    pub id: u16,
    pub name: &'static str,
    pub args: &'static str,
    pub rettype: Type,
}

const fn def(id: u16, name: &'static str, args: &'static str, rettype: Type) -> LibraryFunction {
    LibraryFunction {
        id,
        name,
        args,
        rettype,
    }
}

/// The closed table of built-ins; `CALL` ids index into the library through
/// these definitions and the compiler resolves call names against them.
pub static FUNCTIONS: &[LibraryFunction] = &[
    def(F_PRINT, "print", "", Type::Undefined),
    def(F_INPUT, "input", "", Type::Int32),
    def(F_READ, "read", "", Type::Int32),
    def(F_SIN, "sin", "d", Type::Double),
    def(F_COS, "cos", "d", Type::Double),
    def(F_TAN, "tan", "d", Type::Double),
    def(F_ASIN, "asin", "d", Type::Double),
    def(F_ACOS, "acos", "d", Type::Double),
    def(F_ATAN, "atan", "d", Type::Double),
    def(F_ATAN2, "atan2", "d,d", Type::Double),
    def(F_SQRT, "sqrt", "d", Type::Double),
    def(F_EXP, "exp", "d", Type::Double),
    def(F_LOG, "log", "d", Type::Double),
    def(F_LOG10, "log10", "d", Type::Double),
    def(F_LOG2, "log2", "d", Type::Double),
    def(F_ABS, "abs", "d", Type::Double),
    def(F_TAB, "tab", "d", Type::Double),
    def(F_SIGN, "sgn", "d", Type::Double),
    def(F_RND, "rnd", "d", Type::Double),
    def(F_INT, "int", "d", Type::Int32),
    def(F_PRINTF, "printf", "", Type::Undefined),
    def(F_LEFT, "left$", "t,d", Type::Str),
    def(F_MID, "mid$", "t,d,d", Type::Str),
    def(F_MID1, "mid1$", "t,d", Type::Str),
    def(F_RIGHT, "right$", "t,d", Type::Str),
    def(F_LEN, "len", "t", Type::Int32),
    def(F_ASC, "asc", "t", Type::Int32),
    def(F_CHR, "chr$", "d", Type::Str),
    def(F_VAL, "val", "t", Type::Double),
    def(F_STR, "str$", "d", Type::Str),
    def(F_POW, "pow", "d,d", Type::Double),
    def(F_PEEK, "peek", "d", Type::Double),
    def(F_POKE, "poke", "d,d", Type::Undefined),
    def(F_GET, "get", "", Type::Int32),
    def(F_INVERSE, "inverse", "", Type::Undefined),
    def(F_NORMAL, "normal", "", Type::Undefined),
    def(F_VTAB, "vtab", "", Type::Undefined),
    def(F_HTAB, "htab", "", Type::Undefined),
    def(F_SPC, "spc", "d", Type::Str),
    def(F_HOME, "home", "", Type::Undefined),
    def(F_FLASH, "flash", "", Type::Undefined),
    def(F_TEXT, "text", "", Type::Undefined),
    def(F_FRE, "fre", "d", Type::Int32),
];

pub fn find_function(name: &str) -> Option<&'static LibraryFunction> {
    FUNCTIONS.iter().find(|f| f.name == name)
}

pub fn function_by_id(id: u16) -> Option<&'static LibraryFunction> {
    FUNCTIONS.iter().find(|f| f.id == id)
}

/// A variadic argument popped from the stack: a value together with the
/// type tag it was pushed with.
enum Argument {
    Int(i32),
    Double(f64),
    Str(String),
}

impl Argument {
    fn render(&self) -> String {
        match self {
            Argument::Int(v) => v.to_string(),
            Argument::Double(v) => format_double(*v),
            Argument::Str(s) => s.clone(),
        }
    }

    fn as_double(&self) -> f64 {
        match self {
            Argument::Int(v) => f64::from(*v),
            Argument::Double(v) => *v,
            Argument::Str(_) => 0.0,
        }
    }

    fn str_or_empty(&self) -> String {
        match self {
            Argument::Str(s) => s.clone(),
            _ => String::new(),
        }
    }
}

fn pop_argument(stack: &mut Stack) -> Result<Argument, RuntimeError> {
    let tag = Type::from_id(stack.pop()?.as_int()? as u32);
    let value = stack.pop()?;
    Ok(match tag {
        Type::Int32 => Argument::Int(value.as_int()?),
        Type::Str => Argument::Str(value.as_str()),
        _ => Argument::Double(value.as_double()?),
    })
}

/// The runtime library. Owns the DOS state: open files, input/output
/// redirection, the command buffer, the hires pages and the terminate flag.
/// Re-entrant only per VM.
pub struct Library {
    terminate: bool,
    last_rnd: f64,
    rng: StdRng,
    cmd_mode: bool,
    disk: PathBuf,
    chain: String,
    doscmd: String,
    files: Vec<DiskFile>,
    input_file: Option<usize>,
    output_file: Option<usize>,
    last_error_code: i32,
    current_hires_page: usize,
    hires_page1: Vec<u8>,
    hires_page2: Vec<u8>,
    out: Arc<dyn OutputSink>,
    input: Arc<dyn InputSource>,
}

impl Library {
    pub fn new(input: Arc<dyn InputSource>, out: Arc<dyn OutputSink>) -> Library {
        Library {
            terminate: false,
            last_rnd: 0.0,
            rng: StdRng::from_entropy(),
            cmd_mode: false,
            disk: PathBuf::from("."),
            chain: String::new(),
            doscmd: String::new(),
            files: Vec::new(),
            input_file: None,
            output_file: None,
            last_error_code: 0,
            current_hires_page: 0,
            hires_page1: Vec::new(),
            hires_page2: Vec::new(),
            out,
            input,
        }
    }

    pub fn reset(&mut self) {
        self.terminate = false;
        self.chain.clear();
        self.cmd_mode = false;
        self.doscmd.clear();
        self.files.clear();
        self.input_file = None;
        self.output_file = None;
        self.last_error_code = 0;
    }

    pub fn set_disk<P: Into<PathBuf>>(&mut self, path: P) {
        self.disk = path.into();
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate
    }

    /// The file name recorded by DOS `RUN`, empty when no chain is pending.
    pub fn chained_file(&self) -> &str {
        &self.chain
    }

    /// The active hires page.
    pub fn hires_page(&self) -> &[u8] {
        if self.current_hires_page <= 1 {
            &self.hires_page1[..]
        } else {
            &self.hires_page2[..]
        }
    }

    /// Dispatches one library call.
    pub fn execute(
        &mut self,
        id: u16,
        mem: &mut Memory,
        stack: &mut Stack,
        data: &Executable,
    ) -> Result<(), RuntimeError> {
        match id {
            F_PRINT => self.print(stack, mem)?,
            F_INPUT => self.input(stack)?,
            F_READ => self.read(stack, data)?,
            F_SIN => self.math1(stack, f64::sin)?,
            F_COS => self.math1(stack, f64::cos)?,
            F_TAN => self.math1(stack, f64::tan)?,
            F_ASIN => self.math1(stack, f64::asin)?,
            F_ACOS => self.math1(stack, f64::acos)?,
            F_ATAN => self.math1(stack, f64::atan)?,
            F_ATAN2 => {
                let x = stack.pop()?.as_double()?;
                let y = stack.pop()?.as_double()?;
                stack.push(Value::Double(y.atan2(x)));
            }
            F_SQRT => self.math1(stack, f64::sqrt)?,
            F_EXP => self.math1(stack, f64::exp)?,
            F_LOG => self.math1(stack, f64::ln)?,
            F_LOG10 => self.math1(stack, f64::log10)?,
            F_LOG2 => self.math1(stack, f64::log2)?,
            F_ABS => self.math1(stack, f64::abs)?,
            F_TAB => {
                let column = stack.pop()?.as_double()?.round() as i32;
                self.out.goto_column(column);
            }
            F_SIGN => {
                let v = stack.pop()?.as_double()?;
                stack.push(Value::Int32(if v < 0.0 {
                    -1
                } else if v > 0.0 {
                    1
                } else {
                    0
                }));
            }
            F_RND => {
                let v = stack.pop()?.as_int()?;
                if v < 0 {
                    self.rng = StdRng::seed_from_u64(u64::from(v.unsigned_abs()));
                } else if v > 0 {
                    self.last_rnd = self.rng.gen();
                }
                stack.push(Value::Double(self.last_rnd));
            }
            F_INT => {
                let v = stack.pop()?.as_double()?;
                stack.push(Value::Int32(v.floor() as i32));
            }
            F_PRINTF => self.printf(stack)?,
            F_LEFT => self.left(stack)?,
            F_MID => self.mid(stack)?,
            F_MID1 => self.mid1(stack)?,
            F_RIGHT => self.right(stack)?,
            F_LEN => {
                let s = stack.pop()?.as_str();
                stack.push(Value::Int32(s.chars().count() as i32));
            }
            F_ASC => {
                let s = stack.pop()?.as_str();
                let b = *s.as_bytes().first().ok_or(RuntimeError::IllegalQuantity)?;
                stack.push(Value::Int32(i32::from(b)));
            }
            F_CHR => {
                let a = stack.pop()?.as_int()?;
                stack.push(Value::Str(((a & 0xFF) as u8 as char).to_string()));
            }
            F_VAL => {
                let s = stack.pop()?.as_str();
                stack.push(Value::Double(parse_leading_double(&s).unwrap_or(0.0)));
            }
            F_STR => {
                let v = stack.pop()?.as_double()?;
                stack.push(Value::Str(format_double(v)));
            }
            F_POW => {
                let y = stack.pop()?.as_double()?;
                let x = stack.pop()?.as_double()?;
                stack.push(Value::Double(x.powf(y)));
            }
            F_PEEK => self.peek(stack)?,
            F_POKE => self.poke(stack)?,
            F_GET => self.get(stack)?,
            F_INVERSE => self.out.inverse(),
            F_NORMAL => self.out.normal(),
            F_VTAB => {
                let row = stack.pop()?.as_double()? as i32 - 1;
                self.out.goto_row(row);
            }
            F_HTAB => {
                let column = stack.pop()?.as_double()? as i32 - 1;
                self.out.goto_column(column);
            }
            F_SPC => {
                let n = stack.pop()?.as_int()?.max(0) as usize;
                stack.push(Value::Str(" ".repeat(n)));
            }
            F_HOME => self.out.home(),
            // Flashing is not supported; treat it as inverse.
            F_FLASH => self.out.inverse(),
            F_TEXT => self.out.set_screen_mode(ScreenMode::Text),
            F_FRE => {
                stack.pop()?;
                stack.push(Value::Int32(0xFFFF));
            }
            other => return Err(RuntimeError::UnknownFunction(other)),
        }
        Ok(())
    }

    fn math1(&self, stack: &mut Stack, f: fn(f64) -> f64) -> Result<(), RuntimeError> {
        let v = stack.pop()?.as_double()?;
        stack.push(Value::Double(f(v)));
        Ok(())
    }

    fn left(&self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let l = stack.pop()?.as_int()?;
        if l <= 0 || l > 255 {
            return Err(RuntimeError::IllegalQuantity);
        }
        let s = stack.pop()?.as_str();
        stack.push(Value::Str(s.chars().take(l as usize).collect()));
        Ok(())
    }

    fn mid(&self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let l = stack.pop()?.as_double()? as i32;
        if l <= 0 || l > 255 {
            return Err(RuntimeError::IllegalQuantity);
        }
        let p = stack.pop()?.as_int()?;
        if p <= 0 || p > 255 {
            return Err(RuntimeError::IllegalQuantity);
        }
        let s = stack.pop()?.as_str();
        // Positions count from 1 in BASIC.
        let result: String = s.chars().skip(p as usize - 1).take(l as usize).collect();
        stack.push(Value::Str(result));
        Ok(())
    }

    fn mid1(&self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let p = stack.pop()?.as_int()?;
        if p <= 0 || p > 255 {
            return Err(RuntimeError::IllegalQuantity);
        }
        let s = stack.pop()?.as_str();
        let result: String = s.chars().skip(p as usize - 1).collect();
        stack.push(Value::Str(result));
        Ok(())
    }

    fn right(&self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let l = stack.pop()?.as_int()?;
        if l <= 0 || l > 255 {
            return Err(RuntimeError::IllegalQuantity);
        }
        let s = stack.pop()?.as_str();
        let len = s.chars().count();
        let result: String = if l as usize > len {
            s
        } else {
            s.chars().skip(len - l as usize).collect()
        };
        stack.push(Value::Str(result));
        Ok(())
    }

    fn print(&mut self, stack: &mut Stack, mem: &mut Memory) -> Result<(), RuntimeError> {
        let mut text = String::new();
        self.print_inner(&mut text, stack, mem)?;
        if !text.is_empty() {
            if let Some(i) = self.output_file {
                self.files[i].write(&text);
            } else {
                self.out.write(&text);
                self.out.flush();
            }
        }
        Ok(())
    }

    fn print_inner(
        &mut self,
        text: &mut String,
        stack: &mut Stack,
        mem: &mut Memory,
    ) -> Result<(), RuntimeError> {
        let narg = stack.pop()?.as_int()?;
        if narg == 0 {
            stack.push(Value::Int32(0));
            return Ok(());
        }
        let mut args = Vec::with_capacity(narg as usize);
        for _ in 0..narg {
            args.push(pop_argument(stack)?);
        }
        args.reverse();
        if !self.cmd_mode {
            if let Argument::Str(s) = &args[0] {
                if s.as_bytes().first() == Some(&4) {
                    self.cmd_mode = true;
                    self.doscmd.clear();
                    return Ok(());
                }
            }
            for a in &args {
                text.push_str(&a.render());
            }
        } else {
            for a in &args {
                match a {
                    Argument::Str(s) if s.as_bytes().first() == Some(&b'\n') => {
                        self.cmd_mode = false;
                        self.print_execute(mem)?;
                    }
                    Argument::Str(s) if s.as_bytes().first() == Some(&4) => {}
                    other => self.doscmd.push_str(&other.render()),
                }
            }
        }
        Ok(())
    }

    /// Executes the accumulated DOS command buffer.
    fn print_execute(&mut self, mem: &mut Memory) -> Result<(), RuntimeError> {
        if self.doscmd.is_empty() {
            self.input_file = None;
            self.output_file = None;
            return Ok(());
        }
        let command = std::mem::replace(&mut self.doscmd, String::new());
        let command = command.trim();
        debug!("dos command: {}", command);
        let (verb, rest) = match command.find(' ') {
            Some(n) => (&command[..n], command[n + 1..].trim()),
            None => (command, ""),
        };
        self.last_error_code = 0;
        let result = match verb.to_ascii_lowercase().as_str() {
            "run" => self.dos_run(rest),
            "open" => self.dos_open(rest),
            "close" => self.dos_close(rest),
            "read" => self.dos_read(rest),
            "write" => self.dos_write(rest),
            "delete" => self.dos_delete(rest),
            "verify" => self.dos_verify(rest),
            "bload" => self.dos_bload(rest, mem),
            "bsave" => self.dos_bsave(rest, mem),
            _ => Ok(()),
        };
        if let Err(err) = &result {
            self.last_error_code = err.code();
        }
        result
    }

    fn file_path(&self, spec: &FileSpec) -> PathBuf {
        self.disk.join(DiskFile::correct_filename(&spec.name))
    }

    fn find_file(&self, path: &PathBuf) -> Option<usize> {
        self.files.iter().position(|f| f.filename() == path.as_path())
    }

    fn close_index(&mut self, index: usize) {
        self.files.remove(index);
        self.input_file = adjust_after_remove(self.input_file, index);
        self.output_file = adjust_after_remove(self.output_file, index);
    }

    fn dos_run(&mut self, arg: &str) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        debug!("dos run, chaining to {:?}", spec.name);
        self.chain = spec.name;
        self.terminate = true;
        Ok(())
    }

    fn dos_open(&mut self, arg: &str) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        let path = self.file_path(&spec);
        if let Some(i) = self.find_file(&path) {
            self.close_index(i);
        }
        let file = if spec.record_length == 0 {
            DiskFile::open(&path)
        } else {
            DiskFile::open_random(&path, spec.record_length)
        };
        self.files.push(file);
        Ok(())
    }

    fn dos_close(&mut self, arg: &str) -> Result<(), RuntimeError> {
        if arg.is_empty() {
            self.files.clear();
            self.input_file = None;
            self.output_file = None;
        } else {
            let spec = FileSpec::parse(arg);
            let path = self.file_path(&spec);
            if let Some(i) = self.find_file(&path) {
                self.close_index(i);
            }
        }
        Ok(())
    }

    fn dos_read(&mut self, arg: &str) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        let path = self.file_path(&spec);
        if let Some(i) = self.find_file(&path) {
            if self.files[i].is_random_access() {
                self.files[i].set_index(spec.record, true)?;
            }
            self.input_file = Some(i);
            if self.output_file == Some(i) {
                self.output_file = None;
            }
        }
        Ok(())
    }

    fn dos_write(&mut self, arg: &str) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        let path = self.file_path(&spec);
        if let Some(i) = self.find_file(&path) {
            if self.files[i].is_random_access() {
                self.files[i].set_index(spec.record, false)?;
            }
            self.files[i].erase();
            self.output_file = Some(i);
            if self.input_file == Some(i) {
                self.input_file = None;
            }
        }
        Ok(())
    }

    fn dos_delete(&mut self, arg: &str) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        let path = self.file_path(&spec);
        if let Some(i) = self.find_file(&path) {
            self.close_index(i);
        }
        let _ = std::fs::remove_file(&path);
        Ok(())
    }

    fn dos_verify(&mut self, arg: &str) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        DiskFile::verify(self.file_path(&spec))
    }

    fn dos_bload(&mut self, arg: &str, mem: &mut Memory) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        let path = self.file_path(&spec);
        match spec.address {
            0x2000 => {
                self.hires_page1 = DiskFile::read_binary_file(&path);
                self.out.notify_hires_loaded();
            }
            0x4000 => {
                self.hires_page2 = DiskFile::read_binary_file(&path);
                self.out.notify_hires_loaded();
            }
            0x69 => self.restore_memory(&path, mem),
            0 => {
                if diskfile::sniff_address(&path) == Some(0x69) {
                    self.restore_memory(&path, mem);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn dos_bsave(&mut self, arg: &str, mem: &Memory) -> Result<(), RuntimeError> {
        let spec = FileSpec::parse(arg);
        if spec.address == 0x69 {
            let path = self.file_path(&spec);
            let payload = mem.save().to_string();
            diskfile::write_snapshot(&path, payload.as_bytes())?;
        }
        Ok(())
    }

    fn restore_memory(&self, path: &PathBuf, mem: &mut Memory) {
        if let Some(payload) = diskfile::read_snapshot(path) {
            if let Ok(json) = serde_json::from_slice(&payload) {
                mem.restore(&json);
            }
        }
    }

    fn printf(&mut self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let mut text = String::new();
        self.printf_inner(&mut text, stack)?;
        self.out.write(&text);
        self.out.flush();
        Ok(())
    }

    fn printf_inner(&self, text: &mut String, stack: &mut Stack) -> Result<(), RuntimeError> {
        let narg = stack.pop()?.as_int()?;
        if narg == 0 {
            stack.push(Value::Int32(0));
            return Ok(());
        }
        let mut args = Vec::with_capacity(narg as usize);
        for _ in 0..narg {
            args.push(pop_argument(stack)?);
        }
        // The format string is pushed first, so it is popped last.
        let format = match args.pop() {
            Some(Argument::Str(s)) => s,
            _ => {
                stack.push(Value::Int32(0));
                return Ok(());
            }
        };
        let bytes = format.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'!' | b'&' | b'\\' => printf_string(text, bytes, &mut i, &mut args),
                b'#' => printf_number(text, bytes, &mut i, &mut args),
                b => {
                    text.push(b as char);
                    i += 1;
                }
            }
        }
        if !args.is_empty() {
            text.push('\n');
        }
        Ok(())
    }

    fn input(&mut self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let prompt = stack.pop()?.as_int()? != 0;
        let narg = stack.pop()?.as_int()?;
        if narg == 0 {
            stack.push(Value::Int32(0));
            return Ok(());
        }
        let mut types = Vec::with_capacity(narg as usize);
        for _ in 0..narg {
            types.push(Type::from_id(stack.pop()?.as_int()? as u32));
        }
        types.reverse();
        let mut fields: Vec<String> = Vec::new();
        while fields.len() < types.len() {
            let line = match self.input_file {
                Some(i) => {
                    let result = self.files[i].read();
                    if let Err(err) = &result {
                        self.last_error_code = err.code();
                    }
                    result?
                }
                None => {
                    self.out.write(if fields.is_empty() {
                        if prompt {
                            ""
                        } else {
                            "?"
                        }
                    } else {
                        "??"
                    });
                    self.out.flush();
                    self.input.read_line()
                }
            };
            fields.extend(split(&line, ',', false));
        }
        for (field, t) in fields.iter().zip(types.iter()) {
            match t {
                Type::Int32 => {
                    let v =
                        parse_leading_int(field).ok_or(RuntimeError::IllegalOperation)?;
                    stack.push(Value::Int32(v));
                }
                Type::Str => {
                    let mut s = field.as_str();
                    if s.starts_with('"') {
                        s = &s[1..];
                    }
                    if s.ends_with('"') {
                        s = &s[..s.len() - 1];
                    }
                    stack.push(Value::Str(s.to_string()));
                }
                _ => {
                    let v = parse_leading_double(field)
                        .ok_or(RuntimeError::IllegalOperation)?;
                    stack.push(Value::Double(v));
                }
            }
        }
        stack.push(Value::Int32(narg));
        Ok(())
    }

    fn get(&mut self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let t = Type::from_id(stack.pop()?.as_int()? as u32);
        let c = self.input.read_char();
        match t {
            Type::Str => stack.push(Value::Str((c as char).to_string())),
            _ => stack.push(Value::Int32(i32::from(c) - i32::from(b'0'))),
        }
        Ok(())
    }

    fn read(&mut self, stack: &mut Stack, data: &Executable) -> Result<(), RuntimeError> {
        let _requested = stack.pop()?;
        let index = stack.pop()?.as_int()?;
        let name = format!("DATA_{}", index);
        match data.find_constant(&name) {
            Some(symbol) => {
                stack.push(data.constant(symbol.address(), 0)?);
                Ok(())
            }
            None => Err(RuntimeError::OutOfData),
        }
    }

    fn peek(&mut self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let addr = stack.pop()?.as_int()? as i16;
        let value = match addr {
            36 => self.out.cursor_column(),
            37 => self.out.cursor_row(),
            // Time bytes, conventionally used for seeding rnd().
            78 => ((unix_time() & 0xFF00) >> 8) as i32,
            79 => (unix_time() & 0xFF) as i32,
            // Start of variable space and string storage map to the magic
            // snapshot address.
            105 | 111 => 0x69,
            106 | 112 => 0,
            // ONERR code.
            222 => self.last_error_code,
            -16384 => i32::from(self.input.last_key()) + 128,
            _ => 0,
        };
        stack.push(Value::Int32(value));
        Ok(())
    }

    fn poke(&mut self, stack: &mut Stack) -> Result<(), RuntimeError> {
        let _value = stack.pop()?.as_int()? as u8;
        let addr = stack.pop()?.as_int()? as u16;
        match addr {
            0xC050 => self.out.set_screen_mode(ScreenMode::Graphics),
            0xC051 => self.out.set_screen_mode(ScreenMode::Text),
            // Full screen; nothing to switch.
            0xC052 => {}
            0xC054 => {
                self.current_hires_page = 1;
                self.out.notify_hires_loaded();
            }
            0xC055 => {
                self.current_hires_page = 2;
                self.out.notify_hires_loaded();
            }
            0xC057 => {}
            _ => {}
        }
        Ok(())
    }
}

fn adjust_after_remove(slot: Option<usize>, removed: usize) -> Option<usize> {
    match slot {
        Some(i) if i == removed => None,
        Some(i) if i > removed => Some(i - 1),
        other => other,
    }
}

fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `!` prints one string argument, `&` the whole argument, `\...\` a fixed-
/// width field padded with blanks.
fn printf_string(text: &mut String, bytes: &[u8], i: &mut usize, args: &mut Vec<Argument>) {
    let s = args.pop().map(|a| a.str_or_empty()).unwrap_or_default();
    match bytes[*i] {
        b'!' => {
            if s.is_empty() {
                text.push('?');
            } else {
                text.push_str(&s);
            }
            *i += 1;
        }
        b'&' => {
            text.push_str(&s);
            *i += 1;
        }
        _ => {
            *i += 1;
            let mut n = 1;
            while *i < bytes.len() && bytes[*i] != b'\\' {
                n += 1;
                *i += 1;
            }
            n += 1;
            if *i < bytes.len() {
                *i += 1;
            }
            if s.len() > n {
                text.push_str(&s[..n]);
            } else {
                text.push_str(&s);
                for _ in 0..n - s.len() {
                    text.push(' ');
                }
            }
        }
    }
}

/// `#`-fields print a right-aligned number; a `.` introduces fraction
/// digits and a trailing `^^^^` switches to scientific notation.
fn printf_number(text: &mut String, bytes: &[u8], i: &mut usize, args: &mut Vec<Argument>) {
    let v = args.pop().map(|a| a.as_double()).unwrap_or(0.0);
    let mut n = 0;
    let mut p = 0;
    let mut scientific = false;
    while *i < bytes.len() && bytes[*i] == b'#' {
        n += 1;
        *i += 1;
    }
    if *i < bytes.len() && bytes[*i] == b'.' {
        *i += 1;
        while *i < bytes.len() && bytes[*i] == b'#' {
            n += 1;
            p += 1;
            *i += 1;
        }
    }
    let mut carets = 0;
    while *i + carets < bytes.len() && bytes[*i + carets] == b'^' && carets < 4 {
        carets += 1;
    }
    if carets == 4 {
        scientific = true;
        n += 4;
        *i += 4;
    }
    let rendered = if p == 0 && !scientific {
        format!("{}", v as i32)
    } else if !scientific {
        format!("{:.*}", p, v)
    } else {
        scientific_notation(v, p)
    };
    if rendered.len() < n {
        for _ in 0..n - rendered.len() {
            text.push(' ');
        }
    }
    text.push_str(&rendered);
}

fn scientific_notation(v: f64, precision: usize) -> String {
    let formatted = if precision > 0 {
        format!("{:.*e}", precision, v)
    } else {
        format!("{:.5e}", v)
    };
    let mut parts = formatted.splitn(2, 'e');
    let mantissa = parts.next().unwrap_or("0");
    let exponent: i32 = parts.next().and_then(|e| e.parse().ok()).unwrap_or(0);
    format!(
        "{}e{}{:02}",
        mantissa,
        if exponent < 0 { '-' } else { '+' },
        exponent.abs()
    )
}

/// Splits on a delimiter with quote awareness: delimiters inside double
/// quotes do not separate fields.
pub fn split(s: &str, delim: char, skip_empty: bool) -> Vec<String> {
    let mut list = Vec::new();
    let mut field = String::new();
    let mut quote = false;
    for c in s.chars() {
        if c == delim && !quote {
            if !(field.is_empty() && skip_empty) {
                list.push(field.clone());
            }
            field.clear();
        } else {
            if c == '"' {
                quote = !quote;
            }
            field.push(c);
        }
    }
    if !(field.is_empty() && skip_empty) {
        list.push(field);
    }
    list
}
