//! Runtime for compiled Applesoft BASIC programs.
//!
//! The crate hosts the stack-based virtual machine together with everything
//! it executes against: the typed [`Value`](enum.Value.html) model, the
//! packed 32-bit [`Opcode`](enum.Opcode.html) word format, global chunk
//! [`Memory`](struct.Memory.html), the decoded
//! [`Executable`](struct.Executable.html) image and the built-in
//! [`Library`](struct.Library.html) with its DOS command emulation.
//!
//! Compilation lives in the `basc` crate; the byte-level image container in
//! `bexfile`.

pub mod address;
pub mod disassembler;
pub mod diskfile;
pub mod error;
pub mod executable;
pub mod io;
pub mod library;
pub mod memory;
pub mod opcodes;
pub mod stack;
pub mod symbol;
pub mod types;
pub mod value;
pub mod vm;

pub use crate::error::{RuntimeError, VmError};
pub use crate::executable::{Executable, LoadError};
pub use crate::io::{InputSource, OutputSink, RecordingSink, ScreenMode, ScriptedInput, SinkEvent};
pub use crate::library::{Library, LibraryFunction};
pub use crate::memory::{Chunk, Memory};
pub use crate::opcodes::{make_op, mnemonic, type_tag, Opcode};
pub use crate::stack::Stack;
pub use crate::symbol::{Symbol, SymbolKind, MAX_IDENTIFIER_LENGTH, SYMBOL_RECORD_SIZE};
pub use crate::types::Type;
pub use crate::value::Value;
pub use crate::vm::Vm;

/// A single 32-bit word of the code segment.
pub type Word = u32;
