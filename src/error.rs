use std::fmt;

/// Runtime failures raised by VM operations and library calls.
///
/// These are the BASIC-level errors: when one bubbles out of an instruction
/// the VM either dispatches to the current `ONERR` handler or annotates it
/// with the source line and code offset and returns it to the host.
#[derive(Debug)]
pub enum RuntimeError {
    StackUnderflow,
    IllegalQuantity,
    /// Arithmetic on incompatible operands, division by zero, modulo of
    /// non-integers, `NEXT` without a live loop.
    IllegalOperation,
    OutOfData,
    FileNotFound,
    UnknownOpcode(u32),
    UnknownFunction(u16),
    /// An address operand does not decode to a valid chunk or constant.
    BadAddress(u32),
    Io(std::io::Error),
}

impl RuntimeError {
    /// The DOS error code surfaced to BASIC programs via `PEEK(222)`.
    pub fn code(&self) -> i32 {
        match self {
            RuntimeError::OutOfData => 5,
            RuntimeError::FileNotFound => 6,
            _ => 0,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::StackUnderflow => f.write_str("STACK UNDERFLOW"),
            RuntimeError::IllegalQuantity => f.write_str("ILLEGAL QUANTITY"),
            RuntimeError::IllegalOperation => f.write_str("ILLEGAL OP"),
            RuntimeError::OutOfData => f.write_str("OUT OF DATA"),
            RuntimeError::FileNotFound => f.write_str("FILE NOT FOUND"),
            RuntimeError::UnknownOpcode(op) => write!(f, "UNKNOWN OPCODE {:#x}", op),
            RuntimeError::UnknownFunction(id) => write!(f, "UNDEF'D FUNCTION {}", id),
            RuntimeError::BadAddress(addr) => write!(f, "BAD ADDRESS {:#x}", addr),
            RuntimeError::Io(err) => write!(f, "I/O ERROR: {}", err),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> RuntimeError {
        RuntimeError::Io(err)
    }
}

/// A runtime error annotated with where execution stood when it escaped the
/// fetch/decode/execute loop.
#[derive(Debug)]
pub struct VmError {
    pub line: u32,
    pub offset: usize,
    pub source: RuntimeError,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.line > 0 {
            write!(
                f,
                "Runtime exception in line {} (@{}): {}",
                self.line, self.offset, self.source
            )
        } else {
            write!(
                f,
                "Runtime exception at {}: {}",
                self.offset, self.source
            )
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
