use crate::types::Type;
use crate::Word;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

/// VM instruction set.
///
/// Each instruction is one 32-bit word: bits 0..7 hold the mnemonic, bits
/// 8..15 the operand [`Type`](enum.Type.html) id. Depending on the mnemonic,
/// zero, one or two inline operand words follow (two only for a `PUSH` of a
/// double).
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum Opcode {
    /// No effect; only serves as a label anchor in the IR and is dropped by
    /// the assembler.
    NOP,
    /// Code header: the operand declares the number of global chunks.
    ENTRY,
    /// Push a literal of the tagged type. Int operands are inline, doubles
    /// take two words, strings and arrays are constant addresses.
    PUSH,
    /// Discard the top of the stack.
    POP,
    /// Duplicate the top of the stack.
    DUP,
    /// Swap the two top stack entries.
    SWAP,
    /// Pop a value and store it into slot 0 of the addressed chunk, coerced
    /// to the tagged type.
    STO,
    /// Pop a value, then pop an offset, and store at (chunk, offset).
    STOI,
    /// Push slot 0 of the addressed chunk; for an array type, push all
    /// elements followed by the length.
    RCL,
    /// Pop an offset and push the element at (chunk, offset); for a constant
    /// address, read from the constant pool.
    RCLI,
    /// Clear every slot of the addressed chunk to the typed zero.
    CLR,
    /// Pop a size, resize the addressed chunk and clear it to the typed
    /// zero.
    RSZ,
    /// Increment slot 0 of the addressed chunk.
    INC,
    /// Decrement slot 0 of the addressed chunk.
    DEC,
    /// Binary arithmetic on the two top stack entries.
    ARIADD,
    ARISUB,
    ARIMUL,
    ARIDIV,
    ARIMOD,
    /// Comparisons; push 1 or 0.
    ARIEQ,
    ARINE,
    ARIGE,
    ARILE,
    ARIGT,
    ARILT,
    /// Bitwise and/or on integers.
    ARIAND,
    ARIOR,
    /// Logical not of the top (coerced to int).
    ARINOT,
    /// Logical and/or on an integer pair.
    AND,
    OR,
    /// Negate the top of the stack.
    NEG,
    /// Coerce the top of the stack to the tagged type.
    CAST,
    /// Absolute jump to the operand code offset.
    JUMP,
    /// Pop the top; jump when it is zero.
    JZ,
    /// Pop the top; jump when it is non-zero.
    JNZ,
    /// Push the return offset and jump.
    JSR,
    /// Pop a return offset and jump to it.
    RET,
    /// Invoke a library function by its 16-bit id.
    CALL,
    /// Install the operand as the error handler offset; 0 disables.
    ERRHDL,
    /// Begin a loop over the addressed variable; pops step, then limit.
    FOR,
    /// Step the innermost loop; jumps back while the loop condition holds.
    NEXT,
    /// Halt the VM.
    END,
    /// Debug pseudo-op carrying the source line number.
    LINE,
}

const MNEMONIC_MASK: Word = 0xFF;
const TYPE_SHIFT: Word = 8;
const TYPE_MASK: Word = 0xFF00;

/// Packs a mnemonic and a type tag into an instruction word.
pub fn make_op(opcode: Opcode, t: Type) -> Word {
    // Infallible for a C-like enum.
    let mnemonic = opcode.to_u32().unwrap();
    (t.id() << TYPE_SHIFT) & TYPE_MASK | (mnemonic & MNEMONIC_MASK)
}

/// Decodes the mnemonic of an instruction word.
pub fn mnemonic(word: Word) -> Option<Opcode> {
    Opcode::from_u32(word & MNEMONIC_MASK)
}

/// Decodes the type tag of an instruction word.
pub fn type_tag(word: Word) -> Type {
    Type::from_id((word & TYPE_MASK) >> TYPE_SHIFT)
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
