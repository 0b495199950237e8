use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive as _, ToPrimitive as _};

/// Value types known to the compiler and the VM.
///
/// The numeric ids are part of the image format: they appear in the type-tag
/// byte of instruction words, in the text segment and in symbol records, so
/// they must never be renumbered.
///
/// Numeric types order `Int32 < Double` for widening; the result type of a
/// binary numeric operation is the wider operand.
#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive, ToPrimitive)]
pub enum Type {
    Undefined = 0,
    Void = 1,
    Int32 = 2,
    Double = 4,
    Str = 5,
    Int32Array = 7,
    DoubleArray = 9,
    StrArray = 10,
}

impl Type {
    /// Decodes a type id from the image. Unknown ids map to `Undefined`.
    pub fn from_id(id: u32) -> Type {
        Type::from_u32(id).unwrap_or(Type::Undefined)
    }

    pub fn id(self) -> u32 {
        // Infallible for a C-like enum.
        self.to_u32().unwrap()
    }

    /// The type suffix of an identifier (`%` integer, `$` string, otherwise
    /// double).
    pub fn from_suffix(name: &str) -> Type {
        if name.contains('%') {
            Type::Int32
        } else if name.contains('$') {
            Type::Str
        } else {
            Type::Double
        }
    }

    pub fn is_numeric(self) -> bool {
        match self {
            Type::Int32 | Type::Double | Type::Int32Array | Type::DoubleArray => true,
            _ => false,
        }
    }

    pub fn is_array(self) -> bool {
        match self {
            Type::Int32Array | Type::DoubleArray | Type::StrArray => true,
            _ => false,
        }
    }

    pub fn array_type(self) -> Type {
        match self {
            Type::Int32 => Type::Int32Array,
            Type::Double => Type::DoubleArray,
            Type::Str => Type::StrArray,
            other => other,
        }
    }

    pub fn scalar_type(self) -> Type {
        match self {
            Type::Int32Array => Type::Int32,
            Type::DoubleArray => Type::Double,
            Type::StrArray => Type::Str,
            other => other,
        }
    }

    /// Two types are mutually assignable iff both are numeric or both are
    /// non-numeric, and array-ness matches.
    pub fn is_assignable(self, other: Type) -> bool {
        if self == Type::Undefined || other == Type::Undefined {
            return false;
        }
        if self.is_array() != other.is_array() {
            return false;
        }
        self.is_numeric() == other.is_numeric()
    }

    pub fn loses_precision(self, target: Type) -> bool {
        if self.is_numeric() && target.is_numeric() {
            self.id() > target.id()
        } else {
            false
        }
    }

    /// The result type of a binary operation between two operands, or
    /// `Undefined` if the operands are not assignable to each other.
    pub fn result_type(t1: Type, t2: Type) -> Type {
        if !t1.is_assignable(t2) {
            return Type::Undefined;
        }
        if t1.is_numeric() {
            Type::from_id(t1.id().max(t2.id()))
        } else {
            t1
        }
    }

    /// One-letter type code used by the disassembler and in library
    /// signatures.
    pub fn type_string(self) -> &'static str {
        match self {
            Type::Int32 => "i",
            Type::Double => "d",
            Type::Str => "t",
            Type::Int32Array => "I",
            Type::DoubleArray => "D",
            Type::StrArray => "T",
            _ => "?",
        }
    }

    pub fn verbose_string(self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::Int32 => "int",
            Type::Double => "double",
            Type::Str => "string",
            Type::Int32Array => "int[]",
            Type::DoubleArray => "double[]",
            Type::StrArray => "string[]",
            _ => "?",
        }
    }
}

impl Default for Type {
    fn default() -> Type {
        Type::Undefined
    }
}
