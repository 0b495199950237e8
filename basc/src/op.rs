use abasic::{make_op, Opcode, Type, Word};

/// An inline operand of an IR op.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Param {
    Int(i32),
    Double(f64),
}

/// One IR instruction.
///
/// This is the tagged pre-assembly form: the mnemonic and type tag that will
/// be packed into the instruction word, an optional label anchored on the op
/// and an optional inline operand. Branch operands hold label ids until the
/// assembler resolves them to code offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct Op {
    mnemonic: Opcode,
    ty: Type,
    label: i32,
    param: Option<Param>,
}

impl Op {
    pub fn new(mnemonic: Opcode) -> Op {
        Op {
            mnemonic,
            ty: Type::Undefined,
            label: 0,
            param: None,
        }
    }

    pub fn typed(mnemonic: Opcode, ty: Type) -> Op {
        Op {
            mnemonic,
            ty,
            label: 0,
            param: None,
        }
    }

    pub fn with_int(mut self, v: i32) -> Op {
        self.param = Some(Param::Int(v));
        self
    }

    pub fn with_double(mut self, v: f64) -> Op {
        self.param = Some(Param::Double(v));
        self
    }

    pub fn mnemonic(&self) -> Opcode {
        self.mnemonic
    }

    pub fn value_type(&self) -> Type {
        self.ty
    }

    pub fn label(&self) -> i32 {
        self.label
    }

    pub fn set_label(&mut self, label: i32) {
        self.label = label;
    }

    pub fn param(&self) -> Option<Param> {
        self.param
    }

    pub fn param_int(&self) -> i32 {
        match self.param {
            Some(Param::Int(v)) => v,
            Some(Param::Double(v)) => v as i32,
            None => 0,
        }
    }

    /// The packed instruction word (without operands).
    pub fn opcode_word(&self) -> Word {
        make_op(self.mnemonic, self.ty)
    }
}

pub type Code = Vec<Op>;
