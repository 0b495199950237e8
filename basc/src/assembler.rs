//! Linearizes compiled IR into the executable image.
//!
//! Constants are written to the text segment in declaration order and get
//! dense pool indices; code is emitted with `NOP` label anchors dropped and
//! `LINE` markers kept unless debug info is suppressed. A second pass
//! rewrites every branch operand from its label id to the absolute code
//! offset. Finally the three symbol tables are packed and the image frozen.

use crate::compiler::START_INTERNAL_LABEL_COUNTER;
use crate::data::{CompilerData, Constant};
use crate::errors::Errors;
use crate::op::{Op, Param};
use abasic::{
    mnemonic, type_tag, Executable, Opcode, Symbol, SymbolKind, Type, Value, Word,
    MAX_IDENTIFIER_LENGTH,
};
use byteorder::ByteOrder;
use std::collections::HashMap;
use util::Endian;

/// Assembles the compiled data into an executable. Diagnostics (undefined
/// jump targets, over-long identifiers) are returned alongside; the
/// executable is `None` when an error-level diagnostic was raised.
pub fn assemble(data: &mut CompilerData) -> (Option<Executable>, Errors) {
    let mut errors = Errors::new();

    // Constant placement: dense pool indices in declaration order.
    for (i, c) in data.constants.constants_mut().iter_mut().enumerate() {
        c.set_address(i as u32);
    }
    let mut text = Vec::new();
    for c in data.constants.constants() {
        store_constant(&mut text, c);
    }

    let mut words: Vec<Word> = Vec::new();
    let mut label_addr: HashMap<i32, u32> = HashMap::new();
    words.push(Op::new(Opcode::ENTRY).opcode_word());
    words.push(data.variables.numeric_block_size());
    assemble_block(&data.code, data.no_debug, &mut words, &mut label_addr);
    // Halt cleanly when control falls off the end of the program instead of
    // running into the function bodies that follow.
    words.push(Op::new(Opcode::END).opcode_word());

    let mut vtable: Vec<i32> = Vec::new();
    for f in data.functions.functions() {
        vtable.push(words.len() as i32);
        assemble_block(&f.code, data.no_debug, &mut words, &mut label_addr);
    }

    resolve_labels(&mut words, &label_addr, &mut errors);

    let mut vsym = Vec::new();
    for v in data.variables.variables() {
        check_identifier_length(v.name(), &mut errors);
        vsym.push(Symbol::new(
            v.name(),
            v.address(),
            v.value_type(),
            SymbolKind::Variable,
        ));
    }
    let mut fsym = Vec::new();
    for f in data.functions.functions() {
        check_identifier_length(&f.name, &mut errors);
        fsym.push(Symbol::new(&f.name, 0, f.rettype, SymbolKind::Function));
    }
    let mut csym = Vec::new();
    for c in data.constants.constants() {
        check_identifier_length(c.name(), &mut errors);
        csym.push(Symbol::new(
            c.name(),
            c.address(),
            c.value_type(),
            SymbolKind::Constant,
        ));
    }

    if errors.has_errors() {
        return (None, errors);
    }

    match Executable::from_parts(&words, &text, &vtable, &fsym, &csym, &vsym) {
        Ok(x) => (Some(x), errors),
        Err(err) => {
            errors.add_error(-1, format!("Image assembly failed: {}", err));
            (None, errors)
        }
    }
}

/// Serializes one constant: value count, then per value the type id and a
/// native-width payload (strings NUL-terminated).
fn store_constant(text: &mut Vec<u8>, c: &Constant) {
    let mut word = [0u8; 4];
    Endian::write_u32(&mut word, c.values().len() as u32);
    text.extend_from_slice(&word);
    for tv in c.values() {
        Endian::write_u32(&mut word, tv.ty.id());
        text.extend_from_slice(&word);
        match &tv.value {
            Value::Int32(v) => {
                Endian::write_i32(&mut word, *v);
                text.extend_from_slice(&word);
            }
            Value::Double(v) => {
                let mut payload = [0u8; 8];
                Endian::write_f64(&mut payload, *v);
                text.extend_from_slice(&payload);
            }
            Value::Str(s) => {
                text.extend_from_slice(s.as_bytes());
                text.push(0);
            }
            Value::Invalid => {}
        }
    }
}

fn assemble_block(
    ops: &[Op],
    no_debug: bool,
    words: &mut Vec<Word>,
    label_addr: &mut HashMap<i32, u32>,
) {
    for op in ops {
        if op.label() > 0 {
            label_addr.insert(op.label(), words.len() as u32);
        }
        match op.mnemonic() {
            Opcode::NOP => continue,
            Opcode::LINE => {
                if no_debug {
                    continue;
                }
                words.push(op.opcode_word());
                words.push(op.param_int() as u32);
            }
            _ => {
                words.push(op.opcode_word());
                match op.param() {
                    Some(Param::Int(v)) => words.push(v as u32),
                    Some(Param::Double(v)) => {
                        let bits = v.to_bits();
                        words.push(bits as u32);
                        words.push((bits >> 32) as u32);
                    }
                    None => {}
                }
            }
        }
    }
}

/// Rewrites branch operands from label ids to code offsets.
fn resolve_labels(words: &mut Vec<Word>, label_addr: &HashMap<i32, u32>, errors: &mut Errors) {
    let mut pc = 0;
    while pc < words.len() {
        let word = words[pc];
        pc += 1;
        let opcode = match mnemonic(word) {
            Some(op) => op,
            None => continue,
        };
        match opcode {
            Opcode::ENTRY
            | Opcode::LINE
            | Opcode::CALL
            | Opcode::INC
            | Opcode::DEC
            | Opcode::STO
            | Opcode::STOI
            | Opcode::RCL
            | Opcode::RCLI
            | Opcode::CLR
            | Opcode::RSZ
            | Opcode::FOR => pc += 1,
            Opcode::PUSH => {
                pc += if type_tag(word) == Type::Double { 2 } else { 1 };
            }
            Opcode::JUMP | Opcode::JZ | Opcode::JNZ | Opcode::JSR | Opcode::ERRHDL => {
                let label = words[pc] as i32;
                // ERRHDL 0 disables the handler and stays as is.
                if !(opcode == Opcode::ERRHDL && label == 0) {
                    match label_addr.get(&label) {
                        Some(offset) => words[pc] = *offset,
                        None if label < START_INTERNAL_LABEL_COUNTER => {
                            errors.add_error(-1, format!("Undefined line number: {}", label));
                        }
                        None => {
                            errors.add_error(-1, format!("Undefined internal label: {}", label));
                        }
                    }
                }
                pc += 1;
            }
            _ => {}
        }
    }
}

fn check_identifier_length(name: &str, errors: &mut Errors) {
    if name.len() > MAX_IDENTIFIER_LENGTH {
        errors.add_warning(
            -1,
            format!(
                "identifier length exceeds max. length ({} > {}): {}",
                name.len(),
                MAX_IDENTIFIER_LENGTH,
                name
            ),
        );
    }
}
