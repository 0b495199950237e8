//! Renders an executable's code segment as readable mnemonics.

use crate::address;
use crate::library;
use crate::opcodes::{mnemonic, type_tag, Opcode};
use crate::types::Type;
use crate::Executable;
use std::io::{self, Write};

/// Writes one line per instruction: code offset, mnemonic with type suffix
/// and decoded operands. Library calls resolve to their function name.
pub fn disassemble<W: Write>(x: &Executable, out: &mut W) -> io::Result<()> {
    let code = x.code();
    let mut pc = 0;
    while pc < code.len() {
        let word = code[pc];
        let offset = pc;
        pc += 1;
        let opcode = match mnemonic(word) {
            Some(op) => op,
            None => {
                writeln!(out, "{:6}  ??? {:#010x}", offset, word)?;
                continue;
            }
        };
        let t = type_tag(word);
        match opcode {
            Opcode::ENTRY => {
                let chunks = next(code, &mut pc);
                writeln!(out, "{:6}  ENTRY {}", offset, chunks)?;
            }
            Opcode::PUSH => {
                if t == Type::Double {
                    let low = next(code, &mut pc);
                    let high = next(code, &mut pc);
                    let v = f64::from_bits(u64::from(low) | (u64::from(high) << 32));
                    writeln!(out, "{:6}  PUSH.{} {}", offset, t.type_string(), v)?;
                } else if t == Type::Int32 {
                    let v = next(code, &mut pc) as i32;
                    writeln!(out, "{:6}  PUSH.{} {}", offset, t.type_string(), v)?;
                } else {
                    let addr = next(code, &mut pc);
                    writeln!(
                        out,
                        "{:6}  PUSH.{} {}",
                        offset,
                        t.type_string(),
                        format_addr(addr)
                    )?;
                }
            }
            Opcode::STO
            | Opcode::STOI
            | Opcode::RCL
            | Opcode::RCLI
            | Opcode::CLR
            | Opcode::RSZ => {
                let addr = next(code, &mut pc);
                writeln!(
                    out,
                    "{:6}  {}.{} {}",
                    offset,
                    opcode,
                    t.type_string(),
                    format_addr(addr)
                )?;
            }
            Opcode::INC | Opcode::DEC => {
                let addr = next(code, &mut pc);
                writeln!(out, "{:6}  {} {}", offset, opcode, format_addr(addr))?;
            }
            Opcode::JUMP | Opcode::JZ | Opcode::JNZ | Opcode::JSR | Opcode::ERRHDL => {
                let target = next(code, &mut pc);
                writeln!(out, "{:6}  {} @{}", offset, opcode, target)?;
            }
            Opcode::FOR => {
                let addr = next(code, &mut pc);
                writeln!(out, "{:6}  FOR {}", offset, format_addr(addr))?;
            }
            Opcode::CALL => {
                let id = (next(code, &mut pc) & 0xFFFF) as u16;
                match library::function_by_id(id) {
                    Some(f) => writeln!(out, "{:6}  CALL {}", offset, f.name)?,
                    None => writeln!(out, "{:6}  CALL #{}", offset, id)?,
                }
            }
            Opcode::LINE => {
                let line = next(code, &mut pc);
                writeln!(out, "{:6}  .line {}", offset, line)?;
            }
            Opcode::CAST => writeln!(out, "{:6}  CAST.{}", offset, t.type_string())?,
            other => writeln!(out, "{:6}  {}", offset, other)?,
        }
    }
    Ok(())
}

fn next(code: &[u32], pc: &mut usize) -> u32 {
    let word = code.get(*pc).copied().unwrap_or(0);
    *pc += 1;
    word
}

fn format_addr(addr: u32) -> String {
    if address::is_constant(addr) {
        format!("c:{}", address::index(addr))
    } else {
        format!("g:{}", address::index(addr))
    }
}
