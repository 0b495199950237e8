use super::{op, program, string_constant};
use crate::address;
use crate::executable::{Executable, LoadError};
use crate::symbol::{Symbol, SymbolKind};
use crate::types::Type;
use crate::value::Value;
use crate::opcodes::Opcode;

fn symbols() -> (Vec<Symbol>, Vec<Symbol>, Vec<Symbol>) {
    let functions = vec![Symbol::new("fn", 0, Type::Double, SymbolKind::Function)];
    let constants = vec![Symbol::new(
        "DATA_0",
        address::constant(0),
        Type::Str,
        SymbolKind::Constant,
    )];
    let variables = vec![
        Symbol::new("a", address::global(0), Type::Double, SymbolKind::Variable),
        Symbol::new("b$", address::global(1), Type::Str, SymbolKind::Variable),
    ];
    (functions, constants, variables)
}

fn sample() -> Executable {
    let code = vec![
        op(Opcode::ENTRY, Type::Undefined),
        2,
        op(Opcode::END, Type::Undefined),
    ];
    let (fsym, csym, vsym) = symbols();
    Executable::from_parts(
        &code,
        &string_constant("HELLO"),
        &[4],
        &fsym,
        &csym,
        &vsym,
    )
    .unwrap()
}

#[test]
fn save_load_round_trip_is_byte_identical() {
    let x = sample();
    let mut bytes = Vec::new();
    x.save(&mut bytes).unwrap();
    let reloaded = Executable::load(&mut &bytes[..]).unwrap();
    assert_eq!(x.as_bytes(), reloaded.as_bytes());
    assert_eq!(x, reloaded);
}

#[test]
fn code_words_survive_the_round_trip() {
    let x = sample();
    let mut bytes = Vec::new();
    x.save(&mut bytes).unwrap();
    let reloaded = Executable::load(&mut &bytes[..]).unwrap();
    assert_eq!(reloaded.code(), x.code());
    assert_eq!(reloaded.code_len(), 3);
}

#[test]
fn constants_decode_from_the_text_segment() {
    let x = sample();
    assert_eq!(
        x.constant(address::constant(0), 0).unwrap(),
        Value::Str("HELLO".to_string())
    );
    assert_eq!(x.constant_array(address::constant(0)).unwrap().len(), 1);
    assert!(x.constant(address::constant(1), 0).is_err());
    assert!(x.constant(address::constant(0), 2).is_err());
}

#[test]
fn symbols_resolve_by_name_and_kind() {
    let x = sample();
    let b = x.find_symbol("b$", SymbolKind::Variable).unwrap();
    assert_eq!(b.address(), address::global(1));
    assert_eq!(b.value_type(), Type::Str);
    assert!(x.find_symbol("b$", SymbolKind::Function).is_none());
    assert!(x.find_constant("DATA_0").is_some());
    assert_eq!(x.symbol_table(SymbolKind::Variable).len(), 2);
    assert_eq!(x.vtable(), &[4]);
}

#[test]
fn malformed_text_segment_is_rejected() {
    let code = vec![op(Opcode::ENTRY, Type::Undefined), 0];
    // A string constant without its terminating NUL.
    let mut text = vec![1, 0, 0, 0, Type::Str.id() as u8, 0, 0, 0];
    text.extend_from_slice(b"OOPS");
    let result = Executable::from_parts(&code, &text, &[], &[], &[], &[]);
    assert!(matches!(result, Err(LoadError::BadText(_))));
}

#[test]
fn symbol_records_have_fixed_width() {
    let symbol = Symbol::new(
        "averyveryverylongidentifiername!!!",
        7,
        Type::Double,
        SymbolKind::Variable,
    );
    let mut buf = Vec::new();
    symbol.write_to(&mut buf);
    assert_eq!(buf.len(), crate::symbol::SYMBOL_RECORD_SIZE);
    let decoded = Symbol::read_from(&buf);
    // The name is truncated to the record's fixed width.
    assert_eq!(decoded.name().len(), crate::symbol::MAX_IDENTIFIER_LENGTH);
    assert_eq!(decoded.address(), 7);
    assert_eq!(decoded.value_type(), Type::Double);
    assert_eq!(decoded.kind(), SymbolKind::Variable);
}

#[test]
fn helper_program_runs_through_from_parts() {
    let x = program(1, &[op(Opcode::END, Type::Undefined)], &[]);
    assert_eq!(x.code_len(), 3);
}
