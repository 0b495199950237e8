use super::{op, program, string_constant};
use crate::address;
use crate::error::RuntimeError;
use crate::io::{RecordingSink, ScriptedInput};
use crate::opcodes::Opcode::*;
use crate::symbol::SymbolKind;
use crate::types::Type;
use crate::value::Value;
use crate::vm::Vm;
use crate::{Executable, Word};
use std::sync::Arc;

fn new_vm() -> (Vm, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let vm = Vm::new(Arc::new(ScriptedInput::new(Vec::<String>::new())), sink.clone());
    (vm, sink)
}

fn run(chunks: u32, code: &[Word]) -> Vm {
    run_with_text(chunks, code, &[])
}

fn run_with_text(chunks: u32, code: &[Word], text: &[u8]) -> Vm {
    let x = program(chunks, code, text);
    let (mut vm, _sink) = new_vm();
    vm.run_executable(Arc::new(x)).unwrap();
    vm
}

fn value(vm: &Vm, addr: u32, offset: i32) -> Value {
    vm.memory().value(addr, offset).unwrap().clone()
}

#[test]
fn arithmetic_and_store() {
    let vm = run(
        1,
        &[
            op(PUSH, Type::Int32),
            40,
            op(PUSH, Type::Int32),
            2,
            op(ARIADD, Type::Undefined),
            op(STO, Type::Int32),
            address::global(0),
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 0), Value::Int32(42));
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn double_literals_take_two_words() {
    let bits = 2.5f64.to_bits();
    let vm = run(
        1,
        &[
            op(PUSH, Type::Double),
            bits as u32,
            (bits >> 32) as u32,
            op(STO, Type::Double),
            address::global(0),
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 0), Value::Double(2.5));
}

#[test]
fn store_coerces_to_the_tagged_type() {
    let vm = run(
        1,
        &[
            op(PUSH, Type::Int32),
            7,
            op(STO, Type::Str),
            address::global(0),
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 0), Value::Str("7".to_string()));
}

#[test]
fn push_string_reads_the_constant_pool() {
    let vm = run_with_text(
        1,
        &[
            op(PUSH, Type::Str),
            address::constant(0),
            op(STO, Type::Str),
            address::global(0),
            op(END, Type::Undefined),
        ],
        &string_constant("HI"),
    );
    assert_eq!(value(&vm, 0, 0), Value::Str("HI".to_string()));
}

#[test]
fn indexed_store_and_recall() {
    let vm = run(
        1,
        &[
            // Resize chunk 0 to four slots.
            op(PUSH, Type::Int32),
            4,
            op(RSZ, Type::Int32),
            address::global(0),
            // chunk[2] = 9 (value on top of index, swapped in).
            op(PUSH, Type::Int32),
            2,
            op(PUSH, Type::Int32),
            9,
            op(SWAP, Type::Int32),
            op(STOI, Type::Int32),
            address::global(0),
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 2), Value::Int32(9));
    assert_eq!(value(&vm, 0, 3), Value::Int32(0));
}

#[test]
fn conditional_jumps_consume_the_condition() {
    // JZ over a store; the store must not run.
    let vm = run(
        1,
        &[
            op(PUSH, Type::Int32),
            0,
            op(JZ, Type::Undefined),
            10,
            op(PUSH, Type::Int32),
            1,
            op(STO, Type::Int32),
            address::global(0),
            // offset 10:
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 0), Value::Int32(0));
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn jsr_pushes_the_return_offset() {
    // 2: JSR 5; 4: END; 5: RET
    let vm = run(
        0,
        &[
            op(JSR, Type::Undefined),
            5,
            op(END, Type::Undefined),
            op(RET, Type::Undefined),
        ],
    );
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn for_next_accumulates() {
    // S (chunk 0) = sum of I (chunk 1) over 1..=5.
    let vm = run(
        2,
        &[
            // I = 1
            op(PUSH, Type::Int32),
            1,
            op(STO, Type::Double),
            address::global(1),
            // limit 5, step 1
            op(PUSH, Type::Int32),
            5,
            op(PUSH, Type::Int32),
            1,
            op(FOR, Type::Double),
            address::global(1),
            // body: S = S + I
            op(RCL, Type::Double),
            address::global(0),
            op(RCL, Type::Double),
            address::global(1),
            op(ARIADD, Type::Undefined),
            op(STO, Type::Double),
            address::global(0),
            op(NEXT, Type::Undefined),
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 0), Value::Double(15.0));
    assert_eq!(value(&vm, 1, 0), Value::Double(6.0));
    assert_eq!(vm.stack_depth(), 0);
}

#[test]
fn error_handler_catches_division_by_zero() {
    let vm = run(
        1,
        &[
            op(ERRHDL, Type::Undefined),
            11,
            op(PUSH, Type::Int32),
            1,
            op(PUSH, Type::Int32),
            0,
            op(ARIDIV, Type::Undefined),
            // never reached
            op(END, Type::Undefined),
            op(NOP, Type::Undefined),
            // offset 11: handler
            op(PUSH, Type::Int32),
            42,
            op(STO, Type::Int32),
            address::global(0),
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 0), Value::Int32(42));
}

#[test]
fn error_inside_handler_is_fatal() {
    let x = program(
        1,
        &[
            op(ERRHDL, Type::Undefined),
            9,
            op(PUSH, Type::Int32),
            1,
            op(PUSH, Type::Int32),
            0,
            op(ARIDIV, Type::Undefined),
            // offset 9: the handler divides by zero again.
            op(PUSH, Type::Int32),
            1,
            op(PUSH, Type::Int32),
            0,
            op(ARIDIV, Type::Undefined),
            op(END, Type::Undefined),
        ],
        &[],
    );
    let (mut vm, _sink) = new_vm();
    let err = vm.run_executable(Arc::new(x)).unwrap_err();
    assert!(matches!(err.source, RuntimeError::IllegalOperation));
}

#[test]
fn stack_underflow_surfaces() {
    let x = program(0, &[op(POP, Type::Undefined), op(END, Type::Undefined)], &[]);
    let (mut vm, _sink) = new_vm();
    let err = vm.run_executable(Arc::new(x)).unwrap_err();
    assert!(matches!(err.source, RuntimeError::StackUnderflow));
}

#[test]
fn unknown_opcode_surfaces() {
    let x = program(0, &[0xFFu32, op(END, Type::Undefined)], &[]);
    let (mut vm, _sink) = new_vm();
    let err = vm.run_executable(Arc::new(x)).unwrap_err();
    assert!(matches!(err.source, RuntimeError::UnknownOpcode(_)));
}

#[test]
fn cast_changes_the_tag() {
    let vm = run(
        1,
        &[
            op(PUSH, Type::Double),
            2.75f64.to_bits() as u32,
            (2.75f64.to_bits() >> 32) as u32,
            op(CAST, Type::Int32),
            op(STO, Type::Int32),
            address::global(0),
            op(END, Type::Undefined),
        ],
    );
    assert_eq!(value(&vm, 0, 0), Value::Int32(3));
}

#[test]
fn clr_restores_typed_zero_after_stores() {
    let vm = run(
        1,
        &[
            op(PUSH, Type::Int32),
            3,
            op(RSZ, Type::Double),
            address::global(0),
            op(PUSH, Type::Int32),
            1,
            op(PUSH, Type::Int32),
            8,
            op(SWAP, Type::Int32),
            op(STOI, Type::Double),
            address::global(0),
            op(CLR, Type::Double),
            address::global(0),
            op(END, Type::Undefined),
        ],
    );
    for i in 0..3 {
        assert_eq!(value(&vm, 0, i), Value::Double(0.0));
    }
}

#[test]
fn value_of_reads_variables_by_symbol_name() {
    use crate::symbol::Symbol;
    let code = vec![
        op(ENTRY, Type::Undefined),
        1,
        op(PUSH, Type::Int32),
        11,
        op(STO, Type::Int32),
        address::global(0),
        op(END, Type::Undefined),
    ];
    let vsym = vec![Symbol::new(
        "sc%",
        address::global(0),
        Type::Int32,
        SymbolKind::Variable,
    )];
    let x = Executable::from_parts(&code, &[], &[], &[], &[], &vsym).unwrap();
    let (mut vm, _sink) = new_vm();
    vm.run_executable(Arc::new(x)).unwrap();
    assert_eq!(
        vm.value_of(SymbolKind::Variable, "sc%", 0),
        Value::Int32(11)
    );
    assert_eq!(vm.value_of(SymbolKind::Variable, "zz", 0), Value::Invalid);
}

#[test]
fn end_sets_the_pause_state() {
    let x = program(0, &[op(END, Type::Undefined)], &[]);
    let (mut vm, _sink) = new_vm();
    vm.load(Arc::new(x));
    vm.run().unwrap();
    // Halted on END: not resumable.
    assert!(!vm.is_paused());
    vm.resume().unwrap();
}
