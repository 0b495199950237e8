use super::{op, string_constant};
use crate::address;
use crate::error::RuntimeError;
use crate::executable::Executable;
use crate::io::{OutputSink, RecordingSink, ScriptedInput, SinkEvent};
use crate::library::{find_function, Library};
use crate::memory::Memory;
use crate::opcodes::Opcode;
use crate::stack::Stack;
use crate::symbol::{Symbol, SymbolKind};
use crate::types::Type;
use crate::value::Value;
use std::sync::Arc;

struct Fixture {
    library: Library,
    sink: Arc<RecordingSink>,
    stack: Stack,
    mem: Memory,
    data: Executable,
}

fn fixture_with_input(lines: Vec<&str>) -> Fixture {
    let sink = Arc::new(RecordingSink::new());
    let library = Library::new(Arc::new(ScriptedInput::new(lines)), sink.clone());
    Fixture {
        library,
        sink,
        stack: Stack::new(),
        mem: Memory::new(),
        data: empty_executable(),
    }
}

fn fixture() -> Fixture {
    fixture_with_input(Vec::new())
}

fn empty_executable() -> Executable {
    let code = vec![op(Opcode::ENTRY, Type::Undefined), 0];
    Executable::from_parts(&code, &[], &[], &[], &[], &[]).unwrap()
}

/// An executable whose constant pool holds two DATA items.
fn data_executable() -> Executable {
    let code = vec![op(Opcode::ENTRY, Type::Undefined), 0];
    let mut text = string_constant("SWORD");
    let mut second = vec![1, 0, 0, 0, Type::Int32.id() as u8, 0, 0, 0];
    second.extend_from_slice(&7i32.to_le_bytes());
    text.extend_from_slice(&second);
    let csym = vec![
        Symbol::new("DATA_0", address::constant(0), Type::Str, SymbolKind::Constant),
        Symbol::new("DATA_1", address::constant(1), Type::Int32, SymbolKind::Constant),
    ];
    Executable::from_parts(&code, &text, &[], &[], &csym, &[]).unwrap()
}

fn call(f: &mut Fixture, name: &str) -> Result<(), RuntimeError> {
    let id = find_function(name).unwrap().id;
    f.library.execute(id, &mut f.mem, &mut f.stack, &f.data)
}

fn pop_str(f: &mut Fixture) -> String {
    f.stack.pop().unwrap().as_str()
}

// ---- string functions ----------------------------------------------------

#[test]
fn left_takes_a_prefix() {
    let mut f = fixture();
    f.stack.push(Value::Str("EAMON".to_string()));
    f.stack.push(Value::Int32(2));
    call(&mut f, "left$").unwrap();
    assert_eq!(pop_str(&mut f), "EA");
}

#[test]
fn left_clamps_to_the_whole_string() {
    let mut f = fixture();
    f.stack.push(Value::Str("EAMON".to_string()));
    f.stack.push(Value::Int32(99));
    call(&mut f, "left$").unwrap();
    assert_eq!(pop_str(&mut f), "EAMON");
}

#[test]
fn string_lengths_outside_basic_range_raise() {
    for n in [0, 256, -3].iter() {
        let mut f = fixture();
        f.stack.push(Value::Str("EAMON".to_string()));
        f.stack.push(Value::Int32(*n));
        assert!(matches!(
            call(&mut f, "left$"),
            Err(RuntimeError::IllegalQuantity)
        ));
    }
}

#[test]
fn right_takes_a_suffix() {
    let mut f = fixture();
    f.stack.push(Value::Str("EAMON".to_string()));
    f.stack.push(Value::Int32(3));
    call(&mut f, "right$").unwrap();
    assert_eq!(pop_str(&mut f), "MON");
}

#[test]
fn mid_is_one_based() {
    let mut f = fixture();
    f.stack.push(Value::Str("ADVENTURE".to_string()));
    f.stack.push(Value::Int32(3));
    f.stack.push(Value::Int32(4));
    call(&mut f, "mid$").unwrap();
    assert_eq!(pop_str(&mut f), "VENT");
}

#[test]
fn mid_past_the_end_is_empty() {
    let mut f = fixture();
    f.stack.push(Value::Str("HI".to_string()));
    f.stack.push(Value::Int32(5));
    f.stack.push(Value::Int32(2));
    call(&mut f, "mid$").unwrap();
    assert_eq!(pop_str(&mut f), "");
}

#[test]
fn mid1_takes_the_rest() {
    let mut f = fixture();
    f.stack.push(Value::Str("ADVENTURE".to_string()));
    f.stack.push(Value::Int32(6));
    call(&mut f, "mid1$").unwrap();
    assert_eq!(pop_str(&mut f), "TURE");
}

#[test]
fn chr_and_asc_round_trip() {
    let mut f = fixture();
    f.stack.push(Value::Int32(65));
    call(&mut f, "chr$").unwrap();
    assert_eq!(pop_str(&mut f), "A");
    f.stack.push(Value::Str("APPLE".to_string()));
    call(&mut f, "asc").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(65));
}

#[test]
fn asc_of_empty_string_raises() {
    let mut f = fixture();
    f.stack.push(Value::Str(String::new()));
    assert!(matches!(
        call(&mut f, "asc"),
        Err(RuntimeError::IllegalQuantity)
    ));
}

#[test]
fn val_parses_leading_number() {
    let mut f = fixture();
    f.stack.push(Value::Str("12.5 GOLD".to_string()));
    call(&mut f, "val").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Double(12.5));
    f.stack.push(Value::Str("GOLD".to_string()));
    call(&mut f, "val").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Double(0.0));
}

#[test]
fn str_formats_numbers() {
    let mut f = fixture();
    f.stack.push(Value::Double(15.0));
    call(&mut f, "str$").unwrap();
    assert_eq!(pop_str(&mut f), "15");
}

#[test]
fn spc_builds_blanks() {
    let mut f = fixture();
    f.stack.push(Value::Int32(3));
    call(&mut f, "spc").unwrap();
    assert_eq!(pop_str(&mut f), "   ");
}

// ---- numerics ------------------------------------------------------------

#[test]
fn int_floors() {
    let mut f = fixture();
    f.stack.push(Value::Double(2.9));
    call(&mut f, "int").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(2));
    f.stack.push(Value::Double(-2.1));
    call(&mut f, "int").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(-3));
}

#[test]
fn sgn_returns_the_sign() {
    for (v, expected) in [(-4.0, -1), (0.0, 0), (9.0, 1)].iter() {
        let mut f = fixture();
        f.stack.push(Value::Double(*v));
        call(&mut f, "sgn").unwrap();
        assert_eq!(f.stack.pop().unwrap(), Value::Int32(*expected));
    }
}

#[test]
fn rnd_is_deterministic_after_seeding() {
    let draw = |seed: i32| -> Vec<f64> {
        let mut f = fixture();
        f.stack.push(Value::Int32(seed));
        call(&mut f, "rnd").unwrap();
        f.stack.pop().unwrap();
        let mut values = Vec::new();
        for _ in 0..5 {
            f.stack.push(Value::Int32(1));
            call(&mut f, "rnd").unwrap();
            values.push(f.stack.pop().unwrap().as_double().unwrap());
        }
        values
    };
    assert_eq!(draw(-77), draw(-77));
}

#[test]
fn rnd_zero_repeats_the_last_sample() {
    let mut f = fixture();
    f.stack.push(Value::Int32(-5));
    call(&mut f, "rnd").unwrap();
    f.stack.pop().unwrap();
    f.stack.push(Value::Int32(1));
    call(&mut f, "rnd").unwrap();
    let drawn = f.stack.pop().unwrap();
    f.stack.push(Value::Int32(0));
    call(&mut f, "rnd").unwrap();
    assert_eq!(f.stack.pop().unwrap(), drawn);
}

#[test]
fn fre_reports_a_constant() {
    let mut f = fixture();
    f.stack.push(Value::Int32(0));
    call(&mut f, "fre").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(0xFFFF));
}

// ---- print and DOS mode --------------------------------------------------

fn push_print_arg(f: &mut Fixture, v: Value, t: Type) {
    f.stack.push(v);
    f.stack.push(Value::Int32(t.id() as i32));
    f.stack.push(Value::Int32(1));
}

#[test]
fn print_writes_rendered_arguments() {
    let mut f = fixture();
    push_print_arg(&mut f, Value::Str("HI".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    push_print_arg(&mut f, Value::Double(6.0), Type::Double);
    call(&mut f, "print").unwrap();
    assert_eq!(f.sink.writes(), vec!["HI".to_string(), "6".to_string()]);
    assert_eq!(f.stack.len(), 0);
}

#[test]
fn ctrl_d_enters_dos_mode_and_run_chains() {
    let mut f = fixture();
    push_print_arg(&mut f, Value::Str("\u{4}".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    push_print_arg(&mut f, Value::Str("RUN OTHER".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    push_print_arg(&mut f, Value::Str("\n".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    // Nothing reached the screen; the VM is asked to stop with the chain
    // name recorded.
    assert!(f.sink.writes().is_empty());
    assert!(f.library.is_terminate_requested());
    assert_eq!(f.library.chained_file(), "OTHER");
}

#[test]
fn inverse_normal_home_reach_the_sink() {
    let mut f = fixture();
    call(&mut f, "inverse").unwrap();
    call(&mut f, "normal").unwrap();
    call(&mut f, "home").unwrap();
    assert_eq!(
        f.sink.events(),
        vec![SinkEvent::Inverse, SinkEvent::Normal, SinkEvent::Home]
    );
}

#[test]
fn vtab_and_htab_are_one_based() {
    let mut f = fixture();
    f.stack.push(Value::Double(5.0));
    call(&mut f, "vtab").unwrap();
    f.stack.push(Value::Double(10.0));
    call(&mut f, "htab").unwrap();
    assert_eq!(
        f.sink.events(),
        vec![SinkEvent::GotoRow(4), SinkEvent::GotoColumn(9)]
    );
}

// ---- input/get -----------------------------------------------------------

fn push_input_request(f: &mut Fixture, types: &[Type], prompt: i32) {
    for t in types {
        f.stack.push(Value::Int32(t.id() as i32));
    }
    f.stack.push(Value::Int32(types.len() as i32));
    f.stack.push(Value::Int32(prompt));
}

#[test]
fn input_splits_fields_quote_aware() {
    let mut f = fixture_with_input(vec!["\"NORTH, WEST\",3"]);
    push_input_request(&mut f, &[Type::Str, Type::Double], 1);
    call(&mut f, "input").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(2));
    assert_eq!(f.stack.pop().unwrap(), Value::Double(3.0));
    assert_eq!(f.stack.pop().unwrap(), Value::Str("NORTH, WEST".to_string()));
    // The empty prompt was emitted before reading.
    assert_eq!(f.sink.writes(), vec!["".to_string()]);
}

#[test]
fn input_prompts_again_for_missing_fields() {
    let mut f = fixture_with_input(vec!["1", "2"]);
    push_input_request(&mut f, &[Type::Int32, Type::Int32], 1);
    call(&mut f, "input").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(2));
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(2));
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(1));
    assert_eq!(f.sink.writes(), vec!["".to_string(), "??".to_string()]);
}

#[test]
fn get_reads_one_character() {
    let mut f = fixture_with_input(vec!["Y"]);
    f.stack.push(Value::Int32(Type::Str.id() as i32));
    call(&mut f, "get").unwrap();
    assert_eq!(pop_str(&mut f), "Y");
}

#[test]
fn get_numeric_maps_digits() {
    let mut f = fixture_with_input(vec!["7"]);
    f.stack.push(Value::Int32(Type::Int32.id() as i32));
    call(&mut f, "get").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(7));
}

// ---- read/data -----------------------------------------------------------

#[test]
fn read_fetches_data_constants_in_order() {
    let mut f = fixture();
    f.data = data_executable();
    f.stack.push(Value::Int32(0));
    f.stack.push(Value::Int32(Type::Str.id() as i32));
    call(&mut f, "read").unwrap();
    assert_eq!(pop_str(&mut f), "SWORD");
    f.stack.push(Value::Int32(1));
    f.stack.push(Value::Int32(Type::Int32.id() as i32));
    call(&mut f, "read").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(7));
}

#[test]
fn read_past_the_data_raises_out_of_data() {
    let mut f = fixture();
    f.data = data_executable();
    f.stack.push(Value::Int32(2));
    f.stack.push(Value::Int32(Type::Int32.id() as i32));
    assert!(matches!(
        call(&mut f, "read"),
        Err(RuntimeError::OutOfData)
    ));
}

// ---- peek/poke -----------------------------------------------------------

#[test]
fn peek_reports_cursor_and_magic_addresses() {
    let mut f = fixture();
    f.sink.write("ABC");
    f.stack.push(Value::Int32(36));
    call(&mut f, "peek").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(3));
    for (addr, expected) in [(105, 0x69), (106, 0), (111, 0x69), (112, 0)].iter() {
        f.stack.push(Value::Int32(*addr));
        call(&mut f, "peek").unwrap();
        assert_eq!(f.stack.pop().unwrap(), Value::Int32(*expected));
    }
    f.stack.push(Value::Int32(222));
    call(&mut f, "peek").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(0));
}

#[test]
fn poke_toggles_screen_modes_and_pages() {
    use crate::io::ScreenMode;
    let mut f = fixture();
    for (addr, _) in [(0xC050, 0), (0xC051, 0)].iter() {
        f.stack.push(Value::Int32(*addr));
        f.stack.push(Value::Int32(0));
        call(&mut f, "poke").unwrap();
    }
    f.stack.push(Value::Int32(0xC055));
    f.stack.push(Value::Int32(0));
    call(&mut f, "poke").unwrap();
    assert_eq!(
        f.sink.events(),
        vec![
            SinkEvent::SetScreenMode(ScreenMode::Graphics),
            SinkEvent::SetScreenMode(ScreenMode::Text),
            SinkEvent::HiresLoaded,
        ]
    );
}

// ---- printf --------------------------------------------------------------

/// Pushes `printf` arguments: format first, then the values.
fn push_printf(f: &mut Fixture, format: &str, args: &[(Value, Type)]) {
    f.stack.push(Value::Str(format.to_string()));
    f.stack.push(Value::Int32(Type::Str.id() as i32));
    for (v, t) in args {
        f.stack.push(v.clone());
        f.stack.push(Value::Int32(t.id() as i32));
    }
    f.stack.push(Value::Int32(args.len() as i32 + 1));
}

#[test]
fn printf_renders_number_fields() {
    let mut f = fixture();
    push_printf(
        &mut f,
        "###.##",
        &[(Value::Double(3.5), Type::Double)],
    );
    call(&mut f, "printf").unwrap();
    assert_eq!(f.sink.text(), " 3.50");
}

#[test]
fn printf_pads_fixed_width_strings() {
    let mut f = fixture();
    push_printf(
        &mut f,
        "\\...\\!",
        &[
            (Value::Str("AXE".to_string()), Type::Str),
            (Value::Str("Q".to_string()), Type::Str),
        ],
    );
    call(&mut f, "printf").unwrap();
    assert_eq!(f.sink.text(), "AXE  Q");
}

// ---- snapshots -----------------------------------------------------------

#[test]
fn bsave_bload_round_trips_memory() {
    let dir = std::env::temp_dir().join(format!("abasic-snap-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let mut f = fixture();
    f.library.set_disk(dir.to_str().unwrap());
    f.mem.reset(2);
    f.mem.store(Value::Int32(123), 0, 0).unwrap();
    f.mem.store(Value::Str("SAVED".to_string()), 1, 0).unwrap();

    let dos = |f: &mut Fixture, command: &str| {
        push_print_arg(f, Value::Str("\u{4}".to_string()), Type::Str);
        call(f, "print").unwrap();
        push_print_arg(f, Value::Str(command.to_string()), Type::Str);
        call(f, "print").unwrap();
        push_print_arg(f, Value::Str("\n".to_string()), Type::Str);
        call(f, "print").unwrap();
    };

    dos(&mut f, "BSAVE STATE,A$69");
    f.mem.reset(2);
    assert_eq!(f.mem.value(0, 0).unwrap(), &Value::Int32(0));
    dos(&mut f, "BLOAD STATE,A$69");

    assert_eq!(f.mem.value(0, 0).unwrap(), &Value::Int32(123));
    assert_eq!(f.mem.value(1, 0).unwrap(), &Value::Str("SAVED".to_string()));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn bload_fills_a_hires_page() {
    let dir = std::env::temp_dir().join(format!("abasic-hires-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let page: Vec<u8> = (0..8192u32).map(|i| (i & 0xFF) as u8).collect();
    std::fs::write(dir.join("cave"), &page).unwrap();

    let mut f = fixture();
    f.library.set_disk(dir.to_str().unwrap());
    push_print_arg(&mut f, Value::Str("\u{4}".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    push_print_arg(&mut f, Value::Str("BLOAD CAVE,A$2000".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    push_print_arg(&mut f, Value::Str("\n".to_string()), Type::Str);
    call(&mut f, "print").unwrap();

    assert_eq!(f.library.hires_page(), &page[..]);
    assert!(f.sink.events().contains(&SinkEvent::HiresLoaded));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn verify_missing_file_raises_file_not_found() {
    let mut f = fixture();
    f.library.set_disk(std::env::temp_dir().to_str().unwrap());
    push_print_arg(&mut f, Value::Str("\u{4}".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    push_print_arg(
        &mut f,
        Value::Str("VERIFY NO SUCH FILE".to_string()),
        Type::Str,
    );
    call(&mut f, "print").unwrap();
    push_print_arg(&mut f, Value::Str("\n".to_string()), Type::Str);
    let err = call(&mut f, "print");
    assert!(matches!(err, Err(RuntimeError::FileNotFound)));
    // The error code is visible to BASIC via PEEK(222).
    f.stack.push(Value::Int32(222));
    call(&mut f, "peek").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(6));
}

#[test]
fn sequential_file_write_and_read_back() {
    let dir = std::env::temp_dir().join(format!("abasic-seq-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let mut f = fixture();
    f.library.set_disk(dir.to_str().unwrap());
    let dos = |f: &mut Fixture, command: &str| {
        push_print_arg(f, Value::Str("\u{4}".to_string()), Type::Str);
        call(f, "print").unwrap();
        push_print_arg(f, Value::Str(command.to_string()), Type::Str);
        call(f, "print").unwrap();
        push_print_arg(f, Value::Str("\n".to_string()), Type::Str);
        call(f, "print").unwrap();
    };

    dos(&mut f, "OPEN LOG");
    dos(&mut f, "WRITE LOG");
    push_print_arg(&mut f, Value::Str("FIRST LINE\n".to_string()), Type::Str);
    call(&mut f, "print").unwrap();
    // Closing flushes the buffered lines to disk.
    dos(&mut f, "CLOSE LOG");

    dos(&mut f, "OPEN LOG");
    dos(&mut f, "READ LOG");
    push_input_request(&mut f, &[Type::Str], 1);
    call(&mut f, "input").unwrap();
    assert_eq!(f.stack.pop().unwrap(), Value::Int32(1));
    assert_eq!(pop_str(&mut f), "FIRST LINE");
    dos(&mut f, "CLOSE LOG");

    std::fs::remove_dir_all(&dir).unwrap();
}
