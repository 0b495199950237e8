use crate::memory::Memory;
use crate::value::Value;

#[test]
fn chunks_start_as_integer_zero() {
    let mut mem = Memory::new();
    mem.reset(3);
    assert_eq!(mem.len(), 3);
    assert_eq!(mem.value(2, 0).unwrap(), &Value::Int32(0));
}

#[test]
fn store_and_read_back() {
    let mut mem = Memory::new();
    mem.reset(2);
    mem.store(Value::Str("HI".to_string()), 1, 0).unwrap();
    assert_eq!(mem.value(1, 0).unwrap(), &Value::Str("HI".to_string()));
}

#[test]
fn out_of_range_chunk_is_an_error() {
    let mut mem = Memory::new();
    mem.reset(1);
    assert!(mem.value(4, 0).is_err());
    assert!(mem.store(Value::Int32(1), 4, 0).is_err());
    assert!(mem.value(0, 3).is_err());
}

#[test]
fn resize_fills_with_typed_zero() {
    let mut mem = Memory::new();
    mem.reset(1);
    mem.store(Value::Double(9.5), 0, 0).unwrap();
    mem.resize(0, 4).unwrap();
    for i in 0..4 {
        assert_eq!(mem.value(0, i).unwrap(), &Value::Double(0.0));
    }
}

#[test]
fn clr_resets_every_slot() {
    let mut mem = Memory::new();
    mem.reset(1);
    mem.resize(0, 3).unwrap();
    for i in 0..3 {
        mem.store(Value::Int32(i + 1), 0, i).unwrap();
    }
    mem.clr(&Value::Int32(0), 0).unwrap();
    for i in 0..3 {
        assert_eq!(mem.value(0, i).unwrap(), &Value::Int32(0));
    }
}

#[test]
fn inc_dec_slot_zero() {
    let mut mem = Memory::new();
    mem.reset(1);
    mem.inc(0).unwrap();
    mem.inc(0).unwrap();
    mem.dec(0).unwrap();
    assert_eq!(mem.value(0, 0).unwrap(), &Value::Int32(1));
}

#[test]
fn snapshot_round_trips_exactly() {
    let mut mem = Memory::new();
    mem.reset(3);
    mem.store(Value::Int32(-4), 0, 0).unwrap();
    mem.resize(1, 2).unwrap();
    mem.store(Value::Str("EAMON".to_string()), 1, 1).unwrap();
    mem.store(Value::Double(0.125), 2, 0).unwrap();

    let snapshot = mem.save();

    let mut restored = Memory::new();
    restored.restore(&snapshot);
    assert_eq!(restored.len(), 3);
    assert_eq!(restored.value(0, 0).unwrap(), &Value::Int32(-4));
    assert_eq!(restored.value(1, 1).unwrap(), &Value::Str("EAMON".to_string()));
    assert_eq!(restored.value(2, 0).unwrap(), &Value::Double(0.125));
    // And the re-serialized form is identical.
    assert_eq!(restored.save(), snapshot);
}
