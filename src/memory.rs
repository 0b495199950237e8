use crate::error::RuntimeError;
use crate::value::Value;
use serde_json::json;

/// A variable's storage: one or more values.
///
/// Scalars have length 1; arrays have the declared element count. A chunk
/// tracks only values, the element type comes from the instruction that
/// accesses it.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub values: Vec<Value>,
}

impl Default for Chunk {
    fn default() -> Chunk {
        Chunk {
            values: vec![Value::Int32(0)],
        }
    }
}

impl Chunk {
    pub fn to_json(&self) -> serde_json::Value {
        let values: Vec<serde_json::Value> = self.values.iter().map(Value::to_json).collect();
        json!({ "values": values })
    }

    pub fn from_json(j: &serde_json::Value) -> Chunk {
        let values = match j.get("values").and_then(|v| v.as_array()) {
            Some(list) => list.iter().map(Value::from_json).collect(),
            None => Vec::new(),
        };
        Chunk { values }
    }
}

/// The VM's global variable memory: a dense vector of chunks indexed by the
/// low bits of a global address.
#[derive(Default)]
pub struct Memory {
    mem: Vec<Chunk>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory::default()
    }

    /// Drops all chunks and reallocates `size` default chunks.
    pub fn reset(&mut self, size: u32) {
        self.mem.clear();
        self.mem.resize(size as usize, Chunk::default());
    }

    pub fn len(&self) -> usize {
        self.mem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    pub fn value(&self, addr: u32, offset: i32) -> Result<&Value, RuntimeError> {
        self.chunk(addr)?
            .values
            .get(to_offset(addr, offset)?)
            .ok_or(RuntimeError::BadAddress(addr))
    }

    pub fn store(&mut self, v: Value, addr: u32, offset: i32) -> Result<(), RuntimeError> {
        let index = to_offset(addr, offset)?;
        let slot = self
            .chunk_mut(addr)?
            .values
            .get_mut(index)
            .ok_or(RuntimeError::BadAddress(addr))?;
        *slot = v;
        Ok(())
    }

    /// Sets every slot of the chunk to `zero`.
    pub fn clr(&mut self, zero: &Value, addr: u32) -> Result<(), RuntimeError> {
        for v in self.chunk_mut(addr)?.values.iter_mut() {
            *v = zero.clone();
        }
        Ok(())
    }

    pub fn inc(&mut self, addr: u32) -> Result<(), RuntimeError> {
        self.slot0_mut(addr)?.inc()
    }

    pub fn dec(&mut self, addr: u32) -> Result<(), RuntimeError> {
        self.slot0_mut(addr)?.dec()
    }

    /// Resizes the chunk to `size` slots, all reset to the zero of the
    /// chunk's current slot-0 type.
    pub fn resize(&mut self, addr: u32, size: u32) -> Result<(), RuntimeError> {
        let chunk = self.chunk_mut(addr)?;
        let mut zero = chunk
            .values
            .first()
            .cloned()
            .unwrap_or(Value::Int32(0));
        zero.clear();
        chunk.values.clear();
        chunk.values.resize(size as usize, zero);
        Ok(())
    }

    pub fn save(&self) -> serde_json::Value {
        let chunks: Vec<serde_json::Value> = self.mem.iter().map(Chunk::to_json).collect();
        json!({ "mem": chunks })
    }

    pub fn restore(&mut self, j: &serde_json::Value) {
        self.mem.clear();
        if let Some(list) = j.get("mem").and_then(|v| v.as_array()) {
            for chunk in list {
                self.mem.push(Chunk::from_json(chunk));
            }
        }
    }

    fn chunk(&self, addr: u32) -> Result<&Chunk, RuntimeError> {
        self.mem
            .get(addr as usize)
            .ok_or(RuntimeError::BadAddress(addr))
    }

    fn chunk_mut(&mut self, addr: u32) -> Result<&mut Chunk, RuntimeError> {
        self.mem
            .get_mut(addr as usize)
            .ok_or(RuntimeError::BadAddress(addr))
    }

    fn slot0_mut(&mut self, addr: u32) -> Result<&mut Value, RuntimeError> {
        self.chunk_mut(addr)?
            .values
            .first_mut()
            .ok_or(RuntimeError::BadAddress(addr))
    }
}

fn to_offset(addr: u32, offset: i32) -> Result<usize, RuntimeError> {
    if offset < 0 {
        Err(RuntimeError::BadAddress(addr))
    } else {
        Ok(offset as usize)
    }
}
