use crate::types::Type;
use byteorder::ByteOrder;
use util::Endian;

/// Identifiers longer than this are truncated in symbol records; the
/// compiler emits a warning for them.
pub const MAX_IDENTIFIER_LENGTH: usize = 31;

/// On-image size of one symbol record: NUL-padded name, address, type id,
/// symbol kind.
pub const SYMBOL_RECORD_SIZE: usize = MAX_IDENTIFIER_LENGTH + 1 + 3 * 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind {
    Constant = 0,
    Variable = 1,
    Function = 2,
}

impl SymbolKind {
    fn from_id(id: u32) -> SymbolKind {
        match id {
            1 => SymbolKind::Variable,
            2 => SymbolKind::Function,
            _ => SymbolKind::Constant,
        }
    }
}

/// One entry of the image's fixed-width symbol tables.
#[derive(Clone, Debug, PartialEq)]
pub struct Symbol {
    name: String,
    addr: u32,
    ty: Type,
    kind: SymbolKind,
}

impl Symbol {
    pub fn new(name: &str, addr: u32, ty: Type, kind: SymbolKind) -> Symbol {
        let mut name = name.to_string();
        name.truncate(MAX_IDENTIFIER_LENGTH);
        Symbol {
            name,
            addr,
            ty,
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u32 {
        self.addr
    }

    pub fn value_type(&self) -> Type {
        self.ty
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    /// Appends the fixed-width record to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        let mut name = [0u8; MAX_IDENTIFIER_LENGTH + 1];
        let bytes = self.name.as_bytes();
        let n = bytes.len().min(MAX_IDENTIFIER_LENGTH);
        name[..n].copy_from_slice(&bytes[..n]);
        buf.extend_from_slice(&name);
        let mut word = [0u8; 4];
        Endian::write_u32(&mut word, self.addr);
        buf.extend_from_slice(&word);
        Endian::write_u32(&mut word, self.ty.id());
        buf.extend_from_slice(&word);
        Endian::write_u32(&mut word, self.kind as u32);
        buf.extend_from_slice(&word);
    }

    /// Decodes one fixed-width record. `record` must hold at least
    /// [`SYMBOL_RECORD_SIZE`](constant.SYMBOL_RECORD_SIZE.html) bytes.
    pub fn read_from(record: &[u8]) -> Symbol {
        let name_bytes = &record[..=MAX_IDENTIFIER_LENGTH];
        let end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();
        let base = MAX_IDENTIFIER_LENGTH + 1;
        let addr = Endian::read_u32(&record[base..base + 4]);
        let ty = Type::from_id(Endian::read_u32(&record[base + 4..base + 8]));
        let kind = SymbolKind::from_id(Endian::read_u32(&record[base + 8..base + 12]));
        Symbol {
            name,
            addr,
            ty,
            kind,
        }
    }
}
