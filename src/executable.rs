use crate::address;
use crate::error::RuntimeError;
use crate::symbol::{Symbol, SymbolKind, MAX_IDENTIFIER_LENGTH, SYMBOL_RECORD_SIZE};
use crate::types::Type;
use crate::value::Value;
use crate::Word;
use bexfile::{Image, Segment};
use byteorder::ByteOrder;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use util::Endian;

#[derive(Debug)]
pub enum LoadError {
    Image(bexfile::Error),
    Io(std::io::Error),
    /// Code segment length is not a multiple of the word size.
    BadCode(usize),
    /// The text segment does not decode into a well-formed constant pool.
    BadText(usize),
    /// A symbol table length is not a multiple of the record size.
    BadSymbols(Segment),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadError::Image(err) => write!(f, "malformed image: {}", err),
            LoadError::Io(err) => write!(f, "i/o error: {}", err),
            LoadError::BadCode(len) => write!(f, "code segment has odd length {}", len),
            LoadError::BadText(offset) => {
                write!(f, "text segment is malformed at offset {}", offset)
            }
            LoadError::BadSymbols(segment) => {
                write!(f, "symbol table {:?} has an odd length", segment)
            }
        }
    }
}

impl std::error::Error for LoadError {}

impl From<bexfile::Error> for LoadError {
    fn from(err: bexfile::Error) -> LoadError {
        LoadError::Image(err)
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> LoadError {
        LoadError::Io(err)
    }
}

/// A loaded, immutable executable.
///
/// Wraps the flat [`bexfile::Image`] and keeps decoded views: the code as
/// 32-bit words, the text segment as a table of constant value sequences,
/// the vtable and the three symbol tables. The backing image is never
/// modified, so saving reproduces the loaded bytes exactly.
pub struct Executable {
    image: Image,
    code: Vec<Word>,
    constants: Vec<Vec<Value>>,
    vtable: Vec<i32>,
    functions: Vec<Symbol>,
    constant_symbols: Vec<Symbol>,
    variables: Vec<Symbol>,
}

impl PartialEq for Executable {
    fn eq(&self, other: &Executable) -> bool {
        self.image == other.image
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Executable")
            .field("code_words", &self.code.len())
            .field("constants", &self.constants.len())
            .field("functions", &self.functions.len())
            .field("variables", &self.variables.len())
            .finish()
    }
}

impl Executable {
    /// Builds an executable from assembled parts.
    pub fn from_parts(
        code: &[Word],
        text: &[u8],
        vtable: &[i32],
        functions: &[Symbol],
        constants: &[Symbol],
        variables: &[Symbol],
    ) -> Result<Executable, LoadError> {
        let mut code_bytes = vec![0u8; code.len() * 4];
        Endian::write_u32_into(code, &mut code_bytes);
        let mut vtable_bytes = vec![0u8; vtable.len() * 4];
        Endian::write_i32_into(vtable, &mut vtable_bytes);
        let fsym = encode_symbols(functions);
        let csym = encode_symbols(constants);
        let vsym = encode_symbols(variables);
        let image = Image::from_segments([
            &code_bytes[..],
            text,
            &vtable_bytes[..],
            &fsym[..],
            &csym[..],
            &vsym[..],
        ]);
        Executable::wrap(image)
    }

    /// Validates and decodes a raw image.
    pub fn wrap(image: Image) -> Result<Executable, LoadError> {
        let code_bytes = image.segment(Segment::Code);
        if code_bytes.len() % 4 != 0 {
            return Err(LoadError::BadCode(code_bytes.len()));
        }
        let mut code = vec![0u32; code_bytes.len() / 4];
        Endian::read_u32_into(code_bytes, &mut code);

        let constants = parse_text(image.segment(Segment::Text))?;

        let vtable_bytes = image.segment(Segment::VTable);
        if vtable_bytes.len() % 4 != 0 {
            return Err(LoadError::BadSymbols(Segment::VTable));
        }
        let mut vtable = vec![0i32; vtable_bytes.len() / 4];
        Endian::read_i32_into(vtable_bytes, &mut vtable);

        let functions = parse_symbols(&image, Segment::FunctionSymbols)?;
        let constant_symbols = parse_symbols(&image, Segment::ConstantSymbols)?;
        let variables = parse_symbols(&image, Segment::VariableSymbols)?;

        Ok(Executable {
            image,
            code,
            constants,
            vtable,
            functions,
            constant_symbols,
            variables,
        })
    }

    pub fn code(&self) -> &[Word] {
        &self.code[..]
    }

    /// Length of the code segment in words.
    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// The value at `index` within the constant at the given constant
    /// address.
    pub fn constant(&self, addr: u32, index: i32) -> Result<Value, RuntimeError> {
        let slot = address::index(addr) as usize;
        let values = self
            .constants
            .get(slot)
            .ok_or(RuntimeError::BadAddress(addr))?;
        if index < 0 || index as usize >= values.len() {
            return Err(RuntimeError::BadAddress(addr));
        }
        Ok(values[index as usize].clone())
    }

    /// All values of the constant at the given constant address.
    pub fn constant_array(&self, addr: u32) -> Result<&[Value], RuntimeError> {
        self.constants
            .get(address::index(addr) as usize)
            .map(|v| &v[..])
            .ok_or(RuntimeError::BadAddress(addr))
    }

    pub fn find_constant(&self, name: &str) -> Option<&Symbol> {
        self.find_symbol(name, SymbolKind::Constant)
    }

    pub fn find_symbol(&self, name: &str, kind: SymbolKind) -> Option<&Symbol> {
        let len = name.len().min(MAX_IDENTIFIER_LENGTH);
        let name = &name[..len];
        self.symbol_table(kind).iter().find(|s| s.name() == name)
    }

    pub fn symbol_table(&self, kind: SymbolKind) -> &[Symbol] {
        match kind {
            SymbolKind::Function => &self.functions[..],
            SymbolKind::Constant => &self.constant_symbols[..],
            SymbolKind::Variable => &self.variables[..],
        }
    }

    /// The function ordinal to code offset table. Present in the image but
    /// not consulted by the VM, which enters functions by resolved offsets.
    pub fn vtable(&self) -> &[i32] {
        &self.vtable[..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_bytes()
    }

    pub fn save<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        bexfile::write(writer, &self.image)
    }

    pub fn load<R: Read>(reader: &mut R) -> Result<Executable, LoadError> {
        Executable::wrap(bexfile::read(reader)?)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        bexfile::write_file(path, &self.image)
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Executable, LoadError> {
        Executable::wrap(bexfile::read_file(path)?)
    }
}

fn encode_symbols(symbols: &[Symbol]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(symbols.len() * SYMBOL_RECORD_SIZE);
    for symbol in symbols {
        symbol.write_to(&mut buf);
    }
    buf
}

fn parse_symbols(image: &Image, segment: Segment) -> Result<Vec<Symbol>, LoadError> {
    let bytes = image.segment(segment);
    if bytes.len() % SYMBOL_RECORD_SIZE != 0 {
        return Err(LoadError::BadSymbols(segment));
    }
    Ok(bytes
        .chunks_exact(SYMBOL_RECORD_SIZE)
        .map(Symbol::read_from)
        .collect())
}

/// Decodes the constant pool: each constant is `count:u32` followed by
/// `count` entries of `type:u32` plus a native-width payload; strings are
/// NUL-terminated.
fn parse_text(text: &[u8]) -> Result<Vec<Vec<Value>>, LoadError> {
    let mut constants = Vec::new();
    let mut pos = 0usize;
    while pos < text.len() {
        let mut count = read_u32(text, &mut pos)?;
        let mut values = Vec::with_capacity(count as usize);
        while count > 0 {
            let ty = Type::from_id(read_u32(text, &mut pos)?);
            let value = match ty {
                Type::Int32 => Value::Int32(read_u32(text, &mut pos)? as i32),
                Type::Double => {
                    if pos + 8 > text.len() {
                        return Err(LoadError::BadText(pos));
                    }
                    let v = Endian::read_f64(&text[pos..pos + 8]);
                    pos += 8;
                    Value::Double(v)
                }
                Type::Str => {
                    let start = pos;
                    while pos < text.len() && text[pos] != 0 {
                        pos += 1;
                    }
                    if pos >= text.len() {
                        return Err(LoadError::BadText(start));
                    }
                    let s = String::from_utf8_lossy(&text[start..pos]).into_owned();
                    pos += 1;
                    Value::Str(s)
                }
                _ => return Err(LoadError::BadText(pos)),
            };
            values.push(value);
            count -= 1;
        }
        constants.push(values);
    }
    Ok(constants)
}

fn read_u32(text: &[u8], pos: &mut usize) -> Result<u32, LoadError> {
    if *pos + 4 > text.len() {
        return Err(LoadError::BadText(*pos));
    }
    let v = Endian::read_u32(&text[*pos..*pos + 4]);
    *pos += 4;
    Ok(v)
}
