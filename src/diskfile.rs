//! Disk files as DOS 3.3 BASIC programs see them.
//!
//! A sequential file is an ordered list of text lines; a random-access file
//! is a sequence of fixed-length NUL-padded records. Files are read fully on
//! open and written back on drop when modified, which mirrors the all-or-
//! nothing behaviour of the original DOS buffers.

use crate::error::RuntimeError;
use byteorder::ByteOrder;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use util::Endian;

/// A parsed DOS file argument: `NAME[,L<len>][,R<rec>][,A<addr>]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileSpec {
    pub name: String,
    pub record_length: u32,
    pub record: u32,
    pub address: u32,
}

impl FileSpec {
    /// Parses a DOS command argument. The address parameter accepts `$`-
    /// prefixed hex (`A$2000`) and decimal.
    pub fn parse(arg: &str) -> FileSpec {
        let mut spec = FileSpec::default();
        for (i, field) in arg.split(',').enumerate() {
            let field = field.trim();
            if i == 0 {
                spec.name = field.to_string();
                continue;
            }
            let mut chars = field.chars();
            match chars.next().map(|c| c.to_ascii_uppercase()) {
                Some('L') => spec.record_length = parse_number(chars.as_str()),
                Some('R') => spec.record = parse_number(chars.as_str()),
                Some('A') => spec.address = parse_number(chars.as_str()),
                _ => {}
            }
        }
        spec
    }
}

fn parse_number(s: &str) -> u32 {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('$') {
        u32::from_str_radix(hex, 16).unwrap_or(0)
    } else {
        s.parse().unwrap_or(0)
    }
}

enum Contents {
    Sequential { lines: Vec<String> },
    Random { records: Vec<Vec<u8>>, length: usize },
}

/// One open DOS file.
pub struct DiskFile {
    filename: PathBuf,
    contents: Contents,
    index: usize,
    pos: usize,
    modified: bool,
}

impl DiskFile {
    /// Opens a sequential file; a missing file starts out empty.
    pub fn open<P: AsRef<Path>>(path: P) -> DiskFile {
        let filename = path.as_ref().to_path_buf();
        let lines = match fs::read(&filename) {
            Ok(bytes) => read_lines(&bytes),
            Err(_) => Vec::new(),
        };
        DiskFile {
            filename,
            contents: Contents::Sequential { lines },
            index: 0,
            pos: 0,
            modified: false,
        }
    }

    /// Opens a random-access file with the given record length.
    pub fn open_random<P: AsRef<Path>>(path: P, record_length: u32) -> DiskFile {
        let filename = path.as_ref().to_path_buf();
        let length = record_length as usize;
        let mut records = Vec::new();
        if let Ok(bytes) = fs::read(&filename) {
            for chunk in bytes.chunks(length.max(1)) {
                let mut record = vec![0u8; length];
                record[..chunk.len()].copy_from_slice(chunk);
                records.push(record);
            }
        }
        DiskFile {
            filename,
            contents: Contents::Random { records, length },
            index: 0,
            pos: 0,
            modified: false,
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn is_random_access(&self) -> bool {
        matches!(self.contents, Contents::Random { .. })
    }

    /// Positions to the i'th record. Reading past the end of the file raises
    /// `OUT OF DATA`; writing extends the file with zeroed records.
    pub fn set_index(&mut self, i: u32, read: bool) -> Result<(), RuntimeError> {
        self.index = i as usize;
        if let Contents::Random { records, length } = &mut self.contents {
            if read && self.index >= records.len() {
                return Err(RuntimeError::OutOfData);
            }
            while self.index >= records.len() {
                records.push(vec![0u8; *length]);
            }
        }
        self.pos = 0;
        Ok(())
    }

    /// Reads one line (sequential) or the next line of the current record
    /// (random access).
    pub fn read(&mut self) -> Result<String, RuntimeError> {
        match &self.contents {
            Contents::Sequential { lines } => {
                if self.index >= lines.len() {
                    return Err(RuntimeError::OutOfData);
                }
                let line = lines[self.index].clone();
                self.index += 1;
                Ok(line)
            }
            Contents::Random { records, length } => {
                let record = records
                    .get(self.index)
                    .ok_or(RuntimeError::OutOfData)?;
                if self.pos >= *length || record[self.pos] == 0 {
                    return Ok(String::new());
                }
                let start = self.pos;
                let mut n = 0;
                while self.pos < *length
                    && record[self.pos] != b'\r'
                    && record[self.pos] != b'\n'
                {
                    self.pos += 1;
                    n += 1;
                }
                if self.pos < *length {
                    self.pos += 1;
                }
                Ok(String::from_utf8_lossy(&record[start..start + n]).into_owned())
            }
        }
    }

    /// Clears the file (sequential) or zeroes the current record.
    pub fn erase(&mut self) {
        self.modified = true;
        match &mut self.contents {
            Contents::Sequential { lines } => lines.clear(),
            Contents::Random { records, length } => {
                if let Some(record) = records.get_mut(self.index) {
                    *record = vec![0u8; *length];
                }
            }
        }
    }

    /// Appends text. Sequential lines accumulate until one carries a
    /// newline; random records fill from the first free byte.
    pub fn write(&mut self, s: &str) {
        self.modified = true;
        match &mut self.contents {
            Contents::Sequential { lines } => match lines.last_mut() {
                Some(last) if !last.contains('\n') => last.push_str(s),
                _ => lines.push(s.to_string()),
            },
            Contents::Random { records, length } => {
                if let Some(record) = records.get_mut(self.index) {
                    let mut at = 0;
                    while at < *length && record[at] != 0 {
                        at += 1;
                    }
                    let bytes = s.as_bytes();
                    let n = bytes.len().min(*length - at);
                    record[at..at + n].copy_from_slice(&bytes[..n]);
                }
            }
        }
    }

    /// Writes the file back if it was modified.
    pub fn flush(&mut self) -> std::io::Result<()> {
        if !self.modified {
            return Ok(());
        }
        let mut bytes = Vec::new();
        match &self.contents {
            Contents::Sequential { lines } => {
                for line in lines {
                    bytes.extend_from_slice(line.as_bytes());
                }
            }
            Contents::Random { records, .. } => {
                for record in records {
                    bytes.extend_from_slice(record);
                }
            }
        }
        fs::write(&self.filename, bytes)?;
        self.modified = false;
        Ok(())
    }

    /// Raises `FILE NOT FOUND` when the file does not exist.
    pub fn verify<P: AsRef<Path>>(path: P) -> Result<(), RuntimeError> {
        if path.as_ref().exists() {
            Ok(())
        } else {
            Err(RuntimeError::FileNotFound)
        }
    }

    /// Reads a file as raw bytes (hires page loads). A missing file yields
    /// an empty buffer.
    pub fn read_binary_file<P: AsRef<Path>>(path: P) -> Vec<u8> {
        let mut data = Vec::new();
        if let Ok(mut f) = fs::File::open(path) {
            let _ = f.read_to_end(&mut data);
        }
        data
    }

    /// Maps a DOS file name onto the host file system: blanks and quotes
    /// become underscores, everything is lowercased.
    pub fn correct_filename(name: &str) -> String {
        name.chars()
            .map(|c| match c {
                ' ' | '\'' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect()
    }
}

impl Drop for DiskFile {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn read_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut buffer = Vec::new();
    for &b in bytes {
        if b == b'\r' || b == b'\n' {
            lines.push(String::from_utf8_lossy(&buffer).into_owned());
            buffer.clear();
        } else {
            buffer.push(b);
        }
    }
    if !buffer.is_empty() {
        lines.push(String::from_utf8_lossy(&buffer).into_owned());
    }
    lines
}

/// Snapshot header written by `BSAVE A$69`: magic address, payload length.
pub fn write_snapshot<P: AsRef<Path>>(path: P, payload: &[u8]) -> std::io::Result<()> {
    let mut bytes = Vec::with_capacity(8 + payload.len() + 1);
    let mut word = [0u8; 4];
    Endian::write_u32(&mut word, 0x69);
    bytes.extend_from_slice(&word);
    Endian::write_u32(&mut word, payload.len() as u32 + 1);
    bytes.extend_from_slice(&word);
    bytes.extend_from_slice(payload);
    bytes.push(0);
    fs::write(path, bytes)
}

/// Reads a snapshot file back; `None` when the file is missing or does not
/// carry the magic address.
pub fn read_snapshot<P: AsRef<Path>>(path: P) -> Option<Vec<u8>> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() < 8 {
        return None;
    }
    if Endian::read_u32(&bytes[0..4]) != 0x69 {
        return None;
    }
    let len = Endian::read_u32(&bytes[4..8]) as usize;
    let mut payload = bytes.get(8..8 + len)?.to_vec();
    if payload.last() == Some(&0) {
        payload.pop();
    }
    Some(payload)
}

/// The load address stored in a binary file's header, if any.
pub fn sniff_address<P: AsRef<Path>>(path: P) -> Option<u32> {
    let bytes = fs::read(path).ok()?;
    if bytes.len() < 4 {
        return None;
    }
    Some(Endian::read_u32(&bytes[0..4]))
}
