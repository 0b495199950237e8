//! Byte-level container for compiled BASIC executables.
//!
//! An image is a single flat buffer: a fixed header (`HSCR`, format version,
//! total size) followed by six tagged segments in a fixed order. All segment
//! contents are opaque at this level; decoding code words, the constant pool
//! and symbol records is the runtime's job. The container guarantees that a
//! validated [`Image`](struct.Image.html) has in-bounds, correctly tagged
//! segments, and that save and load round-trip byte for byte.

use byteorder::{ByteOrder, ReadBytesExt};
use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use util::Endian;

pub const MAGIC: &[u8; 4] = b"HSCR";
pub const VERSION: u32 = 1;

const HEADER_SIZE: usize = 12;
const SEGMENT_HEADER_SIZE: usize = 8;

const SEGMENT_TAGS: [&[u8; 4]; SEGMENT_COUNT] =
    [b"CODE", b"TEXT", b"VTBL", b"FSYM", b"CSYM", b"VSYM"];

pub const SEGMENT_COUNT: usize = 6;

/// The six segments of an image, in file order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Segment {
    Code = 0,
    Text = 1,
    VTable = 2,
    FunctionSymbols = 3,
    ConstantSymbols = 4,
    VariableSymbols = 5,
}

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    BadMagic,
    UnsupportedVersion(u32),
    /// Header total size does not match the actual buffer size.
    SizeMismatch { header: u32, actual: usize },
    /// Segment `index` carries a tag other than the expected one.
    BadSegmentTag(usize),
    /// A segment length points past the end of the buffer.
    Truncated(usize),
    /// Bytes remain after the last segment.
    TrailingData,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "i/o error: {}", err),
            Error::BadMagic => f.write_str("not an executable image (bad magic)"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported image version {}", v),
            Error::SizeMismatch { header, actual } => write!(
                f,
                "image size mismatch (header says {}, buffer has {})",
                header, actual
            ),
            Error::BadSegmentTag(i) => write!(f, "segment {} has an unexpected tag", i),
            Error::Truncated(i) => write!(f, "segment {} is truncated", i),
            Error::TrailingData => f.write_str("trailing bytes after last segment"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

/// A validated executable image.
///
/// Owns the flat buffer; segment accessors hand out slices into it. The
/// buffer is immutable once constructed.
#[derive(Debug, PartialEq)]
pub struct Image {
    buffer: Vec<u8>,
    segments: [(usize, usize); SEGMENT_COUNT],
}

impl Image {
    /// Assembles an image from the six segment payloads.
    pub fn from_segments(segments: [&[u8]; SEGMENT_COUNT]) -> Image {
        let total = HEADER_SIZE
            + segments
                .iter()
                .map(|s| SEGMENT_HEADER_SIZE + s.len())
                .sum::<usize>();
        let mut buffer = Vec::with_capacity(total);
        buffer.extend_from_slice(MAGIC);
        let mut word = [0u8; 4];
        Endian::write_u32(&mut word, VERSION);
        buffer.extend_from_slice(&word);
        Endian::write_u32(&mut word, total as u32);
        buffer.extend_from_slice(&word);

        let mut offsets = [(0usize, 0usize); SEGMENT_COUNT];
        for (i, segment) in segments.iter().enumerate() {
            buffer.extend_from_slice(SEGMENT_TAGS[i]);
            Endian::write_u32(&mut word, segment.len() as u32);
            buffer.extend_from_slice(&word);
            offsets[i] = (buffer.len(), segment.len());
            buffer.extend_from_slice(segment);
        }
        Image {
            buffer,
            segments: offsets,
        }
    }

    /// Validates a raw buffer and takes ownership of it.
    pub fn from_bytes(buffer: Vec<u8>) -> Result<Image, Error> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::BadMagic);
        }
        if &buffer[0..4] != MAGIC {
            return Err(Error::BadMagic);
        }
        let version = Endian::read_u32(&buffer[4..8]);
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let total = Endian::read_u32(&buffer[8..12]);
        if total as usize != buffer.len() {
            return Err(Error::SizeMismatch {
                header: total,
                actual: buffer.len(),
            });
        }
        let mut segments = [(0usize, 0usize); SEGMENT_COUNT];
        let mut pos = HEADER_SIZE;
        for (i, slot) in segments.iter_mut().enumerate() {
            if pos + SEGMENT_HEADER_SIZE > buffer.len() {
                return Err(Error::Truncated(i));
            }
            if &buffer[pos..pos + 4] != SEGMENT_TAGS[i] {
                return Err(Error::BadSegmentTag(i));
            }
            let length = Endian::read_u32(&buffer[pos + 4..pos + 8]) as usize;
            pos += SEGMENT_HEADER_SIZE;
            if pos + length > buffer.len() {
                return Err(Error::Truncated(i));
            }
            *slot = (pos, length);
            pos += length;
        }
        if pos != buffer.len() {
            return Err(Error::TrailingData);
        }
        Ok(Image { buffer, segments })
    }

    pub fn segment(&self, segment: Segment) -> &[u8] {
        let (offset, length) = self.segments[segment as usize];
        &self.buffer[offset..offset + length]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..]
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

pub fn read<R: Read>(reader: &mut R) -> Result<Image, Error> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;
    if &header[0..4] != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = (&header[4..8]).read_u32::<Endian>()?;
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let total = (&header[8..12]).read_u32::<Endian>()? as usize;
    if total < HEADER_SIZE {
        return Err(Error::SizeMismatch {
            header: total as u32,
            actual: HEADER_SIZE,
        });
    }
    let mut buffer = Vec::from(&header[..]);
    buffer.resize(total, 0);
    reader.read_exact(&mut buffer[HEADER_SIZE..])?;
    Image::from_bytes(buffer)
}

pub fn write<W: Write>(writer: &mut W, image: &Image) -> std::io::Result<()> {
    writer.write_all(image.as_bytes())?;
    Ok(())
}

pub trait ReadBexExt: Read + Sized {
    fn read_bex(&mut self) -> Result<Image, Error> {
        read(self)
    }
}

impl<R: Read + Sized> ReadBexExt for R {}

pub trait WriteBexExt: Write + Sized {
    fn write_bex(&mut self, image: &Image) -> std::io::Result<()> {
        write(self, image)
    }
}

impl<W: Write + Sized> WriteBexExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Image, Error> {
    BufReader::new(File::open(path)?).read_bex()
}

pub fn write_file<P: AsRef<Path>>(path: P, image: &Image) -> std::io::Result<()> {
    BufWriter::new(File::create(path)?).write_bex(image)
}

#[cfg(test)]
mod test;
