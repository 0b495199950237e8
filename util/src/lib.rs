/// Byte order shared by the executable image, the snapshot files and every
/// other binary payload produced or consumed by the toolchain.
pub type Endian = byteorder::LittleEndian;
