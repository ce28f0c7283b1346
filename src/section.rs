use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};

use std::io::{Read, Write};

/// `perf_file_section`
///
/// The position of a byte range in the record file. The header points at the
/// attr and data sections this way, each attr at its id list, and the
/// feature table holds one per feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfFileSection {
    pub offset: u64,
    pub size: u64,
}

impl PerfFileSection {
    pub const STRUCT_SIZE: u64 = 8 + 8;

    pub fn parse<R: Read, T: ByteOrder>(mut reader: R) -> Result<Self, std::io::Error> {
        let offset = reader.read_u64::<T>()?;
        let size = reader.read_u64::<T>()?;
        Ok(Self { offset, size })
    }

    pub fn write<W: Write, T: ByteOrder>(&self, mut writer: W) -> Result<(), std::io::Error> {
        writer.write_u64::<T>(self.offset)?;
        writer.write_u64::<T>(self.size)?;
        Ok(())
    }

    /// The offset of the first byte after this section.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}
