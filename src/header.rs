use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};

use super::features::FeatureSet;
use super::section::PerfFileSection;

const MAGIC_SIZE: usize = 8;

/// The magic of a little-endian file; big-endian files have it byte-swapped.
pub const MAGIC_LITTLE_ENDIAN: [u8; MAGIC_SIZE] = *b"PERFILE2";
pub const MAGIC_BIG_ENDIAN: [u8; MAGIC_SIZE] = *b"2ELIFREP";

/// `perf_file_header`, at the start of every record file.
///
/// The writer fills it in last, once the sizes of the attr and data sections
/// and the set of features are known. The byte order of the magic tells the
/// reader the byte order of the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfHeader {
    pub magic: [u8; MAGIC_SIZE],
    pub header_size: u64,
    /// The size of one attr section entry: the attr plus its id section.
    pub attr_size: u64,
    pub attr_section: PerfFileSection,
    pub data_section: PerfFileSection,
    pub event_types_section: PerfFileSection,
    /// Which feature sections follow the data section.
    pub features: FeatureSet,
}

impl PerfHeader {
    pub const STRUCT_SIZE: u64 = MAGIC_SIZE as u64 + 8 + 8 + 3 * PerfFileSection::STRUCT_SIZE + 32;

    pub fn parse<R: Read + Seek>(mut reader: R) -> Result<Self, std::io::Error> {
        let mut magic = [0; MAGIC_SIZE];
        reader.read_exact(&mut magic)?;

        if magic[0] == b'P' {
            Self::parse_impl::<R, byteorder::LittleEndian>(reader, magic)
        } else {
            Self::parse_impl::<R, byteorder::BigEndian>(reader, magic)
        }
    }

    fn parse_impl<R: Read + Seek, T: ByteOrder>(
        mut reader: R,
        magic: [u8; MAGIC_SIZE],
    ) -> Result<Self, std::io::Error> {
        let header_size = reader.read_u64::<T>()?;
        let attr_size = reader.read_u64::<T>()?;
        let attr_section = PerfFileSection::parse::<_, T>(&mut reader)?;
        let data_section = PerfFileSection::parse::<_, T>(&mut reader)?;
        let event_types_section = PerfFileSection::parse::<_, T>(&mut reader)?;
        let features = FeatureSet([
            reader.read_u64::<T>()?,
            reader.read_u64::<T>()?,
            reader.read_u64::<T>()?,
            reader.read_u64::<T>()?,
        ]);

        // Skip any additional header bytes from newer formats.
        if header_size > Self::STRUCT_SIZE {
            let extra_bytes = header_size - Self::STRUCT_SIZE;
            reader.seek(SeekFrom::Current(extra_bytes as i64))?;
        }

        Ok(Self {
            magic,
            header_size,
            attr_size,
            attr_section,
            data_section,
            event_types_section,
            features,
        })
    }

    /// Writes the header. The magic is chosen to match `T`.
    pub fn write<W: Write, T: ByteOrder>(&self, mut writer: W) -> Result<(), std::io::Error> {
        let mut magic = [0; MAGIC_SIZE];
        T::write_u64(&mut magic, u64::from_le_bytes(MAGIC_LITTLE_ENDIAN));
        writer.write_all(&magic)?;
        writer.write_u64::<T>(Self::STRUCT_SIZE)?;
        writer.write_u64::<T>(self.attr_size)?;
        self.attr_section.write::<_, T>(&mut writer)?;
        self.data_section.write::<_, T>(&mut writer)?;
        self.event_types_section.write::<_, T>(&mut writer)?;
        for chunk in self.features.0 {
            writer.write_u64::<T>(chunk)?;
        }
        Ok(())
    }
}
