use std::io::Write;

use byteorder::{ByteOrder, WriteBytesExt};

use crate::constants::{MAX_PERF_RECORD_SIZE, SIMPLE_PERF_RECORD_TYPE_START};
use crate::error::{Error, ParseError};

/// `perf_event_header`
///
/// For simpleperf record types (>= 32768), simpleperf reuses the `misc`
/// field as the high 16 bits of the size, so that these records can be
/// larger than 64KiB in memory. Their `misc` is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub type_: u32,
    pub misc: u16,
    /// The size of the record, including this header.
    pub size: u32,
}

impl RecordHeader {
    pub const STRUCT_SIZE: usize = 4 + 2 + 2;

    pub fn is_simpleperf_type(type_: u32) -> bool {
        type_ >= SIMPLE_PERF_RECORD_TYPE_START
    }

    pub fn parse<T: ByteOrder>(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < Self::STRUCT_SIZE {
            return Err(ParseError {
                record_type: 0,
                offset: 0,
                expected: Self::STRUCT_SIZE,
                available: data.len(),
            });
        }
        let type_ = T::read_u32(&data[0..4]);
        let misc = T::read_u16(&data[4..6]);
        let size16 = T::read_u16(&data[6..8]);
        if Self::is_simpleperf_type(type_) {
            let size = (u32::from(misc) << 16) | u32::from(size16);
            Ok(Self {
                type_,
                misc: 0,
                size,
            })
        } else {
            Ok(Self {
                type_,
                misc,
                size: u32::from(size16),
            })
        }
    }

    pub fn write<W: Write, T: ByteOrder>(&self, mut writer: W) -> Result<(), Error> {
        let size = self.size as usize;
        writer.write_u32::<T>(self.type_)?;
        if Self::is_simpleperf_type(self.type_) {
            writer.write_u16::<T>((self.size >> 16) as u16)?;
            writer.write_u16::<T>(self.size as u16)?;
        } else {
            if size > MAX_PERF_RECORD_SIZE {
                return Err(Error::RecordTooLarge {
                    record_type: self.type_,
                    size,
                });
            }
            writer.write_u16::<T>(self.misc)?;
            writer.write_u16::<T>(self.size as u16)?;
        }
        Ok(())
    }
}
