use byteorder::{ByteOrder, WriteBytesExt};

use crate::cursor::RecordCursor;
use crate::error::ParseError;

/// `PERF_RECORD_AUXTRACE`: announces a block of hardware trace data (ETM,
/// Intel PT) copied out of an aux buffer.
///
/// The `size` bytes of trace data come right after the record in the data
/// section and are not counted in the record header's size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxtraceRecord {
    /// Bytes of aux data after the record, a multiple of 8.
    pub size: u64,
    /// Where the block starts in the aux buffer's byte stream.
    pub offset: u64,
    pub reference: u64,
    /// The aux buffer the block came from.
    pub idx: u32,
    pub tid: u32,
    pub cpu: u32,
}

impl AuxtraceRecord {
    pub const BODY_SIZE: usize = 8 + 8 + 8 + 4 + 4 + 4 + 4;

    pub fn parse<T: ByteOrder>(cur: &mut RecordCursor<T>) -> Result<Self, ParseError> {
        let size = cur.read_u64()?;
        let offset = cur.read_u64()?;
        let reference = cur.read_u64()?;
        let idx = cur.read_u32()?;
        let tid = cur.read_u32()?;
        let cpu = cur.read_u32()?;
        let _reserved = cur.read_u32()?;
        Ok(Self {
            size,
            offset,
            reference,
            idx,
            tid,
            cpu,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u64::<T>(self.size)?;
        buf.write_u64::<T>(self.offset)?;
        buf.write_u64::<T>(self.reference)?;
        buf.write_u32::<T>(self.idx)?;
        buf.write_u32::<T>(self.tid)?;
        buf.write_u32::<T>(self.cpu)?;
        buf.write_u32::<T>(0)?;
        Ok(())
    }
}
