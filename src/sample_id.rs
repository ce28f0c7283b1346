use byteorder::{ByteOrder, WriteBytesExt};

use crate::attr::{PerfEventAttr, SampleFormat};
use crate::constants::{PERF_RECORD_SAMPLE, PERF_RECORD_USER_TYPE_START};
use crate::cursor::RecordCursor;
use crate::error::ParseError;

/// The `sample_id` block at the end of non-SAMPLE kernel records.
///
/// Present only if the attr has `sample_id_all` set. Each field is only
/// present if the matching bit is set in the attr's sample format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleId {
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub time: Option<u64>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<u32>,
    pub identifier: Option<u64>,
}

impl SampleId {
    /// The number of bytes the block occupies for records of this attr.
    pub fn size(attr: &PerfEventAttr) -> usize {
        if !attr.sample_id_all() {
            return 0;
        }
        let sf = attr.sample_format;
        let mut size = 0;
        for (flag, len) in [
            (SampleFormat::TID, 8),
            (SampleFormat::TIME, 8),
            (SampleFormat::ID, 8),
            (SampleFormat::STREAM_ID, 8),
            (SampleFormat::CPU, 8),
            (SampleFormat::IDENTIFIER, 8),
        ] {
            if sf.contains(flag) {
                size += len;
            }
        }
        size
    }

    pub fn parse<T: ByteOrder>(
        cursor: &mut RecordCursor<T>,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let mut sample_id = SampleId::default();
        if !attr.sample_id_all() {
            return Ok(sample_id);
        }
        let sf = attr.sample_format;
        if sf.contains(SampleFormat::TID) {
            sample_id.pid = Some(cursor.read_u32()?);
            sample_id.tid = Some(cursor.read_u32()?);
        }
        if sf.contains(SampleFormat::TIME) {
            sample_id.time = Some(cursor.read_u64()?);
        }
        if sf.contains(SampleFormat::ID) {
            sample_id.id = Some(cursor.read_u64()?);
        }
        if sf.contains(SampleFormat::STREAM_ID) {
            sample_id.stream_id = Some(cursor.read_u64()?);
        }
        if sf.contains(SampleFormat::CPU) {
            sample_id.cpu = Some(cursor.read_u32()?);
            let _reserved = cursor.read_u32()?;
        }
        if sf.contains(SampleFormat::IDENTIFIER) {
            sample_id.identifier = Some(cursor.read_u64()?);
        }
        Ok(sample_id)
    }

    /// Appends the present fields.
    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        if self.pid.is_some() || self.tid.is_some() {
            buf.write_u32::<T>(self.pid.unwrap_or(0))?;
            buf.write_u32::<T>(self.tid.unwrap_or(0))?;
        }
        if let Some(time) = self.time {
            buf.write_u64::<T>(time)?;
        }
        if let Some(id) = self.id {
            buf.write_u64::<T>(id)?;
        }
        if let Some(stream_id) = self.stream_id {
            buf.write_u64::<T>(stream_id)?;
        }
        if let Some(cpu) = self.cpu {
            buf.write_u32::<T>(cpu)?;
            buf.write_u32::<T>(0)?;
        }
        if let Some(identifier) = self.identifier {
            buf.write_u64::<T>(identifier)?;
        }
        Ok(())
    }
}

/// Where the event id and the timestamp live inside the records of an attr.
///
/// This lets a reader find the id of a record before it knows which attr
/// describes the record, and sort records without fully parsing them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIdParseInfo {
    pub sample_record_id_offset_from_start: Option<u8>,
    pub nonsample_record_id_offset_from_end: Option<u8>,
    pub sample_record_time_offset_from_start: Option<u8>,
    pub nonsample_record_time_offset_from_end: Option<u8>,
}

impl RecordIdParseInfo {
    pub fn new(attr: &PerfEventAttr) -> Self {
        let sf = attr.sample_format;
        let sample_id_all = attr.sample_id_all();

        // SAMPLE records: identifier, ip, tid, time, addr, id, ...
        let mut offset = 0u8;
        let sample_identifier_offset = if sf.contains(SampleFormat::IDENTIFIER) {
            offset += 8;
            Some(0)
        } else {
            None
        };
        if sf.contains(SampleFormat::IP) {
            offset += 8;
        }
        if sf.contains(SampleFormat::TID) {
            offset += 8;
        }
        let sample_time = if sf.contains(SampleFormat::TIME) {
            let o = offset;
            offset += 8;
            Some(o)
        } else {
            None
        };
        if sf.contains(SampleFormat::ADDR) {
            offset += 8;
        }
        let sample_id = if sf.contains(SampleFormat::ID) {
            Some(offset)
        } else {
            sample_identifier_offset
        };

        // Non-SAMPLE records end with: tid, time, id, stream_id, cpu, identifier.
        let (nonsample_id, nonsample_time) = if sample_id_all {
            let mut from_end = 0u8;
            let identifier = if sf.contains(SampleFormat::IDENTIFIER) {
                from_end += 8;
                Some(from_end)
            } else {
                None
            };
            if sf.contains(SampleFormat::CPU) {
                from_end += 8;
            }
            if sf.contains(SampleFormat::STREAM_ID) {
                from_end += 8;
            }
            let id = if sf.contains(SampleFormat::ID) {
                from_end += 8;
                Some(from_end)
            } else {
                identifier
            };
            let time = if sf.contains(SampleFormat::TIME) {
                from_end += 8;
                Some(from_end)
            } else {
                None
            };
            (id, time)
        } else {
            (None, None)
        };

        Self {
            sample_record_id_offset_from_start: sample_id,
            nonsample_record_id_offset_from_end: nonsample_id,
            sample_record_time_offset_from_start: sample_time,
            nonsample_record_time_offset_from_end: nonsample_time,
        }
    }

    fn read_at<T: ByteOrder>(
        record_type: u32,
        body: &[u8],
        from_start: Option<u8>,
        from_end: Option<u8>,
    ) -> Option<u64> {
        if record_type >= PERF_RECORD_USER_TYPE_START {
            return None;
        }
        let start = if record_type == PERF_RECORD_SAMPLE {
            usize::from(from_start?)
        } else {
            body.len().checked_sub(usize::from(from_end?))?
        };
        body.get(start..start + 8).map(T::read_u64)
    }

    /// Get the event id from a record body (the bytes after the header).
    pub fn record_id<T: ByteOrder>(&self, record_type: u32, body: &[u8]) -> Option<u64> {
        Self::read_at::<T>(
            record_type,
            body,
            self.sample_record_id_offset_from_start,
            self.nonsample_record_id_offset_from_end,
        )
    }

    /// Get the timestamp from a record body (the bytes after the header).
    pub fn record_timestamp<T: ByteOrder>(&self, record_type: u32, body: &[u8]) -> Option<u64> {
        Self::read_at::<T>(
            record_type,
            body,
            self.sample_record_time_offset_from_start,
            self.nonsample_record_time_offset_from_end,
        )
    }
}

/// Get the id from a record body, if every attr has `SampleFormat::IDENTIFIER`.
///
/// SAMPLE records start with the identifier; other kernel records end with it
/// if `sample_id_all` is set.
pub fn get_record_identifier<T: ByteOrder>(
    record_type: u32,
    body: &[u8],
    sample_id_all: bool,
) -> Option<u64> {
    if record_type >= PERF_RECORD_USER_TYPE_START {
        None
    } else if record_type == PERF_RECORD_SAMPLE {
        body.get(..8).map(T::read_u64)
    } else if sample_id_all {
        let start = body.len().checked_sub(8)?;
        Some(T::read_u64(&body[start..]))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use byteorder::LittleEndian;

    use super::*;
    use crate::attr::{AttrFlags, SamplingPolicy};
    use crate::constants::PERF_RECORD_COMM;

    fn attr() -> PerfEventAttr {
        let mut attr = PerfEventAttr::new(1, 1, SamplingPolicy::Period(1));
        attr.sample_format = SampleFormat::IP
            | SampleFormat::TID
            | SampleFormat::TIME
            | SampleFormat::ID
            | SampleFormat::CPU;
        attr.flags = AttrFlags::SAMPLE_ID_ALL;
        attr
    }

    #[test]
    fn trailer_layout() {
        let attr = attr();
        assert_eq!(SampleId::size(&attr), 32);
        let sample_id = SampleId {
            pid: Some(10),
            tid: Some(11),
            time: Some(12345),
            id: Some(7),
            cpu: Some(3),
            ..Default::default()
        };
        let mut body = b"name\0\0\0\0".to_vec();
        sample_id.write::<LittleEndian>(&mut body).unwrap();
        assert_eq!(body.len(), 8 + 32);

        let mut cursor = RecordCursor::<LittleEndian>::new(&body[8..], PERF_RECORD_COMM);
        assert_eq!(SampleId::parse(&mut cursor, &attr).unwrap(), sample_id);

        let info = RecordIdParseInfo::new(&attr);
        assert_eq!(info.record_id::<LittleEndian>(PERF_RECORD_COMM, &body), Some(7));
        assert_eq!(
            info.record_timestamp::<LittleEndian>(PERF_RECORD_COMM, &body),
            Some(12345)
        );
    }

    #[test]
    fn sample_offsets() {
        let info = RecordIdParseInfo::new(&attr());
        // ip, tid, time, id
        assert_eq!(info.sample_record_time_offset_from_start, Some(16));
        assert_eq!(info.sample_record_id_offset_from_start, Some(24));
    }

    #[test]
    fn without_sample_id_all() {
        let mut attr = attr();
        attr.flags = AttrFlags::empty();
        assert_eq!(SampleId::size(&attr), 0);
        let info = RecordIdParseInfo::new(&attr);
        assert_eq!(info.nonsample_record_id_offset_from_end, None);
        assert_eq!(
            get_record_identifier::<LittleEndian>(PERF_RECORD_COMM, &[0; 16], false),
            None
        );
    }
}
