//! The typed records, each with a parser for its body (the bytes after the
//! record header) and a writer producing the same bytes.

use byteorder::{ByteOrder, WriteBytesExt};

use crate::attr::PerfEventAttr;
use crate::constants::*;
use crate::cursor::{write_padded_string, RecordCursor};
use crate::error::ParseError;
use crate::sample_id::SampleId;

/// Reads a NUL-padded name which extends up to the `sample_id` trailer, then the trailer.
fn parse_name_and_sample_id<T: ByteOrder>(
    cur: &mut RecordCursor<T>,
    attr: &PerfEventAttr,
) -> Result<(Vec<u8>, SampleId), ParseError> {
    let trailer_size = SampleId::size(attr);
    let name_len = cur
        .remaining()
        .checked_sub(trailer_size)
        .ok_or_else(|| cur.error(trailer_size))?;
    let name = cur.read_padded_string(name_len)?;
    let sample_id = SampleId::parse(cur, attr)?;
    Ok((name, sample_id))
}

/// `PERF_RECORD_MMAP`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmapRecord {
    pub misc: u16,
    pub pid: u32,
    pub tid: u32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub filename: Vec<u8>,
    pub sample_id: SampleId,
}

impl MmapRecord {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let pid = cur.read_u32()?;
        let tid = cur.read_u32()?;
        let addr = cur.read_u64()?;
        let len = cur.read_u64()?;
        let pgoff = cur.read_u64()?;
        let (filename, sample_id) = parse_name_and_sample_id(cur, attr)?;
        Ok(Self {
            misc,
            pid,
            tid,
            addr,
            len,
            pgoff,
            filename,
            sample_id,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u32::<T>(self.pid)?;
        buf.write_u32::<T>(self.tid)?;
        buf.write_u64::<T>(self.addr)?;
        buf.write_u64::<T>(self.len)?;
        buf.write_u64::<T>(self.pgoff)?;
        write_padded_string(buf, &self.filename);
        self.sample_id.write::<T>(buf)
    }
}

/// How the file of an [`Mmap2Record`] is identified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mmap2FileId {
    InodeAndVersion {
        major: u32,
        minor: u32,
        inode: u64,
        inode_generation: u64,
    },
    /// Used if `PERF_RECORD_MISC_MMAP_BUILD_ID` is set in `misc`.
    BuildId(Vec<u8>),
}

/// `PERF_RECORD_MMAP2`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mmap2Record {
    pub misc: u16,
    pub pid: u32,
    pub tid: u32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub file_id: Mmap2FileId,
    pub protection: u32,
    pub flags: u32,
    pub filename: Vec<u8>,
    pub sample_id: SampleId,
}

impl Mmap2Record {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let pid = cur.read_u32()?;
        let tid = cur.read_u32()?;
        let addr = cur.read_u64()?;
        let len = cur.read_u64()?;
        let pgoff = cur.read_u64()?;
        let file_id = if misc & PERF_RECORD_MISC_MMAP_BUILD_ID != 0 {
            let build_id_size = cur.read_u8()?;
            let _reserved1 = cur.read_u8()?;
            let _reserved2 = cur.read_u16()?;
            let bytes = cur.read_slice(20)?;
            Mmap2FileId::BuildId(bytes[..usize::from(build_id_size.min(20))].to_vec())
        } else {
            let major = cur.read_u32()?;
            let minor = cur.read_u32()?;
            let inode = cur.read_u64()?;
            let inode_generation = cur.read_u64()?;
            Mmap2FileId::InodeAndVersion {
                major,
                minor,
                inode,
                inode_generation,
            }
        };
        let protection = cur.read_u32()?;
        let flags = cur.read_u32()?;
        let (filename, sample_id) = parse_name_and_sample_id(cur, attr)?;
        Ok(Self {
            misc,
            pid,
            tid,
            addr,
            len,
            pgoff,
            file_id,
            protection,
            flags,
            filename,
            sample_id,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u32::<T>(self.pid)?;
        buf.write_u32::<T>(self.tid)?;
        buf.write_u64::<T>(self.addr)?;
        buf.write_u64::<T>(self.len)?;
        buf.write_u64::<T>(self.pgoff)?;
        match &self.file_id {
            Mmap2FileId::InodeAndVersion {
                major,
                minor,
                inode,
                inode_generation,
            } => {
                buf.write_u32::<T>(*major)?;
                buf.write_u32::<T>(*minor)?;
                buf.write_u64::<T>(*inode)?;
                buf.write_u64::<T>(*inode_generation)?;
            }
            Mmap2FileId::BuildId(build_id) => {
                let len = build_id.len().min(20);
                buf.push(len as u8);
                buf.extend_from_slice(&[0; 3]);
                buf.extend_from_slice(&build_id[..len]);
                buf.resize(buf.len() + 20 - len, 0);
            }
        }
        buf.write_u32::<T>(self.protection)?;
        buf.write_u32::<T>(self.flags)?;
        write_padded_string(buf, &self.filename);
        self.sample_id.write::<T>(buf)
    }
}

/// `PERF_RECORD_COMM`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommRecord {
    pub misc: u16,
    pub pid: u32,
    pub tid: u32,
    pub comm: Vec<u8>,
    pub sample_id: SampleId,
}

impl CommRecord {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let pid = cur.read_u32()?;
        let tid = cur.read_u32()?;
        let (comm, sample_id) = parse_name_and_sample_id(cur, attr)?;
        Ok(Self {
            misc,
            pid,
            tid,
            comm,
            sample_id,
        })
    }

    /// Whether this COMM was caused by an exec.
    pub fn is_exec(&self) -> bool {
        self.misc & PERF_RECORD_MISC_COMM_EXEC != 0
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u32::<T>(self.pid)?;
        buf.write_u32::<T>(self.tid)?;
        write_padded_string(buf, &self.comm);
        self.sample_id.write::<T>(buf)
    }
}

/// `PERF_RECORD_EXIT`, and with the same layout `PERF_RECORD_FORK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pub misc: u16,
    pub pid: u32,
    pub ppid: u32,
    pub tid: u32,
    pub ptid: u32,
    pub time: u64,
    pub sample_id: SampleId,
}

pub type ForkRecord = ExitRecord;

impl ExitRecord {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let pid = cur.read_u32()?;
        let ppid = cur.read_u32()?;
        let tid = cur.read_u32()?;
        let ptid = cur.read_u32()?;
        let time = cur.read_u64()?;
        let sample_id = SampleId::parse(cur, attr)?;
        Ok(Self {
            misc,
            pid,
            ppid,
            tid,
            ptid,
            time,
            sample_id,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u32::<T>(self.pid)?;
        buf.write_u32::<T>(self.ppid)?;
        buf.write_u32::<T>(self.tid)?;
        buf.write_u32::<T>(self.ptid)?;
        buf.write_u64::<T>(self.time)?;
        self.sample_id.write::<T>(buf)
    }
}

/// `PERF_RECORD_LOST`: the kernel dropped `lost` records because the ring
/// buffer was full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostRecord {
    pub misc: u16,
    pub id: u64,
    pub lost: u64,
    pub sample_id: SampleId,
}

impl LostRecord {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let id = cur.read_u64()?;
        let lost = cur.read_u64()?;
        let sample_id = SampleId::parse(cur, attr)?;
        Ok(Self {
            misc,
            id,
            lost,
            sample_id,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u64::<T>(self.id)?;
        buf.write_u64::<T>(self.lost)?;
        self.sample_id.write::<T>(buf)
    }
}

/// `PERF_RECORD_THROTTLE` / `PERF_RECORD_UNTHROTTLE`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleRecord {
    pub misc: u16,
    pub time: u64,
    pub id: u64,
    pub stream_id: u64,
    pub sample_id: SampleId,
}

impl ThrottleRecord {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let time = cur.read_u64()?;
        let id = cur.read_u64()?;
        let stream_id = cur.read_u64()?;
        let sample_id = SampleId::parse(cur, attr)?;
        Ok(Self {
            misc,
            time,
            id,
            stream_id,
            sample_id,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u64::<T>(self.time)?;
        buf.write_u64::<T>(self.id)?;
        buf.write_u64::<T>(self.stream_id)?;
        self.sample_id.write::<T>(buf)
    }
}

/// `PERF_RECORD_AUX`: new data is available in the AUX area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxRecord {
    pub misc: u16,
    pub aux_offset: u64,
    pub aux_size: u64,
    pub flags: u64,
    pub sample_id: SampleId,
}

impl AuxRecord {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let aux_offset = cur.read_u64()?;
        let aux_size = cur.read_u64()?;
        let flags = cur.read_u64()?;
        let sample_id = SampleId::parse(cur, attr)?;
        Ok(Self {
            misc,
            aux_offset,
            aux_size,
            flags,
            sample_id,
        })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u64::<T>(self.aux_offset)?;
        buf.write_u64::<T>(self.aux_size)?;
        buf.write_u64::<T>(self.flags)?;
        self.sample_id.write::<T>(buf)
    }
}

/// `PERF_RECORD_SWITCH`, or `PERF_RECORD_SWITCH_CPU_WIDE` if `next_prev` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchRecord {
    pub misc: u16,
    /// The pid and tid of the thread being switched to or from.
    pub next_prev: Option<(u32, u32)>,
    pub sample_id: SampleId,
}

impl SwitchRecord {
    pub fn parse<T: ByteOrder>(
        cur: &mut RecordCursor<T>,
        record_type: u32,
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let next_prev = if record_type == PERF_RECORD_SWITCH_CPU_WIDE {
            Some((cur.read_u32()?, cur.read_u32()?))
        } else {
            None
        };
        let sample_id = SampleId::parse(cur, attr)?;
        Ok(Self {
            misc,
            next_prev,
            sample_id,
        })
    }

    pub fn is_switch_out(&self) -> bool {
        self.misc & PERF_RECORD_MISC_SWITCH_OUT != 0
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        if let Some((pid, tid)) = self.next_prev {
            buf.write_u32::<T>(pid)?;
            buf.write_u32::<T>(tid)?;
        }
        self.sample_id.write::<T>(buf)
    }
}

/// `PERF_RECORD_HEADER_ATTR`: an attr and the ids of its kernel streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrRecord {
    pub attr: PerfEventAttr,
    pub ids: Vec<u64>,
}

impl AttrRecord {
    pub fn parse<T: ByteOrder>(cur: &mut RecordCursor<T>) -> Result<Self, ParseError> {
        let rest = cur.read_rest();
        let mut reader = rest;
        let attr = PerfEventAttr::parse::<_, T>(&mut reader, None).map_err(|_| ParseError {
            record_type: PERF_RECORD_HEADER_ATTR,
            offset: 0,
            expected: PERF_ATTR_SIZE_VER0 as usize,
            available: rest.len(),
        })?;
        let ids = reader.chunks_exact(8).map(T::read_u64).collect();
        Ok(Self { attr, ids })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        self.attr.write::<_, T>(&mut *buf)?;
        for id in &self.ids {
            buf.write_u64::<T>(*id)?;
        }
        Ok(())
    }
}

/// simpleperf `TracingDataRecord`: the ftrace format description of the
/// tracepoint events in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingDataRecord {
    pub data: Vec<u8>,
}

impl TracingDataRecord {
    pub fn parse<T: ByteOrder>(cur: &mut RecordCursor<T>) -> Result<Self, ParseError> {
        let size = cur.read_u32()? as usize;
        let data = cur.read_slice(size)?.to_vec();
        Ok(Self { data })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u32::<T>(self.data.len() as u32)?;
        buf.extend_from_slice(&self.data);
        let padded_len = crate::cursor::align8(buf.len());
        buf.resize(padded_len, 0);
        Ok(())
    }
}

/// One entry of an [`EventIdRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventIdEntry {
    /// The index of the attr in the attr section.
    pub attr_id: u64,
    /// The kernel-assigned id of one of the attr's streams.
    pub event_id: u64,
}

/// simpleperf `EventIdRecord`: maps kernel event ids to attrs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdRecord {
    pub entries: Vec<EventIdEntry>,
}

impl EventIdRecord {
    pub fn parse<T: ByteOrder>(cur: &mut RecordCursor<T>) -> Result<Self, ParseError> {
        let count = cur.read_u64()? as usize;
        let mut entries = Vec::with_capacity(count.min(cur.remaining() / 16));
        for _ in 0..count {
            let attr_id = cur.read_u64()?;
            let event_id = cur.read_u64()?;
            entries.push(EventIdEntry { attr_id, event_id });
        }
        Ok(Self { entries })
    }

    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        buf.write_u64::<T>(self.entries.len() as u64)?;
        for entry in &self.entries {
            buf.write_u64::<T>(entry.attr_id)?;
            buf.write_u64::<T>(entry.event_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use byteorder::LittleEndian;

    use super::*;
    use crate::attr::{AttrFlags, SampleFormat, SamplingPolicy};

    fn attr_with_sample_id_all() -> PerfEventAttr {
        let mut attr = PerfEventAttr::new(1, 0, SamplingPolicy::Period(1));
        attr.sample_format = SampleFormat::TID | SampleFormat::TIME;
        attr.flags = AttrFlags::SAMPLE_ID_ALL;
        attr
    }

    #[test]
    fn comm_name_stops_before_trailer() {
        let attr = attr_with_sample_id_all();
        let record = CommRecord {
            misc: PERF_RECORD_MISC_COMM_EXEC,
            pid: 100,
            tid: 101,
            comm: b"sleep".to_vec(),
            sample_id: SampleId {
                pid: Some(100),
                tid: Some(101),
                time: Some(5000),
                ..Default::default()
            },
        };
        let mut body = Vec::new();
        record.write::<LittleEndian>(&mut body).unwrap();
        // pid, tid, "sleep\0\0\0", pid, tid, time
        assert_eq!(body.len(), 8 + 8 + 16);

        let mut cur = RecordCursor::<LittleEndian>::new(&body, PERF_RECORD_COMM);
        let parsed = CommRecord::parse(&mut cur, record.misc, &attr).unwrap();
        assert_eq!(parsed, record);
        assert!(parsed.is_exec());
    }

    #[test]
    fn truncated_trailer() {
        let attr = attr_with_sample_id_all();
        let body = [0u8; 8 + 8];
        let mut cur = RecordCursor::<LittleEndian>::new(&body, PERF_RECORD_COMM);
        let err = CommRecord::parse(&mut cur, 0, &attr).unwrap_err();
        assert_eq!(err.record_type, PERF_RECORD_COMM);
        assert_eq!(err.expected, 16);
        assert_eq!(err.available, 8);
    }

    #[test]
    fn mmap2_with_build_id() {
        let attr = PerfEventAttr::new(1, 0, SamplingPolicy::Period(1));
        let record = Mmap2Record {
            misc: PERF_RECORD_MISC_MMAP_BUILD_ID | PERF_RECORD_MISC_USER,
            pid: 1,
            tid: 1,
            addr: 0x5555_0000,
            len: 0x1000,
            pgoff: 0,
            file_id: Mmap2FileId::BuildId(vec![0xab; 20]),
            protection: 5,
            flags: 2,
            filename: b"/usr/bin/true".to_vec(),
            sample_id: SampleId::default(),
        };
        let mut body = Vec::new();
        record.write::<LittleEndian>(&mut body).unwrap();
        let mut cur = RecordCursor::<LittleEndian>::new(&body, PERF_RECORD_MMAP2);
        assert_eq!(Mmap2Record::parse(&mut cur, record.misc, &attr).unwrap(), record);
    }
}
