use byteorder::ByteOrder;

use crate::attr::PerfEventAttr;
use crate::auxtrace::AuxtraceRecord;
use crate::build_id::BuildIdRecord;
use crate::constants::*;
use crate::cursor::RecordCursor;
use crate::error::{Error, ParseError};
use crate::record_header::RecordHeader;
use crate::records::*;
use crate::sample::SampleRecord;
use crate::sample_id::SampleId;

/// A record whose type this crate does not interpret. The body is kept as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub header: RecordHeader,
    /// The bytes after the header.
    pub body: Vec<u8>,
}

/// A record, either emitted by the kernel into a ring buffer or synthesized
/// by the recorder.
///
/// Every record can be parsed from its wire bytes and written back to the
/// same bytes. Record types which are not modeled become [`Record::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Mmap(MmapRecord),
    Mmap2(Mmap2Record),
    Comm(CommRecord),
    Exit(ExitRecord),
    Fork(ForkRecord),
    Lost(LostRecord),
    Throttle(ThrottleRecord),
    Unthrottle(ThrottleRecord),
    Aux(AuxRecord),
    Switch(SwitchRecord),
    Sample(SampleRecord),
    BuildId(BuildIdRecord),
    TracingData(TracingDataRecord),
    Attr(AttrRecord),
    FinishedRound,
    Auxtrace(AuxtraceRecord),
    EventId(EventIdRecord),
    Unknown(RawRecord),
}

impl Record {
    /// Parse a record from `data`, which starts with the record header.
    ///
    /// `attr` describes the event which generated kernel records; it is ignored
    /// for records synthesized in user space. Bytes after `header.size` are
    /// ignored.
    pub fn parse<T: ByteOrder>(data: &[u8], attr: &PerfEventAttr) -> Result<Self, ParseError> {
        let header = RecordHeader::parse::<T>(data)?;
        let size = header.size as usize;
        if size < RecordHeader::STRUCT_SIZE || size > data.len() {
            return Err(ParseError {
                record_type: header.type_,
                offset: 0,
                expected: size.max(RecordHeader::STRUCT_SIZE),
                available: data.len(),
            });
        }
        let body = &data[RecordHeader::STRUCT_SIZE..size];
        Self::parse_body::<T>(header, body, attr)
    }

    /// Parse a record from its header and the bytes after the header.
    pub fn parse_body<T: ByteOrder>(
        header: RecordHeader,
        body: &[u8],
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let misc = header.misc;
        let mut cur = RecordCursor::<T>::new(body, header.type_);
        let cur = &mut cur;
        let record = match header.type_ {
            PERF_RECORD_MMAP => Record::Mmap(MmapRecord::parse(cur, misc, attr)?),
            PERF_RECORD_MMAP2 => Record::Mmap2(Mmap2Record::parse(cur, misc, attr)?),
            PERF_RECORD_COMM => Record::Comm(CommRecord::parse(cur, misc, attr)?),
            PERF_RECORD_EXIT => Record::Exit(ExitRecord::parse(cur, misc, attr)?),
            PERF_RECORD_FORK => Record::Fork(ForkRecord::parse(cur, misc, attr)?),
            PERF_RECORD_LOST => Record::Lost(LostRecord::parse(cur, misc, attr)?),
            PERF_RECORD_THROTTLE => Record::Throttle(ThrottleRecord::parse(cur, misc, attr)?),
            PERF_RECORD_UNTHROTTLE => Record::Unthrottle(ThrottleRecord::parse(cur, misc, attr)?),
            PERF_RECORD_AUX => Record::Aux(AuxRecord::parse(cur, misc, attr)?),
            PERF_RECORD_SWITCH | PERF_RECORD_SWITCH_CPU_WIDE => {
                Record::Switch(SwitchRecord::parse(cur, header.type_, misc, attr)?)
            }
            PERF_RECORD_SAMPLE => Record::Sample(SampleRecord::parse::<T>(body, misc, attr)?),
            PERF_RECORD_HEADER_BUILD_ID => Record::BuildId(BuildIdRecord::parse(cur, misc)?),
            PERF_RECORD_HEADER_ATTR => Record::Attr(AttrRecord::parse(cur)?),
            PERF_RECORD_FINISHED_ROUND => Record::FinishedRound,
            PERF_RECORD_AUXTRACE => Record::Auxtrace(AuxtraceRecord::parse(cur)?),
            SIMPLE_PERF_RECORD_TRACING_DATA => {
                Record::TracingData(TracingDataRecord::parse(cur)?)
            }
            SIMPLE_PERF_RECORD_EVENT_ID => Record::EventId(EventIdRecord::parse(cur)?),
            _ => Record::Unknown(RawRecord {
                header,
                body: body.to_vec(),
            }),
        };
        Ok(record)
    }

    pub fn record_type(&self) -> u32 {
        match self {
            Record::Mmap(_) => PERF_RECORD_MMAP,
            Record::Mmap2(_) => PERF_RECORD_MMAP2,
            Record::Comm(_) => PERF_RECORD_COMM,
            Record::Exit(_) => PERF_RECORD_EXIT,
            Record::Fork(_) => PERF_RECORD_FORK,
            Record::Lost(_) => PERF_RECORD_LOST,
            Record::Throttle(_) => PERF_RECORD_THROTTLE,
            Record::Unthrottle(_) => PERF_RECORD_UNTHROTTLE,
            Record::Aux(_) => PERF_RECORD_AUX,
            Record::Switch(r) if r.next_prev.is_some() => PERF_RECORD_SWITCH_CPU_WIDE,
            Record::Switch(_) => PERF_RECORD_SWITCH,
            Record::Sample(_) => PERF_RECORD_SAMPLE,
            Record::BuildId(_) => PERF_RECORD_HEADER_BUILD_ID,
            Record::TracingData(_) => SIMPLE_PERF_RECORD_TRACING_DATA,
            Record::Attr(_) => PERF_RECORD_HEADER_ATTR,
            Record::FinishedRound => PERF_RECORD_FINISHED_ROUND,
            Record::Auxtrace(_) => PERF_RECORD_AUXTRACE,
            Record::EventId(_) => SIMPLE_PERF_RECORD_EVENT_ID,
            Record::Unknown(r) => r.header.type_,
        }
    }

    pub fn misc(&self) -> u16 {
        match self {
            Record::Mmap(r) => r.misc,
            Record::Mmap2(r) => r.misc,
            Record::Comm(r) => r.misc,
            Record::Exit(r) | Record::Fork(r) => r.misc,
            Record::Lost(r) => r.misc,
            Record::Throttle(r) | Record::Unthrottle(r) => r.misc,
            Record::Aux(r) => r.misc,
            Record::Switch(r) => r.misc,
            Record::Sample(r) => r.misc,
            Record::BuildId(r) => r.misc,
            Record::Unknown(r) => r.header.misc,
            Record::TracingData(_)
            | Record::Attr(_)
            | Record::FinishedRound
            | Record::Auxtrace(_)
            | Record::EventId(_) => 0,
        }
    }

    /// Whether this record was emitted by the kernel, as opposed to being
    /// synthesized in user space.
    pub fn is_kernel_record(&self) -> bool {
        self.record_type() < PERF_RECORD_USER_TYPE_START
    }

    /// The `sample_id` trailer of non-SAMPLE kernel records.
    pub fn sample_id(&self) -> Option<&SampleId> {
        match self {
            Record::Mmap(r) => Some(&r.sample_id),
            Record::Mmap2(r) => Some(&r.sample_id),
            Record::Comm(r) => Some(&r.sample_id),
            Record::Exit(r) | Record::Fork(r) => Some(&r.sample_id),
            Record::Lost(r) => Some(&r.sample_id),
            Record::Throttle(r) | Record::Unthrottle(r) => Some(&r.sample_id),
            Record::Aux(r) => Some(&r.sample_id),
            Record::Switch(r) => Some(&r.sample_id),
            _ => None,
        }
    }

    /// The time at which the kernel emitted this record, if known.
    pub fn timestamp(&self) -> Option<u64> {
        match self {
            Record::Sample(r) => r.time,
            Record::Exit(r) | Record::Fork(r) => r.sample_id.time.or(Some(r.time)),
            _ => self.sample_id().and_then(|s| s.time),
        }
    }

    /// Writes everything after the header.
    fn write_body<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        match self {
            Record::Mmap(r) => r.write::<T>(buf),
            Record::Mmap2(r) => r.write::<T>(buf),
            Record::Comm(r) => r.write::<T>(buf),
            Record::Exit(r) | Record::Fork(r) => r.write::<T>(buf),
            Record::Lost(r) => r.write::<T>(buf),
            Record::Throttle(r) | Record::Unthrottle(r) => r.write::<T>(buf),
            Record::Aux(r) => r.write::<T>(buf),
            Record::Switch(r) => r.write::<T>(buf),
            Record::Sample(r) => r.write::<T>(buf),
            Record::BuildId(r) => r.write::<T>(buf),
            Record::TracingData(r) => r.write::<T>(buf),
            Record::Attr(r) => r.write::<T>(buf),
            Record::FinishedRound => Ok(()),
            Record::Auxtrace(r) => r.write::<T>(buf),
            Record::EventId(r) => r.write::<T>(buf),
            Record::Unknown(r) => {
                buf.extend_from_slice(&r.body);
                Ok(())
            }
        }
    }

    /// Serializes the record, including its header.
    ///
    /// Fails with [`Error::RecordTooLarge`] if a perf record type would need
    /// more than 65535 bytes. Simpleperf record types can be larger.
    pub fn serialize<T: ByteOrder>(&self) -> Result<Vec<u8>, Error> {
        let mut body = Vec::new();
        self.write_body::<T>(&mut body)?;
        let size = RecordHeader::STRUCT_SIZE + body.len();
        let size = u32::try_from(size).map_err(|_| Error::RecordTooLarge {
            record_type: self.record_type(),
            size,
        })?;
        let header = RecordHeader {
            type_: self.record_type(),
            misc: self.misc(),
            size,
        };
        let mut buf = Vec::with_capacity(size as usize);
        header.write::<_, T>(&mut buf)?;
        buf.extend_from_slice(&body);
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use byteorder::{BigEndian, LittleEndian};

    use super::*;
    use crate::attr::{AttrFlags, SampleFormat, SamplingPolicy};
    use crate::records::EventIdEntry;

    fn attr() -> PerfEventAttr {
        let mut attr = PerfEventAttr::new(
            PERF_TYPE_SOFTWARE,
            PERF_COUNT_SW_TASK_CLOCK,
            SamplingPolicy::Period(1),
        );
        attr.sample_format = SampleFormat::IP
            | SampleFormat::TID
            | SampleFormat::TIME
            | SampleFormat::ID
            | SampleFormat::CPU
            | SampleFormat::PERIOD;
        attr.flags = AttrFlags::SAMPLE_ID_ALL | AttrFlags::MMAP | AttrFlags::COMM;
        attr
    }

    fn sample_id(time: u64) -> SampleId {
        SampleId {
            pid: Some(7),
            tid: Some(8),
            time: Some(time),
            id: Some(99),
            cpu: Some(1),
            ..Default::default()
        }
    }

    fn one_of_each() -> Vec<Record> {
        vec![
            Record::Mmap(MmapRecord {
                misc: PERF_RECORD_MISC_USER,
                pid: 7,
                tid: 7,
                addr: 0x4000,
                len: 0x2000,
                pgoff: 0,
                filename: b"/bin/ls".to_vec(),
                sample_id: sample_id(1),
            }),
            Record::Comm(CommRecord {
                misc: 0,
                pid: 7,
                tid: 8,
                comm: b"worker-thread".to_vec(),
                sample_id: sample_id(2),
            }),
            Record::Fork(ExitRecord {
                misc: 0,
                pid: 7,
                ppid: 1,
                tid: 8,
                ptid: 7,
                time: 3,
                sample_id: sample_id(3),
            }),
            Record::Lost(LostRecord {
                misc: 0,
                id: 99,
                lost: 12,
                sample_id: sample_id(4),
            }),
            Record::Unthrottle(ThrottleRecord {
                misc: 0,
                time: 5,
                id: 99,
                stream_id: 99,
                sample_id: sample_id(5),
            }),
            Record::Switch(SwitchRecord {
                misc: PERF_RECORD_MISC_SWITCH_OUT,
                next_prev: Some((9, 10)),
                sample_id: sample_id(6),
            }),
            Record::Sample(SampleRecord {
                misc: PERF_RECORD_MISC_USER,
                ip: Some(0x4010),
                pid: Some(7),
                tid: Some(8),
                time: Some(7),
                id: Some(99),
                cpu: Some(1),
                period: Some(1),
                ..Default::default()
            }),
            Record::BuildId(BuildIdRecord::new(7, &[0x11; 20], b"/bin/ls")),
            Record::TracingData(TracingDataRecord {
                data: b"tracing".to_vec(),
            }),
            Record::Attr(AttrRecord {
                attr: attr(),
                ids: vec![99, 100],
            }),
            Record::FinishedRound,
            Record::EventId(EventIdRecord {
                entries: vec![EventIdEntry {
                    attr_id: 0,
                    event_id: 99,
                }],
            }),
            Record::Unknown(RawRecord {
                header: RecordHeader {
                    type_: PERF_RECORD_NAMESPACES,
                    misc: 0,
                    size: 16,
                },
                body: vec![1, 2, 3, 4, 5, 6, 7, 8],
            }),
        ]
    }

    #[test]
    fn serialized_size_matches_header() {
        for record in one_of_each() {
            let bytes = record.serialize::<LittleEndian>().unwrap();
            let header = RecordHeader::parse::<LittleEndian>(&bytes).unwrap();
            assert_eq!(header.size as usize, bytes.len(), "{record:?}");
            assert_eq!(header.type_, record.record_type());
            if record.is_kernel_record() {
                assert_eq!(bytes.len() % 8, 0, "{record:?}");
            }
        }
    }

    #[test]
    fn reparse_gives_equal_record() {
        let attr = attr();
        for record in one_of_each() {
            let bytes = record.serialize::<BigEndian>().unwrap();
            let parsed = Record::parse::<BigEndian>(&bytes, &attr).unwrap();
            assert_eq!(parsed, record);
        }
    }

    #[test]
    fn every_sample_format_subset_reparses() {
        let bits = [
            SampleFormat::IDENTIFIER,
            SampleFormat::IP,
            SampleFormat::TID,
            SampleFormat::TIME,
            SampleFormat::ADDR,
            SampleFormat::ID,
            SampleFormat::STREAM_ID,
            SampleFormat::CPU,
            SampleFormat::PERIOD,
        ];
        for mask in 0u32..1 << bits.len() {
            let sample_format = bits
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .fold(SampleFormat::empty(), |acc, (_, &bit)| acc | bit);
            let mut attr = attr();
            attr.sample_format = sample_format;
            let has = |bit: SampleFormat| sample_format.contains(bit);

            let sample = Record::Sample(SampleRecord {
                misc: PERF_RECORD_MISC_USER,
                identifier: has(SampleFormat::IDENTIFIER).then_some(101),
                ip: has(SampleFormat::IP).then_some(0x4010),
                pid: has(SampleFormat::TID).then_some(7),
                tid: has(SampleFormat::TID).then_some(8),
                time: has(SampleFormat::TIME).then_some(1000),
                addr: has(SampleFormat::ADDR).then_some(0xdead_0000),
                id: has(SampleFormat::ID).then_some(99),
                stream_id: has(SampleFormat::STREAM_ID).then_some(98),
                cpu: has(SampleFormat::CPU).then_some(3),
                period: has(SampleFormat::PERIOD).then_some(1),
                ..Default::default()
            });
            let mmap = Record::Mmap(MmapRecord {
                misc: PERF_RECORD_MISC_USER,
                pid: 7,
                tid: 7,
                addr: 0x4000,
                len: 0x2000,
                pgoff: 0,
                filename: b"/bin/ls".to_vec(),
                sample_id: SampleId {
                    pid: has(SampleFormat::TID).then_some(7),
                    tid: has(SampleFormat::TID).then_some(8),
                    time: has(SampleFormat::TIME).then_some(1000),
                    id: has(SampleFormat::ID).then_some(99),
                    stream_id: has(SampleFormat::STREAM_ID).then_some(98),
                    cpu: has(SampleFormat::CPU).then_some(3),
                    identifier: has(SampleFormat::IDENTIFIER).then_some(101),
                },
            });
            for record in [sample, mmap] {
                let bytes = record.serialize::<LittleEndian>().unwrap();
                let parsed = Record::parse::<LittleEndian>(&bytes, &attr).unwrap();
                assert_eq!(parsed, record, "{sample_format:?}");
            }
        }
    }

    #[test]
    fn timestamps() {
        let records = one_of_each();
        let times: Vec<_> = records.iter().map(Record::timestamp).collect();
        assert_eq!(&times[..7], &[1, 2, 3, 4, 5, 6, 7].map(Some));
        assert_eq!(records[7].timestamp(), None);
        assert!(!records[10].is_kernel_record());
    }

    #[test]
    fn size_larger_than_data() {
        let bytes = Record::FinishedRound.serialize::<LittleEndian>().unwrap();
        let err = Record::parse::<LittleEndian>(&bytes[..6], &attr()).unwrap_err();
        assert_eq!(err.expected, 8);
        let mut bytes = bytes;
        bytes[6] = 16;
        let err = Record::parse::<LittleEndian>(&bytes, &attr()).unwrap_err();
        assert_eq!(err.record_type, PERF_RECORD_FINISHED_ROUND);
        assert_eq!((err.expected, err.available), (16, 8));
    }

    #[test]
    fn kernel_record_over_64k_is_rejected() {
        let record = Record::Comm(CommRecord {
            misc: 0,
            pid: 1,
            tid: 1,
            comm: vec![b'a'; 70000],
            sample_id: SampleId::default(),
        });
        assert!(matches!(
            record.serialize::<LittleEndian>(),
            Err(Error::RecordTooLarge { .. })
        ));

        let record = Record::TracingData(TracingDataRecord {
            data: vec![0; 70000],
        });
        let bytes = record.serialize::<LittleEndian>().unwrap();
        assert_eq!(
            RecordHeader::parse::<LittleEndian>(&bytes).unwrap().size as usize,
            bytes.len()
        );
    }
}
