use byteorder::{ByteOrder, WriteBytesExt};

use crate::attr::{PerfEventAttr, ReadFormat, SampleFormat};
use crate::constants::{PERF_RECORD_SAMPLE, PERF_SAMPLE_BRANCH_HW_INDEX};
use crate::cursor::RecordCursor;
use crate::error::ParseError;

/// The sample format bits whose fields this crate parses. The fields for all
/// other bits come after these and are kept as raw bytes.
const PARSED_SAMPLE_FORMAT: SampleFormat = SampleFormat::IDENTIFIER
    .union(SampleFormat::IP)
    .union(SampleFormat::TID)
    .union(SampleFormat::TIME)
    .union(SampleFormat::ADDR)
    .union(SampleFormat::ID)
    .union(SampleFormat::STREAM_ID)
    .union(SampleFormat::CPU)
    .union(SampleFormat::PERIOD)
    .union(SampleFormat::READ)
    .union(SampleFormat::CALLCHAIN)
    .union(SampleFormat::RAW)
    .union(SampleFormat::BRANCH_STACK)
    .union(SampleFormat::REGS_USER)
    .union(SampleFormat::STACK_USER);

/// One counter value in the `read_format` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterValue {
    pub value: u64,
    pub id: Option<u64>,
    pub lost: Option<u64>,
}

/// `PERF_SAMPLE_READ` data, laid out according to the attr's `read_format`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadValues {
    pub time_enabled: Option<u64>,
    pub time_running: Option<u64>,
    /// One value, or one value per group member if `ReadFormat::GROUP` is set.
    pub values: Vec<CounterValue>,
    pub is_group: bool,
}

impl ReadValues {
    fn parse<T: ByteOrder>(
        cursor: &mut RecordCursor<T>,
        read_format: ReadFormat,
    ) -> Result<Self, ParseError> {
        let read_counter = |cursor: &mut RecordCursor<T>, value| -> Result<_, ParseError> {
            let id = if read_format.contains(ReadFormat::ID) {
                Some(cursor.read_u64()?)
            } else {
                None
            };
            let lost = if read_format.contains(ReadFormat::LOST) {
                Some(cursor.read_u64()?)
            } else {
                None
            };
            Ok(CounterValue { value, id, lost })
        };

        let is_group = read_format.contains(ReadFormat::GROUP);
        // Group: nr, [time_enabled], [time_running], {value, [id], [lost]} * nr
        // Single: value, [time_enabled], [time_running], [id], [lost]
        let first = cursor.read_u64()?;
        let time_enabled = if read_format.contains(ReadFormat::TOTAL_TIME_ENABLED) {
            Some(cursor.read_u64()?)
        } else {
            None
        };
        let time_running = if read_format.contains(ReadFormat::TOTAL_TIME_RUNNING) {
            Some(cursor.read_u64()?)
        } else {
            None
        };
        let values = if is_group {
            let nr = first as usize;
            let mut values = Vec::with_capacity(nr.min(cursor.remaining() / 8));
            for _ in 0..nr {
                let value = cursor.read_u64()?;
                values.push(read_counter(cursor, value)?);
            }
            values
        } else {
            vec![read_counter(cursor, first)?]
        };
        Ok(Self {
            time_enabled,
            time_running,
            values,
            is_group,
        })
    }

    fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        let write_counter = |buf: &mut Vec<u8>, counter: &CounterValue| {
            if let Some(id) = counter.id {
                buf.write_u64::<T>(id)?;
            }
            if let Some(lost) = counter.lost {
                buf.write_u64::<T>(lost)?;
            }
            Ok::<_, std::io::Error>(())
        };

        if self.is_group {
            buf.write_u64::<T>(self.values.len() as u64)?;
        } else {
            buf.write_u64::<T>(self.values.first().map_or(0, |v| v.value))?;
        }
        if let Some(time_enabled) = self.time_enabled {
            buf.write_u64::<T>(time_enabled)?;
        }
        if let Some(time_running) = self.time_running {
            buf.write_u64::<T>(time_running)?;
        }
        if self.is_group {
            for counter in &self.values {
                buf.write_u64::<T>(counter.value)?;
                write_counter(buf, counter)?;
            }
        } else if let Some(counter) = self.values.first() {
            write_counter(buf, counter)?;
        }
        Ok(())
    }
}

/// One entry of `PERF_SAMPLE_BRANCH_STACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchEntry {
    pub from: u64,
    pub to: u64,
    pub flags: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchStack {
    /// Present if the attr's branch sample type has `PERF_SAMPLE_BRANCH_HW_INDEX`.
    pub hw_idx: Option<u64>,
    pub entries: Vec<BranchEntry>,
}

/// `PERF_SAMPLE_REGS_USER`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRegs {
    /// `PERF_SAMPLE_REGS_ABI_*`; zero means no registers were captured.
    pub abi: u64,
    /// One value per bit set in the attr's `sample_regs_user`.
    pub regs: Vec<u64>,
}

/// `PERF_SAMPLE_STACK_USER`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStack {
    pub data: Vec<u8>,
    /// The number of valid bytes at the start of `data`. Absent if `data` is empty.
    pub dyn_size: Option<u64>,
}

/// `PERF_RECORD_SAMPLE`
///
/// Each field is present iff the matching bit is set in the attr's sample format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRecord {
    pub misc: u16,
    pub identifier: Option<u64>,
    pub ip: Option<u64>,
    pub pid: Option<u32>,
    pub tid: Option<u32>,
    pub time: Option<u64>,
    pub addr: Option<u64>,
    pub id: Option<u64>,
    pub stream_id: Option<u64>,
    pub cpu: Option<u32>,
    pub period: Option<u64>,
    pub read: Option<ReadValues>,
    pub callchain: Option<Vec<u64>>,
    pub raw: Option<Vec<u8>>,
    pub branch_stack: Option<BranchStack>,
    pub regs_user: Option<UserRegs>,
    pub stack_user: Option<UserStack>,
    /// Fields for sample format bits that are not parsed, e.g. `WEIGHT`.
    pub unparsed_tail: Vec<u8>,
}

impl SampleRecord {
    pub fn parse<T: ByteOrder>(
        body: &[u8],
        misc: u16,
        attr: &PerfEventAttr,
    ) -> Result<Self, ParseError> {
        let sf = attr.sample_format;
        let mut cur = RecordCursor::<T>::new(body, PERF_RECORD_SAMPLE);
        let mut sample = SampleRecord {
            misc,
            ..Default::default()
        };

        if sf.contains(SampleFormat::IDENTIFIER) {
            sample.identifier = Some(cur.read_u64()?);
        }
        if sf.contains(SampleFormat::IP) {
            sample.ip = Some(cur.read_u64()?);
        }
        if sf.contains(SampleFormat::TID) {
            sample.pid = Some(cur.read_u32()?);
            sample.tid = Some(cur.read_u32()?);
        }
        if sf.contains(SampleFormat::TIME) {
            sample.time = Some(cur.read_u64()?);
        }
        if sf.contains(SampleFormat::ADDR) {
            sample.addr = Some(cur.read_u64()?);
        }
        if sf.contains(SampleFormat::ID) {
            sample.id = Some(cur.read_u64()?);
        }
        if sf.contains(SampleFormat::STREAM_ID) {
            sample.stream_id = Some(cur.read_u64()?);
        }
        if sf.contains(SampleFormat::CPU) {
            sample.cpu = Some(cur.read_u32()?);
            let _reserved = cur.read_u32()?;
        }
        if sf.contains(SampleFormat::PERIOD) {
            sample.period = Some(cur.read_u64()?);
        }
        if sf.contains(SampleFormat::READ) {
            sample.read = Some(ReadValues::parse(&mut cur, attr.read_format)?);
        }
        if sf.contains(SampleFormat::CALLCHAIN) {
            let nr = cur.read_u64()? as usize;
            let mut ips = Vec::with_capacity(nr.min(cur.remaining() / 8));
            for _ in 0..nr {
                ips.push(cur.read_u64()?);
            }
            sample.callchain = Some(ips);
        }
        if sf.contains(SampleFormat::RAW) {
            let size = cur.read_u32()? as usize;
            sample.raw = Some(cur.read_slice(size)?.to_vec());
        }
        if sf.contains(SampleFormat::BRANCH_STACK) {
            let nr = cur.read_u64()? as usize;
            let hw_idx = if attr.branch_sample_type & PERF_SAMPLE_BRANCH_HW_INDEX != 0 {
                Some(cur.read_u64()?)
            } else {
                None
            };
            let mut entries = Vec::with_capacity(nr.min(cur.remaining() / 24));
            for _ in 0..nr {
                let from = cur.read_u64()?;
                let to = cur.read_u64()?;
                let flags = cur.read_u64()?;
                entries.push(BranchEntry { from, to, flags });
            }
            sample.branch_stack = Some(BranchStack { hw_idx, entries });
        }
        if sf.contains(SampleFormat::REGS_USER) {
            let abi = cur.read_u64()?;
            let mut regs = Vec::new();
            if abi != 0 {
                for _ in 0..attr.sample_regs_user.count_ones() {
                    regs.push(cur.read_u64()?);
                }
            }
            sample.regs_user = Some(UserRegs { abi, regs });
        }
        if sf.contains(SampleFormat::STACK_USER) {
            let size = cur.read_u64()? as usize;
            let data = cur.read_slice(size)?.to_vec();
            let dyn_size = if size != 0 {
                Some(cur.read_u64()?)
            } else {
                None
            };
            sample.stack_user = Some(UserStack { data, dyn_size });
        }
        if !sf.difference(PARSED_SAMPLE_FORMAT).is_empty() {
            sample.unparsed_tail = cur.read_rest().to_vec();
        }
        Ok(sample)
    }

    /// Appends the body (everything after the header).
    pub fn write<T: ByteOrder>(&self, buf: &mut Vec<u8>) -> Result<(), std::io::Error> {
        if let Some(identifier) = self.identifier {
            buf.write_u64::<T>(identifier)?;
        }
        if let Some(ip) = self.ip {
            buf.write_u64::<T>(ip)?;
        }
        if self.pid.is_some() || self.tid.is_some() {
            buf.write_u32::<T>(self.pid.unwrap_or(0))?;
            buf.write_u32::<T>(self.tid.unwrap_or(0))?;
        }
        if let Some(time) = self.time {
            buf.write_u64::<T>(time)?;
        }
        if let Some(addr) = self.addr {
            buf.write_u64::<T>(addr)?;
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
        if let Some(period) = self.period {
            buf.write_u64::<T>(period)?;
        }
        if let Some(read) = &self.read {
            read.write::<T>(buf)?;
        }
        if let Some(callchain) = &self.callchain {
            buf.write_u64::<T>(callchain.len() as u64)?;
            for ip in callchain {
                buf.write_u64::<T>(*ip)?;
            }
        }
        if let Some(raw) = &self.raw {
            buf.write_u32::<T>(raw.len() as u32)?;
            buf.extend_from_slice(raw);
        }
        if let Some(branch_stack) = &self.branch_stack {
            buf.write_u64::<T>(branch_stack.entries.len() as u64)?;
            if let Some(hw_idx) = branch_stack.hw_idx {
                buf.write_u64::<T>(hw_idx)?;
            }
            for entry in &branch_stack.entries {
                buf.write_u64::<T>(entry.from)?;
                buf.write_u64::<T>(entry.to)?;
                buf.write_u64::<T>(entry.flags)?;
            }
        }
        if let Some(regs_user) = &self.regs_user {
            buf.write_u64::<T>(regs_user.abi)?;
            for reg in &regs_user.regs {
                buf.write_u64::<T>(*reg)?;
            }
        }
        if let Some(stack_user) = &self.stack_user {
            buf.write_u64::<T>(stack_user.data.len() as u64)?;
            buf.extend_from_slice(&stack_user.data);
            if let Some(dyn_size) = stack_user.dyn_size {
                buf.write_u64::<T>(dyn_size)?;
            }
        }
        buf.extend_from_slice(&self.unparsed_tail);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use byteorder::LittleEndian;

    use super::*;
    use crate::attr::SamplingPolicy;

    fn attr(sample_format: SampleFormat) -> PerfEventAttr {
        let mut attr = PerfEventAttr::new(1, 1, SamplingPolicy::Period(1));
        attr.sample_format = sample_format;
        attr
    }

    #[test]
    fn field_order() {
        let attr = attr(SampleFormat::IP | SampleFormat::TID | SampleFormat::TIME | SampleFormat::CPU);
        let body: Vec<u8> = [
            0x1000u64.to_le_bytes().to_vec(),
            [5u32.to_le_bytes(), 6u32.to_le_bytes()].concat(),
            99u64.to_le_bytes().to_vec(),
            [2u32.to_le_bytes(), 0u32.to_le_bytes()].concat(),
        ]
        .concat();
        let sample = SampleRecord::parse::<LittleEndian>(&body, 2, &attr).unwrap();
        assert_eq!(sample.ip, Some(0x1000));
        assert_eq!(sample.pid, Some(5));
        assert_eq!(sample.tid, Some(6));
        assert_eq!(sample.time, Some(99));
        assert_eq!(sample.cpu, Some(2));
        assert_eq!(sample.period, None);

        let mut written = Vec::new();
        sample.write::<LittleEndian>(&mut written).unwrap();
        assert_eq!(written, body);
    }

    #[test]
    fn every_variable_length_field() {
        let mut attr = attr(
            SampleFormat::IDENTIFIER
                | SampleFormat::READ
                | SampleFormat::CALLCHAIN
                | SampleFormat::RAW
                | SampleFormat::BRANCH_STACK
                | SampleFormat::REGS_USER
                | SampleFormat::STACK_USER,
        );
        attr.read_format = ReadFormat::GROUP | ReadFormat::ID | ReadFormat::TOTAL_TIME_ENABLED;
        attr.branch_sample_type = PERF_SAMPLE_BRANCH_HW_INDEX;
        attr.sample_regs_user = 0b1011;

        let sample = SampleRecord {
            identifier: Some(42),
            read: Some(ReadValues {
                time_enabled: Some(1000),
                time_running: None,
                values: vec![
                    CounterValue { value: 1, id: Some(42), lost: None },
                    CounterValue { value: 2, id: Some(43), lost: None },
                ],
                is_group: true,
            }),
            callchain: Some(vec![0xffff_0000, 0x1234, 0x5678]),
            raw: Some(vec![1, 2, 3, 4]),
            branch_stack: Some(BranchStack {
                hw_idx: Some(7),
                entries: vec![BranchEntry { from: 1, to: 2, flags: 3 }],
            }),
            regs_user: Some(UserRegs { abi: 2, regs: vec![10, 11, 12] }),
            stack_user: Some(UserStack { data: vec![0xaa; 16], dyn_size: Some(8) }),
            ..Default::default()
        };
        let mut body = Vec::new();
        sample.write::<LittleEndian>(&mut body).unwrap();
        let parsed = SampleRecord::parse::<LittleEndian>(&body, 0, &attr).unwrap();
        assert_eq!(parsed, sample);

        // Cutting off the last byte must be reported, not silently accepted.
        let err = SampleRecord::parse::<LittleEndian>(&body[..body.len() - 1], 0, &attr)
            .unwrap_err();
        assert_eq!(err.record_type, PERF_RECORD_SAMPLE);
        assert_eq!(err.expected, 8);
        assert_eq!(err.available, 7);
    }

    #[test]
    fn regs_abi_none_has_no_values() {
        let mut attr = attr(SampleFormat::REGS_USER | SampleFormat::STACK_USER);
        attr.sample_regs_user = 0xff;
        let body = [0u8; 16];
        let sample = SampleRecord::parse::<LittleEndian>(&body, 0, &attr).unwrap();
        assert_eq!(sample.regs_user, Some(UserRegs { abi: 0, regs: vec![] }));
        assert_eq!(sample.stack_user, Some(UserStack { data: vec![], dyn_size: None }));
    }

    #[test]
    fn unknown_bits_keep_tail() {
        let attr = attr(SampleFormat::IP | SampleFormat::WEIGHT);
        let body = [1, 0, 0, 0, 0, 0, 0, 0, 9, 0, 0, 0, 0, 0, 0, 0];
        let sample = SampleRecord::parse::<LittleEndian>(&body, 0, &attr).unwrap();
        assert_eq!(sample.ip, Some(1));
        assert_eq!(sample.unparsed_tail, &body[8..]);
    }
}
