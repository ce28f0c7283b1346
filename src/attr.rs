use std::io::{Read, Write};

use bitflags::bitflags;
use byteorder::{ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::constants::*;
use crate::cursor::read_bytes;

bitflags! {
    /// Bits of `perf_event_attr.sample_type`, see `perf_event_sample_format`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SampleFormat: u64 {
        const IP = PERF_SAMPLE_IP;
        const TID = PERF_SAMPLE_TID;
        const TIME = PERF_SAMPLE_TIME;
        const ADDR = PERF_SAMPLE_ADDR;
        const READ = PERF_SAMPLE_READ;
        const CALLCHAIN = PERF_SAMPLE_CALLCHAIN;
        const ID = PERF_SAMPLE_ID;
        const CPU = PERF_SAMPLE_CPU;
        const PERIOD = PERF_SAMPLE_PERIOD;
        const STREAM_ID = PERF_SAMPLE_STREAM_ID;
        const RAW = PERF_SAMPLE_RAW;
        const BRANCH_STACK = PERF_SAMPLE_BRANCH_STACK;
        const REGS_USER = PERF_SAMPLE_REGS_USER;
        const STACK_USER = PERF_SAMPLE_STACK_USER;
        const WEIGHT = PERF_SAMPLE_WEIGHT;
        const DATA_SRC = PERF_SAMPLE_DATA_SRC;
        const IDENTIFIER = PERF_SAMPLE_IDENTIFIER;
        const TRANSACTION = PERF_SAMPLE_TRANSACTION;
        const REGS_INTR = PERF_SAMPLE_REGS_INTR;
        const PHYS_ADDR = PERF_SAMPLE_PHYS_ADDR;
        const AUX = PERF_SAMPLE_AUX;
        const CGROUP = PERF_SAMPLE_CGROUP;
        const DATA_PAGE_SIZE = PERF_SAMPLE_DATA_PAGE_SIZE;
        const CODE_PAGE_SIZE = PERF_SAMPLE_CODE_PAGE_SIZE;
        const WEIGHT_STRUCT = PERF_SAMPLE_WEIGHT_STRUCT;
    }
}

bitflags! {
    /// Bits of `perf_event_attr.read_format`, see `perf_event_read_format`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReadFormat: u64 {
        const TOTAL_TIME_ENABLED = PERF_FORMAT_TOTAL_TIME_ENABLED;
        const TOTAL_TIME_RUNNING = PERF_FORMAT_TOTAL_TIME_RUNNING;
        const ID = PERF_FORMAT_ID;
        const GROUP = PERF_FORMAT_GROUP;
        const LOST = PERF_FORMAT_LOST;
    }
}

bitflags! {
    /// The single-bit members of the `perf_event_attr` flags bitfield.
    ///
    /// `freq` and `precise_ip` are not part of this set; they are represented
    /// by [`SamplingPolicy`] and [`PerfEventAttr::precise_ip`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AttrFlags: u64 {
        const DISABLED = ATTR_FLAG_BIT_DISABLED;
        const INHERIT = ATTR_FLAG_BIT_INHERIT;
        const PINNED = ATTR_FLAG_BIT_PINNED;
        const EXCLUSIVE = ATTR_FLAG_BIT_EXCLUSIVE;
        const EXCLUDE_USER = ATTR_FLAG_BIT_EXCLUDE_USER;
        const EXCLUDE_KERNEL = ATTR_FLAG_BIT_EXCLUDE_KERNEL;
        const EXCLUDE_HV = ATTR_FLAG_BIT_EXCLUDE_HV;
        const EXCLUDE_IDLE = ATTR_FLAG_BIT_EXCLUDE_IDLE;
        const MMAP = ATTR_FLAG_BIT_MMAP;
        const COMM = ATTR_FLAG_BIT_COMM;
        const INHERIT_STAT = ATTR_FLAG_BIT_INHERIT_STAT;
        const ENABLE_ON_EXEC = ATTR_FLAG_BIT_ENABLE_ON_EXEC;
        const TASK = ATTR_FLAG_BIT_TASK;
        const WATERMARK = ATTR_FLAG_BIT_WATERMARK;
        const MMAP_DATA = ATTR_FLAG_BIT_MMAP_DATA;
        const SAMPLE_ID_ALL = ATTR_FLAG_BIT_SAMPLE_ID_ALL;
        const EXCLUDE_HOST = ATTR_FLAG_BIT_EXCLUDE_HOST;
        const EXCLUDE_GUEST = ATTR_FLAG_BIT_EXCLUDE_GUEST;
        const EXCLUDE_CALLCHAIN_KERNEL = ATTR_FLAG_BIT_EXCLUDE_CALLCHAIN_KERNEL;
        const EXCLUDE_CALLCHAIN_USER = ATTR_FLAG_BIT_EXCLUDE_CALLCHAIN_USER;
        const MMAP2 = ATTR_FLAG_BIT_MMAP2;
        const COMM_EXEC = ATTR_FLAG_BIT_COMM_EXEC;
        const USE_CLOCKID = ATTR_FLAG_BIT_USE_CLOCKID;
        const CONTEXT_SWITCH = ATTR_FLAG_BIT_CONTEXT_SWITCH;
        const WRITE_BACKWARD = ATTR_FLAG_BIT_WRITE_BACKWARD;
        const NAMESPACES = ATTR_FLAG_BIT_NAMESPACES;
        const KSYMBOL = ATTR_FLAG_BIT_KSYMBOL;
        const BPF_EVENT = ATTR_FLAG_BIT_BPF_EVENT;
        const AUX_OUTPUT = ATTR_FLAG_BIT_AUX_OUTPUT;
        const CGROUP = ATTR_FLAG_BIT_CGROUP;
        const TEXT_POKE = ATTR_FLAG_BIT_TEXT_POKE;
        const BUILD_ID = ATTR_FLAG_BIT_BUILD_ID;
    }
}

/// How often samples are taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPolicy {
    /// Take a sample every `n` events.
    Period(u64),
    /// Let the kernel adjust the period to reach `n` samples per second.
    Frequency(u64),
}

/// `perf_event_attr`
///
/// The configuration of one kernel perf event. The same value is written to
/// the attr section of a record file and is needed to parse the records
/// generated for this event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfEventAttr {
    /// Major type: hardware/software/tracepoint/etc.
    pub type_: u32,
    /// Type-specific configuration information.
    pub config: u64,
    pub sampling_policy: SamplingPolicy,
    /// Specifies values included in sample.
    pub sample_format: SampleFormat,
    /// Specifies the structure values returned by read() on a perf event fd.
    pub read_format: ReadFormat,
    pub flags: AttrFlags,
    /// Skid constraint, 0 to 3.
    pub precise_ip: u8,
    /// If `AttrFlags::WATERMARK` is set, this is the watermark in bytes,
    /// otherwise the number of events after which to wake up.
    pub wakeup_events_or_watermark: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    /// Defines set of user regs to dump on samples.
    pub sample_regs_user: u64,
    /// Defines size of the user stack to dump on samples.
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub aux_sample_size: u32,
    pub sig_data: u64,
}

impl PerfEventAttr {
    /// The size of the struct as written by this crate (`PERF_ATTR_SIZE_VER7`).
    pub const STRUCT_SIZE: u32 = PERF_ATTR_SIZE_VER7;

    /// Creates an attr for the given event type and config, sampling with the
    /// given policy. All other fields are zero.
    pub fn new(type_: u32, config: u64, sampling_policy: SamplingPolicy) -> Self {
        Self {
            type_,
            config,
            sampling_policy,
            sample_format: SampleFormat::empty(),
            read_format: ReadFormat::empty(),
            flags: AttrFlags::empty(),
            precise_ip: 0,
            wakeup_events_or_watermark: 0,
            bp_type: 0,
            config1: 0,
            config2: 0,
            branch_sample_type: 0,
            sample_regs_user: 0,
            sample_stack_user: 0,
            clockid: 0,
            sample_regs_intr: 0,
            aux_watermark: 0,
            sample_max_stack: 0,
            aux_sample_size: 0,
            sig_data: 0,
        }
    }

    pub fn sample_id_all(&self) -> bool {
        self.flags.contains(AttrFlags::SAMPLE_ID_ALL)
    }

    /// Parse from a reader. On success, exactly `size` bytes are consumed.
    ///
    /// If `size` is `None`, the size stored in the struct itself is used.
    /// Fields beyond the consumed size are zero.
    pub fn parse<R: Read, T: ByteOrder>(
        mut reader: R,
        size: Option<u32>,
    ) -> Result<Self, std::io::Error> {
        let type_ = reader.read_u32::<T>()?;
        let self_described_size = reader.read_u32::<T>()?;
        let size = size.unwrap_or(self_described_size);
        if size < PERF_ATTR_SIZE_VER0 {
            return Err(std::io::ErrorKind::InvalidData.into());
        }

        let mut rest = read_bytes(&mut reader, u64::from(size - 8))?;
        // Pad to the largest size we know about, so that missing fields read as zero.
        if rest.len() < (Self::STRUCT_SIZE - 8) as usize {
            rest.resize((Self::STRUCT_SIZE - 8) as usize, 0);
        }
        let mut r = &rest[..];

        let config = r.read_u64::<T>()?;
        let sampling_period_or_frequency = r.read_u64::<T>()?;
        let sample_format = SampleFormat::from_bits_retain(r.read_u64::<T>()?);
        let read_format = ReadFormat::from_bits_retain(r.read_u64::<T>()?);
        let raw_flags = r.read_u64::<T>()?;
        let wakeup_events_or_watermark = r.read_u32::<T>()?;
        let bp_type = r.read_u32::<T>()?;
        let config1 = r.read_u64::<T>()?;
        let config2 = r.read_u64::<T>()?;
        let branch_sample_type = r.read_u64::<T>()?;
        let sample_regs_user = r.read_u64::<T>()?;
        let sample_stack_user = r.read_u32::<T>()?;
        let clockid = r.read_i32::<T>()?;
        let sample_regs_intr = r.read_u64::<T>()?;
        let aux_watermark = r.read_u32::<T>()?;
        let sample_max_stack = r.read_u16::<T>()?;
        let _reserved_2 = r.read_u16::<T>()?;
        let aux_sample_size = r.read_u32::<T>()?;
        let _reserved_3 = r.read_u32::<T>()?;
        let sig_data = r.read_u64::<T>()?;

        let sampling_policy = if raw_flags & ATTR_FLAG_BIT_FREQ != 0 {
            SamplingPolicy::Frequency(sampling_period_or_frequency)
        } else {
            SamplingPolicy::Period(sampling_period_or_frequency)
        };
        let precise_ip =
            ((raw_flags & ATTR_FLAG_BITMASK_PRECISE_IP) >> ATTR_FLAG_BITSHIFT_PRECISE_IP) as u8;
        let flags = AttrFlags::from_bits_retain(
            raw_flags & !(ATTR_FLAG_BIT_FREQ | ATTR_FLAG_BITMASK_PRECISE_IP),
        );

        Ok(Self {
            type_,
            config,
            sampling_policy,
            sample_format,
            read_format,
            flags,
            precise_ip,
            wakeup_events_or_watermark,
            bp_type,
            config1,
            config2,
            branch_sample_type,
            sample_regs_user,
            sample_stack_user,
            clockid,
            sample_regs_intr,
            aux_watermark,
            sample_max_stack,
            aux_sample_size,
            sig_data,
        })
    }

    /// Writes the attr as a `STRUCT_SIZE`-byte `perf_event_attr`.
    pub fn write<W: Write, T: ByteOrder>(&self, mut writer: W) -> Result<(), std::io::Error> {
        let (sampling_period_or_frequency, freq_bit) = match self.sampling_policy {
            SamplingPolicy::Period(period) => (period, 0),
            SamplingPolicy::Frequency(freq) => (freq, ATTR_FLAG_BIT_FREQ),
        };
        let raw_flags = self.flags.bits()
            | freq_bit
            | ((u64::from(self.precise_ip) << ATTR_FLAG_BITSHIFT_PRECISE_IP)
                & ATTR_FLAG_BITMASK_PRECISE_IP);

        writer.write_u32::<T>(self.type_)?;
        writer.write_u32::<T>(Self::STRUCT_SIZE)?;
        writer.write_u64::<T>(self.config)?;
        writer.write_u64::<T>(sampling_period_or_frequency)?;
        writer.write_u64::<T>(self.sample_format.bits())?;
        writer.write_u64::<T>(self.read_format.bits())?;
        writer.write_u64::<T>(raw_flags)?;
        writer.write_u32::<T>(self.wakeup_events_or_watermark)?;
        writer.write_u32::<T>(self.bp_type)?;
        writer.write_u64::<T>(self.config1)?;
        writer.write_u64::<T>(self.config2)?;
        writer.write_u64::<T>(self.branch_sample_type)?;
        writer.write_u64::<T>(self.sample_regs_user)?;
        writer.write_u32::<T>(self.sample_stack_user)?;
        writer.write_i32::<T>(self.clockid)?;
        writer.write_u64::<T>(self.sample_regs_intr)?;
        writer.write_u32::<T>(self.aux_watermark)?;
        writer.write_u16::<T>(self.sample_max_stack)?;
        writer.write_u16::<T>(0)?;
        writer.write_u32::<T>(self.aux_sample_size)?;
        writer.write_u32::<T>(0)?;
        writer.write_u64::<T>(self.sig_data)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use byteorder::{BigEndian, LittleEndian};

    use super::*;

    fn sample_attr() -> PerfEventAttr {
        let mut attr = PerfEventAttr::new(
            PERF_TYPE_SOFTWARE,
            PERF_COUNT_SW_TASK_CLOCK,
            SamplingPolicy::Frequency(4000),
        );
        attr.sample_format = SampleFormat::IP | SampleFormat::TID | SampleFormat::TIME;
        attr.flags = AttrFlags::DISABLED | AttrFlags::SAMPLE_ID_ALL | AttrFlags::MMAP;
        attr.precise_ip = 2;
        attr
    }

    #[test]
    fn flag_bits_land_in_the_bitfield() {
        let attr = sample_attr();
        let mut buf = Vec::new();
        attr.write::<_, LittleEndian>(&mut buf).unwrap();
        assert_eq!(buf.len(), PerfEventAttr::STRUCT_SIZE as usize);
        assert_eq!(LittleEndian::read_u32(&buf[4..8]), 128);
        assert_eq!(LittleEndian::read_u64(&buf[16..24]), 4000);
        let raw_flags = LittleEndian::read_u64(&buf[40..48]);
        assert_eq!(
            raw_flags,
            ATTR_FLAG_BIT_DISABLED
                | ATTR_FLAG_BIT_MMAP
                | ATTR_FLAG_BIT_FREQ
                | (2 << 15)
                | ATTR_FLAG_BIT_SAMPLE_ID_ALL
        );

        let parsed = PerfEventAttr::parse::<_, LittleEndian>(&buf[..], None).unwrap();
        assert_eq!(parsed, attr);
    }

    #[test]
    fn parse_old_small_attr() {
        let attr = sample_attr();
        let mut buf = Vec::new();
        attr.write::<_, BigEndian>(&mut buf).unwrap();
        // Pretend this is a VER1 attr; the fields after it read as zero.
        BigEndian::write_u32(&mut buf[4..8], PERF_ATTR_SIZE_VER1);
        buf.truncate(PERF_ATTR_SIZE_VER1 as usize);
        buf.extend_from_slice(&[0xff; 8]);

        let mut reader = &buf[..];
        let parsed = PerfEventAttr::parse::<_, BigEndian>(&mut reader, None).unwrap();
        assert_eq!(parsed.sample_format, attr.sample_format);
        assert_eq!(parsed.sample_regs_user, 0);
        assert_eq!(reader.len(), 8);
    }

    #[test]
    fn too_small_size_is_rejected() {
        let buf = [0u8; 64];
        assert!(PerfEventAttr::parse::<_, LittleEndian>(&buf[..], Some(16)).is_err());
    }
}
