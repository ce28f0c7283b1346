// perf_type_id
pub const PERF_TYPE_HARDWARE: u32 = 0;
pub const PERF_TYPE_SOFTWARE: u32 = 1;
pub const PERF_TYPE_TRACEPOINT: u32 = 2;
pub const PERF_TYPE_HW_CACHE: u32 = 3;
pub const PERF_TYPE_RAW: u32 = 4;
pub const PERF_TYPE_BREAKPOINT: u32 = 5;

// perf_hw_id
pub const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
pub const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
pub const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
pub const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
pub const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
pub const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;
pub const PERF_COUNT_HW_BUS_CYCLES: u64 = 6;
pub const PERF_COUNT_HW_STALLED_CYCLES_FRONTEND: u64 = 7;
pub const PERF_COUNT_HW_STALLED_CYCLES_BACKEND: u64 = 8;
pub const PERF_COUNT_HW_REF_CPU_CYCLES: u64 = 9;

// perf_sw_ids
pub const PERF_COUNT_SW_CPU_CLOCK: u64 = 0;
pub const PERF_COUNT_SW_TASK_CLOCK: u64 = 1;
pub const PERF_COUNT_SW_PAGE_FAULTS: u64 = 2;
pub const PERF_COUNT_SW_CONTEXT_SWITCHES: u64 = 3;
pub const PERF_COUNT_SW_CPU_MIGRATIONS: u64 = 4;
pub const PERF_COUNT_SW_PAGE_FAULTS_MIN: u64 = 5;
pub const PERF_COUNT_SW_PAGE_FAULTS_MAJ: u64 = 6;
pub const PERF_COUNT_SW_ALIGNMENT_FAULTS: u64 = 7;
pub const PERF_COUNT_SW_EMULATION_FAULTS: u64 = 8;
pub const PERF_COUNT_SW_DUMMY: u64 = 9;

// perf_event_sample_format
pub const PERF_SAMPLE_IP: u64 = 1 << 0;
pub const PERF_SAMPLE_TID: u64 = 1 << 1;
pub const PERF_SAMPLE_TIME: u64 = 1 << 2;
pub const PERF_SAMPLE_ADDR: u64 = 1 << 3;
pub const PERF_SAMPLE_READ: u64 = 1 << 4;
pub const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;
pub const PERF_SAMPLE_ID: u64 = 1 << 6;
pub const PERF_SAMPLE_CPU: u64 = 1 << 7;
pub const PERF_SAMPLE_PERIOD: u64 = 1 << 8;
pub const PERF_SAMPLE_STREAM_ID: u64 = 1 << 9;
pub const PERF_SAMPLE_RAW: u64 = 1 << 10;
pub const PERF_SAMPLE_BRANCH_STACK: u64 = 1 << 11;
pub const PERF_SAMPLE_REGS_USER: u64 = 1 << 12;
pub const PERF_SAMPLE_STACK_USER: u64 = 1 << 13;
pub const PERF_SAMPLE_WEIGHT: u64 = 1 << 14;
pub const PERF_SAMPLE_DATA_SRC: u64 = 1 << 15;
pub const PERF_SAMPLE_IDENTIFIER: u64 = 1 << 16;
pub const PERF_SAMPLE_TRANSACTION: u64 = 1 << 17;
pub const PERF_SAMPLE_REGS_INTR: u64 = 1 << 18;
pub const PERF_SAMPLE_PHYS_ADDR: u64 = 1 << 19;
pub const PERF_SAMPLE_AUX: u64 = 1 << 20;
pub const PERF_SAMPLE_CGROUP: u64 = 1 << 21;
pub const PERF_SAMPLE_DATA_PAGE_SIZE: u64 = 1 << 22;
pub const PERF_SAMPLE_CODE_PAGE_SIZE: u64 = 1 << 23;
pub const PERF_SAMPLE_WEIGHT_STRUCT: u64 = 1 << 24;

// perf_branch_sample_type
pub const PERF_SAMPLE_BRANCH_HW_INDEX: u64 = 1 << 17;

// perf_event_read_format
pub const PERF_FORMAT_TOTAL_TIME_ENABLED: u64 = 1 << 0;
pub const PERF_FORMAT_TOTAL_TIME_RUNNING: u64 = 1 << 1;
pub const PERF_FORMAT_ID: u64 = 1 << 2;
pub const PERF_FORMAT_GROUP: u64 = 1 << 3;
pub const PERF_FORMAT_LOST: u64 = 1 << 4;

// Bits of the perf_event_attr flags bitfield.
pub const ATTR_FLAG_BIT_DISABLED: u64 = 1 << 0;
pub const ATTR_FLAG_BIT_INHERIT: u64 = 1 << 1;
pub const ATTR_FLAG_BIT_PINNED: u64 = 1 << 2;
pub const ATTR_FLAG_BIT_EXCLUSIVE: u64 = 1 << 3;
pub const ATTR_FLAG_BIT_EXCLUDE_USER: u64 = 1 << 4;
pub const ATTR_FLAG_BIT_EXCLUDE_KERNEL: u64 = 1 << 5;
pub const ATTR_FLAG_BIT_EXCLUDE_HV: u64 = 1 << 6;
pub const ATTR_FLAG_BIT_EXCLUDE_IDLE: u64 = 1 << 7;
pub const ATTR_FLAG_BIT_MMAP: u64 = 1 << 8;
pub const ATTR_FLAG_BIT_COMM: u64 = 1 << 9;
pub const ATTR_FLAG_BIT_FREQ: u64 = 1 << 10;
pub const ATTR_FLAG_BIT_INHERIT_STAT: u64 = 1 << 11;
pub const ATTR_FLAG_BIT_ENABLE_ON_EXEC: u64 = 1 << 12;
pub const ATTR_FLAG_BIT_TASK: u64 = 1 << 13;
pub const ATTR_FLAG_BIT_WATERMARK: u64 = 1 << 14;
/// Two bits wide: bits 15 and 16.
pub const ATTR_FLAG_BITMASK_PRECISE_IP: u64 = (1 << 15) | (1 << 16);
pub const ATTR_FLAG_BITSHIFT_PRECISE_IP: u32 = 15;
pub const ATTR_FLAG_BIT_MMAP_DATA: u64 = 1 << 17;
pub const ATTR_FLAG_BIT_SAMPLE_ID_ALL: u64 = 1 << 18;
pub const ATTR_FLAG_BIT_EXCLUDE_HOST: u64 = 1 << 19;
pub const ATTR_FLAG_BIT_EXCLUDE_GUEST: u64 = 1 << 20;
pub const ATTR_FLAG_BIT_EXCLUDE_CALLCHAIN_KERNEL: u64 = 1 << 21;
pub const ATTR_FLAG_BIT_EXCLUDE_CALLCHAIN_USER: u64 = 1 << 22;
pub const ATTR_FLAG_BIT_MMAP2: u64 = 1 << 23;
pub const ATTR_FLAG_BIT_COMM_EXEC: u64 = 1 << 24;
pub const ATTR_FLAG_BIT_USE_CLOCKID: u64 = 1 << 25;
pub const ATTR_FLAG_BIT_CONTEXT_SWITCH: u64 = 1 << 26;
pub const ATTR_FLAG_BIT_WRITE_BACKWARD: u64 = 1 << 27;
pub const ATTR_FLAG_BIT_NAMESPACES: u64 = 1 << 28;
pub const ATTR_FLAG_BIT_KSYMBOL: u64 = 1 << 29;
pub const ATTR_FLAG_BIT_BPF_EVENT: u64 = 1 << 30;
pub const ATTR_FLAG_BIT_AUX_OUTPUT: u64 = 1 << 31;
pub const ATTR_FLAG_BIT_CGROUP: u64 = 1 << 32;
pub const ATTR_FLAG_BIT_TEXT_POKE: u64 = 1 << 33;
pub const ATTR_FLAG_BIT_BUILD_ID: u64 = 1 << 34;

// perf_event_attr sizes
pub const PERF_ATTR_SIZE_VER0: u32 = 64;
pub const PERF_ATTR_SIZE_VER1: u32 = 72;
pub const PERF_ATTR_SIZE_VER2: u32 = 80;
pub const PERF_ATTR_SIZE_VER3: u32 = 96;
pub const PERF_ATTR_SIZE_VER4: u32 = 104;
pub const PERF_ATTR_SIZE_VER5: u32 = 112;
pub const PERF_ATTR_SIZE_VER6: u32 = 120;
pub const PERF_ATTR_SIZE_VER7: u32 = 128;

// Kernel record types (perf_event_type)
pub const PERF_RECORD_MMAP: u32 = 1;
pub const PERF_RECORD_LOST: u32 = 2;
pub const PERF_RECORD_COMM: u32 = 3;
pub const PERF_RECORD_EXIT: u32 = 4;
pub const PERF_RECORD_THROTTLE: u32 = 5;
pub const PERF_RECORD_UNTHROTTLE: u32 = 6;
pub const PERF_RECORD_FORK: u32 = 7;
pub const PERF_RECORD_READ: u32 = 8;
pub const PERF_RECORD_SAMPLE: u32 = 9;
pub const PERF_RECORD_MMAP2: u32 = 10;
pub const PERF_RECORD_AUX: u32 = 11;
pub const PERF_RECORD_ITRACE_START: u32 = 12;
pub const PERF_RECORD_LOST_SAMPLES: u32 = 13;
pub const PERF_RECORD_SWITCH: u32 = 14;
pub const PERF_RECORD_SWITCH_CPU_WIDE: u32 = 15;
pub const PERF_RECORD_NAMESPACES: u32 = 16;
pub const PERF_RECORD_KSYMBOL: u32 = 17;
pub const PERF_RECORD_BPF_EVENT: u32 = 18;
pub const PERF_RECORD_CGROUP: u32 = 19;
pub const PERF_RECORD_TEXT_POKE: u32 = 20;

/// Record types at or above this value are synthesized by user space.
pub const PERF_RECORD_USER_TYPE_START: u32 = 64;

// Record types synthesized by perf
pub const PERF_RECORD_HEADER_ATTR: u32 = 64;
pub const PERF_RECORD_HEADER_EVENT_TYPE: u32 = 65;
pub const PERF_RECORD_HEADER_TRACING_DATA: u32 = 66;
pub const PERF_RECORD_HEADER_BUILD_ID: u32 = 67;
pub const PERF_RECORD_FINISHED_ROUND: u32 = 68;
pub const PERF_RECORD_ID_INDEX: u32 = 69;
pub const PERF_RECORD_AUXTRACE_INFO: u32 = 70;
pub const PERF_RECORD_AUXTRACE: u32 = 71;
pub const PERF_RECORD_AUXTRACE_ERROR: u32 = 72;
pub const PERF_RECORD_COMPRESSED: u32 = 81;

// Record types synthesized by simpleperf
pub const SIMPLE_PERF_RECORD_TYPE_START: u32 = 32768;
pub const SIMPLE_PERF_RECORD_KERNEL_SYMBOL: u32 = 32769;
pub const SIMPLE_PERF_RECORD_DSO: u32 = 32770;
pub const SIMPLE_PERF_RECORD_SYMBOL: u32 = 32771;
pub const SIMPLE_PERF_RECORD_SPLIT: u32 = 32772;
pub const SIMPLE_PERF_RECORD_SPLIT_END: u32 = 32773;
pub const SIMPLE_PERF_RECORD_EVENT_ID: u32 = 32774;
pub const SIMPLE_PERF_RECORD_CALLCHAIN: u32 = 32775;
pub const SIMPLE_PERF_RECORD_UNWINDING_RESULT: u32 = 32776;
pub const SIMPLE_PERF_RECORD_TRACING_DATA: u32 = 32777;
pub const SIMPLE_PERF_RECORD_DEBUG: u32 = 32778;

// perf_event_header misc bits
pub const PERF_RECORD_MISC_CPUMODE_MASK: u16 = 0b111;
pub const PERF_RECORD_MISC_CPUMODE_UNKNOWN: u16 = 0;
pub const PERF_RECORD_MISC_KERNEL: u16 = 1;
pub const PERF_RECORD_MISC_USER: u16 = 2;
pub const PERF_RECORD_MISC_HYPERVISOR: u16 = 3;
pub const PERF_RECORD_MISC_GUEST_KERNEL: u16 = 4;
pub const PERF_RECORD_MISC_GUEST_USER: u16 = 5;
pub const PERF_RECORD_MISC_MMAP_DATA: u16 = 1 << 13;
pub const PERF_RECORD_MISC_COMM_EXEC: u16 = 1 << 13;
pub const PERF_RECORD_MISC_SWITCH_OUT: u16 = 1 << 13;
pub const PERF_RECORD_MISC_EXACT_IP: u16 = 1 << 14;
pub const PERF_RECORD_MISC_MMAP_BUILD_ID: u16 = 1 << 14;
pub const PERF_RECORD_MISC_BUILD_ID_SIZE: u16 = 1 << 15;

// ioctls
pub const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;
pub const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;
pub const PERF_EVENT_IOC_RESET: u64 = 0x2403;
/// `_IOR('$', 7, u64 *)`
pub const PERF_EVENT_IOC_ID: u64 = 0x8000_0000 | ((std::mem::size_of::<usize>() as u64) << 16) | 0x2407;

// perf_event_open flags
pub const PERF_FLAG_FD_NO_GROUP: u64 = 1 << 0;
pub const PERF_FLAG_FD_OUTPUT: u64 = 1 << 1;
pub const PERF_FLAG_PID_CGROUP: u64 = 1 << 2;
pub const PERF_FLAG_FD_CLOEXEC: u64 = 1 << 3;

/// The largest size a record may have in a `perf_event_header`.
pub const MAX_PERF_RECORD_SIZE: usize = 65535;
/// Payload size of a single simpleperf split record chunk.
pub const SPLIT_RECORD_CHUNK_SIZE: usize = (MAX_PERF_RECORD_SIZE - 8) & !7;
