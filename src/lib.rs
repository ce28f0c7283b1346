//! Record capture from Linux perf events, and a reader and writer for the
//! record file format used by simpleperf (a superset of perf.data).
//!
//! Recording opens one kernel perf event descriptor per cpu or thread for
//! each event, maps a ring buffer for each descriptor, and drains the ring
//! buffers in a poll loop. Records from different ring buffers are merged in
//! time order by a [`RecordCache`] and appended to a [`RecordFileWriter`].
//!
//! A record file consists of a header, an attr section with one
//! `perf_event_attr` per event, a data section containing the records, and
//! a set of feature sections with metadata such as the hostname, the command
//! line or build ids.
//!
//! There are two types of records: event records from the kernel, and "user
//! records" synthesized by the recorder. Both are represented by [`Record`].
//!
//! # Example
//!
//! ```no_run
//! use simpleperf_record::{AttributeDescription, RecordFileReader};
//!
//! # fn wrapper() -> Result<(), simpleperf_record::Error> {
//! let mut reader = RecordFileReader::open("perf.data")?;
//! let event_names: Vec<_> = reader
//!     .file()
//!     .event_attributes()
//!     .iter()
//!     .filter_map(AttributeDescription::name)
//!     .collect();
//! println!("events: {}", event_names.join(", "));
//!
//! while let Some(file_record) = reader.next_sorted_record()? {
//!     println!("{:?}: {:?}", file_record.attr_index, file_record.record);
//! }
//! # Ok(())
//! # }
//! ```

mod attr;
mod auxtrace;
mod build_id;
pub mod constants;
mod cursor;
#[cfg(feature = "zstd")]
mod decompression;
mod error;
mod event_selection;
mod event_type;
mod feature_sections;
mod features;
mod file_feature;
mod header;
mod record;
mod record_cache;
mod record_file;
mod record_file_reader;
mod record_file_writer;
mod record_header;
mod record_session;
mod records;
mod ring_buffer;
mod sample;
mod sample_id;
mod section;
mod simpleperf;
mod sorter;
pub mod sys;
mod workload;

pub use attr::{AttrFlags, PerfEventAttr, ReadFormat, SampleFormat, SamplingPolicy};
pub use auxtrace::AuxtraceRecord;
pub use build_id::BuildIdRecord;
pub use error::{Error, ErrorKind, ParseError, ReadError};
pub use event_selection::{EventFd, EventSelection, OpenTargets, Target};
pub use event_type::{EventType, EventTypeAndModifier, EventTypeRegistry};
pub use feature_sections::{AttributeDescription, AuxTraceIndexEntry, NrCpus};
pub use features::{Feature, FeatureSet, FeatureSetIter};
pub use file_feature::{DexFile, ElfFile, FileFeature, KernelModule, Symbol, TypeSpecificInfo};
pub use header::PerfHeader;
pub use record::{RawRecord, Record};
pub use record_cache::RecordCache;
pub use record_file::{Endianness, RecordFile};
pub use record_file_reader::{FileRecord, RecordFileReader};
pub use record_file_writer::{RecordFileWriter, WriterState};
pub use record_header::RecordHeader;
pub use record_session::{BuildIdProvider, RecordOptions, RecordSession, RecordSummary};
pub use records::*;
pub use ring_buffer::{MmapRegion, RawRecordIter, RingBuffer};
pub use sample::{
    BranchEntry, BranchStack, CounterValue, ReadValues, SampleRecord, UserRegs, UserStack,
};
pub use sample_id::SampleId;
pub use section::PerfFileSection;
pub use simpleperf::{format_event_type_info, get_event_types, parse_meta_info_map};
pub use workload::Workload;
