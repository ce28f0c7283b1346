use std::io;

use crate::record_file_writer::WriterState;

/// The error type used in this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The data slice was not big enough to read the struct, or we
    /// were trying to follow an invalid offset to somewhere outside
    /// of the data bounds.
    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Opening, mapping or controlling a perf event file descriptor failed.
    #[error("Perf event resource error for {target}: {source}")]
    Resource {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("No perf event file descriptor could be opened for {0}")]
    NoDescriptorsOpened(String),

    #[error("The mmap page count {0} is not a power of two")]
    MmapPagesNotPowerOfTwo(usize),

    #[error("The ring buffer has {available} readable bytes, fewer than a record header")]
    TruncatedRingBuffer { available: u64 },

    #[error("The ring buffer claims {available} readable bytes, more than its size {size}")]
    RingBufferOverrun { available: u64, size: u64 },

    #[error("Did not recognize magic value {0:?}")]
    UnrecognizedMagicValue([u8; 8]),

    #[error("Section size did not fit into usize")]
    SectionSizeTooBig,

    #[error("The {0} section extends past the end of the file")]
    SectionOutOfBounds(&'static str),

    #[error("The section wasn't big enough to contain the u32 string length")]
    NotEnoughSpaceForStringLen,

    #[error("The section wasn't big enough to contain the NrCpus struct")]
    NotEnoughSpaceForNrCpus,

    #[error("The indicated string length wouldn't fit in the indicated section size")]
    StringLengthTooLong,

    #[error("The string was not valid utf-8")]
    StringUtf8,

    /// A record in the data section could not be read or parsed.
    #[error("Invalid record at file offset {file_offset}: {source}")]
    InvalidRecord {
        file_offset: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("The specified size in the perf event header was smaller than the header itself")]
    InvalidPerfEventSize,

    #[error("The file has no event attributes")]
    NoAttributes,

    #[error("Event {0} has no IDENTIFIER in its sample format, but there are multiple events")]
    NoIdentifierDespiteMultiEvent(usize),

    #[error("Event {0} has a different SAMPLE_ID_ALL setting than the first event")]
    InconsistentSampleIdAllWithMultiEvent(usize),

    #[error("A record of type {record_type} with size {size} does not fit into a perf_event_header")]
    RecordTooLarge { record_type: u32, size: usize },

    #[error("The data section ended inside a split record")]
    IncompleteSplitRecord,

    #[error("Found a split end record without a preceding split record")]
    UnexpectedSplitEnd,

    #[error("The file contains compressed records, but zstd support is not enabled")]
    CompressionNotSupported,

    #[error("Unknown event name {0:?}")]
    UnknownEventName(String),

    #[error("{operation} is not allowed while the writer is in state {state:?}")]
    InvalidWriterState {
        operation: &'static str,
        state: WriterState,
    },

    #[error("Feature {0} was already written")]
    DuplicateFeature(u32),

    #[error("Feature id {0} does not fit into the header's feature bitmask")]
    InvalidFeature(u32),

    #[error("Only {0} feature slots were reserved")]
    TooManyFeatures(usize),

    #[error("The writer failed earlier and rejects all further calls")]
    WriterPoisoned,

    #[error("Could not run the workload: {0}")]
    Workload(String),

    #[error("Could not decode a protobuf message: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

/// The broad class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A kernel resource could not be opened, mapped or controlled.
    Resource,
    /// Malformed record bytes.
    Parse,
    /// A read, write or seek failed.
    Io,
    /// The record file is not valid.
    Format,
    /// An API was called out of order or with invalid arguments.
    Usage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRecord { source, .. } => source.kind(),
            Error::Resource { .. }
            | Error::NoDescriptorsOpened(_)
            | Error::Workload(_) => ErrorKind::Resource,
            Error::Parse(_)
            | Error::TruncatedRingBuffer { .. }
            | Error::RingBufferOverrun { .. } => ErrorKind::Parse,
            Error::IoError(_) | Error::WriterPoisoned => ErrorKind::Io,
            Error::MmapPagesNotPowerOfTwo(_)
            | Error::RecordTooLarge { .. }
            | Error::UnknownEventName(_)
            | Error::InvalidWriterState { .. }
            | Error::DuplicateFeature(_)
            | Error::InvalidFeature(_)
            | Error::TooManyFeatures(_) => ErrorKind::Usage,
            _ => ErrorKind::Format,
        }
    }
}

/// This error indicates that the data slice was not large enough to
/// read the respective item.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("Could not read PerfHeader")]
    PerfHeader,

    #[error("Could not read BuildIdSection")]
    BuildIdSection,

    #[error("Could not read StringLen")]
    StringLen,

    #[error("Could not read String")]
    String,

    #[error("Could not read NrCpus")]
    NrCpus,

    #[error("Could not read AttrsSection")]
    AttrsSection,

    #[error("Could not read PerfEventAttr")]
    PerfEventAttr,

    #[error("Could not read PerfEventHeader")]
    PerfEventHeader,

    #[error("Could not read PerfEvent data")]
    PerfEventData,

    #[error("Could not read AuxtraceSection")]
    AuxtraceSection,
}

/// A record's bytes ended before all of its fields could be read.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Record of type {record_type} needs {expected} bytes at offset {offset}, but only {available} are available")]
pub struct ParseError {
    pub record_type: u32,
    /// The offset inside the record at which reading failed.
    pub offset: usize,
    pub expected: usize,
    pub available: usize,
}
