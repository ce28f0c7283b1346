use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{NativeEndian, WriteBytesExt};
use linear_map::LinearMap;
use log::{debug, info, warn};

use crate::attr::PerfEventAttr;
use crate::auxtrace::AuxtraceRecord;
use crate::build_id::BuildIdRecord;
use crate::constants::{
    MAX_PERF_RECORD_SIZE, SIMPLE_PERF_RECORD_SPLIT,
    SIMPLE_PERF_RECORD_SPLIT_END, SPLIT_RECORD_CHUNK_SIZE,
};
use crate::cursor::align8;
use crate::error::Error;
use crate::feature_sections::{
    AttributeDescription, AuxTraceIndex, AuxTraceIndexEntry, BuildIdList, Cmdline, HeaderString,
    NrCpus, PmuMappings,
};
use crate::features::{Feature, FeatureSet};
use crate::file_feature::{write_file2_section, FileFeature};
use crate::header::{PerfHeader, MAGIC_LITTLE_ENDIAN};
use crate::record::Record;
use crate::record_header::RecordHeader;
use crate::section::PerfFileSection;
use crate::simpleperf::write_meta_info_map;

/// The position of a [`RecordFileWriter`] in its call sequence.
///
/// Calls must follow the order of the variants. Calling an operation in the
/// wrong state fails with [`Error::InvalidWriterState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WriterState {
    Created,
    HeaderReserved,
    AttrWritten,
    DataWriting,
    FeaturesWriting,
    Closed,
}

/// Writes a record file.
///
/// The file is laid out as header, attr section, event id lists, data
/// section, feature section table, and feature payloads. The header is
/// written last, once all sizes are known.
///
/// All values are written in native byte order. If the writer is dropped
/// before [`close`](Self::close) succeeds, a file created with
/// [`create`](Self::create) is deleted.
///
/// # Example
///
/// ```no_run
/// use simpleperf_record::{
///     AttributeDescription, Feature, PerfEventAttr, Record, RecordFileWriter, SamplingPolicy,
/// };
///
/// # fn wrapper() -> Result<(), simpleperf_record::Error> {
/// let attr = PerfEventAttr::new(1, 0, SamplingPolicy::Frequency(4000));
/// let mut writer = RecordFileWriter::create("perf.data")?;
/// writer.reserve_header()?;
/// writer.write_attr_section(&[AttributeDescription {
///     attr,
///     name: Some("cpu-clock".into()),
///     event_ids: vec![],
/// }])?;
/// writer.write_record(&Record::FinishedRound)?;
/// writer.begin_write_features(1)?;
/// writer.write_string_feature(Feature::HOSTNAME, "localhost")?;
/// writer.close()?;
/// # Ok(())
/// # }
/// ```
pub struct RecordFileWriter<W: Write + Seek = BufWriter<File>> {
    writer: W,
    /// The file to delete if the writer is dropped without being closed.
    path: Option<PathBuf>,
    state: WriterState,
    poisoned: bool,
    /// The current write position.
    pos: u64,
    attr_size: u64,
    attr_section: PerfFileSection,
    data_section: PerfFileSection,
    feature_table_offset: u64,
    reserved_feature_count: usize,
    features: FeatureSet,
    feature_sections: Vec<(Feature, PerfFileSection)>,
    current_feature: Option<(Feature, u64)>,
    auxtrace_index: Vec<AuxTraceIndexEntry>,
    record_count: u64,
}

impl RecordFileWriter<BufWriter<File>> {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let mut writer = Self::new(BufWriter::new(file));
        writer.path = Some(path.to_owned());
        Ok(writer)
    }
}

impl<W: Write + Seek> RecordFileWriter<W> {
    /// Writes to `writer`, starting at its offset zero.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            path: None,
            state: WriterState::Created,
            poisoned: false,
            pos: 0,
            attr_size: 0,
            attr_section: PerfFileSection::default(),
            data_section: PerfFileSection::default(),
            feature_table_offset: 0,
            reserved_feature_count: 0,
            features: FeatureSet::default(),
            feature_sections: Vec::new(),
            current_feature: None,
            auxtrace_index: Vec::new(),
            record_count: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// The underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// The number of bytes in the data section so far.
    pub fn data_size(&self) -> u64 {
        match self.state {
            WriterState::DataWriting => self.pos - self.data_section.offset,
            _ => self.data_section.size,
        }
    }

    /// The number of logical records written so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    fn check_state(
        &self,
        operation: &'static str,
        allowed: &[WriterState],
    ) -> Result<(), Error> {
        if self.poisoned {
            return Err(Error::WriterPoisoned);
        }
        if !allowed.contains(&self.state) {
            return Err(Error::InvalidWriterState {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Runs an I/O operation on the underlying writer and poisons the writer
    /// if it fails.
    fn io<R>(&mut self, f: impl FnOnce(&mut W) -> std::io::Result<R>) -> Result<R, Error> {
        match f(&mut self.writer) {
            Ok(r) => Ok(r),
            Err(e) => {
                self.poisoned = true;
                Err(e.into())
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.io(|w| w.write_all(bytes))?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    fn pad_to_8(&mut self) -> Result<(), Error> {
        let padding = align8(self.pos as usize) - self.pos as usize;
        if padding != 0 {
            self.write_bytes(&[0; 8][..padding])?;
        }
        Ok(())
    }

    /// Reserves room for the file header. It is filled in by `close`.
    pub fn reserve_header(&mut self) -> Result<(), Error> {
        self.check_state("reserve_header", &[WriterState::Created])?;
        self.io(|w| w.seek(SeekFrom::Start(0)))?;
        self.pos = 0;
        self.write_bytes(&[0; PerfHeader::STRUCT_SIZE as usize])?;
        self.state = WriterState::HeaderReserved;
        Ok(())
    }

    /// Writes one `perf_file_attr` per attribute, followed by the event id
    /// lists they point to.
    pub fn write_attr_section(&mut self, attributes: &[AttributeDescription]) -> Result<(), Error> {
        self.check_state("write_attr_section", &[WriterState::HeaderReserved])?;
        if attributes.is_empty() {
            return Err(Error::NoAttributes);
        }

        let attr_size = u64::from(PerfEventAttr::STRUCT_SIZE) + PerfFileSection::STRUCT_SIZE;
        let attr_section = PerfFileSection {
            offset: self.pos,
            size: attr_size * attributes.len() as u64,
        };

        let mut buf = Vec::with_capacity(attr_section.size as usize);
        let mut ids_offset = attr_section.end();
        for desc in attributes {
            desc.attr.write::<_, NativeEndian>(&mut buf)?;
            let ids_size = desc.event_ids.len() as u64 * 8;
            PerfFileSection {
                offset: ids_offset,
                size: ids_size,
            }
            .write::<_, NativeEndian>(&mut buf)?;
            ids_offset += ids_size;
        }
        for desc in attributes {
            for id in &desc.event_ids {
                buf.write_u64::<NativeEndian>(*id)?;
            }
        }
        self.write_bytes(&buf)?;

        self.attr_size = attr_size;
        self.attr_section = attr_section;
        self.data_section = PerfFileSection {
            offset: self.pos,
            size: 0,
        };
        self.state = WriterState::AttrWritten;
        Ok(())
    }

    /// Appends a record to the data section.
    pub fn write_record(&mut self, record: &Record) -> Result<(), Error> {
        let bytes = record.serialize::<NativeEndian>()?;
        self.write_raw_record(&bytes)
    }

    /// Appends the bytes of a serialized record, starting with its header,
    /// to the data section.
    ///
    /// Records larger than 65535 bytes are split into a sequence of split
    /// records and a split end record, which the reader puts back together.
    pub fn write_raw_record(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.check_state(
            "write_record",
            &[WriterState::AttrWritten, WriterState::DataWriting],
        )?;
        let header = RecordHeader::parse::<NativeEndian>(bytes)?;
        if header.size as usize != bytes.len() {
            return Err(Error::InvalidPerfEventSize);
        }
        self.state = WriterState::DataWriting;

        if bytes.len() <= MAX_PERF_RECORD_SIZE {
            self.write_bytes(bytes)?;
        } else {
            debug!(
                "Splitting record of type {} with size {}",
                header.type_,
                bytes.len()
            );
            for chunk in bytes.chunks(SPLIT_RECORD_CHUNK_SIZE) {
                self.write_split_header(SIMPLE_PERF_RECORD_SPLIT, chunk.len())?;
                self.write_bytes(chunk)?;
            }
            self.write_split_header(SIMPLE_PERF_RECORD_SPLIT_END, 0)?;
        }
        self.record_count += 1;
        Ok(())
    }

    fn write_split_header(&mut self, type_: u32, payload_len: usize) -> Result<(), Error> {
        let header = RecordHeader {
            type_,
            misc: 0,
            size: (RecordHeader::STRUCT_SIZE + payload_len) as u32,
        };
        let mut buf = Vec::with_capacity(RecordHeader::STRUCT_SIZE);
        header.write::<_, NativeEndian>(&mut buf)?;
        self.write_bytes(&buf)
    }

    /// Appends an auxtrace record followed by its aux data.
    ///
    /// The record's `size` is set to the length of `data` rounded up to a
    /// multiple of 8; the padding is zero. The position is remembered for
    /// the auxtrace feature section.
    pub fn write_aux_data(&mut self, record: &AuxtraceRecord, data: &[u8]) -> Result<(), Error> {
        let record = AuxtraceRecord {
            size: align8(data.len()) as u64,
            ..record.clone()
        };
        let offset = self.pos;
        self.write_record(&Record::Auxtrace(record))?;
        self.write_bytes(data)?;
        self.pad_to_8()?;
        self.auxtrace_index.push(AuxTraceIndexEntry {
            offset,
            size: self.pos - offset,
        });
        Ok(())
    }

    /// Ends the data section and reserves a feature table with room for
    /// `count` features.
    pub fn begin_write_features(&mut self, count: usize) -> Result<(), Error> {
        self.check_state(
            "begin_write_features",
            &[WriterState::AttrWritten, WriterState::DataWriting],
        )?;
        self.data_section.size = self.pos - self.data_section.offset;
        self.feature_table_offset = self.pos;
        self.reserved_feature_count = count;
        let table = vec![0; count * PerfFileSection::STRUCT_SIZE as usize];
        self.write_bytes(&table)?;
        self.state = WriterState::FeaturesWriting;
        Ok(())
    }

    /// Starts the payload of `feature`. Everything written until
    /// [`write_feature_end`](Self::write_feature_end) belongs to it.
    pub fn write_feature_begin(&mut self, feature: Feature) -> Result<(), Error> {
        self.check_state("write_feature_begin", &[WriterState::FeaturesWriting])?;
        if feature > Feature::MAX {
            return Err(Error::InvalidFeature(feature.0));
        }
        if self.current_feature.is_some() || self.features.has_feature(feature) {
            return Err(Error::DuplicateFeature(feature.0));
        }
        if self.feature_sections.len() >= self.reserved_feature_count {
            return Err(Error::TooManyFeatures(self.reserved_feature_count));
        }
        self.pad_to_8()?;
        self.current_feature = Some((feature, self.pos));
        Ok(())
    }

    /// Appends payload bytes to the current feature.
    pub fn write_feature_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_state("write_feature_data", &[WriterState::FeaturesWriting])?;
        if self.current_feature.is_none() {
            return Err(Error::InvalidWriterState {
                operation: "write_feature_data",
                state: self.state,
            });
        }
        self.write_bytes(data)
    }

    pub fn write_feature_end(&mut self, feature: Feature) -> Result<(), Error> {
        self.check_state("write_feature_end", &[WriterState::FeaturesWriting])?;
        match self.current_feature {
            Some((current, start)) if current == feature => {
                self.current_feature = None;
                self.features.insert(feature);
                self.feature_sections.push((
                    feature,
                    PerfFileSection {
                        offset: start,
                        size: self.pos - start,
                    },
                ));
                Ok(())
            }
            _ => Err(Error::InvalidWriterState {
                operation: "write_feature_end",
                state: self.state,
            }),
        }
    }

    /// Writes a whole feature payload.
    pub fn write_feature(&mut self, feature: Feature, data: &[u8]) -> Result<(), Error> {
        self.write_feature_begin(feature)?;
        self.write_feature_data(data)?;
        self.write_feature_end(feature)
    }

    /// Writes a string feature such as [`Feature::HOSTNAME`] or [`Feature::ARCH`].
    pub fn write_string_feature(&mut self, feature: Feature, s: &str) -> Result<(), Error> {
        let mut buf = Vec::new();
        HeaderString::write::<_, NativeEndian>(&mut buf, s)?;
        self.write_feature(feature, &buf)
    }

    pub fn write_cmdline_feature(&mut self, args: &[impl AsRef<str>]) -> Result<(), Error> {
        let mut buf = Vec::new();
        Cmdline::write::<_, NativeEndian>(&mut buf, args)?;
        self.write_feature(Feature::CMDLINE, &buf)
    }

    pub fn write_nr_cpus_feature(&mut self, nr_cpus: NrCpus) -> Result<(), Error> {
        let mut buf = Vec::new();
        nr_cpus.write::<_, NativeEndian>(&mut buf)?;
        self.write_feature(Feature::NRCPUS, &buf)
    }

    pub fn write_build_id_feature(&mut self, build_ids: &[BuildIdRecord]) -> Result<(), Error> {
        let mut buf = Vec::new();
        BuildIdList::write::<_, NativeEndian>(&mut buf, build_ids)?;
        self.write_feature(Feature::BUILD_ID, &buf)
    }

    pub fn write_event_desc_feature(
        &mut self,
        attributes: &[AttributeDescription],
    ) -> Result<(), Error> {
        let mut buf = Vec::new();
        AttributeDescription::write_event_desc_section::<_, NativeEndian>(&mut buf, attributes)?;
        self.write_feature(Feature::EVENT_DESC, &buf)
    }

    /// Writes the simpleperf meta info feature from key/value pairs.
    pub fn write_meta_info_feature<'a>(
        &mut self,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), Error> {
        let mut buf = Vec::new();
        write_meta_info_map(&mut buf, entries)?;
        self.write_feature(Feature::SIMPLEPERF_META_INFO, &buf)
    }

    pub fn write_file2_feature(&mut self, files: &[FileFeature]) -> Result<(), Error> {
        let mut buf = Vec::new();
        write_file2_section::<_, NativeEndian>(&mut buf, files)?;
        self.write_feature(Feature::SIMPLEPERF_FILE2, &buf)
    }

    pub fn write_pmu_mappings_feature(
        &mut self,
        mappings: &LinearMap<u32, String>,
    ) -> Result<(), Error> {
        let mut buf = Vec::new();
        PmuMappings::write::<_, NativeEndian>(&mut buf, mappings)?;
        self.write_feature(Feature::PMU_MAPPINGS, &buf)
    }

    /// Writes the positions of all aux data written with
    /// [`write_aux_data`](Self::write_aux_data).
    pub fn write_auxtrace_feature(&mut self) -> Result<(), Error> {
        let mut buf = Vec::new();
        AuxTraceIndex::write::<_, NativeEndian>(&mut buf, &self.auxtrace_index)?;
        self.write_feature(Feature::AUXTRACE, &buf)
    }

    /// Fills in the feature table and the file header, and flushes.
    ///
    /// Closing straight from the data section writes a file without
    /// features.
    pub fn close(&mut self) -> Result<(), Error> {
        self.check_state(
            "close",
            &[
                WriterState::AttrWritten,
                WriterState::DataWriting,
                WriterState::FeaturesWriting,
            ],
        )?;
        if self.state != WriterState::FeaturesWriting {
            self.begin_write_features(0)?;
        }
        if self.current_feature.is_some() {
            return Err(Error::InvalidWriterState {
                operation: "close",
                state: self.state,
            });
        }

        // The reader expects one table entry per feature bit, from low to high.
        self.feature_sections.sort_by_key(|(feature, _)| *feature);
        let mut table = Vec::with_capacity(self.feature_sections.len() * 16);
        for (_, section) in &self.feature_sections {
            section.write::<_, NativeEndian>(&mut table)?;
        }

        let header = PerfHeader {
            magic: MAGIC_LITTLE_ENDIAN,
            header_size: PerfHeader::STRUCT_SIZE,
            attr_size: self.attr_size,
            attr_section: self.attr_section,
            data_section: self.data_section,
            event_types_section: PerfFileSection::default(),
            features: self.features,
        };
        let mut header_bytes = Vec::with_capacity(PerfHeader::STRUCT_SIZE as usize);
        header.write::<_, NativeEndian>(&mut header_bytes)?;

        let table_offset = self.feature_table_offset;
        let file_size = self.pos;
        self.io(|w| {
            w.seek(SeekFrom::Start(table_offset))?;
            w.write_all(&table)?;
            w.seek(SeekFrom::Start(0))?;
            w.write_all(&header_bytes)?;
            w.seek(SeekFrom::Start(file_size))?;
            w.flush()
        })?;

        info!(
            "Closed record file: {} records, data section {} bytes, {} features, {} bytes total",
            self.record_count,
            self.data_section.size,
            self.feature_sections.len(),
            file_size
        );
        self.state = WriterState::Closed;
        self.path = None;
        Ok(())
    }
}

impl<W: Write + Seek> Drop for RecordFileWriter<W> {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            warn!(
                "Record file writer dropped in state {:?}, removing {}",
                self.state,
                path.display()
            );
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use crate::attr::SamplingPolicy;

    fn attributes() -> Vec<AttributeDescription> {
        vec![AttributeDescription {
            attr: PerfEventAttr::new(1, 0, SamplingPolicy::Frequency(4000)),
            name: Some("cpu-clock".into()),
            event_ids: vec![5, 6],
        }]
    }

    #[test]
    fn calls_out_of_order_are_rejected() {
        let mut writer = RecordFileWriter::new(Cursor::new(Vec::new()));
        let err = writer.write_record(&Record::FinishedRound).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidWriterState {
                state: WriterState::Created,
                ..
            }
        ));
        writer.reserve_header().unwrap();
        assert!(writer.begin_write_features(0).is_err());
        writer.write_attr_section(&attributes()).unwrap();
        writer.write_record(&Record::FinishedRound).unwrap();
        writer.begin_write_features(1).unwrap();
        assert!(writer.write_record(&Record::FinishedRound).is_err());
        writer.write_string_feature(Feature::HOSTNAME, "a").unwrap();
        assert!(matches!(
            writer.write_string_feature(Feature::ARCH, "b"),
            Err(Error::TooManyFeatures(1))
        ));
        writer.close().unwrap();
        assert_eq!(writer.state(), WriterState::Closed);
        assert!(writer.close().is_err());
    }

    #[test]
    fn duplicate_feature() {
        let mut writer = RecordFileWriter::new(Cursor::new(Vec::new()));
        writer.reserve_header().unwrap();
        writer.write_attr_section(&attributes()).unwrap();
        writer.begin_write_features(2).unwrap();
        writer.write_string_feature(Feature::HOSTNAME, "a").unwrap();
        assert!(matches!(
            writer.write_string_feature(Feature::HOSTNAME, "a"),
            Err(Error::DuplicateFeature(3))
        ));
    }

    #[test]
    fn layout() {
        let mut writer = RecordFileWriter::new(Cursor::new(Vec::new()));
        writer.reserve_header().unwrap();
        writer.write_attr_section(&attributes()).unwrap();
        writer.write_record(&Record::FinishedRound).unwrap();
        writer.begin_write_features(2).unwrap();
        writer.write_string_feature(Feature::OSRELEASE, "6.1").unwrap();
        writer.write_string_feature(Feature::HOSTNAME, "host").unwrap();
        writer.close().unwrap();

        let bytes = writer.get_ref().get_ref().clone();
        let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();
        assert_eq!(header.attr_section, PerfFileSection { offset: 104, size: 144 });
        // Attr entry, then two ids.
        assert_eq!(header.data_section, PerfFileSection { offset: 104 + 144 + 16, size: 8 });
        assert_eq!(
            header.features.iter().collect::<Vec<_>>(),
            vec![Feature::HOSTNAME, Feature::OSRELEASE]
        );

        let table_start = header.data_section.end() as usize;
        let hostname =
            PerfFileSection::parse::<_, NativeEndian>(&bytes[table_start..]).unwrap();
        let osrelease =
            PerfFileSection::parse::<_, NativeEndian>(&bytes[table_start + 16..]).unwrap();
        assert_eq!(hostname.offset % 8, 0);
        assert!(osrelease.end() <= hostname.offset);
        assert_eq!(hostname.end(), bytes.len() as u64);
    }
}
