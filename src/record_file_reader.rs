use byteorder::{BigEndian, ByteOrder, LittleEndian};
use linear_map::LinearMap;
use log::{debug, warn};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use super::auxtrace::AuxtraceRecord;
use super::constants::*;
use super::cursor::{read_bytes, RecordCursor};
use super::error::{Error, ReadError};
use super::feature_sections::{AttributeDescription, AuxTraceIndexEntry};
use super::features::Feature;
use super::header::{PerfHeader, MAGIC_BIG_ENDIAN, MAGIC_LITTLE_ENDIAN};
use super::record::Record;
use super::record_file::{Endianness, RecordFile};
use super::record_header::RecordHeader;
use super::sample_id::{get_record_identifier, RecordIdParseInfo};
use super::section::PerfFileSection;
use super::simpleperf;
use super::sorter::RoundSorter;

#[cfg(feature = "zstd")]
use super::decompression::ZstdDecompressor;

/// A record from the data section, together with the index of the event
/// attr it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// The index into [`RecordFile::event_attributes`] for records emitted by
    /// the kernel, `None` for records synthesized in user space.
    pub attr_index: Option<usize>,
    pub record: Record,
}

/// A reader for record files.
///
/// Split records are put back together and compressed records are
/// unpacked, so callers only ever see complete logical records. Aux data
/// following auxtrace records is skipped; use
/// [`read_aux_data`](Self::read_aux_data) to get it.
///
/// # Example
///
/// ```no_run
/// use simpleperf_record::{AttributeDescription, RecordFileReader};
///
/// # fn wrapper() -> Result<(), simpleperf_record::Error> {
/// let mut reader = RecordFileReader::open("perf.data")?;
/// let event_names: Vec<_> = reader
///     .file()
///     .event_attributes()
///     .iter()
///     .filter_map(AttributeDescription::name)
///     .collect();
/// println!("events: {}", event_names.join(", "));
///
/// reader.read_data_section(|record| {
///     println!("{:?}: {:?}", record.attr_index, record.record);
///     true
/// })?;
/// # Ok(())
/// # }
/// ```
pub struct RecordFileReader<R: Read + Seek> {
    reader: R,
    file: RecordFile,
    id_parse_infos: IdParseInfos,
    /// One per attribute
    parse_infos: Vec<RecordIdParseInfo>,
    event_id_to_attr_index: HashMap<u64, usize>,
    /// The read position inside the data section.
    read_offset: u64,
    /// The file offset of the last record read from the data section.
    record_offset: u64,
    /// Chunks of a split record seen so far, and the file offset of the
    /// first chunk.
    split_data: Option<Vec<u8>>,
    split_offset: u64,
    /// Records unpacked from a compressed record, not yet returned.
    decompressed: Vec<u8>,
    decompressed_pos: usize,
    #[cfg(feature = "zstd")]
    decompressor: ZstdDecompressor,
    sorter: RoundSorter<RecordSortKey, PendingRecord>,
    sorter_finished: bool,
    sequence: u64,
}

impl RecordFileReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path)?;
        Self::parse_file(BufReader::new(file))
    }
}

impl<R: Read + Seek> RecordFileReader<R> {
    pub fn parse_file(mut reader: R) -> Result<Self, Error> {
        let header = PerfHeader::parse(&mut reader).map_err(|_| ReadError::PerfHeader)?;
        match header.magic {
            MAGIC_LITTLE_ENDIAN => {
                Self::parse_file_impl::<LittleEndian>(reader, header, Endianness::LittleEndian)
            }
            MAGIC_BIG_ENDIAN => {
                Self::parse_file_impl::<BigEndian>(reader, header, Endianness::BigEndian)
            }
            _ => Err(Error::UnrecognizedMagicValue(header.magic)),
        }
    }

    fn parse_file_impl<T>(
        mut reader: R,
        header: PerfHeader,
        endian: Endianness,
    ) -> Result<Self, Error>
    where
        T: ByteOrder,
    {
        let file_len = reader.seek(SeekFrom::End(0))?;
        for (name, section) in [
            ("attr", &header.attr_section),
            ("data", &header.data_section),
            ("event_types", &header.event_types_section),
        ] {
            if section.offset.checked_add(section.size).is_none_or(|end| end > file_len) {
                return Err(Error::SectionOutOfBounds(name));
            }
        }

        // Read the section information for each feature, starting just after the data section.
        let feature_pos = header.data_section.end();
        reader.seek(SeekFrom::Start(feature_pos))?;
        let mut feature_sections_info = Vec::new();
        for feature in header.features.iter() {
            let section = PerfFileSection::parse::<_, T>(&mut reader)?;
            feature_sections_info.push((feature, section));
        }

        let mut feature_sections = LinearMap::new();
        for (feature, section) in feature_sections_info {
            if section.offset.checked_add(section.size).is_none_or(|end| end > file_len) {
                return Err(Error::SectionOutOfBounds("feature"));
            }
            let size = usize::try_from(section.size).map_err(|_| Error::SectionSizeTooBig)?;
            let mut data = vec![0; size];
            reader.seek(SeekFrom::Start(section.offset))?;
            reader.read_exact(&mut data)?;
            feature_sections.insert(feature, data);
        }

        let mut attributes = AttributeDescription::parse_attr_section::<_, T>(
            &mut reader,
            &header.attr_section,
            header.attr_size,
        )?;
        if attributes.is_empty() {
            return Err(Error::NoAttributes);
        }
        Self::assign_event_names::<T>(&mut attributes, &feature_sections)?;

        let mut event_id_to_attr_index = HashMap::new();
        for (attr_index, AttributeDescription { event_ids, .. }) in attributes.iter().enumerate() {
            for event_id in event_ids {
                event_id_to_attr_index.insert(*event_id, attr_index);
            }
        }

        let parse_infos: Vec<_> = attributes
            .iter()
            .map(|desc| RecordIdParseInfo::new(&desc.attr))
            .collect();
        let id_parse_infos = IdParseInfos::new(&attributes, &parse_infos)?;

        // Move the reader to the start of the data section so that we can start
        // reading records from it.
        reader.seek(SeekFrom::Start(header.data_section.offset))?;

        let file = RecordFile {
            endian,
            header,
            features: header.features,
            feature_sections,
            attributes,
        };

        Ok(Self {
            reader,
            file,
            id_parse_infos,
            parse_infos,
            event_id_to_attr_index,
            read_offset: 0,
            record_offset: header.data_section.offset,
            split_data: None,
            split_offset: 0,
            decompressed: Vec::new(),
            decompressed_pos: 0,
            #[cfg(feature = "zstd")]
            decompressor: ZstdDecompressor::new(),
            sorter: RoundSorter::new(),
            sorter_finished: false,
            sequence: 0,
        })
    }

    /// Event names come from the event desc section if present, and from the
    /// simpleperf meta info otherwise. Both list the events in attr order.
    fn assign_event_names<T: ByteOrder>(
        attributes: &mut [AttributeDescription],
        feature_sections: &LinearMap<Feature, Vec<u8>>,
    ) -> Result<(), Error> {
        if let Some(event_desc_section) = feature_sections.get(&Feature::EVENT_DESC) {
            let event_desc_attrs = AttributeDescription::parse_event_desc_section::<_, T>(
                Cursor::new(&event_desc_section[..]),
            )?;
            for (index, attr) in attributes.iter_mut().enumerate() {
                // Prefer matching by event id, fall back to the position.
                let by_id = attr.event_ids.first().and_then(|first_id| {
                    event_desc_attrs
                        .iter()
                        .find(|desc| desc.event_ids.first() == Some(first_id))
                });
                if let Some(desc) = by_id.or_else(|| event_desc_attrs.get(index)) {
                    attr.name = desc.name.clone();
                }
            }
        } else if let Some(meta_info) = feature_sections.get(&Feature::SIMPLEPERF_META_INFO) {
            let info_map =
                simpleperf::parse_meta_info_map(&meta_info[..]).map_err(|_| Error::StringUtf8)?;
            if let Some(event_types) = simpleperf::get_event_types(&info_map) {
                for (attr, event_type) in attributes.iter_mut().zip(event_types) {
                    attr.name = Some(event_type.name);
                }
            }
        }
        Ok(())
    }

    /// The header, attributes and features of the file.
    pub fn file(&self) -> &RecordFile {
        &self.file
    }

    /// Calls `f` for each record in the data section, in file order, until
    /// `f` returns false or the data section ends.
    pub fn read_data_section<F>(&mut self, mut f: F) -> Result<(), Error>
    where
        F: FnMut(FileRecord) -> bool,
    {
        while let Some(record) = self.next_record()? {
            if !f(record) {
                break;
            }
        }
        Ok(())
    }

    /// Returns the next record in file order.
    pub fn next_record(&mut self) -> Result<Option<FileRecord>, Error> {
        match self.file.endian {
            Endianness::LittleEndian => self.next_record_impl::<LittleEndian>(),
            Endianness::BigEndian => self.next_record_impl::<BigEndian>(),
        }
    }

    fn next_record_impl<T: ByteOrder>(&mut self) -> Result<Option<FileRecord>, Error> {
        let Some(raw) = self.read_raw_record::<T>()? else {
            return Ok(None);
        };
        let attr_index = self.attr_index_for_record::<T>(raw.header.type_, &raw.body);
        Ok(Some(self.parse_record::<T>(&raw, attr_index)?))
    }

    /// Returns the records sorted by time.
    ///
    /// Records are buffered until a `FINISHED_ROUND` record guarantees that
    /// no earlier record can follow. Records without a timestamp sort
    /// before the timed records of the same round. Do not mix calls to this
    /// method with [`next_record`](Self::next_record).
    pub fn next_sorted_record(&mut self) -> Result<Option<FileRecord>, Error> {
        match self.file.endian {
            Endianness::LittleEndian => self.next_sorted_record_impl::<LittleEndian>(),
            Endianness::BigEndian => self.next_sorted_record_impl::<BigEndian>(),
        }
    }

    fn next_sorted_record_impl<T: ByteOrder>(&mut self) -> Result<Option<FileRecord>, Error> {
        if !self.sorter.has_ready() {
            self.read_next_round::<T>()?;
        }
        match self.sorter.pop() {
            Some(PendingRecord { raw, attr_index }) => {
                Ok(Some(self.parse_record::<T>(&raw, attr_index)?))
            }
            None => Ok(None),
        }
    }

    /// Reads records into self.sorter until a FINISHED_ROUND record is found
    /// and self.sorter is non-empty, or until we've run out of records to read.
    fn read_next_round<T: ByteOrder>(&mut self) -> Result<(), Error> {
        if self.sorter_finished {
            return Ok(());
        }
        while let Some(raw) = self.read_raw_record::<T>()? {
            if raw.header.type_ == PERF_RECORD_FINISHED_ROUND {
                self.sorter.end_round();
                if self.sorter.has_ready() {
                    // The sorter is non-empty. We're done.
                    return Ok(());
                }

                // Keep going so that we never exit the loop with sorter
                // being empty, unless we've truly run out of data to read.
                continue;
            }

            let attr_index = self.attr_index_for_record::<T>(raw.header.type_, &raw.body);
            let timestamp = attr_index.and_then(|i| {
                self.parse_infos[i].record_timestamp::<T>(raw.header.type_, &raw.body)
            });
            let sort_key = RecordSortKey {
                timestamp,
                sequence: self.sequence,
            };
            self.sequence += 1;
            self.sorter.push(sort_key, PendingRecord { raw, attr_index });
        }

        // Everything has been read.
        self.sorter.finish();
        self.sorter_finished = true;
        Ok(())
    }

    fn parse_record<T: ByteOrder>(
        &self,
        raw: &RawFileRecord,
        attr_index: Option<usize>,
    ) -> Result<FileRecord, Error> {
        let attr = &self.file.attributes[attr_index.unwrap_or(0)].attr;
        let record = Record::parse_body::<T>(raw.header, &raw.body, attr).map_err(|e| {
            Error::InvalidRecord {
                file_offset: raw.file_offset,
                source: Box::new(Error::from(e)),
            }
        })?;
        Ok(FileRecord { attr_index, record })
    }

    fn attr_index_for_record<T: ByteOrder>(&self, record_type: u32, body: &[u8]) -> Option<usize> {
        if record_type >= PERF_RECORD_USER_TYPE_START {
            return None;
        }
        let attr_index = match &self.id_parse_infos {
            IdParseInfos::OnlyOneEvent => 0,
            IdParseInfos::Same(id_parse_info) => id_parse_info
                .record_id::<T>(record_type, body)
                .and_then(|id| self.event_id_to_attr_index.get(&id).cloned())
                .unwrap_or(0),
            IdParseInfos::PerAttribute(sample_id_all) => {
                // We have IDENTIFIER (guaranteed by PerAttribute).
                get_record_identifier::<T>(record_type, body, *sample_id_all)
                    .and_then(|id| self.event_id_to_attr_index.get(&id).cloned())
                    .unwrap_or(0)
            }
        };
        Some(attr_index)
    }

    /// Reads the next logical record: its header and the bytes after it.
    ///
    /// Errors name the file offset of the record that could not be read.
    fn read_raw_record<T: ByteOrder>(&mut self) -> Result<Option<RawFileRecord>, Error> {
        self.read_raw_record_impl::<T>()
            .map_err(|source| Error::InvalidRecord {
                file_offset: self.record_offset,
                source: Box::new(source),
            })
    }

    fn read_raw_record_impl<T: ByteOrder>(&mut self) -> Result<Option<RawFileRecord>, Error> {
        let data_section = self.file.header.data_section;
        loop {
            // Records unpacked from a compressed record report the offset
            // of the compressed record.
            if let Some((header, body)) = self.next_decompressed_record::<T>()? {
                return Ok(Some(RawFileRecord {
                    header,
                    body,
                    file_offset: self.record_offset,
                }));
            }

            let data_size = data_section.size;
            if self.read_offset >= data_size {
                if self.split_data.is_some() {
                    return Err(Error::IncompleteSplitRecord);
                }
                return Ok(None);
            }
            self.record_offset = data_section.offset + self.read_offset;
            if data_size - self.read_offset < RecordHeader::STRUCT_SIZE as u64 {
                return Err(ReadError::PerfEventHeader.into());
            }

            let mut header_bytes = [0; RecordHeader::STRUCT_SIZE];
            self.reader
                .read_exact(&mut header_bytes)
                .map_err(|_| ReadError::PerfEventHeader)?;
            let header = RecordHeader::parse::<T>(&header_bytes)?;
            let size = header.size as usize;
            if size < RecordHeader::STRUCT_SIZE {
                return Err(Error::InvalidPerfEventSize);
            }
            if size as u64 > data_size - self.read_offset {
                return Err(ReadError::PerfEventData.into());
            }
            let mut body = vec![0; size - RecordHeader::STRUCT_SIZE];
            self.reader
                .read_exact(&mut body)
                .map_err(|_| ReadError::PerfEventData)?;
            self.read_offset += size as u64;

            let is_split_type = header.type_ == SIMPLE_PERF_RECORD_SPLIT
                || header.type_ == SIMPLE_PERF_RECORD_SPLIT_END;
            if self.split_data.is_some() && !is_split_type {
                return Err(Error::IncompleteSplitRecord);
            }

            match header.type_ {
                SIMPLE_PERF_RECORD_SPLIT => {
                    if self.split_data.is_none() {
                        self.split_offset = self.record_offset;
                    }
                    self.split_data.get_or_insert_with(Vec::new).extend_from_slice(&body);
                }
                SIMPLE_PERF_RECORD_SPLIT_END => {
                    let data = self.split_data.take().ok_or(Error::UnexpectedSplitEnd)?;
                    let header = RecordHeader::parse::<T>(&data)?;
                    if header.size as usize != data.len() {
                        return Err(Error::InvalidPerfEventSize);
                    }
                    debug!(
                        "Reassembled split record of type {} with size {}",
                        header.type_, header.size
                    );
                    return Ok(Some(RawFileRecord {
                        header,
                        body: data[RecordHeader::STRUCT_SIZE..].to_vec(),
                        file_offset: self.split_offset,
                    }));
                }
                PERF_RECORD_AUXTRACE => {
                    let mut cur = RecordCursor::<T>::new(&body, header.type_);
                    let auxtrace = AuxtraceRecord::parse(&mut cur)?;
                    let aux_end = self
                        .read_offset
                        .checked_add(auxtrace.size)
                        .filter(|&end| end <= data_size)
                        .ok_or(ReadError::AuxtraceSection)?;
                    let skip =
                        i64::try_from(auxtrace.size).map_err(|_| ReadError::AuxtraceSection)?;
                    self.reader.seek(SeekFrom::Current(skip))?;
                    self.read_offset = aux_end;
                    return Ok(Some(RawFileRecord {
                        header,
                        body,
                        file_offset: self.record_offset,
                    }));
                }
                PERF_RECORD_COMPRESSED => {
                    self.decompress(&body)?;
                }
                _ => {
                    return Ok(Some(RawFileRecord {
                        header,
                        body,
                        file_offset: self.record_offset,
                    }))
                }
            }
        }
    }

    #[cfg(feature = "zstd")]
    fn decompress(&mut self, compressed: &[u8]) -> Result<(), Error> {
        // Keep the unread tail, which may be the start of a record.
        self.decompressed.drain(..self.decompressed_pos);
        self.decompressed_pos = 0;
        self.decompressor
            .decompress_into(compressed, &mut self.decompressed)?;
        Ok(())
    }

    #[cfg(not(feature = "zstd"))]
    fn decompress(&mut self, _compressed: &[u8]) -> Result<(), Error> {
        Err(Error::CompressionNotSupported)
    }

    /// Returns the next complete record from the decompressed buffer. A
    /// record can continue in the next compressed record.
    fn next_decompressed_record<T: ByteOrder>(
        &mut self,
    ) -> Result<Option<(RecordHeader, Vec<u8>)>, Error> {
        let remaining = &self.decompressed[self.decompressed_pos..];
        if remaining.len() < RecordHeader::STRUCT_SIZE {
            return Ok(None);
        }
        let header = RecordHeader::parse::<T>(remaining)?;
        let size = header.size as usize;
        if size < RecordHeader::STRUCT_SIZE {
            return Err(Error::InvalidPerfEventSize);
        }
        if remaining.len() < size {
            return Ok(None);
        }
        let body = remaining[RecordHeader::STRUCT_SIZE..size].to_vec();
        self.decompressed_pos += size;
        Ok(Some((header, body)))
    }

    /// Reads the auxtrace record at `entry` and the aux data after it.
    ///
    /// The position of the record iteration is not affected.
    pub fn read_aux_data(
        &mut self,
        entry: &AuxTraceIndexEntry,
    ) -> Result<(AuxtraceRecord, Vec<u8>), Error> {
        match self.file.endian {
            Endianness::LittleEndian => self.read_aux_data_impl::<LittleEndian>(entry),
            Endianness::BigEndian => self.read_aux_data_impl::<BigEndian>(entry),
        }
    }

    fn read_aux_data_impl<T: ByteOrder>(
        &mut self,
        entry: &AuxTraceIndexEntry,
    ) -> Result<(AuxtraceRecord, Vec<u8>), Error> {
        let data_section = self.file.header.data_section;
        let in_data_section = entry.offset >= data_section.offset
            && entry
                .offset
                .checked_add(entry.size)
                .is_some_and(|end| end <= data_section.end());
        if !in_data_section {
            return Err(ReadError::AuxtraceSection.into());
        }
        let saved_pos = self.reader.stream_position()?;
        let result = self.read_aux_data_at::<T>(entry.offset, data_section.end());
        self.reader.seek(SeekFrom::Start(saved_pos))?;
        result
    }

    fn read_aux_data_at<T: ByteOrder>(
        &mut self,
        offset: u64,
        data_end: u64,
    ) -> Result<(AuxtraceRecord, Vec<u8>), Error> {
        self.reader.seek(SeekFrom::Start(offset))?;
        let mut record_bytes = [0; RecordHeader::STRUCT_SIZE + AuxtraceRecord::BODY_SIZE];
        self.reader
            .read_exact(&mut record_bytes)
            .map_err(|_| ReadError::AuxtraceSection)?;
        let header = RecordHeader::parse::<T>(&record_bytes)?;
        if header.type_ != PERF_RECORD_AUXTRACE {
            warn!(
                "Expected an auxtrace record at offset {offset}, found type {}",
                header.type_
            );
            return Err(ReadError::AuxtraceSection.into());
        }
        let body = &record_bytes[RecordHeader::STRUCT_SIZE..];
        let mut cur = RecordCursor::<T>::new(body, header.type_);
        let auxtrace = AuxtraceRecord::parse(&mut cur)?;
        let fits = (offset + record_bytes.len() as u64)
            .checked_add(auxtrace.size)
            .is_some_and(|end| end <= data_end);
        if !fits {
            return Err(ReadError::AuxtraceSection.into());
        }
        let data =
            read_bytes(&mut self.reader, auxtrace.size).map_err(|_| ReadError::AuxtraceSection)?;
        Ok((auxtrace, data))
    }
}

/// A record as read from the data section, not yet parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RawFileRecord {
    header: RecordHeader,
    body: Vec<u8>,
    file_offset: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct PendingRecord {
    raw: RawFileRecord,
    attr_index: Option<usize>,
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct RecordSortKey {
    timestamp: Option<u64>,
    sequence: u64,
}

#[derive(Debug, Clone)]
enum IdParseInfos {
    /// There is only one event.
    OnlyOneEvent,
    /// There are multiple events, but all events are parsed the same way.
    Same(RecordIdParseInfo),
    /// All elements are guaranteed to have [`SampleFormat::IDENTIFIER`] set in `attr.sample_format`.
    /// The inner element indicates sample_id_all.
    ///
    /// [`SampleFormat::IDENTIFIER`]: crate::SampleFormat::IDENTIFIER
    PerAttribute(bool),
}

impl IdParseInfos {
    fn new(
        attributes: &[AttributeDescription],
        parse_infos: &[RecordIdParseInfo],
    ) -> Result<Self, Error> {
        let (first_parse_info, remaining_parse_infos) =
            parse_infos.split_first().ok_or(Error::NoAttributes)?;
        if remaining_parse_infos.is_empty() {
            return Ok(IdParseInfos::OnlyOneEvent);
        }
        if remaining_parse_infos
            .iter()
            .all(|parse_info| parse_info == first_parse_info)
        {
            return Ok(IdParseInfos::Same(*first_parse_info));
        }

        // Make sure that all attributes have IDENTIFIER and the same SAMPLE_ID_ALL setting.
        // Otherwise we won't be able to know which attr a record belongs to; we need to know
        // the record's ID for that, and we can only read the ID if it's in the same location
        // regardless of attr.
        let first_has_sample_id_all = attributes[0].attr.sample_id_all();
        for (attr_index, AttributeDescription { attr, .. }) in attributes.iter().enumerate() {
            if !attr.sample_format.contains(crate::SampleFormat::IDENTIFIER) {
                return Err(Error::NoIdentifierDespiteMultiEvent(attr_index));
            }
            if attr.sample_id_all() != first_has_sample_id_all {
                return Err(Error::InconsistentSampleIdAllWithMultiEvent(attr_index));
            }
        }
        Ok(IdParseInfos::PerAttribute(first_has_sample_id_all))
    }
}

#[cfg(test)]
mod test {
    use byteorder::NativeEndian;

    use super::*;
    use crate::attr::{AttrFlags, PerfEventAttr, SampleFormat, SamplingPolicy};
    use crate::record_file_writer::RecordFileWriter;
    use crate::records::CommRecord;
    use crate::sample::SampleRecord;
    use crate::sample_id::SampleId;

    fn attr_with_identifier(config: u64) -> PerfEventAttr {
        let mut attr = PerfEventAttr::new(PERF_TYPE_SOFTWARE, config, SamplingPolicy::Period(1));
        attr.sample_format = SampleFormat::IDENTIFIER
            | SampleFormat::IP
            | SampleFormat::TID
            | SampleFormat::TIME;
        attr.flags = AttrFlags::SAMPLE_ID_ALL;
        attr
    }

    fn sample(id: u64, time: u64) -> Record {
        Record::Sample(SampleRecord {
            misc: PERF_RECORD_MISC_USER,
            identifier: Some(id),
            ip: Some(0x1000 + time),
            pid: Some(1),
            tid: Some(1),
            time: Some(time),
            ..Default::default()
        })
    }

    fn write_file(
        attributes: &[AttributeDescription],
        records: &[Record],
        meta_info: Option<&str>,
    ) -> Vec<u8> {
        let mut writer = RecordFileWriter::new(Cursor::new(Vec::new()));
        writer.reserve_header().unwrap();
        writer.write_attr_section(attributes).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.begin_write_features(1).unwrap();
        if let Some(event_type_info) = meta_info {
            writer
                .write_meta_info_feature([("event_type_info", event_type_info)])
                .unwrap();
        }
        writer.close().unwrap();
        writer.get_ref().get_ref().clone()
    }

    #[test]
    fn records_are_attributed_by_identifier() {
        let mut task_clock = attr_with_identifier(PERF_COUNT_SW_TASK_CLOCK);
        // A different layout, so the reader has to use the identifier.
        task_clock.sample_format |= SampleFormat::PERIOD;
        let attributes = vec![
            AttributeDescription {
                attr: attr_with_identifier(PERF_COUNT_SW_CPU_CLOCK),
                name: None,
                event_ids: vec![100, 101],
            },
            AttributeDescription {
                attr: task_clock,
                name: None,
                event_ids: vec![200],
            },
        ];
        let mut second = sample(200, 20);
        if let Record::Sample(s) = &mut second {
            s.period = Some(1);
        }
        let comm = Record::Comm(CommRecord {
            misc: 0,
            pid: 1,
            tid: 1,
            comm: b"sleep".to_vec(),
            sample_id: SampleId {
                pid: Some(1),
                tid: Some(1),
                time: Some(5),
                identifier: Some(101),
                ..Default::default()
            },
        });
        let bytes = write_file(
            &attributes,
            &[comm.clone(), sample(100, 10), second.clone()],
            Some("cpu-clock,1,0\ntask-clock,1,1"),
        );

        let mut reader = RecordFileReader::parse_file(Cursor::new(bytes)).unwrap();
        let names: Vec<_> = reader
            .file()
            .event_attributes()
            .iter()
            .map(|a| a.name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["cpu-clock", "task-clock"]);

        let mut records = Vec::new();
        reader
            .read_data_section(|record| {
                records.push(record);
                true
            })
            .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].attr_index, Some(0));
        assert_eq!(records[0].record, comm);
        assert_eq!(records[1].attr_index, Some(0));
        assert_eq!(records[2].attr_index, Some(1));
        assert_eq!(records[2].record, second);
    }

    #[test]
    fn multi_event_without_identifier_is_rejected() {
        let mut a = attr_with_identifier(0);
        a.sample_format.remove(SampleFormat::IDENTIFIER);
        // Moves the time field, so the two layouts differ.
        let mut b = a;
        b.sample_format.remove(SampleFormat::IP);
        let attributes = vec![
            AttributeDescription {
                attr: a,
                name: None,
                event_ids: vec![1],
            },
            AttributeDescription {
                attr: b,
                name: None,
                event_ids: vec![2],
            },
        ];
        let bytes = write_file(&attributes, &[], None);
        assert!(matches!(
            RecordFileReader::parse_file(Cursor::new(bytes)),
            Err(Error::NoIdentifierDespiteMultiEvent(0))
        ));
    }

    #[test]
    fn sorted_reading_uses_rounds() {
        let attributes = vec![AttributeDescription {
            attr: attr_with_identifier(PERF_COUNT_SW_CPU_CLOCK),
            name: None,
            event_ids: vec![1],
        }];
        let records = [
            sample(1, 30),
            sample(1, 10),
            Record::FinishedRound,
            sample(1, 20),
            sample(1, 40),
            Record::FinishedRound,
            sample(1, 35),
        ];
        let bytes = write_file(&attributes, &records, None);
        let mut reader = RecordFileReader::parse_file(Cursor::new(bytes)).unwrap();
        let mut times = Vec::new();
        while let Some(record) = reader.next_sorted_record().unwrap() {
            times.push(record.record.timestamp().unwrap());
        }
        assert_eq!(times, vec![10, 20, 30, 35, 40]);
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let attributes = vec![AttributeDescription {
            attr: attr_with_identifier(0),
            name: None,
            event_ids: vec![],
        }];
        let bytes = write_file(&attributes, &[sample(0, 1), sample(0, 2)], None);
        let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();
        let truncated = bytes[..header.data_section.end() as usize - 4].to_vec();
        let err = RecordFileReader::parse_file(Cursor::new(truncated))
            .err()
            .unwrap();
        assert!(matches!(err, Error::SectionOutOfBounds("data")));
        assert_eq!(err.kind(), crate::ErrorKind::Format);

        let garbage = vec![0x42; 200];
        assert!(matches!(
            RecordFileReader::parse_file(Cursor::new(garbage)),
            Err(Error::UnrecognizedMagicValue(_))
        ));
    }

    fn one_attr() -> Vec<AttributeDescription> {
        vec![AttributeDescription {
            attr: attr_with_identifier(0),
            name: None,
            event_ids: vec![1, 2],
        }]
    }

    #[test]
    fn bad_record_names_its_file_offset() {
        let mut writer = RecordFileWriter::new(Cursor::new(Vec::new()));
        writer.reserve_header().unwrap();
        writer.write_attr_section(&one_attr()).unwrap();
        for time in 1..=3 {
            writer.write_record(&sample(1, time)).unwrap();
        }
        // A sample with room for the identifier only.
        let mut short_sample = Vec::new();
        RecordHeader {
            type_: PERF_RECORD_SAMPLE,
            misc: 0,
            size: 16,
        }
        .write::<_, NativeEndian>(&mut short_sample)
        .unwrap();
        short_sample.extend_from_slice(&[0; 8]);
        writer.write_raw_record(&short_sample).unwrap();
        writer.close().unwrap();
        let bytes = writer.get_ref().get_ref().clone();

        let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();
        let sample_len = sample(1, 1).serialize::<NativeEndian>().unwrap().len() as u64;
        let expected_offset = header.data_section.offset + 3 * sample_len;

        let mut reader = RecordFileReader::parse_file(Cursor::new(bytes.clone())).unwrap();
        for _ in 0..3 {
            reader.next_record().unwrap().unwrap();
        }
        let err = reader.next_record().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parse);
        match err {
            Error::InvalidRecord {
                file_offset,
                source,
            } => {
                assert_eq!(file_offset, expected_offset);
                assert!(matches!(*source, Error::Parse(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let mut reader = RecordFileReader::parse_file(Cursor::new(bytes)).unwrap();
        let err = loop {
            match reader.next_sorted_record() {
                Ok(Some(_)) => continue,
                Ok(None) => panic!("the short sample was not reported"),
                Err(e) => break e,
            }
        };
        assert!(matches!(
            err,
            Error::InvalidRecord { file_offset, .. } if file_offset == expected_offset
        ));
    }

    #[test]
    fn aux_size_past_end_of_data_is_an_error() {
        let auxtrace = AuxtraceRecord {
            size: u64::MAX - 4,
            offset: 0,
            reference: 0,
            idx: 0,
            tid: 1,
            cpu: 0,
        };
        let bytes = write_file(&one_attr(), &[Record::Auxtrace(auxtrace)], None);
        let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();

        let mut reader = RecordFileReader::parse_file(Cursor::new(bytes)).unwrap();
        let err = reader.next_record().unwrap_err();
        assert!(matches!(
            &err,
            Error::InvalidRecord { file_offset, source }
                if *file_offset == header.data_section.offset
                    && matches!(**source, Error::Read(ReadError::AuxtraceSection))
        ));

        let record_len = (RecordHeader::STRUCT_SIZE + AuxtraceRecord::BODY_SIZE) as u64;
        for size in [u64::MAX, record_len] {
            let entry = AuxTraceIndexEntry {
                offset: header.data_section.offset,
                size,
            };
            assert!(matches!(
                reader.read_aux_data(&entry),
                Err(Error::Read(ReadError::AuxtraceSection))
            ));
        }
    }

    #[test]
    fn event_ids_past_end_of_file_are_rejected() {
        let mut bytes = write_file(&one_attr(), &[sample(1, 1)], None);
        let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();
        // The ids section follows the attr inside each attr section entry.
        let ids_size_pos = (header.attr_section.offset + header.attr_size - 8) as usize;
        NativeEndian::write_u64(&mut bytes[ids_size_pos..], u64::MAX - 7);
        let err = RecordFileReader::parse_file(Cursor::new(bytes))
            .err()
            .unwrap();
        assert!(matches!(err, Error::SectionOutOfBounds("event ids")));
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn compressed_records_are_unpacked() {
        let attributes = vec![AttributeDescription {
            attr: attr_with_identifier(0),
            name: None,
            event_ids: vec![],
        }];
        let mut payload = Vec::new();
        for time in 1..=3 {
            payload.extend(sample(0, time).serialize::<NativeEndian>().unwrap());
        }
        let mut compressed = vec![0; zstd_safe::compress_bound(payload.len())];
        let len = zstd_safe::compress(&mut compressed[..], &payload, 3).unwrap();
        compressed.truncate(len);

        let header = RecordHeader {
            type_: PERF_RECORD_COMPRESSED,
            misc: 0,
            size: (RecordHeader::STRUCT_SIZE + compressed.len()) as u32,
        };
        let mut record_bytes = Vec::new();
        header.write::<_, NativeEndian>(&mut record_bytes).unwrap();
        record_bytes.extend_from_slice(&compressed);

        let mut writer = RecordFileWriter::new(Cursor::new(Vec::new()));
        writer.reserve_header().unwrap();
        writer.write_attr_section(&attributes).unwrap();
        writer.write_raw_record(&record_bytes).unwrap();
        writer.write_record(&sample(0, 4)).unwrap();
        writer.close().unwrap();

        let bytes = writer.get_ref().get_ref().clone();
        let mut reader = RecordFileReader::parse_file(Cursor::new(bytes)).unwrap();
        let mut times = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            times.push(record.record.timestamp().unwrap());
        }
        assert_eq!(times, vec![1, 2, 3, 4]);
    }
}
