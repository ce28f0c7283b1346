//! Tests for writing record files and reading them back.

use std::fs;
use std::io::Cursor;

use byteorder::NativeEndian;
use simpleperf_record::constants::*;
use simpleperf_record::{
    AttrFlags, AttributeDescription, AuxtraceRecord, BuildIdRecord, CommRecord, ErrorKind, Feature, PerfEventAttr,
    PerfFileSection, PerfHeader, Record, RecordFileReader, RecordFileWriter, RecordHeader,
    SampleFormat,
    SampleId, SampleRecord, SamplingPolicy, TracingDataRecord,
};

fn attr() -> PerfEventAttr {
    let mut attr = PerfEventAttr::new(
        PERF_TYPE_SOFTWARE,
        PERF_COUNT_SW_TASK_CLOCK,
        SamplingPolicy::Period(100_000),
    );
    attr.sample_format =
        SampleFormat::IP | SampleFormat::TID | SampleFormat::TIME | SampleFormat::PERIOD;
    attr.flags = AttrFlags::SAMPLE_ID_ALL | AttrFlags::COMM;
    attr
}

fn attributes() -> Vec<AttributeDescription> {
    vec![AttributeDescription {
        attr: attr(),
        name: Some("task-clock".to_string()),
        event_ids: vec![7, 8],
    }]
}

fn comm(time: u64) -> Record {
    Record::Comm(CommRecord {
        misc: 0,
        pid: 42,
        tid: 42,
        comm: b"sleep".to_vec(),
        sample_id: SampleId {
            pid: Some(42),
            tid: Some(42),
            time: Some(time),
            ..Default::default()
        },
    })
}

fn sample(time: u64) -> Record {
    Record::Sample(SampleRecord {
        ip: Some(0x5555_0000 + time),
        pid: Some(42),
        tid: Some(42),
        time: Some(time),
        period: Some(100_000),
        ..Default::default()
    })
}

#[test]
fn header_describes_written_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.data");
    let records = vec![comm(100), sample(200), sample(300), Record::FinishedRound];
    let build_id = BuildIdRecord::new(42, &[0xab; 20], b"/usr/bin/sleep");

    let mut writer = RecordFileWriter::create(&path).unwrap();
    writer.reserve_header().unwrap();
    writer.write_attr_section(&attributes()).unwrap();
    for record in &records {
        writer.write_record(record).unwrap();
    }
    writer.begin_write_features(3).unwrap();
    writer
        .write_string_feature(Feature::HOSTNAME, "testhost")
        .unwrap();
    writer.write_cmdline_feature(&["simpleperf", "record"]).unwrap();
    writer
        .write_build_id_feature(std::slice::from_ref(&build_id))
        .unwrap();
    let data_size = writer.data_size();
    writer.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();
    assert_eq!(header.header_size, PerfHeader::STRUCT_SIZE);
    assert_eq!(header.attr_section.offset, PerfHeader::STRUCT_SIZE);
    assert_eq!(header.attr_size, 144);
    assert_eq!(header.attr_section.size, 144);
    assert!(header.attr_section.end() <= header.data_section.offset);
    assert_eq!(header.data_section.size, data_size);

    // The data section holds exactly the serialized records.
    let data = &bytes[header.data_section.offset as usize..header.data_section.end() as usize];
    let expected: Vec<u8> = records
        .iter()
        .flat_map(|r| r.serialize::<NativeEndian>().unwrap())
        .collect();
    assert_eq!(data, &expected[..]);

    // The feature table follows the data section, and each payload lies
    // after the table, in order and without overlap.
    let features: Vec<Feature> = header.features.iter().collect();
    assert_eq!(
        features,
        vec![Feature::BUILD_ID, Feature::HOSTNAME, Feature::CMDLINE]
    );
    let mut table = Cursor::new(&bytes[header.data_section.end() as usize..]);
    let mut previous_end = header.data_section.end() + 3 * PerfFileSection::STRUCT_SIZE;
    let mut sections = Vec::new();
    for _ in &features {
        let section = PerfFileSection::parse::<_, NativeEndian>(&mut table).unwrap();
        assert!(section.offset >= previous_end);
        assert_eq!(section.offset % 8, 0);
        previous_end = section.end();
        sections.push(section);
    }
    assert_eq!(previous_end, bytes.len() as u64);

    let reader = RecordFileReader::open(&path).unwrap();
    let file = reader.file();
    // Without an event description feature, event names are unknown.
    let desc = &file.event_attributes()[0];
    assert_eq!(desc.attr, attr());
    assert_eq!(desc.event_ids, vec![7, 8]);
    assert_eq!(desc.name(), None);
    assert_eq!(file.hostname().unwrap(), Some("testhost"));
    assert_eq!(
        file.cmdline().unwrap(),
        Some(vec!["simpleperf".to_string(), "record".to_string()])
    );
    assert_eq!(file.build_ids().unwrap(), vec![build_id]);
    for (feature, section) in features.iter().zip(&sections) {
        let payload = &bytes[section.offset as usize..section.end() as usize];
        assert_eq!(file.feature_section_data(*feature), Some(payload));
    }
}

#[test]
fn records_come_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.data");

    let mut writer = RecordFileWriter::create(&path).unwrap();
    writer.reserve_header().unwrap();
    writer.write_attr_section(&attributes()).unwrap();
    // Two rounds, where the second ring buffer lagged behind.
    for record in [sample(10), sample(30), Record::FinishedRound, sample(20)] {
        writer.write_record(&record).unwrap();
    }
    writer.write_record(&Record::FinishedRound).unwrap();
    writer.close().unwrap();

    let mut reader = RecordFileReader::open(&path).unwrap();
    let mut in_file_order = Vec::new();
    reader
        .read_data_section(|r| {
            in_file_order.push(r);
            true
        })
        .unwrap();
    assert_eq!(in_file_order.len(), 5);
    assert_eq!(in_file_order[0].attr_index, Some(0));
    assert_eq!(in_file_order[2].attr_index, None);

    let mut reader = RecordFileReader::open(&path).unwrap();
    let mut times = Vec::new();
    while let Some(r) = reader.next_sorted_record().unwrap() {
        times.push(r.record.timestamp().unwrap());
    }
    assert_eq!(times, vec![10, 20, 30]);
}

#[test]
fn large_records_are_split_and_reassembled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.data");
    let tracing_data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let large = Record::TracingData(TracingDataRecord {
        data: tracing_data,
    });

    let mut writer = RecordFileWriter::create(&path).unwrap();
    writer.reserve_header().unwrap();
    writer.write_attr_section(&attributes()).unwrap();
    writer.write_record(&large).unwrap();
    writer.write_record(&sample(5)).unwrap();
    writer.close().unwrap();

    // On disk, no record header claims more than 65535 bytes.
    let bytes = fs::read(&path).unwrap();
    let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();
    let mut offset = header.data_section.offset as usize;
    let mut types = Vec::new();
    while offset < header.data_section.end() as usize {
        let record_header =
            RecordHeader::parse::<NativeEndian>(&bytes[offset..]).unwrap();
        assert!(record_header.size as usize <= MAX_PERF_RECORD_SIZE);
        types.push(record_header.type_);
        offset += record_header.size as usize;
    }
    assert_eq!(types[0], SIMPLE_PERF_RECORD_SPLIT);
    assert_eq!(types[types.len() - 2], SIMPLE_PERF_RECORD_SPLIT_END);
    assert_eq!(types[types.len() - 1], PERF_RECORD_SAMPLE);

    let mut reader = RecordFileReader::open(&path).unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap().record, large);
    assert_eq!(reader.next_record().unwrap().unwrap().record, sample(5));
    assert!(reader.next_record().unwrap().is_none());
}

#[test]
fn aux_data_is_indexed_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.data");
    let auxtrace = AuxtraceRecord {
        size: 0,
        offset: 0x1000,
        reference: 7,
        idx: 0,
        tid: 42,
        cpu: 1,
    };

    let mut writer = RecordFileWriter::create(&path).unwrap();
    writer.reserve_header().unwrap();
    writer.write_attr_section(&attributes()).unwrap();
    writer.write_record(&sample(10)).unwrap();
    writer.write_aux_data(&auxtrace, &[1, 2, 3, 4, 5]).unwrap();
    writer.write_record(&sample(20)).unwrap();
    writer.begin_write_features(1).unwrap();
    writer.write_auxtrace_feature().unwrap();
    writer.close().unwrap();

    // The aux data is padded to 8 bytes and its size stored in the record.
    let written = AuxtraceRecord {
        size: 8,
        ..auxtrace
    };
    let bytes = fs::read(&path).unwrap();
    let header = PerfHeader::parse(Cursor::new(&bytes)).unwrap();
    let sample_len = sample(10).serialize::<NativeEndian>().unwrap().len() as u64;
    let record_len = (RecordHeader::STRUCT_SIZE + AuxtraceRecord::BODY_SIZE) as u64;

    let mut reader = RecordFileReader::open(&path).unwrap();
    let index = reader.file().auxtrace_index().unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].offset, header.data_section.offset + sample_len);
    assert_eq!(index[0].size, record_len + 8);

    let (record, data) = reader.read_aux_data(&index[0]).unwrap();
    assert_eq!(record, written);
    assert_eq!(data, vec![1, 2, 3, 4, 5, 0, 0, 0]);

    // Iteration steps over the aux data, also after a random access read.
    let mut records = Vec::new();
    while let Some(file_record) = reader.next_record().unwrap() {
        records.push(file_record.record);
    }
    assert_eq!(
        records,
        vec![sample(10), Record::Auxtrace(written), sample(20)]
    );
}

#[test]
fn unfinished_file_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.data");
    {
        let mut writer = RecordFileWriter::create(&path).unwrap();
        writer.reserve_header().unwrap();
        writer.write_attr_section(&attributes()).unwrap();
        writer.write_record(&sample(1)).unwrap();
        assert!(path.exists());
    }
    assert!(!path.exists());
}

#[test]
fn garbage_is_not_a_record_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.data");
    fs::write(&path, vec![0x42; 4096]).unwrap();
    let err = RecordFileReader::open(&path).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Format);
}
