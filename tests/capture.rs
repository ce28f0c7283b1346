//! Records a short workload with the kernel and checks what ends up in the
//! file. Skipped where perf events cannot be opened.

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use simpleperf_record::{
    sys, BuildIdProvider, EventTypeRegistry, Feature, Record, RecordFileReader, RecordOptions,
    RecordSession, SamplingPolicy,
};

struct FixedBuildId;

impl BuildIdProvider for FixedBuildId {
    fn build_id(&self, _path: &Path) -> Option<Vec<u8>> {
        Some(vec![0xab; 20])
    }
}

#[test]
fn records_a_workload() {
    let _ = env_logger::builder().is_test(true).try_init();
    if !sys::perf_events_available() {
        eprintln!("perf events are not available here, skipping");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf.data");
    let shell = fs::canonicalize("/bin/sh").unwrap();
    let workload: Vec<String> = vec![
        "/bin/sh".into(),
        "-c".into(),
        "i=0; while [ $i -lt 200000 ]; do i=$((i+1)); done".into(),
    ];

    let options = RecordOptions::default()
        .events(&["task-clock"])
        .sampling_policy(SamplingPolicy::Period(1))
        .sample_id_all(true)
        .mmap_pages(64)
        .poll_timeout(Duration::from_millis(10))
        .cmdline(vec!["record".into(), "--test".into()]);
    let session = RecordSession::new(options, &EventTypeRegistry::builtin())
        .unwrap()
        .workload(&workload)
        .build_id_provider(Box::new(FixedBuildId));
    let summary = session.record(&path).unwrap();
    assert_eq!(summary.workload_exit_code, Some(0));
    assert!(summary.sample_count > 0);

    let mut reader = RecordFileReader::open(&path).unwrap();
    let file = reader.file();
    assert_eq!(file.event_attributes().len(), 1);
    assert_eq!(file.event_attributes()[0].name(), Some("task-clock"));
    assert!(file.features().has_feature(Feature::BUILD_ID));
    assert!(file.features().has_feature(Feature::CMDLINE));
    assert_eq!(
        file.cmdline().unwrap(),
        Some(vec!["record".to_string(), "--test".to_string()])
    );
    assert!(file
        .build_ids()
        .unwrap()
        .iter()
        .all(|b| b.build_id.starts_with(&[0xab; 20])));

    let mut comm_count = 0;
    let mut shell_mapped = false;
    let mut sample_times = Vec::new();
    while let Some(file_record) = reader.next_sorted_record().unwrap() {
        match file_record.record {
            Record::Comm(_) => comm_count += 1,
            Record::Mmap(r) => shell_mapped |= r.filename == shell.as_os_str().as_bytes(),
            Record::Sample(s) => sample_times.push(s.time.unwrap()),
            _ => {}
        }
    }
    assert!(comm_count >= 1);
    assert!(shell_mapped);
    assert!(!sample_times.is_empty());
    assert!(sample_times.windows(2).all(|w| w[0] < w[1]));
}
