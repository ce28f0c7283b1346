use std::collections::BTreeMap;
use std::os::fd::AsFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use byteorder::NativeEndian;
use log::{debug, info, warn};

use crate::attr::{AttrFlags, SampleFormat, SamplingPolicy};
use crate::build_id::BuildIdRecord;
use crate::error::Error;
use crate::event_selection::{EventSelection, OpenTargets};
use crate::event_type::{EventType, EventTypeRegistry};
use crate::feature_sections::{AttributeDescription, NrCpus};
use crate::features::Feature;
use crate::record::Record;
use crate::record_cache::RecordCache;
use crate::record_file_writer::RecordFileWriter;
use crate::ring_buffer::RawRecordIter;
use crate::simpleperf::format_event_type_info;
use crate::sys;
use crate::workload::Workload;

/// Capture configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOptions {
    /// Event names, resolved through an [`EventTypeRegistry`].
    pub event_names: Vec<String>,
    /// `None` picks a default per event.
    pub sampling_policy: Option<SamplingPolicy>,
    /// Data pages per ring buffer, a power of two.
    pub mmap_pages: usize,
    /// `None` means the workload on every online cpu if there is one,
    /// otherwise all online cpus.
    pub targets: Option<OpenTargets>,
    pub sample_id_all: bool,
    /// Record frame pointer call chains.
    pub call_graph: bool,
    /// How many records the reorder cache holds per ring buffer.
    pub max_cached_records_per_buffer: usize,
    pub poll_timeout: Duration,
    /// Stop after this long, even if the workload is still running.
    pub duration: Option<Duration>,
    /// Stored in the `cmdline` feature.
    pub cmdline: Vec<String>,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            event_names: vec!["cpu-clock".to_string()],
            sampling_policy: None,
            mmap_pages: 256,
            targets: None,
            sample_id_all: true,
            call_graph: false,
            max_cached_records_per_buffer: 100_000,
            poll_timeout: Duration::from_millis(100),
            duration: None,
            cmdline: std::env::args().collect(),
        }
    }
}

impl RecordOptions {
    /// Replaces the event list.
    pub fn events(mut self, names: &[&str]) -> Self {
        self.event_names = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn sampling_policy(mut self, policy: SamplingPolicy) -> Self {
        self.sampling_policy = Some(policy);
        self
    }

    pub fn mmap_pages(mut self, pages: usize) -> Self {
        self.mmap_pages = pages;
        self
    }

    pub fn cpus(mut self, cpus: Vec<u32>) -> Self {
        self.targets = Some(OpenTargets::Cpus(cpus));
        self
    }

    pub fn threads(mut self, tids: Vec<i32>) -> Self {
        self.targets = Some(OpenTargets::Threads(tids));
        self
    }

    pub fn sample_id_all(mut self, sample_id_all: bool) -> Self {
        self.sample_id_all = sample_id_all;
        self
    }

    pub fn call_graph(mut self, call_graph: bool) -> Self {
        self.call_graph = call_graph;
        self
    }

    pub fn max_cached_records_per_buffer(mut self, max: usize) -> Self {
        self.max_cached_records_per_buffer = max;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn cmdline(mut self, cmdline: Vec<String>) -> Self {
        self.cmdline = cmdline;
        self
    }
}

/// Looks up the build id of a mapped file. Reading ELF notes is not part of
/// this crate, so the caller plugs in whatever it uses.
pub trait BuildIdProvider {
    fn build_id(&self, path: &Path) -> Option<Vec<u8>>;
}

/// What a finished recording contains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSummary {
    pub record_count: u64,
    pub sample_count: u64,
    /// The sum of all `PERF_RECORD_LOST` counts.
    pub lost_count: u64,
    /// Records emitted out of turn because a reorder cache source was full.
    pub forced_flushes: u64,
    pub data_size: u64,
    pub workload_exit_code: Option<i32>,
}

/// Records events into a record file.
///
/// ```no_run
/// use simpleperf_record::{EventTypeRegistry, RecordOptions, RecordSession};
///
/// let registry = EventTypeRegistry::builtin();
/// let options = RecordOptions::default().events(&["task-clock"]);
/// let summary = RecordSession::new(options, &registry)?
///     .workload(&["sleep".to_string(), "1".to_string()])
///     .record("perf.data")?;
/// println!("{} samples", summary.sample_count);
/// # Ok::<(), simpleperf_record::Error>(())
/// ```
pub struct RecordSession {
    options: RecordOptions,
    selections: Vec<EventSelection>,
    workload_args: Vec<String>,
    stop: Arc<AtomicBool>,
    build_id_provider: Option<Box<dyn BuildIdProvider>>,
}

/// The state of one drain loop.
struct Drain {
    cache: RecordCache<Record>,
    /// `(selection, event fd)` for each cache source.
    sources: Vec<(usize, usize)>,
    buf: Vec<u8>,
    summary: RecordSummary,
    /// Mapped file names and the first pid which mapped them.
    mapped_files: BTreeMap<Vec<u8>, u32>,
}

impl RecordSession {
    /// Resolves the event names and sets up their attrs.
    pub fn new(options: RecordOptions, registry: &EventTypeRegistry) -> Result<Self, Error> {
        let multiple_events = options.event_names.len() > 1;
        let mut selections = Vec::with_capacity(options.event_names.len());
        for (i, name) in options.event_names.iter().enumerate() {
            let event = registry.parse_event_name(name)?;
            let mut attr = event.create_default_attr(options.sampling_policy);
            if options.sample_id_all {
                attr.flags |= AttrFlags::SAMPLE_ID_ALL;
            }
            if options.call_graph {
                attr.sample_format |= SampleFormat::CALLCHAIN;
            }
            if multiple_events {
                attr.sample_format |= SampleFormat::IDENTIFIER;
            }
            if i == 0 {
                // One event is enough to report the address space changes.
                attr.flags |= AttrFlags::MMAP | AttrFlags::COMM | AttrFlags::TASK;
            }
            selections.push(EventSelection::new(event.name, attr));
        }
        if selections.is_empty() {
            return Err(Error::NoAttributes);
        }
        Ok(Self {
            options,
            selections,
            workload_args: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            build_id_provider: None,
        })
    }

    /// Runs `args` as the workload. Recording starts when it execs and
    /// stops when it exits.
    pub fn workload(mut self, args: &[String]) -> Self {
        self.workload_args = args.to_vec();
        self
    }

    pub fn build_id_provider(mut self, provider: Box<dyn BuildIdProvider>) -> Self {
        self.build_id_provider = Some(provider);
        self
    }

    /// Setting the returned flag ends the recording after the current drain
    /// cycle. It can be set from a signal handler thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Records into a new file at `path`.
    ///
    /// If anything fails, the partial file is removed.
    pub fn record(mut self, path: impl AsRef<Path>) -> Result<RecordSummary, Error> {
        let mut writer = RecordFileWriter::create(path.as_ref())?;
        writer.reserve_header()?;

        let mut workload = if self.workload_args.is_empty() {
            None
        } else {
            Some(Workload::create(&self.workload_args)?)
        };
        let targets = match (&self.options.targets, &workload) {
            (Some(targets), _) => targets.clone(),
            (None, Some(workload)) => OpenTargets::ThreadsOnCpus {
                threads: vec![workload.pid()],
                cpus: sys::online_cpus()?,
            },
            (None, None) => OpenTargets::Cpus(sys::online_cpus()?),
        };

        for selection in &mut self.selections {
            if workload.is_some() {
                // Children are followed, and counting starts at exec.
                let mut attr = *selection.attr();
                attr.flags |= AttrFlags::INHERIT | AttrFlags::ENABLE_ON_EXEC;
                *selection = EventSelection::new(selection.name().to_string(), attr);
            }
            selection.open(&targets)?;
            selection.mmap(self.options.mmap_pages)?;
        }
        let attributes: Vec<AttributeDescription> = self
            .selections
            .iter()
            .map(EventSelection::attribute_description)
            .collect();
        writer.write_attr_section(&attributes)?;

        let sources: Vec<(usize, usize)> = self
            .selections
            .iter()
            .enumerate()
            .flat_map(|(s, selection)| (0..selection.event_fds().len()).map(move |f| (s, f)))
            .collect();
        let mut drain = Drain {
            cache: RecordCache::new(sources.len(), self.options.max_cached_records_per_buffer),
            sources,
            buf: Vec::new(),
            summary: RecordSummary::default(),
            mapped_files: BTreeMap::new(),
        };

        match workload.as_mut() {
            Some(workload) => workload.start()?,
            None => {
                for selection in &self.selections {
                    selection.enable()?;
                }
            }
        }
        info!(
            "Recording {} events from {} ring buffers",
            self.selections.len(),
            drain.sources.len()
        );

        let start_time = Instant::now();
        let timeout_ms = self.options.poll_timeout.as_millis().min(i32::MAX as u128) as i32;
        loop {
            {
                let fds: Vec<_> = self
                    .selections
                    .iter()
                    .flat_map(|s| s.event_fds().iter().map(|fd| fd.as_fd()))
                    .collect();
                sys::poll_readable(&fds, timeout_ms)?;
            }
            drain.cycle(&mut self.selections, &mut writer)?;

            if self.stop.load(Ordering::Relaxed) {
                debug!("Stop requested");
                break;
            }
            if let Some(workload) = workload.as_mut() {
                if let Some(code) = workload.try_wait()? {
                    debug!("Workload exited with {code}");
                    break;
                }
            }
            if let Some(duration) = self.options.duration {
                if start_time.elapsed() >= duration {
                    break;
                }
            }
        }

        for selection in &self.selections {
            // A workload which exited has no counters left to disable.
            if let Err(e) = selection.disable() {
                debug!("Disabling {} failed: {}", selection.name(), e);
            }
        }
        drain.cycle(&mut self.selections, &mut writer)?;
        let remaining = drain.cache.finish();
        if !remaining.is_empty() {
            for record in &remaining {
                drain.write(record, &mut writer)?;
            }
            writer.write_record(&Record::FinishedRound)?;
        }

        let mut summary = drain.summary;
        summary.forced_flushes = drain.cache.forced_flushes();
        if let Some(workload) = workload.as_mut() {
            summary.workload_exit_code = workload.try_wait()?;
        }
        if summary.lost_count > 0 {
            warn!(
                "The kernel dropped {} records; try more mmap pages",
                summary.lost_count
            );
        }
        if summary.forced_flushes > 0 {
            warn!(
                "{} records were written before every ring buffer was drained; \
                 they may be out of order",
                summary.forced_flushes
            );
        }

        let build_ids: Vec<BuildIdRecord> = match &self.build_id_provider {
            Some(provider) => drain
                .mapped_files
                .iter()
                .filter_map(|(filename, pid)| {
                    let path = Path::new(std::str::from_utf8(filename).ok()?);
                    let build_id = provider.build_id(path)?;
                    Some(BuildIdRecord::new(*pid as i32, &build_id, filename))
                })
                .collect(),
            None => Vec::new(),
        };
        self.write_features(&mut writer, &attributes, &build_ids)?;
        summary.record_count = writer.record_count();
        summary.data_size = writer.data_size();
        writer.close()?;
        info!(
            "Recorded {} samples in {} records",
            summary.sample_count, summary.record_count
        );
        Ok(summary)
    }

    fn write_features(
        &self,
        writer: &mut RecordFileWriter,
        attributes: &[AttributeDescription],
        build_ids: &[BuildIdRecord],
    ) -> Result<(), Error> {
        let uname = sys::uname()?;
        let online = sys::online_cpus()?.len() as u32;
        let available = sys::possible_cpus().map_or(online, |cpus| cpus.len() as u32);
        let event_types: Vec<EventType> = self
            .selections
            .iter()
            .map(|s| EventType::new(s.name(), s.attr().type_, s.attr().config))
            .collect();
        let event_type_info = format_event_type_info(&event_types);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
            .to_string();

        let feature_count = if build_ids.is_empty() { 8 } else { 9 };
        writer.begin_write_features(feature_count)?;
        if !build_ids.is_empty() {
            writer.write_build_id_feature(build_ids)?;
        }
        writer.write_string_feature(Feature::HOSTNAME, &uname.nodename)?;
        writer.write_string_feature(Feature::OSRELEASE, &uname.release)?;
        writer.write_string_feature(Feature::VERSION, &uname.version)?;
        writer.write_string_feature(Feature::ARCH, &uname.machine)?;
        writer.write_nr_cpus_feature(NrCpus {
            nr_cpus_available: available,
            nr_cpus_online: online,
        })?;
        writer.write_cmdline_feature(&self.options.cmdline)?;
        writer.write_event_desc_feature(attributes)?;
        writer.write_meta_info_feature([
            ("simpleperf_version", env!("CARGO_PKG_VERSION")),
            ("event_type_info", event_type_info.as_str()),
            ("timestamp", timestamp.as_str()),
        ])?;
        Ok(())
    }
}

impl Drain {
    /// Reads every ring buffer once, in source order, and writes what the
    /// reorder cache lets through, followed by a round marker.
    fn cycle(
        &mut self,
        selections: &mut [EventSelection],
        writer: &mut RecordFileWriter,
    ) -> Result<(), Error> {
        self.cache.begin_cycle();
        let mut written = 0;
        for source in 0..self.sources.len() {
            let (s, f) = self.sources[source];
            let selection = &mut selections[s];
            let attr = *selection.attr();
            self.buf.clear();
            if let Some(ring_buffer) = selection.event_fds_mut()[f].ring_buffer_mut() {
                ring_buffer.read_available(&mut self.buf)?;
            }
            for raw in RawRecordIter::new(&self.buf) {
                let record = Record::parse::<NativeEndian>(raw?, &attr)?;
                let time = record.timestamp();
                self.cache.push(source, time, record);
            }
            self.cache.mark_drained(source);
            while let Some(record) = self.cache.pop() {
                self.write(&record, writer)?;
                written += 1;
            }
        }
        if written > 0 {
            writer.write_record(&Record::FinishedRound)?;
        }
        debug!("Drain cycle wrote {written} records");
        Ok(())
    }

    fn write(&mut self, record: &Record, writer: &mut RecordFileWriter) -> Result<(), Error> {
        match record {
            Record::Sample(_) => self.summary.sample_count += 1,
            Record::Lost(lost) => self.summary.lost_count += lost.lost,
            Record::Mmap(mmap) => {
                self.mapped_files
                    .entry(mmap.filename.clone())
                    .or_insert(mmap.pid);
            }
            Record::Mmap2(mmap) => {
                self.mapped_files
                    .entry(mmap.filename.clone())
                    .or_insert(mmap.pid);
            }
            _ => {}
        }
        writer.write_record(record)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn attrs_follow_the_options() {
        let registry = EventTypeRegistry::builtin();
        let options = RecordOptions::default()
            .events(&["task-clock", "page-faults:u"])
            .call_graph(true);
        let session = RecordSession::new(options, &registry).unwrap();
        let first = session.selections[0].attr();
        let second = session.selections[1].attr();
        assert!(first.flags.contains(AttrFlags::MMAP | AttrFlags::COMM));
        assert!(!second.flags.contains(AttrFlags::MMAP));
        assert!(second.flags.contains(AttrFlags::EXCLUDE_KERNEL));
        for attr in [first, second] {
            assert!(attr.sample_id_all());
            assert!(attr
                .sample_format
                .contains(SampleFormat::IDENTIFIER | SampleFormat::CALLCHAIN));
        }
    }

    #[test]
    fn unknown_event_is_rejected() {
        let registry = EventTypeRegistry::builtin();
        let options = RecordOptions::default().events(&["no-such-event"]);
        assert!(matches!(
            RecordSession::new(options, &registry),
            Err(Error::UnknownEventName(_))
        ));
    }

    #[test]
    fn builder() {
        let options = RecordOptions::default()
            .mmap_pages(16)
            .threads(vec![1, 2])
            .sample_id_all(false)
            .duration(Duration::from_secs(1));
        assert_eq!(options.mmap_pages, 16);
        assert_eq!(options.targets, Some(OpenTargets::Threads(vec![1, 2])));
        assert!(!options.sample_id_all);
        assert_eq!(options.duration, Some(Duration::from_secs(1)));
    }
}
