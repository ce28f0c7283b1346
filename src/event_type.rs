use crate::attr::{AttrFlags, PerfEventAttr, ReadFormat, SampleFormat, SamplingPolicy};
use crate::constants::*;
use crate::error::Error;

/// A named kernel event: `perf_event_attr.type` plus `perf_event_attr.config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventType {
    pub name: String,
    pub type_: u32,
    pub config: u64,
}

impl EventType {
    pub fn new(name: impl Into<String>, type_: u32, config: u64) -> Self {
        Self {
            name: name.into(),
            type_,
            config,
        }
    }

    /// Software clock events are sampled by time, everything else by count.
    fn is_clock(&self) -> bool {
        self.type_ == PERF_TYPE_SOFTWARE
            && (self.config == PERF_COUNT_SW_CPU_CLOCK || self.config == PERF_COUNT_SW_TASK_CLOCK)
    }
}

/// An event name together with its `:u` / `:k` modifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeAndModifier {
    pub event_type: EventType,
    /// The name as it was given, including modifiers.
    pub name: String,
    pub exclude_user: bool,
    pub exclude_kernel: bool,
}

impl EventTypeAndModifier {
    /// Creates the default attr for recording this event.
    ///
    /// Samples contain ip, tid, time, cpu, period and id. The event starts
    /// disabled.
    pub fn create_default_attr(&self, sampling_policy: Option<SamplingPolicy>) -> PerfEventAttr {
        let sampling_policy = sampling_policy.unwrap_or(if self.event_type.is_clock() {
            SamplingPolicy::Frequency(4000)
        } else {
            SamplingPolicy::Period(100_000)
        });
        let mut attr = PerfEventAttr::new(
            self.event_type.type_,
            self.event_type.config,
            sampling_policy,
        );
        attr.sample_format = SampleFormat::IP
            | SampleFormat::TID
            | SampleFormat::TIME
            | SampleFormat::ID
            | SampleFormat::CPU
            | SampleFormat::PERIOD;
        attr.read_format =
            ReadFormat::TOTAL_TIME_ENABLED | ReadFormat::TOTAL_TIME_RUNNING | ReadFormat::ID;
        attr.flags = AttrFlags::DISABLED;
        if self.exclude_user {
            attr.flags |= AttrFlags::EXCLUDE_USER;
        }
        if self.exclude_kernel {
            attr.flags |= AttrFlags::EXCLUDE_KERNEL;
        }
        attr
    }
}

/// The table of event names that can be recorded.
///
/// There is no process-wide table; callers construct a registry and pass it
/// to whatever needs to resolve event names.
#[derive(Debug, Clone, Default)]
pub struct EventTypeRegistry {
    types: Vec<EventType>,
}

impl EventTypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// A registry containing the generic hardware and software events.
    pub fn builtin() -> Self {
        let hw = |name: &str, config| EventType::new(name, PERF_TYPE_HARDWARE, config);
        let sw = |name: &str, config| EventType::new(name, PERF_TYPE_SOFTWARE, config);
        let types = vec![
            hw("cpu-cycles", PERF_COUNT_HW_CPU_CYCLES),
            hw("instructions", PERF_COUNT_HW_INSTRUCTIONS),
            hw("cache-references", PERF_COUNT_HW_CACHE_REFERENCES),
            hw("cache-misses", PERF_COUNT_HW_CACHE_MISSES),
            hw("branch-instructions", PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
            hw("branch-misses", PERF_COUNT_HW_BRANCH_MISSES),
            hw("bus-cycles", PERF_COUNT_HW_BUS_CYCLES),
            hw("stalled-cycles-frontend", PERF_COUNT_HW_STALLED_CYCLES_FRONTEND),
            hw("stalled-cycles-backend", PERF_COUNT_HW_STALLED_CYCLES_BACKEND),
            hw("ref-cycles", PERF_COUNT_HW_REF_CPU_CYCLES),
            sw("cpu-clock", PERF_COUNT_SW_CPU_CLOCK),
            sw("task-clock", PERF_COUNT_SW_TASK_CLOCK),
            sw("page-faults", PERF_COUNT_SW_PAGE_FAULTS),
            sw("context-switches", PERF_COUNT_SW_CONTEXT_SWITCHES),
            sw("cpu-migrations", PERF_COUNT_SW_CPU_MIGRATIONS),
            sw("minor-faults", PERF_COUNT_SW_PAGE_FAULTS_MIN),
            sw("major-faults", PERF_COUNT_SW_PAGE_FAULTS_MAJ),
            sw("alignment-faults", PERF_COUNT_SW_ALIGNMENT_FAULTS),
            sw("emulation-faults", PERF_COUNT_SW_EMULATION_FAULTS),
            sw("dummy", PERF_COUNT_SW_DUMMY),
        ];
        Self { types }
    }

    /// Adds an event type. An existing entry with the same name is replaced.
    pub fn add(&mut self, event_type: EventType) {
        self.types.retain(|t| t.name != event_type.name);
        self.types.push(event_type);
    }

    pub fn find(&self, name: &str) -> Option<&EventType> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn find_by_type_and_config(&self, type_: u32, config: u64) -> Option<&EventType> {
        self.types
            .iter()
            .find(|t| t.type_ == type_ && t.config == config)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventType> {
        self.types.iter()
    }

    /// Resolves a name like `cpu-cycles` or `cpu-cycles:u`.
    ///
    /// The modifier `u` keeps only user space events, `k` only kernel events.
    pub fn parse_event_name(&self, name: &str) -> Result<EventTypeAndModifier, Error> {
        if let Some(event_type) = self.find(name) {
            return Ok(EventTypeAndModifier {
                event_type: event_type.clone(),
                name: name.to_string(),
                exclude_user: false,
                exclude_kernel: false,
            });
        }
        let unknown = || Error::UnknownEventName(name.to_string());
        let (base, modifier) = name.rsplit_once(':').ok_or_else(unknown)?;
        let event_type = self.find(base).ok_or_else(unknown)?;
        if modifier.is_empty() || !modifier.chars().all(|c| c == 'u' || c == 'k') {
            return Err(unknown());
        }
        let user = modifier.contains('u');
        let kernel = modifier.contains('k');
        Ok(EventTypeAndModifier {
            event_type: event_type.clone(),
            name: name.to_string(),
            exclude_user: !user,
            exclude_kernel: !kernel,
        })
    }
}
