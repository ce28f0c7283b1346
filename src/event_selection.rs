use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use log::{debug, info, warn};

use crate::attr::PerfEventAttr;
use crate::error::Error;
use crate::feature_sections::AttributeDescription;
use crate::ring_buffer::{MmapRegion, RingBuffer};
use crate::sys;

/// What to monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenTargets {
    /// All threads on each of these cpus.
    Cpus(Vec<u32>),
    /// Each of these threads (or processes), on any cpu.
    Threads(Vec<i32>),
    /// Each of these threads, with one descriptor per cpu. The kernel only
    /// maps ring buffers of inherited events when they are bound to a cpu.
    ThreadsOnCpus { threads: Vec<i32>, cpus: Vec<u32> },
}

/// The target of a single descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Cpu(u32),
    Thread(i32),
    ThreadOnCpu(i32, u32),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Cpu(cpu) => write!(f, "cpu {cpu}"),
            Target::Thread(tid) => write!(f, "thread {tid}"),
            Target::ThreadOnCpu(tid, cpu) => write!(f, "thread {tid} on cpu {cpu}"),
        }
    }
}

/// One perf event descriptor and, once mapped, its ring buffer.
///
/// Dropping it unmaps the ring buffer and closes the descriptor.
#[derive(Debug)]
pub struct EventFd {
    // Declared before `fd` so that the mapping goes away first.
    ring_buffer: Option<RingBuffer>,
    fd: OwnedFd,
    target: Target,
    id: u64,
}

impl EventFd {
    fn open(attr: &PerfEventAttr, target: Target) -> Result<Self, Error> {
        let (pid, cpu) = match target {
            Target::Cpu(cpu) => (-1, cpu as i32),
            Target::Thread(tid) => (tid, -1),
            Target::ThreadOnCpu(tid, cpu) => (tid, cpu as i32),
        };
        let resource_error = |source| Error::Resource {
            target: target.to_string(),
            source,
        };
        let fd = sys::perf_event_open(attr, pid, cpu, None).map_err(resource_error)?;
        let id = sys::perf_event_id(fd.as_fd()).map_err(resource_error)?;
        Ok(Self {
            ring_buffer: None,
            fd,
            target,
            id,
        })
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// The id the kernel assigned to this descriptor.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ring_buffer(&self) -> Option<&RingBuffer> {
        self.ring_buffer.as_ref()
    }

    pub fn ring_buffer_mut(&mut self) -> Option<&mut RingBuffer> {
        self.ring_buffer.as_mut()
    }

    fn enable(&self) -> Result<(), Error> {
        sys::perf_event_enable(self.fd.as_fd()).map_err(|source| Error::Resource {
            target: self.target.to_string(),
            source,
        })
    }

    fn disable(&self) -> Result<(), Error> {
        sys::perf_event_disable(self.fd.as_fd()).map_err(|source| Error::Resource {
            target: self.target.to_string(),
            source,
        })
    }
}

impl AsFd for EventFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// One kind of event, opened on a set of targets.
#[derive(Debug)]
pub struct EventSelection {
    name: String,
    attr: PerfEventAttr,
    event_fds: Vec<EventFd>,
}

impl EventSelection {
    pub fn new(name: impl Into<String>, attr: PerfEventAttr) -> Self {
        Self {
            name: name.into(),
            attr,
            event_fds: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self) -> &PerfEventAttr {
        &self.attr
    }

    pub fn event_fds(&self) -> &[EventFd] {
        &self.event_fds
    }

    pub fn event_fds_mut(&mut self) -> &mut [EventFd] {
        &mut self.event_fds
    }

    /// The kernel ids of all opened descriptors.
    pub fn ids(&self) -> Vec<u64> {
        self.event_fds.iter().map(EventFd::id).collect()
    }

    /// The entry for this event in a record file's attr section.
    pub fn attribute_description(&self) -> AttributeDescription {
        AttributeDescription {
            attr: self.attr,
            name: Some(self.name.clone()),
            event_ids: self.ids(),
        }
    }

    /// Opens one descriptor per target.
    ///
    /// A cpu which cannot be opened is skipped, since cpus can go offline at
    /// any time, as long as at least one cpu works. A thread which cannot be
    /// opened (on any cpu) is an error.
    pub fn open(&mut self, targets: &OpenTargets) -> Result<(), Error> {
        let mut event_fds = Vec::new();
        match targets {
            OpenTargets::Cpus(cpus) => {
                for &cpu in cpus {
                    match EventFd::open(&self.attr, Target::Cpu(cpu)) {
                        Ok(event_fd) => event_fds.push(event_fd),
                        Err(e) => warn!("Could not open {} on cpu {}: {}", self.name, cpu, e),
                    }
                }
                if event_fds.is_empty() {
                    return Err(Error::NoDescriptorsOpened(self.name.clone()));
                }
            }
            OpenTargets::Threads(tids) => {
                for &tid in tids {
                    event_fds.push(EventFd::open(&self.attr, Target::Thread(tid))?);
                }
                if event_fds.is_empty() {
                    return Err(Error::NoDescriptorsOpened(self.name.clone()));
                }
            }
            OpenTargets::ThreadsOnCpus { threads, cpus } => {
                for &tid in threads {
                    let mut last_error = None;
                    let before = event_fds.len();
                    for &cpu in cpus {
                        match EventFd::open(&self.attr, Target::ThreadOnCpu(tid, cpu)) {
                            Ok(event_fd) => event_fds.push(event_fd),
                            Err(e) => {
                                debug!("Could not open {} on cpu {}: {}", self.name, cpu, e);
                                last_error = Some(e);
                            }
                        }
                    }
                    if event_fds.len() == before {
                        return Err(last_error
                            .unwrap_or_else(|| Error::NoDescriptorsOpened(self.name.clone())));
                    }
                }
                if event_fds.is_empty() {
                    return Err(Error::NoDescriptorsOpened(self.name.clone()));
                }
            }
        }
        debug!("Opened {} descriptors for {}", event_fds.len(), self.name);
        self.event_fds = event_fds;
        Ok(())
    }

    /// Starts counting on every descriptor.
    ///
    /// Every descriptor is tried even if an earlier one fails; the first
    /// failure is returned.
    pub fn enable(&self) -> Result<(), Error> {
        first_error(self.event_fds.iter().map(EventFd::enable))
    }

    /// Stops counting on every descriptor, like [`EventSelection::enable`].
    pub fn disable(&self) -> Result<(), Error> {
        first_error(self.event_fds.iter().map(EventFd::disable))
    }

    /// Maps a ring buffer of `pages` data pages for each descriptor.
    ///
    /// Either all descriptors get a ring buffer or none do.
    pub fn mmap(&mut self, pages: usize) -> Result<(), Error> {
        if !pages.is_power_of_two() {
            return Err(Error::MmapPagesNotPowerOfTwo(pages));
        }
        let page_size = sys::page_size();
        let len = (pages + 1) * page_size;
        let mut ring_buffers = Vec::with_capacity(self.event_fds.len());
        for event_fd in &self.event_fds {
            let region = MmapRegion::map_perf_event(event_fd.as_fd(), len).map_err(|source| {
                Error::Resource {
                    target: event_fd.target.to_string(),
                    source,
                }
            })?;
            ring_buffers.push(RingBuffer::new(region, page_size)?);
        }
        for (event_fd, ring_buffer) in self.event_fds.iter_mut().zip(ring_buffers) {
            event_fd.ring_buffer = Some(ring_buffer);
        }
        info!(
            "Mapped {} ring buffers of {} bytes for {}",
            self.event_fds.len(),
            len,
            self.name
        );
        Ok(())
    }
}

fn first_error(results: impl Iterator<Item = Result<(), Error>>) -> Result<(), Error> {
    let mut first = None;
    for result in results {
        if let Err(e) = result {
            warn!("{e}");
            first.get_or_insert(e);
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
