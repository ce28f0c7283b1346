//! Thin wrappers around the system calls used for recording.

use std::ffi::CStr;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};

use byteorder::NativeEndian;

use crate::attr::PerfEventAttr;
use crate::constants::*;

/// Calls `perf_event_open`. The returned descriptor is close-on-exec.
///
/// `pid == -1` with a `cpu` monitors all threads on that cpu, `cpu == -1`
/// with a `pid` follows that thread on all cpus.
pub fn perf_event_open(
    attr: &PerfEventAttr,
    pid: libc::pid_t,
    cpu: libc::c_int,
    group_fd: Option<BorrowedFd<'_>>,
) -> io::Result<OwnedFd> {
    // The kernel reads the struct through a u64-aligned pointer.
    let mut raw = [0u64; PERF_ATTR_SIZE_VER7 as usize / 8];
    let mut bytes = Vec::with_capacity(PERF_ATTR_SIZE_VER7 as usize);
    attr.write::<_, NativeEndian>(&mut bytes)?;
    for (word, chunk) in raw.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut b = [0; 8];
        b.copy_from_slice(chunk);
        *word = u64::from_ne_bytes(b);
    }
    let group_fd = group_fd.map_or(-1, |fd| fd.as_raw_fd());

    // SAFETY: `raw` is a complete perf_event_attr which outlives the call.
    let fd = unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            raw.as_ptr(),
            pid,
            cpu,
            group_fd,
            PERF_FLAG_FD_CLOEXEC as libc::c_ulong,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: The kernel returned a new descriptor which nothing else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(fd as libc::c_int) })
}

fn ioctl_none(fd: BorrowedFd<'_>, request: u64) -> io::Result<()> {
    // SAFETY: These requests take no argument.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), request as _, 0) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn perf_event_enable(fd: BorrowedFd<'_>) -> io::Result<()> {
    ioctl_none(fd, PERF_EVENT_IOC_ENABLE)
}

pub fn perf_event_disable(fd: BorrowedFd<'_>) -> io::Result<()> {
    ioctl_none(fd, PERF_EVENT_IOC_DISABLE)
}

/// Returns the id the kernel assigned to this event. It is the `id` and
/// `identifier` value in the event's records.
pub fn perf_event_id(fd: BorrowedFd<'_>) -> io::Result<u64> {
    let mut id: u64 = 0;
    // SAFETY: PERF_EVENT_IOC_ID writes one u64 through the pointer.
    let ret = unsafe { libc::ioctl(fd.as_raw_fd(), PERF_EVENT_IOC_ID as _, &mut id as *mut u64) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(id)
}

/// Waits until one of `fds` is readable or `timeout_ms` elapses, and returns
/// the number of ready descriptors. An interrupted wait counts as a timeout.
pub fn poll_readable(fds: &[BorrowedFd<'_>], timeout_ms: i32) -> io::Result<usize> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|fd| libc::pollfd {
            fd: fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    // SAFETY: `pollfds` is a valid array of `pollfds.len()` entries.
    let ret = unsafe {
        libc::poll(
            pollfds.as_mut_ptr(),
            pollfds.len() as libc::nfds_t,
            timeout_ms,
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(ret as usize)
}

pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// Parses a cpu list like `0-3,5,7-8`.
pub fn parse_cpu_list(s: &str) -> Option<Vec<u32>> {
    let mut cpus = Vec::new();
    for part in s.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((first, last)) => {
                let first: u32 = first.trim().parse().ok()?;
                let last: u32 = last.trim().parse().ok()?;
                if last < first {
                    return None;
                }
                cpus.extend(first..=last);
            }
            None => cpus.push(part.trim().parse().ok()?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Some(cpus)
}

fn read_cpu_list(path: &str) -> io::Result<Vec<u32>> {
    let s = fs::read_to_string(path)?;
    parse_cpu_list(&s).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Could not parse cpu list {s:?} in {path}"),
        )
    })
}

pub fn online_cpus() -> io::Result<Vec<u32>> {
    read_cpu_list("/sys/devices/system/cpu/online")
}

pub fn possible_cpus() -> io::Result<Vec<u32>> {
    read_cpu_list("/sys/devices/system/cpu/possible")
}

/// The fields of `uname(2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uname {
    pub sysname: String,
    pub nodename: String,
    pub release: String,
    pub version: String,
    pub machine: String,
}

pub fn uname() -> io::Result<Uname> {
    // SAFETY: utsname is plain old data.
    let mut buf: libc::utsname = unsafe { std::mem::zeroed() };
    // SAFETY: `buf` is a valid utsname to fill.
    if unsafe { libc::uname(&mut buf) } < 0 {
        return Err(io::Error::last_os_error());
    }
    let field = |chars: &[libc::c_char]| {
        // SAFETY: uname NUL-terminates every field.
        unsafe { CStr::from_ptr(chars.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    };
    Ok(Uname {
        sysname: field(&buf.sysname),
        nodename: field(&buf.nodename),
        release: field(&buf.release),
        version: field(&buf.version),
        machine: field(&buf.machine),
    })
}

/// Whether this process may open perf events for itself.
///
/// Opens and closes a task clock counter on the current thread.
pub fn perf_events_available() -> bool {
    let attr = PerfEventAttr::new(
        PERF_TYPE_SOFTWARE,
        PERF_COUNT_SW_TASK_CLOCK,
        crate::attr::SamplingPolicy::Period(0),
    );
    perf_event_open(&attr, 0, -1, None).is_ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cpu_lists() {
        assert_eq!(parse_cpu_list("0-3,5\n"), Some(vec![0, 1, 2, 3, 5]));
        assert_eq!(parse_cpu_list("0"), Some(vec![0]));
        assert_eq!(parse_cpu_list("7-8,2"), Some(vec![2, 7, 8]));
        assert_eq!(parse_cpu_list(""), Some(vec![]));
        assert_eq!(parse_cpu_list("3-1"), None);
        assert_eq!(parse_cpu_list("a"), None);
    }

    #[test]
    fn uname_has_a_machine() {
        let uname = uname().unwrap();
        assert_eq!(uname.sysname, "Linux");
        assert!(!uname.machine.is_empty());
    }

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
    }
}
