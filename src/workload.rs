//! A child process to record, which waits until recording has started
//! before it runs the command.

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use log::{debug, warn};

use crate::error::Error;

/// A forked child which blocks until [`Workload::start`] and then execs the
/// command. It is killed and reaped on drop if it is still running.
#[derive(Debug)]
pub struct Workload {
    pid: libc::pid_t,
    /// Write end of the pipe the child waits on.
    start_fd: Option<OwnedFd>,
    /// Read end of a close-on-exec pipe: EOF after a successful exec,
    /// otherwise the child's errno.
    exec_status_fd: Option<OwnedFd>,
    exit_code: Option<i32>,
}

fn pipe(flags: libc::c_int) -> Result<(OwnedFd, OwnedFd), Error> {
    let mut fds = [0; 2];
    // SAFETY: `fds` has room for two descriptors.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), flags) } != 0 {
        return Err(Error::Workload(format!(
            "Could not create a pipe: {}",
            std::io::Error::last_os_error()
        )));
    }
    // SAFETY: pipe2 returned two new descriptors which nothing else owns.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

impl Workload {
    /// Forks a child for `args`. The command is looked up in `PATH`.
    pub fn create(args: &[String]) -> Result<Self, Error> {
        if args.is_empty() {
            return Err(Error::Workload("No command given".to_string()));
        }
        // Everything the child needs is allocated before the fork.
        let args: Vec<CString> = args
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes())
                    .map_err(|_| Error::Workload(format!("Argument {arg:?} contains a NUL byte")))
            })
            .collect::<Result<_, _>>()?;
        let mut argv: Vec<*const libc::c_char> = args.iter().map(|a| a.as_ptr()).collect();
        argv.push(std::ptr::null());

        let (start_read, start_write) = pipe(libc::O_CLOEXEC)?;
        let (exec_read, exec_write) = pipe(libc::O_CLOEXEC)?;

        // SAFETY: The child only makes async-signal-safe calls before exec.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(Error::Workload(format!(
                "fork failed: {}",
                std::io::Error::last_os_error()
            ))),
            0 => {
                // SAFETY: This is the child. It never returns from this block.
                unsafe {
                    libc::close(start_write.as_raw_fd());
                    libc::close(exec_read.as_raw_fd());
                    let mut buf = [0u8; 1];
                    let n = libc::read(start_read.as_raw_fd(), buf.as_mut_ptr().cast(), 1);
                    if n != 1 {
                        // The parent went away without starting us.
                        libc::_exit(1);
                    }
                    libc::execvp(argv[0], argv.as_ptr());
                    let errno = *libc::__errno_location();
                    let bytes = errno.to_ne_bytes();
                    libc::write(exec_write.as_raw_fd(), bytes.as_ptr().cast(), bytes.len());
                    libc::_exit(127);
                }
            }
            pid => {
                drop(start_read);
                drop(exec_write);
                debug!("Forked workload {:?} as pid {}", args[0], pid);
                Ok(Self {
                    pid,
                    start_fd: Some(start_write),
                    exec_status_fd: Some(exec_read),
                    exit_code: None,
                })
            }
        }
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Lets the child exec the command, and waits until it has done so.
    pub fn start(&mut self) -> Result<(), Error> {
        let Some(start_fd) = self.start_fd.take() else {
            return Err(Error::Workload("The workload was already started".to_string()));
        };
        File::from(start_fd)
            .write_all(&[1])
            .map_err(|e| Error::Workload(format!("Could not start the workload: {e}")))?;

        if let Some(exec_status_fd) = self.exec_status_fd.take() {
            let mut status = Vec::new();
            File::from(exec_status_fd)
                .read_to_end(&mut status)
                .map_err(|e| Error::Workload(format!("Could not read the exec status: {e}")))?;
            if status.len() >= 4 {
                let errno = i32::from_ne_bytes([status[0], status[1], status[2], status[3]]);
                self.wait()?;
                return Err(Error::Workload(format!(
                    "Could not run the command: {}",
                    std::io::Error::from_raw_os_error(errno)
                )));
            }
        }
        Ok(())
    }

    fn waitpid(&mut self, options: libc::c_int) -> Result<Option<i32>, Error> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }
        let mut status = 0;
        // SAFETY: `status` is a valid out pointer.
        let ret = unsafe { libc::waitpid(self.pid, &mut status, options) };
        if ret < 0 {
            return Err(Error::Workload(format!(
                "waitpid failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        if ret == 0 {
            return Ok(None);
        }
        let code = if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else {
            128 + libc::WTERMSIG(status)
        };
        self.exit_code = Some(code);
        Ok(Some(code))
    }

    /// Returns the exit code if the child has exited.
    pub fn try_wait(&mut self) -> Result<Option<i32>, Error> {
        self.waitpid(libc::WNOHANG)
    }

    /// Waits for the child to exit and returns its exit code. A child killed
    /// by a signal reports 128 plus the signal number.
    pub fn wait(&mut self) -> Result<i32, Error> {
        loop {
            if let Some(code) = self.waitpid(0)? {
                return Ok(code);
            }
        }
    }
}

impl Drop for Workload {
    fn drop(&mut self) {
        if self.exit_code.is_some() {
            return;
        }
        // Closing the start pipe makes a child that was never started exit.
        self.start_fd = None;
        // SAFETY: The pid belongs to our unreaped child.
        unsafe {
            libc::kill(self.pid, libc::SIGKILL);
        }
        if let Err(e) = self.wait() {
            warn!("Could not reap workload {}: {}", self.pid, e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn args(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn runs_after_start() {
        let mut workload = Workload::create(&args(&["sh", "-c", "exit 3"])).unwrap();
        assert_eq!(workload.try_wait().unwrap(), None);
        workload.start().unwrap();
        assert_eq!(workload.wait().unwrap(), 3);
    }

    #[test]
    fn missing_command() {
        let mut workload =
            Workload::create(&args(&["/nonexistent/command/for/sure"])).unwrap();
        assert!(matches!(workload.start(), Err(Error::Workload(_))));
    }

    #[test]
    fn unstarted_workload_is_reaped() {
        let workload = Workload::create(&args(&["true"])).unwrap();
        let pid = workload.pid();
        drop(workload);
        // SAFETY: Signal 0 only checks for existence.
        assert_eq!(unsafe { libc::kill(pid, 0) }, -1);
    }

    #[test]
    fn empty_command() {
        assert!(Workload::create(&[]).is_err());
    }
}
