// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Non-blocking descriptor helpers.
//!
//! The reactor performs at most one syscall per ready record: one
//! `accept4`, one `read` of a bounded chunk, or one 8-byte timerfd read.
//! `WouldBlock` comes back as an error for the caller to treat as a
//! spurious wakeup.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// Set a file descriptor to non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Accept one pending connection. The new descriptor is non-blocking.
pub(crate) fn accept(fd: RawFd) -> io::Result<RawFd> {
    let conn = unsafe {
        libc::accept4(
            fd,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    };
    if conn < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(conn)
}

/// Read up to `max` bytes. An empty vector means end of stream.
pub(crate) fn read_some(fd: RawFd, max: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; max.max(1)];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(n as usize);
    Ok(buf)
}

/// Drain a timerfd: native-endian count of expirations since the last read.
pub(crate) fn read_expirations(fd: RawFd) -> io::Result<[u8; 8]> {
    let mut buf = [0u8; 8];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    if n as usize != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "short read from timerfd",
        ));
    }
    Ok(buf)
}

fn to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

/// Owned monotonic timerfd, readable once it expires.
///
/// Register it under `ActionKind::Timer`; the callback receives the
/// expiration count in its buffer.
#[derive(Debug)]
pub struct Timer {
    fd: RawFd,
}

impl Timer {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Fire once after `after`, then every `interval` if given.
    pub fn arm(&self, after: Duration, interval: Option<Duration>) -> io::Result<()> {
        // A zero initial expiration would disarm the timer.
        let after = after.max(Duration::from_nanos(1));
        let spec = libc::itimerspec {
            it_interval: to_timespec(interval.unwrap_or(Duration::ZERO)),
            it_value: to_timespec(after),
        };
        self.settime(&spec)
    }

    pub fn disarm(&self) -> io::Result<()> {
        let spec = libc::itimerspec {
            it_interval: to_timespec(Duration::ZERO),
            it_value: to_timespec(Duration::ZERO),
        };
        self.settime(&spec)
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn settime(&self, spec: &libc::itimerspec) -> io::Result<()> {
        let ret = unsafe { libc::timerfd_settime(self.fd, 0, spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for Timer {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
