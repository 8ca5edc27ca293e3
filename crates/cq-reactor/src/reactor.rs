// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reactor: epoll loop that drives a completion registry.
//!
//! Level-triggered epoll. Interest is derived from the registry on every
//! cycle, so handle owners only talk to the registry; the reactor follows.
//! Callbacks run on the polling thread with no reactor or registry lock
//! held.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cq_dispatch::{
    ActionKind, AsyncContext, Completion, DispatchError, Handle, Interest, IntoAction, Readiness,
    Registry,
};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::config::ReactorConfig;
use crate::io as fdio;

fn interest_to_epoll_events(interest: Interest) -> u32 {
    let mut events = 0;
    if interest.read {
        events |= libc::EPOLLIN as u32;
    }
    if interest.write {
        events |= libc::EPOLLOUT as u32;
    }
    if interest.peer_close {
        events |= libc::EPOLLRDHUP as u32;
    }
    events
}

/// Readiness kinds reported by one epoll event, in dispatch order:
/// pending input first so data is consumed before a close is seen.
fn classify(events: u32) -> Vec<Readiness> {
    let hangup = events & (libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0;
    let mut ready = Vec::with_capacity(3);
    if events & libc::EPOLLIN as u32 != 0 || hangup {
        ready.push(Readiness::Readable);
    }
    if events & libc::EPOLLOUT as u32 != 0 || events & libc::EPOLLERR as u32 != 0 {
        ready.push(Readiness::Writable);
    }
    if events & (libc::EPOLLRDHUP | libc::EPOLLHUP) as u32 != 0 {
        ready.push(Readiness::PeerClosed);
    }
    ready
}

fn is_spurious(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Event mask installed for a descriptor, and the registry revision it was
/// derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watch {
    events: u32,
    revision: u64,
}

fn is_gone(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOENT) | Some(libc::EBADF))
}

/// Epoll-backed driver for a shared `Registry`.
pub struct Reactor {
    epoll_fd: RawFd,
    /// Eventfd for waking the polling thread (new registrations, shutdown).
    wake_fd: RawFd,
    registry: Arc<Registry>,
    /// FD → what is currently installed in epoll for it.
    watched: Mutex<HashMap<RawFd, Watch>>,
    shutdown: AtomicBool,
    config: ReactorConfig,
}

impl Reactor {
    /// Create a reactor with an epoll instance and wake eventfd.
    pub fn new(registry: Arc<Registry>, config: ReactorConfig) -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            unsafe { libc::close(epoll_fd) };
            return Err(io::Error::last_os_error());
        }

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: wake_fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, wake_fd, &mut ev) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake_fd);
                libc::close(epoll_fd);
            }
            return Err(err);
        }

        Ok(Self {
            epoll_fd,
            wake_fd,
            registry,
            watched: Mutex::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register with the registry and wake the polling thread so the new
    /// interest is installed without waiting out the current timeout.
    pub fn register<A, C>(
        &self,
        handle: impl Into<Handle>,
        action: A,
        callback: C,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), DispatchError>
    where
        A: IntoAction,
        C: Completion + 'static,
    {
        self.registry.register(handle, action, callback, payload)?;
        self.wake();
        Ok(())
    }

    /// Cancel in the registry, drop the descriptor from epoll and wake the
    /// polling thread.
    ///
    /// The descriptor leaves epoll before this returns, so it may be closed
    /// and its number reused straight away.
    pub fn cancel(&self, handle: impl Into<Handle>) -> io::Result<()> {
        let handle = handle.into();
        self.registry.cancel(handle);
        self.unwatch(handle.raw)?;
        self.wake();
        Ok(())
    }

    /// Claim `raw` for a new occupant in the registry and drop whatever
    /// epoll still holds for the previous one.
    pub fn claim(&self, raw: RawFd) -> io::Result<Handle> {
        let handle = self.registry.claim(raw);
        self.unwatch(raw)?;
        self.wake();
        Ok(handle)
    }

    fn unwatch(&self, fd: RawFd) -> io::Result<()> {
        let mut watched = self.watched.lock();
        if watched.remove(&fd).is_some() {
            self.deregister(fd)?;
        }
        Ok(())
    }

    /// EPOLL_CTL_DEL, tolerating a descriptor that was already closed.
    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, 0) {
            Err(err) if !is_gone(&err) => Err(err),
            _ => Ok(()),
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Bring epoll interest in line with what the registry holds.
    fn reconcile(&self) -> io::Result<()> {
        let mut watched = self.watched.lock();

        let mut fds = self.registry.handles();
        fds.extend(watched.keys().copied());
        fds.sort_unstable();
        fds.dedup();

        for fd in fds {
            if fd < 0 || fd == self.wake_fd || fd == self.epoll_fd {
                continue;
            }
            let wanted = Watch {
                events: interest_to_epoll_events(self.registry.interest(fd)),
                revision: self.registry.revision(fd),
            };
            let current = watched.get(&fd).copied();

            if wanted.events == 0 {
                if current.is_some() {
                    watched.remove(&fd);
                    self.deregister(fd)?;
                }
                continue;
            }
            // A new revision may stand for a descriptor that was closed and
            // reopened under the same number since the last cycle, so it is
            // installed again even when the mask is unchanged.
            if current == Some(wanted) {
                continue;
            }

            let op = if current.is_some() {
                libc::EPOLL_CTL_MOD
            } else {
                libc::EPOLL_CTL_ADD
            };
            // A closed-and-reused FD drops out of epoll behind our back, and
            // an FD may already be known to epoll from before a restart.
            let result = match self.ctl(op, fd, wanted.events) {
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
                    self.ctl(libc::EPOLL_CTL_ADD, fd, wanted.events)
                }
                Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {
                    self.ctl(libc::EPOLL_CTL_MOD, fd, wanted.events)
                }
                other => other,
            };

            match result {
                Ok(()) => {
                    watched.insert(fd, wanted);
                }
                Err(err) if matches!(err.raw_os_error(), Some(libc::EBADF) | Some(libc::EPERM)) => {
                    warn!(fd, error = %err, "cannot watch descriptor");
                    watched.remove(&fd);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Run one poll cycle.
    ///
    /// Installs pending interest, blocks up to `timeout_ms` (-1 = forever)
    /// waiting for events and runs the callbacks of ready records.
    /// Returns the number of callbacks invoked.
    pub fn poll_once(&self, timeout_ms: i32) -> io::Result<usize> {
        self.reconcile()?;

        let max_events = self.config.max_events.max(1);
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; max_events];

        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                max_events as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0); // EINTR: retry next cycle.
            }
            return Err(err);
        }

        let mut invoked = 0;
        for ev in &events[..n as usize] {
            let fd = ev.u64 as RawFd;
            let mask = ev.events;

            // Drain wake_fd reads (just a signal, value doesn't matter).
            if fd == self.wake_fd {
                let mut buf = [0u8; 8];
                unsafe {
                    libc::read(self.wake_fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
                }
                continue;
            }

            let handle = Handle::new(fd, self.registry.generation(fd));
            for readiness in classify(mask) {
                if self.complete(readiness, handle) {
                    invoked += 1;
                }
            }
        }

        Ok(invoked)
    }

    /// Perform the I/O implied by the pending record and run its callback.
    /// Returns false when nothing was pending or the readiness was spurious.
    fn complete(&self, readiness: Readiness, handle: Handle) -> bool {
        let category = readiness.category();
        let Some(op) = self.registry.lookup(category, handle) else {
            return false;
        };

        let fd = handle.raw;
        let mut cx = AsyncContext::new(handle);
        match op.action() {
            ActionKind::Accept => match fdio::accept(fd) {
                Ok(conn) => cx.accept_handle = Some(conn),
                Err(err) if is_spurious(&err) => return false,
                Err(err) => warn!(%handle, error = %err, "accept failed"),
            },
            ActionKind::Read => match fdio::read_some(fd, self.config.read_chunk) {
                Ok(data) => cx.buffer = data,
                Err(err) if is_spurious(&err) => return false,
                Err(err) => warn!(%handle, error = %err, "read failed"),
            },
            ActionKind::Timer => match fdio::read_expirations(fd) {
                Ok(count) => cx.buffer = count.to_vec(),
                Err(err) if is_spurious(&err) => return false,
                Err(err) => warn!(%handle, error = %err, "timer read failed"),
            },
            ActionKind::Write | ActionKind::Connect => cx.buffer = op.payload().to_vec(),
            ActionKind::PeerClose => {}
        }

        let outcome = self.registry.invoke(handle, &op, &mut cx);
        trace!(%handle, %category, action = %op.action(), ?outcome, "dispatched");
        true
    }

    /// Poll until `request_shutdown` is called.
    pub fn run(&self) -> io::Result<()> {
        let timeout_ms = self
            .config
            .poll_timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);
        while !self.should_shutdown() {
            self.poll_once(timeout_ms)?;
        }
        Ok(())
    }

    /// Signal the polling thread to wake up (e.g. for new registrations
    /// or shutdown).
    pub fn wake(&self) {
        let val: u64 = 1;
        unsafe {
            libc::write(
                self.wake_fd,
                &val as *const u64 as *const libc::c_void,
                8,
            );
        }
    }

    /// Request shutdown. The run loop checks this each cycle.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake();
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        // Deregister all FDs, then close epoll + eventfd.
        let watched = self.watched.lock();
        for &fd in watched.keys() {
            unsafe {
                libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            }
        }
        drop(watched);

        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epoll_fd);
        }
    }
}
