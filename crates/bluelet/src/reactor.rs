// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Reactor: the single readiness wait per scheduling cycle.
//!
//! Interests are rebuilt every cycle from the pending waitable events and
//! handed to one `poll(2)` call, together with an eventfd that
//! `InterruptHandle` writes to break the wait from another thread.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// I/O interest for a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn to_poll_events(self) -> libc::c_short {
        match self {
            Interest::Readable => libc::POLLIN,
            Interest::Writable => libc::POLLOUT,
        }
    }
}

/// Eventfd shared by the reactor and its interrupt handles. Closed when
/// the last owner goes away, so a stray handle never writes to a reused fd.
#[derive(Debug)]
struct WakeFd {
    fd: RawFd,
    interrupted: AtomicBool,
}

impl WakeFd {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd,
            interrupted: AtomicBool::new(false),
        })
    }

    fn signal(&self) {
        let val: u64 = 1;
        unsafe {
            libc::write(self.fd, &val as *const u64 as *const libc::c_void, 8);
        }
    }

    fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}

impl Drop for WakeFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Thread-safe handle that interrupts a running scheduler. The root
/// coroutine receives `Error::Interrupted` at its current yield point.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    wake: Arc<WakeFd>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.wake.interrupted.store(true, Ordering::Release);
        self.wake.signal();
    }
}

#[derive(Debug)]
pub struct Reactor {
    wake: Arc<WakeFd>,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            wake: Arc::new(WakeFd::new()?),
        })
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            wake: self.wake.clone(),
        }
    }

    /// Consume a pending interrupt request.
    pub fn take_interrupt(&self) -> bool {
        self.wake.interrupted.swap(false, Ordering::AcqRel)
    }

    /// Block until one of `interests` is ready, the timeout elapses, or an
    /// interrupt arrives. `None` waits indefinitely.
    ///
    /// Returns the indices into `interests` that are ready. Error, hangup
    /// and invalid-fd conditions count as ready so the owner's `fire()`
    /// observes them.
    pub fn wait(
        &self,
        interests: &[(RawFd, Interest)],
        timeout: Option<Duration>,
    ) -> io::Result<Vec<usize>> {
        let mut fds: Vec<libc::pollfd> = interests
            .iter()
            .map(|&(fd, interest)| libc::pollfd {
                fd,
                events: interest.to_poll_events(),
                revents: 0,
            })
            .collect();
        fds.push(libc::pollfd {
            fd: self.wake.fd,
            events: libc::POLLIN,
            revents: 0,
        });

        let n = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new()); // EINTR: retry next cycle.
            }
            return Err(err);
        }

        if fds[interests.len()].revents != 0 {
            self.wake.drain();
        }

        Ok(fds[..interests.len()]
            .iter()
            .enumerate()
            .filter(|(_, p)| p.revents != 0)
            .map(|(i, _)| i)
            .collect())
    }
}

/// Round up so a pending sleep is never woken early and left spinning.
fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
