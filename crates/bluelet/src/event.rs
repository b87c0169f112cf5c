// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Events yielded by coroutines.
//!
//! Control events are settled by the scheduler without touching the OS.
//! Waitable events describe a readiness condition (a deadline or an fd
//! interest) and know how to `fire()` the now non-blocking operation.

use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::coroutine::{CoroId, Coroutine};
use crate::error::Error;
use crate::net::{Connection, Listener};
use crate::reactor::Interest;
use crate::value::Value;

/// Instruction from a coroutine to the scheduler.
#[derive(Debug)]
pub enum Event {
    /// Resume immediately with this value.
    Value(Value),
    /// Resume immediately by raising this error at the yield point.
    Exception(Error),
    /// Start a concurrent coroutine; the spawner resumes with `Null`.
    Spawn(Coroutine),
    /// Run a child and resume with its return value.
    Delegation(Coroutine),
    /// End the current coroutine with this value.
    Return(Value),
    /// Wait for a coroutine to finish.
    Join(CoroId),
    /// Tear down a coroutine and its delegation chain.
    Kill(CoroId),
    Sleep(SleepEvent),
    Read(ReadEvent),
    Write(WriteEvent),
    Accept(AcceptEvent),
    Receive(ReceiveEvent),
    Send(SendEvent),
}

impl Event {
    pub fn sleep(duration: Duration) -> Self {
        Event::Sleep(SleepEvent::new(duration))
    }

    pub fn read(fd: RawFd, bufsize: usize) -> Self {
        Event::Read(ReadEvent { fd, bufsize })
    }

    pub fn write(fd: RawFd, data: impl Into<Vec<u8>>) -> Self {
        Event::Write(WriteEvent {
            fd,
            data: data.into(),
        })
    }

    /// Variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Value(_) => "value",
            Event::Exception(_) => "exception",
            Event::Spawn(_) => "spawn",
            Event::Delegation(_) => "delegation",
            Event::Return(_) => "return",
            Event::Join(_) => "join",
            Event::Kill(_) => "kill",
            Event::Sleep(_) => "sleep",
            Event::Read(_) => "read",
            Event::Write(_) => "write",
            Event::Accept(_) => "accept",
            Event::Receive(_) => "receive",
            Event::Send(_) => "send",
        }
    }

    pub fn is_waitable(&self) -> bool {
        self.as_waitable().is_some()
    }

    pub fn as_waitable(&self) -> Option<&dyn Waitable> {
        match self {
            Event::Sleep(e) => Some(e),
            Event::Read(e) => Some(e),
            Event::Write(e) => Some(e),
            Event::Accept(e) => Some(e),
            Event::Receive(e) => Some(e),
            Event::Send(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_waitable_mut(&mut self) -> Option<&mut dyn Waitable> {
        match self {
            Event::Sleep(e) => Some(e),
            Event::Read(e) => Some(e),
            Event::Write(e) => Some(e),
            Event::Accept(e) => Some(e),
            Event::Receive(e) => Some(e),
            Event::Send(e) => Some(e),
            _ => None,
        }
    }
}

/// What a waitable event needs before it can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Absolute wake-up time.
    At(Instant),
    /// Descriptor readiness.
    Fd(RawFd, Interest),
    /// Fire without waiting (e.g. the socket was closed underneath).
    Immediate,
}

/// Capability of events resolved through the readiness wait.
pub trait Waitable {
    fn readiness(&self) -> Readiness;

    /// Perform the operation. `Ok(None)` means "not done yet, keep
    /// waiting" (spurious readiness, or a partial `sendall`).
    fn fire(&mut self) -> io::Result<Option<Value>>;
}

#[derive(Debug)]
pub struct SleepEvent {
    wakeup: Instant,
}

impl SleepEvent {
    pub fn new(duration: Duration) -> Self {
        Self {
            wakeup: Instant::now() + duration,
        }
    }

    pub fn wakeup(&self) -> Instant {
        self.wakeup
    }

    pub fn time_left(&self) -> Duration {
        self.wakeup.saturating_duration_since(Instant::now())
    }
}

impl Waitable for SleepEvent {
    fn readiness(&self) -> Readiness {
        Readiness::At(self.wakeup)
    }

    fn fire(&mut self) -> io::Result<Option<Value>> {
        Ok(Some(Value::Null))
    }
}

/// Single bounded `read(2)` on a raw descriptor.
#[derive(Debug)]
pub struct ReadEvent {
    fd: RawFd,
    bufsize: usize,
}

impl Waitable for ReadEvent {
    fn readiness(&self) -> Readiness {
        Readiness::Fd(self.fd, Interest::Readable)
    }

    fn fire(&mut self) -> io::Result<Option<Value>> {
        let mut buf = vec![0u8; self.bufsize];
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            return would_block(io::Error::last_os_error());
        }
        buf.truncate(n as usize);
        Ok(Some(Value::Bytes(buf)))
    }
}

/// Single `write(2)` on a raw descriptor; resumes with the byte count.
#[derive(Debug)]
pub struct WriteEvent {
    fd: RawFd,
    data: Vec<u8>,
}

impl Waitable for WriteEvent {
    fn readiness(&self) -> Readiness {
        Readiness::Fd(self.fd, Interest::Writable)
    }

    fn fire(&mut self) -> io::Result<Option<Value>> {
        let n = unsafe {
            libc::write(
                self.fd,
                self.data.as_ptr() as *const libc::c_void,
                self.data.len(),
            )
        };
        if n < 0 {
            return would_block(io::Error::last_os_error());
        }
        Ok(Some(Value::Int(n as i64)))
    }
}

/// Accept one connection; resumes with a `Value::Connection`.
#[derive(Debug)]
pub struct AcceptEvent {
    listener: Listener,
}

impl AcceptEvent {
    pub(crate) fn new(listener: Listener) -> Self {
        Self { listener }
    }
}

impl Waitable for AcceptEvent {
    fn readiness(&self) -> Readiness {
        match self.listener.raw_fd() {
            Some(fd) => Readiness::Fd(fd, Interest::Readable),
            None => Readiness::Immediate,
        }
    }

    fn fire(&mut self) -> io::Result<Option<Value>> {
        Ok(self.listener.try_accept()?.map(Value::Connection))
    }
}

/// One `recv` of at most `bufsize` bytes; empty bytes on EOF.
#[derive(Debug)]
pub struct ReceiveEvent {
    conn: Connection,
    bufsize: usize,
}

impl ReceiveEvent {
    pub(crate) fn new(conn: Connection, bufsize: usize) -> Self {
        Self { conn, bufsize }
    }
}

impl Waitable for ReceiveEvent {
    fn readiness(&self) -> Readiness {
        match self.conn.raw_fd() {
            Some(fd) => Readiness::Fd(fd, Interest::Readable),
            None => Readiness::Immediate,
        }
    }

    fn fire(&mut self) -> io::Result<Option<Value>> {
        Ok(self.conn.try_recv(self.bufsize)?.map(Value::Bytes))
    }
}

/// `send` resumes with the count the OS accepted. With `all` set the
/// event stays pending until every byte is written, then resumes with
/// `Null`.
#[derive(Debug)]
pub struct SendEvent {
    conn: Connection,
    data: Vec<u8>,
    sent: usize,
    all: bool,
}

impl SendEvent {
    pub(crate) fn new(conn: Connection, data: Vec<u8>, all: bool) -> Self {
        Self {
            conn,
            data,
            sent: 0,
            all,
        }
    }
}

impl Waitable for SendEvent {
    fn readiness(&self) -> Readiness {
        match self.conn.raw_fd() {
            Some(fd) => Readiness::Fd(fd, Interest::Writable),
            None => Readiness::Immediate,
        }
    }

    fn fire(&mut self) -> io::Result<Option<Value>> {
        if !self.all {
            return Ok(self.conn.try_send(&self.data)?.map(Value::from));
        }
        while self.sent < self.data.len() {
            match self.conn.try_send(&self.data[self.sent..])? {
                Some(0) => return Err(io::ErrorKind::WriteZero.into()),
                Some(n) => self.sent += n,
                None => return Ok(None),
            }
        }
        Ok(Some(Value::Null))
    }
}

fn would_block(err: io::Error) -> io::Result<Option<Value>> {
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(None)
    } else {
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0i32; 2];
        let ret = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn control_events_are_not_waitable() {
        assert!(!Event::Value(Value::Null).is_waitable());
        assert!(!Event::Return(Value::Null).is_waitable());
        assert!(!Event::Spawn(Coroutine::new(async { Ok(()) })).is_waitable());
        assert!(Event::sleep(Duration::from_secs(1)).is_waitable());
        assert!(Event::read(0, 16).is_waitable());
    }

    #[test]
    fn sleep_reports_absolute_deadline() {
        let before = Instant::now();
        let sleep = SleepEvent::new(Duration::from_millis(50));
        match sleep.readiness() {
            Readiness::At(t) => assert!(t >= before + Duration::from_millis(50)),
            other => panic!("unexpected readiness {:?}", other),
        }
        assert!(sleep.time_left() <= Duration::from_millis(50));
    }

    #[test]
    fn read_write_fire_on_pipe() {
        let (r, w) = pipe();

        let mut read = Event::read(r, 8);
        // Nothing written yet: non-blocking read keeps waiting.
        assert!(read.as_waitable_mut().unwrap().fire().unwrap().is_none());

        let mut write = Event::write(w, &b"ping"[..]);
        assert_eq!(
            write.as_waitable().unwrap().readiness(),
            Readiness::Fd(w, Interest::Writable)
        );
        let written = write.as_waitable_mut().unwrap().fire().unwrap();
        assert_eq!(written, Some(Value::Int(4)));

        let got = read.as_waitable_mut().unwrap().fire().unwrap();
        assert_eq!(got, Some(Value::Bytes(b"ping".to_vec())));

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }
}
