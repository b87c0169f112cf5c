// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Socket wrappers: `Listener` and `Connection`.
//!
//! Operations produce waitable events; the async methods yield them and
//! convert the resume value. Sockets are non-blocking, so a spurious
//! readiness report simply leaves the event pending.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;

use tracing::debug;

use crate::co;
use crate::coroutine::{suspend, Coroutine};
use crate::error::{Error, Result};
use crate::event::{AcceptEvent, Event, ReceiveEvent, SendEvent};
use crate::value::Value;

/// Default chunk size for `readline`.
pub const DEFAULT_BUFSIZE: usize = 1024;

struct ListenerInner {
    host: String,
    port: u16,
    socket: RefCell<Option<TcpListener>>,
    closed: Cell<bool>,
}

/// A bound, listening TCP socket. Cloning shares the socket.
#[derive(Clone)]
pub struct Listener {
    inner: Rc<ListenerInner>,
}

impl Listener {
    /// Bind and listen. Port 0 picks an ephemeral port; see `local_addr`.
    pub fn bind(host: &str, port: u16) -> Result<Self> {
        let socket = TcpListener::bind((host, port))?;
        socket.set_nonblocking(true)?;
        debug!(host, port, "listening");
        Ok(Self {
            inner: Rc::new(ListenerInner {
                host: host.to_string(),
                port,
                socket: RefCell::new(Some(socket)),
                closed: Cell::new(false),
            }),
        })
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Port as requested at bind time (0 for ephemeral).
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self.inner.socket.borrow().as_ref() {
            Some(socket) => Ok(socket.local_addr()?),
            None => Err(Error::SocketClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Close the socket now. Later operations fail with `SocketClosed`.
    pub fn close(&self) {
        self.inner.closed.set(true);
        self.inner.socket.borrow_mut().take();
    }

    /// Event that resumes with the next accepted `Connection`.
    pub fn accept_event(&self) -> Result<Event> {
        if self.is_closed() {
            return Err(Error::SocketClosed);
        }
        Ok(Event::Accept(AcceptEvent::new(self.clone())))
    }

    pub async fn accept(&self) -> Result<Connection> {
        suspend(self.accept_event()?).await?.into_connection()
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.inner.socket.borrow().as_ref().map(|s| s.as_raw_fd())
    }

    pub(crate) fn try_accept(&self) -> io::Result<Option<Connection>> {
        let socket = self.inner.socket.borrow();
        let Some(socket) = socket.as_ref() else {
            return Err(closed_io());
        };
        match socket.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(true)?;
                debug!(%peer, "accepted");
                Ok(Some(Connection::new(stream, peer)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("host", &self.inner.host)
            .field("port", &self.inner.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct ConnectionInner {
    stream: RefCell<Option<TcpStream>>,
    peer: SocketAddr,
    /// Bytes read from the OS but not yet handed to a coroutine.
    buffer: RefCell<Vec<u8>>,
    closed: Cell<bool>,
}

/// A connected TCP socket with a read-ahead buffer. Cloning shares the
/// socket and the buffer; interleaved use from two coroutines must be
/// serialised by the application.
#[derive(Clone)]
pub struct Connection {
    inner: Rc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            inner: Rc::new(ConnectionInner {
                stream: RefCell::new(Some(stream)),
                peer,
                buffer: RefCell::new(Vec::new()),
                closed: Cell::new(false),
            }),
        }
    }

    /// Blocking connect, handed back through a value event.
    ///
    /// The TCP handshake stalls the whole scheduler; see `co::connect`.
    pub fn connect_event(host: &str, port: u16) -> Result<Event> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr()?;
        debug!(%peer, "connected");
        Ok(Event::Value(Value::Connection(Connection::new(stream, peer))))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Number of buffered bytes not yet delivered.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.borrow().len()
    }

    pub fn close(&self) {
        if !self.inner.closed.replace(true) {
            debug!(peer = %self.inner.peer, "closing connection");
        }
        self.inner.stream.borrow_mut().take();
    }

    /// Up to `size` bytes. Served from the buffer without an OS wait when
    /// it holds anything.
    pub fn recv_event(&self, size: usize) -> Result<Event> {
        self.check_open()?;
        let mut buffer = self.inner.buffer.borrow_mut();
        if buffer.is_empty() {
            return Ok(Event::Receive(ReceiveEvent::new(self.clone(), size)));
        }
        let take = size.min(buffer.len());
        let chunk: Vec<u8> = buffer.drain(..take).collect();
        Ok(Event::Value(Value::Bytes(chunk)))
    }

    pub fn send_event(&self, data: impl Into<Vec<u8>>) -> Result<Event> {
        self.check_open()?;
        Ok(Event::Send(SendEvent::new(self.clone(), data.into(), false)))
    }

    pub fn sendall_event(&self, data: impl Into<Vec<u8>>) -> Result<Event> {
        self.check_open()?;
        Ok(Event::Send(SendEvent::new(self.clone(), data.into(), true)))
    }

    /// Receive up to `size` bytes; empty on EOF.
    pub async fn recv(&self, size: usize) -> Result<Vec<u8>> {
        suspend(self.recv_event(size)?).await?.into_bytes()
    }

    /// Single send; returns how many bytes the OS took.
    pub async fn send(&self, data: impl Into<Vec<u8>>) -> Result<usize> {
        let n = suspend(self.send_event(data)?).await?.into_int()?;
        Ok(n as usize)
    }

    /// Send every byte before resuming.
    pub async fn sendall(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        suspend(self.sendall_event(data)?).await?;
        Ok(())
    }

    /// Read one `\n`-terminated line (terminator included).
    pub async fn readline(&self) -> Result<Vec<u8>> {
        self.readline_with(b"\n", DEFAULT_BUFSIZE).await
    }

    /// Read up to and including `terminator`, receiving `bufsize` bytes at
    /// a time. At EOF whatever is buffered is returned, possibly without a
    /// terminator, and the buffer is left empty.
    ///
    /// Runs as a delegated coroutine.
    pub async fn readline_with(&self, terminator: &[u8], bufsize: usize) -> Result<Vec<u8>> {
        self.check_open()?;
        if terminator.is_empty() {
            return Err(Error::InvalidArgument("empty line terminator"));
        }
        let conn = self.clone();
        let terminator = terminator.to_vec();
        let reader = Coroutine::new(async move { conn.read_line(&terminator, bufsize).await });
        co::call(reader).await?.into_bytes()
    }

    async fn read_line(&self, terminator: &[u8], bufsize: usize) -> Result<Value> {
        loop {
            if let Some(line) = self.take_line(terminator) {
                return Ok(Value::Bytes(line));
            }
            self.check_open()?;
            let event = Event::Receive(ReceiveEvent::new(self.clone(), bufsize));
            let data = suspend(event).await?.into_bytes()?;
            if data.is_empty() {
                let rest = std::mem::take(&mut *self.inner.buffer.borrow_mut());
                return Ok(Value::Bytes(rest));
            }
            self.inner.buffer.borrow_mut().extend_from_slice(&data);
        }
    }

    fn take_line(&self, terminator: &[u8]) -> Option<Vec<u8>> {
        let mut buffer = self.inner.buffer.borrow_mut();
        let pos = buffer
            .windows(terminator.len())
            .position(|w| w == terminator)?;
        let rest = buffer.split_off(pos + terminator.len());
        Some(std::mem::replace(&mut *buffer, rest))
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::SocketClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.inner.stream.borrow().as_ref().map(|s| s.as_raw_fd())
    }

    pub(crate) fn same_socket(&self, other: &Connection) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn try_recv(&self, size: usize) -> io::Result<Option<Vec<u8>>> {
        let mut stream = self.inner.stream.borrow_mut();
        let Some(stream) = stream.as_mut() else {
            return Err(closed_io());
        };
        let mut buf = vec![0u8; size];
        match stream.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn try_send(&self, data: &[u8]) -> io::Result<Option<usize>> {
        let mut stream = self.inner.stream.borrow_mut();
        let Some(stream) = stream.as_mut() else {
            return Err(closed_io());
        };
        match stream.write(data) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.peer)
            .field("buffered", &self.buffered())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the connection when dropped, including when its coroutine is
/// killed or torn down.
pub(crate) struct CloseOnDrop(pub(crate) Connection);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

pub(crate) struct ListenerGuard(pub(crate) Listener);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        debug!(host = self.0.host(), port = self.0.port(), "closing listener");
        self.0.close();
    }
}

fn closed_io() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket closed")
}
