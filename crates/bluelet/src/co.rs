// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Helpers used from inside coroutines.
//!
//! Each helper builds an event, yields it, and converts the resume value.
//! Outside a running scheduler they do nothing useful.

use std::os::unix::io::RawFd;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coroutine::{suspend, CoroId, Coroutine};
use crate::error::Result;
use crate::event::Event;
use crate::net::{CloseOnDrop, Connection, Listener, ListenerGuard};
use crate::value::Value;

/// Chunk size used when reading a descriptor to EOF.
const READ_ALL_CHUNK: usize = 1024;

/// Yield once and resume with `Null`.
pub async fn null() -> Result<()> {
    suspend(Event::Value(Value::Null)).await?;
    Ok(())
}

/// Start `coro` concurrently. It first runs after the caller yields again.
pub async fn spawn(coro: Coroutine) -> Result<()> {
    suspend(Event::Spawn(coro)).await?;
    Ok(())
}

/// Run `coro` to completion and return its value. Its errors surface here.
pub async fn call(coro: Coroutine) -> Result<Value> {
    suspend(Event::Delegation(coro)).await
}

/// End the calling coroutine with `value`. Code after the await never runs.
pub async fn end(value: impl Into<Value>) -> Result<Value> {
    suspend(Event::Return(value.into())).await
}

/// Block until `target` finishes. Finished or unknown coroutines resume
/// the caller immediately.
pub async fn join(target: CoroId) -> Result<()> {
    suspend(Event::Join(target)).await?;
    Ok(())
}

/// Stop `target` and everything it is delegating to.
pub async fn kill(target: CoroId) -> Result<()> {
    suspend(Event::Kill(target)).await?;
    Ok(())
}

pub async fn sleep(duration: Duration) -> Result<()> {
    suspend(Event::sleep(duration)).await?;
    Ok(())
}

/// Read from `fd`. With a size, a single read of at most that many bytes;
/// with `None`, read in chunks until EOF.
pub async fn read(fd: RawFd, bufsize: Option<usize>) -> Result<Vec<u8>> {
    match bufsize {
        Some(n) => suspend(Event::read(fd, n)).await?.into_bytes(),
        None => read_to_end(fd).await,
    }
}

/// Read `fd` until EOF in a delegated reader coroutine.
pub async fn read_to_end(fd: RawFd) -> Result<Vec<u8>> {
    call(Coroutine::new(read_chunks(fd))).await?.into_bytes()
}

async fn read_chunks(fd: RawFd) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let chunk = suspend(Event::read(fd, READ_ALL_CHUNK)).await?.into_bytes()?;
        if chunk.is_empty() {
            return Ok(out);
        }
        out.extend_from_slice(&chunk);
    }
}

/// Single write to `fd`; returns the number of bytes written.
pub async fn write(fd: RawFd, data: impl Into<Vec<u8>>) -> Result<usize> {
    let n = suspend(Event::write(fd, data)).await?.into_int()?;
    Ok(n as usize)
}

/// Open a TCP connection.
///
/// The connect itself blocks the scheduler thread until the handshake
/// completes or fails. Only the resulting socket is non-blocking.
pub async fn connect(host: &str, port: u16) -> Result<Connection> {
    suspend(Connection::connect_event(host, port)?)
        .await?
        .into_connection()
}

/// Accept connections on `listener` forever, spawning `handler(conn)` for
/// each. The connection is closed when its handler coroutine ends, however
/// it ends. An interrupt stops the loop; the listener is always closed.
pub fn serve<H>(listener: Listener, handler: H) -> Coroutine
where
    H: Fn(Connection) -> Coroutine + 'static,
{
    Coroutine::new(async move {
        let guard = ListenerGuard(listener);
        loop {
            let conn = match guard.0.accept().await {
                Ok(conn) => conn,
                Err(e) if e.is_interrupted() => {
                    info!(host = guard.0.host(), port = guard.0.port(), "server interrupted");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            debug!(peer = %conn.peer_addr(), "spawning handler");
            spawn(connection_task(conn, &handler)).await?;
        }
    })
}

/// Bind `host:port` and run [`serve`] on it.
pub fn server<H>(host: &str, port: u16, handler: H) -> Coroutine
where
    H: Fn(Connection) -> Coroutine + 'static,
{
    match Listener::bind(host, port) {
        Ok(listener) => serve(listener, handler),
        Err(e) => {
            warn!(host, port, error = %e, "bind failed");
            Coroutine::new(async move { Err::<(), _>(e) })
        }
    }
}

fn connection_task<H>(conn: Connection, handler: &H) -> Coroutine
where
    H: Fn(Connection) -> Coroutine,
{
    let inner = handler(conn.clone());
    Coroutine::new(async move {
        let _close = CloseOnDrop(conn);
        call(inner).await
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scheduler::run;
    use std::time::Instant;

    #[test]
    fn end_stops_the_coroutine() {
        let root = Coroutine::new(async {
            end("early").await?;
            Ok("late")
        });
        assert_eq!(run(root).unwrap(), Value::from("early"));
    }

    #[test]
    fn call_returns_child_value_and_error() {
        let root = Coroutine::new(async {
            let v = call(Coroutine::new(async { Ok(20) })).await?.into_int()?;
            let err = call(Coroutine::new(async { Err::<(), _>(Error::msg("nope")) }))
                .await
                .unwrap_err();
            Ok(format!("{} {}", v + 1, err))
        });
        assert_eq!(run(root).unwrap(), Value::from("21 nope"));
    }

    #[test]
    fn sleep_waits_at_least_the_duration() {
        let start = Instant::now();
        run(Coroutine::new(sleep(Duration::from_millis(30)))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn server_serves_on_requested_port() {
        let port = {
            let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap().port()
        };
        let root = Coroutine::new(async move {
            let srv = server("127.0.0.1", port, |conn| {
                Coroutine::new(async move {
                    let line = conn.readline().await?;
                    conn.sendall(line).await
                })
            });
            let srv_id = srv.id();
            spawn(srv).await?;

            let conn = connect("127.0.0.1", port).await?;
            conn.sendall(&b"ping\n"[..]).await?;
            let reply = conn.readline().await?;
            kill(srv_id).await?;
            Ok(reply)
        });
        assert_eq!(run(root).unwrap(), Value::Bytes(b"ping\n".to_vec()));
    }

    #[test]
    fn server_bind_failure_is_raised() {
        let taken = Listener::bind("127.0.0.1", 0).unwrap();
        let port = taken.local_addr().unwrap().port();
        let root = server("127.0.0.1", port, |_conn| Coroutine::new(async { Ok(()) }));
        assert!(matches!(run(root), Err(Error::Io(_))));
    }
}
