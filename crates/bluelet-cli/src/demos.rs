// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Demo programs built on the scheduler.

use std::time::Duration;

use bluelet::{co, Connection, Coroutine, Result};
use tracing::info;

use crate::output;

/// Root that spawns one sleeper per duration and returns immediately;
/// the run ends when the longest sleeper wakes.
pub fn sleepers(durations: Vec<u64>) -> Coroutine {
    Coroutine::new(async move {
        for (i, ms) in durations.into_iter().enumerate() {
            co::spawn(Coroutine::new(sleeper(i, ms))).await?;
        }
        Ok(())
    })
}

async fn sleeper(index: usize, ms: u64) -> Result<()> {
    info!(sleeper = index, ms, "sleeping");
    co::sleep(Duration::from_millis(ms)).await?;
    println!("{} sleeper {} woke after {}ms", output::status_ok(), index, ms);
    Ok(())
}

pub fn echo_server(host: &str, port: u16) -> Coroutine {
    println!("{} echo server on {}", output::status_info(), output::address(host, port));
    co::server(host, port, |conn| Coroutine::new(echo(conn)))
}

async fn echo(conn: Connection) -> Result<()> {
    info!(peer = %conn.peer_addr(), "client connected");
    loop {
        let data = conn.recv(1024).await?;
        if data.is_empty() {
            break;
        }
        println!("{} {} {}", output::status_info(), conn.peer_addr(), output::payload(&data));
        conn.sendall(data).await?;
    }
    info!(peer = %conn.peer_addr(), "client disconnected");
    Ok(())
}

/// Send `line` terminated by a newline and print the first line back.
pub fn send_line(host: String, port: u16, line: String) -> Coroutine {
    Coroutine::new(async move {
        let conn = co::connect(&host, port).await?;
        let mut data = line.into_bytes();
        data.push(b'\n');
        conn.sendall(data).await?;
        let reply = conn.readline().await?;
        conn.close();
        println!("{} {}", output::status_ok(), output::payload(&reply));
        Ok(reply)
    })
}
