// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Bluelet: a single-threaded cooperative coroutine scheduler.
//!
//! Coroutines are stackless futures that suspend by yielding an [`Event`]
//! to the scheduler. Control events (spawn, call, join, kill, return) are
//! settled immediately; waitable events (sleep, fd and socket I/O) are
//! collected into one `poll(2)` per cycle and fired when ready.
//!
//! Components:
//! - `coroutine`: coroutine handle, yield primitive, pull-based resume
//! - `event`:     event sum type and the `Waitable` capability
//! - `reactor`:   readiness wait + interrupt eventfd
//! - `scheduler`: thread table, delegation/join bookkeeping, `run` loop
//! - `net`:       `Listener` / `Connection` socket wrappers
//! - `co`:        coroutine-facing helpers (spawn, call, sleep, server, ...)
//!
//! ```no_run
//! use std::time::Duration;
//! use bluelet::{co, Coroutine};
//!
//! let root = Coroutine::new(async {
//!     co::sleep(Duration::from_millis(10)).await?;
//!     Ok(42)
//! });
//! assert_eq!(bluelet::run(root).unwrap().as_int(), Some(42));
//! ```

pub mod co;
pub mod coroutine;
pub mod error;
pub mod event;
pub mod net;
pub mod reactor;
pub mod scheduler;
pub mod value;

pub use coroutine::{suspend, CoroId, Coroutine, Suspend};
pub use error::{Error, Result};
pub use event::{Event, Readiness, Waitable};
pub use net::{Connection, Listener};
pub use reactor::{Interest, InterruptHandle};
pub use scheduler::{run, Scheduler, SchedulerConfig};
pub use value::Value;
