// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler and coroutine errors.
//!
//! An `Error` is what a coroutine "raises": it travels to the delegator
//! through an exception event, or out of `run()` when nobody is waiting.

use std::io;

use thiserror::Error;

use crate::coroutine::CoroId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Operation on a `Listener` or `Connection` after `close()`.
    #[error("socket closed")]
    SocketClosed,

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Delivered to the root coroutine when the scheduler is interrupted
    /// from outside (see `InterruptHandle`).
    #[error("scheduler interrupted")]
    Interrupted,

    /// Every remaining coroutine is suspended on a join or delegation that
    /// can never complete.
    #[error("deadlock: {0} coroutine(s) suspended with nothing to wait on")]
    Deadlock(usize),

    /// A coroutine returned `Pending` without yielding an event.
    #[error("coroutine {0} suspended without yielding an event")]
    NoEvent(CoroId),

    #[error("coroutine panicked: {0}")]
    Panicked(String),

    /// The resume value did not have the shape the awaiting helper expects.
    #[error("expected {expected} value, got {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("{0}")]
    Message(String),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + 'static>),
}

impl Error {
    /// Plain message error raised by user code.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }

    /// Wrap any user error type.
    pub fn other<E: std::error::Error + 'static>(err: E) -> Self {
        Error::Other(Box::new(err))
    }

    /// Look through `Other` (and `Io`) for a concrete error type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Error::Other(inner) => inner.downcast_ref::<E>(),
            Error::Io(inner) => inner.get_ref().and_then(|e| e.downcast_ref::<E>()),
            _ => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }

    /// Broken pipe or reset by peer: the remote side went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => is_disconnect(e),
            _ => false,
        }
    }
}

pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}
