// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine representation.
//!
//! A coroutine is a boxed future plus an identity. It suspends by awaiting
//! [`suspend`], which hands an [`Event`] to the scheduler through a
//! per-thread slot and returns `Pending`. The scheduler drives it with
//! [`Coroutine::resume`]: deposit the resume value, poll once, read back
//! the next event. Polling is pull-based; wakers are never used.

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::value::Value;

/// Identity of a coroutine. Used as the thread-table key and as the
/// handle for `join` / `kill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoroId(u64);

impl CoroId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        CoroId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type BoxFuture = Pin<Box<dyn Future<Output = Result<Value>>>>;

/// A suspended computation owned by the scheduler once spawned.
pub struct Coroutine {
    id: CoroId,
    future: BoxFuture,
}

/// What the scheduler sends into a coroutine.
pub(crate) enum Resume {
    Value(Value),
    Throw(Error),
}

/// Outcome of running a coroutine to its next suspension point.
pub(crate) enum Step {
    Yielded(Event),
    Complete(Result<Value>),
}

impl Coroutine {
    /// Wrap a future. Its output becomes the coroutine's return value.
    pub fn new<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + 'static,
        T: Into<Value>,
    {
        Self {
            id: CoroId::next(),
            future: Box::pin(async move { future.await.map(Into::into) }),
        }
    }

    pub fn id(&self) -> CoroId {
        self.id
    }

    /// Run until the next yield. A panic is converted to
    /// `Error::Panicked` when `catch_panics` is set.
    pub(crate) fn resume(&mut self, resume: Resume, catch_panics: bool) -> Step {
        let waker = Waker::from(Arc::new(NoopWaker));
        let mut cx = Context::from_waker(&waker);

        HANDOFF.with(|slot| {
            let mut slot = slot.borrow_mut();
            slot.resume = Some(resume);
            slot.yielded = None;
        });

        let polled = if catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| self.future.as_mut().poll(&mut cx)))
                .map_err(panic_message)
        } else {
            Ok(self.future.as_mut().poll(&mut cx))
        };

        // Anything left behind belongs to this poll only.
        let yielded = HANDOFF.with(|slot| {
            let mut slot = slot.borrow_mut();
            slot.resume = None;
            slot.yielded.take()
        });

        match polled {
            Ok(Poll::Ready(result)) => Step::Complete(result),
            Ok(Poll::Pending) => match yielded {
                Some(event) => Step::Yielded(event),
                None => Step::Complete(Err(Error::NoEvent(self.id))),
            },
            Err(msg) => Step::Complete(Err(Error::Panicked(msg))),
        }
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine").field("id", &self.id).finish()
    }
}

/// Awaiting a coroutine delegates to it: shorthand for `co::call`.
impl IntoFuture for Coroutine {
    type Output = Result<Value>;
    type IntoFuture = Suspend;

    fn into_future(self) -> Suspend {
        suspend(Event::Delegation(self))
    }
}

/// Yield `event` to the scheduler and wait for the value it resumes with.
///
/// Only meaningful inside a coroutine driven by a `Scheduler`. A coroutine
/// must await one `Suspend` at a time.
pub fn suspend(event: Event) -> Suspend {
    Suspend { event: Some(event) }
}

/// Future returned by [`suspend`].
#[must_use = "events do nothing unless awaited"]
pub struct Suspend {
    event: Option<Event>,
}

impl Future for Suspend {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(event) = self.event.take() {
            HANDOFF.with(|slot| {
                let mut slot = slot.borrow_mut();
                debug_assert!(slot.yielded.is_none(), "two events yielded in one step");
                slot.yielded = Some(event);
            });
            return Poll::Pending;
        }

        let resume = HANDOFF.with(|slot| slot.borrow_mut().resume.take());
        match resume {
            Some(Resume::Value(value)) => Poll::Ready(Ok(value)),
            Some(Resume::Throw(err)) => Poll::Ready(Err(err)),
            None => Poll::Ready(Ok(Value::Null)),
        }
    }
}

/// Hand-off between the scheduler and the coroutine it is polling.
#[derive(Default)]
struct Handoff {
    resume: Option<Resume>,
    yielded: Option<Event>,
}

thread_local! {
    static HANDOFF: RefCell<Handoff> = RefCell::new(Handoff::default());
}

struct NoopWaker;

impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
