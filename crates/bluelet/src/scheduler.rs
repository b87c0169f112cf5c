// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Single-threaded cooperative scheduler.
//!
//! The thread table maps every live coroutine to what it is blocked on.
//! Each cycle first settles all control events (repeatedly, until a full
//! pass finds nothing to do), then performs exactly one readiness wait
//! over the pending waitable events and resumes the coroutines that fired.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, error, trace};

use crate::coroutine::{CoroId, Coroutine, Resume, Step};
use crate::error::{self, Error, Result};
use crate::event::{Event, Readiness};
use crate::reactor::{Interest, InterruptHandle, Reactor};
use crate::value::Value;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Convert panics inside coroutines into `Error::Panicked` raised by
    /// that coroutine. When false, a panic unwinds out of `run()`.
    pub catch_panics: bool,
    /// Raise `Error::Deadlock` in the root coroutine when coroutines remain
    /// but none of them can ever be resumed. When false the scheduler
    /// waits for an interrupt instead.
    pub detect_deadlock: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            catch_panics: true,
            detect_deadlock: true,
        }
    }
}

/// What a registered coroutine is waiting for.
#[derive(Debug)]
enum Blocked {
    /// A yielded event, control or waitable.
    Ready(Event),
    /// Suspended until this delegate completes.
    Delegated(CoroId),
    /// Suspended until this coroutine completes.
    Joining(CoroId),
    /// Event taken out for resolution.
    Running,
}

#[derive(Debug)]
struct Thread {
    coro: Coroutine,
    blocked: Blocked,
}

/// A coroutine raised instead of yielding.
struct Failure {
    coro: CoroId,
    error: Error,
}

enum Fault {
    /// Raised by a coroutine; routed to its delegator if it has one.
    Thread(Failure),
    /// Raised outside any coroutine (interrupt, deadlock, wait failure);
    /// delivered to the root.
    External(Error),
}

impl From<Failure> for Fault {
    fn from(failure: Failure) -> Self {
        Fault::Thread(failure)
    }
}

/// Drives one root coroutine and everything it spawns.
///
/// Tables live on the instance, so independent schedulers never interfere.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    reactor: Reactor,
    /// Live coroutines in insertion order.
    threads: IndexMap<CoroId, Thread>,
    /// Delegate → delegator.
    delegators: HashMap<CoroId, CoroId>,
    /// Awaited coroutine → joiners, in join order.
    joiners: HashMap<CoroId, Vec<CoroId>>,
    root: Option<CoroId>,
    root_value: Value,
}

impl Scheduler {
    pub fn new() -> Result<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self> {
        Ok(Self {
            config,
            reactor: Reactor::new()?,
            threads: IndexMap::new(),
            delegators: HashMap::new(),
            joiners: HashMap::new(),
            root: None,
            root_value: Value::Null,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handle for interrupting `run()` from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.reactor.interrupt_handle()
    }

    /// Number of registered coroutines. Zero whenever `run()` has returned.
    pub fn live_count(&self) -> usize {
        self.threads.len()
    }

    /// Run `root` and its descendants until the thread table is empty.
    ///
    /// Returns the root's return value. An error raised by a coroutine with
    /// no delegator escapes unchanged after every other coroutine has been
    /// closed.
    pub fn run(&mut self, root: Coroutine) -> Result<Value> {
        let root_id = root.id();
        debug!(root = %root_id, "scheduler start");

        self.root = Some(root_id);
        self.root_value = Value::Null;
        self.insert(root);

        let outcome = self.drive(root_id);
        self.teardown();
        self.root = None;

        match outcome {
            Ok(()) => {
                debug!(root = %root_id, "scheduler finished");
                Ok(std::mem::take(&mut self.root_value))
            }
            Err(err) => {
                debug!(root = %root_id, error = %err, "scheduler aborted");
                Err(err)
            }
        }
    }

    fn drive(&mut self, root: CoroId) -> Result<()> {
        while !self.threads.is_empty() {
            let fault = match self.settle() {
                Ok(()) => self.wait_and_fire().err(),
                Err(failure) => Some(Fault::Thread(failure)),
            };

            match fault {
                None => {}
                Some(Fault::Thread(failure)) => {
                    if let Some(err) = self.route_failure(failure) {
                        return Err(err);
                    }
                }
                Some(Fault::External(err)) => self.deliver_to_root(root, err)?,
            }
        }
        Ok(())
    }

    /// Resolve control events until a full pass finds none.
    fn settle(&mut self) -> std::result::Result<(), Failure> {
        loop {
            let mut progressed = false;
            let ids: Vec<CoroId> = self.threads.keys().copied().collect();

            for id in ids {
                let Some(event) = self.take_control_event(id) else {
                    continue;
                };
                progressed = true;
                self.resolve(id, event)?;
            }

            if !progressed {
                return Ok(());
            }
        }
    }

    fn take_control_event(&mut self, id: CoroId) -> Option<Event> {
        let thread = self.threads.get_mut(&id)?;
        match &thread.blocked {
            Blocked::Ready(event) if !event.is_waitable() => {}
            _ => return None,
        }
        match std::mem::replace(&mut thread.blocked, Blocked::Running) {
            Blocked::Ready(event) => Some(event),
            _ => None,
        }
    }

    fn resolve(&mut self, id: CoroId, event: Event) -> std::result::Result<(), Failure> {
        trace!(coro = %id, event = event.kind(), "resolve");
        match event {
            Event::Value(value) => self.advance(id, Resume::Value(value)),
            Event::Exception(err) => self.advance(id, Resume::Throw(err)),
            Event::Spawn(child) => {
                debug!(parent = %id, child = %child.id(), "spawn");
                self.insert(child);
                self.advance(id, Resume::Value(Value::Null))
            }
            Event::Delegation(child) => {
                let child_id = child.id();
                trace!(parent = %id, child = %child_id, "delegate");
                self.set_blocked(id, Blocked::Delegated(child_id));
                self.insert(child);
                self.delegators.insert(child_id, id);
                Ok(())
            }
            Event::Return(value) => {
                self.complete(id, value);
                Ok(())
            }
            Event::Join(target) => {
                if self.threads.contains_key(&target) {
                    self.set_blocked(id, Blocked::Joining(target));
                    self.joiners.entry(target).or_default().push(id);
                } else {
                    self.set_ready(id, Event::Value(Value::Null));
                }
                Ok(())
            }
            Event::Kill(target) => {
                self.set_ready(id, Event::Value(Value::Null));
                self.kill(target);
                Ok(())
            }
            waitable => {
                self.set_ready(id, waitable);
                Ok(())
            }
        }
    }

    /// Run a coroutine to its next yield and record the new event.
    fn advance(&mut self, id: CoroId, resume: Resume) -> std::result::Result<(), Failure> {
        let catch_panics = self.config.catch_panics;
        let Some(thread) = self.threads.get_mut(&id) else {
            return Ok(());
        };

        match thread.coro.resume(resume, catch_panics) {
            Step::Yielded(event) => {
                trace!(coro = %id, event = event.kind(), "yield");
                thread.blocked = Blocked::Ready(event);
                Ok(())
            }
            Step::Complete(Ok(value)) => {
                self.complete(id, value);
                Ok(())
            }
            Step::Complete(Err(error)) => {
                debug!(coro = %id, error = %error, "coroutine raised");
                self.threads.shift_remove(&id);
                self.wake_joiners(id);
                Err(Failure { coro: id, error })
            }
        }
    }

    /// Remove a finished coroutine, hand `value` to its delegator and
    /// release its joiners.
    fn complete(&mut self, id: CoroId, value: Value) {
        if self.threads.shift_remove(&id).is_none() {
            return;
        }
        trace!(coro = %id, "complete");

        if let Some(parent) = self.delegators.remove(&id) {
            self.set_ready(parent, Event::Value(value));
        } else if self.root == Some(id) {
            self.root_value = value;
        }
        self.wake_joiners(id);
    }

    fn wake_joiners(&mut self, id: CoroId) {
        if let Some(parents) = self.joiners.remove(&id) {
            for parent in parents {
                if matches!(self.blocked(parent), Some(Blocked::Joining(t)) if *t == id) {
                    self.set_ready(parent, Event::Value(Value::Null));
                }
            }
        }
    }

    /// Unschedule `target` and its delegation chain, bottom first. Every
    /// level completes with `Null`.
    fn kill(&mut self, target: CoroId) {
        if !self.threads.contains_key(&target) {
            trace!(coro = %target, "kill of finished coroutine ignored");
            return;
        }

        let mut chain = vec![target];
        let mut current = target;
        while let Some(Blocked::Delegated(child)) = self.blocked(current) {
            current = *child;
            chain.push(current);
        }

        debug!(coro = %target, depth = chain.len(), "kill");
        for id in chain.into_iter().rev() {
            self.complete(id, Value::Null);
        }
    }

    /// Deliver a coroutine's error to its delegator, or hand it back when
    /// nobody is waiting for it.
    fn route_failure(&mut self, failure: Failure) -> Option<Error> {
        match self.delegators.remove(&failure.coro) {
            Some(parent) => {
                self.set_ready(parent, Event::Exception(failure.error));
                None
            }
            None => Some(failure.error),
        }
    }

    /// Close everything but the root and raise `err` inside it.
    fn deliver_to_root(&mut self, root: CoroId, err: Error) -> Result<()> {
        debug!(error = %err, "delivering external error to root");
        let Some(mut root_thread) = self.threads.shift_remove(&root) else {
            return Err(err);
        };
        self.teardown();
        root_thread.blocked = Blocked::Ready(Event::Exception(err));
        self.threads.insert(root, root_thread);
        Ok(())
    }

    /// One readiness wait, then fire whatever became ready.
    fn wait_and_fire(&mut self) -> std::result::Result<(), Fault> {
        if self.threads.is_empty() {
            return Ok(());
        }

        let mut deadline: Option<Instant> = None;
        let mut sleepers: Vec<CoroId> = Vec::new();
        let mut interests: Vec<(RawFd, Interest)> = Vec::new();
        let mut owners: Vec<CoroId> = Vec::new();
        let mut immediate: Vec<CoroId> = Vec::new();

        for (id, thread) in &self.threads {
            let Blocked::Ready(event) = &thread.blocked else {
                continue;
            };
            let Some(waitable) = event.as_waitable() else {
                continue;
            };
            match waitable.readiness() {
                Readiness::At(wakeup) => {
                    deadline = Some(deadline.map_or(wakeup, |d| d.min(wakeup)));
                    sleepers.push(*id);
                }
                Readiness::Fd(fd, interest) => {
                    interests.push((fd, interest));
                    owners.push(*id);
                }
                Readiness::Immediate => immediate.push(*id),
            }
        }

        if sleepers.is_empty() && owners.is_empty() && immediate.is_empty() {
            if self.config.detect_deadlock {
                return Err(Fault::External(Error::Deadlock(self.threads.len())));
            }
            debug!(live = self.threads.len(), "nothing waitable; waiting for interrupt");
        }

        let timeout = if !immediate.is_empty() {
            Some(Duration::ZERO)
        } else {
            deadline.map(|d| d.saturating_duration_since(Instant::now()))
        };

        trace!(fds = interests.len(), sleepers = sleepers.len(), ?timeout, "wait");
        let ready = self
            .reactor
            .wait(&interests, timeout)
            .map_err(|e| Fault::External(e.into()))?;

        if self.reactor.take_interrupt() {
            return Err(Fault::External(Error::Interrupted));
        }

        let fired = immediate
            .into_iter()
            .chain(ready.into_iter().map(|i| owners[i]));
        for id in fired {
            self.fire(id)?;
        }

        let now = Instant::now();
        for id in sleepers {
            let elapsed = matches!(
                self.blocked(id),
                Some(Blocked::Ready(Event::Sleep(s))) if s.wakeup() <= now
            );
            if elapsed {
                self.advance(id, Resume::Value(Value::Null))?;
            }
        }
        Ok(())
    }

    /// Fire a ready waitable and resume its owner. Socket errors abort only
    /// the owning coroutine.
    fn fire(&mut self, id: CoroId) -> std::result::Result<(), Failure> {
        let outcome = match self.threads.get_mut(&id) {
            Some(Thread {
                blocked: Blocked::Ready(event),
                ..
            }) => match event.as_waitable_mut() {
                Some(waitable) => waitable.fire(),
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        match outcome {
            Ok(Some(value)) => self.advance(id, Resume::Value(value)),
            Ok(None) => Ok(()),
            Err(err) => {
                if error::is_disconnect(&err) {
                    debug!(coro = %id, error = %err, "peer disconnected");
                } else {
                    error!(coro = %id, error = %err, "I/O error; aborting coroutine");
                }
                self.set_ready(id, Event::Return(Value::Null));
                Ok(())
            }
        }
    }

    fn insert(&mut self, coro: Coroutine) {
        let id = coro.id();
        self.threads.insert(
            id,
            Thread {
                coro,
                blocked: Blocked::Ready(Event::Value(Value::Null)),
            },
        );
    }

    fn blocked(&self, id: CoroId) -> Option<&Blocked> {
        self.threads.get(&id).map(|t| &t.blocked)
    }

    fn set_blocked(&mut self, id: CoroId, blocked: Blocked) {
        if let Some(thread) = self.threads.get_mut(&id) {
            thread.blocked = blocked;
        }
    }

    fn set_ready(&mut self, id: CoroId, event: Event) {
        self.set_blocked(id, Blocked::Ready(event));
    }

    /// Close every registered coroutine without running it further.
    fn teardown(&mut self) {
        if !self.threads.is_empty() {
            debug!(live = self.threads.len(), "closing remaining coroutines");
        }
        for (_, thread) in self.threads.drain(..) {
            drop(thread);
        }
        self.delegators.clear();
        self.joiners.clear();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Run `root` on a fresh scheduler with the default configuration.
pub fn run(root: Coroutine) -> Result<Value> {
    Scheduler::new()?.run(root)
}
