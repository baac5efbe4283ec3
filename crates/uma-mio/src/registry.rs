use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{bail, Error};
use mio::{event::Source, Events, Interest, Poll, Token, Waker};
use tracing::{event, Level};
use uma_rt::Signal;

const WAKER_TOKEN: Token = Token(usize::MAX);

/// Shared mio context registry.
///
/// Actors can use an instance of this registry to register wake events, start timers, and get a
/// cross-thread waker.
/// One registry exists per worker thread, and is driven by `run_event_loop`.
pub struct Registry {
    poll: RefCell<Poll>,
    next_token: Cell<usize>,
    ready: RefCell<HashMap<Token, Rc<ReadyState>>>,
    timers: RefCell<Vec<Weak<TimerState>>>,
    waker: RefCell<Option<Signal>>,
}

impl Registry {
    /// Create a new registry with its own mio `Poll` instance.
    pub fn new() -> Result<Rc<Self>, Error> {
        let this = Self {
            poll: RefCell::new(Poll::new()?),
            next_token: Cell::new(0),
            ready: Default::default(),
            timers: Default::default(),
            waker: Default::default(),
        };

        Ok(Rc::new(this))
    }

    pub(crate) fn poll(
        &self,
        events: &mut Events,
        timeout: Option<Duration>,
    ) -> Result<(), std::io::Error> {
        self.poll.borrow_mut().poll(events, timeout)
    }

    pub(crate) fn wake(&self, token: Token, readable: bool, writable: bool) {
        event!(Level::TRACE, ?token, "sending wake");

        let signal = if token == WAKER_TOKEN {
            self.waker.borrow().clone()
        } else {
            let ready = self.ready.borrow();
            ready.get(&token).map(|state| {
                state.readable.set(state.readable.get() | readable);
                state.writable.set(state.writable.get() | writable);
                state.signal.clone()
            })
        };

        // Sources may have been deregistered after the poll returned
        let Some(signal) = signal else {
            event!(Level::TRACE, ?token, "no wake target for token");
            return;
        };

        if let Err(error) = signal.send() {
            event!(Level::TRACE, ?error, "wake target gone");
        }
    }

    /// Time left until the earliest pending timer fires.
    pub(crate) fn next_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut timers = self.timers.borrow_mut();
        timers.retain(|timer| timer.strong_count() > 0);

        timers
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|timer| !timer.fired.get())
            .map(|timer| timer.deadline.saturating_duration_since(now))
            .min()
    }

    pub(crate) fn fire_timers(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();

        self.timers.borrow_mut().retain(|timer| {
            let Some(timer) = timer.upgrade() else {
                return false;
            };

            if timer.deadline > now {
                return true;
            }

            timer.fired.set(true);
            expired.push(timer);
            false
        });

        for timer in expired {
            event!(Level::TRACE, "timer fired");
            if let Err(error) = timer.signal.send() {
                event!(Level::TRACE, ?error, "timer target gone");
            }
        }
    }

    /// Register an event source, sending `signal` whenever it becomes ready.
    ///
    /// The returned `ReadyRef` collects the readiness seen since it was last taken. It starts out
    /// fully ready, so the first processing step after registration attempts I/O.
    pub fn register<S>(
        self: &Rc<Self>,
        source: &mut S,
        interest: Interest,
        signal: Signal,
    ) -> Result<ReadyRef, Error>
    where
        S: Source,
    {
        let token = Token(self.next_token.get());
        self.next_token.set(token.0 + 1);

        self.poll
            .borrow()
            .registry()
            .register(source, token, interest)?;

        let state = Rc::new(ReadyState {
            readable: Cell::new(true),
            writable: Cell::new(true),
            signal,
        });
        self.ready.borrow_mut().insert(token, state.clone());

        let ready = ReadyRef {
            registry: self.clone(),
            token,
            state,
        };
        Ok(ready)
    }

    /// Start a timer, sending `signal` once `duration` has passed.
    ///
    /// Dropping the returned `TimerRef` cancels the timer.
    pub fn timer(&self, duration: Duration, signal: Signal) -> TimerRef {
        let state = Rc::new(TimerState {
            deadline: Instant::now() + duration,
            fired: Cell::new(false),
            signal,
        });
        self.timers.borrow_mut().push(Rc::downgrade(&state));

        TimerRef { state }
    }

    /// Create the waker of this registry, sending `signal` when woken from any thread.
    ///
    /// Only one waker can exist per registry.
    pub fn waker(&self, signal: Signal) -> Result<Arc<Waker>, Error> {
        let mut slot = self.waker.borrow_mut();
        if slot.is_some() {
            bail!("registry already has a waker");
        }

        let waker = Waker::new(self.poll.borrow().registry(), WAKER_TOKEN)?;
        *slot = Some(signal);

        Ok(Arc::new(waker))
    }
}

struct ReadyState {
    readable: Cell<bool>,
    writable: Cell<bool>,
    signal: Signal,
}

/// Registration of an event source in a `Registry`.
pub struct ReadyRef {
    registry: Rc<Registry>,
    token: Token,
    state: Rc<ReadyState>,
}

impl ReadyRef {
    /// Take the readiness accumulated since the last call.
    pub fn take(&self) -> Ready {
        Ready {
            readable: self.state.readable.replace(false),
            writable: self.state.writable.replace(false),
        }
    }

    /// Change the interest of the registered source.
    pub fn reregister<S>(&self, source: &mut S, interest: Interest) -> Result<(), Error>
    where
        S: Source,
    {
        self.registry
            .poll
            .borrow()
            .registry()
            .reregister(source, self.token, interest)?;
        Ok(())
    }

    /// Remove the source from the registry.
    ///
    /// Call this from the owner's `Drop`, before the source itself is closed.
    pub fn deregister<S>(&self, source: &mut S)
    where
        S: Source,
    {
        self.registry.ready.borrow_mut().remove(&self.token);

        if let Err(error) = self.registry.poll.borrow().registry().deregister(source) {
            event!(Level::WARN, ?error, "failed to deregister source");
        }
    }
}

impl Drop for ReadyRef {
    fn drop(&mut self) {
        self.registry.ready.borrow_mut().remove(&self.token);
    }
}

/// Readiness of a registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
}

struct TimerState {
    deadline: Instant,
    fired: Cell<bool>,
    signal: Signal,
}

/// Handle to a running timer, cancelling it when dropped.
pub struct TimerRef {
    state: Rc<TimerState>,
}

impl TimerRef {
    /// Returns true once the timer has fired.
    pub fn is_elapsed(&self) -> bool {
        self.state.fired.get()
    }

    /// Point in time the timer fires at.
    pub fn deadline(&self) -> Instant {
        self.state.deadline
    }
}
