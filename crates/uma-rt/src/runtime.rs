use std::{
    cell::RefCell,
    collections::{HashSet, VecDeque},
    ops::ControlFlow,
    rc::Rc,
};

use anyhow::{Context, Error};
use thiserror::Error;
use thunderdome::{Arena, Index};
use tracing::{event, instrument, span, Level};

use crate::Signal;

/// A task living in a `Runtime`.
pub trait Actor: 'static {
    /// Run until the actor has nothing left to do for now.
    ///
    /// Called once per received signal, however many signals arrived in between. `Break` ends the
    /// task. An `Err` ends the task too, after being logged, without affecting any other task.
    ///
    /// Cleanup belongs in `Drop`, which runs however the task ends.
    fn process(&mut self, rt: &mut Runtime) -> Result<ControlFlow<()>, Error>;
}

/// Thread-local task tracking and execution system.
#[derive(Default)]
pub struct Runtime {
    slots: Arena<Slot>,
    schedule: Rc<RefCell<Schedule>>,
}

struct Slot {
    name: &'static str,
    /// Empty while the actor is being processed.
    actor: Option<Box<dyn Actor>>,
}

/// FIFO of actors waiting to be processed, shared with every `Signal`.
#[derive(Default)]
pub(crate) struct Schedule {
    pending: VecDeque<Id>,
    /// Mirrors `pending`, so repeated signals don't enqueue an actor twice.
    queued: HashSet<Id>,
}

impl Schedule {
    pub(crate) fn enqueue(&mut self, id: Id) {
        if !self.queued.insert(id) {
            return;
        }

        self.pending.push_back(id);
    }

    fn forget(&mut self, id: Id) {
        if self.queued.remove(&id) {
            self.pending.retain(|pending| *pending != id);
        }
    }

    fn pop(&mut self) -> Option<Id> {
        let id = self.pending.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }
}

impl Runtime {
    /// Create a new unbound `Signal` for this runtime.
    ///
    /// Bind it with `Signal::set_id` once the actor it should wake has been inserted.
    pub fn signal(&self) -> Signal {
        Signal::new(Rc::downgrade(&self.schedule))
    }

    /// Add an actor, identified in logs by `name`.
    ///
    /// Nothing runs until one of the actor's signals is sent.
    #[instrument("Runtime::insert", level = "debug", skip_all)]
    pub fn insert<A>(&mut self, name: &'static str, actor: A) -> Id
    where
        A: Actor,
    {
        let index = self.slots.insert(Slot {
            name,
            actor: Some(Box::new(actor)),
        });
        event!(Level::DEBUG, name, "actor added");

        Id { index }
    }

    /// Drop an actor and any pending wakeup for it.
    #[instrument("Runtime::remove", level = "debug", skip_all)]
    pub fn remove(&mut self, id: Id) -> Result<(), RemoveError> {
        self.schedule.borrow_mut().forget(id);

        let slot = self.slots.remove(id.index).ok_or(RemoveError::NotFound)?;
        event!(Level::DEBUG, name = slot.name, "actor dropped");

        // Dropping may send signals, so this can't happen with the schedule borrowed
        drop(slot);

        Ok(())
    }

    /// Check if an actor is still alive in this runtime.
    pub fn contains(&self, id: Id) -> bool {
        self.slots.contains(id.index)
    }

    /// Number of actors alive in this runtime.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no actors are alive in this runtime.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run scheduled actors until the schedule is empty.
    ///
    /// Actors signalled while this runs are processed in the same call.
    #[instrument("Runtime::process", level = "debug", skip_all)]
    pub fn process(&mut self) -> Result<(), ProcessError> {
        while let Some(id) = self.next_scheduled() {
            self.step(id).context("failed to step actor")?;
        }

        Ok(())
    }

    fn next_scheduled(&self) -> Option<Id> {
        self.schedule.borrow_mut().pop()
    }

    fn step(&mut self, id: Id) -> Result<(), InternalError> {
        // Stale wakeup, the actor ended after being signalled
        let Some(slot) = self.slots.get_mut(id.index) else {
            return Ok(());
        };
        let name = slot.name;
        let mut actor = slot.actor.take().context("actor is already being processed")?;

        let span = span!(Level::INFO, "actor", name);
        let _entered = span.enter();

        let result = actor.process(self);

        self.slots
            .get_mut(id.index)
            .context("actor slot removed during processing")?
            .actor = Some(actor);

        let stop = match result {
            Ok(flow) => flow.is_break(),
            Err(error) => {
                event!(Level::ERROR, "actor failed:\n{:?}", error);
                true
            }
        };

        if stop {
            event!(Level::DEBUG, "actor finished");
            self.remove(id).context("failed to remove finished actor")?;
        }

        Ok(())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }

        let leaked: Vec<_> = self.slots.iter().map(|(_, slot)| slot.name).collect();
        event!(Level::WARN, ?leaked, "runtime dropped with actors still alive");
    }
}

/// Handle to an actor in a `Runtime`.
///
/// Ids aren't reused, an id of a removed actor stays invalid.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Id {
    index: Index,
}

/// Error while removing an actor.
#[derive(Error, Debug)]
pub enum RemoveError {
    /// The actor already ended, or never existed.
    #[error("actor not found")]
    NotFound,
}

/// Internal error, this is always a bug in the runtime.
#[derive(Error, Debug)]
#[error("internal runtime error")]
pub struct InternalError {
    #[from]
    source: Error,
}

/// Error while processing scheduled actors.
#[derive(Error, Debug)]
#[error("actor processing failed")]
pub struct ProcessError {
    #[from]
    source: Error,
}
