use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use anyhow::{anyhow, Context, Error};
use thiserror::Error;
use tracing::instrument;

use crate::{runtime::Schedule, Id};

/// Wakeup handle that schedules one actor on its runtime.
///
/// Clones share the bound id, so a mailbox, a readiness registration and a timer can all be
/// created with the same signal before the actor exists, and bound together afterwards.
#[derive(Clone)]
pub struct Signal {
    schedule: Weak<RefCell<Schedule>>,
    id: Rc<Cell<Option<Id>>>,
}

impl Signal {
    pub(crate) fn new(schedule: Weak<RefCell<Schedule>>) -> Self {
        Self {
            schedule,
            id: Rc::new(Cell::new(None)),
        }
    }

    /// Bind the actor to wake, for this signal and all of its clones.
    pub fn set_id(&self, id: Id) {
        self.id.set(Some(id));
    }

    /// Get the id this signal is bound to, if any.
    pub fn id(&self) -> Option<Id> {
        self.id.get()
    }

    /// Send the signal, scheduling the bound actor for processing.
    #[instrument("Signal::send", level = "trace", skip_all)]
    pub fn send(&self) -> Result<(), SignalError> {
        let Some(id) = self.id.get() else {
            return Err(anyhow!("no id set").into());
        };

        let schedule = self
            .schedule
            .upgrade()
            .context("runtime no longer exists")?;
        schedule.borrow_mut().enqueue(id);

        Ok(())
    }
}

/// Signal couldn't schedule its actor, either because it's unbound or the runtime is gone.
#[derive(Error, Debug)]
#[error("signal delivery failed")]
pub struct SignalError {
    #[from]
    source: Error,
}
