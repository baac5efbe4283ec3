use std::{
    cell::Cell,
    ops::ControlFlow,
    rc::Rc,
    time::Duration,
};

use anyhow::Error;
use uma_mio::{Registry, TimerRef};
use uma_rt::{mailbox, Actor, Cancel, Mailbox, Runtime, TaskGuard, TaskSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Finished,
    Cancelled,
}

pub type OutcomeRef = Rc<Cell<Option<Outcome>>>;

/// Task in `set` that finishes by itself after `finish_after`, or never if `None`.
pub fn given_task(
    rt: &mut Runtime,
    registry: &Registry,
    set: &TaskSet,
    finish_after: Option<Duration>,
) -> OutcomeRef {
    let outcome = OutcomeRef::default();

    let signal = rt.signal();
    let (cancel, cancel_sender) = mailbox();
    cancel.set_signal(signal.clone());

    let actor = TaskActor {
        cancel,
        _guard: TaskGuard::new(set.clone(), signal.clone()),
        timer: finish_after.map(|duration| registry.timer(duration, signal.clone())),
        outcome: outcome.clone(),
    };
    let id = rt.insert("task-actor", actor);
    signal.set_id(id);
    set.insert(id, cancel_sender);

    outcome
}

struct TaskActor {
    cancel: Mailbox<Cancel>,
    _guard: TaskGuard,
    timer: Option<TimerRef>,
    outcome: OutcomeRef,
}

impl Actor for TaskActor {
    fn process(&mut self, _rt: &mut Runtime) -> Result<ControlFlow<()>, Error> {
        if self.cancel.recv()?.is_some() {
            self.outcome.set(Some(Outcome::Cancelled));
            return Ok(ControlFlow::Break(()));
        }

        if self.timer.as_ref().map_or(false, TimerRef::is_elapsed) {
            self.outcome.set(Some(Outcome::Finished));
            return Ok(ControlFlow::Break(()));
        }

        Ok(ControlFlow::Continue(()))
    }
}
