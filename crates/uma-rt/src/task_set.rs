use std::{cell::RefCell, collections::HashMap, rc::Rc};

use tracing::{event, Level};

use crate::{Id, Sender, Signal};

/// Cancellation request delivered to a task.
///
/// A task receiving this must release what it owns and stop at its next processing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancel;

/// Set of live tasks owned by one thread, with a way to cancel each of them.
///
/// Tasks join a set through a `TaskGuard` and leave it when that guard is dropped, which happens
/// no matter how the task ends.
#[derive(Clone, Default)]
pub struct TaskSet {
    inner: Rc<RefCell<TaskSetInner>>,
}

#[derive(Default)]
struct TaskSetInner {
    tasks: HashMap<Id, Sender<Cancel>>,
    watcher: Option<Signal>,
}

impl TaskSet {
    /// Set the `Signal` to be sent whenever a task leaves this set.
    pub fn set_signal(&self, signal: Signal) {
        self.inner.borrow_mut().watcher = Some(signal);
    }

    /// Add a task to the set.
    pub fn insert(&self, id: Id, cancel: Sender<Cancel>) {
        self.inner.borrow_mut().tasks.insert(id, cancel);
    }

    /// Remove a task from the set, notifying the watcher.
    pub fn remove(&self, id: Id) {
        let watcher = {
            let mut inner = self.inner.borrow_mut();
            if inner.tasks.remove(&id).is_none() {
                return;
            }
            inner.watcher.clone()
        };

        if let Some(watcher) = watcher {
            if let Err(error) = watcher.send() {
                event!(Level::TRACE, ?error, "task set watcher gone");
            }
        }
    }

    /// Send a cancellation to every task currently in the set.
    ///
    /// Tasks that already left the set are not touched. Returns the number of tasks signalled.
    pub fn cancel_all(&self) -> usize {
        let senders: Vec<_> = self.inner.borrow().tasks.values().cloned().collect();

        for sender in &senders {
            // A task may be between finishing and dropping its guard, that's fine
            if let Err(error) = sender.send(Cancel) {
                event!(Level::TRACE, ?error, "task already gone");
            }
        }

        senders.len()
    }

    /// Check if a task is in the set.
    pub fn contains(&self, id: Id) -> bool {
        self.inner.borrow().tasks.contains_key(&id)
    }

    /// Ids of all tasks in the set.
    pub fn ids(&self) -> Vec<Id> {
        self.inner.borrow().tasks.keys().cloned().collect()
    }

    /// Number of tasks in the set.
    pub fn len(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Returns true if no tasks are in the set.
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().tasks.is_empty()
    }
}

/// Membership of a task in a `TaskSet`, removing the task from the set on drop.
///
/// Create it before inserting the actor and store it in the actor. After insertion, bind the
/// signal with `Signal::set_id` and add the task with `TaskSet::insert`.
pub struct TaskGuard {
    set: TaskSet,
    signal: Signal,
}

impl TaskGuard {
    /// Create a guard that tracks the actor `signal` will be bound to.
    pub fn new(set: TaskSet, signal: Signal) -> Self {
        Self { set, signal }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(id) = self.signal.id() {
            self.set.remove(id);
        }
    }
}
