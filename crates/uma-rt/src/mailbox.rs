use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use thiserror::Error;

use crate::{Signal, SignalError};

/// Create a message queue, returning its receiving end and a first sender.
pub fn mailbox<M>() -> (Mailbox<M>, Sender<M>) {
    let shared = Rc::new(Shared {
        queue: RefCell::new(VecDeque::new()),
        signal: RefCell::new(None),
        senders: Cell::new(0),
        open: Cell::new(true),
    });
    let sender = Sender::attach(shared.clone());

    (Mailbox { shared }, sender)
}

struct Shared<M> {
    queue: RefCell<VecDeque<M>>,
    signal: RefCell<Option<Signal>>,
    senders: Cell<usize>,
    open: Cell<bool>,
}

/// Receiving end of a *single-threaded* multi-sender message queue.
///
/// Owned by the actor processing the messages. Dropping it closes the queue for all senders.
pub struct Mailbox<M> {
    shared: Rc<Shared<M>>,
}

impl<M> Mailbox<M> {
    /// Set the `Signal` sent whenever a message arrives, replacing any earlier one.
    pub fn set_signal(&self, signal: Signal) {
        *self.shared.signal.borrow_mut() = Some(signal);
    }

    /// Create another `Sender` to this mailbox.
    pub fn sender(&self) -> Sender<M> {
        Sender::attach(self.shared.clone())
    }

    /// Take the next queued message, if any.
    ///
    /// Fails once the queue is empty and every sender is gone, as nothing can arrive anymore and
    /// waiting on it would never end.
    pub fn recv(&self) -> Result<Option<M>, RecvError> {
        if let Some(message) = self.shared.queue.borrow_mut().pop_front() {
            return Ok(Some(message));
        }

        if self.shared.senders.get() == 0 {
            return Err(RecvError::Disconnected);
        }

        Ok(None)
    }
}

impl<M> Drop for Mailbox<M> {
    fn drop(&mut self) {
        self.shared.open.set(false);
        self.shared.queue.borrow_mut().clear();
    }
}

/// Sending end of a mailbox.
pub struct Sender<M> {
    shared: Rc<Shared<M>>,
}

impl<M> Sender<M> {
    fn attach(shared: Rc<Shared<M>>) -> Self {
        shared.senders.set(shared.senders.get() + 1);
        Self { shared }
    }

    /// Queue a message, and signal the actor owning the mailbox.
    pub fn send(&self, message: M) -> Result<(), SendError> {
        if !self.shared.open.get() {
            return Err(SendError::Closed);
        }

        self.shared.queue.borrow_mut().push_back(message);

        let signal = self.shared.signal.borrow().clone();
        if let Some(signal) = signal {
            signal.send()?;
        }

        Ok(())
    }
}

impl<M> Clone for Sender<M> {
    fn clone(&self) -> Self {
        Self::attach(self.shared.clone())
    }
}

impl<M> Drop for Sender<M> {
    fn drop(&mut self) {
        self.shared.senders.set(self.shared.senders.get() - 1);
    }
}

/// Error while receiving messages.
#[derive(Error, Debug)]
pub enum RecvError {
    /// All senders are gone and the queue is empty.
    #[error("all senders dropped")]
    Disconnected,
}

/// Error while sending a message.
#[derive(Error, Debug)]
pub enum SendError {
    /// The receiving mailbox no longer exists.
    #[error("mailbox closed")]
    Closed,
    /// The message was queued, but the owning actor couldn't be woken.
    #[error("failed to notify mailbox owner")]
    Signal(#[from] SignalError),
}
