#![deny(missing_docs)]

//! Single-threaded cooperative task runtime.
//!
//! Every worker thread of the server owns exactly one `Runtime`. Tasks are actors that are only
//! resumed when something signals them, so suspension points are wherever an actor returns from
//! `process`. Nothing in here is `Send`, which keeps all task bookkeeping on its owning thread.

mod mailbox;
mod runtime;
mod signal;
mod task_set;

pub use self::{
    mailbox::{mailbox, Mailbox, RecvError, SendError, Sender},
    runtime::{Actor, Id, InternalError, ProcessError, RemoveError, Runtime},
    signal::{Signal, SignalError},
    task_set::{Cancel, TaskGuard, TaskSet},
};
