//! Mio based I/O substrate for uma workers.
//!
//! A worker thread owns one `Registry` and one `uma_rt::Runtime`, and drives both with
//! `run_event_loop`. Readiness events, timer deadlines and cross-thread wakeups are all turned into
//! signals for the actors waiting on them.

mod event_loop;
pub mod net;
mod registry;

pub use self::{
    event_loop::run_event_loop,
    registry::{Ready, ReadyRef, Registry, TimerRef},
};
