use std::{
    io,
    sync::{atomic::AtomicBool, Arc},
    thread::{self, JoinHandle},
};

use signal_hook::{
    consts::{SIGINT, SIGTERM},
    flag,
    iterator::{Handle, Signals},
    low_level, SigId,
};
use tracing::{event, Level};

use crate::{Termination, Terminator};

const TERMINATION_SIGNALS: [i32; 2] = [SIGTERM, SIGINT];

/// Process-wide listener forwarding SIGTERM and SIGINT as termination requests.
///
/// Only the first delivery is forwarded. A second one while the listener is installed exits the
/// process, so a stuck shutdown can still be interrupted.
pub struct TerminationListener {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
    flags: Vec<SigId>,
}

impl TerminationListener {
    pub fn install(terminator: Terminator) -> Result<Self, io::Error> {
        let mut flags = Vec::new();

        // The conditional exit is registered first, so it only sees the flag set by an
        // earlier delivery
        let terminating = Arc::new(AtomicBool::new(false));
        for signal in TERMINATION_SIGNALS {
            flags.push(flag::register_conditional_shutdown(
                signal,
                1,
                terminating.clone(),
            )?);
            flags.push(flag::register(signal, terminating.clone())?);
        }

        let mut signals = Signals::new(TERMINATION_SIGNALS)?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("uma-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    event!(Level::INFO, signal, "termination signal received");
                    terminator.send(Termination::Signal(signal));
                }
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
            flags,
        })
    }

    /// Remove the signal handlers again.
    pub fn uninstall(self) {
        drop(self);
    }
}

impl Drop for TerminationListener {
    fn drop(&mut self) {
        self.handle.close();

        for id in self.flags.drain(..) {
            low_level::unregister(id);
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                event!(Level::ERROR, "signal thread panicked");
            }
        }
    }
}
