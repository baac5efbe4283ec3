use std::{ops::ControlFlow, rc::Rc, time::Duration};

use anyhow::Error;
use tracing::{event, instrument, Level};
use uma_mio::{Registry, TimerRef};
use uma_rt::{Actor, Id, Runtime, Signal, TaskSet};

/// Start the graceful shutdown of a worker's tasks.
///
/// Acceptors are cancelled right away. Once they have all stopped, connections get `timeout` to
/// finish on their own. Connections still alive after that are cancelled, the ones that finished
/// in time are never touched. The returned task ends when both sets are empty.
#[instrument("graceful_stop", skip_all)]
pub fn graceful_stop(
    rt: &mut Runtime,
    registry: &Rc<Registry>,
    acceptors: TaskSet,
    connections: TaskSet,
    timeout: Duration,
) -> Result<Id, Error> {
    let signal = rt.signal();
    acceptors.set_signal(signal.clone());
    connections.set_signal(signal.clone());

    let count = acceptors.cancel_all();
    event!(Level::DEBUG, count, "cancelling acceptors");

    let actor = GracefulStop {
        registry: registry.clone(),
        signal: signal.clone(),
        acceptors,
        connections,
        timeout,
        phase: Phase::StoppingAcceptors,
    };
    let id = rt.insert("graceful-stop", actor);
    signal.set_id(id);
    signal.send()?;

    Ok(id)
}

struct GracefulStop {
    registry: Rc<Registry>,
    signal: Signal,
    acceptors: TaskSet,
    connections: TaskSet,
    timeout: Duration,
    phase: Phase,
}

enum Phase {
    StoppingAcceptors,
    Draining(TimerRef),
    Cancelling,
}

impl Actor for GracefulStop {
    fn process(&mut self, _rt: &mut Runtime) -> Result<ControlFlow<()>, Error> {
        loop {
            match &self.phase {
                Phase::StoppingAcceptors => {
                    if !self.acceptors.is_empty() {
                        return Ok(ControlFlow::Continue(()));
                    }

                    event!(
                        Level::DEBUG,
                        remaining = self.connections.len(),
                        "acceptors stopped, draining connections"
                    );
                    let timer = self.registry.timer(self.timeout, self.signal.clone());
                    self.phase = Phase::Draining(timer);
                }
                Phase::Draining(timer) => {
                    if self.connections.is_empty() {
                        event!(Level::INFO, "all connections finished");
                        return Ok(ControlFlow::Break(()));
                    }
                    if !timer.is_elapsed() {
                        return Ok(ControlFlow::Continue(()));
                    }

                    let count = self.connections.cancel_all();
                    event!(
                        Level::WARN,
                        count,
                        "grace period elapsed, cancelling remaining connections"
                    );
                    self.phase = Phase::Cancelling;
                }
                Phase::Cancelling => {
                    if self.connections.is_empty() {
                        event!(Level::INFO, "remaining connections cancelled");
                        return Ok(ControlFlow::Break(()));
                    }
                    return Ok(ControlFlow::Continue(()));
                }
            }
        }
    }
}
