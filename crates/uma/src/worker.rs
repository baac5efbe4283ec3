use std::{
    net::SocketAddr,
    ops::ControlFlow,
    rc::Rc,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{Context, Error};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use mio::Waker;
use tracing::{event, span, Level};
use uma_mio::{net::tcp, run_event_loop, Registry};
use uma_rt::{Actor, Runtime, TaskSet};

use crate::{graceful_stop, ServerConfig, ServerError};

/// Token asking a worker to stop.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StopToken;

/// Handle to a running worker thread.
pub(crate) struct WorkerHandle {
    index: usize,
    stop: Sender<StopToken>,
    waker: Arc<Waker>,
    local_addrs: Vec<SocketAddr>,
    thread: JoinHandle<()>,
}

/// Worker thread that hasn't reported back from startup yet.
pub(crate) struct PendingWorker {
    index: usize,
    stop: Sender<StopToken>,
    ready: Receiver<Result<Ready, Error>>,
    thread: JoinHandle<()>,
}

struct Ready {
    waker: Arc<Waker>,
    local_addrs: Vec<SocketAddr>,
}

/// Spawn a worker thread, it binds its listeners and then reports back through the handle.
pub(crate) fn spawn_worker(
    index: usize,
    config: Arc<ServerConfig>,
) -> Result<PendingWorker, ServerError> {
    let (stop, stop_receiver) = crossbeam_channel::unbounded();
    let (ready_sender, ready) = crossbeam_channel::bounded(1);

    let thread = thread::Builder::new()
        .name(format!("uma-worker-{}", index))
        .spawn(move || {
            let span = span!(Level::INFO, "worker", index);
            let _entered = span.enter();

            if let Err(error) = run_worker(&config, stop_receiver, ready_sender) {
                event!(Level::ERROR, "worker failed:\n{:?}", error);
            }
        })
        .map_err(ServerError::Spawn)?;

    Ok(PendingWorker {
        index,
        stop,
        ready,
        thread,
    })
}

impl PendingWorker {
    /// Wait for the worker to have started its listeners.
    pub(crate) fn wait_ready(self) -> Result<WorkerHandle, ServerError> {
        let ready = self
            .ready
            .recv()
            .context("worker exited during startup")
            .and_then(|result| result);

        match ready {
            Ok(ready) => Ok(WorkerHandle {
                index: self.index,
                stop: self.stop,
                waker: ready.waker,
                local_addrs: ready.local_addrs,
                thread: self.thread,
            }),
            Err(error) => {
                join(self.index, self.thread);
                Err(ServerError::Worker(error))
            }
        }
    }
}

impl WorkerHandle {
    pub(crate) fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Ask the worker to start its graceful shutdown.
    pub(crate) fn stop(&self) {
        if self.stop.send(StopToken).is_err() {
            event!(Level::DEBUG, index = self.index, "worker already gone");
            return;
        }

        if let Err(error) = self.waker.wake() {
            event!(Level::WARN, ?error, "failed to wake worker");
        }
    }

    /// Wait for the worker thread to exit.
    pub(crate) fn join(self) {
        join(self.index, self.thread);
    }
}

fn join(index: usize, thread: JoinHandle<()>) {
    if thread.join().is_err() {
        event!(Level::ERROR, index, "worker thread panicked");
    }
}

fn run_worker(
    config: &ServerConfig,
    stop: Receiver<StopToken>,
    ready: Sender<Result<Ready, Error>>,
) -> Result<(), Error> {
    let mut rt = Runtime::default();
    let registry = Registry::new()?;
    let acceptors = TaskSet::default();

    match start_worker(&mut rt, &registry, config, stop, &acceptors) {
        Ok(started) => {
            ready.send(Ok(started)).context("coordinator gone")?;
        }
        Err(error) => {
            // Close listeners that did get bound before reporting
            acceptors.cancel_all();
            rt.process()?;

            ready.send(Err(error)).context("coordinator gone")?;
            return Ok(());
        }
    }

    run_event_loop(&mut rt, &registry)?;

    event!(Level::INFO, "worker stopped");
    Ok(())
}

fn start_worker(
    rt: &mut Runtime,
    registry: &Rc<Registry>,
    config: &ServerConfig,
    stop: Receiver<StopToken>,
    acceptors: &TaskSet,
) -> Result<Ready, Error> {
    let connections = TaskSet::default();
    let sessions = config.session_factory();

    let mut local_addrs = Vec::new();
    for addr in config.addrs() {
        let info = tcp::listen(
            rt,
            registry,
            *addr,
            sessions.clone(),
            acceptors,
            connections.clone(),
        )?;
        local_addrs.push(info.local_addr);
    }

    let signal = rt.signal();
    let waker = registry.waker(signal.clone())?;

    let actor = Worker {
        registry: registry.clone(),
        stop,
        acceptors: acceptors.clone(),
        connections,
        shutdown_timeout: config.shutdown_timeout,
    };
    let id = rt.insert("worker", actor);
    signal.set_id(id);

    Ok(Ready { waker, local_addrs })
}

struct Worker {
    registry: Rc<Registry>,
    stop: Receiver<StopToken>,
    acceptors: TaskSet,
    connections: TaskSet,
    shutdown_timeout: Duration,
}

impl Actor for Worker {
    fn process(&mut self, rt: &mut Runtime) -> Result<ControlFlow<()>, Error> {
        match self.stop.try_recv() {
            Ok(StopToken) => event!(Level::INFO, "stopping worker"),
            Err(TryRecvError::Disconnected) => {
                event!(Level::WARN, "coordinator gone, stopping worker")
            }
            Err(TryRecvError::Empty) => return Ok(ControlFlow::Continue(())),
        }

        graceful_stop(
            rt,
            &self.registry,
            self.acceptors.clone(),
            self.connections.clone(),
            self.shutdown_timeout,
        )?;

        Ok(ControlFlow::Break(()))
    }
}
