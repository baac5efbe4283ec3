use std::{net::SocketAddr, sync::Arc};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{event, instrument, Level};

use crate::{
    worker::{spawn_worker, WorkerHandle},
    ConfigError, ServerConfig, ServerOptions, TerminationListener,
};

/// Reason a server was asked to terminate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A process signal was delivered.
    Signal(i32),
    /// Termination was requested through a `Terminator`.
    Requested,
}

/// Clonable handle for requesting termination of a server.
#[derive(Clone)]
pub struct Terminator {
    sender: Sender<Termination>,
}

impl Terminator {
    pub fn terminate(&self) {
        self.send(Termination::Requested);
    }

    pub(crate) fn send(&self, termination: Termination) {
        // The server only drops its receiver when it's gone itself
        let _ = self.sender.send(termination);
    }
}

/// Pool of worker threads serving the configured listeners.
pub struct Server {
    config: Arc<ServerConfig>,
    workers: Vec<WorkerHandle>,
    termination: (Sender<Termination>, Receiver<Termination>),
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            workers: Vec::new(),
            termination: crossbeam_channel::unbounded(),
        }
    }

    /// Validate `options` and create a server from them.
    pub fn from_options(options: ServerOptions) -> Result<Self, ServerError> {
        let config = ServerConfig::new(options)?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start all worker threads.
    ///
    /// Returns once every worker has bound its listeners. If any worker fails to start, the
    /// others are stopped again and the failure is returned.
    #[instrument("Server::start", skip_all)]
    pub fn start(&mut self) -> Result<(), ServerError> {
        if !self.workers.is_empty() {
            return Err(ServerError::AlreadyStarted);
        }

        let count = self.config.thread_count;
        event!(Level::INFO, count, binds = ?self.config.bind_targets, "starting workers");

        let mut pending = Vec::with_capacity(count);
        let mut failure = None;
        for index in 0..count {
            match spawn_worker(index, self.config.clone()) {
                Ok(worker) => pending.push(worker),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        for worker in pending {
            match worker.wait_ready() {
                Ok(worker) => self.workers.push(worker),
                Err(error) => {
                    failure.get_or_insert(error);
                }
            }
        }

        if let Some(error) = failure {
            event!(Level::ERROR, "failed to start workers: {:?}", error);
            self.stop();
            return Err(error);
        }

        Ok(())
    }

    /// Addresses the first worker is listening on, in bind order.
    ///
    /// All workers listen on the same addresses, unless a bind target requested port 0.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.workers
            .first()
            .map(|worker| worker.local_addrs().to_vec())
            .unwrap_or_default()
    }

    pub fn terminator(&self) -> Terminator {
        Terminator {
            sender: self.termination.0.clone(),
        }
    }

    /// Block until termination is requested.
    pub fn wait(&self) -> Termination {
        // The receiver can't disconnect, the server holds a sender itself
        self.termination
            .1
            .recv()
            .unwrap_or(Termination::Requested)
    }

    /// Stop all workers gracefully, and wait for them to exit.
    ///
    /// Does nothing if no workers are running.
    #[instrument("Server::stop", skip_all)]
    pub fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        event!(Level::INFO, count = self.workers.len(), "stopping workers");
        for worker in &self.workers {
            worker.stop();
        }
        for worker in self.workers.drain(..) {
            worker.join();
        }
        event!(Level::INFO, "all workers stopped");
    }

    /// Start the server and serve until a termination signal arrives, then stop.
    pub fn run(&mut self) -> Result<Termination, ServerError> {
        self.start()?;

        let listener = match TerminationListener::install(self.terminator()) {
            Ok(listener) => listener,
            Err(error) => {
                self.stop();
                return Err(ServerError::Signals(error));
            }
        };
        let termination = self.wait();
        event!(Level::INFO, ?termination, "termination requested");

        listener.uninstall();
        self.stop();

        Ok(termination)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Failure to start or run a server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
    #[error("worker failed to start")]
    Worker(#[source] anyhow::Error),
    #[error("failed to install signal handlers")]
    Signals(#[source] std::io::Error),
    #[error("server already started")]
    AlreadyStarted,
}
