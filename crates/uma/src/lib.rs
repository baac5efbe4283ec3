//! Multi-threaded HTTP/1.1 server engine.
//!
//! A `Server` runs a fixed pool of worker threads. Every worker owns its own `uma_rt::Runtime`
//! and `uma_mio::Registry`, and binds its own listener for each bind target with port reuse, so
//! the kernel spreads incoming connections over the workers. Workers share nothing but the
//! read-only `ServerConfig`, and are only ever told one thing from outside: to stop.
//!
//! Stopping is graceful. Acceptors are cancelled first, then connections get a grace period to
//! finish on their own before the remaining ones are cancelled.

mod bind;
mod config;
mod server;
mod shutdown;
mod signals;
mod worker;

pub use self::{
    bind::{parse_binds, BindTarget},
    config::{
        ConfigError, ConnectionHandler, ServerConfig, ServerOptions, DEFAULT_SHUTDOWN_TIMEOUT,
        DEFAULT_THREAD_COUNT,
    },
    server::{Server, ServerError, Termination, Terminator},
    shutdown::graceful_stop,
    signals::TerminationListener,
};
pub use uma_http as http;
