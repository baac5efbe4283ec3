use std::{net::SocketAddr, rc::Rc, sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{event, Level};
use uma_http::{App, ContinueHook, ErrorHandler, ErrorStream, HttpConfig, HttpSession};
use uma_mio::net::tcp::{ConnectionInfo, Session, SessionFactory};

use crate::{bind::parse_binds, BindTarget};

/// Default number of worker threads.
pub const DEFAULT_THREAD_COUNT: usize = 2;

/// Default grace period for connections to finish on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Low-level handler creating the session for a connection, replacing the HTTP layer.
pub type ConnectionHandler = Arc<dyn Fn(&ConnectionInfo) -> Box<dyn Session> + Send + Sync>;

/// Server options, as gathered by a command line or configuration front-end.
#[derive(Default, Clone)]
pub struct ServerOptions {
    pub thread_count: Option<usize>,
    /// Addresses to listen on, as `host:port`.
    pub bind: Vec<String>,
    pub app: Option<App>,
    pub connection_handler: Option<ConnectionHandler>,
    pub error_handler: Option<ErrorHandler>,
    pub error_stream: Option<ErrorStream>,
    pub shutdown_timeout: Option<Duration>,
    pub should_continue: Option<ContinueHook>,
    /// Largest request body accepted, see `HttpConfig::max_body_size`.
    pub max_body_size: Option<usize>,
}

/// Validated server configuration, shared read-only by all workers.
pub struct ServerConfig {
    pub thread_count: usize,
    pub bind_targets: Vec<BindTarget>,
    pub shutdown_timeout: Duration,
    pub error_stream: Option<ErrorStream>,
    addrs: Vec<SocketAddr>,
    handler: Handler,
}

enum Handler {
    Connection(ConnectionHandler),
    Http(Arc<HttpConfig>),
    None,
}

impl ServerConfig {
    pub fn new(options: ServerOptions) -> Result<Self, ConfigError> {
        let thread_count = options.thread_count.unwrap_or(DEFAULT_THREAD_COUNT);
        if thread_count == 0 {
            return Err(ConfigError::ZeroThreads);
        }

        let bind_targets = parse_binds(&options.bind)?;
        let addrs = bind_targets
            .iter()
            .map(BindTarget::resolve)
            .collect::<Result<_, _>>()?;

        let handler = match (options.connection_handler, options.app) {
            (Some(handler), _) => Handler::Connection(handler),
            (None, Some(app)) => {
                let mut http = HttpConfig::new(app);
                http.error_handler = options.error_handler;
                http.error_stream = options.error_stream.clone();
                if let Some(should_continue) = options.should_continue {
                    http.should_continue = should_continue;
                }
                if let Some(max_body_size) = options.max_body_size {
                    http.max_body_size = max_body_size;
                }
                Handler::Http(Arc::new(http))
            }
            (None, None) => Handler::None,
        };

        let config = Self {
            thread_count,
            bind_targets,
            shutdown_timeout: options
                .shutdown_timeout
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
            error_stream: options.error_stream,
            addrs,
            handler,
        };
        Ok(config)
    }

    /// Resolved addresses of the bind targets, in the same order.
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Create the factory a worker's acceptors use to start sessions.
    pub(crate) fn session_factory(&self) -> SessionFactory {
        match &self.handler {
            Handler::Connection(handler) => {
                let handler = handler.clone();
                Rc::new(move |info: &ConnectionInfo| Some(handler(info)))
            }
            Handler::Http(http) => {
                let http = http.clone();
                Rc::new(move |info: &ConnectionInfo| {
                    let session: Box<dyn Session> = Box::new(HttpSession::new(http.clone(), *info));
                    Some(session)
                })
            }
            Handler::None => Rc::new(|info: &ConnectionInfo| {
                event!(Level::DEBUG, peer_addr = %info.peer_addr, "no handler configured");
                None
            }),
        }
    }
}

/// Invalid server configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid bind spec {0:?}, expected host:port")]
    InvalidBindSpec(String),
    #[error("failed to resolve {target}")]
    Resolve {
        target: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no address found for {0}")]
    NoAddress(String),
    #[error("thread count must be at least 1")]
    ZeroThreads,
}
