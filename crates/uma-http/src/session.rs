use std::{
    any::Any,
    ops::ControlFlow,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use anyhow::Error;
use tracing::{event, instrument, Level};
use uma_mio::net::tcp::{ConnectionInfo, Session, SessionIo};

use crate::{
    body::Framing,
    parser::{take_line, RequestHead},
    writer::write_response,
    ErrorStream, Extensions, HttpError, ParseError, Request, Response,
};

/// Default limit of a request body's size.
pub const DEFAULT_MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Application callback, called once for every request.
pub type App = Arc<dyn Fn(Request) -> Result<Response, Error> + Send + Sync>;

/// Handler taking over reporting of failed request cycles.
pub type ErrorHandler = Arc<dyn Fn(&HttpError) + Send + Sync>;

/// Decides after each request cycle if the connection should take another request.
pub type ContinueHook = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Shared configuration of the HTTP layer.
#[derive(Clone)]
pub struct HttpConfig {
    pub app: App,
    /// If set, failed request cycles are handed to this instead of being reported and answered
    /// with an error response.
    pub error_handler: Option<ErrorHandler>,
    pub error_stream: Option<ErrorStream>,
    pub should_continue: ContinueHook,
    pub url_scheme: String,
    /// Largest request body accepted, in bytes as framed on the wire.
    pub max_body_size: usize,
}

impl HttpConfig {
    pub fn new(app: App) -> Self {
        Self {
            app,
            error_handler: None,
            error_stream: None,
            should_continue: Arc::new(|_: &Request| true),
            url_scheme: "http".to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

enum State {
    /// Waiting for the first byte of the next request.
    Idle,
    ReadingRequest(RequestHead),
    ReadingBody(RequestHead, Framing),
    /// Waiting for a response to be written out.
    WritingResponse { next: bool },
    Closing,
}

/// HTTP/1.1 request-response cycles over one connection.
pub struct HttpSession {
    config: Arc<HttpConfig>,
    info: ConnectionInfo,
    state: State,
}

impl HttpSession {
    pub fn new(config: Arc<HttpConfig>, info: ConnectionInfo) -> Self {
        Self {
            config,
            info,
            state: State::Idle,
        }
    }

    fn step(&mut self, io: &mut SessionIo) -> Result<ControlFlow<()>, HttpError> {
        loop {
            let state = std::mem::replace(&mut self.state, State::Closing);
            self.state = match state {
                State::Idle => {
                    if io.input.is_empty() {
                        self.state = State::Idle;

                        // Peer closing before sending anything ends the connection normally
                        if io.eof {
                            event!(Level::DEBUG, "peer closed connection");
                            return Ok(ControlFlow::Break(()));
                        }
                        return Ok(ControlFlow::Continue(()));
                    }

                    let Some(line) = take_line(io.input)? else {
                        if io.eof {
                            return Err(ParseError::UnexpectedEof.into());
                        }
                        self.state = State::Idle;
                        return Ok(ControlFlow::Continue(()));
                    };

                    // Stray line breaks between requests are tolerated
                    if line.is_empty() {
                        State::Idle
                    } else {
                        let extensions = Extensions {
                            url_scheme: self.config.url_scheme.clone(),
                            peer_addr: Some(self.info.peer_addr),
                            error_stream: self.config.error_stream.clone(),
                        };
                        let mut head = RequestHead::parse_request_line(&line, extensions)?;
                        head.set_server_port(self.info.local_addr.port());
                        State::ReadingRequest(head)
                    }
                }
                State::ReadingRequest(mut head) => {
                    let Some(line) = take_line(io.input)? else {
                        if io.eof {
                            return Err(ParseError::UnexpectedEof.into());
                        }
                        self.state = State::ReadingRequest(head);
                        return Ok(ControlFlow::Continue(()));
                    };

                    if !line.is_empty() {
                        head.parse_header(&line)?;
                        State::ReadingRequest(head)
                    } else {
                        match head.framing() {
                            Some(framing) => State::ReadingBody(head, framing),
                            None => self.dispatch(head.finish(None), io)?,
                        }
                    }
                }
                State::ReadingBody(head, mut framing) => {
                    let limit = self.config.max_body_size;
                    let Some(len) = framing.complete_len(io.input, limit)? else {
                        if io.eof {
                            return Err(ParseError::UnexpectedEof.into());
                        }
                        self.state = State::ReadingBody(head, framing);
                        return Ok(ControlFlow::Continue(()));
                    };

                    let body = io.input.split_to(len);
                    self.dispatch(head.finish(Some(body)), io)?
                }
                State::WritingResponse { next } => {
                    if !io.output.is_empty() {
                        self.state = State::WritingResponse { next };
                        return Ok(ControlFlow::Continue(()));
                    }

                    if !next {
                        event!(Level::DEBUG, "not continuing after request");
                        return Ok(ControlFlow::Break(()));
                    }
                    State::Idle
                }
                State::Closing => return Ok(ControlFlow::Break(())),
            };
        }
    }

    #[instrument(
        "HttpSession::dispatch",
        level = "debug",
        skip_all,
        fields(method = %request.method, path = %request.path)
    )]
    fn dispatch(&mut self, request: Request, io: &mut SessionIo) -> Result<State, HttpError> {
        let next = (self.config.should_continue)(&request);

        let app = &self.config.app;
        let output = &mut *io.output;
        let start = output.len();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let response = app(request).map_err(HttpError::Application)?;
            event!(Level::DEBUG, status = response.status, "writing response");
            write_response(response, output)
        }));
        let result = result.unwrap_or_else(|payload| Err(HttpError::Panic(panic_message(payload))));

        match result {
            Ok(()) => Ok(State::WritingResponse { next }),
            Err(error) => {
                let started = io.output.len() > start;
                self.fail(io, error, started);
                Ok(State::Closing)
            }
        }
    }

    /// Handle a failed request cycle, the connection closes afterwards.
    fn fail(&mut self, io: &mut SessionIo, error: HttpError, response_started: bool) {
        if let Some(handler) = &self.config.error_handler {
            event!(Level::DEBUG, ?error, "delegating to error handler");
            handler(&error);
            return;
        }

        event!(Level::WARN, peer_addr = %self.info.peer_addr, "request failed: {:?}", error);
        if let Some(stream) = &self.config.error_stream {
            if let Err(error) = stream.report(&error) {
                event!(Level::WARN, ?error, "failed to write to error stream");
            }
        }

        // The peer may already be receiving the response that failed, don't mix in another
        if response_started {
            return;
        }

        let response = Response::new(error.status());
        if let Err(error) = write_response(response, io.output) {
            event!(Level::WARN, ?error, "failed to write error response");
        }
    }
}

impl Session for HttpSession {
    fn process(&mut self, io: &mut SessionIo) -> Result<ControlFlow<()>, Error> {
        match self.step(io) {
            Ok(flow) => Ok(flow),
            Err(error) => {
                self.state = State::Closing;
                self.fail(io, error, false);
                Ok(ControlFlow::Break(()))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return message.to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
