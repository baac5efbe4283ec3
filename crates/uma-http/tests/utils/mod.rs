use std::{ops::ControlFlow, sync::Arc};

use anyhow::Error;
use bytes::BytesMut;
use parking_lot::Mutex;
use uma_http::{HttpConfig, HttpSession, Request, Response};
use uma_mio::net::tcp::{ConnectionInfo, Session, SessionIo};

pub struct Connection {
    pub session: HttpSession,
    pub input: BytesMut,
    pub output: BytesMut,
}

pub type Received = Arc<Mutex<Vec<Request>>>;

/// Session with an app that records requests, and answers each with `respond`.
pub fn given_session<F>(respond: F) -> (Connection, Received)
where
    F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
{
    let (config, received) = given_config(respond);
    (given_session_with(config), received)
}

pub fn given_config<F>(respond: F) -> (HttpConfig, Received)
where
    F: Fn(&mut Request) -> Result<Response, Error> + Send + Sync + 'static,
{
    let received = Received::default();

    let sink = received.clone();
    let config = HttpConfig::new(Arc::new(move |mut request: Request| {
        let response = respond(&mut request);
        sink.lock().push(request);
        response
    }));

    (config, received)
}

pub fn given_session_with(config: HttpConfig) -> Connection {
    let info = ConnectionInfo {
        local_addr: "127.0.0.1:8080".parse().unwrap(),
        peer_addr: "127.0.0.1:50000".parse().unwrap(),
    };

    Connection {
        session: HttpSession::new(Arc::new(config), info),
        input: BytesMut::new(),
        output: BytesMut::new(),
    }
}

impl Connection {
    pub fn when_received(&mut self, data: &[u8]) -> Result<ControlFlow<()>, Error> {
        self.input.extend_from_slice(data);
        self.process(false)
    }

    pub fn when_closed_by_peer(&mut self) -> Result<ControlFlow<()>, Error> {
        self.process(true)
    }

    /// Pretend the pending output has been written to the peer, and return it.
    pub fn when_drained(&mut self) -> Result<(String, ControlFlow<()>), Error> {
        let written = self.take_output();
        let flow = self.process(false)?;
        Ok((written, flow))
    }

    pub fn take_output(&mut self) -> String {
        let output = self.output.split();
        String::from_utf8_lossy(&output).into_owned()
    }

    fn process(&mut self, eof: bool) -> Result<ControlFlow<()>, Error> {
        let mut io = SessionIo {
            input: &mut self.input,
            output: &mut self.output,
            eof,
        };
        self.session.process(&mut io)
    }
}
