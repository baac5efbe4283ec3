use std::{ops::ControlFlow, sync::Arc};

use anyhow::Error;
use tracing::{event, Level};
use uma::{Server, ServerOptions};
use uma_mio::net::tcp::{ConnectionInfo, Session, SessionIo};

fn main() -> Result<(), Error> {
    devutils::init_logging("debug");

    // A connection handler replaces the HTTP layer entirely
    let options = ServerOptions {
        thread_count: Some(1),
        bind: vec!["127.0.0.1:1234".to_string()],
        connection_handler: Some(Arc::new(|info: &ConnectionInfo| {
            event!(Level::INFO, peer_addr = %info.peer_addr, "connection accepted");
            let session: Box<dyn Session> = Box::new(EchoSession);
            session
        })),
        ..Default::default()
    };
    let mut server = Server::from_options(options)?;
    server.run()?;

    Ok(())
}

struct EchoSession;

impl Session for EchoSession {
    fn process(&mut self, io: &mut SessionIo) -> Result<ControlFlow<()>, Error> {
        let data = io.input.split();
        if !data.is_empty() {
            event!(Level::DEBUG, count = data.len(), "echoing");
            io.output.extend_from_slice(&data);
        }

        if io.eof {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }
}
