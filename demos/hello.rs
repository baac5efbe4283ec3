use std::sync::Arc;

use anyhow::Error;
use tracing::{event, Level};
use uma::{
    http::{Request, Response},
    Server, ServerOptions,
};

fn main() -> Result<(), Error> {
    devutils::init_logging("info");

    let options = ServerOptions {
        bind: vec!["127.0.0.1:1234".to_string()],
        app: Some(Arc::new(hello)),
        ..Default::default()
    };
    let mut server = Server::from_options(options)?;

    // Serve until SIGINT or SIGTERM
    let termination = server.run()?;
    event!(Level::INFO, ?termination, "server stopped");

    Ok(())
}

fn hello(request: Request) -> Result<Response, Error> {
    event!(Level::INFO, method = %request.method, path = %request.path, "request");

    let response = Response::new(200)
        .with_header("content-type", "text/html")
        .with_body(RESPONSE);
    Ok(response)
}

const RESPONSE: &str = "<!DOCTYPE html><html><body><h1>Hello, World!</h1></body></html>";
