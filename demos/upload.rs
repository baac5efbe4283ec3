use std::{io::Write, sync::Arc, time::Duration};

use anyhow::Error;
use bytes::Bytes;
use tracing::{event, Level};
use uma::{
    http::{Body, ErrorStream, Request, Response},
    Server, ServerOptions,
};

/// Counts the bytes of uploaded bodies, streaming back one line per received chunk.
///
/// Try it with `curl -T somefile http://127.0.0.1:1234/`.
fn main() -> Result<(), Error> {
    devutils::init_logging("info");

    let options = ServerOptions {
        thread_count: Some(4),
        bind: vec!["127.0.0.1:1234".to_string()],
        app: Some(Arc::new(upload)),
        error_stream: Some(ErrorStream::stderr()),
        shutdown_timeout: Some(Duration::from_secs(2)),
        ..Default::default()
    };
    let mut server = Server::from_options(options)?;
    server.run()?;

    Ok(())
}

fn upload(mut request: Request) -> Result<Response, Error> {
    let Some(body) = request.body.take() else {
        return Ok(Response::new(200).with_body("send a body to count it\n"));
    };

    let chunks = body.collect::<Result<Vec<Bytes>, _>>()?;
    event!(Level::INFO, count = chunks.len(), "received upload");

    let body = Body::stream(move |writer| {
        let mut total = 0;
        for (index, chunk) in chunks.iter().enumerate() {
            total += chunk.len();
            writeln!(writer, "chunk {}: {} bytes", index, chunk.len())?;
        }
        writeln!(writer, "total: {} bytes", total)?;
        Ok(())
    });

    Ok(Response::new(200)
        .with_header("content-type", "text/plain")
        .with_body(body))
}
