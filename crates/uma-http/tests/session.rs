mod utils;

use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::{bail, Error};
use tracing_test::traced_test;
use uma_http::{HttpError, ParseError, Request, Response};

use crate::utils::{given_config, given_session, given_session_with};

#[test]
#[traced_test]
fn request_fields_are_parsed() -> Result<(), Error> {
    let (mut conn, received) = given_session(|_| Ok(Response::new(204)));

    conn.when_received(
        b"GET /search?q=rust&page=2 HTTP/1.1\r\n\
          Host: example.com\r\n\
          X-Forwarded-For: 10.0.0.1\r\n\
          Content-Type: text/plain\r\n\
          Accept: text/html\r\n\
          Accept: application/json\r\n\r\n",
    )?;

    let received = received.lock();
    let request = &received[0];
    assert_eq!(request.method, "get");
    assert_eq!(request.script_name, "/");
    assert_eq!(request.path, "/search");
    assert_eq!(request.query, "q=rust&page=2");
    assert_eq!(request.protocol, "HTTP/1.1");
    assert_eq!(request.server_port, 8080);
    assert_eq!(request.server_name.as_deref(), Some("example.com"));
    assert_eq!(request.content_type.as_deref(), Some("text/plain"));
    assert_eq!(request.content_length, None);
    assert_eq!(request.header("Host"), Some("example.com"));
    assert_eq!(request.header("x-forwarded-for"), Some("10.0.0.1"));
    assert_eq!(request.header("HTTP_ACCEPT"), Some("application/json"));
    assert_eq!(request.header("content-type"), None);
    assert_eq!(
        request.headers.iter().filter(|(k, _)| k == "HTTP_ACCEPT").count(),
        2
    );
    assert_eq!(request.extensions.url_scheme, "http");
    assert!(request.body.is_none());

    Ok(())
}

#[test]
#[traced_test]
fn missing_query_is_empty() -> Result<(), Error> {
    let (mut conn, received) = given_session(|_| Ok(Response::new(200)));

    conn.when_received(b"post /submit http/1.0\r\n\r\n")?;

    let received = received.lock();
    assert_eq!(received[0].method, "post");
    assert_eq!(received[0].path, "/submit");
    assert_eq!(received[0].query, "");
    assert_eq!(received[0].protocol, "http/1.0");

    Ok(())
}

#[test]
#[traced_test]
fn hello_world_response() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| Ok(Response::new(200).with_body("Hello world!")));

    let flow = conn.when_received(b"GET / HTTP/1.1\r\n\r\n")?;

    assert_eq!(flow, ControlFlow::Continue(()));
    assert_eq!(
        conn.take_output(),
        "HTTP/1.1 200\r\ntransfer-encoding: chunked\r\n\r\nc\r\nHello world!\r\n0\r\n\r\n"
    );
    Ok(())
}

#[test]
#[traced_test]
fn not_found_response() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| Ok(Response::new(404).with_body("")));

    conn.when_received(b"GET / HTTP/1.1\r\n\r\n")?;

    assert_eq!(conn.take_output(), "HTTP/1.1 404\r\ncontent-length: 0\r\n\r\n");
    Ok(())
}

#[test]
#[traced_test]
fn request_split_over_reads() -> Result<(), Error> {
    let (mut conn, received) = given_session(|_| Ok(Response::new(200)));

    conn.when_received(b"GET /pa")?;
    conn.when_received(b"th HTTP/1.1\r\nHo")?;
    assert!(received.lock().is_empty());
    assert!(conn.output.is_empty());

    conn.when_received(b"st: a\r\n\r\n")?;

    assert_eq!(received.lock()[0].path, "/path");
    assert_eq!(conn.take_output(), "HTTP/1.1 200\r\ncontent-length: 0\r\n\r\n");
    Ok(())
}

#[test]
#[traced_test]
fn pipelined_requests_answered_in_order() -> Result<(), Error> {
    let (mut conn, _) = given_session(|request| {
        let path = request.path.clone();
        Ok(Response::new(200)
            .with_header("content-length", path.len().to_string())
            .with_body(path))
    });

    conn.when_received(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\n")?;

    // The second request waits until the first response is out
    let (first, flow) = conn.when_drained()?;
    assert_eq!(first, "HTTP/1.1 200\r\ncontent-length: 4\r\n\r\n/one");
    assert_eq!(flow, ControlFlow::Continue(()));

    let (second, _) = conn.when_drained()?;
    assert_eq!(second, "HTTP/1.1 200\r\ncontent-length: 4\r\n\r\n/two");

    Ok(())
}

#[test]
#[traced_test]
fn content_length_body_is_read() -> Result<(), Error> {
    let (mut conn, _) = given_session(|request| {
        let body = request.body.take().map(|b| b.read_to_end()).transpose()?;
        Ok(Response::new(200).with_body(body.unwrap_or_default()))
    });

    conn.when_received(b"POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello")?;
    assert!(conn.output.is_empty());

    conn.when_received(b" world")?;

    assert_eq!(
        conn.take_output(),
        "HTTP/1.1 200\r\ntransfer-encoding: chunked\r\n\r\nb\r\nhello world\r\n0\r\n\r\n"
    );
    Ok(())
}

#[test]
#[traced_test]
fn chunked_body_is_read() -> Result<(), Error> {
    let (mut conn, received) = given_session(|request| {
        let chunks = request
            .body
            .take()
            .map(|b| b.collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        Ok(Response::new(200).with_body(chunks))
    });

    conn.when_received(
        b"POST /upload HTTP/1.1\r\n\
          Transfer-Encoding: chunked\r\n\
          Content-Length: 3\r\n\r\n\
          b\r\nwowie-zowie\r\n",
    )?;
    assert!(conn.output.is_empty());

    conn.when_received(b"3\r\nwow\r\n0\r\n\r\n")?;

    assert_eq!(received.lock()[0].content_length, Some(3));
    assert_eq!(
        conn.take_output(),
        "HTTP/1.1 200\r\ntransfer-encoding: chunked\r\n\r\n\
         b\r\nwowie-zowie\r\n3\r\nwow\r\n0\r\n\r\n"
    );
    Ok(())
}

#[test]
#[traced_test]
fn chunked_body_read_byte_by_byte() -> Result<(), Error> {
    let (mut conn, _) = given_session(|request| {
        let body = request.body.take().map(|b| b.read_to_end()).transpose()?;
        Ok(Response::new(200).with_body(body.unwrap_or_default()))
    });

    conn.when_received(b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")?;
    for byte in b"5;ext=1\r\nhello\r\n6\r\n world\r\n0\r\nx-trailer: 1\r\n\r\n" {
        assert!(conn.output.is_empty());
        conn.when_received(&[*byte])?;
    }

    assert_eq!(
        conn.take_output(),
        "HTTP/1.1 200\r\ntransfer-encoding: chunked\r\n\r\nb\r\nhello world\r\n0\r\n\r\n"
    );
    Ok(())
}

#[test]
#[traced_test]
fn oversized_declared_body_is_rejected() -> Result<(), Error> {
    let (mut conn, received) = given_session(|_| Ok(Response::new(200)));

    let flow =
        conn.when_received(b"POST /upload HTTP/1.1\r\nContent-Length: 1000000000000\r\n\r\nabc")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 413\r\ncontent-length: 0\r\n\r\n");
    assert!(received.lock().is_empty());
    Ok(())
}

#[test]
#[traced_test]
fn oversized_chunked_body_is_rejected() -> Result<(), Error> {
    let (mut config, received) = given_config(|_| Ok(Response::new(200)));
    config.max_body_size = 16;
    let mut conn = given_session_with(config);

    let flow = conn.when_received(
        b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nb\r\nwowie-zowie\r\n",
    )?;
    assert_eq!(flow, ControlFlow::Continue(()));
    assert!(conn.output.is_empty());

    // The next chunk's size line alone shows the limit will be exceeded
    let flow = conn.when_received(b"3\r\n")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 413\r\ncontent-length: 0\r\n\r\n");
    assert!(received.lock().is_empty());
    Ok(())
}

#[test]
#[traced_test]
fn signed_content_length_gets_bad_request() -> Result<(), Error> {
    let (mut conn, received) = given_session(|_| Ok(Response::new(200)));

    let flow = conn.when_received(b"POST / HTTP/1.1\r\nContent-Length: +5\r\n\r\nhello")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 400\r\ncontent-length: 0\r\n\r\n");
    assert!(received.lock().is_empty());
    Ok(())
}

#[test]
#[traced_test]
fn clean_close_ends_without_response()-> Result<(), Error> {
    let (mut conn, received) = given_session(|_| Ok(Response::new(200)));

    let flow = conn.when_closed_by_peer()?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert!(conn.output.is_empty());
    assert!(received.lock().is_empty());
    Ok(())
}

#[test]
#[traced_test]
fn invalid_request_line_gets_bad_request() -> Result<(), Error> {
    let (mut conn, received) = given_session(|_| Ok(Response::new(200)));

    let flow = conn.when_received(b"NOT A REQUEST\r\n\r\n")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 400\r\ncontent-length: 0\r\n\r\n");
    assert!(received.lock().is_empty());
    assert!(logs_contain("request failed"));
    Ok(())
}

#[test]
#[traced_test]
fn invalid_header_gets_bad_request() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| Ok(Response::new(200)));

    let flow = conn.when_received(b"GET / HTTP/1.1\r\nbad header\r\n\r\n")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 400\r\ncontent-length: 0\r\n\r\n");
    Ok(())
}

#[test]
#[traced_test]
fn eof_inside_head_is_an_error() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| Ok(Response::new(200)));

    conn.when_received(b"GET / HTTP/1.1\r\nHost: a\r\n")?;
    let flow = conn.when_closed_by_peer()?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 400\r\ncontent-length: 0\r\n\r\n");
    Ok(())
}

#[test]
#[traced_test]
fn overlong_line_is_an_error() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| Ok(Response::new(200)));

    let mut line = b"GET /".to_vec();
    line.resize(5000, b'a');
    let flow = conn.when_received(&line)?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 400\r\ncontent-length: 0\r\n\r\n");
    Ok(())
}

#[test]
#[traced_test]
fn application_error_gets_server_error() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| bail!("database unavailable"));

    let flow = conn.when_received(b"GET / HTTP/1.1\r\n\r\n")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 500\r\ncontent-length: 0\r\n\r\n");
    assert!(logs_contain("database unavailable"));
    Ok(())
}

#[test]
#[traced_test]
fn application_panic_gets_server_error() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| panic!("app exploded"));

    let flow = conn.when_received(b"GET / HTTP/1.1\r\n\r\n")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 500\r\ncontent-length: 0\r\n\r\n");
    assert!(logs_contain("app exploded"));
    Ok(())
}

#[test]
#[traced_test]
fn invalid_response_header_gets_server_error() -> Result<(), Error> {
    let (mut conn, _) = given_session(|_| Ok(Response::new(200).with_header("bar", 123i64)));

    let flow = conn.when_received(b"GET / HTTP/1.1\r\n\r\n")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(conn.take_output(), "HTTP/1.1 500\r\ncontent-length: 0\r\n\r\n");
    Ok(())
}

#[test]
#[traced_test]
fn error_handler_takes_over() -> Result<(), Error> {
    let (mut config, _) = given_config(|_| Ok(Response::new(200)));
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    config.error_handler = Some(Arc::new(move |error: &HttpError| {
        assert!(matches!(
            error,
            HttpError::Parse(ParseError::InvalidRequestLine)
        ));
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let mut conn = given_session_with(config);

    let flow = conn.when_received(b"??\r\n")?;

    assert_eq!(flow, ControlFlow::Break(()));
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert!(conn.output.is_empty());
    Ok(())
}

#[test]
#[traced_test]
fn should_continue_can_end_connection() -> Result<(), Error> {
    let (mut config, _) = given_config(|_| Ok(Response::new(200)));
    config.should_continue =
        Arc::new(|request: &Request| request.header("connection") != Some("close"));
    let mut conn = given_session_with(config);

    conn.when_received(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")?;
    let (written, flow) = conn.when_drained()?;

    assert_eq!(written, "HTTP/1.1 200\r\ncontent-length: 0\r\n\r\n");
    assert_eq!(flow, ControlFlow::Break(()));
    Ok(())
}
