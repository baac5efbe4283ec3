//! HTTP/1.1 codec and connection session.
//!
//! `HttpSession` runs request-response cycles on a connection provided by `uma-mio`: it parses
//! the request head, buffers the framed body, calls the application, and serializes the returned
//! `Response` with content-length or chunked framing.

mod body;
mod error;
mod error_stream;
mod parser;
mod request;
mod response;
mod session;
mod writer;

pub use self::{
    body::BodyReader,
    error::{HttpError, ParseError, ResponseError},
    error_stream::ErrorStream,
    request::{canonical_header_name, Extensions, Request},
    response::{Body, HeaderValue, Headers, Response, StreamBody, RESERVED_HEADER_PREFIX},
    session::{App, ContinueHook, ErrorHandler, HttpConfig, HttpSession, DEFAULT_MAX_BODY_SIZE},
    writer::{format_headers, write_response, ChunkedWriter},
};
