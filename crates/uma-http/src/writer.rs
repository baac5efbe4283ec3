use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use tracing::{event, Level};

use crate::{Body, HeaderValue, Headers, HttpError, ResponseError, Response, RESERVED_HEADER_PREFIX};

/// Serialize a response onto `out`.
///
/// The status line and headers are validated before anything is written, so a response
/// formation error leaves `out` untouched. Failures of a streaming body happen after its head has
/// been written, the body is terminated before the error is returned.
pub fn write_response(response: Response, out: &mut BytesMut) -> Result<(), HttpError> {
    let Response {
        status,
        headers,
        body,
    } = response;

    let empty = body.is_empty();

    let mut head = BytesMut::new();
    head.put_slice(format!("HTTP/1.1 {}\r\n", status).as_bytes());
    write_header_lines(&headers, empty, &mut head)?;

    // Framing of an empty body is always ours, whatever the application declared
    if empty {
        head.put_slice(b"content-length: 0\r\n\r\n");
        out.put(head);
        return Ok(());
    }

    let declared_length = headers.contains("content-length");

    // A declared content-length means the application frames the body itself
    let chunked = !declared_length;
    if chunked && !headers.contains("transfer-encoding") {
        head.put_slice(b"transfer-encoding: chunked\r\n");
    }
    head.put_slice(b"\r\n");
    out.put(head);

    let mut writer = if chunked {
        ChunkedWriter::new(out)
    } else {
        ChunkedWriter::identity(out)
    };

    match body {
        Body::None => {}
        Body::Buffer(data) => writer.write_chunk(&data)?,
        Body::Sequence(parts) => {
            for part in parts {
                writer.write_chunk(&part)?;
            }
        }
        Body::Stream(callback) => {
            let result = callback(&mut writer);
            writer.close();
            result.map_err(HttpError::Application)?;
        }
    }

    writer.close();
    Ok(())
}

/// Serialize response headers, terminated by a blank line.
///
/// Nothing is written if any value is invalid.
pub fn format_headers(headers: &Headers, out: &mut BytesMut) -> Result<(), ResponseError> {
    let mut buffer = BytesMut::new();
    write_header_lines(headers, false, &mut buffer)?;
    buffer.put_slice(b"\r\n");

    out.put(buffer);
    Ok(())
}

fn write_header_lines(
    headers: &Headers,
    skip_framing: bool,
    out: &mut BytesMut,
) -> Result<(), ResponseError> {
    for (name, value) in headers.iter() {
        if name.starts_with(RESERVED_HEADER_PREFIX) {
            continue;
        }
        if skip_framing && is_framing_header(name) {
            continue;
        }

        match value {
            HeaderValue::Text(value) => put_header(out, name, value),
            HeaderValue::List(values) => {
                for value in values {
                    put_header(out, name, value);
                }
            }
            HeaderValue::Integer(_) => {
                return Err(ResponseError::InvalidHeaderValue(name.to_string()));
            }
        }
    }

    Ok(())
}

fn is_framing_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("transfer-encoding")
}

fn put_header(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_slice(b"\r\n");
}

/// Body encoder writing into a connection's output buffer.
///
/// In chunked mode every write becomes one chunk. The first chunk's size line goes out bare,
/// every later one is preceded by the terminator of the chunk before it. Closing writes the final
/// zero chunk, exactly once, and happens on drop if not done explicitly.
pub struct ChunkedWriter<'a> {
    out: &'a mut BytesMut,
    chunked: bool,
    started: bool,
    closed: bool,
}

impl<'a> ChunkedWriter<'a> {
    pub fn new(out: &'a mut BytesMut) -> Self {
        Self {
            out,
            chunked: true,
            started: false,
            closed: false,
        }
    }

    /// Writer passing data through unframed, for bodies with a declared content-length.
    pub(crate) fn identity(out: &'a mut BytesMut) -> Self {
        Self {
            out,
            chunked: false,
            started: false,
            closed: false,
        }
    }

    /// Write one chunk of body data.
    ///
    /// Empty writes are skipped, as a zero size chunk would end the body.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), ResponseError> {
        if self.closed {
            return Err(ResponseError::WriterClosed);
        }
        if data.is_empty() {
            return Ok(());
        }

        if self.chunked {
            if self.started {
                self.out.put_slice(b"\r\n");
            }
            self.out.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
        }
        self.out.put_slice(data);
        self.started = true;

        Ok(())
    }

    /// Terminate the body. Closing an already closed writer does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if !self.chunked {
            return;
        }

        if self.started {
            self.out.put_slice(b"\r\n0\r\n\r\n");
        } else {
            self.out.put_slice(b"0\r\n\r\n");
        }
        event!(Level::TRACE, "chunked body terminated");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Write for ChunkedWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunk(buf)
            .map_err(|error| io::Error::new(io::ErrorKind::BrokenPipe, error))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ChunkedWriter<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
