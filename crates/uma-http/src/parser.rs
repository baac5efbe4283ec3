use bytes::BytesMut;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    body::Framing, canonical_header_name, BodyReader, Extensions, ParseError, Request,
};

/// Maximum length of a single line in a request head.
pub(crate) const MAX_LINE: usize = 4096;

lazy_static! {
    static ref REQUEST_LINE: Regex =
        Regex::new(r"(?i)^([a-z]+)\s+([^\s?]+)(?:\?(\S*))?\s+(http/[0-9]\.[0-9])$").unwrap();
    static ref HEADER_LINE: Regex = Regex::new(r"(?i)^([a-z0-9-]+):[ \t]*(.*?)[ \t]*$").unwrap();
}

/// Take one complete line off the front of `input`, without its line ending.
///
/// Returns `None` if no full line has been received yet.
pub(crate) fn take_line(input: &mut BytesMut) -> Result<Option<String>, ParseError> {
    let Some(position) = input.iter().position(|b| *b == b'\n') else {
        if input.len() >= MAX_LINE {
            return Err(ParseError::LineTooLong(MAX_LINE));
        }
        return Ok(None);
    };

    if position >= MAX_LINE {
        return Err(ParseError::LineTooLong(MAX_LINE));
    }

    let line = input.split_to(position + 1);
    let line = &line[..position];
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let line = String::from_utf8_lossy(line).into_owned();
    Ok(Some(line))
}

/// Request head under construction, as its lines arrive.
#[derive(Debug)]
pub(crate) struct RequestHead {
    request: Request,
    chunked: bool,
}

impl RequestHead {
    pub(crate) fn parse_request_line(line: &str, extensions: Extensions) -> Result<Self, ParseError> {
        let captures = REQUEST_LINE
            .captures(line)
            .ok_or(ParseError::InvalidRequestLine)?;
        let capture = |i| captures.get(i).map_or("", |m| m.as_str());

        let request = Request {
            method: capture(1).to_ascii_lowercase(),
            script_name: "/".to_string(),
            path: capture(2).to_string(),
            query: capture(3).to_string(),
            protocol: capture(4).to_string(),
            server_port: 0,
            server_name: None,
            content_type: None,
            content_length: None,
            headers: Vec::new(),
            extensions,
            body: None,
        };

        Ok(Self {
            request,
            chunked: false,
        })
    }

    pub(crate) fn set_server_port(&mut self, port: u16) {
        self.request.server_port = port;
    }

    pub(crate) fn parse_header(&mut self, line: &str) -> Result<(), ParseError> {
        let captures = HEADER_LINE.captures(line).ok_or(ParseError::InvalidHeader)?;
        let name = canonical_header_name(&captures[1]);
        let value = captures[2].to_string();

        let request = &mut self.request;
        match name.as_str() {
            "HTTP_CONTENT_TYPE" => request.content_type = Some(value),
            "HTTP_CONTENT_LENGTH" => {
                let invalid = || ParseError::InvalidContentLength(value.clone());
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid());
                }
                let length = value.parse().map_err(|_| invalid())?;
                request.content_length = Some(length);
            }
            "HTTP_HOST" => {
                request.server_name = Some(value.clone());
                request.headers.push((name, value));
            }
            "HTTP_TRANSFER_ENCODING" => {
                self.chunked = value
                    .rsplit(',')
                    .next()
                    .map_or(false, |coding| coding.trim().eq_ignore_ascii_case("chunked"));
                request.headers.push((name, value));
            }
            _ => request.headers.push((name, value)),
        }

        Ok(())
    }

    /// Body framing declared by the head, chunked taking precedence over content-length.
    pub(crate) fn framing(&self) -> Option<Framing> {
        if self.chunked {
            return Some(Framing::Chunked { scanned: 0 });
        }

        match self.request.content_length {
            Some(len) if len > 0 => Some(Framing::Length(len)),
            _ => None,
        }
    }

    /// Finish the request, attaching the body read from `body` if any is declared.
    pub(crate) fn finish(self, body: Option<BytesMut>) -> Request {
        let mut request = self.request;

        request.body = match (self.chunked, body) {
            (_, None) => None,
            (true, Some(data)) => Some(BodyReader::chunked(data.freeze())),
            (false, Some(data)) => Some(BodyReader::sized(data.freeze())),
        };

        request
    }
}
