use std::fmt;

use anyhow::Error;
use bytes::Bytes;

use crate::ChunkedWriter;

/// Prefix of header names reserved for internal fields, never written to the wire.
pub const RESERVED_HEADER_PREFIX: &str = "uma.";

/// Response produced by the application.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Body,
}

impl Response {
    /// Response with no headers and no body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::default(),
            body: Body::None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }
}

/// Ordered response header fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, HeaderValue)>,
}

impl Headers {
    /// Add a header field, after all existing ones.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Last value set for a header, names compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<HeaderValue>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let entries = iter
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        Self { entries }
    }
}

/// Value of a response header field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Text(String),
    /// Written as one header line per value.
    List(Vec<String>),
    /// Not a valid wire value, rejected when the response is written.
    Integer(i64),
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Text(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(value: Vec<String>) -> Self {
        HeaderValue::List(value)
    }
}

impl From<Vec<&str>> for HeaderValue {
    fn from(value: Vec<&str>) -> Self {
        HeaderValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Integer(value)
    }
}

/// Callback writing a response body as it's produced.
pub type StreamBody = Box<dyn FnOnce(&mut ChunkedWriter<'_>) -> Result<(), Error>>;

/// Body of a response.
pub enum Body {
    None,
    Buffer(Bytes),
    Sequence(Vec<Bytes>),
    Stream(StreamBody),
}

impl Body {
    /// Create a streaming body from a writer callback.
    pub fn stream<F>(f: F) -> Self
    where
        F: FnOnce(&mut ChunkedWriter<'_>) -> Result<(), Error> + 'static,
    {
        Body::Stream(Box::new(f))
    }

    /// Returns true if the body is known to have no content.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::None => true,
            Body::Buffer(data) => data.is_empty(),
            Body::Sequence(parts) => parts.iter().all(Bytes::is_empty),
            Body::Stream(_) => false,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::None => f.write_str("None"),
            Body::Buffer(data) => f.debug_tuple("Buffer").field(data).finish(),
            Body::Sequence(parts) => f.debug_tuple("Sequence").field(parts).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Body::Buffer(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Buffer(value.into())
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Buffer(value.into())
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Buffer(value)
    }
}

impl From<Vec<Bytes>> for Body {
    fn from(value: Vec<Bytes>) -> Self {
        Body::Sequence(value)
    }
}
