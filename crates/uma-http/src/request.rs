use std::net::SocketAddr;

use crate::{BodyReader, ErrorStream};

/// Request received from a peer, as handed to the application.
#[derive(Debug)]
pub struct Request {
    /// Lowercased request method.
    pub method: String,
    /// Mount point of the application.
    pub script_name: String,
    pub path: String,
    /// Query string without the leading `?`, empty if absent.
    pub query: String,
    /// Protocol version token, as received.
    pub protocol: String,
    /// Port of the listener that accepted the connection.
    pub server_port: u16,
    /// Value of the `Host` header.
    pub server_name: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<usize>,
    /// Header fields in canonical `HTTP_<NAME>` form, in the order received.
    ///
    /// Duplicates are kept. `Content-Type` and `Content-Length` are only available through their
    /// own fields.
    pub headers: Vec<(String, String)>,
    pub extensions: Extensions,
    /// Body of the request, if it declared one.
    pub body: Option<BodyReader>,
}

impl Request {
    /// Last value received for a header, looked up by its wire name or canonical name.
    pub fn header(&self, name: &str) -> Option<&str> {
        let key = canonical_header_name(name);
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Protocol-internal fields passed through to the application.
#[derive(Debug, Clone)]
pub struct Extensions {
    pub url_scheme: String,
    pub peer_addr: Option<SocketAddr>,
    pub error_stream: Option<ErrorStream>,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            url_scheme: "http".to_string(),
            peer_addr: None,
            error_stream: None,
        }
    }
}

/// Convert a header name into its canonical `HTTP_<NAME>` form.
pub fn canonical_header_name(name: &str) -> String {
    let name = name.strip_prefix("HTTP_").unwrap_or(name);
    format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"))
}
