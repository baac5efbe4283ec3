use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    str::FromStr,
};

use lazy_static::lazy_static;
use regex::Regex;

use crate::ConfigError;

lazy_static! {
    static ref BIND_SPEC: Regex = Regex::new(r"^(.+):(\d+)$").unwrap();
}

/// Address a server listens on, parsed from a `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindTarget {
    pub host: String,
    pub port: u16,
}

impl BindTarget {
    /// Resolve the target to the socket address to bind.
    ///
    /// IPv6 hosts may be given in brackets, as in `[::1]:8080`.
    pub fn resolve(&self) -> Result<SocketAddr, ConfigError> {
        let host = self
            .host
            .strip_prefix('[')
            .and_then(|host| host.strip_suffix(']'))
            .unwrap_or(&self.host);

        let mut addrs = (host, self.port)
            .to_socket_addrs()
            .map_err(|source| ConfigError::Resolve {
                target: self.to_string(),
                source,
            })?;

        addrs
            .next()
            .ok_or_else(|| ConfigError::NoAddress(self.to_string()))
    }
}

impl FromStr for BindTarget {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidBindSpec(spec.to_string());

        let captures = BIND_SPEC.captures(spec).ok_or_else(invalid)?;
        let port = captures[2].parse().map_err(|_| invalid())?;

        Ok(Self {
            host: captures[1].to_string(),
            port,
        })
    }
}

impl fmt::Display for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse bind specs, keeping their order.
pub fn parse_binds<I, S>(specs: I) -> Result<Vec<BindTarget>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    specs.into_iter().map(|spec| spec.as_ref().parse()).collect()
}
