//! Network transports.

pub mod tcp;

use std::io::{Error, ErrorKind};

/// Map `WouldBlock` to `None`, as it just means we've run out of things to handle.
fn check_io<T>(value: Result<T, Error>) -> Result<Option<T>, Error> {
    match value {
        Ok(value) => Ok(Some(value)),
        Err(error) if error.kind() == ErrorKind::WouldBlock => Ok(None),
        Err(error) => Err(error),
    }
}
