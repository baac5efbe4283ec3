//! TCP listeners and connection streams.
//!
//! A listener is an acceptor task that hands each accepted socket to a `Session` produced by a
//! `SessionFactory`. Every session runs in its own stream task, which owns the socket and its
//! buffers.

mod listener;
mod stream;

use std::net::SocketAddr;

pub use self::{
    listener::{bind_reuseport, listen, ListenerInfo, SessionFactory},
    stream::{open, Session, SessionIo},
};

/// Addresses of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub local_addr: SocketAddr,
    pub peer_addr: SocketAddr,
}
