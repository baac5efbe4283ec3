use std::{io::ErrorKind, net::SocketAddr, ops::ControlFlow, rc::Rc};

use anyhow::{Context, Error};
use mio::{net::TcpListener, Interest};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{event, instrument, Level};
use uma_rt::{mailbox, Actor, Cancel, Id, Mailbox, Runtime, TaskGuard, TaskSet};

use crate::{
    net::{
        check_io,
        tcp::{self, ConnectionInfo, Session},
    },
    ReadyRef, Registry,
};

/// Creates the session for a newly accepted connection.
///
/// Returning `None` rejects the connection, closing it immediately.
pub type SessionFactory = Rc<dyn Fn(&ConnectionInfo) -> Option<Box<dyn Session>>>;

/// Information about a started listener.
#[derive(Debug, Clone, Copy)]
pub struct ListenerInfo {
    pub id: Id,
    pub local_addr: SocketAddr,
}

/// Bind a non-blocking TCP listener with address and port reuse enabled.
///
/// Port reuse lets every worker thread bind its own listener to the same address, with the kernel
/// balancing incoming connections between them.
pub fn bind_reuseport(addr: SocketAddr) -> Result<TcpListener, Error> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;

    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}

/// Start an acceptor task listening on the given address.
///
/// The acceptor joins `acceptors`, and every connection it accepts joins `connections`.
/// Cancelling the acceptor closes the listening socket, but leaves accepted connections running.
#[instrument("tcp::listen", skip_all, fields(%addr))]
pub fn listen(
    rt: &mut Runtime,
    registry: &Rc<Registry>,
    addr: SocketAddr,
    sessions: SessionFactory,
    acceptors: &TaskSet,
    connections: TaskSet,
) -> Result<ListenerInfo, Error> {
    event!(Level::DEBUG, "binding");

    let mut listener = bind_reuseport(addr).with_context(|| format!("failed to bind {}", addr))?;
    let local_addr = listener.local_addr()?;

    let signal = rt.signal();
    let (cancel, cancel_sender) = mailbox();
    cancel.set_signal(signal.clone());

    // Register the socket for ready events
    let ready = registry.register(&mut listener, Interest::READABLE, signal.clone())?;

    let actor = Acceptor {
        registry: registry.clone(),
        cancel,
        _guard: TaskGuard::new(acceptors.clone(), signal.clone()),
        sessions,
        connections,

        listener,
        local_addr,
        ready,
    };
    let id = rt.insert("tcp-acceptor", actor);
    signal.set_id(id);
    acceptors.insert(id, cancel_sender);

    // Connections may have queued up before registration
    signal.send()?;

    event!(Level::INFO, %local_addr, "listening");
    Ok(ListenerInfo { id, local_addr })
}

struct Acceptor {
    registry: Rc<Registry>,
    cancel: Mailbox<Cancel>,
    _guard: TaskGuard,
    sessions: SessionFactory,
    connections: TaskSet,

    listener: TcpListener,
    local_addr: SocketAddr,
    ready: ReadyRef,
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        event!(Level::DEBUG, local_addr = %self.local_addr, "closing listener");
        self.ready.deregister(&mut self.listener);
    }
}

impl Actor for Acceptor {
    fn process(&mut self, rt: &mut Runtime) -> Result<ControlFlow<()>, Error> {
        if self.cancel.recv()?.is_some() {
            event!(Level::DEBUG, "acceptor cancelled");
            return Ok(ControlFlow::Break(()));
        }

        let ready = self.ready.take();
        if ready.readable {
            self.on_listener_ready(rt);
        }

        Ok(ControlFlow::Continue(()))
    }
}

impl Acceptor {
    fn on_listener_ready(&mut self, rt: &mut Runtime) {
        // Accept any pending streams
        loop {
            let (stream, peer_addr) = match check_io(self.listener.accept()) {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => {
                    // Running out of file descriptors or a connection reset before accept
                    // shouldn't take down the listener
                    event!(Level::WARN, ?error, "failed to accept connection");
                    break;
                }
            };
            event!(Level::DEBUG, %peer_addr, "connection accepted");

            if let Err(error) = stream.set_nodelay(true) {
                event!(Level::DEBUG, ?error, "failed to set nodelay");
            }

            let info = ConnectionInfo {
                local_addr: self.local_addr,
                peer_addr,
            };
            let Some(session) = (self.sessions)(&info) else {
                event!(Level::DEBUG, %peer_addr, "no session for connection, closing");
                continue;
            };

            let result = tcp::open(
                rt,
                &self.registry,
                stream,
                info,
                session,
                &self.connections,
            );
            if let Err(error) = result {
                event!(Level::WARN, ?error, "failed to open connection");
            }
        }
    }
}
