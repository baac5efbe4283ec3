use std::{
    io::{self, ErrorKind, Read, Write},
    net::Shutdown,
    ops::ControlFlow,
    rc::Rc,
};

use anyhow::Error;
use bytes::{Buf, BytesMut};
use mio::{net::TcpStream, Interest};
use tracing::{event, instrument, Level};
use uma_rt::{mailbox, Actor, Cancel, Id, Mailbox, Runtime, TaskGuard, TaskSet};

use crate::{
    net::{check_io, tcp::ConnectionInfo},
    ReadyRef, Registry,
};

/// Protocol logic running on top of a connection.
pub trait Session: 'static {
    /// Perform a processing step on the connection buffers.
    ///
    /// Consume what's usable from `input`, and append anything to be sent to `output`.
    /// The step is repeated whenever more input arrives, and whenever previously queued output has
    /// been fully written out.
    ///
    /// Returning `Break` closes the connection after the remaining output is written.
    /// Returning `Err` closes it immediately.
    fn process(&mut self, io: &mut SessionIo) -> Result<ControlFlow<()>, Error>;
}

/// Connection buffers handed to a `Session`.
pub struct SessionIo<'a> {
    /// Data received and not yet consumed.
    pub input: &'a mut BytesMut,
    /// Data waiting to be written to the peer.
    pub output: &'a mut BytesMut,
    /// The peer closed its sending half, no more input will arrive.
    pub eof: bool,
}

/// Start a task running `session` on an accepted stream.
///
/// The task joins `connections` for as long as the stream is open.
#[instrument("tcp::open", skip_all, fields(peer_addr = %info.peer_addr))]
pub fn open(
    rt: &mut Runtime,
    registry: &Rc<Registry>,
    mut stream: TcpStream,
    info: ConnectionInfo,
    session: Box<dyn Session>,
    connections: &TaskSet,
) -> Result<Id, Error> {
    event!(Level::DEBUG, "opening stream");

    let signal = rt.signal();
    let (cancel, cancel_sender) = mailbox();
    cancel.set_signal(signal.clone());

    // Register for mio events
    let ready = registry.register(&mut stream, Interest::READABLE, signal.clone())?;

    let actor = Connection {
        cancel,
        _guard: TaskGuard::new(connections.clone(), signal.clone()),
        session,
        info,

        stream,
        ready,
        input: BytesMut::new(),
        output: BytesMut::new(),
        eof: false,
        finishing: false,
        want_writable: false,
    };
    let id = rt.insert("tcp-stream", actor);
    signal.set_id(id);
    connections.insert(id, cancel_sender);

    // Let the session act on data that arrived before registration
    signal.send()?;

    Ok(id)
}

struct Connection {
    cancel: Mailbox<Cancel>,
    _guard: TaskGuard,
    session: Box<dyn Session>,
    info: ConnectionInfo,

    stream: TcpStream,
    ready: ReadyRef,
    input: BytesMut,
    output: BytesMut,
    eof: bool,
    finishing: bool,
    want_writable: bool,
}

impl Drop for Connection {
    fn drop(&mut self) {
        event!(Level::DEBUG, peer_addr = %self.info.peer_addr, "closing stream");
        self.ready.deregister(&mut self.stream);
    }
}

impl Actor for Connection {
    fn process(&mut self, _rt: &mut Runtime) -> Result<ControlFlow<()>, Error> {
        if self.cancel.recv()?.is_some() {
            event!(Level::DEBUG, peer_addr = %self.info.peer_addr, "stream cancelled");
            return Ok(ControlFlow::Break(()));
        }

        let ready = self.ready.take();

        if ready.readable && !self.eof && !self.finishing {
            if let Err(error) = self.on_ready_readable() {
                event!(Level::DEBUG, ?error, "failed to read from stream");
                return Ok(ControlFlow::Break(()));
            }
        }

        loop {
            if !self.finishing {
                let mut io = SessionIo {
                    input: &mut self.input,
                    output: &mut self.output,
                    eof: self.eof,
                };
                if self.session.process(&mut io)?.is_break() {
                    self.finishing = true;
                }
            }

            let pending = self.output.len();
            if let Err(error) = self.flush() {
                event!(Level::DEBUG, ?error, "failed to write to stream");
                return Ok(ControlFlow::Break(()));
            }

            // The session gets another step only when this flush drained what it queued
            let drained = pending > 0 && self.output.is_empty();
            if self.finishing || !drained {
                break;
            }
        }

        if !self.output.is_empty() {
            self.set_want_writable(true)?;
            return Ok(ControlFlow::Continue(()));
        }
        self.set_want_writable(false)?;

        if self.finishing || self.eof {
            if let Err(error) = self.stream.shutdown(Shutdown::Write) {
                event!(Level::TRACE, ?error, "failed to shut down stream");
            }
            return Ok(ControlFlow::Break(()));
        }

        Ok(ControlFlow::Continue(()))
    }
}

impl Connection {
    fn on_ready_readable(&mut self) -> Result<(), io::Error> {
        let mut buffer = [0; 4096];
        let mut bytes_read = 0;

        loop {
            let len = match check_io(self.stream.read(&mut buffer)) {
                Ok(Some(len)) => len,
                Ok(None) => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            };

            // Read of zero means the peer has closed its half
            if len == 0 {
                self.eof = true;
                break;
            }

            self.input.extend_from_slice(&buffer[..len]);
            bytes_read += len;
        }

        event!(Level::TRACE, count = bytes_read, eof = self.eof, "received data");
        Ok(())
    }

    fn flush(&mut self) -> Result<(), io::Error> {
        while !self.output.is_empty() {
            let len = match check_io(self.stream.write(&self.output)) {
                Ok(Some(len)) => len,
                Ok(None) => break,
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(error),
            };

            if len == 0 {
                return Err(ErrorKind::WriteZero.into());
            }

            self.output.advance(len);
        }

        Ok(())
    }

    fn set_want_writable(&mut self, value: bool) -> Result<(), Error> {
        if self.want_writable == value {
            return Ok(());
        }
        self.want_writable = value;

        let interest = if value {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.ready.reregister(&mut self.stream, interest)
    }
}
