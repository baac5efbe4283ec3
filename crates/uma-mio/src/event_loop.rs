use std::{io::ErrorKind, rc::Rc};

use anyhow::{Context, Error};
use mio::Events;
use tracing::{event, instrument, Level};
use uma_rt::Runtime;

use crate::Registry;

/// Run the event loop until no actors are left in the runtime.
#[instrument("mio-event-loop", skip_all)]
pub fn run_event_loop(rt: &mut Runtime, registry: &Rc<Registry>) -> Result<(), Error> {
    // Process pending messages raised from initialization
    event!(Level::TRACE, "processing init messages");
    rt.process()?;

    let mut events = Events::with_capacity(128);
    while !rt.is_empty() {
        let timeout = registry.next_timeout();

        if let Err(error) = registry.poll(&mut events, timeout) {
            if error.kind() == ErrorKind::Interrupted {
                continue;
            }

            return Err(error).context("failed to poll");
        }

        // Send out wake events
        for event in events.iter() {
            let readable = event.is_readable() || event.is_read_closed() || event.is_error();
            let writable = event.is_writable() || event.is_write_closed();
            registry.wake(event.token(), readable, writable);
        }
        registry.fire_timers();

        // Process all pending actor signals, including wake events
        event!(Level::TRACE, "processing poll step");
        rt.process()?;
    }

    event!(Level::DEBUG, "no actors left, event loop done");

    Ok(())
}
