mod mock;

use std::sync::atomic::Ordering;

use anyhow::{Context as _, Error};
use uma_rt::{Runtime, Sender};

pub use self::mock::{given_fail_actor, given_mock_actor, given_task_actor, ActorInfo};

pub fn when_sent_message_to(rt: &mut Runtime, sender: &Sender<()>) -> Result<(), Error> {
    sender.send(())?;

    rt.process().context("failed to process after sending")?;

    Ok(())
}

pub fn then_actor_dropped(actor: &ActorInfo) {
    assert!(actor.dropped.load(Ordering::SeqCst), "actor not dropped");
}
