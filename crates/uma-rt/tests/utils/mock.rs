use std::{
    ops::ControlFlow,
    rc::Rc,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use anyhow::{bail, Error};
use uma_rt::{mailbox, Actor, Cancel, Id, Mailbox, Runtime, Sender, TaskGuard, TaskSet};

pub fn given_mock_actor(rt: &mut Runtime) -> Result<ActorInfo, Error> {
    given_actor(rt, false)
}

pub fn given_fail_actor(rt: &mut Runtime) -> Result<ActorInfo, Error> {
    given_actor(rt, true)
}

/// An actor that only ends when it gets cancelled through `tasks`.
pub fn given_task_actor(rt: &mut Runtime, tasks: &TaskSet) -> Result<ActorInfo, Error> {
    let signal = rt.signal();
    let (mailbox, sender) = mailbox();
    mailbox.set_signal(signal.clone());
    let (cancel, cancel_sender) = uma_rt::mailbox::<Cancel>();
    cancel.set_signal(signal.clone());

    let mut instance = MockActor::new(mailbox);
    instance.keep_running = true;
    instance.cancel = Some(cancel);
    instance.guard = Some(TaskGuard::new(tasks.clone(), signal.clone()));
    let info = ActorInfo::new(&instance, sender);

    let id = rt.insert("task-actor", instance);
    signal.set_id(id);
    tasks.insert(id, cancel_sender);

    Ok(info.with_id(id))
}

fn given_actor(rt: &mut Runtime, fail: bool) -> Result<ActorInfo, Error> {
    let signal = rt.signal();
    let (mailbox, sender) = mailbox();
    mailbox.set_signal(signal.clone());

    let mut instance = MockActor::new(mailbox);
    instance.fail = fail;
    let info = ActorInfo::new(&instance, sender);

    let id = rt.insert("mock-actor", instance);
    signal.set_id(id);

    Ok(info.with_id(id))
}

pub struct ActorInfo {
    pub id: Option<Id>,
    pub sender: Sender<()>,
    pub count: Rc<AtomicUsize>,
    pub dropped: Rc<AtomicBool>,
}

impl ActorInfo {
    fn new(instance: &MockActor, sender: Sender<()>) -> Self {
        Self {
            id: None,
            sender,
            count: instance.count.clone(),
            dropped: instance.dropped.clone(),
        }
    }

    fn with_id(mut self, id: Id) -> Self {
        self.id = Some(id);
        self
    }
}

struct MockActor {
    mailbox: Mailbox<()>,
    cancel: Option<Mailbox<Cancel>>,
    guard: Option<TaskGuard>,
    count: Rc<AtomicUsize>,
    dropped: Rc<AtomicBool>,
    fail: bool,
    keep_running: bool,
}

impl MockActor {
    fn new(mailbox: Mailbox<()>) -> Self {
        Self {
            mailbox,
            cancel: None,
            guard: None,
            count: Rc::default(),
            dropped: Rc::default(),
            fail: false,
            keep_running: false,
        }
    }
}

impl Actor for MockActor {
    fn process(&mut self, _rt: &mut Runtime) -> Result<ControlFlow<()>, Error> {
        if self.fail {
            bail!("mock intentional fail");
        }

        while let Some(()) = self.mailbox.recv()? {
            self.count.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(cancel) = &self.cancel {
            if cancel.recv()?.is_some() {
                return Ok(ControlFlow::Break(()));
            }
        }

        // Stop after handling just one set of messages
        if self.keep_running {
            Ok(ControlFlow::Continue(()))
        } else {
            Ok(ControlFlow::Break(()))
        }
    }
}

impl Drop for MockActor {
    fn drop(&mut self) {
        let _ = self.guard.take();
        self.dropped.store(true, Ordering::SeqCst);
    }
}
