//! The cooperative actor scheduler (spec component C9): an alternative to
//! driving a `Mailbox` with a blocking `receive()` call on its own thread.
//! An `Actor` is polled by a small worker pool whenever its mailbox has
//! unread messages, instead of parking a thread per actor.
//!
//! The original system modeled this with a coroutine/generator that
//! suspended itself mid-body on `receive`; Rust has no stable generator
//! syntax, so per spec §9 DESIGN NOTES this is rebuilt as an explicit
//! state machine: `Actor::handle` is called once per available message and
//! returns an [`ActorControl`] telling the scheduler whether to keep
//! polling or stop, rather than yielding partway through a function body.
//!
//! Grounded on the teacher's use of a small fixed worker pool pattern and
//! on `mesh-rt`'s `crossbeam-channel`-fed dispatch
//! (`examples/snowdamiz-mesh-lang/crates/mesh-rt`, which pulls in
//! `crossbeam-channel`/`crossbeam-deque` for exactly this purpose).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::mailbox::Mailbox;
use crate::term::{Pid, Term};

/// What an actor wants to happen after handling the messages currently
/// available in its mailbox.
pub enum ActorControl {
    /// Keep the actor registered; re-poll next time its mailbox wakes.
    Continue,
    /// Unregister the actor and close its mailbox with `reason`, breaking
    /// any outstanding links.
    Stop(Term),
}

/// A unit of scheduled work. `handle` is called once per message actually
/// dequeued (including synthetic exit signals, surfaced as an `Err` on
/// `Mailbox::poll`), never concurrently with itself: the scheduler holds
/// each actor's own lock for the duration of a poll pass.
pub trait Actor: Send {
    /// Called once, synchronously, right after [`ActorScheduler::spawn`]
    /// registers the actor -- before any message can arrive.
    fn init(&mut self) -> ActorControl {
        ActorControl::Continue
    }

    fn handle(&mut self, received: crate::mailbox::Received) -> ActorControl;

    /// Called when the head of the mailbox is an exit signal rather than a
    /// regular message. The default OTP-like behavior is to stop with the
    /// carried reason; override for an actor that traps exits.
    fn handle_exit(&mut self, from: Pid, reason: Term) -> ActorControl {
        let _ = from;
        ActorControl::Stop(reason)
    }
}

struct Task {
    mailbox: Arc<Mailbox>,
    actor: Mutex<Box<dyn Actor>>,
}

/// Owns the actor population and the work queue driving them.
///
/// `wake` is the entry point `node::Node`'s `MailRouter::wake_scheduler`
/// implementation calls whenever a message is delivered to an actor-kind
/// mailbox; worker threads (or, in tests, [`ActorScheduler::run_once`])
/// drain the queue and invoke [`Actor::handle`] until each woken mailbox
/// is empty again.
pub struct ActorScheduler {
    tasks: Mutex<FxHashMap<Pid, Arc<Task>>>,
    work_tx: Sender<Pid>,
    work_rx: Receiver<Pid>,
    shutdown: Arc<AtomicBool>,
}

impl Default for ActorScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorScheduler {
    pub fn new() -> Self {
        let (work_tx, work_rx) = unbounded();
        ActorScheduler {
            tasks: Mutex::new(FxHashMap::default()),
            work_tx,
            work_rx,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers `actor` under `mailbox`'s pid, runs its `init`, and -- if
    /// `init` already decided to stop, or messages were delivered before
    /// registration completed -- schedules an immediate poll pass.
    pub fn spawn(&self, mailbox: Arc<Mailbox>, mut actor: Box<dyn Actor>) {
        let pid = mailbox.pid().clone();
        let control = actor.init();
        let task = Arc::new(Task {
            mailbox: Arc::clone(&mailbox),
            actor: Mutex::new(actor),
        });
        self.tasks.lock().insert(pid.clone(), task);
        match control {
            ActorControl::Continue => {
                if !mailbox.is_empty() {
                    self.wake(&pid);
                }
            }
            ActorControl::Stop(reason) => {
                self.stop(&pid, reason);
            }
        }
    }

    /// Enqueues `pid` for a poll pass. Safe to call repeatedly before the
    /// queue drains -- worker threads loop each task until its mailbox is
    /// empty, so redundant wakeups just mean an extra no-op pass.
    pub fn wake(&self, pid: &Pid) {
        if self.tasks.lock().contains_key(pid) {
            let _ = self.work_tx.send(pid.clone());
        }
    }

    /// Unregisters `pid` and closes its mailbox with `reason`, tearing
    /// down any links the actor held.
    pub fn cancel(&self, pid: &Pid, reason: Term) {
        self.stop(pid, reason);
    }

    fn stop(&self, pid: &Pid, reason: Term) {
        if let Some(task) = self.tasks.lock().remove(pid) {
            task.mailbox.close_reason(reason);
        }
    }

    /// Pops and fully drains one woken pid's mailbox. Returns `false` if
    /// the queue was empty (nothing to do) -- used both by background
    /// workers (wrapped in a blocking `recv`) and directly by tests.
    pub fn run_once(&self) -> bool {
        let pid = match self.work_rx.try_recv() {
            Ok(pid) => pid,
            Err(_) => return false,
        };
        self.drain(&pid);
        true
    }

    fn drain(&self, pid: &Pid) {
        let task = match self.tasks.lock().get(pid).cloned() {
            Some(task) => task,
            None => return,
        };
        let mut actor = task.actor.lock();
        loop {
            let Some(result) = task.mailbox.poll() else {
                break;
            };
            let control = match result {
                Ok(received) => actor.handle(received),
                Err(crate::mailbox::MailboxError::Exit { from, reason }) => actor.handle_exit(from, reason),
                Err(_) => ActorControl::Stop(Term::atom("closed").expect("'closed' is a valid atom")),
            };
            if let ActorControl::Stop(reason) = control {
                drop(actor);
                self.stop(pid, reason);
                return;
            }
        }
    }

    /// Spawns `workers` background threads that block on the work queue
    /// and drain tasks as they wake, until [`ActorScheduler::shutdown`] is
    /// called. The scheduler must be held in an `Arc` to share it with the
    /// threads.
    pub fn start(self: Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|i| {
                let scheduler = Arc::clone(&self);
                std::thread::Builder::new()
                    .name(format!("erl-actor-worker-{i}"))
                    .spawn(move || {
                        while !scheduler.shutdown.load(Ordering::Acquire) {
                            match scheduler.work_rx.recv_timeout(Duration::from_millis(200)) {
                                Ok(pid) => scheduler.drain(&pid),
                                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                            }
                        }
                    })
                    .expect("spawning actor worker thread")
            })
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{MailRouter, MailboxError, MailboxKind};
    use crate::naming::NodeName;
    use crate::term::Atom;
    use std::sync::atomic::AtomicUsize;

    fn pid(id: u32) -> Pid {
        Pid::new(Atom::new("a@b").unwrap(), id, 0, 1)
    }

    struct NullRouter;
    impl MailRouter for NullRouter {
        fn node_name(&self) -> NodeName {
            "a@b".parse().unwrap()
        }
        fn send(&self, _from: Option<Pid>, _to: Pid, _message: Term) -> Result<(), MailboxError> {
            Ok(())
        }
        fn reg_send(&self, _from: Pid, _name: Atom, _to_node: NodeName, _message: Term) -> Result<(), MailboxError> {
            Ok(())
        }
        fn link(&self, _from: Pid, _to: Pid) -> Result<(), MailboxError> {
            Ok(())
        }
        fn unlink(&self, _from: Pid, _to: Pid) -> Result<(), MailboxError> {
            Ok(())
        }
        fn exit_signal(&self, _from: Pid, _to: Pid, _reason: Term, _break_link: bool) -> Result<(), MailboxError> {
            Ok(())
        }
        fn unregister(&self, _pid: &Pid, _name: Option<&Atom>) {}
        fn wake_scheduler(&self, _pid: &Pid) {}
    }

    fn actor_mailbox(pid_value: Pid) -> Arc<Mailbox> {
        let router: Arc<dyn MailRouter> = Arc::new(NullRouter);
        Arc::new(Mailbox::new(pid_value, MailboxKind::Actor, Arc::downgrade(&router)))
    }

    struct CountingActor {
        count: Arc<AtomicUsize>,
    }

    impl Actor for CountingActor {
        fn handle(&mut self, _received: crate::mailbox::Received) -> ActorControl {
            self.count.fetch_add(1, Ordering::SeqCst);
            ActorControl::Continue
        }
    }

    #[test]
    fn run_once_drains_every_pending_message() {
        let scheduler = ActorScheduler::new();
        let mailbox = actor_mailbox(pid(1));
        let count = Arc::new(AtomicUsize::new(0));
        scheduler.spawn(Arc::clone(&mailbox), Box::new(CountingActor { count: Arc::clone(&count) }));

        for _ in 0..3 {
            mailbox.deliver(None, Term::atom("ping").unwrap());
        }
        // delivery wakes the scheduler via the router in production; here
        // there's no live router instance shared with the scheduler, so
        // drive the queue directly.
        scheduler.wake(&pid(1));
        assert!(scheduler.run_once());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    struct StoppingActor;
    impl Actor for StoppingActor {
        fn handle(&mut self, _received: crate::mailbox::Received) -> ActorControl {
            ActorControl::Stop(Term::atom("done").unwrap())
        }
    }

    #[test]
    fn stop_unregisters_the_task() {
        let scheduler = ActorScheduler::new();
        let mailbox = actor_mailbox(pid(2));
        scheduler.spawn(Arc::clone(&mailbox), Box::new(StoppingActor));
        mailbox.deliver(None, Term::atom("go").unwrap());
        scheduler.wake(&pid(2));
        scheduler.run_once();
        assert_eq!(scheduler.task_count(), 0);
    }
}
