//! The mailbox (spec component C7): a FIFO inbox bound to a pid and an
//! optional registered name, supporting blocking receive, timed receive,
//! and non-blocking poll.
//!
//! Grounded on `mesh-rt`'s single-lock-per-structure convention
//! (`examples/snowdamiz-mesh-lang/crates/mesh-rt/src/actor/registry.rs`)
//! generalized from a name table to a per-process message queue, plus a
//! `parking_lot::Condvar` for the blocking/timed receive spec §4.7 and §5
//! require ("a synchronous `receive` on a mailbox suspends the calling
//! thread until delivery or timeout").
//!
//! `Mailbox` never holds a strong reference back to the owning `Node`:
//! routing (`send`/`link`/`exit`) goes through the [`MailRouter`] trait,
//! which `node::Node` implements. This keeps the dependency one-directional
//! at the type level even though the two collaborate at runtime, and means
//! a mailbox can't resurrect a node that has otherwise been dropped (the
//! "explicit owner, not weak references for retention" rule from spec §9
//! DESIGN NOTES).

use std::collections::VecDeque;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::naming::NodeName;
use crate::term::{Atom, Pid, Term};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MailboxError {
    #[error("receive timed out")]
    Timeout,
    #[error("exit signal from {from} (reason {reason:?})")]
    Exit { from: Pid, reason: Term },
    #[error("mailbox is closed")]
    Closed,
    #[error("no connection to the peer node")]
    NotConnected,
    #[error(transparent)]
    Encode(#[from] crate::term::EncodeError),
    #[error(transparent)]
    Decode(#[from] crate::term::DecodeError),
}

/// What kind of distribution operation a mailbox routes through its
/// owning node. Implemented by `node::Node` so `mailbox` doesn't need to
/// depend on `node` directly.
pub trait MailRouter: Send + Sync {
    fn node_name(&self) -> NodeName;

    /// Route a `SEND` (local delivery or `{2, Cookie, ToPid}` over a
    /// connection).
    fn send(&self, from: Option<Pid>, to: Pid, message: Term) -> Result<(), MailboxError>;

    /// Route a `REG_SEND` (local name lookup or `{6, FromPid, Cookie,
    /// ToName}` over a connection to `to_node`).
    fn reg_send(&self, from: Pid, name: Atom, to_node: NodeName, message: Term) -> Result<(), MailboxError>;

    fn link(&self, from: Pid, to: Pid) -> Result<(), MailboxError>;
    fn unlink(&self, from: Pid, to: Pid) -> Result<(), MailboxError>;

    /// `break_link` distinguishes a link-teardown `EXIT` (op 3, used when a
    /// mailbox closes and tears down its outstanding links) from a bare
    /// `EXIT2` (op 8, the wire form of the public `exit(pid, reason)` call,
    /// which does not imply the two pids were ever linked).
    fn exit_signal(&self, from: Pid, to: Pid, reason: Term, break_link: bool) -> Result<(), MailboxError>;

    fn unregister(&self, pid: &Pid, name: Option<&Atom>);
    fn wake_scheduler(&self, pid: &Pid);
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Message { from: Option<Pid>, message: Term },
    Exit { from: Pid, reason: Term },
}

/// A received message: who it's from (if known) and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub from: Option<Pid>,
    pub message: Term,
}

/// A synchronous mailbox's consumer thread drives `receive` directly; an
/// actor mailbox disallows blocking receive and instead wakes the
/// cooperative scheduler (`scheduler::ActorScheduler`) on each delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxKind {
    Sync,
    Actor,
}

struct State {
    queue: VecDeque<Entry>,
    links: Vec<Pid>,
    closed: bool,
}

pub struct Mailbox {
    pid: Pid,
    name: Mutex<Option<Atom>>,
    state: Mutex<State>,
    not_empty: Condvar,
    router: Weak<dyn MailRouter>,
    kind: MailboxKind,
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("pid", &self.pid)
            .field("name", &self.name.lock())
            .field("kind", &self.kind)
            .finish()
    }
}

impl Mailbox {
    pub fn new(pid: Pid, kind: MailboxKind, router: Weak<dyn MailRouter>) -> Self {
        Mailbox {
            pid,
            name: Mutex::new(None),
            state: Mutex::new(State {
                queue: VecDeque::new(),
                links: Vec::new(),
                closed: false,
            }),
            not_empty: Condvar::new(),
            router,
            kind,
        }
    }

    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    pub fn name(&self) -> Option<Atom> {
        self.name.lock().clone()
    }

    pub fn kind(&self) -> MailboxKind {
        self.kind
    }

    pub(crate) fn set_name(&self, name: Atom) {
        *self.name.lock() = Some(name);
    }

    /// Delivers a regular message (from a `SEND`/`REG_SEND` control tuple,
    /// or a local-delivery fast path). Wakes a blocked `receive` or, for an
    /// actor mailbox, the scheduler.
    pub fn deliver(&self, from: Option<Pid>, message: Term) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.queue.push_back(Entry::Message { from, message });
        drop(state);
        self.wake();
    }

    /// Delivers a synthetic or peer-originated exit signal. The next
    /// `receive` to dequeue it raises [`MailboxError::Exit`] instead of
    /// returning normally (spec §4.7: "If the head is an exit ... raises it
    /// instead").
    pub fn deliver_exit(&self, from: Pid, reason: Term) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.queue.push_back(Entry::Exit { from, reason });
        drop(state);
        self.wake();
    }

    fn wake(&self) {
        match self.kind {
            MailboxKind::Sync => {
                self.not_empty.notify_all();
            }
            MailboxKind::Actor => {
                if let Some(router) = self.router.upgrade() {
                    router.wake_scheduler(&self.pid);
                }
            }
        }
    }

    fn pop(entry: Entry) -> Result<Received, MailboxError> {
        match entry {
            Entry::Message { from, message } => Ok(Received { from, message }),
            Entry::Exit { from, reason } => Err(MailboxError::Exit { from, reason }),
        }
    }

    /// Blocks until a message (or exit signal) is available.
    pub fn receive(&self) -> Result<Received, MailboxError> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.queue.pop_front() {
                return Self::pop(entry);
            }
            if state.closed {
                return Err(MailboxError::Closed);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// As [`Mailbox::receive`], but gives up after `timeout`.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Received, MailboxError> {
        let mut state = self.state.lock();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(entry) = state.queue.pop_front() {
                return Self::pop(entry);
            }
            if state.closed {
                return Err(MailboxError::Closed);
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(MailboxError::Timeout);
            }
            let timed_out = self.not_empty.wait_for(&mut state, deadline - now);
            if timed_out.timed_out() && state.queue.is_empty() {
                return Err(MailboxError::Timeout);
            }
        }
    }

    /// Non-blocking: returns `None` if the queue is currently empty.
    pub fn poll(&self) -> Option<Result<Received, MailboxError>> {
        let mut state = self.state.lock();
        state.queue.pop_front().map(Self::pop)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    fn router(&self) -> Result<std::sync::Arc<dyn MailRouter>, MailboxError> {
        self.router.upgrade().ok_or(MailboxError::NotConnected)
    }

    pub fn send(&self, to: Pid, message: Term) -> Result<(), MailboxError> {
        self.router()?.send(Some(self.pid.clone()), to, message)
    }

    pub fn send_to_name(&self, name: Atom, node: NodeName, message: Term) -> Result<(), MailboxError> {
        self.router()?.reg_send(self.pid.clone(), name, node, message)
    }

    pub fn link(&self, to: Pid) -> Result<(), MailboxError> {
        {
            let mut state = self.state.lock();
            if !state.links.contains(&to) {
                state.links.push(to.clone());
            }
        }
        self.router()?.link(self.pid.clone(), to)
    }

    pub fn unlink(&self, to: Pid) -> Result<(), MailboxError> {
        self.state.lock().links.retain(|p| *p != to);
        self.router()?.unlink(self.pid.clone(), to)
    }

    /// Sends an `EXIT2` signal to `to` -- an unconditional exit signal, not
    /// a link teardown.
    pub fn exit(&self, to: Pid, reason: Term) -> Result<(), MailboxError> {
        self.router()?.exit_signal(self.pid.clone(), to, reason, false)
    }

    pub fn close(&self) {
        self.close_reason(Term::atom("normal").expect("'normal' is a valid atom"));
    }

    /// Breaks every outstanding link with `reason`, unregisters this
    /// mailbox's name (if any) and marks it closed so pending/future
    /// `receive` calls observe [`MailboxError::Closed`].
    pub fn close_reason(&self, reason: Term) {
        let links = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.links)
        };
        self.not_empty.notify_all();

        if let Some(router) = self.router.upgrade() {
            for linked in links {
                let _ = router.exit_signal(self.pid.clone(), linked, reason.clone(), true);
            }
            router.unregister(&self.pid, self.name().as_ref());
        }
    }

    /// Called by the node's dispatch path when a `LINK`/`UNLINK` control
    /// tuple names this mailbox, to keep its own link set (used for
    /// `close_reason`'s broadcast) in sync without re-issuing the control
    /// tuple the peer already sent.
    pub(crate) fn note_link(&self, peer: Pid) {
        let mut state = self.state.lock();
        if !state.links.contains(&peer) {
            state.links.push(peer);
        }
    }

    pub(crate) fn note_unlink(&self, peer: &Pid) {
        self.state.lock().links.retain(|p| p != peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

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

    fn pid(id: u32) -> Pid {
        Pid::new(Atom::new("a@b").unwrap(), id, 0, 1)
    }

    fn mailbox() -> Mailbox {
        let router: Arc<dyn MailRouter> = Arc::new(NullRouter);
        Mailbox::new(pid(1), MailboxKind::Sync, Arc::downgrade(&router))
    }

    #[test]
    fn fifo_delivery_order_is_preserved() {
        let mbox = mailbox();
        for i in 0..5 {
            mbox.deliver(None, Term::Integer(crate::term::Integer::from_i64(i)));
        }
        for i in 0..5 {
            let received = mbox.receive().unwrap();
            assert_eq!(received.message, Term::Integer(crate::term::Integer::from_i64(i)));
        }
    }

    #[test]
    fn receive_raises_exit_when_head_is_exit_signal() {
        let mbox = mailbox();
        mbox.deliver_exit(pid(2), Term::atom("noconnection").unwrap());
        let err = mbox.receive().unwrap_err();
        assert!(matches!(err, MailboxError::Exit { from, .. } if from == pid(2)));
    }

    #[test]
    fn poll_returns_none_when_empty() {
        let mbox = mailbox();
        assert!(mbox.poll().is_none());
    }

    #[test]
    fn receive_timeout_expires_with_no_message() {
        let mbox = mailbox();
        let err = mbox.receive_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, MailboxError::Timeout));
    }

    #[test]
    fn close_reason_unblocks_pending_receive() {
        let mbox = Arc::new(mailbox());
        let waiter = Arc::clone(&mbox);
        let handle = std::thread::spawn(move || waiter.receive());
        std::thread::sleep(Duration::from_millis(20));
        mbox.close();
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, MailboxError::Closed));
    }
}
