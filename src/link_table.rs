//! Per-connection link table (spec component C6): the set of
//! `(local_pid, remote_pid)` pairs a single connection has established via
//! `LINK` control messages. Guarded by one lock, the way `socket.rs` guards
//! its single `Socket<T>` and `mesh-rt`'s registries guard their maps
//! (`examples/snowdamiz-mesh-lang/crates/mesh-rt/src/actor/registry.rs`).
//!
//! Expected size is small (single digits per connection per spec §4.6), so
//! a linear-scan `Vec` under one lock is the right tradeoff over a hash set
//! keyed on either side.

use crate::term::Pid;
use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct LinkTable {
    pairs: Mutex<Vec<(Pid, Pid)>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: adding an already-present pair is a no-op.
    pub fn add(&self, local: Pid, remote: Pid) {
        let mut pairs = self.pairs.lock();
        if !pairs.iter().any(|(l, r)| *l == local && *r == remote) {
            pairs.push((local, remote));
        }
    }

    pub fn remove(&self, local: &Pid, remote: &Pid) {
        self.pairs.lock().retain(|(l, r)| !(l == local && r == remote));
    }

    pub fn exists(&self, local: &Pid, remote: &Pid) -> bool {
        self.pairs.lock().iter().any(|(l, r)| l == local && r == remote)
    }

    pub fn local_pids(&self) -> Vec<Pid> {
        self.pairs.lock().iter().map(|(l, _)| l.clone()).collect()
    }

    pub fn remote_pids(&self) -> Vec<Pid> {
        self.pairs.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Drains and returns every pair. Called once when the owning
    /// connection dies, so each local pid can be delivered exactly one
    /// synthetic `{EXIT, remote, local, 'noconnection'}`.
    pub fn clear_all(&self) -> Vec<(Pid, Pid)> {
        std::mem::take(&mut *self.pairs.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::Atom;

    fn pid(id: u32) -> Pid {
        Pid::new(Atom::new("a@b").unwrap(), id, 0, 1)
    }

    #[test]
    fn add_is_idempotent() {
        let table = LinkTable::new();
        table.add(pid(1), pid(2));
        table.add(pid(1), pid(2));
        assert_eq!(table.local_pids(), vec![pid(1)]);
    }

    #[test]
    fn remove_drops_only_the_matching_pair() {
        let table = LinkTable::new();
        table.add(pid(1), pid(2));
        table.add(pid(1), pid(3));
        table.remove(&pid(1), &pid(2));
        assert!(!table.exists(&pid(1), &pid(2)));
        assert!(table.exists(&pid(1), &pid(3)));
    }

    #[test]
    fn clear_all_drains_and_empties() {
        let table = LinkTable::new();
        table.add(pid(1), pid(2));
        table.add(pid(4), pid(5));
        let drained = table.clear_all();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
