use std::collections::VecDeque;

use codec::CubeAddress;
use engine::InboxEntry;
use parking_lot::{Condvar, Mutex};

/// A point-in-time view of the engine task's `CubeState`, posted in answer
/// to a `Command::Query` (spec section 6: `cube_address()`/`dimension()`/
/// `neighbors()`).
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub addr: CubeAddress,
    pub dim: u32,
    /// Indexed by dimension-link; `None` where that link has no live
    /// neighbor, matching `CubeState::neighbors`'s own shape.
    pub neighbors: Vec<Option<CubeAddress>>,
}

/// Cross-thread rendezvous between the dispatcher thread's engine task and
/// application threads calling into `Handle` (spec section 4.4: "connect(),
/// recv() and broadcast() ... synchronize via a condition variable tied to
/// the inbox and a completion flag for in-progress connect").
#[derive(Default)]
pub struct Shared {
    inbox: Mutex<VecDeque<InboxEntry>>,
    inbox_cv: Condvar,
    connect_outcome: Mutex<Option<Result<CubeAddress, String>>>,
    connect_cv: Condvar,
    snapshot: Mutex<Option<NodeSnapshot>>,
    snapshot_cv: Condvar,
}

impl Shared {
    pub fn push_inbox(&self, entry: InboxEntry) {
        self.inbox.lock().push_back(entry);
        self.inbox_cv.notify_one();
    }

    /// Blocks the calling thread until a message is available.
    pub fn recv(&self) -> InboxEntry {
        let mut inbox = self.inbox.lock();
        loop {
            if let Some(entry) = inbox.pop_front() {
                return entry;
            }
            self.inbox_cv.wait(&mut inbox);
        }
    }

    pub fn recv_now(&self) -> Option<InboxEntry> {
        self.inbox.lock().pop_front()
    }

    pub fn available(&self) -> usize {
        self.inbox.lock().len()
    }

    pub fn set_connect_outcome(&self, outcome: Result<CubeAddress, String>) {
        *self.connect_outcome.lock() = Some(outcome);
        self.connect_cv.notify_all();
    }

    /// Blocks until `connect()`'s outcome is posted, consuming it.
    pub fn take_connect_outcome(&self) -> Result<CubeAddress, String> {
        let mut slot = self.connect_outcome.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.connect_cv.wait(&mut slot);
        }
    }

    pub fn set_snapshot(&self, snapshot: NodeSnapshot) {
        *self.snapshot.lock() = Some(snapshot);
        self.snapshot_cv.notify_all();
    }

    /// Blocks until a `Command::Query` answer is posted, consuming it.
    pub fn take_snapshot(&self) -> NodeSnapshot {
        let mut slot = self.snapshot.lock();
        loop {
            if let Some(snapshot) = slot.take() {
                return snapshot;
            }
            self.snapshot_cv.wait(&mut slot);
        }
    }
}
