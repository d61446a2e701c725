use std::collections::VecDeque;

use codec::{CubeAddress, message::Payload};

/// Opaque handle for one open transport link, assigned by the dispatcher
/// when it accepts or opens a connection. The engine never dereferences
/// this into a socket; it only uses it to address `EngineAction::SendOnLink`/
/// `CloseLink` back at the dispatcher (see the "cyclic references" design
/// note: a handle-id indirection instead of a back-reference).
pub type LinkId = u64;

/// One message delivered to the application (spec section 4.8).
#[derive(Debug, Clone, PartialEq)]
pub enum InboxEntry {
    Data { src: CubeAddress, payload: Payload },
    /// A `send`/routed control message could not be delivered; carries the
    /// destination that could not be reached.
    Invalid { attempted_dst: CubeAddress },
}

/// Node-local state (spec section 3). Exclusively owned and mutated by the
/// engine; the dispatcher only ever reads `addr`/`dim` to label log lines.
pub struct CubeState {
    pub dim: u32,
    pub addr: CubeAddress,
    /// Indexed by dimension-link number `0..dim`.
    pub neighbors: Vec<Option<LinkId>>,
    pub inbox: VecDeque<InboxEntry>,
}

impl CubeState {
    /// A fresh, unattached node: dimension zero, no address yet (it is
    /// assigned by the admission protocol's first successful `connect`,
    /// except for the very first node of a cube, which starts at address
    /// `0`).
    pub fn new_root() -> Self {
        Self {
            dim: 0,
            addr: CubeAddress::Node(0),
            neighbors: Vec::new(),
            inbox: VecDeque::new(),
        }
    }

    pub fn links_count(&self) -> usize {
        self.neighbors.iter().filter(|n| n.is_some()).count()
    }

    pub fn link_for_dim(&self, i: usize) -> Option<LinkId> {
        self.neighbors.get(i).copied().flatten()
    }

    /// Link number of `link`, if it is currently an adopted neighbor.
    pub fn dim_of_link(&self, link: LinkId) -> Option<usize> {
        self.neighbors.iter().position(|n| *n == Some(link))
    }

    /// Vacancy check used by willingness/ability during admission: is there
    /// a free link to offer a new neighbor on?
    pub fn vacancy(&self) -> bool {
        self.neighbors.iter().any(|n| n.is_none()) || (self.neighbors.len() as u32) < self.dim
    }

    /// Lowest unset bit among `0..dim`, i.e. the link a new neighbor would
    /// be adopted on if offered now; `None` if the node is full (expansion
    /// required).
    pub fn lowest_vacant_link(&self) -> Option<usize> {
        (0..self.dim as usize).find(|&i| self.link_for_dim(i).is_none())
    }

    /// Adopt `link` as the neighbor reached via dimension-link `i`,
    /// growing `dim` if `i` is the next dimension (spec section 4.1/4.6
    /// edge path: `add_neighbor` increments `dim` when `link >= dim`).
    pub fn add_neighbor(&mut self, i: usize, link: LinkId) {
        if i as u32 >= self.dim {
            self.dim = i as u32 + 1;
        }

        if self.neighbors.len() <= i {
            self.neighbors.resize(i + 1, None);
        }

        self.neighbors[i] = Some(link);
    }

    /// Drop the neighbor at dimension-link `i`, if any. Returns whether a
    /// live neighbor was actually removed (the caller uses this to decide
    /// whether to fire `neighbor_disconnected`).
    pub fn remove_neighbor(&mut self, i: usize) -> bool {
        if let Some(slot) = self.neighbors.get_mut(i) {
            return slot.take().is_some();
        }
        false
    }

    pub fn remove_link(&mut self, link: LinkId) -> Option<usize> {
        let i = self.dim_of_link(link)?;
        self.remove_neighbor(i);
        Some(i)
    }
}
