use std::net::SocketAddr;

use codec::{CubeAddress, MessageType, TravelVector};

use crate::state::LinkId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Inn,
    Gen,
    Ann,
    Nbr,
}

/// One admission-in-progress record, keyed by the candidate's transport
/// address in `AdmissionEngine::connections` (spec section 3). Replaces
/// the source's INN/ANN/NBR/CLT class hierarchy with a single tagged
/// variant per the "inheritance of state records" design note: a node
/// playing multiple roles across the lifetime of one admission (e.g. a
/// `Gen` that phase 1's ANN-selection promotes to `Ann`) simply has its
/// entry replaced by a different variant, not subclassed.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    /// This node is the ingress negotiation node.
    Inn {
        last_sent: MessageType,
        client_link: LinkId,
        /// Subtree replies received so far during phase 1 fan-out.
        replies: u32,
        unwilling: TravelVector,
        able: TravelVector,
        /// Dimension-links with no live neighbor (their subtree
        /// contributes nothing and counts as already-replied).
        invalid: TravelVector,
        /// Candidate ANN addresses already tried and rejected.
        tried_anns: TravelVector,
    },
    /// A generic node forwarding/aggregating phase 1's broadcast.
    Gen {
        last_sent: MessageType,
        parent_link: LinkId,
        /// The INN's cube address, so the aggregated reply can carry a
        /// proper unicast `dst` even though it is actually sent straight
        /// back down `parent_link`.
        inn_addr: CubeAddress,
        replies: u32,
        /// Number of children actually forwarded to (spec section 4.7):
        /// `travel`'s requested bits restricted to this node's live links,
        /// narrower than `dim` at any interior node. This, not `dim`, is
        /// what `replies` must reach.
        expected: u32,
        unwilling: TravelVector,
        able: TravelVector,
    },
    /// This node is the address-negotiation node.
    Ann {
        last_sent: MessageType,
        inn_link: LinkId,
        client_link: Option<LinkId>,
        candidate: CubeAddress,
        /// The dimension-link ANN itself occupies relative to `candidate`.
        ann_dim_link: usize,
        is_expansion: bool,
        /// Set when this node is also the INN (the handoff in phase 1 was
        /// delivered in-process rather than routed). There is then no
        /// separate INN record left to notify on success or failure.
        self_ann: bool,
        /// The INN bookkeeping this record displaced when `self_ann` is
        /// set, so a decline/bail can rebuild the `Inn` record and try
        /// another candidate instead of failing the whole admission.
        inn_snapshot: Option<InnSnapshot>,
        invalid: TravelVector,
        replies: u32,
        identified: u32,
        /// Addresses of neighbors that reported `CONNECTED` so far, so a
        /// bail can fail them individually.
        connected: Vec<CubeAddress>,
    },
    /// This node is a prospective neighbor of the candidate.
    Nbr {
        last_sent: MessageType,
        ann_link: LinkId,
        ann_addr: CubeAddress,
        client_link: Option<LinkId>,
        candidate: CubeAddress,
        dim_link: usize,
    },
}

/// Snapshot of an `Inn` record's phase 1 bookkeeping, carried by a
/// self-chosen `Ann` record so it can be restored if that candidacy fails.
#[derive(Debug, Clone)]
pub struct InnSnapshot {
    pub client_link: LinkId,
    pub unwilling: TravelVector,
    pub able: TravelVector,
    pub tried_anns: TravelVector,
}

impl ConnectionState {
    pub fn role(&self) -> Role {
        match self {
            Self::Inn { .. } => Role::Inn,
            Self::Gen { .. } => Role::Gen,
            Self::Ann { .. } => Role::Ann,
            Self::Nbr { .. } => Role::Nbr,
        }
    }

    pub fn last_sent(&self) -> MessageType {
        match self {
            Self::Inn { last_sent, .. }
            | Self::Gen { last_sent, .. }
            | Self::Ann { last_sent, .. }
            | Self::Nbr { last_sent, .. } => *last_sent,
        }
    }

    pub fn set_last_sent(&mut self, kind: MessageType) {
        match self {
            Self::Inn { last_sent, .. }
            | Self::Gen { last_sent, .. }
            | Self::Ann { last_sent, .. }
            | Self::Nbr { last_sent, .. } => *last_sent = kind,
        }
    }
}

/// The local application acting as the external candidate (spec section
/// 2's EXT role). A node can only be mid-admission as a candidate once at
/// a time, so this is a single slot on `AdmissionEngine` rather than an
/// entry in the peer-keyed table.
#[derive(Debug, Clone)]
pub struct ExtState {
    pub last_sent: MessageType,
    pub inn_addr: SocketAddr,
    pub inn_link: LinkId,
    /// Links opened so far toward the prospective ANN/NBRs, keyed by the
    /// cube address each one will turn out to be once it identifies
    /// itself (`None` until then).
    pub links: Vec<(LinkId, Option<CubeAddress>)>,
    pub candidate: Option<CubeAddress>,
    pub dim: Option<u32>,
}
