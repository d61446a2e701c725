use std::net::SocketAddr;

use codec::Message;

use crate::state::{InboxEntry, LinkId};

/// The side effects one call into the engine produces. The dispatcher
/// executes these; the engine itself never touches a socket (see
/// `routing/mod.rs`'s `RouteResult` in the teacher, generalized here to a
/// *list* of outcomes since one inbound message can fan out broadcasts or
/// drive multi-party orchestration).
#[derive(Debug)]
pub enum EngineAction {
    /// Write `message` on an already-open link.
    SendOnLink { link: LinkId, message: Message },
    /// Open a new transport connection to `peer` and send `message` once
    /// connected. The dispatcher must report the outcome back via
    /// `AdmissionEngine::on_link_opened`/`on_link_open_failed` so the
    /// engine can continue the admission flow that requested it.
    OpenAndSend { peer: SocketAddr, message: Message },
    /// Close a link (e.g. after a decline, or as part of a `bail`).
    CloseLink { link: LinkId },
    /// Adopt `link` as the neighbor on dimension-link `dim_link` (spec
    /// section 4.6 phase 4 `adopts`).
    AdoptNeighbor { link: LinkId, dim_link: usize },
    /// Deliver to the local application inbox and wake any blocked `recv`.
    Deliver(InboxEntry),
    /// Resolve a pending `connect()` call (spec section 4.4/9 "blocking
    /// connect via monitor").
    ConnectOutcome(Result<codec::CubeAddress, String>),
}
