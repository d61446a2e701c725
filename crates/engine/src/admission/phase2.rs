//! Phase 2 — offering an address (spec section 4.6). The freshly-handed-off
//! ANN picks a candidate cube address, opens a transport link to the
//! client and offers it. `CONN_EXT_ANN_ACCEPT` moves on to phase 3 (or
//! straight to the single-neighbor fast path); `CONN_EXT_ANN_DECLINE` bails
//! back to the INN.

use std::net::SocketAddr;

use codec::{CubeAddress, Message, MessageType, Payload, TravelVector};

use crate::action::EngineAction;
use crate::admission::connection::{ConnectionState, InnSnapshot};
use crate::state::{CubeState, LinkId};

use super::engine::AdmissionEngine;

fn new_dim(state: &CubeState, is_expansion: bool) -> u32 {
    if is_expansion { state.dim + 1 } else { state.dim }
}

pub fn on_handoff(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    self_ann: bool,
    inn_snapshot: Option<InnSnapshot>,
) -> Vec<EngineAction> {
    on_handoff_inner(engine, state, link, candidate, self_ann, inn_snapshot, false)
}

/// Like `on_handoff`, but always grows the cube by one dimension instead of
/// filling an existing vacancy — the exhaustion edge path (spec section
/// 4.6), where no acceptable ANN was ever found.
pub fn force_expand(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    inn_snapshot: Option<InnSnapshot>,
) -> Vec<EngineAction> {
    on_handoff_inner(engine, state, link, candidate, true, inn_snapshot, true)
}

fn on_handoff_inner(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    self_ann: bool,
    inn_snapshot: Option<InnSnapshot>,
    force_expansion: bool,
) -> Vec<EngineAction> {
    let (new_addr, ann_dim_link, is_expansion) = if force_expansion {
        let addr = CubeAddress::Node(state.addr.as_node().unwrap_or(0) | (1u64 << state.dim));
        (addr, state.dim as usize, true)
    } else {
        match state.lowest_vacant_link() {
            Some(i) => (state.addr.follow_link(i).expect("node address"), i, false),
            None => {
                let addr = CubeAddress::Node(state.addr.as_node().unwrap_or(0) | (1u64 << state.dim));
                (addr, state.dim as usize, true)
            }
        }
    };

    let mut invalid = TravelVector::zeros(new_dim(state, is_expansion) as usize);
    // The ANN's own position is handled outside the neighbor-connect
    // fan-out (phase 4 adopts it directly), so it is pre-credited here.
    invalid.set(ann_dim_link, true);

    engine.connections.insert(
        candidate,
        ConnectionState::Ann {
            last_sent: MessageType::ConnAnnExtOffer,
            inn_link: link,
            client_link: None,
            candidate: new_addr,
            ann_dim_link,
            is_expansion,
            self_ann,
            inn_snapshot,
            invalid,
            replies: 0,
            identified: 0,
            connected: Vec::new(),
        },
    );

    let offer = Message::new(CubeAddress::Invalid, new_addr, MessageType::ConnAnnExtOffer)
        .with_data(Payload::Dim(new_dim(state, is_expansion)));

    vec![EngineAction::OpenAndSend { peer: candidate, message: offer }]
}

/// The dispatcher reports back once the offer's transport connection opens,
/// recording the link so later `CONN_EXT_ANN_ACCEPT`/`_DECLINE` (which
/// arrive on it with no `peer` field) resolve back to this entry.
pub fn on_client_link_opened(engine: &mut AdmissionEngine, candidate: SocketAddr, link: LinkId) {
    engine.link_to_peer.insert(link, candidate);
    if let Some(ConnectionState::Ann { client_link, .. }) = engine.connections.get_mut(&candidate) {
        *client_link = Some(link);
    }
}

pub fn on_accept(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    _msg: Message,
) -> Vec<EngineAction> {
    let is_sole_neighbor = match engine.connections.get(&candidate) {
        Some(ConnectionState::Ann { is_expansion: true, .. }) => true,
        Some(ConnectionState::Ann { is_expansion: false, .. }) => state.dim <= 1,
        _ => return Vec::new(),
    };

    if is_sole_neighbor {
        super::edge::ann_single_neighbor_finish(engine, state, candidate)
    } else {
        super::phase3::begin(engine, state, link, candidate)
    }
}

pub fn on_decline(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    _msg: Message,
) -> Vec<EngineAction> {
    let Some(ConnectionState::Ann { inn_link, candidate: new_addr, self_ann, inn_snapshot, .. }) =
        engine.connections.remove(&candidate)
    else {
        return Vec::new();
    };
    engine.link_to_peer.remove(&link);

    let mut actions = Vec::new();

    if let Some(snapshot) = inn_snapshot {
        actions.push(EngineAction::CloseLink { link });
        actions.extend(super::phase1::retry_after_ann_failure(engine, state, candidate, new_addr, snapshot));
    } else if self_ann {
        // No other candidate was ever tried (the single-node or
        // fully-expanded fast path): this is a terminal refusal, sent
        // before the shared link is torn down.
        let refused = Message::new(CubeAddress::Invalid, CubeAddress::Invalid, MessageType::ConnInnExtConnRefused);
        actions.push(EngineAction::SendOnLink { link: inn_link, message: refused });
        actions.push(EngineAction::CloseLink { link });
    } else {
        let fail = Message::new(state.addr, new_addr, MessageType::ConnAnnInnFail).with_peer(candidate);
        actions.push(EngineAction::SendOnLink { link: inn_link, message: fail });
        actions.push(EngineAction::CloseLink { link });
    }

    actions
}
