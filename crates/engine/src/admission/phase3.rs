//! Phase 3 — neighbors connect (spec section 4.6). The ANN fans out
//! `CONN_ANN_NBR_CONNECT` by unicast to every prospective-neighbor address,
//! skipping its own position and any already-invalid one. Each neighbor
//! opens its own link to the client and reports back `CONNECTED` or
//! `DISCONNECTED`; any disconnection triggers a full bail.

use std::net::SocketAddr;

use codec::{CubeAddress, Message, MessageType, Payload};

use crate::action::EngineAction;
use crate::admission::connection::ConnectionState;
use crate::router::{Router, RouteOutcome};
use crate::state::{CubeState, LinkId};

use super::engine::AdmissionEngine;

/// Entered from `phase2::on_accept` once the candidate has more than one
/// prospective neighbor.
pub fn begin(engine: &mut AdmissionEngine, state: &mut CubeState, _ann_client_link: LinkId, candidate: SocketAddr) -> Vec<EngineAction> {
    let Some(ConnectionState::Ann { candidate: new_addr, ann_dim_link, invalid, .. }) = engine.connections.get(&candidate).cloned() else {
        return Vec::new();
    };

    let mut actions = Vec::new();
    let mut invalid = invalid;

    for i in 0..invalid.len() {
        if i == ann_dim_link || invalid.get(i) {
            continue;
        }
        let Some(neighbor_addr) = new_addr.follow_link(i) else { continue };

        let connect = Message::new(state.addr, neighbor_addr, MessageType::ConnAnnNbrConnect)
            .with_peer(candidate)
            .with_data(Payload::Candidate(new_addr));

        match Router::route_unicast(state, neighbor_addr) {
            RouteOutcome::Forwarded(link) => actions.push(EngineAction::SendOnLink { link, message: connect }),
            RouteOutcome::Delivered => {
                // We are our own neighbor candidate's peer at this index —
                // cannot happen since `i != ann_dim_link`, but treat as
                // unreachable defensively.
                invalid.set(i, true);
            }
            RouteOutcome::Unreachable => invalid.set(i, true),
        }
    }

    if let Some(ConnectionState::Ann { invalid: stored, last_sent, .. }) = engine.connections.get_mut(&candidate) {
        *stored = invalid.clone();
        *last_sent = MessageType::ConnAnnNbrConnect;
    }

    if invalid.count_ones() >= invalid.len() {
        actions.extend(super::phase4::ann_begin_identify(engine, state, candidate));
    }

    actions
}

/// A prospective neighbor receives `CONN_ANN_NBR_CONNECT` and opens its own
/// transport link to the client.
pub fn on_connect(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    let Some(Payload::Candidate(new_addr)) = msg.data else {
        return vec![EngineAction::SendOnLink { link, message: msg.error_reply(MessageType::InvalidData, None) }];
    };
    let dim_link = state.addr.relative_link(&new_addr).unwrap_or(state.dim as usize);

    engine.connections.insert(
        candidate,
        ConnectionState::Nbr {
            last_sent: MessageType::ConnNbrExtOffer,
            ann_link: link,
            ann_addr: msg.src,
            client_link: None,
            candidate: new_addr,
            dim_link,
        },
    );

    let offer = Message::new(CubeAddress::Invalid, new_addr, MessageType::ConnNbrExtOffer);
    vec![EngineAction::OpenAndSend { peer: candidate, message: offer }]
}

pub fn on_client_link_opened(engine: &mut AdmissionEngine, candidate: SocketAddr, link: LinkId) {
    engine.link_to_peer.insert(link, candidate);
    if let Some(ConnectionState::Nbr { client_link, .. }) = engine.connections.get_mut(&candidate) {
        *client_link = Some(link);
    }
}

pub fn on_ext_accept(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    let Some(ConnectionState::Nbr { ann_link, ann_addr, .. }) = engine.connections.get_mut(&candidate) else {
        return Vec::new();
    };
    let (ann_link, ann_addr) = (*ann_link, *ann_addr);

    let valid = msg.src.relative_link(&state.addr).is_some();
    let reply_kind = if valid { MessageType::ConnNbrAnnConnected } else { MessageType::ConnNbrAnnDisconnected };

    if let Some(ConnectionState::Nbr { last_sent, .. }) = engine.connections.get_mut(&candidate) {
        *last_sent = reply_kind;
    }
    if !valid {
        engine.connections.remove(&candidate);
        engine.link_to_peer.remove(&link);
    }

    let reply = Message::new(state.addr, ann_addr, reply_kind).with_peer(candidate);
    vec![EngineAction::SendOnLink { link: ann_link, message: reply }]
}

pub fn on_ext_decline(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    _msg: Message,
) -> Vec<EngineAction> {
    let Some(ConnectionState::Nbr { ann_link, ann_addr, .. }) = engine.connections.remove(&candidate) else {
        return Vec::new();
    };
    engine.link_to_peer.remove(&link);

    let reply = Message::new(state.addr, ann_addr, MessageType::ConnNbrAnnDisconnected).with_peer(candidate);
    vec![
        EngineAction::CloseLink { link },
        EngineAction::SendOnLink { link: ann_link, message: reply },
    ]
}

pub fn on_nbr_connected(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    _link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    let Some(ConnectionState::Ann { replies, invalid, connected, .. }) = engine.connections.get_mut(&candidate) else {
        return Vec::new();
    };
    *replies += 1;
    connected.push(msg.src);
    let done = *replies as usize + invalid.count_ones() >= invalid.len();

    if done {
        super::phase4::ann_begin_identify(engine, state, candidate)
    } else {
        Vec::new()
    }
}

pub fn on_nbr_disconnected(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    _link: LinkId,
    candidate: SocketAddr,
    _msg: Message,
) -> Vec<EngineAction> {
    bail(engine, state, candidate)
}

/// Bail (spec section 4.6 phase 3 termination): fail every connected NBR,
/// the client, and the INN, then discard the record.
pub fn bail(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr) -> Vec<EngineAction> {
    let Some(ConnectionState::Ann { inn_link, client_link, connected, candidate: new_addr, self_ann, inn_snapshot, .. }) =
        engine.connections.remove(&candidate)
    else {
        return Vec::new();
    };

    let mut actions = Vec::new();

    for nbr_addr in connected {
        let fail = Message::new(state.addr, nbr_addr, MessageType::ConnAnnNbrFail).with_peer(candidate);
        if let RouteOutcome::Forwarded(link) = Router::route_unicast(state, nbr_addr) {
            actions.push(EngineAction::SendOnLink { link, message: fail });
        }
    }

    if let Some(link) = client_link {
        let fail = Message::new(state.addr, new_addr, MessageType::ConnAnnExtFail);
        actions.push(EngineAction::SendOnLink { link, message: fail });
        actions.push(EngineAction::CloseLink { link });
    }

    if let Some(snapshot) = inn_snapshot {
        actions.extend(super::phase1::retry_after_ann_failure(engine, state, candidate, new_addr, snapshot));
    } else if self_ann {
        let refused = Message::new(CubeAddress::Invalid, CubeAddress::Invalid, MessageType::ConnInnExtConnRefused);
        actions.push(EngineAction::SendOnLink { link: inn_link, message: refused });
    } else {
        let fail_inn = Message::new(state.addr, new_addr, MessageType::ConnAnnInnFail).with_peer(candidate);
        actions.push(EngineAction::SendOnLink { link: inn_link, message: fail_inn });
    }

    actions
}
