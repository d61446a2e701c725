//! Phase 4 — identification (spec section 4.6). The ANN unicasts
//! `CONN_ANN_NBR_IDENTIFY` to every connected neighbor; each identifies
//! itself to the client, reports back, and adopts the new link. Once every
//! neighbor has identified, the ANN does the same for itself, tells the
//! INN, and the INN broadcasts a cleanup so generic-node records are
//! garbage-collected.

use std::net::SocketAddr;

use codec::{CubeAddress, Message, MessageType, Payload, TravelVector};

use crate::action::EngineAction;
use crate::admission::connection::ConnectionState;
use crate::router::{Router, RouteOutcome};
use crate::state::{CubeState, LinkId};

use super::engine::AdmissionEngine;

pub fn ann_begin_identify(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr) -> Vec<EngineAction> {
    let Some(ConnectionState::Ann { candidate: new_addr, connected, .. }) = engine.connections.get(&candidate).cloned() else {
        return Vec::new();
    };

    if connected.is_empty() {
        return ann_finalize(engine, state, candidate);
    }

    if let Some(ConnectionState::Ann { last_sent, identified, .. }) = engine.connections.get_mut(&candidate) {
        *last_sent = MessageType::ConnAnnNbrIdentify;
        *identified = 0;
    }

    connected
        .into_iter()
        .filter_map(|nbr_addr| {
            let identify = Message::new(state.addr, nbr_addr, MessageType::ConnAnnNbrIdentify)
                .with_peer(candidate)
                .with_data(Payload::Candidate(new_addr));
            match Router::route_unicast(state, nbr_addr) {
                RouteOutcome::Forwarded(link) => Some(EngineAction::SendOnLink { link, message: identify }),
                _ => None,
            }
        })
        .collect()
}

/// A prospective neighbor receives `CONN_ANN_NBR_IDENTIFY`: tell the
/// client who it really is, confirm to the ANN, adopt the link.
pub fn on_nbr_identify(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    let Some(ConnectionState::Nbr { ann_link, ann_addr, client_link, dim_link, .. }) = engine.connections.remove(&candidate) else {
        return Vec::new();
    };
    engine.link_to_peer.remove(&link);

    let Some(client_link) = client_link else { return Vec::new() };

    let identify = Message::new(state.addr, msg.src, MessageType::ConnNbrExtIdentify);
    let identified = Message::new(state.addr, ann_addr, MessageType::ConnNbrAnnIdentified).with_peer(candidate);

    state.add_neighbor(dim_link, client_link);

    vec![
        EngineAction::SendOnLink { link: client_link, message: identify },
        EngineAction::SendOnLink { link: ann_link, message: identified },
        EngineAction::AdoptNeighbor { link: client_link, dim_link },
    ]
}

pub fn on_nbr_identified(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    _link: LinkId,
    candidate: SocketAddr,
    _msg: Message,
) -> Vec<EngineAction> {
    let Some(ConnectionState::Ann { identified, connected, .. }) = engine.connections.get_mut(&candidate) else {
        return Vec::new();
    };
    *identified += 1;
    let done = *identified as usize >= connected.len();

    if done { ann_finalize(engine, state, candidate) } else { Vec::new() }
}

fn ann_finalize(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr) -> Vec<EngineAction> {
    let Some(ConnectionState::Ann { inn_link, client_link, candidate: new_addr, ann_dim_link, self_ann, .. }) =
        engine.connections.remove(&candidate)
    else {
        return Vec::new();
    };

    let mut actions = Vec::new();

    if let Some(client_link) = client_link {
        let identify = Message::new(state.addr, new_addr, MessageType::ConnNbrExtIdentify);
        let success = Message::new(state.addr, new_addr, MessageType::ConnAnnExtSuccess);
        actions.push(EngineAction::SendOnLink { link: client_link, message: identify });
        actions.push(EngineAction::SendOnLink { link: client_link, message: success });
        state.add_neighbor(ann_dim_link, client_link);
        actions.push(EngineAction::AdoptNeighbor { link: client_link, dim_link: ann_dim_link });
    }

    if self_ann {
        // No separate INN record to notify: the INN and the ANN are the
        // same node, and the candidate's link was just adopted above.
        actions.extend(cleanup_broadcast(state, candidate, new_addr));
    } else {
        let inn_success = Message::new(state.addr, new_addr, MessageType::ConnAnnInnSuccess).with_peer(candidate);
        actions.push(EngineAction::SendOnLink { link: inn_link, message: inn_success });
    }

    actions
}

fn cleanup_broadcast(state: &mut CubeState, candidate: SocketAddr, _new_addr: CubeAddress) -> Vec<EngineAction> {
    let cleanup = Message::new(state.addr, CubeAddress::BcastProcess, MessageType::ConnInnGenCleanup)
        .with_travel(TravelVector::full(state.dim as usize))
        .with_peer(candidate);

    Router::route_broadcast(state, &cleanup)
        .into_iter()
        .map(|(link, message)| EngineAction::SendOnLink { link, message })
        .collect()
}

/// The INN sees its candidate through to success: close the original
/// attach link and broadcast cleanup so every generic-node record for this
/// admission is garbage-collected.
pub fn on_inn_success(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    let Some(ConnectionState::Inn { client_link, .. }) = engine.connections.remove(&candidate) else {
        return Vec::new();
    };

    let mut actions = cleanup_broadcast(state, candidate, msg.dst);
    actions.push(EngineAction::CloseLink { link: client_link });
    let _ = link;
    actions
}

/// Any node holding a `Gen` record for this candidate drops it on cleanup,
/// then keeps forwarding the broadcast like any other.
pub fn on_gen_cleanup(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    _link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    engine.connections.remove(&candidate);

    Router::route_broadcast(state, &msg)
        .into_iter()
        .map(|(link, message)| EngineAction::SendOnLink { link, message })
        .collect()
}

/// EXT side: every `CONN_NBR_EXT_IDENTIFY` (whether from a plain neighbor
/// or the ANN identifying itself) tells the client who just connected on
/// `link`.
pub fn on_ext_identify(engine: &mut AdmissionEngine, link: LinkId, msg: Message) -> Vec<EngineAction> {
    if let Some(ext) = engine.ext.as_mut() {
        for entry in ext.links.iter_mut() {
            if entry.0 == link {
                entry.1 = Some(msg.src);
            }
        }
    }
    Vec::new()
}

/// EXT side: the admission is complete. Resolves the pending `connect()`.
pub fn on_ext_success(engine: &mut AdmissionEngine, state: &mut CubeState, msg: Message) -> Vec<EngineAction> {
    let Some(ext) = engine.ext.take() else { return Vec::new() };

    state.addr = msg.dst;
    for (link, addr) in ext.links {
        if let Some(addr) = addr {
            if let Some(dim_link) = state.addr.relative_link(&addr) {
                state.add_neighbor(dim_link, link);
            }
        }
    }

    vec![EngineAction::ConnectOutcome(Ok(state.addr))]
}

pub fn on_ext_fail(engine: &mut AdmissionEngine, _msg: Message) -> Vec<EngineAction> {
    let Some(ext) = engine.ext.take() else { return Vec::new() };
    let mut actions: Vec<EngineAction> = ext.links.iter().map(|(link, _)| EngineAction::CloseLink { link: *link }).collect();
    actions.push(EngineAction::CloseLink { link: ext.inn_link });
    actions.push(EngineAction::ConnectOutcome(Err("admission failed".to_string())));
    actions
}
