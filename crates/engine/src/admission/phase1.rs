//! Phase 1 — locating an attachment point (spec section 4.6). The INN
//! broadcasts `CONN_INN_GEN_ANN` into the cube; every recipient becomes a
//! `Gen` record, aggregates its children's `(unwilling, able)` replies with
//! its own contribution, and forwards one combined `CONN_GEN_INN_AVAIL`
//! upstream. The INN, once fully aggregated, runs ANN selection.
//!
//! Every function here is called with `candidate` already resolved by
//! `AdmissionEngine::handle` (from the message's `peer` field, or, for the
//! bootstrap `CONN_EXT_INN_ATTACH`, from the transport-observed remote
//! address recorded when the link was accepted).

use std::net::SocketAddr;

use codec::{CubeAddress, Message, MessageType, Payload, TravelVector};

use crate::action::EngineAction;
use crate::admission::connection::ConnectionState;
use crate::admission::edge;
use crate::router::{Router, RouteOutcome};
use crate::state::{CubeState, LinkId};

use super::engine::AdmissionEngine;

/// Dimension-positions `travel` asked for but which this node has no live
/// link on — auto-credited as "replied" since nothing will ever come back
/// on them (mirrors `Router::route_broadcast`'s own bookkeeping, computed
/// here since the router only returns the forward list, not this bitmap).
fn requested_but_absent(state: &CubeState, travel: &TravelVector) -> TravelVector {
    let mut invalid = TravelVector::zeros(state.dim as usize);
    for i in 0..state.dim as usize {
        if travel.get(i) && state.link_for_dim(i).is_none() {
            invalid.set(i, true);
        }
    }
    invalid
}

/// This node's own single-bit contribution to the aggregate, indexed by its
/// own cube address (spec section 4.6 phase 1 / 4.7).
fn own_contribution(state: &CubeState, willing: bool) -> (TravelVector, TravelVector) {
    let addr = state.addr.as_node().unwrap_or(0);
    let mut unwilling = TravelVector::zeros(0);
    let mut able = TravelVector::zeros(0);
    if !willing {
        unwilling.set(addr as usize, true);
    }
    if state.vacancy() {
        able.set(addr as usize, true);
    }
    (unwilling, able)
}

pub fn on_attach(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    if state.dim == 0 && engine.policy.am_willing(candidate) {
        return edge::single_node_attach(engine, state, candidate, link);
    }

    let (unwilling, able) = own_contribution(state, engine.policy.am_willing(candidate));
    let travel = TravelVector::full(state.dim as usize);
    let invalid = requested_but_absent(state, &travel);

    engine.connections.insert(
        candidate,
        ConnectionState::Inn {
            last_sent: MessageType::ConnInnGenAnn,
            client_link: link,
            replies: 0,
            unwilling,
            able,
            invalid,
            tried_anns: TravelVector::zeros(0),
        },
    );

    let ann_msg = Message::new(state.addr, CubeAddress::BcastProcess, MessageType::ConnInnGenAnn)
        .with_travel(travel)
        .with_peer(candidate);

    Router::route_broadcast(state, &ann_msg)
        .into_iter()
        .map(|(link, message)| EngineAction::SendOnLink { link, message })
        .collect()
}

pub fn on_broadcast(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    let Some(travel) = msg.travel.clone() else {
        return vec![EngineAction::SendOnLink { link, message: msg.error_reply(MessageType::InvalidFormat, None) }];
    };

    let forwards = Router::route_broadcast(state, &msg);
    let (own_unwilling, own_able) = own_contribution(state, engine.policy.am_willing(candidate));
    let expected = forwards.len() as u32;

    let mut actions: Vec<EngineAction> = forwards
        .into_iter()
        .map(|(link, message)| EngineAction::SendOnLink { link, message })
        .collect();

    if actions.is_empty() {
        // No subtree to wait on: reply immediately with our own contribution.
        let reply = Message::new(state.addr, msg.src, MessageType::ConnGenInnAvail)
            .with_peer(candidate)
            .with_data(Payload::Ability { unwilling: own_unwilling, able: own_able });
        actions.push(EngineAction::SendOnLink { link, message: reply });
    } else {
        engine.connections.insert(
            candidate,
            ConnectionState::Gen {
                last_sent: MessageType::ConnInnGenAnn,
                parent_link: link,
                inn_addr: msg.src,
                replies: 0,
                expected,
                unwilling: own_unwilling,
                able: own_able,
            },
        );
    }

    actions
}

pub fn on_avail(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    link: LinkId,
    candidate: SocketAddr,
    msg: Message,
) -> Vec<EngineAction> {
    let Some(Payload::Ability { unwilling: child_unwilling, able: child_able }) = msg.data.clone() else {
        return vec![EngineAction::SendOnLink { link, message: msg.error_reply(MessageType::InvalidData, None) }];
    };

    match engine.connections.get_mut(&candidate) {
        Some(ConnectionState::Gen { replies, expected, unwilling, able, parent_link, inn_addr, .. }) => {
            *replies += 1;
            *unwilling = unwilling.union(&child_unwilling);
            *able = able.union(&child_able);

            if *replies >= *expected {
                let (parent_link, inn_addr) = (*parent_link, *inn_addr);
                let reply = Message::new(state.addr, inn_addr, MessageType::ConnGenInnAvail)
                    .with_peer(candidate)
                    .with_data(Payload::Ability { unwilling: unwilling.clone(), able: able.clone() });
                engine.connections.remove(&candidate);
                vec![EngineAction::SendOnLink { link: parent_link, message: reply }]
            } else {
                Vec::new()
            }
        }
        Some(ConnectionState::Inn { replies, invalid, unwilling, able, .. }) => {
            *replies += 1;
            *unwilling = unwilling.union(&child_unwilling);
            *able = able.union(&child_able);

            if *replies + invalid.count_ones() as u32 >= state.dim {
                run_ann_selection(engine, state, candidate)
            } else {
                Vec::new()
            }
        }
        _ => vec![EngineAction::SendOnLink {
            link,
            message: msg.error_reply(
                MessageType::InvalidState,
                Some(Payload::StateTags { current: MessageType::InvalidMsg, attempted: msg.kind }),
            ),
        }],
    }
}

/// ANN selection (spec section 4.6 phase 1 termination): repeatedly pick a
/// random able candidate and check every pair of its prospective neighbors
/// is willing; hand off on success, expand by edge path on exhaustion.
fn run_ann_selection(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr) -> Vec<EngineAction> {
    let Some(ConnectionState::Inn { able, unwilling, mut tried_anns, client_link, .. }) =
        engine.connections.get(&candidate).cloned()
    else {
        return Vec::new();
    };

    let dim = state.dim as usize;
    let mut pool: Vec<usize> = (0..able.len()).filter(|&a| able.get(a) && !tried_anns.get(a)).collect();

    while !pool.is_empty() {
        let idx = engine.pick(pool.len());
        let a = pool.remove(idx);
        let a_addr = CubeAddress::Node(a as u64);

        let mut ok = true;
        'pairs: for i in 0..dim {
            for j in (i + 1)..dim {
                let neighbor = a_addr.follow_link(i).and_then(|n| n.follow_link(j)).and_then(|n| n.as_node());
                if let Some(n) = neighbor {
                    if unwilling.get(n as usize) {
                        ok = false;
                        break 'pairs;
                    }
                }
            }
        }

        if ok {
            if let Some(ConnectionState::Inn { last_sent, .. }) = engine.connections.get_mut(&candidate) {
                *last_sent = MessageType::ConnInnAnnHandoff;
            }
            let handoff = Message::new(state.addr, a_addr, MessageType::ConnInnAnnHandoff).with_peer(candidate);
            match Router::route_unicast(state, a_addr) {
                RouteOutcome::Forwarded(link) => {
                    return vec![EngineAction::SendOnLink { link, message: handoff }];
                }
                RouteOutcome::Delivered => {
                    // The INN itself is the chosen ANN: hand off in-process,
                    // preserving the INN's bookkeeping in case this
                    // candidacy fails and another must be tried.
                    tried_anns.set(a, true);
                    let snapshot = super::connection::InnSnapshot {
                        client_link,
                        unwilling: unwilling.clone(),
                        able: able.clone(),
                        tried_anns: tried_anns.clone(),
                    };
                    let _ = handoff;
                    return super::phase2::on_handoff(engine, state, client_link, candidate, true, Some(snapshot));
                }
                RouteOutcome::Unreachable => {
                    if let Some(ConnectionState::Inn { tried_anns, .. }) = engine.connections.get_mut(&candidate) {
                        tried_anns.set(a, true);
                    }
                }
            }
        } else if let Some(ConnectionState::Inn { tried_anns, .. }) = engine.connections.get_mut(&candidate) {
            tried_anns.set(a, true);
        }
    }

    // Exhaustion: attach by dimension expansion (edge path).
    edge::expand_attach(engine, state, candidate)
}

/// The INN's chosen (remote) ANN reported `CONN_ANN_INN_FAIL`: mark it
/// tried and pick another.
pub fn on_remote_ann_fail(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr, msg: Message) -> Vec<EngineAction> {
    if let (Some(failed), Some(ConnectionState::Inn { tried_anns, .. })) =
        (msg.src.as_node(), engine.connections.get_mut(&candidate))
    {
        tried_anns.set(failed as usize, true);
    }
    run_ann_selection(engine, state, candidate)
}

/// Rebuilds the `Inn` record a self-chosen `Ann` displaced and tries
/// another candidate, since a failed candidacy only rules out one ANN, not
/// the whole admission.
pub fn retry_after_ann_failure(
    engine: &mut AdmissionEngine,
    state: &mut CubeState,
    candidate: SocketAddr,
    _failed_addr: CubeAddress,
    snapshot: super::connection::InnSnapshot,
) -> Vec<EngineAction> {
    engine.connections.insert(
        candidate,
        ConnectionState::Inn {
            last_sent: MessageType::ConnInnAnnHandoff,
            client_link: snapshot.client_link,
            replies: 0,
            unwilling: snapshot.unwilling,
            able: snapshot.able,
            invalid: TravelVector::zeros(state.dim as usize),
            tried_anns: snapshot.tried_anns,
        },
    );

    run_ann_selection(engine, state, candidate)
}
