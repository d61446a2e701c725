//! Edge path — single-node cube and dimension expansion (spec section 4.6).
//! When there is no acceptable ANN (or the INN is alone), the INN acts as
//! the sole neighbor of its own candidate: it skips the reverse-broadcast
//! poll and phase 3 entirely, offering the next-dimension address straight
//! from `on_attach`/ANN-selection exhaustion.

use std::net::SocketAddr;

use crate::action::EngineAction;
use crate::admission::connection::ConnectionState;
use crate::state::{CubeState, LinkId};

use super::engine::AdmissionEngine;

/// `dim == 0`: there is nothing to broadcast to. Jump straight to offering
/// the candidate dimension-1 address.
pub fn single_node_attach(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr, link: LinkId) -> Vec<EngineAction> {
    super::phase2::on_handoff(engine, state, link, candidate, true, None)
}

/// ANN-selection exhaustion: no candidate in `able` has an all-willing
/// neighborhood. Attach the peer by growing the cube instead.
pub fn expand_attach(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr) -> Vec<EngineAction> {
    let Some(ConnectionState::Inn { client_link, .. }) = engine.connections.get(&candidate).cloned() else {
        return Vec::new();
    };
    super::phase2::force_expand(engine, state, client_link, candidate, None)
}

/// The candidate's only prospective neighbor is the ANN itself (dimension
/// 1, or every other neighbor position already invalid): skip phase 3 and
/// go directly to identification.
pub fn ann_single_neighbor_finish(engine: &mut AdmissionEngine, state: &mut CubeState, candidate: SocketAddr) -> Vec<EngineAction> {
    super::phase4::ann_begin_identify(engine, state, candidate)
}
