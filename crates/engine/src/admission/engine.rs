//! The central state machine (spec section 4.6): `AdmissionEngine::handle`
//! is the sole entry point. It never touches a socket; it validates format
//! and ordering, resolves the candidate's transport address, and dispatches
//! by message type into the phase modules, returning the side effects for
//! a dispatcher to execute.

use std::collections::HashMap;
use std::net::SocketAddr;

use codec::{validate, Message, MessageType, Payload};
use rand::Rng as _;

use crate::action::EngineAction;
use crate::admission::connection::{ConnectionState, ExtState};
use crate::admission::{phase1, phase2, phase3, phase4, table};
use crate::policy::ProtocolPolicy;
use crate::router::Router;
use crate::state::{CubeState, LinkId};

/// True for the handful of tags a generic forwarding node must pass on
/// regardless of whether it is holding any admission record for the
/// candidate (spec section 4.6: "discarded... on a cleanup broadcast").
fn bypasses_state_check(kind: MessageType) -> bool {
    matches!(kind, MessageType::ConnInnGenCleanup | MessageType::ConnInnGenAnn)
}

fn is_ext_directed(kind: MessageType) -> bool {
    use MessageType::*;
    matches!(
        kind,
        ConnAnnExtOffer | ConnNbrExtOffer | ConnNbrExtIdentify | ConnAnnExtSuccess | ConnAnnExtFail | ConnInnExtConnRefused
    )
}

pub struct AdmissionEngine {
    pub connections: HashMap<SocketAddr, ConnectionState>,
    pub ext: Option<ExtState>,
    /// Transport addresses for links whose `peer` the format validator
    /// forbids carrying inline, recorded as soon as the dispatcher accepts
    /// or opens them.
    pub link_to_peer: HashMap<LinkId, SocketAddr>,
    pub policy: Box<dyn ProtocolPolicy>,
}

impl AdmissionEngine {
    pub fn new(policy: Box<dyn ProtocolPolicy>) -> Self {
        Self {
            connections: HashMap::new(),
            ext: None,
            link_to_peer: HashMap::new(),
            policy,
        }
    }

    /// The dispatcher reports a freshly-accepted inbound link here so
    /// `CONN_EXT_INN_ATTACH` (which carries no `peer`) can still be keyed.
    pub fn on_link_accepted(&mut self, link: LinkId, remote: SocketAddr) {
        self.link_to_peer.insert(link, remote);
    }

    pub fn on_link_opened(&mut self, peer: SocketAddr, link: LinkId) {
        self.link_to_peer.insert(link, peer);
        match self.connections.get(&peer) {
            Some(ConnectionState::Ann { .. }) => phase2::on_client_link_opened(self, peer, link),
            Some(ConnectionState::Nbr { .. }) => phase3::on_client_link_opened(self, peer, link),
            _ => {
                if let Some(ext) = self.ext.as_mut() {
                    ext.links.push((link, None));
                }
            }
        }
    }

    /// The dispatcher's `OpenAndSend` to `peer` never established a
    /// transport connection: fail the admission the same way a decline
    /// would, minus closing a link that never opened.
    pub fn on_link_open_failed(&mut self, state: &mut CubeState, peer: SocketAddr) -> Vec<EngineAction> {
        if self.ext.as_ref().is_some_and(|ext| ext.inn_addr == peer) {
            self.ext = None;
            return vec![EngineAction::ConnectOutcome(Err("connection refused".to_string()))];
        }

        match self.connections.remove(&peer) {
            Some(ConnectionState::Ann { inn_link, self_ann, inn_snapshot, candidate: new_addr, .. }) => {
                if let Some(snapshot) = inn_snapshot {
                    super::phase1::retry_after_ann_failure(self, state, peer, new_addr, snapshot)
                } else if self_ann {
                    let refused = Message::new(codec::CubeAddress::Invalid, codec::CubeAddress::Invalid, MessageType::ConnInnExtConnRefused);
                    vec![EngineAction::SendOnLink { link: inn_link, message: refused }]
                } else {
                    let fail = Message::new(state.addr, new_addr, MessageType::ConnAnnInnFail).with_peer(peer);
                    vec![EngineAction::SendOnLink { link: inn_link, message: fail }]
                }
            }
            Some(ConnectionState::Nbr { ann_link, ann_addr, .. }) => {
                let fail = Message::new(state.addr, ann_addr, MessageType::ConnNbrAnnDisconnected).with_peer(peer);
                vec![EngineAction::SendOnLink { link: ann_link, message: fail }]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_link_closed(&mut self, state: &mut CubeState, link: LinkId) -> Vec<EngineAction> {
        self.link_to_peer.remove(&link);
        if let Some(i) = state.remove_link(link) {
            self.policy.neighbor_disconnected(link);
            let _ = i;
        }
        Vec::new()
    }

    /// Uniform random index in `0..n` (spec section 4.6 ANN selection:
    /// "pick a random bit").
    pub fn pick(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        rand::rng().random_range(0..n)
    }

    /// The sole entry point: validate, resolve, check ordering, dispatch.
    pub fn handle(&mut self, state: &mut CubeState, link: LinkId, msg: Message) -> Vec<EngineAction> {
        if !validate::is_well_formed(&msg) {
            return vec![EngineAction::SendOnLink { link, message: msg.error_reply(MessageType::InvalidFormat, None) }];
        }

        let candidate = msg.peer.or_else(|| self.link_to_peer.get(&link).copied());

        if !bypasses_state_check(msg.kind) {
            if let Some(expected) = table::required_previous(msg.kind) {
                let current = if is_ext_directed(msg.kind) {
                    self.ext.as_ref().map(|e| e.last_sent)
                } else {
                    candidate.and_then(|c| self.connections.get(&c)).map(|c| c.last_sent())
                };

                if current != Some(expected) {
                    return vec![EngineAction::SendOnLink {
                        link,
                        message: msg.error_reply(
                            MessageType::InvalidState,
                            Some(Payload::StateTags {
                                current: current.unwrap_or(MessageType::InvalidMsg),
                                attempted: msg.kind,
                            }),
                        ),
                    }];
                }
            }
        }

        use MessageType::*;
        match msg.kind {
            ConnExtInnAttach => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase1::on_attach(self, state, link, candidate, msg)
            }
            ConnInnGenAnn => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase1::on_broadcast(self, state, link, candidate, msg)
            }
            ConnGenInnAvail => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase1::on_avail(self, state, link, candidate, msg)
            }
            ConnInnAnnHandoff => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase2::on_handoff(self, state, link, candidate, false, None)
            }
            ConnAnnExtOffer => self.on_ext_offer(state, link, msg),
            ConnExtAnnAccept => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase2::on_accept(self, state, link, candidate, msg)
            }
            ConnExtAnnDecline => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase2::on_decline(self, state, link, candidate, msg)
            }
            ConnAnnNbrConnect => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase3::on_connect(self, state, link, candidate, msg)
            }
            ConnNbrExtOffer => self.on_nbr_ext_offer(link, msg),
            ConnExtNbrAccept => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase3::on_ext_accept(self, state, link, candidate, msg)
            }
            ConnExtNbrDecline => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase3::on_ext_decline(self, state, link, candidate, msg)
            }
            ConnNbrAnnConnected => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase3::on_nbr_connected(self, state, link, candidate, msg)
            }
            ConnNbrAnnDisconnected => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase3::on_nbr_disconnected(self, state, link, candidate, msg)
            }
            ConnAnnNbrIdentify => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase4::on_nbr_identify(self, state, link, candidate, msg)
            }
            ConnNbrExtIdentify => phase4::on_ext_identify(self, link, msg),
            ConnNbrAnnIdentified => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase4::on_nbr_identified(self, state, link, candidate, msg)
            }
            ConnAnnExtSuccess => phase4::on_ext_success(self, state, msg),
            ConnAnnInnSuccess => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase4::on_inn_success(self, state, link, candidate, msg)
            }
            ConnInnGenCleanup => {
                let Some(candidate) = candidate else {
                    return Router::route_broadcast(state, &msg)
                        .into_iter()
                        .map(|(link, message)| EngineAction::SendOnLink { link, message })
                        .collect();
                };
                phase4::on_gen_cleanup(self, state, link, candidate, msg)
            }
            ConnAnnInnFail => {
                let Some(candidate) = candidate else { return Vec::new() };
                phase1::on_remote_ann_fail(self, state, candidate, msg)
            }
            ConnAnnNbrFail => {
                let Some(candidate) = candidate else { return Vec::new() };
                self.connections.remove(&candidate);
                vec![EngineAction::CloseLink { link }]
            }
            ConnAnnExtFail => phase4::on_ext_fail(self, msg),
            ConnInnExtConnRefused => phase4::on_ext_fail(self, msg),
            InvalidFormat | InvalidAddress | InvalidState | InvalidData => self.on_admission_error(state, link, candidate),
            UnicastMsg => self.on_unicast_data(state, link, msg),
            BroadcastMsg | NodeShutdown => self.on_broadcast_data(state, msg),
            ReverseBroadcastMsg | InvalidMsg => Vec::new(),
        }
    }

    fn on_ext_offer(&mut self, _state: &mut CubeState, link: LinkId, msg: Message) -> Vec<EngineAction> {
        let Some(Payload::Dim(dim)) = msg.data else { return Vec::new() };
        if let Some(ext) = self.ext.as_mut() {
            ext.candidate = Some(msg.dst);
            ext.dim = Some(dim);
            ext.last_sent = MessageType::ConnExtAnnAccept;
            if !ext.links.iter().any(|(l, _)| *l == link) {
                ext.links.push((link, None));
            }
        }
        let accept = Message::new(codec::CubeAddress::Invalid, msg.dst, MessageType::ConnExtAnnAccept);
        vec![EngineAction::SendOnLink { link, message: accept }]
    }

    fn on_nbr_ext_offer(&mut self, link: LinkId, msg: Message) -> Vec<EngineAction> {
        let mut candidate = msg.dst;
        if let Some(ext) = self.ext.as_mut() {
            if !ext.links.iter().any(|(l, _)| *l == link) {
                ext.links.push((link, None));
            }
            candidate = ext.candidate.unwrap_or(msg.dst);
        }
        // `src` must be a valid neighbor of the NBR (spec section 4.6 phase
        // 3): the candidate's own address, which is what the NBR checks
        // with `relative_link` on receipt.
        let accept = Message::new(candidate, msg.dst, MessageType::ConnExtNbrAccept);
        vec![EngineAction::SendOnLink { link, message: accept }]
    }

    fn on_admission_error(&mut self, state: &mut CubeState, link: LinkId, candidate: Option<SocketAddr>) -> Vec<EngineAction> {
        let Some(candidate) = candidate else {
            self.ext = None;
            return vec![EngineAction::CloseLink { link }];
        };
        match self.connections.get(&candidate).map(|c| c.role()) {
            Some(crate::admission::connection::Role::Ann) => phase3::bail(self, state, candidate),
            _ => {
                self.connections.remove(&candidate);
                vec![EngineAction::CloseLink { link }]
            }
        }
    }

    fn on_unicast_data(&mut self, state: &mut CubeState, link: LinkId, msg: Message) -> Vec<EngineAction> {
        match Router::route_unicast(state, msg.dst) {
            crate::router::RouteOutcome::Delivered => {
                vec![EngineAction::Deliver(crate::state::InboxEntry::Data {
                    src: msg.src,
                    payload: msg.data.clone().unwrap_or(Payload::Bytes(Default::default())),
                })]
            }
            crate::router::RouteOutcome::Forwarded(next) => vec![EngineAction::SendOnLink { link: next, message: msg }],
            crate::router::RouteOutcome::Unreachable => {
                vec![EngineAction::SendOnLink { link, message: Router::invalid_address_reply(&msg) }]
            }
        }
    }

    fn on_broadcast_data(&mut self, state: &mut CubeState, msg: Message) -> Vec<EngineAction> {
        let mut actions: Vec<EngineAction> = Router::route_broadcast(state, &msg)
            .into_iter()
            .map(|(link, message)| EngineAction::SendOnLink { link, message })
            .collect();

        if msg.dst == codec::CubeAddress::BcastProcess {
            actions.push(EngineAction::Deliver(crate::state::InboxEntry::Data {
                src: msg.src,
                payload: msg.data.clone().unwrap_or(Payload::Bytes(Default::default())),
            }));
        }

        actions
    }

    /// `connect(peer)` (spec section 4.4/4.8): send the bootstrap attach
    /// and block until `ConnectOutcome` arrives.
    pub fn cmd_connect(&mut self, inn_addr: SocketAddr) -> Vec<EngineAction> {
        self.ext = Some(ExtState {
            last_sent: MessageType::ConnExtInnAttach,
            inn_addr,
            inn_link: 0,
            links: Vec::new(),
            candidate: None,
            dim: None,
        });
        let attach = Message::new(codec::CubeAddress::Invalid, codec::CubeAddress::Invalid, MessageType::ConnExtInnAttach);
        vec![EngineAction::OpenAndSend { peer: inn_addr, message: attach }]
    }

    pub fn on_connect_link_opened(&mut self, link: LinkId) {
        if let Some(ext) = self.ext.as_mut() {
            ext.inn_link = link;
        }
    }

    /// `send(Message)` (spec section 4.8): non-blocking, `false` on routing
    /// failure, which also synthesizes an `INVALID_MSG` inbox entry.
    pub fn cmd_send(&mut self, state: &mut CubeState, dst: codec::CubeAddress, payload: Payload) -> (bool, Vec<EngineAction>) {
        let msg = Message::new(state.addr, dst, MessageType::UnicastMsg).with_data(payload);
        match Router::route_unicast(state, dst) {
            crate::router::RouteOutcome::Delivered => {
                (true, vec![EngineAction::Deliver(crate::state::InboxEntry::Data { src: state.addr, payload: msg.data.unwrap() })])
            }
            crate::router::RouteOutcome::Forwarded(link) => (true, vec![EngineAction::SendOnLink { link, message: msg }]),
            crate::router::RouteOutcome::Unreachable => {
                state.inbox.push_back(crate::state::InboxEntry::Invalid { attempted_dst: dst });
                (false, Vec::new())
            }
        }
    }

    /// `broadcast(payload)` (spec section 4.8).
    pub fn cmd_broadcast(&mut self, state: &mut CubeState, payload: Payload) -> Vec<EngineAction> {
        let msg = Message::new(state.addr, codec::CubeAddress::BcastProcess, MessageType::BroadcastMsg)
            .with_travel(codec::TravelVector::full(state.dim as usize))
            .with_data(payload);
        self.on_broadcast_data(state, msg)
    }

    /// Graceful shutdown broadcast: tells every reachable node this address
    /// is leaving before the dispatcher tears links down.
    pub fn cmd_shutdown(&mut self, state: &mut CubeState) -> Vec<EngineAction> {
        let msg = Message::new(state.addr, codec::CubeAddress::BcastProcess, MessageType::NodeShutdown)
            .with_travel(codec::TravelVector::full(state.dim as usize));
        Router::route_broadcast(state, &msg)
            .into_iter()
            .map(|(link, message)| EngineAction::SendOnLink { link, message })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::OpenPolicy;

    fn fresh_engine() -> AdmissionEngine {
        AdmissionEngine::new(Box::new(OpenPolicy))
    }

    #[test]
    fn single_node_attach_offers_dimension_one() {
        let mut engine = fresh_engine();
        let mut state = CubeState::new_root();
        let candidate: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        engine.on_link_accepted(1, candidate);

        let attach = Message::new(codec::CubeAddress::Invalid, codec::CubeAddress::Invalid, MessageType::ConnExtInnAttach);
        let actions = engine.handle(&mut state, 1, attach);

        assert!(matches!(
            actions.as_slice(),
            [EngineAction::OpenAndSend { message, .. }] if message.kind == MessageType::ConnAnnExtOffer
        ));
    }

    /// The single-node-cube scenario end to end (spec section 8): an INN
    /// alone at dimension 0 admits one client straight through the edge
    /// path, no ANN broadcast required. Exercises both sides of the wire
    /// purely through engine calls, with transport effects (`OpenAndSend`/
    /// link-opened callbacks) simulated by hand as a fake dispatcher would.
    #[test]
    fn single_node_cube_full_handshake() {
        let mut inn = fresh_engine();
        let mut inn_state = CubeState::new_root();
        let client: SocketAddr = "127.0.0.1:21000".parse().unwrap();
        inn.on_link_accepted(1, client);

        let attach = Message::new(codec::CubeAddress::Invalid, codec::CubeAddress::Invalid, MessageType::ConnExtInnAttach);
        let offer_actions = inn.handle(&mut inn_state, 1, attach);
        let EngineAction::OpenAndSend { peer, message: offer } = &offer_actions[0] else {
            panic!("expected OpenAndSend, got {offer_actions:?}");
        };
        assert_eq!(*peer, client);
        assert_eq!(offer.kind, MessageType::ConnAnnExtOffer);
        assert_eq!(offer.dst, codec::CubeAddress::Node(1));

        // The dispatcher's connect to `client` succeeds on link 2.
        inn.on_link_opened(client, 2);
        let accept = Message::new(codec::CubeAddress::Invalid, offer.dst, MessageType::ConnExtAnnAccept);
        let finish_actions = inn.handle(&mut inn_state, 2, accept);

        assert_eq!(inn_state.dim, 1);
        assert!(finish_actions.iter().any(
            |a| matches!(a, EngineAction::SendOnLink { link: 2, message } if message.kind == MessageType::ConnNbrExtIdentify)
        ));
        assert!(finish_actions.iter().any(
            |a| matches!(a, EngineAction::SendOnLink { link: 2, message } if message.kind == MessageType::ConnAnnExtSuccess)
        ));
        assert!(finish_actions.iter().any(|a| matches!(a, EngineAction::AdoptNeighbor { link: 2, dim_link: 0 })));

        // The client's side of the same handshake.
        let mut ext = fresh_engine();
        let mut ext_state = CubeState::new_root();
        let inn_addr: SocketAddr = "127.0.0.1:20000".parse().unwrap();
        let connect_actions = ext.cmd_connect(inn_addr);
        assert!(matches!(
            connect_actions.as_slice(),
            [EngineAction::OpenAndSend { message, .. }] if message.kind == MessageType::ConnExtInnAttach
        ));
        ext.on_connect_link_opened(7);

        let offer_on_wire = Message::new(codec::CubeAddress::Invalid, codec::CubeAddress::Node(1), MessageType::ConnAnnExtOffer)
            .with_data(Payload::Dim(1));
        let ext_actions = ext.handle(&mut ext_state, 7, offer_on_wire);
        assert!(matches!(
            ext_actions.as_slice(),
            [EngineAction::SendOnLink { message, .. }] if message.kind == MessageType::ConnExtAnnAccept
        ));

        let identify = Message::new(codec::CubeAddress::Node(0), codec::CubeAddress::Node(1), MessageType::ConnNbrExtIdentify);
        assert!(ext.handle(&mut ext_state, 7, identify).is_empty());

        let success = Message::new(codec::CubeAddress::Invalid, codec::CubeAddress::Node(1), MessageType::ConnAnnExtSuccess);
        let outcome_actions = ext.handle(&mut ext_state, 7, success);
        assert!(matches!(
            outcome_actions.as_slice(),
            [EngineAction::ConnectOutcome(Ok(addr))] if *addr == codec::CubeAddress::Node(1)
        ));
        assert_eq!(ext_state.addr, codec::CubeAddress::Node(1));
        assert_eq!(ext_state.link_for_dim(0), Some(7));
    }

    /// Spec section 8 scenario 6: once a neighbor's link closes, the
    /// dispatcher-observed `on_link_closed` must clear that neighbor slot
    /// entirely, and a subsequent `cmd_send` to the now-dead address must
    /// fail and deliver an `Invalid` inbox entry rather than panic.
    #[test]
    fn link_closed_clears_neighbor_and_future_sends_are_invalid() {
        let mut engine = fresh_engine();
        let mut state = CubeState::new_root();
        state.add_neighbor(0, 42);
        assert_eq!(state.link_for_dim(0), Some(42));

        let actions = engine.on_link_closed(&mut state, 42);
        assert!(actions.is_empty());
        assert_eq!(state.link_for_dim(0), None);
        assert_eq!(state.links_count(), 0);

        let payload = Payload::Bytes(bytes::Bytes::from_static(b"x"));
        let (ok, actions) = engine.cmd_send(&mut state, codec::CubeAddress::Node(1), payload);
        assert!(!ok);
        assert!(actions.is_empty());
        assert!(matches!(
            state.inbox.pop_front(),
            Some(crate::state::InboxEntry::Invalid { attempted_dst }) if attempted_dst == codec::CubeAddress::Node(1)
        ));
    }

    #[test]
    fn out_of_order_message_is_rejected() {
        let mut engine = fresh_engine();
        let mut state = CubeState::new_root();
        let candidate: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        engine.on_link_accepted(1, candidate);

        let premature = Message::new(codec::CubeAddress::Node(0), codec::CubeAddress::Node(0), MessageType::ConnGenInnAvail)
            .with_peer(candidate)
            .with_data(Payload::Ability { unwilling: codec::TravelVector::zeros(0), able: codec::TravelVector::zeros(0) });
        let actions = engine.handle(&mut state, 1, premature);

        assert!(matches!(
            actions.as_slice(),
            [EngineAction::SendOnLink { message, .. }] if message.kind == MessageType::InvalidState
        ));
    }
}
