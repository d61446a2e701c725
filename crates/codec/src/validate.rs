//! The format validator of spec section 6: for each message tag, a
//! predicate over `(src, dst, travel, peer, data)`. A message that fails
//! its predicate is answered with `src`/`dst` swapped and `kind` replaced
//! by `INVALID_FORMAT` (the caller, not this module, builds that reply —
//! see `Message::error_reply`).

use crate::message::{Message, MessageType, Payload};

fn has_dim(data: &Option<Payload>) -> bool {
    matches!(data, Some(Payload::Dim(_)))
}

fn has_candidate(data: &Option<Payload>) -> bool {
    matches!(data, Some(Payload::Candidate(_)))
}

fn has_ability(data: &Option<Payload>) -> bool {
    matches!(data, Some(Payload::Ability { .. }))
}

/// True iff `msg` has the shape spec section 6 prescribes for its `kind`.
pub fn is_well_formed(msg: &Message) -> bool {
    use MessageType::*;

    let no_travel = msg.travel.is_none();

    match msg.kind {
        // The client has no cube address yet; this arrives over a brand
        // new transport link before any hypercube routing is possible.
        ConnExtInnAttach => {
            msg.src.is_invalid() && msg.dst.is_invalid() && no_travel && msg.peer.is_none() && msg.data.is_none()
        }

        // Broadcast into the cube; `peer` carries the candidate's
        // transport address, which every generic node's record is keyed
        // on.
        ConnInnGenAnn => {
            msg.src.is_unicast() && msg.dst.is_bcast() && msg.travel.is_some() && msg.peer.is_some() && msg.data.is_none()
        }

        // Hop-by-hop unicast reply carrying the aggregated ability
        // bitmaps.
        ConnGenInnAvail => {
            msg.src.is_unicast() && msg.dst.is_unicast() && no_travel && msg.peer.is_some() && has_ability(&msg.data)
        }

        ConnInnAnnHandoff => {
            msg.src.is_unicast() && msg.dst.is_unicast() && no_travel && msg.peer.is_some() && msg.data.is_none()
        }

        // Literal example from spec section 6: source stays anonymous,
        // `dst` carries the offered candidate address, `data` is the
        // resulting dimension.
        ConnAnnExtOffer => {
            msg.src.is_invalid() && msg.dst.is_unicast() && no_travel && msg.peer.is_none() && has_dim(&msg.data)
        }

        ConnExtAnnAccept | ConnExtAnnDecline => {
            msg.dst.is_unicast() && no_travel && msg.peer.is_none() && msg.data.is_none()
        }

        ConnAnnNbrConnect | ConnAnnNbrIdentify => {
            msg.src.is_unicast() && msg.dst.is_unicast() && no_travel && msg.peer.is_some() && has_candidate(&msg.data)
        }

        ConnNbrExtOffer | ConnNbrExtIdentify => {
            msg.src.is_invalid() && no_travel && msg.peer.is_none() && msg.data.is_none()
        }

        ConnExtNbrAccept | ConnExtNbrDecline => no_travel && msg.peer.is_none() && msg.data.is_none(),

        ConnNbrAnnConnected | ConnNbrAnnDisconnected | ConnNbrAnnIdentified => {
            msg.src.is_unicast() && msg.dst.is_unicast() && no_travel && msg.peer.is_some() && msg.data.is_none()
        }

        ConnAnnExtSuccess | ConnAnnExtFail => {
            msg.dst.is_unicast() && no_travel && msg.peer.is_none() && msg.data.is_none()
        }

        ConnAnnInnSuccess | ConnAnnInnFail | ConnAnnNbrFail => {
            msg.src.is_unicast() && msg.dst.is_unicast() && no_travel && msg.peer.is_some() && msg.data.is_none()
        }

        ConnInnGenCleanup => {
            msg.src.is_unicast() && msg.dst.is_bcast() && msg.travel.is_some() && msg.peer.is_some() && msg.data.is_none()
        }

        ConnInnExtConnRefused => no_travel && msg.peer.is_none() && msg.data.is_none(),

        InvalidFormat | InvalidAddress | InvalidData => no_travel && msg.peer.is_none(),

        InvalidState => no_travel && msg.peer.is_none() && matches!(msg.data, Some(Payload::StateTags { .. })),

        UnicastMsg => msg.dst.is_unicast() && no_travel,

        BroadcastMsg | NodeShutdown => msg.dst.is_bcast() && msg.travel.is_some(),

        ReverseBroadcastMsg => msg.src == crate::address::CubeAddress::BcastReverse,

        InvalidMsg => no_travel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::CubeAddress;

    #[test]
    fn offer_matches_the_literal_spec_example() {
        let msg = Message::new(CubeAddress::Invalid, CubeAddress::Node(3), MessageType::ConnAnnExtOffer)
            .with_data(Payload::Dim(2));
        assert!(is_well_formed(&msg));
    }

    #[test]
    fn offer_with_a_peer_field_is_malformed() {
        let mut msg = Message::new(CubeAddress::Invalid, CubeAddress::Node(3), MessageType::ConnAnnExtOffer)
            .with_data(Payload::Dim(2));
        msg.peer = Some("127.0.0.1:1".parse().unwrap());
        assert!(!is_well_formed(&msg));
    }

    #[test]
    fn attach_with_a_unicast_dst_is_malformed() {
        let msg = Message::new(CubeAddress::Invalid, CubeAddress::Node(0), MessageType::ConnExtInnAttach);
        assert!(!is_well_formed(&msg));
    }
}
