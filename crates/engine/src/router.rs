use codec::{CubeAddress, Message, MessageType, Payload, TravelVector};

use crate::state::{CubeState, LinkId};

/// The result of deciding what to do with a message (spec section 4.2/4.3),
/// generalized from the teacher's `RouteResult` enum
/// (`crates/service/src/routing/mod.rs`).
#[derive(Debug)]
pub enum RouteOutcome {
    /// Forward the message unchanged on this link.
    Forwarded(LinkId),
    /// `dst == self.addr`; the caller should process it locally.
    Delivered,
    /// No live link makes progress toward `dst`; the caller should reply
    /// `INVALID_ADDRESS` to the original sender.
    Unreachable,
}

pub struct Router;

impl Router {
    /// Katseff Algorithm 3 (LSB variant): send on the lowest set bit of
    /// `(self.addr xor dst) & links`, so every node picks the same next
    /// hop for the same `(src, dst)` pair (spec section 4.2).
    pub fn route_unicast(state: &CubeState, dst: CubeAddress) -> RouteOutcome {
        if dst == state.addr {
            return RouteOutcome::Delivered;
        }

        let Some(diff) = state.addr.xor(&dst) else {
            return RouteOutcome::Unreachable;
        };

        for i in 0..state.dim as usize {
            if diff & (1 << i) != 0 {
                if let Some(link) = state.link_for_dim(i) {
                    return RouteOutcome::Forwarded(link);
                }
                // Lowest differing bit has no live link: per spec this is
                // unreachable, the router does not try the next bit.
                return RouteOutcome::Unreachable;
            }
        }

        RouteOutcome::Unreachable
    }

    /// Broadcast forwarding (spec section 4.3). Returns the (link, message)
    /// pairs to send; the caller processes locally when `travel` indicates
    /// `dst == BcastProcess` (checked by the caller, not here, since that
    /// requires the original message's `dst`, not just its travel vector).
    pub fn route_broadcast(state: &CubeState, msg: &Message) -> Vec<(LinkId, Message)> {
        let Some(travel) = &msg.travel else {
            return Vec::new();
        };

        let dim = state.dim as usize;
        let mut newtravel = TravelVector::zeros(dim);
        for i in 0..dim {
            let can_send = state.link_for_dim(i).is_some();
            newtravel.set(i, travel.get(i) || !can_send);
        }

        let mut outbound = Vec::new();
        for i in (0..dim).rev() {
            let live = state.link_for_dim(i).is_some();
            if live {
                newtravel.clear(i);
            }

            if travel.get(i) && live {
                let link = state.link_for_dim(i).expect("checked live above");
                let mut copy = msg.clone();
                copy.travel = Some(newtravel.clone());
                outbound.push((link, copy));
            }
        }

        outbound
    }

    /// Broadcast idempotence law: an all-zero travel vector forwards
    /// nowhere.
    pub fn is_broadcast_noop(msg: &Message) -> bool {
        match &msg.travel {
            None => true,
            Some(tv) => tv.count_ones() == 0,
        }
    }

    /// Combine a child's `(unwilling, able)` reply into the running
    /// aggregate for admission phase 1 (spec section 4.7).
    pub fn fold_reverse(
        acc: (TravelVector, TravelVector),
        child: (TravelVector, TravelVector),
    ) -> (TravelVector, TravelVector) {
        (acc.0.union(&child.0), acc.1.union(&child.1))
    }

    /// Build the `INVALID_ADDRESS` reply to `original`'s sender, carrying
    /// the rejected type/data for correlation (spec section 4.2).
    pub fn invalid_address_reply(original: &Message) -> Message {
        original.error_reply(
            MessageType::InvalidAddress,
            Some(Payload::Rejected {
                original_kind: original.kind,
                original_data: original.data.clone().map(Box::new),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::MessageType;

    fn cube(addr: u64, dim: u32, links: &[usize]) -> CubeState {
        let mut state = CubeState {
            dim,
            addr: CubeAddress::Node(addr),
            neighbors: vec![None; dim as usize],
            inbox: Default::default(),
        };
        for &i in links {
            state.neighbors[i] = Some(i as u64 + 1);
        }
        state
    }

    #[test]
    fn unicast_two_hop_picks_lowest_set_bit() {
        // 2-cube {A=0,B=1,C=2,D=3}; C(=2) sending to B(=1): diff=3, lowest
        // bit is link 0 (towards A), matching the LSB tie-break.
        let c = cube(2, 2, &[0, 1]);
        match Router::route_unicast(&c, CubeAddress::Node(1)) {
            RouteOutcome::Forwarded(link) => assert_eq!(link, 1), // link 0 -> handle id 1
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_destination_yields_unreachable() {
        let a = cube(0, 2, &[]);
        assert!(matches!(Router::route_unicast(&a, CubeAddress::Node(1)), RouteOutcome::Unreachable));
    }

    #[test]
    fn broadcast_noop_on_zero_travel() {
        let msg = Message::new(CubeAddress::Node(0), CubeAddress::BcastProcess, MessageType::BroadcastMsg)
            .with_travel(TravelVector::zeros(2));
        assert!(Router::is_broadcast_noop(&msg));

        let state = cube(0, 2, &[0, 1]);
        assert!(Router::route_broadcast(&state, &msg).is_empty());
    }

    #[test]
    fn broadcast_fans_out_on_every_live_link() {
        let state = cube(0, 2, &[0, 1]);
        let msg = Message::new(CubeAddress::Node(0), CubeAddress::BcastProcess, MessageType::BroadcastMsg)
            .with_travel(TravelVector::full(2));
        let out = Router::route_broadcast(&state, &msg);
        assert_eq!(out.len(), 2);
    }
}
