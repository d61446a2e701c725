use std::net::SocketAddr;

use bytes::Bytes;

use crate::{address::CubeAddress, error::Error, travel::TravelVector};

/// The closed message-type set of spec section 6.
///
/// Note: the spec's prose estimates "35 tags" but the literal enumeration in
/// section 6, which is the authoritative closed set, lists the 32 tags
/// below (including `INVALID_MSG`, which section 4.8/4.6 reference as the
/// synthetic inbox entry for a failed `send`, but which section 6's list
/// omits). We implement exactly what section 6 enumerates plus that one
/// cross-referenced tag, rather than inventing three more to hit the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Phase 1
    ConnExtInnAttach = 0,
    ConnInnGenAnn = 1,
    ConnGenInnAvail = 2,
    ConnInnAnnHandoff = 3,

    // Phase 2
    ConnAnnExtOffer = 4,
    ConnExtAnnAccept = 5,
    ConnExtAnnDecline = 6,

    // Phase 3
    ConnAnnNbrConnect = 7,
    ConnNbrExtOffer = 8,
    ConnExtNbrAccept = 9,
    ConnExtNbrDecline = 10,
    ConnNbrAnnConnected = 11,
    ConnNbrAnnDisconnected = 12,

    // Phase 4
    ConnAnnNbrIdentify = 13,
    ConnNbrExtIdentify = 14,
    ConnNbrAnnIdentified = 15,
    ConnAnnExtSuccess = 16,
    ConnAnnInnSuccess = 17,
    ConnInnGenCleanup = 18,

    // Failures
    InvalidFormat = 19,
    InvalidAddress = 20,
    InvalidState = 21,
    InvalidData = 22,
    ConnInnExtConnRefused = 23,
    ConnAnnInnFail = 24,
    ConnAnnNbrFail = 25,
    ConnAnnExtFail = 26,

    // Application
    UnicastMsg = 27,
    BroadcastMsg = 28,
    ReverseBroadcastMsg = 29,
    NodeShutdown = 30,
    /// Synthetic, inbox-only: never sent on the wire by a well-behaved
    /// peer, but part of the closed set since `Message` must be able to
    /// represent it when a local `send` fails to route (section 4.8) or an
    /// admission control message is rejected for an application-originated
    /// destination (section 7).
    InvalidMsg = 31,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Result<Self, Error> {
        use MessageType::*;
        Ok(match tag {
            0 => ConnExtInnAttach,
            1 => ConnInnGenAnn,
            2 => ConnGenInnAvail,
            3 => ConnInnAnnHandoff,
            4 => ConnAnnExtOffer,
            5 => ConnExtAnnAccept,
            6 => ConnExtAnnDecline,
            7 => ConnAnnNbrConnect,
            8 => ConnNbrExtOffer,
            9 => ConnExtNbrAccept,
            10 => ConnExtNbrDecline,
            11 => ConnNbrAnnConnected,
            12 => ConnNbrAnnDisconnected,
            13 => ConnAnnNbrIdentify,
            14 => ConnNbrExtIdentify,
            15 => ConnNbrAnnIdentified,
            16 => ConnAnnExtSuccess,
            17 => ConnAnnInnSuccess,
            18 => ConnInnGenCleanup,
            19 => InvalidFormat,
            20 => InvalidAddress,
            21 => InvalidState,
            22 => InvalidData,
            23 => ConnInnExtConnRefused,
            24 => ConnAnnInnFail,
            25 => ConnAnnNbrFail,
            26 => ConnAnnExtFail,
            27 => UnicastMsg,
            28 => BroadcastMsg,
            29 => ReverseBroadcastMsg,
            30 => NodeShutdown,
            31 => InvalidMsg,
            other => return Err(Error::UnknownTag(other as i64)),
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn is_data(self) -> bool {
        matches!(self, Self::UnicastMsg | Self::BroadcastMsg)
    }
}

/// Message-type-specific structured data (spec section 3's `data` field).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The dimension a newly offered address would give the candidate
    /// (`CONN_ANN_EXT_OFFER`/edge path).
    Dim(u32),
    /// The candidate's newly assigned cube address, carried alongside
    /// `peer` (the candidate's transport address) on `CONN_ANN_NBR_CONNECT`
    /// and `CONN_ANN_NBR_IDENTIFY`: a prospective neighbor cannot derive it
    /// from the message's routing `dst` (that is its *own* address) and
    /// has no other way to learn what address it is about to adopt.
    Candidate(CubeAddress),
    /// The `(unwilling, able)` bitmaps aggregated up the reverse-broadcast
    /// tree during admission phase 1.
    Ability { unwilling: TravelVector, able: TravelVector },
    /// `[current, attempted]` tags carried by an `INVALID_STATE` reply.
    StateTags { current: MessageType, attempted: MessageType },
    /// The type (and, if any, data) of the message that triggered an
    /// `INVALID_ADDRESS` reply, so the original sender can correlate it.
    Rejected {
        original_kind: MessageType,
        original_data: Option<Box<Payload>>,
    },
    /// Opaque application payload carried by `UNICAST_MSG`/`BROADCAST_MSG`.
    Bytes(Bytes),
}

/// A framed protocol record (spec section 3/6).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub src: CubeAddress,
    pub dst: CubeAddress,
    /// Meaningful only for broadcast-family messages; `None` otherwise
    /// (encoded on the wire as the invalid sentinel).
    pub travel: Option<TravelVector>,
    pub kind: MessageType,
    /// The transport address of a third party this message concerns (e.g.
    /// the admission candidate), carried opaque-but-trusted between
    /// protocol nodes per spec section 3.
    pub peer: Option<SocketAddr>,
    pub data: Option<Payload>,
}

impl Message {
    pub fn new(src: CubeAddress, dst: CubeAddress, kind: MessageType) -> Self {
        Self {
            src,
            dst,
            travel: None,
            kind,
            peer: None,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_travel(mut self, travel: TravelVector) -> Self {
        self.travel = Some(travel);
        self
    }

    /// Build the swapped-source-and-destination reply used for
    /// `INVALID_FORMAT`/`INVALID_STATE`/`INVALID_DATA`/`INVALID_ADDRESS`
    /// (spec section 6/7).
    pub fn error_reply(&self, kind: MessageType, data: Option<Payload>) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            travel: None,
            kind,
            peer: None,
            data,
        }
    }
}
