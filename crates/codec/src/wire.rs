use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    address::CubeAddress,
    error::Error,
    message::{Message, MessageType, Payload},
    travel::TravelVector,
};

/// The length prefix is a 4-byte big-endian `u32` (spec section 4.5/6).
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Minimal big-endian two's-complement representation of `v`, i.e. the
/// shortest byte string that sign-extends back to `v`.
fn minimal_be_bytes(v: i64) -> Vec<u8> {
    let full = v.to_be_bytes();
    let mut start = 0;
    while start < 7 {
        let b0 = full[start];
        let b1 = full[start + 1];
        let redundant = (b0 == 0x00 && b1 & 0x80 == 0) || (b0 == 0xFF && b1 & 0x80 != 0);
        if redundant {
            start += 1;
        } else {
            break;
        }
    }
    full[start..].to_vec()
}

/// Write `v` as a signed variable-length integer: one length byte, then
/// that many bytes of its minimal two's-complement big-endian encoding
/// (spec section 6; used for `CubeAddress` and the travel `BitVec`).
pub fn encode_svarint(buf: &mut BytesMut, v: i64) {
    let bytes = minimal_be_bytes(v);
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(&bytes);
}

pub fn decode_svarint(buf: &mut impl Buf) -> Result<i64, Error> {
    if !buf.has_remaining() {
        return Err(Error::InvalidInput);
    }

    let len = buf.get_u8() as usize;
    if len == 0 || len > 8 || buf.remaining() < len {
        return Err(Error::VarintTooWide);
    }

    let mut bytes = [0u8; 8];
    let sign_extend = if buf.chunk()[0] & 0x80 != 0 { 0xFFu8 } else { 0x00 };
    for b in bytes.iter_mut().take(8 - len) {
        *b = sign_extend;
    }
    buf.copy_to_slice(&mut bytes[8 - len..]);

    Ok(i64::from_be_bytes(bytes))
}

pub fn encode_addr(buf: &mut BytesMut, addr: CubeAddress) {
    encode_svarint(buf, addr.to_raw());
}

pub fn decode_addr(buf: &mut impl Buf) -> Result<CubeAddress, Error> {
    CubeAddress::from_raw(decode_svarint(buf)?)
}

pub fn encode_travel(buf: &mut BytesMut, travel: Option<&TravelVector>) {
    match travel {
        None => encode_svarint(buf, -1),
        Some(tv) => encode_svarint(buf, tv.to_u64() as i64),
    }
}

/// Decoded travel vectors are always materialized at full 64-bit width; a
/// caller masks to its own `dim` (the wire format does not carry a length,
/// matching spec section 6's "signed variable-length integer").
pub fn decode_travel(buf: &mut impl Buf) -> Result<Option<TravelVector>, Error> {
    let raw = decode_svarint(buf)?;
    if raw == -1 {
        return Ok(None);
    }

    if raw < 0 {
        return Err(Error::UnknownTag(raw));
    }

    Ok(Some(TravelVector::from_u64(raw as u64, 64)))
}

fn encode_socket_addr(buf: &mut BytesMut, addr: &SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.ip().octets());
            buf.put_u16(v4.port());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(6);
            buf.put_slice(&v6.ip().octets());
            buf.put_u16(v6.port());
        }
    }
}

fn decode_socket_addr(buf: &mut impl Buf) -> Result<SocketAddr, Error> {
    if !buf.has_remaining() {
        return Err(Error::InvalidInput);
    }

    Ok(match buf.get_u8() {
        4 => {
            if buf.remaining() < 6 {
                return Err(Error::InvalidInput);
            }
            let mut octets = [0u8; 4];
            buf.copy_to_slice(&mut octets);
            let port = buf.get_u16();
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port))
        }
        6 => {
            if buf.remaining() < 18 {
                return Err(Error::InvalidInput);
            }
            let mut octets = [0u8; 16];
            buf.copy_to_slice(&mut octets);
            let port = buf.get_u16();
            SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(octets), port, 0, 0))
        }
        _ => return Err(Error::InvalidInput),
    })
}

fn encode_payload(buf: &mut BytesMut, payload: &Payload) {
    match payload {
        Payload::Dim(dim) => {
            buf.put_u8(0);
            buf.put_u32(*dim);
        }
        Payload::Ability { unwilling, able } => {
            buf.put_u8(1);
            encode_svarint(buf, unwilling.to_u64() as i64);
            encode_svarint(buf, able.to_u64() as i64);
        }
        Payload::StateTags { current, attempted } => {
            buf.put_u8(2);
            buf.put_u8(current.tag());
            buf.put_u8(attempted.tag());
        }
        Payload::Rejected { original_kind, original_data } => {
            buf.put_u8(3);
            buf.put_u8(original_kind.tag());
            match original_data {
                None => buf.put_u8(0),
                Some(inner) => {
                    buf.put_u8(1);
                    encode_payload(buf, inner);
                }
            }
        }
        Payload::Bytes(bytes) => {
            buf.put_u8(4);
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(bytes);
        }
        Payload::Candidate(addr) => {
            buf.put_u8(5);
            encode_addr(buf, *addr);
        }
    }
}

fn decode_payload(buf: &mut impl Buf) -> Result<Payload, Error> {
    if !buf.has_remaining() {
        return Err(Error::InvalidInput);
    }

    Ok(match buf.get_u8() {
        0 => {
            if buf.remaining() < 4 {
                return Err(Error::InvalidInput);
            }
            Payload::Dim(buf.get_u32())
        }
        1 => {
            let unwilling = TravelVector::from_u64(decode_svarint(buf)? as u64, 64);
            let able = TravelVector::from_u64(decode_svarint(buf)? as u64, 64);
            Payload::Ability { unwilling, able }
        }
        2 => {
            if buf.remaining() < 2 {
                return Err(Error::InvalidInput);
            }
            let current = MessageType::from_tag(buf.get_u8())?;
            let attempted = MessageType::from_tag(buf.get_u8())?;
            Payload::StateTags { current, attempted }
        }
        3 => {
            if !buf.has_remaining() {
                return Err(Error::InvalidInput);
            }
            let original_kind = MessageType::from_tag(buf.get_u8())?;
            let original_data = match buf.get_u8() {
                0 => None,
                _ => Some(Box::new(decode_payload(buf)?)),
            };
            Payload::Rejected { original_kind, original_data }
        }
        4 => {
            if buf.remaining() < 4 {
                return Err(Error::InvalidInput);
            }
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return Err(Error::InvalidInput);
            }
            let mut out = vec![0u8; len];
            buf.copy_to_slice(&mut out);
            Payload::Bytes(Bytes::from(out))
        }
        5 => Payload::Candidate(decode_addr(buf)?),
        _ => return Err(Error::InvalidInput),
    })
}

/// Encode a message's fields (not including the 4-byte frame length
/// prefix) into `buf`.
pub fn encode_message(buf: &mut BytesMut, msg: &Message) {
    encode_addr(buf, msg.src);
    encode_addr(buf, msg.dst);
    encode_travel(buf, msg.travel.as_ref());
    buf.put_u8(msg.kind.tag());

    match &msg.peer {
        None => buf.put_u8(0),
        Some(peer) => {
            buf.put_u8(1);
            encode_socket_addr(buf, peer);
        }
    }

    match &msg.data {
        None => buf.put_u8(0),
        Some(data) => {
            buf.put_u8(1);
            encode_payload(buf, data);
        }
    }
}

pub fn decode_message(mut bytes: &[u8]) -> Result<Message, Error> {
    let buf = &mut bytes;

    let src = decode_addr(buf)?;
    let dst = decode_addr(buf)?;
    let travel = decode_travel(buf)?;

    if !buf.has_remaining() {
        return Err(Error::InvalidInput);
    }
    let kind = MessageType::from_tag(buf.get_u8())?;

    if !buf.has_remaining() {
        return Err(Error::InvalidInput);
    }
    let peer = match buf.get_u8() {
        0 => None,
        _ => Some(decode_socket_addr(buf)?),
    };

    if !buf.has_remaining() {
        return Err(Error::InvalidInput);
    }
    let data = match buf.get_u8() {
        0 => None,
        _ => Some(decode_payload(buf)?),
    };

    Ok(Message { src, dst, travel, kind, peer, data })
}

/// Write a complete length-prefixed frame for `msg` onto `out`.
pub fn encode_frame(out: &mut BytesMut, msg: &Message) {
    let mut body = BytesMut::new();
    encode_message(&mut body, msg);
    out.put_u32(body.len() as u32);
    out.put_slice(&body);
}

/// Accumulates partial reads from one link and yields complete frames as
/// they become available (spec section 4.5).
#[derive(Default)]
pub struct Framer {
    buf: BytesMut,
}

impl Framer {
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns `Some` as soon as one full frame is buffered, consuming it.
    /// A `Some(Err(_))` is a framing error; the caller must close the link
    /// (spec section 4.5/7).
    pub fn next_frame(&mut self) -> Option<Result<Message, Error>> {
        if self.buf.len() < LENGTH_PREFIX_BYTES {
            return None;
        }

        let len = u32::from_be_bytes(self.buf[..LENGTH_PREFIX_BYTES].try_into().unwrap()) as usize;
        if self.buf.len() < LENGTH_PREFIX_BYTES + len {
            return None;
        }

        self.buf.advance(LENGTH_PREFIX_BYTES);
        let frame = self.buf.split_to(len);
        Some(decode_message(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn svarint_round_trip_negative_and_positive() {
        for v in [0i64, 1, -1, 127, -128, 300, -4, i64::MAX / 2, i64::MIN / 2] {
            let mut buf = BytesMut::new();
            encode_svarint(&mut buf, v);
            let mut cursor = &buf[..];
            assert_eq!(decode_svarint(&mut cursor).unwrap(), v);
        }
    }

    #[test]
    fn message_round_trip_unicast_data() {
        let msg = Message::new(CubeAddress::Node(2), CubeAddress::Node(1), MessageType::UnicastMsg)
            .with_data(Payload::Bytes(Bytes::from_static(b"x")));

        let mut buf = BytesMut::new();
        encode_frame(&mut buf, &msg);

        let mut framer = Framer::default();
        framer.push(&buf);
        let decoded = framer.next_frame().unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn message_round_trip_offer_with_peer_and_dim() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let msg = Message::new(CubeAddress::Invalid, CubeAddress::Node(3), MessageType::ConnAnnExtOffer)
            .with_peer(peer)
            .with_data(Payload::Dim(2));

        let mut buf = BytesMut::new();
        encode_frame(&mut buf, &msg);

        let mut framer = Framer::default();
        framer.push(&buf);
        let decoded = framer.next_frame().unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn framer_waits_for_a_complete_frame() {
        let msg = Message::new(CubeAddress::Node(0), CubeAddress::Node(1), MessageType::NodeShutdown);
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, &msg);

        let mut framer = Framer::default();
        framer.push(&buf[..buf.len() - 1]);
        assert!(framer.next_frame().is_none());

        framer.push(&buf[buf.len() - 1..]);
        assert!(framer.next_frame().unwrap().is_ok());
    }
}
