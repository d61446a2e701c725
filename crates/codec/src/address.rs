use crate::error::Error;

/// A node's position in the hypercube, or one of the reserved sentinels used
/// to route broadcasts and to keep a peer anonymous on the wire.
///
/// Two addresses are neighbors iff their `Node` values differ in exactly one
/// bit; the position of that bit is the link number (see [`CubeAddress::relative_link`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeAddress {
    Node(u64),
    /// The sender or receiver must remain anonymous.
    Invalid,
    /// A broadcast destined for local processing as it travels.
    BcastProcess,
    /// Reserved for forward-broadcast framing; not produced by this core but
    /// kept in the closed set per spec section 3.
    BcastForward,
    /// A reverse-broadcast (aggregation) message travels with this as `src`.
    BcastReverse,
}

impl CubeAddress {
    pub fn node(addr: u64) -> Self {
        Self::Node(addr)
    }

    pub fn is_unicast(&self) -> bool {
        matches!(self, Self::Node(_))
    }

    pub fn is_bcast(&self) -> bool {
        matches!(self, Self::BcastProcess | Self::BcastForward | Self::BcastReverse)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    pub fn as_node(&self) -> Option<u64> {
        match self {
            Self::Node(v) => Some(*v),
            _ => None,
        }
    }

    /// `self xor other`, defined only between two node addresses.
    pub fn xor(&self, other: &Self) -> Option<u64> {
        Some(self.as_node()? ^ other.as_node()?)
    }

    pub fn bit_count(&self) -> Option<u32> {
        Some(self.as_node()?.count_ones())
    }

    /// Number of bits needed to represent this address, i.e. the smallest
    /// `dim` for which this address would be in range `0..2^dim`.
    pub fn bit_length(&self) -> Option<u32> {
        let v = self.as_node()?;
        Some(64 - v.leading_zeros())
    }

    /// The link number connecting `self` to `other`, if they differ in
    /// exactly one bit; `None` otherwise (including when either is not a
    /// node address).
    pub fn relative_link(&self, other: &Self) -> Option<usize> {
        let diff = self.xor(other)?;
        if diff.count_ones() == 1 {
            Some(diff.trailing_zeros() as usize)
        } else {
            None
        }
    }

    /// The neighbor reached by flipping bit `i`; `None` for non-node
    /// addresses.
    pub fn follow_link(&self, i: usize) -> Option<Self> {
        Some(Self::Node(self.as_node()? ^ (1u64 << i)))
    }

    pub(crate) fn to_raw(self) -> i64 {
        match self {
            Self::Node(v) => v as i64,
            Self::Invalid => -1,
            Self::BcastProcess => -2,
            Self::BcastForward => -3,
            Self::BcastReverse => -4,
        }
    }

    pub(crate) fn from_raw(v: i64) -> Result<Self, Error> {
        Ok(match v {
            v if v >= 0 => Self::Node(v as u64),
            -1 => Self::Invalid,
            -2 => Self::BcastProcess,
            -3 => Self::BcastForward,
            -4 => Self::BcastReverse,
            other => return Err(Error::UnknownTag(other)),
        })
    }
}

impl std::fmt::Display for CubeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node(v) => write!(f, "{v}"),
            Self::Invalid => write!(f, "<invalid>"),
            Self::BcastProcess => write!(f, "<bcast:process>"),
            Self::BcastForward => write!(f, "<bcast:forward>"),
            Self::BcastReverse => write!(f, "<bcast:reverse>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_link_round_trips_through_follow_link() {
        let a = CubeAddress::Node(0b0110);
        for i in 0..4 {
            let b = a.follow_link(i).unwrap();
            assert_eq!(a.relative_link(&b), Some(i));
        }
    }

    #[test]
    fn non_neighbors_have_no_relative_link() {
        let a = CubeAddress::Node(0b000);
        let b = CubeAddress::Node(0b011);
        assert_eq!(a.relative_link(&b), None);
    }

    #[test]
    fn sentinels_are_not_unicast() {
        assert!(!CubeAddress::Invalid.is_unicast());
        assert!(CubeAddress::BcastProcess.is_bcast());
        assert!(CubeAddress::Node(5).is_unicast());
    }

    #[test]
    fn raw_round_trip() {
        for addr in [
            CubeAddress::Node(0),
            CubeAddress::Node(12345),
            CubeAddress::Invalid,
            CubeAddress::BcastProcess,
            CubeAddress::BcastForward,
            CubeAddress::BcastReverse,
        ] {
            assert_eq!(CubeAddress::from_raw(addr.to_raw()).unwrap(), addr);
        }
    }
}
