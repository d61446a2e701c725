use bitvec::prelude::*;

/// A per-dimension bit-vector carried by broadcast messages: bit `i` set
/// means "forward along link `i` if connected" (spec section 4.3). Also
/// reused, with the same bitwise shape, to carry the `unwilling`/`able`
/// bitmaps aggregated during admission phase 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelVector(BitVec<u8, Lsb0>);

impl TravelVector {
    pub fn zeros(dim: usize) -> Self {
        Self(bitvec![u8, Lsb0; 0; dim])
    }

    /// All `dim` bits set, i.e. `(1 << dim) - 1`.
    pub fn full(dim: usize) -> Self {
        Self(bitvec![u8, Lsb0; 1; dim])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, i: usize) -> bool {
        self.0.get(i).map(|b| *b).unwrap_or(false)
    }

    fn ensure_len(&mut self, i: usize) {
        if self.0.len() <= i {
            self.0.resize(i + 1, false);
        }
    }

    pub fn set(&mut self, i: usize, value: bool) {
        self.ensure_len(i);
        self.0.set(i, value);
    }

    pub fn clear(&mut self, i: usize) {
        self.set(i, false);
    }

    pub fn count_ones(&self) -> usize {
        self.0.count_ones()
    }

    /// Bitwise union, widening to the longer operand's length.
    pub fn union(&self, other: &Self) -> Self {
        let len = self.len().max(other.len());
        let mut out = Self::zeros(len);
        for i in 0..len {
            out.set(i, self.get(i) || other.get(i));
        }
        out
    }

    pub fn to_u64(&self) -> u64 {
        let mut v = 0u64;
        for i in 0..self.len().min(64) {
            if self.get(i) {
                v |= 1 << i;
            }
        }
        v
    }

    pub fn from_u64(v: u64, dim: usize) -> Self {
        let mut out = Self::zeros(dim);
        for i in 0..dim {
            out.set(i, (v >> i) & 1 == 1);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_has_every_bit_set_up_to_dim() {
        let tv = TravelVector::full(4);
        assert_eq!(tv.count_ones(), 4);
        assert!((0..4).all(|i| tv.get(i)));
    }

    #[test]
    fn union_is_bitwise_or() {
        let mut a = TravelVector::zeros(3);
        a.set(0, true);
        let mut b = TravelVector::zeros(3);
        b.set(2, true);
        let u = a.union(&b);
        assert!(u.get(0));
        assert!(!u.get(1));
        assert!(u.get(2));
    }

    #[test]
    fn u64_round_trip() {
        let tv = TravelVector::from_u64(0b1011, 6);
        assert_eq!(tv.to_u64(), 0b1011);
    }
}
