use std::fmt::{Debug, Display, Formatter};

use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use uuid::Uuid;

/// Identity of a participant in the mesh. Node ids are opaque 128-bit values with a total
///  order; they key the per-source receive state, the routing table and the ack registry.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(Uuid);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl NodeId {
    pub fn random() -> NodeId {
        NodeId(Uuid::new_v4())
    }

    pub fn from_raw(value: Uuid) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> Uuid {
        self.0
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u128(self.0.as_u128());
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<NodeId> {
        Ok(NodeId(Uuid::from_u128(buf.try_get_u128()?)))
    }
}


/// Per-sender message counter. Sequence numbers wrap around, so 0 follows after FFFFFFFF;
///  `Ord` is the flat 32-bit comparison used for map keys, wrap-aware proximity is the
///  ack window's business.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SequenceNumber(u32);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_add(1))
    }

    pub fn prev(&self) -> SequenceNumber {
        SequenceNumber(self.0.wrapping_sub(1))
    }
}


#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 1)]
    #[case(17, 18)]
    #[case(u32::MAX, 0)]
    fn test_sequence_number_next(#[case] raw: u32, #[case] expected: u32) {
        assert_eq!(SequenceNumber::from_raw(raw).next(), SequenceNumber::from_raw(expected));
    }

    #[rstest]
    #[case(1, 0)]
    #[case(18, 17)]
    #[case(0, u32::MAX)]
    fn test_sequence_number_prev(#[case] raw: u32, #[case] expected: u32) {
        assert_eq!(SequenceNumber::from_raw(raw).prev(), SequenceNumber::from_raw(expected));
    }

    #[test]
    fn test_node_id_ser_round_trip() {
        let id = NodeId::random();

        let mut buf = BytesMut::new();
        id.ser(&mut buf);

        let deserialized = NodeId::try_deser(&mut buf.freeze()).unwrap();
        assert_eq!(deserialized, id);
    }

    #[test]
    fn test_node_id_deser_short_buffer() {
        let mut buf = &[1u8, 2, 3][..];
        assert!(NodeId::try_deser(&mut buf).is_err());
    }
}
