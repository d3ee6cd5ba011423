use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::transport::node_id::{NodeId, SequenceNumber};

/// Wire discriminator for the kind of message travelling inside a frame.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MessageType {
    ReliableBroadcast = 0,
    UnreliableBroadcast = 1,
    /// reliable unicast establishing the base sequence number for reliable broadcasts
    ///  from a given sender
    Syn = 2,
}

/// Key of the retention registry. Reliable broadcasts are unique per (sender, sequence
///  number), syns per (destination, sequence number), unreliable broadcasts per
///  user-supplied key so queued updates can be coalesced. Forwarded foreign traffic is
///  never retained and shares the one `Forward` sentinel.
///
/// The derived ordering (variant tag first, then fields) is what makes this usable as a
///  map key; it never appears on the wire.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum MessageId<K: Clone + Ord> {
    ReliableBroadcast { sequence_number: SequenceNumber },
    ReliableUnicast { dest: NodeId, sequence_number: SequenceNumber },
    UnreliableBroadcast { key: K },
    Forward,
}


#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::test_util::node::test_node_id_from_number;

    #[rstest]
    #[case(0, Some(MessageType::ReliableBroadcast))]
    #[case(1, Some(MessageType::UnreliableBroadcast))]
    #[case(2, Some(MessageType::Syn))]
    #[case(3, None)]
    #[case(255, None)]
    fn test_message_type_from_wire(#[case] raw: u8, #[case] expected: Option<MessageType>) {
        assert_eq!(MessageType::try_from(raw).ok(), expected);
    }

    #[test]
    fn test_message_id_orders_by_tag_then_fields() {
        let sorted: Vec<MessageId<u64>> = vec![
            MessageId::ReliableBroadcast { sequence_number: SequenceNumber::from_raw(1) },
            MessageId::ReliableBroadcast { sequence_number: SequenceNumber::from_raw(2) },
            MessageId::ReliableUnicast {
                dest: test_node_id_from_number(1),
                sequence_number: SequenceNumber::from_raw(0),
            },
            MessageId::ReliableUnicast {
                dest: test_node_id_from_number(2),
                sequence_number: SequenceNumber::from_raw(0),
            },
            MessageId::UnreliableBroadcast { key: 0 },
            MessageId::UnreliableBroadcast { key: 9 },
            MessageId::Forward,
        ];

        let mut shuffled = sorted.clone();
        shuffled.reverse();
        shuffled.sort();

        assert_eq!(shuffled, sorted);
    }
}
