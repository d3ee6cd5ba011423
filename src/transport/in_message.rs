use std::collections::BTreeSet;

use anyhow::anyhow;
use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::try_get_fixed::TryGetFixedSupport;
use bytes_varint::{VarIntSupport, VarIntSupportMut};

use crate::transport::message_id::MessageType;
use crate::transport::node_id::{NodeId, SequenceNumber};
use crate::util::buf::{put_bytes, try_get_bytes};

/// One decoded fragment of an inbound message: the bytes `[chunk_start,
///  chunk_start + payload.len())` of a message of `original_size` bytes. A message that
///  fits a single frame arrives as one full-covering part.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct InMessagePart {
    pub source: NodeId,
    /// intended recipients, carried on the wire so intermediaries can forward
    pub targets: BTreeSet<NodeId>,
    pub msg_type: MessageType,
    pub sequence_number: SequenceNumber,
    pub original_size: u32,
    pub chunk_start: u32,
    pub payload: bytes::Bytes,
}

impl InMessagePart {
    pub fn is_full(&self) -> bool {
        self.chunk_start == 0 && self.payload.len() == self.original_size as usize
    }

    pub fn into_full(self) -> InMessageFull {
        debug_assert!(self.is_full());

        InMessageFull {
            source: self.source,
            msg_type: self.msg_type,
            sequence_number: self.sequence_number,
            payload: self.payload,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        self.source.ser(buf);
        buf.put_usize_varint(self.targets.len());
        for target in &self.targets {
            target.ser(buf);
        }
        buf.put_u8(self.msg_type.into());
        buf.put_u32_varint(self.sequence_number.to_raw());
        buf.put_u32_varint(self.original_size);
        buf.put_u32_varint(self.chunk_start);
        put_bytes(buf, &self.payload);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<InMessagePart> {
        let source = NodeId::try_deser(buf)?;

        let num_targets = buf.try_get_usize_varint()?;
        let mut targets = BTreeSet::new();
        for _ in 0..num_targets {
            targets.insert(NodeId::try_deser(buf)?);
        }

        let msg_type = MessageType::try_from(buf.try_get_u8()?)
            .map_err(|e| anyhow!("invalid message type discriminator: {}", e))?;
        let sequence_number = SequenceNumber::from_raw(buf.try_get_u32_varint()?);
        let original_size = buf.try_get_u32_varint()?;
        let chunk_start = buf.try_get_u32_varint()?;
        let payload = try_get_bytes(buf)?;

        if chunk_start as usize + payload.len() > original_size as usize {
            return Err(anyhow!(
                "chunk [{}, {}) exceeds original size {}",
                chunk_start,
                chunk_start as usize + payload.len(),
                original_size
            ));
        }

        Ok(InMessagePart {
            source,
            targets,
            msg_type,
            sequence_number,
            original_size,
            chunk_start,
            payload,
        })
    }
}


/// A fully (re)assembled inbound message, ready for the receive state machine.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct InMessageFull {
    pub source: NodeId,
    pub msg_type: MessageType,
    pub sequence_number: SequenceNumber,
    pub payload: bytes::Bytes,
}


#[cfg(test)]
mod test {
    use bytes::Bytes;
    use rstest::rstest;

    use super::*;
    use crate::test_util::node::test_node_id_from_number;

    fn part(original_size: u32, chunk_start: u32, payload: &str) -> InMessagePart {
        InMessagePart {
            source: test_node_id_from_number(1),
            targets: [test_node_id_from_number(2), test_node_id_from_number(3)].into(),
            msg_type: MessageType::ReliableBroadcast,
            sequence_number: SequenceNumber::from_raw(4),
            original_size,
            chunk_start,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[rstest]
    #[case::covers_everything(5, 0, "hello", true)]
    #[case::empty_message(0, 0, "", true)]
    #[case::prefix_only(9, 0, "hello", false)]
    #[case::tail_chunk(9, 4, "hello", false)]
    fn test_is_full(
        #[case] original_size: u32,
        #[case] chunk_start: u32,
        #[case] payload: &str,
        #[case] expected: bool,
    ) {
        assert_eq!(part(original_size, chunk_start, payload).is_full(), expected);
    }

    #[test]
    fn test_into_full() {
        let full = part(5, 0, "hello").into_full();

        assert_eq!(full.source, test_node_id_from_number(1));
        assert_eq!(full.msg_type, MessageType::ReliableBroadcast);
        assert_eq!(full.sequence_number, SequenceNumber::from_raw(4));
        assert_eq!(full.payload, Bytes::from_static(b"hello"));
    }

    #[rstest]
    #[case::full(5, 0, "hello")]
    #[case::fragment(64, 17, "hello")]
    #[case::empty(0, 0, "")]
    fn test_ser_round_trip(#[case] original_size: u32, #[case] chunk_start: u32, #[case] payload: &str) {
        let original = part(original_size, chunk_start, payload);

        let mut buf = BytesMut::new();
        original.ser(&mut buf);

        let deserialized = InMessagePart::try_deser(&mut buf.freeze()).unwrap();
        assert_eq!(deserialized, original);
    }

    #[test]
    fn test_deser_rejects_chunk_beyond_original_size() {
        let mut oversized = part(5, 0, "hello");
        oversized.chunk_start = 3;

        let mut buf = BytesMut::new();
        oversized.ser(&mut buf);

        assert!(InMessagePart::try_deser(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_deser_rejects_unknown_message_type() {
        let original = part(5, 0, "hello");

        let mut buf = BytesMut::new();
        original.ser(&mut buf);
        let mut raw = buf.to_vec();
        // the type discriminator sits after the source id (16 bytes), the target count
        //  varint (1 byte) and both target ids (16 bytes each)
        raw[49] = 99;

        assert!(InMessagePart::try_deser(&mut &raw[..]).is_err());
    }
}
