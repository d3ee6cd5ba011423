use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::transport::in_message::{InMessageFull, InMessagePart};
use crate::transport::message_id::MessageType;
use crate::transport::node_id::{NodeId, SequenceNumber};

/// Reassembly buffer for one in-flight inbound message: fragments land at their chunk
///  offset in a pre-sized buffer, and a map of filled ranges tracks completeness.
///  Fragments may arrive in any order and may overlap.
pub struct PendingMessage {
    source: NodeId,
    msg_type: MessageType,
    sequence_number: SequenceNumber,
    buffer: BytesMut,
    /// filled byte ranges, start -> end (exclusive), disjoint and coalesced
    filled: BTreeMap<u32, u32>,
}

impl PendingMessage {
    pub fn from_part(part: InMessagePart) -> PendingMessage {
        let mut result = PendingMessage {
            source: part.source,
            msg_type: part.msg_type,
            sequence_number: part.sequence_number,
            buffer: BytesMut::zeroed(part.original_size as usize),
            filled: BTreeMap::default(),
        };
        result.update_payload(part.chunk_start, &part.payload);
        result
    }

    pub fn from_full(msg: InMessageFull) -> PendingMessage {
        let buffer = BytesMut::from(msg.payload.as_ref());
        let mut filled = BTreeMap::default();
        if !buffer.is_empty() {
            filled.insert(0, buffer.len() as u32);
        }

        PendingMessage {
            source: msg.source,
            msg_type: msg.msg_type,
            sequence_number: msg.sequence_number,
            buffer,
            filled,
        }
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    /// Copies a fragment into the buffer. Data beyond the original size points to an
    ///  inconsistent sender and is dropped.
    pub fn update_payload(&mut self, chunk_start: u32, payload: &[u8]) {
        let start = chunk_start as usize;
        let end = start + payload.len();

        if end > self.buffer.len() {
            warn!(
                "chunk [{}, {}) exceeds original size {} - dropping",
                start,
                end,
                self.buffer.len()
            );
            return;
        }
        if payload.is_empty() {
            return;
        }

        self.buffer[start..end].copy_from_slice(payload);
        self.mark_filled(start as u32, end as u32);
    }

    fn mark_filled(&mut self, start: u32, end: u32) {
        let mut merged_start = start;
        let mut merged_end = end;

        // absorb every existing range that overlaps or touches the new one
        let absorbed = self
            .filled
            .range(..=end)
            .filter(|(_, &e)| e >= start)
            .map(|(&s, _)| s)
            .collect::<Vec<_>>();

        for s in absorbed {
            let e = self.filled.remove(&s).expect("range was just looked up");
            merged_start = merged_start.min(s);
            merged_end = merged_end.max(e);
        }

        self.filled.insert(merged_start, merged_end);
    }

    pub fn is_complete(&self) -> bool {
        if self.buffer.is_empty() {
            return true;
        }
        self.filled.get(&0) == Some(&(self.buffer.len() as u32))
    }

    pub fn get_full_message(&self) -> Option<InMessageFull> {
        if !self.is_complete() {
            return None;
        }

        Some(InMessageFull {
            source: self.source,
            msg_type: self.msg_type,
            sequence_number: self.sequence_number,
            payload: Bytes::copy_from_slice(&self.buffer),
        })
    }
}


#[cfg(test)]
mod test {
    use rstest::rstest;

    use super::*;
    use crate::test_util::node::test_node_id_from_number;

    fn part(original_size: u32, chunk_start: u32, payload: &str) -> InMessagePart {
        InMessagePart {
            source: test_node_id_from_number(1),
            targets: [test_node_id_from_number(2)].into(),
            msg_type: MessageType::ReliableBroadcast,
            sequence_number: SequenceNumber::from_raw(5),
            original_size,
            chunk_start,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[rstest]
    #[case::in_order(vec![(0, "hello "), (6, "world")])]
    #[case::reversed(vec![(6, "world"), (0, "hello ")])]
    #[case::three_chunks_shuffled(vec![(4, "o wor"), (9, "ld"), (0, "hell")])]
    #[case::overlapping(vec![(0, "hello wor"), (3, "lo world")])]
    #[case::duplicate_chunk(vec![(0, "hello "), (0, "hello "), (6, "world")])]
    fn test_reassembly_from_arbitrary_parts(#[case] chunks: Vec<(u32, &str)>) {
        let mut chunks = chunks.into_iter();
        let (first_start, first_payload) = chunks.next().unwrap();

        let mut pending = PendingMessage::from_part(part(11, first_start, first_payload));

        for (chunk_start, payload) in chunks {
            pending.update_payload(chunk_start, payload.as_bytes());
        }

        let full = pending.get_full_message().unwrap();
        assert_eq!(full.payload, Bytes::from_static(b"hello world"));
        assert_eq!(full.source, test_node_id_from_number(1));
        assert_eq!(full.sequence_number, SequenceNumber::from_raw(5));
    }

    #[test]
    fn test_incomplete_has_no_full_message() {
        let pending = PendingMessage::from_part(part(11, 0, "hello"));
        assert!(!pending.is_complete());
        assert!(pending.get_full_message().is_none());
    }

    #[test]
    fn test_gap_between_chunks_is_not_complete() {
        let mut pending = PendingMessage::from_part(part(11, 0, "hell"));
        pending.update_payload(6, b"world");

        assert!(!pending.is_complete());

        pending.update_payload(4, b"o ");
        assert!(pending.is_complete());
    }

    #[test]
    fn test_from_full_is_complete() {
        let pending = PendingMessage::from_full(part(5, 0, "hello").into_full());

        let full = pending.get_full_message().unwrap();
        assert_eq!(full.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_empty_message_is_complete() {
        let pending = PendingMessage::from_part(part(0, 0, ""));
        assert!(pending.is_complete());
        assert_eq!(pending.get_full_message().unwrap().payload.len(), 0);
    }

    #[test]
    fn test_oversized_chunk_is_dropped() {
        let mut pending = PendingMessage::from_part(part(11, 0, "hello "));
        pending.update_payload(6, b"world plus overflow");

        assert!(!pending.is_complete());

        pending.update_payload(6, b"world");
        assert!(pending.is_complete());
    }
}
