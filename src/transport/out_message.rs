use std::collections::BTreeSet;

use bytes::Bytes;

use crate::transport::in_message::InMessagePart;
use crate::transport::message_id::MessageType;
use crate::transport::node_id::{NodeId, SequenceNumber};

/// State of one outbound message, shared between the relays' transmit queues (strong
///  owners) and the retention registry (weak). `targets` are the recipients that still
///  owe an acknowledgement; it shrinks as acks arrive, and all mutation goes through
///  methods so the sharing stays auditable.
#[derive(Debug)]
pub struct OutMessage {
    source: NodeId,
    reliable: bool,
    msg_type: MessageType,
    sequence_number: SequenceNumber,
    original_size: u32,
    chunk_start: u32,
    targets: BTreeSet<NodeId>,
    payload: Bytes,
}

impl OutMessage {
    pub fn new(
        source: NodeId,
        targets: BTreeSet<NodeId>,
        reliable: bool,
        msg_type: MessageType,
        sequence_number: SequenceNumber,
        payload: Bytes,
    ) -> OutMessage {
        OutMessage {
            source,
            reliable,
            msg_type,
            sequence_number,
            original_size: payload.len() as u32,
            chunk_start: 0,
            targets,
            payload,
        }
    }

    /// Rebuilds an outbound message from a foreign fragment so it can be handed on
    ///  byte-faithfully. Forwards are best-effort: never reliable on this hop, never
    ///  retained.
    pub fn forwarded(part: &InMessagePart) -> OutMessage {
        OutMessage {
            source: part.source,
            reliable: false,
            msg_type: part.msg_type,
            sequence_number: part.sequence_number,
            original_size: part.original_size,
            chunk_start: part.chunk_start,
            targets: part.targets.clone(),
            payload: part.payload.clone(),
        }
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    pub fn original_size(&self) -> u32 {
        self.original_size
    }

    pub fn chunk_start(&self) -> u32 {
        self.chunk_start
    }

    pub fn targets(&self) -> &BTreeSet<NodeId> {
        &self.targets
    }

    pub fn has_target(&self, target: &NodeId) -> bool {
        self.targets.contains(target)
    }

    pub fn remove_target(&mut self, target: &NodeId) -> bool {
        self.targets.remove(target)
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Replaces the payload of a message that is still queued, coalescing it with the
    ///  previous, now superseded content.
    pub fn reset_payload(&mut self, payload: Bytes) {
        self.original_size = payload.len() as u32;
        self.payload = payload;
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::node::test_node_id_from_number;

    #[test]
    fn test_new_covers_whole_payload() {
        let msg = OutMessage::new(
            test_node_id_from_number(1),
            [test_node_id_from_number(2)].into(),
            true,
            MessageType::ReliableBroadcast,
            SequenceNumber::ZERO,
            Bytes::from_static(b"hello"),
        );

        assert_eq!(msg.original_size(), 5);
        assert_eq!(msg.chunk_start(), 0);
        assert!(msg.is_reliable());
    }

    #[test]
    fn test_reset_payload_updates_size() {
        let mut msg = OutMessage::new(
            test_node_id_from_number(1),
            [test_node_id_from_number(2)].into(),
            false,
            MessageType::UnreliableBroadcast,
            SequenceNumber::ZERO,
            Bytes::from_static(b"v1"),
        );

        msg.reset_payload(Bytes::from_static(b"longer value"));

        assert_eq!(msg.payload(), &Bytes::from_static(b"longer value"));
        assert_eq!(msg.original_size(), 12);
    }

    #[test]
    fn test_forwarded_keeps_fragment_geometry() {
        let part = InMessagePart {
            source: test_node_id_from_number(7),
            targets: [test_node_id_from_number(2)].into(),
            msg_type: MessageType::ReliableBroadcast,
            sequence_number: SequenceNumber::from_raw(3),
            original_size: 100,
            chunk_start: 60,
            payload: Bytes::from_static(b"tail"),
        };

        let msg = OutMessage::forwarded(&part);

        assert!(!msg.is_reliable());
        assert_eq!(msg.source(), test_node_id_from_number(7));
        assert_eq!(msg.original_size(), 100);
        assert_eq!(msg.chunk_start(), 60);
        assert_eq!(msg.payload(), &Bytes::from_static(b"tail"));
    }
}
