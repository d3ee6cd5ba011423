use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::transport::ack_set::{AckSet, AckType};
use crate::transport::node_id::{NodeId, SequenceNumber};

/// One aggregated ack set in transit: `from` acknowledges messages sent by `to`, and the
///  entry travels (possibly through intermediaries) towards `to`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct AckEntry {
    pub to: NodeId,
    pub from: NodeId,
    pub acks: AckSet,
}

impl AckEntry {
    pub fn ser(&self, buf: &mut BytesMut) {
        self.to.ser(buf);
        self.from.ser(buf);
        self.acks.ser(buf);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<AckEntry> {
        let to = NodeId::try_deser(buf)?;
        let from = NodeId::try_deser(buf)?;
        let acks = AckSet::try_deser(buf)?;

        Ok(AckEntry { to, from, acks })
    }
}


/// Aggregator of all acks this node currently owes to remote peers, both its own and
///  foreign entries picked up for forwarding. Entries are keyed by (destination, observer,
///  type) so a forwarded entry never merges into one of ours.
pub struct OutboundAcks {
    our_id: NodeId,
    max_entries_per_frame: u8,
    entries: BTreeMap<(NodeId, NodeId, AckType), AckSet>,
}

impl OutboundAcks {
    pub fn new(our_id: NodeId, max_entries_per_frame: u8) -> OutboundAcks {
        OutboundAcks {
            our_id,
            max_entries_per_frame,
            entries: BTreeMap::default(),
        }
    }

    /// Merges one of our own acks: we acknowledge `source`'s message `sn`.
    pub fn acknowledge(&mut self, source: NodeId, ack_type: AckType, sn: SequenceNumber) {
        match self.entries.entry((source, self.our_id, ack_type)) {
            Entry::Vacant(e) => {
                e.insert(AckSet::new(ack_type, sn));
            }
            Entry::Occupied(mut e) => {
                if !e.get_mut().try_add(sn) {
                    trace!(?source, %sn, "ack already aggregated or below window");
                }
            }
        }
    }

    /// Merges a fully-formed foreign entry that we carry on behalf of another node.
    pub fn add_ack_entry(&mut self, entry: AckEntry) {
        match self.entries.entry((entry.to, entry.from, entry.acks.ack_type())) {
            Entry::Vacant(e) => {
                e.insert(entry.acks);
            }
            Entry::Occupied(mut e) => {
                for sn in entry.acks.iter() {
                    e.get_mut().try_add(sn);
                }
            }
        }
    }

    /// Encodes up to the per-frame budget of entries whose destination is in `targets`,
    ///  consuming them. Returns the number of entries written; framing that count is the
    ///  caller's business.
    pub fn encode_few(&mut self, encoder: &mut BytesMut, targets: &BTreeSet<NodeId>) -> u8 {
        let selected = self
            .entries
            .keys()
            .filter(|(to, _, _)| targets.contains(to))
            .take(self.max_entries_per_frame as usize)
            .copied()
            .collect::<Vec<_>>();

        for key in &selected {
            let acks = self.entries.remove(key).expect("key was just looked up");
            let (to, from, _) = *key;
            AckEntry { to, from, acks }.ser(encoder);
        }

        selected.len() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
