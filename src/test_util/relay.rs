use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::transport::message_id::MessageId;
use crate::transport::node_id::NodeId;
use crate::transport::out_message::OutMessage;
use crate::transport::relay::Relay;

/// Recording fake for the relay seam: remembers every enqueued message (holding the
///  strong reference a real transmit queue would hold) and lets tests script target
///  acceptance and the sending flag. Unit tests fix the unreliable key type to `u64`.
pub struct RecordingRelay {
    relay_id: NodeId,
    targets: BTreeSet<NodeId>,
    pub inserted: Vec<(MessageId<u64>, Rc<RefCell<OutMessage>>)>,
    pub sending: bool,
    pub refuse_targets: bool,
}

impl RecordingRelay {
    pub fn new(relay_id: NodeId) -> RecordingRelay {
        RecordingRelay {
            relay_id,
            targets: BTreeSet::default(),
            inserted: Vec::default(),
            sending: false,
            refuse_targets: false,
        }
    }

    pub fn shared(relay_id: NodeId) -> Rc<RefCell<RecordingRelay>> {
        Rc::new(RefCell::new(RecordingRelay::new(relay_id)))
    }

    /// ids of all enqueued messages, in insertion order
    pub fn inserted_ids(&self) -> Vec<MessageId<u64>> {
        self.inserted.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Drops the transmit queue's strong references, as a real relay does once frames
    ///  are on the wire, and returns what was queued so the test can `release` it.
    pub fn drain(&mut self) -> Vec<(MessageId<u64>, Rc<RefCell<OutMessage>>)> {
        std::mem::take(&mut self.inserted)
    }
}

impl Relay<u64> for RecordingRelay {
    fn relay_id(&self) -> NodeId {
        self.relay_id
    }

    fn add_target(&mut self, target: NodeId) -> bool {
        if self.refuse_targets {
            return false;
        }
        self.targets.insert(target)
    }

    fn clear_targets(&mut self) {
        self.targets.clear();
    }

    fn targets(&self) -> &BTreeSet<NodeId> {
        &self.targets
    }

    fn insert_message(&mut self, id: MessageId<u64>, message: Rc<RefCell<OutMessage>>) {
        self.inserted.push((id, message));
    }

    fn is_sending(&self) -> bool {
        self.sending
    }
}
