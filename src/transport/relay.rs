use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::transport::message_id::MessageId;
use crate::transport::node_id::NodeId;
use crate::transport::out_message::OutMessage;

/// Contract between the transport core and one link-layer carrier. A relay owns the
///  socket-facing side of a single directly connected peer: it serializes queued
///  messages into frames (splitting them into parts as needed) and feeds decoded inbound
///  traffic back into the core.
///
/// It is passed around as `Rc<RefCell<dyn Relay<_>>>`: the core and the surrounding
///  transport subsystem share relays, and everything runs on one cooperative executor.
pub trait Relay<K: Clone + Ord> {
    /// identity of the directly connected peer on the far end of this link
    fn relay_id(&self) -> NodeId;

    /// Accept responsibility for delivering to `target`, returning whether it was newly
    ///  added.
    fn add_target(&mut self, target: NodeId) -> bool;

    fn clear_targets(&mut self);

    /// destinations currently routed through this link
    fn targets(&self) -> &BTreeSet<NodeId>;

    /// Enqueue a shared outbound message for transmission. The relay keeps a strong
    ///  reference until it is done with the message and hands it back via the core's
    ///  `release`.
    fn insert_message(&mut self, id: MessageId<K>, message: Rc<RefCell<OutMessage>>);

    /// whether a frame is currently being serialized
    fn is_sending(&self) -> bool;
}

pub type SharedRelay<K> = Rc<RefCell<dyn Relay<K>>>;
