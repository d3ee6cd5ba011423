//! Two transport cores wired back-to-back through in-memory relays: syn exchange,
//!  reliable broadcast with acknowledgements and the flush barrier, and coalescing of
//!  unreliable broadcasts. The main loop plays the role of the I/O driver, pumping
//!  frames and acks between the two nodes.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};
use tracing::Level;

use meshcast::topology::graph::Topology;
use meshcast::transport::core::Core;
use meshcast::transport::in_message::InMessagePart;
use meshcast::transport::message_id::MessageId;
use meshcast::transport::node_id::NodeId;
use meshcast::transport::out_message::OutMessage;
use meshcast::transport::outbound_acks::AckEntry;
use meshcast::transport::relay::{Relay, SharedRelay};


/// Relay that keeps frames in memory until the demo's pump hands them to the peer.
///  Reliable messages stay queued until every target has acknowledged them.
struct LoopbackRelay {
    relay_id: NodeId,
    targets: BTreeSet<NodeId>,
    queue: Vec<(MessageId<u64>, Rc<RefCell<OutMessage>>)>,
}

impl LoopbackRelay {
    fn shared(relay_id: NodeId) -> Rc<RefCell<LoopbackRelay>> {
        Rc::new(RefCell::new(LoopbackRelay {
            relay_id,
            targets: BTreeSet::new(),
            queue: Vec::new(),
        }))
    }
}

impl Relay<u64> for LoopbackRelay {
    fn relay_id(&self) -> NodeId {
        self.relay_id
    }

    fn add_target(&mut self, target: NodeId) -> bool {
        self.targets.insert(target)
    }

    fn clear_targets(&mut self) {
        self.targets.clear();
    }

    fn targets(&self) -> &BTreeSet<NodeId> {
        &self.targets
    }

    fn insert_message(&mut self, id: MessageId<u64>, message: Rc<RefCell<OutMessage>>) {
        self.queue.push((id, message));
    }

    fn is_sending(&self) -> bool {
        !self.queue.is_empty()
    }
}


fn frame(message: &OutMessage) -> InMessagePart {
    InMessagePart {
        source: message.source(),
        targets: message.targets().clone(),
        msg_type: message.msg_type(),
        sequence_number: message.sequence_number(),
        original_size: message.original_size(),
        chunk_start: message.chunk_start(),
        payload: message.payload().clone(),
    }
}

/// Serializes every queued frame onto the "wire" and feeds it to the receiving core.
///  Reliable messages with outstanding acks go back into the queue for a later re-send,
///  everything else is handed back to the sending core.
fn pump_frames(sender: &mut Core<u64>, link: &Rc<RefCell<LoopbackRelay>>, receiver: &mut Core<u64>) {
    let queued = std::mem::take(&mut link.borrow_mut().queue);

    for (id, message) in queued {
        let mut buf = BytesMut::new();
        frame(&message.borrow()).ser(&mut buf);

        let part = InMessagePart::try_deser(&mut buf.freeze()).expect("frame was just encoded");
        receiver.on_receive_part(part);

        let keep_queued = message.borrow().is_reliable() && !message.borrow().targets().is_empty();
        if keep_queued {
            link.borrow_mut().queue.push((id, message));
        } else {
            sender.release(id, message);
        }
    }
}

/// Carries everything `owing` owes to `peer` over to the core that sent the messages.
fn pump_acks(owing: &mut Core<u64>, peer: NodeId, other: &mut Core<u64>) {
    let mut buf = BytesMut::new();
    let count = owing.encode_acks(&mut buf, &BTreeSet::from([peer]));

    let mut encoded = buf.freeze();
    for _ in 0..count {
        let entry = AckEntry::try_deser(&mut encoded).expect("ack entry was just encoded");
        other.on_receive_acks(entry.from, entry.acks);
    }
}

pub fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    let id_a = NodeId::random();
    let id_b = NodeId::random();

    let mut node_a: Core<u64> = Core::new(id_a, |source, payload| {
        println!("A <- {}: {:?}", source, String::from_utf8_lossy(payload));
        ControlFlow::Continue(())
    });
    let mut node_b: Core<u64> = Core::new(id_b, |source, payload| {
        println!("B <- {}: {:?}", source, String::from_utf8_lossy(payload));
        ControlFlow::Continue(())
    });

    let link_a_to_b = LoopbackRelay::shared(id_b);
    let link_b_to_a = LoopbackRelay::shared(id_a);

    let shared_a: SharedRelay<u64> = link_a_to_b.clone();
    let shared_b: SharedRelay<u64> = link_b_to_a.clone();
    node_a.register_relay(shared_a);
    node_b.register_relay(shared_b);

    let mut graph = Topology::new();
    graph.add_edge(id_a, id_b);
    node_a.reset_topology(&graph);
    node_b.reset_topology(&graph);

    // syn exchange establishes the broadcast streams in both directions
    pump_frames(&mut node_a, &link_a_to_b, &mut node_b);
    pump_frames(&mut node_b, &link_b_to_a, &mut node_a);
    pump_acks(&mut node_b, id_a, &mut node_a);
    pump_acks(&mut node_a, id_b, &mut node_b);

    node_a.broadcast_reliable(Bytes::from_static(b"hello mesh"));
    node_a.broadcast_reliable(Bytes::from_static(b"second message"));

    // superseded before it ever hits the wire: only "position 2" is emitted
    node_a.broadcast_unreliable(42, Bytes::from_static(b"position 1"));
    node_a.broadcast_unreliable(42, Bytes::from_static(b"position 2"));

    node_a.flush(|| println!("A: all messages delivered and acknowledged"));

    pump_frames(&mut node_a, &link_a_to_b, &mut node_b);
    pump_acks(&mut node_b, id_a, &mut node_a);

    // the reliable messages are acknowledged now; this round drops them from the queue
    pump_frames(&mut node_a, &link_a_to_b, &mut node_b);
}
