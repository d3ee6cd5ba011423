use std::cell::RefCell;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::ops::ControlFlow;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::topology::graph::Topology;
use crate::transport::ack_set::{AckSet, AckType};
use crate::transport::config::TransportConfig;
use crate::transport::in_message::{InMessageFull, InMessagePart};
use crate::transport::message_id::{MessageId, MessageType};
use crate::transport::node_id::{NodeId, SequenceNumber};
use crate::transport::out_message::OutMessage;
use crate::transport::outbound_acks::{AckEntry, OutboundAcks};
use crate::transport::pending_message::PendingMessage;
use crate::transport::relay::{Relay, SharedRelay};
use crate::transport::router::Router;

/// Return value of the receive callback: `Break` means the application is tearing the
///  transport down, and the core must abandon all further work on the current stack
///  frame.
pub type ReceiveFlow = ControlFlow<()>;

pub type OnReceive = Box<dyn FnMut(NodeId, &[u8]) -> ReceiveFlow>;
pub type OnFlush = Box<dyn FnOnce()>;

/// Receive state for one remote sender, created once its syn has been processed. The
///  syn's sequence number anchors where that sender's reliable broadcast stream starts.
struct SyncState {
    last_executed_message: SequenceNumber,
    acks: AckSet,
}

/// Per remote peer state: reorder buffer plus (once synced) the receive window.
#[derive(Default)]
struct Target {
    sync: Option<SyncState>,
    pending: BTreeMap<SequenceNumber, PendingMessage>,
}

impl Target {
    fn buffer_full(&mut self, msg: InMessageFull) {
        match self.pending.entry(msg.sequence_number) {
            Entry::Vacant(e) => {
                e.insert(PendingMessage::from_full(msg));
            }
            Entry::Occupied(e) => {
                e.into_mut().update_payload(0, &msg.payload);
            }
        }
    }
}

/// The per-node transport core: coordinates reliable and unreliable broadcast over the
///  mesh, forwards through intermediaries along shortest paths, and guarantees in-order
///  exactly-once delivery of reliable broadcasts per sender.
///
/// Everything here is single-threaded cooperative: relays, topology updates and
///  application calls all run on the same executor, so there is no locking, and shared
///  outbound messages live behind `Rc<RefCell<_>>` with the retention registry holding
///  weak references only.
///
/// `K` is the application's deduplication key for unreliable broadcasts: two queued
///  broadcasts with the same key coalesce into one carrying the newer payload.
pub struct Core<K: Clone + Ord> {
    our_id: NodeId,
    config: Arc<TransportConfig>,
    on_receive: OnReceive,
    on_flush: Option<OnFlush>,
    next_reliable_broadcast_number: SequenceNumber,
    next_message_number: SequenceNumber,
    relays: Vec<SharedRelay<K>>,
    messages: BTreeMap<MessageId<K>, Weak<RefCell<OutMessage>>>,
    targets: BTreeMap<NodeId, Target>,
    outbound_acks: OutboundAcks,
    router: Router,
    defunct: bool,
}

impl<K: Clone + Ord + Debug> Core<K> {
    pub fn new(
        our_id: NodeId,
        on_receive: impl FnMut(NodeId, &[u8]) -> ReceiveFlow + 'static,
    ) -> Core<K> {
        Core::new_with_config(our_id, Arc::new(TransportConfig::new()), on_receive)
    }

    pub fn new_with_config(
        our_id: NodeId,
        config: Arc<TransportConfig>,
        on_receive: impl FnMut(NodeId, &[u8]) -> ReceiveFlow + 'static,
    ) -> Core<K> {
        let initial_sn = if config.randomize_initial_sequence_number {
            SequenceNumber::from_raw(rand::thread_rng().gen())
        } else {
            SequenceNumber::ZERO
        };

        Core {
            our_id,
            on_receive: Box::new(on_receive),
            on_flush: None,
            next_reliable_broadcast_number: initial_sn,
            next_message_number: SequenceNumber::ZERO,
            relays: Vec::default(),
            messages: BTreeMap::default(),
            targets: BTreeMap::default(),
            outbound_acks: OutboundAcks::new(our_id, config.max_ack_entries_per_frame),
            router: Router::new(),
            defunct: false,
            config,
        }
    }

    pub fn id(&self) -> NodeId {
        self.our_id
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn register_relay(&mut self, relay: SharedRelay<K>) {
        if self.relays.iter().any(|r| Rc::ptr_eq(r, &relay)) {
            return;
        }
        self.relays.push(relay);
    }

    pub fn unregister_relay(&mut self, relay: &SharedRelay<K>) {
        self.relays.retain(|r| !Rc::ptr_eq(r, relay));
    }

    /// Sends `data` reliably to every currently known target. The target set is
    ///  snapshotted here: peers learned later do not join messages already in flight.
    pub fn broadcast_reliable(&mut self, data: Bytes) {
        if self.defunct {
            return;
        }

        let sn = self.next_reliable_broadcast_number;
        self.next_reliable_broadcast_number = sn.next();

        let message = Rc::new(RefCell::new(OutMessage::new(
            self.our_id,
            self.target_ids(),
            true,
            MessageType::ReliableBroadcast,
            sn,
            data,
        )));
        let id = MessageId::ReliableBroadcast { sequence_number: sn };

        debug!(%sn, "registering reliable broadcast");
        self.messages.insert(id.clone(), Rc::downgrade(&message));
        self.publish(&id, &message);
    }

    /// Best-effort broadcast to every currently known target. While a previous broadcast
    ///  with the same key is still queued, its payload is replaced in place instead of
    ///  emitting a second message.
    pub fn broadcast_unreliable(&mut self, key: K, data: Bytes) {
        let targets = self.target_ids();
        self.broadcast_unreliable_to(key, data, targets);
    }

    /// Same as [Core::broadcast_unreliable], but with an explicit recipient set.
    pub fn broadcast_unreliable_to(&mut self, key: K, data: Bytes, targets: BTreeSet<NodeId>) {
        if self.defunct {
            return;
        }

        let id = MessageId::UnreliableBroadcast { key };

        if let Some(message) = self.messages.get(&id).and_then(|w| w.upgrade()) {
            trace!("unreliable broadcast still queued - coalescing");
            message.borrow_mut().reset_payload(data);
            return;
        }

        let sn = self.next_message_number;
        self.next_message_number = sn.next();

        let message = Rc::new(RefCell::new(OutMessage::new(
            self.our_id,
            targets,
            false,
            MessageType::UnreliableBroadcast,
            sn,
            data,
        )));

        self.messages.insert(id.clone(), Rc::downgrade(&message));
        self.publish(&id, &message);
    }

    /// Derives the routing from a new view of the global topology: one next hop per
    ///  reachable destination, targets that fell out of the graph are evicted, and every
    ///  destination is (re)announced to the relay serving its first hop.
    pub fn reset_topology(&mut self, graph: &Topology) {
        if self.defunct {
            return;
        }
        debug!("resetting topology");

        for relay in &self.relays {
            relay.borrow_mut().clear_targets();
        }

        self.router.rebuild(self.our_id, graph);
        self.evict_unroutable_targets();

        let relays = self.relays.clone();
        for dest in graph.nodes() {
            if dest == self.our_id {
                continue;
            }
            let Some(hop) = self.router.next_hop(&dest) else {
                continue; // unreachable this epoch
            };

            match relays.iter().find(|r| r.borrow().relay_id() == hop) {
                Some(relay) => self.add_target_to_transport(relay, dest),
                None => debug!(?dest, ?hop, "no relay for first hop - not routed this epoch"),
            }
        }
    }

    fn evict_unroutable_targets(&mut self) {
        let evicted = self
            .targets
            .keys()
            .filter(|t| !self.router.is_routable(t))
            .copied()
            .collect::<Vec<_>>();

        if evicted.is_empty() {
            return;
        }

        for t in &evicted {
            debug!(evicted = ?t, "peer no longer reachable - evicting");
            self.targets.remove(t);
        }

        let mut unregistered = Vec::new();
        for (id, weak) in &self.messages {
            let Some(message) = weak.upgrade() else { continue };
            let mut message = message.borrow_mut();
            for t in &evicted {
                message.remove_target(t);
            }
            if message.targets().is_empty() {
                unregistered.push(id.clone());
            }
        }

        let released_some = !unregistered.is_empty();
        for id in unregistered {
            self.messages.remove(&id);
        }
        if released_some {
            self.try_flush();
        }
    }

    /// Announces `new_target` to `relay`. A first sighting of the target allocates its
    ///  receive state on the remote side by sending a syn; a relay change re-queues all
    ///  live messages still owed to the target so nothing is lost when the previous relay
    ///  drops it.
    pub fn add_target_to_transport(&mut self, relay: &SharedRelay<K>, new_target: NodeId) {
        if self.defunct {
            return;
        }
        if !relay.borrow_mut().add_target(new_target) {
            return;
        }

        if !self.targets.contains_key(&new_target) {
            self.targets.insert(new_target, Target::default());

            // The syn is stamped with the current broadcast counter without consuming it:
            // its number tells the peer where the reliable broadcast stream continues.
            let sn = self.next_reliable_broadcast_number;
            let message = Rc::new(RefCell::new(OutMessage::new(
                self.our_id,
                BTreeSet::from([new_target]),
                true,
                MessageType::Syn,
                sn,
                Bytes::new(),
            )));
            let id = MessageId::ReliableUnicast {
                dest: new_target,
                sequence_number: sn,
            };

            debug!(?new_target, %sn, "new target - sending syn");
            self.messages.insert(id.clone(), Rc::downgrade(&message));
            self.publish(&id, &message);
        } else {
            for (id, weak) in &self.messages {
                let Some(message) = weak.upgrade() else { continue };
                if message.borrow().has_target(&new_target) {
                    relay.borrow_mut().insert_message(id.clone(), message.clone());
                }
            }
        }
    }

    /// Called by a relay when it drops its strong reference to a queued message. Once no
    ///  relay uses the message any more, the registry entry is cleaned up. A release is
    ///  also the moment a relay may have gone idle, so the flush barrier is re-checked
    ///  either way.
    pub fn release(&mut self, message_id: MessageId<K>, message: Rc<RefCell<OutMessage>>) {
        // Only messages that originated here are retained, and an entry with other strong
        //  owners left stays put until the last release.
        if message.borrow().source() == self.our_id
            && self.messages.contains_key(&message_id)
            && Rc::strong_count(&message) == 1
        {
            trace!(id = ?message_id, "releasing outbound message");
            self.messages.remove(&message_id);
        }

        drop(message);
        self.try_flush();
    }

    /// Hands a fragment addressed to other nodes on towards its destinations.
    ///  Forwards are best-effort on this hop and are not retained.
    pub fn forward_message(&mut self, part: &InMessagePart) {
        if self.defunct {
            return;
        }

        let message = Rc::new(RefCell::new(OutMessage::forwarded(part)));
        self.publish(&MessageId::Forward, &message);
    }

    /// Adopts a foreign ack entry travelling through this node.
    pub fn add_ack_entry(&mut self, entry: AckEntry) {
        self.outbound_acks.add_ack_entry(entry);
    }

    /// Piggybacks pending ack entries for `targets` onto an outgoing frame, consuming
    ///  them. Returns the number of entries written.
    pub fn encode_acks(&mut self, encoder: &mut BytesMut, targets: &BTreeSet<NodeId>) -> u8 {
        self.outbound_acks.encode_few(encoder, targets)
    }

    /// Processes an ack set received from `source`: every acknowledged message forgets
    ///  `source` as an outstanding recipient, and fully acknowledged messages leave the
    ///  retention registry.
    pub fn on_receive_acks(&mut self, source: NodeId, acks: AckSet) {
        if self.defunct {
            return;
        }

        let mut acked_some = false;

        for sn in acks.iter() {
            let id = match acks.ack_type() {
                AckType::Unicast => MessageId::ReliableUnicast {
                    dest: source,
                    sequence_number: sn,
                },
                AckType::Broadcast => MessageId::ReliableBroadcast {
                    sequence_number: sn,
                },
            };

            let Some(message) = self.messages.get(&id).and_then(|w| w.upgrade()) else {
                continue;
            };

            let mut m = message.borrow_mut();
            m.remove_target(&source);
            let fully_acked = m.targets().is_empty();
            drop(m);

            if fully_acked {
                trace!(?id, "message acknowledged by all targets");
                self.messages.remove(&id);
            }
            acked_some = true;
        }

        if acked_some {
            self.try_flush();
        }
    }

    /// Entry point for a decoded fragment. Full-covering parts go straight to
    ///  [Core::on_receive_full]; true fragments are merged into the source's reassembly
    ///  buffer and delivered once the assembly completes.
    pub fn on_receive_part(&mut self, part: InMessagePart) {
        if self.defunct {
            return;
        }

        if part.is_full() {
            self.on_receive_full(part.into_full());
            return;
        }

        if part.msg_type != MessageType::ReliableBroadcast
            && part.msg_type != MessageType::UnreliableBroadcast
        {
            warn!(msg_type = ?part.msg_type, "fragment of a message type that is never split - dropping");
            return;
        }

        let Some(node) = self.targets.get_mut(&part.source) else {
            trace!(source = ?part.source, "fragment from unknown source - dropping");
            return;
        };
        let Some(sync) = &node.sync else {
            return; // no syn from this peer yet
        };
        if !sync.acks.can_add(part.sequence_number) {
            trace!(source = ?part.source, sn = %part.sequence_number, "fragment outside the ack window - dropping");
            return;
        }

        let pending = match node.pending.entry(part.sequence_number) {
            Entry::Vacant(e) => e.insert(PendingMessage::from_part(part)),
            Entry::Occupied(e) => {
                let pending = e.into_mut();
                pending.update_payload(part.chunk_start, &part.payload);
                pending
            }
        };

        let completed = pending.get_full_message();
        if let Some(full) = completed {
            self.on_receive_full(full);
        }
    }

    /// The receive state machine for one complete message.
    pub fn on_receive_full(&mut self, msg: InMessageFull) {
        if self.defunct {
            return;
        }

        let Some(node) = self.targets.get_mut(&msg.source) else {
            // no interest in this peer has been advertised yet
            trace!(source = ?msg.source, "message from unknown source - dropping");
            return;
        };

        match msg.msg_type {
            MessageType::ReliableBroadcast => {
                let Some(sync) = node.sync.as_mut() else {
                    return; // no syn from this peer yet
                };

                if !sync.acks.try_add(msg.sequence_number) {
                    trace!(source = ?msg.source, sn = %msg.sequence_number, "duplicate or below window - dropping");
                    return;
                }
                self.outbound_acks
                    .acknowledge(msg.source, AckType::Broadcast, msg.sequence_number);

                let next = sync.last_executed_message.next();
                if msg.sequence_number == next {
                    sync.last_executed_message = msg.sequence_number;

                    let source = msg.source;
                    let flow = (self.on_receive)(source, &msg.payload);
                    if flow.is_break() {
                        self.defunct = true;
                        return;
                    }

                    self.replay_pending_messages(source);
                } else if msg.sequence_number > next {
                    node.buffer_full(msg);
                }
                // else: at or below the last executed message - already delivered
            }
            MessageType::UnreliableBroadcast => {
                if node.sync.is_none() {
                    return; // no syn from this peer yet
                }

                let flow = (self.on_receive)(msg.source, &msg.payload);
                if flow.is_break() {
                    self.defunct = true;
                }
            }
            MessageType::Syn => {
                self.outbound_acks
                    .acknowledge(msg.source, AckType::Unicast, msg.sequence_number);

                if node.sync.is_none() {
                    let base = msg.sequence_number.prev();
                    debug!(source = ?msg.source, %base, "syn - initializing receive state");
                    node.sync = Some(SyncState {
                        last_executed_message: base,
                        acks: AckSet::new(AckType::Broadcast, base),
                    });
                    // everything before the syn was ignored, so there is nothing to replay
                }
                // a retransmitted syn just gets its ack again
            }
        }
    }

    /// Delivers buffered messages that became contiguous, dropping entries that were
    ///  superseded while buffered. Stops at the first gap or partial assembly.
    fn replay_pending_messages(&mut self, source: NodeId) {
        loop {
            let Some(node) = self.targets.get_mut(&source) else {
                return;
            };
            let Some(sync) = node.sync.as_mut() else {
                return;
            };

            let Some((&sn, _)) = node.pending.first_key_value() else {
                return;
            };

            if sn <= sync.last_executed_message {
                node.pending.remove(&sn);
                continue;
            }
            if sn != sync.last_executed_message.next() {
                return; // gap - wait for the missing message
            }

            let Some(full) = node.pending.get(&sn).and_then(|p| p.get_full_message()) else {
                return; // next in line is still partial
            };

            self.outbound_acks
                .acknowledge(full.source, AckType::Broadcast, sn);

            let flow = (self.on_receive)(full.source, &full.payload);
            if flow.is_break() {
                self.defunct = true;
                return;
            }

            let Some(node) = self.targets.get_mut(&source) else {
                return;
            };
            if let Some(sync) = node.sync.as_mut() {
                sync.last_executed_message = sn;
            }
            node.pending.remove(&sn);
        }
    }

    /// Registers the single-shot flush callback, fired as soon as no outbound message is
    ///  retained and no relay is serializing.
    pub fn flush(&mut self, on_flush: impl FnOnce() + 'static) {
        self.on_flush = Some(Box::new(on_flush));
        self.try_flush();
    }

    fn try_flush(&mut self) {
        if self.defunct || self.on_flush.is_none() {
            return;
        }
        if !self.messages.is_empty() {
            return;
        }
        if self.relays.iter().any(|r| r.borrow().is_sending()) {
            return;
        }

        if let Some(on_flush) = self.on_flush.take() {
            debug!("transport quiescent - firing flush callback");
            on_flush();
        }
    }

    fn target_ids(&self) -> BTreeSet<NodeId> {
        self.targets.keys().copied().collect()
    }

    fn publish(&self, id: &MessageId<K>, message: &Rc<RefCell<OutMessage>>) {
        for relay in &self.relays {
            relay.borrow_mut().insert_message(id.clone(), message.clone());
        }
    }
}
