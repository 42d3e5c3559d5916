//! `SyncWorker`: the per-peer state machine that drives one phase of BOLT 7
//! gossip sync over one Noise connection.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bitcoin::BlockHash;
use common::api::{NodePk, Scid};
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::gossip::config::GossipConfig;
use crate::gossip::iface::{GossipLink, GossipVerifier, GossipWireOut, Init};
use crate::gossip::msg::{
    ChannelAnnouncement, ChannelUpdate, GossipMessage, QueryChannelRange,
    QueryPublicHostedChannels, QueryShortChannelIds, ReplyChannelRange,
};

/// Whether a [`SyncWorker`] serves the normal public-channel sync protocol,
/// or the single-worker private-hosted-channel variant. The only
/// behavioral difference is which phase it enters once operational.
#[derive(Clone, Debug)]
pub enum WorkerRole {
    Normal,
    Phc {
        max_phc_per_node: usize,
        min_phc_capacity_msat: u64,
        max_phc_capacity_msat: u64,
    },
    /// A replacement spawned mid-gossip-phase:
    /// skips the short-id phase entirely and resumes gossiping with the
    /// departed worker's inherited query queue.
    GossipReplacement {
        proven_short_ids: Arc<HashSet<Scid>>,
        queue: VecDeque<QueryShortChannelIds>,
    },
}

/// Messages delivered to a [`SyncWorker`]'s mailbox, whether sourced from the
/// transport layer or injected by the master.
pub enum WorkerMsg {
    /// The peer connection became operational; carries their `init` features.
    Operational(Init),
    /// An inbound BOLT 7 gossip message.
    Message(GossipMessage),
    /// The transport layer reports the connection was lost.
    Disconnected,
    /// Master-injected transition out of the post-short-id quiescent state,
    /// into the gossip phase, carrying the vetted SCID set and this worker's
    /// query queue.
    BeginGossipSync {
        proven_short_ids: Arc<HashSet<Scid>>,
        queue: VecDeque<QueryShortChannelIds>,
    },
    /// Terminal; clears local state and forgets the peer pair. Idempotent.
    Shutdown,
}

/// One completed `query_short_channel_ids` chunk's worth of gossip, reported
/// to the master.
#[derive(Clone, Debug, Default)]
pub struct ChunkReport {
    pub announces: Vec<ChannelAnnouncement>,
    pub updates: Vec<ChannelUpdate>,
    pub excluded: Vec<ChannelUpdate>,
}

/// Events a [`SyncWorker`] emits back to its [`SyncMaster`].
///
/// [`SyncMaster`]: crate::gossip::master::SyncMaster
pub enum WorkerEvent {
    ShortIdsComplete(Vec<ReplyChannelRange>),
    ChunkComplete(ChunkReport),
    GossipComplete,
    PhcDataComplete(crate::gossip::msg::CompleteHostedRoutingData),
    NodeAnnouncement(crate::gossip::msg::NodeAnnouncement),
    /// The worker evicted itself: the peer didn't advertise extended range
    /// query support, or the transport reported a disconnect.
    Disconnected { supports_extended_range: bool },
}

/// A sender handle used by a [`SyncWorker`] to report [`WorkerEvent`]s back
/// to its owning master.
#[derive(Clone)]
pub struct MasterNotifier {
    tx: mpsc::UnboundedSender<(NodePk, WorkerEvent)>,
}

impl MasterNotifier {
    pub fn new(tx: mpsc::UnboundedSender<(NodePk, WorkerEvent)>) -> Self {
        Self { tx }
    }

    fn notify(&self, peer: NodePk, event: WorkerEvent) {
        // The master outlives its workers; a send error here means the
        // master has already shut down, which is not this worker's problem.
        let _ = self.tx.send((peer, event));
    }
}

/// A cloneable sender handle for injecting [`WorkerMsg`]s into a running
/// [`SyncWorker`]'s mailbox.
#[derive(Clone)]
pub struct WorkerHandle {
    pub peer: NodePk,
    tx: mpsc::UnboundedSender<WorkerMsg>,
}

impl WorkerHandle {
    pub fn send(&self, msg: WorkerMsg) {
        let _ = self.tx.send(msg);
    }
}

enum Phase {
    Waiting,
    ShortIdSync {
        pending: Vec<ReplyChannelRange>,
    },
    /// Quiescent: short-id sync finished, waiting for the master to inject
    /// the gossip-phase query queue.
    AwaitingGossipSync,
    GossipSync {
        proven_short_ids: Arc<HashSet<Scid>>,
        queue: VecDeque<QueryShortChannelIds>,
        accum: ChunkReport,
    },
    PhcSync {
        expected_positions: std::collections::HashMap<Scid, u8>,
        node_id_to_short_ids:
            std::collections::HashMap<NodePk, HashSet<Scid>>,
        pending_announcements: std::collections::HashMap<
            Scid,
            crate::gossip::msg::WireChannelAnnouncement,
        >,
        accepted: crate::gossip::msg::CompleteHostedRoutingData,
        max_phc_per_node: usize,
        min_phc_capacity_msat: u64,
        max_phc_capacity_msat: u64,
    },
    ShutDown,
}

/// The per-peer gossip sync actor.
pub struct SyncWorker<L, V> {
    peer: NodePk,
    role: WorkerRole,
    chain_hash: BlockHash,
    config: GossipConfig,
    link: L,
    verifier: V,
    notifier: MasterNotifier,
    phase: Phase,
    rx: mpsc::UnboundedReceiver<WorkerMsg>,
}

impl<L, V> SyncWorker<L, V>
where
    L: GossipLink,
    V: GossipVerifier,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer: NodePk,
        role: WorkerRole,
        chain_hash: BlockHash,
        config: GossipConfig,
        link: L,
        verifier: V,
        notifier: MasterNotifier,
    ) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            peer,
            role,
            chain_hash,
            config,
            link,
            verifier,
            notifier,
            phase: Phase::Waiting,
            rx,
        };
        let handle = WorkerHandle { peer, tx };
        (worker, handle)
    }

    /// Run this worker's mailbox loop to completion. Consumes `self`; meant
    /// to be spawned onto its own dedicated task.
    #[instrument(skip_all, name = "(sync-worker)", fields(peer = %self.peer))]
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            if self.handle_msg(msg).await {
                break;
            }
        }
        debug!("sync worker task exiting");
    }

    /// Returns `true` if the worker should terminate its run loop.
    async fn handle_msg(&mut self, msg: WorkerMsg) -> bool {
        match msg {
            WorkerMsg::Operational(init) => self.on_operational(init).await,
            WorkerMsg::Message(gmsg) => {
                self.on_message(gmsg).await;
                false
            }
            WorkerMsg::Disconnected => {
                self.phase = Phase::ShutDown;
                self.notifier.notify(
                    self.peer,
                    WorkerEvent::Disconnected {
                        supports_extended_range: true,
                    },
                );
                true
            }
            WorkerMsg::BeginGossipSync {
                proven_short_ids,
                mut queue,
            } => {
                let first = queue.pop_front();
                self.phase = Phase::GossipSync {
                    proven_short_ids,
                    queue,
                    accum: ChunkReport::default(),
                };
                if let Some(query) = first {
                    self.send_short_channel_ids_query(query).await;
                } else {
                    // Empty queue: nothing to ask, complete immediately.
                    self.notifier.notify(self.peer, WorkerEvent::GossipComplete);
                    self.phase = Phase::ShutDown;
                    return true;
                }
                false
            }
            WorkerMsg::Shutdown => {
                self.phase = Phase::ShutDown;
                self.link.forget().await;
                true
            }
        }
    }

    async fn on_operational(&mut self, init: Init) -> bool {
        if !init.channel_range_queries_extended {
            warn!("peer lacks extended range query support, evicting");
            self.link.forget().await;
            self.phase = Phase::ShutDown;
            self.notifier.notify(
                self.peer,
                WorkerEvent::Disconnected {
                    supports_extended_range: false,
                },
            );
            return true;
        }

        match self.role.clone() {
            WorkerRole::Normal => {
                self.phase = Phase::ShortIdSync { pending: Vec::new() };
                let query =
                    QueryChannelRange::want_all(self.chain_hash);
                let _ = self
                    .link
                    .send_many(vec![GossipWireOut::QueryChannelRange(query)])
                    .await;
            }
            WorkerRole::Phc {
                max_phc_per_node,
                min_phc_capacity_msat,
                max_phc_capacity_msat,
            } => {
                self.phase = Phase::PhcSync {
                    expected_positions: Default::default(),
                    node_id_to_short_ids: Default::default(),
                    pending_announcements: Default::default(),
                    accepted: Default::default(),
                    max_phc_per_node,
                    min_phc_capacity_msat,
                    max_phc_capacity_msat,
                };
                let query =
                    QueryPublicHostedChannels { chain_hash: self.chain_hash };
                let _ = self
                    .link
                    .send_many(vec![GossipWireOut::QueryPublicHostedChannels(
                        query,
                    )])
                    .await;
            }
            WorkerRole::GossipReplacement { proven_short_ids, mut queue } => {
                let first = queue.pop_front();
                self.phase = Phase::GossipSync {
                    proven_short_ids,
                    queue,
                    accum: ChunkReport::default(),
                };
                match first {
                    Some(query) => self.send_short_channel_ids_query(query).await,
                    None => {
                        self.notifier
                            .notify(self.peer, WorkerEvent::GossipComplete);
                        self.phase = Phase::ShutDown;
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn send_short_channel_ids_query(&self, query: QueryShortChannelIds) {
        let _ = self
            .link
            .send_many(vec![GossipWireOut::QueryShortChannelIds(query)])
            .await;
    }

    async fn on_message(&mut self, gmsg: GossipMessage) {
        match &mut self.phase {
            Phase::ShortIdSync { pending } => {
                if let GossipMessage::ReplyChannelRange(reply) = gmsg {
                    let sync_complete = reply.sync_complete;
                    pending.insert(0, reply);
                    if sync_complete {
                        let data = std::mem::take(pending);
                        self.notifier
                            .notify(self.peer, WorkerEvent::ShortIdsComplete(data));
                        self.phase = Phase::AwaitingGossipSync;
                    }
                }
            }
            Phase::AwaitingGossipSync => {
                // Quiescent: ignore stray messages until the master injects
                // the gossip-phase queue.
                trace!("ignoring message while awaiting gossip sync command");
            }
            Phase::GossipSync { proven_short_ids, queue, accum } => {
                match gmsg {
                    GossipMessage::ChannelAnnouncement(ann) => {
                        if proven_short_ids.contains(&ann.scid) {
                            accum.announces.push(ann.lite());
                        }
                    }
                    GossipMessage::ChannelUpdate(update) => {
                        if proven_short_ids.contains(&update.scid) {
                            if update
                                .core
                                .has_capacity_issues(self.config.min_capacity_msat)
                            {
                                accum.excluded.push(update.lite());
                            } else {
                                accum.updates.push(update.lite());
                            }
                        }
                    }
                    GossipMessage::NodeAnnouncement(ann) => {
                        if self.verifier.verify_node_announcement(&ann) {
                            self.notifier.notify(
                                self.peer,
                                WorkerEvent::NodeAnnouncement(ann.inner),
                            );
                        }
                    }
                    GossipMessage::ReplyShortChannelIdsEnd(_end) => {
                        let report = std::mem::take(accum);
                        self.notifier
                            .notify(self.peer, WorkerEvent::ChunkComplete(report));
                        match queue.pop_front() {
                            Some(next) => {
                                self.send_short_channel_ids_query(next).await;
                            }
                            None => {
                                self.notifier
                                    .notify(self.peer, WorkerEvent::GossipComplete);
                                self.phase = Phase::ShutDown;
                            }
                        }
                    }
                    GossipMessage::ReplyChannelRange(_)
                    | GossipMessage::ReplyPublicHostedChannelsEnd(_) => {}
                }
            }
            Phase::PhcSync {
                expected_positions,
                node_id_to_short_ids,
                pending_announcements,
                accepted,
                max_phc_per_node,
                min_phc_capacity_msat,
                max_phc_capacity_msat,
            } => match gmsg {
                GossipMessage::ChannelAnnouncement(ann) if ann.is_phc => {
                    let (sorted_lo, sorted_hi) = {
                        let lite = ann.lite();
                        lite.sorted_node_ids()
                    };
                    let expected_scid = phc_scid(sorted_lo, sorted_hi);
                    if expected_scid != ann.scid {
                        return;
                    }
                    let n1_count = node_id_to_short_ids
                        .get(&ann.node_id_1)
                        .map(|s| s.len())
                        .unwrap_or(0);
                    let n2_count = node_id_to_short_ids
                        .get(&ann.node_id_2)
                        .map(|s| s.len())
                        .unwrap_or(0);
                    if n1_count >= *max_phc_per_node || n2_count >= *max_phc_per_node {
                        return;
                    }
                    if !self.verifier.verify_channel_announcement(&ann) {
                        return;
                    }
                    // Both direction bits (`Node1ToNode2` = 1, `Node2ToNode1`
                    // = 2) start out expected; each is cleared independently
                    // as its update is accepted below.
                    expected_positions.insert(ann.scid, 1 | 2);
                    node_id_to_short_ids
                        .entry(ann.node_id_1)
                        .or_default()
                        .insert(ann.scid);
                    node_id_to_short_ids
                        .entry(ann.node_id_2)
                        .or_default()
                        .insert(ann.scid);
                    accepted.announcements.push(ann.lite());
                    pending_announcements.insert(ann.scid, ann);
                }
                GossipMessage::ChannelUpdate(update) => {
                    let Some(ann) = pending_announcements.get(&update.scid) else {
                        return;
                    };
                    let Some(remaining) = expected_positions.get_mut(&update.scid)
                    else {
                        return;
                    };
                    let direction_bit =
                        1u8 << update.direction.as_index();
                    if *remaining & direction_bit == 0 {
                        // Already seen this direction for this channel.
                        return;
                    }
                    let capacity = update.core.htlc_maximum_msat.unwrap_or(0);
                    if capacity < *min_phc_capacity_msat
                        || capacity > *max_phc_capacity_msat
                        || capacity <= update.core.htlc_minimum_msat
                    {
                        return;
                    }
                    let signer = match update.direction {
                        crate::gossip::msg::Direction::Node1ToNode2 => ann.node_id_1,
                        crate::gossip::msg::Direction::Node2ToNode1 => ann.node_id_2,
                    };
                    if !self.verifier.verify_channel_update(&update, signer) {
                        return;
                    }
                    *remaining &= !direction_bit;
                    accepted.updates.push(update.lite());
                }
                GossipMessage::ReplyPublicHostedChannelsEnd(_) => {
                    let data = std::mem::take(accepted);
                    self.notifier
                        .notify(self.peer, WorkerEvent::PhcDataComplete(data));
                    self.phase = Phase::ShutDown;
                }
                _ => {}
            },
            Phase::Waiting | Phase::ShutDown => {
                trace!("ignoring message outside of an active phase");
            }
        }
    }
}

/// The deterministic SCID of a private hosted channel: the hash of the two
/// endpoint node ids in sorted order.
pub fn phc_scid(node_id_lo: NodePk, node_id_hi: NodePk) -> Scid {
    let digest = common::sha256::digest_many(&[
        &node_id_lo.0.serialize(),
        &node_id_hi.0.serialize(),
    ]);
    let bytes = digest.as_ref();
    let mut scid_bytes = [0u8; 8];
    scid_bytes.copy_from_slice(&bytes[0..8]);
    Scid(u64::from_be_bytes(scid_bytes))
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::Hash as _;

    use super::*;
    use crate::gossip::msg::{
        Direction, UpdateCore, WireChannelAnnouncement, WireChannelUpdate,
        WireNodeAnnouncement,
    };

    struct NullLink;

    #[async_trait::async_trait]
    impl GossipLink for NullLink {
        async fn send_many(&self, _messages: Vec<GossipWireOut>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn forget(&self) {}
    }

    struct AcceptAllVerifier;

    impl GossipVerifier for AcceptAllVerifier {
        fn verify_channel_announcement(&self, _ann: &WireChannelAnnouncement) -> bool {
            true
        }
        fn verify_channel_update(&self, _update: &WireChannelUpdate, _signer: NodePk) -> bool {
            true
        }
        fn verify_node_announcement(&self, _ann: &WireNodeAnnouncement) -> bool {
            true
        }
    }

    fn node_pk(byte: u8) -> NodePk {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        NodePk::from(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk))
    }

    fn phc_announcement(a: NodePk, b: NodePk) -> WireChannelAnnouncement {
        let (lo, hi) =
            if a.0.serialize() <= b.0.serialize() { (a, b) } else { (b, a) };
        WireChannelAnnouncement {
            scid: phc_scid(lo, hi),
            node_id_1: a,
            node_id_2: b,
            is_phc: true,
            node_signature_1: Vec::new(),
            node_signature_2: Vec::new(),
        }
    }

    async fn new_phc_worker(
        max_phc_per_node: usize,
    ) -> SyncWorker<NullLink, AcceptAllVerifier> {
        let (mut worker, _handle) = SyncWorker::new(
            node_pk(99),
            WorkerRole::Phc {
                max_phc_per_node,
                min_phc_capacity_msat: 1_000,
                max_phc_capacity_msat: 1_000_000,
            },
            BlockHash::from_byte_array([0u8; 32]),
            GossipConfig::default(),
            NullLink,
            AcceptAllVerifier,
            MasterNotifier::new(mpsc::unbounded_channel().0),
        );
        worker
            .on_operational(Init { channel_range_queries_extended: true })
            .await;
        worker
    }

    fn accepted_counts(worker: &SyncWorker<NullLink, AcceptAllVerifier>) -> (usize, usize) {
        match &worker.phase {
            Phase::PhcSync { accepted, .. } =>
                (accepted.announcements.len(), accepted.updates.len()),
            _ => panic!("expected PhcSync phase"),
        }
    }

    /// P7: an announcement is only admitted once its SCID matches the
    /// deterministic hash of its sorted endpoints, and a node already at
    /// `max_phc_per_node` accepted channels is rejected from gaining another.
    #[tokio::test]
    async fn phc_admission_enforces_scid_hash_and_per_node_cap() {
        let mut worker = new_phc_worker(1).await;

        let ann_ok = phc_announcement(node_pk(1), node_pk(2));
        worker
            .on_message(GossipMessage::ChannelAnnouncement(ann_ok.clone()))
            .await;
        assert_eq!(accepted_counts(&worker), (1, 0));

        // node_pk(1) is already at the cap (1); a second channel naming it
        // must be rejected even though the SCID hash is correct.
        let ann_over_cap = phc_announcement(node_pk(1), node_pk(3));
        worker
            .on_message(GossipMessage::ChannelAnnouncement(ann_over_cap))
            .await;
        assert_eq!(accepted_counts(&worker), (1, 0));

        // Fresh endpoints, but a tampered SCID that doesn't hash-match.
        let mut ann_bad_scid = phc_announcement(node_pk(4), node_pk(5));
        ann_bad_scid.scid = Scid(0xdead_beef);
        worker
            .on_message(GossipMessage::ChannelAnnouncement(ann_bad_scid))
            .await;
        assert_eq!(accepted_counts(&worker), (1, 0));
    }

    /// An accepted channel's two directions are independently admissible:
    /// a capacity-bounded, correctly-signed update for either direction is
    /// accepted, and the same direction can't be accepted twice.
    #[tokio::test]
    async fn phc_update_requires_capacity_bounds_and_rejects_duplicate_direction() {
        let mut worker = new_phc_worker(2).await;

        let ann = phc_announcement(node_pk(1), node_pk(2));
        worker
            .on_message(GossipMessage::ChannelAnnouncement(ann.clone()))
            .await;
        assert_eq!(accepted_counts(&worker), (1, 0));

        let update = WireChannelUpdate {
            scid: ann.scid,
            direction: Direction::Node1ToNode2,
            timestamp: 1,
            core: UpdateCore {
                cltv_expiry_delta: 40,
                htlc_minimum_msat: 1,
                htlc_maximum_msat: Some(500_000),
                fee_base_msat: 1,
                fee_proportional_millionths: 1,
                disabled: false,
            },
            signature: Vec::new(),
        };
        worker
            .on_message(GossipMessage::ChannelUpdate(update.clone()))
            .await;
        assert_eq!(accepted_counts(&worker), (1, 1));

        // The same direction again must not be double-counted.
        worker.on_message(GossipMessage::ChannelUpdate(update)).await;
        assert_eq!(accepted_counts(&worker), (1, 1));

        // The other direction is still independently acceptable.
        let other_update = WireChannelUpdate {
            scid: ann.scid,
            direction: Direction::Node2ToNode1,
            timestamp: 1,
            core: UpdateCore {
                cltv_expiry_delta: 40,
                htlc_minimum_msat: 1,
                htlc_maximum_msat: Some(500_000),
                fee_base_msat: 1,
                fee_proportional_millionths: 1,
                disabled: false,
            },
            signature: Vec::new(),
        };
        worker
            .on_message(GossipMessage::ChannelUpdate(other_update))
            .await;
        assert_eq!(accepted_counts(&worker), (1, 2));
    }

    /// An update whose advertised capacity falls outside
    /// `[min_phc_capacity_msat, max_phc_capacity_msat]` is rejected outright.
    #[tokio::test]
    async fn phc_update_outside_capacity_bounds_is_rejected() {
        let mut worker = new_phc_worker(2).await;
        let ann = phc_announcement(node_pk(1), node_pk(2));
        worker
            .on_message(GossipMessage::ChannelAnnouncement(ann.clone()))
            .await;

        let too_small = WireChannelUpdate {
            scid: ann.scid,
            direction: Direction::Node1ToNode2,
            timestamp: 1,
            core: UpdateCore {
                cltv_expiry_delta: 40,
                htlc_minimum_msat: 1,
                htlc_maximum_msat: Some(1),
                fee_base_msat: 1,
                fee_proportional_millionths: 1,
                disabled: false,
            },
            signature: Vec::new(),
        };
        worker
            .on_message(GossipMessage::ChannelUpdate(too_small))
            .await;
        assert_eq!(accepted_counts(&worker), (1, 0));
    }

    #[test]
    fn should_request_update_matches_bolt7() {
        use crate::gossip::msg::should_request_update;

        // No local copy: always request.
        assert!(should_request_update(None, (5, 10)));
        // Peer strictly newer timestamp: request.
        assert!(should_request_update(Some((4, 10)), (5, 10)));
        // Same timestamp, different checksum: request.
        assert!(should_request_update(Some((5, 11)), (5, 10)));
        // Same timestamp, same checksum: don't request.
        assert!(!should_request_update(Some((5, 10)), (5, 10)));
        // Peer older timestamp: don't request.
        assert!(!should_request_update(Some((6, 10)), (5, 10)));
    }

    #[test]
    fn reply_channel_range_holistic() {
        let mut reply = ReplyChannelRange {
            short_channel_ids: vec![Scid(1), Scid(2)],
            timestamps: vec![[1, 2], [3, 4]],
            checksums: vec![[1, 2], [3, 4]],
            ..Default::default()
        };
        assert!(reply.is_holistic());

        reply.checksums.pop();
        assert!(!reply.is_holistic());
    }
}
