//! `SyncMaster`: supervises N parallel [`SyncWorker`]s, cross-validates
//! gossip by K-of-N agreement, and emits vetted routing snapshots in batches
//!.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bitcoin::secp256k1::SecretKey;
use bitcoin::BlockHash;
use common::api::{NodePk, Scid};
use common::ln::peer::ChannelPeer;
use common::rng::{Crng, RngCore};
use common::shutdown::ShutdownChannel;
use common::task::LxTask;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::gossip::config::GossipConfig;
use crate::gossip::iface::{GossipSink, GossipTransport, GossipVerifier};
use crate::gossip::msg::{
    query_flags, ChannelAnnouncement, PureRoutingData, ReplyChannelRange,
    UpdateCoreKey,
};
use crate::gossip::worker::{
    MasterNotifier, SyncWorker, WorkerEvent, WorkerHandle, WorkerMsg,
    WorkerRole,
};
use crate::test_event::{TestEvent, TestEventSender};

/// Messages delivered to the [`SyncMaster`]'s mailbox.
enum MasterMsg {
    /// A worker finished connecting and is now running; register its handle.
    WorkerSpawned(NodePk, WorkerHandle),
    WorkerEvent(NodePk, WorkerEvent),
    /// A scheduled reconnect fired; `queue` is `Some` when the replacement
    /// should resume the gossip phase directly.
    AddSync {
        queue: Option<VecDeque<crate::gossip::msg::QueryShortChannelIds>>,
    },
}

enum Phase {
    CollectingShortIds {
        replies: HashMap<NodePk, Vec<ReplyChannelRange>>,
    },
    Gossiping {
        proven_short_ids: Arc<HashSet<Scid>>,
        confirmed_announces: HashMap<ChannelAnnouncement, HashSet<NodePk>>,
        confirmed_updates: HashMap<
            UpdateCoreKey,
            (crate::gossip::msg::ChannelUpdate, HashSet<NodePk>),
        >,
        /// Mirrors each active worker's remaining query queue so a
        /// replacement worker can inherit it verbatim on disconnect.
        remaining_queries:
            HashMap<NodePk, VecDeque<crate::gossip::msg::QueryShortChannelIds>>,
        chunks_since_emit: usize,
        active_workers: HashSet<NodePk>,
    },
    ShutDown,
}

/// A cloneable handle used to feed worker events into a running
/// [`SyncMaster`].
#[derive(Clone)]
pub struct MasterHandle {
    tx: mpsc::UnboundedSender<MasterMsg>,
}

/// The gossip sync supervisor.
pub struct SyncMaster<T, V, R, S> {
    config: GossipConfig,
    chain_hash: BlockHash,
    transport: Arc<T>,
    verifier: V,
    router: Arc<R>,
    sink: Arc<S>,
    /// Additional SCIDs to always request node announcements for.
    request_node_announce: HashSet<Scid>,
    /// Channels to never request, regardless of proof (e.g. already known
    /// bad from a prior sync round).
    excluded_scids: HashSet<Scid>,
    candidate_peers: VecDeque<ChannelPeer>,
    workers: HashMap<NodePk, WorkerHandle>,
    _worker_tasks: Vec<LxTask<()>>,
    phase: Phase,
    self_tx: mpsc::UnboundedSender<MasterMsg>,
    rx: mpsc::UnboundedReceiver<MasterMsg>,
    test_event_tx: TestEventSender,
    shutdown: ShutdownChannel,
}

impl<T, V, R, S> SyncMaster<T, V, R, S>
where
    T: GossipTransport,
    V: GossipVerifier + Clone,
    R: crate::gossip::iface::RouterView,
    S: GossipSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: GossipConfig,
        chain_hash: BlockHash,
        transport: Arc<T>,
        verifier: V,
        router: Arc<R>,
        sink: Arc<S>,
        candidate_peers: Vec<ChannelPeer>,
        request_node_announce: HashSet<Scid>,
        excluded_scids: HashSet<Scid>,
        test_event_tx: TestEventSender,
        shutdown: ShutdownChannel,
    ) -> (Self, MasterHandle) {
        let (self_tx, rx) = mpsc::unbounded_channel();
        let handle = MasterHandle { tx: self_tx.clone() };
        let master = Self {
            config,
            chain_hash,
            transport,
            verifier,
            router,
            sink,
            request_node_announce,
            excluded_scids,
            candidate_peers: candidate_peers.into_iter().collect(),
            workers: HashMap::new(),
            _worker_tasks: Vec::new(),
            phase: Phase::CollectingShortIds { replies: HashMap::new() },
            self_tx,
            rx,
            test_event_tx,
            shutdown,
        };
        (master, handle)
    }

    /// Run the master's mailbox loop to completion: spawns the initial
    /// `max_connections` workers, then drives sync to completion.
    #[instrument(skip_all, name = "(sync-master)")]
    pub async fn run(mut self, mut crng: impl Crng) {
        for _ in 0..self.config.max_connections {
            self.spawn_worker(WorkerRole::Normal, &mut crng).await;
        }

        loop {
            tokio::select! {
                () = self.shutdown.recv() => {
                    info!("sync master shutting down");
                    break;
                }
                Some(msg) = self.rx.recv() => {
                    if self.handle_msg(msg, &mut crng).await {
                        break;
                    }
                }
                else => break,
            }
        }
    }

    async fn spawn_worker(&mut self, role: WorkerRole, crng: &mut impl Crng) {
        let Some(peer) = self.candidate_peers.pop_front() else {
            warn!("no more candidate peers; sync capacity degraded");
            return;
        };

        let mut sk_bytes = [0u8; 32];
        crng.fill_bytes(&mut sk_bytes);
        let ephemeral_key = match SecretKey::from_slice(&sk_bytes) {
            Ok(sk) => sk,
            Err(_) => return,
        };

        // Bridge this (not-yet-existing) worker's events into our mailbox.
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let notifier = MasterNotifier::new(notify_tx);
        let self_tx = self.self_tx.clone();
        let bridge_task = LxTask::spawn(async move {
            while let Some((peer, event)) = notify_rx.recv().await {
                let _ = self_tx.send(MasterMsg::WorkerEvent(peer, event));
            }
        });

        let transport = Arc::clone(&self.transport);
        let verifier = self.verifier.clone();
        let config = self.config.clone();
        let chain_hash = self.chain_hash;
        let node_pk = peer.node_pk;
        let self_tx = self.self_tx.clone();

        let connect_task = LxTask::spawn(async move {
            match transport.connect(ephemeral_key, peer).await {
                Ok((link, init)) => {
                    let (worker, handle) = SyncWorker::new(
                        node_pk, role, chain_hash, config, link, verifier,
                        notifier,
                    );
                    let _ = self_tx
                        .send(MasterMsg::WorkerSpawned(node_pk, handle.clone()));
                    handle.send(WorkerMsg::Operational(init));
                    worker.run().await;
                }
                Err(e) => {
                    debug!(peer = %node_pk, "connect failed: {e:#}");
                    let _ = self_tx.send(MasterMsg::WorkerEvent(
                        node_pk,
                        WorkerEvent::Disconnected { supports_extended_range: true },
                    ));
                }
            }
        });

        self._worker_tasks.push(bridge_task);
        self._worker_tasks.push(connect_task);
    }

    async fn handle_msg(
        &mut self,
        msg: MasterMsg,
        crng: &mut impl Crng,
    ) -> bool {
        match msg {
            MasterMsg::WorkerSpawned(peer, handle) => {
                self.workers.insert(peer, handle);
                if let Phase::Gossiping { remaining_queries, active_workers, .. } =
                    &mut self.phase
                {
                    active_workers.insert(peer);
                    remaining_queries.entry(peer).or_default();
                }
                false
            }
            MasterMsg::WorkerEvent(peer, event) =>
                self.handle_worker_event(peer, event, crng).await,
            MasterMsg::AddSync { queue } => {
                let role = match queue {
                    Some(queue) => {
                        let proven_short_ids = match &self.phase {
                            Phase::Gossiping { proven_short_ids, .. } =>
                                Arc::clone(proven_short_ids),
                            _ => return false,
                        };
                        WorkerRole::GossipReplacement { proven_short_ids, queue }
                    }
                    None => WorkerRole::Normal,
                };
                self.spawn_worker(role, crng).await;
                false
            }
        }
    }

    async fn handle_worker_event(
        &mut self,
        peer: NodePk,
        event: WorkerEvent,
        crng: &mut impl Crng,
    ) -> bool {
        match event {
            WorkerEvent::ShortIdsComplete(data) => {
                self.on_short_ids_complete(peer, data, crng).await
            }
            WorkerEvent::ChunkComplete(report) => {
                self.on_chunk_complete(peer, report).await;
                false
            }
            WorkerEvent::GossipComplete => self.on_gossip_complete(peer).await,
            WorkerEvent::NodeAnnouncement(ann) => {
                self.sink.on_node_announcement(ann).await;
                false
            }
            WorkerEvent::Disconnected { supports_extended_range } => {
                self.on_disconnect(peer, supports_extended_range, crng).await;
                false
            }
            WorkerEvent::PhcDataComplete(_) => false, // not applicable here
        }
    }

    async fn on_short_ids_complete(
        &mut self,
        peer: NodePk,
        data: Vec<ReplyChannelRange>,
        crng: &mut impl Crng,
    ) -> bool {
        let replies = match &mut self.phase {
            Phase::CollectingShortIds { replies } => replies,
            _ => return false,
        };
        replies.insert(peer, data);

        if replies.len() < self.config.max_connections {
            return false;
        }

        // All workers have reported: compute the proof and derive queries.
        let (proven_short_ids, query_template) =
            compute_proof(replies, self.config.accept_threshold);

        let full_queue = derive_query_queue(
            &query_template,
            &proven_short_ids,
            &self.excluded_scids,
            &self.request_node_announce,
            self.router.as_ref(),
            self.chain_hash,
            self.config.messages_to_ask,
        );

        let proven_short_ids = Arc::new(proven_short_ids);
        let mut remaining_queries = HashMap::new();
        let active_workers: HashSet<NodePk> =
            self.workers.keys().copied().collect();

        for (node_pk, handle) in self.workers.iter() {
            remaining_queries.insert(*node_pk, full_queue.clone());
            handle.send(WorkerMsg::BeginGossipSync {
                proven_short_ids: Arc::clone(&proven_short_ids),
                queue: full_queue.clone(),
            });
        }

        self.phase = Phase::Gossiping {
            proven_short_ids,
            confirmed_announces: HashMap::new(),
            confirmed_updates: HashMap::new(),
            remaining_queries,
            chunks_since_emit: 0,
            active_workers,
        };
        let _ = crng;
        false
    }

    async fn on_chunk_complete(
        &mut self,
        peer: NodePk,
        report: crate::gossip::worker::ChunkReport,
    ) {
        let Phase::Gossiping {
            confirmed_announces,
            confirmed_updates,
            remaining_queries,
            chunks_since_emit,
            ..
        } = &mut self.phase
        else {
            return;
        };

        for ann in report.announces {
            confirmed_announces.entry(ann).or_default().insert(peer);
        }
        for update in report.updates {
            let key = UpdateCoreKey::from(&update);
            confirmed_updates
                .entry(key)
                .and_modify(|(repr, reporters)| {
                    reporters.insert(peer);
                    if update.timestamp > repr.timestamp {
                        *repr = update.clone();
                    }
                })
                .or_insert_with(|| {
                    let mut reporters = HashSet::new();
                    reporters.insert(peer);
                    (update.clone(), reporters)
                });
        }

        if let Some(queue) = remaining_queries.get_mut(&peer) {
            queue.pop_front();
        }
        *chunks_since_emit += 1;

        self.test_event_tx.send(TestEvent::GossipWorkerReplyProcessed);

        if *chunks_since_emit >= self.config.chunks_to_wait {
            self.emit_chunk_snapshot().await;
        }
    }

    async fn emit_chunk_snapshot(&mut self) {
        let Phase::Gossiping {
            confirmed_announces,
            confirmed_updates,
            remaining_queries,
            chunks_since_emit,
            ..
        } = &mut self.phase
        else {
            return;
        };

        let threshold = self.config.accept_threshold;
        let announce_keys: Vec<ChannelAnnouncement> = confirmed_announces
            .iter()
            .filter(|(_, reporters)| reporters.len() > threshold)
            .map(|(ann, _)| ann.clone())
            .collect();
        let update_keys: Vec<UpdateCoreKey> = confirmed_updates
            .iter()
            .filter(|(_, (_, reporters))| reporters.len() > threshold)
            .map(|(key, _)| key.clone())
            .collect();

        let announcements = announce_keys.clone();
        let updates: Vec<_> = update_keys
            .iter()
            .map(|k| confirmed_updates.get(k).unwrap().0.clone())
            .collect();
        let queries_left: usize =
            remaining_queries.values().map(|q| q.len()).sum();

        for ann in &announce_keys {
            confirmed_announces.remove(ann);
        }
        for key in &update_keys {
            confirmed_updates.remove(key);
        }
        *chunks_since_emit = 0;

        self.sink
            .on_chunk_sync_complete(PureRoutingData {
                announcements,
                updates,
                queries_left,
            })
            .await;
        self.test_event_tx.send(TestEvent::GossipRoundAccepted);
    }

    async fn on_gossip_complete(&mut self, peer: NodePk) -> bool {
        let should_finish = match &mut self.phase {
            Phase::Gossiping { active_workers, remaining_queries, .. } => {
                active_workers.remove(&peer);
                remaining_queries.remove(&peer);
                active_workers.is_empty()
            }
            _ => false,
        };
        self.workers.remove(&peer);

        if !should_finish {
            return false;
        }

        let Phase::Gossiping {
            confirmed_announces,
            confirmed_updates,
            ..
        } = std::mem::replace(&mut self.phase, Phase::ShutDown)
        else {
            unreachable!()
        };

        let threshold = self.config.accept_threshold;
        let announcements = confirmed_announces
            .into_iter()
            .filter(|(_, reporters)| reporters.len() > threshold)
            .map(|(ann, _)| ann)
            .collect();
        let updates = confirmed_updates
            .into_values()
            .filter(|(_, reporters)| reporters.len() > threshold)
            .map(|(update, _)| update)
            .collect();

        self.sink
            .on_total_sync_complete(PureRoutingData {
                announcements,
                updates,
                queries_left: 0,
            })
            .await;
        info!("gossip sync complete");
        true
    }

    async fn on_disconnect(
        &mut self,
        peer: NodePk,
        supports_extended_range: bool,
        _crng: &mut impl Crng,
    ) {
        self.workers.remove(&peer);
        if !supports_extended_range {
            debug!(%peer, "peer lacked extended range support");
        }

        let inherited_queue = match &mut self.phase {
            Phase::Gossiping { remaining_queries, active_workers, .. } => {
                active_workers.remove(&peer);
                remaining_queries.remove(&peer)
            }
            _ => None,
        };

        let self_tx = self.self_tx.clone();
        let delay = self.config.reconnect_delay;
        LxTask::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = self_tx.send(MasterMsg::AddSync { queue: inherited_queue });
        });
    }
}

/// Tally SCID occurrences across workers' holistic ranges and pick the
/// richest worker's combined triples as the query-derivation template.
fn compute_proof(
    replies: &HashMap<NodePk, Vec<ReplyChannelRange>>,
    accept_threshold: usize,
) -> (HashSet<Scid>, HashMap<Scid, [(u32, u32); 2]>) {
    let mut per_worker_triples: HashMap<NodePk, HashMap<Scid, [(u32, u32); 2]>> =
        HashMap::new();

    for (peer, blocks) in replies {
        let mut triples: HashMap<Scid, [(u32, u32); 2]> = HashMap::new();
        for block in blocks {
            if !block.is_holistic() {
                continue;
            }
            for (i, scid) in block.short_channel_ids.iter().enumerate() {
                let ts = block.timestamps[i];
                let ck = block.checksums[i];
                triples.insert(*scid, [(ts[0], ck[0]), (ts[1], ck[1])]);
            }
        }
        per_worker_triples.insert(*peer, triples);
    }

    let mut tally: HashMap<Scid, usize> = HashMap::new();
    for triples in per_worker_triples.values() {
        for scid in triples.keys() {
            *tally.entry(*scid).or_insert(0) += 1;
        }
    }

    let proven: HashSet<Scid> = tally
        .into_iter()
        .filter(|(_, count)| *count > accept_threshold)
        .map(|(scid, _)| scid)
        .collect();

    let template = per_worker_triples
        .into_values()
        .max_by_key(|triples| triples.len())
        .unwrap_or_default();

    (proven, template)
}

/// `reply2Query`: build the full, ordered set of `query_short_channel_ids`
/// batches for one gossip round.
#[allow(clippy::too_many_arguments)]
fn derive_query_queue(
    template: &HashMap<Scid, [(u32, u32); 2]>,
    proven_short_ids: &HashSet<Scid>,
    excluded_scids: &HashSet<Scid>,
    request_node_announce: &HashSet<Scid>,
    router: &impl crate::gossip::iface::RouterView,
    chain_hash: BlockHash,
    messages_to_ask: usize,
) -> VecDeque<crate::gossip::msg::QueryShortChannelIds> {
    let mut entries: Vec<(Scid, u8)> = Vec::new();

    for (scid, their) in template {
        if !proven_short_ids.contains(scid) || excluded_scids.contains(scid) {
            continue;
        }

        let mut flag: u8 = 0;
        if !router.contains_channel(*scid) {
            flag |= query_flags::CHANNEL_ANNOUNCEMENT
            | query_flags::CHANNEL_UPDATE_1
            | query_flags::CHANNEL_UPDATE_2;
        } else {
            let our_digest = router.channel_digest(*scid);
            for (d, bit) in
            [(0usize, query_flags::CHANNEL_UPDATE_1), (1, query_flags::CHANNEL_UPDATE_2)]
            {
                let our = our_digest.and_then(|digests| digests[d]);
                if crate::gossip::msg::should_request_update(our, their[d]) {
                    flag |= bit;
                }
            }
        }

        if request_node_announce.contains(scid) {
            flag |= query_flags::NODE_ANNOUNCEMENT_1
            | query_flags::NODE_ANNOUNCEMENT_2;
        }

        if flag != 0 {
            entries.push((*scid, flag));
        }
    }

    // Deterministic order makes the derived queue reproducible for tests.
    entries.sort_by_key(|(scid, _)| scid.0);

    let mut queue = VecDeque::new();
    for chunk in entries.chunks(messages_to_ask.max(1)) {
        queue.push_back(crate::gossip::msg::QueryShortChannelIds {
            chain_hash,
            scids: chunk.to_vec(),
        });
    }
    queue
}

#[cfg(test)]
mod test {
    use bitcoin::hashes::Hash as _;

    use super::*;

    fn reply(
        ids: &[u64],
        ts_ck: &[((u32, u32), (u32, u32))],
        sync_complete: bool,
    ) -> ReplyChannelRange {
        ReplyChannelRange {
            chain_hash: BlockHash::from_byte_array([0u8; 32]),
            first_blocknum: 0,
            number_of_blocks: 1,
            sync_complete,
            short_channel_ids: ids.iter().map(|id| Scid(*id)).collect(),
            timestamps: ts_ck.iter().map(|(ts, _)| [ts.0, ts.1]).collect(),
            checksums: ts_ck.iter().map(|(_, ck)| [ck.0, ck.1]).collect(),
        }
    }

    /// Majority proof scenario.
    #[test]
    fn majority_proof() {
        let ts_ck_a = ((1, 1), (1, 1));
        let ts_ck_b = ((2, 2), (2, 2));

        let mut replies = HashMap::new();

        // Use simple dummy node ids derived from distinct secret keys.
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let peers: Vec<NodePk> = (1u8..=4)
            .map(|i| {
                let sk =
                    bitcoin::secp256k1::SecretKey::from_slice(&[i; 32]).unwrap();
                NodePk::from(bitcoin::secp256k1::PublicKey::from_secret_key(
                    &secp, &sk,
                ))
            })
            .collect();

        // SCID 0xA reported by peers[0..3] (three peers), 0xB only by peers[0].
        replies.insert(peers[0], vec![reply(&[0xA, 0xB], &[ts_ck_a, ts_ck_b], true)]);
        replies.insert(peers[1], vec![reply(&[0xA], &[ts_ck_a], true)]);
        replies.insert(peers[2], vec![reply(&[0xA], &[ts_ck_a], true)]);
        replies.insert(peers[3], vec![reply(&[], &[], true)]);

        let (proven, _template) = compute_proof(&replies, 2);
        assert_eq!(proven, HashSet::from([Scid(0xA)]));
        assert!(!proven.contains(&Scid(0xB)));
    }

    #[test]
    fn non_holistic_replies_are_discarded() {
        let mut bad = reply(&[1, 2], &[((1, 1), (1, 1)), ((2, 2), (2, 2))], true);
        bad.checksums.pop();
        assert!(!bad.is_holistic());

        let secp = bitcoin::secp256k1::Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[9; 32]).unwrap();
        let peer = NodePk::from(bitcoin::secp256k1::PublicKey::from_secret_key(
            &secp, &sk,
        ));
        let mut replies = HashMap::new();
        replies.insert(peer, vec![bad]);

        let (proven, template) = compute_proof(&replies, 0);
        assert!(proven.is_empty());
        assert!(template.is_empty());
    }
}
