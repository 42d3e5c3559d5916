//! `PHCSyncMaster`: single-worker sync of private hosted channels.
//!
//! Unlike [`SyncMaster`](super::master::SyncMaster), there is no K-of-N
//! cross-validation here: only the hosted-channel peer can attest to these
//! channels at all, so trust instead rests on BOLT-level signatures and a
//! pre-admission graph check.

use std::sync::Arc;

use bitcoin::secp256k1::SecretKey;
use bitcoin::BlockHash;
use common::ln::peer::ChannelPeer;
use common::rng::{Crng, RngCore};
use common::shutdown::ShutdownChannel;
use common::task::LxTask;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::gossip::config::PhcConfig;
use crate::gossip::iface::{GossipTransport, GossipVerifier, RouterView};
use crate::gossip::msg::CompleteHostedRoutingData;
use crate::gossip::worker::{
    MasterNotifier, SyncWorker, WorkerEvent, WorkerMsg, WorkerRole,
};

enum PhcMasterMsg {
    WorkerSpawned(crate::gossip::worker::WorkerHandle),
    WorkerEvent(WorkerEvent),
    Reconnect,
}

/// The PHC sync supervisor. Runs a single [`SyncWorker`] at a time, retrying
/// on disconnect until `attempts_left` is exhausted. The budget is
/// decremented on every disconnect, including one that follows a failed
/// connection attempt.
pub struct PHCSyncMaster<T, V, R> {
    config: PhcConfig,
    chain_hash: BlockHash,
    transport: Arc<T>,
    verifier: V,
    router: Arc<R>,
    /// Peers known to host PHCs with us, tried in order.
    candidate_peers: Vec<ChannelPeer>,
    attempts_left: u32,
    handle: Option<crate::gossip::worker::WorkerHandle>,
    self_tx: mpsc::UnboundedSender<PhcMasterMsg>,
    rx: mpsc::UnboundedReceiver<PhcMasterMsg>,
    shutdown: ShutdownChannel,
}

impl<T, V, R> PHCSyncMaster<T, V, R>
where
    T: GossipTransport,
    V: GossipVerifier + Clone,
    R: RouterView,
{
    pub fn new(
        config: PhcConfig,
        chain_hash: BlockHash,
        transport: Arc<T>,
        verifier: V,
        router: Arc<R>,
        candidate_peers: Vec<ChannelPeer>,
        shutdown: ShutdownChannel,
    ) -> Self {
        let (self_tx, rx) = mpsc::unbounded_channel();
        let attempts_left = config.attempts_left;
        Self {
            config,
            chain_hash,
            transport,
            verifier,
            router,
            candidate_peers,
            attempts_left,
            handle: None,
            self_tx,
            rx,
            shutdown,
        }
    }

    /// Drives PHC sync to completion (either a successful round, delivered
    /// via `on_sync_complete`, or exhaustion of the retry budget).
    #[instrument(skip_all, name = "(phc-sync-master)")]
    pub async fn run(
        mut self,
        mut crng: impl Crng,
        on_sync_complete: impl Fn(CompleteHostedRoutingData) + Send + Sync + 'static,
    ) {
        if !self.admission_check() {
            info!("PHC pre-admission check failed; skipping sync");
            return;
        }

        self.spawn_worker(&mut crng);

        loop {
            tokio::select! {
                () = self.shutdown.recv() => {
                    info!("PHC sync master shutting down");
                    return;
                }
                Some(msg) = self.rx.recv() => {
                    match msg {
                        PhcMasterMsg::WorkerSpawned(handle) =>
                            self.handle = Some(handle),
                        PhcMasterMsg::WorkerEvent(WorkerEvent::PhcDataComplete(data)) => {
                            on_sync_complete(data);
                            return;
                        }
                        PhcMasterMsg::WorkerEvent(WorkerEvent::Disconnected { .. }) => {
                            self.handle = None;
                            if self.attempts_left == 0 {
                                info!("PHC sync attempts exhausted, giving up");
                                return;
                            }
                            self.attempts_left -= 1;
                            let self_tx = self.self_tx.clone();
                            let delay = self.config.reconnect_delay;
                            LxTask::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = self_tx.send(PhcMasterMsg::Reconnect);
                            });
                        }
                        PhcMasterMsg::WorkerEvent(_) => {}
                        PhcMasterMsg::Reconnect => self.spawn_worker(&mut crng),
                    }
                }
                else => return,
            }
        }
    }

    /// Pre-admission check: both endpoints of a prospective PHC must
    /// already have at least `min_normal_chans_for_phc` public-channel
    /// adjacencies, otherwise we don't bother syncing at all.
    ///
    /// We can only check the remote endpoint once we know who we're talking
    /// to; since candidates are keyed by node id already, check the first
    /// candidate's adjacency as a representative sample.
    fn admission_check(&self) -> bool {
        match self.candidate_peers.first() {
            Some(peer) =>
                self.router.adjacency_count(peer.node_pk)
                >= self.config.min_normal_chans_for_phc,
            None => {
                warn!("no PHC candidate peers configured");
                false
            }
        }
    }

    fn spawn_worker(&mut self, crng: &mut impl Crng) {
        let Some(peer) = self.candidate_peers.first().cloned() else {
            return;
        };

        let mut sk_bytes = [0u8; 32];
        crng.fill_bytes(&mut sk_bytes);
        let ephemeral_key = match SecretKey::from_slice(&sk_bytes) {
            Ok(sk) => sk,
            Err(_) => return,
        };

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let notifier = MasterNotifier::new(notify_tx);
        let self_tx = self.self_tx.clone();
        LxTask::spawn(async move {
            while let Some((_peer, event)) = notify_rx.recv().await {
                let _ = self_tx.send(PhcMasterMsg::WorkerEvent(event));
            }
        });

        let transport = Arc::clone(&self.transport);
        let verifier = self.verifier.clone();
        // The worker's `GossipConfig` is only consulted for `min_capacity_msat`
        // during the (unused, in the PHC role) gossip phase; PHC-specific
        // capacity bounds are threaded through `WorkerRole::Phc` instead.
        let config = crate::gossip::config::GossipConfig::default();
        let role = WorkerRole::Phc {
            max_phc_per_node: self.config.max_phc_per_node,
            min_phc_capacity_msat: self.config.min_phc_capacity_msat,
            max_phc_capacity_msat: self.config.max_phc_capacity_msat,
        };
        let chain_hash = self.chain_hash;
        let self_tx = self.self_tx.clone();
        let node_pk = peer.node_pk;

        LxTask::spawn(async move {
            match transport.connect(ephemeral_key, peer).await {
                Ok((link, init)) => {
                    let (worker, handle) = SyncWorker::new(
                        node_pk,
                        role,
                        chain_hash,
                        config,
                        link,
                        verifier,
                        notifier,
                    );
                    let _ = self_tx.send(PhcMasterMsg::WorkerSpawned(handle.clone()));
                    handle.send(WorkerMsg::Operational(init));
                    worker.run().await;
                }
                Err(e) => {
                    debug!(peer = %node_pk, "PHC connect failed: {e:#}");
                    let _ = self_tx.send(PhcMasterMsg::WorkerEvent(
                        WorkerEvent::Disconnected { supports_extended_range: true },
                    ));
                }
            }
        });
    }
}
