//! Static / CLI-style configuration for the gossip sync engine.
//!
//! These are plain `Clone + Debug` structs with `Default` impls carrying
//! recommended defaults. Parsing them out of a CLI or environment is left to
//! the binary that wires `SyncMaster` up.

use std::time::Duration;

/// Configuration shared by [`SyncMaster`](super::master::SyncMaster) and its
/// [`SyncWorker`](super::worker::SyncWorker)s.
#[derive(Clone, Debug)]
pub struct GossipConfig {
    /// Number of parallel sync peers.
    pub max_connections: usize,
    /// Minimum corroborating peers for admission. An SCID/update is accepted
    /// iff *more than* this many distinct peers confirmed it.
    pub accept_threshold: usize,
    /// SCIDs per `query_short_channel_ids` batch.
    pub messages_to_ask: usize,
    /// Batching factor for snapshot emission: the master waits for this many
    /// completed chunks before distilling and emitting a snapshot.
    pub chunks_to_wait: usize,
    /// Minimum advertised channel `htlc_maximum_msat` to accept an update.
    pub min_capacity_msat: u64,
    /// Delay before replacing a disconnected worker.
    pub reconnect_delay: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            max_connections: 4,
            accept_threshold: 1,
            messages_to_ask: 100,
            chunks_to_wait: 4,
            min_capacity_msat: 1_000_000,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Configuration for [`PHCSyncMaster`](super::phc::PHCSyncMaster).
#[derive(Clone, Debug)]
pub struct PhcConfig {
    /// Minimum advertised PHC capacity to accept.
    pub min_phc_capacity_msat: u64,
    /// Maximum advertised PHC capacity to accept.
    pub max_phc_capacity_msat: u64,
    /// Maximum number of accepted PHCs per endpoint node.
    pub max_phc_per_node: usize,
    /// Minimum number of normal (public, non-hosted) channel adjacencies a
    /// candidate PHC endpoint must already have in the local routing graph.
    pub min_normal_chans_for_phc: usize,
    /// Retry budget for a disconnected PHC sync worker.
    pub attempts_left: u32,
    /// Delay before retrying after a disconnect.
    pub reconnect_delay: Duration,
}

impl Default for PhcConfig {
    fn default() -> Self {
        Self {
            min_phc_capacity_msat: 1_000_000,
            max_phc_capacity_msat: 5_000_000_000,
            max_phc_per_node: 2,
            min_normal_chans_for_phc: 1,
            attempts_left: 5,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}
