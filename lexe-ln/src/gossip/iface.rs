//! Collaborator traits for the gossip sync engine: the Noise-encrypted
//! transport, the local router graph, and BOLT 7 signature verification are
//! all external to the core and are modeled here purely as the call
//! surface the sync engine consumes.

use async_trait::async_trait;
use bitcoin::secp256k1::SecretKey;
use common::api::{NodePk, Scid};
use common::ln::peer::ChannelPeer;

use crate::gossip::msg::{
    NodeAnnouncement, PureRoutingData, QueryChannelRange,
    QueryPublicHostedChannels, QueryShortChannelIds, WireChannelAnnouncement,
    WireChannelUpdate, WireNodeAnnouncement,
};

/// The subset of a peer's `init` message the sync engine cares about.
#[derive(Copy, Clone, Debug, Default)]
pub struct Init {
    pub channel_range_queries_extended: bool,
}

/// One outbound BOLT 7 query message.
#[derive(Clone, Debug)]
pub enum GossipWireOut {
    QueryChannelRange(QueryChannelRange),
    QueryShortChannelIds(QueryShortChannelIds),
    QueryPublicHostedChannels(QueryPublicHostedChannels),
}

/// The live connection to one gossip peer, as established and maintained by
/// the (out-of-scope) Noise transport layer.
///
/// A [`SyncWorker`](crate::gossip::worker::SyncWorker) only ever calls
/// `send_many` and `forget`; everything else (dialing, Noise handshake,
/// reconnection) is the transport's responsibility. Inbound messages and
/// lifecycle events reach the worker through its own mailbox instead of a
/// callback, since the worker is a single-threaded cooperative actor.
#[async_trait]
pub trait GossipLink: Send + Sync + 'static {
    /// Send a batch of query messages to the peer in one go.
    async fn send_many(&self, messages: Vec<GossipWireOut>) -> anyhow::Result<()>;

    /// Tell the transport layer to forget this peer pair.
    async fn forget(&self);
}

/// Read-only access to the persistent router database.
///
/// The sync engine only ever reads from this; gossip-derived updates are
/// forwarded to it by the caller, not awaited by the engine itself.
pub trait RouterView: Send + Sync + 'static {
    /// Whether the local graph already has a channel for this SCID.
    fn contains_channel(&self, scid: Scid) -> bool;

    /// Per-direction `(timestamp, checksum)` for a channel already present in
    /// the local graph, if we have an update for that direction.
    fn channel_digest(&self, scid: Scid) -> Option<[Option<(u32, u32)>; 2]>;

    /// Number of public channel adjacencies a node has in the local graph.
    fn adjacency_count(&self, node: NodePk) -> usize;
}

/// Dials a candidate peer and completes the Noise handshake, returning a live
/// [`GossipLink`] plus the peer's advertised `init` features.
///
/// The master calls this once per worker it wants to (re)connect, off its own
/// mailbox task so the (potentially slow) I/O never blocks the actor loop.
#[async_trait]
pub trait GossipTransport: Send + Sync + 'static {
    type Link: GossipLink;

    async fn connect(
        &self,
        ephemeral_key: SecretKey,
        peer: ChannelPeer,
    ) -> anyhow::Result<(Self::Link, Init)>;
}

/// The sink that receives vetted routing snapshots and forwarded node
/// announcements from a [`SyncMaster`](crate::gossip::master::SyncMaster).
///
/// Models the router database + payment-graph source of truth; persistence
/// and graph application are the sink's business, not the sync engine's.
#[async_trait]
pub trait GossipSink: Send + Sync + 'static {
    async fn on_chunk_sync_complete(&self, data: PureRoutingData);
    async fn on_total_sync_complete(&self, data: PureRoutingData);
    async fn on_node_announcement(&self, ann: NodeAnnouncement);
}

/// BOLT 7 / hosted-channel signature verification.
///
/// BOLT wire codecs (and the sphinx/secp256k1 cryptography underneath them)
/// are assumed available; this trait is the narrow surface the
/// sync engine calls into to decide whether to trust an announcement/update.
pub trait GossipVerifier: Send + Sync + 'static {
    fn verify_channel_announcement(&self, ann: &WireChannelAnnouncement) -> bool;

    /// Verify a channel update's signature against `signer` (the node id on
    /// the advertised side of the channel).
    fn verify_channel_update(
        &self,
        update: &WireChannelUpdate,
        signer: NodePk,
    ) -> bool;

    fn verify_node_announcement(&self, ann: &WireNodeAnnouncement) -> bool;
}
