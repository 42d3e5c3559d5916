//! Gossip data model: the BOLT 7 message shapes the sync engine consumes and
//! produces, plus the validated aggregates (`PureRoutingData`,
//! `CompleteHostedRoutingData`) that the engine hands off to the router
//! database.
//!
//! BOLT 7 wire (de)serialization itself is out of scope; we
//! model messages as already-decoded structs. Signature bytes are kept
//! opaque (`Vec<u8>`) since verifying them is delegated to the
//! [`GossipVerifier`](super::iface::GossipVerifier) collaborator.

use std::collections::HashSet;

use bitcoin::BlockHash;
use common::{api::{NodePk, Scid}, ln::addr::LxSocketAddress};
use serde::{Deserialize, Serialize};

/// Bit flags for the `encoded_query_flags` TLV of `query_short_channel_ids`.
pub mod query_flags {
    pub const CHANNEL_ANNOUNCEMENT: u8 = 1;
    pub const CHANNEL_UPDATE_1: u8 = 2;
    pub const CHANNEL_UPDATE_2: u8 = 4;
    pub const NODE_ANNOUNCEMENT_1: u8 = 8;
    pub const NODE_ANNOUNCEMENT_2: u8 = 16;
}

/// Which side of a channel a [`ChannelUpdate`] describes.
///
/// BOLT 7's `channel_flags & 1`: `0` is the update from `node_id_1`, `1` is
/// the update from `node_id_2`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub enum Direction {
    Node1ToNode2,
    Node2ToNode1,
}

impl Direction {
    pub fn from_bit(bit: bool) -> Self {
        if bit { Self::Node2ToNode1 } else { Self::Node1ToNode2 }
    }

    pub fn as_index(self) -> usize {
        match self {
            Self::Node1ToNode2 => 0,
            Self::Node2ToNode1 => 1,
        }
    }
}

/// The canonical fact that a public channel exists.
///
/// This is the "lite" form used once an announcement or update has cleared
/// verification: signatures are dropped, since nothing downstream needs to
/// re-verify them.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct ChannelAnnouncement {
    pub scid: Scid,
    pub node_id_1: NodePk,
    pub node_id_2: NodePk,
}

impl ChannelAnnouncement {
    /// The node ids in deterministic (lexicographically) sorted order.
    pub fn sorted_node_ids(&self) -> (NodePk, NodePk) {
        if self.node_id_1.0.serialize() <= self.node_id_2.0.serialize() {
            (self.node_id_1, self.node_id_2)
        } else {
            (self.node_id_2, self.node_id_1)
        }
    }
}

/// The policy portion of a [`ChannelUpdate`]: identifies a logically equal
/// update regardless of timestamp or signature.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct UpdateCore {
    pub cltv_expiry_delta: u16,
    pub htlc_minimum_msat: u64,
    pub htlc_maximum_msat: Option<u64>,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
    pub disabled: bool,
}

impl UpdateCore {
    /// Per Decision D3: a missing `htlc_maximum_msat` is
    /// treated as a capacity issue, matching the `forall` semantics the
    /// original `hasCapacityIssues` check used.
    pub fn has_capacity_issues(&self, min_capacity_msat: u64) -> bool {
        match self.htlc_maximum_msat {
            None => true,
            Some(max) => max < min_capacity_msat || max <= self.htlc_minimum_msat,
        }
    }
}

/// A channel update: SCID + direction + timestamp + policy + signature.
/// There are at most two per channel (one per direction).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct ChannelUpdate {
    pub scid: Scid,
    pub direction: Direction,
    pub timestamp: u32,
    pub core: UpdateCore,
}

/// The key used to identify "the same update" in the master's confirmation
/// tallies, irrespective of which peer reported it or at what timestamp.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct UpdateCoreKey {
    pub scid: Scid,
    pub direction: Direction,
    pub core: UpdateCore,
}

impl From<&ChannelUpdate> for UpdateCoreKey {
    fn from(update: &ChannelUpdate) -> Self {
        Self {
            scid: update.scid,
            direction: update.direction,
            core: update.core.clone(),
        }
    }
}

/// BOLT 7's `should_request_update`: the peer's copy is strictly newer than
/// ours iff its timestamp is newer, or the timestamp ties and the checksums
/// differ.
pub fn should_request_update(
    our_timestamp_checksum: Option<(u32, u32)>,
    their_timestamp_checksum: (u32, u32),
) -> bool {
    match our_timestamp_checksum {
        None => true,
        Some((our_ts, our_ck)) => {
            let (their_ts, their_ck) = their_timestamp_checksum;
            their_ts > our_ts || (their_ts == our_ts && their_ck != our_ck)
        }
    }
}

/// Node metadata (alias, features, addresses) signed by the node id.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct NodeAnnouncement {
    pub node_id: NodePk,
    pub timestamp: u32,
    pub alias: [u8; 32],
    pub addresses: Vec<LxSocketAddress>,
    /// Opaque feature bitset; decoding individual feature bits is out of
    /// scope for the sync engine.
    #[serde(with = "common::serde_helpers::hexstr_or_bytes")]
    pub features: Vec<u8>,
}

/// Wire-level channel announcement, as delivered by the transport before
/// signature verification. Carries the raw signatures (opaque) and an
/// `is_phc` marker since private hosted channels reuse this shape.
#[derive(Clone, Debug)]
pub struct WireChannelAnnouncement {
    pub scid: Scid,
    pub node_id_1: NodePk,
    pub node_id_2: NodePk,
    pub is_phc: bool,
    pub node_signature_1: Vec<u8>,
    pub node_signature_2: Vec<u8>,
}

impl WireChannelAnnouncement {
    pub fn lite(&self) -> ChannelAnnouncement {
        ChannelAnnouncement {
            scid: self.scid,
            node_id_1: self.node_id_1,
            node_id_2: self.node_id_2,
        }
    }
}

/// Wire-level channel update, carrying the raw signature (opaque).
#[derive(Clone, Debug)]
pub struct WireChannelUpdate {
    pub scid: Scid,
    pub direction: Direction,
    pub timestamp: u32,
    pub core: UpdateCore,
    pub signature: Vec<u8>,
}

impl WireChannelUpdate {
    pub fn lite(&self) -> ChannelUpdate {
        ChannelUpdate {
            scid: self.scid,
            direction: self.direction,
            timestamp: self.timestamp,
            core: self.core.clone(),
        }
    }
}

/// Wire-level node announcement, carrying the raw signature (opaque).
#[derive(Clone, Debug)]
pub struct WireNodeAnnouncement {
    pub inner: NodeAnnouncement,
    pub signature: Vec<u8>,
}

/// One reply block to a `query_channel_range` request.
///
/// A reply is *holistic* iff its three parallel arrays are equal-length;
/// non-holistic replies are discarded whole.
#[derive(Clone, Debug, Default)]
pub struct ReplyChannelRange {
    pub chain_hash: BlockHash,
    pub first_blocknum: u32,
    pub number_of_blocks: u32,
    pub sync_complete: bool,
    pub short_channel_ids: Vec<Scid>,
    /// Per-scid, per-direction timestamps, parallel to `short_channel_ids`.
    pub timestamps: Vec<[u32; 2]>,
    /// Per-scid, per-direction checksums, parallel to `short_channel_ids`.
    pub checksums: Vec<[u32; 2]>,
}

impl ReplyChannelRange {
    /// A reply is holistic iff its parallel arrays are equal-length.
    pub fn is_holistic(&self) -> bool {
        let n = self.short_channel_ids.len();
        self.timestamps.len() == n && self.checksums.len() == n
    }
}

#[derive(Copy, Clone, Debug)]
pub struct QueryChannelRange {
    pub chain_hash: BlockHash,
    pub first_blocknum: u32,
    pub number_of_blocks: u32,
}

impl QueryChannelRange {
    pub fn want_all(chain_hash: BlockHash) -> Self {
        Self {
            chain_hash,
            first_blocknum: 0,
            number_of_blocks: u32::MAX,
        }
    }
}

/// One outgoing `query_short_channel_ids` batch.
#[derive(Clone, Debug, Default)]
pub struct QueryShortChannelIds {
    pub chain_hash: BlockHash,
    pub scids: Vec<(Scid, u8)>,
}

#[derive(Copy, Clone, Debug)]
pub struct ReplyShortChannelIdsEnd {
    pub chain_hash: BlockHash,
    pub complete: bool,
}

#[derive(Copy, Clone, Debug)]
pub struct QueryPublicHostedChannels {
    pub chain_hash: BlockHash,
}

#[derive(Copy, Clone, Debug)]
pub struct ReplyPublicHostedChannelsEnd {
    pub chain_hash: BlockHash,
}

/// Any BOLT 7 message the worker may receive from its peer during the
/// short-id or gossip phases.
#[derive(Clone, Debug)]
pub enum GossipMessage {
    ChannelAnnouncement(WireChannelAnnouncement),
    ChannelUpdate(WireChannelUpdate),
    NodeAnnouncement(WireNodeAnnouncement),
    ReplyChannelRange(ReplyChannelRange),
    ReplyShortChannelIdsEnd(ReplyShortChannelIdsEnd),
    ReplyPublicHostedChannelsEnd(ReplyPublicHostedChannelsEnd),
}

/// A snapshot of vetted routing data, emitted by the [`SyncMaster`] in
/// batches and on final completion.
///
/// [`SyncMaster`]: super::master::SyncMaster
#[derive(Clone, Debug, Default)]
pub struct PureRoutingData {
    pub announcements: Vec<ChannelAnnouncement>,
    pub updates: Vec<ChannelUpdate>,
    /// Sum of pending queries across all workers at the time this snapshot
    /// was emitted; `0` on the final, post-completion snapshot.
    pub queries_left: usize,
}

/// The terminal payload of a [`PHCSyncMaster`] round.
///
/// [`PHCSyncMaster`]: super::phc::PHCSyncMaster
#[derive(Clone, Debug, Default)]
pub struct CompleteHostedRoutingData {
    pub announcements: Vec<ChannelAnnouncement>,
    pub updates: Vec<ChannelUpdate>,
}

/// Dedup helper: a set of distinct reporter node ids.
pub type Reporters = HashSet<NodePk>;
