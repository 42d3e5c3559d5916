use serde::{Deserialize, Serialize};

/// Test events emitted throughout the node that allow test to know when
/// something has happened, obviating the need for sleeps (which introduce
/// flakiness) while keeping tests reasonably fast.
// This is named `TestEvent` (not `LxEvent`) in case we need a `LxEvent` later.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TestEvent {
    /// A gossip sync worker finished validating a reply and forwarded its
    /// verdict to its sync master.
    GossipWorkerReplyProcessed,
    /// A sync master reached K-of-N consensus on a sync round and applied
    /// the agreed-upon gossip data to the network graph.
    GossipRoundAccepted,
    /// The private hosted channel sync master finished a sync round.
    PhcSyncRoundCompleted,
    /// An outgoing payment was split into shards and the first wave of
    /// payment senders was dispatched.
    OutgoingPaymentSplit,
    /// An individual payment shard succeeded, failed, or was retried.
    OutgoingPaymentShardOutcome,
    /// All shards of an outgoing payment resolved (success or permanent
    /// failure) and the payment was finalized.
    OutgoingPaymentFinalized,
}
