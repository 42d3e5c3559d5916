//! The `lexe-ln` crate contains the core of a Lightning Network client:
//! the gossip synchronization engine that discovers and validates the
//! public channel topology from multiple untrusted peers, and the outgoing
//! multi-part payment engine that splits, routes, retries, and reconciles
//! HTLC-based payments across that topology.

/// The gossip synchronization engine: `SyncWorker`, `SyncMaster`,
/// `PHCSyncMaster`.
pub mod gossip;
/// Global tracing logger shared by the gossip and payment engines.
pub mod logger;
/// The outgoing multi-part payment engine.
pub mod payments;
/// Test-only event plumbing shared by the gossip and payment engines.
pub mod test_event;
