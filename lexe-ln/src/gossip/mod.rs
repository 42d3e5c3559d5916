//! The gossip synchronization engine.
//!
//! Discovers and cross-validates the public channel topology (and, in a
//! parallel single-peer round, private hosted channels) from multiple
//! untrusted peers before handing vetted snapshots off to the router
//! database. See [`SyncMaster`] for the public-channel K-of-N flow and
//! [`PHCSyncMaster`] for the hosted-channel variant.
//!
//! [`SyncMaster`]: master::SyncMaster
//! [`PHCSyncMaster`]: phc::PHCSyncMaster

pub mod config;
pub mod iface;
pub mod master;
pub mod msg;
pub mod phc;
pub mod worker;
