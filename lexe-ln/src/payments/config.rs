//! Static / CLI-style configuration for the outgoing payment engine.
//!
//! Like [`GossipConfig`](crate::gossip::config::GossipConfig), this is a
//! plain `Clone + Debug` struct with a `Default` impl carrying recommended
//! defaults; parsing it out of a CLI or environment is left to the binary
//! that wires `OutgoingPaymentMaster` up.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    /// A (channel, direction) pair is excluded from route requests once its
    /// failure counter reaches this many.
    pub max_direction_failures: u32,
    /// A node is excluded from route requests once its failure counter
    /// reaches this many. Also the unit for the invalid-signature
    /// punishment, which is `32 * max_strange_node_failures`.
    pub max_strange_node_failures: u32,
    /// Retry budget for reassigning a part after a *remote* reject.
    pub max_remote_attempts: u32,
    /// Budget for how many times a part may be subdivided via
    /// `CutIntoHalves`.
    pub max_in_channel_htlcs: u32,
    /// Time constant for the capacity-failure decay policy: a channel's
    /// recorded failed-at-amount relaxes back toward its full capacity over
    /// roughly this long.
    pub failed_chan_recovery: Duration,
    /// How long a sender waits before it aborts a payment with `TimedOut`
    /// if any part is still `WaitForChanOnline`.
    pub payment_timeout: Duration,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            max_direction_failures: 2,
            max_strange_node_failures: 3,
            max_remote_attempts: 6,
            max_in_channel_htlcs: 10,
            failed_chan_recovery: Duration::from_secs(6 * 60 * 60),
            payment_timeout: Duration::from_secs(60),
        }
    }
}
