//! Application-level constants shared by the gossip and payment engines.

/// The standard port used for Lightning Network P2P connections.
pub const STANDARD_LIGHTNING_P2P_PORT: u16 = 9735;

/// The length, in bytes, of a BOLT 4 payment onion packet.
pub const PAYMENT_ONION_PACKET_LEN: usize = 1300;

/// The length, in bytes, of a BOLT 4 trampoline onion packet.
pub const TRAMPOLINE_ONION_PACKET_LEN: usize = 400;
