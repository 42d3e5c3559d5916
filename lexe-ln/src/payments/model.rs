//! Outgoing payment data model: payment identity, MPP
//! shard state, the per-sender and per-master aggregates, and the thin route
//! / failure shapes the engine passes between the path-finder and the
//! onion-failure decryptor collaborators.

use std::collections::{HashMap, HashSet};
use std::fmt;

use bitcoin::secp256k1::{PublicKey, SecretKey};
use common::api::{NodePk, Scid};
use common::time::TimestampMillis;
#[cfg(any(test, feature = "test-utils"))]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::gossip::msg::{Direction, UpdateCore};

/// The payment hash a payee commits to; also the HTLC's `payment_hash`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct PaymentHash(pub [u8; 32]);

impl fmt::Debug for PaymentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentHash({})", hex::encode(self.0))
    }
}

/// The outer payment secret carried by the final `payment_data` TLV.
///
/// For a trampoline payment this is a *fresh random* secret distinct from the
/// invoice's own payment secret, so that intermediate trampoline peers never
/// learn the invoice secret.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct PaymentSecret(pub [u8; 32]);

impl fmt::Debug for PaymentSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PaymentSecret(..)")
    }
}

/// Distinguishes a locally-originated payment from one we're relaying as a
/// trampoline hop, so that two otherwise-identical `(hash, secret)` pairs
/// never collide in the master's `tag -> sender` map.
///
/// The source keys sends purely by `(hash, secret)`; we additionally carry
/// `scope` as an explicit field rather than guess at a third key component.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub enum PaymentScope {
    /// A payment we originated ourselves.
    Local,
    /// A payment we are forwarding on behalf of an upstream trampoline hop.
    TrampolineRelay { upstream: NodePk },
}

/// `(payment hash, payment secret, scope)`: uniquely keys one outbound
/// payment across retries.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "test-utils"), derive(Arbitrary))]
pub struct FullPaymentTag {
    pub payment_hash: PaymentHash,
    pub payment_secret: PaymentSecret,
    pub scope: PaymentScope,
}

/// The public form of a part's onion session key; doubles as the part id.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PartId(pub PublicKey);

impl fmt::Debug for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartId({})", self.0)
    }
}

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A local channel id, as handed out by the (external) channel/commitment
/// layer. Reuses the SCID shape since channels are addressed the same way
/// whether they're the subject of gossip or the target of a local send.
pub type ChanId = Scid;

/// `(channel, direction)`: the unit the master's per-direction failure
/// counters and hard-exclusion set are keyed by.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ChannelDirection {
    pub chan_id: ChanId,
    pub direction: Direction,
}

/// A channel's empirically observed capacity ceiling, with the wall-clock
/// time it was recorded.
#[derive(Copy, Clone, Debug)]
pub struct StampedChannelFailed {
    pub amount_msat: u64,
    pub stamp: TimestampMillis,
}

/// One MPP shard's lifecycle state.
#[derive(Clone, Debug)]
pub enum PartStatus {
    /// No channel is currently online that could carry this shard.
    WaitForChanOnline,
    /// Awaiting a route (`flight = None`), or an HTLC attempt is in flight
    /// (`flight = Some`).
    WaitForRouteOrInFlight { flight: Option<InFlightHtlc> },
}

impl PartStatus {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::WaitForRouteOrInFlight { flight: Some(_) })
    }

    pub fn is_waiting_no_flight(&self) -> bool {
        matches!(self, Self::WaitForRouteOrInFlight { flight: None })
    }
}

/// An HTLC attempt submitted to a local channel for one part.
#[derive(Clone, Debug)]
pub struct InFlightHtlc {
    pub chan_id: ChanId,
    pub route: Route,
    /// Per-hop shared secrets, kept to decrypt a BOLT 4 failure onion later.
    pub shared_secrets: SharedSecrets,
    pub amount_msat: u64,
}

/// One MPP shard: a unique onion session key (whose public form is the part
/// id), its current status, and its accumulated retry history.
#[derive(Clone, Debug)]
pub struct Part {
    pub id: PartId,
    pub session_key: SecretKey,
    pub amount_msat: u64,
    pub status: PartStatus,
    /// Number of times this part has been retried after a *remote* reject.
    pub remote_attempts: u32,
    /// Local channels this part has already failed on; never retried on the
    /// same channel twice within one part's lifetime.
    pub local_failed: HashSet<ChanId>,
    /// The channel currently holding a reservation for this part's amount,
    /// while it's `WaitForRouteOrInFlight { flight: None }`.
    /// `None` for `WaitForChanOnline` placeholders and once `flight` is
    /// `Some` (the channel's own bookkeeping takes over then).
    pub reserved_chan: Option<ChanId>,
}

/// One recorded failure on a sender, most-recent first.
#[derive(Clone, Debug)]
pub struct PaymentFailure {
    pub part_id: Option<PartId>,
    pub stamp: TimestampMillis,
    pub reason: PaymentFailureReason,
}

/// The terminal / per-shard failure reasons a sender records.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum PaymentFailureReason {
    #[error("no routes found")]
    NoRoutesFound,
    #[error("not enough funds")]
    NotEnoughFunds,
    #[error("payment not sendable")]
    PaymentNotSendable,
    #[error("ran out of retry attempts")]
    RunOutOfRetryAttempts,
    #[error("ran out of capable channels")]
    RunOutOfCapableChannels,
    #[error("node could not parse onion")]
    NodeCouldNotParseOnion,
    #[error("not retrying, no details")]
    NotRetryingNoDetails,
    #[error("timed out")]
    TimedOut,
    #[error("remote failure")]
    Remote(RemoteFailureOutcome),
}

/// The terminal remote-failure payload propagated to listeners.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RemoteFailureOutcome {
    /// The BOLT 4 failure onion decrypted successfully; `packet` is the
    /// intact failure message and `route` is the route it failed on.
    Readable { packet: Vec<u8>, route: Route },
    /// The failure onion could not be decrypted at all.
    Unreadable { route: Route },
}

/// One hop in a route: the channel it departs over, the direction traversed,
/// and the policy that produced its fee/CLTV contribution.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RouteHop {
    pub chan_id: ChanId,
    pub direction: Direction,
    /// The node this hop forwards *to* (i.e. the next hop, or the payee for
    /// the last hop).
    pub next_node: NodePk,
    pub fee_msat: u64,
    pub cltv_expiry_delta: u16,
}

/// A complete route from us to the payee, as returned by the path-finder.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub hops: Vec<RouteHop>,
    pub total_amount_msat: u64,
    pub total_cltv_delta: u32,
}

impl Route {
    /// The first hop's channel: the local channel this route departs over.
    pub fn first_chan_id(&self) -> Option<ChanId> {
        self.hops.first().map(|h| h.chan_id)
    }
}

/// Per-hop shared secrets derived while constructing a route's onion;
/// retained so a later failure onion can be decrypted (BOLT 4 Non-goal: the
/// sphinx cryptography itself lives behind [`OnionCodec`]).
///
/// [`OnionCodec`]: super::iface::OnionCodec
#[derive(Clone, Debug, Default)]
pub struct SharedSecrets(pub Vec<[u8; 32]>);

/// A route request handed to the (external) path-finder.
#[derive(Clone, Debug)]
pub struct RouteRequest {
    pub tag: FullPaymentTag,
    pub part_id: PartId,
    pub payee: NodePk,
    pub amount_msat: u64,
    pub final_cltv_expiry_delta: u16,
    /// Channels the path-finder must not route through, per the master's
    /// current exclusion criteria.
    pub exclude_channels: HashSet<ChanId>,
    /// Directions the path-finder must not route through.
    pub exclude_directions: HashSet<ChannelDirection>,
    /// Nodes the path-finder must not route through.
    pub exclude_nodes: HashSet<NodePk>,
}

/// The path-finder's reply to one [`RouteRequest`].
#[derive(Clone, Debug)]
pub enum FindRouteResult {
    RouteFound(Route),
    NoRouteAvailable,
}

/// A BOLT 4 channel update, as extracted from a remote failure's payload,
/// reused for onion-failure classification.
#[derive(Clone, Debug)]
pub struct FailureChannelUpdate {
    pub chan_id: ChanId,
    pub direction: Direction,
    pub core: UpdateCore,
    pub signature: Vec<u8>,
}

/// How a decrypted BOLT 4 failure classifies for remote-reject handling.
#[derive(Clone, Debug)]
pub enum RemoteFailureClass {
    /// `incorrect_or_unknown_payment_details`-style terminal failure, or any
    /// failure whose origin was the final recipient.
    FinalRecipient,
    PaymentTimeout,
    /// An "update"-class failure (e.g. `temporary_channel_failure`,
    /// `fee_insufficient`) carrying a channel update.
    Update(FailureChannelUpdate),
    /// A "node"-class failure (e.g. `temporary_node_failure`).
    Node,
    /// Any other transit-node failure not carrying a channel update.
    Other,
}

/// One decrypted BOLT 4 failure onion.
#[derive(Clone, Debug)]
pub struct DecryptedRemoteFailure {
    /// Index into the route's hops where the failure originated; `None` if
    /// the origin couldn't be determined more precisely than "somewhere".
    pub origin_hop_index: usize,
    pub class: RemoteFailureClass,
    /// The intact (decrypted) failure message bytes, for propagation to
    /// listeners as `RemoteFailure(decryptedPacket, route)`.
    pub raw: Vec<u8>,
}

/// Command to start (or add more funds to) one outbound multi-part payment.
#[derive(Clone, Debug)]
pub struct SendMultiPart {
    pub tag: FullPaymentTag,
    pub payee: NodePk,
    /// This attempt's share of the total payment amount.
    pub my_part_msat: u64,
    pub final_cltv_expiry_delta: u16,
    /// Apply one exponential-decay step to the master's failure statistics
    /// before admitting this send.
    pub clear_failures: bool,
}

/// One candidate local channel's current sendable view, as computed by the
/// master for a sender to split across.
#[derive(Copy, Clone, Debug)]
pub struct SendableChannel {
    pub chan_id: ChanId,
    pub peer: NodePk,
    pub is_online: bool,
    pub sendable_msat: u64,
    pub min_sendable_msat: u64,
}

/// A snapshot of per-channel in-flight payment amounts, used to detect
/// whole-payment success once all parts have resolved.
#[derive(Clone, Debug, Default)]
pub struct InFlightPayments {
    /// Outstanding (not-yet-settled) amount this sender's tag still has on
    /// each channel, per the channel's own bookkeeping.
    pub leftover_by_chan: HashMap<ChanId, u64>,
}

impl InFlightPayments {
    pub fn is_fully_settled(&self) -> bool {
        self.leftover_by_chan.values().all(|amt| *amt == 0)
    }
}

/// Local-reject reasons relayed from the (external) channel actor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LocalRejectReason {
    /// The payment is fundamentally not sendable (e.g. amount below dust).
    InPrincipleNotSendable,
    /// The channel we tried to use went offline before the HTLC committed.
    ChannelOffline,
    /// Any other local rejection (insufficient balance, CLTV too close...).
    Other,
}
