//! Collaborator traits for the outgoing payment engine: the local channel
//! actor, the path-finder, BOLT 4 onion construction/failure-decryption, and
//! wall-clock time are all external to the core and are modeled
//! here purely as the call surface the payment engine consumes.

use async_trait::async_trait;
use common::api::NodePk;
use common::time::TimestampMillis;

use crate::payments::model::{
    ChanId, DecryptedRemoteFailure, FailureChannelUpdate, FindRouteResult,
    FullPaymentTag, Route, RouteRequest, SharedSecrets,
};

/// Wall time in milliseconds, for the stamped failure timeline.
///
/// Exists as a trait (rather than calling [`TimestampMillis::now`] directly)
/// so tests can inject a fake clock instead of sleeping.
///
/// [`TimestampMillis::now`]: common::time::TimestampMillis::now
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> TimestampMillis;
}

/// The system wall clock.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMillis {
        TimestampMillis::now()
    }
}

/// One local channel's current view, as maintained by the (external)
/// channel/commitment layer.
pub trait LocalChannel: Send + Sync + 'static {
    fn chan_id(&self) -> ChanId;
    fn peer(&self) -> NodePk;
    fn is_online(&self) -> bool;
    fn capacity_msat(&self) -> u64;
    /// The channel's own view of how much it can currently send, before any
    /// master-side fee/reservation accounting.
    fn available_for_send_msat(&self) -> u64;
    fn min_sendable_msat(&self) -> u64;
    /// The fee the channel would charge to forward `amount_msat` over its
    /// first hop.
    fn max_fee_msat(&self, amount_msat: u64) -> u64;
}

/// Command to add one outgoing HTLC to a local channel.
#[derive(Clone, Debug)]
pub struct AddHtlc {
    pub route: Route,
    pub shared_secrets: SharedSecrets,
    pub amount_msat: u64,
    pub payment_hash: crate::payments::model::PaymentHash,
    pub cltv_expiry: u32,
}

/// The live handle used to submit an HTLC to a local channel.
///
/// Results are not returned
/// here; they arrive asynchronously into the owning sender's mailbox via
/// whatever dispatch the binary wiring performs, matching the "no blocking
/// I/O inside `doProcess`" rule.
#[async_trait]
pub trait ChannelHandle: Send + Sync + 'static {
    async fn add_htlc(&self, cmd: AddHtlc) -> anyhow::Result<()>;
}

/// Combines the read-only [`LocalChannel`] view with the live
/// [`ChannelHandle`] used to actually submit HTLCs; this is the full "Cnc"
/// (channel-and-commits) handle the master holds per local channel.
pub trait Channel: LocalChannel + ChannelHandle {}
impl<T: LocalChannel + ChannelHandle> Channel for T {}

/// `FindRoute(replyTo, RouteRequest)`: the path-finder is request/reply,
/// serialized through the master's `WAITING_FOR_ROUTE` mutex.
#[async_trait]
pub trait PathFinder: Send + Sync + 'static {
    async fn find_route(&self, request: RouteRequest) -> FindRouteResult;

    /// Feed a loosely-typed channel update into the path-finder's online graph.
    fn feed_channel_update(&self, update: FailureChannelUpdate);

    /// Verify an update's signature and, if valid, identify its signer.
    ///
    /// Combines BOLT 7 signature verification with "whose node id did this
    /// come from" into one call, since the payment
    /// engine never needs the signer without also needing the check.
    fn verify_update(&self, update: &FailureChannelUpdate) -> Option<NodePk>;
}

/// BOLT 4 onion construction and failure decryption.
pub trait OnionCodec: Send + Sync + 'static {
    /// Build the multi-part onion payload for one part, returning the
    /// per-hop shared secrets retained for later failure decryption.
    ///
    /// `outer_secret` is the outer `payment_data` secret: for a trampoline
    /// payment this must be the fresh random outer secret, never the
    /// invoice's own secret.
    fn build_onion(
        &self,
        route: &Route,
        outer_secret: crate::payments::model::PaymentSecret,
        total_amount_msat: u64,
    ) -> SharedSecrets;

    /// Attempt to decrypt a BOLT 4 failure onion using this part's shared
    /// secrets.
    fn decrypt_failure(
        &self,
        encrypted_packet: &[u8],
        shared_secrets: &SharedSecrets,
        route: &Route,
    ) -> Option<DecryptedRemoteFailure>;
}

/// Outward notifications a sender emits over the course of one payment's
/// life.
///
/// Modeled as a trait (rather than a channel the caller owns) so that a
/// payments store, a test harness, or both can observe the same sender
/// without the sender needing to know how many listeners exist.
#[async_trait]
pub trait PaymentListener: Send + Sync + 'static {
    /// The first `RemoteFulfill` for this tag: the preimage is now claimable
    /// and the payment is economically complete, even if other parts are
    /// still in flight.
    async fn on_payment_succeeded(&self, tag: FullPaymentTag, preimage: [u8; 32]);

    /// Every part has now resolved (fulfilled or none left in flight) after
    /// the first fulfill: the payment's bookkeeping can be closed out.
    async fn on_whole_payment_succeeded(&self, tag: FullPaymentTag);

    /// The payment reached `ABORTED` without ever fulfilling.
    async fn on_payment_failed(
        &self,
        tag: FullPaymentTag,
        error: crate::payments::error::PaymentError,
    );
}
