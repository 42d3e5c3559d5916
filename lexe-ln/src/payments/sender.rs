//! `OutgoingPaymentSender`: the per-payment-tag actor that shards one
//! outbound payment across local channels, resolves routes one at a time
//! through its master, and carries it to a terminal outcome.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use common::api::NodePk;
use common::rng::{Crng, RngCore, SmallRng};
use common::task::LxTask;
use tokio::sync::mpsc;
use tracing::{instrument, warn};

use crate::payments::config::PaymentConfig;
use crate::payments::error::PaymentError;
use crate::payments::iface::{AddHtlc, Clock, OnionCodec, PathFinder, PaymentListener};
use crate::payments::master::{ChannelDirectory, SendableView};
use crate::payments::model::{
    ChanId, ChannelDirection, FullPaymentTag, InFlightHtlc, InFlightPayments,
    LocalRejectReason, Part, PartId, PartStatus, PaymentFailure,
    PaymentFailureReason, RemoteFailureClass, Route, SendMultiPart,
};
use crate::test_event::{TestEvent, TestEventSender};

/// Events an [`OutgoingPaymentSender`] emits back to its master.
pub enum SenderToMaster {
    /// Ask the path-finder for exactly one route. The master attaches its
    /// own exclusion criteria.
    NeedRoute {
        part_id: PartId,
        payee: NodePk,
        amount_msat: u64,
        final_cltv_expiry_delta: u16,
    },
    ChannelFailedAtAmount(ChannelDirection),
    NodeFailed(NodePk, u32),
    DirectionFailed(ChannelDirection),
    ChannelNotRoutable(ChannelDirection),
    /// `+` to earmark a waiting-not-yet-accepted amount on a channel, `-` to
    /// release it.
    ReserveDelta(ChanId, i64),
    /// This payment attempt reached a terminal outcome; informational only,
    /// the master does not act on it (the sender, not the master, owns
    /// teardown via `RemoveSenderFSM`).
    Terminal(PaymentError),
}

/// A sender handle used to bridge [`SenderToMaster`] events into a running
/// [`OutgoingPaymentMaster`]'s mailbox, tagging each with the sender's
/// payment tag.
///
/// [`OutgoingPaymentMaster`]: crate::payments::master::OutgoingPaymentMaster
#[derive(Clone)]
pub struct SenderNotifier {
    tag: FullPaymentTag,
    tx: mpsc::UnboundedSender<(FullPaymentTag, SenderToMaster)>,
}

impl SenderNotifier {
    pub fn new(
        tag: FullPaymentTag,
        tx: mpsc::UnboundedSender<(FullPaymentTag, SenderToMaster)>,
    ) -> Self {
        Self { tag, tx }
    }

    fn notify(&self, event: SenderToMaster) {
        // The master outlives its senders; a send error here means the
        // master has already shut down, which is not this sender's problem.
        let _ = self.tx.send((self.tag, event));
    }
}

/// Messages delivered to an [`OutgoingPaymentSender`]'s mailbox.
pub enum SenderMsg {
    Start { cmd: SendMultiPart, view: SendableView },
    AskForRoute(SendableView),
    RouteFound(PartId, Route),
    NoRouteAvailable(PartId),
    LocalReject(PartId, LocalRejectReason),
    RemoteFulfill(PartId, [u8; 32]),
    RemoteReject(PartId, Vec<u8>),
    InFlightSnapshot(InFlightPayments),
    ChannelOnline(ChanId, crate::payments::model::SendableChannel),
    /// `CMDAbort`: honoured only if some part is still `WaitForChanOnline`
    Abort,
}

/// A cloneable sender handle for injecting [`SenderMsg`]s into a running
/// [`OutgoingPaymentSender`]'s mailbox.
#[derive(Clone)]
pub struct SenderHandle {
    tx: mpsc::UnboundedSender<SenderMsg>,
}

impl SenderHandle {
    pub fn send(&self, msg: SenderMsg) {
        let _ = self.tx.send(msg);
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SenderState {
    Init,
    Pending,
    Aborted,
    Succeeded,
}

/// One outbound payment's mutable state: the command it's fulfilling, its
/// MPP shards, and its reverse-chronological failure history.
struct SenderData {
    cmd: SendMultiPart,
    outer_secret: crate::payments::model::PaymentSecret,
    parts: HashMap<PartId, Part>,
    failures: Vec<PaymentFailure>,
}

/// The outbound payment shard supervisor for one [`FullPaymentTag`].
pub struct OutgoingPaymentSender<P, O> {
    data: SenderData,
    state: SenderState,
    config: PaymentConfig,
    onion: Arc<O>,
    path_finder: Arc<P>,
    listener: Arc<dyn PaymentListener>,
    clock: Arc<dyn Clock>,
    our_node_id: NodePk,

    channels: ChannelDirectory,
    last_sendable: Vec<crate::payments::model::SendableChannel>,
    last_inflight: Option<InFlightPayments>,
    rng: SmallRng,

    rx: mpsc::UnboundedReceiver<SenderMsg>,
    master: SenderNotifier,
    test_event_tx: TestEventSender,
    _abort_timer: Option<LxTask<()>>,
    abort_tx: mpsc::UnboundedSender<SenderMsg>,
}

impl<P, O> OutgoingPaymentSender<P, O>
where
    P: PathFinder,
    O: OnionCodec,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cmd: SendMultiPart,
        config: PaymentConfig,
        onion: Arc<O>,
        path_finder: Arc<P>,
        listener: Arc<dyn PaymentListener>,
        clock: Arc<dyn Clock>,
        our_node_id: NodePk,
        master: SenderNotifier,
        test_event_tx: TestEventSender,
        crng: &mut impl Crng,
    ) -> (Self, SenderHandle) {
        let outer_secret = {
            let mut bytes = [0u8; 32];
            crng.fill_bytes(&mut bytes);
            crate::payments::model::PaymentSecret(bytes)
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SenderHandle { tx: tx.clone() };

        let mut seed = [0u8; 8];
        crng.fill_bytes(&mut seed);
        let sender = Self {
            data: SenderData {
                cmd,
                outer_secret,
                parts: HashMap::new(),
                failures: Vec::new(),
            },
            state: SenderState::Init,
            config,
            onion,
            path_finder,
            listener,
            clock,
            our_node_id,
            channels: Arc::new(HashMap::new()),
            last_sendable: Vec::new(),
            last_inflight: None,
            rng: SmallRng::from_u64(u64::from_le_bytes(seed)),
            rx,
            master,
            test_event_tx,
            _abort_timer: None,
            abort_tx: tx,
        };
        (sender, handle)
    }

    #[instrument(skip_all, name = "(payment-sender)")]
    pub async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            self.handle_msg(msg).await;
            if matches!(self.state, SenderState::Aborted | SenderState::Succeeded)
                && self.data.parts.is_empty()
            {
                break;
            }
        }
    }

    async fn handle_msg(&mut self, msg: SenderMsg) {
        match msg {
            SenderMsg::Start { cmd, view } => self.on_start(cmd, view).await,
            SenderMsg::AskForRoute(view) => self.on_ask_for_route(view),
            SenderMsg::RouteFound(part_id, route) =>
                self.on_route_found(part_id, route).await,
            SenderMsg::NoRouteAvailable(part_id) =>
                self.on_no_route_available(part_id).await,
            SenderMsg::LocalReject(part_id, reason) =>
                self.on_local_reject(part_id, reason).await,
            SenderMsg::RemoteFulfill(part_id, preimage) =>
                self.on_remote_fulfill(part_id, preimage).await,
            SenderMsg::RemoteReject(part_id, packet) =>
                self.on_remote_reject(part_id, packet).await,
            SenderMsg::InFlightSnapshot(snapshot) =>
                self.on_inflight_snapshot(snapshot).await,
            SenderMsg::ChannelOnline(chan_id, sendable) =>
                self.on_channel_online(chan_id, sendable).await,
            SenderMsg::Abort => self.on_abort_timer().await,
        }
    }

    /// Shard `cmd.my_part_msat` across sendable channels, direct-payee
    /// channels preferred.
    async fn on_start(&mut self, cmd: SendMultiPart, view: SendableView) {
        self.channels = view.channels;
        self.last_sendable = view.list;
        let amount = cmd.my_part_msat;
        self.arm_abort_timer();

        match self.assign_amount(amount) {
            Ok(()) => self.state = SenderState::Pending,
            Err(reason) => self.abort(reason).await,
        }
    }

    /// Greedily allocate `leftover` across online sendable channels (direct
    /// payee first); if the online channels can't cover it, fall back to a
    /// single `WaitForChanOnline` placeholder if currently-offline channels
    /// could plausibly cover it once reconnected; otherwise fail.
    fn assign_amount(&mut self, mut leftover: u64) -> Result<(), PaymentFailureReason> {
        let payee = self.data.cmd.payee;
        let mut candidates = self.last_sendable.clone();
        self.rng.shuffle(&mut candidates);
        candidates.sort_by_key(|c| c.peer != payee);

        for candidate in &candidates {
            if leftover == 0 {
                break;
            }
            if !candidate.is_online {
                continue;
            }
            let live = self
                .last_sendable
                .iter()
                .find(|c| c.chan_id == candidate.chan_id)
                .map(|c| c.sendable_msat)
                .unwrap_or(0);
            if live == 0 {
                continue;
            }
            let alloc = leftover.min(live);
            if alloc == 0 {
                continue;
            }
            self.create_part(candidate.chan_id, alloc, PartStatus::WaitForRouteOrInFlight { flight: None });
            self.reserve_local(candidate.chan_id, alloc);
            leftover -= alloc;
        }

        if leftover == 0 {
            return Ok(());
        }

        let sleeping_total: u64 = candidates
            .iter()
            .filter(|c| !c.is_online)
            .map(|c| c.sendable_msat)
            .sum();
        if sleeping_total >= leftover {
            self.create_part(
                // no channel committed yet; the id is purely a placeholder.
                candidates.iter().find(|c| !c.is_online).map(|c| c.chan_id).unwrap_or_default(),
                leftover,
                PartStatus::WaitForChanOnline,
            );
            return Ok(());
        }

        Err(PaymentFailureReason::NotEnoughFunds)
    }

    fn create_part(&mut self, hinted_chan: ChanId, amount_msat: u64, status: PartStatus) {
        let secp = Secp256k1::signing_only();
        let mut key_bytes = [0u8; 32];
        self.rng.fill_bytes(&mut key_bytes);
        let session_key = loop {
            if let Ok(sk) = SecretKey::from_slice(&key_bytes) {
                break sk;
            }
            self.rng.fill_bytes(&mut key_bytes);
        };
        let id = PartId(PublicKey::from_secret_key(&secp, &session_key));
        let reserved_chan = match status {
            PartStatus::WaitForRouteOrInFlight { flight: None } => Some(hinted_chan),
            _ => None,
        };
        let part = Part {
            id,
            session_key,
            amount_msat,
            status,
            remote_attempts: 0,
            local_failed: Default::default(),
            reserved_chan,
        };
        self.data.parts.insert(id, part);
    }

    fn reserve_local(&mut self, chan_id: ChanId, amount_msat: u64) {
        if let Some(c) = self.last_sendable.iter_mut().find(|c| c.chan_id == chan_id) {
            c.sendable_msat = c.sendable_msat.saturating_sub(amount_msat);
        }
        self.master.notify(SenderToMaster::ReserveDelta(chan_id, amount_msat as i64));
    }

    fn release_reservation(&self, chan_id: ChanId, amount_msat: u64) {
        self.master.notify(SenderToMaster::ReserveDelta(chan_id, -(amount_msat as i64)));
    }

    fn arm_abort_timer(&mut self) {
        let delay = self.config.payment_timeout;
        let tx = self.abort_tx.clone();
        self._abort_timer = Some(LxTask::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SenderMsg::Abort);
        }));
    }

    async fn on_abort_timer(&mut self) {
        let any_waiting_online =
            self.data.parts.values().any(|p| matches!(p.status, PartStatus::WaitForChanOnline));
        if any_waiting_online {
            self.abort(PaymentFailureReason::TimedOut).await;
        }
    }

    /// Refresh the cached sendable view every round, then (if pending) ask
    /// for a route for the largest waiting-no-flight part.
    fn on_ask_for_route(&mut self, view: SendableView) {
        self.channels = view.channels;
        self.last_sendable = view.list;

        if self.state != SenderState::Pending {
            return;
        }

        let candidate = self
            .data
            .parts
            .iter()
            .filter(|(_, p)| p.status.is_waiting_no_flight())
            .max_by_key(|(_, p)| p.amount_msat)
            .map(|(id, p)| (*id, p.amount_msat));

        if let Some((part_id, amount_msat)) = candidate {
            self.master.notify(SenderToMaster::NeedRoute {
                part_id,
                payee: self.data.cmd.payee,
                amount_msat,
                final_cltv_expiry_delta: self.data.cmd.final_cltv_expiry_delta,
            });
        }
    }

    async fn on_route_found(&mut self, part_id: PartId, route: Route) {
        let Some(part) = self.data.parts.get_mut(&part_id) else { return };
        if let Some(old_chan) = part.reserved_chan.take() {
            self.release_reservation(old_chan, part.amount_msat);
        }
        let Some(chan_id) = route.first_chan_id() else {
            warn!("path-finder returned a route with no hops");
            return;
        };
        let amount_msat = part.amount_msat;
        let shared_secrets =
            self.onion.build_onion(&route, self.data.outer_secret, route.total_amount_msat);
        part.status = PartStatus::WaitForRouteOrInFlight {
            flight: Some(InFlightHtlc {
                chan_id,
                route: route.clone(),
                shared_secrets: shared_secrets.clone(),
                amount_msat,
            }),
        };

        if let Some(chan) = self.channels.get(&chan_id) {
            let chan = Arc::clone(chan);
            let cmd = AddHtlc {
                cltv_expiry: route.total_cltv_delta,
                route,
                shared_secrets,
                amount_msat,
                payment_hash: self.data.cmd.tag.payment_hash,
            };
            LxTask::spawn(async move {
                if let Err(e) = chan.add_htlc(cmd).await {
                    warn!("add_htlc failed: {e:#}");
                }
            });
        }
    }

    async fn on_no_route_available(&mut self, part_id: PartId) {
        let Some(amount) = self.data.parts.get(&part_id).map(|p| p.amount_msat) else {
            return;
        };
        if self.reassign_part(part_id, None) {
            return;
        }
        self.release_part_if_waiting(part_id);
        self.data.parts.remove(&part_id);

        if self.outgoing_htlc_slots_left() >= 1 {
            self.cut_into_halves(amount).await;
        } else {
            self.abort(PaymentFailureReason::NoRoutesFound).await;
        }
    }

    async fn on_local_reject(&mut self, part_id: PartId, reason: LocalRejectReason) {
        match reason {
            LocalRejectReason::InPrincipleNotSendable => {
                self.abort(PaymentFailureReason::PaymentNotSendable).await;
            }
            LocalRejectReason::ChannelOffline => {
                let Some(amount) = self.data.parts.get(&part_id).map(|p| p.amount_msat)
                else {
                    return;
                };
                self.release_part_if_waiting(part_id);
                self.data.parts.remove(&part_id);
                if let Err(reason) = self.assign_amount(amount) {
                    self.abort(reason).await;
                }
            }
            LocalRejectReason::Other => {
                let failed_chan = self
                    .data
                    .parts
                    .get(&part_id)
                    .and_then(|p| match &p.status {
                        PartStatus::WaitForRouteOrInFlight { flight: Some(f) } =>
                            Some(f.chan_id),
                        _ => p.reserved_chan,
                    });
                if self.reassign_part(part_id, failed_chan) {
                    return;
                }
                self.release_part_if_waiting(part_id);
                self.data.parts.remove(&part_id);
                self.abort(PaymentFailureReason::RunOutOfCapableChannels).await;
            }
        }
    }

    async fn on_remote_fulfill(&mut self, part_id: PartId, preimage: [u8; 32]) {
        let first_fulfill = self.state != SenderState::Succeeded;
        self.release_part_if_waiting(part_id);
        self.data.parts.remove(&part_id);

        if matches!(self.state, SenderState::Aborted) {
            return;
        }

        if first_fulfill {
            self.state = SenderState::Succeeded;
            self.listener
                .on_payment_succeeded(self.data.cmd.tag, preimage)
                .await;
        }
        self.maybe_finalize_whole_payment().await;
    }

    async fn on_inflight_snapshot(&mut self, snapshot: InFlightPayments) {
        self.last_inflight = Some(snapshot);
        if matches!(self.state, SenderState::Succeeded) {
            self.maybe_finalize_whole_payment().await;
        }
    }

    async fn maybe_finalize_whole_payment(&mut self) {
        let fully_settled = self
            .last_inflight
            .as_ref()
            .map(|s| s.is_fully_settled())
            .unwrap_or(self.data.parts.is_empty());
        if self.data.parts.is_empty() && fully_settled {
            self.listener.on_whole_payment_succeeded(self.data.cmd.tag).await;
            self.test_event_tx.send(TestEvent::OutgoingPaymentFinalized);
        }
    }

    async fn on_channel_online(
        &mut self,
        chan_id: ChanId,
        sendable: crate::payments::model::SendableChannel,
    ) {
        self.last_sendable.retain(|c| c.chan_id != chan_id);
        self.last_sendable.push(sendable);

        if self.state != SenderState::Pending {
            return;
        }

        let placeholders: Vec<(PartId, u64)> = self
            .data
            .parts
            .iter()
            .filter(|(_, p)| matches!(p.status, PartStatus::WaitForChanOnline))
            .map(|(id, p)| (*id, p.amount_msat))
            .collect();

        for (id, amount) in placeholders {
            self.data.parts.remove(&id);
            if let Err(reason) = self.assign_amount(amount) {
                self.abort(reason).await;
                return;
            }
        }
    }

    /// Decrypt the BOLT 4 failure onion and classify it.
    async fn on_remote_reject(&mut self, part_id: PartId, packet: Vec<u8>) {
        let Some(part) = self.data.parts.get(&part_id) else { return };
        let PartStatus::WaitForRouteOrInFlight { flight: Some(flight) } = &part.status
        else {
            return;
        };
        let route = flight.route.clone();
        let shared_secrets = flight.shared_secrets.clone();

        match self.onion.decrypt_failure(&packet, &shared_secrets, &route) {
            None => {
                self.penalize_random_internal_hop(&route);
                self.resolve_remote_fail(part_id).await;
            }
            Some(decrypted) => {
                self.handle_decrypted_failure(part_id, &route, decrypted).await;
            }
        }
    }

    async fn handle_decrypted_failure(
        &mut self,
        part_id: PartId,
        route: &Route,
        decrypted: crate::payments::model::DecryptedRemoteFailure,
    ) {
        let origin_node = self.node_at(route, decrypted.origin_hop_index);

        match decrypted.class {
            RemoteFailureClass::FinalRecipient | RemoteFailureClass::PaymentTimeout => {
                self.abort(PaymentFailureReason::Remote(
                    crate::payments::model::RemoteFailureOutcome::Readable {
                        packet: decrypted.raw,
                        route: route.clone(),
                    },
                ))
                    .await;
                return;
            }
            RemoteFailureClass::Update(update) => {
                let used_edge = route.hops.get(decrypted.origin_hop_index).map(|h| {
                    ChannelDirection { chan_id: h.chan_id, direction: h.direction }
                });
                match self.path_finder.verify_update(&update) {
                    Some(signer) => {
                        self.path_finder.feed_channel_update(update.clone());
                        let update_edge = ChannelDirection {
                            chan_id: update.chan_id,
                            direction: update.direction,
                        };
                        if update.core.disabled {
                            self.master
                                .notify(SenderToMaster::ChannelNotRoutable(update_edge));
                        } else if used_edge != Some(update_edge) {
                            // The reported update doesn't match the edge we
                            // actually used: penalise both.
                            if let Some(used_edge) = used_edge {
                                self.master
                                    .notify(SenderToMaster::DirectionFailed(used_edge));
                            }
                            self.master.notify(SenderToMaster::DirectionFailed(update_edge));
                        } else {
                            // Same channel, same direction: an imbalance,
                            // not a lie.
                            self.master
                                .notify(SenderToMaster::ChannelFailedAtAmount(update_edge));
                        }
                        let _ = signer;
                    }
                    None => {
                        self.master.notify(SenderToMaster::NodeFailed(
                            origin_node,
                            self.config.max_strange_node_failures * 32,
                        ));
                    }
                }
            }
            RemoteFailureClass::Node => {
                self.master.notify(SenderToMaster::NodeFailed(
                    origin_node,
                    self.config.max_strange_node_failures,
                ));
            }
            RemoteFailureClass::Other => {
                match route.hops.get(decrypted.origin_hop_index) {
                    Some(hop) => {
                        self.master.notify(SenderToMaster::ChannelNotRoutable(
                            ChannelDirection { chan_id: hop.chan_id, direction: hop.direction },
                        ));
                    }
                    None => {
                        self.master.notify(SenderToMaster::NodeFailed(
                            origin_node,
                            self.config.max_strange_node_failures,
                        ));
                    }
                }
            }
        }

        self.resolve_remote_fail(part_id).await;
    }

    fn node_at(&self, route: &Route, hop_index: usize) -> NodePk {
        if hop_index == 0 {
            self.our_node_id
        } else {
            route
                .hops
                .get(hop_index - 1)
                .map(|h| h.next_node)
                .unwrap_or(self.our_node_id)
        }
    }

    /// Punish a uniformly random node strictly between us and the payee,
    /// since an undecryptable failure carries no attributable origin.
    fn penalize_random_internal_hop(&mut self, route: &Route) {
        if route.hops.len() < 2 {
            return;
        }
        let internal: Vec<NodePk> =
            route.hops[..route.hops.len() - 1].iter().map(|h| h.next_node).collect();
        if internal.is_empty() {
            return;
        }
        let idx = (self.rng.next_u32() as usize) % internal.len();
        self.master.notify(SenderToMaster::NodeFailed(
            internal[idx],
            self.config.max_strange_node_failures,
        ));
    }

    /// Retry the part on another sendable channel (respecting
    /// `max_remote_attempts`); if none, subdivide via `CutIntoHalves`, or
    /// fail outright.
    async fn resolve_remote_fail(&mut self, part_id: PartId) {
        let Some(amount_msat) = self.data.parts.get(&part_id).map(|p| p.amount_msat) else {
            return;
        };
        let over_budget = self
            .data
            .parts
            .get_mut(&part_id)
            .map(|p| {
                p.remote_attempts += 1;
                p.remote_attempts > self.config.max_remote_attempts
            })
            .unwrap_or(true);

        if !over_budget && self.reassign_part(part_id, None) {
            return;
        }

        self.data.parts.remove(&part_id);
        if self.outgoing_htlc_slots_left() >= 1 {
            self.cut_into_halves(amount_msat).await;
        } else {
            self.abort(PaymentFailureReason::RunOutOfRetryAttempts).await;
        }
    }

    /// Reassign a waiting or in-flight part to another currently-sendable
    /// channel, excluding its own failure history plus `extra_exclude`.
    fn reassign_part(&mut self, part_id: PartId, extra_exclude: Option<ChanId>) -> bool {
        let Some(part) = self.data.parts.get_mut(&part_id) else { return false };
        if let Some(c) = extra_exclude {
            part.local_failed.insert(c);
        }
        if let Some(old_chan) = part.reserved_chan.take() {
            self.release_reservation(old_chan, part.amount_msat);
        }

        let amount = part.amount_msat;
        let local_failed = part.local_failed.clone();
        let candidate = self
            .last_sendable
            .iter()
            .find(|c| c.is_online && !local_failed.contains(&c.chan_id) && c.sendable_msat >= amount)
            .map(|c| c.chan_id);

        match candidate {
            Some(chan_id) => {
                self.reserve_local(chan_id, amount);
                let part = self.data.parts.get_mut(&part_id).unwrap();
                part.reserved_chan = Some(chan_id);
                part.status = PartStatus::WaitForRouteOrInFlight { flight: None };
                true
            }
            None => false,
        }
    }

    fn release_part_if_waiting(&self, part_id: PartId) {
        if let Some(part) = self.data.parts.get(&part_id) {
            if let Some(chan_id) = part.reserved_chan {
                self.release_reservation(chan_id, part.amount_msat);
            }
        }
    }

    /// Split `amount_msat` in half and reassign each half independently
    /// (so the second half observes the first's reservations).
    async fn cut_into_halves(&mut self, amount_msat: u64) {
        let a = amount_msat / 2;
        let b = amount_msat - a;
        let first = self.assign_amount(a);
        let second = self.assign_amount(b);
        if first.is_err() || second.is_err() {
            self.abort(PaymentFailureReason::RunOutOfCapableChannels).await;
        }
    }

    fn outgoing_htlc_slots_left(&self) -> u32 {
        self.config.max_in_channel_htlcs.saturating_sub(self.data.parts.len() as u32)
    }

    /// Terminal transition; idempotent. Parts already in flight keep
    /// draining via `RemoteFulfill`/`RemoteReject` cleanup even after this
    /// (`ABORTED`/`SUCCEEDED` are absorbing for the state, not for the
    /// parts map).
    async fn abort(&mut self, reason: PaymentFailureReason) {
        if matches!(self.state, SenderState::Aborted | SenderState::Succeeded) {
            return;
        }
        self.state = SenderState::Aborted;
        self.data.failures.insert(
            0,
            PaymentFailure { part_id: None, stamp: self.clock.now(), reason: reason.clone() },
        );
        self.listener
            .on_payment_failed(self.data.cmd.tag, reason.clone().into())
            .await;
        self.master.notify(SenderToMaster::Terminal(reason.into()));
        self.test_event_tx.send(TestEvent::OutgoingPaymentFinalized);
    }
}

trait ShuffleExt<T> {
    fn shuffle(&mut self, items: &mut Vec<T>);
}

impl ShuffleExt<crate::payments::model::SendableChannel> for SmallRng {
    fn shuffle(&mut self, items: &mut Vec<crate::payments::model::SendableChannel>) {
        // Fisher-Yates; `SmallRng` is non-cryptographic but that's fine here,
        // this only needs to break ties between equally-viable channels.
        for i in (1..items.len()).rev() {
            let j = (self.next_u32() as usize) % (i + 1);
            items.swap(i, j);
        }
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryFrom;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use async_trait::async_trait;
    use common::rng::SysRng;
    use common::time::TimestampMillis;

    use super::*;
    use crate::gossip::msg::{Direction, UpdateCore};
    use crate::payments::model::{
        DecryptedRemoteFailure, FailureChannelUpdate, FindRouteResult, PaymentHash,
        PaymentScope, RouteHop, SendableChannel, SharedSecrets,
    };
    use crate::test_event::test_event_channel;

    fn node_pk(byte: u8) -> NodePk {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        NodePk::from(PublicKey::from_secret_key(&secp, &sk))
    }

    fn stamp(ms: u64) -> TimestampMillis {
        TimestampMillis::try_from(UNIX_EPOCH + Duration::from_millis(ms)).unwrap()
    }

    struct FakePathFinder {
        verify: Option<NodePk>,
        fed: AtomicBool,
    }

    impl FakePathFinder {
        fn new(verify: Option<NodePk>) -> Self {
            Self { verify, fed: AtomicBool::new(false) }
        }
    }

    #[async_trait]
    impl PathFinder for FakePathFinder {
        async fn find_route(
            &self,
            _request: crate::payments::model::RouteRequest,
        ) -> FindRouteResult {
            FindRouteResult::NoRouteAvailable
        }

        fn feed_channel_update(&self, _update: FailureChannelUpdate) {
            self.fed.store(true, Ordering::SeqCst);
        }

        fn verify_update(&self, _update: &FailureChannelUpdate) -> Option<NodePk> {
            self.verify
        }
    }

    struct NullOnion;

    impl OnionCodec for NullOnion {
        fn build_onion(
            &self,
            _route: &Route,
            _outer_secret: crate::payments::model::PaymentSecret,
            _total_amount_msat: u64,
        ) -> SharedSecrets {
            SharedSecrets::default()
        }

        fn decrypt_failure(
            &self,
            _encrypted_packet: &[u8],
            _shared_secrets: &SharedSecrets,
            _route: &Route,
        ) -> Option<DecryptedRemoteFailure> {
            None
        }
    }

    struct NullListener;

    #[async_trait]
    impl PaymentListener for NullListener {
        async fn on_payment_succeeded(&self, _tag: FullPaymentTag, _preimage: [u8; 32]) {}
        async fn on_whole_payment_succeeded(&self, _tag: FullPaymentTag) {}
        async fn on_payment_failed(&self, _tag: FullPaymentTag, _error: PaymentError) {}
    }

    struct FixedClock(TimestampMillis);

    impl Clock for FixedClock {
        fn now(&self) -> TimestampMillis {
            self.0
        }
    }

    fn test_tag() -> FullPaymentTag {
        FullPaymentTag {
            payment_hash: PaymentHash([0u8; 32]),
            payment_secret: crate::payments::model::PaymentSecret([0u8; 32]),
            scope: PaymentScope::Local,
        }
    }

    fn sendable_chan(chan_id: u64, peer: NodePk, sendable_msat: u64) -> SendableChannel {
        SendableChannel {
            chan_id: ChanId::from(chan_id),
            peer,
            is_online: true,
            sendable_msat,
            min_sendable_msat: 0,
        }
    }

    fn new_sender(
        path_finder: Arc<FakePathFinder>,
    ) -> (
        OutgoingPaymentSender<FakePathFinder, NullOnion>,
        mpsc::UnboundedReceiver<(FullPaymentTag, SenderToMaster)>,
    ) {
        let tag = test_tag();
        let payee = node_pk(200);
        let cmd = SendMultiPart {
            tag,
            payee,
            my_part_msat: 1_500_000,
            final_cltv_expiry_delta: 40,
            clear_failures: false,
        };
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let notifier = SenderNotifier::new(tag, notify_tx);
        let (test_event_tx, _test_event_rx) = test_event_channel();
        let mut rng = SysRng::new();
        let (sender, _handle) = OutgoingPaymentSender::new(
            cmd,
            PaymentConfig::default(),
            Arc::new(NullOnion),
            path_finder,
            Arc::new(NullListener),
            Arc::new(FixedClock(stamp(0))),
            node_pk(1),
            notifier,
            test_event_tx,
            &mut rng,
        );
        (sender, notify_rx)
    }

    /// Imbalance fallback scenario. Direct-payee
    /// channel is preferred and filled first; the remainder spills onto the
    /// other online channel.
    #[test]
    fn assign_amount_prefers_direct_payee() {
        let (mut sender, _notify_rx) =
            new_sender(Arc::new(FakePathFinder::new(None)));
        let payee = sender.data.cmd.payee;
        sender.last_sendable = vec![
            sendable_chan(1, node_pk(50), 1_000_000),
            sendable_chan(2, payee, 1_000_000),
        ];

        sender.assign_amount(1_500_000).expect("should split across both channels");

        let total: u64 = sender.data.parts.values().map(|p| p.amount_msat).sum();
        assert_eq!(total, 1_500_000);
        assert!(sender.data.parts.values().all(|p| p.amount_msat <= 1_000_000));

        let payee_chan_amount = sender
            .data
            .parts
            .values()
            .find(|p| p.reserved_chan == Some(ChanId::from(2)))
            .map(|p| p.amount_msat);
        assert_eq!(payee_chan_amount, Some(1_000_000));
    }

    /// Cut-into-halves scenario. Splitting
    /// `800_000` msat produces two new `400_000` msat parts.
    #[tokio::test]
    async fn cut_into_halves_splits_evenly() {
        let (mut sender, _notify_rx) =
            new_sender(Arc::new(FakePathFinder::new(None)));
        sender.last_sendable = vec![sendable_chan(1, node_pk(50), 1_000_000)];

        sender.cut_into_halves(800_000).await;

        assert_eq!(sender.data.parts.len(), 2);
        let total: u64 = sender.data.parts.values().map(|p| p.amount_msat).sum();
        assert_eq!(total, 800_000);
        assert!(sender.data.parts.values().all(|p| p.amount_msat == 400_000));
    }

    fn abcd_route() -> Route {
        Route {
            hops: vec![
                RouteHop {
                    chan_id: ChanId::from(100),
                    direction: Direction::Node1ToNode2,
                    next_node: node_pk(10), // A
                    fee_msat: 1,
                    cltv_expiry_delta: 40,
                },
                RouteHop {
                    chan_id: ChanId::from(101),
                    direction: Direction::Node1ToNode2,
                    next_node: node_pk(20), // B
                    fee_msat: 1,
                    cltv_expiry_delta: 40,
                },
                RouteHop {
                    chan_id: ChanId::from(102),
                    direction: Direction::Node1ToNode2,
                    next_node: node_pk(30), // C
                    fee_msat: 1,
                    cltv_expiry_delta: 40,
                },
                RouteHop {
                    chan_id: ChanId::from(103),
                    direction: Direction::Node1ToNode2,
                    next_node: node_pk(200), // D (payee)
                    fee_msat: 1,
                    cltv_expiry_delta: 40,
                },
            ],
            total_amount_msat: 800_000,
            total_cltv_delta: 160,
        }
    }

    fn update_core(disabled: bool) -> UpdateCore {
        UpdateCore {
            cltv_expiry_delta: 40,
            htlc_minimum_msat: 1,
            htlc_maximum_msat: Some(1_000_000),
            fee_base_msat: 1,
            fee_proportional_millionths: 1,
            disabled,
        }
    }

    fn insert_inflight_part(sender: &mut OutgoingPaymentSender<FakePathFinder, NullOnion>, route: &Route) -> PartId {
        let secp = Secp256k1::signing_only();
        let session_key = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let id = PartId(PublicKey::from_secret_key(&secp, &session_key));
        sender.data.parts.insert(
            id,
            Part {
                id,
                session_key,
                amount_msat: 800_000,
                status: PartStatus::WaitForRouteOrInFlight {
                    flight: Some(InFlightHtlc {
                        chan_id: route.hops[0].chan_id,
                        route: route.clone(),
                        shared_secrets: SharedSecrets::default(),
                        amount_msat: 800_000,
                    }),
                },
                remote_attempts: 0,
                local_failed: Default::default(),
                reserved_chan: None,
            },
        );
        id
    }

    /// Remote update failure scenario. A valid,
    /// disabled update on the edge actually used (`C -> D`) feeds the
    /// path-finder and marks that edge not-routable.
    #[tokio::test]
    async fn remote_update_disabled_marks_not_routable() {
        let route = abcd_route();
        let path_finder = Arc::new(FakePathFinder::new(Some(node_pk(30))));
        let (mut sender, mut notify_rx) = new_sender(Arc::clone(&path_finder));
        let part_id = insert_inflight_part(&mut sender, &route);

        let used_edge = ChannelDirection { chan_id: route.hops[3].chan_id, direction: route.hops[3].direction };
        let update = FailureChannelUpdate {
            chan_id: used_edge.chan_id,
            direction: used_edge.direction,
            core: update_core(true),
            signature: Vec::new(),
        };
        let decrypted = DecryptedRemoteFailure {
            origin_hop_index: 3,
            class: RemoteFailureClass::Update(update),
            raw: Vec::new(),
        };

        sender.handle_decrypted_failure(part_id, &route, decrypted).await;

        assert!(path_finder.fed.load(Ordering::SeqCst));
        let mut saw_not_routable = false;
        while let Ok((_, event)) = notify_rx.try_recv() {
            if let SenderToMaster::ChannelNotRoutable(cd) = event {
                assert_eq!(cd, used_edge);
                saw_not_routable = true;
            }
        }
        assert!(saw_not_routable);
    }

    /// Same scenario, but the update is for the edge actually used and not
    /// disabled: that's an imbalance, not a lie, so only `ChannelFailedAtAmount`
    /// is reported.
    #[tokio::test]
    async fn remote_update_matching_edge_marks_capacity_failure() {
        let route = abcd_route();
        let path_finder = Arc::new(FakePathFinder::new(Some(node_pk(30))));
        let (mut sender, mut notify_rx) = new_sender(Arc::clone(&path_finder));
        let part_id = insert_inflight_part(&mut sender, &route);

        let used_edge = ChannelDirection { chan_id: route.hops[3].chan_id, direction: route.hops[3].direction };
        let update = FailureChannelUpdate {
            chan_id: used_edge.chan_id,
            direction: used_edge.direction,
            core: update_core(false),
            signature: Vec::new(),
        };
        let decrypted = DecryptedRemoteFailure {
            origin_hop_index: 3,
            class: RemoteFailureClass::Update(update),
            raw: Vec::new(),
        };

        sender.handle_decrypted_failure(part_id, &route, decrypted).await;

        let mut saw_capacity_failure = false;
        while let Ok((_, event)) = notify_rx.try_recv() {
            if let SenderToMaster::ChannelFailedAtAmount(cd) = event {
                assert_eq!(cd, used_edge);
                saw_capacity_failure = true;
            }
            assert!(!matches!(event, SenderToMaster::ChannelNotRoutable(_)));
        }
        assert!(saw_capacity_failure);
    }

    /// Invalid signature punishment scenario. An
    /// update whose signature doesn't verify punishes the signer directly,
    /// `32 * maxStrangeNodeFailures`.
    #[tokio::test]
    async fn invalid_signature_punishes_node() {
        let route = abcd_route();
        let path_finder = Arc::new(FakePathFinder::new(None));
        let (mut sender, mut notify_rx) = new_sender(Arc::clone(&path_finder));
        let part_id = insert_inflight_part(&mut sender, &route);

        let used_edge = ChannelDirection { chan_id: route.hops[3].chan_id, direction: route.hops[3].direction };
        let update = FailureChannelUpdate {
            chan_id: used_edge.chan_id,
            direction: used_edge.direction,
            core: update_core(false),
            signature: Vec::new(),
        };
        let decrypted = DecryptedRemoteFailure {
            origin_hop_index: 3,
            class: RemoteFailureClass::Update(update),
            raw: Vec::new(),
        };

        sender.handle_decrypted_failure(part_id, &route, decrypted).await;

        assert!(!path_finder.fed.load(Ordering::SeqCst));
        let expected_penalty = sender.config.max_strange_node_failures * 32;
        let mut saw_node_failed = false;
        while let Ok((_, event)) = notify_rx.try_recv() {
            if let SenderToMaster::NodeFailed(node, penalty) = event {
                assert_eq!(node, node_pk(30)); // C, the signer claimed for the edge
                assert_eq!(penalty, expected_penalty);
                saw_node_failed = true;
            }
        }
        assert!(saw_node_failed);
    }
}
