//! `OutgoingPaymentMaster`: owns the local channel registry and the
//! path-finder mutex, and supervises one [`OutgoingPaymentSender`] per
//! in-flight payment tag.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::api::NodePk;
use common::rng::SysRng;
use common::shutdown::ShutdownChannel;
use common::task::LxTask;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::payments::config::PaymentConfig;
use crate::payments::iface::{Channel, Clock, OnionCodec, PathFinder, PaymentListener};
use crate::payments::model::{
    ChanId, ChannelDirection, FindRouteResult, FullPaymentTag, PartId,
    SendMultiPart, SendableChannel, StampedChannelFailed,
};
use crate::payments::sender::{
    OutgoingPaymentSender, SenderHandle, SenderMsg, SenderNotifier,
    SenderToMaster,
};
use crate::test_event::{TestEvent, TestEventSender};

/// A local channel's directory, shared read-only with every running sender
/// so it can submit `CMD_ADD_HTLC` without round-tripping through the
/// master's mailbox.
pub type ChannelDirectory = Arc<HashMap<ChanId, Arc<dyn Channel>>>;

/// The sendable view the master hands a sender: the channel directory plus
/// this round's computed sendable amounts.
#[derive(Clone)]
pub struct SendableView {
    pub channels: ChannelDirectory,
    pub list: Vec<SendableChannel>,
}

/// Messages delivered to the [`OutgoingPaymentMaster`]'s mailbox.
enum MasterMsg {
    SendMultiPart(SendMultiPart),
    RemoveSenderFSM(FullPaymentTag),
    SenderEvent(FullPaymentTag, SenderToMaster),
    RouteResult { tag: FullPaymentTag, part_id: PartId, result: FindRouteResult },
    ChannelOnline(ChanId),
}

/// The path-finder mutex: at most one
/// `RouteRequest` may be outstanding at a time.
enum PathFinderState {
    ExpectingPayments,
    WaitingForRoute { tag: FullPaymentTag, part_id: PartId },
}

/// A cloneable handle used to drive a running [`OutgoingPaymentMaster`].
#[derive(Clone)]
pub struct MasterHandle {
    tx: mpsc::UnboundedSender<MasterMsg>,
}

impl MasterHandle {
    pub fn send_multi_part(&self, cmd: SendMultiPart) {
        let _ = self.tx.send(MasterMsg::SendMultiPart(cmd));
    }

    pub fn remove_sender_fsm(&self, tag: FullPaymentTag) {
        let _ = self.tx.send(MasterMsg::RemoveSenderFSM(tag));
    }

    /// Notify the master that a previously-offline channel is now online,
    /// so `WaitForChanOnline` parts across all senders get a chance to
    /// re-assign.
    pub fn channel_online(&self, chan_id: ChanId) {
        let _ = self.tx.send(MasterMsg::ChannelOnline(chan_id));
    }
}

/// The outgoing multi-part payment supervisor.
pub struct OutgoingPaymentMaster<P, O> {
    config: PaymentConfig,
    channels: ChannelDirectory,
    path_finder: Arc<P>,
    onion: Arc<O>,
    listener: Arc<dyn PaymentListener>,
    clock: Arc<dyn Clock>,
    our_node_id: NodePk,

    path_finder_state: PathFinderState,
    senders: HashMap<FullPaymentTag, SenderHandle>,
    _sender_tasks: Vec<LxTask<()>>,

    /// Amount each sender has earmarked (but not yet had accepted by the
    /// channel) on a given local channel.
    reservations: HashMap<ChanId, u64>,
    node_failed: HashMap<NodePk, u32>,
    direction_failed: HashMap<ChannelDirection, u32>,
    chan_failed_at_amount: HashMap<ChannelDirection, StampedChannelFailed>,
    /// Hard-excluded for the remainder of the current payment attempt, reset
    /// on the next `clear_failures` decay step.
    chan_not_routable: HashSet<ChannelDirection>,

    self_tx: mpsc::UnboundedSender<MasterMsg>,
    rx: mpsc::UnboundedReceiver<MasterMsg>,
    test_event_tx: TestEventSender,
    shutdown: ShutdownChannel,
}

impl<P, O> OutgoingPaymentMaster<P, O>
where
    P: PathFinder,
    O: OnionCodec,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PaymentConfig,
        channels: ChannelDirectory,
        path_finder: Arc<P>,
        onion: Arc<O>,
        listener: Arc<dyn PaymentListener>,
        clock: Arc<dyn Clock>,
        our_node_id: NodePk,
        test_event_tx: TestEventSender,
        shutdown: ShutdownChannel,
    ) -> (Self, MasterHandle) {
        let (self_tx, rx) = mpsc::unbounded_channel();
        let handle = MasterHandle { tx: self_tx.clone() };
        let master = Self {
            config,
            channels,
            path_finder,
            onion,
            listener,
            clock,
            our_node_id,
            path_finder_state: PathFinderState::ExpectingPayments,
            senders: HashMap::new(),
            _sender_tasks: Vec::new(),
            reservations: HashMap::new(),
            node_failed: HashMap::new(),
            direction_failed: HashMap::new(),
            chan_failed_at_amount: HashMap::new(),
            chan_not_routable: HashSet::new(),
            self_tx,
            rx,
            test_event_tx,
            shutdown,
        };
        (master, handle)
    }

    #[instrument(skip_all, name = "(payment-master)")]
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                () = self.shutdown.recv() => {
                    info!("payment master shutting down");
                    break;
                }
                Some(msg) = self.rx.recv() => self.handle_msg(msg).await,
                else => break,
            }
        }
    }

    async fn handle_msg(&mut self, msg: MasterMsg) {
        match msg {
            MasterMsg::SendMultiPart(cmd) => self.on_send_multi_part(cmd).await,
            MasterMsg::RemoveSenderFSM(tag) => {
                self.senders.remove(&tag);
            }
            MasterMsg::SenderEvent(tag, event) =>
                self.on_sender_event(tag, event).await,
            MasterMsg::RouteResult { tag, part_id, result } =>
                self.on_route_result(tag, part_id, result),
            MasterMsg::ChannelOnline(chan_id) => self.on_channel_online(chan_id),
        }
    }

    async fn on_send_multi_part(&mut self, cmd: SendMultiPart) {
        if cmd.clear_failures {
            self.apply_decay();
        }

        let tag = cmd.tag;
        let view = self.sendable_view();

        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
        let notifier = SenderNotifier::new(tag, notify_tx);
        let self_tx = self.self_tx.clone();
        let bridge_task = LxTask::spawn(async move {
            while let Some((tag, event)) = notify_rx.recv().await {
                let _ = self_tx.send(MasterMsg::SenderEvent(tag, event));
            }
        });

        let mut rng = SysRng::new();
        let (sender, handle) = OutgoingPaymentSender::new(
            cmd.clone(),
            self.config.clone(),
            Arc::clone(&self.onion),
            Arc::clone(&self.path_finder),
            Arc::clone(&self.listener),
            Arc::clone(&self.clock),
            self.our_node_id,
            notifier,
            self.test_event_tx.clone(),
            &mut rng,
        );
        handle.send(SenderMsg::Start { cmd, view });

        let run_task = LxTask::spawn(sender.run());
        self._sender_tasks.push(bridge_task);
        self._sender_tasks.push(run_task);
        self.senders.insert(tag, handle);
        self.test_event_tx.send(TestEvent::OutgoingPaymentSplit);
    }

    async fn on_sender_event(&mut self, tag: FullPaymentTag, event: SenderToMaster) {
        match event {
            SenderToMaster::NeedRoute { part_id, payee, amount_msat, final_cltv_expiry_delta } =>
                self.on_need_route(tag, part_id, payee, amount_msat, final_cltv_expiry_delta),
            SenderToMaster::ChannelFailedAtAmount(cd) =>
                self.on_channel_failed_at_amount(cd),
            SenderToMaster::NodeFailed(node, by) => {
                *self.node_failed.entry(node).or_insert(0) += by;
            }
            SenderToMaster::DirectionFailed(cd) => {
                *self.direction_failed.entry(cd).or_insert(0) += 1;
            }
            SenderToMaster::ChannelNotRoutable(cd) => {
                self.chan_not_routable.insert(cd);
            }
            SenderToMaster::ReserveDelta(chan_id, delta) =>
                self.adjust_reservation(chan_id, delta),
            SenderToMaster::Terminal(error) => {
                warn!(?tag, %error, "payment attempt terminated");
            }
        }
    }

    fn on_need_route(
        &mut self,
        tag: FullPaymentTag,
        part_id: PartId,
        payee: NodePk,
        amount_msat: u64,
        final_cltv_expiry_delta: u16,
    ) {
        if !matches!(self.path_finder_state, PathFinderState::ExpectingPayments) {
            // A second concurrent RouteRequest is dropped outright: at most
            // one route request is ever outstanding, and the sender will ask
            // again on the next `AskForRoute` broadcast.
            return;
        }

        let request = self.build_route_request(
            tag,
            part_id,
            payee,
            amount_msat,
            final_cltv_expiry_delta,
        );
        self.path_finder_state =
            PathFinderState::WaitingForRoute { tag, part_id };

        let path_finder = Arc::clone(&self.path_finder);
        let self_tx = self.self_tx.clone();
        LxTask::spawn(async move {
            let result = path_finder.find_route(request).await;
            let _ = self_tx.send(MasterMsg::RouteResult { tag, part_id, result });
        });
    }

    fn on_route_result(
        &mut self,
        tag: FullPaymentTag,
        part_id: PartId,
        result: FindRouteResult,
    ) {
        self.path_finder_state = PathFinderState::ExpectingPayments;

        if let Some(handle) = self.senders.get(&tag) {
            let msg = match result {
                FindRouteResult::RouteFound(route) =>
                    SenderMsg::RouteFound(part_id, route),
                FindRouteResult::NoRouteAvailable =>
                    SenderMsg::NoRouteAvailable(part_id),
            };
            handle.send(msg);
        }

        self.broadcast_ask_for_route();
    }

    fn on_channel_online(&mut self, chan_id: ChanId) {
        let Some(chan) = self.channels.get(&chan_id) else { return };
        let sendable = self.sendable_channel(chan.as_ref());
        for handle in self.senders.values() {
            handle.send(SenderMsg::ChannelOnline(chan_id, sendable));
        }
    }

    fn on_channel_failed_at_amount(&mut self, cd: ChannelDirection) {
        let current_used = self.reservations.get(&cd.chan_id).copied().unwrap_or(0);
        let now = self.clock.now();
        self.chan_failed_at_amount
            .entry(cd)
            .and_modify(|f| {
                f.amount_msat = f.amount_msat.min(current_used);
                f.stamp = now;
            })
            .or_insert(StampedChannelFailed { amount_msat: current_used, stamp: now });
        *self.direction_failed.entry(cd).or_insert(0) += 1;
    }

    fn adjust_reservation(&mut self, chan_id: ChanId, delta: i64) {
        let entry = self.reservations.entry(chan_id).or_insert(0);
        if delta >= 0 {
            *entry = entry.saturating_add(delta as u64);
        } else {
            *entry = entry.saturating_sub((-delta) as u64);
        }
    }

    /// Broadcast `CMDAskForRoute` to every sender once the path-finder mutex
    /// is free again.
    fn broadcast_ask_for_route(&self) {
        if !matches!(self.path_finder_state, PathFinderState::ExpectingPayments) {
            return;
        }
        let view = self.sendable_view();
        for handle in self.senders.values() {
            handle.send(SenderMsg::AskForRoute(view.clone()));
        }
    }

    fn sendable_channel(&self, chan: &dyn Channel) -> SendableChannel {
        let avail = chan.available_for_send_msat();
        let fee = chan.max_fee_msat(avail);
        let reserved = self.reservations.get(&chan.chan_id()).copied().unwrap_or(0);
        let sendable_msat = avail.saturating_sub(fee).saturating_sub(reserved);
        SendableChannel {
            chan_id: chan.chan_id(),
            peer: chan.peer(),
            is_online: chan.is_online(),
            sendable_msat,
            min_sendable_msat: chan.min_sendable_msat(),
        }
    }

    /// Sendable computation: per candidate channel, its own
    /// `available_for_send_msat` less the estimated fee and less whatever
    /// every sender has earmarked (but not yet had accepted), with channels
    /// below `min_sendable_msat` dropped entirely.
    fn compute_sendable(&self) -> Vec<SendableChannel> {
        self.channels
            .values()
            .map(|chan| self.sendable_channel(chan.as_ref()))
            .filter(|c| c.sendable_msat >= c.min_sendable_msat)
            .collect()
    }

    fn sendable_view(&self) -> SendableView {
        SendableView { channels: Arc::clone(&self.channels), list: self.compute_sendable() }
    }

    /// Route request building: collect every channel, direction, and
    /// node the path-finder must avoid, given the master's current failure
    /// statistics.
    fn build_route_request(
        &self,
        tag: FullPaymentTag,
        part_id: PartId,
        payee: NodePk,
        amount_msat: u64,
        final_cltv_expiry_delta: u16,
    ) -> crate::payments::model::RouteRequest {
        let mut exclude_channels = HashSet::new();
        let mut exclude_directions = HashSet::new();
        let exclude_nodes: HashSet<NodePk> = self
            .node_failed
            .iter()
            .filter(|(_, count)| **count >= self.config.max_strange_node_failures)
            .map(|(node, _)| *node)
            .collect();

        for (chan_id, chan) in self.channels.iter() {
            let capacity = chan.capacity_msat();
            let in_flight = self.reservations.get(chan_id).copied().unwrap_or(0);
            let margin = capacity.saturating_sub(amount_msat / 32);
            if in_flight.saturating_add(amount_msat) >= margin {
                exclude_channels.insert(*chan_id);
            }
        }

        for (cd, count) in self.direction_failed.iter() {
            if *count >= self.config.max_direction_failures {
                exclude_directions.insert(*cd);
            }
        }

        for (cd, failed) in self.chan_failed_at_amount.iter() {
            let current_used = self.reservations.get(&cd.chan_id).copied().unwrap_or(0);
            let margin = failed
                .amount_msat
                .saturating_sub(current_used)
                .saturating_sub(amount_msat / 8);
            if margin <= amount_msat {
                exclude_directions.insert(*cd);
            }
        }

        for cd in self.chan_not_routable.iter() {
            exclude_directions.insert(*cd);
        }

        crate::payments::model::RouteRequest {
            tag,
            part_id,
            payee,
            amount_msat,
            final_cltv_expiry_delta,
            exclude_channels,
            exclude_directions,
            exclude_nodes,
        }
    }

    /// `withFailuresReduced`: halve every failure counter, relax capacity
    /// ceilings back toward full capacity exponentially, and clear the
    /// hard-excluded set.
    fn apply_decay(&mut self) {
        for count in self.node_failed.values_mut() {
            *count /= 2;
        }
        for count in self.direction_failed.values_mut() {
            *count /= 2;
        }

        let capacities: HashMap<ChanId, u64> = self
            .channels
            .iter()
            .map(|(id, chan)| (*id, chan.capacity_msat()))
            .collect();
        let now = self.clock.now();
        let recovery_ms =
            (self.config.failed_chan_recovery.as_millis() as i64).max(1);

        self.chan_failed_at_amount.retain(|cd, failed| {
            let Some(capacity) = capacities.get(&cd.chan_id) else { return true };
            let elapsed_ms = (now.as_i64() - failed.stamp.as_i64()).max(0);
            let ratio = (elapsed_ms as f64 / recovery_ms as f64).min(1.0);
            let recovered = failed.amount_msat as f64
                + (*capacity as f64 - failed.amount_msat as f64) * ratio;
            if recovered >= *capacity as f64 {
                false
            } else {
                failed.amount_msat = recovered as u64;
                failed.stamp = now;
                true
            }
        });

        self.chan_not_routable.clear();
    }
}

#[cfg(test)]
mod test {
    use std::convert::TryFrom;
    use std::time::{Duration as StdDuration, UNIX_EPOCH};

    use async_trait::async_trait;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use common::time::TimestampMillis;

    use super::*;
    use crate::payments::error::PaymentError;
    use crate::payments::iface::{AddHtlc, ChannelHandle, LocalChannel};
    use crate::payments::model::{
        DecryptedRemoteFailure, FindRouteResult, PaymentSecret, Route,
        RouteRequest, SharedSecrets,
    };
    use crate::test_event::test_event_channel;

    fn node_pk(byte: u8) -> NodePk {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        NodePk::from(PublicKey::from_secret_key(&secp, &sk))
    }

    fn stamp(ms: u64) -> TimestampMillis {
        TimestampMillis::try_from(UNIX_EPOCH + StdDuration::from_millis(ms)).unwrap()
    }

    struct FakePathFinder;

    #[async_trait]
    impl PathFinder for FakePathFinder {
        async fn find_route(&self, _request: RouteRequest) -> FindRouteResult {
            FindRouteResult::NoRouteAvailable
        }
        fn feed_channel_update(&self, _update: crate::payments::model::FailureChannelUpdate) {}
        fn verify_update(
            &self,
            _update: &crate::payments::model::FailureChannelUpdate,
        ) -> Option<NodePk> {
            None
        }
    }

    struct NullOnion;

    impl OnionCodec for NullOnion {
        fn build_onion(
            &self,
            _route: &Route,
            _outer_secret: PaymentSecret,
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

    struct FakeChannel {
        chan_id: ChanId,
        peer: NodePk,
        capacity_msat: u64,
    }

    impl LocalChannel for FakeChannel {
        fn chan_id(&self) -> ChanId {
            self.chan_id
        }
        fn peer(&self) -> NodePk {
            self.peer
        }
        fn is_online(&self) -> bool {
            true
        }
        fn capacity_msat(&self) -> u64 {
            self.capacity_msat
        }
        fn available_for_send_msat(&self) -> u64 {
            self.capacity_msat
        }
        fn min_sendable_msat(&self) -> u64 {
            0
        }
        fn max_fee_msat(&self, _amount_msat: u64) -> u64 {
            0
        }
    }

    #[async_trait]
    impl ChannelHandle for FakeChannel {
        async fn add_htlc(&self, _cmd: AddHtlc) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn new_master(
        channels: Vec<FakeChannel>,
        clock: FixedClock,
    ) -> OutgoingPaymentMaster<FakePathFinder, NullOnion> {
        let directory: HashMap<ChanId, Arc<dyn Channel>> = channels
            .into_iter()
            .map(|c| (c.chan_id, Arc::new(c) as Arc<dyn Channel>))
            .collect();
        let (test_event_tx, _test_event_rx) = test_event_channel();
        let (master, _handle) = OutgoingPaymentMaster::new(
            PaymentConfig::default(),
            Arc::new(directory),
            Arc::new(FakePathFinder),
            Arc::new(NullOnion),
            Arc::new(NullListener),
            Arc::new(clock),
            node_pk(1),
            test_event_tx,
            ShutdownChannel::new(),
        );
        master
    }

    fn direction(chan_id: u64) -> ChannelDirection {
        ChannelDirection {
            chan_id: ChanId::from(chan_id),
            direction: crate::gossip::msg::Direction::Node1ToNode2,
        }
    }

    /// Capacity recovery scenario: a channel's recorded `chanFailedAtAmount`
    /// relaxes linearly back toward capacity over `failed_chan_recovery`.
    /// Half the recovery window elapsed should recover half the gap.
    #[test]
    fn apply_decay_partially_recovers_channel_capacity() {
        let mut config = PaymentConfig::default();
        config.failed_chan_recovery = StdDuration::from_millis(100_000);
        let channels =
            vec![FakeChannel { chan_id: ChanId::from(1), peer: node_pk(50), capacity_msat: 1_000 }];
        let mut master = new_master(channels, FixedClock(stamp(50_000)));
        master.config = config;
        master.chan_failed_at_amount.insert(
            direction(1),
            StampedChannelFailed { amount_msat: 100, stamp: stamp(0) },
        );

        master.apply_decay();

        let failed = master.chan_failed_at_amount.get(&direction(1)).expect("not yet fully recovered");
        assert_eq!(failed.amount_msat, 550);
    }

    #[test]
    fn apply_decay_drops_entry_once_fully_recovered() {
        let mut config = PaymentConfig::default();
        config.failed_chan_recovery = StdDuration::from_millis(100_000);
        let channels =
            vec![FakeChannel { chan_id: ChanId::from(1), peer: node_pk(50), capacity_msat: 1_000 }];
        let mut master = new_master(channels, FixedClock(stamp(300_000)));
        master.config = config;
        master.chan_failed_at_amount.insert(
            direction(1),
            StampedChannelFailed { amount_msat: 100, stamp: stamp(0) },
        );

        master.apply_decay();

        assert!(master.chan_failed_at_amount.get(&direction(1)).is_none());
    }

    #[test]
    fn apply_decay_halves_failure_counters_and_clears_not_routable() {
        let mut master = new_master(Vec::new(), FixedClock(stamp(0)));
        master.node_failed.insert(node_pk(2), 5);
        master.direction_failed.insert(direction(1), 5);
        master.chan_not_routable.insert(direction(2));

        master.apply_decay();

        assert_eq!(master.node_failed[&node_pk(2)], 2);
        assert_eq!(master.direction_failed[&direction(1)], 2);
        assert!(master.chan_not_routable.is_empty());
    }

    /// A channel whose in-flight reservations plus the new amount would
    /// leave less than a 1/32 margin against capacity is excluded outright.
    #[test]
    fn build_route_request_excludes_channel_near_capacity_margin() {
        let channels = vec![
            FakeChannel { chan_id: ChanId::from(1), peer: node_pk(10), capacity_msat: 1_000_000 },
            FakeChannel { chan_id: ChanId::from(2), peer: node_pk(20), capacity_msat: 1_000_000 },
        ];
        let mut master = new_master(channels, FixedClock(stamp(0)));
        master.reservations.insert(ChanId::from(1), 100_000);

        let req = master.build_route_request(
            test_tag(),
            PartId(node_pk(99).0),
            node_pk(30),
            900_000,
            40,
        );

        assert!(req.exclude_channels.contains(&ChanId::from(1)));
        assert!(!req.exclude_channels.contains(&ChanId::from(2)));
    }

    #[test]
    fn build_route_request_excludes_direction_over_failure_threshold() {
        let mut master = new_master(Vec::new(), FixedClock(stamp(0)));
        master.direction_failed.insert(direction(1), master.config.max_direction_failures);

        let req = master.build_route_request(test_tag(), PartId(node_pk(99).0), node_pk(30), 1_000, 40);

        assert!(req.exclude_directions.contains(&direction(1)));
    }

    #[test]
    fn build_route_request_excludes_direction_within_chan_failed_margin() {
        let mut master = new_master(Vec::new(), FixedClock(stamp(0)));
        master.chan_failed_at_amount.insert(
            direction(1),
            StampedChannelFailed { amount_msat: 1_000_000, stamp: stamp(0) },
        );

        let req = master.build_route_request(test_tag(), PartId(node_pk(99).0), node_pk(30), 950_000, 40);

        assert!(req.exclude_directions.contains(&direction(1)));
    }

    #[test]
    fn build_route_request_excludes_node_over_strange_failure_threshold() {
        let mut master = new_master(Vec::new(), FixedClock(stamp(0)));
        master.node_failed.insert(node_pk(7), master.config.max_strange_node_failures);

        let req = master.build_route_request(test_tag(), PartId(node_pk(99).0), node_pk(30), 1_000, 40);

        assert!(req.exclude_nodes.contains(&node_pk(7)));
    }

    #[test]
    fn build_route_request_hard_excludes_chan_not_routable() {
        let mut master = new_master(Vec::new(), FixedClock(stamp(0)));
        master.chan_not_routable.insert(direction(3));

        let req = master.build_route_request(test_tag(), PartId(node_pk(99).0), node_pk(30), 1_000, 40);

        assert!(req.exclude_directions.contains(&direction(3)));
    }

    fn test_tag() -> FullPaymentTag {
        FullPaymentTag {
            payment_hash: crate::payments::model::PaymentHash([0u8; 32]),
            payment_secret: PaymentSecret([0u8; 32]),
            scope: crate::payments::model::PaymentScope::Local,
        }
    }
}
