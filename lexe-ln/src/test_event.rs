//! Plumbing around [`common::test_event::TestEvent`] so integration tests can
//! await specific events instead of sleeping.

use std::collections::HashMap;
use std::mem::{self, Discriminant};
use std::time::Duration;

use cfg_if::cfg_if;
pub use common::test_event::TestEvent;
use tokio::sync::mpsc;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const TEST_EVENT_CHANNEL_SIZE: usize = 16;

/// Creates a [`TestEvent`] channel, returning a `(tx, rx)` tuple.
pub fn test_event_channel() -> (TestEventSender, TestEventReceiver) {
    let (tx, rx) = mpsc::channel(TEST_EVENT_CHANNEL_SIZE);
    let sender = TestEventSender::new(tx);
    let receiver = TestEventReceiver::new(rx);
    (sender, receiver)
}

/// Wraps an `mpsc::Sender<TestEvent>` to allow actually sending the event to
/// be cfg'd out in prod.
#[derive(Clone)]
pub struct TestEventSender {
    #[cfg(any(test, not(target_env = "sgx")))]
    tx: mpsc::Sender<TestEvent>,
}

impl TestEventSender {
    fn new(tx: mpsc::Sender<TestEvent>) -> Self {
        cfg_if! {
            if #[cfg(any(test, not(target_env = "sgx")))] {
                Self { tx }
            } else {
                let _ = tx;
                Self {}
            }
        }
    }

    pub fn send(&self, event: TestEvent) {
        cfg_if! {
            if #[cfg(any(test, not(target_env = "sgx")))] {
                self.tx.try_send(event).expect("Channel was full")
            } else {
                let _ = event;
            }
        }
    }
}

/// Wraps an `mpsc::Receiver<TestEvent>` to provide convenience helpers for
/// waiting for certain events to occur.
pub struct TestEventReceiver {
    rx: mpsc::Receiver<TestEvent>,
}

impl TestEventReceiver {
    fn new(rx: mpsc::Receiver<TestEvent>) -> Self {
        Self { rx }
    }

    /// Clears the channel of all pending messages.
    pub fn clear(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub async fn wait(&mut self, event: TestEvent) -> Result<(), &'static str> {
        self.wait_timeout(event, DEFAULT_TIMEOUT).await
    }

    pub async fn wait_n(
        &mut self,
        event: TestEvent,
        n: usize,
    ) -> Result<(), &'static str> {
        self.wait_n_timeout(event, n, DEFAULT_TIMEOUT).await
    }

    pub async fn wait_all(
        &mut self,
        all_events: Vec<TestEvent>,
    ) -> Result<(), &'static str> {
        self.wait_all_timeout(all_events, DEFAULT_TIMEOUT).await
    }

    pub async fn wait_timeout(
        &mut self,
        event: TestEvent,
        timeout: Duration,
    ) -> Result<(), &'static str> {
        tokio::select! {
            () = self.wait_all_n_inner(vec![(event, 1)]) => Ok(()),
            () = tokio::time::sleep(timeout) => Err("Timed out"),
        }
    }

    pub async fn wait_n_timeout(
        &mut self,
        event: TestEvent,
        n: usize,
        timeout: Duration,
    ) -> Result<(), &'static str> {
        tokio::select! {
            () = self.wait_all_n_inner(vec![(event, n)]) => Ok(()),
            () = tokio::time::sleep(timeout) => Err("Timed out"),
        }
    }

    pub async fn wait_all_timeout(
        &mut self,
        all_events: Vec<TestEvent>,
        timeout: Duration,
    ) -> Result<(), &'static str> {
        let all_n_events =
            all_events.into_iter().map(|e| (e, 1)).collect::<Vec<_>>();
        tokio::select! {
            () = self.wait_all_n_inner(all_n_events) => Ok(()),
            () = tokio::time::sleep(timeout) => Err("Timed out"),
        }
    }

    pub async fn wait_all_n_timeout(
        &mut self,
        all_n_events: Vec<(TestEvent, usize)>,
        timeout: Duration,
    ) -> Result<(), &'static str> {
        tokio::select! {
            () = self.wait_all_n_inner(all_n_events) => Ok(()),
            () = tokio::time::sleep(timeout) => Err("Timed out"),
        }
    }

    async fn wait_all_n_inner(&mut self, all_n_events: Vec<(TestEvent, usize)>) {
        struct Quota {
            seen: usize,
            needed: usize,
        }

        let mut quotas = HashMap::<Discriminant<TestEvent>, Quota>::new();
        for (event, needed) in all_n_events {
            let k = mem::discriminant(&event);
            quotas.insert(k, Quota { seen: 0, needed });
        }

        if quotas.values().all(|q| q.seen >= q.needed) {
            return;
        }

        while let Some(recvd) = self.rx.recv().await {
            debug!("Received test event: {recvd:?}");
            let discriminant = mem::discriminant(&recvd);
            if let Some(quota) = quotas.get_mut(&discriminant) {
                quota.seen += 1;
            }
            if quotas.values().all(|q| q.seen >= q.needed) {
                return;
            }
        }

        panic!("Sender dropped");
    }
}

#[cfg(test)]
mod test {
    use tokio_test::{assert_pending, assert_ready};

    use super::*;

    #[tokio::test]
    async fn pending_before_ready_after() {
        let event1 = TestEvent::GossipWorkerReplyProcessed;
        let event2 = TestEvent::GossipRoundAccepted;

        let (tx, mut rx) = test_event_channel();
        let mut task =
            tokio_test::task::spawn(rx.wait_all_n_inner(vec![(event1, 1)]));
        assert_pending!(task.poll());
        tx.send(event1);
        assert_ready!(task.poll());

        let (tx, mut rx) = test_event_channel();
        let mut task = tokio_test::task::spawn(
            rx.wait_all_n_inner(vec![(event1, 2), (event2, 1)]),
        );
        assert_pending!(task.poll());
        tx.send(event1);
        tx.send(event1);
        tx.send(event2);
        assert_ready!(task.poll());
    }
}
