//! [`FakeTransport`]: a subscription transport the test drives by hand.
//!
//! Each successful `subscribe` opens a fresh stream; the test pushes events
//! into the newest one with [`FakeTransport::send`] and drops it with
//! [`FakeTransport::disconnect`].

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use filesync_core::{
    RemoteChangeBatch, SubscriptionError, SubscriptionTransport, SubscriptionVariables,
    TransportEvent,
};
use tokio::sync::{Notify, mpsc};

const STREAM_BUFFER: usize = 16;

#[derive(Debug, Default)]
struct TransportState {
    subscriptions: Vec<SubscriptionVariables>,
    stream: Option<mpsc::Sender<TransportEvent>>,
    subscribe_failures: VecDeque<SubscriptionError>,
    keep_alive_failures: VecDeque<SubscriptionError>,
    keep_alives: usize,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    state: Mutex<TransportState>,
    subscribed: Notify,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables of every subscribe call so far, including failed ones.
    pub fn subscriptions(&self) -> Vec<SubscriptionVariables> {
        self.lock().subscriptions.clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    pub fn keep_alive_count(&self) -> usize {
        self.lock().keep_alives
    }

    /// Reject upcoming subscribe calls, one per call.
    pub fn fail_next_subscribe(&self, error: SubscriptionError) {
        self.lock().subscribe_failures.push_back(error);
    }

    pub fn fail_next_keep_alive(&self, error: SubscriptionError) {
        self.lock().keep_alive_failures.push_back(error);
    }

    /// Push an event into the newest stream. Returns false when no stream
    /// is open or its reader is gone.
    pub async fn send(&self, event: TransportEvent) -> bool {
        let stream = self.lock().stream.clone();
        match stream {
            Some(stream) => stream.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Deliver a batch on the newest stream.
    pub async fn send_batch(&self, batch: RemoteChangeBatch) -> bool {
        self.send(TransportEvent::Next(Some(batch))).await
    }

    /// End the newest stream without a completion, like a dropped socket.
    pub fn disconnect(&self) {
        self.lock().stream = None;
    }

    /// Whether the client still reads the newest stream.
    pub fn is_streaming(&self) -> bool {
        self.lock()
            .stream
            .as_ref()
            .is_some_and(|stream| !stream.is_closed())
    }

    /// Wait until at least `count` subscribe calls have been made.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        loop {
            let notified = self.subscribed.notified();
            if self.subscribe_count() >= count {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl SubscriptionTransport for FakeTransport {
    async fn subscribe(
        &self,
        variables: SubscriptionVariables,
    ) -> Result<mpsc::Receiver<TransportEvent>, SubscriptionError> {
        let result = {
            let mut state = self.lock();
            state.subscriptions.push(variables);
            match state.subscribe_failures.pop_front() {
                Some(error) => {
                    state.stream = None;
                    Err(error)
                }
                None => {
                    let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
                    state.stream = Some(sender);
                    Ok(receiver)
                }
            }
        };
        self.subscribed.notify_waiters();
        result
    }

    async fn keep_alive(&self) -> Result<(), SubscriptionError> {
        let mut state = self.lock();
        state.keep_alives += 1;
        match state.keep_alive_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
