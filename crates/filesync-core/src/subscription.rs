//! Resilient streaming subscription for remote change batches
//!
//! [`SubscriptionClient::subscribe`] spawns a task that owns one logical
//! subscription. The transport-level subscription underneath may be torn
//! down and recreated any number of times; consumers only see an ordered
//! stream of [`SubscriptionMessage`]s on a bounded channel.
//!
//! ```text
//!   Disconnected --subscribe ok--> Connected --retryable error--> Disconnected
//!
//!   Disconnected --timer fires--> Reconnecting --subscribe ok--> Connected
//!                                      |
//!                                      +--retryable error--> Disconnected
//!
//!   fatal error / budget exhausted / completion / unsubscribe --> Unsubscribed
//! ```
//!
//! Retry budget: a retry timer is armed for the first retryable error; any
//! further retryable errors while it is pending are reported but do not
//! consume an attempt. A delivered batch resets the budget.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tracing::{debug, error, info, warn};

use crate::remote::RemoteChangeBatch;

const MESSAGE_BUFFER: usize = 32;

/// Variables sent with every (re)subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionVariables {
    #[serde(with = "crate::remote::version_string")]
    pub local_files_version: u64,
}

/// Computes fresh variables right before each subscribe.
pub type VariablesProvider = Arc<dyn Fn() -> SubscriptionVariables + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    Closed,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    /// A response with neither data nor errors
    #[error("Subscription response carried no data")]
    MissingData,

    #[error("Gave up after {attempts} reconnect attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<SubscriptionError>,
    },
}

impl SubscriptionError {
    /// Network-level failures are retried; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed)
    }
}

/// What a transport-level subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A response; `None` when it carried no payload
    Next(Option<RemoteChangeBatch>),
    Error(SubscriptionError),
    /// The server ended the subscription
    Complete,
}

/// Streaming transport (GraphQL over WebSocket in production).
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    /// Start a transport-level subscription. The stream ending without
    /// [`TransportEvent::Complete`] means the connection dropped.
    async fn subscribe(
        &self,
        variables: SubscriptionVariables,
    ) -> Result<mpsc::Receiver<TransportEvent>, SubscriptionError>;

    /// Side request that keeps an idle connection open.
    async fn keep_alive(&self) -> Result<(), SubscriptionError>;
}

/// What the subscription task reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    Batch(RemoteChangeBatch),
    /// A retryable failure; a reconnect is scheduled or already pending
    Transient(SubscriptionError),
    /// The subscription is over and will not reconnect
    Fatal(SubscriptionError),
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    Unsubscribed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Reconnect attempts allowed between two delivered batches
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub keep_alive_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[derive(Debug)]
enum Command {
    Unsubscribe,
    Resubscribe(Option<SubscriptionVariables>),
}

/// Control side of a running subscription. Dropping every clone
/// unsubscribes.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(&self) {
        let _ = self.commands.send(Command::Unsubscribe);
    }

    /// Drop the current transport subscription and start a new one, with
    /// `variables` or freshly computed ones.
    pub fn resubscribe(&self, variables: Option<SubscriptionVariables>) {
        let _ = self.commands.send(Command::Resubscribe(variables));
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the subscription task has stopped.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Unsubscribed)
            .await;
    }
}

pub struct SubscriptionClient;

impl SubscriptionClient {
    /// Start the subscription task on the current runtime.
    pub fn subscribe(
        transport: Arc<dyn SubscriptionTransport>,
        variables: VariablesProvider,
        policy: RetryPolicy,
    ) -> (SubscriptionHandle, mpsc::Receiver<SubscriptionMessage>) {
        let (output, messages) = mpsc::channel(MESSAGE_BUFFER);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(ConnectionState::Disconnected);

        let worker = Worker {
            transport,
            variables,
            backoff: policy.backoff(),
            policy,
            output,
            commands,
            state,
            stream: None,
            retry_timer: None,
            keep_alive: None,
            attempts: 0,
            override_variables: None,
        };
        tokio::spawn(worker.run());

        (
            SubscriptionHandle {
                commands: commands_tx,
                state: state_rx,
            },
            messages,
        )
    }
}

struct Worker {
    transport: Arc<dyn SubscriptionTransport>,
    variables: VariablesProvider,
    policy: RetryPolicy,
    backoff: ExponentialBackoff,
    output: mpsc::Sender<SubscriptionMessage>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    stream: Option<mpsc::Receiver<TransportEvent>>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    keep_alive: Option<Interval>,
    attempts: u32,
    override_variables: Option<SubscriptionVariables>,
}

impl Worker {
    async fn run(mut self) {
        self.connect().await;

        while !self.is_unsubscribed() {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Resubscribe(variables)) => {
                        info!("resubscribing");
                        self.override_variables = variables;
                        self.retry_timer = None;
                        self.set_state(ConnectionState::Reconnecting);
                        self.connect().await;
                    }
                    Some(Command::Unsubscribe) | None => {
                        debug!("unsubscribed");
                        self.teardown();
                    }
                },
                event = next_event(&mut self.stream) => self.on_event(event).await,
                () = fire(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.set_state(ConnectionState::Reconnecting);
                    self.connect().await;
                }
                () = tick(&mut self.keep_alive) => {
                    if let Err(e) = self.transport.keep_alive().await {
                        debug!(error = %e, "keep-alive failed");
                        self.on_error(e).await;
                    }
                }
            }
        }
    }

    async fn connect(&mut self) {
        self.stream = None;
        self.keep_alive = None;

        let variables = self
            .override_variables
            .take()
            .unwrap_or_else(|| (self.variables)());
        debug!(version = variables.local_files_version, attempt = self.attempts, "subscribing");

        match self.transport.subscribe(variables).await {
            Ok(stream) => {
                self.stream = Some(stream);
                let period = self.policy.keep_alive_interval;
                let mut keep_alive = interval_at(Instant::now() + period, period);
                keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.keep_alive = Some(keep_alive);
                self.set_state(ConnectionState::Connected);
            }
            Err(e) => self.on_error(e).await,
        }
    }

    async fn on_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Next(Some(batch))) => {
                self.attempts = 0;
                self.backoff.reset();
                self.emit(SubscriptionMessage::Batch(batch)).await;
            }
            Some(TransportEvent::Next(None)) => self.on_error(SubscriptionError::MissingData).await,
            Some(TransportEvent::Error(e)) => self.on_error(e).await,
            Some(TransportEvent::Complete) => {
                info!("subscription completed by server");
                self.teardown();
                self.emit(SubscriptionMessage::Completed).await;
            }
            None => {
                self.stream = None;
                self.on_error(SubscriptionError::Closed).await;
            }
        }
    }

    async fn on_error(&mut self, error: SubscriptionError) {
        if !error.is_retryable() {
            return self.fail(error).await;
        }

        self.keep_alive = None;
        warn!(error = %error, attempts = self.attempts, "subscription interrupted");

        if self.retry_timer.is_some() {
            debug!("reconnect already scheduled");
            return self.emit(SubscriptionMessage::Transient(error)).await;
        }
        if self.attempts >= self.policy.max_attempts {
            self.emit(SubscriptionMessage::Transient(error.clone())).await;
            if self.is_unsubscribed() {
                return;
            }
            let attempts = self.attempts;
            return self
                .fail(SubscriptionError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                })
                .await;
        }

        self.attempts += 1;
        let delay = self.backoff.next_backoff().unwrap_or(self.policy.max_delay);
        debug!(attempt = self.attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.retry_timer = Some(Box::pin(sleep(delay)));
        self.set_state(ConnectionState::Disconnected);
        self.emit(SubscriptionMessage::Transient(error)).await;
    }

    async fn fail(&mut self, error: SubscriptionError) {
        error!(error = %error, "subscription failed");
        self.teardown();
        let _ = self.output.send(SubscriptionMessage::Fatal(error)).await;
    }

    async fn emit(&mut self, message: SubscriptionMessage) {
        if self.output.send(message).await.is_err() {
            debug!("subscription consumer went away");
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        self.stream = None;
        self.keep_alive = None;
        self.retry_timer = None;
        self.set_state(ConnectionState::Unsubscribed);
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn is_unsubscribed(&self) -> bool {
        *self.state.borrow() == ConnectionState::Unsubscribed
    }
}

async fn next_event(stream: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match stream {
        Some(stream) => stream.recv().await,
        None => pending().await,
    }
}

pub(crate) async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn tick(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(keep_alive) => {
            keep_alive.tick().await;
        }
        None => pending().await,
    }
}
