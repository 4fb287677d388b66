//! The agent: owns the registries and drives the poll loop.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped ──start()──▶ Connecting ──connect ok──▶ Running ──▶ Stopping ──disconnect──▶ Stopped
//!                           │                        ▲  │
//!                           └─ connect failed ─▶ Stopped └─ one poll cycle per interval
//! ```
//!
//! Each cycle in `Running`:
//! 1. wait for the next interval tick (or a stop request)
//! 2. `pre_poll_messages` → fetch messages → `post_poll_messages`
//! 3. dispatch messages (wrapped by the dispatch hooks)
//! 4. `pre_handle_transactions` → fetch transactions → process → `post_handle_transactions`
//! 5. `pre_poll_responses` → fetch responses → `post_poll_responses` → deliver responses
//!
//! A hook returning false ends the loop with [`LoopOutcome::Aborted`]; the
//! dispatcher or transaction processor returning false ends it with
//! [`LoopOutcome::Halted`]. Errors end it and are returned from `start()`.
//! The broker session is disconnected on every exit once connected.

mod poll_loop;

pub use poll_loop::{InterruptFuture, InterruptSignal};

use crate::config::PollConfig;
use crate::dispatch::ResponseRouter;
use crate::hooks::{HookPoint, HookRegistry};
use crate::message::{decode_string, Payload};
use crate::subscription::{HandlerSlot, SharedHandler, SharedTransactionHandler, SubscriptionRegistry};
use crate::transport::{endpoints, Session, Transport};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Lifecycle state of the poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Stopped,
    Connecting,
    Running,
    Stopping,
}

/// Phase whose component asked the loop to halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Messages,
    Transactions,
}

/// Why the poll loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// A stop request was observed at the top of a cycle.
    Stopped,
    /// A hook returned false at this point.
    Aborted(HookPoint),
    /// The dispatcher or the transaction processor returned false.
    Halted(Phase),
}

impl LoopOutcome {
    /// True only for a requested stop.
    pub fn is_clean(&self) -> bool {
        matches!(self, LoopOutcome::Stopped)
    }
}

impl fmt::Display for LoopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopOutcome::Stopped => f.write_str("stopped"),
            LoopOutcome::Aborted(point) => write!(f, "aborted by hook {}", point),
            LoopOutcome::Halted(Phase::Messages) => f.write_str("halted by message dispatch"),
            LoopOutcome::Halted(Phase::Transactions) => {
                f.write_str("halted by transaction handler")
            }
        }
    }
}

/// Counters for external monitoring.
#[derive(Clone, Debug, Default)]
pub struct AgentStatus {
    /// Start of the most recent poll cycle
    pub last_poll: Option<DateTime<Utc>>,
    /// Poll cycles started since construction
    pub cycles: u64,
    /// Messages handed to a handler
    pub messages_dispatched: u64,
    /// Transaction records fetched and processed
    pub transactions_processed: u64,
    /// Responses delivered to a callback
    pub responses_dispatched: u64,
}

/// Cooperative stop request for a running agent.
///
/// Cloneable, so handlers and hooks can capture one. The request is observed
/// at the top of the next cycle; the current cycle always completes.
#[derive(Clone, Default)]
pub struct StopHandle {
    token: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.token
            .lock()
            .expect("stop token lock poisoned")
            .cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.token
            .lock()
            .expect("stop token lock poisoned")
            .is_cancelled()
    }

    fn current(&self) -> CancellationToken {
        self.token
            .lock()
            .expect("stop token lock poisoned")
            .clone()
    }

    /// Installs a fresh token if the current one was used.
    fn reset(&self) {
        let mut token = self.token.lock().expect("stop token lock poisoned");
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

/// Client agent for a message broker.
///
/// Subscribes to named messages, polls the broker on a fixed interval and
/// routes what it receives to caller-supplied handlers.
///
/// # Example
/// ```no_run
/// use broker_agent::config::AgentConfig;
/// use broker_agent::subscription::handler;
/// use broker_agent::transport::HttpTransport;
/// use broker_agent::Agent;
/// use std::sync::Arc;
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = AgentConfig::default();
/// let transport = Arc::new(HttpTransport::new(&config.broker)?);
/// let agent = Agent::from_broker(config.poll, transport);
///
/// agent
///     .subscribe([("grade_update", handler(|payload| {
///         println!("grade: {:?}", payload.get("score"));
///         Ok(())
///     }))])
///     .await?;
///
/// let outcome = agent.start().await?;
/// println!("loop ended: {}", outcome);
/// # Ok(())
/// # }
/// ```
pub struct Agent {
    config: PollConfig,
    transport: Arc<dyn Transport>,
    session: Arc<dyn Session>,
    subscriptions: SubscriptionRegistry,
    hooks: HookRegistry,
    responses: ResponseRouter,
    state: Mutex<AgentState>,
    status: Mutex<AgentStatus>,
    stop: StopHandle,
    interrupt: InterruptSignal,
}

impl Agent {
    pub fn new(config: PollConfig, transport: Arc<dyn Transport>, session: Arc<dyn Session>) -> Self {
        let responses = match config.response_ttl() {
            Some(ttl) => ResponseRouter::expiring_after(ttl),
            None => ResponseRouter::new(),
        };

        Self {
            config,
            subscriptions: SubscriptionRegistry::new(Arc::clone(&transport)),
            transport,
            session,
            hooks: HookRegistry::new(),
            responses,
            state: Mutex::new(AgentState::Stopped),
            status: Mutex::new(AgentStatus::default()),
            stop: StopHandle::default(),
            interrupt: poll_loop::ctrl_c(),
        }
    }

    /// Builds an agent whose transport and session are the same object.
    pub fn from_broker<B>(config: PollConfig, broker: Arc<B>) -> Self
    where
        B: Transport + Session + 'static,
    {
        let transport: Arc<dyn Transport> = broker.clone();
        let session: Arc<dyn Session> = broker;
        Self::new(config, transport, session)
    }

    // --- subscriptions ---

    /// Subscribes to each message name; see [`SubscriptionRegistry::subscribe`].
    pub async fn subscribe<I, S>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, SharedHandler)>,
        S: Into<String>,
    {
        self.subscriptions.subscribe(entries).await
    }

    /// Unsubscribes from each subscribed name; unknown names are skipped.
    pub async fn unsubscribe<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.subscriptions.unsubscribe(names).await
    }

    /// Merges the broker's subscription list into the registry and returns it.
    pub async fn list_subscriptions(&self) -> Result<BTreeMap<String, HandlerSlot>> {
        self.subscriptions.list_subscriptions().await
    }

    pub async fn register_transaction_callback(&self, handler: SharedTransactionHandler) -> Result<()> {
        self.subscriptions.register_transaction_callback(handler).await
    }

    pub async fn clear_transaction_callback(&self) -> Result<()> {
        self.subscriptions.clear_transaction_callback().await
    }

    /// Sets the fallback handler for messages with no subscription.
    pub fn set_wildcard_handler(&self, handler: Option<SharedHandler>) {
        self.subscriptions.set_wildcard(handler);
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    // --- hooks ---

    pub fn add_hook<F>(&self, point: HookPoint, hook: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.hooks.add(point, hook);
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    // --- lifecycle ---

    /// Requests a graceful stop after the current cycle.
    pub fn stop(&self) {
        info!("Stop requested");
        self.stop.stop();
    }

    /// Replaces the interrupt source used when `stop_on_interrupt` is set.
    ///
    /// The default listens for Ctrl-C. Tokio keeps its SIGINT handler for the
    /// rest of the process once it has been installed, so a host that needs
    /// the default Ctrl-C behaviour after `start()` returns should supply its
    /// own signal here or disable `stop_on_interrupt`.
    pub fn with_interrupt_signal<F, Fut>(mut self, signal: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::io::Result<()>> + Send + 'static,
    {
        self.interrupt = Arc::new(move || -> InterruptFuture { Box::pin(signal()) });
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().expect("agent state lock poisoned")
    }

    pub fn status(&self) -> AgentStatus {
        self.status.lock().expect("agent status lock poisoned").clone()
    }

    fn set_state(&self, state: AgentState) {
        *self.state.lock().expect("agent state lock poisoned") = state;
    }

    // --- one-shot broker requests ---

    /// Replies to a received message. Does not go through the poll loop.
    pub async fn send_response(&self, message_id: &str, payload: Value) -> Result<()> {
        self.transport
            .post(
                endpoints::RESPONSE,
                json!({ "message_id": message_id, "payload": payload }),
            )
            .await?;
        Ok(())
    }

    /// Sends a message through the broker and returns its id.
    ///
    /// When `callback` is given, replies to this message are delivered to it
    /// during the responses phase of each cycle until [`Agent::forget_response`]
    /// is called or `poll.response_ttl_secs` has elapsed. With a zero lifetime
    /// the callback is kept until forgotten.
    pub async fn send_message(
        &self,
        message_name: &str,
        payload: Payload,
        callback: Option<SharedHandler>,
    ) -> Result<String> {
        let reply = self
            .transport
            .post(
                endpoints::MESSAGE,
                json!({ "name": message_name, "payload": payload }),
            )
            .await?;
        let message_id = decode_string(endpoints::MESSAGE, &reply, "message_id")?;

        if let Some(callback) = callback {
            self.responses.register(message_id.clone(), callback);
        }

        Ok(message_id)
    }

    /// Drops the reply callback for a sent message.
    pub fn forget_response(&self, message_id: &str) -> bool {
        self.responses.forget(message_id)
    }

    /// Number of reply callbacks still registered.
    pub fn pending_responses(&self) -> usize {
        self.responses.pending()
    }

    /// Authorizes other entities to listen to a message this entity owns.
    pub async fn share_message<I, S>(&self, message_name: &str, other_entity_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let other_entity_ids: Vec<String> = other_entity_ids.into_iter().map(Into::into).collect();
        self.transport
            .post(
                endpoints::SHARE_MESSAGE,
                json!({
                    "message_name": message_name,
                    "other_entity_ids": other_entity_ids,
                }),
            )
            .await?;
        Ok(())
    }

    /// Creates a resource authorization token owned by `owner_id`.
    pub async fn secure_resource(&self, owner_id: &str) -> Result<String> {
        let reply = self
            .transport
            .post(endpoints::NEW_RESOURCE, json!({ "owner_id": owner_id }))
            .await?;
        Ok(decode_string(endpoints::NEW_RESOURCE, &reply, "resource_id")?)
    }
}
