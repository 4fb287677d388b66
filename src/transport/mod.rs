//! Broker collaborators: authenticated request transport and session handshake.
//!
//! The engine only talks to the broker through these two traits.
//! [`HttpTransport`] is the production implementation of both.

mod http;

#[cfg(test)]
pub(crate) mod mock;

pub use http::{HttpTransport, TransportError};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Logical broker endpoints consumed by the agent.
pub mod endpoints {
    pub const CONNECT: &str = "plugin/connect";
    pub const DISCONNECT: &str = "plugin/disconnect";
    pub const SUBSCRIBE: &str = "plugin/subscribe";
    pub const UNSUBSCRIBE: &str = "plugin/unsubscribe";
    pub const SUBSCRIPTION_LIST: &str = "plugin/subscription/list";
    pub const MESSAGE_LIST: &str = "plugin/message/list";
    pub const TRANSACTION_LIST: &str = "plugin/transaction/list";
    pub const MESSAGE: &str = "message";
    pub const RESPONSE: &str = "response";
    pub const RESPONSE_LIST: &str = "response/list";
    pub const SHARE_MESSAGE: &str = "share-message";
    pub const NEW_RESOURCE: &str = "new-resource";
}

/// Authenticated request channel to the broker.
///
/// Errors are surfaced to the agent's caller unmodified.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Authenticated write call.
    async fn post(&self, endpoint: &str, payload: Value) -> Result<Value>;

    /// Authenticated read call.
    async fn get(&self, endpoint: &str) -> Result<Value>;
}

/// Broker session handshake. Called once each per `start()`.
#[async_trait]
pub trait Session: Send + Sync {
    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}
