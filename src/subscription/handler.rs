use crate::message::{Payload, TransactionRecord};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Handler for enriched message payloads (and for replies to sent messages).
///
/// Any `Fn(Payload) -> anyhow::Result<()>` closure is a handler. Errors are
/// propagated by the engine exactly as returned.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: Payload) -> Result<()>;
}

#[async_trait]
impl<F> MessageHandler for F
where
    F: Fn(Payload) -> Result<()> + Send + Sync,
{
    async fn handle(&self, payload: Payload) -> Result<()> {
        self(payload)
    }
}

/// Handler for the transaction stream.
///
/// Returning `Ok(false)` stops processing of the current batch.
#[async_trait]
pub trait TransactionHandler: Send + Sync {
    async fn handle(&self, record: TransactionRecord) -> Result<bool>;
}

#[async_trait]
impl<F> TransactionHandler for F
where
    F: Fn(TransactionRecord) -> Result<bool> + Send + Sync,
{
    async fn handle(&self, record: TransactionRecord) -> Result<bool> {
        self(record)
    }
}

/// Shared message handler.
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Shared transaction handler.
pub type SharedTransactionHandler = Arc<dyn TransactionHandler>;

/// A registry slot. `None` means the broker reports the subscription but no
/// local handler is bound.
pub type HandlerSlot = Option<SharedHandler>;

/// Wraps a closure as a [`SharedHandler`].
pub fn handler<F>(f: F) -> SharedHandler
where
    F: Fn(Payload) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as a [`SharedTransactionHandler`].
pub fn transaction_handler<F>(f: F) -> SharedTransactionHandler
where
    F: Fn(TransactionRecord) -> Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}
