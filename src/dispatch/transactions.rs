use crate::message::TransactionRecord;
use crate::subscription::SubscriptionRegistry;
use anyhow::Result;
use tracing::{debug, info};

/// Feeds transaction records to the registered transaction handler.
pub struct TransactionProcessor<'a> {
    subscriptions: &'a SubscriptionRegistry,
}

impl<'a> TransactionProcessor<'a> {
    pub fn new(subscriptions: &'a SubscriptionRegistry) -> Self {
        Self { subscriptions }
    }

    /// Processes `records` in order.
    ///
    /// Returns `Ok(false)` as soon as the handler returns `false`; later
    /// records are left unprocessed. Without a handler every record is
    /// consumed and `Ok(true)` is returned.
    pub async fn handle_transactions(&self, records: Vec<TransactionRecord>) -> Result<bool> {
        let handler = match self.subscriptions.transaction_handler() {
            Some(handler) => handler,
            None => {
                if !records.is_empty() {
                    debug!(count = records.len(), "No transaction handler, dropping records");
                }
                return Ok(true);
            }
        };

        let total = records.len();
        for (index, record) in records.into_iter().enumerate() {
            if !handler.handle(record).await? {
                info!(
                    processed = index + 1,
                    remaining = total - index - 1,
                    "Transaction handler requested stop"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }
}
