use crate::message::ResponseRecord;
use crate::subscription::SharedHandler;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct PendingReply {
    callback: SharedHandler,
    registered_at: Instant,
}

/// Reply callbacks keyed by the id of the message they answer.
///
/// A callback stays registered after it fires, since several receivers may
/// answer the same message. It is dropped by [`ResponseRouter::forget`] or,
/// for a router built with [`ResponseRouter::expiring_after`], once it is
/// older than the configured lifetime.
#[derive(Default)]
pub struct ResponseRouter {
    callbacks: RwLock<HashMap<String, PendingReply>>,
    ttl: Option<Duration>,
}

impl ResponseRouter {
    /// A router whose callbacks live until forgotten.
    pub fn new() -> Self {
        Self::default()
    }

    /// A router that drops callbacks `ttl` after they were registered.
    pub fn expiring_after(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn register(&self, message_id: String, callback: SharedHandler) {
        self.callbacks
            .write()
            .expect("response router lock poisoned")
            .insert(
                message_id,
                PendingReply {
                    callback,
                    registered_at: Instant::now(),
                },
            );
    }

    /// Drops the callback for `message_id`. Returns whether one was registered.
    pub fn forget(&self, message_id: &str) -> bool {
        self.callbacks
            .write()
            .expect("response router lock poisoned")
            .remove(message_id)
            .is_some()
    }

    pub fn pending(&self) -> usize {
        self.callbacks
            .read()
            .expect("response router lock poisoned")
            .len()
    }

    /// Drops callbacks older than the router's lifetime. Returns how many
    /// were dropped; always zero for a router without one.
    pub fn expire(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let mut callbacks = self.callbacks.write().expect("response router lock poisoned");
        let before = callbacks.len();
        callbacks.retain(|_, pending| pending.registered_at.elapsed() < ttl);
        let dropped = before - callbacks.len();

        if dropped > 0 {
            info!(dropped = dropped, remaining = callbacks.len(), "Expired response callbacks");
        }
        dropped
    }

    /// Delivers each response body to the callback registered for its
    /// message id. Responses without a callback are skipped. Expired
    /// callbacks are dropped once the batch has been delivered.
    ///
    /// Returns the number of responses delivered.
    pub async fn dispatch(&self, responses: Vec<ResponseRecord>) -> Result<usize> {
        let mut delivered = 0;

        for record in responses {
            let callback = self
                .callbacks
                .read()
                .expect("response router lock poisoned")
                .get(&record.message_id)
                .map(|pending| pending.callback.clone());

            match callback {
                Some(callback) => {
                    debug!(message_id = %record.message_id, "Delivering response");
                    callback.handle(record.response).await?;
                    delivered += 1;
                }
                None => {
                    warn!(
                        message_id = %record.message_id,
                        "Response received with no callback registered"
                    );
                }
            }
        }

        self.expire();
        Ok(delivered)
    }
}
