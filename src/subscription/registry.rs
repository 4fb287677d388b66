use super::handler::{HandlerSlot, SharedHandler, SharedTransactionHandler};
use crate::message::decode_list;
use crate::transport::{endpoints, Transport};
use anyhow::Result;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Message name the broker uses for the transaction stream subscription.
pub const TRANSACTION_MESSAGE_NAME: &str = "transaction";

/// Handler resolution for one inbound message name.
#[derive(Clone)]
pub enum Route {
    /// A local handler is subscribed under this name.
    Registered(SharedHandler),
    /// No subscription; the wildcard handler takes it.
    Wildcard(SharedHandler),
    /// Subscribed per the broker, but no local handler is bound.
    Unbound,
    /// No subscription and no wildcard handler.
    Missing,
}

/// Mapping from message name to handler, kept in step with the broker.
///
/// A name enters the registry only after the broker acknowledged the
/// subscribe request (or listed it in `plugin/subscription/list`), and leaves
/// it only after the broker acknowledged the unsubscribe request.
pub struct SubscriptionRegistry {
    transport: Arc<dyn Transport>,
    handlers: RwLock<HashMap<String, HandlerSlot>>,
    wildcard: RwLock<Option<SharedHandler>>,
    transaction: RwLock<Option<SharedTransactionHandler>>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handlers: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(None),
            transaction: RwLock::new(None),
        }
    }

    /// Subscribes to each message name and records its handler.
    ///
    /// Entries are processed in order. The first failed remote call stops
    /// processing and is returned; that entry and the ones after it are left
    /// untouched locally. Subscribing to a name twice replaces its handler.
    pub async fn subscribe<I, S>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, SharedHandler)>,
        S: Into<String>,
    {
        for (name, handler) in entries {
            let name = name.into();
            self.transport
                .post(endpoints::SUBSCRIBE, json!({ "message_name": name }))
                .await?;

            info!(message_name = %name, "Subscribed to message");
            self.handlers
                .write()
                .expect("subscription registry lock poisoned")
                .insert(name, Some(handler));
        }
        Ok(())
    }

    /// Unsubscribes from each name currently in the registry.
    ///
    /// Names not in the registry are skipped without a remote call.
    pub async fn unsubscribe<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let name = name.as_ref();
            if !self.is_subscribed(name) {
                debug!(message_name = %name, "Not subscribed, skipping unsubscribe");
                continue;
            }

            self.transport
                .post(endpoints::UNSUBSCRIBE, json!({ "message_name": name }))
                .await?;

            info!(message_name = %name, "Unsubscribed from message");
            self.handlers
                .write()
                .expect("subscription registry lock poisoned")
                .remove(name);
        }
        Ok(())
    }

    /// Fetches the broker's subscription list and merges it into the registry.
    ///
    /// Names the broker reports that have no local entry are added unbound
    /// (`None`). Returns a snapshot of the whole registry.
    pub async fn list_subscriptions(&self) -> Result<BTreeMap<String, HandlerSlot>> {
        let reply = self.transport.get(endpoints::SUBSCRIPTION_LIST).await?;
        let remote: Vec<String> = decode_list(endpoints::SUBSCRIPTION_LIST, reply, "subscriptions")?;

        let mut handlers = self
            .handlers
            .write()
            .expect("subscription registry lock poisoned");

        for name in remote {
            if !handlers.contains_key(&name) {
                warn!(message_name = %name, "Broker reports a subscription with no local handler");
                handlers.insert(name, None);
            }
        }

        Ok(handlers
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect())
    }

    /// Subscribes to the transaction stream and installs its handler.
    pub async fn register_transaction_callback(&self, handler: SharedTransactionHandler) -> Result<()> {
        self.transport
            .post(
                endpoints::SUBSCRIBE,
                json!({ "message_name": TRANSACTION_MESSAGE_NAME }),
            )
            .await?;

        info!("Transaction callback registered");
        *self
            .transaction
            .write()
            .expect("transaction slot lock poisoned") = Some(handler);
        Ok(())
    }

    /// Unsubscribes from the transaction stream and clears its handler.
    pub async fn clear_transaction_callback(&self) -> Result<()> {
        self.transport
            .post(
                endpoints::UNSUBSCRIBE,
                json!({ "message_name": TRANSACTION_MESSAGE_NAME }),
            )
            .await?;

        info!("Transaction callback cleared");
        *self
            .transaction
            .write()
            .expect("transaction slot lock poisoned") = None;
        Ok(())
    }

    /// Installs or removes the fallback handler for unsubscribed names.
    pub fn set_wildcard(&self, handler: Option<SharedHandler>) {
        *self.wildcard.write().expect("wildcard slot lock poisoned") = handler;
    }

    pub fn has_wildcard(&self) -> bool {
        self.wildcard
            .read()
            .expect("wildcard slot lock poisoned")
            .is_some()
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        self.handlers
            .read()
            .expect("subscription registry lock poisoned")
            .contains_key(name)
    }

    /// Subscribed message names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .expect("subscription registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub(crate) fn transaction_handler(&self) -> Option<SharedTransactionHandler> {
        self.transaction
            .read()
            .expect("transaction slot lock poisoned")
            .clone()
    }

    /// Resolves the handler for `message_name`.
    pub(crate) fn resolve(&self, message_name: &str) -> Route {
        let slot = self
            .handlers
            .read()
            .expect("subscription registry lock poisoned")
            .get(message_name)
            .cloned();

        match slot {
            Some(Some(handler)) => Route::Registered(handler),
            Some(None) => Route::Unbound,
            None => match self
                .wildcard
                .read()
                .expect("wildcard slot lock poisoned")
                .clone()
            {
                Some(handler) => Route::Wildcard(handler),
                None => Route::Missing,
            },
        }
    }
}
