//! Per-cycle routing of broker records to handlers.
//!
//! - [`Dispatcher`] routes inbound messages by name, with wildcard fallback
//! - [`TransactionProcessor`] feeds transaction records to the single
//!   transaction handler, honouring its early-termination signal
//! - [`ResponseRouter`] delivers replies to messages this entity sent

mod responses;
mod transactions;

pub use responses::ResponseRouter;
pub use transactions::TransactionProcessor;

use crate::error::AgentError;
use crate::hooks::{HookPoint, HookRegistry};
use crate::message::InboundMessage;
use crate::subscription::{Route, SubscriptionRegistry};
use anyhow::Result;
use tracing::{debug, info};

/// Routes a batch of inbound messages to their handlers.
pub struct Dispatcher<'a> {
    subscriptions: &'a SubscriptionRegistry,
    hooks: &'a HookRegistry,
}

impl<'a> Dispatcher<'a> {
    pub fn new(subscriptions: &'a SubscriptionRegistry, hooks: &'a HookRegistry) -> Self {
        Self {
            subscriptions,
            hooks,
        }
    }

    /// Dispatches `messages` in order, wrapped by the dispatch hooks.
    ///
    /// Returns `Ok(false)` when `pre_dispatch_messages` or
    /// `post_dispatch_messages` returns false. A message with no usable
    /// handler fails with [`AgentError::NoHandlerRegistered`] or
    /// [`AgentError::UnboundHandler`]; handler errors are returned as-is.
    /// Messages after a failing one are not dispatched.
    pub async fn dispatch(&self, messages: Vec<InboundMessage>) -> Result<bool> {
        if !self.hooks.run(HookPoint::PreDispatchMessages) {
            info!(hook = %HookPoint::PreDispatchMessages, "Hook declined dispatch");
            return Ok(false);
        }

        for message in messages {
            let (message_name, payload) = message.into_enriched_payload();

            match self.subscriptions.resolve(&message_name) {
                Route::Registered(handler) => {
                    debug!(message_name = %message_name, "Dispatching to subscribed handler");
                    handler.handle(payload).await?;
                }
                Route::Wildcard(handler) => {
                    debug!(message_name = %message_name, "Dispatching to wildcard handler");
                    handler.handle(payload).await?;
                }
                Route::Unbound => {
                    return Err(AgentError::UnboundHandler { message_name }.into());
                }
                Route::Missing => {
                    return Err(AgentError::NoHandlerRegistered { message_name }.into());
                }
            }
        }

        if !self.hooks.run(HookPoint::PostDispatchMessages) {
            info!(hook = %HookPoint::PostDispatchMessages, "Hook declined dispatch");
            return Ok(false);
        }

        Ok(true)
    }
}
