// Subscription registry and handler abstractions

pub mod handler;
pub mod registry;

pub use handler::{
    handler, transaction_handler, HandlerSlot, MessageHandler, SharedHandler,
    SharedTransactionHandler, TransactionHandler,
};
pub use registry::{Route, SubscriptionRegistry, TRANSACTION_MESSAGE_NAME};
