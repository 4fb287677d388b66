//! Client agent for a message broker.
//!
//! The agent subscribes to named message types, polls the broker on a fixed
//! interval for new messages, transactions and replies, and routes each to a
//! caller-supplied handler.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Agent (poll loop)                  │
//! │  - Timed polling, start/stop             │
//! │  - Hooks around every phase              │
//! └─────────────────────────────────────────┘
//!          ↓                    ↓
//! ┌──────────────────┐  ┌──────────────────────┐
//! │  Dispatcher       │  │ TransactionProcessor │
//! │  ResponseRouter   │  │                      │
//! └──────────────────┘  └──────────────────────┘
//!          ↓                    ↓
//! ┌─────────────────────────────────────────┐
//! │       SubscriptionRegistry               │
//! │  - name → handler, wildcard, txn slot    │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       Transport / Session (broker)       │
//! └─────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod message;
pub mod subscription;
pub mod transport;

pub use agent::{Agent, AgentState, AgentStatus, LoopOutcome, Phase, StopHandle};
pub use error::AgentError;
pub use hooks::HookPoint;
pub use message::{InboundMessage, Payload, ResponseRecord, TransactionRecord};
