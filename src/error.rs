use thiserror::Error;

/// Structural errors raised by the poll-dispatch engine.
///
/// Handler failures and transport failures are never wrapped in this type;
/// they travel through the engine as the `anyhow::Error` the collaborator
/// produced, so callers can downcast to their own error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// A message arrived with no subscription for its name and no wildcard handler.
    #[error("no handler registered for message: <{message_name}>")]
    NoHandlerRegistered { message_name: String },

    /// The broker reports a subscription for this name but no local handler is bound.
    #[error("subscribed to <{message_name}> but no local handler is bound")]
    UnboundHandler { message_name: String },

    /// The broker reply could not be interpreted.
    #[error("malformed response from '{endpoint}': {detail}")]
    MalformedResponse { endpoint: String, detail: String },

    /// A second interrupt arrived before the loop reached its stop point.
    #[error("poll loop interrupted before the current cycle finished")]
    Interrupted,

    /// `start()` was called while the poll loop is already active.
    #[error("agent is already running")]
    AlreadyRunning,
}

impl AgentError {
    pub fn malformed(endpoint: &str, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.to_string(),
            detail: detail.into(),
        }
    }
}
