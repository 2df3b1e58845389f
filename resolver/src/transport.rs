use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("chat transport failure: {0}")]
    Delivery(String),
}

/// Handle identifying the originating conversation. Opaque to the core; the
/// transport decides what it means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext(pub String);

impl ConversationContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Narrow seam to the chat platform. The core assumes nothing about how the
/// transport suspends: it only awaits one reply or a timeout signal per
/// turn.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, ctx: &ConversationContext, text: &str) -> Result<(), TransportError>;

    /// The next reply in this conversation, or `None` once `timeout`
    /// elapses without one.
    async fn next_reply(
        &self,
        ctx: &ConversationContext,
        timeout: Duration,
    ) -> Result<Option<String>, TransportError>;
}
