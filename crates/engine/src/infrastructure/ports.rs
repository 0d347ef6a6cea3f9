//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is
//! concrete types. Ports exist for:
//! - The event bus (could swap NATS -> another broker)
//! - The chat/narrative service (external process, reached over HTTP)
//! - Clock (for testing)
//! - The live session registry (admin `@stats` reads it without the
//!   command layer depending on the websocket layer)

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connect failed: {0}")]
    Connect(String),
    #[error("publish to {subject} failed: {message}")]
    Publish { subject: String, message: String },
    #[error("subscribe to {subject} failed: {message}")]
    Subscribe { subject: String, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat request failed: {0}")]
    RequestFailed(String),
    #[error("invalid chat response: {0}")]
    InvalidResponse(String),
    #[error("chat request timed out")]
    Timeout,
}

// =============================================================================
// Event Bus
// =============================================================================

/// A live subscription on one subject.
///
/// Messages arrive in publication order. Dropping the subscription tears
/// down the broker-side interest (subscription lifetime equals connection
/// lifetime at the call sites).
pub struct BusSubscription {
    pub subject: String,
    receiver: mpsc::Receiver<Vec<u8>>,
    forward_task: Option<JoinHandle<()>>,
}

impl BusSubscription {
    pub fn new(
        subject: String,
        receiver: mpsc::Receiver<Vec<u8>>,
        forward_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            subject,
            receiver,
            forward_task,
        }
    }

    /// Next payload, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.forward_task.take() {
            task.abort();
        }
    }
}

/// Publish/subscribe messaging backbone.
///
/// Subjects are `.`-separated hierarchies; the runtime only uses
/// `world.updates.user.<user_id>`. Publish is fire-and-forget from the
/// caller's perspective: the state store logs and swallows failures so a
/// bus outage never fails a state write.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBusPort: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<BusSubscription, BusError>;

    fn is_connected(&self) -> bool;
}

// =============================================================================
// Chat / Narrative Service
// =============================================================================

/// Everything the external narrative service needs to voice one NPC turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Template-merged NPC record.
    pub npc: Value,
    /// Relationship state (trust, history) as stored on the view.
    pub relationship: Value,
    /// Player view summary (location, inventory size).
    pub player: Value,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub reply: String,
}

/// The external LLM chat service. `talk` is the only caller; outages
/// degrade to a canned reply and never touch state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn narrate(&self, request: ChatRequest) -> Result<ChatReply, ChatError>;
}

// =============================================================================
// Session registry (read-only view for admin stats)
// =============================================================================

/// One live session as seen by `@stats` / `@where`.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub connection_id: String,
    pub user_id: String,
    pub experience_id: String,
}

#[cfg_attr(test, mockall::automock)]
pub trait SessionRegistryPort: Send + Sync {
    fn session_count(&self) -> usize;
    fn sessions(&self) -> Vec<SessionSnapshot>;
}
