//! Escalation and agent-assignment engine.
//!
//! The coordinator owns the full hand-off lifecycle: a user asks for a
//! human, an agent is reserved from the pool or the request is queued,
//! and the ticket later resolves, transfers, or times out. Storage is
//! behind the port traits below so the engine runs identically against
//! SQLite and the in-memory fixtures.

pub mod coordinator;
pub mod memory;
pub mod pool;
pub mod sweeper;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::conversation::{Conversation, ConversationId};
use crate::domain::ticket::{Ticket, TicketId, TicketStatus};
use crate::domain::user::UserId;

pub use coordinator::{AgentAvailability, AgentWorkload, EscalationCoordinator, EscalationRequest};
pub use pool::AgentPool;
pub use sweeper::{SweepOutcome, SweepReport, TimeoutSweeper};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    /// All agents in stable insertion order. Ordering is part of the
    /// contract: assignment ties break toward the earliest-registered agent.
    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError>;

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError>;

    /// Adds one active chat to the agent. Returns false when the agent is
    /// unknown.
    async fn increment_chats(&self, id: &AgentId) -> Result<bool, StoreError>;

    /// Removes one active chat, never dropping below zero. Returns false
    /// when the agent is unknown.
    async fn decrement_chats(&self, id: &AgentId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError>;

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError>;

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), StoreError>;

    async fn delete_ticket(&self, id: &TicketId) -> Result<(), StoreError>;

    /// Open ticket (if any) owned by the conversation. Drives escalation
    /// idempotence.
    async fn find_open_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Ticket>, StoreError>;

    /// Tickets in the given status, FIFO by escalation time with ticket id
    /// as the deterministic tie-break.
    async fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>, StoreError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// The user's current non-closed conversation, if one exists.
    async fn find_open_by_user(&self, user_id: &UserId)
        -> Result<Option<Conversation>, StoreError>;
}

/// Outbound notifications emitted by the coordinator. Delivery is best
/// effort; a failed notification never rolls back an assignment.
#[async_trait]
pub trait HandoffNotifier: Send + Sync {
    async fn agent_assigned(&self, user_id: &UserId, agent: &Agent);

    async fn request_queued(&self, user_id: &UserId, position: usize);

    async fn conversation_closed(&self, user_id: &UserId);

    async fn request_expired(&self, user_id: &UserId);
}

/// Terminal outcome of an escalation attempt. `Failed` is a value, not an
/// error: callers surface it to the user instead of propagating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationResult {
    Assigned { ticket_id: TicketId, agent_id: AgentId },
    Queued { ticket_id: TicketId, position: usize },
    Failed { reason: String },
}
