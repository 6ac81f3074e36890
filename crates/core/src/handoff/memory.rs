//! In-memory store implementations for tests and local experiments.
//!
//! Locks are plain std locks held only for the duration of a map access,
//! never across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::domain::agent::{Agent, AgentId};
use crate::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use crate::domain::ticket::{Ticket, TicketId, TicketStatus};
use crate::domain::user::UserId;
use crate::handoff::{
    AgentStore, ConversationStore, HandoffNotifier, StoreError, TicketStore,
};

#[derive(Default)]
pub struct InMemoryAgentStore {
    // Vec keeps registration order, which assignment relies on.
    agents: RwLock<Vec<Agent>>,
}

impl InMemoryAgentStore {
    pub fn seed_agent_blocking(
        &self,
        id: &str,
        is_available: bool,
        max_concurrent_chats: u32,
        current_chats: u32,
    ) {
        let mut agents = self.agents.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        agents.push(Agent {
            id: AgentId(id.to_string()),
            name: format!("Agent {id}"),
            email: format!("{id}@support.test"),
            role: "agent".to_string(),
            is_available,
            max_concurrent_chats,
            current_chats,
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn list_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let agents = self.agents.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(agents.clone())
    }

    async fn get_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        let agents = self.agents.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(agents.iter().find(|agent| &agent.id == id).cloned())
    }

    async fn increment_chats(&self, id: &AgentId) -> Result<bool, StoreError> {
        let mut agents = self.agents.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match agents.iter_mut().find(|agent| &agent.id == id) {
            Some(agent) => {
                agent.current_chats += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn decrement_chats(&self, id: &AgentId) -> Result<bool, StoreError> {
        let mut agents = self.agents.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        match agents.iter_mut().find(|agent| &agent.id == id) {
            Some(agent) => {
                agent.current_chats = agent.current_chats.saturating_sub(1);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryTicketStore {
    tickets: RwLock<HashMap<TicketId, Ticket>>,
}

impl InMemoryTicketStore {
    pub async fn open_ticket_count(&self) -> usize {
        let tickets = self.tickets.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        tickets.values().filter(|ticket| ticket.status.is_open()).count()
    }
}

#[async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tickets = self.tickets.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        let tickets = self.tickets.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(tickets.get(id).cloned())
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tickets = self.tickets.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !tickets.contains_key(&ticket.id) {
            return Err(StoreError::Unavailable(format!("ticket {} does not exist", ticket.id)));
        }
        tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(())
    }

    async fn delete_ticket(&self, id: &TicketId) -> Result<(), StoreError> {
        let mut tickets = self.tickets.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        tickets.remove(id);
        Ok(())
    }

    async fn find_open_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Ticket>, StoreError> {
        let tickets = self.tickets.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(tickets
            .values()
            .find(|ticket| {
                &ticket.conversation_id == conversation_id && ticket.status.is_open()
            })
            .cloned())
    }

    async fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>, StoreError> {
        let tickets = self.tickets.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut matching: Vec<Ticket> =
            tickets.values().filter(|ticket| ticket.status == status).cloned().collect();
        matching.sort_by(|a, b| {
            a.escalated_at.cmp(&b.escalated_at).then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut conversations =
            self.conversations.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError> {
        let conversations =
            self.conversations.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(conversations.get(id).cloned())
    }

    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut conversations =
            self.conversations.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !conversations.contains_key(&conversation.id) {
            return Err(StoreError::Unavailable(format!(
                "conversation {} does not exist",
                conversation.id
            )));
        }
        conversations.insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn find_open_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Conversation>, StoreError> {
        let conversations =
            self.conversations.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(conversations
            .values()
            .find(|conversation| {
                &conversation.user_id == user_id
                    && conversation.status != ConversationStatus::Closed
            })
            .cloned())
    }
}

/// Counts outbound notifications instead of delivering them.
#[derive(Default)]
pub struct RecordingNotifier {
    assigned: AtomicUsize,
    queued: AtomicUsize,
    closed: AtomicUsize,
    expired: AtomicUsize,
}

impl RecordingNotifier {
    pub fn assigned_count(&self) -> usize {
        self.assigned.load(Ordering::SeqCst)
    }

    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn expired_count(&self) -> usize {
        self.expired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HandoffNotifier for RecordingNotifier {
    async fn agent_assigned(&self, _user_id: &UserId, _agent: &Agent) {
        self.assigned.fetch_add(1, Ordering::SeqCst);
    }

    async fn request_queued(&self, _user_id: &UserId, _position: usize) {
        self.queued.fetch_add(1, Ordering::SeqCst);
    }

    async fn conversation_closed(&self, _user_id: &UserId) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    async fn request_expired(&self, _user_id: &UserId) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }
}

/// Notifier that drops everything. Useful when wiring the coordinator in
/// contexts that have no channel client, like the CLI.
#[derive(Default)]
pub struct NoopNotifier;

#[async_trait]
impl HandoffNotifier for NoopNotifier {
    async fn agent_assigned(&self, _user_id: &UserId, _agent: &Agent) {}

    async fn request_queued(&self, _user_id: &UserId, _position: usize) {}

    async fn conversation_closed(&self, _user_id: &UserId) {}

    async fn request_expired(&self, _user_id: &UserId) {}
}
