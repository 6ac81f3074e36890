use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SupportConfig;
use crate::domain::agent::AgentId;
use crate::domain::conversation::{Conversation, ConversationId, ConversationStatus};
use crate::domain::ticket::{Ticket, TicketId, TicketStatus};
use crate::domain::user::UserId;
use crate::errors::{ApplicationError, DomainError};
use crate::handoff::{
    AgentPool, ConversationStore, EscalationResult, HandoffNotifier, StoreError, TicketStore,
};

/// Everything the coordinator needs to open an escalation. The channel
/// layer fills this straight from an inbound message.
#[derive(Clone, Debug)]
pub struct EscalationRequest {
    pub user_id: UserId,
    pub subject: String,
    pub description: String,
    pub priority: String,
}

impl EscalationRequest {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id,
            subject: "Customer Service Request".to_string(),
            description: "User requested human assistance".to_string(),
            priority: "normal".to_string(),
        }
    }
}

/// Snapshot answered to "is anyone free right now".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentAvailability {
    pub has_capacity: bool,
    pub available_agents: usize,
    pub queue_depth: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentWorkload {
    pub agent_id: AgentId,
    pub name: String,
    pub is_available: bool,
    pub current_chats: u32,
    pub max_concurrent_chats: u32,
}

/// Drives the hand-off lifecycle end to end.
///
/// All mutating operations funnel through the pool's reservation lock or
/// a single store write, so the coordinator itself is cheap to clone
/// behind an `Arc` and share across the webhook handler, the sweeper,
/// and the CLI.
pub struct EscalationCoordinator {
    pool: Arc<AgentPool>,
    tickets: Arc<dyn TicketStore>,
    conversations: Arc<dyn ConversationStore>,
    notifier: Arc<dyn HandoffNotifier>,
    policy: SupportConfig,
    // Serializes escalate/end per user, so two simultaneous requests from
    // one conversation cannot both pass the duplicate check.
    user_locks: std::sync::Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl EscalationCoordinator {
    pub fn new(
        pool: Arc<AgentPool>,
        tickets: Arc<dyn TicketStore>,
        conversations: Arc<dyn ConversationStore>,
        notifier: Arc<dyn HandoffNotifier>,
        policy: SupportConfig,
    ) -> Self {
        Self {
            pool,
            tickets,
            conversations,
            notifier,
            policy,
            user_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.user_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Entries nobody holds anymore are garbage; sweep them on the way in.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(user_id.clone()).or_default().clone()
    }

    pub fn pool(&self) -> &Arc<AgentPool> {
        &self.pool
    }

    /// Escalates the user's conversation to a human agent.
    ///
    /// Idempotent per open conversation: a repeat request while a ticket is
    /// already open reports the current state of that ticket instead of
    /// opening a second one. A full pool queues the request rather than
    /// failing it; only infrastructure trouble produces `Failed`.
    pub async fn escalate(
        &self,
        request: EscalationRequest,
    ) -> Result<EscalationResult, ApplicationError> {
        let lock = self.user_lock(&request.user_id);
        let _serialized = lock.lock().await;

        let mut conversation = self.find_or_start_conversation(&request.user_id).await?;

        if let Some(existing) = self
            .tickets
            .find_open_by_conversation(&conversation.id)
            .await
            .map_err(store_to_app)?
        {
            return self.describe_existing(existing).await;
        }

        let reserved = self.pool.reserve_capacity().await.map_err(store_to_app)?;
        let now = Utc::now();
        let timeout_at = now + Duration::seconds(self.policy.escalation_timeout_secs as i64);

        let ticket = Ticket {
            id: TicketId(Uuid::new_v4().to_string()),
            conversation_id: conversation.id.clone(),
            user_id: request.user_id.clone(),
            agent_id: reserved.as_ref().map(|agent| agent.id.clone()),
            status: if reserved.is_some() { TicketStatus::Assigned } else { TicketStatus::Pending },
            priority: request.priority,
            subject: request.subject,
            description: request.description,
            escalated_at: now,
            resolved_at: None,
            timeout_at,
        };

        if let Err(error) = self.persist_escalation(&mut conversation, &ticket).await {
            // Undo the reservation so a persistence hiccup cannot leak an
            // agent slot.
            if let Some(agent) = &reserved {
                if let Err(release_error) = self.pool.release_capacity(&agent.id).await {
                    warn!(
                        event_name = "handoff.rollback_release_failed",
                        agent_id = %agent.id,
                        error = %release_error,
                        "capacity rollback failed after persistence error"
                    );
                }
            }
            warn!(
                event_name = "handoff.escalation_failed",
                user_id = %ticket.user_id,
                error = %error,
                "escalation could not be persisted"
            );
            return Ok(EscalationResult::Failed {
                reason: "escalation could not be recorded".to_string(),
            });
        }

        match reserved {
            Some(agent) => {
                info!(
                    event_name = "handoff.assigned",
                    ticket_id = %ticket.id,
                    agent_id = %agent.id,
                    user_id = %ticket.user_id,
                    "escalation assigned to agent"
                );
                self.notifier.agent_assigned(&ticket.user_id, &agent).await;
                Ok(EscalationResult::Assigned { ticket_id: ticket.id, agent_id: agent.id })
            }
            None => {
                let position = self.pending_position(&ticket.id).await?.ok_or_else(|| {
                    queue_listing_anomaly(&ticket.id)
                })?;
                info!(
                    event_name = "handoff.queued",
                    ticket_id = %ticket.id,
                    user_id = %ticket.user_id,
                    position,
                    "no agent free, escalation queued"
                );
                self.notifier.request_queued(&ticket.user_id, position).await;
                Ok(EscalationResult::Queued { ticket_id: ticket.id, position })
            }
        }
    }

    /// Marks the ticket resolved and frees its agent slot for the queue
    /// head. The owning conversation is closed alongside. Resolving a
    /// ticket that is already settled is a no-op.
    pub async fn resolve(&self, ticket_id: &TicketId) -> Result<(), ApplicationError> {
        let mut ticket = self.require_ticket(ticket_id).await?;
        if ticket.status.is_terminal() {
            info!(
                event_name = "handoff.already_resolved",
                ticket_id = %ticket.id,
                status = ticket.status.as_str(),
                "resolve on a settled ticket ignored"
            );
            return Ok(());
        }

        ticket.transition_to(TicketStatus::Resolved)?;
        ticket.resolved_at = Some(Utc::now());
        self.tickets.update_ticket(&ticket).await.map_err(store_to_app)?;

        if let Some(agent_id) = &ticket.agent_id {
            self.pool.release_capacity(agent_id).await.map_err(store_to_app)?;
        }
        self.close_conversation_for(&ticket, Utc::now()).await?;

        info!(event_name = "handoff.resolved", ticket_id = %ticket.id, "ticket resolved");
        self.promote_queued().await?;
        Ok(())
    }

    /// Records that the assigned agent has started the chat.
    pub async fn begin_work(
        &self,
        ticket_id: &TicketId,
        agent_id: &AgentId,
    ) -> Result<(), ApplicationError> {
        let mut ticket = self.require_ticket(ticket_id).await?;
        if ticket.agent_id.as_ref() != Some(agent_id) {
            return Err(ApplicationError::InvalidTransfer);
        }

        ticket.transition_to(TicketStatus::InProgress)?;
        self.tickets.update_ticket(&ticket).await.map_err(store_to_app)?;
        Ok(())
    }

    /// Moves an assigned or in-progress ticket from its current agent to
    /// another. The caller names the agent they believe holds the ticket;
    /// a mismatch is rejected. The target slot is reserved before the old
    /// one is released so the ticket is never left without a holder on
    /// failure.
    pub async fn transfer(
        &self,
        ticket_id: &TicketId,
        from_agent: &AgentId,
        to_agent: &AgentId,
    ) -> Result<(), ApplicationError> {
        let mut ticket = self.require_ticket(ticket_id).await?;
        if !ticket.status.is_open() || ticket.status == TicketStatus::Pending {
            return Err(ApplicationError::InvalidTransfer);
        }
        if ticket.agent_id.as_ref() != Some(from_agent) {
            return Err(ApplicationError::InvalidTransfer);
        }
        if from_agent == to_agent {
            return Ok(());
        }

        if self.pool.reserve_specific(to_agent).await.map_err(store_to_app)?.is_none() {
            return match self.pool.store().get_agent(to_agent).await.map_err(store_to_app)? {
                None => Err(ApplicationError::UnknownAgent(to_agent.to_string())),
                Some(_) => Err(ApplicationError::Integration(format!(
                    "agent {to_agent} has no capacity for a transfer"
                ))),
            };
        }

        ticket.agent_id = Some(to_agent.clone());
        if let Err(error) = self.tickets.update_ticket(&ticket).await {
            if let Err(release_error) = self.pool.release_capacity(to_agent).await {
                warn!(
                    event_name = "handoff.transfer_rollback_failed",
                    agent_id = %to_agent,
                    error = %release_error,
                    "could not undo transfer reservation"
                );
            }
            return Err(store_to_app(error));
        }

        self.pool.release_capacity(from_agent).await.map_err(store_to_app)?;

        if let Some(mut conversation) =
            self.conversations.get_conversation(&ticket.conversation_id).await.map_err(store_to_app)?
        {
            conversation.agent_id = Some(to_agent.clone());
            self.conversations.update_conversation(&conversation).await.map_err(store_to_app)?;
        }

        info!(
            event_name = "handoff.transferred",
            ticket_id = %ticket.id,
            from_agent = %from_agent,
            to_agent = %to_agent,
            "ticket transferred"
        );
        self.promote_queued().await?;
        Ok(())
    }

    /// Administratively closes an open ticket without resolution.
    pub async fn close_ticket(&self, ticket_id: &TicketId) -> Result<(), ApplicationError> {
        let mut ticket = self.require_ticket(ticket_id).await?;
        ticket.transition_to(TicketStatus::Closed)?;
        self.tickets.update_ticket(&ticket).await.map_err(store_to_app)?;

        if let Some(agent_id) = &ticket.agent_id {
            self.pool.release_capacity(agent_id).await.map_err(store_to_app)?;
        }
        self.close_conversation_for(&ticket, Utc::now()).await?;
        self.promote_queued().await?;
        Ok(())
    }

    /// 1-based position of a pending ticket in the FIFO queue. `None` when
    /// the ticket is unknown or no longer pending.
    pub async fn queue_position(
        &self,
        ticket_id: &TicketId,
    ) -> Result<Option<usize>, ApplicationError> {
        self.pending_position(ticket_id).await
    }

    /// Queue position looked up by the user, the way the channel asks for
    /// it. `None` when the user has no pending escalation.
    pub async fn queue_position_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<usize>, ApplicationError> {
        let Some(conversation) =
            self.conversations.find_open_by_user(user_id).await.map_err(store_to_app)?
        else {
            return Ok(None);
        };
        let Some(ticket) = self
            .tickets
            .find_open_by_conversation(&conversation.id)
            .await
            .map_err(store_to_app)?
        else {
            return Ok(None);
        };
        if ticket.status != TicketStatus::Pending {
            return Ok(None);
        }

        self.pending_position(&ticket.id).await
    }

    pub async fn check_agent_availability(&self) -> Result<AgentAvailability, ApplicationError> {
        let available = self.pool.list_available().await.map_err(store_to_app)?;
        let pending =
            self.tickets.list_by_status(TicketStatus::Pending).await.map_err(store_to_app)?;

        Ok(AgentAvailability {
            has_capacity: !available.is_empty(),
            available_agents: available.len(),
            queue_depth: pending.len(),
        })
    }

    /// Per-agent load snapshot, in registration order.
    pub async fn workload(&self) -> Result<Vec<AgentWorkload>, ApplicationError> {
        let agents = self.pool.store().list_agents().await.map_err(store_to_app)?;
        Ok(agents
            .into_iter()
            .map(|agent| AgentWorkload {
                agent_id: agent.id,
                name: agent.name,
                is_available: agent.is_available,
                current_chats: agent.current_chats,
                max_concurrent_chats: agent.max_concurrent_chats,
            })
            .collect())
    }

    /// Ends the user's open conversation, closing any open ticket and
    /// releasing its agent.
    pub async fn end_conversation(&self, user_id: &UserId) -> Result<bool, ApplicationError> {
        let lock = self.user_lock(user_id);
        let _serialized = lock.lock().await;

        let Some(mut conversation) =
            self.conversations.find_open_by_user(user_id).await.map_err(store_to_app)?
        else {
            return Ok(false);
        };

        if let Some(mut ticket) = self
            .tickets
            .find_open_by_conversation(&conversation.id)
            .await
            .map_err(store_to_app)?
        {
            ticket.transition_to(TicketStatus::Closed)?;
            self.tickets.update_ticket(&ticket).await.map_err(store_to_app)?;
            if let Some(agent_id) = &ticket.agent_id {
                self.pool.release_capacity(agent_id).await.map_err(store_to_app)?;
            }
        }

        conversation.transition_to(ConversationStatus::Closed)?;
        conversation.ended_at = Some(Utc::now());
        self.conversations.update_conversation(&conversation).await.map_err(store_to_app)?;

        info!(event_name = "handoff.conversation_ended", user_id = %user_id, "conversation closed");
        self.notifier.conversation_closed(user_id).await;
        self.promote_queued().await?;
        Ok(true)
    }

    /// Closes tickets whose deadline has passed. Pending tickets always
    /// qualify; assigned tickets only when the expiry policy includes them.
    /// Status is re-read per ticket so a concurrent resolve wins the race.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<Vec<TicketId>, ApplicationError> {
        let mut candidates =
            self.tickets.list_by_status(TicketStatus::Pending).await.map_err(store_to_app)?;
        if self.policy.expire_assigned_tickets {
            candidates.extend(
                self.tickets.list_by_status(TicketStatus::Assigned).await.map_err(store_to_app)?,
            );
        }

        let mut expired = Vec::new();
        for candidate in candidates {
            if candidate.timeout_at > now {
                continue;
            }

            // Re-read: the ticket may have been resolved or assigned since
            // the listing.
            let Some(mut ticket) =
                self.tickets.get_ticket(&candidate.id).await.map_err(store_to_app)?
            else {
                continue;
            };
            if ticket.status != candidate.status || !ticket.can_transition_to(TicketStatus::Closed)
            {
                continue;
            }

            ticket.transition_to(TicketStatus::Closed)?;
            self.tickets.update_ticket(&ticket).await.map_err(store_to_app)?;
            if let Some(agent_id) = &ticket.agent_id {
                self.pool.release_capacity(agent_id).await.map_err(store_to_app)?;
            }
            self.close_conversation_for(&ticket, now).await?;

            info!(
                event_name = "handoff.expired",
                ticket_id = %ticket.id,
                user_id = %ticket.user_id,
                "escalation timed out"
            );
            self.notifier.request_expired(&ticket.user_id).await;
            expired.push(ticket.id);
        }

        // Capacity can free between sweeps without an operation to hand it
        // on; each pass also drains the queue.
        self.promote_queued().await?;

        Ok(expired)
    }

    /// Assigns freed capacity to the head of the pending queue, repeating
    /// until the queue or the pool runs dry. Invoked after every capacity
    /// release and on each sweep pass.
    async fn promote_queued(&self) -> Result<(), ApplicationError> {
        loop {
            let pending =
                self.tickets.list_by_status(TicketStatus::Pending).await.map_err(store_to_app)?;
            let Some(head) = pending.into_iter().next() else {
                return Ok(());
            };

            let Some(agent) = self.pool.reserve_capacity().await.map_err(store_to_app)? else {
                return Ok(());
            };

            // Re-read under the reservation: the head may have been
            // resolved or expired since the listing.
            let fresh = self.tickets.get_ticket(&head.id).await.map_err(store_to_app)?;
            let Some(mut ticket) = fresh.filter(|ticket| ticket.status == TicketStatus::Pending)
            else {
                self.pool.release_capacity(&agent.id).await.map_err(store_to_app)?;
                continue;
            };

            ticket.agent_id = Some(agent.id.clone());
            ticket.transition_to(TicketStatus::Assigned)?;
            if let Err(error) = self.tickets.update_ticket(&ticket).await {
                if let Err(release_error) = self.pool.release_capacity(&agent.id).await {
                    warn!(
                        event_name = "handoff.promotion_rollback_failed",
                        agent_id = %agent.id,
                        error = %release_error,
                        "could not undo promotion reservation"
                    );
                }
                return Err(store_to_app(error));
            }

            if let Some(mut conversation) = self
                .conversations
                .get_conversation(&ticket.conversation_id)
                .await
                .map_err(store_to_app)?
            {
                conversation.agent_id = Some(agent.id.clone());
                self.conversations.update_conversation(&conversation).await.map_err(store_to_app)?;
            }

            info!(
                event_name = "handoff.promoted",
                ticket_id = %ticket.id,
                agent_id = %agent.id,
                user_id = %ticket.user_id,
                "queued escalation assigned to freed agent"
            );
            self.notifier.agent_assigned(&ticket.user_id, &agent).await;
        }
    }

    async fn describe_existing(
        &self,
        mut ticket: Ticket,
    ) -> Result<EscalationResult, ApplicationError> {
        if ticket.status == TicketStatus::Pending {
            // Capacity may have freed since the ticket queued; drain first
            // so a repeat request can come back assigned.
            self.promote_queued().await?;
            if let Some(fresh) = self.tickets.get_ticket(&ticket.id).await.map_err(store_to_app)? {
                ticket = fresh;
            }
        }

        match (ticket.status, &ticket.agent_id) {
            (TicketStatus::Pending, _) => {
                let position = self.pending_position(&ticket.id).await?.ok_or_else(|| {
                    queue_listing_anomaly(&ticket.id)
                })?;
                Ok(EscalationResult::Queued { ticket_id: ticket.id, position })
            }
            (status, Some(agent_id)) if status.is_open() => Ok(EscalationResult::Assigned {
                ticket_id: ticket.id.clone(),
                agent_id: agent_id.clone(),
            }),
            (status, _) if status.is_terminal() => Ok(EscalationResult::Failed {
                reason: "the previous request just closed, please ask again".to_string(),
            }),
            // An open non-pending ticket always carries an agent; anything
            // else is corrupt state.
            (status, _) => Err(ApplicationError::Domain(DomainError::InvariantViolation(
                format!("open ticket {} has status {status:?} but no agent", ticket.id),
            ))),
        }
    }

    async fn find_or_start_conversation(
        &self,
        user_id: &UserId,
    ) -> Result<Conversation, ApplicationError> {
        if let Some(existing) =
            self.conversations.find_open_by_user(user_id).await.map_err(store_to_app)?
        {
            return Ok(existing);
        }

        let conversation = Conversation {
            id: ConversationId(Uuid::new_v4().to_string()),
            user_id: user_id.clone(),
            status: ConversationStatus::Active,
            agent_id: None,
            started_at: Utc::now(),
            escalated_at: None,
            ended_at: None,
        };
        self.conversations.insert_conversation(&conversation).await.map_err(store_to_app)?;
        Ok(conversation)
    }

    /// Writes the ticket, then the escalated conversation. If the second
    /// write fails the ticket is deleted again so no half-escalation
    /// survives.
    async fn persist_escalation(
        &self,
        conversation: &mut Conversation,
        ticket: &Ticket,
    ) -> Result<(), StoreError> {
        self.tickets.insert_ticket(ticket).await?;

        conversation.status = ConversationStatus::Escalated;
        conversation.agent_id = ticket.agent_id.clone();
        conversation.escalated_at = Some(ticket.escalated_at);
        if let Err(error) = self.conversations.update_conversation(conversation).await {
            if let Err(cleanup_error) = self.tickets.delete_ticket(&ticket.id).await {
                warn!(
                    event_name = "handoff.orphan_ticket",
                    ticket_id = %ticket.id,
                    error = %cleanup_error,
                    "could not remove ticket after conversation update failure"
                );
            }
            return Err(error);
        }

        Ok(())
    }

    async fn close_conversation_for(
        &self,
        ticket: &Ticket,
        at: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let Some(mut conversation) =
            self.conversations.get_conversation(&ticket.conversation_id).await.map_err(store_to_app)?
        else {
            return Ok(());
        };
        if conversation.status == ConversationStatus::Closed {
            return Ok(());
        }

        conversation.transition_to(ConversationStatus::Closed)?;
        conversation.ended_at = Some(at);
        self.conversations.update_conversation(&conversation).await.map_err(store_to_app)
    }

    async fn pending_position(
        &self,
        ticket_id: &TicketId,
    ) -> Result<Option<usize>, ApplicationError> {
        let pending =
            self.tickets.list_by_status(TicketStatus::Pending).await.map_err(store_to_app)?;
        Ok(pending.iter().position(|ticket| &ticket.id == ticket_id).map(|index| index + 1))
    }

    async fn require_ticket(&self, ticket_id: &TicketId) -> Result<Ticket, ApplicationError> {
        self.tickets
            .get_ticket(ticket_id)
            .await
            .map_err(store_to_app)?
            .ok_or_else(|| ApplicationError::UnknownTicket(ticket_id.to_string()))
    }
}

fn store_to_app(error: StoreError) -> ApplicationError {
    ApplicationError::Persistence(error.to_string())
}

fn queue_listing_anomaly(ticket_id: &TicketId) -> ApplicationError {
    ApplicationError::Domain(DomainError::InvariantViolation(format!(
        "pending ticket {ticket_id} is missing from the queue listing"
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use crate::config::SupportConfig;
    use crate::domain::agent::AgentId;
    use crate::domain::ticket::TicketStatus;
    use crate::domain::user::UserId;
    use crate::errors::ApplicationError;
    use crate::handoff::memory::{
        InMemoryAgentStore, InMemoryConversationStore, InMemoryTicketStore, RecordingNotifier,
    };
    use crate::handoff::{AgentPool, EscalationResult, TicketStore};

    use super::{EscalationCoordinator, EscalationRequest};

    struct Harness {
        coordinator: EscalationCoordinator,
        agents: Arc<InMemoryAgentStore>,
        tickets: Arc<InMemoryTicketStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness_with_policy(policy: SupportConfig) -> Harness {
        let agents = Arc::new(InMemoryAgentStore::default());
        let tickets = Arc::new(InMemoryTicketStore::default());
        let conversations = Arc::new(InMemoryConversationStore::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pool = Arc::new(AgentPool::new(agents.clone()));

        Harness {
            coordinator: EscalationCoordinator::new(
                pool,
                tickets.clone(),
                conversations,
                notifier.clone(),
                policy,
            ),
            agents,
            tickets,
            notifier,
        }
    }

    fn harness() -> Harness {
        harness_with_policy(SupportConfig {
            escalation_timeout_secs: 300,
            sweep_interval_secs: 30,
            default_agent_capacity: 5,
            expire_assigned_tickets: false,
        })
    }

    fn user(id: &str) -> UserId {
        UserId(id.to_string())
    }

    #[tokio::test]
    async fn escalation_assigns_when_an_agent_is_free() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 2, 0);

        let result = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");

        let EscalationResult::Assigned { agent_id, .. } = result else {
            panic!("expected assignment, got {result:?}");
        };
        assert_eq!(agent_id.0, "agent-a");
        assert_eq!(h.notifier.assigned_count(), 1);
    }

    #[tokio::test]
    async fn escalation_queues_when_pool_is_saturated() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 1);

        let result = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");

        assert!(matches!(result, EscalationResult::Queued { position: 1, .. }));
        assert_eq!(h.notifier.queued_count(), 1);
    }

    #[tokio::test]
    async fn repeat_escalation_reports_the_existing_ticket() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 5, 0);

        let first = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("first escalation");
        let second = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("second escalation");

        assert_eq!(first, second);
        assert_eq!(h.tickets.open_ticket_count().await, 1);
        assert_eq!(h.notifier.assigned_count(), 1, "no duplicate notification");
    }

    #[tokio::test]
    async fn two_users_share_one_remaining_slot_without_oversubscription() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);
        let coordinator = Arc::new(h.coordinator);

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.escalate(EscalationRequest::for_user(user("user-1"))).await
            })
        };
        let second = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.escalate(EscalationRequest::for_user(user("user-2"))).await
            })
        };

        let outcomes = [
            first.await.expect("task").expect("escalation runs"),
            second.await.expect("task").expect("escalation runs"),
        ];

        let assigned = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, EscalationResult::Assigned { .. }))
            .count();
        let queued = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, EscalationResult::Queued { .. }))
            .count();
        assert_eq!((assigned, queued), (1, 1));
    }

    #[tokio::test]
    async fn queue_positions_follow_escalation_order() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 1);

        let first = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let second = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-2")))
            .await
            .expect("escalation runs");

        let EscalationResult::Queued { ticket_id: first_id, position: 1 } = first else {
            panic!("first user should be at position 1, got {first:?}");
        };
        assert!(matches!(second, EscalationResult::Queued { position: 2, .. }));

        // Closing the head of the queue promotes the second ticket.
        h.coordinator.close_ticket(&first_id).await.expect("close runs");
        let EscalationResult::Queued { ticket_id: second_id, .. } = second else {
            unreachable!()
        };
        assert_eq!(
            h.coordinator.queue_position(&second_id).await.expect("position query"),
            Some(1)
        );
    }

    #[tokio::test]
    async fn resolve_frees_the_agent_for_the_next_user() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        let first = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id, .. } = first else {
            panic!("expected assignment");
        };

        h.coordinator.resolve(&ticket_id).await.expect("resolve runs");

        let next = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-2")))
            .await
            .expect("escalation runs");
        assert!(matches!(next, EscalationResult::Assigned { .. }));
    }

    #[tokio::test]
    async fn capacity_two_agent_serves_two_chats_then_queues_the_third() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 2, 0);

        for expected_user in ["user-1", "user-2"] {
            let result = h
                .coordinator
                .escalate(EscalationRequest::for_user(user(expected_user)))
                .await
                .expect("escalation runs");
            assert!(matches!(result, EscalationResult::Assigned { .. }));
        }

        let third = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-3")))
            .await
            .expect("escalation runs");
        assert!(matches!(third, EscalationResult::Queued { position: 1, .. }));
    }

    #[tokio::test]
    async fn transfer_moves_load_between_agents() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);
        h.agents.seed_agent_blocking("agent-b", true, 1, 0);

        let result = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id, agent_id } = result else {
            panic!("expected assignment");
        };
        assert_eq!(agent_id.0, "agent-a");

        h.coordinator
            .transfer(&ticket_id, &AgentId("agent-a".to_string()), &AgentId("agent-b".to_string()))
            .await
            .expect("transfer runs");

        let workload = h.coordinator.workload().await.expect("workload query");
        let load = |id: &str| {
            workload.iter().find(|entry| entry.agent_id.0 == id).expect("agent listed").current_chats
        };
        assert_eq!(load("agent-a"), 0);
        assert_eq!(load("agent-b"), 1);
    }

    #[tokio::test]
    async fn end_conversation_closes_ticket_and_releases_agent() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        h.coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let ended = h.coordinator.end_conversation(&user("user-1")).await.expect("end runs");
        assert!(ended);
        assert_eq!(h.notifier.closed_count(), 1);
        assert_eq!(h.tickets.open_ticket_count().await, 0);

        let availability =
            h.coordinator.check_agent_availability().await.expect("availability query");
        assert!(availability.has_capacity);
    }

    #[tokio::test]
    async fn end_conversation_without_open_conversation_is_a_no_op() {
        let h = harness();
        let ended = h.coordinator.end_conversation(&user("user-absent")).await.expect("end runs");
        assert!(!ended);
    }

    #[tokio::test]
    async fn overdue_pending_tickets_expire_but_fresh_ones_stay() {
        let h = harness();

        let queued = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Queued { ticket_id, .. } = queued else {
            panic!("expected queued ticket with an empty pool");
        };

        let expired = h.coordinator.expire_overdue(Utc::now()).await.expect("sweep runs");
        assert!(expired.is_empty(), "deadline has not passed yet");

        let later = Utc::now() + Duration::seconds(301);
        let expired = h.coordinator.expire_overdue(later).await.expect("sweep runs");
        assert_eq!(expired, vec![ticket_id]);
        assert_eq!(h.notifier.expired_count(), 1);
    }

    #[tokio::test]
    async fn expiry_skips_assigned_tickets_unless_policy_allows() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        h.coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");

        let later = Utc::now() + Duration::seconds(600);
        let expired = h.coordinator.expire_overdue(later).await.expect("sweep runs");
        assert!(expired.is_empty(), "assigned tickets outlive the deadline by default");

        let strict = harness_with_policy(SupportConfig {
            escalation_timeout_secs: 300,
            sweep_interval_secs: 30,
            default_agent_capacity: 5,
            expire_assigned_tickets: true,
        });
        strict.agents.seed_agent_blocking("agent-a", true, 1, 0);
        strict
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");

        let expired = strict.coordinator.expire_overdue(later).await.expect("sweep runs");
        assert_eq!(expired.len(), 1);
    }

    #[tokio::test]
    async fn resolve_wins_the_race_against_expiry() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        let result = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id, .. } = result else {
            panic!("expected assignment");
        };

        h.coordinator.resolve(&ticket_id).await.expect("resolve runs");
        let later = Utc::now() + Duration::seconds(600);
        let expired = h.coordinator.expire_overdue(later).await.expect("sweep runs");
        assert!(expired.is_empty());

        let ticket = h
            .tickets
            .get_ticket(&ticket_id)
            .await
            .expect("store reachable")
            .expect("ticket exists");
        assert_eq!(ticket.status, TicketStatus::Resolved);
    }

    #[tokio::test]
    async fn resolving_the_head_hands_its_slot_to_the_queue() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        let first = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id: first_id, .. } = first else {
            panic!("expected assignment, got {first:?}");
        };

        let second = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-2")))
            .await
            .expect("escalation runs");
        let EscalationResult::Queued { ticket_id: second_id, position: 1 } = second else {
            panic!("expected queue head, got {second:?}");
        };
        let third = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-3")))
            .await
            .expect("escalation runs");
        let EscalationResult::Queued { position: 2, .. } = third else {
            panic!("expected queue position 2, got {third:?}");
        };

        // Freeing the slot must go to user-2 before user-3.
        h.coordinator.resolve(&first_id).await.expect("resolve runs");

        let promoted = h
            .tickets
            .get_ticket(&second_id)
            .await
            .expect("store reachable")
            .expect("ticket exists");
        assert_eq!(promoted.status, TicketStatus::Assigned);
        assert_eq!(promoted.agent_id, Some(AgentId("agent-a".to_string())));
        assert_eq!(h.notifier.assigned_count(), 2);

        let repeat = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-3")))
            .await
            .expect("escalation runs");
        assert!(
            matches!(repeat, EscalationResult::Queued { position: 1, .. }),
            "user-3 moves up but stays queued, got {repeat:?}"
        );
    }

    #[tokio::test]
    async fn repeat_escalation_assigns_once_capacity_frees() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        let first = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id, .. } = first else {
            panic!("expected assignment");
        };
        let queued = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-2")))
            .await
            .expect("escalation runs");
        assert!(matches!(queued, EscalationResult::Queued { position: 1, .. }));

        h.coordinator.resolve(&ticket_id).await.expect("resolve runs");

        let repeat = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-2")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { agent_id, .. } = repeat else {
            panic!("queued user should be assigned once capacity freed, got {repeat:?}");
        };
        assert_eq!(agent_id.0, "agent-a");
    }

    #[tokio::test]
    async fn sweep_pass_drains_freed_capacity_into_the_queue() {
        use crate::handoff::AgentStore;

        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 1);

        let queued = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Queued { ticket_id, .. } = queued else {
            panic!("expected queued ticket with a saturated pool");
        };

        // The slot frees outside any coordinator operation; the next sweep
        // still hands it to the waiting user.
        h.agents
            .decrement_chats(&AgentId("agent-a".to_string()))
            .await
            .expect("store reachable");
        let expired = h.coordinator.expire_overdue(Utc::now()).await.expect("sweep runs");
        assert!(expired.is_empty());

        let ticket = h
            .tickets
            .get_ticket(&ticket_id)
            .await
            .expect("store reachable")
            .expect("ticket exists");
        assert_eq!(ticket.status, TicketStatus::Assigned);
        assert_eq!(h.notifier.assigned_count(), 1);
    }

    #[tokio::test]
    async fn repeat_resolve_is_a_no_op() {
        use crate::handoff::AgentStore;

        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        let result = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id, .. } = result else {
            panic!("expected assignment");
        };

        h.coordinator.resolve(&ticket_id).await.expect("first resolve");
        h.coordinator.resolve(&ticket_id).await.expect("second resolve is quiet");

        let agent = h
            .agents
            .get_agent(&AgentId("agent-a".to_string()))
            .await
            .expect("store reachable")
            .expect("agent exists");
        assert_eq!(agent.current_chats, 0, "the slot is released exactly once");
    }

    #[tokio::test]
    async fn queue_position_is_answerable_by_user() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);

        h.coordinator
            .escalate(EscalationRequest::for_user(user("user-0")))
            .await
            .expect("escalation runs");
        h.coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        h.coordinator
            .escalate(EscalationRequest::for_user(user("user-2")))
            .await
            .expect("escalation runs");

        let position = |user_id: &str| {
            let coordinator = &h.coordinator;
            let user_id = user(user_id);
            async move { coordinator.queue_position_for_user(&user_id).await.expect("lookup") }
        };

        assert_eq!(position("user-0").await, None, "assigned users are not queued");
        assert_eq!(position("user-1").await, Some(1));
        assert_eq!(position("user-2").await, Some(2));
        assert_eq!(position("user-absent").await, None);
    }

    #[tokio::test]
    async fn transfer_requires_the_current_assignee() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);
        h.agents.seed_agent_blocking("agent-b", true, 1, 0);
        h.agents.seed_agent_blocking("agent-c", true, 1, 0);

        let result = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id, .. } = result else {
            panic!("expected assignment");
        };

        let wrong_holder = h
            .coordinator
            .transfer(&ticket_id, &AgentId("agent-b".to_string()), &AgentId("agent-c".to_string()))
            .await;
        assert!(matches!(wrong_holder, Err(ApplicationError::InvalidTransfer)));

        h.coordinator
            .transfer(&ticket_id, &AgentId("agent-a".to_string()), &AgentId("agent-b".to_string()))
            .await
            .expect("transfer from the real holder runs");
    }

    #[tokio::test]
    async fn concurrent_transfer_and_escalation_cannot_oversubscribe() {
        use crate::handoff::AgentStore;

        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 0);
        h.agents.seed_agent_blocking("agent-b", true, 1, 0);

        let first = h
            .coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");
        let EscalationResult::Assigned { ticket_id, .. } = first else {
            panic!("expected assignment");
        };

        let coordinator = Arc::new(h.coordinator);
        let transfer = {
            let coordinator = coordinator.clone();
            let ticket_id = ticket_id.clone();
            tokio::spawn(async move {
                coordinator
                    .transfer(
                        &ticket_id,
                        &AgentId("agent-a".to_string()),
                        &AgentId("agent-b".to_string()),
                    )
                    .await
            })
        };
        let escalation = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.escalate(EscalationRequest::for_user(user("user-2"))).await
            })
        };

        // Either interleaving is legal; the chat counts must stay within
        // capacity regardless.
        let _ = transfer.await.expect("task");
        let _ = escalation.await.expect("task").expect("escalation runs");

        for id in ["agent-a", "agent-b"] {
            let agent = h
                .agents
                .get_agent(&AgentId(id.to_string()))
                .await
                .expect("store reachable")
                .expect("agent exists");
            assert!(
                agent.current_chats <= agent.max_concurrent_chats,
                "{id} is oversubscribed: {}/{}",
                agent.current_chats,
                agent.max_concurrent_chats
            );
        }
    }

    #[tokio::test]
    async fn simultaneous_requests_from_one_user_open_a_single_ticket() {
        use async_trait::async_trait;

        use crate::domain::conversation::ConversationId;
        use crate::domain::ticket::Ticket;
        use crate::handoff::StoreError;

        // Forces a task switch inside the duplicate check so interleaved
        // requests actually contend.
        struct YieldingTicketStore {
            inner: Arc<InMemoryTicketStore>,
        }

        #[async_trait]
        impl TicketStore for YieldingTicketStore {
            async fn insert_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
                tokio::task::yield_now().await;
                self.inner.insert_ticket(ticket).await
            }

            async fn get_ticket(&self, id: &super::TicketId) -> Result<Option<Ticket>, StoreError> {
                self.inner.get_ticket(id).await
            }

            async fn update_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
                self.inner.update_ticket(ticket).await
            }

            async fn delete_ticket(&self, id: &super::TicketId) -> Result<(), StoreError> {
                self.inner.delete_ticket(id).await
            }

            async fn find_open_by_conversation(
                &self,
                conversation_id: &ConversationId,
            ) -> Result<Option<Ticket>, StoreError> {
                tokio::task::yield_now().await;
                self.inner.find_open_by_conversation(conversation_id).await
            }

            async fn list_by_status(
                &self,
                status: TicketStatus,
            ) -> Result<Vec<Ticket>, StoreError> {
                self.inner.list_by_status(status).await
            }
        }

        let agents = Arc::new(InMemoryAgentStore::default());
        agents.seed_agent_blocking("agent-a", true, 5, 0);
        let inner_tickets = Arc::new(InMemoryTicketStore::default());
        let coordinator = Arc::new(EscalationCoordinator::new(
            Arc::new(AgentPool::new(agents)),
            Arc::new(YieldingTicketStore { inner: inner_tickets.clone() }),
            Arc::new(InMemoryConversationStore::default()),
            Arc::new(RecordingNotifier::default()),
            SupportConfig {
                escalation_timeout_secs: 300,
                sweep_interval_secs: 30,
                default_agent_capacity: 5,
                expire_assigned_tickets: false,
            },
        ));

        let first = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.escalate(EscalationRequest::for_user(user("user-1"))).await
            })
        };
        let second = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.escalate(EscalationRequest::for_user(user("user-1"))).await
            })
        };

        first.await.expect("task").expect("escalation runs");
        second.await.expect("task").expect("escalation runs");

        assert_eq!(inner_tickets.open_ticket_count().await, 1);
    }

    #[tokio::test]
    async fn availability_snapshot_counts_agents_and_queue() {
        let h = harness();
        h.agents.seed_agent_blocking("agent-a", true, 1, 1);
        h.agents.seed_agent_blocking("agent-b", true, 2, 0);

        h.coordinator
            .escalate(EscalationRequest::for_user(user("user-1")))
            .await
            .expect("escalation runs");

        let availability =
            h.coordinator.check_agent_availability().await.expect("availability query");
        assert!(availability.has_capacity);
        assert_eq!(availability.available_agents, 1);
        assert_eq!(availability.queue_depth, 0);
    }
}
