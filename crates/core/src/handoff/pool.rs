use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::agent::{Agent, AgentId};
use crate::handoff::{AgentStore, StoreError};

/// Serializes capacity reservation over an [`AgentStore`].
///
/// Reservation is a read-modify-write (scan for a free agent, then bump
/// their chat count) and must not interleave, or two concurrent
/// escalations can both land on an agent's last slot. The reserve lock
/// covers exactly that window; reads and releases stay lock-free.
pub struct AgentPool {
    store: Arc<dyn AgentStore>,
    reserve_lock: Mutex<()>,
}

impl AgentPool {
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self { store, reserve_lock: Mutex::new(()) }
    }

    pub fn store(&self) -> &Arc<dyn AgentStore> {
        &self.store
    }

    /// Atomically picks the first available agent with spare capacity and
    /// reserves one chat slot on them. Returns `None` when every agent is
    /// saturated or offline.
    pub async fn reserve_capacity(&self) -> Result<Option<Agent>, StoreError> {
        let _guard = self.reserve_lock.lock().await;

        let agents = self.store.list_agents().await?;
        let candidate = agents.into_iter().find(|agent| agent.is_available && agent.has_capacity());

        let Some(mut agent) = candidate else {
            return Ok(None);
        };

        if !self.store.increment_chats(&agent.id).await? {
            // The agent vanished between scan and update. Treat as no
            // capacity rather than failing the escalation.
            warn!(event_name = "agent_pool.reserve_lost", agent_id = %agent.id, "agent disappeared during reservation");
            return Ok(None);
        }

        agent.current_chats += 1;
        Ok(Some(agent))
    }

    /// Reserves one chat slot on a named agent, for transfers where the
    /// destination is fixed. Takes the same lock as [`Self::reserve_capacity`],
    /// so a scan and a targeted reservation cannot both claim an agent's
    /// last slot. `None` when the agent is unknown, offline, or full.
    pub async fn reserve_specific(&self, agent_id: &AgentId) -> Result<Option<Agent>, StoreError> {
        let _guard = self.reserve_lock.lock().await;

        let Some(mut agent) = self.store.get_agent(agent_id).await? else {
            return Ok(None);
        };
        if !agent.is_available || !agent.has_capacity() {
            return Ok(None);
        }

        if !self.store.increment_chats(agent_id).await? {
            warn!(event_name = "agent_pool.reserve_lost", agent_id = %agent_id, "agent disappeared during reservation");
            return Ok(None);
        }

        agent.current_chats += 1;
        Ok(Some(agent))
    }

    /// Releases one chat slot. Best effort: an unknown agent is logged and
    /// ignored, and counts never go below zero.
    pub async fn release_capacity(&self, agent_id: &AgentId) -> Result<(), StoreError> {
        if !self.store.decrement_chats(agent_id).await? {
            warn!(event_name = "agent_pool.release_unknown_agent", agent_id = %agent_id, "release for unknown agent ignored");
        }
        Ok(())
    }

    /// Agents currently able to take a chat, in registration order.
    pub async fn list_available(&self) -> Result<Vec<Agent>, StoreError> {
        let agents = self.store.list_agents().await?;
        Ok(agents.into_iter().filter(|agent| agent.is_available && agent.has_capacity()).collect())
    }
}
