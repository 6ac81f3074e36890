use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A human support agent and their live chat load.
///
/// `current_chats` is owned exclusively by the agent pool; nothing else may
/// increment or decrement it. The invariant `0 <= current_chats <=
/// max_concurrent_chats` holds whenever the pool's reserve/release contract
/// is respected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub email: String,
    pub role: String,
    pub is_available: bool,
    pub max_concurrent_chats: u32,
    pub current_chats: u32,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn has_capacity(&self) -> bool {
        self.current_chats < self.max_concurrent_chats
    }

    pub fn remaining_capacity(&self) -> u32 {
        self.max_concurrent_chats.saturating_sub(self.current_chats)
    }
}
