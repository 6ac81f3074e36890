use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::conversation::ConversationId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Assigned,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Open tickets still occupy the conversation; a queue entry is exactly
    /// an open ticket in `Pending`.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

/// An escalation request. Created `Pending`; leaves the queue the moment its
/// status moves away from `Pending`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub agent_id: Option<AgentId>,
    pub status: TicketStatus,
    pub priority: String,
    pub subject: String,
    pub description: String,
    pub escalated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub timeout_at: DateTime<Utc>,
}

impl Ticket {
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        use TicketStatus::{Assigned, Closed, InProgress, Pending, Resolved};
        matches!(
            (self.status, next),
            (Pending, Assigned)
                | (Assigned, InProgress)
                | (Assigned, Resolved)
                | (InProgress, Resolved)
                | (Pending, Closed)
                | (Assigned, Closed)
                | (InProgress, Closed)
        )
    }

    pub fn transition_to(&mut self, next: TicketStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidTicketTransition { from: self.status, to: next })
    }
}
