use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::AgentId;
use crate::domain::user::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Escalated,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "escalated" => Some(Self::Escalated),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// A user's chat session. At most one non-closed conversation exists per
/// user; `Escalated` implies an open ticket owned by this conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    pub status: ConversationStatus,
    pub agent_id: Option<AgentId>,
    pub started_at: DateTime<Utc>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        use ConversationStatus::{Active, Closed, Escalated};
        matches!((self.status, next), (Active, Escalated) | (Active, Closed) | (Escalated, Closed))
    }

    pub fn transition_to(&mut self, next: ConversationStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            return Ok(());
        }

        Err(DomainError::InvalidConversationTransition { from: self.status, to: next })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::user::UserId;
    use crate::errors::DomainError;

    use super::{Conversation, ConversationId, ConversationStatus};

    fn conversation(status: ConversationStatus) -> Conversation {
        Conversation {
            id: ConversationId("C-1".to_string()),
            user_id: UserId("U-1".to_string()),
            status,
            agent_id: None,
            started_at: Utc::now(),
            escalated_at: None,
            ended_at: None,
        }
    }

    #[test]
    fn active_conversation_can_escalate_or_close() {
        let mut escalated = conversation(ConversationStatus::Active);
        escalated.transition_to(ConversationStatus::Escalated).expect("active -> escalated");

        let mut closed = conversation(ConversationStatus::Active);
        closed.transition_to(ConversationStatus::Closed).expect("active -> closed");
    }

    #[test]
    fn closed_conversation_is_terminal() {
        let mut closed = conversation(ConversationStatus::Closed);
        let error = closed
            .transition_to(ConversationStatus::Active)
            .expect_err("closed conversations never reopen");
        assert!(matches!(error, DomainError::InvalidConversationTransition { .. }));
    }

    #[test]
    fn status_labels_round_trip() {
        for status in
            [ConversationStatus::Active, ConversationStatus::Escalated, ConversationStatus::Closed]
        {
            assert_eq!(ConversationStatus::parse(status.as_str()), Some(status));
        }
    }
}
