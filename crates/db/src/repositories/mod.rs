use chrono::{DateTime, Utc};
use thiserror::Error;

use handoff_core::StoreError;

pub mod agent;
pub mod conversation;
pub mod message;
pub mod ticket;
pub mod user;

pub use agent::SqlAgentStore;
pub use conversation::SqlConversationStore;
pub use message::SqlMessageRepository;
pub use ticket::SqlTicketStore;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

// StoreError lives in the core crate, so these conversions stay free
// functions instead of From impls.
pub(crate) fn unavailable(error: sqlx::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

pub(crate) fn decode(message: impl Into<String>) -> StoreError {
    StoreError::Decode(message.into())
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| decode(format!("invalid timestamp in `{column}`: `{value}` ({error})")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| decode(format!("invalid value for `{column}` (expected non-negative u32): {value}")))
}
