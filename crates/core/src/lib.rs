pub mod config;
pub mod domain;
pub mod errors;
pub mod handoff;

pub use config::{
    AppConfig, ChannelConfig, ConfigError, ConfigOverrides, DatabaseConfig, LoadOptions, LogFormat,
    LoggingConfig, ServerConfig, SupportConfig,
};
pub use domain::agent::{Agent, AgentId};
pub use domain::conversation::{Conversation, ConversationId, ConversationStatus};
pub use domain::ticket::{Ticket, TicketId, TicketStatus};
pub use domain::user::{ChannelUser, MessageRecord, SenderKind, UserId, UserStatus};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use handoff::{
    AgentAvailability, AgentPool, AgentStore, AgentWorkload, ConversationStore,
    EscalationCoordinator, EscalationRequest, EscalationResult, HandoffNotifier, StoreError,
    SweepOutcome, SweepReport, TicketStore, TimeoutSweeper,
};
