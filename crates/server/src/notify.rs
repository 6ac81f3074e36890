use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use handoff_core::domain::agent::Agent;
use handoff_core::domain::user::UserId;
use handoff_core::handoff::HandoffNotifier;
use handoff_gateway::client::MessageGateway;
use handoff_gateway::replies::{self, OutboundReply};

/// Delivers coordinator notifications over the channel client. Failures
/// are logged and swallowed; notifications never undo an assignment.
pub struct ChannelNotifier {
    gateway: Arc<dyn MessageGateway>,
}

impl ChannelNotifier {
    pub fn new(gateway: Arc<dyn MessageGateway>) -> Self {
        Self { gateway }
    }

    async fn deliver(&self, user_id: &UserId, text: String) {
        let reply = OutboundReply::text(text);
        if let Err(error) = self.gateway.send_reply(user_id, &reply).await {
            warn!(
                event_name = "notify.delivery_failed",
                user_id = %user_id,
                error = %error,
                "hand-off notification could not be delivered"
            );
        }
    }
}

#[async_trait]
impl HandoffNotifier for ChannelNotifier {
    async fn agent_assigned(&self, user_id: &UserId, agent: &Agent) {
        self.deliver(user_id, replies::agent_assigned_text(&agent.name)).await;
    }

    async fn request_queued(&self, user_id: &UserId, position: usize) {
        self.deliver(user_id, replies::queued_text(position)).await;
    }

    async fn conversation_closed(&self, user_id: &UserId) {
        self.deliver(user_id, replies::conversation_closed_text()).await;
    }

    async fn request_expired(&self, user_id: &UserId) {
        self.deliver(user_id, replies::request_expired_text()).await;
    }
}
