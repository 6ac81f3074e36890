use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use handoff_core::domain::user::{ChannelUser, MessageRecord, SenderKind, UserId, UserStatus};
use handoff_core::handoff::ConversationStore;
use handoff_db::{SqlConversationStore, SqlMessageRepository, SqlUserRepository};
use handoff_gateway::client::MessageGateway;
use handoff_gateway::events::{
    parse_envelope, ChannelEvent, EventContext, EventDispatcher, HandlerResult,
};
use handoff_gateway::replies::OutboundReply;

#[derive(Clone)]
pub struct WebhookState {
    pub dispatcher: Arc<EventDispatcher>,
    pub gateway: Arc<dyn MessageGateway>,
    pub users: Arc<SqlUserRepository>,
    pub messages: Arc<SqlMessageRepository>,
    pub conversations: Arc<SqlConversationStore>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new().route("/webhook", post(webhook)).with_state(state)
}

/// Webhook entry point. Always acks with 200 so the channel does not
/// retry or disable the webhook; failures are logged server-side.
pub async fn webhook(
    State(state): State<WebhookState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let correlation_id = Uuid::new_v4().to_string();
    let envelope = parse_envelope(&body);
    let ctx = EventContext { correlation_id: correlation_id.clone() };

    register_sender(&state, &envelope.event).await;
    record_inbound(&state, &envelope.event).await;

    match state.dispatcher.dispatch(&envelope, &ctx).await {
        Ok(HandlerResult::Responded(reply)) => {
            if let Some(user_id) = reply_target(&envelope.event) {
                send_and_record(&state, &user_id, &reply).await;
            }
        }
        Ok(HandlerResult::Processed) | Ok(HandlerResult::Ignored) => {}
        Err(error) => {
            warn!(
                event_name = "webhook.dispatch_failed",
                correlation_id = %correlation_id,
                error = %error,
                "webhook event could not be handled"
            );
        }
    }

    info!(
        event_name = "webhook.acked",
        correlation_id = %correlation_id,
        event_token = %envelope.event_token,
        "webhook callback acknowledged"
    );
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

fn reply_target(event: &ChannelEvent) -> Option<UserId> {
    match event {
        ChannelEvent::Message(message) => Some(UserId(message.user_id.clone())),
        ChannelEvent::Subscribed(subscribed) => Some(UserId(subscribed.user_id.clone())),
        ChannelEvent::ConversationStarted(started) => Some(UserId(started.user_id.clone())),
        _ => None,
    }
}

/// Keeps the subscriber registry current from whatever identity the
/// callback carries.
async fn register_sender(state: &WebhookState, event: &ChannelEvent) {
    let (user_id, user_name, language) = match event {
        ChannelEvent::Message(message) => (&message.user_id, &message.user_name, "en"),
        ChannelEvent::Subscribed(subscribed) => {
            (&subscribed.user_id, &subscribed.user_name, subscribed.language.as_str())
        }
        ChannelEvent::ConversationStarted(started) => (&started.user_id, &started.user_name, "en"),
        _ => return,
    };
    if user_id.is_empty() {
        return;
    }

    let now = Utc::now();
    let user = ChannelUser {
        id: UserId(user_id.clone()),
        name: user_name.clone(),
        language: language.to_string(),
        status: UserStatus::Active,
        created_at: now,
        last_active: now,
    };
    if let Err(error) = state.users.upsert_user(&user).await {
        warn!(event_name = "webhook.user_upsert_failed", user_id = %user_id, error = %error, "could not record subscriber");
    }
}

async fn record_inbound(state: &WebhookState, event: &ChannelEvent) {
    let ChannelEvent::Message(message) = event else {
        return;
    };

    append_transcript(
        state,
        &UserId(message.user_id.clone()),
        message.user_id.clone(),
        SenderKind::User,
        message.text.clone(),
    )
    .await;
}

async fn send_and_record(state: &WebhookState, user_id: &UserId, reply: &OutboundReply) {
    if let Err(error) = state.gateway.send_reply(user_id, reply).await {
        warn!(event_name = "webhook.reply_failed", user_id = %user_id, error = %error, "could not deliver reply");
        return;
    }

    append_transcript(state, user_id, "bot".to_string(), SenderKind::Bot, reply.text.clone()).await;
}

/// Transcript rows hang off the user's open conversation; chatter outside
/// a conversation is not persisted.
async fn append_transcript(
    state: &WebhookState,
    user_id: &UserId,
    sender_id: String,
    sender_kind: SenderKind,
    body: String,
) {
    let conversation = match state.conversations.find_open_by_user(user_id).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return,
        Err(error) => {
            warn!(event_name = "webhook.transcript_lookup_failed", user_id = %user_id, error = %error, "could not look up conversation");
            return;
        }
    };

    let record = MessageRecord {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation.id,
        sender_id,
        sender_kind,
        body,
        sent_at: Utc::now(),
    };
    if let Err(error) = state.messages.append(&record).await {
        warn!(event_name = "webhook.transcript_append_failed", user_id = %user_id, error = %error, "could not append transcript row");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, Json};
    use serde_json::json;

    use handoff_core::config::{ConfigOverrides, LoadOptions};
    use handoff_core::domain::ticket::TicketStatus;
    use handoff_core::handoff::TicketStore;
    use handoff_db::{DemoSeedDataset, SqlTicketStore};
    use handoff_gateway::client::NoopGateway;
    use handoff_gateway::events::{EventDispatcher, MessageHandler, SubscribedHandler, WelcomeHandler};

    use crate::bootstrap::{bootstrap, Application, CoordinatorHandoffService};
    use crate::routes::{webhook, WebhookState};

    // Each test gets its own named in-memory database so parallel tests
    // never share state.
    async fn test_app(db_name: &str) -> Application {
        bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(format!("sqlite:file:{db_name}?mode=memory&cache=shared")),
                channel_auth_token: Some("token-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap test app")
    }

    fn state_for(app: &Application) -> WebhookState {
        let mut dispatcher = EventDispatcher::new();
        dispatcher
            .register(MessageHandler::new(CoordinatorHandoffService::new(app.coordinator.clone())));
        dispatcher.register(WelcomeHandler);
        dispatcher.register(SubscribedHandler::new(
            handoff_gateway::events::NoopSubscriberService,
        ));

        WebhookState {
            dispatcher: Arc::new(dispatcher),
            gateway: Arc::new(NoopGateway),
            users: app.users.clone(),
            messages: app.messages.clone(),
            conversations: app.conversations.clone(),
        }
    }

    #[tokio::test]
    async fn webhook_acks_probe_callbacks() {
        let app = test_app("routes_probe").await;
        let state = state_for(&app);

        let (status, Json(payload)) = webhook(
            State(state),
            Json(json!({ "event": "webhook", "message_token": "tok-1" })),
        )
        .await;

        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(payload["status"], "ok");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn escalation_message_opens_a_ticket_and_registers_the_user() {
        let app = test_app("routes_escalation").await;
        DemoSeedDataset::load(&app.db_pool).await.expect("seed agents");
        let state = state_for(&app);

        let (status, _) = webhook(
            State(state),
            Json(json!({
                "event": "message",
                "message_token": "tok-2",
                "sender": { "id": "user-42", "name": "Ana" },
                "message": { "type": "text", "text": "I want to talk to a human" }
            })),
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::OK);

        let tickets = SqlTicketStore::new(app.db_pool.clone());
        let assigned = tickets.list_by_status(TicketStatus::Assigned).await.expect("list tickets");
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].user_id.0, "user-42");

        let user = app
            .users
            .find_by_id(&handoff_core::domain::user::UserId("user-42".to_string()))
            .await
            .expect("user lookup");
        assert!(user.is_some(), "webhook should have registered the sender");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn malformed_payload_is_still_acked() {
        let app = test_app("routes_malformed").await;
        let state = state_for(&app);

        let (status, Json(payload)) =
            webhook(State(state), Json(json!({ "unexpected": true }))).await;

        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(payload["status"], "ok");

        app.db_pool.close().await;
    }
}
