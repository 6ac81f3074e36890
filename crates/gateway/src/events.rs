use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use handoff_core::domain::ticket::TicketId;
use handoff_core::domain::user::UserId;
use handoff_core::handoff::EscalationResult;
use handoff_core::AgentAvailability;

use crate::replies::{self, OutboundReply};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelEnvelope {
    pub event_token: String,
    pub event: ChannelEvent,
}

/// Webhook callback payloads the channel delivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Sent by the channel when the webhook URL is registered.
    WebhookProbe,
    Subscribed(SubscribedEvent),
    ConversationStarted(ConversationStartedEvent),
    Message(MessageEvent),
    Unsubscribed { user_id: String },
    Unsupported { event_type: String },
}

impl ChannelEvent {
    pub fn event_type(&self) -> ChannelEventType {
        match self {
            Self::WebhookProbe => ChannelEventType::WebhookProbe,
            Self::Subscribed(_) => ChannelEventType::Subscribed,
            Self::ConversationStarted(_) => ChannelEventType::ConversationStarted,
            Self::Message(_) => ChannelEventType::Message,
            Self::Unsubscribed { .. } => ChannelEventType::Unsubscribed,
            Self::Unsupported { .. } => ChannelEventType::Unsupported,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelEventType {
    WebhookProbe,
    Subscribed,
    ConversationStarted,
    Message,
    Unsubscribed,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribedEvent {
    pub user_id: String,
    pub user_name: String,
    pub language: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationStartedEvent {
    pub user_id: String,
    pub user_name: String,
    pub is_subscribed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub message_token: String,
}

/// Parses a raw webhook body. Unknown event types map to `Unsupported`
/// so one odd callback never fails the whole endpoint.
pub fn parse_envelope(body: &Value) -> ChannelEnvelope {
    let event_token = body
        .get("message_token")
        .map(json_token)
        .unwrap_or_else(|| "no-token".to_string());
    let event_type = body.get("event").and_then(Value::as_str).unwrap_or("");

    let event = match event_type {
        "webhook" => ChannelEvent::WebhookProbe,
        "subscribed" => ChannelEvent::Subscribed(SubscribedEvent {
            user_id: str_at(body, &["user", "id"]),
            user_name: str_at(body, &["user", "name"]),
            language: {
                let language = str_at(body, &["user", "language"]);
                if language.is_empty() { "en".to_string() } else { language }
            },
        }),
        "conversation_started" => ChannelEvent::ConversationStarted(ConversationStartedEvent {
            user_id: str_at(body, &["user", "id"]),
            user_name: str_at(body, &["user", "name"]),
            is_subscribed: body.get("subscribed").and_then(Value::as_bool).unwrap_or(false),
        }),
        "message" => ChannelEvent::Message(MessageEvent {
            user_id: str_at(body, &["sender", "id"]),
            user_name: str_at(body, &["sender", "name"]),
            text: str_at(body, &["message", "text"]),
            message_token: event_token.clone(),
        }),
        "unsubscribed" => {
            ChannelEvent::Unsubscribed { user_id: str_at(body, &["user_id"]) }
        }
        other => ChannelEvent::Unsupported { event_type: other.to_string() },
    };

    ChannelEnvelope { event_token, event }
}

fn str_at(body: &Value, path: &[&str]) -> String {
    let mut current = body;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return String::new(),
        }
    }
    current.as_str().unwrap_or("").to_string()
}

// Message tokens arrive as numbers; older callbacks send strings.
fn json_token(value: &Value) -> String {
    match value {
        Value::String(token) => token.clone(),
        Value::Number(token) => token.to_string(),
        _ => "no-token".to_string(),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(OutboundReply),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("hand-off service failure: {0}")]
    Handoff(String),
    #[error("subscriber registry failure: {0}")]
    Subscriber(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> ChannelEventType;
    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<ChannelEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &ChannelEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

pub fn default_dispatcher() -> EventDispatcher {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(MessageHandler::new(NoopHandoffService));
    dispatcher.register(WelcomeHandler);
    dispatcher.register(SubscribedHandler::new(NoopSubscriberService));
    dispatcher.register(UnsubscribedHandler::new(NoopHandoffService));
    dispatcher
}

/// The escalation operations the channel surface needs. The server adapts
/// the coordinator onto this; the default wiring uses the preview noop.
#[async_trait]
pub trait HandoffService: Send + Sync {
    async fn escalate(
        &self,
        user_id: &UserId,
        user_name: &str,
    ) -> Result<EscalationResult, EventHandlerError>;

    async fn availability(&self) -> Result<AgentAvailability, EventHandlerError>;

    /// 1-based queue position of the user's waiting escalation, if any.
    async fn queue_position(&self, user_id: &UserId) -> Result<Option<usize>, EventHandlerError>;

    async fn end_conversation(&self, user_id: &UserId) -> Result<bool, EventHandlerError>;
}

/// Preview-mode service: reports an empty support desk without touching
/// any storage.
#[derive(Default)]
pub struct NoopHandoffService;

#[async_trait]
impl HandoffService for NoopHandoffService {
    async fn escalate(
        &self,
        _user_id: &UserId,
        _user_name: &str,
    ) -> Result<EscalationResult, EventHandlerError> {
        Ok(EscalationResult::Queued { ticket_id: TicketId("preview-ticket".to_string()), position: 1 })
    }

    async fn availability(&self) -> Result<AgentAvailability, EventHandlerError> {
        Ok(AgentAvailability { has_capacity: false, available_agents: 0, queue_depth: 0 })
    }

    async fn queue_position(&self, _user_id: &UserId) -> Result<Option<usize>, EventHandlerError> {
        Ok(None)
    }

    async fn end_conversation(&self, _user_id: &UserId) -> Result<bool, EventHandlerError> {
        Ok(false)
    }
}

/// Registers channel subscribers as they arrive.
#[async_trait]
pub trait SubscriberService: Send + Sync {
    async fn record_subscriber(
        &self,
        user_id: &str,
        user_name: &str,
        language: &str,
    ) -> Result<(), EventHandlerError>;
}

#[derive(Default)]
pub struct NoopSubscriberService;

#[async_trait]
impl SubscriberService for NoopSubscriberService {
    async fn record_subscriber(
        &self,
        _user_id: &str,
        _user_name: &str,
        _language: &str,
    ) -> Result<(), EventHandlerError> {
        Ok(())
    }
}

pub struct MessageHandler<S> {
    service: S,
}

impl<S> MessageHandler<S>
where
    S: HandoffService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for MessageHandler<S>
where
    S: HandoffService + 'static,
{
    fn event_type(&self) -> ChannelEventType {
        ChannelEventType::Message
    }

    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChannelEvent::Message(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        if replies::wants_human(&event.text) {
            let user_id = UserId(event.user_id.clone());
            let outcome = self.service.escalate(&user_id, &event.user_name).await?;
            return Ok(HandlerResult::Responded(replies::escalation_reply(&outcome)));
        }

        if replies::wants_to_end(&event.text) {
            let user_id = UserId(event.user_id.clone());
            let ended = self.service.end_conversation(&user_id).await?;
            return Ok(HandlerResult::Responded(replies::end_conversation_reply(ended)));
        }

        if replies::wants_queue_status(&event.text) {
            let user_id = UserId(event.user_id.clone());
            let position = self.service.queue_position(&user_id).await?;
            return Ok(HandlerResult::Responded(replies::queue_status_reply(position)));
        }

        Ok(HandlerResult::Responded(replies::canned_reply(&event.text)))
    }
}

/// Greets users opening the chat screen. The channel shows the reply
/// before the user has sent anything.
pub struct WelcomeHandler;

#[async_trait]
impl EventHandler for WelcomeHandler {
    fn event_type(&self) -> ChannelEventType {
        ChannelEventType::ConversationStarted
    }

    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChannelEvent::ConversationStarted(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        Ok(HandlerResult::Responded(replies::welcome_reply(&event.user_name)))
    }
}

pub struct SubscribedHandler<S> {
    service: S,
}

impl<S> SubscribedHandler<S>
where
    S: SubscriberService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for SubscribedHandler<S>
where
    S: SubscriberService + 'static,
{
    fn event_type(&self) -> ChannelEventType {
        ChannelEventType::Subscribed
    }

    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChannelEvent::Subscribed(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        self.service.record_subscriber(&event.user_id, &event.user_name, &event.language).await?;
        Ok(HandlerResult::Responded(replies::welcome_reply(&event.user_name)))
    }
}

/// Ends any open conversation when the user unsubscribes.
pub struct UnsubscribedHandler<S> {
    service: S,
}

impl<S> UnsubscribedHandler<S>
where
    S: HandoffService,
{
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for UnsubscribedHandler<S>
where
    S: HandoffService + 'static,
{
    fn event_type(&self) -> ChannelEventType {
        ChannelEventType::Unsubscribed
    }

    async fn handle(
        &self,
        envelope: &ChannelEnvelope,
        _ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let ChannelEvent::Unsubscribed { user_id } = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        self.service.end_conversation(&UserId(user_id.clone())).await?;
        Ok(HandlerResult::Processed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        default_dispatcher, parse_envelope, ChannelEnvelope, ChannelEvent, EventContext,
        EventDispatcher, HandlerResult, MessageEvent,
    };

    fn message_envelope(text: &str) -> ChannelEnvelope {
        ChannelEnvelope {
            event_token: "tok-1".to_owned(),
            event: ChannelEvent::Message(MessageEvent {
                user_id: "user-1".to_owned(),
                user_name: "Ana".to_owned(),
                text: text.to_owned(),
                message_token: "tok-1".to_owned(),
            }),
        }
    }

    #[test]
    fn parses_message_callback() {
        let body = json!({
            "event": "message",
            "message_token": 4_912_661_846_655_238_145_u64,
            "sender": { "id": "user-1", "name": "Ana" },
            "message": { "type": "text", "text": "I want a human" }
        });

        let envelope = parse_envelope(&body);
        let ChannelEvent::Message(message) = envelope.event else {
            panic!("expected message event, got {:?}", envelope.event);
        };
        assert_eq!(message.user_id, "user-1");
        assert_eq!(message.text, "I want a human");
    }

    #[test]
    fn parses_conversation_started_and_probe_callbacks() {
        let started = parse_envelope(&json!({
            "event": "conversation_started",
            "user": { "id": "user-2", "name": "Boris" },
            "subscribed": false
        }));
        assert!(matches!(started.event, ChannelEvent::ConversationStarted(_)));

        let probe = parse_envelope(&json!({ "event": "webhook", "message_token": "tok" }));
        assert_eq!(probe.event, ChannelEvent::WebhookProbe);
    }

    #[test]
    fn unknown_event_type_maps_to_unsupported() {
        let envelope = parse_envelope(&json!({ "event": "seen" }));
        assert!(matches!(envelope.event, ChannelEvent::Unsupported { ref event_type } if event_type == "seen"));
    }

    #[tokio::test]
    async fn escalation_keyword_routes_to_the_handoff_service() {
        let dispatcher = default_dispatcher();

        let result = dispatcher
            .dispatch(&message_envelope("can I talk to an agent please"), &EventContext::default())
            .await
            .expect("dispatch");

        let HandlerResult::Responded(reply) = result else {
            panic!("expected a reply, got {result:?}");
        };
        assert!(reply.text.contains("queue"), "queued escalation should mention the queue");
    }

    #[tokio::test]
    async fn queue_status_question_reports_the_wait() {
        let dispatcher = default_dispatcher();

        let result = dispatcher
            .dispatch(
                &message_envelope("where am I in the queue?"),
                &EventContext::default(),
            )
            .await
            .expect("dispatch");

        let HandlerResult::Responded(reply) = result else {
            panic!("expected a reply, got {result:?}");
        };
        assert!(reply.text.contains("not waiting"), "no pending request means no wait");
    }

    #[tokio::test]
    async fn ordinary_chatter_gets_a_canned_reply() {
        let dispatcher = default_dispatcher();

        let result = dispatcher
            .dispatch(&message_envelope("hello"), &EventContext::default())
            .await
            .expect("dispatch");

        assert!(matches!(result, HandlerResult::Responded(_)));
    }

    #[tokio::test]
    async fn dispatcher_ignores_events_without_handlers() {
        let dispatcher = EventDispatcher::new();
        let result = dispatcher
            .dispatch(&message_envelope("hello"), &EventContext::default())
            .await
            .expect("dispatch");
        assert_eq!(result, HandlerResult::Ignored);
    }

    #[test]
    fn default_dispatcher_registers_handlers() {
        let dispatcher = default_dispatcher();
        assert_eq!(dispatcher.handler_count(), 4);
    }
}
