use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use handoff_core::domain::user::UserId;

use crate::replies::OutboundReply;

const AUTH_HEADER: &str = "X-Viber-Auth-Token";
const WEBHOOK_EVENT_TYPES: &[&str] =
    &["subscribed", "unsubscribed", "conversation_started", "message"];

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("channel request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("channel rejected the request (status {status}): {message}")]
    Api { status: i64, message: String },
}

/// Outbound side of the channel. The REST client implements this for
/// production; `NoopGateway` swallows messages for tests and the CLI.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn send_reply(&self, user_id: &UserId, reply: &OutboundReply) -> Result<(), GatewayError>;

    /// Registers the webhook URL with the channel. The channel answers the
    /// registration with a probe callback to the same URL.
    async fn register_webhook(&self, webhook_url: &str) -> Result<(), GatewayError>;
}

pub struct ChannelApiClient {
    http: reqwest::Client,
    api_base_url: String,
    auth_token: SecretString,
    sender_name: String,
}

impl ChannelApiClient {
    pub fn new(api_base_url: String, auth_token: SecretString, sender_name: String) -> Self {
        Self { http: reqwest::Client::new(), api_base_url, auth_token, sender_name }
    }
}

#[async_trait]
impl MessageGateway for ChannelApiClient {
    async fn send_reply(&self, user_id: &UserId, reply: &OutboundReply) -> Result<(), GatewayError> {
        let payload = message_payload(&user_id.0, &self.sender_name, reply);

        debug!(event_name = "gateway.send_message", user_id = %user_id, "sending channel message");
        let response = self
            .http
            .post(format!("{}/send_message", self.api_base_url))
            .header(AUTH_HEADER, self.auth_token.expose_secret())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        check_api_status(response.json::<Value>().await?)
    }

    async fn register_webhook(&self, webhook_url: &str) -> Result<(), GatewayError> {
        let payload = json!({
            "url": webhook_url,
            "event_types": WEBHOOK_EVENT_TYPES,
            "send_name": true,
        });

        let response = self
            .http
            .post(format!("{}/set_webhook", self.api_base_url))
            .header(AUTH_HEADER, self.auth_token.expose_secret())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        check_api_status(response.json::<Value>().await?)
    }
}

// The API reports failures in-band: status 0 means delivered.
fn check_api_status(body: Value) -> Result<(), GatewayError> {
    let status = body.get("status").and_then(Value::as_i64).unwrap_or(-1);
    if status == 0 {
        return Ok(());
    }

    let message = body
        .get("status_message")
        .and_then(Value::as_str)
        .unwrap_or("no status message")
        .to_string();
    Err(GatewayError::Api { status, message })
}

fn message_payload(receiver: &str, sender_name: &str, reply: &OutboundReply) -> Value {
    let mut payload = json!({
        "receiver": receiver,
        "min_api_version": 1,
        "sender": { "name": sender_name },
        "type": "text",
        "text": reply.text,
    });

    if let Some(keyboard) = &reply.keyboard {
        payload["keyboard"] = serde_json::to_value(keyboard).unwrap_or(Value::Null);
    }

    payload
}

/// Drops every message. Used when no channel credentials are configured.
#[derive(Default)]
pub struct NoopGateway;

#[async_trait]
impl MessageGateway for NoopGateway {
    async fn send_reply(&self, user_id: &UserId, _reply: &OutboundReply) -> Result<(), GatewayError> {
        warn!(event_name = "gateway.noop_send", user_id = %user_id, "dropping message, no channel client configured");
        Ok(())
    }

    async fn register_webhook(&self, webhook_url: &str) -> Result<(), GatewayError> {
        warn!(event_name = "gateway.noop_register_webhook", webhook_url = %webhook_url, "skipping webhook registration, no channel client configured");
        Ok(())
    }
}
