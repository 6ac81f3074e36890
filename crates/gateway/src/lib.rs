//! Messaging-channel integration - webhook bot interface
//!
//! This crate provides the channel-facing surface for handoff:
//! - **Events** (`events`) - Webhook payload parsing and dispatch to handlers
//! - **Client** (`client`) - REST client for sending messages and webhook setup
//! - **Keyboard** (`keyboard`) - Reply-button builders for rich messages
//! - **Replies** (`replies`) - Canned bot replies and hand-off notifications
//!
//! # Getting Started
//!
//! 1. Create a bot in your channel's admin console and copy its auth token
//! 2. Set `HANDOFF_CHANNEL_AUTH_TOKEN` and `HANDOFF_CHANNEL_WEBHOOK_URL`
//! 3. Run the server; it registers the webhook on startup
//!
//! # Architecture
//!
//! ```text
//! Webhook POST → parse_envelope → EventDispatcher → Handlers → HandoffService
//!                                                      ↓
//!                                         ChannelApiClient ← Reply
//! ```

pub mod client;
pub mod events;
pub mod keyboard;
pub mod replies;
