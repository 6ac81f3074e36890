//! Canned bot replies and hand-off notification texts.

use handoff_core::handoff::EscalationResult;

use crate::keyboard::{reply_button, Keyboard};

const ESCALATION_KEYWORDS: &[&str] = &["agent", "human", "representative"];
const END_KEYWORDS: &[&str] = &["end chat", "close chat", "goodbye"];
const QUEUE_KEYWORDS: &[&str] = &["queue", "position", "how long"];

/// A reply ready for the channel client: text plus an optional button
/// keyboard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl OutboundReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), keyboard: None }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self { text: text.into(), keyboard: Some(keyboard) }
    }
}

/// True when the message asks for a person rather than the bot.
pub fn wants_human(text: &str) -> bool {
    let normalized = text.to_lowercase();
    ESCALATION_KEYWORDS.iter().any(|keyword| normalized.contains(keyword))
}

pub fn wants_to_end(text: &str) -> bool {
    let normalized = text.to_lowercase();
    END_KEYWORDS.iter().any(|keyword| normalized.contains(keyword))
}

/// True when the user asks how far along their wait is.
pub fn wants_queue_status(text: &str) -> bool {
    let normalized = text.to_lowercase();
    QUEUE_KEYWORDS.iter().any(|keyword| normalized.contains(keyword))
}

pub fn welcome_reply(user_name: &str) -> OutboundReply {
    let greeting = if user_name.trim().is_empty() {
        "Welcome to support!".to_string()
    } else {
        format!("Welcome to support, {user_name}!")
    };
    OutboundReply::with_keyboard(
        format!("{greeting} I can answer common questions, or connect you with a person. How can I help?"),
        main_menu(),
    )
}

/// Keyword replies for ordinary chatter. Anything unrecognized falls back
/// to the menu.
pub fn canned_reply(text: &str) -> OutboundReply {
    let normalized = text.trim().to_lowercase();

    if normalized.starts_with("hello") || normalized.starts_with("hi") {
        return OutboundReply::text("Hello! How can I help you today?");
    }
    if normalized.contains("help") {
        return OutboundReply::with_keyboard(
            "Here is what I can do. Pick an option, or type \"agent\" to talk to a person.",
            main_menu(),
        );
    }
    if normalized.contains("hours") {
        return OutboundReply::text("Our support team is available every day from 09:00 to 21:00.");
    }

    OutboundReply::with_keyboard(
        "I did not quite get that. You can pick an option below, or type \"agent\" to reach a person.",
        main_menu(),
    )
}

pub fn escalation_reply(outcome: &EscalationResult) -> OutboundReply {
    match outcome {
        EscalationResult::Assigned { .. } => OutboundReply::text(
            "You are connected! A support agent will be with you in a moment.",
        ),
        EscalationResult::Queued { position, .. } => OutboundReply::text(format!(
            "All of our agents are currently busy. You are number {position} in the queue; \
             someone will pick up your chat as soon as they are free."
        )),
        EscalationResult::Failed { .. } => OutboundReply::text(
            "We could not reach the support desk right now. Please try again in a few minutes.",
        ),
    }
}

pub fn queue_status_reply(position: Option<usize>) -> OutboundReply {
    match position {
        Some(position) => OutboundReply::text(format!(
            "You are number {position} in the queue. An agent will pick up your chat as soon as one is free."
        )),
        None => OutboundReply::text(
            "You are not waiting in the queue right now. Type \"agent\" if you would like to talk to a person.",
        ),
    }
}

pub fn end_conversation_reply(ended: bool) -> OutboundReply {
    if ended {
        OutboundReply::text("Thanks for chatting with us. The conversation is now closed.")
    } else {
        OutboundReply::text("There is no open conversation to close. Is there anything else I can help with?")
    }
}

pub fn agent_assigned_text(agent_name: &str) -> String {
    format!("{agent_name} has joined the chat and will assist you from here.")
}

pub fn queued_text(position: usize) -> String {
    format!("Your request is in the queue at position {position}. We will notify you when an agent is free.")
}

pub fn conversation_closed_text() -> String {
    "Your conversation has been closed. Message us any time if you need more help.".to_string()
}

pub fn request_expired_text() -> String {
    "We are sorry for the wait. No agent could take your chat in time, so the request was closed. \
     Please try again later."
        .to_string()
}

fn main_menu() -> Keyboard {
    Keyboard::new(vec![
        reply_button("Talk to an agent", "agent"),
        reply_button("Support hours", "hours"),
        reply_button("Help", "help"),
    ])
}

#[cfg(test)]
mod tests {
    use handoff_core::domain::agent::AgentId;
    use handoff_core::domain::ticket::TicketId;
    use handoff_core::handoff::EscalationResult;

    use super::{
        canned_reply, escalation_reply, queue_status_reply, wants_human, wants_queue_status,
        wants_to_end,
    };

    #[test]
    fn human_detection_is_case_insensitive_and_keyword_based() {
        assert!(wants_human("I need a HUMAN"));
        assert!(wants_human("connect me with a representative please"));
        assert!(wants_human("agent"));
        assert!(!wants_human("what are your hours?"));
    }

    #[test]
    fn end_detection_matches_closing_phrases() {
        assert!(wants_to_end("ok, end chat"));
        assert!(wants_to_end("Goodbye!"));
        assert!(!wants_to_end("hello"));
    }

    #[test]
    fn queue_status_detection_and_replies() {
        assert!(wants_queue_status("what is my queue position?"));
        assert!(wants_queue_status("HOW LONG until someone picks up"));
        assert!(!wants_queue_status("hello"));

        assert!(queue_status_reply(Some(2)).text.contains("number 2"));
        assert!(queue_status_reply(None).text.contains("not waiting"));
    }

    #[test]
    fn queued_reply_carries_the_position() {
        let reply = escalation_reply(&EscalationResult::Queued {
            ticket_id: TicketId("ticket-1".to_string()),
            position: 3,
        });
        assert!(reply.text.contains("number 3"));
    }

    #[test]
    fn assigned_reply_promises_an_agent() {
        let reply = escalation_reply(&EscalationResult::Assigned {
            ticket_id: TicketId("ticket-1".to_string()),
            agent_id: AgentId("agent-a".to_string()),
        });
        assert!(reply.text.contains("connected"));
    }

    #[test]
    fn unknown_chatter_falls_back_to_the_menu() {
        let reply = canned_reply("qwerty");
        assert!(reply.keyboard.is_some());
    }
}
