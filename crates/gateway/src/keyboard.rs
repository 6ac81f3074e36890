//! Reply-button keyboards in the channel's wire format.
//!
//! The channel expects PascalCase keys, hence the rename attributes.

use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Keyboard {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(rename = "DefaultHeight")]
    pub default_height: bool,
    #[serde(rename = "Buttons")]
    pub buttons: Vec<Button>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Button {
    #[serde(rename = "Columns")]
    pub columns: u8,
    #[serde(rename = "Rows")]
    pub rows: u8,
    #[serde(rename = "ActionType")]
    pub action_type: String,
    #[serde(rename = "ActionBody")]
    pub action_body: String,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "BgColor")]
    pub bg_color: String,
}

impl Keyboard {
    pub fn new(buttons: Vec<Button>) -> Self {
        Self { kind: "keyboard".to_string(), default_height: false, buttons }
    }
}

/// A full-width button that sends `action_body` back as a user message.
pub fn reply_button(text: &str, action_body: &str) -> Button {
    Button {
        columns: 6,
        rows: 1,
        action_type: "reply".to_string(),
        action_body: action_body.to_string(),
        text: text.to_string(),
        bg_color: "#2db9b9".to_string(),
    }
}
