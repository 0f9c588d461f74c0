//! Wire types for the upstream chat completion API

use crate::context::{Role, Turn};
use serde::{Deserialize, Serialize};

/// Error type the upstream reports when it is temporarily out of capacity
pub const OVERLOAD_ERROR_TYPE: &str = "engine_overloaded_error";

/// Request body: `{ messages, stream: false, model }`
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub messages: &'a [Turn],
    pub stream: bool,
    pub model: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
}

/// `{ "error": { "message", "type" } }`
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// A completion returned by the upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub turn: Turn,
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn role(&self) -> Role {
        self.turn.role()
    }

    pub fn content(&self) -> &str {
        self.turn.content()
    }
}

impl From<Choice> for Completion {
    fn from(choice: Choice) -> Self {
        Self {
            turn: Turn::new(choice.message.role, choice.message.content.unwrap_or_default()),
            finish_reason: choice.finish_reason,
        }
    }
}
