//! Initial prompt turns seeded into new conversations

use super::models::Turn;
use crate::error::{DispatchServiceError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prompt file shape: `{ "messages": [{ "role": ..., "content": ... }] }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSeed {
    #[serde(default)]
    pub messages: Vec<Turn>,
}

impl PromptSeed {
    pub fn new(messages: Vec<Turn>) -> Result<Self> {
        let seed = Self { messages };
        seed.validate()?;
        Ok(seed)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let seed: Self = serde_json::from_str(json)
            .map_err(|e| DispatchServiceError::PromptSeed(format!("invalid prompt JSON: {}", e)))?;
        seed.validate()?;
        Ok(seed)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DispatchServiceError::PromptSeed(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    fn validate(&self) -> Result<()> {
        if self.messages.iter().skip(1).any(Turn::is_system) {
            return Err(DispatchServiceError::PromptSeed(
                "a system message may only appear first".to_string(),
            ));
        }
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prompt_file() {
        let seed = PromptSeed::from_json(
            r#"{"messages": [
                {"role": "system", "content": "You are a grumpy grandmother."},
                {"role": "assistant", "content": "What now?"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(seed.turns().len(), 2);
        assert!(seed.turns()[0].is_system());
    }

    #[test]
    fn test_reject_late_system_message() {
        let result = PromptSeed::from_json(
            r#"{"messages": [
                {"role": "user", "content": "hi"},
                {"role": "system", "content": "rules"}
            ]}"#,
        );
        assert!(matches!(result, Err(DispatchServiceError::PromptSeed(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = PromptSeed::from_file("/nonexistent/prompts.json");
        assert!(result.is_err());
    }
}
