//! Answer policies for transports
//!
//! The dispatcher answers everything it is given; transports use a
//! [`ResponsePolicy`] to decide what to forward.

use crate::config::PolicyConfig;
use crate::dispatch::InboundTurn;
use rand::Rng;

pub trait ResponsePolicy: Send + Sync {
    fn should_respond(&self, turn: &InboundTurn) -> bool;
}

/// Forward every message
pub struct AlwaysRespond;

impl ResponsePolicy for AlwaysRespond {
    fn should_respond(&self, _turn: &InboundTurn) -> bool {
        true
    }
}

/// Forward messages that mention a keyword, plus a random share of the rest
pub struct MentionOrChance {
    keywords: Vec<String>,
    probability: f64,
}

impl MentionOrChance {
    pub fn new(keywords: impl IntoIterator<Item = String>, probability: f64) -> Self {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(config.mention_keywords.iter().cloned(), config.reply_probability)
    }

    pub fn mentions(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.keywords.iter().any(|keyword| text.contains(keyword.as_str()))
    }
}

impl ResponsePolicy for MentionOrChance {
    fn should_respond(&self, turn: &InboundTurn) -> bool {
        self.mentions(&turn.text) || rand::thread_rng().gen_bool(self.probability)
    }
}
