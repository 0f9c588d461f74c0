//! Token encoding of turn sequences
//!
//! Turns are rendered into the chat wire format the upstream service accounts
//! against and then handed to a byte-pair tokenizer:
//!
//! ```text
//! <|im_start|>{role}{ROLE_SEP}{content}<|im_end|>{MSG_SEP}...<|im_start|>assistant{ROLE_SEP}
//! ```

use super::models::Turn;
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::{cl100k_base, CoreBPE};
use tracing::warn;

const START: &str = "<|im_start|>";
const END: &str = "<|im_end|>";

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("Failed to initialize tokenizer: {0}")]
    Initialization(String),
}

/// Byte-pair tokenizer seam
pub trait Tokenizer: Send + Sync {
    /// Number of tokens the text encodes to
    fn count(&self, text: &str) -> usize;
}

/// Tiktoken-based tokenizer using cl100k_base (GPT-4, GPT-3.5-turbo)
pub struct TiktokenTokenizer {
    bpe: Arc<CoreBPE>,
}

impl TiktokenTokenizer {
    pub fn new() -> Result<Self, TokenizerError> {
        let bpe = cl100k_base().map_err(|e| TokenizerError::Initialization(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count(&self, text: &str) -> usize {
        // Chat markers are counted as ordinary text, never as special tokens.
        self.bpe.encode_ordinary(text).len()
    }
}

/// Word-based tokenizer (fallback, ~1.3 tokens per word)
pub struct WordBasedTokenizer {
    tokens_per_word: f64,
}

impl WordBasedTokenizer {
    pub fn new(tokens_per_word: f64) -> Self {
        Self { tokens_per_word }
    }
}

impl Default for WordBasedTokenizer {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl Tokenizer for WordBasedTokenizer {
    fn count(&self, text: &str) -> usize {
        let word_count = text.split_whitespace().count();
        (word_count as f64 * self.tokens_per_word).ceil() as usize
    }
}

/// Separator profile, selected by target model family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncodingProfile {
    /// GPT-4 class models
    #[default]
    ChatMl,
    /// GPT-3.5 class models
    Legacy,
}

impl EncodingProfile {
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.starts_with("gpt-3.5") || model.starts_with("gpt-35") {
            EncodingProfile::Legacy
        } else {
            EncodingProfile::ChatMl
        }
    }

    pub fn message_separator(&self) -> &'static str {
        match self {
            EncodingProfile::ChatMl => "",
            EncodingProfile::Legacy => "\n",
        }
    }

    pub fn role_separator(&self) -> &'static str {
        match self {
            EncodingProfile::ChatMl => "<|im_sep|>",
            EncodingProfile::Legacy => "\n",
        }
    }
}

/// Anything that can price a sequence of turns in tokens
pub trait TokenCounter: Send + Sync {
    fn count_turns(&self, turns: &[Turn]) -> usize;
}

/// Deterministic turn-sequence encoder
#[derive(Clone)]
pub struct TokenEncoder {
    tokenizer: Arc<dyn Tokenizer>,
    profile: EncodingProfile,
}

impl TokenEncoder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, profile: EncodingProfile) -> Self {
        Self { tokenizer, profile }
    }

    /// Encoder for the given model, falling back to word counting if the BPE
    /// tables cannot be loaded
    pub fn for_model(model: &str) -> Self {
        let tokenizer: Arc<dyn Tokenizer> = TiktokenTokenizer::new()
            .map(|t| Arc::new(t) as Arc<dyn Tokenizer>)
            .unwrap_or_else(|e| {
                warn!("Tiktoken initialization failed ({}), falling back to word counting", e);
                Arc::new(WordBasedTokenizer::default())
            });
        Self::new(tokenizer, EncodingProfile::for_model(model))
    }

    pub fn profile(&self) -> EncodingProfile {
        self.profile
    }

    /// Render turns into the serialized prompt text
    pub fn render(&self, turns: &[Turn]) -> String {
        let role_sep = self.profile.role_separator();
        let rendered: Vec<String> = turns
            .iter()
            .map(|turn| format!("{START}{}{role_sep}{}{END}", turn.role(), turn.content()))
            .collect();

        format!(
            "{}{START}assistant{role_sep}",
            rendered.join(self.profile.message_separator())
        )
    }

    /// Token count of the rendered turns; zero for an empty sequence
    pub fn encode(&self, turns: &[Turn]) -> usize {
        if turns.is_empty() {
            return 0;
        }
        self.tokenizer.count(&self.render(turns))
    }
}

impl TokenCounter for TokenEncoder {
    fn count_turns(&self, turns: &[Turn]) -> usize {
        self.encode(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTokenizer {
        calls: AtomicUsize,
    }

    impl Tokenizer for CountingTokenizer {
        fn count(&self, text: &str) -> usize {
            self.calls.fetch_add(1, Ordering::SeqCst);
            text.len()
        }
    }

    fn tiktoken_encoder(profile: EncodingProfile) -> TokenEncoder {
        TokenEncoder::new(Arc::new(TiktokenTokenizer::new().unwrap()), profile)
    }

    #[test]
    fn test_render_chatml_profile() {
        let encoder = tiktoken_encoder(EncodingProfile::ChatMl);
        let rendered = encoder.render(&[Turn::system("S"), Turn::user("hi")]);
        assert_eq!(
            rendered,
            "<|im_start|>system<|im_sep|>S<|im_end|><|im_start|>user<|im_sep|>hi<|im_end|><|im_start|>assistant<|im_sep|>"
        );
    }

    #[test]
    fn test_render_legacy_profile() {
        let encoder = tiktoken_encoder(EncodingProfile::Legacy);
        let rendered = encoder.render(&[Turn::system("S"), Turn::user("hi")]);
        assert_eq!(
            rendered,
            "<|im_start|>system\nS<|im_end|>\n<|im_start|>user\nhi<|im_end|><|im_start|>assistant\n"
        );
    }

    #[test]
    fn test_empty_sequence_skips_tokenizer() {
        for profile in [EncodingProfile::ChatMl, EncodingProfile::Legacy] {
            let tokenizer = Arc::new(CountingTokenizer {
                calls: AtomicUsize::new(0),
            });
            let encoder = TokenEncoder::new(tokenizer.clone(), profile);
            assert_eq!(encoder.encode(&[]), 0);
            assert_eq!(tokenizer.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_tiktoken_counts_are_deterministic() {
        let encoder = tiktoken_encoder(EncodingProfile::ChatMl);
        let turns = vec![Turn::user("Hello, world! This is a test.")];
        let first = encoder.encode(&turns);
        assert!(first > 0);
        assert_eq!(first, encoder.encode(&turns));
    }

    #[test]
    fn test_longer_history_costs_more() {
        let encoder = tiktoken_encoder(EncodingProfile::Legacy);
        let one = encoder.encode(&[Turn::user("hello there")]);
        let two = encoder.encode(&[Turn::user("hello there"), Turn::assistant("general kenobi")]);
        assert!(two > one);
    }

    #[test]
    fn test_profile_for_model() {
        assert_eq!(EncodingProfile::for_model("gpt-4"), EncodingProfile::ChatMl);
        assert_eq!(EncodingProfile::for_model("gpt-3.5-turbo"), EncodingProfile::Legacy);
        assert_eq!(EncodingProfile::for_model("GPT-35-turbo"), EncodingProfile::Legacy);
    }

    #[test]
    fn test_word_based_tokenizer() {
        let tokenizer = WordBasedTokenizer::default();
        assert_eq!(tokenizer.count("Hello world test"), 4); // 3 words * 1.3 = 3.9 -> 4
    }
}
