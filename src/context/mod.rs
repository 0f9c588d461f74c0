//! Conversation context: turns, token accounting, trimming and history
//!
//! Every completion request is built from a window selected out of the shared
//! history under a token budget.

pub mod history;
pub mod models;
pub mod seed;
pub mod token_encoder;
pub mod trimmer;

pub use history::{ConversationHistoryStore, HistoryError};
pub use models::{ConversationKey, Role, Turn, TrimmedWindow};
pub use seed::PromptSeed;
pub use token_encoder::{
    EncodingProfile, TiktokenTokenizer, TokenCounter, TokenEncoder, Tokenizer, TokenizerError,
    WordBasedTokenizer,
};
pub use trimmer::{ContextTrimmer, DEFAULT_BUDGET};
