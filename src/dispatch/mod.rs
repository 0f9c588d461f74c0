//! Per-conversation dispatch engine

pub mod dispatcher;
pub mod models;
pub mod typing;

pub use dispatcher::{ConversationDispatcher, DispatchError, DispatcherBuilder, DispatcherSettings};
pub use models::{AuthorIdentity, InboundTurn, NoTyping, OutboundReply, ReplySink, TypingIndicator};
pub use typing::TypingGuard;
