//! Conversation dispatch engine
//!
//! Routes multi-user chat turns into per-conversation pipelines that call an
//! external completion service while keeping each request inside a token budget.
//!
//! - [`context`]: turn model, token encoding, budget trimming, shared history store
//! - [`completion`]: upstream completion client and outcome classification
//! - [`dispatch`]: per-conversation single-flight workers
//! - [`policy`]: pluggable "should we answer" predicates for transports

pub mod completion;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod policy;

pub use error::{DispatchServiceError, Result};
