//! Upstream completion service

pub mod client;
pub mod models;

pub use client::{
    classify_response, CompletionClient, CompletionError, HttpCompletionClient, Outcome,
    OVERLOAD_REASON,
};
pub use models::{Completion, OVERLOAD_ERROR_TYPE};
