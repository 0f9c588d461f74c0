//! Shared conversation history store
//!
//! One lock guards every conversation. It is held only for appends, snapshots
//! and the trimming that must see the same state as the append before it,
//! never across an upstream call.

use super::models::{ConversationKey, Turn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("System turn for conversation {0} must be the first turn")]
    MisplacedSystemTurn(ConversationKey),
}

/// Append-only turn log keyed by conversation
#[derive(Debug, Default)]
pub struct ConversationHistoryStore {
    conversations: Mutex<HashMap<ConversationKey, Vec<Turn>>>,
}

impl ConversationHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationKey, Vec<Turn>>> {
        // Appends are the only writes, so a poisoned map is still consistent.
        self.conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(
        conversations: &mut HashMap<ConversationKey, Vec<Turn>>,
        key: &ConversationKey,
        turn: Turn,
    ) -> Result<(), HistoryError> {
        let history = conversations.entry(key.clone()).or_default();
        if turn.is_system() && !history.is_empty() {
            return Err(HistoryError::MisplacedSystemTurn(key.clone()));
        }
        history.push(turn);
        Ok(())
    }

    /// Append a turn to the conversation
    pub fn append(&self, key: &ConversationKey, turn: Turn) -> Result<(), HistoryError> {
        let mut conversations = self.lock();
        Self::push(&mut conversations, key, turn)
    }

    /// Append a turn and run `f` over the resulting history without releasing the lock
    pub fn append_then<R>(
        &self,
        key: &ConversationKey,
        turn: Turn,
        f: impl FnOnce(&[Turn]) -> R,
    ) -> Result<R, HistoryError> {
        let mut conversations = self.lock();
        Self::push(&mut conversations, key, turn)?;
        let history = conversations.get(key).map(Vec::as_slice).unwrap_or_default();
        Ok(f(history))
    }

    /// Seed an untouched conversation with initial turns.
    ///
    /// Returns `false` without changes if the conversation already has history.
    pub fn seed(&self, key: &ConversationKey, turns: &[Turn]) -> Result<bool, HistoryError> {
        let mut conversations = self.lock();
        if conversations.get(key).is_some_and(|h| !h.is_empty()) {
            return Ok(false);
        }

        let mut seeded = Vec::with_capacity(turns.len());
        for (index, turn) in turns.iter().enumerate() {
            if turn.is_system() && index > 0 {
                return Err(HistoryError::MisplacedSystemTurn(key.clone()));
            }
            seeded.push(turn.clone());
        }

        debug!(conversation = %key, turns = seeded.len(), "Seeded conversation history");
        conversations.insert(key.clone(), seeded);
        Ok(true)
    }

    /// Copy of the conversation's turns in insertion order
    pub fn snapshot(&self, key: &ConversationKey) -> Vec<Turn> {
        self.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn len(&self, key: &ConversationKey) -> usize {
        self.lock().get(key).map_or(0, Vec::len)
    }

    /// Number of conversations with any history
    pub fn conversation_count(&self) -> usize {
        self.lock().len()
    }
}
