//! Per-conversation single-flight dispatch
//!
//! Every conversation gets one worker task and one bounded FIFO queue, both
//! created on its first inbound turn. The worker handles one turn at a time:
//!
//! 1. append the user turn and trim the window under the history lock
//! 2. request a completion (typing hint running meanwhile)
//! 3. on overload, back off and resubmit the same window once
//! 4. record the assistant turn and hand the reply to the transport

use super::models::{InboundTurn, NoTyping, OutboundReply, ReplySink, TypingIndicator};
use super::typing::TypingGuard;
use crate::completion::{Completion, CompletionClient, Outcome};
use crate::config::Config;
use crate::context::{
    ContextTrimmer, ConversationHistoryStore, ConversationKey, HistoryError, PromptSeed,
    TrimmedWindow, Turn,
};
use crate::metrics::METRICS;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Worker for conversation {0} has stopped")]
    WorkerStopped(ConversationKey),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Tunables for the dispatch path
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub budget: usize,
    pub queue_capacity: usize,
    pub retry_backoff: Duration,
    pub typing_interval: Duration,
    pub reply_depth_threshold: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DispatcherSettings {
    fn from(config: &Config) -> Self {
        Self {
            budget: config.context.budget,
            queue_capacity: config.dispatch.queue_capacity.max(1),
            retry_backoff: config.dispatch.retry_backoff(),
            typing_interval: config.dispatch.typing_interval(),
            reply_depth_threshold: config.dispatch.reply_depth_threshold,
        }
    }
}

/// Request lifecycle of one turn
enum RequestState {
    Running { retried: bool },
    Backoff,
}

struct ConversationQueue {
    sender: mpsc::Sender<InboundTurn>,
    pending: Arc<AtomicUsize>,
}

struct DispatcherInner {
    history: Arc<ConversationHistoryStore>,
    trimmer: ContextTrimmer,
    client: Arc<dyn CompletionClient>,
    sink: Arc<dyn ReplySink>,
    typing: Arc<dyn TypingIndicator>,
    seed: PromptSeed,
    settings: DispatcherSettings,
    queues: DashMap<ConversationKey, ConversationQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Builder for [`ConversationDispatcher`]
pub struct DispatcherBuilder {
    history: Arc<ConversationHistoryStore>,
    trimmer: ContextTrimmer,
    client: Arc<dyn CompletionClient>,
    sink: Arc<dyn ReplySink>,
    typing: Arc<dyn TypingIndicator>,
    seed: PromptSeed,
    settings: DispatcherSettings,
}

impl DispatcherBuilder {
    pub fn typing(mut self, typing: Arc<dyn TypingIndicator>) -> Self {
        self.typing = typing;
        self
    }

    /// Turns seeded into every conversation before its first user turn
    pub fn seed(mut self, seed: PromptSeed) -> Self {
        self.seed = seed;
        self
    }

    pub fn settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> ConversationDispatcher {
        ConversationDispatcher {
            inner: Arc::new(DispatcherInner {
                history: self.history,
                trimmer: self.trimmer,
                client: self.client,
                sink: self.sink,
                typing: self.typing,
                seed: self.seed,
                settings: self.settings,
                queues: DashMap::new(),
                workers: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Routes inbound turns to per-conversation workers
#[derive(Clone)]
pub struct ConversationDispatcher {
    inner: Arc<DispatcherInner>,
}

impl ConversationDispatcher {
    pub fn builder(
        history: Arc<ConversationHistoryStore>,
        trimmer: ContextTrimmer,
        client: Arc<dyn CompletionClient>,
        sink: Arc<dyn ReplySink>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            history,
            trimmer,
            client,
            sink,
            typing: Arc::new(NoTyping),
            seed: PromptSeed::default(),
            settings: DispatcherSettings::default(),
        }
    }

    pub fn history(&self) -> &Arc<ConversationHistoryStore> {
        &self.inner.history
    }

    /// Queue a turn for its conversation, starting the worker on first use.
    ///
    /// Waits while the conversation's queue is full.
    pub async fn dispatch(&self, inbound: InboundTurn) -> Result<(), DispatchError> {
        let key = inbound.conversation_key.clone();
        let (sender, pending) = self.queue_for(&key)?;

        pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(inbound).await.is_err() {
            pending.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::WorkerStopped(key));
        }

        METRICS.turns_enqueued.inc();
        debug!(conversation = %key, pending = pending.load(Ordering::SeqCst), "Turn enqueued");
        Ok(())
    }

    /// Turns waiting behind the one in flight
    pub fn pending(&self, key: &ConversationKey) -> usize {
        self.inner
            .queues
            .get(key)
            .map_or(0, |queue| queue.pending.load(Ordering::SeqCst))
    }

    /// Conversations with a running worker
    pub fn conversation_count(&self) -> usize {
        self.inner.queues.len()
    }

    /// Close every queue and wait for the workers to drain what is already queued
    pub async fn shutdown(&self) {
        self.inner.queues.clear();
        let workers = {
            let mut workers = self
                .inner
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *workers)
        };

        info!(workers = workers.len(), "Draining conversation workers");
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("Conversation worker ended abnormally: {}", e);
            }
        }
    }

    fn queue_for(
        &self,
        key: &ConversationKey,
    ) -> Result<(mpsc::Sender<InboundTurn>, Arc<AtomicUsize>), DispatchError> {
        if let Some(queue) = self.inner.queues.get(key) {
            return Ok((queue.sender.clone(), queue.pending.clone()));
        }

        let queue = self
            .inner
            .queues
            .entry(key.clone())
            .or_try_insert_with(|| self.spawn_worker(key))?;
        Ok((queue.sender.clone(), queue.pending.clone()))
    }

    fn spawn_worker(&self, key: &ConversationKey) -> Result<ConversationQueue, DispatchError> {
        if !self.inner.seed.is_empty() {
            self.inner.history.seed(key, self.inner.seed.turns())?;
        }

        let (sender, receiver) = mpsc::channel(self.inner.settings.queue_capacity);
        let pending = Arc::new(AtomicUsize::new(0));

        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.inner),
            key.clone(),
            receiver,
            Arc::clone(&pending),
        ));
        self.inner
            .workers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);

        Ok(ConversationQueue { sender, pending })
    }
}

async fn run_worker(
    inner: Arc<DispatcherInner>,
    key: ConversationKey,
    mut receiver: mpsc::Receiver<InboundTurn>,
    pending: Arc<AtomicUsize>,
) {
    METRICS.active_conversations.inc();
    info!(conversation = %key, "Conversation worker started");

    while let Some(inbound) = receiver.recv().await {
        pending.fetch_sub(1, Ordering::SeqCst);
        inner.process(inbound, &pending).await;
    }

    METRICS.active_conversations.dec();
    info!(conversation = %key, "Conversation worker stopped");
}

impl DispatcherInner {
    async fn process(&self, inbound: InboundTurn, pending: &AtomicUsize) {
        let key = &inbound.conversation_key;
        let waited = Utc::now() - inbound.received_at;
        debug!(
            conversation = %key,
            message_id = inbound.message_id,
            waited_ms = waited.num_milliseconds(),
            "Processing turn"
        );

        let budget = self.settings.budget;
        let selection = self.history.append_then(key, Turn::user(inbound.render()), |history| {
            (history.len(), self.trimmer.select(history, budget))
        });
        let (history_len, window) = match selection {
            Ok(selection) => selection,
            Err(e) => {
                error!(conversation = %key, "Failed to record user turn: {}", e);
                return;
            }
        };
        METRICS.record_window(window.tokens(), history_len, window.len());

        let start = Instant::now();
        let typing = TypingGuard::start(
            Arc::clone(&self.typing),
            key.clone(),
            self.settings.typing_interval,
        );
        let completion = self.complete(key, &window).await;
        typing.stop().await;

        let Some(completion) = completion else {
            return;
        };

        if let Err(e) = self.history.append(key, completion.turn.clone()) {
            warn!(conversation = %key, "Failed to record assistant turn: {}", e);
        }

        let depth = pending.load(Ordering::SeqCst);
        let reply = OutboundReply {
            conversation_key: key.clone(),
            text: completion.turn.content().to_string(),
            in_reply_to_message_id: (depth > self.settings.reply_depth_threshold)
                .then_some(inbound.message_id),
        };

        match self.sink.deliver(reply).await {
            Ok(()) => {
                METRICS.record_reply(true);
                info!(
                    conversation = %key,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    pending = depth,
                    "Reply sent"
                );
            }
            Err(e) => {
                METRICS.record_reply(false);
                warn!(conversation = %key, "Reply delivery failed: {}", e);
            }
        }
    }

    /// Request a completion, resubmitting the unchanged window once after an overload
    async fn complete(&self, key: &ConversationKey, window: &TrimmedWindow) -> Option<Completion> {
        let mut state = RequestState::Running { retried: false };
        loop {
            state = match state {
                RequestState::Running { retried } => match self.client.request(window).await {
                    Outcome::Success(completion) => return Some(completion),
                    Outcome::Retryable { reason } if !retried => {
                        warn!(
                            conversation = %key,
                            backoff_ms = self.settings.retry_backoff.as_millis() as u64,
                            "Upstream {}, retrying once",
                            reason
                        );
                        RequestState::Backoff
                    }
                    Outcome::Retryable { reason } => {
                        error!(conversation = %key, "Upstream {} after retry, dropping turn", reason);
                        return None;
                    }
                    Outcome::Fatal { cause } => {
                        error!(conversation = %key, "Completion failed: {}", cause);
                        return None;
                    }
                },
                RequestState::Backoff => {
                    tokio::time::sleep(self.settings.retry_backoff).await;
                    METRICS.completion_retries.inc();
                    RequestState::Running { retried: true }
                }
            };
        }
    }
}
