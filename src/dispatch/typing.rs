//! Typing indicator loop scoped to a single completion request

use super::models::TypingIndicator;
use crate::context::ConversationKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

/// Refreshes the typing hint every `period` until stopped or dropped.
///
/// The first hint is sent one period after start.
pub struct TypingGuard {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TypingGuard {
    pub fn start(
        indicator: Arc<dyn TypingIndicator>,
        key: ConversationKey,
        period: Duration,
    ) -> Self {
        let token = CancellationToken::new();

        // A zero period would make the interval panic.
        if period.is_zero() {
            return Self { token, handle: None };
        }

        let cancelled = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = indicator.typing(&key) => {}
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingIndicator {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl TypingIndicator for CountingIndicator {
        async fn typing(&self, _key: &ConversationKey) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_ticks_until_stopped() {
        let indicator = Arc::new(CountingIndicator::default());
        let guard = TypingGuard::start(
            indicator.clone(),
            ConversationKey::from("k"),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        guard.stop().await;
        let after_stop = indicator.ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(indicator.ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_drop_cancels_loop() {
        let indicator = Arc::new(CountingIndicator::default());
        let guard = TypingGuard::start(
            indicator.clone(),
            ConversationKey::from("k"),
            Duration::from_millis(10),
        );
        drop(guard);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(indicator.ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_period_never_ticks() {
        let indicator = Arc::new(CountingIndicator::default());
        let guard = TypingGuard::start(indicator.clone(), ConversationKey::from("k"), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;
        guard.stop().await;
        assert_eq!(indicator.ticks.load(Ordering::SeqCst), 0);
    }
}
