//! Bounded retry for provider calls
//!
//! Only `Transport` and `RateLimit` failures are retried. Auth and malformed
//! requests fail immediately since repeating them cannot succeed. Each attempt
//! gets the full model timeout; an attempt that runs out of time counts as a
//! transport failure and is retried like one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{AssistantReply, GenerationConfig, ModelProvider};
use crate::conversation::ConversationState;
use crate::error::ProviderError;
use crate::tools::ToolDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), honoring `retry_after`
    pub fn delay_for(&self, attempt: u32, err: &ProviderError) -> Duration {
        if let ProviderError::RateLimit {
            retry_after: Some(wait),
            ..
        } = err
        {
            return (*wait).min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Worst case for [`RetryPolicy::run`] when each attempt is bounded by `per_attempt`
    pub fn total_budget(&self, per_attempt: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        per_attempt
            .saturating_mul(attempts)
            .saturating_add(self.max_delay.saturating_mul(attempts - 1))
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out
    pub async fn run<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        label,
                        attempt,
                        self.max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Provider decorator applying a [`RetryPolicy`] to every `send`
pub struct RetryingProvider {
    inner: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ModelProvider for RetryingProvider {
    async fn send(
        &self,
        conversation: &ConversationState,
        tools: &[ToolDescriptor],
        config: &GenerationConfig,
    ) -> Result<AssistantReply, ProviderError> {
        let per_attempt = self.inner.deadline(config.timeout);
        self.policy
            .run(self.inner.name(), || async move {
                tokio::time::timeout(per_attempt, self.inner.send(conversation, tools, config))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ProviderError::Transport(format!(
                            "model call timed out after {:?}",
                            per_attempt
                        )))
                    })
            })
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn deadline(&self, per_request: Duration) -> Duration {
        self.policy.total_budget(self.inner.deadline(per_request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Turn;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        let err = ProviderError::Transport("x".into());
        assert_eq!(policy.delay_for(1, &err), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, &err), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, &err), Duration::from_secs(4));
        assert_eq!(policy.delay_for(10, &err), Duration::from_secs(30));

        let limited = ProviderError::RateLimit {
            message: "x".into(),
            retry_after: Some(Duration::from_secs(90)),
        };
        assert_eq!(policy.delay_for(1, &limited), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_retries_transport_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::Transport("reset".into()))
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Auth("bad".into()))
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Transport("down".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Stalls on the first call, answers on the rest
    struct StallsOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelProvider for StallsOnce {
        async fn send(
            &self,
            _conversation: &ConversationState,
            _tools: &[ToolDescriptor],
            _config: &GenerationConfig,
        ) -> Result<AssistantReply, ProviderError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(AssistantReply {
                text: "second try".into(),
                ..Default::default()
            })
        }

        fn name(&self) -> &str {
            "stalls"
        }

        fn model(&self) -> &str {
            "once"
        }
    }

    #[tokio::test]
    async fn test_stalled_attempt_is_retried() {
        let inner = Arc::new(StallsOnce { calls: AtomicU32::new(0) });
        let provider = RetryingProvider::new(inner.clone(), fast());
        let config = GenerationConfig {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };

        let conversation = ConversationState::from_turns(vec![Turn::user("hi")]);
        let reply = provider.send(&conversation, &[], &config).await.unwrap();
        assert_eq!(reply.text, "second try");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deadline_covers_every_attempt() {
        let provider = RetryingProvider::new(Arc::new(StallsOnce { calls: AtomicU32::new(0) }), fast());
        // three 100ms attempts plus two capped 5ms waits
        assert_eq!(provider.deadline(Duration::from_millis(100)), Duration::from_millis(310));
    }
}
