use std::sync::Arc;
use std::time::Duration;

use recast_config::InferenceConfig;
use tokio::time::{sleep, timeout};

use crate::conventional::{fallback_message, normalize_message, validate_message};
use crate::{GroupPayload, MessageGenerator};

const BACKOFF_BASE_MS: u64 = 200;
const BACKOFF_MAX_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempt_timeout: Duration,
    pub max_retries: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &InferenceConfig) -> Self {
        Self {
            attempt_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(BACKOFF_MAX_MS),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt as u32).unwrap_or(u32::MAX);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMessage {
    pub message: String,
    /// The keyword fallback produced the message.
    pub fallback: bool,
    pub attempts: usize,
}

/// Wraps a generator with per-attempt timeouts, bounded retries, and a
/// deterministic fallback, so every group always ends up with a message.
pub struct MessageService {
    generator: Arc<dyn MessageGenerator>,
    policy: RetryPolicy,
}

impl MessageService {
    pub fn new(generator: Arc<dyn MessageGenerator>, policy: RetryPolicy) -> Self {
        Self { generator, policy }
    }

    pub async fn message_for(&self, payload: &GroupPayload) -> GeneratedMessage {
        let total_attempts = self.policy.max_retries + 1;

        for attempt in 0..total_attempts {
            match timeout(self.policy.attempt_timeout, self.generator.generate(payload)).await {
                Ok(Ok(raw)) => {
                    if let Some(message) = normalize_message(&raw) {
                        for warning in validate_message(&message) {
                            tracing::warn!(?warning, message = %message, "generated message needs review");
                        }
                        return GeneratedMessage {
                            message,
                            fallback: false,
                            attempts: attempt + 1,
                        };
                    }
                    tracing::warn!(
                        attempt = attempt + 1,
                        total_attempts,
                        "generator returned an empty message"
                    );
                }
                Ok(Err(err)) => {
                    tracing::warn!(
                        error = %err,
                        attempt = attempt + 1,
                        total_attempts,
                        "message generation failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        total_attempts,
                        timeout_secs = self.policy.attempt_timeout.as_secs(),
                        "message generation timed out"
                    );
                }
            }

            if attempt + 1 < total_attempts {
                sleep(self.policy.backoff(attempt)).await;
            }
        }

        let message = fallback_message(&payload.keyword_text());
        tracing::warn!(message = %message, "using fallback commit message");
        GeneratedMessage {
            message,
            fallback: true,
            attempts: total_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use recast_core::{CommitRecord, CommitStatus};

    use super::*;
    use crate::InferError;

    struct FlakyGenerator {
        failures: usize,
        calls: AtomicUsize,
        reply: &'static str,
    }

    #[async_trait]
    impl MessageGenerator for FlakyGenerator {
        async fn generate(&self, _payload: &GroupPayload) -> Result<String, InferError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(InferError::InvalidResponse(format!("failure {call}")));
            }
            Ok(self.reply.to_owned())
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl MessageGenerator for SlowGenerator {
        async fn generate(&self, _payload: &GroupPayload) -> Result<String, InferError> {
            sleep(Duration::from_secs(5)).await;
            Ok("feat: too late".to_owned())
        }
    }

    fn quick_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout: Duration::from_millis(50),
            max_retries,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(2),
        }
    }

    fn payload() -> GroupPayload {
        GroupPayload::from_commits(
            &[CommitRecord {
                hash: "abc123".to_owned(),
                parent_hash: None,
                message: "fix crash on empty input".to_owned(),
                diff_content: "+guard()\n".to_owned(),
                modified_files: vec!["src/lib.rs".to_owned()],
                author: "Dev".to_owned(),
                author_email: "dev@example.com".to_owned(),
                commit_date: 0,
                tree_hash: String::new(),
                status: CommitStatus::Pending,
            }],
            2000,
        )
    }

    #[tokio::test]
    async fn retries_until_the_generator_answers() {
        let generator = Arc::new(FlakyGenerator {
            failures: 2,
            calls: AtomicUsize::new(0),
            reply: "Add guard for empty input",
        });
        let service = MessageService::new(generator.clone(), quick_policy(3));

        let generated = service.message_for(&payload()).await;

        assert_eq!(generated.message, "feat: Add guard for empty input");
        assert!(!generated.fallback);
        assert_eq!(generated.attempts, 3);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_to_payload_keywords() {
        let generator = Arc::new(FlakyGenerator {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
            reply: "",
        });
        let service = MessageService::new(generator.clone(), quick_policy(1));

        let generated = service.message_for(&payload()).await;

        assert_eq!(generated.message, "fix: resolve issues");
        assert!(generated.fallback);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timed_out_attempts_fall_back() {
        let service = MessageService::new(Arc::new(SlowGenerator), quick_policy(0));

        let generated = service.message_for(&payload()).await;

        assert!(generated.fallback);
        assert_eq!(generated.attempts, 1);
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            attempt_timeout: Duration::from_secs(1),
            max_retries: 5,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_millis(2_000),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
        assert_eq!(policy.backoff(10), Duration::from_millis(2_000));
    }
}
