//! 指数バックオフ+ジッター（Full Jitter）付きでタガー呼び出しを再試行するラッパー。
//!
//! パイプライン本体は再試行しない。接続断を許容したい呼び出し側だけが
//! 任意のタガーをこの型で包む。
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use super::{TaggedText, Tagger};
use crate::error::{ErrorKind, Result};

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// 最大試行回数（初回を含む）
    pub max_attempts: usize,
    /// ベースとなる遅延時間（ミリ秒）
    pub base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 10000,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub const fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// 指定された試行回数に対する遅延時間を計算する（Full Jitter戦略）。
    ///
    /// # Arguments
    /// * `attempt` - 試行回数（0から開始）
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        // 指数バックオフ: base * 2^(attempt-1)
        let shift = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
        let exponential_delay = self
            .base_delay_ms
            .saturating_mul(1_u64.checked_shl(shift).unwrap_or(u64::MAX));

        let capped_delay = exponential_delay.min(self.max_delay_ms);

        let jittered_delay = if capped_delay > 0 {
            rand::rng().random_range(0..=capped_delay)
        } else {
            0
        };

        Duration::from_millis(jittered_delay)
    }

    /// この試行回数が再試行可能かどうかを判定する。
    #[must_use]
    pub const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

/// 接続断（[`ErrorKind::Retryable`]）のみを再試行するタガー。
#[derive(Debug, Clone)]
pub struct RetryingTagger<T> {
    inner: T,
    config: RetryConfig,
}

impl<T: Tagger> RetryingTagger<T> {
    #[must_use]
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn run<'a, R, F, Fut>(&'a self, operation: &'static str, mut call: F) -> Result<R>
    where
        F: FnMut(&'a T) -> Fut,
        Fut: std::future::Future<Output = Result<R>>,
    {
        let mut attempt = 0;
        loop {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match call(&self.inner).await {
                Ok(value) => return Ok(value),
                Err(error)
                    if error.kind() == ErrorKind::Retryable
                        && self.config.can_retry(attempt + 1) =>
                {
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.config.max_attempts,
                        error = %error,
                        "tagger call failed, retrying"
                    );
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[async_trait]
impl<T: Tagger> Tagger for RetryingTagger<T> {
    async fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        self.run("tokenize", |inner| inner.tokenize(text)).await
    }

    async fn tag_parts_of_speech(&self, text: &str) -> Result<TaggedText> {
        self.run("tag_parts_of_speech", |inner| inner.tag_parts_of_speech(text))
            .await
    }

    async fn split_sentences(&self, text: &str) -> Result<Vec<String>> {
        self.run("split_sentences", |inner| inner.split_sentences(text))
            .await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::PipelineError;

    #[test]
    fn delay_for_attempt_zero_is_zero() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(0));
    }

    #[test]
    fn delay_for_attempt_respects_max_delay() {
        let config = RetryConfig::new(10, 100, 500);
        assert!(config.delay_for_attempt(10) <= Duration::from_millis(500));
        assert!(config.delay_for_attempt(80) <= Duration::from_millis(500));
    }

    #[test]
    fn can_retry_respects_max_attempts() {
        let config = RetryConfig::new(3, 100, 1000);
        assert!(config.can_retry(2));
        assert!(!config.can_retry(3));
    }

    /// 最初の `failures` 回だけ接続断を返すタガー。
    struct FlakyTagger {
        failures: usize,
        calls: AtomicUsize,
        kind_unavailable: bool,
    }

    #[async_trait]
    impl Tagger for FlakyTagger {
        async fn tokenize(&self, _text: &str) -> Result<Vec<String>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                if self.kind_unavailable {
                    return Err(PipelineError::TaggerUnavailable {
                        endpoint: "test".into(),
                        reason: "refused".into(),
                    });
                }
                return Err(PipelineError::Tagger("bad".into()));
            }
            Ok(vec!["ok".into()])
        }

        async fn tag_parts_of_speech(&self, _text: &str) -> Result<TaggedText> {
            Ok(TaggedText::default())
        }

        async fn split_sentences(&self, _text: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn retries_unavailable_until_success() {
        let tagger = RetryingTagger::new(
            FlakyTagger {
                failures: 2,
                calls: AtomicUsize::new(0),
                kind_unavailable: true,
            },
            RetryConfig::new(3, 1, 2),
        );
        let tokens = tagger.tokenize("x").await.expect("third attempt succeeds");
        assert_eq!(tokens, vec!["ok"]);
        assert_eq!(tagger.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let tagger = RetryingTagger::new(
            FlakyTagger {
                failures: 5,
                calls: AtomicUsize::new(0),
                kind_unavailable: true,
            },
            RetryConfig::new(2, 1, 2),
        );
        let error = tagger.tokenize("x").await.expect_err("should give up");
        assert!(error.is_tagger_unavailable());
        assert_eq!(tagger.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_malformed_responses() {
        let tagger = RetryingTagger::new(
            FlakyTagger {
                failures: 1,
                calls: AtomicUsize::new(0),
                kind_unavailable: false,
            },
            RetryConfig::new(3, 1, 2),
        );
        assert!(tagger.tokenize("x").await.is_err());
        assert_eq!(tagger.inner.calls.load(Ordering::SeqCst), 1);
    }
}
