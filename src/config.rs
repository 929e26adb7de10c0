use std::{env, num::NonZeroUsize, time::Duration};

use thiserror::Error;

use crate::cluster::{ClusterParams, RemoteClusterConfig};
use crate::feature::BuilderOptions;
use crate::selection::DEFAULT_BERNOULLI_P;
use crate::tagger::{CoreNlpConfig, RetryConfig};

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    tagger_url: String,
    tagger_connect_timeout: Duration,
    tagger_total_timeout: Duration,
    tagger_max_bytes: NonZeroUsize,
    tagger_max_retries: usize,
    tagger_backoff_base_ms: u64,
    tagger_backoff_cap_ms: u64,
    workers: NonZeroUsize,
    vocab_cap: Option<NonZeroUsize>,
    variance_p: f64,
    char_ngram: NonZeroUsize,
    kmeans_max_iter: NonZeroUsize,
    seed: Option<u64>,
    cluster_url: Option<String>,
    cluster_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から設定値を読み込み、検証する。未設定の値は既定値を使う。
    ///
    /// # Errors
    /// 数値のパースや範囲の検証に失敗した場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        // Tagger (CoreNLP) settings
        let tagger_url = env::var("AUTHOR_CLUSTER_TAGGER_URL")
            .unwrap_or_else(|_| "http://localhost:8011".to_string());
        let tagger_connect_timeout =
            parse_duration_ms("AUTHOR_CLUSTER_TAGGER_CONNECT_TIMEOUT_MS", 3000)?;
        let tagger_total_timeout =
            parse_duration_ms("AUTHOR_CLUSTER_TAGGER_TOTAL_TIMEOUT_MS", 120_000)?;
        let tagger_max_bytes = parse_non_zero_usize("AUTHOR_CLUSTER_TAGGER_MAX_BYTES", 90_000)?;

        // Retry settings (0 = no retry)
        let tagger_max_retries = parse_usize("AUTHOR_CLUSTER_TAGGER_MAX_RETRIES", 0)?;
        let tagger_backoff_base_ms = parse_u64("AUTHOR_CLUSTER_TAGGER_BACKOFF_BASE_MS", 250)?;
        let tagger_backoff_cap_ms = parse_u64("AUTHOR_CLUSTER_TAGGER_BACKOFF_CAP_MS", 10_000)?;

        // Pipeline settings
        let workers = parse_non_zero_usize("AUTHOR_CLUSTER_WORKERS", num_cpus::get())?;
        let vocab_cap = parse_optional_non_zero_usize("AUTHOR_CLUSTER_VOCAB_CAP")?;
        let variance_p = parse_probability("AUTHOR_CLUSTER_VARIANCE_P", DEFAULT_BERNOULLI_P)?;
        let char_ngram = parse_non_zero_usize("AUTHOR_CLUSTER_CHAR_NGRAM", 4)?;

        // Clustering settings
        let kmeans_max_iter = parse_non_zero_usize(
            "AUTHOR_CLUSTER_KMEANS_MAX_ITER",
            ClusterParams::DEFAULT_MAX_ITERATIONS,
        )?;
        let seed = parse_optional_u64("AUTHOR_CLUSTER_SEED")?;
        let cluster_url = env::var("AUTHOR_CLUSTER_CLUSTER_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let cluster_timeout = parse_duration_ms("AUTHOR_CLUSTER_CLUSTER_TIMEOUT_MS", 120_000)?;

        Ok(Self {
            tagger_url,
            tagger_connect_timeout,
            tagger_total_timeout,
            tagger_max_bytes,
            tagger_max_retries,
            tagger_backoff_base_ms,
            tagger_backoff_cap_ms,
            workers,
            vocab_cap,
            variance_p,
            char_ngram,
            kmeans_max_iter,
            seed,
            cluster_url,
            cluster_timeout,
        })
    }

    #[must_use]
    pub fn tagger_url(&self) -> &str {
        &self.tagger_url
    }

    #[must_use]
    pub fn tagger_connect_timeout(&self) -> Duration {
        self.tagger_connect_timeout
    }

    #[must_use]
    pub fn tagger_total_timeout(&self) -> Duration {
        self.tagger_total_timeout
    }

    #[must_use]
    pub fn tagger_max_bytes(&self) -> NonZeroUsize {
        self.tagger_max_bytes
    }

    #[must_use]
    pub fn tagger_max_retries(&self) -> usize {
        self.tagger_max_retries
    }

    #[must_use]
    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    #[must_use]
    pub fn vocab_cap(&self) -> Option<usize> {
        self.vocab_cap.map(NonZeroUsize::get)
    }

    #[must_use]
    pub fn variance_p(&self) -> f64 {
        self.variance_p
    }

    #[must_use]
    pub fn char_ngram(&self) -> NonZeroUsize {
        self.char_ngram
    }

    #[must_use]
    pub fn kmeans_max_iter(&self) -> NonZeroUsize {
        self.kmeans_max_iter
    }

    #[must_use]
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    #[must_use]
    pub fn cluster_url(&self) -> Option<&str> {
        self.cluster_url.as_deref()
    }

    /// CoreNLP クライアントの設定。
    #[must_use]
    pub fn tagger_config(&self) -> CoreNlpConfig {
        CoreNlpConfig {
            base_url: self.tagger_url.clone(),
            connect_timeout: self.tagger_connect_timeout,
            total_timeout: self.tagger_total_timeout,
        }
    }

    /// タガー呼び出しの再試行設定。再試行しない設定なら `None`。
    #[must_use]
    pub fn tagger_retry(&self) -> Option<RetryConfig> {
        (self.tagger_max_retries > 0).then(|| {
            RetryConfig::new(
                self.tagger_max_retries + 1,
                self.tagger_backoff_base_ms,
                self.tagger_backoff_cap_ms,
            )
        })
    }

    /// モデル構築のパラメータ。
    #[must_use]
    pub fn builder_options(&self) -> BuilderOptions {
        BuilderOptions {
            char_width: self.char_ngram.get(),
            vocab_cap: self.vocab_cap(),
            max_request_bytes: self.tagger_max_bytes.get(),
            concurrency: self.workers.get(),
        }
    }

    /// 外部クラスタリングオラクルの設定。URL が未設定なら `None`。
    #[must_use]
    pub fn remote_cluster_config(&self) -> Option<RemoteClusterConfig> {
        self.cluster_url.as_ref().map(|url| RemoteClusterConfig {
            base_url: url.clone(),
            timeout: self.cluster_timeout,
        })
    }
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_optional_non_zero_usize(name: &'static str) -> Result<Option<NonZeroUsize>, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_non_zero_usize(name, 0).map(Some),
        _ => Ok(None),
    }
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_optional_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_u64(name, 0).map(Some),
        _ => Ok(None),
    }
}

fn parse_probability(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(parsed > 0.0 && parsed < 1.0) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be strictly between 0 and 1"),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: &[&str] = &[
        "AUTHOR_CLUSTER_TAGGER_URL",
        "AUTHOR_CLUSTER_TAGGER_CONNECT_TIMEOUT_MS",
        "AUTHOR_CLUSTER_TAGGER_TOTAL_TIMEOUT_MS",
        "AUTHOR_CLUSTER_TAGGER_MAX_BYTES",
        "AUTHOR_CLUSTER_TAGGER_MAX_RETRIES",
        "AUTHOR_CLUSTER_TAGGER_BACKOFF_BASE_MS",
        "AUTHOR_CLUSTER_TAGGER_BACKOFF_CAP_MS",
        "AUTHOR_CLUSTER_WORKERS",
        "AUTHOR_CLUSTER_VOCAB_CAP",
        "AUTHOR_CLUSTER_VARIANCE_P",
        "AUTHOR_CLUSTER_CHAR_NGRAM",
        "AUTHOR_CLUSTER_KMEANS_MAX_ITER",
        "AUTHOR_CLUSTER_SEED",
        "AUTHOR_CLUSTER_CLUSTER_URL",
        "AUTHOR_CLUSTER_CLUSTER_TIMEOUT_MS",
    ];

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests run sequentially and assign valid UTF-8 values.
        unsafe {
            env::set_var(name, value);
        }
    }

    fn reset_env() {
        for key in KEYS {
            // SAFETY: tests run sequentially and clean up deterministic keys.
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn from_env_uses_defaults_when_unset() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();

        let config = Config::from_env().expect("config should load");

        assert_eq!(config.tagger_url(), "http://localhost:8011");
        assert_eq!(config.tagger_connect_timeout(), Duration::from_millis(3000));
        assert_eq!(config.tagger_total_timeout(), Duration::from_millis(120_000));
        assert_eq!(config.tagger_max_bytes().get(), 90_000);
        assert_eq!(config.workers().get(), num_cpus::get());
        assert_eq!(config.vocab_cap(), None);
        assert!((config.variance_p() - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.char_ngram().get(), 4);
        assert_eq!(config.kmeans_max_iter().get(), 100);
        assert_eq!(config.seed(), None);
        assert_eq!(config.cluster_url(), None);
        assert!(config.tagger_retry().is_none());
        assert!(config.remote_cluster_config().is_none());
    }

    #[test]
    fn from_env_reads_overrides() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("AUTHOR_CLUSTER_TAGGER_URL", "http://corenlp:9000");
        set_env("AUTHOR_CLUSTER_WORKERS", "3");
        set_env("AUTHOR_CLUSTER_VOCAB_CAP", "500");
        set_env("AUTHOR_CLUSTER_VARIANCE_P", "0.8");
        set_env("AUTHOR_CLUSTER_SEED", "42");
        set_env("AUTHOR_CLUSTER_TAGGER_MAX_RETRIES", "2");
        set_env("AUTHOR_CLUSTER_CLUSTER_URL", "http://oracle:8080/");

        let config = Config::from_env().expect("config should load");
        reset_env();

        assert_eq!(config.tagger_config().base_url, "http://corenlp:9000");
        assert_eq!(config.workers().get(), 3);
        assert_eq!(config.vocab_cap(), Some(500));
        assert!((config.variance_p() - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.seed(), Some(42));
        assert_eq!(config.tagger_retry().map(|r| r.max_attempts), Some(3));
        assert_eq!(
            config.remote_cluster_config().map(|c| c.base_url),
            Some("http://oracle:8080/".to_string())
        );
        let options = config.builder_options();
        assert_eq!(options.vocab_cap, Some(500));
        assert_eq!(options.concurrency, 3);
    }

    #[test]
    fn rejects_variance_p_outside_open_interval() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("AUTHOR_CLUSTER_VARIANCE_P", "1.0");

        let error = Config::from_env().expect_err("p = 1 is invalid");
        reset_env();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "AUTHOR_CLUSTER_VARIANCE_P",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_workers() {
        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        set_env("AUTHOR_CLUSTER_WORKERS", "0");

        let error = Config::from_env().expect_err("zero workers is invalid");
        reset_env();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                name: "AUTHOR_CLUSTER_WORKERS",
                ..
            }
        ));
    }
}
