//! Stanford CoreNLP サーバーの HTTP クライアント。
//!
//! `tokenize,ssplit[,pos]` アノテーターを指定してテキストを POST し、
//! JSON 出力からトークン、品詞、文境界を取り出します。
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use super::{TaggedText, Tagger};
use crate::error::{PipelineError, Result};
use crate::observability::metrics::Metrics;

const MAX_ERROR_MESSAGE_LENGTH: usize = 500;

/// CoreNLP クライアントの設定。
#[derive(Debug, Clone)]
pub struct CoreNlpConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

/// CoreNLP の JSON 出力（必要なフィールドのみ）。
#[derive(Debug, Deserialize)]
struct AnnotationResponse {
    #[serde(default)]
    sentences: Vec<AnnotatedSentence>,
}

#[derive(Debug, Deserialize)]
struct AnnotatedSentence {
    #[serde(default)]
    tokens: Vec<AnnotatedToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotatedToken {
    word: String,
    #[serde(default)]
    pos: Option<String>,
    character_offset_begin: usize,
    character_offset_end: usize,
}

/// CoreNLP サーバーとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub struct CoreNlpClient {
    client: Client,
    base_url: Url,
    metrics: Option<Arc<Metrics>>,
}

impl CoreNlpClient {
    /// 新しいクライアントを作成する。
    ///
    /// # Errors
    /// URL のパースまたは HTTP クライアントの構築に失敗した場合は
    /// [`PipelineError::Configuration`] を返します。
    pub fn new(config: &CoreNlpConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .map_err(|error| {
                PipelineError::Configuration(format!("failed to build tagger HTTP client: {error}"))
            })?;

        let base_url = Url::parse(&config.base_url).map_err(|error| {
            PipelineError::Configuration(format!(
                "invalid tagger base URL {}: {error}",
                config.base_url
            ))
        })?;

        Ok(Self {
            client,
            base_url,
            metrics: None,
        })
    }

    /// リクエスト数とレイテンシを記録するメトリクスを設定する。
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn annotate(&self, text: &str, annotators: &str) -> Result<AnnotationResponse> {
        let properties = serde_json::json!({
            "annotators": annotators,
            "outputFormat": "json",
        })
        .to_string();

        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.tagger_requests.inc();
        }

        let outcome = self.send_annotation(text, &properties).await;

        if let Some(metrics) = &self.metrics {
            metrics
                .tagger_latency
                .observe(started.elapsed().as_secs_f64());
            if outcome.is_err() {
                metrics.tagger_failures.inc();
            }
        }
        outcome
    }

    async fn send_annotation(&self, text: &str, properties: &str) -> Result<AnnotationResponse> {
        debug!(
            bytes = text.len(),
            endpoint = %self.base_url,
            "sending annotation request"
        );

        let response = self
            .client
            .post(self.base_url.clone())
            .query(&[("properties", properties)])
            .header("Connection", "close")
            .body(text.to_owned())
            .send()
            .await
            .map_err(|error| self.classify(&error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Tagger(format!(
                "tagger returned error status {status}: {}",
                truncate_error_message(&body)
            )));
        }

        response
            .json::<AnnotationResponse>()
            .await
            .map_err(|error| self.classify(&error))
    }

    fn classify(&self, error: &reqwest::Error) -> PipelineError {
        if error.is_connect() || error.is_timeout() {
            PipelineError::TaggerUnavailable {
                endpoint: self.base_url.to_string(),
                reason: error.to_string(),
            }
        } else if error.is_decode() {
            PipelineError::Tagger(format!("failed to deserialize tagger response: {error}"))
        } else {
            PipelineError::Tagger(error.to_string())
        }
    }
}

#[async_trait]
impl Tagger for CoreNlpClient {
    async fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let output = self.annotate(text, "tokenize,ssplit").await?;
        Ok(output
            .sentences
            .into_iter()
            .flat_map(|sentence| sentence.tokens)
            .map(|token| strip_whitespace(&token.word))
            .collect())
    }

    async fn tag_parts_of_speech(&self, text: &str) -> Result<TaggedText> {
        if text.trim().is_empty() {
            return Ok(TaggedText::default());
        }
        let output = self.annotate(text, "tokenize,ssplit,pos").await?;

        let mut words = Vec::new();
        let mut tags = Vec::new();
        for token in output.sentences.into_iter().flat_map(|s| s.tokens) {
            let Some(pos) = token.pos else {
                return Err(PipelineError::Tagger(format!(
                    "token {:?} has no part-of-speech tag",
                    token.word
                )));
            };
            words.push(strip_whitespace(&token.word));
            tags.push(pos);
        }
        TaggedText::new(words, tags)
    }

    async fn split_sentences(&self, text: &str) -> Result<Vec<String>> {
        let flattened = text.replace('\n', "");
        if flattened.trim().is_empty() {
            return Ok(Vec::new());
        }
        let output = self.annotate(&flattened, "tokenize,ssplit").await?;

        let boundaries = utf16_boundaries(&flattened);

        let mut sentences = Vec::with_capacity(output.sentences.len());
        for sentence in output.sentences {
            let (Some(first), Some(last)) = (sentence.tokens.first(), sentence.tokens.last())
            else {
                continue;
            };
            let begin = boundaries.get(first.character_offset_begin).copied().flatten();
            let end = boundaries.get(last.character_offset_end).copied().flatten();
            match (begin, end) {
                (Some(begin), Some(end)) if begin <= end => {
                    sentences.push(flattened[begin..end].to_string());
                }
                _ => {
                    return Err(PipelineError::Tagger(format!(
                        "sentence offsets {}..{} out of range for text of {} UTF-16 units",
                        first.character_offset_begin,
                        last.character_offset_end,
                        boundaries.len() - 1
                    )));
                }
            }
        }
        Ok(sentences)
    }

    fn name(&self) -> &str {
        "corenlp"
    }
}

/// CoreNLP の文字オフセット (UTF-16 コード単位) からバイト位置への対応表。
///
/// サロゲートペアの後半を指す位置は文字境界ではないので `None` になる。
/// 末尾には本文長を置く。
fn utf16_boundaries(text: &str) -> Vec<Option<usize>> {
    let mut boundaries = Vec::with_capacity(text.len() + 1);
    for (byte, c) in text.char_indices() {
        boundaries.push(Some(byte));
        if c.len_utf16() == 2 {
            boundaries.push(None);
        }
    }
    boundaries.push(Some(text.len()));
    boundaries
}

fn strip_whitespace(word: &str) -> String {
    word.chars().filter(|c| !c.is_whitespace()).collect()
}

fn truncate_error_message(msg: &str) -> String {
    let char_count = msg.chars().count();
    if char_count <= MAX_ERROR_MESSAGE_LENGTH {
        return msg.to_string();
    }
    let truncated: String = msg.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect();
    format!("{truncated}... (truncated, {char_count} chars)")
}
