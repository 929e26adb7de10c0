//! 外部タガー（トークナイズ、文分割、品詞付与）とのインターフェース。
//!
//! パイプラインはこのトレイト越しにのみタガーを利用する。接続失敗は
//! [`PipelineError::TaggerUnavailable`] として「空の結果」と区別して報告する。
pub mod corenlp;
pub mod fallback;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

pub use corenlp::{CoreNlpClient, CoreNlpConfig};
pub use fallback::FallbackTagger;
pub use retry::{RetryConfig, RetryingTagger};

/// 品詞付与の結果。`words` と `tags` は同じ長さで、添字で対応する。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedText {
    pub words: Vec<String>,
    pub tags: Vec<String>,
}

impl TaggedText {
    /// 語と品詞の長さを検証して構築する。
    ///
    /// # Errors
    /// 長さが一致しない場合は [`PipelineError::Tagger`] を返す。
    pub fn new(words: Vec<String>, tags: Vec<String>) -> Result<Self> {
        if words.len() != tags.len() {
            return Err(PipelineError::Tagger(format!(
                "tagger returned {} words but {} tags",
                words.len(),
                tags.len()
            )));
        }
        Ok(Self { words, tags })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// パイプラインが消費するタガーの最小契約。
#[async_trait]
pub trait Tagger: Send + Sync {
    /// 表層形トークン列を返す。
    async fn tokenize(&self, text: &str) -> Result<Vec<String>>;

    /// 語と品詞タグの組を返す。
    async fn tag_parts_of_speech(&self, text: &str) -> Result<TaggedText>;

    /// 文単位の部分文字列を返す。空白のみの入力は空のリストを返す。
    async fn split_sentences(&self, text: &str) -> Result<Vec<String>>;

    /// ログ用の識別子。
    fn name(&self) -> &str;
}
