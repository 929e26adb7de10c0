//! パイプライン全体で共有するエラー型。
use std::path::PathBuf;

use thiserror::Error;

/// 著者クラスタリングパイプラインのエラー。
///
/// 空クラスタはエラーではなく、[`crate::evaluation::purity::PurityReport`] の
/// センチネル値で表現する。
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 不正なチャンクサイズ、クラスタ数、欠落したモデルファイルなど。
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// タガーに接続できない。リトライは呼び出し側の責務。
    #[error("tagger unavailable at {endpoint}: {reason}")]
    TaggerUnavailable { endpoint: String, reason: String },

    /// 接続はできたが、タガーの応答が不正だった。
    #[error("tagger request failed: {0}")]
    Tagger(String),

    #[error("dimension mismatch: expected {expected} columns, found {found} (row {row})")]
    DimensionMismatch {
        expected: usize,
        found: usize,
        row: usize,
    },

    #[error("feature matrix is empty")]
    EmptyMatrix,

    #[error("malformed model file {path} at line {line}: {reason}")]
    ModelFormat {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error("pipeline cancelled")]
    Cancelled,

    /// ワーカータスクがパニックした、または外部から中断された。
    #[error("worker task failed: {0}")]
    Task(String),

    /// 特定チャンクの処理失敗。
    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// 特定ステージの処理失敗。
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PipelineError>,
    },
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn in_chunk(self, index: usize) -> Self {
        Self::Chunk {
            index,
            source: Box::new(self),
        }
    }

    pub(crate) fn in_stage(self, stage: &'static str) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// ステージ／チャンクのラップを外した根本原因を返す。
    #[must_use]
    pub fn root(&self) -> &PipelineError {
        match self {
            Self::Chunk { source, .. } | Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// タガー接続失敗に起因するかどうか。
    #[must_use]
    pub fn is_tagger_unavailable(&self) -> bool {
        matches!(self.root(), Self::TaggerUnavailable { .. })
    }

    /// 呼び出し側のリトライ方針を決めるための分類。
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::TaggerUnavailable { .. } => ErrorKind::Retryable,
            Self::Configuration(_) | Self::DimensionMismatch { .. } | Self::EmptyMatrix => {
                ErrorKind::Fatal
            }
            _ => ErrorKind::NonRetryable,
        }
    }
}

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 呼び出し側が独自のバックオフで再試行してよい（接続断など）
    Retryable,
    /// 再試行しても結果が変わらない（不正な応答、I/O など）
    NonRetryable,
    /// 設定や次元不整合などのロジックエラー
    Fatal,
}
