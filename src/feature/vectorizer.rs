//! チャンクを特徴量モデルに対する二値（出現有無）ベクトルへ変換する。
//!
//! ベクトルは選択された種別を [`FeatureKind::ALL`](super::FeatureKind::ALL) の順に連結したもので、
//! 各ブロック内の位置は語彙の位置と一致する。長さは常に
//! `model.dimension(selection)` に等しい。
use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashSet;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::FeatureSelection;
use super::model::FeatureModel;
use crate::chunk::Chunk;
use crate::error::{PipelineError, Result};
use crate::observability::metrics::Metrics;
use crate::tagger::{TaggedText, Tagger};

/// 1チャンク分の出現有無ベクトル。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureVector(Vec<bool>);

impl FeatureVector {
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.0
    }

    /// 立っている成分の数。
    #[must_use]
    pub fn count_present(&self) -> usize {
        self.0.iter().filter(|present| **present).count()
    }

    /// 数値行列の1行（出現=1.0、非出現=0.0）。
    #[must_use]
    pub fn to_row(&self) -> Vec<f64> {
        self.0
            .iter()
            .map(|present| if *present { 1.0 } else { 0.0 })
            .collect()
    }
}

impl From<Vec<bool>> for FeatureVector {
    fn from(values: Vec<bool>) -> Self {
        Self(values)
    }
}

/// タガー出力から出現有無ベクトルを組み立てる。タガーを呼ばない純粋関数。
#[must_use]
pub fn presence_vector(
    model: &FeatureModel,
    selection: &FeatureSelection,
    text: &str,
    tagged: &TaggedText,
) -> FeatureVector {
    let mut values = Vec::new();
    for kind in selection.kinds() {
        let Some(vocabulary) = model.vocabulary(kind) else {
            continue;
        };
        let grams: FxHashSet<String> = kind
            .source(model.char_width())
            .grams(text, tagged)
            .into_iter()
            .collect();
        values.extend(vocabulary.tokens().map(|token| grams.contains(token)));
    }
    FeatureVector(values)
}

/// モデル・選択・タガーを束ねたベクトル化器。
#[derive(Clone)]
pub struct Vectorizer {
    model: Arc<FeatureModel>,
    selection: FeatureSelection,
    dimension: usize,
    tagger: Arc<dyn Tagger>,
    workers: usize,
    metrics: Option<Arc<Metrics>>,
}

impl Vectorizer {
    /// # Errors
    /// 選択が空の場合、または選択された種別の語彙がモデルに無い場合は
    /// [`PipelineError::Configuration`] を返す。
    pub fn new(
        model: Arc<FeatureModel>,
        selection: FeatureSelection,
        tagger: Arc<dyn Tagger>,
    ) -> Result<Self> {
        let selection = selection.validate()?;
        let dimension = model.dimension(&selection)?;
        Ok(Self {
            model,
            selection,
            dimension,
            tagger,
            workers: 1,
            metrics: None,
        })
    }

    /// 同時にタガーへ送るチャンク数の上限。
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 1チャンクのベクトル長。
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 1チャンクをベクトル化する。語・品詞の種別が有効ならタガーを1回だけ呼ぶ。
    ///
    /// # Errors
    /// タガー呼び出しが失敗した場合はそのエラーを返す。
    pub async fn vectorize(&self, text: &str) -> Result<FeatureVector> {
        let tagged = if self.selection.needs_tagger() {
            self.tagger.tag_parts_of_speech(text).await?
        } else {
            TaggedText::default()
        };
        Ok(presence_vector(&self.model, &self.selection, text, &tagged))
    }

    /// `row` 番目のチャンクをベクトル化し、長さをモデルの次元と照合する。
    async fn vectorize_row(&self, row: usize, text: &str) -> Result<FeatureVector> {
        let vector = self.vectorize(text).await?;
        if vector.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
                row,
            });
        }
        Ok(vector)
    }

    /// 全チャンクを最大 `workers` 並列でベクトル化し、入力順のまま返す。
    ///
    /// 最初の失敗で残りのタスクを中断し、失敗したチャンクの番号を付けて返す。
    ///
    /// # Errors
    /// いずれかのチャンクが失敗した場合はそのエラー、`cancel` が発火した場合は
    /// [`PipelineError::Cancelled`] を返す。
    pub async fn vectorize_all(
        &self,
        chunks: &[Chunk],
        cancel: &CancellationToken,
    ) -> Result<Vec<FeatureVector>> {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let vectorizer = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let text = chunk.text.clone();
            tasks.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(PipelineError::Cancelled),
                    outcome = async {
                        match semaphore.acquire_owned().await {
                            Ok(_permit) => vectorizer.vectorize_row(index, &text).await,
                            Err(_) => Err(PipelineError::Cancelled),
                        }
                    } => outcome,
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<FeatureVector>> = vec![None; chunks.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = match joined {
                Ok(result) => result,
                Err(error) => {
                    tasks.abort_all();
                    return Err(PipelineError::Task(format!(
                        "vectorization task aborted or panicked: {error}"
                    )));
                }
            };
            match outcome {
                Ok(vector) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.chunks_vectorized.inc();
                    }
                    slots[index] = Some(vector);
                }
                Err(PipelineError::Cancelled) => {
                    tasks.abort_all();
                    warn!(completed = slots.iter().flatten().count(), "vectorization cancelled");
                    return Err(PipelineError::Cancelled);
                }
                Err(error) => {
                    tasks.abort_all();
                    return Err(error.in_chunk(index));
                }
            }
        }

        let mut vectors = Vec::with_capacity(slots.len());
        for (row, slot) in slots.into_iter().enumerate() {
            let vector = slot.ok_or_else(|| {
                PipelineError::Task(format!("chunk {row} produced no vector"))
            })?;
            vectors.push(vector);
        }

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.vectorize_duration.observe(elapsed.as_secs_f64());
        }
        debug!(workers = self.workers, "vectorization finished");
        info!(
            chunks = vectors.len(),
            dimension = self.dimension,
            elapsed_ms = elapsed.as_millis(),
            "vectorized chunks"
        );
        Ok(vectors)
    }
}
