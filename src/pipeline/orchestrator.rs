//! Pipeline orchestrator and builder for the clustering experiment.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::outcome::{Experiment, ExperimentOutcome};
use crate::chunk::{Chunk, chunk};
use crate::cluster::{ClusterEngine, ClusterParams, KMeansEngine, RemoteClusterClient, cluster};
use crate::config::Config;
use crate::corpus::{AuthorDocument, Corpus};
use crate::error::{PipelineError, Result};
use crate::evaluation::{average_cosine_distance, evaluate_purity, silhouette_coefficient};
use crate::feature::{BuilderOptions, FeatureModel, FeatureModelBuilder, FeatureSelection, Vectorizer};
use crate::observability::metrics::Metrics;
use crate::selection::{VarianceThreshold, to_matrix};
use crate::tagger::{CoreNlpClient, FallbackTagger, RetryingTagger, Tagger};

/// タガーとクラスタリングエンジンを束ね、各ステージを順に実行する。
pub struct Pipeline {
    tagger: Arc<dyn Tagger>,
    engine: Arc<dyn ClusterEngine>,
    workers: usize,
    metrics: Option<Arc<Metrics>>,
}

/// Builder pattern for constructing [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    tagger: Option<Arc<dyn Tagger>>,
    engine: Option<Arc<dyn ClusterEngine>>,
    workers: Option<usize>,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定からタガーとエンジンを組み立てる。
    ///
    /// `offline` ならネットワーク不要の [`FallbackTagger`] を使う。そうでなければ
    /// CoreNLP クライアントを使い、再試行が設定されていれば [`RetryingTagger`] で包む。
    /// クラスタリングオラクルの URL が設定されていればリモートエンジンを使う。
    ///
    /// # Errors
    /// クライアントの構築に失敗した場合は [`PipelineError::Configuration`] を返す。
    pub fn from_config(
        config: &Config,
        offline: bool,
        metrics: Option<Arc<Metrics>>,
    ) -> Result<Self> {
        let tagger: Arc<dyn Tagger> = if offline {
            Arc::new(FallbackTagger::new())
        } else {
            let mut client = CoreNlpClient::new(&config.tagger_config())?;
            if let Some(metrics) = &metrics {
                client = client.with_metrics(Arc::clone(metrics));
            }
            match config.tagger_retry() {
                Some(retry) => Arc::new(RetryingTagger::new(client, retry)),
                None => Arc::new(client),
            }
        };

        let engine: Arc<dyn ClusterEngine> = match config.remote_cluster_config() {
            Some(remote) => Arc::new(RemoteClusterClient::new(&remote)?),
            None => Arc::new(KMeansEngine::new()),
        };

        Ok(Self {
            tagger: Some(tagger),
            engine: Some(engine),
            workers: Some(config.workers().get()),
            metrics,
        })
    }

    #[must_use]
    pub fn tagger(mut self, tagger: Arc<dyn Tagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn ClusterEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 未指定の部品は [`FallbackTagger`]、[`KMeansEngine`]、CPU 数の並列度で補う。
    #[must_use]
    pub fn build(self) -> Pipeline {
        Pipeline {
            tagger: self
                .tagger
                .unwrap_or_else(|| Arc::new(FallbackTagger::new())),
            engine: self.engine.unwrap_or_else(|| Arc::new(KMeansEngine::new())),
            workers: self.workers.unwrap_or_else(num_cpus::get).max(1),
            metrics: self.metrics,
        }
    }
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    #[must_use]
    pub fn tagger(&self) -> &Arc<dyn Tagger> {
        &self.tagger
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 著者ごとの文書を文分割してコーパスにする。
    ///
    /// # Errors
    /// タガー呼び出しが失敗した場合は `split_sentences` ステージのエラーを返す。
    pub async fn prepare_corpus(&self, documents: &[AuthorDocument]) -> Result<Corpus> {
        Corpus::from_documents(documents, self.tagger.as_ref(), self.workers)
            .await
            .map_err(|error| error.in_stage("split_sentences"))
    }

    /// 学習コーパスから特徴量モデルを構築する。
    ///
    /// # Errors
    /// 選択が空の場合やタガー呼び出しが失敗した場合は `build_model` ステージのエラーを返す。
    pub async fn build_model(
        &self,
        corpus: &Corpus,
        selection: &FeatureSelection,
        options: BuilderOptions,
    ) -> Result<FeatureModel> {
        let model = FeatureModelBuilder::new(self.tagger.as_ref(), options)
            .build(corpus, selection)
            .await
            .map_err(|error| error.in_stage("build_model"))?;
        if let Some(metrics) = &self.metrics {
            metrics.models_built.inc();
        }
        Ok(model)
    }

    /// チャンク化からベクトル化、特徴選択、クラスタリング、評価までを実行する。
    ///
    /// 失敗したステージ名（とチャンク番号）を付けたエラーを返す。
    ///
    /// # Errors
    /// 設定が不正な場合は即座に [`PipelineError::Configuration`]、以降は各ステージの
    /// エラーを [`PipelineError::Stage`] で包んで返す。
    #[instrument(skip_all, fields(chunk_size = experiment.chunk_size, k = experiment.k))]
    pub async fn run_experiment(
        &self,
        corpus: &Corpus,
        model: Arc<FeatureModel>,
        experiment: &Experiment,
        cancel: &CancellationToken,
    ) -> Result<ExperimentOutcome> {
        let started = Instant::now();
        let outcome = self.run_stages(corpus, model, experiment, cancel).await;

        if let Some(metrics) = &self.metrics {
            metrics
                .pipeline_duration
                .observe(started.elapsed().as_secs_f64());
            match &outcome {
                Ok(_) => metrics.experiments_completed.inc(),
                Err(_) => metrics.experiments_failed.inc(),
            }
        }
        if let Err(error) = &outcome {
            warn!(error = %error, "experiment failed");
        }
        outcome
    }

    async fn run_stages(
        &self,
        corpus: &Corpus,
        model: Arc<FeatureModel>,
        experiment: &Experiment,
        cancel: &CancellationToken,
    ) -> Result<ExperimentOutcome> {
        if experiment.chunk_size == 0 {
            return Err(PipelineError::Configuration(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        if experiment.k < 1 {
            return Err(PipelineError::Configuration(
                "cluster count must be at least 1".to_string(),
            ));
        }
        let selection = experiment.selection.validate()?;
        let threshold = VarianceThreshold::from_bernoulli(experiment.variance_p)?;

        let chunks: Vec<Chunk> =
            chunk(corpus.sentences(), experiment.chunk_size).map_err(|e| e.in_stage("chunk"))?;
        for (author, sentences) in corpus.sentence_counts() {
            info!(author = %author, sentences, "author sentences in experiment corpus");
        }
        info!(chunks = chunks.len(), "corpus chunked");
        if chunks.is_empty() {
            return Err(PipelineError::EmptyMatrix.in_stage("chunk"));
        }

        let mut vectorizer = Vectorizer::new(model, selection, Arc::clone(&self.tagger))
            .map_err(|e| e.in_stage("vectorize"))?
            .with_workers(self.workers);
        if let Some(metrics) = &self.metrics {
            vectorizer = vectorizer.with_metrics(Arc::clone(metrics));
        }
        let vectors = vectorizer
            .vectorize_all(&chunks, cancel)
            .await
            .map_err(|e| e.in_stage("vectorize"))?;

        let matrix = to_matrix(&vectors).map_err(|e| e.in_stage("select"))?;
        let selected = threshold
            .select(&matrix)
            .map_err(|e| e.in_stage("select"))?;
        if let Some(metrics) = &self.metrics {
            #[allow(clippy::cast_precision_loss)]
            metrics.features_dropped.inc_by(selected.dropped() as f64);
        }
        if selected.kept.is_empty() {
            warn!(
                columns = matrix.ncols(),
                threshold = threshold.threshold(),
                "variance filter removed every feature column"
            );
        }
        info!(
            raw_dimension = matrix.ncols(),
            reduced_dimension = selected.kept.len(),
            "features selected"
        );

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let params = ClusterParams::for_rows(selected.matrix.nrows(), experiment.k)
            .with_seed(experiment.seed)
            .with_max_iterations(experiment.max_iterations);
        let cluster_started = Instant::now();
        let assignment = cluster(self.engine.as_ref(), &selected.matrix, &params)
            .await
            .map_err(|e| e.in_stage("cluster"))?;
        if let Some(metrics) = &self.metrics {
            metrics
                .clustering_duration
                .observe(cluster_started.elapsed().as_secs_f64());
        }

        let purity = evaluate_purity(&assignment, &chunks).map_err(|e| e.in_stage("evaluate"))?;
        let cohesion = average_cosine_distance(&selected.matrix, &assignment)
            .map_err(|e| e.in_stage("evaluate"))?;
        let silhouette = silhouette_coefficient(&selected.matrix, &assignment)
            .map_err(|e| e.in_stage("evaluate"))?;
        info!(
            overall_purity = purity.overall,
            empty_clusters = purity.empty_clusters(),
            "experiment evaluated"
        );

        Ok(ExperimentOutcome {
            experiment: *experiment,
            num_chunks: chunks.len(),
            raw_dimension: matrix.ncols(),
            reduced_dimension: selected.kept.len(),
            assignment,
            purity,
            cohesion,
            silhouette,
        })
    }
}
