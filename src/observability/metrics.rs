//! Prometheusメトリクス定義。
use prometheus::{
    Counter, Histogram, Registry, register_counter_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub tagger_requests: Counter,
    pub tagger_failures: Counter,
    pub chunks_vectorized: Counter,
    pub features_dropped: Counter,
    pub models_built: Counter,
    pub experiments_completed: Counter,
    pub experiments_failed: Counter,

    // ヒストグラム
    pub tagger_latency: Histogram,
    pub vectorize_duration: Histogram,
    pub clustering_duration: Histogram,
    pub pipeline_duration: Histogram,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            tagger_requests: register_counter_with_registry!(
                "author_cluster_tagger_requests_total",
                "Total number of requests sent to the tagger",
                registry
            )?,
            tagger_failures: register_counter_with_registry!(
                "author_cluster_tagger_failures_total",
                "Total number of failed tagger requests",
                registry
            )?,
            chunks_vectorized: register_counter_with_registry!(
                "author_cluster_chunks_vectorized_total",
                "Total number of chunks converted to feature vectors",
                registry
            )?,
            features_dropped: register_counter_with_registry!(
                "author_cluster_features_dropped_total",
                "Total number of feature columns removed by the variance filter",
                registry
            )?,
            models_built: register_counter_with_registry!(
                "author_cluster_models_built_total",
                "Total number of feature models built",
                registry
            )?,
            experiments_completed: register_counter_with_registry!(
                "author_cluster_experiments_completed_total",
                "Total number of completed clustering experiments",
                registry
            )?,
            experiments_failed: register_counter_with_registry!(
                "author_cluster_experiments_failed_total",
                "Total number of failed clustering experiments",
                registry
            )?,
            tagger_latency: register_histogram_with_registry!(
                "author_cluster_tagger_latency_seconds",
                "Latency of a single tagger request",
                registry
            )?,
            vectorize_duration: register_histogram_with_registry!(
                "author_cluster_vectorize_duration_seconds",
                "Time spent vectorizing all chunks",
                registry
            )?,
            clustering_duration: register_histogram_with_registry!(
                "author_cluster_clustering_duration_seconds",
                "Time spent in the clustering engine",
                registry
            )?,
            pipeline_duration: register_histogram_with_registry!(
                "author_cluster_pipeline_duration_seconds",
                "End-to-end duration of a clustering experiment",
                registry
            )?,
        })
    }
}
