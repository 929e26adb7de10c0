//! クラスタリングエンジンのアダプター。
//!
//! エンジン自体は「行列を渡すとラベルが返る」不透明なオラクルとして扱う。
//! アダプターの責務は入力検証（`k >= 1`、`rows >= k`）、パラメータの受け渡し、
//! 行順を保った1行1ラベルの出力検証だけ。
pub mod kmeans;
pub mod remote;

use std::time::Instant;

use async_trait::async_trait;
use ndarray::Array2;
use serde::Serialize;
use tracing::info;

use crate::error::{PipelineError, Result};

pub use kmeans::KMeansEngine;
pub use remote::{RemoteClusterClient, RemoteClusterConfig};

/// エンジンへそのまま渡すパラメータ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterParams {
    pub k: usize,
    /// 近傍グラフ型アルゴリズム向けの近傍数。
    pub n_neighbors: usize,
    pub seed: Option<u64>,
    pub max_iterations: usize,
}

impl ClusterParams {
    pub const DEFAULT_MAX_ITERATIONS: usize = 100;

    /// 行数とクラスタ数から近傍数 `floor(rows / k - 0.1 * k)`（最小1）を導く。
    #[must_use]
    pub fn for_rows(rows: usize, k: usize) -> Self {
        Self {
            k,
            n_neighbors: neighbor_count(rows, k),
            seed: None,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn neighbor_count(rows: usize, k: usize) -> usize {
    if k == 0 {
        return 1;
    }
    let k = k as f64;
    let n = (rows as f64 / k - 0.1 * k).floor();
    if n < 1.0 { 1 } else { n as usize }
}

/// `fit_predict` を提供するクラスタリングオラクル。
#[async_trait]
pub trait ClusterEngine: Send + Sync {
    /// 行ごとのラベルを返す。
    async fn fit_predict(&self, matrix: &Array2<f64>, params: &ClusterParams)
    -> Result<Vec<usize>>;

    fn name(&self) -> &str;
}

/// 検証済みのクラスタ割り当て（行 i のラベルが `labels[i]`）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterAssignment {
    labels: Vec<usize>,
    k: usize,
}

impl ClusterAssignment {
    /// # Errors
    /// ラベルが `[0, k)` に収まらない場合は [`PipelineError::Clustering`] を返す。
    pub fn new(labels: Vec<usize>, k: usize) -> Result<Self> {
        if let Some((row, label)) = labels.iter().enumerate().find(|(_, label)| **label >= k) {
            return Err(PipelineError::Clustering(format!(
                "label {label} for row {row} is outside [0, {k})"
            )));
        }
        Ok(Self { labels, k })
    }

    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// ラベルごとの行番号（ラベル昇順、行番号昇順）。空クラスタは空のリスト。
    #[must_use]
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut members = vec![Vec::new(); self.k];
        for (row, label) in self.labels.iter().enumerate() {
            members[*label].push(row);
        }
        members
    }
}

/// 入力を検証してエンジンを呼び、出力を検証する。
///
/// # Errors
/// `k < 1` または `rows < k` の場合は [`PipelineError::Configuration`]、
/// 行列が空の場合は [`PipelineError::EmptyMatrix`]、エンジンの出力が不正な場合は
/// [`PipelineError::Clustering`] を返す。
pub async fn cluster(
    engine: &dyn ClusterEngine,
    matrix: &Array2<f64>,
    params: &ClusterParams,
) -> Result<ClusterAssignment> {
    if params.k < 1 {
        return Err(PipelineError::Configuration(
            "cluster count must be at least 1".to_string(),
        ));
    }
    if matrix.nrows() == 0 {
        return Err(PipelineError::EmptyMatrix);
    }
    if matrix.nrows() < params.k {
        return Err(PipelineError::Configuration(format!(
            "cannot form {} clusters from {} rows",
            params.k,
            matrix.nrows()
        )));
    }

    let started = Instant::now();
    let labels = engine.fit_predict(matrix, params).await?;
    if labels.len() != matrix.nrows() {
        return Err(PipelineError::Clustering(format!(
            "{} returned {} labels for {} rows",
            engine.name(),
            labels.len(),
            matrix.nrows()
        )));
    }
    let assignment = ClusterAssignment::new(labels, params.k)?;

    info!(
        engine = engine.name(),
        rows = matrix.nrows(),
        columns = matrix.ncols(),
        k = params.k,
        n_neighbors = params.n_neighbors,
        elapsed_ms = started.elapsed().as_millis(),
        "clustering finished"
    );
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rstest::rstest;

    /// 固定のラベル列を返すエンジン。
    struct Fixed(Vec<usize>);

    #[async_trait]
    impl ClusterEngine for Fixed {
        async fn fit_predict(
            &self,
            _matrix: &Array2<f64>,
            _params: &ClusterParams,
        ) -> Result<Vec<usize>> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[rstest]
    #[case(100, 4, 24)]
    #[case(30, 3, 9)]
    #[case(10, 5, 1)]
    #[case(3, 3, 1)]
    fn neighbor_count_scales_with_rows(
        #[case] rows: usize,
        #[case] k: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(ClusterParams::for_rows(rows, k).n_neighbors, expected);
    }

    #[tokio::test]
    async fn rejects_zero_clusters() {
        let matrix = array![[1.0], [0.0]];
        let error = cluster(&Fixed(vec![0, 0]), &matrix, &ClusterParams::for_rows(2, 0))
            .await
            .expect_err("k = 0");
        assert!(matches!(error, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn rejects_more_clusters_than_rows() {
        let matrix = array![[1.0], [0.0]];
        let error = cluster(&Fixed(vec![0, 1]), &matrix, &ClusterParams::for_rows(2, 3))
            .await
            .expect_err("rows < k");
        assert!(matches!(error, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn rejects_wrong_label_count_and_range() {
        let matrix = array![[1.0], [0.0], [0.5]];
        let params = ClusterParams::for_rows(3, 2);

        let short = cluster(&Fixed(vec![0, 1]), &matrix, &params).await;
        assert!(matches!(short, Err(PipelineError::Clustering(_))));

        let out_of_range = cluster(&Fixed(vec![0, 1, 2]), &matrix, &params).await;
        assert!(matches!(out_of_range, Err(PipelineError::Clustering(_))));
    }

    #[tokio::test]
    async fn keeps_row_order() {
        let matrix = array![[1.0], [0.0], [0.5]];
        let assignment = cluster(&Fixed(vec![1, 0, 1]), &matrix, &ClusterParams::for_rows(3, 2))
            .await
            .expect("valid labels");
        assert_eq!(assignment.labels(), &[1, 0, 1]);
        assert_eq!(assignment.members(), vec![vec![1], vec![0, 2]]);
    }
}
