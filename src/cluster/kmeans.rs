use async_trait::async_trait;
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{ClusterEngine, ClusterParams};
use crate::error::{PipelineError, Result};

/// 行列の行をユークリッド距離で k 個に分ける K-Means。
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Array2<f64>,
    pub assignments: Vec<usize>,
    pub iterations: usize,
}

impl KMeans {
    /// K-Means を実行する。
    ///
    /// # Arguments
    /// * `data` - 1行1点の行列。
    /// * `k` - クラスタ数（行数以下）。
    /// * `max_iterations` - 最大反復回数。
    /// * `rng` - 初期重心の選択に使う乱数生成器。
    pub fn fit<R: Rng + ?Sized>(
        data: &Array2<f64>,
        k: usize,
        max_iterations: usize,
        rng: &mut R,
    ) -> Self {
        let rows = data.nrows();
        if rows == 0 || k == 0 {
            return Self {
                centroids: Array2::zeros((0, data.ncols())),
                assignments: vec![],
                iterations: 0,
            };
        }

        let k = k.min(rows);
        let mut centroids = plus_plus_init(data, k, rng);
        let mut assignments = vec![usize::MAX; rows];
        let mut iterations = 0;

        while iterations < max_iterations {
            iterations += 1;

            // E-step: 最も近い重心に割り当てる
            let mut changed = false;
            for (i, point) in data.rows().into_iter().enumerate() {
                let best = nearest(point, &centroids);
                if assignments[i] != best {
                    assignments[i] = best;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            // M-step: 重心を更新する
            let mut sums = Array2::<f64>::zeros((k, data.ncols()));
            let mut counts = vec![0usize; k];
            for (i, &cluster) in assignments.iter().enumerate() {
                let mut row = sums.row_mut(cluster);
                row += &data.row(i);
                counts[cluster] += 1;
            }

            for (j, count) in counts.iter().enumerate() {
                if *count > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let mean = &sums.row(j) / *count as f64;
                    centroids.row_mut(j).assign(&mean);
                } else {
                    // 空クラスタはランダムな点で再初期化する
                    let pick = rng.random_range(0..rows);
                    centroids.row_mut(j).assign(&data.row(pick));
                }
            }
        }

        Self {
            centroids,
            assignments,
            iterations,
        }
    }
}

/// k-means++ で初期重心を選ぶ。
fn plus_plus_init<R: Rng + ?Sized>(data: &Array2<f64>, k: usize, rng: &mut R) -> Array2<f64> {
    let rows = data.nrows();
    let mut centroids = Array2::<f64>::zeros((k, data.ncols()));
    centroids
        .row_mut(0)
        .assign(&data.row(rng.random_range(0..rows)));

    let mut closest: Vec<f64> = data
        .rows()
        .into_iter()
        .map(|point| distance_sq(point, centroids.row(0)))
        .collect();

    for j in 1..k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.random_range(0.0..total);
            let mut chosen = rows - 1;
            for (i, weight) in closest.iter().enumerate() {
                if target < *weight {
                    chosen = i;
                    break;
                }
                target -= weight;
            }
            chosen
        } else {
            rng.random_range(0..rows)
        };
        centroids.row_mut(j).assign(&data.row(pick));
        for (i, point) in data.rows().into_iter().enumerate() {
            closest[i] = closest[i].min(distance_sq(point, centroids.row(j)));
        }
    }
    centroids
}

fn nearest(point: ArrayView1<'_, f64>, centroids: &Array2<f64>) -> usize {
    let mut best = 0;
    let mut min_dist_sq = f64::MAX;
    for (j, centroid) in centroids.rows().into_iter().enumerate() {
        let dist_sq = distance_sq(point, centroid);
        if dist_sq < min_dist_sq {
            min_dist_sq = dist_sq;
            best = j;
        }
    }
    best
}

fn distance_sq(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// プロセス内で K-Means を実行するエンジン。
#[derive(Debug, Clone, Copy, Default)]
pub struct KMeansEngine;

impl KMeansEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ClusterEngine for KMeansEngine {
    async fn fit_predict(
        &self,
        matrix: &Array2<f64>,
        params: &ClusterParams,
    ) -> Result<Vec<usize>> {
        let data = matrix.clone();
        let params = *params;
        let model = tokio::task::spawn_blocking(move || {
            let mut rng = match params.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            KMeans::fit(&data, params.k, params.max_iterations, &mut rng)
        })
        .await
        .map_err(|error| PipelineError::Clustering(format!("k-means task failed: {error}")))?;

        debug!(
            k = params.k,
            iterations = model.iterations,
            "k-means converged"
        );
        Ok(model.assignments)
    }

    fn name(&self) -> &str {
        "kmeans"
    }
}
