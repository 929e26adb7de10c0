//! 分散しきい値による特徴列の選択。
//!
//! 出現有無の列はベルヌーイ変数とみなせるので、しきい値は `p * (1 - p)`。
//! 分散は母分散（n で割る）で計算し、しきい値を厳密に超える列だけを残す。
use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::feature::FeatureVector;

/// 既定のベルヌーイ確率。
pub const DEFAULT_BERNOULLI_P: f64 = 0.9;

/// 出現有無ベクトルの列を数値行列に積む。
///
/// # Errors
/// 行が無い場合は [`PipelineError::EmptyMatrix`]、行の長さが揃っていない場合は
/// [`PipelineError::DimensionMismatch`] を返す。
pub fn to_matrix(vectors: &[FeatureVector]) -> Result<Array2<f64>> {
    let rows: Vec<Vec<f64>> = vectors.iter().map(FeatureVector::to_row).collect();
    matrix_from_rows(&rows)
}

/// 行のスライスから行列を組み立てる。
///
/// # Errors
/// [`to_matrix`] と同じ。
pub fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let Some(first) = rows.first() else {
        return Err(PipelineError::EmptyMatrix);
    };
    let width = first.len();
    for (row, values) in rows.iter().enumerate() {
        if values.len() != width {
            return Err(PipelineError::DimensionMismatch {
                expected: width,
                found: values.len(),
                row,
            });
        }
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|error| PipelineError::Clustering(format!("invalid matrix shape: {error}")))
}

/// 列の分散がしきい値以下の特徴を落とす。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarianceThreshold {
    threshold: f64,
}

/// 選択の結果。
#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    /// 残った列のみの行列（行数は入力と同じ）。
    pub matrix: Array2<f64>,
    /// 残った列の元の列番号（昇順）。
    pub kept: Vec<usize>,
    /// 入力の各列の母分散。
    pub variances: Array1<f64>,
}

impl Selected {
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.variances.len() - self.kept.len()
    }
}

impl VarianceThreshold {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// ベルヌーイ確率 `p` からしきい値 `p * (1 - p)` を作る。
    ///
    /// # Errors
    /// `p` が開区間 (0, 1) に無い場合は [`PipelineError::Configuration`] を返す。
    pub fn from_bernoulli(p: f64) -> Result<Self> {
        if !(p > 0.0 && p < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "bernoulli p must be in (0, 1), got {p}"
            )));
        }
        Ok(Self::new(p * (1.0 - p)))
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// 分散がしきい値を超える列だけを残す。
    ///
    /// # Errors
    /// 行が無い場合は [`PipelineError::EmptyMatrix`] を返す。
    pub fn select(&self, matrix: &Array2<f64>) -> Result<Selected> {
        if matrix.nrows() == 0 {
            return Err(PipelineError::EmptyMatrix);
        }
        let variances = matrix.var_axis(Axis(0), 0.0);
        let kept: Vec<usize> = variances
            .iter()
            .enumerate()
            .filter(|(_, variance)| **variance > self.threshold)
            .map(|(column, _)| column)
            .collect();
        let reduced = matrix.select(Axis(1), &kept);

        debug!(
            threshold = self.threshold,
            columns = matrix.ncols(),
            kept = kept.len(),
            "variance threshold applied"
        );
        Ok(Selected {
            matrix: reduced,
            kept,
            variances,
        })
    }
}

impl Default for VarianceThreshold {
    fn default() -> Self {
        Self::new(DEFAULT_BERNOULLI_P * (1.0 - DEFAULT_BERNOULLI_P))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn constant_columns_are_dropped() {
        // 列0は常に1、列1は半々、列2は常に0。
        let matrix = array![[1.0, 1.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 0.0]];
        let selected = VarianceThreshold::from_bernoulli(0.9)
            .expect("valid p")
            .select(&matrix)
            .expect("select");

        assert_eq!(selected.kept, vec![1]);
        assert!((selected.variances[1] - 0.25).abs() < 1e-12);
        assert_eq!(selected.matrix, array![[1.0], [0.0], [1.0], [0.0]]);
        assert_eq!(selected.dropped(), 2);
    }

    #[test]
    fn variance_must_strictly_exceed_threshold() {
        let matrix = array![[1.0, 1.0], [1.0, 0.0]];
        let selected = VarianceThreshold::new(0.0).select(&matrix).expect("select");
        assert_eq!(selected.kept, vec![1]);

        // 10行中1行だけ1の列は母分散 0.09
        let mut rows = vec![vec![0.0]; 10];
        rows[0][0] = 1.0;
        let matrix = matrix_from_rows(&rows).expect("matrix");
        let selected = VarianceThreshold::new(0.1).select(&matrix).expect("select");
        assert!(selected.kept.is_empty());
        assert!((selected.variances[0] - 0.09).abs() < 1e-9);
    }

    #[test]
    fn empty_matrix_is_rejected() {
        let error = matrix_from_rows(&[]).expect_err("no rows");
        assert!(matches!(error, PipelineError::EmptyMatrix));
    }

    #[test]
    fn inconsistent_rows_are_rejected() {
        let error =
            matrix_from_rows(&[vec![1.0, 0.0], vec![1.0]]).expect_err("ragged rows");
        assert!(matches!(
            error,
            PipelineError::DimensionMismatch { expected: 2, found: 1, row: 1 }
        ));
    }

    #[test]
    fn bernoulli_p_must_be_open_interval() {
        assert!(VarianceThreshold::from_bernoulli(0.0).is_err());
        assert!(VarianceThreshold::from_bernoulli(1.0).is_err());
        let threshold = VarianceThreshold::from_bernoulli(0.8).expect("valid").threshold();
        assert!((threshold - 0.16).abs() < 1e-12);
    }

    #[test]
    fn row_count_is_preserved() {
        let vectors: Vec<FeatureVector> = vec![
            vec![true, false].into(),
            vec![false, false].into(),
            vec![true, true].into(),
        ];
        let matrix = to_matrix(&vectors).expect("matrix");
        let selected = VarianceThreshold::new(0.0).select(&matrix).expect("select");
        assert_eq!(selected.matrix.nrows(), 3);
    }
}
