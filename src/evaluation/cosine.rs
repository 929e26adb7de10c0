//! クラスタ内の平均コサイン距離（凝集度の診断値）。
use std::fmt;

use ndarray::{Array2, ArrayView1};
use serde::Serialize;

use crate::cluster::ClusterAssignment;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohesionReport {
    /// ラベル昇順。メンバーが2未満のクラスタは対が無いので `None`。
    pub clusters: Vec<Option<f64>>,
    /// 値のあるクラスタの単純平均。該当クラスタが無ければ `None`。
    pub overall: Option<f64>,
}

/// ゼロベクトルを含む対の距離は 1.0 とする。
fn cosine_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - a.dot(&b) / (norm_a * norm_b)
}

/// クラスタごとに全ての対のコサイン距離を平均する。
///
/// # Errors
/// 行数とラベル数が一致しない場合は [`PipelineError::DimensionMismatch`] を返す。
#[allow(clippy::cast_precision_loss)]
pub fn average_cosine_distance(
    matrix: &Array2<f64>,
    assignment: &ClusterAssignment,
) -> Result<CohesionReport> {
    if matrix.nrows() != assignment.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: matrix.nrows(),
            found: assignment.len(),
            row: assignment.len().min(matrix.nrows()),
        });
    }

    let clusters: Vec<Option<f64>> = assignment
        .members()
        .iter()
        .map(|rows| {
            let mut total = 0.0;
            let mut pairs = 0usize;
            for (i, a) in rows.iter().enumerate() {
                for b in &rows[..i] {
                    total += cosine_distance(matrix.row(*a), matrix.row(*b));
                    pairs += 1;
                }
            }
            (pairs > 0).then(|| total / pairs as f64)
        })
        .collect();

    let populated: Vec<f64> = clusters.iter().flatten().copied().collect();
    let overall =
        (!populated.is_empty()).then(|| populated.iter().sum::<f64>() / populated.len() as f64);

    Ok(CohesionReport { clusters, overall })
}

impl fmt::Display for CohesionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        for (label, distance) in self.clusters.iter().enumerate() {
            if let Some(distance) = distance {
                writeln!(f, "Cluster id {label} average cosine distance: {distance:?}")?;
            }
        }
        match self.overall {
            Some(overall) => writeln!(f, "Overall average cosine distance: {overall:?}"),
            None => writeln!(f, "Overall average cosine distance: n/a"),
        }
    }
}
