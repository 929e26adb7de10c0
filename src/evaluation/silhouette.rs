//! ユークリッド距離によるシルエット係数。
use ndarray::{Array2, ArrayView1};

use crate::cluster::ClusterAssignment;
use crate::error::{PipelineError, Result};

fn euclidean(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// 全サンプルの平均シルエット係数。
///
/// 空でないクラスタが2以上かつ行数未満の場合にのみ定義され、それ以外は `None`。
/// 単独メンバーのクラスタに属するサンプルの係数は 0 とする。
///
/// # Errors
/// 行数とラベル数が一致しない場合は [`PipelineError::DimensionMismatch`] を返す。
#[allow(clippy::cast_precision_loss)]
pub fn silhouette_coefficient(
    matrix: &Array2<f64>,
    assignment: &ClusterAssignment,
) -> Result<Option<f64>> {
    let rows = matrix.nrows();
    if rows != assignment.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: rows,
            found: assignment.len(),
            row: assignment.len().min(rows),
        });
    }

    let members = assignment.members();
    let populated = members.iter().filter(|m| !m.is_empty()).count();
    if populated < 2 || populated >= rows {
        return Ok(None);
    }

    let labels = assignment.labels();
    let mut total = 0.0;
    for i in 0..rows {
        let own = &members[labels[i]];
        if own.len() < 2 {
            continue;
        }
        let mean_distance = |group: &[usize]| -> f64 {
            group
                .iter()
                .filter(|j| **j != i)
                .map(|j| euclidean(matrix.row(i), matrix.row(*j)))
                .sum()
        };
        let a = mean_distance(own.as_slice()) / (own.len() - 1) as f64;
        let b = members
            .iter()
            .enumerate()
            .filter(|(label, group)| *label != labels[i] && !group.is_empty())
            .map(|(_, group)| mean_distance(group.as_slice()) / group.len() as f64)
            .fold(f64::INFINITY, f64::min);
        let denominator = a.max(b);
        if denominator > 0.0 {
            total += (b - a) / denominator;
        }
    }
    Ok(Some(total / rows as f64))
}
