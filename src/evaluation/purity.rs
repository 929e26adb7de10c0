//! 多数派著者に基づくクラスタ純度。
//!
//! 各チャンクの著者はチャンク内で最も多い著者（同数は初出優先）とし、
//! クラスタの多数派著者も同じ規則で決める。メンバーのいないクラスタは
//! エラーにせず、多数派・純度とも `None`（出力上は -1）として総合純度から除外する。
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};

use crate::chunk::{Chunk, majority};
use crate::cluster::ClusterAssignment;
use crate::error::{PipelineError, Result};

/// 空クラスタを表す出力上の値。
pub const EMPTY_CLUSTER_SENTINEL: i64 = -1;

/// 1クラスタ分の評価。
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterPurity {
    pub label: usize,
    pub size: usize,
    /// 多数派著者の番号（[`PurityReport::authors`] の添字）。空クラスタは `None`。
    pub majority_author: Option<usize>,
    pub majority_count: usize,
    /// `majority_count / size`。空クラスタは `None`。
    pub purity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PurityReport {
    /// 著者番号から著者ラベルへの対応（チャンク内の初出順）。
    pub authors: Vec<String>,
    /// ラベル昇順（`0..k`）のクラスタ評価。
    pub clusters: Vec<ClusterPurity>,
    pub num_labels: usize,
    pub num_chunks: usize,
    /// 空でないクラスタの多数派数の合計 / チャンク数。チャンクが無ければ 0.0。
    pub overall: f64,
}

impl PurityReport {
    #[must_use]
    pub fn author_name(&self, author: usize) -> Option<&str> {
        self.authors.get(author).map(String::as_str)
    }

    /// 空クラスタの数。
    #[must_use]
    pub fn empty_clusters(&self) -> usize {
        self.clusters.iter().filter(|c| c.size == 0).count()
    }
}

/// クラスタ割り当てとチャンクから純度を計算する。
///
/// # Errors
/// ラベル数とチャンク数が一致しない場合は [`PipelineError::DimensionMismatch`] を返す。
#[allow(clippy::cast_precision_loss)]
pub fn evaluate_purity(assignment: &ClusterAssignment, chunks: &[Chunk]) -> Result<PurityReport> {
    if assignment.len() != chunks.len() {
        return Err(PipelineError::DimensionMismatch {
            expected: chunks.len(),
            found: assignment.len(),
            row: assignment.len().min(chunks.len()),
        });
    }

    let mut authors: Vec<String> = Vec::new();
    let mut author_index: FxHashMap<&str, usize> = FxHashMap::default();
    for author in chunks.iter().flat_map(|chunk| chunk.authors.iter()) {
        author_index.entry(author.as_str()).or_insert_with(|| {
            authors.push(author.clone());
            authors.len() - 1
        });
    }

    let chunk_majorities: Vec<Option<usize>> = chunks
        .iter()
        .map(|chunk| {
            chunk
                .majority_author()
                .and_then(|author| author_index.get(author).copied())
        })
        .collect();

    let mut clusters = Vec::with_capacity(assignment.k());
    let mut sum_majority = 0usize;
    for (label, rows) in assignment.members().into_iter().enumerate() {
        let size = rows.len();
        let winner = majority(rows.iter().filter_map(|row| chunk_majorities[*row]));
        let majority_count = winner.map_or(0, |author| {
            rows.iter()
                .filter(|row| chunk_majorities[**row] == Some(author))
                .count()
        });
        sum_majority += majority_count;
        clusters.push(ClusterPurity {
            label,
            size,
            majority_author: winner,
            majority_count,
            purity: (size > 0).then(|| majority_count as f64 / size as f64),
        });
    }

    let overall = if chunks.is_empty() {
        0.0
    } else {
        sum_majority as f64 / chunks.len() as f64
    };

    Ok(PurityReport {
        authors,
        clusters,
        num_labels: assignment.len(),
        num_chunks: chunks.len(),
        overall,
    })
}

impl fmt::Display for PurityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Num of labels: {}", self.num_labels)?;
        writeln!(f, "Num of chunks: {}", self.num_chunks)?;
        for cluster in &self.clusters {
            match (cluster.majority_author, cluster.purity) {
                (Some(author), Some(purity)) => writeln!(
                    f,
                    "Cluster id {} major author: {}, purity: {:?}",
                    cluster.label,
                    self.author_name(author).unwrap_or("?"),
                    purity
                )?,
                _ => writeln!(
                    f,
                    "Cluster id {} major author: {EMPTY_CLUSTER_SENTINEL}, purity: {EMPTY_CLUSTER_SENTINEL}",
                    cluster.label
                )?,
            }
        }
        writeln!(f, "Overall purity: {:?}", self.overall)
    }
}

#[derive(Serialize)]
struct ClusterJson<'a> {
    label: usize,
    size: usize,
    majority_author: Option<&'a str>,
    majority_author_index: i64,
    majority_count: usize,
    purity: f64,
}

#[derive(Serialize)]
struct ReportJson<'a> {
    num_labels: usize,
    num_chunks: usize,
    authors: &'a [String],
    clusters: Vec<ClusterJson<'a>>,
    overall_purity: f64,
}

impl Serialize for PurityReport {
    #[allow(clippy::cast_precision_loss)]
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let clusters = self
            .clusters
            .iter()
            .map(|cluster| ClusterJson {
                label: cluster.label,
                size: cluster.size,
                majority_author: cluster.majority_author.and_then(|a| self.author_name(a)),
                majority_author_index: cluster
                    .majority_author
                    .and_then(|a| i64::try_from(a).ok())
                    .unwrap_or(EMPTY_CLUSTER_SENTINEL),
                majority_count: cluster.majority_count,
                purity: cluster
                    .purity
                    .unwrap_or(EMPTY_CLUSTER_SENTINEL as f64),
            })
            .collect();
        ReportJson {
            num_labels: self.num_labels,
            num_chunks: self.num_chunks,
            authors: &self.authors,
            clusters,
            overall_purity: self.overall,
        }
        .serialize(serializer)
    }
}
