//! 1回の実験の結果とそのレンダリング。
use std::fmt;

use serde::Serialize;

use crate::cluster::ClusterAssignment;
use crate::evaluation::{CohesionReport, PurityReport};
use crate::feature::FeatureSelection;

/// `cluster-and-evaluate` の実行パラメータ。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Experiment {
    pub chunk_size: usize,
    pub k: usize,
    pub selection: FeatureSelection,
    /// 分散しきい値 `p * (1 - p)` の `p`。
    pub variance_p: f64,
    pub seed: Option<u64>,
    pub max_iterations: usize,
}

/// パイプライン1回分の終端出力。
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOutcome {
    pub experiment: Experiment,
    pub num_chunks: usize,
    pub raw_dimension: usize,
    pub reduced_dimension: usize,
    pub assignment: ClusterAssignment,
    pub purity: PurityReport,
    pub cohesion: CohesionReport,
    pub silhouette: Option<f64>,
}

impl fmt::Display for ExperimentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Chunk size: {}, clusters: {}, features: {}",
            self.experiment.chunk_size,
            self.experiment.k,
            self.experiment.selection.flags()
        )?;
        writeln!(
            f,
            "Feature dimensions: {} -> {}",
            self.raw_dimension, self.reduced_dimension
        )?;
        write!(f, "{}", self.purity)?;
        write!(f, "{}", self.cohesion)?;
        match self.silhouette {
            Some(score) => writeln!(f, "\nSilhouette Coefficient: {score:?}"),
            None => writeln!(f, "\nSilhouette Coefficient: n/a"),
        }
    }
}
