//! クラスタリング結果の評価（純度、凝集度、シルエット係数）。
pub mod cosine;
pub mod purity;
pub mod silhouette;

pub use cosine::{CohesionReport, average_cosine_distance};
pub use purity::{ClusterPurity, PurityReport, evaluate_purity};
pub use silhouette::silhouette_coefficient;
