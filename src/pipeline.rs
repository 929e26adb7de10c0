//! 文集合から純度レポートまでの実験パイプライン。
//!
//! ステージ: chunk → vectorize → select → cluster → evaluate。
//! どのステージで失敗したかは [`PipelineError::Stage`](crate::error::PipelineError::Stage)
//! に記録される。
pub mod orchestrator;
pub mod outcome;

pub use orchestrator::{Pipeline, PipelineBuilder};
pub use outcome::{Experiment, ExperimentOutcome};
