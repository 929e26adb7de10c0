#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chunk;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod corpus;
pub mod error;
pub mod evaluation;
pub mod feature;
pub mod observability;
pub mod pipeline;
pub mod selection;
pub mod tagger;

pub use error::{PipelineError, Result};
