#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Orchestrates a full layout run as an explicit state machine.
//!
//! A run moves `Init -> Preprocessed -> Generated -> Postprocessed -> Done`,
//! with `Failed` reachable from every stage. The stages themselves are
//! plain functions over a shared immutable [`RunContext`]; the
//! [`Pipeline`] wrapper only enforces ordering and records failure. The
//! external generator runs as a timeout-bounded subprocess between the
//! preprocess and postprocess stages, and its output layers are validated
//! before any postprocessing starts.
//!
//! The `Generated` state can also be entered directly from existing layer
//! files, which is how the CLI reruns postprocessing without regenerating
//! geometry.

use cityweave_layers::LayerError;
use cityweave_postprocess::PostprocessError;
use cityweave_preprocess::PreprocessError;
use cityweave_rules::RuleError;
use thiserror::Error;

pub mod context;
pub mod generator;
pub mod progress;
pub mod stages;

pub use context::{GridGeometry, RunContext, RunPaths};
pub use generator::{
    DEFAULT_GENERATOR_TIMEOUT, GeneratedLayers, GenerationError, GeneratorConfig,
    load_generated_layers, run_generator,
};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use stages::{Pipeline, Stage};

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The rule set failed to load or validate.
    #[error("Failed to load the rule set: {0}")]
    Config(#[from] RuleError),
    /// Generator inputs could not be prepared.
    #[error("Failed to prepare generator inputs: {0}")]
    Preprocess(#[from] PreprocessError),
    /// The external generator failed or produced unusable layers.
    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),
    /// A layer could not be read or written.
    #[error("Failed to read or write a layer: {0}")]
    Layer(#[from] LayerError),
    /// A postprocess output could not be produced.
    #[error("Postprocessing failed: {0}")]
    Postprocess(#[from] PostprocessError),
    /// A stage was invoked while the pipeline was in the wrong state.
    #[error("Pipeline step out of order: in state '{actual}', needs '{expected}'")]
    OutOfOrder {
        /// State the step requires.
        expected: Stage,
        /// State the pipeline is in.
        actual: Stage,
    },
}
