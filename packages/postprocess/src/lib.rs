#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Postprocessing of generated city layers.
//!
//! Three passes run after the external generator: buildings are
//! reclassified by zone mixes and condition rules, street geometry is
//! edited, and households are assigned per zone and reconciled against
//! population targets. Every pass reads the generated layers and produces
//! new ones; nothing is edited in place, and a fixed seed reproduces the
//! whole postprocess byte for byte.

use thiserror::Error;

pub mod classify;
pub mod constraints;
pub mod households;
pub mod stats;
pub mod streets;
pub mod tables;

pub use classify::{ClassifiedBuilding, buildings_to_geojson, classify_buildings};
pub use constraints::ConstraintOutcome;
pub use households::{Household, ZoneAssignment, assign_households, building_counts};
pub use stats::{RunStatistics, ZoneStatistics};
pub use streets::apply_street_rules;
pub use tables::{write_buildings_csv, write_households_csv};

/// Errors raised while writing postprocess outputs.
///
/// Rule evaluation inside the passes is fail-soft and never surfaces
/// here; these cover the filesystem and serialization edges.
#[derive(Debug, Error)]
pub enum PostprocessError {
    /// An output file could not be written.
    #[error("Failed to write a postprocess output: {0}")]
    Io(#[from] std::io::Error),
    /// A layer could not be read or written.
    #[error("Failed to read or write a layer: {0}")]
    Layer(#[from] cityweave_layers::LayerError),
    /// A CSV table could not be written.
    #[error("Failed to write a CSV table: {0}")]
    Csv(#[from] csv::Error),
    /// The statistics report could not be serialized.
    #[error("Failed to serialize statistics: {0}")]
    Json(#[from] serde_json::Error),
}
