#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Rule-driven preprocessing of generator inputs.
//!
//! Two inputs are rewritten before the external generator runs: the
//! template grid, whose residential cells are reassigned to meet each
//! zone's housing mix and landuse share, and the street-cluster templates,
//! whose statistical series are scaled by street-template rules. Both
//! transformations are seeded and produce derived copies; the inputs are
//! never touched.

use thiserror::Error;

pub mod clusters;
pub mod grid;
pub mod mix;

pub use clusters::{ClusterTemplate, TemplateScaling, scale_cluster_dir, scale_cluster_templates};
pub use grid::{TemplateGrid, UNKNOWN_ZONE_ID, ZoneGrid};
pub use mix::{PreprocessOutcome, PreprocessStats, apply_housing_mix, modify_template_file};

/// Number of items a weight-sized fraction selects out of `total`,
/// rounded to the nearest whole item.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
pub(crate) fn sample_count(weight: f64, total: usize) -> usize {
    ((weight * total as f64).round() as usize).min(total)
}

/// Errors raised while reading, transforming, or writing generator inputs.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// Template file could not be read or written.
    #[error("Failed to read or write template: {0}")]
    Io(#[from] std::io::Error),
    /// Template file is not a valid MessagePack payload.
    #[error("Failed to decode template: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    /// Template could not be serialized.
    #[error("Failed to encode template: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// Template decoded but its dimensions are inconsistent.
    #[error("Invalid template grid: {message}")]
    InvalidGrid {
        /// What was wrong with the grid.
        message: String,
    },
}
