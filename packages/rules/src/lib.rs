#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Declarative layout rules: loading, validation, and evaluation support.
//!
//! A [`RuleSet`] is loaded from a TOML file and validated up front; every
//! malformed field, unknown zone reference, or percentage group that does
//! not sum to 1 fails the load before any pipeline stage runs. Condition
//! strings are parsed into explicit [`condition::Condition`] trees at load
//! time and evaluated against per-target attribute records later.

use cityweave_rules_models::ZoneIndexError;
use thiserror::Error;

pub mod condition;
pub mod rule_set;
pub mod select;

pub use condition::{
    AttrRecord, AttrValue, CompareOp, Condition, ConditionParseError, EvaluationError, Literal,
};
pub use rule_set::{
    ClassRule, ConstraintRule, DemographicRule, HouseholdTypeRule, HousingTypeRule, LanduseRule,
    ResidentsRule, RuleSet, StreetAction, StreetGeometryRule, StreetTemplateRule,
    TemplateParameter, UnitSizeRule,
};
pub use select::{pick_weighted, pick_weighted_index};

/// Allowed deviation when a percentage group is checked against 1.0.
pub const PERCENT_SUM_TOLERANCE: f64 = 0.01;

/// Fatal configuration errors raised while loading or validating a rule
/// file. Any of these aborts the run before a stage executes.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Rule file could not be read.
    #[error("Failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
    /// Rule file is not valid TOML or contains malformed fields (including
    /// unparseable condition strings and unknown action names).
    #[error("Failed to parse rule file: {0}")]
    Parse(#[from] toml::de::Error),
    /// Zone list is not a valid radial partition.
    #[error("Invalid zones: {0}")]
    Zones(#[from] ZoneIndexError),
    /// A percentage group does not sum to 1 within the tolerance.
    #[error(
        "{category} percentages for zone '{zone}' sum to {total}, \
         expected 1.0 within {PERCENT_SUM_TOLERANCE}"
    )]
    PercentageSum {
        /// Rule category containing the group.
        category: &'static str,
        /// Zone the rule is bound to.
        zone: String,
        /// The offending sum.
        total: f64,
    },
    /// A rule references a zone that is not configured.
    #[error("{category} rule references unknown zone '{zone}'")]
    UnknownZone {
        /// Rule category containing the reference.
        category: &'static str,
        /// The unknown zone name.
        zone: String,
    },
    /// More than one rule of a single-binding category targets a zone.
    #[error("duplicate {category} rule for zone '{zone}'")]
    DuplicateZoneRule {
        /// Rule category with the clash.
        category: &'static str,
        /// Zone bound twice.
        zone: String,
    },
    /// A numeric field is outside its allowed range.
    #[error("{category} rule #{index}: {field} = {value} is out of range")]
    OutOfRange {
        /// Rule category containing the field.
        category: &'static str,
        /// Zero-based rule position within its category.
        index: usize,
        /// Offending field name.
        field: &'static str,
        /// Offending value.
        value: f64,
    },
    /// Constraint rules must carry unique, non-empty names.
    #[error("duplicate constraint rule name '{name}'")]
    DuplicateConstraint {
        /// The repeated name.
        name: String,
    },
    /// A constraint rule without a name cannot be reported against.
    #[error("constraint rule #{index} has an empty name")]
    UnnamedConstraint {
        /// Zero-based position within `constraint_rules`.
        index: usize,
    },
}
