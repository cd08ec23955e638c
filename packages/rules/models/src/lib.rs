#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Building class and household taxonomy types plus the radial zone index.
//!
//! This crate defines the canonical building-class enumeration shared with
//! the template grid format and the generated building layers, the household
//! composition types used by household assignment, and the [`ZoneIndex`]
//! that maps a distance from the city center to its concentric zone.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub mod zone;

pub use zone::{Zone, ZoneIndex, ZoneIndexError};

/// Building classification shared between template grids and building layers.
///
/// The numeric values are the cell codes used by the template grid format
/// and must not be renumbered.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BuildingClass {
    /// Multi-storey apartment buildings
    Apartments = 14,
    /// Large commercial structures (malls, retail boxes)
    BigCommercial = 15,
    /// Mixed-form building complexes
    Complex = 16,
    /// Free-standing single-family houses
    Detached = 17,
    /// Blocks built over their full footprint
    FilledBlock = 18,
    /// Industrial halls and plants
    Industrial = 19,
    /// Irregularly shaped block developments
    IrregularBlock = 20,
    /// Buildings lining the perimeter of a block
    PerimeterBlock = 21,
    /// Row/terraced houses sharing side walls
    Terraced = 22,
    /// No building / unclassified cell
    None = 99,
}

impl BuildingClass {
    /// Returns the grid cell code for this class.
    #[must_use]
    pub const fn value(self) -> i32 {
        self as i32
    }

    /// Creates a building class from a grid cell code.
    ///
    /// # Errors
    ///
    /// Returns an error if the code is not one of the defined classes.
    pub const fn from_value(value: i32) -> Result<Self, InvalidClassError> {
        match value {
            14 => Ok(Self::Apartments),
            15 => Ok(Self::BigCommercial),
            16 => Ok(Self::Complex),
            17 => Ok(Self::Detached),
            18 => Ok(Self::FilledBlock),
            19 => Ok(Self::Industrial),
            20 => Ok(Self::IrregularBlock),
            21 => Ok(Self::PerimeterBlock),
            22 => Ok(Self::Terraced),
            99 => Ok(Self::None),
            _ => Err(InvalidClassError { value }),
        }
    }

    /// Whether buildings of this class contain dwellings.
    #[must_use]
    pub const fn is_residential(self) -> bool {
        match self {
            Self::Apartments
            | Self::Complex
            | Self::Detached
            | Self::FilledBlock
            | Self::IrregularBlock
            | Self::PerimeterBlock
            | Self::Terraced => true,
            Self::BigCommercial | Self::Industrial | Self::None => false,
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Apartments,
            Self::BigCommercial,
            Self::Complex,
            Self::Detached,
            Self::FilledBlock,
            Self::Industrial,
            Self::IrregularBlock,
            Self::PerimeterBlock,
            Self::Terraced,
            Self::None,
        ]
    }
}

/// Error returned when decoding a [`BuildingClass`] from an unknown grid
/// cell code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidClassError {
    /// The unrecognized cell code.
    pub value: i32,
}

impl std::fmt::Display for InvalidClassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid building class code {}", self.value)
    }
}

impl std::error::Error for InvalidClassError {}

/// Household composition drawn for each assigned dwelling unit.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HouseholdType {
    /// One adult living alone
    SinglePerson,
    /// One adult with children
    SingleParent,
    /// Two adults with children
    TwoParent,
}

impl HouseholdType {
    /// Number of adults in a household of this type.
    #[must_use]
    pub const fn adults(self) -> u32 {
        match self {
            Self::SinglePerson | Self::SingleParent => 1,
            Self::TwoParent => 2,
        }
    }

    /// Inclusive range of children a household of this type can have.
    #[must_use]
    pub const fn child_range(self) -> (u32, u32) {
        match self {
            Self::SinglePerson => (0, 0),
            Self::SingleParent => (1, 3),
            Self::TwoParent => (1, 4),
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::SinglePerson, Self::SingleParent, Self::TwoParent]
    }
}
