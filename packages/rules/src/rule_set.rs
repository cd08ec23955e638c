//! Rule file schema, loading, and up-front validation.
//!
//! The rule file is TOML with one array of tables per category. Zone-keyed
//! categories (`residents_rules`, `unit_size_rules`, `household_type_rules`,
//! `landuse_rules`) allow at most one rule per zone; condition-scoped
//! categories may overlap freely and are resolved by weight at evaluation
//! time. All structural problems are reported at load, before any pipeline
//! stage runs.

use std::collections::BTreeSet;
use std::path::Path;

use cityweave_rules_models::{BuildingClass, HouseholdType, Zone, ZoneIndex};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::condition::Condition;
use crate::{PERCENT_SUM_TOLERANCE, RuleError};

const fn default_weight() -> f64 {
    1.0
}

const fn default_tolerance() -> f64 {
    0.05
}

/// Target housing mix for one zone. Percentages must sum to 1.0 within
/// [`PERCENT_SUM_TOLERANCE`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HousingTypeRule {
    /// Zone the mix applies to.
    pub zone: String,
    /// Fraction of residential cells/buildings that are apartments.
    pub apartment_pct: f64,
    /// Fraction that are detached houses.
    pub detached_pct: f64,
    /// Fraction that are terraced houses.
    pub terraced_pct: f64,
    /// Relative weight when several mix rules target the same zone.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl HousingTypeRule {
    /// The mix as `(class, fraction)` pairs in declaration order.
    #[must_use]
    pub const fn mix(&self) -> [(BuildingClass, f64); 3] {
        [
            (BuildingClass::Apartments, self.apartment_pct),
            (BuildingClass::Detached, self.detached_pct),
            (BuildingClass::Terraced, self.terraced_pct),
        ]
    }
}

/// Statistical series of a street-cluster template that a
/// [`StreetTemplateRule`] can scale.
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
pub enum TemplateParameter {
    /// Distribution of street segment lengths.
    SegmentLength,
    /// Distribution of intersection degrees.
    IntersectionDegree,
    /// Distribution of forward angles between consecutive segments.
    ForwardAngle,
}

/// Scales one statistical series of a named street-cluster template.
///
/// The weight is the fraction of series entries that receive the factor;
/// partial application keeps scaled templates from looking uniformly
/// synthetic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreetTemplateRule {
    /// Cluster id the template belongs to.
    pub cluster: i32,
    /// Which series to scale.
    pub parameter: TemplateParameter,
    /// Multiplicative factor applied to selected entries.
    pub factor: f64,
    /// Fraction of entries scaled, in `[0, 1]`.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Condition-scoped building reclassification rule (spatial or
/// morphological, depending on which record it is evaluated against).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassRule {
    /// Match condition over the target's attribute record.
    pub condition: Condition,
    /// Class assigned when this rule wins the weighted draw.
    pub class: BuildingClass,
    /// Relative weight among matching rules.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Geometry-editing operation a [`StreetGeometryRule`] applies.
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
pub enum StreetAction {
    /// Ramer-Douglas-Peucker vertex reduction; parameter is the tolerance
    /// in meters.
    Simplify,
    /// Cut streets longer than the parameter (meters) into pieces.
    Split,
    /// Extend dead ends to meet a street within the parameter (meters).
    Extend,
    /// Round corners sharper than the parameter (degrees).
    Smooth,
}

/// Applies a geometry action to streets whose condition matches; the weight
/// is the per-street probability of application.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreetGeometryRule {
    /// Match condition over the street's attribute record.
    pub condition: Condition,
    /// Geometry operation to apply.
    pub action: StreetAction,
    /// Action parameter (meters or degrees, depending on the action).
    pub parameter: f64,
    /// Probability that a matching street receives the action.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Household-density factor for buildings whose condition matches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemographicRule {
    /// Match condition over the building's attribute record.
    pub condition: Condition,
    /// Multiplier on `floor_area / representative_unit_size` when sizing
    /// the building's unit count.
    pub density: f64,
    /// Relative weight among matching density rules.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Population target for one zone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResidentsRule {
    /// Zone the target applies to.
    pub zone: String,
    /// Target residents per grid unit of zone area.
    pub residents_per_grid: f64,
    /// Accepted relative deviation before reconciliation kicks in.
    #[serde(default = "default_tolerance")]
    pub tolerance_pct: f64,
}

/// Dwelling unit floor-size range for one zone.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitSizeRule {
    /// Zone the range applies to.
    pub zone: String,
    /// Smallest unit size in square meters.
    pub min_size: f64,
    /// Largest unit size in square meters.
    pub max_size: f64,
}

impl UnitSizeRule {
    /// Midpoint of the range, used when sizing a building's unit count.
    #[must_use]
    pub fn representative_size(&self) -> f64 {
        f64::midpoint(self.min_size, self.max_size)
    }
}

/// Household composition mix for one zone. Percentages must sum to 1.0
/// within [`PERCENT_SUM_TOLERANCE`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HouseholdTypeRule {
    /// Zone the mix applies to.
    pub zone: String,
    /// Fraction of households with a single adult and no children.
    pub single_person_pct: f64,
    /// Fraction of households with one adult and children.
    pub single_parent_pct: f64,
    /// Fraction of households with two adults and children.
    pub two_parent_pct: f64,
}

impl HouseholdTypeRule {
    /// The mix as `(type, fraction)` pairs in declaration order.
    #[must_use]
    pub const fn mix(&self) -> [(HouseholdType, f64); 3] {
        [
            (HouseholdType::SinglePerson, self.single_person_pct),
            (HouseholdType::SingleParent, self.single_parent_pct),
            (HouseholdType::TwoParent, self.two_parent_pct),
        ]
    }
}

/// Residential share of one zone's template cells.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LanduseRule {
    /// Zone the share applies to.
    pub zone: String,
    /// Fraction of cells kept residential, in `[0, 1]`.
    pub residential_pct: f64,
}

/// Requirement on candidate households: when `when` matches, `require`
/// must hold, otherwise the candidate is redrawn and, failing that, the
/// violation is recorded under `name`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintRule {
    /// Unique name the violation is recorded under.
    pub name: String,
    /// Guard condition selecting the candidates the requirement covers.
    pub when: Condition,
    /// Condition that must hold for covered candidates.
    pub require: Condition,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default)]
    zones: Vec<Zone>,
    #[serde(default)]
    housing_type_rules: Vec<HousingTypeRule>,
    #[serde(default)]
    street_template_rules: Vec<StreetTemplateRule>,
    #[serde(default)]
    spatial: Vec<ClassRule>,
    #[serde(default)]
    morphological: Vec<ClassRule>,
    #[serde(default)]
    street_geometry_rules: Vec<StreetGeometryRule>,
    #[serde(default)]
    demographic: Vec<DemographicRule>,
    #[serde(default)]
    residents_rules: Vec<ResidentsRule>,
    #[serde(default)]
    unit_size_rules: Vec<UnitSizeRule>,
    #[serde(default)]
    household_type_rules: Vec<HouseholdTypeRule>,
    #[serde(default)]
    landuse_rules: Vec<LanduseRule>,
    #[serde(default)]
    constraint_rules: Vec<ConstraintRule>,
}

/// Validated rule set for one run.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Concentric zone bands.
    pub zones: ZoneIndex,
    /// Housing mix targets per zone (several per zone allowed).
    pub housing_type_rules: Vec<HousingTypeRule>,
    /// Street-cluster template scaling rules.
    pub street_template_rules: Vec<StreetTemplateRule>,
    /// Condition rules over building attributes.
    pub spatial: Vec<ClassRule>,
    /// Condition rules over enclosure attributes.
    pub morphological: Vec<ClassRule>,
    /// Street geometry editing rules.
    pub street_geometry_rules: Vec<StreetGeometryRule>,
    /// Household-density rules.
    pub demographic: Vec<DemographicRule>,
    /// Per-zone population targets.
    pub residents_rules: Vec<ResidentsRule>,
    /// Per-zone unit size ranges.
    pub unit_size_rules: Vec<UnitSizeRule>,
    /// Per-zone household composition mixes.
    pub household_type_rules: Vec<HouseholdTypeRule>,
    /// Per-zone residential land shares.
    pub landuse_rules: Vec<LanduseRule>,
    /// Household constraint rules.
    pub constraint_rules: Vec<ConstraintRule>,
}

impl RuleSet {
    /// Loads and validates a rule set from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails any of the
    /// checks described on [`RuleSet::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let set = Self::from_toml_str(&text)?;
        log::info!(
            "Loaded {} rules in {} zones from {}",
            set.rule_count(),
            set.zones.len(),
            path.display()
        );
        Ok(set)
    }

    /// Parses and validates a rule set from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML (including condition strings and
    /// action names), an invalid zone partition, percentage groups that do
    /// not sum to 1, references to unknown zones, duplicate zone bindings
    /// in single-binding categories, out-of-range numeric fields, or
    /// duplicate/empty constraint names.
    pub fn from_toml_str(text: &str) -> Result<Self, RuleError> {
        let raw: RuleFile = toml::de::from_str(text)?;
        let zones = ZoneIndex::new(raw.zones)?;

        let set = Self {
            zones,
            housing_type_rules: raw.housing_type_rules,
            street_template_rules: raw.street_template_rules,
            spatial: raw.spatial,
            morphological: raw.morphological,
            street_geometry_rules: raw.street_geometry_rules,
            demographic: raw.demographic,
            residents_rules: raw.residents_rules,
            unit_size_rules: raw.unit_size_rules,
            household_type_rules: raw.household_type_rules,
            landuse_rules: raw.landuse_rules,
            constraint_rules: raw.constraint_rules,
        };
        set.validate()?;
        Ok(set)
    }

    fn validate(&self) -> Result<(), RuleError> {
        const HOUSING: &str = "housing_type";
        const HOUSEHOLD: &str = "household_type";

        for (i, rule) in self.housing_type_rules.iter().enumerate() {
            self.check_zone(HOUSING, &rule.zone)?;
            check_fraction(HOUSING, i, "apartment_pct", rule.apartment_pct)?;
            check_fraction(HOUSING, i, "detached_pct", rule.detached_pct)?;
            check_fraction(HOUSING, i, "terraced_pct", rule.terraced_pct)?;
            check_fraction(HOUSING, i, "weight", rule.weight)?;
            check_pct_sum(
                HOUSING,
                &rule.zone,
                rule.apartment_pct + rule.detached_pct + rule.terraced_pct,
            )?;
        }

        for (i, rule) in self.street_template_rules.iter().enumerate() {
            if rule.cluster < 0 {
                return Err(RuleError::OutOfRange {
                    category: "street_template",
                    index: i,
                    field: "cluster",
                    value: f64::from(rule.cluster),
                });
            }
            check_positive("street_template", i, "factor", rule.factor)?;
            check_fraction("street_template", i, "weight", rule.weight)?;
        }

        for (i, rule) in self.spatial.iter().enumerate() {
            check_fraction("spatial", i, "weight", rule.weight)?;
        }
        for (i, rule) in self.morphological.iter().enumerate() {
            check_fraction("morphological", i, "weight", rule.weight)?;
        }

        for (i, rule) in self.street_geometry_rules.iter().enumerate() {
            check_positive("street_geometry", i, "parameter", rule.parameter)?;
            check_fraction("street_geometry", i, "weight", rule.weight)?;
        }

        for (i, rule) in self.demographic.iter().enumerate() {
            check_positive("demographic", i, "density", rule.density)?;
            check_fraction("demographic", i, "weight", rule.weight)?;
        }

        for (i, rule) in self.residents_rules.iter().enumerate() {
            self.check_zone("residents", &rule.zone)?;
            if rule.residents_per_grid < 0.0 {
                return Err(RuleError::OutOfRange {
                    category: "residents",
                    index: i,
                    field: "residents_per_grid",
                    value: rule.residents_per_grid,
                });
            }
            check_fraction("residents", i, "tolerance_pct", rule.tolerance_pct)?;
        }
        check_unique_zone("residents", self.residents_rules.iter().map(|r| &r.zone))?;

        for (i, rule) in self.unit_size_rules.iter().enumerate() {
            self.check_zone("unit_size", &rule.zone)?;
            check_positive("unit_size", i, "min_size", rule.min_size)?;
            if rule.max_size < rule.min_size {
                return Err(RuleError::OutOfRange {
                    category: "unit_size",
                    index: i,
                    field: "max_size",
                    value: rule.max_size,
                });
            }
        }
        check_unique_zone("unit_size", self.unit_size_rules.iter().map(|r| &r.zone))?;

        for (i, rule) in self.household_type_rules.iter().enumerate() {
            self.check_zone(HOUSEHOLD, &rule.zone)?;
            check_fraction(HOUSEHOLD, i, "single_person_pct", rule.single_person_pct)?;
            check_fraction(HOUSEHOLD, i, "single_parent_pct", rule.single_parent_pct)?;
            check_fraction(HOUSEHOLD, i, "two_parent_pct", rule.two_parent_pct)?;
            check_pct_sum(
                HOUSEHOLD,
                &rule.zone,
                rule.single_person_pct + rule.single_parent_pct + rule.two_parent_pct,
            )?;
        }
        check_unique_zone(
            HOUSEHOLD,
            self.household_type_rules.iter().map(|r| &r.zone),
        )?;

        for (i, rule) in self.landuse_rules.iter().enumerate() {
            self.check_zone("landuse", &rule.zone)?;
            check_fraction("landuse", i, "residential_pct", rule.residential_pct)?;
        }
        check_unique_zone("landuse", self.landuse_rules.iter().map(|r| &r.zone))?;

        let mut names = BTreeSet::new();
        for (i, rule) in self.constraint_rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                return Err(RuleError::UnnamedConstraint { index: i });
            }
            if !names.insert(rule.name.as_str()) {
                return Err(RuleError::DuplicateConstraint {
                    name: rule.name.clone(),
                });
            }
        }

        Ok(())
    }

    fn check_zone(&self, category: &'static str, zone: &str) -> Result<(), RuleError> {
        if self.zones.get(zone).is_some() {
            Ok(())
        } else {
            Err(RuleError::UnknownZone {
                category,
                zone: zone.to_string(),
            })
        }
    }

    /// All housing mix rules bound to the given zone, in declaration order.
    #[must_use]
    pub fn housing_rules_for(&self, zone: &str) -> Vec<&HousingTypeRule> {
        self.housing_type_rules
            .iter()
            .filter(|rule| rule.zone == zone)
            .collect()
    }

    /// The zone's housing mix with multiple rules blended by their
    /// weights, or `None` when the zone has no usable housing rule.
    #[must_use]
    pub fn blended_housing_mix(&self, zone: &str) -> Option<[(BuildingClass, f64); 3]> {
        let rules = self.housing_rules_for(zone);
        let total_weight: f64 = rules.iter().map(|rule| rule.weight).sum();
        if rules.is_empty() || total_weight <= 0.0 {
            return None;
        }
        let mut mix = [
            (BuildingClass::Apartments, 0.0),
            (BuildingClass::Detached, 0.0),
            (BuildingClass::Terraced, 0.0),
        ];
        for rule in rules {
            for (slot, (_, pct)) in mix.iter_mut().zip(rule.mix()) {
                slot.1 += rule.weight / total_weight * pct;
            }
        }
        Some(mix)
    }

    /// The residents rule for the given zone, if configured.
    #[must_use]
    pub fn residents_rule_for(&self, zone: &str) -> Option<&ResidentsRule> {
        self.residents_rules.iter().find(|rule| rule.zone == zone)
    }

    /// The unit size rule for the given zone, if configured.
    #[must_use]
    pub fn unit_size_rule_for(&self, zone: &str) -> Option<&UnitSizeRule> {
        self.unit_size_rules.iter().find(|rule| rule.zone == zone)
    }

    /// The household composition rule for the given zone, if configured.
    #[must_use]
    pub fn household_rule_for(&self, zone: &str) -> Option<&HouseholdTypeRule> {
        self.household_type_rules
            .iter()
            .find(|rule| rule.zone == zone)
    }

    /// The landuse rule for the given zone, if configured.
    #[must_use]
    pub fn landuse_rule_for(&self, zone: &str) -> Option<&LanduseRule> {
        self.landuse_rules.iter().find(|rule| rule.zone == zone)
    }

    /// Total number of rules across all categories (zones excluded).
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.housing_type_rules.len()
            + self.street_template_rules.len()
            + self.spatial.len()
            + self.morphological.len()
            + self.street_geometry_rules.len()
            + self.demographic.len()
            + self.residents_rules.len()
            + self.unit_size_rules.len()
            + self.household_type_rules.len()
            + self.landuse_rules.len()
            + self.constraint_rules.len()
    }
}

fn check_fraction(
    category: &'static str,
    index: usize,
    field: &'static str,
    value: f64,
) -> Result<(), RuleError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RuleError::OutOfRange {
            category,
            index,
            field,
            value,
        })
    }
}

fn check_positive(
    category: &'static str,
    index: usize,
    field: &'static str,
    value: f64,
) -> Result<(), RuleError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(RuleError::OutOfRange {
            category,
            index,
            field,
            value,
        })
    }
}

fn check_pct_sum(category: &'static str, zone: &str, total: f64) -> Result<(), RuleError> {
    if (total - 1.0).abs() <= PERCENT_SUM_TOLERANCE {
        Ok(())
    } else {
        Err(RuleError::PercentageSum {
            category,
            zone: zone.to_string(),
            total,
        })
    }
}

fn check_unique_zone<'a>(
    category: &'static str,
    zones: impl Iterator<Item = &'a String>,
) -> Result<(), RuleError> {
    let mut seen = BTreeSet::new();
    for zone in zones {
        if !seen.insert(zone.as_str()) {
            return Err(RuleError::DuplicateZoneRule {
                category,
                zone: zone.clone(),
            });
        }
    }
    Ok(())
}
