//! The end-of-run statistics report.

use std::collections::BTreeMap;
use std::path::Path;

use cityweave_rules::RuleSet;
use serde::Serialize;

use crate::PostprocessError;
use crate::classify::ClassifiedBuilding;
use crate::households::ZoneAssignment;

/// Per-zone slice of the report.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatistics {
    /// Zone name.
    pub zone: String,
    /// Target population from the residents rule.
    pub target_residents: f64,
    /// Residents actually assigned.
    pub achieved_residents: u32,
    /// Achieved minus target after reconciliation.
    pub residual_residents: f64,
    /// Reconciliation steps taken.
    pub reconciliation_steps: u32,
    /// Households assigned.
    pub households: usize,
    /// Configured housing mix shares by class.
    pub target_mix: BTreeMap<String, f64>,
    /// Achieved shares among the zone's residential buildings.
    pub achieved_mix: BTreeMap<String, f64>,
    /// Constraint violations recorded in this zone.
    pub violations: BTreeMap<String, usize>,
}

/// The full report written to `statistics.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatistics {
    /// Seed the run was started with.
    pub seed: u64,
    /// RFC 3339 timestamp of report creation.
    pub timestamp: String,
    /// Buildings across all zones, residential or not.
    pub total_buildings: usize,
    /// Households across all zones.
    pub total_households: usize,
    /// Residents across all zones.
    pub total_residents: u64,
    /// Constraint violations summed over zones.
    pub violations: BTreeMap<String, usize>,
    /// Per-zone breakdowns, in zone order.
    pub zones: Vec<ZoneStatistics>,
}

impl RunStatistics {
    /// Builds the report from the classified buildings and zone
    /// assignments.
    #[must_use]
    pub fn collect(
        buildings: &[ClassifiedBuilding],
        assignments: &[ZoneAssignment],
        rules: &RuleSet,
        seed: u64,
    ) -> Self {
        let mut zones = Vec::with_capacity(assignments.len());
        let mut violations: BTreeMap<String, usize> = BTreeMap::new();
        for assignment in assignments {
            for (name, count) in &assignment.violations {
                *violations.entry(name.clone()).or_insert(0) += count;
            }
            zones.push(ZoneStatistics {
                zone: assignment.zone.clone(),
                target_residents: assignment.target_residents,
                achieved_residents: assignment.achieved_residents,
                residual_residents: assignment.residual_residents,
                reconciliation_steps: assignment.reconciliation_steps,
                households: assignment.households.len(),
                target_mix: target_mix(rules, &assignment.zone),
                achieved_mix: achieved_mix(buildings, &assignment.zone),
                violations: assignment.violations.clone(),
            });
        }
        Self {
            seed,
            timestamp: chrono::Utc::now().to_rfc3339(),
            total_buildings: buildings.len(),
            total_households: assignments.iter().map(|a| a.households.len()).sum(),
            total_residents: assignments
                .iter()
                .map(|a| u64::from(a.achieved_residents))
                .sum(),
            violations,
            zones,
        }
    }

    /// Writes the report as pretty JSON (tmp file, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the filesystem operations
    /// fail.
    pub fn save(&self, path: &Path) -> Result<(), PostprocessError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        log::info!("Wrote statistics to {}", path.display());
        Ok(())
    }

    /// Logs the human-readable end-of-run summary.
    pub fn log_summary(&self) {
        log::info!(
            "Run seed {}: {} buildings, {} households, {} residents",
            self.seed,
            self.total_buildings,
            self.total_households,
            self.total_residents
        );
        for zone in &self.zones {
            log::info!(
                "Zone '{}': {}/{:.0} residents, {} households, {} reconciliation steps, residual {:+.1}",
                zone.zone,
                zone.achieved_residents,
                zone.target_residents,
                zone.households,
                zone.reconciliation_steps,
                zone.residual_residents
            );
        }
        if self.violations.is_empty() {
            log::info!("No constraint violations recorded");
        } else {
            for (name, count) in &self.violations {
                log::warn!("Constraint '{name}' violated {count} times");
            }
        }
    }
}

fn target_mix(rules: &RuleSet, zone: &str) -> BTreeMap<String, f64> {
    rules.blended_housing_mix(zone).map_or_else(BTreeMap::new, |mix| {
        mix.iter()
            .map(|(class, pct)| (class.to_string(), *pct))
            .collect()
    })
}

#[allow(clippy::cast_precision_loss)]
fn achieved_mix(buildings: &[ClassifiedBuilding], zone: &str) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total = 0_usize;
    for classified in buildings {
        if classified.zone.as_deref() == Some(zone) && classified.class.is_residential() {
            *counts.entry(classified.class.to_string()).or_insert(0) += 1;
            total += 1;
        }
    }
    counts
        .into_iter()
        .map(|(class, count)| (class, count as f64 / total as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cityweave_layers::Building;
    use cityweave_rules_models::{BuildingClass, HouseholdType};
    use geo::{LineString, Polygon};

    use crate::households::Household;

    fn classified(id: &str, zone: &str, class: BuildingClass) -> ClassifiedBuilding {
        ClassifiedBuilding {
            building: Building {
                id: id.to_string(),
                polygon: Polygon::new(
                    LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
                    vec![],
                ),
                class,
                floor_area: 100.0,
                height: 6.0,
            },
            zone: Some(zone.to_string()),
            class,
            distance_to_center: 50.0,
            enclosure_area: None,
        }
    }

    fn assignment(zone: &str) -> ZoneAssignment {
        ZoneAssignment {
            zone: zone.to_string(),
            households: vec![Household {
                id: "b1-h1".to_string(),
                building_id: "b1".to_string(),
                zone: zone.to_string(),
                household_type: HouseholdType::SinglePerson,
                unit_size: 55.0,
                num_residents: 1,
            }],
            target_residents: 10.0,
            achieved_residents: 1,
            reconciliation_steps: 3,
            residual_residents: -9.0,
            violations: BTreeMap::from([("cramped".to_string(), 2)]),
        }
    }

    fn rules() -> RuleSet {
        RuleSet::from_toml_str(
            r#"
            [[zones]]
            name = "inner"
            min_distance = 0.0

            [[housing_type_rules]]
            zone = "inner"
            apartment_pct = 0.6
            detached_pct = 0.1
            terraced_pct = 0.3
        "#,
        )
        .unwrap()
    }

    #[test]
    fn report_aggregates_zones() {
        let buildings = vec![
            classified("b1", "inner", BuildingClass::Apartments),
            classified("b2", "inner", BuildingClass::Apartments),
            classified("b3", "inner", BuildingClass::Terraced),
            classified("b4", "inner", BuildingClass::Industrial),
        ];
        let report = RunStatistics::collect(&buildings, &[assignment("inner")], &rules(), 42);

        assert_eq!(report.seed, 42);
        assert_eq!(report.total_buildings, 4);
        assert_eq!(report.total_households, 1);
        assert_eq!(report.total_residents, 1);
        assert_eq!(report.violations["cramped"], 2);
        assert!(!report.timestamp.is_empty());

        let zone = &report.zones[0];
        assert!((zone.target_mix["apartments"] - 0.6).abs() < 1e-9);
        // Industrial is not residential, so the achieved mix splits 2:1.
        assert!((zone.achieved_mix["apartments"] - 2.0 / 3.0).abs() < 1e-9);
        assert!((zone.achieved_mix["terraced"] - 1.0 / 3.0).abs() < 1e-9);
        assert!(zone.achieved_mix.get("industrial").is_none());
    }

    #[test]
    fn report_round_trips_through_json() {
        let report = RunStatistics::collect(&[], &[assignment("inner")], &rules(), 7);
        let dir = std::env::temp_dir().join(format!("cityweave-stats-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("statistics.json");

        report.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["seed"], 7);
        assert_eq!(value["zones"][0]["zone"], "inner");
        assert_eq!(value["zones"][0]["violations"]["cramped"], 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
