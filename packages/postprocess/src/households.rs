//! Household assignment and per-zone population reconciliation.
//!
//! Zones are independent: each runs on its own worker thread with its own
//! RNG stream, and results are merged in zone order, so worker scheduling
//! never changes the output. Within a zone, buildings are processed in
//! input order, units are drawn per building, and a bounded
//! reconciliation pass nudges the achieved population into the residents
//! rule's tolerance band by adding or trimming single-person households.

use std::collections::BTreeMap;
use std::thread;

use cityweave_rules::{ConstraintRule, DemographicRule, RuleSet, UnitSizeRule, pick_weighted};
use cityweave_rules_models::{HouseholdType, Zone};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::classify::{ClassifiedBuilding, building_base_record};
use crate::constraints::check_constraints;

/// First RNG stream for zone workers; the zone at position `n` uses
/// stream `HOUSEHOLD_STREAM_BASE + n`.
const HOUSEHOLD_STREAM_BASE: u64 = 16;

/// Redraws before a violating candidate is kept and recorded.
const REDRAW_LIMIT: usize = 5;

/// Upper bound on reconciliation steps per zone.
const MAX_RECONCILE_STEPS: u32 = 10_000;

/// One assigned household.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Household {
    /// Unique id, `<building_id>-h<unit>`.
    pub id: String,
    /// Building the household lives in.
    pub building_id: String,
    /// Zone of the building.
    pub zone: String,
    /// Drawn household composition.
    pub household_type: HouseholdType,
    /// Drawn dwelling unit size in square meters.
    pub unit_size: f64,
    /// Residents in the household.
    pub num_residents: u32,
}

/// Assignment results for one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneAssignment {
    /// Zone name.
    pub zone: String,
    /// Assigned households, in building order then unit order.
    pub households: Vec<Household>,
    /// Target population from the residents rule, zero when unconfigured.
    pub target_residents: f64,
    /// Residents across all assigned households.
    pub achieved_residents: u32,
    /// Reconciliation steps taken (each adds or trims one household).
    pub reconciliation_steps: u32,
    /// Achieved minus target residents after reconciliation.
    pub residual_residents: f64,
    /// Recorded constraint violations by constraint name.
    pub violations: BTreeMap<String, usize>,
}

/// Assigns households to every classified building, one worker thread per
/// zone, merged in zone order.
///
/// `zone_areas` maps zone names to their area in square meters (grid
/// cells times cell area, or summed enclosure areas); `grid_unit_area` is
/// the area of one template cell. Buildings outside every zone get no
/// households.
#[must_use]
pub fn assign_households(
    buildings: &[ClassifiedBuilding],
    rules: &RuleSet,
    zone_areas: &BTreeMap<String, f64>,
    grid_unit_area: f64,
    seed: u64,
) -> Vec<ZoneAssignment> {
    let zones = rules.zones.zones();
    let mut per_zone: Vec<Vec<&ClassifiedBuilding>> = vec![Vec::new(); zones.len()];
    for classified in buildings {
        if let Some(zone_name) = &classified.zone
            && let Some(position) = zones.iter().position(|zone| &zone.name == zone_name)
        {
            per_zone[position].push(classified);
        }
    }

    let assignments: Vec<ZoneAssignment> = thread::scope(|scope| {
        let handles: Vec<_> = zones
            .iter()
            .enumerate()
            .map(|(position, zone)| {
                let zone_buildings = per_zone[position].as_slice();
                let area = zone_areas.get(&zone.name).copied().unwrap_or(0.0);
                scope.spawn(move || {
                    assign_zone(
                        position,
                        zone,
                        zone_buildings,
                        rules,
                        area,
                        grid_unit_area,
                        seed,
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(assignment) => assignment,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    let households: usize = assignments.iter().map(|a| a.households.len()).sum();
    let residents: u64 = assignments
        .iter()
        .map(|a| u64::from(a.achieved_residents))
        .sum();
    log::info!(
        "Assigned {households} households ({residents} residents) across {} zones",
        assignments.len()
    );
    assignments
}

/// Per-building `(households, residents)` counts across all assignments.
#[must_use]
pub fn building_counts(assignments: &[ZoneAssignment]) -> BTreeMap<String, (usize, u32)> {
    let mut counts: BTreeMap<String, (usize, u32)> = BTreeMap::new();
    for assignment in assignments {
        for household in &assignment.households {
            let entry = counts.entry(household.building_id.clone()).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += household.num_residents;
        }
    }
    counts
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn assign_zone(
    position: usize,
    zone: &Zone,
    buildings: &[&ClassifiedBuilding],
    rules: &RuleSet,
    zone_area: f64,
    grid_unit_area: f64,
    seed: u64,
) -> ZoneAssignment {
    let mut assignment = ZoneAssignment {
        zone: zone.name.clone(),
        households: Vec::new(),
        target_residents: 0.0,
        achieved_residents: 0,
        reconciliation_steps: 0,
        residual_residents: 0.0,
        violations: BTreeMap::new(),
    };
    let (Some(unit_size), Some(household_mix)) = (
        rules.unit_size_rule_for(&zone.name),
        rules.household_rule_for(&zone.name),
    ) else {
        if !buildings.is_empty() {
            log::warn!(
                "Zone '{}' lacks a unit-size or household-type rule; {} buildings left empty",
                zone.name,
                buildings.len()
            );
        }
        return assignment;
    };

    let mut rng = zone_rng(seed, position);
    let representative = unit_size.representative_size();
    let type_weights: Vec<(f64, HouseholdType)> = household_mix
        .mix()
        .into_iter()
        .map(|(household_type, pct)| (pct, household_type))
        .collect();

    let mut capacities: Vec<usize> = Vec::with_capacity(buildings.len());
    let mut unit_counts: Vec<usize> = vec![0; buildings.len()];
    for (building_idx, classified) in buildings.iter().enumerate() {
        capacities.push((classified.building.floor_area / unit_size.min_size).floor() as usize);
        if !classified.class.is_residential() {
            continue;
        }
        let density = density_for(classified, &rules.demographic, &mut rng);
        let units = unit_target(classified.building.floor_area, representative, density);
        for _ in 0..units {
            unit_counts[building_idx] += 1;
            let (household, violated) = draw_household(
                &mut rng,
                classified,
                &zone.name,
                unit_size,
                &type_weights,
                &rules.constraint_rules,
                unit_counts[building_idx],
            );
            assignment.achieved_residents += household.num_residents;
            for name in violated {
                *assignment.violations.entry(name).or_insert(0) += 1;
            }
            assignment.households.push(household);
        }
    }

    if let Some(residents) = rules.residents_rule_for(&zone.name) {
        if zone_area > 0.0 && grid_unit_area > 0.0 {
            let target = residents.residents_per_grid * zone_area / grid_unit_area;
            assignment.target_residents = target;
            reconcile_zone(
                &mut assignment,
                buildings,
                &capacities,
                &mut unit_counts,
                unit_size,
                residents.tolerance_pct,
                &mut rng,
            );
        } else {
            log::warn!(
                "Zone '{}' has a residents rule but no usable area; reconciliation skipped",
                zone.name
            );
        }
    }
    assignment
}

/// Nudges the achieved population into the tolerance band around the
/// target by adding single-person households to buildings with spare
/// capacity (round robin) or trimming the most recent single-person
/// households. Stops when the band, the step bound, or an eligibility
/// dead end is reached; the residual is recorded either way.
fn reconcile_zone(
    assignment: &mut ZoneAssignment,
    buildings: &[&ClassifiedBuilding],
    capacities: &[usize],
    unit_counts: &mut [usize],
    unit_size: &UnitSizeRule,
    tolerance_pct: f64,
    rng: &mut ChaCha8Rng,
) {
    let target = assignment.target_residents;
    let band = target * tolerance_pct.max(0.0);
    let mut cursor = 0;
    let mut steps = 0;
    while steps < MAX_RECONCILE_STEPS {
        let deviation = f64::from(assignment.achieved_residents) - target;
        if deviation.abs() <= band {
            break;
        }
        let progressed = if deviation < 0.0 {
            add_single_person(
                assignment,
                buildings,
                capacities,
                unit_counts,
                unit_size,
                &mut cursor,
                rng,
            )
        } else {
            trim_single_person(assignment, buildings, unit_counts)
        };
        if !progressed {
            break;
        }
        steps += 1;
    }
    assignment.reconciliation_steps = steps;
    assignment.residual_residents = f64::from(assignment.achieved_residents) - target;
}

fn add_single_person(
    assignment: &mut ZoneAssignment,
    buildings: &[&ClassifiedBuilding],
    capacities: &[usize],
    unit_counts: &mut [usize],
    unit_size: &UnitSizeRule,
    cursor: &mut usize,
    rng: &mut ChaCha8Rng,
) -> bool {
    if buildings.is_empty() {
        return false;
    }
    let found = (0..buildings.len())
        .map(|offset| (*cursor + offset) % buildings.len())
        .find(|idx| buildings[*idx].class.is_residential() && unit_counts[*idx] < capacities[*idx]);
    let Some(building_idx) = found else {
        return false;
    };
    *cursor = (building_idx + 1) % buildings.len();
    unit_counts[building_idx] += 1;
    let classified = buildings[building_idx];
    assignment.households.push(Household {
        id: format!("{}-h{}", classified.building.id, unit_counts[building_idx]),
        building_id: classified.building.id.clone(),
        zone: assignment.zone.clone(),
        household_type: HouseholdType::SinglePerson,
        unit_size: rng.gen_range(unit_size.min_size..=unit_size.max_size),
        num_residents: 1,
    });
    assignment.achieved_residents += 1;
    true
}

fn trim_single_person(
    assignment: &mut ZoneAssignment,
    buildings: &[&ClassifiedBuilding],
    unit_counts: &mut [usize],
) -> bool {
    let Some(household_idx) = assignment
        .households
        .iter()
        .rposition(|household| household.household_type == HouseholdType::SinglePerson)
    else {
        return false;
    };
    let removed = assignment.households.remove(household_idx);
    if let Some(building_idx) = buildings
        .iter()
        .position(|classified| classified.building.id == removed.building_id)
    {
        unit_counts[building_idx] = unit_counts[building_idx].saturating_sub(1);
    }
    assignment.achieved_residents -= removed.num_residents;
    true
}

fn draw_household(
    rng: &mut ChaCha8Rng,
    classified: &ClassifiedBuilding,
    zone_name: &str,
    unit_size: &UnitSizeRule,
    type_weights: &[(f64, HouseholdType)],
    constraints: &[ConstraintRule],
    unit_no: usize,
) -> (Household, Vec<String>) {
    let base = building_base_record(classified);
    let mut attempts = 0;
    loop {
        let household_type = pick_weighted(rng, type_weights)
            .copied()
            .unwrap_or(HouseholdType::SinglePerson);
        let size = rng.gen_range(unit_size.min_size..=unit_size.max_size);
        let residents = draw_residents(rng, household_type);

        let mut record = base.clone();
        record.insert("household_type", household_type);
        record.insert("unit_size", size);
        record.insert("num_residents", residents);
        let outcome = check_constraints(constraints, &record);
        attempts += 1;
        if outcome.is_clean() || attempts > REDRAW_LIMIT {
            let household = Household {
                id: format!("{}-h{unit_no}", classified.building.id),
                building_id: classified.building.id.clone(),
                zone: zone_name.to_string(),
                household_type,
                unit_size: size,
                num_residents: residents,
            };
            return (household, outcome.violated);
        }
    }
}

fn draw_residents(rng: &mut ChaCha8Rng, household_type: HouseholdType) -> u32 {
    let (low, high) = household_type.child_range();
    let children = if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    };
    household_type.adults() + children
}

fn density_for(
    classified: &ClassifiedBuilding,
    rules: &[DemographicRule],
    rng: &mut ChaCha8Rng,
) -> f64 {
    let record = building_base_record(classified);
    let mut matching: Vec<(f64, f64)> = Vec::new();
    for rule in rules {
        match rule.condition.evaluate(&record) {
            Ok(true) => matching.push((rule.weight, rule.density)),
            Ok(false) => {}
            Err(err) => log::warn!(
                "Demographic rule skipped for building {}: {err}",
                classified.building.id
            ),
        }
    }
    pick_weighted(rng, &matching).copied().unwrap_or(1.0)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unit_target(floor_area: f64, representative_size: f64, density: f64) -> usize {
    if representative_size <= 0.0 {
        return 0;
    }
    let raw = (floor_area / representative_size * density).round();
    if raw.is_finite() && raw > 0.0 {
        raw as usize
    } else {
        0
    }
}

fn zone_rng(seed: u64, position: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(HOUSEHOLD_STREAM_BASE + position as u64);
    rng
}
