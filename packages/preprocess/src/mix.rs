//! Housing-mix and landuse reassignment of template grid cells.
//!
//! Every cell inside a configured zone is rewritten: the zone's landuse
//! rule fixes how many cells stay residential, and its housing-type rules
//! fix how the residential cells split across apartment, detached, and
//! terraced classes. Targets are hit exactly by sampling cells without
//! replacement instead of rolling each cell independently. Cells outside
//! every zone keep their original codes.

use std::collections::BTreeMap;
use std::path::Path;

use cityweave_rules::RuleSet;
use cityweave_rules_models::BuildingClass;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::grid::{TemplateGrid, UNKNOWN_ZONE_ID, ZoneGrid, zone_sidecar_path};
use crate::{PreprocessError, sample_count};

/// RNG stream for grid-cell reassignment, disjoint from the template stream.
const GRID_STREAM: u64 = 1;

/// Cell tallies gathered while the grid is rewritten.
///
/// Zones missing a housing or landuse rule are excluded; their cells are
/// marked unbuilt but not tallied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreprocessStats {
    /// Cells in the grid, inside or outside zones.
    pub total_cells: usize,
    /// Reassigned cells per zone.
    pub by_zone: BTreeMap<String, usize>,
    /// Reassigned cells per building class.
    pub by_class: BTreeMap<String, usize>,
    /// Reassigned cells per zone and building class.
    pub by_zone_and_class: BTreeMap<String, BTreeMap<String, usize>>,
}

/// Everything [`apply_housing_mix`] produces.
#[derive(Debug, Clone)]
pub struct PreprocessOutcome {
    /// The rewritten template grid.
    pub grid: TemplateGrid,
    /// Zone membership of every cell, for the sidecar file.
    pub zone_grid: ZoneGrid,
    /// Cell tallies.
    pub stats: PreprocessStats,
}

/// Rewrites the building classes of every in-zone cell to meet the rule
/// set's landuse shares and housing mixes.
///
/// Cells are bucketed by zone, shuffled, and carved into class runs whose
/// sizes come from the largest-remainder method, so each zone meets its
/// targets exactly for the given cell count. A zone with no housing or
/// landuse rule has all of its cells marked unbuilt.
#[must_use]
pub fn apply_housing_mix(grid: &TemplateGrid, rules: &RuleSet, seed: u64) -> PreprocessOutcome {
    let zones = rules.zones.zones();
    let mut derived = grid.clone();
    let mut zone_ids = vec![UNKNOWN_ZONE_ID; grid.rows * grid.cols];
    let mut stats = PreprocessStats {
        total_cells: grid.rows * grid.cols,
        ..PreprocessStats::default()
    };

    let mut cells_by_zone: Vec<Vec<usize>> = vec![Vec::new(); zones.len()];
    for row in 0..grid.rows {
        for col in 0..grid.cols {
            let distance = grid.distance_to_center(row, col);
            if let Some(position) = rules.zones.zone_position(distance) {
                cells_by_zone[position].push(grid.index(row, col));
            }
        }
    }

    let mut rng = grid_rng(seed);
    for (position, zone) in zones.iter().enumerate() {
        let cells = &cells_by_zone[position];
        let zone_id = i32::try_from(position).unwrap_or(UNKNOWN_ZONE_ID);
        for &cell in cells {
            zone_ids[cell] = zone_id;
        }
        if cells.is_empty() {
            continue;
        }

        let landuse = rules.landuse_rule_for(&zone.name);
        let Some((mix, residential_pct)) = rules
            .blended_housing_mix(&zone.name)
            .zip(landuse.map(|rule| rule.residential_pct))
        else {
            log::warn!(
                "Zone '{}' has no housing or landuse rule; marking its {} cells unbuilt",
                zone.name,
                cells.len()
            );
            for &cell in cells {
                derived.building_class[cell] = BuildingClass::None.value();
            }
            continue;
        };

        let mut shuffled = cells.clone();
        shuffled.shuffle(&mut rng);
        let residential_count = sample_count(residential_pct, shuffled.len());
        let (residential, unbuilt) = shuffled.split_at(residential_count);

        for &cell in unbuilt {
            derived.building_class[cell] = BuildingClass::None.value();
        }
        let mut cursor = 0;
        for (class, count) in target_counts(&mix, residential.len()) {
            for &cell in &residential[cursor..cursor + count] {
                derived.building_class[cell] = class.value();
            }
            cursor += count;
        }

        let zone_tally = stats
            .by_zone_and_class
            .entry(zone.name.clone())
            .or_default();
        stats.by_zone.insert(zone.name.clone(), cells.len());
        for &cell in cells {
            let class = BuildingClass::from_value(derived.building_class[cell])
                .unwrap_or(BuildingClass::None);
            *stats.by_class.entry(class.to_string()).or_insert(0) += 1;
            *zone_tally.entry(class.to_string()).or_insert(0) += 1;
        }
    }

    log::info!(
        "Reassigned {} of {} cells across {} zones",
        stats.by_zone.values().sum::<usize>(),
        stats.total_cells,
        stats.by_zone.len()
    );

    let zone_grid = ZoneGrid {
        rows: grid.rows,
        cols: grid.cols,
        zone_ids,
        names: zones.iter().map(|zone| zone.name.clone()).collect(),
    };
    PreprocessOutcome {
        grid: derived,
        zone_grid,
        stats,
    }
}

/// Loads a template, rewrites it, and writes the derived grid plus its
/// zone sidecar. The input file is left untouched.
///
/// # Errors
///
/// Returns an error if the template cannot be loaded or the outputs
/// cannot be written.
pub fn modify_template_file(
    input: &Path,
    output: &Path,
    rules: &RuleSet,
    seed: u64,
) -> Result<PreprocessOutcome, PreprocessError> {
    let grid = TemplateGrid::load(input)?;
    let outcome = apply_housing_mix(&grid, rules, seed);
    outcome.grid.save(output)?;
    let sidecar = zone_sidecar_path(output);
    outcome.zone_grid.save(&sidecar)?;
    log::info!(
        "Wrote modified template to {} (zone sidecar {})",
        output.display(),
        sidecar.display()
    );
    Ok(outcome)
}

/// Largest-remainder apportionment of `total` cells across the mix.
///
/// The returned counts always sum to `total`; shares are renormalized by
/// the mix sum first, so a mix of 0.45/0.27/0.18 splits like 0.5/0.3/0.2.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
fn target_counts(mix: &[(BuildingClass, f64); 3], total: usize) -> [(BuildingClass, usize); 3] {
    let mut counts = [(mix[0].0, 0usize), (mix[1].0, 0), (mix[2].0, 0)];
    let sum: f64 = mix.iter().map(|(_, pct)| pct).sum();
    if total == 0 || sum <= 0.0 {
        return counts;
    }
    let mut fractions = [0.0_f64; 3];
    let mut assigned = 0;
    for (idx, (_, pct)) in mix.iter().enumerate() {
        let share = pct / sum * total as f64;
        counts[idx].1 = share.floor() as usize;
        fractions[idx] = share - share.floor();
        assigned += counts[idx].1;
    }
    let mut order = [0, 1, 2];
    order.sort_by(|a, b| fractions[*b].total_cmp(&fractions[*a]));
    for idx in order.iter().take(total - assigned) {
        counts[*idx].1 += 1;
    }
    counts
}

fn grid_rng(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(GRID_STREAM);
    rng
}
