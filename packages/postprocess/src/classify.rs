//! Building classification over the generated footprints.
//!
//! Every building collects its candidate classes: the zone's housing mix
//! (one candidate per class, weighted by mix share and rule weight),
//! spatial rules matched against the building's attributes, and
//! morphological rules matched against its enclosure. Candidates are
//! combined by one weighted draw with weights renormalized over the
//! matching subset; with no candidates the grid-carried class stands.

use cityweave_layers::spatial::EnclosureIndex;
use cityweave_layers::{Building, Enclosure, polygon_feature};
use cityweave_rules::{AttrRecord, RuleSet, pick_weighted};
use cityweave_rules_models::BuildingClass;
use geo::Point;
use geojson::{FeatureCollection, JsonObject};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value;
use std::collections::BTreeMap;

/// RNG stream for classification draws.
const CLASSIFY_STREAM: u64 = 3;

/// A building with its resolved zone and final class.
#[derive(Debug, Clone)]
pub struct ClassifiedBuilding {
    /// The generated footprint and its grid-carried attributes.
    pub building: Building,
    /// Zone containing the footprint centroid, if any.
    pub zone: Option<String>,
    /// Final class after rule combination.
    pub class: BuildingClass,
    /// Centroid distance to the city center, in meters.
    pub distance_to_center: f64,
    /// Area of the containing enclosure, if one contains the centroid.
    pub enclosure_area: Option<f64>,
}

/// Classifies every building, in input order.
///
/// Rules whose condition cannot be evaluated against a building are
/// skipped with a warning; the building still sees the remaining rules.
/// Non-residential grid classes are only eligible for the zone mix when
/// the grid carried no class at all.
#[must_use]
pub fn classify_buildings(
    buildings: Vec<Building>,
    enclosures: &[Enclosure],
    center: Point<f64>,
    rules: &RuleSet,
    seed: u64,
) -> Vec<ClassifiedBuilding> {
    let index = EnclosureIndex::build(enclosures);
    let mut rng = classify_rng(seed);
    let mut skipped_evaluations = 0_usize;
    let mut out = Vec::with_capacity(buildings.len());

    for building in buildings {
        let centroid = building.centroid();
        let distance = (centroid.x() - center.x()).hypot(centroid.y() - center.y());
        let zone = rules.zones.zone_for(distance).map(|zone| zone.name.clone());
        let enclosure_area = index
            .enclosure_for(centroid)
            .map(|found| enclosures[found].area);

        let mut candidates: Vec<(f64, BuildingClass)> = Vec::new();

        let mix_eligible =
            building.class.is_residential() || building.class == BuildingClass::None;
        if let Some(zone_name) = &zone
            && mix_eligible
        {
            for rule in rules.housing_rules_for(zone_name) {
                for (class, pct) in rule.mix() {
                    if pct > 0.0 {
                        candidates.push((pct * rule.weight, class));
                    }
                }
            }
        }

        let record = building_record(&building, distance, zone.as_deref());
        for rule in &rules.spatial {
            match rule.condition.evaluate(&record) {
                Ok(true) => candidates.push((rule.weight, rule.class)),
                Ok(false) => {}
                Err(err) => {
                    skipped_evaluations += 1;
                    log::warn!("Spatial rule skipped for building {}: {err}", building.id);
                }
            }
        }

        if let Some(area) = enclosure_area {
            let record = enclosure_record(&building, area, distance, zone.as_deref());
            for rule in &rules.morphological {
                match rule.condition.evaluate(&record) {
                    Ok(true) => candidates.push((rule.weight, rule.class)),
                    Ok(false) => {}
                    Err(err) => {
                        skipped_evaluations += 1;
                        log::warn!(
                            "Morphological rule skipped for building {}: {err}",
                            building.id
                        );
                    }
                }
            }
        }

        let class = pick_weighted(&mut rng, &candidates)
            .copied()
            .unwrap_or(building.class);
        out.push(ClassifiedBuilding {
            building,
            zone,
            class,
            distance_to_center: distance,
            enclosure_area,
        });
    }

    log::info!(
        "Classified {} buildings ({skipped_evaluations} rule evaluations skipped)",
        out.len()
    );
    out
}

/// Builds the classified-buildings output layer.
///
/// `counts` maps building ids to `(households, residents)` from the
/// household assignment; buildings without an entry report zeros.
#[must_use]
pub fn buildings_to_geojson(
    buildings: &[ClassifiedBuilding],
    counts: &BTreeMap<String, (usize, u32)>,
) -> FeatureCollection {
    let features = buildings
        .iter()
        .map(|classified| {
            let (households, residents) = counts
                .get(&classified.building.id)
                .copied()
                .unwrap_or((0, 0));
            let mut properties = JsonObject::new();
            properties.insert(
                "building_id".to_string(),
                Value::from(classified.building.id.clone()),
            );
            properties.insert(
                "building_class".to_string(),
                Value::from(classified.class.as_ref()),
            );
            if let Some(zone) = &classified.zone {
                properties.insert("zone".to_string(), Value::from(zone.clone()));
            }
            properties.insert(
                "floor_area".to_string(),
                Value::from(classified.building.floor_area),
            );
            properties.insert("height".to_string(), Value::from(classified.building.height));
            properties.insert("households".to_string(), Value::from(households));
            properties.insert("residents".to_string(), Value::from(residents));
            polygon_feature(&classified.building.polygon, properties)
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Attribute record a household candidate is checked against before the
/// household's own attributes are added.
#[must_use]
pub fn building_base_record(classified: &ClassifiedBuilding) -> AttrRecord {
    let mut record = AttrRecord::new()
        .with("building_class", classified.class)
        .with("floor_area", classified.building.floor_area)
        .with("height", classified.building.height)
        .with("distance_to_center", classified.distance_to_center);
    if let Some(zone) = &classified.zone {
        record.insert("zone", zone.as_str());
    }
    if let Some(area) = classified.enclosure_area {
        record.insert("enclosure_area", area);
    }
    record
}

fn building_record(building: &Building, distance: f64, zone: Option<&str>) -> AttrRecord {
    let mut record = AttrRecord::new()
        .with("building_class", building.class)
        .with("floor_area", building.floor_area)
        .with("height", building.height)
        .with("distance_to_center", distance);
    if let Some(zone) = zone {
        record.insert("zone", zone);
    }
    record
}

fn enclosure_record(
    building: &Building,
    enclosure_area: f64,
    distance: f64,
    zone: Option<&str>,
) -> AttrRecord {
    let mut record = AttrRecord::new()
        .with("enclosure_area", enclosure_area)
        .with("building_class", building.class)
        .with("distance_to_center", distance);
    if let Some(zone) = zone {
        record.insert("zone", zone);
    }
    record
}

fn classify_rng(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(CLASSIFY_STREAM);
    rng
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon};

    fn square(x: f64, y: f64, side: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (x, y),
                (x + side, y),
                (x + side, y + side),
                (x, y + side),
                (x, y),
            ]),
            vec![],
        )
    }

    fn building(id: &str, x: f64, y: f64, class: BuildingClass, floor_area: f64) -> Building {
        Building {
            id: id.to_string(),
            polygon: square(x, y, 10.0),
            class,
            floor_area,
            height: 9.0,
        }
    }

    fn rules(toml: &str) -> RuleSet {
        RuleSet::from_toml_str(toml).unwrap()
    }

    const ZONES: &str = r#"
        [[zones]]
        name = "inner"
        min_distance = 0.0
        max_distance = 1000.0

        [[zones]]
        name = "outer"
        min_distance = 1000.0
    "#;

    #[test]
    fn spatial_rule_overrides_the_grid_class() {
        let toml = format!(
            r#"{ZONES}
            [[spatial]]
            condition = "floor_area > 1000"
            class = "big_commercial"
        "#
        );
        let classified = classify_buildings(
            vec![building("b1", 0.0, 0.0, BuildingClass::Detached, 2400.0)],
            &[],
            Point::new(0.0, 0.0),
            &rules(&toml),
            1,
        );
        assert_eq!(classified[0].class, BuildingClass::BigCommercial);
        assert_eq!(classified[0].zone.as_deref(), Some("inner"));
    }

    #[test]
    fn unmatched_building_keeps_its_grid_class() {
        let toml = format!(
            r#"{ZONES}
            [[spatial]]
            condition = "floor_area > 1000"
            class = "big_commercial"
        "#
        );
        let classified = classify_buildings(
            vec![building("b1", 0.0, 0.0, BuildingClass::Terraced, 300.0)],
            &[],
            Point::new(0.0, 0.0),
            &rules(&toml),
            1,
        );
        assert_eq!(classified[0].class, BuildingClass::Terraced);
    }

    #[test]
    fn zone_mix_reassigns_residential_buildings() {
        let toml = format!(
            r#"{ZONES}
            [[housing_type_rules]]
            zone = "inner"
            apartment_pct = 1.0
            detached_pct = 0.0
            terraced_pct = 0.0
        "#
        );
        let classified = classify_buildings(
            vec![building("b1", 0.0, 0.0, BuildingClass::Detached, 500.0)],
            &[],
            Point::new(0.0, 0.0),
            &rules(&toml),
            1,
        );
        // Apartments is the only mix candidate with a positive share.
        assert_eq!(classified[0].class, BuildingClass::Apartments);
    }

    #[test]
    fn zone_mix_never_touches_non_residential_buildings() {
        let toml = format!(
            r#"{ZONES}
            [[housing_type_rules]]
            zone = "inner"
            apartment_pct = 1.0
            detached_pct = 0.0
            terraced_pct = 0.0
        "#
        );
        let classified = classify_buildings(
            vec![building("b1", 0.0, 0.0, BuildingClass::Industrial, 500.0)],
            &[],
            Point::new(0.0, 0.0),
            &rules(&toml),
            1,
        );
        assert_eq!(classified[0].class, BuildingClass::Industrial);
    }

    #[test]
    fn morphological_rule_reads_the_enclosure() {
        let toml = format!(
            r#"{ZONES}
            [[morphological]]
            condition = "enclosure_area >= 10000"
            class = "perimeter_block"
        "#
        );
        let enclosure = Enclosure {
            id: "e1".to_string(),
            polygon: square(-50.0, -50.0, 200.0),
            area: 40000.0,
        };
        let classified = classify_buildings(
            vec![building("b1", 0.0, 0.0, BuildingClass::Detached, 500.0)],
            &[enclosure],
            Point::new(0.0, 0.0),
            &rules(&toml),
            1,
        );
        assert_eq!(classified[0].class, BuildingClass::PerimeterBlock);
        assert_eq!(classified[0].enclosure_area, Some(40000.0));
    }

    #[test]
    fn failing_evaluation_skips_the_rule() {
        let toml = format!(
            r#"{ZONES}
            [[spatial]]
            condition = "nonexistent_attr > 5"
            class = "complex"
        "#
        );
        let classified = classify_buildings(
            vec![building("b1", 0.0, 0.0, BuildingClass::Terraced, 500.0)],
            &[],
            Point::new(0.0, 0.0),
            &rules(&toml),
            1,
        );
        assert_eq!(classified[0].class, BuildingClass::Terraced);
    }

    #[test]
    fn same_seed_classifies_identically() {
        let toml = format!(
            r#"{ZONES}
            [[housing_type_rules]]
            zone = "inner"
            apartment_pct = 0.4
            detached_pct = 0.3
            terraced_pct = 0.3
        "#
        );
        let set = rules(&toml);
        let batch: Vec<Building> = (0..40)
            .map(|i| {
                building(
                    &format!("b{i}"),
                    f64::from(i) * 20.0,
                    0.0,
                    BuildingClass::Detached,
                    500.0,
                )
            })
            .collect();
        let first = classify_buildings(batch.clone(), &[], Point::new(0.0, 0.0), &set, 9);
        let second = classify_buildings(batch, &[], Point::new(0.0, 0.0), &set, 9);
        let first_classes: Vec<BuildingClass> = first.iter().map(|b| b.class).collect();
        let second_classes: Vec<BuildingClass> = second.iter().map(|b| b.class).collect();
        assert_eq!(first_classes, second_classes);
    }

    #[test]
    fn output_layer_carries_counts_and_zone() {
        let classified = ClassifiedBuilding {
            building: building("b1", 0.0, 0.0, BuildingClass::Apartments, 800.0),
            zone: Some("inner".to_string()),
            class: BuildingClass::Apartments,
            distance_to_center: 12.0,
            enclosure_area: None,
        };
        let counts = BTreeMap::from([("b1".to_string(), (3_usize, 7_u32))]);
        let collection = buildings_to_geojson(&[classified], &counts);
        let properties = collection.features[0].properties.as_ref().unwrap();
        assert_eq!(properties["building_class"], "apartments");
        assert_eq!(properties["zone"], "inner");
        assert_eq!(properties["households"], 3);
        assert_eq!(properties["residents"], 7);
    }
}
