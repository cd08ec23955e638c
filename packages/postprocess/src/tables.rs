//! CSV exports for the synthesized population.

use std::collections::BTreeMap;
use std::path::Path;

use crate::PostprocessError;
use crate::classify::ClassifiedBuilding;
use crate::households::ZoneAssignment;

/// Writes `households.csv`: one row per household, zones in order.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_households_csv(
    path: &Path,
    assignments: &[ZoneAssignment],
) -> Result<(), PostprocessError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp)?;
    writer.write_record([
        "household_id",
        "building_id",
        "zone",
        "household_type",
        "unit_size",
        "num_residents",
    ])?;
    let mut rows = 0_usize;
    for assignment in assignments {
        for household in &assignment.households {
            let household_type = household.household_type.to_string();
            let unit_size = format!("{:.1}", household.unit_size);
            let num_residents = household.num_residents.to_string();
            writer.write_record([
                household.id.as_str(),
                household.building_id.as_str(),
                household.zone.as_str(),
                household_type.as_str(),
                unit_size.as_str(),
                num_residents.as_str(),
            ])?;
            rows += 1;
        }
    }
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp, path)?;
    log::info!("Wrote {rows} households to {}", path.display());
    Ok(())
}

/// Writes `buildings.csv`: one row per classified building with its
/// household and resident counts.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_buildings_csv(
    path: &Path,
    buildings: &[ClassifiedBuilding],
    counts: &BTreeMap<String, (usize, u32)>,
) -> Result<(), PostprocessError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp)?;
    writer.write_record([
        "building_id",
        "zone",
        "building_class",
        "floor_area",
        "height",
        "households",
        "residents",
    ])?;
    for classified in buildings {
        let (households, residents) = counts
            .get(&classified.building.id)
            .copied()
            .unwrap_or((0, 0));
        let floor_area = format!("{:.1}", classified.building.floor_area);
        let height = format!("{:.1}", classified.building.height);
        let households = households.to_string();
        let residents = residents.to_string();
        writer.write_record([
            classified.building.id.as_str(),
            classified.zone.as_deref().unwrap_or(""),
            classified.class.as_ref(),
            floor_area.as_str(),
            height.as_str(),
            households.as_str(),
            residents.as_str(),
        ])?;
    }
    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp, path)?;
    log::info!("Wrote {} buildings to {}", buildings.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cityweave_layers::Building;
    use cityweave_rules_models::{BuildingClass, HouseholdType};
    use geo::{LineString, Polygon};

    use crate::households::Household;

    fn temp_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cityweave-tables-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn assignment() -> ZoneAssignment {
        ZoneAssignment {
            zone: "inner".to_string(),
            households: vec![
                Household {
                    id: "b1-h1".to_string(),
                    building_id: "b1".to_string(),
                    zone: "inner".to_string(),
                    household_type: HouseholdType::TwoParent,
                    unit_size: 82.5,
                    num_residents: 4,
                },
                Household {
                    id: "b1-h2".to_string(),
                    building_id: "b1".to_string(),
                    zone: "inner".to_string(),
                    household_type: HouseholdType::SinglePerson,
                    unit_size: 41.0,
                    num_residents: 1,
                },
            ],
            target_residents: 5.0,
            achieved_residents: 5,
            reconciliation_steps: 0,
            residual_residents: 0.0,
            violations: BTreeMap::new(),
        }
    }

    fn classified(id: &str, zone: Option<&str>, class: BuildingClass) -> ClassifiedBuilding {
        ClassifiedBuilding {
            building: Building {
                id: id.to_string(),
                polygon: Polygon::new(
                    LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
                    vec![],
                ),
                class,
                floor_area: 120.0,
                height: 6.5,
            },
            zone: zone.map(str::to_string),
            class,
            distance_to_center: 10.0,
            enclosure_area: None,
        }
    }

    #[test]
    fn households_csv_lists_every_household() {
        let dir = temp_dir("households");
        let path = dir.join("households.csv");

        write_households_csv(&path, &[assignment()]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap(),
            &csv::StringRecord::from(vec![
                "household_id",
                "building_id",
                "zone",
                "household_type",
                "unit_size",
                "num_residents",
            ])
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "b1-h1");
        assert_eq!(&rows[0][3], "two_parent");
        assert_eq!(&rows[0][4], "82.5");
        assert_eq!(&rows[0][5], "4");
        assert_eq!(&rows[1][3], "single_person");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn buildings_csv_joins_household_counts() {
        let dir = temp_dir("buildings");
        let path = dir.join("buildings.csv");
        let buildings = vec![
            classified("b1", Some("inner"), BuildingClass::Apartments),
            classified("b2", None, BuildingClass::Industrial),
        ];
        let counts = BTreeMap::from([("b1".to_string(), (2_usize, 5_u32))]);

        write_buildings_csv(&path, &buildings, &counts).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "b1");
        assert_eq!(&rows[0][1], "inner");
        assert_eq!(&rows[0][2], "apartments");
        assert_eq!(&rows[0][5], "2");
        assert_eq!(&rows[0][6], "5");
        // No counts entry and no zone leaves those cells empty or zero.
        assert_eq!(&rows[1][1], "");
        assert_eq!(&rows[1][5], "0");
        assert_eq!(&rows[1][6], "0");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rewrite_replaces_the_previous_table() {
        let dir = temp_dir("rewrite");
        let path = dir.join("households.csv");

        write_households_csv(&path, &[assignment()]).unwrap();
        write_households_csv(&path, &[]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.records().count(), 0);
        assert!(!path.with_extension("csv.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
