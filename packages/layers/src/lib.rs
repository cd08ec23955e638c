#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `GeoJSON` geometry layers exchanged with the external generator.
//!
//! The generator produces planar `FeatureCollection` layers in meters:
//! streets (`LineString`), enclosures and building footprints (`Polygon`),
//! and the city-center point. This crate reads them into typed records,
//! writes the postprocessed layers back out, and provides the R-tree
//! enclosure index used to attribute buildings to their enclosures.
//!
//! Readers are lenient about optional properties (missing values fall back
//! to computable defaults and are logged) but strict about geometry types.

use std::path::Path;

use cityweave_rules_models::BuildingClass;
use geo::{Area, Centroid, LineString, Point, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject};
use thiserror::Error;

pub mod spatial;

pub use spatial::EnclosureIndex;

/// Errors raised while reading or writing geometry layers.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Layer file could not be read or written.
    #[error("Failed to read or write layer: {0}")]
    Io(#[from] std::io::Error),
    /// Layer is not valid `GeoJSON`.
    #[error("Failed to parse GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    /// Layer could not be serialized.
    #[error("Failed to encode layer: {0}")]
    Json(#[from] serde_json::Error),
    /// Layer parsed but does not have the expected shape.
    #[error("Invalid layer: {message}")]
    Invalid {
        /// What was wrong with the layer.
        message: String,
    },
}

/// A street centerline from the generated street network.
#[derive(Debug, Clone, PartialEq)]
pub struct Street {
    /// Stable street id, unique within the layer.
    pub id: String,
    /// Centerline in planar meters.
    pub line: LineString<f64>,
    /// Road classification from the generator, e.g. `"residential"`.
    pub road_class: String,
}

impl Street {
    /// Total centerline length in meters.
    #[must_use]
    pub fn length(&self) -> f64 {
        self.line
            .0
            .windows(2)
            .map(|pair| (pair[1].x - pair[0].x).hypot(pair[1].y - pair[0].y))
            .sum()
    }
}

/// A street-bounded enclosure owning zero or more buildings.
#[derive(Debug, Clone, PartialEq)]
pub struct Enclosure {
    /// Stable enclosure id, unique within the layer.
    pub id: String,
    /// Boundary polygon in planar meters.
    pub polygon: Polygon<f64>,
    /// Enclosure area in square meters.
    pub area: f64,
}

/// A generated building footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    /// Stable building id, unique within the layer.
    pub id: String,
    /// Footprint polygon in planar meters.
    pub polygon: Polygon<f64>,
    /// Class carried over from the template grid, `None` when the
    /// generator did not assign one.
    pub class: BuildingClass,
    /// Total floor area across storeys, in square meters.
    pub floor_area: f64,
    /// Building height in meters.
    pub height: f64,
}

impl Building {
    /// Footprint centroid; degenerate footprints fall back to their first
    /// vertex.
    #[must_use]
    pub fn centroid(&self) -> Point<f64> {
        self.polygon.centroid().unwrap_or_else(|| {
            let coord = self
                .polygon
                .exterior()
                .0
                .first()
                .copied()
                .unwrap_or_default();
            Point::from(coord)
        })
    }
}

// ── Reading ──────────────────────────────────────────────────────────────

/// Parses the street layer.
///
/// # Errors
///
/// Returns an error if the text is not a `GeoJSON` `FeatureCollection`.
pub fn streets_from_geojson(text: &str) -> Result<Vec<Street>, LayerError> {
    let collection = parse_collection(text)?;
    let mut streets = Vec::new();
    for (i, feature) in collection.features.into_iter().enumerate() {
        let Some(line) = feature_line(&feature) else {
            log::warn!("Skipping street feature #{i} without LineString geometry");
            continue;
        };
        let props = feature.properties.as_ref();
        let id = prop_id(props, "street_id").unwrap_or_else(|| format!("street-{i}"));
        let road_class = prop_str(props, "road_class")
            .unwrap_or("unclassified")
            .to_string();
        streets.push(Street {
            id,
            line,
            road_class,
        });
    }
    Ok(streets)
}

/// Parses the enclosure layer.
///
/// # Errors
///
/// Returns an error if the text is not a `GeoJSON` `FeatureCollection`.
pub fn enclosures_from_geojson(text: &str) -> Result<Vec<Enclosure>, LayerError> {
    let collection = parse_collection(text)?;
    let mut enclosures = Vec::new();
    for (i, feature) in collection.features.into_iter().enumerate() {
        let Some(polygon) = feature_polygon(&feature) else {
            log::warn!("Skipping enclosure feature #{i} without Polygon geometry");
            continue;
        };
        let props = feature.properties.as_ref();
        let id = prop_id(props, "enclosure_id").unwrap_or_else(|| format!("enclosure-{i}"));
        let area = prop_f64(props, "area")
            .filter(|area| *area > 0.0)
            .unwrap_or_else(|| polygon.unsigned_area());
        enclosures.push(Enclosure { id, polygon, area });
    }
    Ok(enclosures)
}

/// Parses the building layer.
///
/// Missing `floor_area` falls back to the footprint area; an unknown class
/// code is logged and treated as unclassified.
///
/// # Errors
///
/// Returns an error if the text is not a `GeoJSON` `FeatureCollection`.
pub fn buildings_from_geojson(text: &str) -> Result<Vec<Building>, LayerError> {
    let collection = parse_collection(text)?;
    let mut buildings = Vec::new();
    for (i, feature) in collection.features.into_iter().enumerate() {
        let Some(polygon) = feature_polygon(&feature) else {
            log::warn!("Skipping building feature #{i} without Polygon geometry");
            continue;
        };
        let props = feature.properties.as_ref();
        let id = prop_id(props, "building_id").unwrap_or_else(|| format!("building-{i}"));
        let class = prop_class(props, &id);
        let floor_area = prop_f64(props, "floor_area")
            .filter(|area| *area > 0.0)
            .unwrap_or_else(|| polygon.unsigned_area());
        let height = prop_f64(props, "height").unwrap_or(0.0);
        buildings.push(Building {
            id,
            polygon,
            class,
            floor_area,
            height,
        });
    }
    Ok(buildings)
}

/// Parses the city-center layer down to its point.
///
/// # Errors
///
/// Returns an error if the layer holds no `Point` feature.
pub fn city_center_from_geojson(text: &str) -> Result<Point<f64>, LayerError> {
    let collection = parse_collection(text)?;
    for feature in &collection.features {
        if let Some(geometry) = &feature.geometry
            && let Ok(geo::Geometry::Point(point)) =
                geo::Geometry::<f64>::try_from(geometry.clone())
        {
            return Ok(point);
        }
    }
    Err(LayerError::Invalid {
        message: "city center layer holds no Point feature".to_string(),
    })
}

/// Reads and parses the street layer from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_streets(path: &Path) -> Result<Vec<Street>, LayerError> {
    let streets = streets_from_geojson(&std::fs::read_to_string(path)?);
    if let Ok(streets) = &streets {
        log::info!("Read {} streets from {}", streets.len(), path.display());
    }
    streets
}

/// Reads and parses the enclosure layer from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_enclosures(path: &Path) -> Result<Vec<Enclosure>, LayerError> {
    let enclosures = enclosures_from_geojson(&std::fs::read_to_string(path)?);
    if let Ok(enclosures) = &enclosures {
        log::info!(
            "Read {} enclosures from {}",
            enclosures.len(),
            path.display()
        );
    }
    enclosures
}

/// Reads and parses the building layer from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn read_buildings(path: &Path) -> Result<Vec<Building>, LayerError> {
    let buildings = buildings_from_geojson(&std::fs::read_to_string(path)?);
    if let Ok(buildings) = &buildings {
        log::info!(
            "Read {} buildings from {}",
            buildings.len(),
            path.display()
        );
    }
    buildings
}

/// Reads the city-center point from disk.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no point.
pub fn read_city_center(path: &Path) -> Result<Point<f64>, LayerError> {
    city_center_from_geojson(&std::fs::read_to_string(path)?)
}

// ── Writing ──────────────────────────────────────────────────────────────

/// Builds a polygon feature with the given properties.
#[must_use]
pub fn polygon_feature(polygon: &Polygon<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(polygon))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Builds a line feature with the given properties.
#[must_use]
pub fn line_feature(line: &LineString<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(line))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Converts streets back into a `FeatureCollection`.
#[must_use]
pub fn streets_to_geojson(streets: &[Street]) -> FeatureCollection {
    let features = streets
        .iter()
        .map(|street| {
            let mut props = JsonObject::new();
            props.insert(
                "street_id".to_string(),
                serde_json::Value::String(street.id.clone()),
            );
            props.insert(
                "road_class".to_string(),
                serde_json::Value::String(street.road_class.clone()),
            );
            line_feature(&street.line, props)
        })
        .collect();
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Writes a `FeatureCollection` atomically (tmp file, then rename).
///
/// # Errors
///
/// Returns an error if serialization or the filesystem operations fail.
pub fn write_collection(path: &Path, collection: &FeatureCollection) -> Result<(), LayerError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string(collection)?;
    let tmp = path.with_extension("geojson.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Writes the street layer atomically.
///
/// # Errors
///
/// Returns an error if serialization or the filesystem operations fail.
pub fn write_streets(path: &Path, streets: &[Street]) -> Result<(), LayerError> {
    write_collection(path, &streets_to_geojson(streets))?;
    log::info!("Wrote {} streets to {}", streets.len(), path.display());
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn parse_collection(text: &str) -> Result<FeatureCollection, LayerError> {
    let geojson: GeoJson = text.parse()?;
    match geojson {
        GeoJson::FeatureCollection(collection) => Ok(collection),
        GeoJson::Feature(_) | GeoJson::Geometry(_) => Err(LayerError::Invalid {
            message: "expected a FeatureCollection".to_string(),
        }),
    }
}

fn feature_polygon(feature: &Feature) -> Option<Polygon<f64>> {
    let geometry = feature.geometry.as_ref()?;
    match geo::Geometry::<f64>::try_from(geometry.clone()).ok()? {
        geo::Geometry::Polygon(polygon) => Some(polygon),
        geo::Geometry::MultiPolygon(multi) => multi.0.into_iter().next(),
        _ => None,
    }
}

fn feature_line(feature: &Feature) -> Option<LineString<f64>> {
    let geometry = feature.geometry.as_ref()?;
    match geo::Geometry::<f64>::try_from(geometry.clone()).ok()? {
        geo::Geometry::LineString(line) => Some(line),
        geo::Geometry::MultiLineString(multi) => multi.0.into_iter().next(),
        _ => None,
    }
}

fn prop_str<'a>(props: Option<&'a JsonObject>, key: &str) -> Option<&'a str> {
    props?.get(key)?.as_str()
}

fn prop_f64(props: Option<&JsonObject>, key: &str) -> Option<f64> {
    props?.get(key)?.as_f64()
}

fn prop_id(props: Option<&JsonObject>, key: &str) -> Option<String> {
    let value = props?.get(key)?;
    if let Some(text) = value.as_str() {
        Some(text.to_string())
    } else {
        value.as_i64().map(|n| n.to_string())
    }
}

fn prop_class(props: Option<&JsonObject>, building_id: &str) -> BuildingClass {
    let Some(value) = props.and_then(|props| props.get("building_class")) else {
        return BuildingClass::None;
    };
    if let Some(code) = value.as_i64() {
        return i32::try_from(code)
            .ok()
            .and_then(|code| BuildingClass::from_value(code).ok())
            .unwrap_or_else(|| {
                log::warn!("Building {building_id}: unknown class code {code}");
                BuildingClass::None
            });
    }
    if let Some(name) = value.as_str() {
        return name.parse().unwrap_or_else(|_| {
            log::warn!("Building {building_id}: unknown class name '{name}'");
            BuildingClass::None
        });
    }
    BuildingClass::None
}
