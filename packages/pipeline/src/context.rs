//! The immutable context shared by every pipeline stage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cityweave_layers::Enclosure;
use cityweave_preprocess::TemplateGrid;
use cityweave_rules::RuleSet;
use geo::{Centroid, Point};

use crate::PipelineError;

/// Where a run reads its inputs and writes its artifacts.
///
/// The generator consumes the derived files under `work` and writes its
/// layers under `layers`; postprocess outputs land under `output`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Input template grid file.
    pub template: PathBuf,
    /// Input street-cluster template directory.
    pub clusters: PathBuf,
    /// Directory for derived generator inputs.
    pub work: PathBuf,
    /// Directory the generator writes its layers to.
    pub layers: PathBuf,
    /// Directory for postprocess outputs.
    pub output: PathBuf,
}

impl RunPaths {
    /// The conventional layout under a single run directory:
    /// `input/`, `work/`, `layers/`, `output/`.
    #[must_use]
    pub fn from_root(root: &Path) -> Self {
        Self {
            template: root.join("input").join("template.mpk"),
            clusters: root.join("input").join("clusters"),
            work: root.join("work"),
            layers: root.join("layers"),
            output: root.join("output"),
        }
    }

    /// Derived template grid the generator consumes.
    #[must_use]
    pub fn modified_template(&self) -> PathBuf {
        self.work.join("template_modified.mpk")
    }

    /// Derived cluster template directory the generator consumes.
    #[must_use]
    pub fn modified_clusters(&self) -> PathBuf {
        self.work.join("clusters")
    }

    /// Generated street layer.
    #[must_use]
    pub fn streets_layer(&self) -> PathBuf {
        self.layers.join("streets.geojson")
    }

    /// Generated enclosure layer.
    #[must_use]
    pub fn enclosures_layer(&self) -> PathBuf {
        self.layers.join("enclosures.geojson")
    }

    /// Generated building layer.
    #[must_use]
    pub fn buildings_layer(&self) -> PathBuf {
        self.layers.join("buildings.geojson")
    }

    /// Generated city-center layer.
    #[must_use]
    pub fn city_center_layer(&self) -> PathBuf {
        self.layers.join("city_center.geojson")
    }

    /// Classified building output layer.
    #[must_use]
    pub fn classified_buildings(&self) -> PathBuf {
        self.output.join("buildings_classified.geojson")
    }

    /// Street output layer after geometry rules.
    #[must_use]
    pub fn modified_streets(&self) -> PathBuf {
        self.output.join("streets_modified.geojson")
    }

    /// Household table output.
    #[must_use]
    pub fn households_csv(&self) -> PathBuf {
        self.output.join("households.csv")
    }

    /// Building table output.
    #[must_use]
    pub fn buildings_csv(&self) -> PathBuf {
        self.output.join("buildings.csv")
    }

    /// Statistics report output.
    #[must_use]
    pub fn statistics(&self) -> PathBuf {
        self.output.join("statistics.json")
    }
}

/// Geometry of the input template grid, carried so stages can reason
/// about distances and areas without reloading the grid.
#[derive(Debug, Clone, Copy)]
pub struct GridGeometry {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Cell edge length in meters.
    pub cell_size: f64,
    /// City center in planar meters.
    pub center: Point<f64>,
}

impl GridGeometry {
    /// Extracts the geometry of a loaded template grid.
    #[must_use]
    pub fn of(grid: &TemplateGrid) -> Self {
        let (x, y) = grid.center_position();
        Self {
            rows: grid.rows,
            cols: grid.cols,
            cell_size: grid.cell_size,
            center: Point::new(x, y),
        }
    }

    /// Area covered by one cell, in square meters.
    #[must_use]
    pub fn cell_area(&self) -> f64 {
        self.cell_size * self.cell_size
    }
}

/// Everything a stage needs to run: seed, rule set (with its zone
/// index), grid geometry, and the run's paths. Built once, never
/// mutated.
#[derive(Debug)]
pub struct RunContext {
    /// Seed for every seeded draw in the run.
    pub seed: u64,
    /// Validated rule set.
    pub rules: RuleSet,
    /// Input template grid geometry.
    pub grid: GridGeometry,
    /// Input and output locations.
    pub paths: RunPaths,
}

impl RunContext {
    /// Builds a context from already-loaded parts.
    #[must_use]
    pub const fn new(seed: u64, rules: RuleSet, grid: GridGeometry, paths: RunPaths) -> Self {
        Self {
            seed,
            rules,
            grid,
            paths,
        }
    }

    /// Loads the rule set and the input template's geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule file fails to load or validate, or
    /// the input template cannot be read.
    pub fn load(seed: u64, rule_path: &Path, paths: RunPaths) -> Result<Self, PipelineError> {
        let rules = RuleSet::load(rule_path)?;
        let template = TemplateGrid::load(&paths.template)?;
        Ok(Self::new(seed, rules, GridGeometry::of(&template), paths))
    }

    /// Zone areas from a grid's cell membership, in square meters.
    ///
    /// Each cell is attributed to the zone covering its distance from the
    /// city center; cells outside every zone are not counted.
    #[must_use]
    pub fn zone_areas_from_grid(&self, grid: &TemplateGrid) -> BTreeMap<String, f64> {
        let mut areas = BTreeMap::new();
        for row in 0..grid.rows {
            for col in 0..grid.cols {
                let distance = grid.distance_to_center(row, col);
                if let Some(zone) = self.rules.zones.zone_for(distance) {
                    *areas.entry(zone.name.clone()).or_insert(0.0) += grid.cell_area();
                }
            }
        }
        areas
    }

    /// Zone areas summed from enclosure footprints, keyed by the zone
    /// covering each enclosure's centroid.
    ///
    /// Fallback for runs entered at the generated stage when no derived
    /// template is on disk.
    #[must_use]
    pub fn zone_areas_from_enclosures(&self, enclosures: &[Enclosure]) -> BTreeMap<String, f64> {
        let mut areas = BTreeMap::new();
        for enclosure in enclosures {
            let Some(centroid) = enclosure.polygon.centroid() else {
                continue;
            };
            let distance = (centroid.x() - self.grid.center.x())
                .hypot(centroid.y() - self.grid.center.y());
            if let Some(zone) = self.rules.zones.zone_for(distance) {
                *areas.entry(zone.name.clone()).or_insert(0.0) += enclosure.area;
            }
        }
        areas
    }
}
