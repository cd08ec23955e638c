//! Template grid and zone-grid file formats.
//!
//! Grids are row-major cell arrays serialized as named-field MessagePack.
//! The template grid carries the generator's three inputs (building class,
//! street cluster, city-center cell); the zone grid is a derived sidecar
//! written next to the modified template for visualization.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::PreprocessError;

/// Zone-grid code for cells outside every configured zone.
pub const UNKNOWN_ZONE_ID: i32 = 99;

/// The generator's template grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateGrid {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Cell edge length in meters.
    pub cell_size: f64,
    /// Row-major building-class codes, one per cell.
    pub building_class: Vec<i32>,
    /// Row-major street-cluster ids, one per cell.
    pub cluster_street: Vec<i32>,
    /// `(row, col)` of the city-center cell, if marked.
    pub city_center: Option<(usize, usize)>,
}

impl TemplateGrid {
    /// Loads and validates a grid from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, decoded, or fails
    /// [`TemplateGrid::validate`].
    pub fn load(path: &Path) -> Result<Self, PreprocessError> {
        let bytes = std::fs::read(path)?;
        let grid: Self = rmp_serde::from_slice(&bytes)?;
        grid.validate()?;
        log::info!(
            "Loaded {}x{} template grid (cell size {} m) from {}",
            grid.rows,
            grid.cols,
            grid.cell_size,
            path.display()
        );
        Ok(grid)
    }

    /// Writes the grid atomically (tmp file, then rename).
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the filesystem operations fail.
    pub fn save(&self, path: &Path) -> Result<(), PreprocessError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = rmp_serde::to_vec_named(self)?;
        let tmp = path.with_extension("mpk.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Checks array lengths and the cell size.
    ///
    /// # Errors
    ///
    /// Returns an error if an array length disagrees with the dimensions,
    /// the cell size is not positive, or the city-center cell is out of
    /// bounds.
    pub fn validate(&self) -> Result<(), PreprocessError> {
        let cells = self.rows * self.cols;
        if self.building_class.len() != cells {
            return Err(PreprocessError::InvalidGrid {
                message: format!(
                    "building_class holds {} cells, expected {cells}",
                    self.building_class.len()
                ),
            });
        }
        if self.cluster_street.len() != cells {
            return Err(PreprocessError::InvalidGrid {
                message: format!(
                    "cluster_street holds {} cells, expected {cells}",
                    self.cluster_street.len()
                ),
            });
        }
        if self.cell_size <= 0.0 || !self.cell_size.is_finite() {
            return Err(PreprocessError::InvalidGrid {
                message: format!("cell_size {} is not positive", self.cell_size),
            });
        }
        if let Some((row, col)) = self.city_center
            && (row >= self.rows || col >= self.cols)
        {
            return Err(PreprocessError::InvalidGrid {
                message: format!("city center cell ({row}, {col}) is out of bounds"),
            });
        }
        Ok(())
    }

    /// Row-major index of a cell.
    #[must_use]
    pub const fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    /// City-center position in meters; unmarked grids fall back to the
    /// grid midpoint.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center_position(&self) -> (f64, f64) {
        self.city_center.map_or_else(
            || {
                (
                    self.cols as f64 * self.cell_size / 2.0,
                    self.rows as f64 * self.cell_size / 2.0,
                )
            },
            |(row, col)| (col as f64 * self.cell_size, row as f64 * self.cell_size),
        )
    }

    /// Distance from a cell's position to the city center, in meters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn distance_to_center(&self, row: usize, col: usize) -> f64 {
        let (center_x, center_y) = self.center_position();
        let (x, y) = (col as f64 * self.cell_size, row as f64 * self.cell_size);
        (x - center_x).hypot(y - center_y)
    }

    /// Area covered by one cell, in square meters.
    #[must_use]
    pub const fn cell_area(&self) -> f64 {
        self.cell_size * self.cell_size
    }
}

/// Derived zone-id grid written next to the modified template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneGrid {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Row-major zone ids; [`UNKNOWN_ZONE_ID`] outside every zone.
    pub zone_ids: Vec<i32>,
    /// Zone names by id, in ascending distance order.
    pub names: Vec<String>,
}

impl ZoneGrid {
    /// Writes the zone grid atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the filesystem operations fail.
    pub fn save(&self, path: &Path) -> Result<(), PreprocessError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = rmp_serde::to_vec_named(self)?;
        let tmp = path.with_extension("mpk.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Number of cells assigned to the zone with the given id.
    #[must_use]
    pub fn cell_count(&self, zone_id: i32) -> usize {
        self.zone_ids.iter().filter(|id| **id == zone_id).count()
    }
}

/// Path of the zone sidecar written next to a modified template,
/// `template.mpk` -> `template_zones.mpk`.
#[must_use]
pub fn zone_sidecar_path(template_path: &Path) -> PathBuf {
    let stem = template_path
        .file_stem()
        .map_or_else(|| "template".to_string(), |s| s.to_string_lossy().into_owned());
    let extension = template_path
        .extension()
        .map_or_else(|| "mpk".to_string(), |e| e.to_string_lossy().into_owned());
    template_path.with_file_name(format!("{stem}_zones.{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> TemplateGrid {
        TemplateGrid {
            rows: 2,
            cols: 3,
            cell_size: 100.0,
            building_class: vec![99; 6],
            cluster_street: vec![0; 6],
            city_center: Some((0, 1)),
        }
    }

    #[test]
    fn encodes_and_decodes() {
        let grid = small_grid();
        let bytes = rmp_serde::to_vec_named(&grid).unwrap();
        let decoded: TemplateGrid = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(grid, decoded);
    }

    #[test]
    fn validation_catches_length_mismatch() {
        let mut grid = small_grid();
        grid.building_class.pop();
        assert!(matches!(
            grid.validate(),
            Err(PreprocessError::InvalidGrid { .. })
        ));
    }

    #[test]
    fn validation_catches_out_of_bounds_center() {
        let mut grid = small_grid();
        grid.city_center = Some((5, 0));
        assert!(matches!(
            grid.validate(),
            Err(PreprocessError::InvalidGrid { .. })
        ));
    }

    #[test]
    fn center_falls_back_to_grid_midpoint() {
        let mut grid = small_grid();
        assert_eq!(grid.center_position(), (100.0, 0.0));
        grid.city_center = None;
        assert_eq!(grid.center_position(), (150.0, 100.0));
    }

    #[test]
    fn distances_are_euclidean_in_meters() {
        let grid = small_grid();
        // Cell (1, 1) sits 100 m south of the center cell (0, 1).
        assert!((grid.distance_to_center(1, 1) - 100.0).abs() < 1e-9);
        // Cell (0, 0) sits 100 m west.
        assert!((grid.distance_to_center(0, 0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn sidecar_path_inserts_zones_suffix() {
        let path = zone_sidecar_path(Path::new("/out/template.mpk"));
        assert_eq!(path, PathBuf::from("/out/template_zones.mpk"));
    }
}
