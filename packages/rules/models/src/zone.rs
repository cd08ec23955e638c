//! Concentric zone definitions and the distance-to-zone index.
//!
//! Zones are radial bands around the city center, ordered by distance.
//! [`ZoneIndex::new`] validates the band layout once; lookups are then a
//! binary search over the sorted lower bounds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A concentric band around the city center.
///
/// A zone covers distances `d` with `min_distance <= d < max_distance`;
/// `max_distance = None` marks the unbounded outermost band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Unique zone name, e.g. `"0_1km"`.
    pub name: String,
    /// Inner radius in meters (inclusive).
    pub min_distance: f64,
    /// Outer radius in meters (exclusive), `None` for the outermost zone.
    pub max_distance: Option<f64>,
}

impl Zone {
    /// Whether the given distance from the city center falls in this zone.
    #[must_use]
    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.min_distance && self.max_distance.is_none_or(|max| distance < max)
    }
}

/// Error returned when a zone list does not form a valid radial partition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ZoneIndexError {
    /// No zones were configured.
    #[error("no zones configured")]
    Empty,
    /// The innermost zone must start at the city center.
    #[error("first zone '{name}' starts at {min_distance}, expected 0")]
    FirstNotAtCenter {
        /// Name of the offending zone.
        name: String,
        /// Its configured inner radius.
        min_distance: f64,
    },
    /// A zone's band is empty or inverted.
    #[error("zone '{name}' has max_distance {max_distance} <= min_distance {min_distance}")]
    EmptyBand {
        /// Name of the offending zone.
        name: String,
        /// Its configured inner radius.
        min_distance: f64,
        /// Its configured outer radius.
        max_distance: f64,
    },
    /// Adjacent zones leave a gap or overlap between their bands.
    #[error(
        "zones '{outer}' and '{inner}' are not contiguous: \
         {inner_min} does not continue from {outer_max}"
    )]
    NotContiguous {
        /// The zone ending at `outer_max`.
        outer: String,
        /// The zone starting at `inner_min`.
        inner: String,
        /// Outer radius of the first zone.
        outer_max: f64,
        /// Inner radius of the second zone.
        inner_min: f64,
    },
    /// Only the outermost zone may omit `max_distance`.
    #[error("zone '{name}' is unbounded but not the outermost zone")]
    UnboundedNotLast {
        /// Name of the offending zone.
        name: String,
    },
    /// Two zones share the same name.
    #[error("duplicate zone name '{name}'")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },
}

/// Validated, ordered set of concentric zones with O(log n) distance lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneIndex {
    zones: Vec<Zone>,
}

impl ZoneIndex {
    /// Tolerance for comparing configured band boundaries.
    const BOUNDARY_EPSILON: f64 = 1e-9;

    /// Builds an index from a zone list, sorting by inner radius.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is empty, the innermost zone does not
    /// start at 0, any band is empty, bands overlap or leave gaps, a
    /// non-final zone is unbounded, or two zones share a name.
    pub fn new(mut zones: Vec<Zone>) -> Result<Self, ZoneIndexError> {
        if zones.is_empty() {
            return Err(ZoneIndexError::Empty);
        }
        zones.sort_by(|a, b| a.min_distance.total_cmp(&b.min_distance));

        let first = &zones[0];
        if first.min_distance.abs() > Self::BOUNDARY_EPSILON {
            return Err(ZoneIndexError::FirstNotAtCenter {
                name: first.name.clone(),
                min_distance: first.min_distance,
            });
        }

        for (i, zone) in zones.iter().enumerate() {
            if zones[..i].iter().any(|other| other.name == zone.name) {
                return Err(ZoneIndexError::DuplicateName {
                    name: zone.name.clone(),
                });
            }
            match zone.max_distance {
                Some(max) if max <= zone.min_distance => {
                    return Err(ZoneIndexError::EmptyBand {
                        name: zone.name.clone(),
                        min_distance: zone.min_distance,
                        max_distance: max,
                    });
                }
                Some(max) => {
                    if let Some(next) = zones.get(i + 1)
                        && (next.min_distance - max).abs() > Self::BOUNDARY_EPSILON
                    {
                        return Err(ZoneIndexError::NotContiguous {
                            outer: zone.name.clone(),
                            inner: next.name.clone(),
                            outer_max: max,
                            inner_min: next.min_distance,
                        });
                    }
                }
                None => {
                    if i + 1 != zones.len() {
                        return Err(ZoneIndexError::UnboundedNotLast {
                            name: zone.name.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self { zones })
    }

    /// Returns the zone containing the given distance from the city center.
    ///
    /// Distances beyond the outermost bounded zone (or negative distances)
    /// return `None`.
    #[must_use]
    pub fn zone_for(&self, distance: f64) -> Option<&Zone> {
        self.zone_position(distance).map(|idx| &self.zones[idx])
    }

    /// Returns the position (ascending distance order) of the zone
    /// containing the given distance.
    #[must_use]
    pub fn zone_position(&self, distance: f64) -> Option<usize> {
        if !distance.is_finite() || distance < 0.0 {
            return None;
        }
        let idx = self
            .zones
            .partition_point(|zone| zone.min_distance <= distance);
        let candidate_idx = idx.checked_sub(1)?;
        self.zones[candidate_idx]
            .contains(distance)
            .then_some(candidate_idx)
    }

    /// Returns the zone with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|zone| zone.name == name)
    }

    /// Zones in ascending distance order.
    #[must_use]
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// Number of zones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Whether the index holds no zones. Construction rejects this, so an
    /// index obtained from [`ZoneIndex::new`] always returns `false`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}
