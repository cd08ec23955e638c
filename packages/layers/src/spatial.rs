//! R-tree index for attributing buildings to enclosures.
//!
//! Built once per run from the enclosure layer; lookups run an envelope
//! query first and confirm with an exact point-in-polygon test.

use geo::{BoundingRect, Contains, Point, Polygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::Enclosure;

/// An enclosure polygon stored in the R-tree with its position in the
/// source layer.
struct EnclosureEntry {
    index: usize,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: Polygon<f64>,
}

impl RTreeObject for EnclosureEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built spatial index over the enclosure layer.
pub struct EnclosureIndex {
    tree: RTree<EnclosureEntry>,
}

impl EnclosureIndex {
    /// Builds the index. Entry order is irrelevant; lookups return indexes
    /// into the slice passed here.
    #[must_use]
    pub fn build(enclosures: &[Enclosure]) -> Self {
        let entries = enclosures
            .iter()
            .enumerate()
            .map(|(index, enclosure)| EnclosureEntry {
                index,
                area: enclosure.area,
                envelope: compute_envelope(&enclosure.polygon),
                polygon: enclosure.polygon.clone(),
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Returns the index of the enclosure containing the point.
    ///
    /// Enclosures should tile the block plan without overlap; if the
    /// generator ever emits nested enclosures, the smallest one wins.
    #[must_use]
    pub fn enclosure_for(&self, point: Point<f64>) -> Option<usize> {
        let query_env = AABB::from_point([point.x(), point.y()]);
        let mut best: Option<&EnclosureEntry> = None;

        for entry in self.tree.locate_in_envelope_intersecting(&query_env) {
            if entry.polygon.contains(&point) {
                match best {
                    None => best = Some(entry),
                    Some(current) if entry.area < current.area => best = Some(entry),
                    _ => {}
                }
            }
        }

        best.map(|entry| entry.index)
    }
}

fn compute_envelope(polygon: &Polygon<f64>) -> AABB<[f64; 2]> {
    polygon.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Coord, LineString};

    fn square(id: &str, x0: f64, y0: f64, size: f64) -> Enclosure {
        let ring = LineString(vec![
            Coord { x: x0, y: y0 },
            Coord { x: x0 + size, y: y0 },
            Coord {
                x: x0 + size,
                y: y0 + size,
            },
            Coord { x: x0, y: y0 + size },
            Coord { x: x0, y: y0 },
        ]);
        Enclosure {
            id: id.to_string(),
            polygon: Polygon::new(ring, vec![]),
            area: size * size,
        }
    }

    #[test]
    fn points_resolve_to_their_enclosure() {
        let enclosures = vec![square("a", 0.0, 0.0, 100.0), square("b", 100.0, 0.0, 100.0)];
        let index = EnclosureIndex::build(&enclosures);

        assert_eq!(index.enclosure_for(Point::new(50.0, 50.0)), Some(0));
        assert_eq!(index.enclosure_for(Point::new(150.0, 50.0)), Some(1));
        assert_eq!(index.enclosure_for(Point::new(250.0, 50.0)), None);
    }

    #[test]
    fn nested_enclosures_resolve_to_the_smallest() {
        let enclosures = vec![square("outer", 0.0, 0.0, 100.0), square("inner", 40.0, 40.0, 20.0)];
        let index = EnclosureIndex::build(&enclosures);
        assert_eq!(index.enclosure_for(Point::new(50.0, 50.0)), Some(1));
    }

    #[test]
    fn empty_layer_never_matches() {
        let index = EnclosureIndex::build(&[]);
        assert_eq!(index.enclosure_for(Point::new(0.0, 0.0)), None);
    }
}
