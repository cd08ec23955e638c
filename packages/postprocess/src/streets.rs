//! Street geometry editing.
//!
//! Each street-geometry rule is applied as one pass over the street
//! layer, in declaration order. A street whose condition matches receives
//! the rule's action with probability `weight` (seeded draw). All four
//! actions are idempotent at the same parameter: simplifying an already
//! simplified line, splitting already short streets, extending a
//! connected endpoint, or smoothing a line below the angle threshold are
//! no-ops.

use cityweave_layers::Street;
use cityweave_rules::{AttrRecord, RuleSet, StreetAction};
use geo::{Coord, LineString};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// RNG stream for street edit draws.
const STREET_STREAM: u64 = 4;

/// Endpoints closer than this to another street count as connected.
const CONNECT_EPSILON: f64 = 1e-6;

/// Upper bound on Chaikin passes per smooth call.
const MAX_SMOOTH_PASSES: usize = 8;

/// Applies every street-geometry rule to the layer, in declaration order.
///
/// Split streets replace their source with consecutively numbered pieces
/// (`id-1`, `id-2`, ...). Condition evaluation failures skip the street
/// for that rule with a warning.
#[must_use]
pub fn apply_street_rules(streets: &[Street], rules: &RuleSet, seed: u64) -> Vec<Street> {
    let mut rng = street_rng(seed);
    let mut current: Vec<Street> = streets.to_vec();
    for rule in &rules.street_geometry_rules {
        let mut next: Vec<Street> = Vec::with_capacity(current.len());
        for index in 0..current.len() {
            let street = &current[index];
            let matched = match rule.condition.evaluate(&street_record(street)) {
                Ok(matched) => matched,
                Err(err) => {
                    log::warn!("Street rule skipped for {}: {err}", street.id);
                    false
                }
            };
            if !(matched && rng.gen_bool(rule.weight.clamp(0.0, 1.0))) {
                next.push(street.clone());
                continue;
            }
            match rule.action {
                StreetAction::Simplify => next.push(Street {
                    line: simplify_line(&street.line, rule.parameter),
                    ..street.clone()
                }),
                StreetAction::Split => {
                    let pieces = split_line(&street.line, rule.parameter);
                    if pieces.len() <= 1 {
                        next.push(street.clone());
                    } else {
                        for (piece_no, line) in pieces.into_iter().enumerate() {
                            next.push(Street {
                                id: format!("{}-{}", street.id, piece_no + 1),
                                line,
                                road_class: street.road_class.clone(),
                            });
                        }
                    }
                }
                StreetAction::Extend => next.push(Street {
                    line: extend_dead_ends(index, &current, rule.parameter),
                    ..street.clone()
                }),
                StreetAction::Smooth => next.push(Street {
                    line: smooth_line(&street.line, rule.parameter),
                    ..street.clone()
                }),
            }
        }
        current = next;
    }
    current
}

/// Ramer-Douglas-Peucker vertex reduction at the given tolerance.
#[must_use]
pub fn simplify_line(line: &LineString<f64>, tolerance: f64) -> LineString<f64> {
    let points = &line.0;
    if points.len() <= 2 || tolerance <= 0.0 {
        return line.clone();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;
    rdp_mark(points, 0, points.len() - 1, tolerance, &mut keep);
    LineString::from(
        points
            .iter()
            .zip(&keep)
            .filter(|(_, kept)| **kept)
            .map(|(coord, _)| *coord)
            .collect::<Vec<Coord<f64>>>(),
    )
}

/// Cuts a line longer than `max_length` into even consecutive pieces no
/// longer than `max_length`. Short lines come back whole.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn split_line(line: &LineString<f64>, max_length: f64) -> Vec<LineString<f64>> {
    let total = line_length(line);
    if max_length <= 0.0 || total <= max_length || line.0.len() < 2 {
        return vec![line.clone()];
    }
    let piece_count = (total / max_length).ceil() as usize;
    let target = total / (total / max_length).ceil();

    let mut out: Vec<LineString<f64>> = Vec::with_capacity(piece_count);
    let mut piece: Vec<Coord<f64>> = vec![line.0[0]];
    let mut walked = 0.0;
    for pair in line.0.windows(2) {
        let (mut a, b) = (pair[0], pair[1]);
        let mut segment = (b.x - a.x).hypot(b.y - a.y);
        if segment < f64::EPSILON {
            continue;
        }
        while walked + segment >= target && out.len() + 1 < piece_count {
            let need = target - walked;
            let t = need / segment;
            let cut = Coord {
                x: (b.x - a.x).mul_add(t, a.x),
                y: (b.y - a.y).mul_add(t, a.y),
            };
            piece.push(cut);
            out.push(LineString::from(std::mem::take(&mut piece)));
            piece.push(cut);
            a = cut;
            segment -= need;
            walked = 0.0;
        }
        piece.push(b);
        walked += segment;
    }
    if piece.len() >= 2 {
        out.push(LineString::from(piece));
    }
    out
}

/// Extends the dead-end endpoints of `streets[index]` along their
/// terminal bearing to the nearest street within `max_gap`. Connected
/// endpoints are left alone.
#[must_use]
pub fn extend_dead_ends(index: usize, streets: &[Street], max_gap: f64) -> LineString<f64> {
    let line = &streets[index].line;
    let coords = &line.0;
    if coords.len() < 2 || max_gap <= 0.0 {
        return line.clone();
    }
    let start = coords[0];
    let end = coords[coords.len() - 1];
    let start_hit = unit_vector(coords[1], start)
        .filter(|_| is_dead_end(start, index, streets))
        .and_then(|direction| nearest_hit(start, direction, max_gap, index, streets));
    let end_hit = unit_vector(coords[coords.len() - 2], end)
        .filter(|_| is_dead_end(end, index, streets))
        .and_then(|direction| nearest_hit(end, direction, max_gap, index, streets));

    let mut extended = coords.clone();
    if let Some(hit) = start_hit {
        extended.insert(0, hit);
    }
    if let Some(hit) = end_hit {
        extended.push(hit);
    }
    LineString::from(extended)
}

/// Chaikin corner cutting until no interior vertex deflects by more than
/// `max_angle_deg`, bounded to a few passes.
#[must_use]
pub fn smooth_line(line: &LineString<f64>, max_angle_deg: f64) -> LineString<f64> {
    let mut coords = line.0.clone();
    for _ in 0..MAX_SMOOTH_PASSES {
        if coords.len() < 3 || max_deflection_deg(&coords) <= max_angle_deg {
            break;
        }
        coords = chaikin_pass(&coords);
    }
    LineString::from(coords)
}

fn street_record(street: &Street) -> AttrRecord {
    AttrRecord::new()
        .with("street_length", street.length())
        .with("road_class", street.road_class.as_str())
}

fn street_rng(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(STREET_STREAM);
    rng
}

fn line_length(line: &LineString<f64>) -> f64 {
    line.0
        .windows(2)
        .map(|pair| (pair[1].x - pair[0].x).hypot(pair[1].y - pair[0].y))
        .sum()
}

fn rdp_mark(points: &[Coord<f64>], first: usize, last: usize, tolerance: f64, keep: &mut [bool]) {
    if last <= first + 1 {
        return;
    }
    let mut max_distance = 0.0;
    let mut max_index = first;
    for index in first + 1..last {
        let distance = perpendicular_distance(points[index], points[first], points[last]);
        if distance > max_distance {
            max_distance = distance;
            max_index = index;
        }
    }
    if max_distance > tolerance {
        keep[max_index] = true;
        rdp_mark(points, first, max_index, tolerance, keep);
        rdp_mark(points, max_index, last, tolerance, keep);
    }
}

fn perpendicular_distance(point: Coord<f64>, start: Coord<f64>, end: Coord<f64>) -> f64 {
    let dx = end.x - start.x;
    let dy = end.y - start.y;
    let length = dx.hypot(dy);
    if length < f64::EPSILON {
        return (point.x - start.x).hypot(point.y - start.y);
    }
    (dy.mul_add(point.x, -(dx * point.y)) + end.x.mul_add(start.y, -(end.y * start.x))).abs()
        / length
}

/// Unit vector pointing from `from` to `to`, `None` for coincident points.
fn unit_vector(from: Coord<f64>, to: Coord<f64>) -> Option<Coord<f64>> {
    let dx = to.x - from.x;
    let dy = to.y - from.y;
    let length = dx.hypot(dy);
    if length < f64::EPSILON {
        return None;
    }
    Some(Coord {
        x: dx / length,
        y: dy / length,
    })
}

fn is_dead_end(point: Coord<f64>, self_index: usize, streets: &[Street]) -> bool {
    for (index, street) in streets.iter().enumerate() {
        if index == self_index {
            continue;
        }
        for pair in street.line.0.windows(2) {
            if point_segment_distance(point, pair[0], pair[1]) < CONNECT_EPSILON {
                return false;
            }
        }
    }
    true
}

/// Closest intersection of the ray `origin + t * direction` with any other
/// street, for `t` within `max_gap`.
fn nearest_hit(
    origin: Coord<f64>,
    direction: Coord<f64>,
    max_gap: f64,
    self_index: usize,
    streets: &[Street],
) -> Option<Coord<f64>> {
    let mut best: Option<f64> = None;
    for (index, street) in streets.iter().enumerate() {
        if index == self_index {
            continue;
        }
        for pair in street.line.0.windows(2) {
            if let Some(t) = ray_segment_intersection(origin, direction, pair[0], pair[1])
                && t <= max_gap
                && best.is_none_or(|current| t < current)
            {
                best = Some(t);
            }
        }
    }
    best.map(|t| Coord {
        x: direction.x.mul_add(t, origin.x),
        y: direction.y.mul_add(t, origin.y),
    })
}

fn ray_segment_intersection(
    origin: Coord<f64>,
    direction: Coord<f64>,
    a: Coord<f64>,
    b: Coord<f64>,
) -> Option<f64> {
    let segment = Coord {
        x: b.x - a.x,
        y: b.y - a.y,
    };
    let denominator = cross(direction, segment);
    if denominator.abs() < f64::EPSILON {
        return None;
    }
    let offset = Coord {
        x: a.x - origin.x,
        y: a.y - origin.y,
    };
    let t = cross(offset, segment) / denominator;
    let u = cross(offset, direction) / denominator;
    (t > CONNECT_EPSILON && (0.0..=1.0).contains(&u)).then_some(t)
}

fn cross(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x.mul_add(b.y, -(a.y * b.x))
}

fn point_segment_distance(point: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let abx = b.x - a.x;
    let aby = b.y - a.y;
    let length_sq = abx.mul_add(abx, aby * aby);
    if length_sq < f64::EPSILON {
        return (point.x - a.x).hypot(point.y - a.y);
    }
    let t = ((point.x - a.x).mul_add(abx, (point.y - a.y) * aby) / length_sq).clamp(0.0, 1.0);
    (point.x - abx.mul_add(t, a.x)).hypot(point.y - aby.mul_add(t, a.y))
}

fn max_deflection_deg(coords: &[Coord<f64>]) -> f64 {
    let mut max_angle = 0.0_f64;
    for window in coords.windows(3) {
        let into = unit_vector(window[0], window[1]);
        let out_of = unit_vector(window[1], window[2]);
        if let Some((into, out_of)) = into.zip(out_of) {
            let dot = into.x.mul_add(out_of.x, into.y * out_of.y);
            max_angle = max_angle.max(dot.clamp(-1.0, 1.0).acos().to_degrees());
        }
    }
    max_angle
}

fn chaikin_pass(coords: &[Coord<f64>]) -> Vec<Coord<f64>> {
    let Some((&first, &last)) = coords.first().zip(coords.last()) else {
        return coords.to_vec();
    };
    let mut out = Vec::with_capacity(coords.len() * 2);
    out.push(first);
    for pair in coords.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        out.push(Coord {
            x: 0.75_f64.mul_add(a.x, 0.25 * b.x),
            y: 0.75_f64.mul_add(a.y, 0.25 * b.y),
        });
        out.push(Coord {
            x: 0.25_f64.mul_add(a.x, 0.75 * b.x),
            y: 0.25_f64.mul_add(a.y, 0.75 * b.y),
        });
    }
    out.push(last);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn street(id: &str, road_class: &str, coords: Vec<(f64, f64)>) -> Street {
        Street {
            id: id.to_string(),
            line: LineString::from(coords),
            road_class: road_class.to_string(),
        }
    }

    fn rules(toml_rules: &str) -> RuleSet {
        let zones = r#"
            [[zones]]
            name = "inner"
            min_distance = 0.0
        "#;
        RuleSet::from_toml_str(&format!("{zones}\n{toml_rules}")).unwrap()
    }

    #[test]
    fn simplify_drops_near_collinear_points() {
        let line = LineString::from(vec![(0.0, 0.0), (50.0, 0.3), (100.0, 0.0)]);
        let simplified = simplify_line(&line, 1.0);
        assert_eq!(simplified.0.len(), 2);
        // Re-application at the same tolerance is a no-op.
        assert_eq!(simplify_line(&simplified, 1.0), simplified);
    }

    #[test]
    fn simplify_keeps_sharp_corners() {
        let line = LineString::from(vec![(0.0, 0.0), (50.0, 50.0), (100.0, 0.0)]);
        assert_eq!(simplify_line(&line, 1.0).0.len(), 3);
    }

    #[test]
    fn split_cuts_into_even_pieces() {
        let line = LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]);
        let pieces = split_line(&line, 30.0);
        assert_eq!(pieces.len(), 4);
        for piece in &pieces {
            assert!((line_length(piece) - 25.0).abs() < 1e-9);
        }
        // Pieces chain without gaps.
        assert_eq!(pieces[0].0.last(), pieces[1].0.first());
        // Each piece is already short enough, so re-splitting is a no-op.
        assert_eq!(split_line(&pieces[0], 30.0).len(), 1);
    }

    #[test]
    fn split_leaves_short_lines_whole() {
        let line = LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]);
        let pieces = split_line(&line, 100.0);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0], line);
    }

    #[test]
    fn smooth_rounds_sharp_corners() {
        let line = LineString::from(vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0)]);
        assert!((max_deflection_deg(&line.0) - 90.0).abs() < 1e-9);
        let smoothed = smooth_line(&line, 60.0);
        assert!(max_deflection_deg(&smoothed.0) <= 60.0);
        // Endpoints survive smoothing.
        assert_eq!(smoothed.0.first(), line.0.first());
        assert_eq!(smoothed.0.last(), line.0.last());
        // Below the threshold the line is untouched.
        assert_eq!(smooth_line(&smoothed, 60.0), smoothed);
    }

    #[test]
    fn extend_snaps_a_dead_end_to_the_nearest_street() {
        let streets = vec![
            street("a", "residential", vec![(0.0, 0.0), (10.0, 0.0)]),
            street("b", "primary", vec![(20.0, -10.0), (20.0, 10.0)]),
        ];
        let extended = extend_dead_ends(0, &streets, 15.0);
        assert_eq!(extended.0.last(), Some(&Coord { x: 20.0, y: 0.0 }));

        // Once connected, another pass changes nothing.
        let connected = vec![
            Street {
                line: extended.clone(),
                ..streets[0].clone()
            },
            streets[1].clone(),
        ];
        assert_eq!(extend_dead_ends(0, &connected, 15.0), extended);
    }

    #[test]
    fn extend_ignores_streets_beyond_the_gap() {
        let streets = vec![
            street("a", "residential", vec![(0.0, 0.0), (10.0, 0.0)]),
            street("b", "primary", vec![(20.0, -10.0), (20.0, 10.0)]),
        ];
        assert_eq!(extend_dead_ends(0, &streets, 5.0), streets[0].line);
    }

    #[test]
    fn rules_apply_only_to_matching_streets() {
        let set = rules(
            r#"
            [[street_geometry_rules]]
            condition = "road_class == residential"
            action = "simplify"
            parameter = 1.0
        "#,
        );
        let streets = vec![
            street("a", "residential", vec![(0.0, 0.0), (50.0, 0.3), (100.0, 0.0)]),
            street("b", "primary", vec![(0.0, 10.0), (50.0, 10.3), (100.0, 10.0)]),
        ];
        let edited = apply_street_rules(&streets, &set, 1);
        assert_eq!(edited[0].line.0.len(), 2);
        assert_eq!(edited[1].line.0.len(), 3);
    }

    #[test]
    fn split_rule_renumbers_pieces() {
        let set = rules(
            r#"
            [[street_geometry_rules]]
            condition = "street_length > 50"
            action = "split"
            parameter = 50.0
        "#,
        );
        let streets = vec![street("a", "residential", vec![(0.0, 0.0), (100.0, 0.0)])];
        let edited = apply_street_rules(&streets, &set, 1);
        assert_eq!(edited.len(), 2);
        assert_eq!(edited[0].id, "a-1");
        assert_eq!(edited[1].id, "a-2");
        assert_eq!(edited[0].road_class, "residential");
    }

    #[test]
    fn same_seed_applies_the_same_edits() {
        let set = rules(
            r#"
            [[street_geometry_rules]]
            condition = "street_length > 0"
            action = "split"
            parameter = 40.0
            weight = 0.5
        "#,
        );
        let streets: Vec<Street> = (0..30)
            .map(|i| {
                street(
                    &format!("s{i}"),
                    "residential",
                    vec![(0.0, f64::from(i)), (100.0, f64::from(i))],
                )
            })
            .collect();
        let first = apply_street_rules(&streets, &set, 11);
        let second = apply_street_rules(&streets, &set, 11);
        assert_eq!(first, second);
        // With weight 0.5 some streets split and some stay whole.
        assert!(first.len() > streets.len());
        assert!(first.iter().any(|s| !s.id.contains('-')));
    }
}
