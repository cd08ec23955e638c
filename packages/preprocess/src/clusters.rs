//! Street-cluster template scaling.
//!
//! The generator draws street geometry from per-cluster statistical
//! series (segment lengths, intersection degrees, forward angles). A
//! street-template rule scales one series of one cluster: a weight-sized
//! fraction of the samples, chosen without replacement, is multiplied by
//! the rule's factor. Rules apply in declaration order so a fixed seed
//! reproduces the run exactly.

use std::collections::BTreeMap;
use std::path::Path;

use cityweave_rules::{RuleSet, TemplateParameter};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{PreprocessError, sample_count};

/// RNG stream for cluster-template scaling, disjoint from the grid stream.
const TEMPLATE_STREAM: u64 = 2;

/// One cluster's statistical series, as consumed by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterTemplate {
    /// Cluster id referenced by the template grid's `cluster_street` cells.
    pub cluster: i32,
    /// Street segment lengths in meters.
    pub segment_length: Vec<f64>,
    /// Node degrees at intersections.
    pub intersection_degree: Vec<f64>,
    /// Deflection angles between consecutive segments, in degrees.
    pub forward_angle: Vec<f64>,
}

impl ClusterTemplate {
    /// Loads one cluster template from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load(path: &Path) -> Result<Self, PreprocessError> {
        let bytes = std::fs::read(path)?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    /// Writes the template atomically (tmp file, then rename).
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

    /// File name the template is stored under, `cluster_<id>.mpk`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("cluster_{}.mpk", self.cluster)
    }

    fn series_mut(&mut self, parameter: TemplateParameter) -> &mut Vec<f64> {
        match parameter {
            TemplateParameter::SegmentLength => &mut self.segment_length,
            TemplateParameter::IntersectionDegree => &mut self.intersection_degree,
            TemplateParameter::ForwardAngle => &mut self.forward_angle,
        }
    }
}

/// Record of one applied street-template rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateScaling {
    /// Cluster the rule targeted.
    pub cluster: i32,
    /// Series the rule scaled.
    pub parameter: TemplateParameter,
    /// Multiplier applied to the chosen samples.
    pub factor: f64,
    /// Number of samples scaled.
    pub scaled: usize,
    /// Series length before scaling.
    pub total: usize,
}

/// Loads every `cluster_<id>.mpk` file in a directory, keyed by the
/// cluster id stored inside the file.
///
/// # Errors
///
/// Returns an error if the directory cannot be listed or a matching file
/// cannot be read or decoded.
pub fn load_cluster_dir(dir: &Path) -> Result<BTreeMap<i32, ClusterTemplate>, PreprocessError> {
    let mut templates = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().map(|name| name.to_string_lossy().into_owned()) else {
            continue;
        };
        if !name.starts_with("cluster_") || !name.ends_with(".mpk") {
            continue;
        }
        let template = ClusterTemplate::load(&path)?;
        if let Some(previous) = templates.insert(template.cluster, template) {
            log::warn!(
                "Duplicate template for cluster {} in {}; keeping the later file",
                previous.cluster,
                dir.display()
            );
        }
    }
    log::info!(
        "Loaded {} cluster templates from {}",
        templates.len(),
        dir.display()
    );
    Ok(templates)
}

/// Applies every street-template rule to the loaded templates, in
/// declaration order.
///
/// A rule naming a cluster with no template is skipped with a warning.
/// The returned records list each applied rule with the number of samples
/// it touched.
pub fn scale_cluster_templates(
    templates: &mut BTreeMap<i32, ClusterTemplate>,
    rules: &RuleSet,
    seed: u64,
) -> Vec<TemplateScaling> {
    let mut rng = template_rng(seed);
    let mut applied = Vec::with_capacity(rules.street_template_rules.len());
    for rule in &rules.street_template_rules {
        let Some(template) = templates.get_mut(&rule.cluster) else {
            log::warn!(
                "Street-template rule targets cluster {}, which has no template; skipping",
                rule.cluster
            );
            continue;
        };
        let series = template.series_mut(rule.parameter);
        let total = series.len();
        let count = sample_count(rule.weight, total);
        let mut indices: Vec<usize> = (0..total).collect();
        indices.shuffle(&mut rng);
        indices.truncate(count);
        for idx in indices {
            series[idx] *= rule.factor;
        }
        log::debug!(
            "Scaled {count}/{total} {} samples of cluster {} by {}",
            rule.parameter,
            rule.cluster,
            rule.factor
        );
        applied.push(TemplateScaling {
            cluster: rule.cluster,
            parameter: rule.parameter,
            factor: rule.factor,
            scaled: count,
            total,
        });
    }
    applied
}

/// Loads templates from `input_dir`, scales them, and writes the derived
/// copies to `output_dir`. The inputs are left untouched.
///
/// # Errors
///
/// Returns an error if loading or writing a template fails.
pub fn scale_cluster_dir(
    input_dir: &Path,
    output_dir: &Path,
    rules: &RuleSet,
    seed: u64,
) -> Result<Vec<TemplateScaling>, PreprocessError> {
    let mut templates = load_cluster_dir(input_dir)?;
    let applied = scale_cluster_templates(&mut templates, rules, seed);
    for template in templates.values() {
        template.save(&output_dir.join(template.file_name()))?;
    }
    log::info!(
        "Wrote {} cluster templates to {} ({} rules applied)",
        templates.len(),
        output_dir.display(),
        applied.len()
    );
    Ok(applied)
}

fn template_rng(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(TEMPLATE_STREAM);
    rng
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_with(toml_rules: &str) -> RuleSet {
        let zones = r#"
            [[zones]]
            name = "inner"
            min_distance = 0.0
            max_distance = 1000.0
        "#;
        RuleSet::from_toml_str(&format!("{zones}\n{toml_rules}")).unwrap()
    }

    fn template(cluster: i32, len: usize) -> ClusterTemplate {
        ClusterTemplate {
            cluster,
            segment_length: vec![10.0; len],
            intersection_degree: vec![3.0; len],
            forward_angle: vec![5.0; len],
        }
    }

    #[test]
    fn scales_a_weight_sized_fraction() {
        let rules = rules_with(
            r#"
            [[street_template_rules]]
            cluster = 4
            parameter = "segment_length"
            factor = 2.0
            weight = 0.5
        "#,
        );
        let mut templates = BTreeMap::from([(4, template(4, 100))]);
        let applied = scale_cluster_templates(&mut templates, &rules, 7);

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].scaled, 50);
        let scaled = templates[&4]
            .segment_length
            .iter()
            .filter(|v| (**v - 20.0).abs() < 1e-9)
            .count();
        assert_eq!(scaled, 50);
        // The other series are untouched.
        assert!(
            templates[&4]
                .intersection_degree
                .iter()
                .all(|v| (*v - 3.0).abs() < 1e-9)
        );
        assert!(
            templates[&4]
                .forward_angle
                .iter()
                .all(|v| (*v - 5.0).abs() < 1e-9)
        );
    }

    #[test]
    fn full_weight_scales_every_sample() {
        let rules = rules_with(
            r#"
            [[street_template_rules]]
            cluster = 1
            parameter = "forward_angle"
            factor = 0.5
            weight = 1.0
        "#,
        );
        let mut templates = BTreeMap::from([(1, template(1, 8))]);
        scale_cluster_templates(&mut templates, &rules, 0);
        assert!(templates[&1].forward_angle.iter().all(|v| (*v - 2.5).abs() < 1e-9));
    }

    #[test]
    fn unknown_cluster_is_skipped() {
        let rules = rules_with(
            r#"
            [[street_template_rules]]
            cluster = 9
            parameter = "segment_length"
            factor = 2.0
            weight = 1.0
        "#,
        );
        let mut templates = BTreeMap::from([(1, template(1, 4))]);
        let applied = scale_cluster_templates(&mut templates, &rules, 0);
        assert!(applied.is_empty());
        assert_eq!(templates[&1], template(1, 4));
    }

    #[test]
    fn same_seed_scales_the_same_samples() {
        let rules = rules_with(
            r#"
            [[street_template_rules]]
            cluster = 2
            parameter = "intersection_degree"
            factor = 3.0
            weight = 0.25
        "#,
        );
        let mut first = BTreeMap::from([(2, template(2, 40))]);
        let mut second = BTreeMap::from([(2, template(2, 40))]);
        scale_cluster_templates(&mut first, &rules, 99);
        scale_cluster_templates(&mut second, &rules, 99);
        assert_eq!(first, second);
    }

    #[test]
    fn rules_apply_in_declaration_order() {
        let rules = rules_with(
            r#"
            [[street_template_rules]]
            cluster = 1
            parameter = "segment_length"
            factor = 2.0
            weight = 1.0

            [[street_template_rules]]
            cluster = 1
            parameter = "segment_length"
            factor = 10.0
            weight = 1.0
        "#,
        );
        let mut templates = BTreeMap::from([(1, template(1, 5))]);
        let applied = scale_cluster_templates(&mut templates, &rules, 0);
        assert_eq!(applied.len(), 2);
        // Both full-weight rules compound: 10 * 2 * 10 = 200.
        assert!(templates[&1].segment_length.iter().all(|v| (*v - 200.0).abs() < 1e-9));
    }

    #[test]
    fn round_trips_through_a_directory() {
        let dir = std::env::temp_dir().join(format!("cityweave-clusters-{}", std::process::id()));
        let input = dir.join("in");
        let output = dir.join("out");
        std::fs::create_dir_all(&input).unwrap();

        let original = template(3, 6);
        original.save(&input.join(original.file_name())).unwrap();

        let rules = rules_with(
            r#"
            [[street_template_rules]]
            cluster = 3
            parameter = "segment_length"
            factor = 2.0
            weight = 1.0
        "#,
        );
        let applied = scale_cluster_dir(&input, &output, &rules, 5).unwrap();
        assert_eq!(applied.len(), 1);

        // The input file is untouched; the output carries the scaled series.
        let kept = ClusterTemplate::load(&input.join("cluster_3.mpk")).unwrap();
        assert_eq!(kept, original);
        let scaled = ClusterTemplate::load(&output.join("cluster_3.mpk")).unwrap();
        assert!(scaled.segment_length.iter().all(|v| (*v - 20.0).abs() < 1e-9));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
