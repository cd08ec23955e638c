//! The pipeline state machine and its stage functions.
//!
//! Stage bodies are free functions over `&RunContext`; [`Pipeline`]
//! enforces that they run in order and parks the machine in `Failed`
//! when one errors. Stages hand data forward through the filesystem
//! (derived templates, layers) and through the state they produce
//! (validated layers, the statistics report).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use cityweave_layers::{Enclosure, write_collection, write_streets};
use cityweave_postprocess::{
    RunStatistics, apply_street_rules, assign_households, building_counts, buildings_to_geojson,
    classify_buildings, write_buildings_csv, write_households_csv,
};
use cityweave_preprocess::{
    PreprocessOutcome, PreprocessStats, TemplateGrid, modify_template_file, scale_cluster_dir,
};
use strum_macros::Display;

use crate::PipelineError;
use crate::context::RunContext;
use crate::generator::{GeneratedLayers, GeneratorConfig, load_generated_layers, run_generator};
use crate::progress::ProgressCallback;

/// Observable pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    /// Nothing has run.
    Init,
    /// Derived generator inputs are on disk.
    Preprocessed,
    /// Generated layers are validated and in memory.
    Generated,
    /// All outputs are written.
    Postprocessed,
    /// The run is complete.
    Done,
    /// A stage failed; the machine will not advance.
    Failed,
}

/// Internal state, carrying what the next stage needs.
enum State {
    Init,
    Preprocessed,
    Generated {
        layers: GeneratedLayers,
        zone_areas: BTreeMap<String, f64>,
    },
    Postprocessed {
        report: RunStatistics,
    },
    Done,
    Failed {
        error: String,
    },
}

impl State {
    const fn stage(&self) -> Stage {
        match self {
            Self::Init => Stage::Init,
            Self::Preprocessed => Stage::Preprocessed,
            Self::Generated { .. } => Stage::Generated,
            Self::Postprocessed { .. } => Stage::Postprocessed,
            Self::Done => Stage::Done,
            Self::Failed { .. } => Stage::Failed,
        }
    }
}

/// A single run, from `Init` to `Done`.
pub struct Pipeline {
    context: RunContext,
    state: State,
}

impl Pipeline {
    /// A fresh pipeline in `Init`.
    #[must_use]
    pub const fn new(context: RunContext) -> Self {
        Self {
            context,
            state: State::Init,
        }
    }

    /// The run's shared context.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.context
    }

    /// Current state.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.state.stage()
    }

    /// The recorded failure, if the machine is in `Failed`.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            State::Failed { error } => Some(error),
            _ => None,
        }
    }

    /// Runs all stages in order and returns the statistics report.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; the machine is left in `Failed`.
    pub fn run(
        &mut self,
        config: &GeneratorConfig,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<RunStatistics, PipelineError> {
        let start = Instant::now();
        self.preprocess()?;
        self.generate(config, progress)?;
        self.postprocess()?;
        let report = self.finish()?;
        log::info!("Pipeline complete in {:.1} s", start.elapsed().as_secs_f64());
        Ok(report)
    }

    /// `Init -> Preprocessed`: writes the derived generator inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the inputs cannot be read or the derived
    /// files cannot be written, or the pipeline is not in `Init`.
    pub fn preprocess(&mut self) -> Result<PreprocessStats, PipelineError> {
        self.expect(Stage::Init)?;
        match run_preprocess(&self.context) {
            Ok(outcome) => {
                self.state = State::Preprocessed;
                Ok(outcome.stats)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// `Preprocessed -> Generated`: runs the external generator and
    /// validates its layers.
    ///
    /// # Errors
    ///
    /// Returns an error if the generator fails, times out, or leaves
    /// unusable layers, or the pipeline is not in `Preprocessed`.
    pub fn generate(
        &mut self,
        config: &GeneratorConfig,
        progress: Option<Arc<dyn ProgressCallback>>,
    ) -> Result<(), PipelineError> {
        self.expect(Stage::Preprocessed)?;
        match run_generator(config, &self.context, progress) {
            Ok(layers) => {
                let zone_areas = zone_areas_for(&self.context, &layers.enclosures);
                self.state = State::Generated { layers, zone_areas };
                Ok(())
            }
            Err(error) => Err(self.fail(error.into())),
        }
    }

    /// `Init -> Generated` from existing layer files, skipping
    /// preprocessing and generation.
    ///
    /// # Errors
    ///
    /// Returns an error if a layer is missing or malformed, or the
    /// pipeline is not in `Init`.
    pub fn resume_generated(&mut self) -> Result<(), PipelineError> {
        self.expect(Stage::Init)?;
        match load_generated_layers(&self.context.paths) {
            Ok(layers) => {
                let zone_areas = zone_areas_for(&self.context, &layers.enclosures);
                self.state = State::Generated { layers, zone_areas };
                Ok(())
            }
            Err(error) => Err(self.fail(error.into())),
        }
    }

    /// `Generated -> Postprocessed`: classifies buildings, applies
    /// street rules, assigns households, and writes every output
    /// including the statistics report.
    ///
    /// # Errors
    ///
    /// Returns an error if an output cannot be written, or the pipeline
    /// is not in `Generated`.
    pub fn postprocess(&mut self) -> Result<RunStatistics, PipelineError> {
        match std::mem::replace(&mut self.state, State::Init) {
            State::Generated { layers, zone_areas } => {
                match run_postprocess(&self.context, layers, &zone_areas) {
                    Ok(report) => {
                        let summary = report.clone();
                        self.state = State::Postprocessed { report };
                        Ok(summary)
                    }
                    Err(error) => Err(self.fail(error)),
                }
            }
            other => {
                let actual = other.stage();
                self.state = other;
                Err(PipelineError::OutOfOrder {
                    expected: Stage::Generated,
                    actual,
                })
            }
        }
    }

    /// `Postprocessed -> Done`: logs the end-of-run summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is not in `Postprocessed`.
    pub fn finish(&mut self) -> Result<RunStatistics, PipelineError> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Postprocessed { report } => {
                report.log_summary();
                Ok(report)
            }
            other => {
                let actual = other.stage();
                self.state = other;
                Err(PipelineError::OutOfOrder {
                    expected: Stage::Postprocessed,
                    actual,
                })
            }
        }
    }

    fn expect(&self, expected: Stage) -> Result<(), PipelineError> {
        let actual = self.stage();
        if actual == expected {
            Ok(())
        } else {
            Err(PipelineError::OutOfOrder { expected, actual })
        }
    }

    fn fail(&mut self, error: PipelineError) -> PipelineError {
        log::error!("Pipeline failed: {error}");
        self.state = State::Failed {
            error: error.to_string(),
        };
        error
    }
}

/// Scales cluster templates and rewrites the template grid.
fn run_preprocess(context: &RunContext) -> Result<PreprocessOutcome, PipelineError> {
    let scalings = scale_cluster_dir(
        &context.paths.clusters,
        &context.paths.modified_clusters(),
        &context.rules,
        context.seed,
    )?;
    log::info!("Applied {} cluster scalings", scalings.len());
    let outcome = modify_template_file(
        &context.paths.template,
        &context.paths.modified_template(),
        &context.rules,
        context.seed,
    )?;
    Ok(outcome)
}

/// Zone areas for household targets: derived template cell counts when
/// the file is on disk, enclosure footprint sums otherwise.
fn zone_areas_for(context: &RunContext, enclosures: &[Enclosure]) -> BTreeMap<String, f64> {
    match TemplateGrid::load(&context.paths.modified_template()) {
        Ok(grid) => context.zone_areas_from_grid(&grid),
        Err(error) => {
            log::warn!("No derived template for zone areas ({error}); summing enclosure areas");
            context.zone_areas_from_enclosures(enclosures)
        }
    }
}

/// Produces every postprocess output and the statistics report.
fn run_postprocess(
    context: &RunContext,
    layers: GeneratedLayers,
    zone_areas: &BTreeMap<String, f64>,
) -> Result<RunStatistics, PipelineError> {
    let GeneratedLayers {
        streets,
        enclosures,
        buildings,
        center,
    } = layers;

    let classified =
        classify_buildings(buildings, &enclosures, center, &context.rules, context.seed);
    let modified = apply_street_rules(&streets, &context.rules, context.seed);
    write_streets(&context.paths.modified_streets(), &modified)?;

    let assignments = assign_households(
        &classified,
        &context.rules,
        zone_areas,
        context.grid.cell_area(),
        context.seed,
    );
    let counts = building_counts(&assignments);

    let collection = buildings_to_geojson(&classified, &counts);
    write_collection(&context.paths.classified_buildings(), &collection)?;
    write_households_csv(&context.paths.households_csv(), &assignments)?;
    write_buildings_csv(&context.paths.buildings_csv(), &classified, &counts)?;

    let report = RunStatistics::collect(&classified, &assignments, &context.rules, context.seed);
    report.save(&context.paths.statistics())?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use cityweave_layers::Street;
    use cityweave_rules::RuleSet;
    use geo::{LineString, Point};

    use crate::context::{GridGeometry, RunPaths};
    use crate::progress::null_progress;

    const RULES: &str = r#"
        [[zones]]
        name = "everywhere"
        min_distance = 0.0

        [[housing_type_rules]]
        zone = "everywhere"
        apartment_pct = 0.5
        detached_pct = 0.25
        terraced_pct = 0.25

        [[landuse_rules]]
        zone = "everywhere"
        residential_pct = 1.0

        [[unit_size_rules]]
        zone = "everywhere"
        min_size = 40.0
        max_size = 80.0

        [[household_type_rules]]
        zone = "everywhere"
        single_person_pct = 1.0
        single_parent_pct = 0.0
        two_parent_pct = 0.0
    "#;

    const BUILDINGS: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[0,0],[20,0],[20,15],[0,15],[0,0]]]},"properties":{"building_id":"b1","building_class":"apartments","floor_area":300.0,"height":9.0}},
        {"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[30,0],[50,0],[50,15],[30,15],[30,0]]]},"properties":{"building_id":"b2","building_class":"industrial","floor_area":400.0,"height":7.0}}
    ]}"#;

    const ENCLOSURES: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","geometry":{"type":"Polygon","coordinates":[[[0,0],[60,0],[60,40],[0,40],[0,0]]]},"properties":{"enclosure_id":"e1","area":2400.0}}
    ]}"#;

    const CITY_CENTER: &str = r#"{"type":"FeatureCollection","features":[
        {"type":"Feature","geometry":{"type":"Point","coordinates":[0.0,0.0]},"properties":{}}
    ]}"#;

    fn temp_root(tag: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("cityweave-stages-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn template_4x4() -> TemplateGrid {
        TemplateGrid {
            rows: 4,
            cols: 4,
            cell_size: 100.0,
            building_class: vec![0; 16],
            cluster_street: vec![0; 16],
            city_center: Some((0, 0)),
        }
    }

    fn context(root: &Path, seed: u64) -> RunContext {
        let rules = RuleSet::from_toml_str(RULES).unwrap();
        RunContext::new(
            seed,
            rules,
            GridGeometry::of(&template_4x4()),
            RunPaths::from_root(root),
        )
    }

    fn write_inputs(paths: &RunPaths) {
        template_4x4().save(&paths.template).unwrap();
        std::fs::create_dir_all(&paths.clusters).unwrap();
    }

    fn write_layers(paths: &RunPaths) {
        std::fs::create_dir_all(&paths.layers).unwrap();
        let street = Street {
            id: "s1".to_string(),
            line: LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]),
            road_class: "residential".to_string(),
        };
        write_streets(&paths.streets_layer(), &[street]).unwrap();
        std::fs::write(paths.buildings_layer(), BUILDINGS).unwrap();
        std::fs::write(paths.enclosures_layer(), ENCLOSURES).unwrap();
        std::fs::write(paths.city_center_layer(), CITY_CENTER).unwrap();
    }

    #[test]
    fn steps_out_of_order_are_rejected() {
        let root = temp_root("order");
        let mut pipeline = Pipeline::new(context(&root, 1));

        let err = pipeline.postprocess().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::OutOfOrder {
                expected: Stage::Generated,
                actual: Stage::Init,
            }
        ));
        // A misordered call does not poison the machine.
        assert_eq!(pipeline.stage(), Stage::Init);
        assert!(pipeline.failure().is_none());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn preprocess_writes_the_derived_inputs() {
        let root = temp_root("preprocess");
        let mut pipeline = Pipeline::new(context(&root, 5));
        write_inputs(&pipeline.context().paths);

        let stats = pipeline.preprocess().unwrap();
        assert_eq!(pipeline.stage(), Stage::Preprocessed);
        assert_eq!(stats.by_zone["everywhere"], 16);
        assert!(pipeline.context().paths.modified_template().exists());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn resume_then_postprocess_writes_every_output() {
        let root = temp_root("resume");
        let mut pipeline = Pipeline::new(context(&root, 11));
        write_layers(&pipeline.context().paths);

        pipeline.resume_generated().unwrap();
        assert_eq!(pipeline.stage(), Stage::Generated);

        let report = pipeline.postprocess().unwrap();
        assert_eq!(pipeline.stage(), Stage::Postprocessed);
        assert_eq!(report.total_buildings, 2);
        // b1 is residential: floor 300 over 60 m^2 units makes 5 households.
        assert_eq!(report.total_households, 5);
        assert_eq!(report.total_residents, 5);

        let paths = &pipeline.context().paths;
        assert!(paths.classified_buildings().exists());
        assert!(paths.modified_streets().exists());
        assert!(paths.households_csv().exists());
        assert!(paths.buildings_csv().exists());
        assert!(paths.statistics().exists());

        let done = pipeline.finish().unwrap();
        assert_eq!(pipeline.stage(), Stage::Done);
        assert_eq!(done.total_households, report.total_households);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn resume_without_layers_fails() {
        let root = temp_root("missing");
        let mut pipeline = Pipeline::new(context(&root, 2));

        assert!(pipeline.resume_generated().is_err());
        assert_eq!(pipeline.stage(), Stage::Failed);
        assert!(pipeline.failure().is_some());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn failed_generation_parks_the_machine_in_failed() {
        let root = temp_root("genfail");
        let mut pipeline = Pipeline::new(context(&root, 3));
        write_inputs(&pipeline.context().paths);

        pipeline.preprocess().unwrap();
        let err = pipeline
            .generate(&GeneratorConfig::new("false"), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
        assert_eq!(pipeline.stage(), Stage::Failed);
        assert!(pipeline.failure().is_some_and(|msg| msg.contains("exited")));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn full_run_reaches_done_and_repeats_byte_identically() {
        let staged = temp_root("staged");
        let fake_paths = RunPaths::from_root(&staged);
        write_layers(&fake_paths);

        let run = |root: &Path| {
            let mut pipeline = Pipeline::new(context(root, 21));
            write_inputs(&pipeline.context().paths);
            let mut config = GeneratorConfig::new("sh");
            config.args = vec![
                "-c".to_string(),
                format!("cp {}/layers/* {{layers}}/", staged.display()),
            ];
            let report = pipeline.run(&config, Some(null_progress())).unwrap();
            assert_eq!(pipeline.stage(), Stage::Done);
            report
        };

        let root_a = temp_root("full-a");
        let root_b = temp_root("full-b");
        let report_a = run(&root_a);
        let report_b = run(&root_b);

        assert_eq!(report_a.total_households, report_b.total_households);
        let households_a = std::fs::read(RunPaths::from_root(&root_a).households_csv()).unwrap();
        let households_b = std::fs::read(RunPaths::from_root(&root_b).households_csv()).unwrap();
        assert_eq!(households_a, households_b);
        let buildings_a = std::fs::read(RunPaths::from_root(&root_a).buildings_csv()).unwrap();
        let buildings_b = std::fs::read(RunPaths::from_root(&root_b).buildings_csv()).unwrap();
        assert_eq!(buildings_a, buildings_b);

        for dir in [&staged, &root_a, &root_b] {
            std::fs::remove_dir_all(dir).unwrap();
        }
    }
}
