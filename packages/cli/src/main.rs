#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! CLI entry point for the cityweave layout synthesizer.
//!
//! Drives the pipeline end to end (`run`), or one stage at a time
//! (`preprocess`, `postprocess`), against a run directory laid out as
//! `input/`, `work/`, `layers/`, `output/`. `check-rules` loads and
//! validates a rule file without touching any data.
//!
//! Uses `indicatif-log-bridge` (via [`cityweave_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use cityweave_cli_utils::IndicatifProgress;
use cityweave_pipeline::{GeneratorConfig, Pipeline, RunContext, RunPaths};
use cityweave_rules::RuleSet;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cityweave", about = "Residential city layout synthesis tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: preprocess, generate, postprocess
    Run {
        /// Rule file (TOML)
        #[arg(long)]
        rules: PathBuf,
        /// Run directory holding `input/`, `work/`, `layers/`, `output/`
        #[arg(long, default_value = "data/run")]
        root: PathBuf,
        /// Seed for every random draw in the run
        #[arg(long, default_value = "0")]
        seed: u64,
        /// Generator command line; `{template}`, `{clusters}`, `{layers}`,
        /// and `{seed}` expand to the run's paths and seed
        #[arg(long)]
        generator: String,
        /// Generator timeout in seconds
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
    /// Rewrite the template grid and cluster templates, then stop
    Preprocess {
        /// Rule file (TOML)
        #[arg(long)]
        rules: PathBuf,
        /// Run directory holding `input/` and `work/`
        #[arg(long, default_value = "data/run")]
        root: PathBuf,
        /// Seed for every random draw in the run
        #[arg(long, default_value = "0")]
        seed: u64,
    },
    /// Re-run postprocessing over existing generated layers
    Postprocess {
        /// Rule file (TOML)
        #[arg(long)]
        rules: PathBuf,
        /// Run directory holding `layers/` and `output/`
        #[arg(long, default_value = "data/run")]
        root: PathBuf,
        /// Seed for every random draw in the run
        #[arg(long, default_value = "0")]
        seed: u64,
    },
    /// Load and validate a rule file, printing a summary
    CheckRules {
        /// Rule file (TOML)
        rules: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = cityweave_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            rules,
            root,
            seed,
            generator,
            timeout,
        } => {
            let start = Instant::now();
            let context = RunContext::load(seed, &rules, RunPaths::from_root(&root))?;
            let mut pipeline = Pipeline::new(context);
            let mut config = parse_generator(&generator)?;
            config.timeout = Duration::from_secs(timeout);

            let stages = IndicatifProgress::steps_bar(&multi, "Stages", 3);

            stages.set_message("[1/3] Preprocessing".to_string());
            let stats = pipeline.preprocess()?;
            let reassigned: usize = stats.by_zone.values().sum();
            log::info!(
                "[1/3] Reassigned {reassigned} cells across {} zones",
                stats.by_zone.len()
            );
            stages.inc(1);

            stages.set_message("[2/3] Generating".to_string());
            // Per-stage bar for the generator; cleared once it finishes
            // so completed bars don't accumulate.
            let generate_bar = IndicatifProgress::task_bar(&multi, "[2/3] Generating layers");
            let generated = pipeline.generate(&config, Some(generate_bar.clone()));
            generate_bar.finish_and_clear();
            generated?;
            stages.inc(1);

            stages.set_message("[3/3] Postprocessing".to_string());
            pipeline.postprocess()?;
            let report = pipeline.finish()?;
            stages.inc(1);
            stages.finish_and_clear();

            log::info!(
                "Run complete in {:.1} s: {} households, {} residents",
                start.elapsed().as_secs_f64(),
                report.total_households,
                report.total_residents
            );
        }
        Commands::Preprocess { rules, root, seed } => {
            let context = RunContext::load(seed, &rules, RunPaths::from_root(&root))?;
            let mut pipeline = Pipeline::new(context);
            let stats = pipeline.preprocess()?;

            println!("{:<22} CELLS", "ZONE");
            println!("{}", "-".repeat(32));
            for (zone, cells) in &stats.by_zone {
                println!("{zone:<22} {cells}");
            }
        }
        Commands::Postprocess { rules, root, seed } => {
            let start = Instant::now();
            let context = RunContext::load(seed, &rules, RunPaths::from_root(&root))?;
            let mut pipeline = Pipeline::new(context);

            log::info!("[1/2] Reading generated layers...");
            pipeline.resume_generated()?;
            log::info!("[2/2] Postprocessing...");
            pipeline.postprocess()?;
            let report = pipeline.finish()?;

            log::info!(
                "Postprocessing complete in {:.1} s: {} households, {} residents",
                start.elapsed().as_secs_f64(),
                report.total_households,
                report.total_residents
            );
        }
        Commands::CheckRules { rules } => {
            let set = RuleSet::load(&rules)?;

            println!("{:<22} RANGE", "ZONE");
            println!("{}", "-".repeat(44));
            for zone in set.zones.zones() {
                let range = zone.max_distance.map_or_else(
                    || format!("{:.0} m and beyond", zone.min_distance),
                    |max| format!("{:.0} m to {max:.0} m", zone.min_distance),
                );
                println!("{:<22} {range}", zone.name);
            }
            println!();
            println!("{:<22} RULES", "CATEGORY");
            println!("{}", "-".repeat(32));
            println!("{:<22} {}", "housing_type", set.housing_type_rules.len());
            println!(
                "{:<22} {}",
                "street_template",
                set.street_template_rules.len()
            );
            println!("{:<22} {}", "spatial", set.spatial.len());
            println!("{:<22} {}", "morphological", set.morphological.len());
            println!(
                "{:<22} {}",
                "street_geometry",
                set.street_geometry_rules.len()
            );
            println!("{:<22} {}", "demographic", set.demographic.len());
            println!("{:<22} {}", "residents", set.residents_rules.len());
            println!("{:<22} {}", "unit_size", set.unit_size_rules.len());
            println!("{:<22} {}", "household_type", set.household_type_rules.len());
            println!("{:<22} {}", "landuse", set.landuse_rules.len());
            println!("{:<22} {}", "constraint", set.constraint_rules.len());
            println!();
            println!(
                "{} rules across {} zones: OK",
                set.rule_count(),
                set.zones.len()
            );
        }
    }

    Ok(())
}

/// Splits a whitespace-separated generator command line into a config.
///
/// Paths with embedded spaces are not supported; point the command at a
/// wrapper script instead.
fn parse_generator(command: &str) -> Result<GeneratorConfig, Box<dyn std::error::Error>> {
    let mut parts = command.split_whitespace();
    let program = parts.next().ok_or("Generator command is empty")?;
    let mut config = GeneratorConfig::new(program);
    config.args = parts.map(str::to_string).collect();
    Ok(config)
}
