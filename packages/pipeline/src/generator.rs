//! The external generator subprocess.
//!
//! Geometry generation happens outside this workspace: a user-supplied
//! command reads the derived template and cluster files and writes the
//! street, enclosure, building, and city-center layers. This module
//! launches that command with a timeout, then validates that every
//! expected layer exists and parses before the pipeline moves on.

use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cityweave_layers::{
    Building, Enclosure, LayerError, Street, read_buildings, read_city_center, read_enclosures,
    read_streets,
};
use geo::Point;
use thiserror::Error;

use crate::context::{RunContext, RunPaths};
use crate::progress::ProgressCallback;

/// Default wall-clock bound on a generator run.
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(600);

/// How often the child process is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How to invoke the external generator.
///
/// Arguments may carry the placeholders `{template}`, `{clusters}`,
/// `{layers}`, and `{seed}`, which are expanded from the run context at
/// launch time.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Program to run.
    pub program: PathBuf,
    /// Arguments, before placeholder expansion.
    pub args: Vec<String>,
    /// Wall-clock bound; the child is killed when it is exceeded.
    pub timeout: Duration,
}

impl GeneratorConfig {
    /// A config with no arguments and the default timeout.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_GENERATOR_TIMEOUT,
        }
    }
}

/// Ways the generation stage can fail.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The generator could not be started.
    #[error("Failed to launch generator '{program}': {source}")]
    Launch {
        /// Program that was invoked.
        program: String,
        /// Launch failure.
        source: std::io::Error,
    },
    /// The generator's status could not be polled.
    #[error("Failed to wait for generator '{program}': {source}")]
    Wait {
        /// Program that was invoked.
        program: String,
        /// Poll failure.
        source: std::io::Error,
    },
    /// The generator ran but reported failure.
    #[error("Generator '{program}' exited with {status}")]
    Exit {
        /// Program that was invoked.
        program: String,
        /// Its exit status.
        status: ExitStatus,
    },
    /// The generator exceeded its timeout and was killed.
    #[error("Generator '{program}' timed out after {timeout_secs} s")]
    Timeout {
        /// Program that was invoked.
        program: String,
        /// The configured bound in seconds.
        timeout_secs: u64,
    },
    /// The generator exited cleanly but a layer is missing or malformed.
    #[error("Generator output is unusable: {0}")]
    Output(#[from] LayerError),
}

/// The validated output of a generator run.
#[derive(Debug, Clone)]
pub struct GeneratedLayers {
    /// Street centerlines.
    pub streets: Vec<Street>,
    /// Street-bounded enclosures.
    pub enclosures: Vec<Enclosure>,
    /// Building footprints.
    pub buildings: Vec<Building>,
    /// City center the generator laid the network around.
    pub center: Point<f64>,
}

/// Runs the generator to completion and validates its layers.
///
/// The child is polled until it exits or the configured timeout passes;
/// on timeout it is killed. No partial output is consumed on failure.
///
/// # Errors
///
/// Returns an error if the generator cannot be launched, exits non-zero,
/// times out, or leaves a missing or malformed layer behind.
pub fn run_generator(
    config: &GeneratorConfig,
    context: &RunContext,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<GeneratedLayers, GenerationError> {
    let program = config.program.display().to_string();

    std::fs::create_dir_all(&context.paths.layers).map_err(|source| GenerationError::Launch {
        program: program.clone(),
        source,
    })?;

    let mut command = Command::new(&config.program);
    for arg in &config.args {
        command.arg(expand_arg(arg, context));
    }

    log::info!(
        "Running generator '{program}' (timeout {} s)...",
        config.timeout.as_secs()
    );
    let start = Instant::now();
    let mut child = command.spawn().map_err(|source| GenerationError::Launch {
        program: program.clone(),
        source,
    })?;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if start.elapsed() >= config.timeout {
                    child.kill().ok(); // child may have exited in between
                    child.wait().ok();
                    return Err(GenerationError::Timeout {
                        program,
                        timeout_secs: config.timeout.as_secs(),
                    });
                }
                if let Some(progress) = &progress {
                    progress.set_message(format!(
                        "Generating layers ({:.0} s)",
                        start.elapsed().as_secs_f64()
                    ));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(source) => {
                return Err(GenerationError::Wait { program, source });
            }
        }
    };

    if !status.success() {
        return Err(GenerationError::Exit { program, status });
    }
    log::info!(
        "Generator finished in {:.1} s",
        start.elapsed().as_secs_f64()
    );

    load_generated_layers(&context.paths)
}

/// Reads and validates the four generated layers.
///
/// # Errors
///
/// Returns an error if any layer is missing or fails to parse.
pub fn load_generated_layers(paths: &RunPaths) -> Result<GeneratedLayers, GenerationError> {
    let streets = read_streets(&paths.streets_layer())?;
    let enclosures = read_enclosures(&paths.enclosures_layer())?;
    let buildings = read_buildings(&paths.buildings_layer())?;
    let center = read_city_center(&paths.city_center_layer())?;
    log::info!(
        "Validated generated layers: {} streets, {} enclosures, {} buildings",
        streets.len(),
        enclosures.len(),
        buildings.len()
    );
    Ok(GeneratedLayers {
        streets,
        enclosures,
        buildings,
        center,
    })
}

fn expand_arg(arg: &str, context: &RunContext) -> String {
    arg.replace(
        "{template}",
        &context.paths.modified_template().to_string_lossy(),
    )
    .replace(
        "{clusters}",
        &context.paths.modified_clusters().to_string_lossy(),
    )
    .replace("{layers}", &context.paths.layers.to_string_lossy())
    .replace("{seed}", &context.seed.to_string())
}
