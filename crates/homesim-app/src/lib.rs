//! Shared plumbing for the `homesim` runner: loading a household, wiring storage, running days.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use homesim_core::{
    DayPersistence, Household, NullPersistence, Oracle, ScriptedOracle, SimConfig, Simulation,
};
use homesim_storage::{DaySummary, StoragePipeline};
use tracing::info;

pub const ENV_CONFIG_FILE: &str = "env_config.json";
pub const ACTIVITY_CONFIG_FILE: &str = "activity_config.json";
pub const USER_PROFILE_FILE: &str = "user_profile.json";

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Decode the three household documents found in `dir`.
pub fn load_household(dir: &Path, persona: &str) -> Result<Household> {
    let env = read(&dir.join(ENV_CONFIG_FILE))?;
    let activities = read(&dir.join(ACTIVITY_CONFIG_FILE))?;
    let profiles = read(&dir.join(USER_PROFILE_FILE))?;
    Household::from_json(&env, &activities, &profiles, persona)
        .with_context(|| format!("invalid household configuration in {}", dir.display()))
}

/// `SimConfig` from a JSON file, or the defaults.
pub fn load_sim_config(path: Option<&Path>) -> Result<SimConfig> {
    let Some(path) = path else {
        return Ok(SimConfig::default());
    };
    let text = read(path)?;
    serde_json::from_str(&text)
        .with_context(|| format!("failed to parse simulation config {}", path.display()))
}

/// Offline Oracle that hands out the plan stored in `path` every day.
pub fn scripted_oracle(path: &Path) -> Result<ScriptedOracle> {
    Ok(ScriptedOracle::new().with_standing_plan(read(path)?))
}

/// Where finished days go.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    /// DuckDB file; days are discarded when absent.
    pub database: Option<PathBuf>,
    /// Directory for per-day CSV files; requires a database.
    pub export_dir: Option<PathBuf>,
}

/// What a finished run left behind.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub persona_id: String,
    pub run_id: u64,
    pub days_completed: u32,
    pub summaries: Vec<DaySummary>,
    pub exported: Vec<PathBuf>,
}

/// Run `days` simulated days and flush every finished day to the configured outputs.
///
/// Days completed before a fatal error stay stored; the error is returned after the
/// storage worker has been shut down.
pub fn run_simulation<O: Oracle>(
    config: SimConfig,
    household: Household,
    oracle: O,
    days: u32,
    output: &OutputOptions,
) -> Result<RunReport> {
    let (persistence, storage): (Box<dyn DayPersistence>, _) = match &output.database {
        Some(path) => {
            let path_string = path.to_string_lossy();
            let pipeline = StoragePipeline::new(&path_string)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            let storage = pipeline.storage();
            (Box::new(pipeline), Some(storage))
        }
        None => (Box::new(NullPersistence), None),
    };

    let mut sim = Simulation::with_persistence(config, household, oracle, persistence)
        .context("failed to set up simulation")?;
    let persona_id = sim.config().persona_id.clone();
    let run_id = sim.run_id();
    info!(persona = %persona_id, run_id, days, "starting simulation");

    let outcome = sim.run(days);
    let days_completed = sim.days_completed();
    // Joins the storage worker so every finished day is on disk.
    drop(sim);
    outcome.with_context(|| format!("simulation stopped after {days_completed} day(s)"))?;

    let mut report = RunReport {
        persona_id,
        run_id,
        days_completed,
        ..RunReport::default()
    };
    if let Some(storage) = storage {
        let mut storage = storage
            .lock()
            .map_err(|_| anyhow::anyhow!("storage lock poisoned"))?;
        report.summaries = storage.day_summaries(&report.persona_id, run_id)?;
        if let Some(dir) = &output.export_dir {
            report.exported = storage
                .export_csv(&report.persona_id, run_id, dir)
                .with_context(|| format!("failed to export CSV files to {}", dir.display()))?;
        }
    }
    Ok(report)
}
