use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use homesim_app::{
    OutputOptions, RunReport, load_household, load_sim_config, run_simulation, scripted_oracle,
};
use homesim_oracle::{ChatOracle, ChatSettings, DEFAULT_BASE_URL, DEFAULT_MODEL, PromptTemplates};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "homesim",
    version,
    about = "Simulate a persona's days in a smart home and log the sensor activity"
)]
struct Cli {
    /// Directory holding env_config.json, activity_config.json and user_profile.json.
    #[arg(long, env = "HOMESIM_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Optional JSON file with simulation settings (seed, thresholds, probabilities).
    #[arg(long, env = "HOMESIM_SIM_CONFIG")]
    sim_config: Option<PathBuf>,

    /// Persona to simulate; overrides the simulation settings.
    #[arg(long, env = "HOMESIM_PERSONA")]
    persona: Option<String>,

    /// Number of days to simulate.
    #[arg(long, default_value_t = 1)]
    days: u32,

    /// RNG seed; overrides the simulation settings.
    #[arg(long, env = "HOMESIM_SEED")]
    seed: Option<u64>,

    /// DuckDB file for the day logs. Nothing is stored when omitted.
    #[arg(long, env = "HOMESIM_DB")]
    db: Option<PathBuf>,

    /// Write per-day CSV files into this directory (requires --db).
    #[arg(long, requires = "db")]
    export_csv: Option<PathBuf>,

    /// Replay the plan in this JSON file every day instead of calling an LLM.
    #[arg(long)]
    plan_file: Option<PathBuf>,

    /// Chat-completions base URL.
    #[arg(long, env = "HOMESIM_ORACLE_URL", default_value = DEFAULT_BASE_URL)]
    oracle_url: String,

    #[arg(long, env = "HOMESIM_ORACLE_MODEL", default_value = DEFAULT_MODEL)]
    oracle_model: String,

    #[arg(long, env = "HOMESIM_ORACLE_API_KEY", hide_env_values = true)]
    oracle_api_key: Option<String>,

    /// Directory of prompt template overrides.
    #[arg(long, env = "HOMESIM_PROMPTS_DIR")]
    prompts_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = load_sim_config(cli.sim_config.as_deref())?;
    if let Some(persona) = &cli.persona {
        config.persona_id = persona.clone();
    }
    if let Some(seed) = cli.seed {
        config.rng_seed = Some(seed);
    }
    let household = load_household(&cli.config_dir, &config.persona_id)?;
    let output = OutputOptions {
        database: cli.db.clone(),
        export_dir: cli.export_csv.clone(),
    };

    let report = match &cli.plan_file {
        Some(path) => {
            info!(plan = %path.display(), "replaying scripted plan");
            run_simulation(config, household, scripted_oracle(path)?, cli.days, &output)?
        }
        None => {
            let prompts = match &cli.prompts_dir {
                Some(dir) => PromptTemplates::load_dir(dir)
                    .with_context(|| format!("failed to load prompts from {}", dir.display()))?,
                None => PromptTemplates::default(),
            };
            let settings = ChatSettings {
                base_url: cli.oracle_url.clone(),
                model: cli.oracle_model.clone(),
                api_key: cli.oracle_api_key.clone(),
                ..ChatSettings::default()
            };
            let oracle =
                ChatOracle::new(settings, prompts).context("failed to build the Oracle client")?;
            run_simulation(config, household, oracle, cli.days, &output)?
        }
    };

    print_report(&report);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn print_report(report: &RunReport) {
    println!(
        "persona {} run {}: {} day(s) simulated",
        report.persona_id, report.run_id, report.days_completed
    );
    for summary in &report.summaries {
        println!(
            "  day {:>3} {:<9} activities {:>3}  sensor records {:>5}  events {:>5}",
            summary.day, summary.weekday, summary.done, summary.sensors, summary.events
        );
    }
    if !report.exported.is_empty() {
        println!("exported {} CSV file(s)", report.exported.len());
    }
}
