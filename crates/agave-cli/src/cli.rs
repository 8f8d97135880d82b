use agave_sim::{run_attitude, run_gravity_norm, run_pose, Scenario};
use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "agave")]
#[command(about = "Attitude and pose estimation on simulated smartphone sensors")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fused geomagnetic attitude against the truth trajectory
    Attitude(RunArgs),
    /// ECEF pose from fused attitude and strapdown navigation
    Pose(RunArgs),
    /// Gravity norm statistics
    GravityNorm(RunArgs),
    /// Print the default scenario as JSON
    Scenario,
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Scenario JSON file; defaults are used when omitted
    #[arg(short, long)]
    scenario: Option<PathBuf>,

    /// Overrides the scenario noise seed
    #[arg(long)]
    seed: Option<u64>,

    /// Output directory
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Output file format
    #[arg(short, long, value_enum, default_value = "csv")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

pub fn run() -> Result<()> {
    run_with(Args::parse())
}

fn run_with(args: Args) -> Result<()> {
    match args.command {
        Command::Attitude(run) => {
            let scenario = load_scenario(&run)?;
            let report = run_attitude(&scenario)?;
            println!("Attitude ({}):", report.scenario);
            println!("  Samples:     {}", report.rows.len());
            println!("  RMS error:   {:.4} deg", report.rms_error_deg);
            println!("  Max error:   {:.4} deg", report.max_error_deg);
            println!("  Final error: {:.4} deg", report.final_error_deg);
            println!(
                "  Corrections: {} blended, {} outliers, {} panics, {} resets",
                report.corrections.blended, report.corrections.outliers, report.corrections.panics, report.corrections.resets
            );
            write_report(&run, "attitude", &report, &report.rows)
        }
        Command::Pose(run) => {
            let scenario = load_scenario(&run)?;
            let report = run_pose(&scenario)?;
            println!("Pose ({}):", report.scenario);
            println!("  Samples:     {}", report.rows.len());
            println!("  Final error: {:.4} m", report.final_position_error_m);
            println!("  Max error:   {:.4} m", report.max_position_error_m);
            write_report(&run, "pose", &report, &report.rows)
        }
        Command::GravityNorm(run) => {
            let scenario = load_scenario(&run)?;
            let report = run_gravity_norm(&scenario)?;
            println!("Gravity norm ({}):", report.scenario);
            println!("  Completed:   {}", report.completed);
            println!("  Samples:     {}", report.num_measurements);
            println!("  Average:     {:.6} m/s^2", report.average_gravity_norm);
            println!("  Expected:    {:.6} m/s^2", report.expected_gravity_norm);
            println!("  Std dev:     {:.6} m/s^2", report.gravity_norm_standard_deviation);
            println!("  Root PSD:    {:.6e}", report.gravity_root_psd);
            write_report(&run, "gravity_norm", &report, std::slice::from_ref(&report))
        }
        Command::Scenario => {
            println!("{}", Scenario::default().to_json()?);
            Ok(())
        }
    }
}

fn load_scenario(run: &RunArgs) -> Result<Scenario> {
    let mut scenario = match &run.scenario {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            Scenario::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => Scenario::default(),
    };
    if let Some(seed) = run.seed {
        scenario.sensors.seed = seed;
    }
    debug!(name = %scenario.name, seed = scenario.sensors.seed, "scenario loaded");
    Ok(scenario)
}

/// Writes `rows` as CSV or the whole `report` as JSON.
fn write_report<R: Serialize, T: Serialize>(run: &RunArgs, name: &str, report: &R, rows: &[T]) -> Result<()> {
    std::fs::create_dir_all(&run.output_dir)?;
    let path = match run.format {
        OutputFormat::Csv => write_csv(&run.output_dir.join(format!("{name}.csv")), rows)?,
        OutputFormat::Json => {
            let path = run.output_dir.join(format!("{name}.json"));
            std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
            path
        }
    };
    println!("Data written to {:?}", path);
    Ok(())
}

fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<PathBuf> {
    let mut wtr = csv::Writer::from_path(path)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(path.to_path_buf())
}
