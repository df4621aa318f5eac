//! Batch job processor for the fixed-time motion pipeline.
//!
//! Translates a JSON job file (a list of millimeter moves) into the stream
//! of stepper command words the core would feed the ISR, without needing a
//! live machine. Prints a JSON summary to stdout and can dump the full
//! command trace for analysis.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use ftm_core::ring::StepperChannel;
use ftm_core::{FtConfig, FtMotionMode, MotionLimits, PlannerSettings, ToolheadSettings};
use ftm_sim::harness::{load_job, SimRig};

/// Shaper selection on the command line.
#[derive(ValueEnum, Debug, Clone, Copy)]
enum ShaperArg {
    Off,
    Zv,
    Zvd,
    Zvdd,
    Zvddd,
    Ei,
    Ei2h,
    Ei3h,
    Mzv,
}

impl From<ShaperArg> for FtMotionMode {
    fn from(arg: ShaperArg) -> Self {
        match arg {
            ShaperArg::Off => FtMotionMode::Enabled,
            ShaperArg::Zv => FtMotionMode::Zv,
            ShaperArg::Zvd => FtMotionMode::Zvd,
            ShaperArg::Zvdd => FtMotionMode::Zvdd,
            ShaperArg::Zvddd => FtMotionMode::Zvddd,
            ShaperArg::Ei => FtMotionMode::Ei,
            ShaperArg::Ei2h => FtMotionMode::TwoHumpEi,
            ShaperArg::Ei3h => FtMotionMode::ThreeHumpEi,
            ShaperArg::Mzv => FtMotionMode::Mzv,
        }
    }
}

/// Run a JSON job file through the fixed-time motion pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the job file: a JSON array of moves.
    #[arg(required = true)]
    job_file: PathBuf,

    /// Input shaper to apply on X and Y.
    #[arg(long, value_enum, default_value_t = ShaperArg::Off)]
    shaper: ShaperArg,

    /// Base shaping frequency for both axes. [Hz]
    #[arg(long, default_value_t = 37.0)]
    freq: f32,

    /// Damping ratio for both axes.
    #[arg(long, default_value_t = 0.1)]
    zeta: f32,

    /// Steps per millimeter as X,Y,Z,E.
    #[arg(long, value_delimiter = ',', num_args = 4, default_values_t = [80.0, 80.0, 400.0, 500.0])]
    steps_per_mm: Vec<f32>,

    /// Linear advance gain; enables linear advance when set.
    #[arg(long)]
    linear_advance: Option<f32>,

    /// Write the full command-word trace to this path as JSON.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    info!(job = %cli.job_file.display(), "loading job");
    let moves = load_job(&cli.job_file)
        .with_context(|| format!("failed to load job file {:?}", cli.job_file))?;

    let mut cfg = FtConfig {
        mode: cli.shaper.into(),
        ..FtConfig::default()
    };
    cfg.set_zeta(0, cli.zeta).map_err(|e| anyhow::anyhow!("{e}"))?;
    cfg.set_zeta(1, cli.zeta).map_err(|e| anyhow::anyhow!("{e}"))?;
    cfg.set_base_freq(0, cli.freq).map_err(|e| anyhow::anyhow!("{e}"))?;
    cfg.set_base_freq(1, cli.freq).map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(k) = cli.linear_advance {
        cfg.set_linear_advance(true, k)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    let steps_per_mm = [
        cli.steps_per_mm[0],
        cli.steps_per_mm[1],
        cli.steps_per_mm[2],
        cli.steps_per_mm[3],
    ];
    let settings = PlannerSettings::new(
        steps_per_mm,
        ToolheadSettings::Fdm(MotionLimits::default()),
    );

    let mut channel = StepperChannel::new();
    let mut rig = SimRig::new(&mut channel, cfg, settings);
    if cli.trace_out.is_some() {
        rig = rig.with_capture();
    }

    let summary = rig.run_job(&moves).context("job did not complete")?;

    if let Some(path) = &cli.trace_out {
        let trace = rig.stepper.trace().unwrap_or(&[]);
        std::fs::write(path, serde_json::to_string(trace)?)
            .with_context(|| format!("failed to write trace to {path:?}"))?;
        info!(words = trace.len(), path = %path.display(), "trace written");
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
