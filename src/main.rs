//! CLI entry point for pl_daq
//!
//! # Usage
//!
//! Run the experiment described by the two configuration files:
//! ```bash
//! pl_daq run --config config/config_user.toml --setup config/config_setup.toml
//! ```
//!
//! Try a mode without hardware:
//! ```bash
//! pl_daq run --simulate --experiment pre_tuning
//! ```
//!
//! Rebuild the degradation summary from saved spectra:
//! ```bash
//! pl_daq summarize output/csv
//! ```

use clap::{Parser, Subcommand};
use figment::providers::Serialized;
use pl_daq::config::{ExperimentConfig, SetupConfig};
use pl_daq::data::summary::summarize_directory;
use pl_daq::data::storage::SPECTRUM_PREFIX;
use pl_daq::data::{NullPlotter, PlotSink, PngPlotter, SpectrumStore};
use pl_daq::error::{AppResult, DaqError};
use pl_daq::experiment::{Orchestrator, RunReport, StdinConsole, StopSignal};
use pl_daq::hardware::Instruments;
use pl_daq::logging::{self, LoggingConfig, OutputFormat};
use pl_daq::wheel::SlotMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pl_daq")]
#[command(about = "Photoluminescence acquisition: spectrometer, filter wheel and power meter", long_about = None)]
struct Cli {
    /// Log line format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one experiment
    Run {
        /// Experiment configuration file
        #[arg(long, default_value = "config/config_user.toml")]
        config: PathBuf,

        /// Instrument setup file
        #[arg(long, default_value = "config/config_setup.toml")]
        setup: PathBuf,

        /// Override `experiment_type` from the configuration file
        #[arg(long, value_parser = ["steady_state", "degradation", "pre_tuning"])]
        experiment: Option<String>,

        /// Simulate every instrument (the setup file becomes optional)
        #[arg(long)]
        simulate: bool,

        /// Skip PNG charts
        #[arg(long)]
        no_plots: bool,
    },

    /// Rebuild the summary charts from a directory of spectrum CSV files
    Summarize {
        /// Directory holding the spectrum files
        csv_dir: PathBuf,

        /// File-name prefix of the series
        #[arg(long, default_value = SPECTRUM_PREFIX)]
        prefix: String,

        /// Spectra drawn in the overlay chart
        #[arg(long, default_value = "10")]
        overlay_count: usize,

        /// Output directory for the charts (defaults to `<csv_dir>/../plots`)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Write template configuration files
    InitConfig {
        /// Target directory
        #[arg(long, default_value = "config")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: could not start the async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    let outcome = runtime.block_on(dispatch(cli));
    // A pending stdin read must not keep the process alive after the run ends.
    runtime.shutdown_timeout(Duration::from_millis(200));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn dispatch(cli: Cli) -> AppResult<()> {
    match cli.command {
        Commands::Run {
            config,
            setup,
            experiment,
            simulate,
            no_plots,
        } => {
            run_experiment(
                &config,
                &setup,
                experiment,
                simulate,
                no_plots,
                cli.log_format,
            )
            .await
        }
        Commands::Summarize {
            csv_dir,
            prefix,
            overlay_count,
            out,
        } => {
            logging::init(LoggingConfig::default().with_format(cli.log_format))?;
            summarize(&csv_dir, &prefix, overlay_count, out)
        }
        Commands::InitConfig { dir } => init_config(&dir),
    }
}

async fn run_experiment(
    config_path: &Path,
    setup_path: &Path,
    experiment: Option<String>,
    simulate: bool,
    no_plots: bool,
    log_format: OutputFormat,
) -> AppResult<()> {
    let mut figment = ExperimentConfig::figment(config_path)?;
    if let Some(kind) = experiment {
        figment = figment.merge(Serialized::default("experiment_type", kind));
    }
    let config = ExperimentConfig::from_figment(figment)?;

    let setup = if simulate && !setup_path.is_file() {
        SetupConfig::simulated()
    } else {
        let mut setup = SetupConfig::load(setup_path)?;
        if simulate {
            setup.force_simulation();
        }
        setup
    };

    logging::init(LoggingConfig::from_level_str(&config.log_level)?.with_format(log_format))?;
    tracing::info!(
        experiment = %config.experiment_type,
        config = %config_path.display(),
        simulate,
        "pl_daq starting"
    );

    let slots = SlotMap::new(setup.flywheel.slot_mapping.clone(), setup.flywheel.slot_count)?;
    // Output directories must exist before any instrument session is opened.
    SpectrumStore::create(&config.save_directory)?;
    let instruments = Instruments::open(&setup).await?;

    let stop = StopSignal::new();
    let ctrl_c = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl-C received; stopping");
                stop.trigger();
            }
        })
    };

    let plotter: Arc<dyn PlotSink> = if no_plots {
        Arc::new(NullPlotter)
    } else {
        Arc::new(PngPlotter)
    };

    let mut orchestrator = match Orchestrator::new(config, instruments, slots, Arc::new(StdinConsole::new())) {
        Ok(orchestrator) => orchestrator.with_plotter(plotter).with_stop_signal(stop),
        Err(err) => {
            ctrl_c.abort();
            return Err(err);
        }
    };

    let outcome = orchestrator.run().await;
    ctrl_c.abort();

    let report = outcome?;
    print_report(&report, orchestrator.store().csv_dir());
    Ok(())
}

fn print_report(report: &RunReport, csv_dir: &Path) {
    println!();
    println!("{} run finished", report.experiment);
    if let Some(calibration) = &report.calibration {
        println!(
            "  mirror found at tracked slot {} ({:.3e} W); renumbered as slot 1",
            calibration.mirror_slot, calibration.mirror_power_w
        );
    }
    if report.results.is_empty() {
        println!("  live frames shown: {}", report.frames_displayed);
    } else {
        println!("  spectra saved: {} in {}", report.results.len(), csv_dir.display());
        for result in &report.results {
            println!(
                "    {}  peak {:.2} nm  intensity {:.3}",
                result
                    .csv_path
                    .file_name()
                    .map(|name| name.to_string_lossy())
                    .unwrap_or_default(),
                result.peak.wavelength,
                result.peak.intensity
            );
        }
    }
    if report.background_captures > 0 {
        println!("  background frames: {}", report.background_captures);
    }
    for warning in &report.warnings {
        println!("  warning: {} not produced: {}", warning.artifact, warning.message);
    }
}

fn summarize(
    csv_dir: &Path,
    prefix: &str,
    overlay_count: usize,
    out: Option<PathBuf>,
) -> AppResult<()> {
    let plot_dir = out.unwrap_or_else(|| {
        csv_dir
            .parent()
            .map(|parent| parent.join("plots"))
            .unwrap_or_else(|| PathBuf::from("plots"))
    });
    let report = summarize_directory(csv_dir, prefix, &plot_dir, overlay_count, &PngPlotter)?;
    println!(
        "summary of {} spectra written to {}",
        report.spectra,
        plot_dir.display()
    );
    for warning in &report.warnings {
        println!("  warning: {} not produced: {}", warning.artifact, warning.message);
    }
    Ok(())
}

fn init_config(dir: &Path) -> AppResult<()> {
    std::fs::create_dir_all(dir)?;
    let files = [
        ("config_user.toml", toml_text(&ExperimentConfig::template())?),
        ("config_setup.toml", toml_text(&SetupConfig::simulated())?),
    ];
    for (name, text) in files {
        let path = dir.join(name);
        if path.exists() {
            println!("{} exists; left unchanged", path.display());
            continue;
        }
        std::fs::write(&path, text)?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn toml_text<T: serde::Serialize>(value: &T) -> AppResult<String> {
    toml::to_string_pretty(value)
        .map_err(|err| DaqError::Configuration(format!("could not render template: {err}")))
}
