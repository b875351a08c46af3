use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use leaf_spectra::check::run_self_check;
use leaf_spectra::config::Config;
use leaf_spectra::data::envi::EnviLoader;
use leaf_spectra::data::loader::{scan_inventory, write_inventory};
use leaf_spectra::export::run_export;
use leaf_spectra::norm::mode::RequestedMode;
use leaf_spectra::trace::append_trace;

/// Hyperspectral spectra export and self-check
#[derive(Parser, Debug)]
#[command(name = "leaf-spectra")]
#[command(about = "Normalized mean spectra from VISNIR/SWIR hyperspectral cubes")]
#[command(version)]
struct Args {
    /// TOML config file; flags below override it
    #[arg(long, global = true, env = "LEAF_CONFIG")]
    config: Option<PathBuf>,

    /// AUTO | CLOTH | BASELINE | ZSCORE
    #[arg(long, global = true, env = "LEAF_NORM_MODE")]
    norm_mode: Option<RequestedMode>,

    /// Timepoint treated as the healthy baseline
    #[arg(long, global = true, env = "LEAF_BASELINE_TIMEPOINT")]
    baseline_timepoint: Option<String>,

    /// Raw cube directory
    #[arg(long, global = true, env = "LEAF_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Processed output directory
    #[arg(long, global = true, env = "LEAF_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Trace and run log directory
    #[arg(long, global = true, env = "LEAF_REPORTS_DIR")]
    reports_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the data directory and write the metadata table
    Inventory,
    /// Export one normalized spectrum table per leaf sample
    Export,
    /// Validate the metadata table and every spectrum table
    SelfCheck {
        /// Also print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };
        if let Some(mode) = self.norm_mode {
            config.norm_mode = mode;
        }
        if let Some(tp) = &self.baseline_timepoint {
            config.baseline_timepoint = tp.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.out_dir {
            config.out_dir = dir.clone();
        }
        if let Some(dir) = &self.reports_dir {
            config.reports_dir = dir.clone();
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    let config = args.config()?;
    log::debug!("configuration: {config:?}");

    match &args.command {
        Command::Inventory => {
            let inventory = scan_inventory(&config.data_dir)?;
            config.ensure_dirs()?;
            let out = config.metadata_path();
            write_inventory(&inventory, &out)?;
            append_trace(
                &config.trace_log_path(),
                "inventory",
                &[
                    ("records", inventory.len().to_string()),
                    ("src", config.data_dir.display().to_string()),
                ],
            )?;
            log::info!("Generated {} with {} records", out.display(), inventory.len());
            println!("Successfully generated {}", out.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Export => {
            run_export(&config, &EnviLoader)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::SelfCheck { json } => {
            let report = run_self_check(&config);
            println!("{}", report.render());
            if *json {
                let text = serde_json::to_string_pretty(&report).context("serializing report")?;
                println!("{text}");
            }
            Ok(if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(report.exit_code() as u8)
            })
        }
    }
}
