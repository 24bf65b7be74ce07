//! CLI entry point for field-master.
//!
//! Provides a headless command-line interface to the analyzer:
//!
//! - `idn` — print the instrument identification string
//! - `setup` — apply the `[sweep.setup]` parameters from the configuration
//! - `status` — read the current instrument setup back
//! - `capture` — run one sweep and write the traces as CSV
//!
//! # Usage
//!
//! ```bash
//! field-master --mock capture
//! field-master --config lab setup
//! field-master capture --output sweep.csv
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use field_master::config::Settings;
use field_master::instrument::FieldMasterPro;
use field_master::sweep::{run_single_sweep, SweepCapture};
use field_master::{config, logging};

#[derive(Parser)]
#[command(name = "field-master")]
#[command(about = "Remote control and trace capture for the Anritsu Field Master Pro", long_about = None)]
struct Cli {
    /// Configuration name under config/ (without extension)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Use the built-in simulated instrument instead of hardware
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the instrument identification string
    Idn,

    /// Apply the [sweep.setup] parameters from the configuration
    Setup,

    /// Read the current instrument setup back
    Status,

    /// Run one sweep and write the traces as CSV
    Capture {
        /// Write the CSV here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::new(cli.config.as_deref())?;
    if cli.mock {
        settings.instrument.mock = true;
    }
    settings.validate()?;

    logging::init(&settings.log_level)?;

    let fmp = FieldMasterPro::from_settings(&settings.instrument).await?;

    match cli.command {
        Commands::Idn => {
            println!("{}", fmp.identify().await?);
        }

        Commands::Setup => {
            let Some(setup) = settings.sweep.setup.clone() else {
                bail!("the configuration has no [sweep.setup] section");
            };
            config::validate_setup(&setup)?;
            fmp.apply_setup(&setup).await?;
            tracing::info!("Setup applied: {setup:?}");
        }

        Commands::Status => {
            let setup = fmp.current_setup().await?;
            let points = fmp.display_points().await?;
            println!("start frequency : {} GHz", setup.start_ghz);
            println!("stop frequency  : {} GHz", setup.stop_ghz);
            println!("reference level : {} dBm", setup.ref_level_dbm);
            println!("vertical scale  : {} dB/div", setup.scale_db_per_div);
            println!("resolution bw   : {} Hz", setup.rbw_hz);
            println!("display points  : {points}");
        }

        Commands::Capture { output } => {
            let capture = run_single_sweep(&fmp, &settings.sweep.options()).await?;
            write_capture(&capture, output.as_deref())?;
        }
    }

    Ok(())
}

fn write_capture(capture: &SweepCapture, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let mut writer = std::io::BufWriter::new(file);
            capture.to_csv(&mut writer)?;
            writer.flush()?;
            tracing::info!("Capture written to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            capture.to_csv(&mut stdout.lock())?;
        }
    }
    Ok(())
}
