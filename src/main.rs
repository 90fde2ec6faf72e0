//! trapfit CLI
//!
//! - `trapfit generate` - write a synthetic reference curve
//! - `trapfit calibrate` - fit trap parameters to a reference curve
//! - `trapfit default-config` - print the default JSON configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use trapfit::{Calibration, CalibrationConfig, ReferenceDataset, Result};

#[derive(Parser)]
#[command(name = "trapfit")]
#[command(author, version, about = "Calibrate trap parameters against desorption curves")]
struct Cli {
    /// Log every evaluation (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate at the configured true parameters and write the reference CSV
    Generate {
        /// Output CSV (overrides reference.path)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit the configured parameters to a reference CSV
    Calibrate {
        /// Reference CSV (overrides reference.path)
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Generate the reference in memory instead of reading it
        #[arg(long)]
        synthetic: bool,

        /// Write every evaluation to this CSV
        #[arg(short, long)]
        trajectory: Option<PathBuf>,

        /// Write the result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    DefaultConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            CalibrationConfig::from_file(path)?
        }
        None => CalibrationConfig::default(),
    };

    match cli.command {
        Commands::Generate { output } => {
            let path = output.unwrap_or_else(|| config.reference.path.clone());
            let calibration = Calibration::new(config)?;
            let reference = calibration.generate_reference()?;
            reference.save(&path)?;
            info!(samples = reference.len(), "Reference written to {}", path.display());
        }
        Commands::Calibrate {
            reference,
            synthetic,
            trajectory,
            output,
        } => {
            let reference_path = reference.unwrap_or_else(|| config.reference.path.clone());
            let calibration = Calibration::new(config)?;
            let reference = if synthetic {
                calibration.generate_reference()?
            } else {
                info!("Reading reference from {}", reference_path.display());
                ReferenceDataset::load(&reference_path)?
            };

            let result = calibration.run(reference)?;
            for (name, value) in result.param_names.iter().zip(&result.params) {
                println!("{:<20} {:.6e}", name, value);
            }
            println!("{:<20} {:.6e}", "loss", result.loss);
            println!("{:<20} {}", "status", result.termination.describe());
            println!("{:<20} {}", "evaluations", result.evaluations);

            if let Some(path) = trajectory {
                result.trajectory.save_csv(&path)?;
                info!("Trajectory written to {}", path.display());
            }
            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
                info!("Result written to {}", path.display());
            }
        }
        Commands::DefaultConfig => {
            println!("{}", CalibrationConfig::default().to_json()?);
        }
    }

    Ok(())
}
