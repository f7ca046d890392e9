//! eegscope - EEG epoching sessions over HTTP
//!
//! Subcommands:
//! - `eegscope serve` - Run the HTTP server
//! - `eegscope config` - Print the effective configuration and its sources
//! - `eegscope synth` - Write a synthetic demo dataset

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eegconf::EegscopeConfig;
use eegscope::{serve, synth, telemetry};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "eegscope")]
#[command(about = "Browse, epoch and analyse EEG recordings over HTTP")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Config file replacing ./eegscope.toml
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// HTTP port to bind (overrides bind.http_port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Root of the recorded-data tree (overrides paths.data_root)
        #[arg(long)]
        data_root: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Config file replacing ./eegscope.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write a synthetic dataset (<experiment>/S<nn>/data.bdf + evt.bdf)
    Synth {
        /// Output directory
        #[arg(short, long)]
        out: PathBuf,

        /// Subjects per experiment
        #[arg(short, long, default_value = "2")]
        subjects: usize,

        /// Recording length in seconds
        #[arg(long, default_value = "120")]
        seconds: f64,

        /// Config file supplying the experiment names
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            data_root,
        } => {
            let mut config = EegscopeConfig::load_from(config.as_deref())
                .context("Failed to load configuration")?;
            if let Some(port) = port {
                config.infra.bind.http_port = port;
            }
            if let Some(root) = data_root {
                config.infra.paths.data_root = root;
            }

            telemetry::init(&config.infra.telemetry)?;
            let serve_config = serve::ServeConfig::from_config(&config)?;
            let result = serve::run(serve_config).await;
            telemetry::shutdown();
            result?;
        }

        Commands::Config { config } => {
            telemetry::init_cli();
            let (config, sources) = EegscopeConfig::load_with_sources_from(config.as_deref())
                .context("Failed to load configuration")?;
            println!("{}", config.to_toml());
            println!("# Sources:");
            if sources.files.is_empty() {
                println!("#   (compiled defaults only)");
            }
            for file in &sources.files {
                println!("#   file: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("#   env:  {}", var);
            }
        }

        Commands::Synth {
            out,
            subjects,
            seconds,
            config,
        } => {
            telemetry::init_cli();
            let config = EegscopeConfig::load_from(config.as_deref())
                .context("Failed to load configuration")?;
            let experiments = &config.bootstrap.pipeline.experiments;
            let written = synth::write_dataset(&out, experiments, subjects, seconds)
                .with_context(|| format!("Failed to write dataset to {}", out.display()))?;
            println!("wrote {} recordings under {}", written.len(), out.display());
        }
    }

    Ok(())
}
