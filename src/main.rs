//! CLI entry point for battery-daq
//!
//! Runs the firmware core on the host against simulated peripherals, speaking the
//! command protocol over a serial port or stdin/stdout.
//!
//! # Usage
//!
//! Serial link:
//! ```bash
//! battery-daq run --port /dev/ttyUSB0
//! ```
//!
//! Protocol on stdio (logs go to stderr):
//! ```bash
//! printf 'aE\r\n' | battery-daq run --stdio
//! ```
//!
//! Effective settings:
//! ```bash
//! battery-daq settings --config config/battery-daq.toml
//! ```

use anyhow::{Context, Result};
use battery_daq::config::{Settings, DEFAULT_SETTINGS_PATH};
use battery_daq::{logging, runtime};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "battery-daq")]
#[command(about = "Battery test bench data acquisition", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the acquisition firmware until interrupted
    Run {
        /// Serial device, overrides `[link] port`
        #[arg(long)]
        port: Option<String>,

        /// Speak the protocol on stdin/stdout
        #[arg(long)]
        stdio: bool,

        /// Log level, overrides `[application] log_level`
        #[arg(long)]
        log_level: Option<String>,
    },

    /// Print the effective settings as TOML
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            port,
            stdio,
            log_level,
        } => {
            if let Some(port) = port {
                settings.link.port = Some(port);
            }
            if stdio {
                settings.link.stdio = true;
            }
            if let Some(level) = log_level {
                settings.application.log_level = level;
            }
            settings
                .validate()
                .map_err(anyhow::Error::msg)
                .context("invalid settings")?;
            run(settings).await
        }
        Commands::Settings => {
            print!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    let log_config = logging::LoggingConfig::from_settings(&settings)
        .map_err(anyhow::Error::msg)?
        .with_ansi(std::io::stderr().is_terminal());
    logging::init(log_config).map_err(anyhow::Error::msg)?;
    info!(name = %settings.application.name, "starting");

    let (peripherals, _adc) = runtime::host_peripherals(&settings)?;
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    if settings.link.stdio || settings.link.port.is_none() {
        info!("protocol on stdio");
        runtime::run(
            &settings,
            peripherals,
            tokio::io::stdin(),
            tokio::io::stdout(),
            shutdown,
        )
        .await?;
    } else {
        run_serial(&settings, peripherals, shutdown).await?;
    }

    info!("stopped");
    Ok(())
}

#[cfg(feature = "serial")]
async fn run_serial<F>(
    settings: &Settings,
    peripherals: battery_daq::Peripherals,
    shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    let port = runtime::open_serial(settings)?;
    info!(
        port = settings.link.port.as_deref().unwrap_or_default(),
        baud = settings.link.baud_rate,
        "serial link open"
    );
    let (reader, writer) = tokio::io::split(port);
    runtime::run(settings, peripherals, reader, writer, shutdown).await?;
    Ok(())
}

#[cfg(not(feature = "serial"))]
async fn run_serial<F>(
    _settings: &Settings,
    _peripherals: battery_daq::Peripherals,
    _shutdown: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    anyhow::bail!("built without serial support; use --stdio")
}
