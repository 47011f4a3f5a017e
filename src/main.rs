//! Command line host for the PREVAC drivers.
//!
//! ```text
//! prevac-logger --config config/prevac.toml run --samples 10
//! prevac-logger --driver tm1x detect-logic-group
//! ```
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use prevac_tm::adapters::SerialAdapter;
use prevac_tm::config::DriverConfig;
use prevac_tm::core::{Device, GuiParameters};
use prevac_tm::instrument::{Tm1x, Tm1xSettings, Tmc13, Tmc13Shutter};
use serde_json::json;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(author, version, about = "Log PREVAC thickness monitor readings", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "config/prevac.toml")]
    config: PathBuf,

    /// Driver to use; defaults to the first configured section
    #[arg(short, long, value_enum)]
    driver: Option<DriverKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DriverKind {
    Tm1x,
    Tmc13,
    Shutter,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the full lifecycle and print samples as JSON lines
    Run {
        #[arg(short = 'n', long, default_value_t = 10)]
        samples: usize,
        /// Pause between samples
        #[arg(short, long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Zero the thickness reading
    ResetThickness,
    /// Scan all logic groups for an answering TM1x
    DetectLogicGroup,
    /// Print device identification and status
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DriverConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let kind = match cli.driver {
        Some(kind) => kind,
        None if config.tm1x.is_some() => DriverKind::Tm1x,
        None if config.tmc13.is_some() => DriverKind::Tmc13,
        None => DriverKind::Shutter,
    };

    let mut adapter = SerialAdapter::from_config(&config.port);
    adapter
        .connect()
        .with_context(|| format!("Failed to open {}", config.port.path))?;
    info!("{} on {}", config.application.name, adapter.port_name());

    match kind {
        DriverKind::Tm1x => {
            let section = config.tm1x.as_ref().context("No [tm1x] section configured")?;
            let settings = Tm1xSettings::from_config(section)?;
            let mut driver = Tm1x::new(adapter, settings);
            match cli.command {
                Commands::DetectLogicGroup => match driver.detect_logic_group()? {
                    Some(group) => println!("{}", json!({ "logic_group": group })),
                    None => bail!("No TM1x answered on logic groups 1-254"),
                },
                Commands::Info => {
                    let product_number = driver.get_product_number()?;
                    let serial_number = driver.get_serial_number()?;
                    let reading = driver.get_frequency()?;
                    println!(
                        "{}",
                        json!({
                            "product_number": product_number,
                            "serial_number": serial_number,
                            "frequency": reading.frequency,
                            "model": reading.model,
                        })
                    );
                }
                command => run_device(&mut driver, &section.gui_parameters(), command)?,
            }
        }
        DriverKind::Tmc13 => {
            let section = config.tmc13.as_ref().context("No [tmc13] section configured")?;
            let mut driver = Tmc13::new(adapter).with_host_id(&section.host_id);
            match cli.command {
                Commands::Info => {
                    driver.apply_gui_parameters(&section.gui_parameters())?;
                    driver.connect()?;
                    let link = driver.link_mut();
                    let report = json!({
                        "product_number": link.product_number()?,
                        "serial_number": link.serial_number()?,
                        "version": link.device_version()?,
                        "master_status": link.master_status()?.0,
                        "thickness_unit": link.thickness_unit()?,
                        "rate_unit": link.rate_unit()?,
                        "error": link.error_status(0)?.map(|status| status.message),
                        "warning": link.warning_status(0)?.map(|status| status.message),
                    });
                    driver.disconnect()?;
                    println!("{}", report);
                }
                Commands::DetectLogicGroup => bail!("Logic groups only exist on TM1x devices"),
                command => run_device(&mut driver, &section.gui_parameters(), command)?,
            }
        }
        DriverKind::Shutter => {
            let section = config.shutter.as_ref().context("No [shutter] section configured")?;
            let mut driver = Tmc13Shutter::new(adapter).with_host_id(&section.host_id);
            match cli.command {
                command @ Commands::Run { .. } => {
                    run_device(&mut driver, &section.gui_parameters(), command)?
                }
                _ => bail!("The shutter driver only supports 'run'"),
            }
        }
    }

    Ok(())
}

/// Drive `device` through the host lifecycle for `command`.
fn run_device<D: Device>(device: &mut D, parameters: &GuiParameters, command: Commands) -> Result<()> {
    device.apply_gui_parameters(parameters)?;
    device.connect().context("Connect failed")?;

    let outcome = match command {
        Commands::Run {
            samples,
            interval_ms,
        } => sample_loop(device, samples, Duration::from_millis(interval_ms)),
        Commands::ResetThickness => device
            .initialize()
            .and_then(|()| device.run_action("reset_thickness"))
            .map(|()| info!("Thickness reset on {}", device.id()))
            .context("Thickness reset failed"),
        _ => Ok(()),
    };

    let closed = device.disconnect();
    outcome?;
    closed?;
    Ok(())
}

fn sample_loop<D: Device>(device: &mut D, samples: usize, interval: Duration) -> Result<()> {
    device.initialize().context("Initialize failed")?;
    device.configure().context("Configure failed")?;

    let variables = device.variables();
    for index in 0..samples {
        if index > 0 {
            thread::sleep(interval);
        }
        let sample = device.call()?;
        let values: serde_json::Map<String, serde_json::Value> = variables
            .iter()
            .zip(&sample.values)
            .map(|(variable, value)| (format!("{} [{}]", variable.name, variable.unit), json!(value)))
            .collect();
        println!(
            "{}",
            json!({
                "timestamp": sample.timestamp.to_rfc3339(),
                "instrument": sample.instrument_id,
                "values": values,
            })
        );
    }

    device.unconfigure().context("Unconfigure failed")?;
    Ok(())
}
