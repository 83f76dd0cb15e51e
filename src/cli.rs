use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tabled::{Table, Tabled};

use lanwarden::audit::AuditLog;
use lanwarden::config::Config;
use lanwarden::models::{Device, DeviceFilter, Identity};
use lanwarden::{Daemon, Lanwarden};

#[derive(Parser)]
#[command(name = "lanwarden")]
#[command(author, version, about = "LAN host discovery and whitelist auditing")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the periodic scan daemon
    Start,

    /// Run one scan cycle and show the registry
    Scan {
        /// Filter (all, online, offline, unauthorized)
        #[arg(short, long, default_value = "all")]
        filter: String,

        /// Output format (table, json, simple)
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Show the most recent cycle from the audit log
    Log {
        /// Show every row, not just the latest cycle
        #[arg(short, long)]
        all: bool,
    },

    /// Show recorded signal history for a device identity
    History {
        /// Device identity (MAC, or ip:<address> for synthetic)
        identity: String,

        /// Number of samples to show
        #[arg(short, long, default_value = "20")]
        count: usize,
    },

    /// Configuration handling
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Destination path
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Device")]
    name: String,
    #[tabled(rename = "Identity")]
    identity: String,
    #[tabled(rename = "IP")]
    addr: String,
    #[tabled(rename = "Signal")]
    signal: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Conf")]
    confidence: String,
    #[tabled(rename = "Scans")]
    scans: u64,
    #[tabled(rename = "Auth")]
    authorized: String,
}

impl From<&Device> for DeviceRow {
    fn from(device: &Device) -> Self {
        let status = if device.online {
            "Online".green().to_string()
        } else {
            "Offline".red().to_string()
        };
        let authorized = if device.authorized {
            "yes".to_string()
        } else {
            "NO".red().bold().to_string()
        };
        Self {
            name: device.display_name.clone(),
            identity: device.identity.to_string(),
            addr: device.addr.to_string(),
            signal: format!("{}", device.signal_score),
            status,
            confidence: format!("{:.2}", device.confidence),
            scans: device.scan_count,
            authorized,
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p),
        None => Config::load_or_default(),
    }
}

fn print_devices(devices: &[Device], format: &str) -> Result<()> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(devices)?);
        }
        "simple" => {
            for device in devices {
                println!(
                    "{} {} {} {}",
                    device.identity,
                    device.addr,
                    device.signal_score,
                    device.status_str()
                );
            }
        }
        _ => {
            if devices.is_empty() {
                println!("No devices");
            } else {
                let rows: Vec<DeviceRow> = devices.iter().map(DeviceRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
    }
    Ok(())
}

pub async fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start => {
            let config = load_config(&cli.config)?;
            let engine = Lanwarden::new(config)?;
            let mut daemon = Daemon::new(engine);
            daemon.run().await?;
        }

        Commands::Scan { filter, format } => {
            let filter: DeviceFilter = filter
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let config = load_config(&cli.config)?;
            let engine = Lanwarden::new(config)?;

            engine.run_cycle().await?;

            let devices = engine.snapshot(filter).await;
            print_devices(&devices, &format)?;

            let alerts = engine.alerts();
            for alert in &alerts {
                println!(
                    "{} unauthorized device {} at {}",
                    "ALERT:".red().bold(),
                    alert.identity,
                    alert.addr
                );
            }
        }

        Commands::Log { all } => {
            let config = load_config(&cli.config)?;
            let log = AuditLog::new(config.log_path());
            let records = if all {
                log.read_all().context("Failed to read audit log")?
            } else {
                log.latest_cycle().context("Failed to read audit log")?
            };

            if records.is_empty() {
                println!("Audit log is empty: {}", log.path().display());
            } else {
                for record in records {
                    println!(
                        "{} {} {} {} {} {} {:.2} {}",
                        record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        record.display_name,
                        record.identity,
                        record.addr,
                        record.signal,
                        record.status,
                        record.confidence,
                        record.scan_count
                    );
                }
            }
        }

        Commands::History { identity, count } => {
            let config = load_config(&cli.config)?;
            let log = AuditLog::new(config.log_path());

            // Normalize through the identity type so "AA:BB:.." matches
            let identity = Identity::from(identity.to_ascii_lowercase());
            let samples = log
                .signal_history(&identity.to_string(), count)
                .context("Failed to read audit log")?;

            if samples.is_empty() {
                println!("No recorded samples for {}", identity);
            } else {
                let rendered: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
                println!("{}: {}", identity, rendered.join(" "));
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = load_config(&cli.config)?;
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Init { path } => {
                let config = Config::default();
                config.save(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
        },
    }

    Ok(())
}
