//! cngw CLI - Command-line tool for pushing OTA firmware to CENCE
//! mainboards.
//!
//! ## Features
//!
//! - Send firmware distribution binaries over a serial link
//! - Inspect distribution binaries without sending
//! - List available serial ports
//! - Environment variable support

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use cngw::FirmwareVersion;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;

mod commands;

use commands::{cmd_info, cmd_send};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// cngw - A tool for delivering OTA firmware to CENCE mainboards.
///
/// Environment variables:
///   CNGW_PORT   - Default serial port
///   CNGW_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "cngw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (auto-detected if exactly one is present).
    #[arg(short, long, global = true, env = "CNGW_PORT")]
    port: Option<String>,

    /// Baud rate of the mainboard link.
    #[arg(
        short,
        long,
        global = true,
        default_value = "115200",
        env = "CNGW_BAUD"
    )]
    baud: u32,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Send a firmware distribution binary to the mainboard.
    Send {
        /// Path to the distribution binary.
        file: PathBuf,

        /// Release version announced to the mainboard (e.g. 3.1).
        #[arg(long, value_parser = parse_version)]
        release: FirmwareVersion,

        /// Firmware version the mainboard currently runs (e.g. 2.4).
        /// Controls frame bundling toward slow peers.
        #[arg(long, value_parser = parse_version, default_value = "0.0")]
        peer_version: FirmwareVersion,

        /// The mainboard is reached over a direct wired link
        /// (disables frame bundling).
        #[arg(long)]
        direct_wired: bool,

        /// Force frame bundling regardless of the peer version.
        #[arg(long)]
        always_bundle: bool,

        /// Skip CRC-32 verification of the payloads before sending.
        #[arg(long)]
        skip_verify: bool,
    },

    /// Show information about a distribution binary.
    Info {
        /// Path to the distribution binary.
        file: PathBuf,
    },

    /// List available serial ports.
    ListPorts,
}

/// Parse a `major.minor` firmware version argument.
fn parse_version(s: &str) -> Result<FirmwareVersion, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn main() -> Result<()> {
    // NO_COLOR and TTY detection
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "cngw v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match &cli.command {
        Commands::Send {
            file,
            release,
            peer_version,
            direct_wired,
            always_bundle,
            skip_verify,
        } => {
            cmd_send(
                &cli,
                file,
                *release,
                *peer_version,
                *direct_wired,
                *always_bundle,
                *skip_verify,
            )?;
        },
        Commands::Info { file } => {
            cmd_info(file)?;
        },
        Commands::ListPorts => {
            cmd_list_ports()?;
        },
    }

    Ok(())
}

/// Serial port from CLI args, or the only available one.
fn get_port(cli: &Cli) -> Result<String> {
    if let Some(ref port) = cli.port {
        return Ok(port.clone());
    }

    let ports = cngw::transport::serial::list_ports().context("Failed to enumerate ports")?;
    match ports.as_slice() {
        [only] => {
            debug!("auto-detected {}", only.port_name);
            Ok(only.port_name.clone())
        },
        [] => bail!("No serial ports found; specify one with --port or CNGW_PORT"),
        _ => bail!(
            "Multiple serial ports found ({}); specify one with --port or CNGW_PORT",
            ports
                .iter()
                .map(|p| p.port_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// List ports command implementation.
fn cmd_list_ports() -> Result<()> {
    let ports = cngw::transport::serial::list_ports().context("Failed to enumerate ports")?;

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        match &port.port_type {
            serialport::SerialPortType::UsbPort(info) => {
                let product = info.product.as_deref().unwrap_or("");
                eprintln!(
                    "  {} {} ({:04X}:{:04X}){}",
                    style("•").green(),
                    style(&port.port_name).cyan(),
                    info.vid,
                    info.pid,
                    if product.is_empty() {
                        String::new()
                    } else {
                        format!(" - {}", style(product).dim())
                    }
                );
            },
            _ => eprintln!(
                "  {} {}",
                style("•").green(),
                style(&port.port_name).cyan()
            ),
        }
    }

    Ok(())
}
