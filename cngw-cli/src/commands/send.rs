//! Send command implementation.

use anyhow::{Context, Result, bail};
use cngw::transport::run_status_rx;
use cngw::{
    Distribution, FirmwareVersion, OtaBinary, OtaSender, OtaSignals, SenderConfig, SerialTransport,
    TransportClass,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::{Cli, get_port, use_fancy_output};

/// Send command implementation.
pub(crate) fn cmd_send(
    cli: &Cli,
    file: &PathBuf,
    release: FirmwareVersion,
    peer_version: FirmwareVersion,
    direct_wired: bool,
    always_bundle: bool,
    skip_verify: bool,
) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading distribution: {}",
            style("📦").cyan(),
            file.display()
        );
    }

    // Load and validate the distribution up front.
    let data = std::fs::read(file)
        .with_context(|| format!("Failed to read distribution: {}", file.display()))?;
    let binary = OtaBinary::from_vec(data);
    let dist = Distribution::parse(binary.bytes()?)
        .with_context(|| format!("Failed to parse distribution: {}", file.display()))?;

    if !skip_verify {
        for entry in &dist.packages {
            if !dist.verify_crc32(entry) {
                bail!(
                    "CRC-32 mismatch in {} package (expected {:#010X})",
                    entry.header.kind,
                    entry.header.crc32
                );
            }
        }
        if !cli.quiet {
            eprintln!("{} Payload CRC check passed", style("✓").green());
        }
    }

    if !cli.quiet {
        eprintln!(
            "{} Distribution {} with {} package(s), {} bytes",
            style("ℹ").blue(),
            dist.file_header.serial_str(),
            dist.packages.len(),
            dist.total_payload()
        );
        for entry in &dist.packages {
            eprintln!(
                "    {} {} v{} ({} bytes)",
                style("•").dim(),
                entry.header.kind,
                entry.header.version,
                entry.header.size
            );
        }
    }

    // Open the link.
    let port = get_port(cli)?;
    if !cli.quiet {
        eprintln!(
            "{} Using port {} at {} baud",
            style("🔌").cyan(),
            port,
            cli.baud
        );
    }
    let mut transport = SerialTransport::open(&port, cli.baud)
        .with_context(|| format!("Failed to open port {port}"))?;

    // Status RX loop on its own thread, feeding the shared signals.
    let signals = Arc::new(OtaSignals::new());
    let stop = Arc::new(AtomicBool::new(false));
    let rx_handle = {
        let reader = transport.try_clone_reader()?;
        let signals = Arc::clone(&signals);
        let stop = Arc::clone(&stop);
        thread::spawn(move || run_status_rx(reader, &signals, &stop))
    };

    // Progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(dist.total_payload());
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let config = SenderConfig {
        release,
        peer_version,
        transport_class: if direct_wired {
            TransportClass::DirectWired
        } else {
            TransportClass::Mesh
        },
        always_bundle,
        ..SenderConfig::default()
    };

    let mut sender = OtaSender::new(&mut transport, Arc::clone(&signals), config);
    let result = sender.send_with_progress(&dist, |sent| pb.set_position(sent));

    stop.store(true, Ordering::SeqCst);
    let _ = rx_handle.join();

    result.context("OTA transfer failed")?;
    pb.finish_with_message("done");

    if !cli.quiet {
        eprintln!(
            "\n{} Mainboard accepted the firmware",
            style("🎉").green().bold()
        );
    }

    Ok(())
}
