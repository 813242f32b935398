//! Info command implementation.

use anyhow::{Context, Result};
use cngw::Distribution;
use console::style;
use std::path::PathBuf;

/// Parse a distribution binary and print its layout.
pub(crate) fn cmd_info(file: &PathBuf) -> Result<()> {
    eprintln!(
        "{} Loading distribution: {}",
        style("📦").cyan(),
        file.display()
    );

    let buf = std::fs::read(file)
        .with_context(|| format!("Failed to read distribution: {}", file.display()))?;
    let dist = Distribution::parse(&buf)
        .with_context(|| format!("Failed to parse distribution: {}", file.display()))?;

    eprintln!("\n{}", style("Distribution Information").bold().underlined());
    eprintln!("  Serial:     {}", dist.file_header.serial_str());
    eprintln!("  Binaries:   {}", dist.file_header.binary_count);
    eprintln!("  Total size: {} bytes ({} payload)", buf.len(), dist.total_payload());

    eprintln!("\n{}", style("Packages").bold().underlined());
    for (i, entry) in dist.packages.iter().enumerate() {
        let crc_status = if dist.verify_crc32(entry) {
            style("valid").green()
        } else {
            style("MISMATCH").red().bold()
        };

        eprintln!("\n  [{:2}] {}", i, style(entry.header.kind).cyan().bold());
        eprintln!("       Version: {}", entry.header.version);
        eprintln!("       Size:    {} bytes", entry.header.size);
        eprintln!(
            "       CRC-32:  {:#010X} ({crc_status})",
            entry.header.crc32
        );
    }

    Ok(())
}
