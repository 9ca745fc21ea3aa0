//! Command handlers for the `scan` and `config` subcommands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::carve::{CarveProgress, CarveReport, Carver};
use crate::cli::{ConfigArgs, ScanArgs};
use crate::config::Config;
use crate::h264::ReferenceHeader;
use crate::source::DataSource;

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Ok(Config::load()),
    }
}

/// Run a scan and print the report.
pub fn run_scan(args: &ScanArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let references = args
        .reference
        .iter()
        .map(|path| ReferenceHeader::load(path, &config.h264).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    let source = DataSource::open(&args.image)?;

    let carver = Carver::new(&config).with_references(references);

    let pb = if args.json {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(source.len());
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .context("Invalid progress template")?,
        );
        pb
    };

    let report = carver.scan_with_progress(&source, |progress| match progress {
        CarveProgress::Scanning {
            bytes_scanned,
            total_bytes,
        } => {
            pb.set_length(total_bytes);
            pb.set_position(bytes_scanned);
        }
        CarveProgress::ScanComplete { blocks_found } => pb.set_message(format!("{blocks_found} blocks")),
        CarveProgress::Done => {}
    });
    pb.finish_and_clear();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &CarveReport) {
    let summary = &report.summary;
    println!(
        "{} {} ({})",
        "Scanned".bold(),
        summary.source,
        humansize::format_size(summary.image_size, humansize::BINARY)
    );

    for (i, carved) in report.blocks.iter().enumerate() {
        let b = &carved.block;
        let mut line = format!(
            "{:>5}  {:<5} 0x{:012x}..0x{:012x}  {:>10}  {} headers",
            i + 1,
            b.data_format.name().cyan(),
            b.start_offset,
            b.end_offset,
            humansize::format_size(b.len(), humansize::BINARY),
            b.header_count
        );
        if let Some(reference) = &b.reference_header {
            line.push_str(&format!("  ref={}", reference.name.yellow()));
        }
        if let Some(hash) = &carved.hash {
            line.push_str(&format!("  blake3={}", &hash[..16]));
        }
        println!("{line}");
    }

    println!(
        "\n{} {} blocks, {} covered in {} ms",
        "✓".bright_green(),
        summary.blocks_found,
        humansize::format_size(summary.bytes_covered, humansize::BINARY),
        summary.duration_ms
    );
    for (format, count) in &summary.by_format {
        println!("  {format}: {count}");
    }
    if summary.cancelled {
        println!("{} Scan cancelled; results are partial", "⚠".yellow());
    }
}

/// Handle `config --init|--print|--path`.
pub fn run_config(args: &ConfigArgs) -> Result<()> {
    if args.path {
        println!("{}", Config::default_path().display());
    } else if args.init {
        let path = Config::ensure_exists()?;
        println!("{} Config at {}", "✓".bright_green(), path.display());
    } else if args.print {
        let config = Config::load();
        print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
    }
    Ok(())
}
