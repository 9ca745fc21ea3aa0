//! Stream Drill - Resynchronizing H.264 and ASF carver
//!
//! Scans raw disk images for fragmented video streams and reports the byte
//! ranges they occupy, read-only.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stream_drill::cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for reports
    let directive = if cli.verbose {
        "stream_drill=debug"
    } else {
        "stream_drill=info"
    };
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);
    let json_layer = cli
        .log_json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!cli.log_json).then(|| {
        fmt::layer()
            .with_target(false)
            .compact()
            .with_writer(std::io::stderr)
    });
    tracing_subscriber::registry()
        .with(json_layer)
        .with(text_layer)
        .with(filter)
        .init();

    match cli.command {
        Commands::Scan(args) => commands::run_scan(&args),
        Commands::Config(args) => commands::run_config(&args),
    }
}
