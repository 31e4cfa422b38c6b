//! CLI entry point for nwb-repack.
//!
//! Two commands:
//!
//! - `convert --dataset <name>`: walk the session catalog, merge each
//!   session's source containers and re-encode them, emitting metadata
//!   records and a missing-file report.
//! - `compare <a> <b>`: structurally compare two container files and
//!   print every discrepancy.
//!
//! # Usage
//!
//! ```bash
//! nwb-repack convert --dataset visual-coding-ephys
//! nwb-repack compare a.nwb.json b.nwb.json --ignore-object-ids
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nwb_repack::compare::CompareOptions;
use nwb_repack::driver::{run_compare, run_convert, Dataset};
use nwb_repack::service::HttpMetadataService;
use nwb_repack::settings::Settings;
use nwb_repack::trace;

#[derive(Parser)]
#[command(name = "nwb-repack")]
#[command(about = "Merge and re-encode hierarchical scientific-recording containers", long_about = None)]
struct Cli {
    /// Settings file path
    #[arg(long, default_value = "nwb-repack.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every session of a dataset listed in the catalog
    Convert {
        /// Which dataset's naming conventions and merge shape to use
        #[arg(long, value_enum)]
        dataset: Dataset,
    },

    /// Structurally compare two container files
    Compare {
        a: PathBuf,
        b: PathBuf,

        /// Skip comparing the top-level container names
        #[arg(long)]
        ignore_name: bool,

        /// Skip comparing opaque object identity markers
        #[arg(long)]
        ignore_object_ids: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load_from(&cli.config)?;
    settings.validate().map_err(anyhow::Error::msg)?;
    trace::init_from_settings(&settings).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Convert { dataset } => {
            let service = HttpMetadataService::new(&settings.metadata_service_host);
            let report = run_convert(&settings, dataset, &service)?;
            println!(
                "converted {} session(s), {} failed, {} source file(s) missing",
                report.converted.len(),
                report.failed.len(),
                report.missing.len()
            );
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Compare {
            a,
            b,
            ignore_name,
            ignore_object_ids,
        } => {
            let options = CompareOptions {
                ignore_name,
                ignore_object_ids,
                ..CompareOptions::default()
            };
            let discrepancies = run_compare(&a, &b, &options)?;
            for d in &discrepancies {
                println!("{d}");
            }
            if discrepancies.is_empty() {
                println!("no discrepancies");
            } else {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
