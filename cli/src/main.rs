use std::error::Error;
use std::path::Path;

use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use tracing::metadata::LevelFilter;
use webarchive_common::Settings;

mod export;
mod inspect;

#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(
        long,
        default_value_t = LevelFilter::INFO,
        value_parser = clap::builder::PossibleValuesParser::new(["off", "error", "warn", "info", "debug", "trace"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
    )]
    log_level: LevelFilter,
    #[command(subcommand)]
    subcommand: WebarchiveSubcommand,
}

#[derive(Subcommand, Debug)]
enum WebarchiveSubcommand {
    /// Package a finished WARC into a WACZ.
    Export(export::ExportArgs),
    /// List or look up entries of an existing WACZ.
    Inspect(inspect::InspectArgs),
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    match args.subcommand {
        WebarchiveSubcommand::Export(export_args) => export::run(export_args),
        WebarchiveSubcommand::Inspect(inspect_args) => inspect::run(inspect_args),
    }
}

pub(crate) fn load_settings(path: Option<&Path>) -> Result<Settings, Box<dyn Error>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&raw)?)
        }
        None => Ok(Settings::default()),
    }
}
