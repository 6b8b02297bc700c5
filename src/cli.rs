//! CLI argument parsing for covprobe

use clap::Parser;
use std::path::PathBuf;

use crate::config::InstrumentConfig;
use crate::location::LocationFormat;
use crate::probe_id::IdStrategy;

/// Accepts `true`/`false` as well as `1`/`0`
fn parse_flag(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected true/false or 1/0, got '{}'", other)),
    }
}

#[derive(Parser, Debug)]
#[command(name = "covprobe")]
#[command(version)]
#[command(about = "Statement-level coverage probe injection for Android application packages", long_about = None)]
pub struct Cli {
    /// Application package to instrument, or a directory holding one
    #[arg(long = "apk", value_name = "PATH")]
    pub apk: PathBuf,

    /// Only instrument code under the application's own namespace
    #[arg(long = "app", value_name = "BOOL", value_parser = parse_flag)]
    pub app: Option<bool>,

    /// Mirror every probe hit to the platform log
    #[arg(long = "print", value_name = "BOOL", value_parser = parse_flag)]
    pub print: Option<bool>,

    /// Output directory (default: the directory of the input package)
    #[arg(short = 'o', long = "out", value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Probe identifier strategy
    #[arg(long = "id-strategy", value_enum)]
    pub id_strategy: Option<IdStrategy>,

    /// How guarded statements are described in the manifest
    #[arg(long = "location-format", value_enum)]
    pub location_format: Option<LocationFormat>,

    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Keep extracted content in DIR and reuse it while it is current
    #[arg(long = "content-dir", value_name = "DIR")]
    pub content_dir: Option<PathBuf>,

    /// Re-extract the package even when cached content is current
    #[arg(long = "force-extract")]
    pub force_extract: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Apply command-line overrides on top of file configuration
    pub fn apply_overrides(&self, config: &mut InstrumentConfig) {
        let section = &mut config.instrumentation;
        if let Some(app) = self.app {
            section.scope_to_app = app;
        }
        if let Some(print) = self.print {
            section.mirror_to_log = print;
        }
        if let Some(strategy) = self.id_strategy {
            section.id_strategy = strategy;
        }
        if let Some(format) = self.location_format {
            section.location_format = format;
        }
    }
}
