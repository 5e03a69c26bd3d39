//! Command-line interface of the `kspectra` binary.

use std::path::{Path, PathBuf};

use anyhow::{self, format_err, Context};
use clap::Parser;
use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::io::format::kspectra_output;


const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

/// Logs a nicely formatted `kspectra` heading to the `kspectra-output` logger.
pub fn log_heading() {
    let version = if let Some(ver) = VERSION {
        format!("v{ver}")
    } else {
        "v unknown".to_string()
    };
    kspectra_output!("╭──────────────────────────────────────────────────────────────────────────────────────────────╮");
    kspectra_output!("│  _                          _                                                                │");
    kspectra_output!("│ | | __ ___  _ __   ___  ___| |_ _ __ __ _                                                    │");
    kspectra_output!("│ | |/ // __|| '_ \\ / _ \\/ __| __| '__/ _` |                                                   │");
    kspectra_output!("│ |   < \\__ \\| |_) |  __/ (__| |_| | | (_| |                                                   │");
    kspectra_output!("│ |_|\\_\\|___/| .__/ \\___|\\___|\\__|_|  \\__,_|                                                   │");
    kspectra_output!("│            |_|        Projected spectral functions from lattice Green's functions            │");
    kspectra_output!("│                                                                              {version:>15} │");
    kspectra_output!("╰──────────────────────────────────────────────────────────────────────────────────────────────╯");
    kspectra_output!("");
}

/// Command-line arguments of the `kspectra` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// The YAML input file. If absent, a template input file is written instead.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// The stem of the log files. The report goes to `<OUTPUT>.out` and diagnostics go to
    /// `<OUTPUT>.log`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Cli {
    /// Returns the stem of the log files, derived from the input file name if no output stem is
    /// given.
    pub fn output_stem(&self) -> PathBuf {
        match (&self.output, &self.config) {
            (Some(output), _) => output.clone(),
            (None, Some(config)) => config.with_extension(""),
            (None, None) => PathBuf::from("kspectra"),
        }
    }
}

/// Builds the `log4rs` configuration of the binary. The `kspectra-output` target is written
/// verbatim to `<stem>.out`; every other record goes to `<stem>.log` with a timestamp.
pub fn logging_config(stem: &Path, level: LevelFilter) -> Result<Config, anyhow::Error> {
    let out_path = stem.with_extension("out");
    let log_path = stem.with_extension("log");
    let output_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .append(false)
        .build(&out_path)
        .with_context(|| format!("Unable to create output file {}", out_path.display()))?;
    let diagnostic_appender = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l:<5} {T} {t} - {m}{n}",
        )))
        .append(false)
        .build(&log_path)
        .with_context(|| format!("Unable to create log file {}", log_path.display()))?;
    Config::builder()
        .appender(Appender::builder().build("output", Box::new(output_appender)))
        .appender(Appender::builder().build("diagnostics", Box::new(diagnostic_appender)))
        .logger(
            Logger::builder()
                .appender("output")
                .additive(false)
                .build("kspectra-output", LevelFilter::Info),
        )
        .build(Root::builder().appender("diagnostics").build(level))
        .map_err(|err| format_err!("Invalid logging configuration: {err}"))
}
