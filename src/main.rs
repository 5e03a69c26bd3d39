use std::process;

use anyhow::{self, Context};
use clap::Parser;
use log::LevelFilter;

use kspectra::interfaces::cli::{log_heading, logging_config, Cli};
use kspectra::interfaces::input::Input;
use kspectra::interfaces::InputHandle;
use kspectra::io::{read_kspectra_yaml, write_kspectra_yaml};

const TEMPLATE_NAME: &str = "kspectra_template";

fn run(cli: &Cli) -> Result<(), anyhow::Error> {
    let config = logging_config(&cli.output_stem(), LevelFilter::Debug)?;
    log4rs::init_config(config).with_context(|| "Unable to initialise the loggers")?;
    log_heading();

    match &cli.config {
        Some(path) => {
            log::info!("Reading input file {}.", path.display());
            let input = read_kspectra_yaml::<Input, _>(path)
                .with_context(|| format!("Unable to parse input file {}", path.display()))?;
            input.handle()
        }
        None => {
            log::warn!("No input file given. Writing a template input to {TEMPLATE_NAME}.yml.");
            write_kspectra_yaml(TEMPLATE_NAME, &Input::default())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        log::error!("{err:?}");
        eprintln!("Error: {err:?}");
        process::exit(1);
    }
}
