use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::{
    config::Config,
    scenario::{Scenario, ScenarioRunner},
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[arg(help = "The scenario file describing the viewport, the videos and the steps to run.")]
    pub scenario: PathBuf,

    #[arg(
        short,
        long,
        help = "The path to the config file. The default is `autoplay.toml`."
    )]
    pub config: Option<String>,

    #[arg(
        short,
        long,
        value_delimiter = ',',
        help = "Comma-separated intersection thresholds in [0, 1]. This overrides the value from the config file."
    )]
    pub threshold: Vec<f64>,

    #[arg(
        short = 'm',
        long,
        help = "The root margin, written like the CSS margin shorthand. This overrides the value from the config file."
    )]
    pub root_margin: Option<String>,
}

pub fn start() -> anyhow::Result<()> {
    pretty_env_logger::formatted_builder()
        .filter_level(LevelFilter::Info)
        .parse_env("AUTOPLAY_LOG")
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli_args(&cli)?;
    let scenario = Scenario::read_path(&cli.scenario)?;

    let report = ScenarioRunner::new(&scenario, &config)?.run(&scenario.steps)?;
    for event in &report.events {
        println!("{event}");
    }
    for status in &report.videos {
        println!("{status}");
    }
    Ok(())
}
