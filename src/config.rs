use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    app::Cli,
    media::AutoplayPolicy,
    observer::ObserverConfig,
};

const DEFAULT_CONFIG_PATH: &str = "autoplay.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub muted: bool,
    pub autoplay_policy: AutoplayPolicy,
}

#[derive(Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub observer: ObserverConfig,

    pub playback: PlaybackConfig,
}

impl Config {
    pub fn read(file: &mut impl Read) -> anyhow::Result<Self> {
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .context("Failed to read config file")?;

        let config = toml::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    pub fn read_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut file = File::open(path).context("Failed to open config file")?;
        Self::read(&mut file)
    }

    pub fn from_cli_args(args: &Cli) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(config_path) => Self::read_path(config_path)?,
            None => {
                let default_config = PathBuf::from(DEFAULT_CONFIG_PATH);
                if default_config.exists() {
                    log::info!("Using default config file {DEFAULT_CONFIG_PATH}");
                    Self::read_path(default_config)?
                } else {
                    log::info!("No config file found; using default config");
                    Config::default()
                }
            }
        };
        if !args.threshold.is_empty() {
            config.observer = config
                .observer
                .with_thresholds(args.threshold.iter().copied())
                .context("Invalid threshold argument")?;
        }
        if let Some(root_margin) = &args.root_margin {
            config.observer = config
                .observer
                .with_root_margin(root_margin)
                .context("Invalid root margin argument")?;
        }
        Ok(config)
    }
}
