//! Config module for mapdl

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use reqwest::{Client, redirect::Policy};
use thiserror::Error;

use crate::maps::MapSource;

const DEFAULT_MIRRORS: [(&str, &str); 2] = [
    ("ProbablyAServer", "http://cdn.probablyaserver.com/tf/maps/"),
    ("FakkelBrigade", "http://fakkelbrigade.eu/maps/"),
];

const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mirror must look like NAME=URL, got {0:?}")]
    MalformedMirror(String),

    #[error("mirror {name} has an invalid url: {reason}")]
    InvalidMirrorUrl { name: String, reason: String },
}

/// A `NAME=URL` mirror argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub name: String,
    pub url: String,
}

impl FromStr for Mirror {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, url) = s
            .split_once('=')
            .map(|(name, url)| (name.trim(), url.trim()))
            .filter(|(name, url)| !name.is_empty() && !url.is_empty())
            .ok_or_else(|| ConfigError::MalformedMirror(s.to_string()))?;

        url::Url::parse(url).map_err(|e| ConfigError::InvalidMirrorUrl {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        // Listing links are relative to the maps folder, so it has to end in a slash
        let url = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        };
        Ok(Self {
            name: name.to_string(),
            url,
        })
    }
}

impl fmt::Display for Mirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.url)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Parser, Debug, Clone)]
pub struct PathConfig {
    /// Game install directory, the one containing `tf/`
    #[clap(long, global = true, env = "MAPDL_GAME_DIR", default_value_t = get_default_game_dir())]
    pub game_dir: String,

    /// Where downloaded maps are installed [default: <game dir>/tf/download/maps]
    #[clap(long, global = true, env = "MAPDL_MAPS_DIR")]
    pub maps_dir: Option<PathBuf>,

    /// Maps shipped with the game, which are never listed [default: <game dir>/tf/maps]
    #[clap(long, global = true, env = "MAPDL_STOCK_DIR")]
    pub stock_dir: Option<PathBuf>,

    /// Staging directory for downloads in flight, cleaned up after each job
    #[clap(long, global = true, env = "MAPDL_CACHE_DIR", default_value_t = get_default_cache_dir())]
    pub cache_dir: String,
}

/// Safely determine the default Team Fortress 2 install directory
fn get_default_game_dir() -> String {
    dirs::data_dir()
        .map(|data| data.join("Steam/steamapps/common/Team Fortress 2"))
        .and_then(|path| path.to_str().map(String::from))
        .unwrap_or_else(|| "Team Fortress 2".to_string())
}

fn get_default_cache_dir() -> String {
    std::env::temp_dir()
        .join("mapdl")
        .to_str()
        .map(String::from)
        .unwrap_or_else(|| "/tmp/mapdl".to_string())
}

impl PathConfig {
    pub fn maps_dir(&self) -> PathBuf {
        self.maps_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.game_dir).join("tf/download/maps"))
    }

    pub fn stock_dir(&self) -> PathBuf {
        self.stock_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.game_dir).join("tf/maps"))
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.cache_dir.clone().into()
    }
}

#[derive(Parser, Debug, Clone)]
pub struct NetworkConfig {
    #[clap(long, global = true, env = "MAPDL_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    #[clap(long, global = true, env = "MAPDL_MAX_REDIRECTS", default_value = "10")]
    pub max_redirects: usize,

    /// Connect timeout in seconds. Transfers themselves are not timed out.
    #[clap(long, global = true, env = "MAPDL_CONNECT_TIMEOUT", default_value = "30")]
    pub connect_timeout: u64,
}

impl NetworkConfig {
    pub fn build_client(&self) -> reqwest::Result<Client> {
        Client::builder()
            .user_agent(&self.user_agent)
            .redirect(Policy::limited(self.max_redirects))
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .build()
    }
}

#[derive(Parser, Debug, Clone)]
pub struct MirrorConfig {
    /// Mirrors as NAME=URL, most preferred first
    #[clap(
        long = "mirror",
        global = true,
        env = "MAPDL_MIRRORS",
        value_delimiter = ',',
        default_values_t = default_mirrors()
    )]
    pub mirrors: Vec<Mirror>,

    /// Mirrors to hide from listings, by name
    #[clap(
        long = "disable-mirror",
        global = true,
        env = "MAPDL_DISABLED_MIRRORS",
        value_delimiter = ','
    )]
    pub disabled: Vec<String>,
}

fn default_mirrors() -> Vec<Mirror> {
    DEFAULT_MIRRORS
        .iter()
        .map(|(name, url)| Mirror {
            name: name.to_string(),
            url: url.to_string(),
        })
        .collect()
}

impl MirrorConfig {
    /// The configured mirrors, with priority following their order
    pub fn sources(&self) -> Vec<Arc<MapSource>> {
        self.mirrors
            .iter()
            .enumerate()
            .map(|(priority, mirror)| {
                Arc::new(MapSource::new(
                    mirror.name.clone(),
                    mirror.url.clone(),
                    priority as i32,
                ))
            })
            .collect()
    }

    /// Get valid disabled mirror names (filters out empty strings)
    pub fn get_valid_disabled(&self) -> Vec<String> {
        self.disabled
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the maps available on the mirrors
    List {
        /// Only show maps whose name contains this
        #[clap(long, short)]
        search: Option<String>,

        /// Show every mirror's copy of a map, not just the preferred one
        #[clap(long)]
        all_mirrors: bool,

        /// Print JSON instead of a table
        #[clap(long)]
        json: bool,
    },
    /// Download maps by name, or every map matching a search
    Download {
        /// Download every listed map whose name contains this
        #[clap(long, short)]
        search: Option<String>,

        /// Map names, without `.bsp`
        names: Vec<String>,
    },
    /// Delete installed maps
    Delete {
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// List installed maps
    Installed,
    /// Report maps being added to or removed from the maps directory
    Watch,
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "mapdl", version, about = "Download maps from fastdownload mirrors")]
pub struct Config {
    #[clap(flatten)]
    pub paths: PathConfig,

    #[clap(flatten)]
    pub network: NetworkConfig,

    #[clap(flatten)]
    pub mirrors: MirrorConfig,

    #[clap(long, global = true, env = "MAPDL_LOG_FORMAT", value_enum, default_value = "compact")]
    pub log_format: LogFormat,

    #[clap(subcommand)]
    pub command: Command,
}

pub fn config() -> Config {
    Config::parse()
}
