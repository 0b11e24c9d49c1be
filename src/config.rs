use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use log::LevelFilter;
use regex::Regex;
use serde::Deserialize;

use crate::template::{self, TemplateError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    pub cookies: Cookies,
    pub channels: Vec<String>,
    pub output: OutputConfig,
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub binaries: BinariesConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Cookies {
    #[serde(rename = "NID_AUT")]
    pub nid_aut: String,
    #[serde(rename = "NID_SES")]
    pub nid_ses: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OutputConfig {
    /// Directory template, e.g. `/recordings/{author}`
    pub path: String,
    /// File name template, e.g. `[{time:%Y-%m-%d}] {title}.ts`
    pub filename: String,
    #[serde(default = "default_quality")]
    pub quality: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitoringConfig {
    /// Seconds between live checks while idle
    pub check_interval: u64,
    /// Seconds between live checks while recording
    pub stop_check_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BinariesConfig {
    #[serde(default = "default_streamlink")]
    pub streamlink: PathBuf,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
}

fn default_quality() -> String {
    "best".into()
}

fn default_level() -> String {
    "INFO".into()
}

fn default_streamlink() -> PathBuf {
    "streamlink".into()
}

fn default_ffmpeg() -> PathBuf {
    "ffmpeg".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            streamlink: default_streamlink(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("could not read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid output template: {0}")]
    TemplateError(#[from] TemplateError),
}

impl Cookies {
    pub fn pairs(&self) -> [(&'static str, &str); 2] {
        [("NID_AUT", &self.nid_aut), ("NID_SES", &self.nid_ses)]
    }
}

impl MonitoringConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn stop_check_interval(&self) -> Duration {
        Duration::from_secs(self.stop_check_interval)
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> LevelFilter {
        parse_level(&self.level)
    }
}

/// Maps a level name to a filter. Unknown names fall back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_uppercase().as_str() {
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "WARNING" | "WARN" => LevelFilter::Warn,
        "ERROR" | "CRITICAL" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

fn channel_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:https?://)?(?:[\w-]+\.)?chzzk\.naver\.com/(?:live/)?([0-9a-fA-F]{32})/?(?:[?#].*)?$",
            r"|^([0-9a-fA-F]{32})$"
        ))
        .expect("channel id regex is valid")
    })
}

/// Accepts a bare channel id or a channel / watch page URL.
pub fn normalize_channel_id(input: &str) -> Option<String> {
    let caps = channel_id_regex().captures(input.trim())?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .map(|m| m.as_str().to_lowercase())
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            _ => ConfigError::IoError(e),
        })?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Normalizes channel ids and checks the values serde can't.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let mut channels = Vec::with_capacity(self.channels.len());

        for entry in &self.channels {
            let id = normalize_channel_id(entry)
                .ok_or_else(|| ConfigError::Invalid(format!("invalid channel id: {}", entry)))?;
            if seen.insert(id.clone()) {
                channels.push(id);
            } else {
                warn!("Duplicate channel ignored: {}", entry);
            }
        }

        if channels.is_empty() {
            return Err(ConfigError::Invalid("no channels configured".into()));
        }
        self.channels = channels;

        for (name, value) in self.cookies.pairs() {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("cookie {} is empty", name)));
            }
        }

        if self.monitoring.check_interval == 0 || self.monitoring.stop_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "monitoring intervals must be greater than 0".into(),
            ));
        }

        template::validate(&self.output.path)?;
        template::validate(&self.output.filename)?;
        if self.output.filename.trim().is_empty() {
            return Err(ConfigError::Invalid("output.filename is empty".into()));
        }

        Ok(())
    }
}
