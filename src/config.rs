use crate::error::ConfigError;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "lingo.toml";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_KEY_ENV: &str = "API_KEY";
pub const DEFAULT_SPEECH_PROGRAM: &str = "espeak-ng";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding persisted state (one JSON file per storage key).
    pub data_dir: PathBuf,
    pub model: String,
    /// Name of the environment variable carrying the backend API key.
    pub api_key_env: String,
    pub speech_program: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("lingo_data"),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            speech_program: DEFAULT_SPEECH_PROGRAM.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".to_string()));
        }
        if self.speech_program.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "speech_program must not be empty".to_string(),
            ));
        }
        if self.api_key_env.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "api_key_env must not be empty".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies command-line overrides on top of the file values.
    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(model) = &args.model {
            self.model = model.clone();
        }
    }
}

/// Loads the config file. A missing file yields the defaults; a file that
/// exists but does not parse is an error.
pub fn load_config_from_file(file_path: &Path) -> Result<Config, ConfigError> {
    let contents = match fs::read_to_string(file_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %file_path.display(), "config file not found, using defaults");
            return Ok(Config::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: file_path.to_path_buf(),
                source,
            })
        }
    };
    let loaded_config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: file_path.to_path_buf(),
        source,
    })?;
    loaded_config.validate()?;
    Ok(loaded_config)
}

#[derive(Debug, Parser, Clone)]
#[command(about = "LingoRPG - language learning adventures", author, version)]
pub struct CliArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Override the directory used for saved games, vocabulary and settings
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Override the backend model name
    #[arg(long)]
    pub model: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
