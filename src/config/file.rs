//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon/interact.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractConfigFile {
    /// Directory for the conversation database
    pub data_dir: Option<String>,

    /// Voice channel configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Text channel configuration
    #[serde(default)]
    pub text: TextFileConfig,

    /// Session bootstrap configuration
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Voice channel configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Start sessions in hands-free mode
    pub start_hands_free: Option<bool>,
}

/// Text channel configuration
#[derive(Debug, Default, Deserialize)]
pub struct TextFileConfig {
    /// Connect a transport on first send
    pub auto_connect: Option<bool>,

    /// Retries after the first failed attempt
    pub max_retries: Option<u32>,

    /// Delay before a retry, in milliseconds
    pub retry_delay_ms: Option<u64>,

    /// Delay cap, in milliseconds
    pub max_delay_ms: Option<u64>,

    /// "fixed" or "exponential"
    pub backoff: Option<String>,
}

/// Session bootstrap configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Turns handed to the realtime model
    pub max_turns: Option<usize>,

    /// Extra instructions for the model
    pub instructions: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config_file(content: &str) -> Result<InteractConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `InteractConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> InteractConfigFile {
    config_file_path().map_or_else(InteractConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &Path) -> InteractConfigFile {
    if !path.exists() {
        return InteractConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                InteractConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            InteractConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon/interact.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon")
            .join("interact.toml")
    })
}
