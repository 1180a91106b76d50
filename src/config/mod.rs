//! Configuration management for the interaction core
//!
//! Precedence is env > TOML file > default.

pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::session::{BootstrapOptions, DEFAULT_MAX_TURNS};
use crate::text::{Backoff, RetryPolicy, TextChannelConfig};
use crate::{Error, Result};

use self::file::InteractConfigFile;

/// Database file name inside the data directory
const DB_FILE: &str = "interact.db";

/// Interaction core configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Text channel configuration
    pub text: TextConfig,

    /// Session bootstrap configuration
    pub session: SessionConfig,
}

/// Voice channel configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceConfig {
    /// Enable hands-free as soon as a session connects
    pub start_hands_free: bool,
}

/// Text channel configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextConfig {
    /// Connect a transport on first send
    pub auto_connect: bool,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Delay before a retry
    pub retry_delay: Duration,

    /// Delay cap for exponential backoff
    pub max_delay: Duration,

    /// Growth strategy
    pub backoff: Backoff,
}

impl Default for TextConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            auto_connect: true,
            max_retries: retry.max_retries,
            retry_delay: retry.base_delay,
            max_delay: retry.max_delay,
            backoff: retry.backoff,
        }
    }
}

/// Session bootstrap configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Turns handed to the realtime model (default 8)
    pub max_turns: usize,

    /// Extra instructions for the model
    pub instructions: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            instructions: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            voice: VoiceConfig::default(),
            text: TextConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Default data directory (`~/.local/share/omni/beacon` on Linux)
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("omni").join("beacon"))
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if an environment variable holds an invalid value
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a value cannot be parsed
    pub fn from_sources<F>(fc: InteractConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let data_dir = env("BEACON_DATA_DIR")
            .or(fc.data_dir)
            .map_or(defaults.data_dir, PathBuf::from);

        let voice = VoiceConfig {
            start_hands_free: parse_env(&env, "BEACON_START_HANDS_FREE", parse_bool)?
                .or(fc.voice.start_hands_free)
                .unwrap_or(defaults.voice.start_hands_free),
        };

        let backoff = match fc.text.backoff.as_deref() {
            None => defaults.text.backoff,
            Some(s) => parse_backoff(s)?,
        };
        let text = TextConfig {
            auto_connect: parse_env(&env, "BEACON_AUTO_CONNECT", parse_bool)?
                .or(fc.text.auto_connect)
                .unwrap_or(defaults.text.auto_connect),
            max_retries: parse_env(&env, "BEACON_TEXT_MAX_RETRIES", parse_number)?
                .or(fc.text.max_retries)
                .unwrap_or(defaults.text.max_retries),
            retry_delay: parse_env(&env, "BEACON_TEXT_RETRY_DELAY_MS", parse_number)?
                .or(fc.text.retry_delay_ms)
                .map_or(defaults.text.retry_delay, Duration::from_millis),
            max_delay: fc
                .text
                .max_delay_ms
                .map_or(defaults.text.max_delay, Duration::from_millis),
            backoff,
        };

        let session = SessionConfig {
            max_turns: parse_env(&env, "BEACON_REALTIME_MAX_TURNS", parse_number)?
                .or(fc.session.max_turns)
                .unwrap_or(defaults.session.max_turns),
            instructions: fc.session.instructions,
        };

        Ok(Self {
            data_dir,
            voice,
            text,
            session,
        })
    }

    /// Path of the conversation database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    /// Retry policy for the text channel
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.text.max_retries,
            base_delay: self.text.retry_delay,
            max_delay: self.text.max_delay.max(self.text.retry_delay),
            backoff: self.text.backoff,
        }
    }

    /// Text channel configuration
    #[must_use]
    pub fn text_channel_config(&self) -> TextChannelConfig {
        TextChannelConfig {
            auto_connect: self.text.auto_connect,
            retry: self.retry_policy(),
        }
    }

    /// Bootstrap options for the current conversation
    #[must_use]
    pub fn bootstrap_options(&self) -> BootstrapOptions {
        BootstrapOptions {
            max_turns: self.session.max_turns,
            instructions: self.session.instructions.clone(),
            ..BootstrapOptions::default()
        }
    }
}

fn parse_env<T, F, P>(env: &F, key: &str, parse: P) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    env(key)
        .map(|raw| {
            parse(raw.trim())
                .ok_or_else(|| Error::Config(format!("invalid value for {key}: {raw}")))
        })
        .transpose()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: FromStr>(s: &str) -> Option<T> {
    s.parse().ok()
}

fn parse_backoff(s: &str) -> Result<Backoff> {
    match s.to_ascii_lowercase().as_str() {
        "fixed" => Ok(Backoff::Fixed),
        "exponential" => Ok(Backoff::Exponential),
        other => Err(Error::Config(format!("unknown backoff: {other}"))),
    }
}
