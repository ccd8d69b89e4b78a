//! Minimal configuration loading for seqbus.
//!
//! Kept dependency-light so the engine, its tools and its tests can all
//! import it without dragging in the sound stack.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/seqbus/config.toml` (system)
//! 2. `~/.config/seqbus/config.toml` (user)
//! 3. `./seqbus.toml` (local override, or a path given on the command line)
//! 4. Environment variables (`SEQBUS_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [connection]
//! device = "default"
//! client_name = "drum-sequencer"
//! streams = "duplex"
//! mode = "nonblock"
//! receive_max_events = 16
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod connection;
pub mod loader;

pub use connection::{BlockMode, ConnectionConfig, Streams, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete seqbus configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SeqConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SeqConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/seqbus/config.toml`
    /// 3. `~/.config/seqbus/config.toml`
    /// 4. `./seqbus.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with an explicit file taking the place of `./seqbus.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where the values came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = SeqConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# seqbus configuration\n\n");

        output.push_str("[connection]\n");
        output.push_str(&format!("device = \"{}\"\n", self.connection.device));
        output.push_str(&format!(
            "client_name = \"{}\"\n",
            self.connection.client_name
        ));
        output.push_str(&format!("streams = \"{}\"\n", self.connection.streams));
        output.push_str(&format!("mode = \"{}\"\n", self.connection.mode));
        output.push_str(&format!(
            "receive_max_events = {}\n",
            self.connection.receive_max_events
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SeqConfig::default();
        assert_eq!(config.connection.device, "default");
        assert_eq!(config.connection.receive_max_events, 4);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_to_toml_parses_back() {
        let mut config = SeqConfig::default();
        config.connection.client_name = "roundtrip".to_string();
        config.connection.streams = Streams::Input;

        let rendered = config.to_toml();
        assert!(rendered.contains("[connection]"));
        assert!(rendered.contains("[telemetry]"));

        let parsed: SeqConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_missing_path() {
        // A missing override falls back to the standard locations
        let config = SeqConfig::load_from(Some(Path::new("/nonexistent/seqbus.toml")));
        assert!(config.is_ok());
    }
}
