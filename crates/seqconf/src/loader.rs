//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, ConnectionConfig, SeqConfig, TelemetryConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/seqbus/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("seqbus/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        let path = expand_path(&path.to_string_lossy());
        if path.exists() {
            files.push(path);
            return files;
        }
    }

    let local = PathBuf::from("seqbus.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<SeqConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<SeqConfig, ConfigError> {
    let config: SeqConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if config.connection.receive_max_events == 0 {
        return Err(ConfigError::Parse {
            path: path.to_path_buf(),
            message: "connection.receive_max_events must be at least 1".to_string(),
        });
    }

    Ok(config)
}

fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configs, with non-default values in `overlay` taking precedence.
pub fn merge_configs(base: SeqConfig, overlay: SeqConfig) -> SeqConfig {
    let conn_default = ConnectionConfig::default();
    let telemetry_default = TelemetryConfig::default();

    SeqConfig {
        connection: ConnectionConfig {
            device: pick(
                base.connection.device,
                overlay.connection.device,
                conn_default.device,
            ),
            client_name: pick(
                base.connection.client_name,
                overlay.connection.client_name,
                conn_default.client_name,
            ),
            streams: pick(
                base.connection.streams,
                overlay.connection.streams,
                conn_default.streams,
            ),
            mode: pick(
                base.connection.mode,
                overlay.connection.mode,
                conn_default.mode,
            ),
            receive_max_events: pick(
                base.connection.receive_max_events,
                overlay.connection.receive_max_events,
                conn_default.receive_max_events,
            ),
        },
        telemetry: TelemetryConfig {
            log_level: pick(
                base.telemetry.log_level,
                overlay.telemetry.log_level,
                telemetry_default.log_level,
            ),
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut SeqConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Unparseable values are ignored and not recorded as overrides.
pub fn apply_overrides_from<F>(config: &mut SeqConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("SEQBUS_DEVICE") {
        config.connection.device = v;
        sources.env_overrides.push("SEQBUS_DEVICE".to_string());
    }
    if let Some(v) = lookup("SEQBUS_CLIENT_NAME") {
        config.connection.client_name = v;
        sources.env_overrides.push("SEQBUS_CLIENT_NAME".to_string());
    }
    if let Some(v) = lookup("SEQBUS_STREAMS") {
        if let Ok(streams) = v.parse() {
            config.connection.streams = streams;
            sources.env_overrides.push("SEQBUS_STREAMS".to_string());
        }
    }
    if let Some(v) = lookup("SEQBUS_MODE") {
        if let Ok(mode) = v.parse() {
            config.connection.mode = mode;
            sources.env_overrides.push("SEQBUS_MODE".to_string());
        }
    }
    if let Some(v) = lookup("SEQBUS_RECEIVE_MAX_EVENTS") {
        match v.parse::<usize>() {
            Ok(n) if n > 0 => {
                config.connection.receive_max_events = n;
                sources
                    .env_overrides
                    .push("SEQBUS_RECEIVE_MAX_EVENTS".to_string());
            }
            _ => {}
        }
    }

    if let Some(v) = lookup("SEQBUS_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("SEQBUS_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over our own variable
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            match env::var(var_name) {
                Ok(var_value) => PathBuf::from(var_value).join(&stripped[slash_pos + 1..]),
                Err(_) => PathBuf::from(path),
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockMode, Streams};
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[connection]
client_name = "arpeggiator"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.connection.client_name, "arpeggiator");
        assert_eq!(config.connection.device, "default");
        assert_eq!(config.connection.receive_max_events, 4);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[connection]
device = "hw"
client_name = "router"
streams = "output"
mode = "block"
receive_max_events = 32

[telemetry]
log_level = "seqbus=trace"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.connection.device, "hw");
        assert_eq!(config.connection.streams, Streams::Output);
        assert_eq!(config.connection.mode, BlockMode::Block);
        assert_eq!(config.connection.receive_max_events, 32);
        assert_eq!(config.telemetry.log_level, "seqbus=trace");
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        let bad_stream = "[connection]\nstreams = \"sideways\"\n";
        assert!(matches!(
            parse_toml(bad_stream, Path::new("bad.toml")),
            Err(ConfigError::Parse { .. })
        ));

        let zero_batch = "[connection]\nreceive_max_events = 0\n";
        assert!(matches!(
            parse_toml(zero_batch, Path::new("bad.toml")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[connection]\nmode = \"block\"").unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.connection.mode, BlockMode::Block);

        let missing = load_from_file(Path::new("/nonexistent/seqbus.toml"));
        assert!(matches!(missing, Err(ConfigError::FileRead { .. })));
    }

    #[test]
    fn test_discover_with_cli_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[telemetry]\nlog_level = \"warn\"\n").unwrap();

        let files = discover_config_files_with_override(Some(&path));
        assert_eq!(files.last(), Some(&path));
    }

    #[test]
    fn test_merge_prefers_overlay_non_defaults() {
        let mut base = SeqConfig::default();
        base.connection.device = "hw:1".to_string();
        base.connection.receive_max_events = 8;

        let mut overlay = SeqConfig::default();
        overlay.connection.mode = BlockMode::Block;
        overlay.connection.receive_max_events = 16;

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.connection.device, "hw:1");
        assert_eq!(merged.connection.mode, BlockMode::Block);
        assert_eq!(merged.connection.receive_max_events, 16);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SEQBUS_CLIENT_NAME", "from-env"),
            ("SEQBUS_STREAMS", "input"),
            ("SEQBUS_MODE", "bogus"),
            ("SEQBUS_RECEIVE_MAX_EVENTS", "12"),
            ("SEQBUS_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = SeqConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| {
            vars.get(k).map(|v| v.to_string())
        });

        assert_eq!(config.connection.client_name, "from-env");
        assert_eq!(config.connection.streams, Streams::Input);
        assert_eq!(config.connection.mode, BlockMode::Nonblock);
        assert_eq!(config.connection.receive_max_events, 12);
        assert_eq!(config.telemetry.log_level, "debug");
        assert!(!sources.env_overrides.contains(&"SEQBUS_MODE".to_string()));
        assert_eq!(sources.env_overrides.len(), 4);
    }
}
