//! Sequencer handle parameters - what `open` needs to attach to the bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which directions the handle is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Streams {
    Input,
    Output,
    Duplex,
}

impl Streams {
    /// Raw driver code (`SND_SEQ_OPEN_*`).
    pub fn code(self) -> i32 {
        match self {
            Streams::Output => 1,
            Streams::Input => 2,
            Streams::Duplex => 3,
        }
    }

    pub fn has_input(self) -> bool {
        matches!(self, Streams::Input | Streams::Duplex)
    }

    pub fn has_output(self) -> bool {
        matches!(self, Streams::Output | Streams::Duplex)
    }
}

impl FromStr for Streams {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" | "in" => Ok(Streams::Input),
            "output" | "out" => Ok(Streams::Output),
            "duplex" => Ok(Streams::Duplex),
            other => Err(format!("unknown stream direction '{}'", other)),
        }
    }
}

impl fmt::Display for Streams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Streams::Input => "input",
            Streams::Output => "output",
            Streams::Duplex => "duplex",
        };
        f.write_str(s)
    }
}

/// Blocking behaviour of I/O on the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    Block,
    Nonblock,
}

impl BlockMode {
    /// Raw driver code (`SND_SEQ_NONBLOCK` or 0).
    pub fn code(self) -> i32 {
        match self {
            BlockMode::Block => 0,
            BlockMode::Nonblock => 1,
        }
    }

    pub fn is_nonblocking(self) -> bool {
        self == BlockMode::Nonblock
    }
}

impl FromStr for BlockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "block" | "blocking" => Ok(BlockMode::Block),
            "nonblock" | "nonblocking" => Ok(BlockMode::Nonblock),
            other => Err(format!("unknown block mode '{}'", other)),
        }
    }
}

impl fmt::Display for BlockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BlockMode::Block => "block",
            BlockMode::Nonblock => "nonblock",
        })
    }
}

/// Parameters for attaching a client to the sequencer bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver handle name.
    /// Default: "default"
    #[serde(default = "ConnectionConfig::default_device")]
    pub device: String,

    /// Display name of our client on the bus.
    /// Default: "seqbus-<pid>"
    #[serde(default = "ConnectionConfig::default_client_name")]
    pub client_name: String,

    /// Stream directions to open.
    /// Default: duplex
    #[serde(default = "ConnectionConfig::default_streams")]
    pub streams: Streams,

    /// Blocking mode applied to the handle.
    /// Default: nonblock
    #[serde(default = "ConnectionConfig::default_mode")]
    pub mode: BlockMode,

    /// Batch size used by `receive_events` when the caller gives none.
    /// Default: 4
    #[serde(default = "ConnectionConfig::default_receive_max_events")]
    pub receive_max_events: usize,
}

impl ConnectionConfig {
    pub(crate) fn default_device() -> String {
        "default".to_string()
    }

    pub(crate) fn default_client_name() -> String {
        format!("seqbus-{}", std::process::id())
    }

    pub(crate) fn default_streams() -> Streams {
        Streams::Duplex
    }

    pub(crate) fn default_mode() -> BlockMode {
        BlockMode::Nonblock
    }

    pub(crate) fn default_receive_max_events() -> usize {
        4
    }

    /// Defaults with a specific client name.
    pub fn named(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            ..Self::default()
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device: Self::default_device(),
            client_name: Self::default_client_name(),
            streams: Self::default_streams(),
            mode: Self::default_mode(),
            receive_max_events: Self::default_receive_max_events(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level (trace, debug, info, warn, error) or an env-filter string.
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    pub(crate) fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_defaults() {
        let conn = ConnectionConfig::default();
        assert_eq!(conn.device, "default");
        assert!(conn.client_name.starts_with("seqbus-"));
        assert_eq!(conn.streams, Streams::Duplex);
        assert_eq!(conn.mode, BlockMode::Nonblock);
        assert_eq!(conn.receive_max_events, 4);
    }

    #[test]
    fn test_streams_codes() {
        assert_eq!(Streams::Output.code(), 1);
        assert_eq!(Streams::Input.code(), 2);
        assert_eq!(Streams::Duplex.code(), 3);
        assert!(Streams::Duplex.has_input() && Streams::Duplex.has_output());
        assert!(!Streams::Output.has_input());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("Duplex".parse::<Streams>().unwrap(), Streams::Duplex);
        assert_eq!("nonblock".parse::<BlockMode>().unwrap(), BlockMode::Nonblock);
        assert!("sideways".parse::<Streams>().is_err());
    }
}
