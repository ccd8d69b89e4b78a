use std::fmt;
use thiserror::Error;

use crate::address::Address;

/// A fault reported by the underlying driver: the negative errno it returned
/// plus the driver's own description of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Describe a negative errno using the OS error table.
    pub fn from_errno(code: i32) -> Self {
        let message = std::io::Error::from_raw_os_error(code.saturating_abs()).to_string();
        Self { code, message }
    }

    /// True when the driver would have had to block.
    pub fn is_would_block(&self) -> bool {
        self.code == -libc::EAGAIN
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for DriverError {}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum SeqError {
    #[error("Failed to open sequencer '{device}': {source}")]
    Open {
        device: String,
        #[source]
        source: DriverError,
    },

    #[error("Failed to set mode to {mode}: {source}")]
    Mode {
        mode: i32,
        #[source]
        source: DriverError,
    },

    #[error("Failed to set client name '{name}': {source}")]
    ClientName {
        name: String,
        #[source]
        source: DriverError,
    },

    #[error("Invalid mode value {0}")]
    InvalidMode(i32),

    #[error("Failed to create port '{name}': {source}")]
    PortCreate {
        name: String,
        #[source]
        source: DriverError,
    },

    #[error("Failed to delete port {port}: {source}")]
    Port {
        port: u8,
        #[source]
        source: DriverError,
    },

    #[error("Failed to {op} {sender} -> {dest}: {source}")]
    Subscription {
        op: &'static str,
        sender: Address,
        dest: Address,
        #[source]
        source: DriverError,
    },

    #[error("Failed to {op} queue {queue}: {source}")]
    Queue {
        op: &'static str,
        queue: i32,
        #[source]
        source: DriverError,
    },

    #[error("Failed to query {what}: {source}")]
    Query {
        what: String,
        #[source]
        source: DriverError,
    },

    #[error("Failed to parse address '{text}': {reason}")]
    AddressParse { text: String, reason: String },

    #[error("Failed to receive events: {0}")]
    Receive(#[source] DriverError),

    #[error("Failed to output event: {0}")]
    Output(#[source] DriverError),

    #[error("Failed to drain output: {0}")]
    Drain(#[source] DriverError),

    #[error("Failed to sync output queue: {0}")]
    Sync(#[source] DriverError),

    #[error("Failed to poll sequencer descriptors: {0}")]
    Poll(#[source] DriverError),

    #[error("Invalid event type {0}")]
    InvalidType(u8),

    #[error("Event type {event_type} has no {wanted} payload")]
    TypeMismatch {
        event_type: u8,
        wanted: &'static str,
    },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Invalid time value: {0}")]
    Time(String),

    #[error("Malformed event record: {0}")]
    Malformed(String),

    #[error("Control service '{service}' failed: {source}")]
    Service {
        service: String,
        #[source]
        source: DriverError,
    },
}

impl SeqError {
    /// The driver error code behind this failure, if any.
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            SeqError::Open { source, .. }
            | SeqError::Mode { source, .. }
            | SeqError::ClientName { source, .. }
            | SeqError::PortCreate { source, .. }
            | SeqError::Port { source, .. }
            | SeqError::Subscription { source, .. }
            | SeqError::Queue { source, .. }
            | SeqError::Query { source, .. }
            | SeqError::Service { source, .. } => Some(source.code),
            SeqError::Receive(source)
            | SeqError::Output(source)
            | SeqError::Drain(source)
            | SeqError::Sync(source)
            | SeqError::Poll(source) => Some(source.code),
            _ => None,
        }
    }

    pub(crate) fn invalid_value(field: impl Into<String>, value: impl fmt::Display) -> Self {
        SeqError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SeqError>;
