//! Error types for the kickr-gears crate.

use std::time::Duration;
use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No advertisement matched the trainer profile before the scan timed out.
    #[error("No matching trainer found within {timeout:?}")]
    DeviceNotFound {
        /// How long the scan ran.
        timeout: Duration,
    },

    /// The radio link could not be opened, or timed out while opening.
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// A required telemetry characteristic is missing on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A notification payload did not match its declared layout.
    #[error("Malformed payload: {context}")]
    MalformedPayload {
        /// Description of what was wrong with the payload.
        context: String,
    },

    /// The link dropped mid-stream, or went silent past the watchdog interval.
    #[error("Link lost: {reason}")]
    LinkLost {
        /// Description of how the loss was detected.
        reason: String,
    },

    /// A shutdown request interrupted a pending operation.
    #[error("Operation cancelled by shutdown request")]
    Cancelled,

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Configuration could not be read or parsed.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of the problem.
        reason: String,
    },
}

/// Data-less classification of an [`Error`].
///
/// This is what the telemetry sink sees about the most recent failure, so the
/// overlay can word its status line without matching on error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorKind {
    /// Bluetooth stack error or unavailable adapter.
    Bluetooth,
    /// Scan timed out without a match.
    DeviceNotFound,
    /// Connect or service discovery failed.
    ConnectFailed,
    /// The device lacks the expected telemetry characteristic.
    CharacteristicNotFound,
    /// A single payload could not be decoded.
    MalformedPayload,
    /// The link dropped or went silent.
    LinkLost,
    /// Shutdown was requested.
    Cancelled,
    /// Invalid parameter or configuration.
    Configuration,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bluetooth(_) | Self::BluetoothUnavailable => ErrorKind::Bluetooth,
            Self::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::CharacteristicNotFound { .. } => ErrorKind::CharacteristicNotFound,
            Self::MalformedPayload { .. } => ErrorKind::MalformedPayload,
            Self::LinkLost { .. } => ErrorKind::LinkLost,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidParameter { .. } | Self::Config { .. } => ErrorKind::Configuration,
        }
    }

    /// Whether the supervisor recovers from this error by backing off and retrying.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Cancelled | ErrorKind::Configuration
        )
    }

    pub(crate) fn malformed(context: impl Into<String>) -> Self {
        Self::MalformedPayload {
            context: context.into(),
        }
    }

    pub(crate) fn invalid(name: &str, value: impl std::fmt::Display) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
