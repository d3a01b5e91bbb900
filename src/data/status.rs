//! Connection status and sink update types.

use crate::data::{Gear, Grade, TelemetrySample};
use crate::error::ErrorKind;

/// Process-wide connection status shown by the overlay.
///
/// Only the supervisor changes it; the sink reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Scanning for a trainer.
    #[default]
    Searching,
    /// Opening the link and subscribing.
    Connecting,
    /// Streaming telemetry.
    Connected,
    /// Between attempts after a failure or link loss.
    Disconnected,
    /// Between attempts after repeated consecutive failures.
    Error,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if waiting to retry.
    pub fn is_retrying(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Searching => write!(f, "Searching"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// One update pushed to the telemetry sink.
///
/// Status changes carry no sample; sample updates always carry
/// [`ConnectionState::Connected`].
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryUpdate {
    /// Current connection status.
    pub status: ConnectionState,
    /// The newest sample, when this update carries one.
    pub sample: Option<TelemetrySample>,
    /// Classification of the most recent failure while retrying.
    pub fault: Option<ErrorKind>,
}

impl TelemetryUpdate {
    /// A status-only update.
    pub fn status(status: ConnectionState, fault: Option<ErrorKind>) -> Self {
        Self {
            status,
            sample: None,
            fault,
        }
    }

    /// The final update after shutdown. No retry follows it.
    pub fn stopped() -> Self {
        Self::status(ConnectionState::Disconnected, Some(ErrorKind::Cancelled))
    }

    /// Check if this is the final update after shutdown.
    pub fn is_stopped(&self) -> bool {
        self.status == ConnectionState::Disconnected && self.fault == Some(ErrorKind::Cancelled)
    }

    /// A sample update while connected.
    pub fn sample(sample: TelemetrySample) -> Self {
        Self {
            status: ConnectionState::Connected,
            sample: Some(sample),
            fault: None,
        }
    }

    /// Current gear, `None` when disconnected or not reported.
    pub fn gear(&self) -> Option<Gear> {
        self.sample.as_ref().and_then(|s| s.gear)
    }

    /// Current grade, `None` when disconnected or not yet reported.
    pub fn grade(&self) -> Option<Grade> {
        self.sample.as_ref().and_then(|s| s.grade)
    }

    /// Human-readable status line for the overlay.
    pub fn status_text(&self) -> &'static str {
        match self.status {
            ConnectionState::Searching => "Searching for KICKR...",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            _ if self.is_stopped() => "Disconnected",
            ConnectionState::Disconnected | ConnectionState::Error
                if self.fault == Some(ErrorKind::CharacteristicNotFound) =>
            {
                "Incompatible trainer - retrying"
            }
            ConnectionState::Disconnected => "Disconnected - retrying",
            ConnectionState::Error => "Error - retrying",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_connection_state() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Searching.is_connected());
        assert!(ConnectionState::Disconnected.is_retrying());
        assert!(ConnectionState::Error.is_retrying());
        assert!(!ConnectionState::Connecting.is_retrying());
        assert_eq!(ConnectionState::default(), ConnectionState::Searching);
    }

    #[test]
    fn test_status_text() {
        let update = TelemetryUpdate::status(ConnectionState::Searching, None);
        assert_eq!(update.status_text(), "Searching for KICKR...");

        let update =
            TelemetryUpdate::status(ConnectionState::Disconnected, Some(ErrorKind::LinkLost));
        assert_eq!(update.status_text(), "Disconnected - retrying");

        let update = TelemetryUpdate::status(
            ConnectionState::Error,
            Some(ErrorKind::CharacteristicNotFound),
        );
        assert_eq!(update.status_text(), "Incompatible trainer - retrying");
    }

    #[test]
    fn test_stopped_update_does_not_promise_a_retry() {
        let update = TelemetryUpdate::stopped();
        assert!(update.is_stopped());
        assert_eq!(update.status, ConnectionState::Disconnected);
        assert_eq!(update.status_text(), "Disconnected");

        let lost =
            TelemetryUpdate::status(ConnectionState::Disconnected, Some(ErrorKind::LinkLost));
        assert!(!lost.is_stopped());
    }

    #[test]
    fn test_sample_update_accessors() {
        let update = TelemetryUpdate::sample(TelemetrySample {
            gear: Some(Gear::Combined(5)),
            grade: Some(Grade::from_hundredths(320)),
            locked: None,
            speed_kmh: None,
            cadence_rpm: None,
            timestamp: Utc::now(),
        });

        assert_eq!(update.status, ConnectionState::Connected);
        assert_eq!(update.gear(), Some(Gear::Combined(5)));
        assert_eq!(update.grade(), Some(Grade::from_hundredths(320)));
        assert_eq!(TelemetryUpdate::default().gear(), None);
    }
}
