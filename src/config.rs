//! Engine configuration.
//!
//! Timeouts, backoff schedule and the trainer profile consumed by the
//! locator, session and supervisor. Window geometry and other overlay
//! settings live with the overlay, not here.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::{
    KICKR_NAME_PATTERN, WAHOO_GEAR_CHARACTERISTIC_UUID, WAHOO_GRADE_CHARACTERISTIC_UUID,
};
use crate::error::{Error, Result};
use crate::protocol::PayloadFormat;

/// One subscribed telemetry characteristic and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetryChannel {
    /// Characteristic UUID.
    pub characteristic: Uuid,
    /// Payload encoding of its notifications.
    pub format: PayloadFormat,
    /// Whether the session fails with `CharacteristicNotFound` without it.
    pub required: bool,
}

impl TelemetryChannel {
    /// A channel the session cannot stream without.
    pub fn required(characteristic: Uuid, format: PayloadFormat) -> Self {
        Self {
            characteristic,
            format,
            required: true,
        }
    }

    /// A channel subscribed only when the device exposes it.
    pub fn optional(characteristic: Uuid, format: PayloadFormat) -> Self {
        Self {
            characteristic,
            format,
            required: false,
        }
    }
}

/// How to recognise a trainer and which characteristics to stream.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainerProfile {
    /// Advertised service UUID that identifies the trainer.
    pub advertised_service: Option<Uuid>,
    /// Fallback: substring of the advertised local name.
    pub name_pattern: Option<String>,
    /// Telemetry characteristics to subscribe to.
    pub channels: Vec<TelemetryChannel>,
}

impl TrainerProfile {
    /// Profile for the Wahoo KICKR bike.
    ///
    /// The gear characteristic is required; grade is subscribed when present.
    pub fn kickr_bike() -> Self {
        Self {
            advertised_service: None,
            name_pattern: Some(KICKR_NAME_PATTERN.to_string()),
            channels: vec![
                TelemetryChannel::required(
                    WAHOO_GEAR_CHARACTERISTIC_UUID,
                    PayloadFormat::WahooGear,
                ),
                TelemetryChannel::optional(
                    WAHOO_GRADE_CHARACTERISTIC_UUID,
                    PayloadFormat::WahooGrade,
                ),
            ],
        }
    }

    /// Set the advertised service filter.
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.advertised_service = Some(service);
        self
    }

    /// Set the name substring filter.
    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    /// Replace the channel list.
    pub fn with_channels(mut self, channels: Vec<TelemetryChannel>) -> Self {
        self.channels = channels;
        self
    }

    /// Look up the channel for a characteristic.
    pub fn channel(&self, characteristic: &Uuid) -> Option<&TelemetryChannel> {
        self.channels
            .iter()
            .find(|c| c.characteristic == *characteristic)
    }

    fn validate(&self) -> Result<()> {
        if self.advertised_service.is_none()
            && self.name_pattern.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::invalid("profile.filter", "no service or name pattern"));
        }

        if self.channels.is_empty() {
            return Err(Error::invalid("profile.channels", "empty"));
        }

        for (i, channel) in self.channels.iter().enumerate() {
            if self.channels[..i]
                .iter()
                .any(|c| c.characteristic == channel.characteristic)
            {
                return Err(Error::invalid(
                    "profile.channels",
                    format!("duplicate characteristic {}", channel.characteristic),
                ));
            }
        }

        Ok(())
    }
}

impl Default for TrainerProfile {
    fn default() -> Self {
        Self::kickr_bike()
    }
}

/// Reconnection backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BackoffConfig {
    /// Delay before the first retry.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis", rename = "initial_ms"))]
    pub initial: Duration,
    /// Growth factor applied after each consecutive failure.
    pub multiplier: f64,
    /// Upper bound on the delay.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis", rename = "cap_ms"))]
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(30),
        }
    }
}

/// Configuration consumed by the telemetry engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TelemetryConfig {
    /// How long one scan may run before `DeviceNotFound`.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis", rename = "scan_timeout_ms"))]
    pub scan_timeout: Duration,
    /// How long opening the radio link may take.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis", rename = "connect_timeout_ms"))]
    pub connect_timeout: Duration,
    /// How long service/characteristic discovery may take.
    #[cfg_attr(
        feature = "serde",
        serde(with = "duration_millis", rename = "discovery_timeout_ms")
    )]
    pub discovery_timeout: Duration,
    /// Longest notification silence tolerated while streaming.
    #[cfg_attr(feature = "serde", serde(with = "duration_millis", rename = "watchdog_ms"))]
    pub watchdog_interval: Duration,
    /// How long releasing the link may take before it is abandoned.
    #[cfg_attr(
        feature = "serde",
        serde(with = "duration_millis", rename = "disconnect_timeout_ms")
    )]
    pub disconnect_timeout: Duration,
    /// Retry schedule.
    pub backoff: BackoffConfig,
    /// Consecutive failures after which the status reads `Error`.
    pub error_threshold: u32,
    /// Trainer identification and channels.
    pub profile: TrainerProfile,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            watchdog_interval: Duration::from_secs(5),
            disconnect_timeout: Duration::from_secs(2),
            backoff: BackoffConfig::default(),
            error_threshold: 3,
            profile: TrainerProfile::default(),
        }
    }
}

impl TelemetryConfig {
    /// Check the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("scan_timeout", self.scan_timeout),
            ("connect_timeout", self.connect_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("watchdog_interval", self.watchdog_interval),
            ("disconnect_timeout", self.disconnect_timeout),
            ("backoff.initial", self.backoff.initial),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::invalid(name, "0ms"));
            }
        }

        if !self.backoff.multiplier.is_finite() || self.backoff.multiplier < 1.0 {
            return Err(Error::invalid("backoff.multiplier", self.backoff.multiplier));
        }

        if self.backoff.cap < self.backoff.initial {
            return Err(Error::invalid(
                "backoff.cap",
                format!("{:?} < initial {:?}", self.backoff.cap, self.backoff.initial),
            ));
        }

        if self.error_threshold == 0 {
            return Err(Error::invalid("error_threshold", 0));
        }

        self.profile.validate()
    }
}

#[cfg(feature = "serde")]
impl TelemetryConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config {
            reason: e.to_string(),
        })
    }
}

#[cfg(feature = "serde")]
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
