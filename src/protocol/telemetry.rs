//! Telemetry payload dispatch.
//!
//! Every subscribed characteristic is tagged with a [`PayloadFormat`]; the
//! session hands each notification to [`decode`] with that tag.

use crate::data::{Gear, Grade};
use crate::error::Result;
use crate::protocol::{flagged, wahoo};

/// Encoding used by a telemetry characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PayloadFormat {
    /// Flags word followed by optional speed/cadence/grade/gear fields.
    Flagged,
    /// Wahoo gear frames: `[hdr, hdr, front_index, rear_index]`.
    WahooGear,
    /// Wahoo grade/lock frames: `FD 34 lo hi` and `FD 33 s`.
    WahooGrade,
}

impl std::fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flagged => write!(f, "flagged telemetry"),
            Self::WahooGear => write!(f, "Wahoo gear"),
            Self::WahooGrade => write!(f, "Wahoo grade"),
        }
    }
}

/// State of the gear field in a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GearReading {
    /// The frame carries no gear field.
    #[default]
    Absent,
    /// The gear field is present but holds the "not reported" sentinel.
    NotReported,
    /// A gear value.
    Reported(Gear),
}

impl GearReading {
    /// The gear as an option, treating both absent and not-reported as `None`.
    pub fn gear(&self) -> Option<Gear> {
        match self {
            Self::Reported(gear) => Some(*gear),
            Self::Absent | Self::NotReported => None,
        }
    }
}

/// Fields decoded from a single notification.
///
/// Only the fields present in that notification are set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryFrame {
    /// Gear field.
    pub gear: GearReading,
    /// Road grade.
    pub grade: Option<Grade>,
    /// Lock flag.
    pub locked: Option<bool>,
    /// Speed in km/h.
    pub speed_kmh: Option<f64>,
    /// Cadence in rpm.
    pub cadence_rpm: Option<f64>,
}

impl TelemetryFrame {
    /// Check if the frame carries no telemetry at all.
    pub fn is_empty(&self) -> bool {
        self.gear == GearReading::Absent
            && self.grade.is_none()
            && self.locked.is_none()
            && self.speed_kmh.is_none()
            && self.cadence_rpm.is_none()
    }
}

/// Decode a raw notification payload.
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`](crate::Error::MalformedPayload) when the
/// length or flag bits are inconsistent with `format`.
pub fn decode(format: PayloadFormat, payload: &[u8]) -> Result<TelemetryFrame> {
    match format {
        PayloadFormat::Flagged => flagged::decode(payload),
        PayloadFormat::WahooGear => wahoo::decode_gear(payload),
        PayloadFormat::WahooGrade => wahoo::decode_grade(payload),
    }
}
