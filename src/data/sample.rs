//! Telemetry sample data structures.
//!
//! Contains the gear and grade value types and the merged sample the
//! session hands to the telemetry sink.

use chrono::{DateTime, Utc};

use crate::protocol::{GearReading, TelemetryFrame};
use crate::utils::{format_signed_tenths, round_half_even_div};

/// Currently selected gear on the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Gear {
    /// A single combined gear number (1-based).
    Combined(u8),
    /// Separate front chainring and rear cog positions (both 1-based).
    Split {
        /// Front chainring position.
        front: u8,
        /// Rear cog position.
        rear: u8,
    },
}

impl Gear {
    /// Front chainring position, if the trainer reports one.
    pub fn front(&self) -> Option<u8> {
        match self {
            Self::Combined(_) => None,
            Self::Split { front, .. } => Some(*front),
        }
    }

    /// Rear cog position, or the combined gear number.
    pub fn rear(&self) -> u8 {
        match self {
            Self::Combined(number) => *number,
            Self::Split { rear, .. } => *rear,
        }
    }
}

impl std::fmt::Display for Gear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Combined(number) => write!(f, "{}", number),
            Self::Split { front, rear } => write!(f, "F{} R{}", front, rear),
        }
    }
}

/// Road grade as a signed fixed-point value in hundredths of a percent.
///
/// `Grade::from_hundredths(320)` is +3.20%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Grade(i16);

impl Grade {
    /// Flat road.
    pub const FLAT: Self = Self(0);

    /// Create from a raw hundredths-of-a-percent value.
    pub fn from_hundredths(hundredths: i16) -> Self {
        Self(hundredths)
    }

    /// Create from tenths of a percent, saturating at the representable range.
    pub fn from_tenths(tenths: i16) -> Self {
        Self(tenths.saturating_mul(10))
    }

    /// The raw fixed-point value.
    pub fn hundredths(&self) -> i16 {
        self.0
    }

    /// Grade as a floating-point percentage at full resolution.
    pub fn percent(&self) -> f64 {
        f64::from(self.0) / 100.0
    }

    /// Grade in tenths of a percent, rounded half-to-even.
    pub fn rounded_tenths(&self) -> i32 {
        round_half_even_div(i32::from(self.0), 10)
    }

    /// Grade as a percentage rounded to one decimal place, half-to-even.
    ///
    /// # Example
    ///
    /// ```
    /// use kickr_gears::data::Grade;
    ///
    /// assert_eq!(Grade::from_hundredths(325).rounded_percent(), 3.2);
    /// assert_eq!(Grade::from_hundredths(335).rounded_percent(), 3.4);
    /// ```
    pub fn rounded_percent(&self) -> f64 {
        f64::from(self.rounded_tenths()) / 10.0
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", format_signed_tenths(self.rounded_tenths()))
    }
}

/// One decoded telemetry sample.
///
/// Gear and grade arrive on separate notifications on some trainers, so a
/// sample carries the newest known value of every field, not just the fields
/// in the notification that produced it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TelemetrySample {
    /// Current gear, `None` when the trainer has not reported one.
    pub gear: Option<Gear>,
    /// Current road grade, `None` until the first grade is seen.
    pub grade: Option<Grade>,
    /// Steering/grade lock flag, when reported.
    pub locked: Option<bool>,
    /// Instantaneous speed in km/h, when reported.
    pub speed_kmh: Option<f64>,
    /// Instantaneous cadence in rpm, when reported.
    pub cadence_rpm: Option<f64>,
    /// When the notification producing this sample was received.
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    /// Build a sample from a single frame with no prior state.
    pub fn from_frame(frame: &TelemetryFrame, timestamp: DateTime<Utc>) -> Self {
        Self::merge(None, frame, timestamp)
    }

    /// Apply `frame` on top of `previous`.
    ///
    /// Fields absent from the frame keep their previous value. A gear field
    /// that is present but marked "not reported" clears the gear.
    pub fn merge(
        previous: Option<&TelemetrySample>,
        frame: &TelemetryFrame,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let gear = match frame.gear {
            GearReading::Absent => previous.and_then(|p| p.gear),
            GearReading::NotReported => None,
            GearReading::Reported(gear) => Some(gear),
        };

        Self {
            gear,
            grade: frame.grade.or_else(|| previous.and_then(|p| p.grade)),
            locked: frame.locked.or_else(|| previous.and_then(|p| p.locked)),
            speed_kmh: frame.speed_kmh.or_else(|| previous.and_then(|p| p.speed_kmh)),
            cadence_rpm: frame
                .cadence_rpm
                .or_else(|| previous.and_then(|p| p.cadence_rpm)),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_gear_display() {
        assert_eq!(Gear::Combined(5).to_string(), "5");
        assert_eq!(Gear::Split { front: 2, rear: 7 }.to_string(), "F2 R7");
        assert_eq!(Gear::Split { front: 2, rear: 7 }.front(), Some(2));
        assert_eq!(Gear::Combined(5).front(), None);
    }

    #[test]
    fn test_grade_conversions() {
        let grade = Grade::from_hundredths(320);
        assert!((grade.percent() - 3.2).abs() < 1e-9);
        assert_eq!(grade.to_string(), "+3.2%");

        let grade = Grade::from_hundredths(-155);
        assert_eq!(grade.rounded_tenths(), -16);
        assert_eq!(grade.to_string(), "-1.6%");

        assert_eq!(Grade::from_tenths(33), Grade::from_hundredths(330));
        assert_eq!(Grade::FLAT.to_string(), "+0.0%");
    }

    #[test]
    fn test_grade_rounds_half_to_even() {
        assert_eq!(Grade::from_hundredths(25).rounded_tenths(), 2);
        assert_eq!(Grade::from_hundredths(35).rounded_tenths(), 4);
        assert_eq!(Grade::from_hundredths(-25).rounded_tenths(), -2);
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let now = Utc::now();
        let gear_frame = TelemetryFrame {
            gear: GearReading::Reported(Gear::Split { front: 1, rear: 4 }),
            ..Default::default()
        };
        let grade_frame = TelemetryFrame {
            grade: Some(Grade::from_hundredths(-150)),
            ..Default::default()
        };

        let first = TelemetrySample::from_frame(&gear_frame, now);
        let second = TelemetrySample::merge(Some(&first), &grade_frame, now);

        assert_eq!(second.gear, Some(Gear::Split { front: 1, rear: 4 }));
        assert_eq!(second.grade, Some(Grade::from_hundredths(-150)));
        assert_eq!(second.locked, None);
    }

    #[test]
    fn test_merge_not_reported_clears_gear() {
        let now = Utc::now();
        let first = TelemetrySample::from_frame(
            &TelemetryFrame {
                gear: GearReading::Reported(Gear::Combined(5)),
                ..Default::default()
            },
            now,
        );
        let cleared = TelemetrySample::merge(
            Some(&first),
            &TelemetryFrame {
                gear: GearReading::NotReported,
                ..Default::default()
            },
            now,
        );

        assert_eq!(cleared.gear, None);
    }
}
