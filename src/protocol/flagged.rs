//! Flagged telemetry payloads.
//!
//! Layout, all fields little-endian:
//! - Bytes 0-1: Flags (u16) selecting which fields follow
//! - Speed (u16, 0.01 km/h) if [`FLAG_SPEED`]
//! - Cadence (u16, 0.5 rpm) if [`FLAG_CADENCE`]
//! - Grade (i16, 0.01 %) if [`FLAG_GRADE`]
//! - Front index (u8), rear index (u8), 0-based, `0xFF` = not reported,
//!   if [`FLAG_SPLIT_GEAR`]
//! - Gear number (u8), 1-based, `0x00`/`0xFF` = not reported,
//!   if [`FLAG_COMBINED_GEAR`]
//!
//! Fields appear in the order above. A payload must be exactly as long as its
//! flags imply.

use bytes::{Buf, BufMut};

use crate::data::{Gear, Grade};
use crate::error::{Error, Result};
use crate::protocol::telemetry::{GearReading, TelemetryFrame};

/// Speed field present.
pub const FLAG_SPEED: u16 = 0x0001;
/// Cadence field present.
pub const FLAG_CADENCE: u16 = 0x0002;
/// Grade field present.
pub const FLAG_GRADE: u16 = 0x0004;
/// Split front/rear gear field present.
pub const FLAG_SPLIT_GEAR: u16 = 0x0008;
/// Combined gear number field present.
pub const FLAG_COMBINED_GEAR: u16 = 0x0010;

const FLAGS_SIZE: usize = 2;
const GEAR_NOT_REPORTED: u8 = 0xFF;

/// A field in the flagged layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Speed,
    Cadence,
    Grade,
    SplitGear,
    CombinedGear,
}

impl Field {
    /// All fields, in wire order.
    const ALL: [Field; 5] = [
        Field::Speed,
        Field::Cadence,
        Field::Grade,
        Field::SplitGear,
        Field::CombinedGear,
    ];

    fn flag(self) -> u16 {
        match self {
            Field::Speed => FLAG_SPEED,
            Field::Cadence => FLAG_CADENCE,
            Field::Grade => FLAG_GRADE,
            Field::SplitGear => FLAG_SPLIT_GEAR,
            Field::CombinedGear => FLAG_COMBINED_GEAR,
        }
    }

    fn width(self) -> usize {
        match self {
            Field::Speed | Field::Cadence | Field::Grade | Field::SplitGear => 2,
            Field::CombinedGear => 1,
        }
    }
}

/// Field layout selected by a flags word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    flags: u16,
    fields: Vec<Field>,
}

impl FieldLayout {
    const KNOWN_FLAGS: u16 =
        FLAG_SPEED | FLAG_CADENCE | FLAG_GRADE | FLAG_SPLIT_GEAR | FLAG_COMBINED_GEAR;

    /// Resolve the layout for a flags word.
    ///
    /// # Errors
    ///
    /// Fails with `MalformedPayload` for reserved bits or when both gear
    /// encodings are flagged at once.
    pub fn for_flags(flags: u16) -> Result<Self> {
        let reserved = flags & !Self::KNOWN_FLAGS;
        if reserved != 0 {
            return Err(Error::malformed(format!(
                "reserved flag bits set: {:#06x}",
                reserved
            )));
        }

        if flags & FLAG_SPLIT_GEAR != 0 && flags & FLAG_COMBINED_GEAR != 0 {
            return Err(Error::malformed(format!(
                "conflicting gear encodings in flags {:#06x}",
                flags
            )));
        }

        let fields = Field::ALL
            .iter()
            .copied()
            .filter(|field| flags & field.flag() != 0)
            .collect();

        Ok(Self { flags, fields })
    }

    /// The flags word this layout was built from.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Total payload length, including the flags word.
    pub fn payload_len(&self) -> usize {
        FLAGS_SIZE + self.fields.iter().map(|f| f.width()).sum::<usize>()
    }
}

/// Decode a flagged telemetry payload.
pub fn decode(payload: &[u8]) -> Result<TelemetryFrame> {
    if payload.len() < FLAGS_SIZE {
        return Err(Error::malformed(format!(
            "flagged payload too short: {} bytes (need at least {})",
            payload.len(),
            FLAGS_SIZE
        )));
    }

    let mut buf = payload;
    let layout = FieldLayout::for_flags(buf.get_u16_le())?;

    if payload.len() != layout.payload_len() {
        return Err(Error::malformed(format!(
            "flags {:#06x} imply {} bytes, got {}",
            layout.flags,
            layout.payload_len(),
            payload.len()
        )));
    }

    let mut frame = TelemetryFrame::default();
    for field in &layout.fields {
        match field {
            Field::Speed => frame.speed_kmh = Some(f64::from(buf.get_u16_le()) / 100.0),
            Field::Cadence => frame.cadence_rpm = Some(f64::from(buf.get_u16_le()) / 2.0),
            Field::Grade => frame.grade = Some(Grade::from_hundredths(buf.get_i16_le())),
            Field::SplitGear => {
                let front = buf.get_u8();
                let rear = buf.get_u8();
                frame.gear = if front == GEAR_NOT_REPORTED || rear == GEAR_NOT_REPORTED {
                    GearReading::NotReported
                } else {
                    GearReading::Reported(Gear::Split {
                        front: front + 1,
                        rear: rear + 1,
                    })
                };
            }
            Field::CombinedGear => {
                frame.gear = match buf.get_u8() {
                    0 | GEAR_NOT_REPORTED => GearReading::NotReported,
                    number => GearReading::Reported(Gear::Combined(number)),
                };
            }
        }
    }

    Ok(frame)
}

#[derive(Debug, Clone, Copy)]
enum GearField {
    Split(Option<(u8, u8)>),
    Combined(Option<u8>),
}

/// Builder for flagged telemetry payloads.
///
/// Used by simulators and tests to produce notifications a trainer would send.
///
/// # Example
///
/// ```
/// use kickr_gears::data::{Gear, Grade};
/// use kickr_gears::protocol::{decode, FlaggedPayloadBuilder, PayloadFormat};
///
/// let payload = FlaggedPayloadBuilder::new()
///     .grade(Grade::from_hundredths(320))
///     .gear(Gear::Combined(5))
///     .build();
///
/// let frame = decode(PayloadFormat::Flagged, &payload).unwrap();
/// assert_eq!(frame.gear.gear(), Some(Gear::Combined(5)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FlaggedPayloadBuilder {
    speed: Option<u16>,
    cadence: Option<u16>,
    grade: Option<Grade>,
    gear: Option<GearField>,
}

impl FlaggedPayloadBuilder {
    /// Create an empty builder (flags only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set speed in km/h (0.01 km/h resolution).
    pub fn speed_kmh(mut self, kmh: f64) -> Self {
        self.speed = Some((kmh * 100.0).round().clamp(0.0, f64::from(u16::MAX)) as u16);
        self
    }

    /// Set cadence in rpm (0.5 rpm resolution).
    pub fn cadence_rpm(mut self, rpm: f64) -> Self {
        self.cadence = Some((rpm * 2.0).round().clamp(0.0, f64::from(u16::MAX)) as u16);
        self
    }

    /// Set road grade.
    pub fn grade(mut self, grade: Grade) -> Self {
        self.grade = Some(grade);
        self
    }

    /// Set the gear, choosing the split or combined encoding to match.
    pub fn gear(mut self, gear: Gear) -> Self {
        self.gear = Some(match gear {
            Gear::Combined(number) => GearField::Combined(Some(number)),
            Gear::Split { front, rear } => {
                GearField::Split(Some((front.saturating_sub(1), rear.saturating_sub(1))))
            }
        });
        self
    }

    /// Include a split gear field holding the "not reported" sentinel.
    pub fn split_gear_not_reported(mut self) -> Self {
        self.gear = Some(GearField::Split(None));
        self
    }

    /// Include a combined gear field holding the "not reported" sentinel.
    pub fn combined_gear_not_reported(mut self) -> Self {
        self.gear = Some(GearField::Combined(None));
        self
    }

    /// Encode the payload.
    pub fn build(&self) -> Vec<u8> {
        let mut flags = 0u16;
        let mut body = Vec::with_capacity(8);

        if let Some(speed) = self.speed {
            flags |= FLAG_SPEED;
            body.put_u16_le(speed);
        }
        if let Some(cadence) = self.cadence {
            flags |= FLAG_CADENCE;
            body.put_u16_le(cadence);
        }
        if let Some(grade) = self.grade {
            flags |= FLAG_GRADE;
            body.put_i16_le(grade.hundredths());
        }
        match self.gear {
            Some(GearField::Split(indices)) => {
                flags |= FLAG_SPLIT_GEAR;
                let (front, rear) = indices.unwrap_or((GEAR_NOT_REPORTED, GEAR_NOT_REPORTED));
                body.put_u8(front);
                body.put_u8(rear);
            }
            Some(GearField::Combined(number)) => {
                flags |= FLAG_COMBINED_GEAR;
                body.put_u8(number.unwrap_or(GEAR_NOT_REPORTED));
            }
            None => {}
        }

        let mut payload = Vec::with_capacity(FLAGS_SIZE + body.len());
        payload.put_u16_le(flags);
        payload.extend_from_slice(&body);
        payload
    }
}
