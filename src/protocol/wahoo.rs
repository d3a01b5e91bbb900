//! Wahoo vendor characteristic frames.
//!
//! Gear characteristic (`a026e03a-...`):
//! - Bytes 0-1: header (ignored)
//! - Byte 2: front chainring index (0-based)
//! - Byte 3: rear cog index (0-based)
//!
//! Grade characteristic (`a026e037-...`), opcode-tagged frames:
//! - `FD 34 lo hi`: grade, i16 little-endian, hundredths of a percent
//! - `FD 33 s`: lock status, `s == 0x01` means locked
//!
//! Other opcodes on the grade characteristic are ignored.

use crate::data::{Gear, Grade};
use crate::error::{Error, Result};
use crate::protocol::telemetry::{GearReading, TelemetryFrame};

/// Leading byte of every frame on the grade characteristic.
pub const FRAME_MARKER: u8 = 0xFD;
/// Opcode of a grade frame.
pub const OPCODE_GRADE: u8 = 0x34;
/// Opcode of a lock status frame.
pub const OPCODE_LOCK: u8 = 0x33;

const GEAR_FRAME_SIZE: usize = 4;
const GRADE_FRAME_SIZE: usize = 4;
const LOCK_FRAME_SIZE: usize = 3;
const INDEX_NOT_REPORTED: u8 = 0xFF;

/// Decode a frame from the gear characteristic.
pub fn decode_gear(payload: &[u8]) -> Result<TelemetryFrame> {
    if payload.len() < GEAR_FRAME_SIZE {
        return Err(Error::malformed(format!(
            "gear frame too short: {} bytes (need at least {})",
            payload.len(),
            GEAR_FRAME_SIZE
        )));
    }

    let (front, rear) = (payload[2], payload[3]);
    let gear = if front == INDEX_NOT_REPORTED || rear == INDEX_NOT_REPORTED {
        GearReading::NotReported
    } else {
        GearReading::Reported(Gear::Split {
            front: front + 1,
            rear: rear + 1,
        })
    };

    Ok(TelemetryFrame {
        gear,
        ..Default::default()
    })
}

/// Decode a frame from the grade characteristic.
pub fn decode_grade(payload: &[u8]) -> Result<TelemetryFrame> {
    match payload {
        [FRAME_MARKER, OPCODE_GRADE, rest @ ..] => {
            if payload.len() < GRADE_FRAME_SIZE {
                return Err(Error::malformed(format!(
                    "grade frame too short: {} bytes (need {})",
                    payload.len(),
                    GRADE_FRAME_SIZE
                )));
            }
            let hundredths = i16::from_le_bytes([rest[0], rest[1]]);
            Ok(TelemetryFrame {
                grade: Some(Grade::from_hundredths(hundredths)),
                ..Default::default()
            })
        }
        [FRAME_MARKER, OPCODE_LOCK, rest @ ..] => {
            if payload.len() < LOCK_FRAME_SIZE {
                return Err(Error::malformed(format!(
                    "lock frame too short: {} bytes (need {})",
                    payload.len(),
                    LOCK_FRAME_SIZE
                )));
            }
            Ok(TelemetryFrame {
                locked: Some(rest[0] == 0x01),
                ..Default::default()
            })
        }
        _ => Ok(TelemetryFrame::default()),
    }
}
