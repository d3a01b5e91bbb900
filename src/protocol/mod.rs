//! Protocol module for decoding trainer notifications.
//!
//! This module contains the implementations for:
//! - Payload format dispatch and decoded frames
//! - The flagged telemetry layout and its builder
//! - Wahoo vendor gear and grade frames

pub mod flagged;
pub mod telemetry;
pub mod wahoo;

pub use flagged::{FieldLayout, FlaggedPayloadBuilder};
pub use telemetry::{decode, GearReading, PayloadFormat, TelemetryFrame};
