//! Data structures for trainer telemetry.
//!
//! This module contains the value types produced by the decoder and
//! consumed by the telemetry sink.

pub mod sample;
pub mod status;

pub use sample::{Gear, Grade, TelemetrySample};
pub use status::{ConnectionState, TelemetryUpdate};
