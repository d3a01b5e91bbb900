// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # kickr-gears
//!
//! Live gear and road-grade telemetry from a Wahoo KICKR bike over Bluetooth
//! Low Energy, for display in an overlay on top of a cycling simulator.
//!
//! The crate finds the trainer, subscribes to its telemetry characteristics,
//! decodes each notification and keeps reconnecting for as long as it runs.
//! Rendering is left to the caller: it reads the newest [`TelemetryUpdate`]
//! (gear, grade and connection status) from the engine.
//!
//! ## Features
//!
//! - **Discovery**: Match the trainer by advertised service or name
//! - **Decoding**: Wahoo gear and grade frames, plus a flagged telemetry layout
//! - **Reconnection**: Backoff with a cap, notification-silence watchdog
//! - **Cancellation**: Shutdown interrupts any pending scan or wait and
//!   releases the link
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kickr_gears::{Result, TelemetryConfig, TelemetryEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = TelemetryEngine::start(TelemetryConfig::default()).await?;
//!     let mut updates = engine.subscribe();
//!
//!     while updates.changed().await.is_ok() {
//!         let update = updates.borrow_and_update().clone();
//!         match (update.gear(), update.grade()) {
//!             (Some(gear), Some(grade)) => println!("Gear {}  {}", gear, grade),
//!             _ => println!("{}", update.status_text()),
//!         }
//!     }
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization of data types and JSON configuration files

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod supervisor;
pub mod utils;

// Re-exports for convenience
pub use config::{BackoffConfig, TelemetryChannel, TelemetryConfig, TrainerProfile};
pub use engine::{CallbackHandle, TelemetryEngine};
pub use error::{Error, ErrorKind, Result};
pub use session::{Session, SessionState};
pub use sink::{CallbackSink, TelemetrySink, WatchSink};
pub use supervisor::{Backoff, Supervisor, SupervisorState};

// Re-export commonly used types from submodules
pub use ble::{Advertisement, DeviceHandle, DeviceLocator, LinkEvent, TrainerLink};
pub use data::{ConnectionState, Gear, Grade, TelemetrySample, TelemetryUpdate};
pub use protocol::{FlaggedPayloadBuilder, PayloadFormat};
