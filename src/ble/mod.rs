//! BLE communication module.
//!
//! Low-level Bluetooth Low Energy plumbing: the adapter handle, advertisement
//! matching, the locator and the per-device link.

pub mod adapter;
pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod uuids;

pub use adapter::RadioAdapter;
pub use advertising::{Advertisement, DeviceFilter, MatchReason};
pub use characteristics::{resolve_channels, CharacteristicCache, NotificationEvent};
pub use connection::{BtleLink, DeviceHandle, LinkEvent, LinkEventStream, TrainerLink};
pub use scanner::{BleLocator, DeviceLocator, DiscoveredPeripheral};
pub use uuids::*;
