//! GATT characteristic handling.
//!
//! Caches discovered characteristics for a peripheral and resolves the
//! profile's telemetry channels against what the device actually exposes.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _};
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::uuids::is_wahoo_characteristic;
use crate::config::TelemetryChannel;
use crate::error::{Error, Result};

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Vec<u8>,
}

impl NotificationEvent {
    /// Create a notification event.
    pub fn new(characteristic_uuid: Uuid, data: impl Into<Vec<u8>>) -> Self {
        Self {
            characteristic_uuid,
            data: data.into(),
        }
    }
}

/// Characteristics discovered on one peripheral, by UUID.
#[derive(Default)]
pub struct CharacteristicCache {
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl CharacteristicCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cache with the peripheral's current service table.
    ///
    /// Services must already have been discovered on the peripheral.
    pub fn refresh(&self, peripheral: &Peripheral) -> Vec<Uuid> {
        let mut chars = self.characteristics.write();
        chars.clear();

        for service in peripheral.services() {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}{}",
                    characteristic.uuid,
                    service.uuid,
                    if is_wahoo_characteristic(&characteristic.uuid) {
                        " (Wahoo)"
                    } else {
                        ""
                    }
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());

        chars.keys().copied().collect()
    }

    /// Get a characteristic by UUID.
    pub fn get(&self, uuid: &Uuid) -> Option<Characteristic> {
        self.characteristics.read().get(uuid).cloned()
    }

    /// Get a characteristic that supports notifications.
    pub fn notifiable(&self, uuid: &Uuid) -> Result<Characteristic> {
        let characteristic = self.get(uuid).ok_or_else(|| Error::CharacteristicNotFound {
            uuid: uuid.to_string(),
        })?;

        if !characteristic
            .properties
            .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            warn!(
                "Characteristic {} does not advertise notify ({:?})",
                uuid, characteristic.properties
            );
        }

        Ok(characteristic)
    }

    /// Number of cached characteristics.
    pub fn len(&self) -> usize {
        self.characteristics.read().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.characteristics.read().is_empty()
    }
}

/// Match the profile's channels against the discovered characteristics.
///
/// Optional channels the device lacks are skipped.
///
/// # Errors
///
/// Returns `CharacteristicNotFound` for the first missing required channel.
pub fn resolve_channels(
    channels: &[TelemetryChannel],
    discovered: &[Uuid],
) -> Result<Vec<TelemetryChannel>> {
    let mut resolved = Vec::with_capacity(channels.len());

    for channel in channels {
        if discovered.contains(&channel.characteristic) {
            resolved.push(channel.clone());
        } else if channel.required {
            return Err(Error::CharacteristicNotFound {
                uuid: channel.characteristic.to_string(),
            });
        } else {
            warn!(
                "Optional characteristic {} ({}) not present, skipping",
                channel.characteristic, channel.format
            );
        }
    }

    Ok(resolved)
}
