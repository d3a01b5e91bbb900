//! BLE connection management.
//!
//! [`TrainerLink`] is the seam between the session and the radio: connect,
//! discover, subscribe, receive events, disconnect. [`BtleLink`] implements it
//! on top of btleplug.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::advertising::Advertisement;
use crate::ble::characteristics::{CharacteristicCache, NotificationEvent};
use crate::error::{Error, Result};

/// Something that happened on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A characteristic notification arrived.
    Notification(NotificationEvent),
    /// The radio stack reported the peripheral disconnected.
    Disconnected,
}

/// Stream of link events. The stream ending means the link is gone.
pub type LinkEventStream = BoxStream<'static, LinkEvent>;

/// One radio link to a trainer.
///
/// Implementations only perform the radio operation; timeouts, ordering and
/// release bookkeeping belong to the session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrainerLink: Send + Sync + 'static {
    /// Stable identifier of the peripheral, for logs.
    fn identifier(&self) -> String;

    /// Open the radio link.
    async fn connect(&self) -> Result<()>;

    /// Discover services and return every characteristic UUID found.
    async fn discover_characteristics(&self) -> Result<Vec<Uuid>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Open the event stream for notifications and disconnects.
    async fn events(&self) -> Result<LinkEventStream>;

    /// Close the radio link.
    async fn disconnect(&self) -> Result<()>;
}

/// A discovered trainer, ready to hand to a session.
///
/// Owned by exactly one session, which releases the link when it closes.
pub struct DeviceHandle<L> {
    link: L,
    advertisement: Advertisement,
}

impl<L: TrainerLink> DeviceHandle<L> {
    /// Wrap a link and the advertisement that found it.
    pub fn new(link: L, advertisement: Advertisement) -> Self {
        Self {
            link,
            advertisement,
        }
    }

    /// The advertisement that matched.
    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    /// Name for logs.
    pub fn display_name(&self) -> &str {
        self.advertisement.display_name()
    }

    pub(crate) fn into_parts(self) -> (L, Advertisement) {
        (self.link, self.advertisement)
    }
}

impl<L> std::fmt::Debug for DeviceHandle<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("advertisement", &self.advertisement)
            .finish_non_exhaustive()
    }
}

/// [`TrainerLink`] over a btleplug peripheral.
pub struct BtleLink {
    adapter: Adapter,
    peripheral: Peripheral,
    characteristics: CharacteristicCache,
    subscribed: Mutex<Vec<Uuid>>,
}

impl BtleLink {
    /// Create a link for a peripheral found on `adapter`.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            characteristics: CharacteristicCache::new(),
            subscribed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TrainerLink for BtleLink {
    fn identifier(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn connect(&self) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
            return Ok(());
        }

        self.peripheral.connect().await.map_err(Error::Bluetooth)?;
        info!("Connected to {}", self.identifier());
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<Vec<Uuid>> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)?;
        Ok(self.characteristics.refresh(&self.peripheral))
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let target = self.characteristics.notifiable(&characteristic)?;

        self.peripheral.subscribe(&target).await.map_err(|e| {
            debug!("Failed to subscribe to {}: {:?}", characteristic, e);
            Error::Bluetooth(e)
        })?;

        self.subscribed.lock().push(characteristic);
        debug!("Subscribed to notifications from {}", characteristic);
        Ok(())
    }

    async fn events(&self) -> Result<LinkEventStream> {
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?
            .map(|notification| {
                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );
                LinkEvent::Notification(NotificationEvent::new(
                    notification.uuid,
                    notification.value,
                ))
            })
            // The notification stream ends when the peripheral goes away.
            .chain(stream::once(async { LinkEvent::Disconnected }));

        let id = self.peripheral.id();
        let disconnects = self
            .adapter
            .events()
            .await
            .map_err(Error::Bluetooth)?
            .filter_map(move |event| {
                let lost = matches!(event, CentralEvent::DeviceDisconnected(ref other) if *other == id);
                async move { lost.then_some(LinkEvent::Disconnected) }
            });

        Ok(stream::select(notifications, disconnects).boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        let subscribed: Vec<Uuid> = std::mem::take(&mut *self.subscribed.lock());
        for uuid in subscribed {
            if let Some(characteristic) = self.characteristics.get(&uuid) {
                if let Err(e) = self.peripheral.unsubscribe(&characteristic).await {
                    debug!("Unsubscribe from {} failed: {}", uuid, e);
                }
            }
        }

        match self.peripheral.disconnect().await {
            Ok(()) => {
                info!("Disconnected from {}", self.identifier());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to disconnect: {}", e);
                Err(Error::Bluetooth(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_event_equality() {
        let event = LinkEvent::Notification(NotificationEvent::new(Uuid::nil(), vec![1, 2, 3]));
        assert_eq!(event.clone(), event);
        assert_ne!(event, LinkEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_device_handle_parts() {
        let mut link = MockTrainerLink::new();
        link.expect_identifier().return_const("mock-1".to_string());

        let handle = DeviceHandle::new(
            link,
            Advertisement {
                identifier: "mock-1".to_string(),
                local_name: Some("KICKR BIKE".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(handle.display_name(), "KICKR BIKE");

        let (link, advertisement) = handle.into_parts();
        assert_eq!(link.identifier(), advertisement.identifier);
    }
}
