//! BLE scanning functionality.
//!
//! Provides the locator that finds a trainer by advertisement.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::ble::adapter::RadioAdapter;
use crate::ble::advertising::{Advertisement, DeviceFilter};
use crate::ble::connection::{BtleLink, DeviceHandle, TrainerLink};
use crate::config::TrainerProfile;
use crate::error::{Error, Result};

/// Finds one trainer and hands back a link to it.
#[async_trait]
pub trait DeviceLocator: Send + Sync + 'static {
    /// Link type produced for a found device.
    type Link: TrainerLink;

    /// Search until a matching device advertises, `timeout` elapses or
    /// `cancel` fires. Any platform scan started here is stopped before
    /// returning.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` on timeout, `Cancelled` on cancellation, or a
    /// Bluetooth error if the scan could not start.
    async fn find(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeviceHandle<Self::Link>>;
}

/// A peripheral seen during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripheral {
    /// The peripheral handle.
    pub peripheral: Peripheral,
    /// What it advertised.
    pub advertisement: Advertisement,
}

/// [`DeviceLocator`] over the host Bluetooth adapter.
pub struct BleLocator {
    adapter: RadioAdapter,
    filter: DeviceFilter,
}

impl BleLocator {
    /// Create a locator for trainers matching `profile`.
    pub fn new(adapter: RadioAdapter, profile: &TrainerProfile) -> Self {
        Self {
            adapter,
            filter: DeviceFilter::from_profile(profile),
        }
    }

    /// The filter applied to advertisements.
    pub fn filter(&self) -> &DeviceFilter {
        &self.filter
    }

    /// Scan for `duration` and return everything that advertised, matching
    /// or not, strongest signal first.
    pub async fn survey(&self, duration: Duration) -> Result<Vec<Advertisement>> {
        let mut seen: HashMap<String, Advertisement> = HashMap::new();
        let (cached, live) = self.advertisements().await?;
        let mut advertisements = cached.chain(live);

        let collect = async {
            while let Some(found) = advertisements.next().await {
                seen.insert(
                    found.advertisement.identifier.clone(),
                    found.advertisement,
                );
            }
        };
        let _ = tokio::time::timeout(duration, collect).await;
        self.stop_scan().await;

        let mut all: Vec<Advertisement> = seen.into_values().collect();
        all.sort_by_key(|a| std::cmp::Reverse(a.rssi.unwrap_or(i16::MIN)));
        Ok(all)
    }

    /// Start the platform scan. Returns the peripherals the adapter already
    /// knew about and the stream of ones reported from now on.
    async fn advertisements(
        &self,
    ) -> Result<(
        BoxStream<'static, DiscoveredPeripheral>,
        BoxStream<'static, DiscoveredPeripheral>,
    )> {
        let adapter = self.adapter.adapter().clone();

        // Subscribe before scanning so no discovery is missed.
        let events = adapter.events().await.map_err(Error::Bluetooth)?;

        // Unfiltered: trainers that advertise only a name must still reach
        // the device filter.
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;
        debug!("Platform scan started");

        let known = adapter.peripherals().await.map_err(Error::Bluetooth)?;
        let known_ids = stream::iter(known.into_iter().map(|p| p.id()));

        let event_ids = events.filter_map(|event| async move {
            match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => Some(id),
                CentralEvent::ServicesAdvertisement { id, .. } => Some(id),
                CentralEvent::DeviceDisconnected(id) => {
                    trace!("Device disconnected during scan: {:?}", id);
                    None
                }
                _ => None,
            }
        });

        let cached = {
            let adapter = adapter.clone();
            known_ids
                .filter_map(move |id| {
                    let adapter = adapter.clone();
                    async move { Self::describe(&adapter, id).await }
                })
                .boxed()
        };
        let live = event_ids
            .filter_map(move |id| {
                let adapter = adapter.clone();
                async move { Self::describe(&adapter, id).await }
            })
            .boxed();

        Ok((cached, live))
    }

    /// Look up a peripheral's current advertisement.
    async fn describe(adapter: &Adapter, id: PeripheralId) -> Option<DiscoveredPeripheral> {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return None,
        };

        Some(DiscoveredPeripheral {
            advertisement: advertisement_from_properties(id.to_string(), properties),
            peripheral,
        })
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.adapter().stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        } else {
            debug!("Platform scan stopped");
        }
    }
}

#[async_trait]
impl DeviceLocator for BleLocator {
    type Link = BtleLink;

    async fn find(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeviceHandle<BtleLink>> {
        info!("Scanning for trainer (timeout {:?})", timeout);

        let (cached, live) = self.advertisements().await?;
        let search = first_match(cached, live, &self.filter);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, search) => match result {
                Ok(Some(found)) => Ok(found),
                Ok(None) | Err(_) => Err(Error::DeviceNotFound { timeout }),
            },
        };

        self.stop_scan().await;

        let found = outcome?;
        Ok(DeviceHandle::new(
            BtleLink::new(self.adapter.adapter().clone(), found.peripheral),
            found.advertisement,
        ))
    }
}

impl AsRef<Advertisement> for DiscoveredPeripheral {
    fn as_ref(&self) -> &Advertisement {
        &self.advertisement
    }
}

/// First candidate the filter accepts, in arrival order.
///
/// Cached peripherals count only while the adapter holds a signal reading
/// for them. A trainer seen earlier and since switched off has none.
async fn first_match<T, C, L>(cached: C, live: L, filter: &DeviceFilter) -> Option<T>
where
    T: AsRef<Advertisement>,
    C: Stream<Item = T>,
    L: Stream<Item = T>,
{
    let cached = cached.filter(|found| {
        let advertisement = found.as_ref();
        if advertisement.rssi.is_none() {
            trace!("Skipping stale {}", advertisement.display_name());
        }
        future::ready(advertisement.rssi.is_some())
    });
    let candidates = cached.chain(live);
    futures::pin_mut!(candidates);

    while let Some(found) = candidates.next().await {
        let advertisement = found.as_ref();
        match filter.check(advertisement) {
            Some(reason) => {
                info!(
                    "Found trainer {} ({:?} match, rssi {:?})",
                    advertisement.display_name(),
                    reason,
                    advertisement.rssi
                );
                return Some(found);
            }
            None => trace!("Ignoring {}", advertisement.display_name()),
        }
    }
    None
}

fn advertisement_from_properties(identifier: String, properties: PeripheralProperties) -> Advertisement {
    Advertisement {
        identifier,
        local_name: properties.local_name,
        services: properties.services,
        rssi: properties.rssi,
    }
}
