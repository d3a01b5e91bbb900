//! Process-wide Bluetooth adapter handle.
//!
//! Initialised once when the engine starts and torn down on shutdown. The
//! locator and the links it produces borrow clones of the adapter but never
//! own its lifecycle.

use btleplug::api::{Central, Manager as _};
use btleplug::platform::{Adapter, Manager};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Shared handle to the host's Bluetooth adapter.
#[derive(Clone)]
pub struct RadioAdapter {
    adapter: Adapter,
}

impl RadioAdapter {
    /// Open the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns `BluetoothUnavailable` if no adapter can be opened.
    pub async fn init() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Release the adapter: stop any scan still running.
    pub async fn shutdown(&self) -> Result<()> {
        debug!("Releasing Bluetooth adapter");
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }
}

impl std::fmt::Debug for RadioAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioAdapter").finish_non_exhaustive()
    }
}
