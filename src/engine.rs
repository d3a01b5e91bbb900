//! Telemetry engine.
//!
//! The entry point for applications: opens the Bluetooth adapter, runs the
//! reconnection supervisor on a background task and exposes the newest
//! [`TelemetryUpdate`] to the overlay.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::adapter::RadioAdapter;
use crate::ble::scanner::{BleLocator, DeviceLocator};
use crate::config::TelemetryConfig;
use crate::data::TelemetryUpdate;
use crate::error::Result;
use crate::sink::WatchSink;
use crate::supervisor::{Supervisor, SupervisorState};

/// Handle for a registered callback.
///
/// The callback stays registered until the handle is dropped or
/// [`unregister`](Self::unregister) is called.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Running telemetry pipeline for one trainer.
pub struct TelemetryEngine {
    /// Cancels the supervisor.
    shutdown: CancellationToken,
    /// Supervisor task.
    task: Mutex<Option<JoinHandle<()>>>,
    /// Newest update.
    updates: watch::Receiver<TelemetryUpdate>,
    /// Supervisor phase.
    state: watch::Receiver<SupervisorState>,
    /// Adapter opened by [`start`](Self::start), released on shutdown.
    adapter: Option<RadioAdapter>,
    /// How long shutdown waits for the supervisor to release the link.
    shutdown_grace: Duration,
    /// Callback ID counter.
    callback_counter: AtomicU64,
}

impl TelemetryEngine {
    /// Open the first Bluetooth adapter and start looking for the trainer.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or Bluetooth is not
    /// available.
    pub async fn start(config: TelemetryConfig) -> Result<Self> {
        config.validate()?;

        let adapter = RadioAdapter::init().await?;
        let locator = BleLocator::new(adapter.clone(), &config.profile);

        Ok(Self::spawn(locator, config, Some(adapter)))
    }

    /// Start with a caller-supplied locator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn start_with_locator<D: DeviceLocator>(locator: D, config: TelemetryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::spawn(locator, config, None))
    }

    fn spawn<D: DeviceLocator>(
        locator: D,
        config: TelemetryConfig,
        adapter: Option<RadioAdapter>,
    ) -> Self {
        info!("Starting telemetry engine");

        let shutdown_grace = config.disconnect_timeout + Duration::from_secs(1);
        let (sink, updates) = WatchSink::new();
        let supervisor = Supervisor::new(locator, sink, config);
        let state = supervisor.subscribe_state();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(shutdown.clone()));

        Self {
            shutdown,
            task: Mutex::new(Some(task)),
            updates,
            state,
            adapter,
            shutdown_grace,
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Subscribe to updates. Only the newest update is kept.
    pub fn subscribe(&self) -> watch::Receiver<TelemetryUpdate> {
        self.updates.clone()
    }

    /// The newest update.
    pub fn latest(&self) -> TelemetryUpdate {
        self.updates.borrow().clone()
    }

    /// Current supervisor phase.
    pub fn supervisor_state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Register a callback for updates.
    ///
    /// Runs on its own task; intermediate updates may be skipped if the
    /// callback is slow.
    pub fn on_update<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&TelemetryUpdate) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.updates.clone();

        let handle = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let update = rx.borrow_and_update().clone();
                callback(&update);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Check if the supervisor is still running.
    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
            && self
                .task
                .lock()
                .as_ref()
                .map(|task| !task.is_finished())
                .unwrap_or(false)
    }

    /// Stop the supervisor, release any open link and the adapter.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down telemetry engine");

        self.shutdown.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            match tokio::time::timeout(self.shutdown_grace, task).await {
                Ok(Ok(())) => debug!("Supervisor task joined"),
                Ok(Err(e)) => warn!("Supervisor task failed: {}", e),
                Err(_) => warn!(
                    "Supervisor did not stop within {:?}",
                    self.shutdown_grace
                ),
            }
        }

        if let Some(adapter) = &self.adapter {
            adapter.shutdown().await?;
        }

        Ok(())
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::connection::{DeviceHandle, MockTrainerLink};
    use crate::data::ConnectionState;
    use crate::error::Error;
    use async_trait::async_trait;

    struct NeverFound;

    #[async_trait]
    impl DeviceLocator for NeverFound {
        type Link = MockTrainerLink;

        async fn find(
            &self,
            timeout: Duration,
            cancel: &CancellationToken,
        ) -> Result<DeviceHandle<MockTrainerLink>> {
            tokio::select! {
                _ = cancel.cancelled() => Err(Error::Cancelled),
                _ = tokio::time::sleep(timeout) => Err(Error::DeviceNotFound { timeout }),
            }
        }
    }

    #[test]
    fn test_callback_handle_unregisters_once() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = CallbackHandle::new(7, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handle.id(), 7);

        handle.unregister();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let config = TelemetryConfig {
            error_threshold: 0,
            ..Default::default()
        };
        assert!(matches!(
            TelemetryEngine::start_with_locator(NeverFound, config),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_searching() {
        let engine =
            TelemetryEngine::start_with_locator(NeverFound, TelemetryConfig::default()).unwrap();
        tokio::task::yield_now().await;

        assert!(engine.is_running());
        assert_eq!(engine.supervisor_state(), SupervisorState::Searching);
        assert_eq!(engine.latest().status, ConnectionState::Searching);

        engine.shutdown().await.unwrap();
        assert!(!engine.is_running());
        assert_eq!(engine.latest().status, ConnectionState::Disconnected);
        assert!(engine.latest().is_stopped());
        assert_eq!(engine.latest().status_text(), "Disconnected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_update_sees_backoff() {
        let engine =
            TelemetryEngine::start_with_locator(NeverFound, TelemetryConfig::default()).unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _handle = engine.on_update(move |update| {
            let _ = tx.send(update.status);
        });

        let mut seen = Vec::new();
        while let Some(status) = rx.recv().await {
            seen.push(status);
            if status == ConnectionState::Disconnected {
                break;
            }
        }
        assert_eq!(seen.last(), Some(&ConnectionState::Disconnected));

        engine.shutdown().await.unwrap();
    }
}
