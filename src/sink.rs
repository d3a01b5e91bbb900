//! Telemetry sink.
//!
//! The supervisor pushes every status change and decoded sample into a
//! [`TelemetrySink`]. Publishing never blocks; a slow consumer only misses
//! intermediate updates.

use std::sync::Arc;
use tokio::sync::watch;

use crate::data::TelemetryUpdate;

/// Receiver of telemetry updates.
pub trait TelemetrySink: Send + Sync + 'static {
    /// Publish one update. Must return promptly.
    fn publish(&self, update: TelemetryUpdate);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for Arc<S> {
    fn publish(&self, update: TelemetryUpdate) {
        (**self).publish(update)
    }
}

/// Single-slot sink: holds only the newest update.
///
/// Readers subscribe with [`WatchSink::subscribe`] and see the latest value
/// whenever they get around to looking.
#[derive(Debug)]
pub struct WatchSink {
    tx: watch::Sender<TelemetryUpdate>,
}

impl WatchSink {
    /// Create a sink and its first receiver.
    pub fn new() -> (Self, watch::Receiver<TelemetryUpdate>) {
        let (tx, rx) = watch::channel(TelemetryUpdate::default());
        (Self { tx }, rx)
    }

    /// Get another receiver.
    pub fn subscribe(&self) -> watch::Receiver<TelemetryUpdate> {
        self.tx.subscribe()
    }

    /// The newest update.
    pub fn latest(&self) -> TelemetryUpdate {
        self.tx.borrow().clone()
    }
}

impl TelemetrySink for WatchSink {
    fn publish(&self, update: TelemetryUpdate) {
        self.tx.send_replace(update);
    }
}

/// Sink that calls a closure for every update, on the supervisor's task.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&TelemetryUpdate) + Send + Sync + 'static,
{
    /// Wrap a closure.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> TelemetrySink for CallbackSink<F>
where
    F: Fn(&TelemetryUpdate) + Send + Sync + 'static,
{
    fn publish(&self, update: TelemetryUpdate) {
        (self.callback)(&update)
    }
}
