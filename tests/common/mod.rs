//! Scripted stand-ins for the radio, shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kickr_gears::ble::LinkEventStream;
use kickr_gears::{
    Advertisement, ConnectionState, DeviceHandle, DeviceLocator, Error, LinkEvent, Result,
    TelemetrySink, TelemetryUpdate, TrainerLink,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Counts links across every fake device a test creates.
#[derive(Debug, Default)]
pub struct LinkCounters {
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl LinkCounters {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// A link whose events come from a test-held channel.
pub struct FakeLink {
    counters: Arc<LinkCounters>,
    characteristics: Vec<Uuid>,
    events: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    connected: AtomicBool,
}

#[async_trait]
impl TrainerLink for FakeLink {
    fn identifier(&self) -> String {
        "fake".to_string()
    }

    async fn connect(&self) -> Result<()> {
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(open, Ordering::SeqCst);
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_characteristics(&self) -> Result<Vec<Uuid>> {
        Ok(self.characteristics.clone())
    }

    async fn subscribe(&self, _characteristic: Uuid) -> Result<()> {
        Ok(())
    }

    async fn events(&self) -> Result<LinkEventStream> {
        let rx = self.events.lock().take().ok_or_else(|| Error::ConnectFailed {
            reason: "event stream already taken".to_string(),
        })?;
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Create a fake trainer exposing `characteristics`. Events sent on the
/// returned sender arrive on the link; dropping it ends the stream.
pub fn fake_device(
    counters: &Arc<LinkCounters>,
    characteristics: Vec<Uuid>,
) -> (DeviceHandle<FakeLink>, mpsc::UnboundedSender<LinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let link = FakeLink {
        counters: counters.clone(),
        characteristics,
        events: Mutex::new(Some(rx)),
        connected: AtomicBool::new(false),
    };
    let advertisement = Advertisement {
        identifier: "fake".to_string(),
        local_name: Some("KICKR BIKE FAKE".to_string()),
        ..Default::default()
    };
    (DeviceHandle::new(link, advertisement), tx)
}

/// Hands out scripted devices in order; `None` entries and an empty script
/// behave like a scan that finds nothing.
#[derive(Default)]
pub struct ScriptedLocator {
    script: Mutex<VecDeque<Option<DeviceHandle<FakeLink>>>>,
    pub finds: AtomicUsize,
}

impl ScriptedLocator {
    pub fn new(script: Vec<Option<DeviceHandle<FakeLink>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            finds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DeviceLocator for ScriptedLocator {
    type Link = FakeLink;

    async fn find(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<DeviceHandle<FakeLink>> {
        self.finds.fetch_add(1, Ordering::SeqCst);

        let next = self.script.lock().pop_front().flatten();
        if let Some(handle) = next {
            return Ok(handle);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(timeout) => Err(Error::DeviceNotFound { timeout }),
        }
    }
}

/// Sink that keeps every update with the time it arrived.
#[derive(Clone, Default)]
pub struct RecordingSink {
    updates: Arc<Mutex<Vec<(Instant, TelemetryUpdate)>>>,
}

impl RecordingSink {
    pub fn updates(&self) -> Vec<TelemetryUpdate> {
        self.updates.lock().iter().map(|(_, u)| u.clone()).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, TelemetryUpdate)> {
        self.updates.lock().clone()
    }

    /// Status-only updates, in order.
    pub fn statuses(&self) -> Vec<ConnectionState> {
        self.updates
            .lock()
            .iter()
            .filter(|(_, u)| u.sample.is_none())
            .map(|(_, u)| u.status)
            .collect()
    }

    /// Updates carrying a sample, in order.
    pub fn samples(&self) -> Vec<TelemetryUpdate> {
        self.updates
            .lock()
            .iter()
            .filter(|(_, u)| u.sample.is_some())
            .map(|(_, u)| u.clone())
            .collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn publish(&self, update: TelemetryUpdate) {
        self.updates.lock().push((Instant::now(), update));
    }
}

/// Poll `condition` until it holds, failing the test after a minute of
/// (usually paused) time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(60), wait).await.is_err() {
        panic!("condition not reached");
    }
}
