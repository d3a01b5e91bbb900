//! One live connection to a trainer.
//!
//! A [`Session`] owns a [`DeviceHandle`] from the moment it is created until
//! [`Session::close`] releases the link. It walks
//! `Idle -> Connecting -> ServiceDiscovery -> Subscribed -> Streaming -> Closed`
//! and never goes back: a lost link means a new session.

use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::ble::advertising::Advertisement;
use crate::ble::characteristics::resolve_channels;
use crate::ble::connection::{DeviceHandle, LinkEvent, LinkEventStream, TrainerLink};
use crate::config::{TelemetryChannel, TelemetryConfig};
use crate::data::TelemetrySample;
use crate::error::{Error, Result};
use crate::protocol;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Created, not yet opened.
    #[default]
    Idle,
    /// Opening the radio link.
    Connecting,
    /// Enumerating characteristics.
    ServiceDiscovery,
    /// Notifications enabled, nothing received yet.
    Subscribed,
    /// At least one notification received.
    Streaming,
    /// Link lost or released. Terminal.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::ServiceDiscovery => write!(f, "ServiceDiscovery"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Streaming => write!(f, "Streaming"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A single connection to one trainer.
pub struct Session<L: TrainerLink> {
    link: L,
    advertisement: Advertisement,
    profile_channels: Vec<TelemetryChannel>,
    connect_timeout: Duration,
    discovery_timeout: Duration,
    watchdog_interval: Duration,
    disconnect_timeout: Duration,
    state: SessionState,
    channels: Vec<TelemetryChannel>,
    events: Option<LinkEventStream>,
    latest: Option<TelemetrySample>,
    released: bool,
}

impl<L: TrainerLink> Session<L> {
    /// Take ownership of a found device.
    pub fn new(handle: DeviceHandle<L>, config: &TelemetryConfig) -> Self {
        let (link, advertisement) = handle.into_parts();
        Self {
            link,
            advertisement,
            profile_channels: config.profile.channels.clone(),
            connect_timeout: config.connect_timeout,
            discovery_timeout: config.discovery_timeout,
            watchdog_interval: config.watchdog_interval,
            disconnect_timeout: config.disconnect_timeout,
            state: SessionState::Idle,
            channels: Vec::new(),
            events: None,
            latest: None,
            released: false,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The newest merged sample, if any notification has decoded.
    pub fn latest_sample(&self) -> Option<&TelemetrySample> {
        self.latest.as_ref()
    }

    /// The advertisement this session was created from.
    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    /// Channels that were subscribed.
    pub fn channels(&self) -> &[TelemetryChannel] {
        &self.channels
    }

    /// Connect, discover and subscribe.
    ///
    /// On success the session is `Subscribed`. On failure the link has
    /// already been released and the session is `Closed`.
    ///
    /// # Errors
    ///
    /// - `ConnectFailed` if connect or discovery is rejected or times out
    /// - `CharacteristicNotFound` if a required channel is missing
    /// - `Cancelled` if `cancel` fires first
    pub async fn open(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::ConnectFailed {
                reason: format!("session already {}", self.state),
            });
        }

        info!("Connecting to {}", self.advertisement.display_name());

        if let Err(e) = self.establish(cancel).await {
            warn!(
                "Failed to open session with {} during {}: {}",
                self.advertisement.display_name(),
                self.state,
                e
            );
            self.close().await;
            return Err(e);
        }

        info!(
            "Subscribed to {} channel(s) on {}",
            self.channels.len(),
            self.advertisement.display_name()
        );
        Ok(())
    }

    async fn establish(&mut self, cancel: &CancellationToken) -> Result<()> {
        let link = &self.link;

        self.state = SessionState::Connecting;
        let limit = self.connect_timeout;
        guarded(
            cancel,
            limit,
            async { link.connect().await.map_err(as_connect_failure) },
            || Error::ConnectFailed {
                reason: format!("connect timed out after {:?}", limit),
            },
        )
        .await?;

        self.state = SessionState::ServiceDiscovery;
        let limit = self.discovery_timeout;
        let discovered = guarded(
            cancel,
            limit,
            async {
                link.discover_characteristics()
                    .await
                    .map_err(as_connect_failure)
            },
            || Error::ConnectFailed {
                reason: format!("service discovery timed out after {:?}", limit),
            },
        )
        .await?;
        debug!("Discovered {} characteristic(s)", discovered.len());

        let channels = resolve_channels(&self.profile_channels, &discovered)?;

        // Open the event stream before enabling notifications so the first
        // frames are not lost.
        let events = link.events().await.map_err(as_connect_failure)?;

        let mut active = Vec::with_capacity(channels.len());
        for channel in channels {
            let subscribed = guarded(
                cancel,
                limit,
                async {
                    link.subscribe(channel.characteristic)
                        .await
                        .map_err(as_connect_failure)
                },
                || Error::ConnectFailed {
                    reason: format!("subscribe to {} timed out", channel.characteristic),
                },
            )
            .await;

            match subscribed {
                Ok(()) => {
                    debug!("Subscribed to {} ({})", channel.characteristic, channel.format);
                    active.push(channel);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if channel.required => return Err(e),
                Err(e) => warn!(
                    "Optional channel {} ({}) unavailable: {}",
                    channel.characteristic, channel.format, e
                ),
            }
        }

        self.channels = active;
        self.events = Some(events);
        self.state = SessionState::Subscribed;
        Ok(())
    }

    /// Wait for the next decoded sample.
    ///
    /// Malformed payloads are logged and dropped. Every notification,
    /// decodable or not, restarts the silence watchdog.
    ///
    /// # Errors
    ///
    /// - `LinkLost` on a disconnect event or watchdog expiry; the session is
    ///   then `Closed` but still needs [`close`](Self::close) to release it
    /// - `Cancelled` if `cancel` fires first
    pub async fn next_sample(&mut self, cancel: &CancellationToken) -> Result<TelemetrySample> {
        let Some(events) = self.events.as_mut() else {
            return Err(Error::LinkLost {
                reason: format!("session is {}", self.state),
            });
        };

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                event = tokio::time::timeout(self.watchdog_interval, events.next()) => event,
            };

            let notification = match event {
                Ok(Some(LinkEvent::Notification(notification))) => notification,
                Ok(Some(LinkEvent::Disconnected)) | Ok(None) => {
                    self.state = SessionState::Closed;
                    return Err(Error::LinkLost {
                        reason: "peripheral disconnected".to_string(),
                    });
                }
                Err(_) => {
                    self.state = SessionState::Closed;
                    return Err(Error::LinkLost {
                        reason: format!("no notification for {:?}", self.watchdog_interval),
                    });
                }
            };

            if self.state == SessionState::Subscribed {
                self.state = SessionState::Streaming;
            }

            let Some(channel) = self
                .channels
                .iter()
                .find(|c| c.characteristic == notification.characteristic_uuid)
            else {
                trace!(
                    "Ignoring notification from {}",
                    notification.characteristic_uuid
                );
                continue;
            };

            if notification.data.is_empty() {
                trace!("Empty {} notification", channel.format);
                continue;
            }

            match protocol::decode(channel.format, &notification.data) {
                Ok(frame) if frame.is_empty() => {
                    trace!(
                        "No telemetry in {} frame {:02X?}",
                        channel.format,
                        notification.data
                    );
                }
                Ok(frame) => {
                    let sample = TelemetrySample::merge(self.latest.as_ref(), &frame, Utc::now());
                    trace!("Sample: {:?}", sample);
                    self.latest = Some(sample.clone());
                    return Ok(sample);
                }
                Err(e) => {
                    warn!(
                        "Dropping {} payload {:02X?}: {}",
                        channel.format, notification.data, e
                    );
                }
            }
        }
    }

    /// Release the link. Safe to call any number of times; only the first
    /// call disconnects.
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        self.events = None;

        if self.released {
            trace!("Session already closed");
            return;
        }
        self.released = true;

        match tokio::time::timeout(self.disconnect_timeout, self.link.disconnect()).await {
            Ok(Ok(())) => debug!("Released {}", self.advertisement.display_name()),
            Ok(Err(e)) => warn!(
                "Error releasing {}: {}",
                self.advertisement.display_name(),
                e
            ),
            Err(_) => warn!(
                "Timed out releasing {} after {:?}",
                self.advertisement.display_name(),
                self.disconnect_timeout
            ),
        }
    }

    /// Check if the link has been released.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl<L: TrainerLink> Drop for Session<L> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Session for {} dropped without close",
                self.advertisement.display_name()
            );
        }
    }
}

impl<L: TrainerLink> std::fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("advertisement", &self.advertisement)
            .field("state", &self.state)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

/// Run `op` under a timeout, giving up early on cancellation.
async fn guarded<T>(
    cancel: &CancellationToken,
    limit: Duration,
    op: impl Future<Output = Result<T>>,
    on_timeout: impl FnOnce() -> Error,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(limit, op) => result.unwrap_or_else(|_| Err(on_timeout())),
    }
}

fn as_connect_failure(error: Error) -> Error {
    match error {
        Error::Cancelled | Error::ConnectFailed { .. } | Error::CharacteristicNotFound { .. } => {
            error
        }
        other => Error::ConnectFailed {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::characteristics::NotificationEvent;
    use crate::ble::connection::MockTrainerLink;
    use crate::ble::uuids::{WAHOO_GEAR_CHARACTERISTIC_UUID, WAHOO_GRADE_CHARACTERISTIC_UUID};
    use crate::data::{Gear, Grade};
    use futures::stream;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn gear_frame(front: u8, rear: u8) -> LinkEvent {
        LinkEvent::Notification(NotificationEvent::new(
            WAHOO_GEAR_CHARACTERISTIC_UUID,
            vec![0x00, 0x00, front, rear],
        ))
    }

    fn grade_frame(hundredths: i16) -> LinkEvent {
        let [lo, hi] = hundredths.to_le_bytes();
        LinkEvent::Notification(NotificationEvent::new(
            WAHOO_GRADE_CHARACTERISTIC_UUID,
            vec![0xFD, 0x34, lo, hi],
        ))
    }

    fn handle(link: MockTrainerLink) -> DeviceHandle<MockTrainerLink> {
        DeviceHandle::new(
            link,
            Advertisement {
                identifier: "mock".to_string(),
                local_name: Some("KICKR BIKE".to_string()),
                ..Default::default()
            },
        )
    }

    /// A link that connects, exposes both Wahoo characteristics and replays
    /// `events` once.
    fn streaming_link(events: Vec<LinkEvent>) -> MockTrainerLink {
        let mut link = MockTrainerLink::new();
        link.expect_connect().times(1).returning(|| Ok(()));
        link.expect_discover_characteristics()
            .times(1)
            .returning(|| {
                Ok(vec![
                    WAHOO_GEAR_CHARACTERISTIC_UUID,
                    WAHOO_GRADE_CHARACTERISTIC_UUID,
                ])
            });
        link.expect_subscribe().times(2).returning(|_| Ok(()));
        let mut events = Some(events);
        link.expect_events().times(1).returning(move || {
            Ok(stream::iter(events.take().unwrap_or_default()).boxed())
        });
        link
    }

    #[tokio::test]
    async fn test_open_stream_and_lose_link() {
        let mut link = streaming_link(vec![grade_frame(320), gear_frame(1, 4), grade_frame(330)]);
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        assert_eq!(session.state(), SessionState::Idle);

        session.open(&cancel).await.unwrap();
        assert_eq!(session.state(), SessionState::Subscribed);
        assert_eq!(session.channels().len(), 2);

        let first = session.next_sample(&cancel).await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(first.grade, Some(Grade::from_hundredths(320)));
        assert_eq!(first.gear, None);

        let second = session.next_sample(&cancel).await.unwrap();
        assert_eq!(second.gear, Some(Gear::Split { front: 2, rear: 5 }));
        assert_eq!(second.grade, Some(Grade::from_hundredths(320)));

        let third = session.next_sample(&cancel).await.unwrap();
        assert_eq!(third.gear, Some(Gear::Split { front: 2, rear: 5 }));
        assert_eq!(third.grade, Some(Grade::from_hundredths(330)));
        assert_eq!(session.latest_sample(), Some(&third));

        let lost = session.next_sample(&cancel).await;
        assert!(matches!(lost, Err(Error::LinkLost { .. })));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_released());

        session.close().await;
        session.close().await;
        assert!(session.is_released());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let garbled = LinkEvent::Notification(NotificationEvent::new(
            WAHOO_GEAR_CHARACTERISTIC_UUID,
            vec![0x00, 0x01],
        ));
        let empty = LinkEvent::Notification(NotificationEvent::new(
            WAHOO_GEAR_CHARACTERISTIC_UUID,
            Vec::new(),
        ));
        let stranger = LinkEvent::Notification(NotificationEvent::new(Uuid::nil(), vec![1, 2, 3, 4]));

        let mut link = streaming_link(vec![garbled, empty, stranger, gear_frame(0, 0)]);
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        session.open(&cancel).await.unwrap();

        let sample = session.next_sample(&cancel).await.unwrap();
        assert_eq!(sample.gear, Some(Gear::Split { front: 1, rear: 1 }));

        session.close().await;
    }

    #[tokio::test]
    async fn test_disconnect_event_is_link_lost() {
        let mut link = streaming_link(vec![gear_frame(0, 3), LinkEvent::Disconnected, gear_frame(0, 4)]);
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        session.open(&cancel).await.unwrap();

        session.next_sample(&cancel).await.unwrap();
        let err = session.next_sample(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::LinkLost { .. }));

        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_expiry_is_link_lost() {
        let mut link = MockTrainerLink::new();
        link.expect_connect().returning(|| Ok(()));
        link.expect_discover_characteristics()
            .returning(|| Ok(vec![WAHOO_GEAR_CHARACTERISTIC_UUID]));
        link.expect_subscribe()
            .with(eq(WAHOO_GEAR_CHARACTERISTIC_UUID))
            .times(1)
            .returning(|_| Ok(()));
        link.expect_events()
            .returning(|| Ok(stream::pending::<LinkEvent>().boxed()));
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let config = TelemetryConfig {
            watchdog_interval: Duration::from_secs(3),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &config);
        session.open(&cancel).await.unwrap();
        assert_eq!(session.channels().len(), 1);

        let started = tokio::time::Instant::now();
        let err = session.next_sample(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::LinkLost { .. }));
        assert!(started.elapsed() >= Duration::from_secs(3));

        session.close().await;
    }

    #[tokio::test]
    async fn test_missing_required_characteristic() {
        let mut link = MockTrainerLink::new();
        link.expect_connect().returning(|| Ok(()));
        link.expect_discover_characteristics()
            .returning(|| Ok(vec![WAHOO_GRADE_CHARACTERISTIC_UUID]));
        link.expect_subscribe().never();
        link.expect_events().never();
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        let err = session.open(&cancel).await.unwrap_err();

        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.is_released());

        // The supervisor's teardown is a no-op now.
        session.close().await;
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let mut link = MockTrainerLink::new();
        link.expect_connect().returning(|| {
            Err(Error::ConnectFailed {
                reason: "rejected".to_string(),
            })
        });
        link.expect_discover_characteristics().never();
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        let err = session.open(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::ConnectFailed);
    }

    #[tokio::test]
    async fn test_optional_subscribe_failure_is_tolerated() {
        let mut link = MockTrainerLink::new();
        link.expect_connect().returning(|| Ok(()));
        link.expect_discover_characteristics().returning(|| {
            Ok(vec![
                WAHOO_GEAR_CHARACTERISTIC_UUID,
                WAHOO_GRADE_CHARACTERISTIC_UUID,
            ])
        });
        link.expect_events()
            .returning(|| Ok(stream::iter(vec![gear_frame(0, 9)]).boxed()));
        link.expect_subscribe()
            .with(eq(WAHOO_GEAR_CHARACTERISTIC_UUID))
            .returning(|_| Ok(()));
        link.expect_subscribe()
            .with(eq(WAHOO_GRADE_CHARACTERISTIC_UUID))
            .returning(|_| {
                Err(Error::ConnectFailed {
                    reason: "not permitted".to_string(),
                })
            });
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        session.open(&cancel).await.unwrap();
        assert_eq!(session.channels().len(), 1);

        let sample = session.next_sample(&cancel).await.unwrap();
        assert_eq!(sample.gear.map(|g| g.rear()), Some(10));

        session.close().await;
    }

    #[tokio::test]
    async fn test_cancel_unblocks_wait() {
        let mut link = MockTrainerLink::new();
        link.expect_connect().returning(|| Ok(()));
        link.expect_discover_characteristics()
            .returning(|| Ok(vec![WAHOO_GEAR_CHARACTERISTIC_UUID]));
        link.expect_subscribe().returning(|_| Ok(()));
        link.expect_events()
            .returning(|| Ok(stream::pending::<LinkEvent>().boxed()));
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        session.open(&cancel).await.unwrap();

        let mut wait = tokio_test::task::spawn(session.next_sample(&cancel));
        tokio_test::assert_pending!(wait.poll());

        cancel.cancel();
        assert!(wait.is_woken());
        let result = tokio_test::assert_ready!(wait.poll());
        assert!(matches!(result, Err(Error::Cancelled)));
        drop(wait);

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let mut link = streaming_link(Vec::new());
        link.expect_disconnect().times(1).returning(|| Ok(()));

        let cancel = CancellationToken::new();
        let mut session = Session::new(handle(link), &TelemetryConfig::default());
        session.open(&cancel).await.unwrap();
        assert!(matches!(
            session.open(&cancel).await,
            Err(Error::ConnectFailed { .. })
        ));

        session.close().await;
    }
}
