//! Reconnection supervisor.
//!
//! Drives locator -> session -> backoff -> locator until shutdown. It is the
//! only writer of the connection status the sink sees, and holds at most one
//! [`Session`] at a time.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ble::connection::{DeviceHandle, TrainerLink};
use crate::ble::scanner::DeviceLocator;
use crate::config::{BackoffConfig, TelemetryConfig};
use crate::data::{ConnectionState, TelemetryUpdate};
use crate::error::{Error, ErrorKind};
use crate::session::Session;
use crate::sink::TelemetrySink;

/// Externally visible supervisor phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SupervisorState {
    /// Waiting for the locator.
    #[default]
    Searching,
    /// Opening a session.
    Connecting,
    /// Streaming from a session.
    Live,
    /// Waiting before the next search.
    Backoff,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Searching => write!(f, "Searching"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Live => write!(f, "Live"),
            Self::Backoff => write!(f, "Backoff"),
        }
    }
}

/// Retry delay schedule.
///
/// Delays start at `initial`, grow by `multiplier` and never exceed `cap`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    multiplier: f64,
    cap: Duration,
    current: Option<Duration>,
}

impl Backoff {
    /// Create a schedule from configuration.
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial,
            multiplier: config.multiplier,
            cap: config.cap,
            current: None,
        }
    }

    /// Delay before the next attempt. Non-decreasing until [`reset`](Self::reset).
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(previous) => {
                Duration::try_from_secs_f64(previous.as_secs_f64() * self.multiplier)
                    .unwrap_or(self.cap)
                    .max(previous)
            }
        }
        .min(self.cap);

        self.current = Some(next);
        next
    }

    /// The most recent delay handed out.
    pub fn current(&self) -> Option<Duration> {
        self.current
    }

    /// Start over from `initial`.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

enum Phase<L: TrainerLink> {
    Searching,
    Connecting(DeviceHandle<L>),
    Live(Session<L>),
    Backoff,
    Stopped,
}

/// The reconnection state machine.
pub struct Supervisor<D: DeviceLocator, S: TelemetrySink> {
    locator: D,
    sink: S,
    config: TelemetryConfig,
    backoff: Backoff,
    consecutive_failures: u32,
    last_fault: Option<ErrorKind>,
    previous_status: Option<(ConnectionState, Option<ErrorKind>)>,
    state_tx: watch::Sender<SupervisorState>,
}

impl<D: DeviceLocator, S: TelemetrySink> Supervisor<D, S> {
    /// Create a supervisor. Nothing happens until [`run`](Self::run).
    pub fn new(locator: D, sink: S, config: TelemetryConfig) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Searching);
        Self {
            locator,
            sink,
            backoff: Backoff::new(&config.backoff),
            config,
            consecutive_failures: 0,
            last_fault: None,
            previous_status: None,
            state_tx,
        }
    }

    /// Watch the supervisor phase.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Every connectivity failure is followed by a retry. On shutdown any
    /// open session is closed before this returns, and a final
    /// [`TelemetryUpdate::stopped`] is published.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Supervisor started");

        let mut phase = Phase::Searching;
        loop {
            phase = match phase {
                Phase::Stopped => break,
                other => self.advance(other, &shutdown).await,
            };
        }

        self.previous_status = None;
        self.sink.publish(TelemetryUpdate::stopped());
        info!("Supervisor stopped");
    }

    async fn advance(&mut self, phase: Phase<D::Link>, shutdown: &CancellationToken) -> Phase<D::Link> {
        match phase {
            Phase::Searching => {
                self.enter(SupervisorState::Searching);
                self.publish_status(ConnectionState::Searching, None);

                match self.locator.find(self.config.scan_timeout, shutdown).await {
                    Ok(handle) => Phase::Connecting(handle),
                    Err(e) => self.fail(e),
                }
            }
            Phase::Connecting(handle) => {
                self.enter(SupervisorState::Connecting);
                self.publish_status(ConnectionState::Connecting, None);

                let mut session = Session::new(handle, &self.config);
                match session.open(shutdown).await {
                    Ok(()) => {
                        self.publish_status(ConnectionState::Connected, None);
                        Phase::Live(session)
                    }
                    Err(e) => {
                        session.close().await;
                        self.fail(e)
                    }
                }
            }
            Phase::Live(mut session) => {
                self.enter(SupervisorState::Live);

                loop {
                    match session.next_sample(shutdown).await {
                        Ok(sample) => {
                            // Retry state resets on delivered telemetry, not on subscribe.
                            if self.consecutive_failures > 0 {
                                debug!("Telemetry flowing, resetting backoff");
                                self.consecutive_failures = 0;
                                self.last_fault = None;
                            }
                            self.backoff.reset();
                            self.previous_status = Some((ConnectionState::Connected, None));
                            self.sink.publish(TelemetryUpdate::sample(sample));
                        }
                        Err(e) => {
                            session.close().await;
                            break self.fail(e);
                        }
                    }
                }
            }
            Phase::Backoff => {
                self.enter(SupervisorState::Backoff);

                let status = if self.consecutive_failures >= self.config.error_threshold {
                    ConnectionState::Error
                } else {
                    ConnectionState::Disconnected
                };
                self.publish_status(status, self.last_fault);

                let delay = self.backoff.next_delay();
                info!(
                    "Retrying in {:?} ({} consecutive failure(s))",
                    delay, self.consecutive_failures
                );

                tokio::select! {
                    _ = shutdown.cancelled() => Phase::Stopped,
                    _ = sleep(delay) => Phase::Searching,
                }
            }
            Phase::Stopped => Phase::Stopped,
        }
    }

    fn fail(&mut self, error: Error) -> Phase<D::Link> {
        if matches!(error, Error::Cancelled) {
            debug!("Shutdown requested");
            return Phase::Stopped;
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_fault = Some(error.kind());
        warn!("{}", error);
        Phase::Backoff
    }

    fn enter(&self, state: SupervisorState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("Supervisor {} -> {}", current, state);
            *current = state;
            true
        });
    }

    fn publish_status(&mut self, status: ConnectionState, fault: Option<ErrorKind>) {
        if self.previous_status == Some((status, fault)) {
            return;
        }
        self.previous_status = Some((status, fault));
        self.sink.publish(TelemetryUpdate::status(status, fault));
    }
}
