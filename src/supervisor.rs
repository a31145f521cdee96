//! ==============================================================================
//! supervisor.rs - keeps the device subscription alive
//! ==============================================================================
//!
//! purpose:
//!     owns the DeviceLink and drives it through
//!
//!         Disconnected -> Connecting -> Connected -> Subscribed
//!              ^                                       |
//!              └──────── any link error (+ retry delay) ┘
//!
//!     forever, until the shutdown flag flips. every notification is decoded
//!     here and the reading is handed to the forward queue. forwarding itself
//!     happens elsewhere, so a dead state store never touches this loop.
//!
//! cancellation:
//!     connect, subscribe, the notification wait, the enqueue and the retry
//!     delay all race against the shutdown watch. on shutdown the link is
//!     released and run() returns with the state back at Disconnected.
//!
//! relationships:
//!     - uses: link.rs (DeviceLink), frame.rs (decode_frame), queue.rs
//!     - used by: bridge.rs
//!
//! ==============================================================================

use crate::domain::ConnectionState;
use crate::frame::decode_frame;
use crate::link::{DeviceLink, LinkError};
use crate::queue::ReadingSender;

use std::time::Duration;
use tokio::sync::watch;

/// how long to wait before the next connect attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// same delay every time
    Fixed(Duration),
    /// initial * 2^(failures - 1), capped at max
    Exponential { initial: Duration, max: Duration },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// delay after `failures` consecutive failed attempts (1-based)
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { initial, max } => {
                // shift is bounded so the multiplier cannot overflow
                let shift = failures.saturating_sub(1).min(30);
                initial.saturating_mul(1u32 << shift).min(max)
            }
        }
    }
}

/// why a session stopped
enum SessionEnd {
    Link(LinkError),
    QueueClosed,
}

pub struct ConnectionSupervisor<L> {
    link: L,
    retry: RetryPolicy,
    readings: ReadingSender,
    state: watch::Sender<ConnectionState>,
    failures: u32,
    device: String,
    show_sensor_data: bool,
}

impl<L: DeviceLink> ConnectionSupervisor<L> {
    pub fn new(link: L, retry: RetryPolicy, readings: ReadingSender) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            link,
            retry,
            readings,
            state,
            failures: 0,
            device: String::new(),
            show_sensor_data: true,
        }
    }

    /// name used for the device in log lines
    pub fn device_label(mut self, label: impl Into<String>) -> Self {
        self.device = label.into();
        self
    }

    /// log every decoded reading at info level
    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// read-only view of state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
    }

    /// run until `shutdown` becomes true (or its sender is dropped)
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let end = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                end = self.session() => end,
            };

            let err = match end {
                SessionEnd::Link(err) => err,
                SessionEnd::QueueClosed => {
                    tracing::error!("forward queue closed, stopping supervisor");
                    break;
                }
            };

            self.failures = self.failures.saturating_add(1);
            let delay = self.retry.delay_for(self.failures);
            tracing::error!(
                device = %self.device,
                from = %self.state(),
                error = %err,
                failures = self.failures,
                "BLE connection error. Retrying in {:?}...",
                delay
            );
            self.link.disconnect().await;
            self.set_state(ConnectionState::Disconnected);

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.state() != ConnectionState::Disconnected {
            self.link.disconnect().await;
            self.set_state(ConnectionState::Disconnected);
        }
        tracing::info!(device = %self.device, "supervisor stopped");
    }

    /// one connect/subscribe/listen cycle; only returns when it has to stop
    async fn session(&mut self) -> SessionEnd {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(
            device = %self.device,
            state = %ConnectionState::Connecting,
            attempt = self.failures + 1,
            "Connecting to BLE device"
        );
        if let Err(e) = self.link.connect().await {
            return SessionEnd::Link(e);
        }
        self.set_state(ConnectionState::Connected);
        tracing::info!(device = %self.device, "Connected!");

        if let Err(e) = self.link.subscribe().await {
            return SessionEnd::Link(e);
        }
        self.set_state(ConnectionState::Subscribed);
        self.failures = 0;
        tracing::info!(device = %self.device, "Subscribed to characteristic notifications");

        loop {
            let payload = match self.link.next_notification().await {
                Ok(payload) => payload,
                Err(e) => return SessionEnd::Link(e),
            };

            let Some(reading) = decode_frame(&payload) else {
                continue;
            };
            if self.show_sensor_data {
                tracing::info!("Received Data: {}", reading);
            }
            if self.readings.send(reading).await.is_err() {
                return SessionEnd::QueueClosed;
            }
        }
    }
}
