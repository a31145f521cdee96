//! ==============================================================================
//! link.rs - Device Link Abstraction
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface over the wireless link to the sensor.
//!     abstracts away the difference between running against the real device
//!     (btleplug, feature = "bluetooth") and a development machine without a
//!     radio (simulated frames).
//!
//! contract:
//!     connect -> subscribe -> next_notification (repeatedly) -> disconnect
//!
//!     next_notification returns an error when the link drops or the
//!     notification stream ends. the supervisor treats every error the same
//!     way: release the link, wait, start over.
//!
//! relationships:
//!     - used by: supervisor.rs
//!     - implemented by: SimulatedLink (below), ble.rs (BleLink)
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[cfg_attr(not(feature = "bluetooth"), allow(dead_code))]
pub enum LinkError {
    #[error("no bluetooth adapter available")]
    NoAdapter,
    #[error("invalid device address {0:?}")]
    InvalidAddress(String),
    #[error("device {address} not found within {timeout:?}")]
    DeviceNotFound { address: String, timeout: Duration },
    #[error("characteristic {uuid} not found on device")]
    CharacteristicNotFound { uuid: Uuid },
    #[error("link is not connected")]
    NotConnected,
    #[error("not subscribed to notifications")]
    NotSubscribed,
    #[error("notification stream ended")]
    StreamEnded,
    #[cfg(feature = "bluetooth")]
    #[error(transparent)]
    Bluetooth(#[from] btleplug::Error),
    #[error("{0}")]
    Transport(String),
}

pub trait DeviceLink: Send {
    /// find the device and open a connection to it
    fn connect(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// enable notifications on the sensor characteristic
    fn subscribe(&mut self) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// wait for the next notification payload
    fn next_notification(&mut self) -> impl Future<Output = Result<Vec<u8>, LinkError>> + Send;

    /// release the connection; errors are logged, never returned
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

// ==============================================================================================
// SIMULATED IMPLEMENTATION (No Bluetooth Build)
// ==============================================================================================

#[cfg(not(feature = "bluetooth"))]
pub use simulated::SimulatedLink;

#[cfg(not(feature = "bluetooth"))]
mod simulated {
    use super::{DeviceLink, LinkError};
    use crate::config::DeviceConfig;
    use crate::domain::Reading;
    use crate::frame::encode_frame;
    use std::time::Duration;

    /// emits a plausible indoor reading every interval
    pub struct SimulatedLink {
        interval: Duration,
        connected: bool,
        subscribed: bool,
        tick: u32,
    }

    impl SimulatedLink {
        pub fn new(config: &DeviceConfig) -> Self {
            tracing::info!("Using SIMULATED device link (no bluetooth access)");
            Self {
                interval: config.simulated_interval(),
                connected: false,
                subscribed: false,
                tick: 0,
            }
        }

        fn sample(&self) -> Reading {
            // slow wobble so consecutive readings differ
            let w = (self.tick % 20) as f32 / 10.0;
            Reading {
                pm1: 3.0 + w,
                pm25: 5.0 + w,
                pm4: 6.0 + w,
                pm10: 7.0 + w,
                humidity: 45.0 + w,
                temperature: 21.0 + w / 2.0,
                voc: 100.0,
                nox: 1.0,
            }
        }
    }

    impl DeviceLink for SimulatedLink {
        async fn connect(&mut self) -> Result<(), LinkError> {
            tracing::debug!("[SIM LINK] connect");
            self.connected = true;
            Ok(())
        }

        async fn subscribe(&mut self) -> Result<(), LinkError> {
            if !self.connected {
                return Err(LinkError::NotConnected);
            }
            tracing::debug!("[SIM LINK] subscribe");
            self.subscribed = true;
            Ok(())
        }

        async fn next_notification(&mut self) -> Result<Vec<u8>, LinkError> {
            if !self.subscribed {
                return Err(LinkError::NotSubscribed);
            }
            tokio::time::sleep(self.interval).await;
            self.tick = self.tick.wrapping_add(1);
            Ok(encode_frame(&self.sample()).to_vec())
        }

        async fn disconnect(&mut self) {
            tracing::debug!("[SIM LINK] disconnect");
            self.connected = false;
            self.subscribed = false;
        }
    }

}

// ==============================================================================================
// SCRIPTED IMPLEMENTATION (Tests)
// ==============================================================================================
