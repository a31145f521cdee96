//! ==============================================================================
//! ble.rs - bluetooth le link to the sensor (btleplug)
//! ==============================================================================
//!
//! purpose:
//!     the REAL DeviceLink. finds the sensor by address, connects, subscribes
//!     to the frame characteristic and yields notification payloads.
//!
//! protocol:
//!     1. open the first bluetooth adapter (cached across reconnects)
//!     2. scan until the configured address shows up or the scan times out
//!     3. connect and discover services
//!     4. subscribe to the frame characteristic
//!     5. read the notification stream; the stream ending means the link dropped
//!
//! relationships:
//!     - implements: link.rs (DeviceLink)
//!     - used by: main.rs (when built with --features bluetooth)
//!
//! ==============================================================================

use crate::config::DeviceConfig;
use crate::link::{DeviceLink, LinkError};

use btleplug::api::{
    BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

const SCAN_POLL: Duration = Duration::from_millis(500);

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

pub struct BleLink {
    address: BDAddr,
    characteristic: Uuid,
    scan_timeout: Duration,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    notifications: Option<NotificationStream>,
    /// set while a discovery scan may still be running on the adapter
    scanning: bool,
}

impl BleLink {
    pub fn new(config: &DeviceConfig) -> Result<Self, LinkError> {
        let address = BDAddr::from_str(config.address.trim())
            .map_err(|_| LinkError::InvalidAddress(config.address.clone()))?;

        tracing::info!(%address, "Using BLUETOOTH device link (btleplug)");
        Ok(Self {
            address,
            characteristic: config.characteristic_uuid,
            scan_timeout: config.scan_timeout(),
            adapter: None,
            peripheral: None,
            notifications: None,
            scanning: false,
        })
    }

    async fn adapter(&mut self) -> Result<Adapter, LinkError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(LinkError::NoAdapter)?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    async fn stop_scan(&mut self) {
        self.scanning = false;
        if let Some(adapter) = self.adapter.clone() {
            if let Err(err) = adapter.stop_scan().await {
                tracing::warn!(%err, "failed to stop scan");
            }
        }
    }

    fn find_characteristic(&self, peripheral: &Peripheral) -> Result<Characteristic, LinkError> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.characteristic)
            .ok_or(LinkError::CharacteristicNotFound {
                uuid: self.characteristic,
            })
    }
}

/// poll the adapter's peripheral list until the address appears
async fn find_peripheral(
    adapter: &Adapter,
    address: BDAddr,
    scan_timeout: Duration,
) -> Result<Peripheral, LinkError> {
    let deadline = Instant::now() + scan_timeout;
    loop {
        for peripheral in adapter.peripherals().await? {
            if peripheral.address() == address {
                return Ok(peripheral);
            }
        }
        if Instant::now() >= deadline {
            return Err(LinkError::DeviceNotFound {
                address: address.to_string(),
                timeout: scan_timeout,
            });
        }
        tokio::time::sleep(SCAN_POLL).await;
    }
}

impl DeviceLink for BleLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        let adapter = self.adapter().await?;

        adapter.start_scan(ScanFilter::default()).await?;
        self.scanning = true;
        let found = find_peripheral(&adapter, self.address, self.scan_timeout).await;
        self.stop_scan().await;
        let peripheral = found?;

        // stored before connecting so a cancelled or failed attempt can still be released
        self.peripheral = Some(peripheral.clone());
        peripheral.connect().await?;
        peripheral.discover_services().await?;
        Ok(())
    }

    async fn subscribe(&mut self) -> Result<(), LinkError> {
        let peripheral = self.peripheral.clone().ok_or(LinkError::NotConnected)?;
        let characteristic = self.find_characteristic(&peripheral)?;

        peripheral.subscribe(&characteristic).await?;
        self.notifications = Some(peripheral.notifications().await?);
        Ok(())
    }

    async fn next_notification(&mut self) -> Result<Vec<u8>, LinkError> {
        let characteristic = self.characteristic;
        let stream = self.notifications.as_mut().ok_or(LinkError::NotSubscribed)?;
        loop {
            match stream.next().await {
                Some(n) if n.uuid == characteristic => return Ok(n.value),
                Some(n) => tracing::trace!(uuid = %n.uuid, "ignoring notification"),
                None => return Err(LinkError::StreamEnded),
            }
        }
    }

    async fn disconnect(&mut self) {
        self.notifications = None;
        if self.scanning {
            self.stop_scan().await;
        }
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(err) = peripheral.disconnect().await {
                tracing::warn!(%err, "failed to disconnect peripheral");
            }
        }
    }
}
