use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SessionError;

pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// How often the scanner's peripheral cache is re-checked during an
/// address-targeted scan.
const SCAN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Identity of a peripheral, resolved once during discovery and fixed for
/// the rest of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: String,
    pub display_name: Option<String>,
}

impl DeviceIdentity {
    /// Name for user-facing messages, falling back to the address.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.address)
    }
}

/// The scan/connect side of the BLE stack. One implementation speaks
/// btleplug, another simulates a strap for tests and `--fake` runs.
#[async_trait]
pub trait HeartRateCentral: Send + Sync {
    /// Scans for a specific address until found or the timeout expires.
    async fn find_by_address(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Option<DeviceIdentity>, SessionError>;

    /// One full discovery pass of bounded duration. Advertisements are
    /// returned in arrival order.
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceIdentity>, SessionError>;

    /// Opens the physical link. Single attempt, no retry.
    async fn connect(
        &self,
        device: &DeviceIdentity,
    ) -> Result<Box<dyn HeartRateConnection>, SessionError>;
}

/// An open link to a strap. The subscription handle lives inside the
/// connection and never outlives it.
#[async_trait]
pub trait HeartRateConnection: Send {
    async fn is_connected(&self) -> bool;

    /// Subscribes to the heart-rate measurement characteristic and returns
    /// the raw notification payload stream.
    async fn subscribe(&mut self) -> Result<BoxStream<'static, Vec<u8>>, SessionError>;

    async fn unsubscribe(&mut self) -> Result<(), SessionError>;

    async fn disconnect(&mut self) -> Result<(), SessionError>;
}

/// btleplug-backed central using the first available adapter.
pub struct BtleplugCentral {
    adapter: Adapter,
}

impl BtleplugCentral {
    pub async fn new() -> Result<Self, SessionError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(SessionError::AdapterUnavailable)?;
        if let Ok(name) = adapter.adapter_info().await {
            debug!("using Bluetooth adapter {name}");
        }
        Ok(Self { adapter })
    }

    async fn identity_of(&self, peripheral: &Peripheral) -> Result<DeviceIdentity, SessionError> {
        let display_name = peripheral
            .properties()
            .await?
            .and_then(|props| props.local_name);
        Ok(DeviceIdentity {
            address: peripheral.address().to_string(),
            display_name,
        })
    }

    /// Looks a peripheral up in the adapter's cache of scan results.
    async fn cached_peripheral(&self, address: &str) -> Result<Option<Peripheral>, SessionError> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl HeartRateCentral for BtleplugCentral {
    async fn find_by_address(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Option<DeviceIdentity>, SessionError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        let deadline = tokio::time::Instant::now() + timeout;

        let mut found = None;
        loop {
            if let Some(peripheral) = self.cached_peripheral(address).await? {
                found = Some(self.identity_of(&peripheral).await?);
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }

        let _ = self.adapter.stop_scan().await;
        Ok(found)
    }

    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceIdentity>, SessionError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(timeout).await;

        let mut advertisements = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            advertisements.push(self.identity_of(&peripheral).await?);
        }

        let _ = self.adapter.stop_scan().await;
        Ok(advertisements)
    }

    async fn connect(
        &self,
        device: &DeviceIdentity,
    ) -> Result<Box<dyn HeartRateConnection>, SessionError> {
        let peripheral = self
            .cached_peripheral(&device.address)
            .await?
            .ok_or_else(|| {
                SessionError::ConnectionFailed(format!(
                    "peripheral {} is no longer visible",
                    device.address
                ))
            })?;

        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|err| SessionError::ConnectionFailed(err.to_string()))?;
        }
        info!("connected to {}", device.label());

        Ok(Box::new(BtleplugConnection {
            peripheral,
            subscription: None,
        }))
    }
}

pub struct BtleplugConnection {
    peripheral: Peripheral,
    subscription: Option<Characteristic>,
}

#[async_trait]
impl HeartRateConnection for BtleplugConnection {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn subscribe(&mut self) -> Result<BoxStream<'static, Vec<u8>>, SessionError> {
        self.peripheral.discover_services().await?;
        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == HEART_RATE_MEASUREMENT_UUID
                    && c.properties.contains(CharPropFlags::NOTIFY)
            })
            .ok_or_else(|| {
                SessionError::ConnectionFailed(
                    "peripheral does not expose the heart-rate measurement characteristic".into(),
                )
            })?;

        debug!("subscribing to characteristic {}", characteristic.uuid);
        self.peripheral.subscribe(&characteristic).await?;

        let stream = self
            .peripheral
            .notifications()
            .await?
            .filter(|notification| future::ready(notification.uuid == HEART_RATE_MEASUREMENT_UUID))
            .map(|notification| notification.value)
            .boxed();

        self.subscription = Some(characteristic);
        Ok(stream)
    }

    async fn unsubscribe(&mut self) -> Result<(), SessionError> {
        if let Some(characteristic) = self.subscription.take() {
            self.peripheral.unsubscribe(&characteristic).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SessionError> {
        self.subscription = None;
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
