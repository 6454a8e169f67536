//! bluest-backed attribute connector
//! Finds the device on the default adapter, connects, discovers the health
//! services and subscribes to the requested characteristics.

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::attribute::{GattConnector, GattLink};
use crate::core::bluetooth::constants::{UUID_HEART_RATE_SERVICE, UUID_VENDOR_HEALTH_SERVICE};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::types::{DeviceHandle, RawFrame};
use crate::error::{ConnectError, IoError};

/// Connector over the host's default Bluetooth adapter
#[derive(Clone)]
pub struct BluestConnector {
    adapter: Adapter,
}

impl BluestConnector {
    pub async fn new() -> Result<Self, ConnectError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| ConnectError::Unreachable("no Bluetooth adapter found".into()))?;
        adapter
            .wait_available()
            .await
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;
        info!("Bluetooth adapter is available.");
        Ok(Self { adapter })
    }

    /// Looks among connected devices first, then scans until the id shows up.
    async fn find_device(&self, handle: &DeviceHandle) -> Result<Device, ConnectError> {
        let connected = self.adapter.connected_devices().await.map_err(unreachable)?;
        if let Some(device) = connected
            .into_iter()
            .find(|d| d.id().to_string() == handle.id())
        {
            return Ok(device);
        }

        info!("{} not connected, scanning", handle.name());
        let mut scan = self.adapter.scan(&[]).await.map_err(unreachable)?;
        while let Some(found) = scan.next().await {
            debug!("Found device - Device: {:?}, RSSI: {:?}", found.device, found.rssi);
            if found.device.id().to_string() == handle.id() {
                return Ok(found.device);
            }
        }
        Err(ConnectError::Unreachable(format!(
            "{} not found during scan",
            handle.name()
        )))
    }
}

fn unreachable(e: bluest::Error) -> ConnectError {
    ConnectError::Unreachable(e.to_string())
}

#[async_trait]
impl GattConnector for BluestConnector {
    async fn open(
        &self,
        handle: &DeviceHandle,
        characteristics: &[Uuid],
        sink: mpsc::Sender<RawFrame>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn GattLink>, ConnectError> {
        let device = self.find_device(handle).await?;
        if !device.is_connected().await {
            info!("Initiating connection to {}...", handle.id());
            self.adapter.connect_device(&device).await.map_err(unreachable)?;
        }

        info!("Connection successful, discovering services...");
        let services = device.services().await.map_err(unreachable)?;
        let mut found = Vec::new();
        for service in services
            .iter()
            .filter(|s| s.uuid() == UUID_HEART_RATE_SERVICE || s.uuid() == UUID_VENDOR_HEALTH_SERVICE)
        {
            info!("Found health service: {}", service.uuid());
            for characteristic in service.characteristics().await.map_err(unreachable)? {
                found.push(characteristic);
            }
        }

        let handler = NotificationHandler::new(sink, cancel.clone());
        let mut subscribed = 0;
        for characteristic in found.iter().filter(|c| characteristics.contains(&c.uuid())) {
            handler.subscribe(characteristic.clone());
            subscribed += 1;
        }
        if subscribed == 0 {
            if let Err(e) = self.adapter.disconnect_device(&device).await {
                warn!("Disconnect from {} failed: {}", device.id(), e);
            }
            return Err(ConnectError::CapabilityMismatch {
                device: handle.name().to_string(),
                required: "health notification characteristics",
            });
        }

        let mut write_char = None;
        for characteristic in found {
            match characteristic.properties().await {
                Ok(props) if props.write || props.write_without_response => {
                    write_char = Some(characteristic);
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to read properties of {}: {}", characteristic.uuid(), e),
            }
        }

        info!(
            "Subscribed to {} characteristics on {}",
            subscribed,
            handle.name()
        );
        Ok(Box::new(BluestLink {
            adapter: self.adapter.clone(),
            device,
            write_char,
            cancel,
        }))
    }
}

pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    write_char: Option<Characteristic>,
    cancel: CancellationToken,
}

#[async_trait]
impl GattLink for BluestLink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let characteristic = self
            .write_char
            .as_ref()
            .ok_or_else(|| IoError::Io("device exposes no writable characteristic".into()))?;
        characteristic
            .write(bytes)
            .await
            .map_err(|e| IoError::Io(e.to_string()))
    }

    async fn disconnect(&mut self) {
        self.cancel.cancel();
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.device.id());
            if let Err(e) = self.adapter.disconnect_device(&self.device).await {
                warn!("Disconnect from {} failed: {}", self.device.id(), e);
            }
        }
    }
}
