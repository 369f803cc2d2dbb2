//! Paired-device directory backed by the BlueZ default adapter

use crate::transport::traits::DeviceDirectory;
use anyhow::Result;
use async_trait::async_trait;
use bluer::{Adapter, Device};
use bridge_shared::DeviceDescriptor;
use tracing::{debug, warn};

/// BlueZ paired-device directory
#[derive(Debug, Default)]
pub struct BluezDirectory;

impl BluezDirectory {
    /// Create a new directory
    pub fn new() -> Self {
        Self
    }

    /// Look up the default Bluetooth adapter without changing its state
    pub async fn default_adapter() -> Result<Adapter> {
        let session = bluer::Session::new().await?;
        Ok(session.default_adapter().await?)
    }

    /// Display name of a device: its name, falling back to its alias
    async fn display_name(device: &Device) -> Result<String> {
        match device.name().await? {
            Some(name) => Ok(name),
            None => Ok(device.alias().await?),
        }
    }
}

#[async_trait]
impl DeviceDirectory for BluezDirectory {
    async fn known_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let adapter = Self::default_adapter().await?;
        let mut devices = Vec::new();

        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            if !device.is_paired().await.unwrap_or(false) {
                continue;
            }
            match Self::display_name(&device).await {
                Ok(name) => devices.push(DeviceDescriptor::new(addr.to_string(), name)),
                Err(e) => debug!("[BT] Skipping {}: {}", addr, e),
            }
        }

        Ok(devices)
    }

    /// Report an ongoing scan; does not stop it
    ///
    /// BlueZ discovery sessions end when their owner drops them, so a scan
    /// started by another client cannot be cancelled from here. It is only
    /// logged, since it slows RFCOMM setup.
    async fn cancel_discovery(&self) {
        match Self::default_adapter().await {
            Ok(adapter) => {
                if let Ok(true) = adapter.is_discovering().await {
                    warn!("[BT] Adapter {} is discovering; connection setup may be slow", adapter.name());
                }
            }
            Err(e) => debug!("[BT] No adapter for discovery cancel: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires BlueZ"]
    async fn test_listing_leaves_adapter_power_unchanged() {
        let adapter = BluezDirectory::default_adapter().await.unwrap();
        let powered = adapter.is_powered().await.unwrap();

        let directory = BluezDirectory::new();
        let _ = directory.known_devices().await;
        directory.cancel_discovery().await;

        assert_eq!(adapter.is_powered().await.unwrap(), powered);
    }
}
