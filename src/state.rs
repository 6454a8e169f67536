//! Application state management
//! Builds the link and its platform connectors from the loaded configuration.

use std::sync::Arc;

use anyhow::{Result, bail};
use log::{info, warn};

use crate::config::AppConfig;
use crate::core::bluetooth::{
    Capability, ConnectorFactory, DeviceHandle, LinkManager, TcpSocketConnector, TransportKind,
};
use crate::core::events::EventDispatcher;

pub struct AppState {
    pub config: AppConfig,
    pub link_manager: Arc<LinkManager>,
}

impl AppState {
    /// Creates a new AppState instance
    pub async fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let mut factory = ConnectorFactory::new(config.acquisition.read_buffer_size);
        match &config.link.serial_bridge_addr {
            Some(addr) => {
                info!("Serial transport bridged through {}", addr);
                factory = factory.with_socket_connector(Arc::new(TcpSocketConnector::new(addr)));
            }
            None => warn!("No serial bridge configured, serial-socket devices are unavailable"),
        }
        #[cfg(feature = "bluetooth")]
        {
            use crate::core::bluetooth::BluestConnector;
            match BluestConnector::new().await {
                Ok(connector) => factory = factory.with_gatt_connector(Arc::new(connector)),
                Err(e) => warn!("Attribute streaming unavailable: {}", e),
            }
        }

        info!("Initializing LinkManager...");
        let link_manager = LinkManager::new(Arc::new(factory), EventDispatcher::new())
            .with_selector(config.link.selector()?)
            .with_connect_timeout(config.link.connect_timeout())
            .with_send_timeout(config.link.send_timeout())
            .with_acquisition_config(config.acquisition.clone());

        Ok(Self {
            config,
            link_manager: Arc::new(link_manager),
        })
    }

    /// Gets a reference to the link manager
    pub fn get_link_manager_arc(&self) -> Arc<LinkManager> {
        self.link_manager.clone()
    }

    /// Stands in for discovery: accepts `name` through the configured filter and
    /// tags the handle with the capability its transport needs.
    pub fn discovered_device(&self, id: &str, name: &str) -> Result<DeviceHandle> {
        if !self.config.discovery.accepts(name) {
            bail!("'{}' is not a supported sensor model", name);
        }
        let capability = match self.config.link.selector()?.kind_for_name(name) {
            TransportKind::AttributeStreaming => Capability::AttributeStreaming,
            TransportKind::SerialSocket => Capability::LegacySerial,
        };
        Ok(DeviceHandle::new(id, name, capability))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::LinkStatus;

    #[tokio::test]
    async fn test_builds_from_default_config() {
        let state = AppState::new(AppConfig::default()).await.unwrap();
        assert_eq!(state.link_manager.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.acquisition.interval_ms = 0;
        assert!(AppState::new(config).await.is_err());
    }

    #[tokio::test]
    async fn test_discovered_device_capability() {
        let state = AppState::new(AppConfig::default()).await.unwrap();
        let watch = state.discovered_device("w1", "Galaxy Watch7").unwrap();
        assert_eq!(watch.capability(), Capability::AttributeStreaming);
        let older = state.discovered_device("w2", "Galaxy Watch Active2").unwrap();
        assert_eq!(older.capability(), Capability::LegacySerial);
        assert!(state.discovered_device("h", "OldBTHeadset").is_err());
    }
}
