//! Transport capability interface
//! One implementation per wireless sub-protocol, chosen once per device at
//! connect time and never switched mid-session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::bluetooth::attribute::{AttributeTransport, GattConnector};
use crate::core::bluetooth::serial::{SerialTransport, SocketConnector};
use crate::core::bluetooth::types::{Delivery, DeviceHandle, RawFrame, TransportKind};
use crate::error::{ConnectError, IoError};

/// A physical connection to one device.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn delivery(&self) -> Delivery {
        self.kind().delivery()
    }

    async fn connect(&mut self, device: &DeviceHandle) -> Result<(), ConnectError>;

    async fn send(&mut self, bytes: &[u8]) -> Result<(), IoError>;

    /// Poll transports read once, waiting at most `timeout`; push transports
    /// return whatever notifications have arrived without waiting.
    /// An empty vector means no data this time.
    async fn receive(&mut self, timeout: Duration) -> Result<Vec<RawFrame>, IoError>;

    /// Releases every underlying resource. Safe to call repeatedly and on a
    /// transport that never connected.
    async fn close(&mut self);
}

/// Transport shared between the link and the running session
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Builds a fresh, unconnected transport of the requested kind.
pub trait TransportFactory: Send + Sync {
    /// `None` when no backend for `kind` is available on this host.
    fn create(&self, kind: TransportKind) -> Option<Box<dyn Transport>>;
}

/// Factory over the configured platform connectors
#[derive(Clone, Default)]
pub struct ConnectorFactory {
    socket: Option<Arc<dyn SocketConnector>>,
    gatt: Option<Arc<dyn GattConnector>>,
    read_buffer_size: usize,
}

impl ConnectorFactory {
    pub fn new(read_buffer_size: usize) -> Self {
        Self {
            socket: None,
            gatt: None,
            read_buffer_size,
        }
    }

    pub fn with_socket_connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.socket = Some(connector);
        self
    }

    pub fn with_gatt_connector(mut self, connector: Arc<dyn GattConnector>) -> Self {
        self.gatt = Some(connector);
        self
    }
}

impl TransportFactory for ConnectorFactory {
    fn create(&self, kind: TransportKind) -> Option<Box<dyn Transport>> {
        match kind {
            TransportKind::SerialSocket => self.socket.clone().map(|connector| {
                Box::new(SerialTransport::new(connector, self.read_buffer_size)) as Box<dyn Transport>
            }),
            TransportKind::AttributeStreaming => self
                .gatt
                .clone()
                .map(|connector| Box::new(AttributeTransport::new(connector)) as Box<dyn Transport>),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::attribute::tests::FakeGatt;
    use crate::core::bluetooth::serial::tests::DuplexConnector;

    #[test]
    fn test_factory_without_backends() {
        let factory = ConnectorFactory::new(64);
        assert!(factory.create(TransportKind::SerialSocket).is_none());
        assert!(factory.create(TransportKind::AttributeStreaming).is_none());
    }

    #[test]
    fn test_factory_builds_requested_kind() {
        let (connector, _remote) = DuplexConnector::new();
        let factory = ConnectorFactory::new(64)
            .with_socket_connector(Arc::new(connector))
            .with_gatt_connector(Arc::new(FakeGatt::default()));

        let serial = factory.create(TransportKind::SerialSocket).unwrap();
        assert_eq!(serial.kind(), TransportKind::SerialSocket);
        assert_eq!(serial.delivery(), Delivery::Poll);

        let attribute = factory.create(TransportKind::AttributeStreaming).unwrap();
        assert_eq!(attribute.kind(), TransportKind::AttributeStreaming);
        assert_eq!(attribute.delivery(), Delivery::Push);
    }
}
