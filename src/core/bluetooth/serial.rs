//! Serial-socket transport
//! A byte-stream socket to the serial port profile on the remote device.
//! Inbound data is polled; outbound data is written and flushed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::core::bluetooth::constants::UUID_SERIAL_PORT_PROFILE;
use crate::core::bluetooth::transport::Transport;
use crate::core::bluetooth::types::{DeviceHandle, RawFrame, TransportKind};
use crate::error::{ConnectError, IoError};

/// Any bidirectional byte stream
pub trait SerialStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialStream for T {}

/// Opens the platform socket for a device and service identifier.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn open(
        &self,
        device: &DeviceHandle,
        service: Uuid,
    ) -> Result<Box<dyn SerialStream>, ConnectError>;
}

/// Reaches the device through a TCP bridge that relays the serial socket.
#[derive(Debug, Clone)]
pub struct TcpSocketConnector {
    addr: String,
}

impl TcpSocketConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl SocketConnector for TcpSocketConnector {
    async fn open(
        &self,
        device: &DeviceHandle,
        service: Uuid,
    ) -> Result<Box<dyn SerialStream>, ConnectError> {
        info!(
            "Opening serial bridge {} for {} (service {})",
            self.addr,
            device.name(),
            service
        );
        match TcpStream::connect(self.addr.as_str()).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to disable Nagle on serial bridge: {}", e);
                }
                Ok(Box::new(stream))
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(ConnectError::PermissionDenied(e.to_string()))
            }
            Err(e) => Err(ConnectError::Unreachable(format!("{}: {}", self.addr, e))),
        }
    }
}

pub struct SerialTransport {
    connector: Arc<dyn SocketConnector>,
    stream: Option<Box<dyn SerialStream>>,
    buffer: Vec<u8>,
}

impl SerialTransport {
    pub fn new(connector: Arc<dyn SocketConnector>, read_buffer_size: usize) -> Self {
        Self {
            connector,
            stream: None,
            buffer: vec![0; read_buffer_size.max(1)],
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::SerialSocket
    }

    async fn connect(&mut self, device: &DeviceHandle) -> Result<(), ConnectError> {
        // reconnecting drops the previous socket first
        self.close().await;
        let stream = self.connector.open(device, UUID_SERIAL_PORT_PROFILE).await?;
        self.stream = Some(stream);
        info!("Serial socket connected to {}", device.name());
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let stream = self.stream.as_mut().ok_or(IoError::NotConnected)?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        debug!("Wrote {} bytes to serial socket", bytes.len());
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<RawFrame>, IoError> {
        let stream = self.stream.as_mut().ok_or(IoError::NotConnected)?;
        match tokio::time::timeout(timeout, stream.read(&mut self.buffer)).await {
            // nothing arrived within the cycle
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Err(IoError::Closed),
            Ok(Ok(n)) => Ok(vec![RawFrame::serial(&self.buffer[..n])]),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Serial socket shutdown reported: {}", e);
            }
            info!("Serial socket closed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::bluetooth::types::{Capability, FrameSource};
    use std::sync::Mutex as StdMutex;
    use tokio::io::DuplexStream;

    /// Hands out one end of an in-memory duplex per `open`; the test keeps the other end.
    pub struct DuplexConnector {
        pending: StdMutex<Option<DuplexStream>>,
    }

    impl DuplexConnector {
        pub fn new() -> (Self, DuplexStream) {
            Self::with_capacity(256)
        }

        pub fn with_capacity(capacity: usize) -> (Self, DuplexStream) {
            let (local, remote) = tokio::io::duplex(capacity);
            (
                Self {
                    pending: StdMutex::new(Some(local)),
                },
                remote,
            )
        }
    }

    #[async_trait]
    impl SocketConnector for DuplexConnector {
        async fn open(
            &self,
            _device: &DeviceHandle,
            _service: Uuid,
        ) -> Result<Box<dyn SerialStream>, ConnectError> {
            self.pending
                .lock()
                .unwrap()
                .take()
                .map(|s| Box::new(s) as Box<dyn SerialStream>)
                .ok_or_else(|| ConnectError::Unreachable("duplex already used".into()))
        }
    }

    fn device() -> DeviceHandle {
        DeviceHandle::new("AA:BB", "OldBTHeadset", Capability::LegacySerial)
    }

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (connector, mut remote) = DuplexConnector::new();
        let mut transport = SerialTransport::new(Arc::new(connector), 1024);
        transport.connect(&device()).await.unwrap();

        transport.send(b"GET_HEALTH_DATA").await.unwrap();
        let mut buf = [0u8; 15];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET_HEALTH_DATA");

        remote.write_all(&[0x00, 0x48]).await.unwrap();
        let frames = transport.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].source, FrameSource::SerialStream);
        assert_eq!(frames[0].bytes, vec![0x00, 0x48]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_with_no_frames() {
        let (connector, _remote) = DuplexConnector::new();
        let mut transport = SerialTransport::new(Arc::new(connector), 1024);
        transport.connect(&device()).await.unwrap();
        let frames = transport.receive(Duration::from_secs(1)).await.unwrap();
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_remote_close_is_reported() {
        let (connector, remote) = DuplexConnector::new();
        let mut transport = SerialTransport::new(Arc::new(connector), 1024);
        transport.connect(&device()).await.unwrap();
        drop(remote);
        assert_eq!(
            transport.receive(Duration::from_millis(100)).await,
            Err(IoError::Closed)
        );
    }

    #[tokio::test]
    async fn test_read_is_bounded_by_buffer() {
        let (connector, mut remote) = DuplexConnector::new();
        let mut transport = SerialTransport::new(Arc::new(connector), 4);
        transport.connect(&device()).await.unwrap();
        remote.write_all(&[1, 2, 3, 4, 5, 6]).await.unwrap();
        let frames = transport.receive(Duration::from_millis(100)).await.unwrap();
        assert_eq!(frames[0].bytes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (connector, _remote) = DuplexConnector::new();
        let mut transport = SerialTransport::new(Arc::new(connector), 16);
        // never connected
        transport.close().await;
        transport.connect(&device()).await.unwrap();
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.send(b"x").await, Err(IoError::NotConnected));
    }
}
