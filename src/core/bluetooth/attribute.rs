//! Attribute-streaming transport
//! Connect, discover services, subscribe to the health characteristics.
//! Notifications are pushed into a bounded queue keyed by characteristic and
//! drained by `receive` without waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{NOTIFICATION_QUEUE_DEPTH, SUBSCRIBED_CHARACTERISTICS};
use crate::core::bluetooth::transport::Transport;
use crate::core::bluetooth::types::{DeviceHandle, RawFrame, TransportKind};
use crate::error::{ConnectError, IoError};

/// An open attribute connection, used for writes and teardown.
#[async_trait]
pub trait GattLink: Send {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), IoError>;

    async fn disconnect(&mut self);
}

/// Platform attribute stack.
#[async_trait]
pub trait GattConnector: Send + Sync {
    /// Connects, discovers services and subscribes to `characteristics`.
    /// Each notification is forwarded into `sink` until `cancel` fires; when
    /// every sender is dropped the remote side is considered gone.
    async fn open(
        &self,
        device: &DeviceHandle,
        characteristics: &[Uuid],
        sink: mpsc::Sender<RawFrame>,
        cancel: CancellationToken,
    ) -> Result<Box<dyn GattLink>, ConnectError>;
}

pub struct AttributeTransport {
    connector: Arc<dyn GattConnector>,
    link: Option<Box<dyn GattLink>>,
    notifications: Option<mpsc::Receiver<RawFrame>>,
    cancel: CancellationToken,
}

impl AttributeTransport {
    pub fn new(connector: Arc<dyn GattConnector>) -> Self {
        Self {
            connector,
            link: None,
            notifications: None,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Transport for AttributeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::AttributeStreaming
    }

    async fn connect(&mut self, device: &DeviceHandle) -> Result<(), ConnectError> {
        self.close().await;
        self.cancel = CancellationToken::new();
        let (sink, notifications) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);
        let link = self
            .connector
            .open(device, &SUBSCRIBED_CHARACTERISTICS, sink, self.cancel.clone())
            .await?;
        self.link = Some(link);
        self.notifications = Some(notifications);
        info!("Subscribed to health notifications on {}", device.name());
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let link = self.link.as_mut().ok_or(IoError::NotConnected)?;
        link.write(bytes).await
    }

    async fn receive(&mut self, _timeout: Duration) -> Result<Vec<RawFrame>, IoError> {
        let notifications = self.notifications.as_mut().ok_or(IoError::NotConnected)?;
        let mut frames = Vec::new();
        loop {
            match notifications.try_recv() {
                Ok(frame) => frames.push(frame),
                Err(TryRecvError::Empty) => break,
                // report what arrived first; the next call sees the close
                Err(TryRecvError::Disconnected) if frames.is_empty() => {
                    return Err(IoError::Closed);
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        debug!("Drained {} notifications", frames.len());
        Ok(frames)
    }

    async fn close(&mut self) {
        self.cancel.cancel();
        self.notifications = None;
        if let Some(mut link) = self.link.take() {
            link.disconnect().await;
            info!("Attribute link closed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_HEART_RATE_MEASUREMENT;
    use crate::core::bluetooth::types::Capability;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory attribute stack: hands the sink to the test and records writes.
    #[derive(Default)]
    pub struct FakeGatt {
        pub sink: StdMutex<Option<mpsc::Sender<RawFrame>>>,
        pub writes: Arc<StdMutex<Vec<Vec<u8>>>>,
        pub disconnects: Arc<AtomicUsize>,
        pub subscribed: StdMutex<Vec<Uuid>>,
    }

    struct FakeLink {
        writes: Arc<StdMutex<Vec<Vec<u8>>>>,
        disconnects: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GattLink for FakeLink {
        async fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl GattConnector for FakeGatt {
        async fn open(
            &self,
            _device: &DeviceHandle,
            characteristics: &[Uuid],
            sink: mpsc::Sender<RawFrame>,
            _cancel: CancellationToken,
        ) -> Result<Box<dyn GattLink>, ConnectError> {
            *self.subscribed.lock().unwrap() = characteristics.to_vec();
            *self.sink.lock().unwrap() = Some(sink);
            Ok(Box::new(FakeLink {
                writes: self.writes.clone(),
                disconnects: self.disconnects.clone(),
            }))
        }
    }

    fn device() -> DeviceHandle {
        DeviceHandle::new("watch-1", "Galaxy Watch5", Capability::AttributeStreaming)
    }

    #[tokio::test]
    async fn test_drains_pushed_notifications() {
        let gatt = Arc::new(FakeGatt::default());
        let mut transport = AttributeTransport::new(gatt.clone());
        transport.connect(&device()).await.unwrap();
        assert_eq!(gatt.subscribed.lock().unwrap().len(), 3);

        assert!(transport.receive(Duration::ZERO).await.unwrap().is_empty());

        let sink = gatt.sink.lock().unwrap().clone().unwrap();
        sink.send(RawFrame::attribute(UUID_HEART_RATE_MEASUREMENT, vec![0, 70]))
            .await
            .unwrap();
        sink.send(RawFrame::attribute(UUID_HEART_RATE_MEASUREMENT, vec![0, 71]))
            .await
            .unwrap();
        let frames = transport.receive(Duration::ZERO).await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].bytes, vec![0, 71]);
    }

    #[tokio::test]
    async fn test_dropped_sinks_mean_remote_close() {
        let gatt = Arc::new(FakeGatt::default());
        let mut transport = AttributeTransport::new(gatt.clone());
        transport.connect(&device()).await.unwrap();
        let sink = gatt.sink.lock().unwrap().take().unwrap();
        sink.send(RawFrame::attribute(UUID_HEART_RATE_MEASUREMENT, vec![0, 70]))
            .await
            .unwrap();
        drop(sink);

        assert_eq!(transport.receive(Duration::ZERO).await.unwrap().len(), 1);
        assert_eq!(transport.receive(Duration::ZERO).await, Err(IoError::Closed));
    }

    #[tokio::test]
    async fn test_writes_go_to_link() {
        let gatt = Arc::new(FakeGatt::default());
        let mut transport = AttributeTransport::new(gatt.clone());
        assert_eq!(transport.send(b"GET_STEPS").await, Err(IoError::NotConnected));
        transport.connect(&device()).await.unwrap();
        transport.send(b"GET_STEPS").await.unwrap();
        assert_eq!(gatt.writes.lock().unwrap()[0], b"GET_STEPS".to_vec());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let gatt = Arc::new(FakeGatt::default());
        let mut transport = AttributeTransport::new(gatt.clone());
        transport.close().await;
        transport.connect(&device()).await.unwrap();
        transport.close().await;
        transport.close().await;
        assert_eq!(gatt.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(transport.receive(Duration::ZERO).await, Err(IoError::NotConnected));
    }
}
