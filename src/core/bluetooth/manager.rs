//! Link state machine
//! Owns the transport for one device, drives connect and teardown, and runs
//! at most one monitoring session against it.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::AcquisitionConfig;
use crate::core::acquisition::{AcquisitionLoop, MonitoringSession, SessionEnd, TokioClock};
use crate::core::bluetooth::commands::{CommandSender, HealthCommand};
use crate::core::bluetooth::constants::{CONNECT_TIMEOUT_SECS, SEND_TIMEOUT_MS};
use crate::core::bluetooth::device::TransportSelector;
use crate::core::bluetooth::transport::{SharedTransport, Transport, TransportFactory};
use crate::core::bluetooth::types::{DeviceHandle, LinkStatus, TransportKind};
use crate::core::events::EventDispatcher;
use crate::error::{ConnectError, IoError, LinkError};

/// Status plus the number of the connect attempt it belongs to.
/// Every `begin_connect` and every teardown moves `attempt` on, so a stale
/// attempt can neither finish nor fail a newer link.
struct LinkState {
    status: LinkStatus,
    attempt: u64,
}

/// State shared with the running session
struct LinkShared {
    state: StdMutex<LinkState>,
    dispatcher: EventDispatcher,
    transport: Mutex<Option<SharedTransport>>,
}

impl LinkShared {
    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Updates and announces under the state lock.
    /// Re-entering the current state is not a transition.
    fn transition(state: &mut LinkState, next: LinkStatus, dispatcher: &EventDispatcher) {
        if state.status == next {
            return;
        }
        info!("Link status: {:?} -> {:?}", state.status, next);
        state.status = next.clone();
        dispatcher.publish_status(next);
    }

    /// Returns the attempt number the caller must present to `finish_connect`.
    fn begin_connect(&self) -> Result<u64, ConnectError> {
        let mut state = self.lock_state();
        if state.status.is_active() {
            return Err(ConnectError::AlreadyActive);
        }
        state.attempt += 1;
        Self::transition(&mut state, LinkStatus::Connecting, &self.dispatcher);
        Ok(state.attempt)
    }

    /// False when a disconnect overtook the attempt.
    fn finish_connect(&self, attempt: u64, device_name: &str) -> bool {
        let mut state = self.lock_state();
        if state.attempt != attempt || state.status != LinkStatus::Connecting {
            return false;
        }
        Self::transition(
            &mut state,
            LinkStatus::Connected {
                device_name: device_name.to_string(),
            },
            &self.dispatcher,
        );
        true
    }

    /// Attempt of the link that is currently connected
    fn connected_attempt(&self) -> Option<u64> {
        let state = self.lock_state();
        state.status.is_connected().then_some(state.attempt)
    }

    fn owns_active_link(&self, attempt: u64) -> bool {
        let state = self.lock_state();
        state.attempt == attempt && state.status.is_active()
    }

    /// Reports `reason`, then settles on `Disconnected`. No-op once `attempt`
    /// is no longer the active link.
    fn settle_failed(&self, attempt: u64, reason: String) {
        let mut state = self.lock_state();
        if state.attempt != attempt || !state.status.is_active() {
            return;
        }
        state.attempt += 1;
        Self::transition(&mut state, LinkStatus::Error { reason }, &self.dispatcher);
        Self::transition(&mut state, LinkStatus::Disconnected, &self.dispatcher);
    }

    /// Ends whatever attempt is current.
    fn settle_disconnected(&self) {
        let mut state = self.lock_state();
        state.attempt += 1;
        Self::transition(&mut state, LinkStatus::Disconnected, &self.dispatcher);
    }

    async fn close(transport: Option<SharedTransport>) {
        if let Some(transport) = transport {
            transport.lock().await.close().await;
            info!("Transport released");
        }
    }

    /// Closes the bound transport at most once, then settles on `Disconnected`.
    /// The slot stays locked throughout so no attempt can install a transport
    /// in between.
    async fn teardown(&self) {
        let mut slot = self.transport.lock().await;
        Self::close(slot.take()).await;
        self.settle_disconnected();
    }

    /// Session-side teardown after the transport of `attempt` failed.
    async fn fail_link(&self, attempt: u64, reason: String) {
        let mut slot = self.transport.lock().await;
        if !self.owns_active_link(attempt) {
            debug!("Ignoring failure of superseded link: {}", reason);
            return;
        }
        warn!("Link failed: {}", reason);
        Self::close(slot.take()).await;
        self.settle_failed(attempt, reason);
    }
}

/// Link to one sensor device
pub struct LinkManager {
    shared: Arc<LinkShared>,
    session: Mutex<Option<MonitoringSession>>,
    factory: Arc<dyn TransportFactory>,
    selector: TransportSelector,
    connect_timeout: Duration,
    send_timeout: Duration,
    acquisition: AcquisitionConfig,
}

impl LinkManager {
    pub fn new(factory: Arc<dyn TransportFactory>, dispatcher: EventDispatcher) -> Self {
        Self {
            shared: Arc::new(LinkShared {
                state: StdMutex::new(LinkState {
                    status: LinkStatus::Disconnected,
                    attempt: 0,
                }),
                dispatcher,
                transport: Mutex::new(None),
            }),
            session: Mutex::new(None),
            factory,
            selector: TransportSelector::default(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            send_timeout: Duration::from_millis(SEND_TIMEOUT_MS),
            acquisition: AcquisitionConfig::default(),
        }
    }

    pub fn with_selector(mut self, selector: TransportSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_acquisition_config(mut self, config: AcquisitionConfig) -> Self {
        self.acquisition = config;
        self
    }

    /// Upper bound on one outbound write, including waiting for the transport.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Current status; never an intermediate value.
    pub fn status(&self) -> LinkStatus {
        self.shared.lock_state().status.clone()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Transport the selector picks for `device`
    pub fn transport_kind_for(&self, device: &DeviceHandle) -> TransportKind {
        self.selector.select(device)
    }

    /// Connects to `device`. Fails fast while another attempt is in flight or a
    /// link is up; a failed attempt leaves the link `Disconnected` and may be retried.
    pub async fn connect(&self, device: &DeviceHandle) -> Result<(), ConnectError> {
        let attempt = self.shared.begin_connect()?;
        info!("Connecting to {} ({})", device.name(), device.id());

        let mut transport = match self.open_transport(device).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Connect to {} failed: {}", device.name(), e);
                self.shared.settle_failed(attempt, e.to_string());
                return Err(e);
            }
        };

        let mut slot = self.shared.transport.lock().await;
        if !self.shared.finish_connect(attempt, device.name()) {
            drop(slot);
            info!("Connect to {} aborted by disconnect", device.name());
            transport.close().await;
            return Err(ConnectError::Aborted);
        }
        *slot = Some(Arc::new(Mutex::new(transport)));
        Ok(())
    }

    async fn open_transport(
        &self,
        device: &DeviceHandle,
    ) -> Result<Box<dyn Transport>, ConnectError> {
        let kind = self.selector.select(device);
        let required = kind.required_capability();
        if device.capability() != required {
            return Err(ConnectError::CapabilityMismatch {
                device: device.name().to_string(),
                required: required.as_str(),
            });
        }

        let mut transport = self.factory.create(kind).ok_or_else(|| {
            ConnectError::Unreachable(format!("no {:?} backend available", kind))
        })?;

        match tokio::time::timeout(self.connect_timeout, transport.connect(device)).await {
            Ok(Ok(())) => Ok(transport),
            Ok(Err(e)) => {
                transport.close().await;
                Err(e)
            }
            Err(_) => {
                transport.close().await;
                Err(ConnectError::Timeout(self.connect_timeout.as_secs()))
            }
        }
    }

    /// Stops any session, closes the transport exactly once and settles on
    /// `Disconnected`. Safe to call in any state.
    pub async fn disconnect(&self) {
        self.stop_monitoring().await;
        self.shared.teardown().await;
    }

    /// Starts acquiring from the connected device.
    pub async fn start_monitoring(&self) -> Result<(), LinkError> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| !s.is_finished()) {
            return Err(LinkError::SessionActive);
        }
        let slot = self.shared.transport.lock().await;
        let attempt = self
            .shared
            .connected_attempt()
            .ok_or(LinkError::NotConnected)?;
        let transport = slot.clone().ok_or(LinkError::NotConnected)?;
        drop(slot);

        *session = Some(self.spawn_session(Some((attempt, transport))));
        info!("Monitoring started");
        Ok(())
    }

    /// Starts a session with no transport; every sample is synthetic.
    pub async fn start_simulation(&self) -> Result<(), LinkError> {
        let mut session = self.session.lock().await;
        if session.as_ref().is_some_and(|s| !s.is_finished()) {
            return Err(LinkError::SessionActive);
        }
        *session = Some(self.spawn_session(None));
        info!("Simulated monitoring started");
        Ok(())
    }

    /// Returns once the loop has exited; no sample is emitted afterwards.
    pub async fn stop_monitoring(&self) -> Option<SessionEnd> {
        let mut session = self.session.lock().await;
        let end = match session.take() {
            Some(running) => running.stop().await,
            None => None,
        };
        if end.is_some() {
            info!("Monitoring stopped");
        }
        end
    }

    pub async fn is_monitoring(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    /// Writes raw command text to the device.
    pub async fn send_text(&self, text: &str) -> Result<(), LinkError> {
        debug!("Sending command text {:?}", text);
        self.send_bytes(text.as_bytes()).await
    }

    /// Fails with `IoError::Timeout` when the write does not complete within
    /// the send timeout; the transport lock is released either way.
    async fn send_bytes(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let transport = self
            .shared
            .transport
            .lock()
            .await
            .clone()
            .ok_or(LinkError::NotConnected)?;
        let write = async {
            let mut transport = transport.lock().await;
            transport.send(bytes).await
        };
        match tokio::time::timeout(self.send_timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!("Send of {} bytes timed out after {:?}", bytes.len(), self.send_timeout);
                Err(IoError::Timeout.into())
            }
        }
    }

    /// `link` pairs the transport with the attempt it was connected under.
    fn spawn_session(&self, link: Option<(u64, SharedTransport)>) -> MonitoringSession {
        let (attempt, transport) = match link {
            Some((attempt, transport)) => (Some(attempt), Some(transport)),
            None => (None, None),
        };
        let acquisition = AcquisitionLoop::new(
            transport,
            self.shared.dispatcher.clone(),
            Arc::new(TokioClock),
            self.acquisition.clone(),
        );
        let shared = self.shared.clone();
        MonitoringSession::spawn(acquisition, move |end| async move {
            if let (SessionEnd::TransportFailed(e), Some(attempt)) = (end, attempt) {
                shared.fail_link(attempt, e.to_string()).await;
            }
        })
    }
}

#[async_trait]
impl CommandSender for LinkManager {
    async fn send_command(&self, command: HealthCommand) -> Result<(), LinkError> {
        info!("Sending command to device: {}", command);
        self.send_bytes(&command.to_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::attribute::tests::FakeGatt;
    use crate::core::bluetooth::serial::tests::DuplexConnector;
    use crate::core::bluetooth::transport::ConnectorFactory;
    use crate::core::bluetooth::types::Capability;
    use crate::core::events::PipelineEvent;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    fn statuses(events: &mut mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<LinkStatus> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::LinkStatus(status) = event {
                out.push(status);
            }
        }
        out
    }

    fn watch() -> DeviceHandle {
        DeviceHandle::new("watch-1", "Galaxy Watch5", Capability::AttributeStreaming)
    }

    fn headset() -> DeviceHandle {
        DeviceHandle::new("AA:BB", "OldBTHeadset", Capability::LegacySerial)
    }

    #[tokio::test]
    async fn test_connect_announces_each_transition() {
        let gatt = Arc::new(FakeGatt::default());
        let factory = ConnectorFactory::new(64).with_gatt_connector(gatt);
        let dispatcher = EventDispatcher::new();
        let mut events = dispatcher.subscribe();
        let link = LinkManager::new(Arc::new(factory), dispatcher);

        link.connect(&watch()).await.unwrap();
        assert_eq!(
            statuses(&mut events),
            vec![
                LinkStatus::Connecting,
                LinkStatus::Connected {
                    device_name: "Galaxy Watch5".into()
                },
            ]
        );

        link.disconnect().await;
        assert_eq!(statuses(&mut events), vec![LinkStatus::Disconnected]);
        assert_eq!(link.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_missing_backend_fails_and_settles() {
        let dispatcher = EventDispatcher::new();
        let mut events = dispatcher.subscribe();
        let link = LinkManager::new(Arc::new(ConnectorFactory::new(64)), dispatcher);

        let err = link.connect(&headset()).await.unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable(_)));
        let seen = statuses(&mut events);
        assert_eq!(seen.first(), Some(&LinkStatus::Connecting));
        assert!(matches!(seen[1], LinkStatus::Error { .. }));
        assert_eq!(seen.last(), Some(&LinkStatus::Disconnected));
    }

    #[tokio::test]
    async fn test_capability_mismatch() {
        let gatt = Arc::new(FakeGatt::default());
        let factory = ConnectorFactory::new(64).with_gatt_connector(gatt);
        let link = LinkManager::new(Arc::new(factory), EventDispatcher::new());
        let mislabeled = DeviceHandle::new("w", "Galaxy Watch6", Capability::LegacySerial);

        let err = link.connect(&mislabeled).await.unwrap_err();
        assert_eq!(
            err,
            ConnectError::CapabilityMismatch {
                device: "Galaxy Watch6".into(),
                required: "attribute-streaming",
            }
        );
        assert_eq!(link.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_send_command_over_serial() {
        let (connector, mut remote) = DuplexConnector::new();
        let factory = ConnectorFactory::new(64).with_socket_connector(Arc::new(connector));
        let link = LinkManager::new(Arc::new(factory), EventDispatcher::new());

        assert_eq!(
            link.send_command(HealthCommand::GetSteps).await,
            Err(LinkError::NotConnected)
        );
        link.connect(&headset()).await.unwrap();
        link.send_command(HealthCommand::GetSteps).await.unwrap();

        let mut buf = [0u8; 9];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"GET_STEPS");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_send_does_not_block_disconnect() {
        let (connector, _remote) = DuplexConnector::with_capacity(64);
        let factory = ConnectorFactory::new(64).with_socket_connector(Arc::new(connector));
        let link = Arc::new(
            LinkManager::new(Arc::new(factory), EventDispatcher::new())
                .with_send_timeout(Duration::from_secs(2)),
        );
        link.connect(&headset()).await.unwrap();

        // the peer never reads, so the write cannot drain
        let sending = tokio::spawn({
            let link = link.clone();
            async move { link.send_text(&"X".repeat(1500)).await }
        });
        tokio::task::yield_now().await;

        let disconnected = tokio::time::timeout(Duration::from_secs(3), link.disconnect()).await;
        assert!(disconnected.is_ok());
        assert_eq!(sending.await.unwrap(), Err(LinkError::Io(IoError::Timeout)));
        assert_eq!(link.status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_monitoring_requires_connection() {
        let link = LinkManager::new(Arc::new(ConnectorFactory::new(64)), EventDispatcher::new());
        assert_eq!(link.start_monitoring().await, Err(LinkError::NotConnected));
        assert_eq!(link.stop_monitoring().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_session_is_rejected() {
        let link = LinkManager::new(Arc::new(ConnectorFactory::new(64)), EventDispatcher::new());
        link.start_simulation().await.unwrap();
        assert_eq!(link.start_simulation().await, Err(LinkError::SessionActive));
        assert!(link.is_monitoring().await);
        assert_eq!(link.stop_monitoring().await, Some(SessionEnd::Cancelled));
        assert!(!link.is_monitoring().await);
        link.start_simulation().await.unwrap();
        link.disconnect().await;
        assert!(!link.is_monitoring().await);
    }
}
