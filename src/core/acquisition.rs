//! Acquisition loop
//! A cancellable periodic task that pulls frames from the bound transport,
//! decodes them, and emits exactly one sample per cycle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AcquisitionConfig;
use crate::core::bluetooth::{RawFrame, SharedTransport};
use crate::core::codec::PayloadCodec;
use crate::core::events::EventDispatcher;
use crate::core::sample::HealthSample;
use crate::core::scorer;
use crate::error::IoError;

/// Time source for the loop
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);

    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock timestamps, tokio timers
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Cancelled,
    /// The transport closed or exhausted the consecutive-error budget
    TransportFailed(IoError),
}

pub struct AcquisitionLoop {
    transport: Option<SharedTransport>,
    codec: PayloadCodec,
    dispatcher: EventDispatcher,
    clock: Arc<dyn Clock>,
    config: AcquisitionConfig,
}

impl AcquisitionLoop {
    /// With no transport every cycle emits a synthetic sample.
    pub fn new(
        transport: Option<SharedTransport>,
        dispatcher: EventDispatcher,
        clock: Arc<dyn Clock>,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            transport,
            codec: PayloadCodec::default(),
            dispatcher,
            clock,
            config,
        }
    }

    pub fn with_codec(mut self, codec: PayloadCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Runs until `cancel` fires or the transport fails for good.
    pub async fn run(mut self, cancel: CancellationToken) -> SessionEnd {
        let mut consecutive_errors = 0u32;
        let mut cycle = 0u64;

        loop {
            if cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }
            cycle += 1;

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                received = self.acquire() => received,
            };

            let delay = match received {
                Ok(frames) => {
                    consecutive_errors = 0;
                    debug!("Cycle {}: {} frames", cycle, frames.len());
                    let sample = self.build_sample(frames);
                    if cancel.is_cancelled() {
                        return SessionEnd::Cancelled;
                    }
                    self.dispatcher.publish_sample(sample);
                    self.config.interval()
                }
                Err(e) if !e.is_transient() => {
                    warn!("Cycle {}: transport lost: {}", cycle, e);
                    return SessionEnd::TransportFailed(e);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        "Cycle {}: I/O error {}/{}: {}",
                        cycle, consecutive_errors, self.config.max_consecutive_io_errors, e
                    );
                    if consecutive_errors >= self.config.max_consecutive_io_errors {
                        error!("Too many consecutive I/O errors, ending session");
                        return SessionEnd::TransportFailed(e);
                    }
                    let sample = self.synthetic_sample();
                    if cancel.is_cancelled() {
                        return SessionEnd::Cancelled;
                    }
                    self.dispatcher.publish_sample(sample);
                    self.config.error_backoff()
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = self.clock.sleep(delay) => {}
            }
        }
    }

    async fn acquire(&mut self) -> Result<Vec<RawFrame>, IoError> {
        match &self.transport {
            Some(transport) => {
                let mut transport = transport.lock().await;
                transport.receive(self.config.read_timeout()).await
            }
            None => Ok(Vec::new()),
        }
    }

    fn build_sample(&mut self, frames: Vec<RawFrame>) -> HealthSample {
        let now = self.clock.now();
        let merged = frames
            .iter()
            .map(|frame| self.codec.decode_logged(frame, now))
            .reduce(HealthSample::merge);
        match merged {
            Some(sample) => scorer::annotate(sample),
            None => self.synthetic_sample(),
        }
    }

    fn synthetic_sample(&mut self) -> HealthSample {
        let now = self.clock.now();
        scorer::annotate(self.codec.synthetic().sample(now))
    }
}

/// A running acquisition loop. At most one exists per link.
pub struct MonitoringSession {
    cancel: CancellationToken,
    handle: JoinHandle<SessionEnd>,
}

impl MonitoringSession {
    /// Spawns `acquisition`; `on_end` runs inside the task once the loop exits.
    pub fn spawn<F, Fut>(acquisition: AcquisitionLoop, on_end: F) -> Self
    where
        F: FnOnce(SessionEnd) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();
        let handle = tokio::spawn(async move {
            let end = acquisition.run(cancel_for_task).await;
            info!("Acquisition loop exited: {:?}", end);
            on_end(end.clone()).await;
            end
        });
        Self { cancel, handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels the loop and waits until it has exited.
    pub async fn stop(self) -> Option<SessionEnd> {
        self.cancel.cancel();
        match self.handle.await {
            Ok(end) => Some(end),
            Err(e) => {
                if e.is_cancelled() {
                    info!("Acquisition task was cancelled.");
                } else {
                    error!("Acquisition task finished with an unexpected join error: {:?}", e);
                }
                None
            }
        }
    }
}
