//! Event dispatch
//! Typed fan-out of link status changes and samples to every registered
//! consumer, plus the persistence consumer that drives an abstract store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core::bluetooth::LinkStatus;
use crate::core::sample::{HealthSample, Provenance};
use crate::utils::ensure_directory_exists;

/// Everything the pipeline emits
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    LinkStatus(LinkStatus),
    Sample(HealthSample),
}

/// Broadcasts events in emission order. Consumers registered later never see
/// earlier events; a consumer that has gone away is dropped on the next publish.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    consumers: Arc<Mutex<Vec<mpsc::UnboundedSender<PipelineEvent>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a consumer and returns its event stream.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn consumer_count(&self) -> usize {
        self.lock().len()
    }

    pub fn publish_status(&self, status: LinkStatus) {
        self.publish(PipelineEvent::LinkStatus(status));
    }

    pub fn publish_sample(&self, sample: HealthSample) {
        self.publish(PipelineEvent::Sample(sample));
    }

    /// Sends never block, so a slow consumer cannot hold up the others.
    pub fn publish(&self, event: PipelineEvent) {
        let mut consumers = self.lock();
        consumers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<PipelineEvent>>> {
        self.consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Persisted projection of a sample's sleep fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub timestamp: DateTime<Utc>,
    pub quality_pct: u8,
    pub duration_hours: f32,
    pub deep_hours: f32,
    pub light_hours: f32,
    pub rem_hours: f32,
    pub quality_score: Option<u8>,
    pub provenance: Provenance,
}

impl SleepRecord {
    /// `None` when the sample carries no sleep data.
    pub fn from_sample(sample: &HealthSample) -> Option<Self> {
        let quality_pct = sample.sleep_quality_pct()?;
        let duration_hours = sample.sleep_duration_hours()?;
        let stages = sample.sleep_stages();
        Some(Self {
            timestamp: sample.timestamp(),
            quality_pct,
            duration_hours,
            deep_hours: stages.deep_hours,
            light_hours: stages.light_hours,
            rem_hours: stages.rem_hours,
            quality_score: sample.quality_score(),
            provenance: sample.sources().sleep,
        })
    }
}

/// Storage collaborator invoked for every emitted sample
#[async_trait]
pub trait SampleStore: Send + Sync {
    async fn store(&self, sample: &HealthSample) -> Result<()>;
}

/// Drains samples into `store` until the dispatcher goes away.
/// Store failures are logged and the stream continues.
pub fn spawn_store_consumer(
    dispatcher: &EventDispatcher,
    store: Arc<dyn SampleStore>,
) -> JoinHandle<()> {
    let mut events = dispatcher.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let PipelineEvent::Sample(sample) = event {
                match store.store(&sample).await {
                    Ok(()) => debug!("Stored sample at {}", sample.timestamp()),
                    Err(e) => error!("Failed to store sample: {:#}", e),
                }
            }
        }
        info!("Store consumer finished");
    })
}

/// Appends one [`SleepRecord`] per sample as a JSON line
pub struct JsonLinesStore {
    path: PathBuf,
}

impl JsonLinesStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory_exists(dir).await?;
        }
        Ok(Self { path })
    }
}

#[async_trait]
impl SampleStore for JsonLinesStore {
    async fn store(&self, sample: &HealthSample) -> Result<()> {
        let Some(record) = SleepRecord::from_sample(sample) else {
            debug!("Sample at {} carries no sleep data, not persisted", sample.timestamp());
            return Ok(());
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample(bpm: u16) -> HealthSample {
        HealthSample::builder(Utc::now())
            .heart_rate(bpm, Provenance::Measured)
            .build()
    }

    #[tokio::test]
    async fn test_broadcast_in_order_to_all_consumers() {
        let dispatcher = EventDispatcher::new();
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        dispatcher.publish_status(LinkStatus::Connecting);
        dispatcher.publish_sample(sample(61));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await, Some(PipelineEvent::LinkStatus(LinkStatus::Connecting)));
            match rx.recv().await {
                Some(PipelineEvent::Sample(s)) => assert_eq!(s.heart_rate_bpm(), Some(61)),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_no_replay_for_late_consumers() {
        let dispatcher = EventDispatcher::new();
        dispatcher.publish_status(LinkStatus::Connecting);
        let mut late = dispatcher.subscribe();
        dispatcher.publish_status(LinkStatus::Disconnected);
        assert_eq!(
            late.recv().await,
            Some(PipelineEvent::LinkStatus(LinkStatus::Disconnected))
        );
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_consumer_does_not_affect_others() {
        let dispatcher = EventDispatcher::new();
        let gone = dispatcher.subscribe();
        let mut alive = dispatcher.subscribe();
        drop(gone);

        dispatcher.publish_sample(sample(70));
        assert!(matches!(alive.recv().await, Some(PipelineEvent::Sample(_))));
        assert_eq!(dispatcher.consumer_count(), 1);
    }

    struct FlakyStore {
        calls: AtomicUsize,
        stored: Mutex<Vec<u16>>,
    }

    #[async_trait]
    impl SampleStore for FlakyStore {
        async fn store(&self, sample: &HealthSample) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("disk full");
            }
            self.stored.lock().unwrap().extend(sample.heart_rate_bpm());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failures_do_not_stop_the_stream() {
        let dispatcher = EventDispatcher::new();
        let store = Arc::new(FlakyStore {
            calls: AtomicUsize::new(0),
            stored: Mutex::new(Vec::new()),
        });
        let handle = spawn_store_consumer(&dispatcher, store.clone());

        dispatcher.publish_sample(sample(60));
        dispatcher.publish_status(LinkStatus::Disconnected);
        dispatcher.publish_sample(sample(65));
        drop(dispatcher);
        handle.await.unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*store.stored.lock().unwrap(), vec![65]);
    }

    #[test]
    fn test_sleep_record_projection() {
        let s = HealthSample::builder(Utc::now())
            .sleep(88, 8.0, Provenance::Measured)
            .build();
        let record = SleepRecord::from_sample(&s).unwrap();
        assert_eq!(record.quality_pct, 88);
        assert!((record.deep_hours - 2.4).abs() < 1e-5);
        assert!((record.light_hours - 4.0).abs() < 1e-5);
        assert!((record.rem_hours - 1.6).abs() < 1e-5);
        assert_eq!(record.provenance, Provenance::Measured);

        assert!(SleepRecord::from_sample(&sample(60)).is_none());
    }

    #[tokio::test]
    async fn test_json_lines_store_appends_sleep_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sleep.jsonl");
        let store = JsonLinesStore::open(&path).await.unwrap();
        let night = |quality, hours| {
            HealthSample::builder(Utc::now())
                .heart_rate(58, Provenance::Measured)
                .sleep(quality, hours, Provenance::Measured)
                .build()
        };
        store.store(&night(80, 7.5)).await.unwrap();
        // no sleep fields, nothing to persist
        store.store(&sample(62)).await.unwrap();
        store.store(&night(91, 6.0)).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let records: Vec<SleepRecord> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].quality_pct, 80);
        assert!((records[0].deep_hours - 2.25).abs() < 1e-5);
        assert_eq!(records[1].quality_pct, 91);
        assert!((records[1].rem_hours - 1.2).abs() < 1e-5);
    }
}
