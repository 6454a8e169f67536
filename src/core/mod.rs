//! Core functionality for the sleep-sensor link
//! This module contains the device link and the telemetry pipeline built on it.

pub mod acquisition;
pub mod bluetooth;
pub mod codec;
pub mod events;
pub mod sample;
pub mod scorer;
pub mod synthetic;

// Re-export commonly used types
pub use acquisition::{AcquisitionLoop, Clock, MonitoringSession, SessionEnd, TokioClock};
pub use bluetooth::{DeviceHandle, LinkManager, LinkStatus, RawFrame};
pub use codec::{DecodeAnomaly, PayloadCodec};
pub use events::{EventDispatcher, PipelineEvent, SampleStore, SleepRecord};
pub use sample::{HealthSample, Provenance};
pub use synthetic::SyntheticGenerator;
