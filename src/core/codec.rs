//! Payload codec
//! Turns raw frames into [`HealthSample`]s. Decoding never fails: a field that
//! cannot be read or does not validate is replaced by a synthetic value and the
//! problem is reported as a [`DecodeAnomaly`].

use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};
use log::warn;
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_HEART_RATE_MEASUREMENT, UUID_SLEEP_DATA_CHAR, UUID_STEP_COUNT_CHAR,
};
use crate::core::bluetooth::{FrameSource, RawFrame};
use crate::core::sample::{HealthSample, HealthSampleBuilder, Provenance};
use crate::core::scorer;
use crate::core::synthetic::SyntheticGenerator;

/// Accepted heart rate for frames received over either transport
pub const FRAME_HEART_RATE_BPM: RangeInclusive<i64> = 40..=200;
/// Accepted heart rate for platform sensor readings
pub const SENSOR_HEART_RATE_BPM: RangeInclusive<i64> = 30..=220;
/// Accepted step count for platform sensor readings
pub const SENSOR_STEP_COUNT: RangeInclusive<i64> = 0..=100_000;
/// Decoded frame step counts are clamped into this range
pub const FRAME_STEP_CLAMP: RangeInclusive<u32> = 0..=50_000;
/// Sleep quality is a percentage
pub const SLEEP_QUALITY_PCT: RangeInclusive<u8> = 0..=100;

/// Serial frames need this many bytes before the sleep block is read.
const SERIAL_SLEEP_MIN_LEN: usize = 8;
const SERIAL_QUALITY_OFFSET: usize = 4;
const SERIAL_DURATION_OFFSET: usize = 5;
const TEXT_HEART_RATE_PREFIX: &str = "HR:";

/// Field group named in anomaly reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    HeartRate,
    Steps,
    Sleep,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartRate => f.write_str("heart rate"),
            Self::Steps => f.write_str("step count"),
            Self::Sleep => f.write_str("sleep"),
        }
    }
}

/// A malformed or out-of-range payload. Recorded, never propagated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeAnomaly {
    #[error("{field}: frame too short, need {needed} bytes, got {actual}")]
    Truncated {
        field: Field,
        needed: usize,
        actual: usize,
    },

    #[error("{field}: value {value} outside {min}..={max}")]
    OutOfRange {
        field: Field,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("{field}: value {value} clamped to {clamped}")]
    Clamped { field: Field, value: i64, clamped: i64 },

    #[error("{field}: {value} does not fit {target}, saturated to {saturated}")]
    Narrowed {
        field: Field,
        value: String,
        target: &'static str,
        saturated: i64,
    },

    #[error("{field}: non-finite value {value}")]
    NotFinite { field: Field, value: f64 },

    #[error("no decoder for attribute {0}")]
    UnknownAttribute(Uuid),

    #[error("unreadable text frame {0:?}")]
    MalformedText(String),
}

/// Result of decoding one frame
#[derive(Debug, Clone)]
pub struct Decoded {
    pub sample: HealthSample,
    pub anomalies: Vec<DecodeAnomaly>,
}

/// Numeric reading as reported by a platform sensor API
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
        }
    }
}

impl SensorValue {
    /// Narrows into `min..=max`, saturating at the bounds and reporting when it had to.
    /// Fractional parts are truncated.
    pub fn narrow(
        self,
        field: Field,
        min: i64,
        max: i64,
        target: &'static str,
    ) -> Result<(i64, Option<DecodeAnomaly>), DecodeAnomaly> {
        let saturate = |saturated: i64| DecodeAnomaly::Narrowed {
            field,
            value: self.to_string(),
            target,
            saturated,
        };
        match self {
            Self::I32(v) => Ok(saturate_int(i64::from(v), min, max, saturate)),
            Self::I64(v) => Ok(saturate_int(v, min, max, saturate)),
            Self::F32(v) => narrow_float(f64::from(v), field, min, max, saturate),
            Self::F64(v) => narrow_float(v, field, min, max, saturate),
        }
    }
}

fn saturate_int(
    v: i64,
    min: i64,
    max: i64,
    saturate: impl Fn(i64) -> DecodeAnomaly,
) -> (i64, Option<DecodeAnomaly>) {
    if v > max {
        (max, Some(saturate(max)))
    } else if v < min {
        (min, Some(saturate(min)))
    } else {
        (v, None)
    }
}

fn narrow_float(
    v: f64,
    field: Field,
    min: i64,
    max: i64,
    saturate: impl Fn(i64) -> DecodeAnomaly,
) -> Result<(i64, Option<DecodeAnomaly>), DecodeAnomaly> {
    if !v.is_finite() {
        return Err(DecodeAnomaly::NotFinite { field, value: v });
    }
    let t = v.trunc();
    if t > max as f64 {
        Ok((max, Some(saturate(max))))
    } else if t < min as f64 {
        Ok((min, Some(saturate(min))))
    } else {
        Ok((t as i64, None))
    }
}

/// Platform sensor readings to decode; absent fields stay absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorReading {
    pub heart_rate: Option<SensorValue>,
    pub steps: Option<SensorValue>,
}

/// Frame decoder with a synthetic fallback source
#[derive(Debug, Clone, Default)]
pub struct PayloadCodec {
    synth: SyntheticGenerator,
}

impl PayloadCodec {
    pub fn new(synth: SyntheticGenerator) -> Self {
        Self { synth }
    }

    /// Fallback source shared with callers that need whole synthetic samples
    pub fn synthetic(&mut self) -> &mut SyntheticGenerator {
        &mut self.synth
    }

    /// Decodes a frame stamped with the current time, logging every anomaly.
    pub fn decode(&mut self, frame: &RawFrame) -> HealthSample {
        self.decode_logged(frame, Utc::now())
    }

    /// Like [`decode`](Self::decode) with a caller-supplied timestamp.
    pub fn decode_logged(&mut self, frame: &RawFrame, timestamp: DateTime<Utc>) -> HealthSample {
        let decoded = self.decode_at(frame, timestamp);
        for anomaly in &decoded.anomalies {
            warn!("Decode anomaly on {}: {}", frame.source, anomaly);
        }
        decoded.sample
    }

    pub fn decode_at(&mut self, frame: &RawFrame, timestamp: DateTime<Utc>) -> Decoded {
        let mut report = Report::new(timestamp);
        match frame.source {
            FrameSource::Attribute(uuid) if uuid == UUID_HEART_RATE_MEASUREMENT => {
                let hr = attribute_heart_rate(&frame.bytes)
                    .and_then(|bpm| within(Field::HeartRate, i64::from(bpm), FRAME_HEART_RATE_BPM));
                report.heart_rate(hr, &mut self.synth);
                report.steps(Err(None), &mut self.synth);
                report.sleep(Err(None), &mut self.synth);
            }
            FrameSource::Attribute(uuid) if uuid == UUID_STEP_COUNT_CHAR => {
                report.heart_rate(Err(None), &mut self.synth);
                let steps = le_u32(&frame.bytes).map(|raw| clamp_steps(i64::from(raw)));
                report.clamped_steps(steps, &mut self.synth);
                report.sleep(Err(None), &mut self.synth);
            }
            FrameSource::Attribute(uuid) if uuid == UUID_SLEEP_DATA_CHAR => {
                report.heart_rate(Err(None), &mut self.synth);
                report.steps(Err(None), &mut self.synth);
                report.sleep(sleep_block(&frame.bytes, 0, 1, 2), &mut self.synth);
            }
            FrameSource::Attribute(uuid) => {
                report.anomalies.push(DecodeAnomaly::UnknownAttribute(uuid));
                report.heart_rate(Err(None), &mut self.synth);
                report.steps(Err(None), &mut self.synth);
                report.sleep(Err(None), &mut self.synth);
            }
            FrameSource::SerialStream if frame.bytes.starts_with(TEXT_HEART_RATE_PREFIX.as_bytes()) => {
                report.heart_rate(text_heart_rate(&frame.bytes), &mut self.synth);
                report.steps(Err(None), &mut self.synth);
                report.sleep(Err(None), &mut self.synth);
            }
            FrameSource::SerialStream => {
                let hr = be_u16(&frame.bytes, 0, Field::HeartRate)
                    .and_then(|bpm| within(Field::HeartRate, i64::from(bpm), FRAME_HEART_RATE_BPM));
                report.heart_rate(hr, &mut self.synth);
                let steps = be_u16(&frame.bytes, 2, Field::Steps)
                    .map(|raw| clamp_steps(i64::from(raw)));
                report.clamped_steps(steps, &mut self.synth);
                report.sleep(
                    sleep_block(
                        &frame.bytes,
                        SERIAL_QUALITY_OFFSET,
                        SERIAL_DURATION_OFFSET,
                        SERIAL_SLEEP_MIN_LEN,
                    ),
                    &mut self.synth,
                );
            }
        }
        report.finish()
    }

    /// Decodes platform sensor readings with the sensor validity ranges.
    pub fn decode_sensor(&mut self, reading: SensorReading, timestamp: DateTime<Utc>) -> Decoded {
        let mut report = Report::new(timestamp);

        if let Some(value) = reading.heart_rate {
            let hr = value
                .narrow(Field::HeartRate, 0, i64::from(u16::MAX), "u16")
                .map_err(Some)
                .and_then(|(v, narrowed)| {
                    report.anomalies.extend(narrowed);
                    within::<u16>(Field::HeartRate, v, SENSOR_HEART_RATE_BPM)
                });
            report.heart_rate(hr, &mut self.synth);
        }

        if let Some(value) = reading.steps {
            let steps = value
                .narrow(Field::Steps, 0, i64::from(u32::MAX), "u32")
                .map_err(Some)
                .and_then(|(v, narrowed)| {
                    report.anomalies.extend(narrowed);
                    within::<u32>(Field::Steps, v, SENSOR_STEP_COUNT)
                });
            report.steps(steps, &mut self.synth);
        }

        report.finish()
    }
}

/// `Err(None)` means the field is not carried by the frame; `Err(Some(_))` that it was unreadable.
type FieldResult<T> = Result<T, Option<DecodeAnomaly>>;

struct Report {
    builder: HealthSampleBuilder,
    anomalies: Vec<DecodeAnomaly>,
}

impl Report {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            builder: HealthSample::builder(timestamp),
            anomalies: Vec::new(),
        }
    }

    fn fallback(&mut self, anomaly: Option<DecodeAnomaly>) {
        self.anomalies.extend(anomaly);
    }

    fn heart_rate(&mut self, value: FieldResult<u16>, synth: &mut SyntheticGenerator) {
        let builder = self.builder.clone();
        self.builder = match value {
            Ok(bpm) => builder.heart_rate(bpm, Provenance::Measured),
            Err(anomaly) => {
                self.fallback(anomaly);
                builder.heart_rate(synth.heart_rate(), Provenance::Synthetic)
            }
        };
    }

    fn steps(&mut self, value: FieldResult<u32>, synth: &mut SyntheticGenerator) {
        let builder = self.builder.clone();
        self.builder = match value {
            Ok(steps) => builder.steps(steps, Provenance::Measured),
            Err(anomaly) => {
                self.fallback(anomaly);
                builder.steps(synth.steps(), Provenance::Synthetic)
            }
        };
    }

    fn clamped_steps(
        &mut self,
        value: FieldResult<(u32, Option<DecodeAnomaly>)>,
        synth: &mut SyntheticGenerator,
    ) {
        let value = value.map(|(steps, clamped)| {
            self.anomalies.extend(clamped);
            steps
        });
        self.steps(value, synth);
    }

    fn sleep(&mut self, value: FieldResult<(u8, f32)>, synth: &mut SyntheticGenerator) {
        let builder = self.builder.clone();
        self.builder = match value {
            Ok((quality, hours)) => builder.sleep(quality, hours, Provenance::Measured),
            Err(anomaly) => {
                self.fallback(anomaly);
                builder.sleep(
                    synth.sleep_quality(),
                    synth.sleep_duration(),
                    Provenance::Synthetic,
                )
            }
        };
    }

    fn finish(self) -> Decoded {
        Decoded {
            sample: scorer::annotate(self.builder.build()),
            anomalies: self.anomalies,
        }
    }
}

fn require(bytes: &[u8], needed: usize, field: Field) -> FieldResult<()> {
    if bytes.len() < needed {
        Err(Some(DecodeAnomaly::Truncated {
            field,
            needed,
            actual: bytes.len(),
        }))
    } else {
        Ok(())
    }
}

fn within<T: TryFrom<i64>>(field: Field, value: i64, range: RangeInclusive<i64>) -> FieldResult<T> {
    let out_of_range = || {
        Some(DecodeAnomaly::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    };
    if !range.contains(&value) {
        return Err(out_of_range());
    }
    T::try_from(value).map_err(|_| out_of_range())
}

/// Flags byte, then an 8-bit value (bit 0 clear) or a little-endian 16-bit value (bit 0 set).
fn attribute_heart_rate(bytes: &[u8]) -> FieldResult<u16> {
    require(bytes, 1, Field::HeartRate)?;
    if bytes[0] & 0x01 == 0 {
        require(bytes, 2, Field::HeartRate)?;
        Ok(u16::from(bytes[1]))
    } else {
        require(bytes, 3, Field::HeartRate)?;
        Ok(u16::from_le_bytes([bytes[1], bytes[2]]))
    }
}

fn text_heart_rate(bytes: &[u8]) -> FieldResult<u16> {
    let text = String::from_utf8_lossy(bytes);
    let value = text
        .trim()
        .strip_prefix(TEXT_HEART_RATE_PREFIX)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| Some(DecodeAnomaly::MalformedText(text.trim().to_string())))?;
    within(Field::HeartRate, value, SENSOR_HEART_RATE_BPM)
}

fn le_u32(bytes: &[u8]) -> FieldResult<u32> {
    require(bytes, 4, Field::Steps)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn be_u16(bytes: &[u8], offset: usize, field: Field) -> FieldResult<u16> {
    require(bytes, offset + 2, field)?;
    Ok(u16::from_be_bytes([bytes[offset], bytes[offset + 1]]))
}

fn clamp_steps(raw: i64) -> (u32, Option<DecodeAnomaly>) {
    let (min, max) = (*FRAME_STEP_CLAMP.start(), *FRAME_STEP_CLAMP.end());
    let clamped = raw.clamp(i64::from(min), i64::from(max));
    let anomaly = (clamped != raw).then_some(DecodeAnomaly::Clamped {
        field: Field::Steps,
        value: raw,
        clamped,
    });
    (clamped as u32, anomaly)
}

/// Quality byte and tenths-of-an-hour duration byte, read only when the frame holds `min_len` bytes.
fn sleep_block(
    bytes: &[u8],
    quality_offset: usize,
    duration_offset: usize,
    min_len: usize,
) -> FieldResult<(u8, f32)> {
    require(bytes, min_len, Field::Sleep)?;
    let quality = bytes[quality_offset];
    if !SLEEP_QUALITY_PCT.contains(&quality) {
        return Err(Some(DecodeAnomaly::OutOfRange {
            field: Field::Sleep,
            value: i64::from(quality),
            min: i64::from(*SLEEP_QUALITY_PCT.start()),
            max: i64::from(*SLEEP_QUALITY_PCT.end()),
        }));
    }
    Ok((quality, f32::from(bytes[duration_offset]) / 10.0))
}
