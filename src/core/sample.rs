//! Normalized health samples and their provenance

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fraction of sleep duration spent in deep sleep
pub const DEEP_SLEEP_FRACTION: f32 = 0.3;
/// Fraction of sleep duration spent in light sleep
pub const LIGHT_SLEEP_FRACTION: f32 = 0.5;
/// Fraction of sleep duration spent in REM sleep
pub const REM_SLEEP_FRACTION: f32 = 0.2;

/// Whether a value came from hardware or was fabricated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Measured,
    Synthetic,
}

/// Provenance of each field group in a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSources {
    pub heart_rate: Provenance,
    pub steps: Provenance,
    /// Covers both sleep quality and sleep duration
    pub sleep: Provenance,
}

impl FieldSources {
    pub const SYNTHETIC: Self = Self {
        heart_rate: Provenance::Synthetic,
        steps: Provenance::Synthetic,
        sleep: Provenance::Synthetic,
    };

    pub const MEASURED: Self = Self {
        heart_rate: Provenance::Measured,
        steps: Provenance::Measured,
        sleep: Provenance::Measured,
    };
}

/// Deep, light and REM hours derived from a sleep duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepStages {
    pub deep_hours: f32,
    pub light_hours: f32,
    pub rem_hours: f32,
}

impl SleepStages {
    pub fn from_duration(duration_hours: f32) -> Self {
        Self {
            deep_hours: duration_hours * DEEP_SLEEP_FRACTION,
            light_hours: duration_hours * LIGHT_SLEEP_FRACTION,
            rem_hours: duration_hours * REM_SLEEP_FRACTION,
        }
    }

    pub fn total(&self) -> f32 {
        self.deep_hours + self.light_hours + self.rem_hours
    }
}

/// One normalized reading. Immutable once built.
///
/// The stage breakdown is never stored; it is always derived from
/// `sleep_duration_hours` through [`HealthSample::sleep_stages`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    heart_rate_bpm: Option<u16>,
    step_count: Option<u32>,
    sleep_quality_pct: Option<u8>,
    sleep_duration_hours: Option<f32>,
    quality_score: Option<u8>,
    timestamp: DateTime<Utc>,
    sources: FieldSources,
}

impl HealthSample {
    pub fn builder(timestamp: DateTime<Utc>) -> HealthSampleBuilder {
        HealthSampleBuilder {
            sample: Self {
                heart_rate_bpm: None,
                step_count: None,
                sleep_quality_pct: None,
                sleep_duration_hours: None,
                quality_score: None,
                timestamp,
                sources: FieldSources::SYNTHETIC,
            },
        }
    }

    pub fn heart_rate_bpm(&self) -> Option<u16> {
        self.heart_rate_bpm
    }

    pub fn step_count(&self) -> Option<u32> {
        self.step_count
    }

    pub fn sleep_quality_pct(&self) -> Option<u8> {
        self.sleep_quality_pct
    }

    pub fn sleep_duration_hours(&self) -> Option<f32> {
        self.sleep_duration_hours
    }

    /// Derived sleep-quality score, present once all scorer inputs are known
    pub fn quality_score(&self) -> Option<u8> {
        self.quality_score
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn sources(&self) -> FieldSources {
        self.sources
    }

    /// Stage breakdown, zero when the duration is unknown
    pub fn sleep_stages(&self) -> SleepStages {
        SleepStages::from_duration(self.sleep_duration_hours.unwrap_or(0.0))
    }

    /// `Synthetic` when no present field came from hardware, `Measured` otherwise.
    pub fn provenance(&self) -> Provenance {
        let measured = [
            (self.heart_rate_bpm.is_some(), self.sources.heart_rate),
            (self.step_count.is_some(), self.sources.steps),
            (
                self.sleep_quality_pct.is_some() || self.sleep_duration_hours.is_some(),
                self.sources.sleep,
            ),
        ]
        .iter()
        .any(|(present, source)| *present && *source == Provenance::Measured);
        if measured {
            Provenance::Measured
        } else {
            Provenance::Synthetic
        }
    }

    /// True when every present field came from hardware
    pub fn is_fully_measured(&self) -> bool {
        (self.heart_rate_bpm.is_none() || self.sources.heart_rate == Provenance::Measured)
            && (self.step_count.is_none() || self.sources.steps == Provenance::Measured)
            && ((self.sleep_quality_pct.is_none() && self.sleep_duration_hours.is_none())
                || self.sources.sleep == Provenance::Measured)
    }

    /// Combines two samples field by field; a measured field beats a synthetic one,
    /// and on a tie `other` wins. The score is cleared and must be recomputed.
    pub fn merge(self, other: HealthSample) -> HealthSample {
        fn pick<T>(
            mine: (Option<T>, Provenance),
            theirs: (Option<T>, Provenance),
        ) -> (Option<T>, Provenance) {
            match (mine, theirs) {
                (m @ (Some(_), Provenance::Measured), (_, Provenance::Synthetic)) => m,
                (m, (None, _)) => m,
                (_, t) => t,
            }
        }

        let (heart_rate_bpm, heart_rate) = pick(
            (self.heart_rate_bpm, self.sources.heart_rate),
            (other.heart_rate_bpm, other.sources.heart_rate),
        );
        let (step_count, steps) = pick(
            (self.step_count, self.sources.steps),
            (other.step_count, other.sources.steps),
        );
        let (sleep, sleep_source) = pick(
            (
                self.sleep_quality_pct.zip(self.sleep_duration_hours),
                self.sources.sleep,
            ),
            (
                other.sleep_quality_pct.zip(other.sleep_duration_hours),
                other.sources.sleep,
            ),
        );

        HealthSample {
            heart_rate_bpm,
            step_count,
            sleep_quality_pct: sleep.map(|(q, _)| q),
            sleep_duration_hours: sleep.map(|(_, d)| d),
            quality_score: None,
            timestamp: self.timestamp.max(other.timestamp),
            sources: FieldSources {
                heart_rate,
                steps,
                sleep: sleep_source,
            },
        }
    }

    /// Returns a copy carrying the given derived score
    pub fn with_quality_score(mut self, score: Option<u8>) -> Self {
        self.quality_score = score;
        self
    }
}

/// Assembles a [`HealthSample`]; fields start empty and synthetic.
#[derive(Debug, Clone)]
pub struct HealthSampleBuilder {
    sample: HealthSample,
}

impl HealthSampleBuilder {
    pub fn heart_rate(mut self, bpm: u16, source: Provenance) -> Self {
        self.sample.heart_rate_bpm = Some(bpm);
        self.sample.sources.heart_rate = source;
        self
    }

    pub fn steps(mut self, steps: u32, source: Provenance) -> Self {
        self.sample.step_count = Some(steps);
        self.sample.sources.steps = source;
        self
    }

    /// Sets quality and duration together. Negative or non-finite durations become 0.
    pub fn sleep(mut self, quality_pct: u8, duration_hours: f32, source: Provenance) -> Self {
        let duration = if duration_hours.is_finite() && duration_hours > 0.0 {
            duration_hours
        } else {
            0.0
        };
        self.sample.sleep_quality_pct = Some(quality_pct);
        self.sample.sleep_duration_hours = Some(duration);
        self.sample.sources.sleep = source;
        self
    }

    pub fn build(self) -> HealthSample {
        self.sample
    }
}
