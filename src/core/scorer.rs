//! Sleep-quality scoring
//! Weighted-band model over heart rate, motion and total sleep time.

use crate::core::sample::HealthSample;

/// Weights in percent
const HEART_RATE_WEIGHT: u32 = 30;
const MOTION_WEIGHT: u32 = 25;
const DURATION_WEIGHT: u32 = 45;

/// Score in `[0, 100]`. Total: any input yields a score.
pub fn score(heart_rate: u16, steps: u32, duration_hours: f32) -> u8 {
    let weighted = u32::from(heart_rate_band(heart_rate)) * HEART_RATE_WEIGHT
        + u32::from(motion_band(steps)) * MOTION_WEIGHT
        + u32::from(duration_band(duration_hours)) * DURATION_WEIGHT;
    // round half up on the percent-weighted sum
    ((weighted + 50) / 100).min(100) as u8
}

/// Scores a sample when heart rate, steps and duration are all present.
pub fn score_sample(sample: &HealthSample) -> Option<u8> {
    Some(score(
        sample.heart_rate_bpm()?,
        sample.step_count()?,
        sample.sleep_duration_hours()?,
    ))
}

/// Attaches the derived score to a sample.
pub fn annotate(sample: HealthSample) -> HealthSample {
    let score = score_sample(&sample);
    sample.with_quality_score(score)
}

fn heart_rate_band(bpm: u16) -> u8 {
    match bpm {
        50..=70 => 100,
        45..=49 | 71..=80 => 85,
        40..=44 | 81..=90 => 70,
        35..=39 | 91..=100 => 50,
        _ => 30,
    }
}

// More movement inside the sleep window means more wake time.
fn motion_band(steps: u32) -> u8 {
    match steps {
        0..=10 => 100,
        11..=25 => 85,
        26..=50 => 70,
        51..=100 => 50,
        _ => 25,
    }
}

// Bands are defined on tenths of an hour; NaN saturates to 0 and lands in the last band.
fn duration_band(hours: f32) -> u8 {
    let tenths = (hours * 10.0).round() as i32;
    match tenths {
        70..=90 => 100,
        60..=69 | 91..=100 => 85,
        50..=59 | 101..=110 => 70,
        40..=49 | 111..=120 => 50,
        _ => 25,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ideal_inputs_score_100() {
        assert_eq!(score(60, 5, 8.0), 100);
        assert_eq!(score(50, 0, 7.0), 100);
        assert_eq!(score(70, 10, 9.0), 100);
    }

    #[test]
    fn test_worse_inputs_score_lower() {
        let bad = score(110, 150, 3.0);
        assert!(bad < score(65, 5, 8.0));
        // 30*0.30 + 25*0.25 + 25*0.45 = 26.5
        assert_eq!(bad, 27);
    }

    #[test]
    fn test_band_edges() {
        assert_eq!(heart_rate_band(49), 85);
        assert_eq!(heart_rate_band(81), 70);
        assert_eq!(heart_rate_band(34), 30);
        assert_eq!(heart_rate_band(101), 30);
        assert_eq!(motion_band(11), 85);
        assert_eq!(motion_band(101), 25);
        assert_eq!(duration_band(6.9), 85);
        assert_eq!(duration_band(9.1), 85);
        assert_eq!(duration_band(10.1), 70);
        assert_eq!(duration_band(12.0), 50);
        assert_eq!(duration_band(12.1), 25);
        assert_eq!(duration_band(3.9), 25);
    }

    #[test]
    fn test_degenerate_durations() {
        assert_eq!(duration_band(f32::NAN), 25);
        assert_eq!(duration_band(f32::INFINITY), 25);
        assert_eq!(duration_band(-4.0), 25);
        assert!(score(0, u32::MAX, f32::NEG_INFINITY) <= 100);
    }

    #[test]
    fn test_annotate_requires_all_inputs() {
        use crate::core::sample::Provenance;
        let ts = chrono::Utc::now();
        let partial = HealthSample::builder(ts)
            .heart_rate(60, Provenance::Measured)
            .build();
        assert_eq!(annotate(partial).quality_score(), None);

        let full = HealthSample::builder(ts)
            .heart_rate(60, Provenance::Measured)
            .steps(5, Provenance::Measured)
            .sleep(90, 8.0, Provenance::Measured)
            .build();
        assert_eq!(annotate(full).quality_score(), Some(100));
    }

    #[test]
    fn test_weights_sum_to_hundred() {
        assert_eq!(HEART_RATE_WEIGHT + MOTION_WEIGHT + DURATION_WEIGHT, 100);
    }
}
