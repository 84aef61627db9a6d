//! Rolling byte-rate window.
//!
//! Samples are `(timestamp_ms, cumulative_bytes)` pairs kept for
//! [`SAMPLE_RETENTION_MS`]. Rates are measured between the oldest and the
//! newest sample inside a trailing window, so a sample that clamps the
//! counter back to zero shows up as a zero rate rather than a negative one.

use std::collections::VecDeque;

/// How long samples are retained.
pub const SAMPLE_RETENTION_MS: u64 = 120_000;

/// Window used for the displayed current speed.
pub const CURRENT_SPEED_WINDOW_MS: u64 = 5_000;

/// Window used for the ETA speed.
pub const ETA_SPEED_WINDOW_MS: u64 = 60_000;

/// Samples older than this give no ETA.
pub const STALE_SAMPLE_MS: u64 = 120_000;

/// A window shorter than this gives no rate.
pub const MIN_MEASURABLE_SPAN_MS: u64 = 500;

/// Weight of the newest rate in the ETA moving average.
const ETA_SMOOTHING: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    at_ms: u64,
    bytes: u64,
}

/// Rate samples plus the smoothed ETA speed.
#[derive(Debug, Default)]
pub struct SpeedWindow {
    samples: VecDeque<Sample>,
    smoothed: Option<f64>,
}

impl SpeedWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the cumulative byte count at `at_ms`, evicting expired samples.
    pub fn record(&mut self, at_ms: u64, bytes: u64) {
        self.samples.push_back(Sample { at_ms, bytes });
        let cutoff = at_ms.saturating_sub(SAMPLE_RETENTION_MS);
        while let Some(front) = self.samples.front() {
            if front.at_ms >= cutoff {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Drop all samples and the smoothed speed.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.smoothed = None;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Milliseconds since the newest sample.
    pub fn last_sample_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.samples
            .back()
            .map(|s| now_ms.saturating_sub(s.at_ms))
    }

    /// Bytes per second over the trailing `window_ms`.
    ///
    /// `None` with fewer than two samples or when the samples in the window
    /// span less than [`MIN_MEASURABLE_SPAN_MS`]. A non-positive byte delta
    /// is a rate of `0.0`.
    pub fn rate_over(&self, window_ms: u64, now_ms: u64) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let last = *self.samples.back()?;
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut first = last;
        for sample in self.samples.iter().rev() {
            if sample.at_ms < cutoff {
                break;
            }
            first = *sample;
        }

        let span_ms = last.at_ms.saturating_sub(first.at_ms);
        if span_ms < MIN_MEASURABLE_SPAN_MS {
            return None;
        }
        if last.bytes <= first.bytes {
            return Some(0.0);
        }
        Some((last.bytes - first.bytes) as f64 * 1000.0 / span_ms as f64)
    }

    /// Rate shown to users.
    pub fn current_speed(&self, now_ms: u64) -> Option<f64> {
        self.rate_over(CURRENT_SPEED_WINDOW_MS, now_ms)
    }

    /// Smoothed rate for ETA estimates.
    ///
    /// A positive measured rate updates the moving average and is returned
    /// through it; a zero rate means no estimate. When nothing is measurable,
    /// the last average is reused until the newest sample goes stale.
    pub fn eta_speed(&mut self, now_ms: u64) -> Option<f64> {
        match self.rate_over(ETA_SPEED_WINDOW_MS, now_ms) {
            Some(rate) if rate > 0.0 => {
                let next = match self.smoothed {
                    Some(prev) => ETA_SMOOTHING * rate + (1.0 - ETA_SMOOTHING) * prev,
                    None => rate,
                };
                self.smoothed = Some(next);
                Some(next)
            }
            Some(_) => None,
            None => {
                let fresh = self
                    .last_sample_age_ms(now_ms)
                    .is_some_and(|age| age <= STALE_SAMPLE_MS);
                self.smoothed.filter(|s| *s > 0.0 && fresh)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_needs_two_samples() {
        let mut window = SpeedWindow::new();
        assert_eq!(window.rate_over(5_000, 0), None);
        window.record(0, 100);
        assert_eq!(window.rate_over(5_000, 0), None);
    }

    #[test]
    fn test_rate_needs_half_a_second() {
        let mut window = SpeedWindow::new();
        window.record(1_000, 0);
        window.record(1_400, 4_000);
        assert_eq!(window.current_speed(1_400), None);

        window.record(1_500, 5_000);
        assert_eq!(window.current_speed(1_500), Some(10_000.0));
    }

    #[test]
    fn test_rate_uses_only_window() {
        let mut window = SpeedWindow::new();
        window.record(0, 0);
        window.record(10_000, 1_000_000);
        window.record(12_000, 1_002_000);
        window.record(14_000, 1_004_000);
        // Only the last three samples fall inside the 5 s window.
        assert_eq!(window.current_speed(14_000), Some(1_000.0));
    }

    #[test]
    fn test_clamped_sample_reads_as_zero() {
        let mut window = SpeedWindow::new();
        window.record(0, 500);
        window.record(1_000, 0);
        assert_eq!(window.current_speed(1_000), Some(0.0));
    }

    #[test]
    fn test_retention_evicts_old_samples() {
        let mut window = SpeedWindow::new();
        window.record(0, 0);
        window.record(60_000, 10);
        window.record(200_000, 20);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_eta_speed_smoothing() {
        let mut window = SpeedWindow::new();
        window.record(0, 0);
        window.record(1_000, 1_000);
        assert_eq!(window.eta_speed(1_000), Some(1_000.0));

        window.record(2_000, 4_000);
        // Measured 2000 B/s over the whole window; 0.2 * 2000 + 0.8 * 1000.
        let speed = window.eta_speed(2_000).unwrap();
        assert!((speed - 1_200.0).abs() < 1e-9);
    }

    #[test]
    fn test_eta_speed_goes_stale() {
        let mut window = SpeedWindow::new();
        window.record(0, 0);
        window.record(1_000, 1_000);
        assert!(window.eta_speed(1_000).is_some());

        // Window is empty of fresh samples but the average is still recent.
        assert!(window.eta_speed(100_000).is_some());
        assert_eq!(window.eta_speed(1_000 + STALE_SAMPLE_MS + 1), None);
    }

    #[test]
    fn test_reset_clears_average() {
        let mut window = SpeedWindow::new();
        window.record(0, 0);
        window.record(1_000, 1_000);
        window.eta_speed(1_000);
        window.reset();
        assert!(window.is_empty());
        assert_eq!(window.eta_speed(1_000), None);
    }
}
