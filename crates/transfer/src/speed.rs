use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

const DEFAULT_WINDOW: Duration = Duration::from_secs(5);
const DEFAULT_MAX_SAMPLES: usize = 100;

/// Transfer rate over a sliding window of completed transfers.
///
/// The oldest retained sample opens the window. Its bytes moved before the
/// window began, so only the bytes of later samples count toward the rate.
#[derive(Debug)]
pub struct SpeedCalculator {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::with_window(DEFAULT_WINDOW, DEFAULT_MAX_SAMPLES)
    }
}

impl SpeedCalculator {
    /// Keeps samples no older than `window`, and at most `max_samples`
    /// (never fewer than two) of them.
    pub fn with_window(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples: max_samples.max(2),
        }
    }

    /// Records `bytes` finished at the current instant.
    pub fn add_sample(&mut self, bytes: u64) {
        let now = Instant::now();
        self.samples.push_back((now, bytes));
        while self
            .samples
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > self.window)
        {
            self.samples.pop_front();
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Bytes per second between the oldest and newest sample, or 0.0 until
    /// two samples at distinct instants exist.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some((start, _)), Some((end, _))) = (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        let elapsed = end.duration_since(*start);
        if elapsed.is_zero() {
            return 0.0;
        }
        let bytes: u64 = self.samples.iter().skip(1).map(|(_, bytes)| bytes).sum();
        bytes as f64 / elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_meter_reports_zero() {
        assert_eq!(SpeedCalculator::default().bytes_per_second(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn one_sample_has_no_rate() {
        let mut meter = SpeedCalculator::default();
        meter.add_sample(100);
        assert_eq!(meter.bytes_per_second(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn opening_sample_is_not_counted() {
        let mut meter = SpeedCalculator::with_window(Duration::from_secs(10), 100);
        meter.add_sample(500);
        tokio::time::advance(Duration::from_millis(500)).await;
        meter.add_sample(500);
        assert_eq!(meter.bytes_per_second(), 1000.0);

        tokio::time::advance(Duration::from_millis(500)).await;
        meter.add_sample(1500);
        assert_eq!(meter.bytes_per_second(), 2000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_outside_the_window_are_dropped() {
        let mut meter = SpeedCalculator::with_window(Duration::from_secs(1), 100);
        meter.add_sample(10_000);
        tokio::time::advance(Duration::from_secs(5)).await;
        meter.add_sample(1);
        assert_eq!(meter.samples.len(), 1);
        assert_eq!(meter.bytes_per_second(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn sample_count_is_capped() {
        let mut meter = SpeedCalculator::with_window(Duration::from_secs(60), 5);
        for i in 0..20 {
            meter.add_sample(i * 10);
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(meter.samples.len(), 5);
        // Samples 15..20 retained; 16..20 count over 40 ms.
        let expected = (160 + 170 + 180 + 190) as f64 / 0.04;
        assert!((meter.bytes_per_second() - expected).abs() < 1e-6);
    }
}
