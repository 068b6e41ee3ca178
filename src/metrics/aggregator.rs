use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Default number of samples in the smoothing window
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// A single network measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkSample {
    /// Bandwidth in Mbps
    pub bandwidth: f64,
    /// Latency in ms
    pub latency: f64,
    /// Packet loss in percent
    pub packet_loss: f64,
}

impl NetworkSample {
    /// Sample used when a measurement is missing or unusable
    pub const WORST_CASE: NetworkSample = NetworkSample {
        bandwidth: 0.0,
        latency: 999.0,
        packet_loss: 100.0,
    };

    pub fn new(bandwidth: f64, latency: f64, packet_loss: f64) -> Self {
        Self {
            bandwidth,
            latency,
            packet_loss,
        }
    }
}

/// Moving average of the most recent samples, rounded to 2 decimals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedMetrics {
    pub bandwidth: f64,
    pub latency: f64,
    pub packet_loss: f64,
}

impl SmoothedMetrics {
    pub fn worst_case() -> Self {
        let worst = NetworkSample::WORST_CASE;
        Self {
            bandwidth: worst.bandwidth,
            latency: worst.latency,
            packet_loss: worst.packet_loss,
        }
    }
}

impl From<NetworkSample> for SmoothedMetrics {
    fn from(sample: NetworkSample) -> Self {
        Self {
            bandwidth: round2(sample.bandwidth),
            latency: round2(sample.latency),
            packet_loss: round2(sample.packet_loss),
        }
    }
}

struct Window {
    samples: VecDeque<NetworkSample>,
    smoothed: SmoothedMetrics,
}

/// Sliding-window smoother for network telemetry.
///
/// Any number of producers may call [`record`](Self::record); the smoothed
/// value is recomputed under the same lock, so the next
/// [`current`](Self::current) from any caller observes it.
pub struct MetricsAggregator {
    window_size: usize,
    window: Mutex<Window>,
    samples_recorded: AtomicU64,
}

impl MetricsAggregator {
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        debug!("Created metrics aggregator with window size {}", window_size);

        Self {
            window_size,
            window: Mutex::new(Window {
                samples: VecDeque::with_capacity(window_size + 1),
                smoothed: SmoothedMetrics::worst_case(),
            }),
            samples_recorded: AtomicU64::new(0),
        }
    }

    /// Append a sample, evicting the oldest one once the window is full
    pub fn record(&self, sample: NetworkSample) {
        let mut window = self.window.lock();
        window.samples.push_back(sample);
        while window.samples.len() > self.window_size {
            window.samples.pop_front();
        }
        window.smoothed = mean(&window.samples);
        self.samples_recorded.fetch_add(1, Ordering::Relaxed);

        trace!(
            "Recorded sample {:?}, smoothed {:?}",
            sample,
            window.smoothed
        );
    }

    /// Current smoothed metrics; worst case until the first sample arrives
    pub fn current(&self) -> SmoothedMetrics {
        self.window.lock().smoothed
    }

    /// Number of samples currently in the window
    pub fn len(&self) -> usize {
        self.window.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Total samples recorded since creation
    pub fn samples_recorded(&self) -> u64 {
        self.samples_recorded.load(Ordering::Relaxed)
    }

    /// Drop all samples and return to the worst-case value
    pub fn reset(&self) {
        let mut window = self.window.lock();
        window.samples.clear();
        window.smoothed = SmoothedMetrics::worst_case();
        debug!("Metrics window reset");
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

fn mean(samples: &VecDeque<NetworkSample>) -> SmoothedMetrics {
    if samples.is_empty() {
        return SmoothedMetrics::worst_case();
    }

    let count = samples.len() as f64;
    let (bandwidth, latency, packet_loss) = samples.iter().fold((0.0, 0.0, 0.0), |acc, s| {
        (acc.0 + s.bandwidth, acc.1 + s.latency, acc.2 + s.packet_loss)
    });

    SmoothedMetrics {
        bandwidth: round2(bandwidth / count),
        latency: round2(latency / count),
        packet_loss: round2(packet_loss / count),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_empty_aggregator_reports_worst_case() {
        let aggregator = MetricsAggregator::default();
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.current(), SmoothedMetrics::worst_case());
    }

    #[test]
    fn test_mean_is_rounded_to_two_decimals() {
        let aggregator = MetricsAggregator::new(10);
        aggregator.record(NetworkSample::new(1.0, 10.0, 0.0));
        aggregator.record(NetworkSample::new(2.0, 20.0, 1.0));
        aggregator.record(NetworkSample::new(2.0, 20.0, 1.0));

        let current = aggregator.current();
        assert_eq!(current.bandwidth, 1.67);
        assert_eq!(current.latency, 16.67);
        assert_eq!(current.packet_loss, 0.67);
    }

    #[test]
    fn test_window_evicts_oldest_sample() {
        let aggregator = MetricsAggregator::new(3);
        for bandwidth in [100.0, 1.0, 2.0, 3.0] {
            aggregator.record(NetworkSample::new(bandwidth, 50.0, 1.0));
        }

        assert_eq!(aggregator.len(), 3);
        assert_eq!(aggregator.samples_recorded(), 4);
        assert_eq!(aggregator.current().bandwidth, 2.0);
    }

    #[test]
    fn test_reset_returns_to_worst_case() {
        let aggregator = MetricsAggregator::new(5);
        aggregator.record(NetworkSample::new(8.0, 20.0, 0.5));
        aggregator.reset();
        assert!(aggregator.is_empty());
        assert_eq!(aggregator.current(), SmoothedMetrics::worst_case());
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let aggregator = MetricsAggregator::new(0);
        assert_eq!(aggregator.window_size(), 1);
        aggregator.record(NetworkSample::new(4.0, 40.0, 4.0));
        aggregator.record(NetworkSample::new(6.0, 60.0, 6.0));
        assert_eq!(aggregator.current(), SmoothedMetrics::from(NetworkSample::new(6.0, 60.0, 6.0)));
    }

    #[test]
    fn test_concurrent_producers() {
        let aggregator = Arc::new(MetricsAggregator::new(10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        aggregator.record(NetworkSample::new(5.0, 50.0, 1.0));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(aggregator.samples_recorded(), 1000);
        assert_eq!(aggregator.len(), 10);
        assert_eq!(aggregator.current(), SmoothedMetrics::from(NetworkSample::new(5.0, 50.0, 1.0)));
    }
}
