//! Metrics collection for the scaling loop.
//!
//! The scraper tick records observations through [`MetricsCollector`]; the
//! autoscaler tick reads windowed averages back out and hands them to the
//! [`Decider`](crate::decider::Decider).

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ModelError, ModelResult};

/// Replica identity used for observations recorded on behalf of the buffer.
pub const ACTIVATOR: &str = "activator";

/// What to collect and over which windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub stable_window: Duration,
    pub panic_window: Duration,
}

/// Returned by [`MetricsCollector::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricHandle(pub u32);

/// Windowed averages of observed concurrency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowedStats {
    pub stable_concurrency: f64,
    pub panic_concurrency: f64,
    /// Scrape instants inside the stable window. Zero means no data.
    pub stable_samples: usize,
}

pub trait MetricsCollector {
    /// Register the metric to collect. Must be called before anything is
    /// recorded.
    fn create(&mut self, descriptor: MetricDescriptor) -> ModelResult<MetricHandle>;

    /// Record one observation for `replica` at simulated time `at`.
    fn record(&mut self, replica: &str, at: Duration, observation: f64) -> ModelResult<()>;

    /// Averages over the windows ending at `now`.
    fn stats(&mut self, now: Duration) -> ModelResult<WindowedStats>;
}

/// A collector shared between the scraper and autoscaler ticks.
pub type SharedCollector = Rc<RefCell<dyn MetricsCollector>>;

/// Sum of all observations recorded at one instant.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    at: Duration,
    total: f64,
}

/// Keeps per-instant totals and averages them over the stable and panic
/// windows. Buckets older than the stable window are pruned on read.
#[derive(Debug, Default)]
pub struct WindowedCollector {
    descriptor: Option<MetricDescriptor>,
    buckets: VecDeque<Bucket>,
}

impl WindowedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<WindowedCollector>> {
        Rc::new(RefCell::new(Self::new()))
    }

    fn descriptor(&self) -> ModelResult<&MetricDescriptor> {
        self.descriptor
            .as_ref()
            .ok_or_else(|| ModelError::Collector("no metric has been created".into()))
    }

    fn average_since(&self, since: Option<Duration>) -> (f64, usize) {
        let in_window = self
            .buckets
            .iter()
            .filter(|b| since.is_none_or(|start| b.at > start));
        let (sum, count) = in_window.fold((0.0, 0usize), |(sum, n), b| (sum + b.total, n + 1));
        if count == 0 {
            (0.0, 0)
        } else {
            (sum / count as f64, count)
        }
    }
}

impl MetricsCollector for WindowedCollector {
    fn create(&mut self, descriptor: MetricDescriptor) -> ModelResult<MetricHandle> {
        if descriptor.stable_window.is_zero() {
            return Err(ModelError::Collector(format!(
                "metric '{}' has an empty stable window",
                descriptor.name
            )));
        }
        if self.descriptor.is_some() {
            return Err(ModelError::Collector(format!(
                "metric '{}' already created",
                descriptor.name
            )));
        }
        debug!(
            metric = %descriptor.name,
            stable_ms = descriptor.stable_window.as_millis() as u64,
            panic_ms = descriptor.panic_window.as_millis() as u64,
            "metric created"
        );
        self.descriptor = Some(descriptor);
        Ok(MetricHandle(0))
    }

    fn record(&mut self, _replica: &str, at: Duration, observation: f64) -> ModelResult<()> {
        self.descriptor()?;
        match self.buckets.back_mut() {
            Some(last) if last.at == at => last.total += observation,
            _ => self.buckets.push_back(Bucket {
                at,
                total: observation,
            }),
        }
        Ok(())
    }

    fn stats(&mut self, now: Duration) -> ModelResult<WindowedStats> {
        let descriptor = self.descriptor()?;
        let stable_start = now.checked_sub(descriptor.stable_window);
        let panic_start = now.checked_sub(descriptor.panic_window);

        if let Some(start) = stable_start {
            while self.buckets.front().is_some_and(|b| b.at <= start) {
                self.buckets.pop_front();
            }
        }

        let (stable_concurrency, stable_samples) = self.average_since(stable_start);
        let (panic_concurrency, _) = self.average_since(panic_start);
        Ok(WindowedStats {
            stable_concurrency,
            panic_concurrency,
            stable_samples,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn collector() -> WindowedCollector {
        let mut c = WindowedCollector::new();
        c.create(MetricDescriptor {
            name: "concurrency".into(),
            stable_window: secs(60),
            panic_window: secs(6),
        })
        .unwrap();
        c
    }

    #[test]
    fn record_before_create_fails() {
        let mut c = WindowedCollector::new();
        assert!(matches!(
            c.record("0.0.0.1", secs(1), 1.0),
            Err(ModelError::Collector(_))
        ));
        assert!(c.stats(secs(1)).is_err());
    }

    #[test]
    fn create_twice_fails() {
        let mut c = collector();
        let again = c.create(MetricDescriptor {
            name: "again".into(),
            stable_window: secs(60),
            panic_window: secs(6),
        });
        assert!(again.is_err());
    }

    #[test]
    fn observations_at_one_instant_are_summed() {
        let mut c = collector();
        c.record("0.0.0.1", secs(2), 1.0).unwrap();
        c.record("0.0.0.2", secs(2), 1.0).unwrap();
        c.record(ACTIVATOR, secs(2), 3.0).unwrap();

        let stats = c.stats(secs(2)).unwrap();
        assert_eq!(stats.stable_concurrency, 5.0);
        assert_eq!(stats.panic_concurrency, 5.0);
        assert_eq!(stats.stable_samples, 1);
    }

    #[test]
    fn windows_average_separately() {
        let mut c = collector();
        c.record("0.0.0.1", secs(10), 1.0).unwrap();
        c.record("0.0.0.1", secs(20), 1.0).unwrap();
        c.record("0.0.0.1", secs(30), 7.0).unwrap();

        let stats = c.stats(secs(30)).unwrap();
        assert_eq!(stats.stable_concurrency, 3.0);
        // Only the 30s scrape sits inside the 6s panic window.
        assert_eq!(stats.panic_concurrency, 7.0);
        assert_eq!(stats.stable_samples, 3);
    }

    #[test]
    fn old_buckets_are_pruned() {
        let mut c = collector();
        c.record("0.0.0.1", secs(1), 4.0).unwrap();
        c.record("0.0.0.1", secs(90), 2.0).unwrap();

        let stats = c.stats(secs(90)).unwrap();
        assert_eq!(stats.stable_concurrency, 2.0);
        assert_eq!(stats.stable_samples, 1);
        assert_eq!(c.buckets.len(), 1);
    }

    #[test]
    fn no_data_reads_as_zero() {
        let mut c = collector();
        assert_eq!(c.stats(secs(5)).unwrap(), WindowedStats::default());
    }
}
