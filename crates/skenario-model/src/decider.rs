//! Scaling decisions.
//!
//! The autoscaler tick asks a [`Decider`] for a desired replica count and
//! feeds the answer to the cluster. [`ConcurrencyDecider`] is the default: it
//! sizes the cluster so each ready replica carries `target_concurrency`.
//!
//! # Algorithm
//!
//! ```text
//! stable_desired = ceil(stable_concurrency / target)
//! panic_desired  = ceil(panic_concurrency / target)
//! ready          = max(ready_count, 1)
//!
//! if panic_desired / ready >= panic_threshold:
//!     enter (or extend) panic mode
//! if panicking and no panic signal for a whole stable window:
//!     leave panic mode
//!
//! desired = panicking ? max(panic_desired, highest panic desired so far)
//!                     : stable_desired
//! desired = min(desired, ceil(max_scale_up_rate * ready))
//!
//! if desired == 0 and demand was seen within the grace period:
//!     desired = 1
//! clamp to [min_scale, max_scale]
//! ```
//!
//! With no samples in the stable window the previous decision is repeated.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::AutoscalerConfig;
use crate::error::{ModelError, ModelResult};
use crate::metrics::WindowedStats;

/// Number of replicas currently able to serve.
pub trait ReadyPodCounter {
    fn ready_count(&self) -> u64;
}

/// Maps current metrics and cluster state to a desired replica count.
///
/// An error is fatal to the run.
pub trait Decider {
    fn decide(&mut self, now: Duration, stats: &WindowedStats, active: u64) -> ModelResult<u32>;
}

impl<F> Decider for F
where
    F: FnMut(Duration, &WindowedStats, u64) -> ModelResult<u32>,
{
    fn decide(&mut self, now: Duration, stats: &WindowedStats, active: u64) -> ModelResult<u32> {
        self(now, stats, active)
    }
}

pub struct ConcurrencyDecider {
    config: AutoscalerConfig,
    ready: Box<dyn ReadyPodCounter>,
    last_desired: u32,
    /// When panic mode was last entered or extended.
    panic_since: Option<Duration>,
    max_panic_pods: u32,
    /// Last time any demand was observed.
    last_demand_at: Option<Duration>,
}

impl ConcurrencyDecider {
    pub fn new(config: AutoscalerConfig, ready: Box<dyn ReadyPodCounter>) -> ModelResult<Self> {
        if config.target_concurrency <= 0.0 || !config.target_concurrency.is_finite() {
            return Err(ModelError::Decider(format!(
                "target concurrency must be positive, got {}",
                config.target_concurrency
            )));
        }
        Ok(Self {
            config,
            ready,
            last_desired: 0,
            panic_since: None,
            max_panic_pods: 0,
            last_demand_at: None,
        })
    }

    /// Start from `desired` replicas, as if that had been the previous
    /// decision at time zero.
    pub fn with_initial(mut self, desired: u32) -> Self {
        self.last_desired = desired;
        if desired > 0 {
            self.last_demand_at = Some(Duration::ZERO);
        }
        self
    }

    pub fn is_panicking(&self) -> bool {
        self.panic_since.is_some()
    }

    fn clamp(&self, desired: u32) -> u32 {
        let desired = desired.max(self.config.min_scale);
        if self.config.max_scale > 0 {
            desired.min(self.config.max_scale)
        } else {
            desired
        }
    }
}

impl Decider for ConcurrencyDecider {
    fn decide(&mut self, now: Duration, stats: &WindowedStats, active: u64) -> ModelResult<u32> {
        if stats.stable_samples == 0 {
            debug!(now_ns = now.as_nanos() as u64, desired = self.last_desired, "no metrics yet");
            return Ok(self.clamp(self.last_desired));
        }

        let target = self.config.target_concurrency;
        let stable_desired = (stats.stable_concurrency / target).ceil() as u32;
        let panic_desired = (stats.panic_concurrency / target).ceil() as u32;
        let ready = self.ready.ready_count().max(1) as f64;

        if f64::from(panic_desired) / ready >= self.config.panic_threshold() {
            if self.panic_since.is_none() {
                info!(now_ns = now.as_nanos() as u64, panic_desired, ready, "entering panic mode");
                self.max_panic_pods = 0;
            }
            self.panic_since = Some(now);
        } else if let Some(since) = self.panic_since {
            if now.saturating_sub(since) >= self.config.stable_window {
                info!(now_ns = now.as_nanos() as u64, "leaving panic mode");
                self.panic_since = None;
                self.max_panic_pods = 0;
            }
        }

        let mut desired = if self.panic_since.is_some() {
            self.max_panic_pods = self.max_panic_pods.max(panic_desired);
            self.max_panic_pods
        } else {
            stable_desired
        };

        let max_up = (self.config.max_scale_up_rate * ready).ceil() as u32;
        desired = desired.min(max_up);

        if stats.stable_concurrency > 0.0 || stats.panic_concurrency > 0.0 {
            self.last_demand_at = Some(now);
        }
        if desired == 0 && active > 0 {
            let within_grace = self
                .last_demand_at
                .is_some_and(|at| now.saturating_sub(at) < self.config.scale_to_zero_grace_period);
            if within_grace {
                desired = 1;
            }
        }

        let desired = self.clamp(desired);
        debug!(
            now_ns = now.as_nanos() as u64,
            stable = stats.stable_concurrency,
            panic = stats.panic_concurrency,
            active,
            desired,
            panicking = self.is_panicking(),
            "scaling decision"
        );
        self.last_desired = desired;
        Ok(desired)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct FixedReady(Rc<Cell<u64>>);

    impl ReadyPodCounter for FixedReady {
        fn ready_count(&self) -> u64 {
            self.0.get()
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn stats(stable: f64, panic: f64) -> WindowedStats {
        WindowedStats {
            stable_concurrency: stable,
            panic_concurrency: panic,
            stable_samples: 1,
        }
    }

    fn decider(ready: u64) -> (ConcurrencyDecider, Rc<Cell<u64>>) {
        let count = Rc::new(Cell::new(ready));
        let d = ConcurrencyDecider::new(
            AutoscalerConfig::default(),
            Box::new(FixedReady(count.clone())),
        )
        .unwrap();
        (d, count)
    }

    #[test]
    fn rejects_non_positive_target() {
        let config = AutoscalerConfig {
            target_concurrency: 0.0,
            ..AutoscalerConfig::default()
        };
        let counter = Box::new(FixedReady(Rc::new(Cell::new(0))));
        assert!(matches!(
            ConcurrencyDecider::new(config, counter),
            Err(ModelError::Decider(_))
        ));
    }

    #[test]
    fn no_samples_repeats_previous_decision() {
        let (d, _) = decider(0);
        let mut d = d.with_initial(2);
        let desired = d.decide(secs(2), &WindowedStats::default(), 0).unwrap();
        assert_eq!(desired, 2);
    }

    #[test]
    fn stable_demand_sizes_to_target() {
        let (mut d, _) = decider(3);
        assert_eq!(d.decide(secs(2), &stats(3.0, 3.0), 3).unwrap(), 3);
        assert!(!d.is_panicking());
    }

    #[test]
    fn scale_up_is_rate_limited() {
        let (mut d, _) = decider(1);
        // 50 wanted, at most ceil(10 * 1) allowed.
        assert_eq!(d.decide(secs(2), &stats(50.0, 50.0), 1).unwrap(), 10);
    }

    #[test]
    fn panic_mode_holds_the_high_water_mark() {
        let (mut d, ready) = decider(2);
        assert_eq!(d.decide(secs(2), &stats(2.0, 8.0), 2).unwrap(), 8);
        assert!(d.is_panicking());

        ready.set(8);
        // Panic signal gone but the stable window has not passed yet.
        assert_eq!(d.decide(secs(4), &stats(3.0, 3.0), 8).unwrap(), 8);
        assert!(d.is_panicking());

        assert_eq!(d.decide(secs(64), &stats(3.0, 3.0), 8).unwrap(), 3);
        assert!(!d.is_panicking());
    }

    #[test]
    fn scale_to_zero_waits_for_grace_period() {
        let (mut d, _) = decider(1);
        assert_eq!(d.decide(secs(2), &stats(1.0, 1.0), 1).unwrap(), 1);
        assert_eq!(d.decide(secs(10), &stats(0.0, 0.0), 1).unwrap(), 1);
        assert_eq!(d.decide(secs(40), &stats(0.0, 0.0), 1).unwrap(), 0);
    }

    #[test]
    fn bounds_are_applied() {
        let config = AutoscalerConfig {
            min_scale: 1,
            max_scale: 4,
            ..AutoscalerConfig::default()
        };
        let mut d =
            ConcurrencyDecider::new(config, Box::new(FixedReady(Rc::new(Cell::new(4))))).unwrap();
        assert_eq!(d.decide(secs(2), &stats(9.0, 9.0), 4).unwrap(), 4);
        assert_eq!(d.decide(secs(100), &stats(0.0, 0.0), 0).unwrap(), 1);
    }

    #[test]
    fn closures_are_deciders() {
        let mut fixed = |_: Duration, _: &WindowedStats, _: u64| -> ModelResult<u32> { Ok(7) };
        assert_eq!(fixed.decide(secs(1), &WindowedStats::default(), 0).unwrap(), 7);
    }
}
