//! Scenario configuration.
//!
//! One `ScenarioConfig` describes a whole run: how long to simulate, which
//! traffic to inject, how replicas behave and how the autoscaler is tuned.
//! It deserializes from JSON (HTTP API) and TOML (CLI). Every field has a
//! default, so `{}` is a valid scenario. Durations are written as human
//! strings: `"250ms"`, `"2s"`, `"5m"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    #[serde(with = "duration_str")]
    pub run_for: Duration,
    /// Seed for every random source in the run.
    pub seed: u64,
    /// Desired replica count requested at time zero.
    pub initial_replicas: u32,
    pub traffic: TrafficConfig,
    pub replicas: ReplicasConfig,
    pub autoscaler: AutoscalerConfig,
    pub backoff: BackoffConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            run_for: Duration::from_secs(600),
            seed: 1,
            initial_replicas: 0,
            traffic: TrafficConfig::default(),
            replicas: ReplicasConfig::default(),
            autoscaler: AutoscalerConfig::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Traffic shape, tagged by `pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum TrafficConfig {
    /// `number_of_requests` arrivals spread uniformly at random.
    #[serde(alias = "golang_rand_uniform")]
    Uniform { number_of_requests: u32 },
    /// Rate climbs by `delta_v` rps each second up to `max_rps`, then falls
    /// back at the same pace.
    Ramp { delta_v: u32, max_rps: u32 },
    /// Nothing until `step_after`, then a constant `rps`.
    Step {
        rps: u32,
        #[serde(with = "duration_str")]
        step_after: Duration,
    },
    /// `amplitude * sin(2πt / period) + offset` rps.
    Sinusoidal {
        amplitude: u32,
        #[serde(with = "duration_str")]
        period: Duration,
        offset: u32,
    },
}

impl Default for TrafficConfig {
    fn default() -> Self {
        TrafficConfig::Uniform {
            number_of_requests: 1000,
        }
    }
}

/// Replica lifecycle timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicasConfig {
    /// Time from scheduling a launch until the replica is active.
    #[serde(with = "duration_str")]
    pub launch_delay: Duration,
    /// Time from scheduling a termination until it lands.
    #[serde(with = "duration_str")]
    pub terminate_delay: Duration,
    /// How long a replica takes to serve one request.
    #[serde(with = "duration_str")]
    pub service_time: Duration,
}

impl Default for ReplicasConfig {
    fn default() -> Self {
        Self {
            launch_delay: Duration::from_secs(5),
            terminate_delay: Duration::from_secs(1),
            service_time: Duration::from_millis(100),
        }
    }
}

/// Tuning for the default concurrency decider and the tick drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalerConfig {
    #[serde(with = "duration_str")]
    pub tick_interval: Duration,
    #[serde(with = "duration_str")]
    pub stable_window: Duration,
    /// Panic window as a percentage of the stable window.
    pub panic_window_percentage: f64,
    /// Panic mode starts when desired/ready reaches this percentage.
    pub panic_threshold_percentage: f64,
    /// Concurrent requests one replica should carry.
    pub target_concurrency: f64,
    /// Largest multiplicative step up per decision.
    pub max_scale_up_rate: f64,
    #[serde(with = "duration_str")]
    pub scale_to_zero_grace_period: Duration,
    pub min_scale: u32,
    /// Upper bound on desired replicas; 0 means unbounded.
    pub max_scale: u32,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            stable_window: Duration::from_secs(60),
            panic_window_percentage: 10.0,
            panic_threshold_percentage: 200.0,
            target_concurrency: 1.0,
            max_scale_up_rate: 10.0,
            scale_to_zero_grace_period: Duration::from_secs(30),
            min_scale: 0,
            max_scale: 0,
        }
    }
}

impl AutoscalerConfig {
    pub fn panic_window(&self) -> Duration {
        self.stable_window
            .mul_f64((self.panic_window_percentage / 100.0).clamp(0.0, 1.0))
    }

    pub fn panic_threshold(&self) -> f64 {
        self.panic_threshold_percentage / 100.0
    }
}

/// Per-request retry policy while no replica is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "duration_str")]
    pub initial: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_str")]
    pub max_backoff: Duration,
    /// Retries before a request is sent to the failed sink.
    pub max_attempts: u32,
    /// Upper bound (exclusive) of the uniform jitter added to each wake-up.
    #[serde(with = "duration_str")]
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 1.3,
            max_backoff: Duration::from_secs(10),
            max_attempts: 18,
            max_jitter: Duration::from_millis(1),
        }
    }
}

impl ScenarioConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScenarioConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that make the run meaningless before anything is
    /// scheduled.
    pub fn validate(&self) -> ModelResult<()> {
        if self.run_for.is_zero() {
            return Err(ModelError::Config("run_for must be positive".into()));
        }
        let scaler = &self.autoscaler;
        if scaler.tick_interval.is_zero() {
            return Err(ModelError::Config("tick_interval must be positive".into()));
        }
        if scaler.stable_window < scaler.tick_interval {
            return Err(ModelError::Config(
                "stable_window must cover at least one tick".into(),
            ));
        }
        if scaler.target_concurrency <= 0.0 || !scaler.target_concurrency.is_finite() {
            return Err(ModelError::Config("target_concurrency must be positive".into()));
        }
        if scaler.max_scale_up_rate < 1.0 || !scaler.max_scale_up_rate.is_finite() {
            return Err(ModelError::Config("max_scale_up_rate must be at least 1".into()));
        }
        if scaler.max_scale != 0 && scaler.max_scale < scaler.min_scale {
            return Err(ModelError::Config("max_scale is below min_scale".into()));
        }
        if self.backoff.multiplier < 1.0 || !self.backoff.multiplier.is_finite() {
            return Err(ModelError::Config("backoff multiplier must be at least 1".into()));
        }
        if self.backoff.initial.is_zero() {
            return Err(ModelError::Config("backoff initial must be positive".into()));
        }
        if let TrafficConfig::Sinusoidal { period, .. } = &self.traffic {
            if period.is_zero() {
                return Err(ModelError::Config("sinusoidal period must be positive".into()));
            }
        }
        Ok(())
    }
}

/// Parse a duration string like "250ms", "2s", "5m", "1h", "10us", "3ns".
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{s}'"))?;
    let scaled = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' out of range"))
    };
    match unit.trim() {
        "ns" => Ok(Duration::from_nanos(value)),
        "us" | "µs" => Ok(Duration::from_micros(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "s" | "" => Ok(Duration::from_secs(value)),
        "m" => scaled(60),
        "h" => scaled(3600),
        other => Err(format!("unknown duration unit '{other}' in '{s}'")),
    }
}

/// Render a duration in the largest unit that represents it exactly.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    for (unit, size) in [
        ("h", 3_600_000_000_000u128),
        ("m", 60_000_000_000),
        ("s", 1_000_000_000),
        ("ms", 1_000_000),
        ("us", 1_000),
    ] {
        if nanos % size == 0 {
            return format!("{}{unit}", nanos / size);
        }
    }
    format!("{nanos}ns")
}

/// Serde adapter for `Duration` fields written as human strings.
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
