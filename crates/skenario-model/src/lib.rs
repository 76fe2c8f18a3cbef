//! skenario-model: an autoscaling control loop on top of the simulation
//! kernel.
//!
//! Requests arrive from a traffic pattern, wait in a buffer, get served by
//! replicas and finish in a sink. Two tick drivers close the loop: the
//! scraper samples Active replicas into a metrics collector, the autoscaler
//! asks a [`Decider`] for a desired replica count and reconciles the cluster.
//!
//! # Architecture
//!
//! ```text
//!  TrafficSource ──arrive_at_buffer──▶ RequestsBuffered ──buffer -> replica──▶ RequestsProcessing
//!                                        │        ▲                               │
//!                                        │  buffer_backoff                processing -> complete
//!                                        ▼                                        ▼
//!                                  RequestsFailed                          RequestsComplete
//!
//!  ReplicasLaunching ──launching -> active──▶ ReplicasActive ──active -> terminated──┐
//!          │                                                                         ▼
//!          └─────────────────launching -> terminated────────────────────▶ ReplicasTerminated
//!
//!  ScraperTicktock     ── every tick: record Active replicas + buffered backlog
//!  AutoscalerTicktock  ── every tick: stats → Decider → ClusterModel::set_desired
//! ```

pub mod buffer;
pub mod cluster;
pub mod config;
pub mod decider;
pub mod entities;
pub mod error;
pub mod metrics;
pub mod patterns;
pub mod report;
pub mod scenario;
pub mod ticktock;
pub mod traffic;

pub use buffer::{BackoffPolicy, RequestBuffer};
pub use cluster::{ClusterModel, ReadyPods};
pub use config::{AutoscalerConfig, BackoffConfig, ReplicasConfig, ScenarioConfig, TrafficConfig};
pub use decider::{ConcurrencyDecider, Decider, ReadyPodCounter};
pub use entities::{Payload, SimEnv};
pub use error::{ModelError, ModelResult};
pub use metrics::{
    MetricDescriptor, MetricHandle, MetricsCollector, WindowedCollector, WindowedStats,
};
pub use patterns::TrafficPattern;
pub use report::{Projections, RequestsPerSecond, ResponseTime, TallyLine};
pub use scenario::{RunReport, RunSummary, Scenario};
pub use traffic::TrafficSource;
