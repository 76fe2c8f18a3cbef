//! Scenario assembly: one configured run, wired and ready to execute.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use skenario_sim::{Environment, MovementRecord, SpawnRecord};

use crate::buffer::RequestBuffer;
use crate::cluster::ClusterModel;
use crate::config::ScenarioConfig;
use crate::decider::{ConcurrencyDecider, Decider};
use crate::entities::{SimEnv, ARRIVE_AT_BUFFER};
use crate::error::{ModelError, ModelResult};
use crate::metrics::{MetricDescriptor, MetricsCollector, WindowedCollector};
use crate::patterns;
use crate::report::Projections;
use crate::ticktock::{self, AutoscalerTick, ScraperTick};
use crate::traffic::TrafficSource;

/// Name of the metric the scraper feeds and the autoscaler reads.
pub const CONCURRENCY_METRIC: &str = "concurrency";

/// Counts read off the environment once a run is over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub requests_arrived: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_buffered: u64,
    pub final_desired: u32,
    pub final_launching: u64,
    pub final_active: u64,
    pub entities_created: u64,
    pub entities_stocked: u64,
}

/// Everything a finished run produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Halt horizon in nanoseconds.
    pub ran_for: u64,
    pub traffic_pattern: String,
    pub completed: Vec<MovementRecord>,
    pub ignored: Vec<MovementRecord>,
    pub stale: Vec<MovementRecord>,
    pub spawned: Vec<SpawnRecord>,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn projections(&self) -> Projections {
        Projections::from_log(&self.completed, &self.spawned)
    }
}

/// A fully wired simulation: cluster, buffer, tick drivers and traffic.
pub struct Scenario {
    config: ScenarioConfig,
    env: SimEnv,
    cluster: ClusterModel,
    buffer: RequestBuffer,
    traffic: TrafficSource,
    traffic_pattern: &'static str,
}

impl Scenario {
    /// Wire a scenario driven by the default [`ConcurrencyDecider`].
    pub fn build(config: ScenarioConfig) -> ModelResult<Self> {
        let initial = config.initial_replicas;
        let autoscaler = config.autoscaler.clone();
        Self::assemble(config, move |cluster| {
            let decider: Box<dyn Decider> = Box::new(
                ConcurrencyDecider::new(autoscaler, Box::new(cluster.ready_pods()))?
                    .with_initial(initial),
            );
            Ok(decider)
        })
    }

    /// Wire a scenario driven by `decider`.
    pub fn build_with(config: ScenarioConfig, decider: Box<dyn Decider>) -> ModelResult<Self> {
        Self::assemble(config, move |_| Ok(decider))
    }

    fn assemble(
        config: ScenarioConfig,
        decider: impl FnOnce(&ClusterModel) -> ModelResult<Box<dyn Decider>>,
    ) -> ModelResult<Self> {
        config.validate()?;
        let mut env: SimEnv = Environment::new(config.run_for);

        let cluster = ClusterModel::new(&mut env, config.replicas.clone())?;
        let buffer =
            RequestBuffer::new(&mut env, cluster.clone(), config.backoff.clone(), config.seed)?;

        let collector = WindowedCollector::shared();
        collector.borrow_mut().create(MetricDescriptor {
            name: CONCURRENCY_METRIC.to_string(),
            stable_window: config.autoscaler.stable_window,
            panic_window: config.autoscaler.panic_window(),
        })?;
        let decider = decider(&cluster)?;

        cluster.set_desired(&mut env, config.initial_replicas)?;

        let interval = config.autoscaler.tick_interval;
        ticktock::install_scraper(
            &mut env,
            interval,
            ScraperTick {
                cluster: cluster.clone(),
                buffer,
                collector: collector.clone(),
            },
        )?;
        ticktock::install_autoscaler(
            &mut env,
            interval,
            AutoscalerTick {
                cluster: cluster.clone(),
                decider,
                collector,
            },
        )?;

        let traffic = TrafficSource::new(&mut env);
        let mut pattern = patterns::from_config(&config.traffic, config.seed.wrapping_add(1));
        let injected = traffic.generate(
            &mut env,
            buffer.stock(),
            pattern.as_mut(),
            Duration::ZERO,
            config.run_for,
        )?;

        info!(
            run_for_ms = config.run_for.as_millis() as u64,
            pattern = pattern.name(),
            requests = injected,
            initial_replicas = config.initial_replicas,
            seed = config.seed,
            "scenario assembled"
        );

        Ok(Self {
            traffic_pattern: pattern.name(),
            config,
            env,
            cluster,
            buffer,
            traffic,
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut SimEnv {
        &mut self.env
    }

    pub fn cluster(&self) -> &ClusterModel {
        &self.cluster
    }

    pub fn buffer(&self) -> RequestBuffer {
        self.buffer
    }

    pub fn traffic_pattern(&self) -> &'static str {
        self.traffic_pattern
    }

    /// Add arrivals on top of the configured traffic.
    pub fn inject(&mut self, arrivals: &[Duration]) -> ModelResult<usize> {
        Ok(self
            .traffic
            .inject(&mut self.env, self.buffer.stock(), arrivals)?)
    }

    /// Execute every pending movement up to the halt horizon.
    pub fn run(&mut self) -> ModelResult<RunReport> {
        let outcome = match self.env.run_collecting() {
            (outcome, None) => outcome,
            (partial, Some(err)) => {
                warn!(
                    pattern = self.traffic_pattern,
                    completed = partial.completed.len(),
                    ignored = partial.ignored.len(),
                    error = %err,
                    "scenario aborted"
                );
                return Err(ModelError::from(err));
            }
        };

        let env = &self.env;
        let summary = RunSummary {
            requests_arrived: outcome
                .completed
                .iter()
                .filter(|r| r.kind == ARRIVE_AT_BUFFER.as_str())
                .count() as u64,
            requests_completed: env.stock(self.cluster.complete_stock()).count(),
            requests_failed: env.stock(self.buffer.failed_stock()).count(),
            requests_buffered: self.buffer.count(env),
            final_desired: self.cluster.current_desired(),
            final_launching: self.cluster.current_launching(env),
            final_active: self.cluster.current_active(env),
            entities_created: env.created_count(),
            entities_stocked: env.stocked_count(),
        };
        info!(
            completed = outcome.completed.len(),
            ignored = outcome.ignored.len(),
            served = summary.requests_completed,
            failed = summary.requests_failed,
            active = summary.final_active,
            "scenario finished"
        );

        Ok(RunReport {
            ran_for: self.config.run_for.as_nanos() as u64,
            traffic_pattern: self.traffic_pattern.to_string(),
            completed: outcome.completed,
            ignored: outcome.ignored,
            stale: outcome.stale,
            spawned: outcome.spawned,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrafficConfig;
    use crate::metrics::WindowedStats;

    #[test]
    fn invalid_config_is_rejected_before_scheduling() {
        let config = ScenarioConfig {
            run_for: Duration::ZERO,
            ..ScenarioConfig::default()
        };
        assert!(matches!(Scenario::build(config), Err(ModelError::Config(_))));
    }

    #[test]
    fn default_scenario_runs_and_conserves() {
        let config = ScenarioConfig {
            run_for: Duration::from_secs(120),
            initial_replicas: 1,
            traffic: TrafficConfig::Uniform {
                number_of_requests: 200,
            },
            ..ScenarioConfig::default()
        };
        let mut scenario = Scenario::build(config).unwrap();
        assert_eq!(scenario.traffic_pattern(), "uniform");
        let report = scenario.run().unwrap();

        assert_eq!(report.summary.entities_created, report.summary.entities_stocked);
        assert_eq!(report.summary.requests_arrived, 200);
        assert_eq!(
            report.summary.requests_completed
                + report.summary.requests_failed
                + report.summary.requests_buffered
                + in_flight(&scenario),
            200
        );
        assert!(report.summary.requests_completed > 0);
        assert_eq!(report.ran_for, 120_000_000_000);
    }

    fn in_flight(scenario: &Scenario) -> u64 {
        scenario
            .env()
            .stocks()
            .filter(|(_, s)| s.name() == "RequestsProcessing")
            .map(|(_, s)| s.count())
            .sum()
    }

    #[test]
    fn stub_decider_drives_cluster() {
        let config = ScenarioConfig {
            run_for: Duration::from_secs(30),
            traffic: TrafficConfig::Uniform {
                number_of_requests: 0,
            },
            ..ScenarioConfig::default()
        };
        let decider = |_: Duration, _: &WindowedStats, _: u64| -> ModelResult<u32> { Ok(4) };
        let mut scenario = Scenario::build_with(config, Box::new(decider)).unwrap();
        let report = scenario.run().unwrap();
        assert_eq!(report.summary.final_desired, 4);
        assert_eq!(report.summary.final_active, 4);
        assert_eq!(report.summary.final_launching, 0);
    }
}
