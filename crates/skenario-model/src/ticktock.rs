//! Tick drivers: self-rescheduling periodic processes.
//!
//! Each driver is a pseudo-entity living in its own through-stock. Its only
//! movement is a self-loop on that stock; the stock's hook performs the
//! driver's work and queues the next self-loop `interval` later, as long as
//! that stays within the halt horizon. The first tick fires at
//! `start + interval + 1ns`.

use std::time::Duration;

use tracing::debug;

use skenario_sim::{
    Entity, EntityId, EntityKind, Movement, MovementKind, SimError, SimResult, StockHook, StockId,
};

use crate::buffer::RequestBuffer;
use crate::cluster::ClusterModel;
use crate::decider::Decider;
use crate::entities::{Payload, SimEnv, AUTOSCALER, AUTOSCALER_TICK, SCRAPER, SCRAPER_TICK};
use crate::metrics::{MetricsCollector, SharedCollector, ACTIVATOR};

/// Offset of the first tick past the first interval.
pub const FIRST_TICK_OFFSET: Duration = Duration::from_nanos(1);

/// Work done on every tick.
pub trait TickAction {
    fn tick(&mut self, env: &mut SimEnv) -> SimResult<()>;
}

struct Ticker<A> {
    movement: MovementKind,
    interval: Duration,
    action: A,
}

impl<A: TickAction> StockHook<Payload> for Ticker<A> {
    fn on_add(&mut self, env: &mut SimEnv, stock: StockId, entity: EntityId) -> SimResult<()> {
        self.action.tick(env)?;
        let next = env.current_time() + self.interval;
        if next <= env.halt_time() {
            env.add_to_schedule(
                Movement::new(self.movement, next, stock, stock).targeting(entity),
            )?;
        }
        Ok(())
    }
}

/// Register a driver and queue its first tick. Returns the driver's stock.
pub fn install<A: TickAction + 'static>(
    env: &mut SimEnv,
    name: &str,
    kind: EntityKind,
    movement: MovementKind,
    interval: Duration,
    action: A,
) -> SimResult<StockId> {
    let stock = env.through_stock(format!("{name}Ticktock"), kind);
    // Spawned before decorating so placing the process does not tick.
    let process = env.spawn(stock, Entity::new(name, kind, Payload::Process))?;
    env.decorate(
        stock,
        Ticker {
            movement,
            interval,
            action,
        },
    )?;

    let first = env.current_time() + interval + FIRST_TICK_OFFSET;
    if first <= env.halt_time() {
        env.add_to_schedule(Movement::new(movement, first, stock, stock).targeting(process))?;
    }
    debug!(driver = name, interval_ms = interval.as_millis() as u64, "tick driver installed");
    Ok(stock)
}

/// Asks the decider for a replica count and reconciles the cluster.
pub struct AutoscalerTick {
    pub cluster: ClusterModel,
    pub decider: Box<dyn Decider>,
    pub collector: SharedCollector,
}

impl TickAction for AutoscalerTick {
    fn tick(&mut self, env: &mut SimEnv) -> SimResult<()> {
        let now = env.current_time();
        let stats = self
            .collector
            .borrow_mut()
            .stats(now)
            .map_err(|e| SimError::hook("AutoscalerTicktock", e))?;
        let active = self.cluster.current_active(env);
        let desired = self
            .decider
            .decide(now, &stats, active)
            .map_err(|e| SimError::hook("AutoscalerTicktock", e))?;
        self.cluster.set_desired(env, desired)
    }
}

/// Records one unit of concurrency per Active replica, plus the number of
/// buffered requests on behalf of the activator.
pub struct ScraperTick {
    pub cluster: ClusterModel,
    pub buffer: RequestBuffer,
    pub collector: SharedCollector,
}

impl TickAction for ScraperTick {
    fn tick(&mut self, env: &mut SimEnv) -> SimResult<()> {
        let now = env.current_time();
        let mut collector = self.collector.borrow_mut();
        for replica in env.stock(self.cluster.active_stock()).entities_in_stock() {
            collector
                .record(env.entity(replica).name(), now, 1.0)
                .map_err(|e| SimError::hook("ScraperTicktock", e))?;
        }
        let buffered = self.buffer.count(env);
        if buffered > 0 {
            collector
                .record(ACTIVATOR, now, buffered as f64)
                .map_err(|e| SimError::hook("ScraperTicktock", e))?;
        }
        Ok(())
    }
}

pub fn install_autoscaler(
    env: &mut SimEnv,
    interval: Duration,
    tick: AutoscalerTick,
) -> SimResult<StockId> {
    install(env, "Autoscaler", AUTOSCALER, AUTOSCALER_TICK, interval, tick)
}

pub fn install_scraper(
    env: &mut SimEnv,
    interval: Duration,
    tick: ScraperTick,
) -> SimResult<StockId> {
    install(env, "Scraper", SCRAPER, SCRAPER_TICK, interval, tick)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::{BackoffConfig, ReplicasConfig};
    use crate::entities::new_request;
    use crate::error::{ModelError, ModelResult};
    use crate::metrics::{MetricDescriptor, WindowedCollector, WindowedStats};
    use skenario_sim::Environment;

    struct Counter(Rc<RefCell<Vec<Duration>>>);

    impl TickAction for Counter {
        fn tick(&mut self, env: &mut SimEnv) -> SimResult<()> {
            self.0.borrow_mut().push(env.current_time());
            Ok(())
        }
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn collector() -> Rc<RefCell<WindowedCollector>> {
        let c = WindowedCollector::shared();
        c.borrow_mut()
            .create(MetricDescriptor {
                name: "concurrency".into(),
                stable_window: secs(60),
                panic_window: secs(6),
            })
            .unwrap();
        c
    }

    #[test]
    fn ticks_every_interval_until_halt() {
        let mut env = Environment::new(secs(10));
        let seen = Rc::new(RefCell::new(Vec::new()));
        install(&mut env, "Test", SCRAPER, SCRAPER_TICK, secs(2), Counter(seen.clone())).unwrap();
        let outcome = env.run().unwrap();

        let expected: Vec<Duration> = (1..=4)
            .map(|n| secs(2 * n) + FIRST_TICK_OFFSET)
            .collect();
        assert_eq!(*seen.borrow(), expected);
        assert!(outcome.completed.iter().all(|r| r.is_self_loop()));
        assert!(outcome.ignored.is_empty());
    }

    #[test]
    fn no_tick_when_first_interval_exceeds_halt() {
        let mut env = Environment::new(secs(1));
        let seen = Rc::new(RefCell::new(Vec::new()));
        install(&mut env, "Test", SCRAPER, SCRAPER_TICK, secs(2), Counter(seen.clone())).unwrap();
        assert_eq!(env.pending_count(), 0);
        env.run().unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn scraper_records_replicas_and_buffered_requests() {
        let mut env = Environment::new(secs(3));
        let cluster = ClusterModel::new(
            &mut env,
            ReplicasConfig {
                launch_delay: secs(1),
                ..ReplicasConfig::default()
            },
        )
        .unwrap();
        let buffer =
            RequestBuffer::new(&mut env, cluster.clone(), BackoffConfig::default(), 1).unwrap();
        cluster.set_desired(&mut env, 2).unwrap();
        let collector = collector();
        install_scraper(
            &mut env,
            secs(2),
            ScraperTick {
                cluster: cluster.clone(),
                buffer,
                collector: collector.clone(),
            },
        )
        .unwrap();
        env.run().unwrap();

        let stats = collector.borrow_mut().stats(env.current_time()).unwrap();
        assert_eq!(stats.stable_concurrency, 2.0);

        // With nothing active, buffered requests are what gets observed.
        let mut env = Environment::new(secs(3));
        let cluster = ClusterModel::new(&mut env, ReplicasConfig::default()).unwrap();
        let buffer =
            RequestBuffer::new(&mut env, cluster.clone(), BackoffConfig::default(), 1).unwrap();
        let collector = collector_with_backlog(&mut env, &cluster, buffer);
        let stats = collector.borrow_mut().stats(secs(3)).unwrap();
        assert_eq!(stats.stable_concurrency, 1.0);
    }

    fn collector_with_backlog(
        env: &mut SimEnv,
        cluster: &ClusterModel,
        buffer: RequestBuffer,
    ) -> Rc<RefCell<WindowedCollector>> {
        let collector = collector();
        env.spawn(buffer.stock(), new_request(0, Duration::ZERO)).unwrap();
        install_scraper(
            env,
            secs(2),
            ScraperTick {
                cluster: cluster.clone(),
                buffer,
                collector: collector.clone(),
            },
        )
        .unwrap();
        env.run().unwrap();
        collector
    }

    #[test]
    fn autoscaler_tick_applies_decision() {
        let mut env = Environment::new(secs(5));
        let cluster = ClusterModel::new(&mut env, ReplicasConfig::default()).unwrap();
        let decider = |_: Duration, _: &WindowedStats, _: u64| -> ModelResult<u32> { Ok(3) };
        install_autoscaler(
            &mut env,
            secs(2),
            AutoscalerTick {
                cluster: cluster.clone(),
                decider: Box::new(decider),
                collector: collector(),
            },
        )
        .unwrap();
        env.run().unwrap();
        assert_eq!(cluster.current_desired(), 3);
        assert_eq!(cluster.current_launching(&env), 3);
    }

    #[test]
    fn decider_failure_aborts_the_run() {
        let mut env = Environment::new(secs(5));
        let cluster = ClusterModel::new(&mut env, ReplicasConfig::default()).unwrap();
        let decider = |_: Duration, _: &WindowedStats, _: u64| -> ModelResult<u32> {
            Err(ModelError::Decider("no algorithm".into()))
        };
        install_autoscaler(
            &mut env,
            secs(2),
            AutoscalerTick {
                cluster,
                decider: Box::new(decider),
                collector: collector(),
            },
        )
        .unwrap();
        let err = env.run().unwrap_err();
        assert!(matches!(err, SimError::Hook { .. }));
        assert!(err.to_string().contains("no algorithm"));
    }
}
