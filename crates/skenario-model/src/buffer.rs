//! Request buffer with retry backoff.
//!
//! `RequestsBuffered` is a through-stock decorated with [`BufferHook`]. Each
//! time a request lands in it (on arrival or on a retry wake-up) the hook
//! looks at the cluster:
//!
//! ```text
//! some replica Active
//!     every buffered request not yet headed to a replica, in stock order:
//!         drop its pending backoff or failure
//!         buffer -> replica            at now + 1ns
//! no replica Active
//!     every buffered request with nothing queued, in stock order:
//!         attempts += 1
//!         attempts > max_attempts  →  exhausted_attempts  at now + backoff + jitter
//!         otherwise                →  buffer_backoff      at now + backoff + jitter
//! ```
//!
//! A request has at most one queued movement at a time, tracked in
//! [`RequestState::queued`] and cleared when it leaves the buffer, including
//! on a retry self-loop. Requests sleeping on a backoff are woken early by a
//! dispatch, so they never queue behind later arrivals. Every request ends
//! up in a replica or in `RequestsFailed` after at most `max_attempts`
//! retries.
//!
//! [`RequestState::queued`]: crate::entities::RequestState

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use skenario_sim::{EntityId, Movement, MovementKind, SimResult, StockHook, StockId};

use crate::cluster::{processing_stock, ClusterModel};
use crate::config::BackoffConfig;
use crate::entities::{
    Payload, SimEnv, BUFFER_BACKOFF, BUFFER_TO_REPLICA, EXHAUSTED_ATTEMPTS, REQUEST,
};

/// Delay between deciding to dispatch and the dispatch itself.
pub const DISPATCH_DELAY: Duration = Duration::from_nanos(1);

/// Exponential backoff derived from [`BackoffConfig`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Wait before retry number `attempts` (1-based), and whether that
    /// attempt is over budget.
    pub fn next_backoff(&self, attempts: u32) -> (Duration, bool) {
        let exhausted = attempts > self.config.max_attempts;
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.config.initial.as_nanos() as f64 * self.config.multiplier.powi(exponent);
        let max = self.config.max_backoff.as_nanos() as f64;
        let nanos = if scaled.is_finite() { scaled.min(max) } else { max };
        (Duration::from_nanos(nanos.round() as u64), exhausted)
    }

    pub fn max_jitter(&self) -> Duration {
        self.config.max_jitter
    }
}

/// Domain logic of the `RequestsBuffered` stock.
pub struct BufferHook {
    cluster: ClusterModel,
    failed: StockId,
    policy: BackoffPolicy,
    rng: StdRng,
}

impl BufferHook {
    fn jitter(&mut self) -> Duration {
        let max = self.policy.max_jitter().as_nanos() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.rng.gen_range(0..max))
    }

    fn dispatch(
        &mut self,
        env: &mut SimEnv,
        buffer: StockId,
        replica: EntityId,
        waiting: &[EntityId],
    ) -> SimResult<()> {
        let Some(processing) = processing_stock(env, replica) else {
            return Ok(());
        };
        let at = env.current_time() + DISPATCH_DELAY;
        for request in waiting {
            if let Some(pending) = queued(env, *request) {
                env.cancel_targeting(*request, pending);
            }
            mark_queued(env, *request, Some(BUFFER_TO_REPLICA));
            env.add_to_schedule(
                Movement::new(BUFFER_TO_REPLICA, at, buffer, processing).targeting(*request),
            )?;
        }
        debug!(
            replica = %env.entity(replica).name(),
            dispatched = waiting.len(),
            "buffer dispatching"
        );
        Ok(())
    }

    fn back_off(
        &mut self,
        env: &mut SimEnv,
        buffer: StockId,
        waiting: &[EntityId],
    ) -> SimResult<()> {
        let now = env.current_time();
        for request in waiting {
            let attempts = match env.entity_mut(*request).data.as_request_mut() {
                Some(state) => {
                    state.attempts += 1;
                    state.attempts
                }
                None => continue,
            };
            let (backoff, exhausted) = self.policy.next_backoff(attempts);
            let at = now + backoff + self.jitter();

            if exhausted {
                mark_queued(env, *request, Some(EXHAUSTED_ATTEMPTS));
                info!(
                    request = %env.entity(*request).name(),
                    attempts,
                    at_ns = at.as_nanos() as u64,
                    "request exhausted its attempts"
                );
                env.add_to_schedule(
                    Movement::new(EXHAUSTED_ATTEMPTS, at, buffer, self.failed).targeting(*request),
                )?;
            } else {
                mark_queued(env, *request, Some(BUFFER_BACKOFF));
                debug!(
                    request = %env.entity(*request).name(),
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "request backing off"
                );
                env.add_to_schedule(
                    Movement::new(BUFFER_BACKOFF, at, buffer, buffer).targeting(*request),
                )?;
            }
        }
        Ok(())
    }
}

impl StockHook<Payload> for BufferHook {
    fn on_add(&mut self, env: &mut SimEnv, stock: StockId, _entity: EntityId) -> SimResult<()> {
        let buffered = env.stock(stock).entities_in_stock();
        match self.cluster.first_active_replica(env) {
            Some(replica) => {
                let waiting: Vec<EntityId> = buffered
                    .into_iter()
                    .filter(|id| queued(env, *id) != Some(BUFFER_TO_REPLICA))
                    .collect();
                if waiting.is_empty() {
                    return Ok(());
                }
                self.dispatch(env, stock, replica, &waiting)
            }
            None => {
                let waiting: Vec<EntityId> = buffered
                    .into_iter()
                    .filter(|id| queued(env, *id).is_none())
                    .collect();
                if waiting.is_empty() {
                    return Ok(());
                }
                self.back_off(env, stock, &waiting)
            }
        }
    }

    fn on_remove(&mut self, env: &mut SimEnv, _stock: StockId, entity: EntityId) -> SimResult<()> {
        mark_queued(env, entity, None);
        Ok(())
    }
}

fn queued(env: &SimEnv, request: EntityId) -> Option<MovementKind> {
    env.entity(request)
        .data
        .as_request()
        .and_then(|r| r.queued)
}

fn mark_queued(env: &mut SimEnv, request: EntityId, kind: Option<MovementKind>) {
    if let Some(state) = env.entity_mut(request).data.as_request_mut() {
        state.queued = kind;
    }
}

/// The `RequestsBuffered` stock and its `RequestsFailed` sink.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuffer {
    buffered: StockId,
    failed: StockId,
}

impl RequestBuffer {
    pub fn new(
        env: &mut SimEnv,
        cluster: ClusterModel,
        config: BackoffConfig,
        seed: u64,
    ) -> SimResult<Self> {
        let buffered = env.through_stock("RequestsBuffered", REQUEST);
        let failed = env.sink_stock("RequestsFailed", REQUEST);
        env.decorate(
            buffered,
            BufferHook {
                cluster,
                failed,
                policy: BackoffPolicy::new(config),
                rng: StdRng::seed_from_u64(seed),
            },
        )?;
        Ok(Self { buffered, failed })
    }

    pub fn stock(&self) -> StockId {
        self.buffered
    }

    pub fn failed_stock(&self) -> StockId {
        self.failed
    }

    pub fn count(&self, env: &SimEnv) -> u64 {
        env.stock(self.buffered).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicasConfig;
    use crate::entities::{new_request, ARRIVE_AT_BUFFER, PROCESSING_COMPLETE};
    use skenario_sim::Environment;

    fn backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            max_attempts,
            ..BackoffConfig::default()
        }
    }

    fn setup(run_for: Duration, max_attempts: u32) -> (SimEnv, ClusterModel, RequestBuffer) {
        setup_with(run_for, backoff(max_attempts))
    }

    fn setup_with(
        run_for: Duration,
        config: BackoffConfig,
    ) -> (SimEnv, ClusterModel, RequestBuffer) {
        let mut env = Environment::new(run_for);
        let cluster = ClusterModel::new(
            &mut env,
            ReplicasConfig {
                launch_delay: Duration::from_secs(1),
                terminate_delay: Duration::from_secs(1),
                service_time: Duration::from_millis(50),
            },
        )
        .unwrap();
        let buffer = RequestBuffer::new(&mut env, cluster.clone(), config, 7).unwrap();
        (env, cluster, buffer)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = BackoffPolicy::new(BackoffConfig::default());
        assert_eq!(policy.next_backoff(1), (Duration::from_millis(100), false));
        let (second, _) = policy.next_backoff(2);
        assert_eq!(second, Duration::from_millis(130));
        let (late, exhausted) = policy.next_backoff(18);
        assert!(late <= Duration::from_secs(10));
        assert!(!exhausted);
        assert_eq!(policy.next_backoff(19).1, true);
        assert_eq!(policy.next_backoff(u32::MAX).0, Duration::from_secs(10));
    }

    #[test]
    fn request_fails_after_budget_of_retries() {
        let (mut env, _, buffer) = setup(Duration::from_secs(600), 3);
        env.spawn(buffer.stock(), new_request(0, Duration::ZERO)).unwrap();
        let outcome = env.run().unwrap();

        let retries = outcome
            .completed
            .iter()
            .filter(|r| r.kind == BUFFER_BACKOFF.as_str())
            .count();
        assert_eq!(retries, 3);
        let last = outcome.completed.last().unwrap();
        assert_eq!(last.kind, EXHAUSTED_ATTEMPTS.as_str());
        assert_eq!(env.stock(buffer.failed_stock()).count(), 1);
        assert_eq!(buffer.count(&env), 0);
        assert!(outcome.ignored.is_empty());
    }

    #[test]
    fn zero_budget_fails_immediately() {
        let (mut env, _, buffer) = setup(Duration::from_secs(60), 0);
        env.spawn(buffer.stock(), new_request(0, Duration::ZERO)).unwrap();
        let outcome = env.run().unwrap();
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(outcome.completed[0].kind, EXHAUSTED_ATTEMPTS.as_str());
    }

    #[test]
    fn every_buffered_request_keeps_one_wakeup() {
        let (mut env, _, buffer) = setup(Duration::from_secs(600), 2);
        let source = env.source_stock(
            "Traffic",
            REQUEST,
            Box::new(|at, n| new_request(n, at)),
        );
        for i in 0..5u64 {
            env.add_to_schedule(Movement::new(
                ARRIVE_AT_BUFFER,
                Duration::from_millis(i * 10),
                source,
                buffer.stock(),
            ))
            .unwrap();
        }
        let outcome = env.run().unwrap();

        let retries = outcome
            .completed
            .iter()
            .filter(|r| r.kind == BUFFER_BACKOFF.as_str())
            .count();
        assert_eq!(retries, 10);
        assert_eq!(env.stock(buffer.failed_stock()).count(), 5);
        assert!(outcome.stale.is_empty());
    }

    #[test]
    fn waiting_requests_dispatch_once_a_replica_is_active() {
        let (mut env, cluster, buffer) = setup(Duration::from_secs(600), 18);
        cluster.set_desired(&mut env, 1).unwrap();
        env.spawn(buffer.stock(), new_request(0, Duration::ZERO)).unwrap();

        let outcome = env.run().unwrap();
        let kinds: Vec<&str> = outcome.completed.iter().map(|r| r.kind.as_str()).collect();
        assert!(kinds.contains(&BUFFER_BACKOFF.as_str()));
        assert!(kinds.contains(&BUFFER_TO_REPLICA.as_str()));
        assert_eq!(kinds.last(), Some(&PROCESSING_COMPLETE.as_str()));
        assert_eq!(env.stock(cluster.complete_stock()).count(), 1);
        assert_eq!(env.stock(buffer.failed_stock()).count(), 0);
    }

    #[test]
    fn earlier_request_waiting_on_backoff_is_served_first() {
        let (mut env, cluster, buffer) = setup_with(
            Duration::from_secs(60),
            BackoffConfig {
                initial: Duration::from_secs(10),
                ..BackoffConfig::default()
            },
        );
        cluster.set_desired(&mut env, 1).unwrap();
        let source = env.source_stock(
            "Traffic",
            REQUEST,
            Box::new(|at, n| new_request(n, at)),
        );
        for at in [Duration::from_millis(500), Duration::from_secs(2)] {
            env.add_to_schedule(Movement::new(ARRIVE_AT_BUFFER, at, source, buffer.stock()))
                .unwrap();
        }
        let outcome = env.run().unwrap();

        let dispatched: Vec<(&str, u64)> = outcome
            .completed
            .iter()
            .filter(|r| r.kind == BUFFER_TO_REPLICA.as_str())
            .map(|r| (r.entity_name.as_deref().unwrap_or_default(), r.occurs_at))
            .collect();
        let at = (Duration::from_secs(2) + DISPATCH_DELAY).as_nanos() as u64;
        assert_eq!(dispatched, vec![("request-0", at), ("request-1", at)]);
        assert!(outcome
            .completed
            .iter()
            .all(|r| r.kind != BUFFER_BACKOFF.as_str()));
        assert!(outcome.stale.is_empty());
        assert_eq!(env.stock(cluster.complete_stock()).count(), 2);
        assert_eq!(env.stock(buffer.failed_stock()).count(), 0);
    }

    #[test]
    fn dispatch_goes_to_first_active_replica_after_one_nanosecond() {
        let (mut env, cluster, buffer) = setup(Duration::from_secs(60), 18);
        cluster.set_desired(&mut env, 2).unwrap();
        env.run().unwrap();

        let now = env.current_time();
        env.spawn(buffer.stock(), new_request(0, now)).unwrap();
        let pending = env.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind(), BUFFER_TO_REPLICA);
        assert_eq!(pending[0].occurs_at(), now + DISPATCH_DELAY);

        let first = cluster.first_active_replica(&env).unwrap();
        assert_eq!(Some(pending[0].to()), processing_stock(&env, first));
    }
}
