//! Cluster: replica lifecycle reconciliation.
//!
//! Replicas move `ReplicasLaunching → ReplicasActive → ReplicasTerminated`.
//! [`ClusterModel::set_desired`] compares the target with the replicas that
//! are not already on their way out and schedules staggered movements to
//! close the gap:
//!
//! ```text
//! delta = target - (launching + active)      // terminating replicas excluded
//! delta > 0   spawn `delta` replicas into Launching,
//!             launching -> active at now + launch_delay + stagger(i)
//! delta < 0   cancel launching replicas first (newest first, their
//!             pending launch is dropped), then terminate active ones
//!             (newest first),
//!             each at now + terminate_delay + stagger(i)
//! ```
//!
//! `stagger(i) = STAGGER_BASE + i * STAGGER_STEP`, so no two transitions
//! scheduled by one call share an instant.

use std::cell::Cell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info};

use skenario_sim::{Entity, EntityId, Movement, MovementKind, SimResult, StockHook, StockId};

use crate::config::ReplicasConfig;
use crate::decider::ReadyPodCounter;
use crate::entities::{
    Payload, ReplicaState, SimEnv, ACTIVE_TO_TERMINATED, LAUNCHING_TO_ACTIVE,
    LAUNCHING_TO_TERMINATED, PROCESSING_COMPLETE, REPLICA, REQUEST,
};

/// Offset of the first staggered transition of a reconciliation.
pub const STAGGER_BASE: Duration = Duration::from_millis(1);
/// Added for every further unit in the same reconciliation.
pub const STAGGER_STEP: Duration = Duration::from_millis(1);

pub fn stagger(unit: u32) -> Duration {
    STAGGER_BASE + STAGGER_STEP * unit
}

/// Shared count of replicas in the Active stock, maintained by the
/// readiness hook.
#[derive(Debug, Clone, Default)]
pub struct ReadyPods(Rc<Cell<u64>>);

impl ReadyPods {
    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl ReadyPodCounter for ReadyPods {
    fn ready_count(&self) -> u64 {
        self.0.get()
    }
}

/// Decorates the Active stock: replicas become ready on entry and stop
/// being ready on exit.
struct ReadinessHook {
    ready: ReadyPods,
}

impl StockHook<Payload> for ReadinessHook {
    fn on_add(&mut self, env: &mut SimEnv, _stock: StockId, entity: EntityId) -> SimResult<()> {
        if let Some(replica) = env.entity_mut(entity).data.as_replica_mut() {
            replica.ready = true;
        }
        self.ready.0.set(self.ready.0.get() + 1);
        debug!(replica = %env.entity(entity).name(), ready = self.ready.get(), "replica ready");
        Ok(())
    }

    fn on_remove(&mut self, env: &mut SimEnv, _stock: StockId, entity: EntityId) -> SimResult<()> {
        if let Some(replica) = env.entity_mut(entity).data.as_replica_mut() {
            replica.ready = false;
        }
        self.ready.0.set(self.ready.0.get().saturating_sub(1));
        Ok(())
    }
}

/// Decorates a replica's processing stock: every request that arrives is
/// served for `service_time` and then moved to the completed sink.
struct ProcessingHook {
    complete: StockId,
    service_time: Duration,
}

impl StockHook<Payload> for ProcessingHook {
    fn on_add(&mut self, env: &mut SimEnv, stock: StockId, entity: EntityId) -> SimResult<()> {
        let at = env.current_time() + self.service_time;
        env.add_to_schedule(
            Movement::new(PROCESSING_COMPLETE, at, stock, self.complete).targeting(entity),
        )
    }
}

/// Replica pool of one simulated service. Cheap to clone: clones share the
/// desired count, the address sequence and the ready counter.
#[derive(Debug, Clone)]
pub struct ClusterModel {
    launching: StockId,
    active: StockId,
    terminated: StockId,
    complete: StockId,
    desired: Rc<Cell<u32>>,
    next_ip: Rc<Cell<u32>>,
    ready: ReadyPods,
    config: ReplicasConfig,
}

impl ClusterModel {
    /// Register the cluster's stocks in `env`.
    pub fn new(env: &mut SimEnv, config: ReplicasConfig) -> SimResult<Self> {
        let launching = env.through_stock("ReplicasLaunching", REPLICA);
        let active = env.through_stock("ReplicasActive", REPLICA);
        let terminated = env.sink_stock("ReplicasTerminated", REPLICA);
        let complete = env.sink_stock("RequestsComplete", REQUEST);

        let ready = ReadyPods::default();
        env.decorate(
            active,
            ReadinessHook {
                ready: ready.clone(),
            },
        )?;

        Ok(Self {
            launching,
            active,
            terminated,
            complete,
            desired: Rc::new(Cell::new(0)),
            next_ip: Rc::new(Cell::new(1)),
            ready,
            config,
        })
    }

    pub fn launching_stock(&self) -> StockId {
        self.launching
    }

    pub fn active_stock(&self) -> StockId {
        self.active
    }

    pub fn terminated_stock(&self) -> StockId {
        self.terminated
    }

    pub fn complete_stock(&self) -> StockId {
        self.complete
    }

    pub fn ready_pods(&self) -> ReadyPods {
        self.ready.clone()
    }

    pub fn current_desired(&self) -> u32 {
        self.desired.get()
    }

    pub fn current_launching(&self, env: &SimEnv) -> u64 {
        env.stock(self.launching).count()
    }

    pub fn current_active(&self, env: &SimEnv) -> u64 {
        env.stock(self.active).count()
    }

    /// First replica in Active stock order that is not being terminated.
    pub fn first_active_replica(&self, env: &SimEnv) -> Option<EntityId> {
        env.stock(self.active)
            .entities_in_stock()
            .into_iter()
            .find(|id| !is_terminating(env, *id))
    }

    /// Active replicas that are not being terminated, in stock order.
    pub fn serving_replicas(&self, env: &SimEnv) -> Vec<EntityId> {
        live_replicas(env, self.active)
    }

    /// Reconcile towards `target` replicas.
    pub fn set_desired(&self, env: &mut SimEnv, target: u32) -> SimResult<()> {
        let launching = live_replicas(env, self.launching);
        let active = live_replicas(env, self.active);
        let current = (launching.len() + active.len()) as i64;
        let delta = i64::from(target) - current;
        let now = env.current_time();

        if delta > 0 {
            for unit in 0..delta as u32 {
                let replica = self.spawn_replica(env)?;
                let at = now + self.config.launch_delay + stagger(unit);
                env.add_to_schedule(
                    Movement::new(LAUNCHING_TO_ACTIVE, at, self.launching, self.active)
                        .targeting(replica),
                )?;
            }
        } else if delta < 0 {
            let mut remaining = delta.unsigned_abs() as usize;
            let mut unit = 0u32;

            let cancelled: Vec<EntityId> =
                launching.iter().rev().take(remaining).copied().collect();
            remaining -= cancelled.len();
            for replica in cancelled {
                env.cancel_targeting(replica, LAUNCHING_TO_ACTIVE);
                self.schedule_termination(
                    env,
                    replica,
                    self.launching,
                    LAUNCHING_TO_TERMINATED,
                    now,
                    unit,
                )?;
                unit += 1;
            }

            let stopped: Vec<EntityId> = active.iter().rev().take(remaining).copied().collect();
            for replica in stopped {
                self.schedule_termination(
                    env,
                    replica,
                    self.active,
                    ACTIVE_TO_TERMINATED,
                    now,
                    unit,
                )?;
                unit += 1;
            }
        }

        if delta != 0 {
            info!(
                now_ns = now.as_nanos() as u64,
                from = current,
                to = target,
                "cluster reconciling"
            );
        }
        self.desired.set(target);
        Ok(())
    }

    fn schedule_termination(
        &self,
        env: &mut SimEnv,
        replica: EntityId,
        from: StockId,
        kind: MovementKind,
        now: Duration,
        unit: u32,
    ) -> SimResult<()> {
        if let Some(state) = env.entity_mut(replica).data.as_replica_mut() {
            state.terminating = true;
        }
        let at = now + self.config.terminate_delay + stagger(unit);
        env.add_to_schedule(Movement::new(kind, at, from, self.terminated).targeting(replica))
    }

    fn spawn_replica(&self, env: &mut SimEnv) -> SimResult<EntityId> {
        let address = Ipv4Addr::from(self.next_ip.get());
        self.next_ip.set(self.next_ip.get().wrapping_add(1));

        let processing = env.through_stock("RequestsProcessing", REQUEST);
        env.decorate(
            processing,
            ProcessingHook {
                complete: self.complete,
                service_time: self.config.service_time,
            },
        )?;

        let replica = Entity::new(
            address.to_string(),
            REPLICA,
            Payload::Replica(ReplicaState {
                address,
                ready: false,
                terminating: false,
                processing,
            }),
        );
        env.spawn(self.launching, replica)
    }
}

fn is_terminating(env: &SimEnv, replica: EntityId) -> bool {
    env.entity(replica)
        .data
        .as_replica()
        .is_some_and(|r| r.terminating)
}

fn live_replicas(env: &SimEnv, stock: StockId) -> Vec<EntityId> {
    env.stock(stock)
        .entities_in_stock()
        .into_iter()
        .filter(|id| !is_terminating(env, *id))
        .collect()
}

/// Processing stock of `replica`, if it is a replica.
pub fn processing_stock(env: &SimEnv, replica: EntityId) -> Option<StockId> {
    env.entity(replica).data.as_replica().map(|r| r.processing)
}
