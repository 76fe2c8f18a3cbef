//! Payloads, kinds and movement labels of the skenario model.

use std::net::Ipv4Addr;
use std::time::Duration;

use skenario_sim::{Entity, EntityKind, Environment, MovementKind, StockId};

pub const REQUEST: EntityKind = EntityKind("Request");
pub const REPLICA: EntityKind = EntityKind("Replica");
pub const AUTOSCALER: EntityKind = EntityKind("Autoscaler");
pub const SCRAPER: EntityKind = EntityKind("Scraper");

pub const ARRIVE_AT_BUFFER: MovementKind = MovementKind("arrive_at_buffer");
pub const BUFFER_TO_REPLICA: MovementKind = MovementKind("buffer -> replica");
pub const BUFFER_BACKOFF: MovementKind = MovementKind("buffer_backoff");
pub const EXHAUSTED_ATTEMPTS: MovementKind = MovementKind("exhausted_attempts");
pub const PROCESSING_COMPLETE: MovementKind = MovementKind("processing -> complete");
pub const LAUNCHING_TO_ACTIVE: MovementKind = MovementKind("launching -> active");
pub const LAUNCHING_TO_TERMINATED: MovementKind = MovementKind("launching -> terminated");
pub const ACTIVE_TO_TERMINATED: MovementKind = MovementKind("active -> terminated");
pub const AUTOSCALER_TICK: MovementKind = MovementKind("autoscaler_tick");
pub const SCRAPER_TICK: MovementKind = MovementKind("scraper_tick");

/// Environment specialised to skenario payloads.
pub type SimEnv = Environment<Payload>;

/// Domain state carried by every entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Request(RequestState),
    Replica(ReplicaState),
    /// Tick driver pseudo-entity.
    Process,
}

/// Per-request backoff bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestState {
    pub arrived_at: Duration,
    /// Backoff computations so far.
    pub attempts: u32,
    /// The movement out of the buffer (dispatch, retry or failure) queued
    /// for this request, if any.
    pub queued: Option<MovementKind>,
}

impl RequestState {
    pub fn arrived(at: Duration) -> Self {
        Self {
            arrived_at: at,
            attempts: 0,
            queued: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaState {
    pub address: Ipv4Addr,
    pub ready: bool,
    /// A termination movement is queued for this replica.
    pub terminating: bool,
    /// Through-stock holding the requests this replica is serving.
    pub processing: StockId,
}

impl Payload {
    pub fn as_request(&self) -> Option<&RequestState> {
        match self {
            Payload::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_request_mut(&mut self) -> Option<&mut RequestState> {
        match self {
            Payload::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_replica(&self) -> Option<&ReplicaState> {
        match self {
            Payload::Replica(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_replica_mut(&mut self) -> Option<&mut ReplicaState> {
        match self {
            Payload::Replica(r) => Some(r),
            _ => None,
        }
    }
}

/// Build a request entity that arrived at `at`.
pub fn new_request(sequence: u64, at: Duration) -> Entity<Payload> {
    Entity::new(
        format!("request-{sequence}"),
        REQUEST,
        Payload::Request(RequestState::arrived(at)),
    )
}
