//! Traffic injection.
//!
//! Turns arrival instants into `arrive_at_buffer` movements drawn from the
//! `TrafficSource` stock, which synthesizes a fresh request on every draw.

use std::time::Duration;

use tracing::debug;

use skenario_sim::{Movement, SimResult, StockId};

use crate::entities::{new_request, SimEnv, ARRIVE_AT_BUFFER, REQUEST};
use crate::patterns::TrafficPattern;

#[derive(Debug, Clone, Copy)]
pub struct TrafficSource {
    stock: StockId,
}

impl TrafficSource {
    pub fn new(env: &mut SimEnv) -> Self {
        let stock = env.source_stock(
            "TrafficSource",
            REQUEST,
            Box::new(|at: Duration, drawn: u64| new_request(drawn, at)),
        );
        Self { stock }
    }

    pub fn stock(&self) -> StockId {
        self.stock
    }

    /// Schedule one arrival into `buffer` per instant. Instants past the
    /// halt horizon are still scheduled so they surface as ignored.
    pub fn inject(
        &self,
        env: &mut SimEnv,
        buffer: StockId,
        arrivals: &[Duration],
    ) -> SimResult<usize> {
        for at in arrivals {
            env.add_to_schedule(Movement::new(ARRIVE_AT_BUFFER, *at, self.stock, buffer))?;
        }
        Ok(arrivals.len())
    }

    /// Generate arrivals for `[begin, end)` from `pattern` and inject them.
    pub fn generate(
        &self,
        env: &mut SimEnv,
        buffer: StockId,
        pattern: &mut dyn TrafficPattern,
        begin: Duration,
        end: Duration,
    ) -> SimResult<usize> {
        let arrivals = pattern.generate(begin, end);
        let injected = self.inject(env, buffer, &arrivals)?;
        debug!(pattern = pattern.name(), injected, "traffic generated");
        Ok(injected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skenario_sim::Environment;

    #[test]
    fn arrivals_become_requests_stamped_on_arrival() {
        let mut env: SimEnv = Environment::new(Duration::from_secs(10));
        let traffic = TrafficSource::new(&mut env);
        let buffer = env.through_stock("RequestsBuffered", REQUEST);

        let arrivals = [Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(12)];
        assert_eq!(traffic.inject(&mut env, buffer, &arrivals).unwrap(), 3);
        let outcome = env.run().unwrap();

        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(outcome.ignored.len(), 1);
        assert!(outcome.completed.iter().all(|r| r.from_source));

        let held = env.stock(buffer).entities_in_stock();
        let stamped: Vec<Duration> = held
            .iter()
            .filter_map(|id| env.entity(*id).data.as_request().map(|r| r.arrived_at))
            .collect();
        assert_eq!(stamped, vec![Duration::from_secs(1), Duration::from_secs(3)]);
        assert_eq!(env.entity(held[0]).name(), "request-0");
    }
}
