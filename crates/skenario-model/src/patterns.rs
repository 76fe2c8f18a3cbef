//! Traffic patterns: seeded generators of arrival instants.
//!
//! Every pattern answers the same question: at which instants in
//! `[begin, end)` do requests arrive? Rate-based patterns decide how many
//! requests fall in each whole second and spread them uniformly inside it.

use std::f64::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::TrafficConfig;

pub trait TrafficPattern {
    /// Name reported alongside the run.
    fn name(&self) -> &'static str;

    /// Arrival instants in `[begin, end)`, earliest first.
    fn generate(&mut self, begin: Duration, end: Duration) -> Vec<Duration>;
}

/// Build the pattern a config describes.
pub fn from_config(config: &TrafficConfig, seed: u64) -> Box<dyn TrafficPattern> {
    let rng = StdRng::seed_from_u64(seed);
    match config.clone() {
        TrafficConfig::Uniform { number_of_requests } => Box::new(Uniform {
            number_of_requests,
            rng,
        }),
        TrafficConfig::Ramp { delta_v, max_rps } => Box::new(Ramp {
            delta_v,
            max_rps,
            rng,
        }),
        TrafficConfig::Step { rps, step_after } => Box::new(Step {
            rps,
            step_after,
            rng,
        }),
        TrafficConfig::Sinusoidal {
            amplitude,
            period,
            offset,
        } => Box::new(Sinusoidal {
            amplitude,
            period,
            offset,
            rng,
        }),
    }
}

/// `number_of_requests` instants drawn uniformly from the whole window.
pub struct Uniform {
    pub number_of_requests: u32,
    pub rng: StdRng,
}

impl TrafficPattern for Uniform {
    fn name(&self) -> &'static str {
        "uniform"
    }

    fn generate(&mut self, begin: Duration, end: Duration) -> Vec<Duration> {
        if end <= begin {
            return Vec::new();
        }
        let span = (end - begin).as_nanos() as u64;
        let mut arrivals: Vec<Duration> = (0..self.number_of_requests)
            .map(|_| begin + Duration::from_nanos(self.rng.gen_range(0..span)))
            .collect();
        arrivals.sort();
        arrivals
    }
}

/// Rate climbs by `delta_v` every second up to `max_rps`, falls back to zero
/// at the same pace, and repeats.
pub struct Ramp {
    pub delta_v: u32,
    pub max_rps: u32,
    pub rng: StdRng,
}

impl Ramp {
    fn rate_at(&self, second: u64) -> u32 {
        if self.delta_v == 0 || self.max_rps == 0 {
            return 0;
        }
        let steps_up = u64::from(self.max_rps.div_ceil(self.delta_v));
        let cycle = steps_up * 2;
        let pos = second % cycle;
        let step = if pos < steps_up { pos + 1 } else { cycle - pos - 1 };
        (step * u64::from(self.delta_v)).min(u64::from(self.max_rps)) as u32
    }
}

impl TrafficPattern for Ramp {
    fn name(&self) -> &'static str {
        "ramp"
    }

    fn generate(&mut self, begin: Duration, end: Duration) -> Vec<Duration> {
        let rates: Vec<u32> = (0..whole_seconds(begin, end)).map(|s| self.rate_at(s)).collect();
        spread_per_second(&mut self.rng, begin, end, &rates)
    }
}

/// Nothing until `step_after`, then a constant `rps`.
pub struct Step {
    pub rps: u32,
    pub step_after: Duration,
    pub rng: StdRng,
}

impl TrafficPattern for Step {
    fn name(&self) -> &'static str {
        "step"
    }

    fn generate(&mut self, begin: Duration, end: Duration) -> Vec<Duration> {
        let rates: Vec<u32> = (0..whole_seconds(begin, end))
            .map(|s| {
                if Duration::from_secs(s) >= self.step_after {
                    self.rps
                } else {
                    0
                }
            })
            .collect();
        spread_per_second(&mut self.rng, begin, end, &rates)
    }
}

/// Rate follows `amplitude * sin(2πt / period) + offset`, floored at zero.
pub struct Sinusoidal {
    pub amplitude: u32,
    pub period: Duration,
    pub offset: u32,
    pub rng: StdRng,
}

impl Sinusoidal {
    fn rate_at(&self, second: u64) -> u32 {
        let period = self.period.as_secs_f64();
        if period <= 0.0 {
            return self.offset;
        }
        let phase = 2.0 * PI * second as f64 / period;
        let rate = f64::from(self.amplitude) * phase.sin() + f64::from(self.offset);
        rate.max(0.0).round() as u32
    }
}

impl TrafficPattern for Sinusoidal {
    fn name(&self) -> &'static str {
        "sinusoidal"
    }

    fn generate(&mut self, begin: Duration, end: Duration) -> Vec<Duration> {
        let rates: Vec<u32> = (0..whole_seconds(begin, end)).map(|s| self.rate_at(s)).collect();
        spread_per_second(&mut self.rng, begin, end, &rates)
    }
}

/// Seconds touched by `[begin, end)`, counting a trailing partial second.
fn whole_seconds(begin: Duration, end: Duration) -> u64 {
    if end <= begin {
        return 0;
    }
    (end - begin).as_nanos().div_ceil(1_000_000_000) as u64
}

/// Place `rates[s]` arrivals uniformly inside second `s` of the window,
/// dropping any that would land at or past `end`.
fn spread_per_second(
    rng: &mut StdRng,
    begin: Duration,
    end: Duration,
    rates: &[u32],
) -> Vec<Duration> {
    let mut arrivals = Vec::new();
    for (second, &rate) in rates.iter().enumerate() {
        let start = begin + Duration::from_secs(second as u64);
        let mut in_second: Vec<Duration> = (0..rate)
            .map(|_| start + Duration::from_nanos(rng.gen_range(0..1_000_000_000)))
            .filter(|at| *at < end)
            .collect();
        in_second.sort();
        arrivals.extend(in_second);
    }
    arrivals
}
