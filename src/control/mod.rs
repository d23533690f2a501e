pub mod calibrate;
pub mod mapper;

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{Config, POLL_INTERVAL};
use crate::devices::{ActuationError, Actuator, PowerSample, TelemetryError, TelemetrySource};
pub use calibrate::{Calibrator, ConsolePrompt};
pub use mapper::DutyCycleMapper;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("actuation error: {0}")]
    Actuation(#[from] ActuationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Connecting, // waiting for the first good read after start or a fault
    Polling,
    Reporting,
    Faulted,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub faults: u64,
    pub consecutive_faults: u32,
}

/// Result of a single pass through the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Reported { sample: PowerSample, duty: f64 },
    Faulted { retry_in: Duration },
}

/// Polls the inverter once per second and drives the meter.
pub struct ControlLoop<S: TelemetrySource, A: Actuator> {
    source: S,
    actuator: A,
    mapper: DutyCycleMapper,
    max_backoff: Duration,
    state: LoopState,
    stats: LoopStats,
}

impl<S: TelemetrySource, A: Actuator> ControlLoop<S, A> {
    pub fn new(config: &Config, source: S, actuator: A, mapper: DutyCycleMapper) -> Self {
        Self {
            source,
            actuator,
            mapper,
            max_backoff: config.max_backoff(),
            state: LoopState::Connecting,
            stats: LoopStats::default(),
        }
    }

    /// Run until the process is killed. Only an actuator failure returns.
    ///
    /// Ticks are scheduled at a fixed rate. A tick that overruns its slot
    /// re-anchors the schedule to the current time instead of firing the
    /// missed ticks back to back.
    pub fn run(&mut self) -> Result<(), ControlError> {
        info!(
            "Starting control loop (calibrated: {})",
            self.mapper.is_calibrated()
        );
        let mut next_tick = Instant::now();
        loop {
            let outcome = self.tick()?;
            if let TickOutcome::Reported { sample, duty } = outcome {
                debug!(
                    "Tick {} at {}: {} W, duty {:.4}",
                    self.stats.ticks,
                    sample.timestamp.to_rfc3339(),
                    sample.watts,
                    duty
                );
            }

            let now = Instant::now();
            next_tick = next_deadline(next_tick, &outcome, now);
            if next_tick > now {
                thread::sleep(next_tick - now);
            }
        }
    }

    /// Acquire, map, actuate and report one sample.
    pub fn tick(&mut self) -> Result<TickOutcome, ControlError> {
        self.state = match self.state {
            LoopState::Faulted => LoopState::Connecting,
            LoopState::Reporting => LoopState::Polling,
            state => state,
        };
        self.stats.ticks += 1;
        let sample = match self.source.read_power() {
            Ok(sample) => sample,
            Err(e) => return Ok(self.fault(e)),
        };

        if self.state == LoopState::Connecting {
            info!("Receiving power readings from inverter");
        }
        self.state = LoopState::Polling;
        self.stats.consecutive_faults = 0;

        let duty = self.mapper.map(sample.watts);
        if let Err(e) = self.actuator.set(duty) {
            error!("Meter actuation failed: {}", e);
            return Err(e.into());
        }

        // Held until the next tick starts
        self.state = LoopState::Reporting;
        println!("Power: {} W", sample.watts);

        Ok(TickOutcome::Reported { sample, duty })
    }

    fn fault(&mut self, e: TelemetryError) -> TickOutcome {
        self.state = LoopState::Faulted;
        self.stats.faults += 1;
        self.stats.consecutive_faults += 1;

        let retry_in = self.backoff();
        warn!(
            "Inverter read failed ({} in a row, {} total): {}, retrying in {:?}",
            self.stats.consecutive_faults, self.stats.faults, e, retry_in
        );
        eprintln!("Inverter read failed: {}", e);
        TickOutcome::Faulted { retry_in }
    }

    /// One poll interval after the first fault, doubling per consecutive
    /// fault up to the configured cap.
    fn backoff(&self) -> Duration {
        let doublings = self.stats.consecutive_faults.saturating_sub(1).min(16);
        POLL_INTERVAL
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

/// When the tick after `outcome` is due.
///
/// Reported ticks keep a fixed rate from the previous deadline; a fault
/// waits out its backoff from `now`. A deadline already in the past is
/// re-anchored to `now` so missed ticks are skipped rather than replayed.
fn next_deadline(previous: Instant, outcome: &TickOutcome, now: Instant) -> Instant {
    let due = match outcome {
        TickOutcome::Reported { .. } => previous + POLL_INTERVAL,
        TickOutcome::Faulted { retry_in } => now + *retry_in,
    };
    due.max(now)
}
