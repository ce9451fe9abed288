use crate::system::config::PumpConfig;
use crate::types::{FaultKind, PumpReading, PumpState};
use embassy_time::{Duration, Instant};
use log::{debug, error, warn};

/// Classifies sensor readings into fault categories while the motor runs.
pub struct SafetyMonitor {
    last_reading: Option<Instant>,
    low_load_count: u32,
}

impl SafetyMonitor {
    pub fn new() -> Self {
        Self {
            last_reading: None,
            low_load_count: 0,
        }
    }

    pub fn check(
        &mut self,
        state: PumpState,
        reading: &PumpReading,
        config: &PumpConfig,
        now: Instant,
    ) -> Option<FaultKind> {
        self.last_reading = Some(now);

        if !state.is_running() {
            self.low_load_count = 0;
            return None;
        }

        let values_valid = reading.current_amps.is_finite()
            && reading.flow_lpm.is_finite()
            && reading.current_amps >= 0.0
            && reading.flow_lpm >= 0.0;
        if !values_valid {
            error!("SAFETY: implausible reading {:?}", reading);
            return Some(FaultKind::SensorFault);
        }

        if reading.current_amps >= config.overcurrent_amps {
            error!(
                "SAFETY: overcurrent {:.2}A (limit {:.2}A)",
                reading.current_amps, config.overcurrent_amps
            );
            return Some(FaultKind::Overcurrent);
        }

        // Startup inrush and priming are judged by the startup timeout instead
        if state != PumpState::PumpingWater {
            return None;
        }

        let low_load = reading.current_amps < config.dry_run_amps || reading.flow_lpm < config.min_flow_lpm;
        if low_load {
            self.low_load_count += 1;
            debug!(
                "Low load reading {}/{}: {:.2}A {:.2}L/min",
                self.low_load_count, config.debounce_readings, reading.current_amps, reading.flow_lpm
            );
            if self.low_load_count >= config.debounce_readings {
                warn!("SAFETY: dry run detected after {} readings", self.low_load_count);
                self.low_load_count = 0;
                return Some(FaultKind::DryRun);
            }
        } else {
            self.low_load_count = 0;
        }

        None
    }

    /// Watchdog on the sensor feed. Counts from `since` when nothing has
    /// been received yet.
    pub fn reading_stale(&self, since: Instant, now: Instant, timeout: Duration) -> bool {
        let last = match self.last_reading {
            Some(last) if last > since => last,
            _ => since,
        };
        elapsed(last, now) >= timeout
    }

    pub fn last_reading(&self) -> Option<Instant> {
        self.last_reading
    }

    pub fn reset(&mut self) {
        self.last_reading = None;
        self.low_load_count = 0;
    }
}

impl Default for SafetyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn elapsed(since: Instant, now: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}
