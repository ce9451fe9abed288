//! Drives the pump state machine from events, sensor readings and timers.

use crate::pump::states::{PumpStateMachine, PumpTransition, PumpTransitionError};
use crate::safety::{elapsed, SafetyMonitor};
use crate::system::config::{ErrorPolicy, PumpConfig};
use crate::transition::{StateReader, TransitionError};
use crate::types::{FaultKind, PumpReading, PumpState, PumpStatistics};
use embassy_time::Instant;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PumpEvent {
    /// Level sensor reports enough water in the well.
    WellRecovered,
    /// Manual start; ends the recovery period early.
    StartRequested,
    StartupComplete,
    StopRequested,
    StopComplete,
    Fault(FaultKind),
    Reading(PumpReading),
    Reset,
}

pub struct PumpController {
    machine: PumpStateMachine,
    safety: SafetyMonitor,
    config: PumpConfig,
    entered_at: Instant,
    run_started_at: Option<Instant>,
    auto_retries: u32,
    last_fault: Option<FaultKind>,
    statistics: PumpStatistics,
}

impl PumpController {
    pub fn new(config: PumpConfig, initial: PumpState, now: Instant) -> Self {
        info!("Pump controller starting in {}", initial.name());
        Self {
            machine: PumpStateMachine::with_initial(initial),
            safety: SafetyMonitor::new(),
            config,
            entered_at: now,
            run_started_at: None,
            auto_retries: 0,
            last_fault: None,
            statistics: PumpStatistics::default(),
        }
    }

    pub fn state(&self) -> PumpState {
        self.machine.state()
    }

    pub fn reader(&self) -> StateReader<PumpState> {
        self.machine.reader()
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: PumpConfig) {
        self.config = config;
    }

    pub fn statistics(&self) -> &PumpStatistics {
        &self.statistics
    }

    pub fn restore_statistics(&mut self, statistics: PumpStatistics) {
        self.statistics = statistics;
    }

    pub fn last_fault(&self) -> Option<FaultKind> {
        self.last_fault
    }

    pub fn auto_retries(&self) -> u32 {
        self.auto_retries
    }

    /// The contactor is closed only while starting and pumping.
    pub fn relay_should_be_on(&self) -> bool {
        self.state().is_running()
    }

    pub fn handle(
        &mut self,
        event: PumpEvent,
        now: Instant,
    ) -> Result<Option<PumpTransition>, PumpTransitionError> {
        debug!("Pump event {:?} in {}", event, self.state().name());

        match event {
            PumpEvent::WellRecovered | PumpEvent::StartRequested => {
                self.apply(PumpState::StartingPump, now).map(Some)
            }
            PumpEvent::StartupComplete => self.apply(PumpState::PumpingWater, now).map(Some),
            PumpEvent::StopRequested => self.apply(PumpState::StoppingPump, now).map(Some),
            PumpEvent::StopComplete => self.apply(PumpState::WellRecovery, now).map(Some),
            PumpEvent::Fault(kind) => self.apply_fault(kind, now),
            PumpEvent::Reading(reading) => self.handle_reading(&reading, now),
            PumpEvent::Reset => {
                let transition = self.machine.reset()?;
                self.auto_retries = 0;
                self.safety.reset();
                self.on_enter(transition, now);
                Ok(Some(transition))
            }
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<PumpTransition> {
        let in_state = elapsed(self.entered_at, now);

        let next = match self.state() {
            PumpState::WellRecovery if in_state >= self.config.recovery_time() => {
                info!("Well recovery period over after {}s", in_state.as_secs());
                Some(PumpState::StartingPump)
            }
            PumpState::StartingPump if self.config.require_readings => {
                if in_state >= self.config.startup_timeout() {
                    warn!("No flow within {}s of starting", in_state.as_secs());
                    return self.apply_fault(FaultKind::StartupTimeout, now).ok().flatten();
                }
                None
            }
            PumpState::StartingPump if in_state >= self.config.startup_time() => {
                Some(PumpState::PumpingWater)
            }
            PumpState::PumpingWater => {
                if in_state >= self.config.max_run_time() {
                    info!("Maximum run time reached, stopping pump");
                    Some(PumpState::StoppingPump)
                } else if self.config.require_readings
                    && self
                        .safety
                        .reading_stale(self.entered_at, now, self.config.reading_timeout())
                {
                    error!("SAFETY: sensor readings stopped while pumping");
                    return self.apply_fault(FaultKind::SensorFault, now).ok().flatten();
                } else {
                    None
                }
            }
            PumpState::StoppingPump if in_state >= self.config.stop_time() => {
                Some(PumpState::WellRecovery)
            }
            state if state.is_error() && in_state >= self.config.error_cooldown() => {
                Some(self.after_cooldown(state))
            }
            _ => None,
        }?;

        match self.apply(next, now) {
            Ok(transition) => Some(transition),
            Err(e) => {
                error!("Timer transition rejected: {}", e);
                None
            }
        }
    }

    fn after_cooldown(&mut self, state: PumpState) -> PumpState {
        let policy = self.config.policy_for(state).unwrap_or(ErrorPolicy::Halt);

        match policy {
            ErrorPolicy::SelfClear if self.auto_retries < self.config.max_auto_retries => {
                self.auto_retries += 1;
                warn!(
                    "{} cleared, retry {}/{}",
                    state.name(),
                    self.auto_retries,
                    self.config.max_auto_retries
                );
                PumpState::WellRecovery
            }
            ErrorPolicy::SelfClear => {
                error!(
                    "{} persisted through {} retries, halting pump",
                    state.name(),
                    self.auto_retries
                );
                PumpState::HaltedPump
            }
            ErrorPolicy::Halt => {
                error!("{} requires operator reset, halting pump", state.name());
                PumpState::HaltedPump
            }
        }
    }

    fn handle_reading(
        &mut self,
        reading: &PumpReading,
        now: Instant,
    ) -> Result<Option<PumpTransition>, PumpTransitionError> {
        let state = self.state();
        if let Some(kind) = self.safety.check(state, reading, &self.config, now) {
            return self.apply_fault(kind, now);
        }

        if state == PumpState::StartingPump
            && self.config.require_readings
            && reading.flow_lpm >= self.config.min_flow_lpm
        {
            info!("Flow established at {:.1}L/min", reading.flow_lpm);
            return self.apply(PumpState::PumpingWater, now).map(Some);
        }

        Ok(None)
    }

    fn apply_fault(
        &mut self,
        kind: FaultKind,
        now: Instant,
    ) -> Result<Option<PumpTransition>, PumpTransitionError> {
        self.statistics.record_fault(kind);
        self.last_fault = Some(kind);

        if !self.machine.can_transition(kind.error_state()) {
            warn!("Fault {:?} ignored in {}", kind, self.state().name());
            return Ok(None);
        }

        let transition = self.machine.enter_fault(kind)?;
        self.on_enter(transition, now);
        Ok(Some(transition))
    }

    fn apply(&mut self, to: PumpState, now: Instant) -> Result<PumpTransition, PumpTransitionError> {
        let transition = self.machine.transition(to).map_err(|e| {
            let TransitionError::InvalidTransition { from, to } = e;
            warn!("Rejected pump request {} -> {}", from.name(), to.name());
            e
        })?;
        self.on_enter(transition, now);
        Ok(transition)
    }

    fn on_enter(&mut self, transition: PumpTransition, now: Instant) {
        self.entered_at = now;

        if transition.to == PumpState::StartingPump {
            self.run_started_at = Some(now);
        }

        if transition.from.is_running() && !transition.to.is_running() {
            if let Some(started) = self.run_started_at.take() {
                self.statistics.total_run_secs += elapsed(started, now).as_secs();
            }
        }

        match (transition.from, transition.to) {
            (PumpState::StoppingPump, PumpState::WellRecovery) => {
                self.statistics.cycles_completed += 1;
                self.auto_retries = 0;
                info!("Pump cycle #{} complete", self.statistics.cycles_completed);
            }
            (_, PumpState::HaltedPump) => {
                self.statistics.halts += 1;
            }
            _ => {}
        }
    }
}
