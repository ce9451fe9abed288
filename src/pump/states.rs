//! Pump lifecycle: recovery -> start -> pump -> stop, with three fault
//! colours and a terminal halt.

use crate::transition::{StateHolder, StateReader, Transition, TransitionError, TransitionTable};
use crate::types::{FaultKind, PumpState};
use log::{error, info};

use PumpState::*;

const ERRORS: &[PumpState] = &[ErrorRed, ErrorPurple, ErrorYellow];
const ERROR_EXITS: &[PumpState] = &[HaltedPump, WellRecovery];

pub static PUMP_TRANSITIONS: TransitionTable<PumpState> = TransitionTable::new(&[
    (WellRecovery, &[StartingPump]),
    (StartingPump, &[PumpingWater, ErrorRed, ErrorPurple, ErrorYellow]),
    (PumpingWater, &[StoppingPump, ErrorRed, ErrorPurple, ErrorYellow]),
    (StoppingPump, &[WellRecovery]),
    (ErrorRed, ERROR_EXITS),
    (ErrorPurple, ERROR_EXITS),
    (ErrorYellow, ERROR_EXITS),
    // HaltedPump: no way out except reset()
]);

pub type PumpTransition = Transition<PumpState>;
pub type PumpTransitionError = TransitionError<PumpState>;

pub struct PumpStateMachine {
    holder: StateHolder<PumpState>,
}

impl PumpStateMachine {
    pub fn new() -> Self {
        Self::with_initial(WellRecovery)
    }

    pub fn with_initial(initial: PumpState) -> Self {
        Self {
            holder: StateHolder::new(initial, &PUMP_TRANSITIONS),
        }
    }

    pub fn state(&self) -> PumpState {
        self.holder.get()
    }

    pub fn reader(&self) -> StateReader<PumpState> {
        self.holder.reader()
    }

    pub fn can_transition(&self, to: PumpState) -> bool {
        self.holder.can_transition(to)
    }

    pub fn transition(&mut self, to: PumpState) -> Result<PumpTransition, PumpTransitionError> {
        self.holder.transition(to)
    }

    pub fn enter_fault(&mut self, kind: FaultKind) -> Result<PumpTransition, PumpTransitionError> {
        let to = kind.error_state();
        let transition = self.holder.transition(to)?;
        error!("Pump fault {:?} in {}", kind, transition.from.name());
        Ok(transition)
    }

    /// Operator intervention: leave HALTED_PUMP or an error state and start
    /// a fresh recovery period.
    pub fn reset(&mut self) -> Result<PumpTransition, PumpTransitionError> {
        let from = self.state();
        if from != HaltedPump && !ERRORS.contains(&from) {
            return Err(TransitionError::InvalidTransition {
                from,
                to: WellRecovery,
            });
        }
        info!("Pump reset requested from {}", from.name());
        Ok(self.holder.force(WellRecovery))
    }

    /// Administrative overwrite, used when restoring persisted state.
    pub fn force(&mut self, to: PumpState) -> PumpTransition {
        self.holder.force(to)
    }
}

impl Default for PumpStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halted_is_terminal() {
        assert!(PUMP_TRANSITIONS.is_terminal(HaltedPump));
        for state in PumpState::ALL {
            assert!(!PUMP_TRANSITIONS.allows(HaltedPump, state));
        }
        // every other state has somewhere to go
        for state in PumpState::ALL.iter().filter(|s| **s != HaltedPump) {
            assert!(!PUMP_TRANSITIONS.is_terminal(*state));
        }
    }

    #[test]
    fn test_read_after_write_for_every_state() {
        let mut machine = PumpStateMachine::new();
        let reader = machine.reader();
        for state in PumpState::ALL {
            machine.force(state);
            assert_eq!(machine.state(), state);
            assert_eq!(reader.get(), state);
        }
    }

    #[test]
    fn test_every_unlisted_transition_is_rejected() {
        for from in PumpState::ALL {
            for to in PumpState::ALL {
                let mut machine = PumpStateMachine::with_initial(from);
                let result = machine.transition(to);
                if PUMP_TRANSITIONS.allows(from, to) {
                    assert_eq!(result, Ok(Transition { from, to }));
                    assert_eq!(machine.state(), to);
                } else {
                    assert_eq!(result, Err(TransitionError::InvalidTransition { from, to }));
                    assert_eq!(machine.state(), from);
                }
            }
        }
    }

    #[test]
    fn test_normal_cycle() {
        let mut machine = PumpStateMachine::new();
        for next in [StartingPump, PumpingWater, StoppingPump, WellRecovery] {
            machine.transition(next).unwrap();
        }
        assert_eq!(machine.state(), WellRecovery);
    }

    #[test]
    fn test_overcurrent_during_startup_is_red() {
        for _ in 0..3 {
            let mut machine = PumpStateMachine::with_initial(StartingPump);
            let t = machine.enter_fault(FaultKind::Overcurrent).unwrap();
            assert_eq!(t.to, ErrorRed);
        }
    }

    #[test]
    fn test_fault_while_recovering_is_rejected() {
        let mut machine = PumpStateMachine::new();
        assert!(machine.enter_fault(FaultKind::DryRun).is_err());
        assert_eq!(machine.state(), WellRecovery);
    }

    #[test]
    fn test_reset_only_from_error_or_halt() {
        let mut machine = PumpStateMachine::with_initial(HaltedPump);
        assert_eq!(machine.reset().unwrap().to, WellRecovery);

        let mut machine = PumpStateMachine::with_initial(ErrorPurple);
        assert!(machine.reset().is_ok());
        assert_eq!(machine.state(), WellRecovery);

        let mut machine = PumpStateMachine::with_initial(PumpingWater);
        assert!(machine.reset().is_err());
        assert_eq!(machine.state(), PumpingWater);
    }
}
