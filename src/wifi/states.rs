use crate::transition::{StateHolder, StateReader, Transition, TransitionError, TransitionTable};
use crate::types::WifiState;

use WifiState::*;

// Nothing leads back to Disabled once the radio has been brought up.
pub static WIFI_TRANSITIONS: TransitionTable<WifiState> = TransitionTable::new(&[
    (Disabled, &[StaConnecting, ApMode]),
    (StaConnecting, &[StaConnected, StaReconnect, ApMode]),
    (StaConnected, &[StaReconnect, ApMode]),
    (StaReconnect, &[StaConnecting, ApMode]),
    (ApMode, &[StaConnecting]),
]);

pub type WifiTransition = Transition<WifiState>;
pub type WifiTransitionError = TransitionError<WifiState>;

pub struct WifiStateMachine {
    holder: StateHolder<WifiState>,
}

impl WifiStateMachine {
    pub fn new() -> Self {
        Self {
            holder: StateHolder::new(Disabled, &WIFI_TRANSITIONS),
        }
    }

    pub fn state(&self) -> WifiState {
        self.holder.get()
    }

    pub fn reader(&self) -> StateReader<WifiState> {
        self.holder.reader()
    }

    pub fn can_transition(&self, to: WifiState) -> bool {
        self.holder.can_transition(to)
    }

    pub fn transition(&mut self, to: WifiState) -> Result<WifiTransition, WifiTransitionError> {
        self.holder.transition(to)
    }

    pub fn force(&mut self, to: WifiState) -> WifiTransition {
        self.holder.force(to)
    }
}

impl Default for WifiStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_after_write_for_every_state() {
        let mut machine = WifiStateMachine::new();
        let reader = machine.reader();
        for state in WifiState::ALL {
            machine.force(state);
            assert_eq!(machine.state(), state);
            assert_eq!(reader.get(), state);
        }
    }

    #[test]
    fn test_every_unlisted_transition_is_rejected() {
        for from in WifiState::ALL {
            for to in WifiState::ALL {
                let mut machine = WifiStateMachine::new();
                machine.force(from);
                match machine.transition(to) {
                    Ok(t) => {
                        assert!(WIFI_TRANSITIONS.allows(from, to));
                        assert_eq!(t, Transition { from, to });
                        assert_eq!(machine.state(), to);
                    }
                    Err(e) => {
                        assert!(!WIFI_TRANSITIONS.allows(from, to));
                        assert_eq!(e, TransitionError::InvalidTransition { from, to });
                        assert_eq!(machine.state(), from);
                    }
                }
            }
        }
    }

    #[test]
    fn test_disabled_is_never_a_target() {
        for from in WifiState::ALL {
            assert!(!WIFI_TRANSITIONS.allows(from, Disabled));
        }
    }

    #[test]
    fn test_any_state_can_fall_back_to_ap() {
        for from in WifiState::ALL.iter().filter(|s| **s != ApMode) {
            assert!(WIFI_TRANSITIONS.allows(*from, ApMode));
        }
        assert!(!WIFI_TRANSITIONS.allows(ApMode, ApMode));
    }

    #[test]
    fn test_link_loss_goes_to_reconnect() {
        let mut machine = WifiStateMachine::new();
        machine.transition(StaConnecting).unwrap();
        machine.transition(StaConnected).unwrap();
        assert_eq!(machine.transition(StaReconnect).unwrap().to, StaReconnect);
        assert!(machine.transition(Disabled).is_err());
    }
}
