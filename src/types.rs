use serde::{Deserialize, Serialize};

/// Operating mode of the well pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum PumpState {
    WellRecovery = 0,
    StartingPump = 1,
    PumpingWater = 2,
    StoppingPump = 3,
    ErrorRed = 4,
    ErrorPurple = 5,
    ErrorYellow = 6,
    HaltedPump = 7,
}

impl PumpState {
    pub const ALL: [PumpState; 8] = [
        PumpState::WellRecovery,
        PumpState::StartingPump,
        PumpState::PumpingWater,
        PumpState::StoppingPump,
        PumpState::ErrorRed,
        PumpState::ErrorPurple,
        PumpState::ErrorYellow,
        PumpState::HaltedPump,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PumpState::WellRecovery => "WELL_RECOVERY",
            PumpState::StartingPump => "STARTING_PUMP",
            PumpState::PumpingWater => "PUMPING_WATER",
            PumpState::StoppingPump => "STOPPING_PUMP",
            PumpState::ErrorRed => "ERROR_RED",
            PumpState::ErrorPurple => "ERROR_PURPLE",
            PumpState::ErrorYellow => "ERROR_YELLOW",
            PumpState::HaltedPump => "HALTED_PUMP",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            PumpState::ErrorRed | PumpState::ErrorPurple | PumpState::ErrorYellow
        )
    }

    /// States in which the motor is energised.
    pub fn is_running(&self) -> bool {
        matches!(self, PumpState::StartingPump | PumpState::PumpingWater)
    }
}

/// Network association mode of the WiFi radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WifiState {
    #[serde(rename = "WIFI_DISABLED")]
    Disabled = 0,
    #[serde(rename = "WIFI_STA_CONNECTING")]
    StaConnecting = 1,
    #[serde(rename = "WIFI_STA_CONNECTED")]
    StaConnected = 2,
    #[serde(rename = "WIFI_STA_RECONNECT")]
    StaReconnect = 3,
    #[serde(rename = "WIFI_AP_MODE")]
    ApMode = 4,
}

impl WifiState {
    pub const ALL: [WifiState; 5] = [
        WifiState::Disabled,
        WifiState::StaConnecting,
        WifiState::StaConnected,
        WifiState::StaReconnect,
        WifiState::ApMode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WifiState::Disabled => "WIFI_DISABLED",
            WifiState::StaConnecting => "WIFI_STA_CONNECTING",
            WifiState::StaConnected => "WIFI_STA_CONNECTED",
            WifiState::StaReconnect => "WIFI_STA_RECONNECT",
            WifiState::ApMode => "WIFI_AP_MODE",
        }
    }
}

/// Fault categories raised by the safety monitor or the pump timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    Overcurrent,
    DryRun,
    StartupTimeout,
    SensorFault,
}

impl FaultKind {
    /// Fixed fault -> error state mapping.
    pub fn error_state(&self) -> PumpState {
        match self {
            FaultKind::Overcurrent => PumpState::ErrorRed,
            FaultKind::SensorFault => PumpState::ErrorPurple,
            FaultKind::DryRun | FaultKind::StartupTimeout => PumpState::ErrorYellow,
        }
    }
}

/// One decoded sample from the pump's current and flow sensors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpReading {
    pub current_amps: f32,
    pub flow_lpm: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpStatistics {
    pub cycles_completed: u32,
    pub total_run_secs: u64,
    pub faults_overcurrent: u32,
    pub faults_dry_run: u32,
    pub faults_startup_timeout: u32,
    pub faults_sensor: u32,
    pub halts: u32,
}

impl PumpStatistics {
    pub fn record_fault(&mut self, kind: FaultKind) {
        match kind {
            FaultKind::Overcurrent => self.faults_overcurrent += 1,
            FaultKind::DryRun => self.faults_dry_run += 1,
            FaultKind::StartupTimeout => self.faults_startup_timeout += 1,
            FaultKind::SensorFault => self.faults_sensor += 1,
        }
    }

    pub fn total_faults(&self) -> u32 {
        self.faults_overcurrent + self.faults_dry_run + self.faults_startup_timeout + self.faults_sensor
    }
}

pub const EVENT_LOG_SIZE: usize = 50;
pub const CONTROL_TICK_MS: u64 = 1000;
pub const REQUEST_QUEUE_SIZE: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_mapping_is_fixed() {
        assert_eq!(FaultKind::Overcurrent.error_state(), PumpState::ErrorRed);
        assert_eq!(FaultKind::SensorFault.error_state(), PumpState::ErrorPurple);
        assert_eq!(FaultKind::DryRun.error_state(), PumpState::ErrorYellow);
        assert_eq!(FaultKind::StartupTimeout.error_state(), PumpState::ErrorYellow);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&PumpState::HaltedPump).unwrap(),
            "\"HALTED_PUMP\""
        );
        assert_eq!(
            serde_json::to_string(&WifiState::StaReconnect).unwrap(),
            "\"WIFI_STA_RECONNECT\""
        );
        for state in PumpState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.name()));
        }
    }

    #[test]
    fn test_error_and_running_flags() {
        let errors: Vec<_> = PumpState::ALL.iter().filter(|s| s.is_error()).collect();
        assert_eq!(errors.len(), 3);
        assert!(PumpState::StartingPump.is_running());
        assert!(PumpState::PumpingWater.is_running());
        assert!(!PumpState::StoppingPump.is_running());
    }
}
