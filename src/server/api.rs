//! JSON shapes exchanged with HTTP clients.

use crate::pump::PumpEvent;
use crate::state::SystemStatus;
use crate::system::events::ControlRequest;
use crate::types::{PumpReading, PumpState, PumpStatistics, WifiState};
use crate::wifi::WifiEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HttpCommand {
    Reset,
    StartPump,
    StopPump,
    /// Sample pushed by an external sensor node.
    Reading { current_amps: f32, flow_lpm: f32 },
    ResumeStation,
    AccessPoint,
}

impl From<HttpCommand> for ControlRequest {
    fn from(command: HttpCommand) -> Self {
        match command {
            HttpCommand::Reset => ControlRequest::Pump(PumpEvent::Reset),
            HttpCommand::StartPump => ControlRequest::Pump(PumpEvent::StartRequested),
            HttpCommand::StopPump => ControlRequest::Pump(PumpEvent::StopRequested),
            HttpCommand::Reading {
                current_amps,
                flow_lpm,
            } => ControlRequest::Pump(PumpEvent::Reading(PumpReading {
                current_amps,
                flow_lpm,
            })),
            HttpCommand::ResumeStation => ControlRequest::Wifi(WifiEvent::ResumeStation),
            HttpCommand::AccessPoint => ControlRequest::Wifi(WifiEvent::FallbackToAp),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub pump_state: PumpState,
    pub wifi_state: WifiState,
    pub wifi_status: String,
    pub relay_enabled: bool,
    pub statistics: PumpStatistics,
    pub error: Option<String>,
    pub log: Vec<String>,
}

impl From<&SystemStatus> for StatusResponse {
    fn from(status: &SystemStatus) -> Self {
        Self {
            pump_state: status.pump_state,
            wifi_state: status.wifi_state,
            wifi_status: status.wifi_status.clone(),
            relay_enabled: status.relay_enabled,
            statistics: status.statistics.clone(),
            error: status.last_error.clone(),
            log: status.log_messages.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_parse_from_json() {
        let command: HttpCommand = serde_json::from_str(r#"{"type":"stop_pump"}"#).unwrap();
        assert_eq!(
            ControlRequest::from(command),
            ControlRequest::Pump(PumpEvent::StopRequested)
        );

        let command: HttpCommand =
            serde_json::from_str(r#"{"type":"reading","current_amps":6.5,"flow_lpm":18.0}"#)
                .unwrap();
        assert_eq!(
            ControlRequest::from(command),
            ControlRequest::Pump(PumpEvent::Reading(PumpReading {
                current_amps: 6.5,
                flow_lpm: 18.0,
            }))
        );

        let command: HttpCommand = serde_json::from_str(r#"{"type":"access_point"}"#).unwrap();
        assert_eq!(
            ControlRequest::from(command),
            ControlRequest::Wifi(WifiEvent::FallbackToAp)
        );
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(serde_json::from_str::<HttpCommand>(r#"{"type":"open_valve"}"#).is_err());
        assert!(serde_json::from_str::<HttpCommand>(r#"{"start_pump":true}"#).is_err());
    }

    #[test]
    fn test_status_uses_wire_names() {
        let mut status = SystemStatus::default();
        status.pump_state = PumpState::ErrorYellow;
        status.wifi_state = WifiState::ApMode;
        status.last_error = Some("DryRun fault (ERROR_YELLOW)".to_string());

        let json = serde_json::to_value(StatusResponse::from(&status)).unwrap();
        assert_eq!(json["pump_state"], "ERROR_YELLOW");
        assert_eq!(json["wifi_state"], "WIFI_AP_MODE");
        assert_eq!(json["relay_enabled"], false);
        assert_eq!(json["statistics"]["cycles_completed"], 0);
        assert_eq!(json["error"], "DryRun fault (ERROR_YELLOW)");
    }
}
