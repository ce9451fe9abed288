//! Centralized configuration management

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use crate::types::PumpState;
use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens once an error state's cooldown expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Go back to WELL_RECOVERY (bounded by `max_auto_retries`).
    SelfClear,
    /// Escalate to HALTED_PUMP.
    Halt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    pub recovery_time_s: u64,
    pub startup_timeout_s: u64,
    /// Used instead of flow detection when `require_readings` is off.
    pub startup_time_s: u64,
    pub max_run_time_s: u64,
    pub stop_time_s: u64,
    pub error_cooldown_s: u64,
    pub max_auto_retries: u32,
    pub overcurrent_amps: f32,
    pub dry_run_amps: f32,
    pub min_flow_lpm: f32,
    pub reading_timeout_s: u64,
    pub debounce_readings: u32,
    pub require_readings: bool,
    pub red_policy: ErrorPolicy,
    pub purple_policy: ErrorPolicy,
    pub yellow_policy: ErrorPolicy,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            recovery_time_s: 1800,
            startup_timeout_s: 10,
            startup_time_s: 5,
            max_run_time_s: 600,
            stop_time_s: 5,
            error_cooldown_s: 300,
            max_auto_retries: 3,
            overcurrent_amps: 12.0,
            dry_run_amps: 1.5,
            min_flow_lpm: 1.0,
            reading_timeout_s: 5,
            debounce_readings: 3,
            require_readings: true,
            red_policy: ErrorPolicy::Halt,
            purple_policy: ErrorPolicy::Halt,
            yellow_policy: ErrorPolicy::SelfClear,
        }
    }
}

impl PumpConfig {
    pub fn recovery_time(&self) -> Duration {
        Duration::from_secs(self.recovery_time_s)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_s)
    }

    pub fn startup_time(&self) -> Duration {
        Duration::from_secs(self.startup_time_s)
    }

    pub fn max_run_time(&self) -> Duration {
        Duration::from_secs(self.max_run_time_s)
    }

    pub fn stop_time(&self) -> Duration {
        Duration::from_secs(self.stop_time_s)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_s)
    }

    pub fn reading_timeout(&self) -> Duration {
        Duration::from_secs(self.reading_timeout_s)
    }

    /// Policy for an error state, `None` for every other state.
    pub fn policy_for(&self, state: PumpState) -> Option<ErrorPolicy> {
        match state {
            PumpState::ErrorRed => Some(self.red_policy),
            PumpState::ErrorPurple => Some(self.purple_policy),
            PumpState::ErrorYellow => Some(self.yellow_policy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointConfig {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
    pub channel: u8,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        let mut ssid = heapless::String::new();
        let _ = ssid.push_str("WellPump");
        let mut password = heapless::String::new();
        let _ = password.push_str("wellpump123");
        Self {
            ssid,
            password,
            channel: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiConfig {
    pub enabled: bool,
    pub credentials: Option<WifiCredentials>,
    pub access_point: AccessPointConfig,
    pub connect_timeout_s: u64,
    pub backoff_base_s: u64,
    pub backoff_max_s: u64,
    pub max_station_attempts: u32,
    pub ap_retry_interval_s: u64,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            credentials: None,
            access_point: AccessPointConfig::default(),
            connect_timeout_s: 15,
            backoff_base_s: 2,
            backoff_max_s: 60,
            max_station_attempts: 5,
            ap_retry_interval_s: 300,
        }
    }
}

impl WifiConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_s)
    }

    pub fn ap_retry_interval(&self) -> Duration {
        Duration::from_secs(self.ap_retry_interval_s)
    }

    /// Delay before station attempt number `attempt` (1-based) is retried:
    /// base * 2^(attempt-1), capped at the configured maximum.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let secs = self
            .backoff_base_s
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_s);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub pump: PumpConfig,
    pub wifi: WifiConfig,
}

impl SystemConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pump = &self.pump;
        let timers = [
            ("recovery_time_s", pump.recovery_time_s),
            ("startup_timeout_s", pump.startup_timeout_s),
            ("startup_time_s", pump.startup_time_s),
            ("max_run_time_s", pump.max_run_time_s),
            ("stop_time_s", pump.stop_time_s),
            ("error_cooldown_s", pump.error_cooldown_s),
            ("reading_timeout_s", pump.reading_timeout_s),
            ("connect_timeout_s", self.wifi.connect_timeout_s),
            ("backoff_base_s", self.wifi.backoff_base_s),
            ("ap_retry_interval_s", self.wifi.ap_retry_interval_s),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroDuration(*name));
        }

        if !(pump.dry_run_amps < pump.overcurrent_amps) {
            return Err(ConfigError::InvalidThreshold(format!(
                "dry run current {:.2}A must be below overcurrent {:.2}A",
                pump.dry_run_amps, pump.overcurrent_amps
            )));
        }
        if !(pump.min_flow_lpm >= 0.0) {
            return Err(ConfigError::InvalidThreshold(format!(
                "minimum flow {:.2}L/min must not be negative",
                pump.min_flow_lpm
            )));
        }
        if pump.debounce_readings == 0 {
            return Err(ConfigError::ZeroLimit("debounce_readings"));
        }
        if self.wifi.max_station_attempts == 0 {
            return Err(ConfigError::ZeroLimit("max_station_attempts"));
        }
        if self.wifi.backoff_base_s > self.wifi.backoff_max_s {
            return Err(ConfigError::InvalidThreshold(format!(
                "backoff base {}s exceeds maximum {}s",
                self.wifi.backoff_base_s, self.wifi.backoff_max_s
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    ZeroDuration(&'static str),
    ZeroLimit(&'static str),
    InvalidThreshold(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroDuration(field) => write!(f, "{} must be greater than zero", field),
            ConfigError::ZeroLimit(field) => write!(f, "{} must be at least 1", field),
            ConfigError::InvalidThreshold(msg) => write!(f, "invalid threshold: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

pub struct ConfigManager {
    config: Mutex<CriticalSectionRawMutex, SystemConfig>,
}

impl ConfigManager {
    pub fn new(config: SystemConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    pub async fn get_config(&self) -> SystemConfig {
        self.config.lock().await.clone()
    }

    /// Apply `update_fn` to a copy and keep it only if it validates.
    pub async fn update_config<F>(&self, update_fn: F) -> Result<SystemConfig, ConfigError>
    where
        F: FnOnce(&mut SystemConfig),
    {
        let mut config = self.config.lock().await;
        let mut updated = config.clone();
        update_fn(&mut updated);
        updated.validate()?;
        *config = updated.clone();
        Ok(updated)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new(SystemConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(SystemConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let wifi = WifiConfig::default();
        assert_eq!(wifi.backoff(1), Duration::from_secs(2));
        assert_eq!(wifi.backoff(2), Duration::from_secs(4));
        assert_eq!(wifi.backoff(3), Duration::from_secs(8));
        assert_eq!(wifi.backoff(6), Duration::from_secs(60));
        assert_eq!(wifi.backoff(200), Duration::from_secs(60));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = SystemConfig::default();
        config.pump.stop_time_s = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroDuration("stop_time_s")));

        let mut config = SystemConfig::default();
        config.pump.dry_run_amps = 20.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(_))));

        let mut config = SystemConfig::default();
        config.wifi.backoff_base_s = 120;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidThreshold(_))));

        let mut config = SystemConfig::default();
        config.wifi.max_station_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroLimit("max_station_attempts")));
    }

    #[test]
    fn test_policy_only_for_error_states() {
        let pump = PumpConfig::default();
        assert_eq!(pump.policy_for(PumpState::ErrorRed), Some(ErrorPolicy::Halt));
        assert_eq!(pump.policy_for(PumpState::ErrorYellow), Some(ErrorPolicy::SelfClear));
        assert_eq!(pump.policy_for(PumpState::HaltedPump), None);
        assert_eq!(pump.policy_for(PumpState::PumpingWater), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SystemConfig =
            serde_json::from_str(r#"{"pump": {"max_run_time_s": 120}}"#).unwrap();
        assert_eq!(config.pump.max_run_time_s, 120);
        assert_eq!(config.pump.recovery_time_s, 1800);
        assert_eq!(config.wifi, WifiConfig::default());
    }

    #[test]
    fn test_update_keeps_old_config_on_error() {
        let manager = ConfigManager::default();
        let result = block_on(manager.update_config(|c| c.pump.max_run_time_s = 0));
        assert!(result.is_err());
        assert_eq!(block_on(manager.get_config()).pump.max_run_time_s, 600);

        let updated = block_on(manager.update_config(|c| c.pump.max_run_time_s = 90)).unwrap();
        assert_eq!(updated.pump.max_run_time_s, 90);
        assert_eq!(block_on(manager.get_config()).pump.max_run_time_s, 90);
    }
}
