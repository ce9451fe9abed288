//! WiFi management: station connection with retry/backoff, falling back to
//! access-point mode when the configured network stays unreachable.

use crate::safety::elapsed;
use crate::system::config::{AccessPointConfig, WifiConfig, WifiCredentials};
use crate::transition::StateReader;
use crate::types::WifiState;
use crate::wifi::states::{WifiStateMachine, WifiTransition, WifiTransitionError};
use embassy_time::Instant;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Radio operations the manager needs from the platform.
pub trait WifiDriver {
    /// Begin associating with `credentials`. Returns once the attempt is
    /// under way; success is observed through `is_connected`.
    fn connect_station(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError>;
    fn is_connected(&self) -> bool;
    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError>;
    fn disconnect(&mut self) -> Result<(), WifiError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum WifiError {
    Driver(String),
    NotConfigured,
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WifiError::Driver(msg) => write!(f, "WiFi driver error: {}", msg),
            WifiError::NotConfigured => write!(f, "no WiFi credentials configured"),
        }
    }
}

impl std::error::Error for WifiError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiEvent {
    Enable,
    Associated,
    AssociationFailed,
    LinkLost,
    /// Operator asks to leave AP mode and try the configured network again.
    ResumeStation,
    /// Operator asks for the local access point.
    FallbackToAp,
}

pub struct WifiManager<D: WifiDriver> {
    machine: WifiStateMachine,
    driver: D,
    config: WifiConfig,
    attempts: u32,
    entered_at: Instant,
}

impl<D: WifiDriver> WifiManager<D> {
    pub fn new(driver: D, config: WifiConfig, now: Instant) -> Self {
        Self {
            machine: WifiStateMachine::new(),
            driver,
            config,
            attempts: 0,
            entered_at: now,
        }
    }

    pub fn state(&self) -> WifiState {
        self.machine.state()
    }

    pub fn reader(&self) -> StateReader<WifiState> {
        self.machine.reader()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn set_config(&mut self, config: WifiConfig) {
        self.config = config;
    }

    pub fn handle(
        &mut self,
        event: WifiEvent,
        now: Instant,
    ) -> Result<Option<WifiTransition>, WifiTransitionError> {
        debug!("WiFi event {:?} in {}", event, self.state().name());

        match event {
            WifiEvent::Enable => {
                if self.state() != WifiState::Disabled {
                    return Err(WifiTransitionError::InvalidTransition {
                        from: self.state(),
                        to: WifiState::StaConnecting,
                    });
                }
                if self.config.credentials.is_none() {
                    info!("No station credentials stored, starting access point");
                    return self.enter_access_point(now).map(Some);
                }
                self.attempts = 0;
                self.start_station(now).map(Some)
            }
            WifiEvent::Associated => {
                let transition = self.apply(WifiState::StaConnected, now)?;
                self.attempts = 0;
                Ok(Some(transition))
            }
            WifiEvent::AssociationFailed => self.fail_attempt(now).map(Some),
            WifiEvent::LinkLost => self.apply(WifiState::StaReconnect, now).map(Some),
            WifiEvent::ResumeStation => {
                if self.state() != WifiState::ApMode {
                    return Err(WifiTransitionError::InvalidTransition {
                        from: self.state(),
                        to: WifiState::StaConnecting,
                    });
                }
                self.attempts = 0;
                self.start_station(now).map(Some)
            }
            WifiEvent::FallbackToAp => self.enter_access_point(now).map(Some),
        }
    }

    pub fn tick(&mut self, now: Instant) -> Option<WifiTransition> {
        let in_state = elapsed(self.entered_at, now);

        let result = match self.state() {
            WifiState::Disabled => return None,
            WifiState::StaConnecting => {
                if self.driver.is_connected() {
                    self.handle(WifiEvent::Associated, now)
                } else if in_state >= self.config.connect_timeout() {
                    warn!(
                        "WiFi association timed out after {}s (attempt {})",
                        in_state.as_secs(),
                        self.attempts
                    );
                    self.fail_attempt(now).map(Some)
                } else {
                    return None;
                }
            }
            WifiState::StaConnected => {
                if self.driver.is_connected() {
                    return None;
                }
                warn!("WiFi link lost");
                self.handle(WifiEvent::LinkLost, now)
            }
            WifiState::StaReconnect => {
                if self.attempts >= self.config.max_station_attempts {
                    warn!(
                        "WiFi station failed {} times, falling back to access point",
                        self.attempts
                    );
                    self.enter_access_point(now).map(Some)
                } else if in_state >= self.config.backoff(self.attempts.max(1)) {
                    info!(
                        "WiFi reconnect attempt {}/{}",
                        self.attempts + 1,
                        self.config.max_station_attempts
                    );
                    self.start_station(now).map(Some)
                } else {
                    return None;
                }
            }
            WifiState::ApMode => {
                if self.config.credentials.is_none() || in_state < self.config.ap_retry_interval() {
                    return None;
                }
                info!("Access point retry interval elapsed, trying station again");
                self.attempts = 0;
                self.start_station(now).map(Some)
            }
        };

        match result {
            Ok(transition) => transition,
            Err(e) => {
                error!("WiFi timer transition rejected: {}", e);
                None
            }
        }
    }

    pub fn status_label(&self) -> String {
        match self.state() {
            WifiState::Disabled => "Disabled".to_string(),
            WifiState::StaConnecting => match &self.config.credentials {
                Some(c) => format!("Connecting to {}", c.ssid),
                None => "Connecting".to_string(),
            },
            WifiState::StaConnected => match &self.config.credentials {
                Some(c) => format!("Connected to {}", c.ssid),
                None => "Connected".to_string(),
            },
            WifiState::StaReconnect => format!("Reconnecting (attempt {})", self.attempts),
            WifiState::ApMode => format!("Access point {}", self.config.access_point.ssid),
        }
    }

    /// Move to STA_CONNECTING and kick off an association attempt. A driver
    /// error counts as a failed attempt.
    fn start_station(&mut self, now: Instant) -> Result<WifiTransition, WifiTransitionError> {
        let transition = self.apply(WifiState::StaConnecting, now)?;
        self.attempts += 1;

        let result = match &self.config.credentials {
            Some(credentials) => self.driver.connect_station(credentials),
            None => Err(WifiError::NotConfigured),
        };
        if let Err(e) = result {
            error!("WiFi connect failed to start: {}", e);
            return self.apply(WifiState::StaReconnect, now);
        }
        Ok(transition)
    }

    fn fail_attempt(&mut self, now: Instant) -> Result<WifiTransition, WifiTransitionError> {
        let transition = self.apply(WifiState::StaReconnect, now)?;
        if let Err(e) = self.driver.disconnect() {
            warn!("WiFi disconnect after failed attempt: {}", e);
        }
        Ok(transition)
    }

    fn enter_access_point(&mut self, now: Instant) -> Result<WifiTransition, WifiTransitionError> {
        let transition = self.apply(WifiState::ApMode, now)?;
        if let Err(e) = self.driver.start_access_point(&self.config.access_point) {
            error!("Failed to start access point: {}", e);
        } else {
            info!("Access point '{}' up", self.config.access_point.ssid);
        }
        Ok(transition)
    }

    fn apply(&mut self, to: WifiState, now: Instant) -> Result<WifiTransition, WifiTransitionError> {
        let transition = self.machine.transition(to)?;
        self.entered_at = now;
        Ok(transition)
    }
}
