use crate::types::{PumpState, PumpStatistics, WifiState, EVENT_LOG_SIZE};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use log::{debug, info};
use std::sync::Arc;

/// Snapshot of everything the outside world gets to see.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub pump_state: PumpState,
    pub wifi_state: WifiState,
    pub wifi_status: String,
    pub relay_enabled: bool,
    pub statistics: PumpStatistics,
    pub last_error: Option<String>,
    pub log_messages: heapless::Vec<String, EVENT_LOG_SIZE>,
    log_counter: u32,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            pump_state: PumpState::WellRecovery,
            wifi_state: WifiState::Disabled,
            wifi_status: "Disabled".to_string(),
            relay_enabled: false,
            statistics: PumpStatistics::default(),
            last_error: None,
            log_messages: heapless::Vec::new(),
            log_counter: 0,
        }
    }
}

impl SystemStatus {
    fn push_log(&mut self, message: String) {
        self.log_counter = self.log_counter.wrapping_add(1);
        let entry = format!("[{}] {}", self.log_counter, message);

        if self.log_messages.is_full() {
            self.log_messages.remove(0);
        }
        let _ = self.log_messages.push(entry);
    }
}

pub struct StateManager {
    state: Arc<Mutex<CriticalSectionRawMutex, SystemStatus>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SystemStatus::default())),
        }
    }

    pub fn get_state_handle(&self) -> Arc<Mutex<CriticalSectionRawMutex, SystemStatus>> {
        Arc::clone(&self.state)
    }

    pub async fn update_pump_state(&self, pump_state: PumpState) {
        let mut state = self.state.lock().await;
        if state.pump_state != pump_state {
            info!(
                "Pump state changed: {} -> {}",
                state.pump_state.name(),
                pump_state.name()
            );
            let message = format!("Pump: {} -> {}", state.pump_state.name(), pump_state.name());
            state.pump_state = pump_state;
            state.push_log(message);
        }
    }

    pub async fn update_wifi_state(&self, wifi_state: WifiState, status: String) {
        let mut state = self.state.lock().await;
        if state.wifi_state != wifi_state {
            let message = format!("WiFi: {} -> {}", state.wifi_state.name(), wifi_state.name());
            state.wifi_state = wifi_state;
            state.push_log(message);
        }
        state.wifi_status = status;
    }

    pub async fn set_relay_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        if state.relay_enabled != enabled {
            debug!("Relay state changed: {}", if enabled { "ON" } else { "OFF" });
            state.relay_enabled = enabled;
            state.push_log(format!("Relay: {}", if enabled { "ON" } else { "OFF" }));
        }
    }

    pub async fn update_statistics(&self, statistics: PumpStatistics) {
        self.state.lock().await.statistics = statistics;
    }

    pub async fn set_error(&self, error: Option<String>) {
        let mut state = self.state.lock().await;
        state.last_error = error.clone();
        if let Some(err) = error {
            state.push_log(format!("ERROR: {}", err));
        }
    }

    pub async fn add_log(&self, message: String) {
        self.state.lock().await.push_log(message);
    }

    pub async fn get_full_state(&self) -> SystemStatus {
        self.state.lock().await.clone()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}
