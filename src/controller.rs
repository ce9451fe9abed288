use crate::{
    hardware::{
        relay::{RelayController, RelayError},
        StatusIndicator,
    },
    nvs_storage::{BlobStore, Storage},
    pump::{PumpController, PumpEvent, PumpTransition},
    state::{StateManager, SystemStatus},
    system::{
        config::{ConfigError, ConfigManager, ErrorPolicy, SystemConfig},
        events::{ControlRequest, RequestChannel, RequestSender},
    },
    types::{PumpState, CONTROL_TICK_MS},
    wifi::{WifiDriver, WifiEvent, WifiManager},
};
use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::{Duration, Instant, Timer};
use embedded_hal::digital::v2::OutputPin;
use log::{debug, error, info, warn};
use std::fmt::Debug;
use std::sync::Arc;

pub struct WellPumpController<P, D, B>
where
    P: OutputPin,
    D: WifiDriver,
    B: BlobStore,
{
    pump: PumpController,
    wifi: WifiManager<D>,
    relay: RelayController<P>,
    indicators: Vec<Box<dyn StatusIndicator>>,
    state_manager: StateManager,
    config_manager: ConfigManager,
    storage: Storage<B>,
    requests: RequestChannel,
}

impl<P, D, B> WellPumpController<P, D, B>
where
    P: OutputPin,
    P::Error: Debug,
    D: WifiDriver,
    B: BlobStore,
{
    /// Build the controller from persisted state. A pump that was halted
    /// before the reboot stays halted. A pump rebooted during an error
    /// cooldown halts if that error's policy is `Halt` and restarts in
    /// recovery if it self-clears.
    pub async fn new(
        relay_pin: P,
        wifi_driver: D,
        storage: Storage<B>,
        now: Instant,
    ) -> Result<Self, RelayError> {
        let relay = RelayController::new(relay_pin)?;

        let config = storage.get_config().await;
        let restored = storage.restore_pump_state().await;
        let initial = match restored {
            Some(PumpState::HaltedPump) => {
                warn!("Pump was HALTED_PUMP before reboot, operator reset required");
                PumpState::HaltedPump
            }
            Some(state) => match config.pump.policy_for(state) {
                Some(ErrorPolicy::SelfClear) => {
                    warn!("Pump was {} before reboot, restarting in recovery", state.name());
                    PumpState::WellRecovery
                }
                _ => {
                    warn!("Pump was {} before reboot, halting until reset", state.name());
                    PumpState::HaltedPump
                }
            },
            None => PumpState::WellRecovery,
        };
        if restored.is_some_and(|state| state != initial) {
            if let Err(e) = storage.save_pump_state(initial).await {
                warn!("Failed to persist restored pump state: {:?}", e);
            }
        }

        let mut pump = PumpController::new(config.pump.clone(), initial, now);
        pump.restore_statistics(storage.get_statistics().await);
        let wifi = WifiManager::new(wifi_driver, config.wifi.clone(), now);

        Ok(Self {
            pump,
            wifi,
            relay,
            indicators: Vec::new(),
            state_manager: StateManager::new(),
            config_manager: ConfigManager::new(config),
            storage,
            requests: RequestChannel::new(),
        })
    }

    pub fn add_indicator(&mut self, indicator: Box<dyn StatusIndicator>) {
        self.indicators.push(indicator);
    }

    pub fn request_sender(&self) -> RequestSender {
        self.requests.sender()
    }

    pub fn state_handle(&self) -> Arc<Mutex<CriticalSectionRawMutex, SystemStatus>> {
        self.state_manager.get_state_handle()
    }

    pub fn pump_state(&self) -> PumpState {
        self.pump.state()
    }

    pub fn pump(&self) -> &PumpController {
        &self.pump
    }

    pub fn wifi(&self) -> &WifiManager<D> {
        &self.wifi
    }

    pub fn relay_is_on(&self) -> bool {
        self.relay.is_on()
    }

    pub async fn status(&self) -> SystemStatus {
        self.state_manager.get_full_state().await
    }

    pub async fn start(&mut self, now: Instant) {
        info!(
            "Well pump controller starting: pump {}, {} cycles on record",
            self.pump.state().name(),
            self.pump.statistics().cycles_completed
        );
        self.state_manager
            .add_log(format!("Boot in {}", self.pump.state().name()))
            .await;

        if self.config_manager.get_config().await.wifi.enabled {
            if let Err(e) = self.wifi.handle(WifiEvent::Enable, now) {
                error!("Failed to enable WiFi: {}", e);
            }
        } else {
            info!("WiFi disabled in config");
        }

        self.sync(None).await;
    }

    /// Apply one external request. A request the current state does not
    /// accept is logged and reported through `last_error`.
    pub async fn process(&mut self, request: ControlRequest, now: Instant) {
        debug!("Processing request: {:?}", request);

        let pump_transition = match request {
            ControlRequest::Pump(event) => match self.pump.handle(event, now) {
                Ok(transition) => {
                    if event == PumpEvent::Reset {
                        self.state_manager.set_error(None).await;
                    }
                    transition
                }
                Err(e) => {
                    warn!("Pump request {:?} rejected: {}", event, e);
                    self.state_manager.set_error(Some(e.to_string())).await;
                    None
                }
            },
            ControlRequest::Wifi(event) => {
                if let Err(e) = self.wifi.handle(event, now) {
                    warn!("WiFi request {:?} rejected: {}", event, e);
                    self.state_manager.set_error(Some(e.to_string())).await;
                }
                None
            }
        };

        self.sync(pump_transition).await;
    }

    /// Advance both machines' timers.
    pub async fn tick(&mut self, now: Instant) {
        let pump_transition = self.pump.tick(now);
        self.wifi.tick(now);
        self.sync(pump_transition).await;
    }

    /// Validate and apply a config change, then persist it.
    pub async fn update_config<F>(&mut self, update_fn: F) -> Result<SystemConfig, ConfigError>
    where
        F: FnOnce(&mut SystemConfig),
    {
        let config = self.config_manager.update_config(update_fn).await?;
        self.pump.set_config(config.pump.clone());
        self.wifi.set_config(config.wifi.clone());

        if let Err(e) = self.storage.save_config(&config).await {
            error!("Failed to persist config: {:?}", e);
        }
        info!("Configuration updated");
        self.state_manager.add_log("Configuration updated".to_string()).await;
        Ok(config)
    }

    pub fn pending_requests(&self) -> usize {
        self.requests.pending()
    }

    /// Main loop: requests as they arrive, timers once per control tick.
    pub async fn run(&mut self) {
        info!("Starting main control loop");

        let mut next_tick = Instant::now() + Duration::from_millis(CONTROL_TICK_MS);
        loop {
            next_tick = self.run_once(next_tick).await;
        }
    }

    /// Handle one request, or run the timers once `next_tick` is due, and
    /// return the next deadline. A due tick always goes before queued
    /// requests so a busy queue cannot starve the timers.
    pub async fn run_once(&mut self, next_tick: Instant) -> Instant {
        if Instant::now() < next_tick {
            if let Either::First(request) =
                select(self.requests.receive(), Timer::at(next_tick)).await
            {
                self.process(request, Instant::now()).await;
                return next_tick;
            }
        }

        let now = Instant::now();
        self.tick(now).await;

        let period = Duration::from_millis(CONTROL_TICK_MS);
        let next = next_tick + period;
        // Don't try to catch up after a long stall
        if next < now {
            now + period
        } else {
            next
        }
    }

    async fn sync(&mut self, pump_transition: Option<PumpTransition>) {
        self.sync_relay().await;

        let pump_state = self.pump.state();
        self.state_manager.update_pump_state(pump_state).await;
        self.state_manager
            .update_wifi_state(self.wifi.state(), self.wifi.status_label())
            .await;
        self.state_manager.set_relay_enabled(self.relay.is_on()).await;
        self.state_manager
            .update_statistics(self.pump.statistics().clone())
            .await;
        // Unchanged statistics are not rewritten
        if let Err(e) = self.storage.save_statistics(self.pump.statistics()).await {
            error!("Failed to persist pump statistics: {:?}", e);
        }

        if let Some(transition) = pump_transition {
            self.on_pump_transition(transition).await;
        }

        if !self.indicators.is_empty() {
            let status = self.state_manager.get_full_state().await;
            for indicator in self.indicators.iter_mut() {
                indicator.show(&status);
            }
        }
    }

    async fn sync_relay(&mut self) {
        let wanted = self.pump.relay_should_be_on();
        if wanted == self.relay.is_on() {
            return;
        }

        let state = self.pump.state();
        let result = if wanted {
            self.relay.turn_on()
        } else if state.is_error() || state == PumpState::HaltedPump {
            self.relay.turn_off_immediately()
        } else {
            self.relay.turn_off()
        };

        if let Err(e) = result {
            error!("Relay did not follow pump state {}: {}", state.name(), e);
            self.state_manager.set_error(Some(e.to_string())).await;
        }
    }

    async fn on_pump_transition(&mut self, transition: PumpTransition) {
        if transition.to.is_error() {
            let message = match self.pump.last_fault() {
                Some(kind) => format!("{:?} fault ({})", kind, transition.to.name()),
                None => format!("Pump entered {}", transition.to.name()),
            };
            self.state_manager.set_error(Some(message)).await;
        }

        // Error states and the halt latch must survive a reboot
        let latched = |state: PumpState| state.is_error() || state == PumpState::HaltedPump;
        if latched(transition.to) || latched(transition.from) {
            if let Err(e) = self.storage.save_pump_state(transition.to).await {
                error!("Failed to persist pump state: {:?}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{SimPin, SimulatedWifi};
    use crate::nvs_storage::MemoryStore;
    use crate::system::config::WifiCredentials;
    use crate::types::{FaultKind, PumpReading, WifiState};
    use embassy_futures::block_on;
    use std::sync::Mutex as StdMutex;

    type TestController = WellPumpController<SimPin, SimulatedWifi, MemoryStore>;

    fn at(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    fn build(store: MemoryStore, wifi: SimulatedWifi) -> (TestController, SimPin) {
        let pin = SimPin::new("relay");
        let controller = block_on(WellPumpController::new(
            pin.clone(),
            wifi,
            Storage::new(store),
            at(0),
        ))
        .unwrap();
        (controller, pin)
    }

    fn reading(current_amps: f32, flow_lpm: f32) -> ControlRequest {
        ControlRequest::Pump(PumpEvent::Reading(PumpReading {
            current_amps,
            flow_lpm,
        }))
    }

    struct Recorder(Arc<StdMutex<Vec<PumpState>>>);

    impl StatusIndicator for Recorder {
        fn show(&mut self, status: &SystemStatus) {
            self.0.lock().unwrap().push(status.pump_state);
        }
    }

    #[test]
    fn test_full_cycle_drives_relay_and_persists() {
        let store = MemoryStore::new();
        let (mut controller, relay) = build(store.clone(), SimulatedWifi::new());

        block_on(async {
            controller.start(at(0)).await;
            controller
                .process(ControlRequest::Pump(PumpEvent::StartRequested), at(1))
                .await;
            assert_eq!(controller.pump_state(), PumpState::StartingPump);
            assert!(relay.is_high());

            controller.process(reading(6.0, 20.0), at(3)).await;
            assert_eq!(controller.pump_state(), PumpState::PumpingWater);

            controller
                .process(ControlRequest::Pump(PumpEvent::StopRequested), at(30))
                .await;
            assert_eq!(controller.pump_state(), PumpState::StoppingPump);
            assert!(!relay.is_high());

            controller.tick(at(36)).await;
            assert_eq!(controller.pump_state(), PumpState::WellRecovery);

            let status = controller.status().await;
            assert_eq!(status.statistics.cycles_completed, 1);
            assert!(!status.relay_enabled);
        });

        let reloaded = Storage::new(store);
        let stats = block_on(reloaded.get_statistics());
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.total_run_secs, 29);
    }

    #[test]
    fn test_rejected_request_is_reported() {
        let (mut controller, _relay) = build(MemoryStore::new(), SimulatedWifi::new());

        block_on(async {
            controller
                .process(ControlRequest::Pump(PumpEvent::StopRequested), at(1))
                .await;
            let status = controller.status().await;
            assert_eq!(status.pump_state, PumpState::WellRecovery);
            let error = status.last_error.unwrap();
            assert!(error.contains("WELL_RECOVERY -> STOPPING_PUMP"), "{}", error);
        });
    }

    #[test]
    fn test_overcurrent_halts_and_survives_reboot() {
        let store = MemoryStore::new();
        let (mut controller, relay) = build(store.clone(), SimulatedWifi::new());

        block_on(async {
            controller
                .process(ControlRequest::Pump(PumpEvent::StartRequested), at(1))
                .await;
            controller.process(reading(6.0, 20.0), at(2)).await;
            controller.process(reading(15.0, 20.0), at(4)).await;

            assert_eq!(controller.pump_state(), PumpState::ErrorRed);
            assert!(!relay.is_high());
            let status = controller.status().await;
            assert!(status.last_error.unwrap().starts_with("Overcurrent"));

            // default cooldown is 300s and red faults halt
            controller.tick(at(305)).await;
            assert_eq!(controller.pump_state(), PumpState::HaltedPump);
        });

        let (mut rebooted, relay) = build(store.clone(), SimulatedWifi::new());
        assert_eq!(rebooted.pump_state(), PumpState::HaltedPump);
        assert_eq!(rebooted.pump().statistics().faults_overcurrent, 1);
        assert_eq!(rebooted.pump().statistics().halts, 1);

        block_on(async {
            rebooted.start(at(0)).await;
            rebooted.tick(at(10_000)).await;
            assert_eq!(rebooted.pump_state(), PumpState::HaltedPump);
            assert!(!relay.is_high());

            rebooted
                .process(ControlRequest::Pump(PumpEvent::Reset), at(10_001))
                .await;
            assert_eq!(rebooted.pump_state(), PumpState::WellRecovery);
            assert_eq!(rebooted.status().await.last_error, None);
        });

        let (after_reset, _relay) = build(store, SimulatedWifi::new());
        assert_eq!(after_reset.pump_state(), PumpState::WellRecovery);
    }

    #[test]
    fn test_fault_in_recovery_is_counted_only() {
        let (mut controller, _relay) = build(MemoryStore::new(), SimulatedWifi::new());
        block_on(controller.process(
            ControlRequest::Pump(PumpEvent::Fault(FaultKind::Overcurrent)),
            at(1),
        ));
        assert_eq!(controller.pump_state(), PumpState::WellRecovery);
        assert_eq!(controller.pump().statistics().faults_overcurrent, 1);
    }

    #[test]
    fn test_reboot_during_cooldown_follows_error_policy() {
        let store = MemoryStore::new();
        let (mut controller, _relay) = build(store.clone(), SimulatedWifi::new());
        block_on(async {
            controller
                .process(ControlRequest::Pump(PumpEvent::StartRequested), at(1))
                .await;
            controller.process(reading(6.0, 20.0), at(2)).await;
            controller
                .process(ControlRequest::Pump(PumpEvent::Fault(FaultKind::Overcurrent)), at(3))
                .await;
        });
        assert_eq!(controller.pump_state(), PumpState::ErrorRed);

        // Power lost mid-cooldown: red halts
        let (rebooted, relay) = build(store.clone(), SimulatedWifi::new());
        assert_eq!(rebooted.pump_state(), PumpState::HaltedPump);
        assert!(!relay.is_high());
        let (rebooted, _relay) = build(store, SimulatedWifi::new());
        assert_eq!(rebooted.pump_state(), PumpState::HaltedPump);

        let store = MemoryStore::new();
        let (mut controller, _relay) = build(store.clone(), SimulatedWifi::new());
        block_on(async {
            controller
                .process(ControlRequest::Pump(PumpEvent::StartRequested), at(1))
                .await;
            controller.process(reading(6.0, 20.0), at(2)).await;
            controller
                .process(ControlRequest::Pump(PumpEvent::Fault(FaultKind::DryRun)), at(3))
                .await;
        });
        assert_eq!(controller.pump_state(), PumpState::ErrorYellow);

        // Yellow self-clears, so it restarts in recovery
        let (rebooted, _relay) = build(store.clone(), SimulatedWifi::new());
        assert_eq!(rebooted.pump_state(), PumpState::WellRecovery);
        assert_eq!(block_on(Storage::new(store).restore_pump_state()), None);
    }

    #[test]
    fn test_fault_counted_in_recovery_survives_reboot() {
        let store = MemoryStore::new();
        let (mut controller, _relay) = build(store.clone(), SimulatedWifi::new());
        block_on(controller.process(
            ControlRequest::Pump(PumpEvent::Fault(FaultKind::Overcurrent)),
            at(1),
        ));
        assert_eq!(controller.pump_state(), PumpState::WellRecovery);

        let (rebooted, _relay) = build(store, SimulatedWifi::new());
        assert_eq!(rebooted.pump().statistics().faults_overcurrent, 1);
        assert_eq!(rebooted.pump_state(), PumpState::WellRecovery);
    }

    #[test]
    fn test_due_tick_runs_before_queued_requests() {
        let (mut controller, _relay) = build(MemoryStore::new(), SimulatedWifi::new());
        let sender = controller.request_sender();
        sender.try_request(PumpEvent::StartRequested).unwrap();
        sender.try_request(PumpEvent::StopRequested).unwrap();

        let due = Instant::now();
        let next = block_on(controller.run_once(due));
        assert!(next > due);
        assert_eq!(controller.pending_requests(), 2);
        assert_eq!(controller.pump_state(), PumpState::WellRecovery);

        let far = Instant::now() + Duration::from_secs(3600);
        assert_eq!(block_on(controller.run_once(far)), far);
        assert_eq!(controller.pending_requests(), 1);
        assert_eq!(controller.pump_state(), PumpState::StartingPump);
    }

    #[test]
    fn test_start_without_credentials_opens_access_point() {
        let wifi = SimulatedWifi::new();
        let (mut controller, _relay) = build(MemoryStore::new(), wifi.clone());

        block_on(controller.start(at(0)));
        assert_eq!(controller.wifi().state(), WifiState::ApMode);
        assert_eq!(wifi.ap_starts(), 1);
        assert_eq!(block_on(controller.status()).wifi_state, WifiState::ApMode);
    }

    #[test]
    fn test_configured_station_connects_on_tick() {
        let wifi = SimulatedWifi::associating();
        let (mut controller, _relay) = build(MemoryStore::new(), wifi.clone());

        block_on(async {
            controller
                .update_config(|config| {
                    let mut ssid = heapless::String::new();
                    let _ = ssid.push_str("farmhouse");
                    let mut password = heapless::String::new();
                    let _ = password.push_str("hunter22");
                    config.wifi.credentials = Some(WifiCredentials { ssid, password });
                })
                .await
                .unwrap();
            controller.start(at(0)).await;
            assert_eq!(controller.wifi().state(), WifiState::StaConnecting);

            controller.tick(at(1)).await;
            let status = controller.status().await;
            assert_eq!(status.wifi_state, WifiState::StaConnected);
            assert_eq!(status.wifi_status, "Connected to farmhouse");
        });
        assert_eq!(wifi.connect_calls(), 1);
    }

    #[test]
    fn test_invalid_config_is_not_applied() {
        let (mut controller, _relay) = build(MemoryStore::new(), SimulatedWifi::new());
        let result = block_on(controller.update_config(|config| config.pump.stop_time_s = 0));
        assert_eq!(result, Err(ConfigError::ZeroDuration("stop_time_s")));
        assert_eq!(controller.pump().config().stop_time_s, 5);
    }

    #[test]
    fn test_indicators_see_every_update() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let (mut controller, _relay) = build(MemoryStore::new(), SimulatedWifi::new());
        controller.add_indicator(Box::new(Recorder(Arc::clone(&seen))));

        block_on(async {
            controller.start(at(0)).await;
            controller
                .process(ControlRequest::Pump(PumpEvent::StartRequested), at(1))
                .await;
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![PumpState::WellRecovery, PumpState::StartingPump]
        );
    }
}
