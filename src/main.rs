use embassy_executor::Spawner;
use log::{error, info};

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    #[cfg(target_os = "espidf")]
    {
        // It is necessary to call this function once. Otherwise some patches to the runtime
        // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
        esp_idf_svc::sys::link_patches();

        // Bind the log crate to the ESP Logging facilities
        esp_idf_svc::log::EspLogger::initialize_default();
    }

    #[cfg(not(target_os = "espidf"))]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting well pump controller");

    #[cfg(target_os = "espidf")]
    let result = firmware::run().await;
    #[cfg(not(target_os = "espidf"))]
    let result = simulator::run().await;

    if let Err(e) = result {
        error!("Controller stopped: {:?}", e);
    }
}

#[cfg(target_os = "espidf")]
mod firmware {
    use embassy_time::Instant;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::gpio::PinDriver;
    use esp_idf_svc::hal::prelude::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{info, warn};
    use wellpump_rs::controller::WellPumpController;
    use wellpump_rs::hardware::display::create_display_controller;
    use wellpump_rs::hardware::status_led::StatusLed;
    use wellpump_rs::nvs_storage::{EspNvsStore, Storage};
    use wellpump_rs::server::http::HttpServer;
    use wellpump_rs::wifi::EspWifiDriver;

    pub async fn run() -> anyhow::Result<()> {
        let peripherals = Peripherals::take()?;
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let storage = Storage::new(EspNvsStore::new(nvs.clone())?);
        let wifi = EspWifiDriver::new(peripherals.modem, sys_loop, nvs)?;

        let relay_pin = PinDriver::output(peripherals.pins.gpio19)?;
        let mut controller =
            WellPumpController::new(relay_pin, wifi, storage, Instant::now()).await?;

        let led = StatusLed::new(
            PinDriver::output(peripherals.pins.gpio25)?,
            PinDriver::output(peripherals.pins.gpio26)?,
            PinDriver::output(peripherals.pins.gpio27)?,
        );
        controller.add_indicator(Box::new(led));

        match create_display_controller(
            peripherals.i2c0,
            peripherals.pins.gpio21,
            peripherals.pins.gpio22,
        ) {
            Ok(mut display) => {
                if let Err(e) = display.show_boot_screen() {
                    warn!("Boot screen failed: {}", e);
                }
                controller.add_indicator(Box::new(display));
            }
            Err(e) => warn!("Display unavailable, continuing without it: {}", e),
        }

        let _server =
            HttpServer::new(controller.state_handle(), controller.request_sender()).start()?;

        controller.start(Instant::now()).await;
        info!("Controller running");
        controller.run().await;

        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
mod simulator {
    use embassy_futures::join::join;
    use embassy_time::{Duration, Instant, Timer};
    use log::{info, warn};
    use wellpump_rs::controller::WellPumpController;
    use wellpump_rs::hardware::sim::{SimPin, SimulatedWifi};
    use wellpump_rs::hardware::status_led::StatusLed;
    use wellpump_rs::nvs_storage::{MemoryStore, Storage};
    use wellpump_rs::pump::PumpEvent;
    use wellpump_rs::system::config::WifiCredentials;
    use wellpump_rs::system::events::RequestSender;
    use wellpump_rs::types::PumpReading;

    const SAMPLE_PERIOD_MS: u64 = 500;

    pub async fn run() -> anyhow::Result<()> {
        info!("No ESP32 target, running against simulated hardware");

        let relay_pin = SimPin::new("relay");
        let storage = Storage::new(MemoryStore::new());
        let mut controller = WellPumpController::new(
            relay_pin.clone(),
            SimulatedWifi::associating(),
            storage,
            Instant::now(),
        )
        .await?;

        // Compressed timings so a full cycle fits in a minute
        controller
            .update_config(|config| {
                config.pump.recovery_time_s = 20;
                config.pump.max_run_time_s = 30;
                config.pump.error_cooldown_s = 15;

                let mut ssid = heapless::String::new();
                let _ = ssid.push_str("SimulatedNet");
                config.wifi.credentials = Some(WifiCredentials {
                    ssid,
                    password: heapless::String::new(),
                });
            })
            .await?;

        controller.add_indicator(Box::new(StatusLed::new(
            SimPin::new("led_red"),
            SimPin::new("led_green"),
            SimPin::new("led_blue"),
        )));

        let sender = controller.request_sender();
        controller.start(Instant::now()).await;

        join(controller.run(), simulated_well(relay_pin, sender)).await;
        Ok(())
    }

    /// A well that drains while the pump runs and refills while it rests.
    /// Running it dry produces the low-current, low-flow readings of a dry
    /// run.
    async fn simulated_well(relay: SimPin, sender: RequestSender) {
        let mut level: f32 = 100.0;
        let mut was_dry = false;

        loop {
            Timer::after(Duration::from_millis(SAMPLE_PERIOD_MS)).await;

            if !relay.is_high() {
                level = (level + 0.5).min(100.0);
                continue;
            }

            level = (level - 1.5).max(0.0);
            let dry = level < 10.0;
            if dry && !was_dry {
                warn!("[sim] well level {:.0}%, pump drawing air", level);
            }
            was_dry = dry;

            let reading = if dry {
                PumpReading {
                    current_amps: 1.0,
                    flow_lpm: 0.2,
                }
            } else {
                PumpReading {
                    current_amps: 6.5,
                    flow_lpm: 18.0,
                }
            };
            sender.request(PumpEvent::Reading(reading)).await;
        }
    }
}
