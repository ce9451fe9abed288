//! `WifiDriver` on top of the ESP-IDF radio.

use crate::system::config::{AccessPointConfig, WifiCredentials};
use crate::wifi::manager::{WifiDriver, WifiError};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::EspError;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use log::{info, warn};

pub struct EspWifiDriver {
    wifi: EspWifi<'static>,
}

impl EspWifiDriver {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self, EspError> {
        info!("Initializing WiFi driver");
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs))?;
        Ok(Self { wifi })
    }

    fn restart_with(&mut self, configuration: &Configuration) -> Result<(), WifiError> {
        if self.wifi.is_started().map_err(driver_error)? {
            self.wifi.stop().map_err(driver_error)?;
        }
        self.wifi
            .set_configuration(configuration)
            .map_err(driver_error)?;
        self.wifi.start().map_err(driver_error)
    }
}

fn driver_error(e: EspError) -> WifiError {
    WifiError::Driver(format!("{:?}", e))
}

fn auth_for(password: &str) -> AuthMethod {
    if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    }
}

impl WifiDriver for EspWifiDriver {
    fn connect_station(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError> {
        let configuration = Configuration::Client(ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::Driver("SSID too long".to_string()))?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| WifiError::Driver("password too long".to_string()))?,
            auth_method: auth_for(&credentials.password),
            ..Default::default()
        });

        self.restart_with(&configuration)?;
        // Association completes in the background; the manager polls is_connected
        self.wifi.connect().map_err(driver_error)?;
        info!("Connecting to '{}'", credentials.ssid);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        match self.wifi.is_connected() {
            Ok(connected) => connected,
            Err(e) => {
                warn!("WiFi status query failed: {:?}", e);
                false
            }
        }
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError> {
        let configuration = Configuration::AccessPoint(AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| WifiError::Driver("AP SSID too long".to_string()))?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| WifiError::Driver("AP password too long".to_string()))?,
            channel: config.channel,
            auth_method: auth_for(&config.password),
            ..Default::default()
        });

        self.restart_with(&configuration)?;
        info!("Access point '{}' up on channel {}", config.ssid, config.channel);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), WifiError> {
        self.wifi.disconnect().map_err(driver_error)
    }
}
