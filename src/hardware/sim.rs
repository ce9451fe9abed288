//! Stand-ins for GPIO and the WiFi radio, used by the host simulator and
//! the unit tests.

use crate::system::config::{AccessPointConfig, WifiCredentials};
use crate::wifi::manager::{WifiDriver, WifiError};
use embedded_hal::digital::v2::OutputPin;
use log::debug;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Output pin whose level can be inspected through any clone.
#[derive(Clone)]
pub struct SimPin {
    name: &'static str,
    high: Arc<AtomicBool>,
}

impl SimPin {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            high: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_high(&self) -> bool {
        self.high.load(Ordering::Acquire)
    }
}

impl OutputPin for SimPin {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        if self.high.swap(false, Ordering::AcqRel) {
            debug!("[sim] {} LOW", self.name);
        }
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        if !self.high.swap(true, Ordering::AcqRel) {
            debug!("[sim] {} HIGH", self.name);
        }
        Ok(())
    }
}

/// Output pin that refuses every write.
pub struct BrokenPin;

impl OutputPin for BrokenPin {
    type Error = &'static str;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        Err("pin stuck")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Err("pin stuck")
    }
}

#[derive(Default)]
struct SimWifiInner {
    link: AtomicBool,
    auto_associate: AtomicBool,
    fail_connects: AtomicBool,
    fail_access_point: AtomicBool,
    connect_calls: AtomicU32,
    ap_starts: AtomicU32,
}

/// Scriptable radio. Clones share state so a test can flip the link while
/// the manager owns the driver.
#[derive(Clone, Default)]
pub struct SimulatedWifi {
    inner: Arc<SimWifiInner>,
}

impl SimulatedWifi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect attempt associates immediately.
    pub fn associating() -> Self {
        let wifi = Self::default();
        wifi.inner.auto_associate.store(true, Ordering::Release);
        wifi
    }

    pub fn set_link(&self, up: bool) {
        self.inner.link.store(up, Ordering::Release);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.inner.fail_connects.store(fail, Ordering::Release);
    }

    pub fn fail_access_point(&self, fail: bool) {
        self.inner.fail_access_point.store(fail, Ordering::Release);
    }

    pub fn connect_calls(&self) -> u32 {
        self.inner.connect_calls.load(Ordering::Acquire)
    }

    pub fn ap_starts(&self) -> u32 {
        self.inner.ap_starts.load(Ordering::Acquire)
    }
}

impl WifiDriver for SimulatedWifi {
    fn connect_station(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError> {
        self.inner.connect_calls.fetch_add(1, Ordering::AcqRel);
        if self.inner.fail_connects.load(Ordering::Acquire) {
            return Err(WifiError::Driver(format!("[sim] cannot reach {}", credentials.ssid)));
        }
        debug!("[sim] associating with {}", credentials.ssid);
        if self.inner.auto_associate.load(Ordering::Acquire) {
            self.inner.link.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.link.load(Ordering::Acquire)
    }

    fn start_access_point(&mut self, config: &AccessPointConfig) -> Result<(), WifiError> {
        self.inner.ap_starts.fetch_add(1, Ordering::AcqRel);
        self.inner.link.store(false, Ordering::Release);
        if self.inner.fail_access_point.load(Ordering::Acquire) {
            return Err(WifiError::Driver("[sim] access point refused".to_string()));
        }
        debug!("[sim] access point {} on channel {}", config.ssid, config.channel);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), WifiError> {
        self.inner.link.store(false, Ordering::Release);
        Ok(())
    }
}
