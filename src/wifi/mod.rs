#[cfg(target_os = "espidf")]
pub mod esp_driver;
pub mod manager;
pub mod states;

#[cfg(target_os = "espidf")]
pub use esp_driver::EspWifiDriver;
pub use manager::*;
pub use states::*;
