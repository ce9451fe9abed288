pub mod display;
pub mod relay;
pub mod sim;
pub mod status_led;

use crate::state::SystemStatus;

/// Anything that mirrors the system status to the outside world.
pub trait StatusIndicator {
    fn show(&mut self, status: &SystemStatus);
}
