use embassy_time::Instant;
use embedded_hal::digital::v2::OutputPin;
use log::{error, info};
use std::fmt::Debug;

/// Pump contactor on a single active-high GPIO.
pub struct RelayController<P: OutputPin> {
    gpio_pin: P,
    current_state: bool,
    last_command_time: Option<Instant>,
}

impl<P> RelayController<P>
where
    P: OutputPin,
    P::Error: Debug,
{
    pub fn new(mut pin: P) -> Result<Self, RelayError> {
        // Ensure relay starts in OFF state (safety)
        pin.set_low().map_err(|e| {
            RelayError::GpioError(format!("Failed to set initial low state: {:?}", e))
        })?;

        info!("Relay controller initialized (active high)");

        Ok(Self {
            gpio_pin: pin,
            current_state: false,
            last_command_time: None,
        })
    }

    pub fn turn_on(&mut self) -> Result<(), RelayError> {
        if self.current_state {
            return Ok(()); // Already on
        }

        self.gpio_pin
            .set_high()
            .map_err(|e| RelayError::GpioError(format!("Failed to set GPIO high: {:?}", e)))?;

        self.current_state = true;
        self.last_command_time = Some(Instant::now());

        info!("Pump relay ON");
        Ok(())
    }

    pub fn turn_off(&mut self) -> Result<(), RelayError> {
        if !self.current_state {
            return Ok(()); // Already off
        }

        self.gpio_pin
            .set_low()
            .map_err(|e| RelayError::GpioError(format!("Failed to set GPIO low: {:?}", e)))?;

        self.current_state = false;
        self.last_command_time = Some(Instant::now());

        info!("Pump relay OFF");
        Ok(())
    }

    /// Drive the pin low regardless of what we think its state is.
    pub fn turn_off_immediately(&mut self) -> Result<(), RelayError> {
        match self.gpio_pin.set_low() {
            Ok(_) => {
                self.current_state = false;
                self.last_command_time = Some(Instant::now());
                error!("EMERGENCY: Pump relay forced OFF");
                Ok(())
            }
            Err(e) => {
                error!("CRITICAL: Failed to turn off relay immediately: GPIO error: {:?}", e);
                Err(RelayError::GpioError(format!("Emergency stop failed: {:?}", e)))
            }
        }
    }

    pub fn set(&mut self, on: bool) -> Result<(), RelayError> {
        if on {
            self.turn_on()
        } else {
            self.turn_off()
        }
    }

    pub fn is_on(&self) -> bool {
        self.current_state
    }

    pub fn get_last_command_time(&self) -> Option<Instant> {
        self.last_command_time
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    GpioError(String),
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::GpioError(msg) => write!(f, "GPIO error: {}", msg),
        }
    }
}

impl std::error::Error for RelayError {}
