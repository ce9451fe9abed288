use crate::hardware::StatusIndicator;
use crate::state::SystemStatus;
use crate::types::PumpState;
use embedded_hal::digital::v2::OutputPin;
use log::warn;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedColor {
    pub red: bool,
    pub green: bool,
    pub blue: bool,
}

impl LedColor {
    const fn new(red: bool, green: bool, blue: bool) -> Self {
        Self { red, green, blue }
    }

    pub const OFF: LedColor = LedColor::new(false, false, false);
    pub const RED: LedColor = LedColor::new(true, false, false);
    pub const GREEN: LedColor = LedColor::new(false, true, false);
    pub const BLUE: LedColor = LedColor::new(false, false, true);
    pub const CYAN: LedColor = LedColor::new(false, true, true);
    pub const MAGENTA: LedColor = LedColor::new(true, false, true);
    pub const YELLOW: LedColor = LedColor::new(true, true, false);
    pub const WHITE: LedColor = LedColor::new(true, true, true);

    pub fn for_pump_state(state: PumpState) -> LedColor {
        match state {
            PumpState::WellRecovery => LedColor::BLUE,
            PumpState::StartingPump | PumpState::StoppingPump => LedColor::CYAN,
            PumpState::PumpingWater => LedColor::GREEN,
            PumpState::ErrorRed => LedColor::RED,
            PumpState::ErrorPurple => LedColor::MAGENTA,
            PumpState::ErrorYellow => LedColor::YELLOW,
            PumpState::HaltedPump => LedColor::WHITE,
        }
    }
}

/// Common-cathode RGB LED on three GPIOs.
pub struct StatusLed<R, G, B> {
    red: R,
    green: G,
    blue: B,
    color: LedColor,
}

impl<R, G, B> StatusLed<R, G, B>
where
    R: OutputPin,
    G: OutputPin,
    B: OutputPin,
    R::Error: Debug,
    G::Error: Debug,
    B::Error: Debug,
{
    pub fn new(red: R, green: G, blue: B) -> Self {
        let mut led = Self {
            red,
            green,
            blue,
            color: LedColor::WHITE,
        };
        led.set_color(LedColor::OFF);
        led
    }

    pub fn color(&self) -> LedColor {
        self.color
    }

    pub fn set_color(&mut self, color: LedColor) {
        if color == self.color {
            return;
        }
        let results = [
            drive(&mut self.red, color.red),
            drive(&mut self.green, color.green),
            drive(&mut self.blue, color.blue),
        ];
        for e in results.iter().flatten() {
            warn!("Status LED write failed: {}", e);
        }
        self.color = color;
    }
}

fn drive<P>(pin: &mut P, on: bool) -> Option<String>
where
    P: OutputPin,
    P::Error: Debug,
{
    let result = if on { pin.set_high() } else { pin.set_low() };
    result.err().map(|e| format!("{:?}", e))
}

impl<R, G, B> StatusIndicator for StatusLed<R, G, B>
where
    R: OutputPin,
    G: OutputPin,
    B: OutputPin,
    R::Error: Debug,
    G::Error: Debug,
    B::Error: Debug,
{
    fn show(&mut self, status: &SystemStatus) {
        self.set_color(LedColor::for_pump_state(status.pump_state));
    }
}
