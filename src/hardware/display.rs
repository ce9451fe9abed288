//! SH1106 OLED status screen.

use crate::hardware::StatusIndicator;
use crate::state::SystemStatus;
use embedded_graphics::{
    mono_font::{ascii::FONT_6X10, ascii::FONT_9X15, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use log::{debug, info, warn};
use sh1106::Builder;

pub const DISPLAY_WIDTH: u32 = 128;
pub const DISPLAY_HEIGHT: u32 = 64;

// 6px glyphs
const MAX_LINE_CHARS: usize = (DISPLAY_WIDTH / 6) as usize;
const FOOTER_Y: i32 = DISPLAY_HEIGHT as i32 - 20;

/// Draw the status screen onto any monochrome target.
///
/// Layout, top to bottom: pump state (large), WiFi state, cycle count and
/// relay, then either the last error or the WiFi label.
pub fn render_status<D>(target: &mut D, status: &SystemStatus) -> Result<(), D::Error>
where
    D: DrawTarget<Color = BinaryColor>,
{
    let title_style = MonoTextStyle::new(&FONT_9X15, BinaryColor::On);
    let text_style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

    Text::with_baseline(
        status.pump_state.name(),
        Point::new(0, 0),
        title_style,
        Baseline::Top,
    )
    .draw(target)?;

    Text::with_baseline(
        status.wifi_state.name(),
        Point::new(0, 18),
        text_style,
        Baseline::Top,
    )
    .draw(target)?;

    let cycles_text = format!(
        "Cycles:{} Relay:{}",
        status.statistics.cycles_completed,
        if status.relay_enabled { "ON" } else { "OFF" }
    );
    Text::with_baseline(&cycles_text, Point::new(0, 30), text_style, Baseline::Top)
        .draw(target)?;

    let footer = match status.last_error {
        Some(ref error) => format!("ERR {}", error),
        None => status.wifi_status.clone(),
    };
    Text::with_baseline(
        clip(&footer, MAX_LINE_CHARS),
        Point::new(0, FOOTER_Y),
        text_style,
        Baseline::Top,
    )
    .draw(target)?;

    Ok(())
}

fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct DisplayController<I2C>
where
    I2C: embedded_hal::blocking::i2c::Write + embedded_hal::blocking::i2c::WriteRead,
{
    display: sh1106::mode::GraphicsMode<sh1106::interface::I2cInterface<I2C>>,
    last_rendered: Option<String>,
}

impl<I2C> DisplayController<I2C>
where
    I2C: embedded_hal::blocking::i2c::Write + embedded_hal::blocking::i2c::WriteRead,
    <I2C as embedded_hal::blocking::i2c::Write>::Error: std::fmt::Debug,
    <I2C as embedded_hal::blocking::i2c::WriteRead>::Error: std::fmt::Debug,
{
    pub fn new(i2c: I2C) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing SH1106 OLED display");

        let mut display: sh1106::mode::GraphicsMode<_> = Builder::new().connect_i2c(i2c).into();

        display
            .init()
            .map_err(|e| format!("Display init failed: {:?}", e))?;
        display.clear();
        display
            .flush()
            .map_err(|e| format!("Display flush failed: {:?}", e))?;

        info!("SH1106 display initialized");

        Ok(Self {
            display,
            last_rendered: None,
        })
    }

    pub fn refresh(&mut self, status: &SystemStatus) -> Result<(), Box<dyn std::error::Error>> {
        // Skip the I2C traffic when nothing visible changed
        let fingerprint = format!(
            "{}|{}|{}|{}|{:?}|{}",
            status.pump_state.name(),
            status.wifi_state.name(),
            status.statistics.cycles_completed,
            status.relay_enabled,
            status.last_error,
            status.wifi_status
        );
        if self.last_rendered.as_deref() == Some(fingerprint.as_str()) {
            return Ok(());
        }

        debug!("Refreshing display");
        self.display.clear();
        render_status(&mut self.display, status)
            .map_err(|e| format!("Display draw error: {:?}", e))?;
        self.display
            .flush()
            .map_err(|e| format!("Display flush failed: {:?}", e))?;

        self.last_rendered = Some(fingerprint);
        Ok(())
    }

    pub fn show_boot_screen(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Showing boot screen");

        self.display.clear();

        let title_style = MonoTextStyle::new(&FONT_9X15, BinaryColor::On);
        let text_style = MonoTextStyle::new(&FONT_6X10, BinaryColor::On);

        Text::with_baseline("Well Pump", Point::new(20, 20), title_style, Baseline::Top)
            .draw(&mut self.display)
            .map_err(|e| format!("Display draw error: {:?}", e))?;

        Text::with_baseline(
            "Starting...",
            Point::new(30, 40),
            text_style,
            Baseline::Top,
        )
        .draw(&mut self.display)
        .map_err(|e| format!("Display draw error: {:?}", e))?;

        self.display
            .flush()
            .map_err(|e| format!("Display flush failed: {:?}", e))?;

        Ok(())
    }
}

impl<I2C> StatusIndicator for DisplayController<I2C>
where
    I2C: embedded_hal::blocking::i2c::Write + embedded_hal::blocking::i2c::WriteRead,
    <I2C as embedded_hal::blocking::i2c::Write>::Error: std::fmt::Debug,
    <I2C as embedded_hal::blocking::i2c::WriteRead>::Error: std::fmt::Debug,
{
    fn show(&mut self, status: &SystemStatus) {
        if let Err(e) = self.refresh(status) {
            warn!("Display update failed: {}", e);
        }
    }
}

#[cfg(target_os = "espidf")]
pub fn create_display_controller(
    i2c: impl esp_idf_svc::hal::peripheral::Peripheral<P = impl esp_idf_svc::hal::i2c::I2c> + 'static,
    sda: impl esp_idf_svc::hal::peripheral::Peripheral<P = impl esp_idf_svc::hal::gpio::InputPin + esp_idf_svc::hal::gpio::OutputPin>
        + 'static,
    scl: impl esp_idf_svc::hal::peripheral::Peripheral<P = impl esp_idf_svc::hal::gpio::InputPin + esp_idf_svc::hal::gpio::OutputPin>
        + 'static,
) -> Result<DisplayController<esp_idf_svc::hal::i2c::I2cDriver<'static>>, Box<dyn std::error::Error>>
{
    use esp_idf_svc::hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_svc::hal::prelude::*;

    info!("Setting up I2C for SH1106 display");

    let config = I2cConfig::new().baudrate(400.kHz().into());
    let i2c = I2cDriver::new(i2c, sda, scl, &config)?;

    DisplayController::new(i2c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PumpState, WifiState};
    use embedded_graphics::mock_display::MockDisplay;

    fn mock() -> MockDisplay<BinaryColor> {
        let mut display = MockDisplay::new();
        display.set_allow_overdraw(true);
        display.set_allow_out_of_bounds_drawing(true);
        display
    }

    #[test]
    fn test_renders_status_lines() {
        let mut display = mock();
        let mut status = SystemStatus::default();
        status.pump_state = PumpState::PumpingWater;
        status.wifi_state = WifiState::StaConnected;
        status.statistics.cycles_completed = 12;

        render_status(&mut display, &status).unwrap();

        let area = display.affected_area();
        assert!(!area.is_zero_sized());
        assert!(area.top_left.y < 15);
        assert!(area.bottom_right().unwrap().y >= 44);
    }

    #[test]
    fn test_error_changes_footer() {
        let mut plain = mock();
        let mut errored = mock();
        let mut status = SystemStatus::default();
        render_status(&mut plain, &status).unwrap();

        status.last_error = Some("reset refused".to_string());
        render_status(&mut errored, &status).unwrap();

        assert_ne!(plain, errored);
    }

    #[test]
    fn test_long_error_stays_on_panel() {
        let mut display = mock();
        let mut status = SystemStatus::default();
        status.last_error = Some("relay did not follow pump state ERROR_RED".to_string());
        render_status(&mut display, &status).unwrap();

        let bottom_right = display.affected_area().bottom_right().unwrap();
        assert!(bottom_right.x < DISPLAY_WIDTH as i32);
        assert!(bottom_right.y < DISPLAY_HEIGHT as i32);
        assert!(bottom_right.y >= FOOTER_Y);
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        assert_eq!(clip("short", 21), "short");
        assert_eq!(clip("abcdef", 3), "abc");
        assert_eq!(clip("ééé", 2), "éé");
    }
}
