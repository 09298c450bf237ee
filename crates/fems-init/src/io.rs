//! Gateway outputs: user LEDs, relays and analog outputs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::transcript::Transcript;

/// Number of relays and analog outputs on the gateway
pub const OUTPUT_COUNT: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLed {
    Led1,
    Led2,
    Led3,
    Led4,
}

impl UserLed {
    pub const ALL: [UserLed; 4] = [UserLed::Led1, UserLed::Led2, UserLed::Led3, UserLed::Led4];

    fn index(self) -> u8 {
        match self {
            UserLed::Led1 => 0,
            UserLed::Led2 => 1,
            UserLed::Led3 => 2,
            UserLed::Led4 => 3,
        }
    }
}

/// Hardware outputs of the gateway
///
/// Outputs are numbered from 1 to [`OUTPUT_COUNT`].
pub trait GatewayIo: Send + Sync {
    fn switch_user_led(&self, led: UserLed, on: bool) -> io::Result<()>;

    fn set_relay(&self, output: u8, high: bool) -> io::Result<()>;

    fn set_analog_output(&self, output: u8, value: u32) -> io::Result<()>;

    /// `true` selects voltage mode, `false` current mode
    fn set_analog_divider(&self, output: u8, voltage: bool) -> io::Result<()>;
}

/// [`GatewayIo`] writing sysfs attribute files
///
/// LEDs use the kernel LED class; relays, analog outputs and dividers are
/// expected as named GPIO/PWM links created by the board's udev rules.
#[derive(Debug, Clone)]
pub struct SysfsIo {
    root: PathBuf,
}

impl SysfsIo {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn led_path(&self, led: UserLed) -> PathBuf {
        self.root
            .join("class/leds")
            .join(format!("beaglebone:green:usr{}", led.index()))
            .join("brightness")
    }

    fn relay_path(&self, output: u8) -> PathBuf {
        self.root
            .join("class/gpio")
            .join(format!("relay{}", output))
            .join("value")
    }

    fn analog_path(&self, output: u8) -> PathBuf {
        self.root
            .join("class/pwm")
            .join(format!("ao{}", output))
            .join("duty_cycle")
    }

    fn divider_path(&self, output: u8) -> PathBuf {
        self.root
            .join("class/gpio")
            .join(format!("ao{}_divider", output))
            .join("value")
    }

    fn write(path: &Path, value: &str) -> io::Result<()> {
        fs::write(path, value)
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {}", path.display(), e)))
    }

    fn check_output(output: u8) -> io::Result<()> {
        if (1..=OUTPUT_COUNT).contains(&output) {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("No such output: {}", output),
            ))
        }
    }
}

impl Default for SysfsIo {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl GatewayIo for SysfsIo {
    fn switch_user_led(&self, led: UserLed, on: bool) -> io::Result<()> {
        Self::write(&self.led_path(led), if on { "1" } else { "0" })
    }

    fn set_relay(&self, output: u8, high: bool) -> io::Result<()> {
        Self::check_output(output)?;
        Self::write(&self.relay_path(output), if high { "1" } else { "0" })
    }

    fn set_analog_output(&self, output: u8, value: u32) -> io::Result<()> {
        Self::check_output(output)?;
        Self::write(&self.analog_path(output), &value.to_string())
    }

    fn set_analog_divider(&self, output: u8, voltage: bool) -> io::Result<()> {
        Self::check_output(output)?;
        Self::write(&self.divider_path(output), if voltage { "1" } else { "0" })
    }
}

/// Switch every output to its idle state
///
/// LEDs off, relays low, analog outputs 0 in voltage mode. Failures are
/// recorded and the remaining outputs are still handled.
pub fn turn_all_outputs_off(io: &dyn GatewayIo, transcript: &Transcript) {
    for led in UserLed::ALL {
        if let Err(e) = io.switch_user_led(led, false) {
            transcript.error(e.to_string());
        }
    }

    for output in 1..=OUTPUT_COUNT {
        if let Err(e) = io.set_relay(output, false) {
            transcript.error(e.to_string());
        }
    }

    for output in 1..=OUTPUT_COUNT {
        if let Err(e) = io.set_analog_output(output, 0) {
            transcript.error(e.to_string());
        }
        if let Err(e) = io.set_analog_divider(output, true) {
            transcript.error(e.to_string());
        }
    }
}
