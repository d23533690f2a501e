use rppal::gpio::{Gpio, OutputPin};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::MeterConfig;

#[derive(Error, Debug)]
pub enum ActuationError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    #[error("duty cycle {0} is outside 0.0..=1.0")]
    OutOfRange(f64),
}

/// Output stage that turns a fraction into a needle position.
#[cfg_attr(test, mockall::automock)]
pub trait Actuator {
    fn set(&mut self, fraction: f64) -> Result<(), ActuationError>;
}

/// Analog meter wired to a GPIO pin and driven with software PWM. The RC
/// network in front of the meter averages the pulses.
pub struct PwmMeter {
    pin: OutputPin,
    gpio_pin: u8,
    frequency_hz: f64,
}

impl PwmMeter {
    pub fn open(config: &MeterConfig) -> Result<Self, ActuationError> {
        info!(
            "Initializing meter on GPIO {} at {} Hz",
            config.gpio_pin, config.pwm_frequency_hz
        );
        let pin = Gpio::new()?.get(config.gpio_pin)?.into_output_low();
        Ok(PwmMeter {
            pin,
            gpio_pin: config.gpio_pin,
            frequency_hz: config.pwm_frequency_hz,
        })
    }
}

impl Actuator for PwmMeter {
    fn set(&mut self, fraction: f64) -> Result<(), ActuationError> {
        check_fraction(fraction)?;
        debug!("Setting GPIO {} duty cycle to {:.4}", self.gpio_pin, fraction);
        self.pin
            .set_pwm_frequency(self.frequency_hz, fraction)
            .map_err(|e| {
                error!("Failed to update PWM on GPIO {}: {}", self.gpio_pin, e);
                ActuationError::Gpio(e)
            })
    }
}

fn check_fraction(fraction: f64) -> Result<(), ActuationError> {
    if (0.0..=1.0).contains(&fraction) {
        Ok(())
    } else {
        Err(ActuationError::OutOfRange(fraction))
    }
}
