//! Interactive meter calibration.
//!
//! The meter is stepped through the configured levels and the operator
//! types what the dial shows at each one. The readings become the
//! calibration curve used in run mode.

use std::io::{self, BufRead, Write};

use thiserror::Error;
use tracing::{info, warn};

use crate::calibration::{
    CalibrationCurve, CalibrationPoint, CalibrationStore, CalibrationStoreError, CurveError,
};
use crate::config::Config;
use crate::devices::{ActuationError, Actuator};

#[derive(Error, Debug, PartialEq)]
pub enum OperatorInputError {
    #[error("'{0}' is not a number")]
    NotANumber(String),

    #[error("reading {value} is outside the dial range 0..={full_scale}")]
    OutOfRange { value: f64, full_scale: f64 },
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("actuation error: {0}")]
    Actuation(#[from] ActuationError),

    #[error("operator input closed before calibration finished")]
    InputClosed,

    #[error("console error: {0}")]
    Console(#[from] io::Error),

    #[error("invalid calibration curve: {0}")]
    Curve(#[from] CurveError),

    #[error(transparent)]
    Store(#[from] CalibrationStoreError),
}

/// Source of operator answers. `None` means the input has closed.
pub trait OperatorPrompt {
    fn ask(&mut self, message: &str) -> io::Result<Option<String>>;

    /// Show a message that needs no answer.
    fn tell(&mut self, message: &str);
}

/// Prompts on stdout and reads answers from stdin.
pub struct ConsolePrompt;

impl OperatorPrompt for ConsolePrompt {
    fn ask(&mut self, message: &str) -> io::Result<Option<String>> {
        print!("{}", message);
        io::stdout().flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn tell(&mut self, message: &str) {
        println!("{}", message);
    }
}

/// Parse a dial reading and normalize it by the meter's full-scale value.
pub fn parse_reading(input: &str, full_scale: f64) -> Result<f64, OperatorInputError> {
    let trimmed = input.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| OperatorInputError::NotANumber(trimmed.to_string()))?;
    if !value.is_finite() {
        return Err(OperatorInputError::NotANumber(trimmed.to_string()));
    }
    if !(0.0..=full_scale).contains(&value) {
        return Err(OperatorInputError::OutOfRange { value, full_scale });
    }
    Ok(value / full_scale)
}

pub struct Calibrator<'a, A: Actuator, P: OperatorPrompt> {
    config: &'a Config,
    actuator: &'a mut A,
    prompt: &'a mut P,
}

impl<'a, A: Actuator, P: OperatorPrompt> Calibrator<'a, A, P> {
    pub fn new(config: &'a Config, actuator: &'a mut A, prompt: &'a mut P) -> Self {
        Self {
            config,
            actuator,
            prompt,
        }
    }

    /// Capture one reading per level, then persist the resulting curve.
    pub fn run(&mut self, store: &CalibrationStore) -> Result<CalibrationCurve, CalibrationError> {
        info!(
            "Starting calibration at levels {:?}%",
            self.config.calibration_levels
        );
        let curve = self.capture()?;
        if !curve.is_monotonic() {
            warn!("Dial readings do not increase with every level, check the meter");
        }
        store.save(&curve)?;

        self.prompt.tell(&format!(
            "Calibration saved to {}",
            store.path().display()
        ));
        info!("Calibration completed with {} points", curve.len());
        Ok(curve)
    }

    pub fn capture(&mut self) -> Result<CalibrationCurve, CalibrationError> {
        let full_scale = self.config.meter.full_scale;
        let mut points = Vec::with_capacity(self.config.calibration_levels.len());

        for &level in &self.config.calibration_levels {
            let input_fraction = level as f64 / 100.0;
            self.actuator.set(input_fraction)?;
            self.prompt.tell(&format!("Meter driven to {}%", level));

            let observed_fraction = self.read_observed(level, full_scale)?;
            info!(
                "Level {}%: dial shows {:.1}% of full scale",
                level,
                observed_fraction * 100.0
            );
            points.push(CalibrationPoint::new(input_fraction, observed_fraction));
        }

        Ok(CalibrationCurve::new(points)?)
    }

    fn read_observed(&mut self, level: u8, full_scale: f64) -> Result<f64, CalibrationError> {
        let question = format!("Dial reading at {}% (0-{}): ", level, full_scale);
        loop {
            let Some(answer) = self.prompt.ask(&question)? else {
                return Err(CalibrationError::InputClosed);
            };
            match parse_reading(&answer, full_scale) {
                Ok(fraction) => return Ok(fraction),
                Err(e) => {
                    warn!("Rejected dial reading at {}%: {}", level, e);
                    self.prompt.tell(&format!("Invalid reading: {}. Try again.", e));
                }
            }
        }
    }
}
