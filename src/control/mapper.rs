use crate::calibration::CalibrationCurve;

/// Turns inverter watts into the duty cycle that puts the needle at the
/// true fraction of rated output.
#[derive(Debug, Clone)]
pub struct DutyCycleMapper {
    max_power_watts: f64,
    correction: Option<CalibrationCurve>,
}

impl DutyCycleMapper {
    /// `calibration` is the measured commanded-to-observed curve; without
    /// one the mapping is the plain normalized power.
    pub fn new(max_power_watts: u32, calibration: Option<&CalibrationCurve>) -> Self {
        Self {
            max_power_watts: max_power_watts as f64,
            correction: calibration.map(CalibrationCurve::inverted),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.correction.is_some()
    }

    /// Fraction of rated power, clamped to `0.0..=1.0`. Export readings and
    /// transient overshoot land on the bounds.
    pub fn normalize(&self, watts: i32) -> f64 {
        (watts as f64 / self.max_power_watts).clamp(0.0, 1.0)
    }

    pub fn map(&self, watts: i32) -> f64 {
        let fraction = self.normalize(watts);
        match &self.correction {
            Some(curve) => curve.interpolate(fraction),
            None => fraction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationPoint;

    #[test]
    fn test_normalize_clamps_to_bounds() {
        let mapper = DutyCycleMapper::new(5760, None);
        let got: Vec<f64> = [-100, 0, 2880, 5760, 8000]
            .iter()
            .map(|&w| mapper.normalize(w))
            .collect();
        assert_eq!(got, vec![0.0, 0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_uncalibrated_map_is_normalized_power() {
        let mapper = DutyCycleMapper::new(5760, None);
        assert!(!mapper.is_calibrated());
        for watts in (-500..=7000).step_by(250) {
            assert_eq!(mapper.map(watts), mapper.normalize(watts));
        }
    }

    #[test]
    fn test_identity_curve_changes_nothing() {
        let curve = CalibrationCurve::new(vec![
            CalibrationPoint::new(0.0, 0.0),
            CalibrationPoint::new(1.0, 1.0),
        ])
        .unwrap();
        let mapper = DutyCycleMapper::new(1000, Some(&curve));
        assert!(mapper.is_calibrated());
        assert!((mapper.map(300) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_correction_hits_observed_position() {
        // Meter reads low in the lower half: 25% duty shows as 20%
        let curve = CalibrationCurve::new(vec![
            CalibrationPoint::new(0.0, 0.0),
            CalibrationPoint::new(0.25, 0.20),
            CalibrationPoint::new(0.5, 0.55),
            CalibrationPoint::new(0.75, 0.80),
            CalibrationPoint::new(1.0, 1.0),
        ])
        .unwrap();
        let mapper = DutyCycleMapper::new(1000, Some(&curve));

        // To show 20% the meter must be driven at 25%
        assert!((mapper.map(200) - 0.25).abs() < 1e-12);
        assert!((mapper.map(550) - 0.5).abs() < 1e-12);
        assert_eq!(mapper.map(0), 0.0);
        assert_eq!(mapper.map(1000), 1.0);

        // Driving the meter with the mapped duty reproduces the true fraction
        for watts in (0..=1000).step_by(50) {
            let shown = curve.interpolate(mapper.map(watts));
            assert!((shown - watts as f64 / 1000.0).abs() < 1e-9, "watts = {}", watts);
        }
    }
}
