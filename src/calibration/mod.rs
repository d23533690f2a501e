//! Meter calibration curve.
//!
//! A curve records, for a handful of commanded duty cycles, where the
//! operator saw the needle settle. Both axes are fractions of full scale.

pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{CalibrationStore, CalibrationStoreError};

#[derive(Error, Debug, PartialEq)]
pub enum CurveError {
    #[error("calibration curve has no points")]
    Empty,

    #[error("calibration curve needs at least {required} points, got {actual}")]
    TooFewPoints { required: usize, actual: usize },

    #[error("point ({input}, {observed}) is outside 0.0..=1.0")]
    OutOfRange { input: f64, observed: f64 },

    #[error("two points share input fraction {0}")]
    DuplicateInput(f64),
}

/// One (commanded, observed) pair captured during calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub input_fraction: f64,    // commanded PWM level
    pub observed_fraction: f64, // dial reading normalized to full scale
}

impl CalibrationPoint {
    pub fn new(input_fraction: f64, observed_fraction: f64) -> Self {
        Self {
            input_fraction,
            observed_fraction,
        }
    }
}

/// Piecewise-linear curve through control points sorted by input fraction.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    points: Vec<CalibrationPoint>,
}

impl CalibrationCurve {
    /// Build a curve, sorting the points by input fraction.
    ///
    /// Rejects empty input, values outside `0.0..=1.0` (NaN included) and
    /// points sharing an input fraction.
    pub fn new(mut points: Vec<CalibrationPoint>) -> Result<Self, CurveError> {
        if points.is_empty() {
            return Err(CurveError::Empty);
        }
        for p in &points {
            let in_range = |v: f64| (0.0..=1.0).contains(&v);
            if !in_range(p.input_fraction) || !in_range(p.observed_fraction) {
                return Err(CurveError::OutOfRange {
                    input: p.input_fraction,
                    observed: p.observed_fraction,
                });
            }
        }

        points.sort_by(|a, b| a.input_fraction.total_cmp(&b.input_fraction));
        if let Some(w) = points
            .windows(2)
            .find(|w| w[0].input_fraction == w[1].input_fraction)
        {
            return Err(CurveError::DuplicateInput(w[0].input_fraction));
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Observed fraction at commanded fraction `x`.
    ///
    /// Linear between the bracketing points, clamped to the first/last
    /// observed value outside the calibrated range. NaN is read as 0.0.
    pub fn interpolate(&self, x: f64) -> f64 {
        let x = if x.is_nan() { 0.0 } else { x };
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];

        if self.points.len() == 1 || x <= first.input_fraction {
            return first.observed_fraction;
        }
        if x >= last.input_fraction {
            return last.observed_fraction;
        }

        // First point strictly above x; its predecessor is at or below x
        let hi = self.points.partition_point(|p| p.input_fraction <= x);
        let (p0, p1) = (self.points[hi - 1], self.points[hi]);
        if x == p0.input_fraction {
            return p0.observed_fraction;
        }

        let t = (x - p0.input_fraction) / (p1.input_fraction - p0.input_fraction);
        let y = p0.observed_fraction + t * (p1.observed_fraction - p0.observed_fraction);
        y.clamp(
            p0.observed_fraction.min(p1.observed_fraction),
            p0.observed_fraction.max(p1.observed_fraction),
        )
    }

    /// True when observed fractions strictly increase with input.
    pub fn is_monotonic(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[0].observed_fraction < w[1].observed_fraction)
    }

    /// The curve with its axes swapped: observed position to the commanded
    /// level that produces it.
    ///
    /// Where several commanded levels produced the same reading, the lowest
    /// one is kept.
    pub fn inverted(&self) -> CalibrationCurve {
        let mut points: Vec<CalibrationPoint> = self
            .points
            .iter()
            .map(|p| CalibrationPoint::new(p.observed_fraction, p.input_fraction))
            .collect();
        // Stable sort keeps ascending commanded order among equal readings
        points.sort_by(|a, b| a.input_fraction.total_cmp(&b.input_fraction));
        points.dedup_by(|later, earlier| later.input_fraction == earlier.input_fraction);
        CalibrationCurve { points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    fn curve(pairs: &[(f64, f64)]) -> CalibrationCurve {
        CalibrationCurve::new(
            pairs
                .iter()
                .map(|&(i, o)| CalibrationPoint::new(i, o))
                .collect(),
        )
        .unwrap()
    }

    fn measured() -> CalibrationCurve {
        curve(&[(0.0, 0.0), (0.25, 0.20), (0.5, 0.55), (0.75, 0.80), (1.0, 1.0)])
    }

    #[test]
    fn test_passes_through_anchors() {
        let c = measured();
        for p in c.points() {
            assert_eq!(c.interpolate(p.input_fraction), p.observed_fraction);
        }
    }

    #[test]
    fn test_linear_between_anchors() {
        let c = measured();
        assert!((c.interpolate(0.125) - 0.10).abs() < EPS);
        assert!((c.interpolate(0.375) - 0.375).abs() < EPS);
        assert!((c.interpolate(0.875) - 0.90).abs() < EPS);
    }

    #[test]
    fn test_clamps_outside_range() {
        let c = curve(&[(0.2, 0.1), (0.8, 0.9)]);
        assert_eq!(c.interpolate(0.0), 0.1);
        assert_eq!(c.interpolate(-3.0), 0.1);
        assert_eq!(c.interpolate(0.9), 0.9);
        assert_eq!(c.interpolate(7.0), 0.9);
    }

    #[test]
    fn test_two_point_identity() {
        let c = curve(&[(0.0, 0.0), (1.0, 1.0)]);
        for i in 0..=100 {
            let x = i as f64 / 100.0;
            assert!((c.interpolate(x) - x).abs() < EPS, "x = {}", x);
        }
    }

    #[test]
    fn test_single_point_is_constant() {
        let c = curve(&[(0.5, 0.3)]);
        assert_eq!(c.interpolate(0.0), 0.3);
        assert_eq!(c.interpolate(0.5), 0.3);
        assert_eq!(c.interpolate(1.0), 0.3);
    }

    #[test]
    fn test_nan_reads_as_zero() {
        let c = curve(&[(0.0, 0.1), (1.0, 0.9)]);
        assert_eq!(c.interpolate(f64::NAN), 0.1);
    }

    #[test]
    fn test_sorts_points() {
        let c = curve(&[(1.0, 1.0), (0.0, 0.0), (0.5, 0.4)]);
        let inputs: Vec<f64> = c.points().iter().map(|p| p.input_fraction).collect();
        assert_eq!(inputs, vec![0.0, 0.5, 1.0]);
        assert_eq!(c.interpolate(0.5), 0.4);
    }

    #[test]
    fn test_output_stays_in_unit_range() {
        let c = curve(&[(0.0, 0.05), (0.3, 0.6), (0.6, 0.4), (1.0, 0.95)]);
        for i in -20..=120 {
            let y = c.interpolate(i as f64 / 100.0);
            assert!((0.0..=1.0).contains(&y));
        }
    }

    #[test]
    fn test_rejects_invalid_points() {
        assert_eq!(CalibrationCurve::new(vec![]), Err(CurveError::Empty));
        assert_eq!(
            CalibrationCurve::new(vec![
                CalibrationPoint::new(0.5, 0.1),
                CalibrationPoint::new(0.5, 0.2),
            ]),
            Err(CurveError::DuplicateInput(0.5))
        );
        assert!(matches!(
            CalibrationCurve::new(vec![CalibrationPoint::new(1.2, 0.1)]),
            Err(CurveError::OutOfRange { .. })
        ));
        assert!(CalibrationCurve::new(vec![CalibrationPoint::new(0.1, f64::NAN)]).is_err());
    }

    #[test]
    fn test_inverted_swaps_axes() {
        let inv = measured().inverted();
        assert_eq!(inv.len(), 5);
        assert_eq!(inv.interpolate(0.20), 0.25);
        assert_eq!(inv.interpolate(0.55), 0.5);
        assert!((inv.interpolate(0.10) - 0.125).abs() < EPS);
    }

    #[test]
    fn test_inverted_collapses_repeated_readings() {
        // Needle did not move until the second level
        let c = curve(&[(0.0, 0.0), (0.25, 0.0), (0.5, 0.4), (1.0, 1.0)]);
        assert!(!c.is_monotonic());
        let inv = c.inverted();
        assert_eq!(inv.len(), 3);
        assert_eq!(inv.points()[0], CalibrationPoint::new(0.0, 0.0));
        assert_eq!(inv.interpolate(0.4), 0.5);
    }

    #[test]
    fn test_monotonic_check() {
        assert!(measured().is_monotonic());
        assert!(!curve(&[(0.0, 0.5), (1.0, 0.4)]).is_monotonic());
    }
}
