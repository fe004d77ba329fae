//! Three-circle trilateration
//!
//! Each qualifying tower becomes a circle centred on its (latitude, longitude)
//! with a radius taken from the log-distance path-loss model:
//!
//! ```text
//! r = 10 ^ ((A + RSSI) / (10 · n))      A = -40 dB, n = 3
//! ```
//!
//! Subtracting circle 2 from circle 1 and circle 3 from circle 2 leaves a
//! 2×2 linear system, solved in closed form:
//!
//! ```text
//! A·x + B·y = C        A = 2(x2 - x1)   B = 2(y2 - y1)
//! D·x + E·y = F        D = 2(x3 - x2)   E = 2(y3 - y2)
//!
//! C = r1² - r2² - x1² + x2² - y1² + y2²
//! F = r2² - r3² - x2² + x3² - y2² + y3²
//! ```
//!
//! Only the first three towers with a non-zero signal level are used.

use thiserror::Error;
use tracing::debug;

use crate::types::{LocationEstimate, ResolvedObservation};

/// Towers needed for a fix.
pub const REQUIRED_TOWERS: usize = 3;

/// Determinants within this many ulps of the coordinate scale are singular.
const SINGULAR_TOLERANCE: f64 = 8.0 * f64::EPSILON;

/// Reasons no estimate can be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EstimateError {
    #[error("Need 3 towers with signal, have {have}")]
    InsufficientTowers { have: usize },

    #[error("Tower centres are collinear or coincident")]
    SingularGeometry,

    #[error("Estimate is not a finite position")]
    NonFinite,
}

/// Log-distance path-loss parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathLossModel {
    /// Attenuation at the reference distance (dB)
    pub reference_attenuation_db: f64,
    /// Path-loss exponent
    pub exponent: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            reference_attenuation_db: -40.0,
            exponent: 3.0,
        }
    }
}

impl PathLossModel {
    pub fn distance(&self, signal_level: i32) -> f64 {
        10f64.powf((self.reference_attenuation_db + f64::from(signal_level)) / (10.0 * self.exponent))
    }
}

/// Distance for a signal level under the default model.
pub fn estimate_distance(signal_level: i32) -> f64 {
    PathLossModel::default().distance(signal_level)
}

/// Estimate the device position from up to seven accumulated towers.
///
/// Slots with a zero signal level are empty and skipped. The fourth and later
/// qualifying towers do not contribute.
pub fn trilaterate(
    towers: &[ResolvedObservation],
    model: &PathLossModel,
) -> Result<LocationEstimate, EstimateError> {
    let qualifying: Vec<&ResolvedObservation> = towers.iter().filter(|t| t.has_signal()).collect();
    let [t1, t2, t3] = match qualifying.as_slice() {
        [a, b, c, ..] => [*a, *b, *c],
        _ => {
            return Err(EstimateError::InsufficientTowers {
                have: qualifying.len(),
            })
        }
    };

    let (x1, y1, r1) = (t1.latitude, t1.longitude, model.distance(t1.signal_level));
    let (x2, y2, r2) = (t2.latitude, t2.longitude, model.distance(t2.signal_level));
    let (x3, y3, r3) = (t3.latitude, t3.longitude, model.distance(t3.signal_level));

    let a = 2.0 * (x2 - x1);
    let b = 2.0 * (y2 - y1);
    let c = r1.powi(2) - r2.powi(2) - x1.powi(2) + x2.powi(2) - y1.powi(2) + y2.powi(2);
    let d = 2.0 * (x3 - x2);
    let e = 2.0 * (y3 - y2);
    let f = r2.powi(2) - r3.powi(2) - x2.powi(2) + x3.powi(2) - y2.powi(2) + y3.powi(2);

    let det = a * e - b * d;
    // Each difference carries rounding error proportional to the coordinates
    // it was taken from, not to the difference itself.
    let magnitude = [x1, y1, x2, y2, x3, y3]
        .iter()
        .fold(1.0_f64, |m, v| m.max(v.abs()));
    let tolerance = SINGULAR_TOLERANCE * magnitude * (a.abs() + b.abs() + d.abs() + e.abs());
    if det == 0.0 || det.abs() <= tolerance {
        debug!(det, "Singular trilateration system");
        return Err(EstimateError::SingularGeometry);
    }

    let latitude = (c * e - f * b) / det;
    let longitude = (a * f - d * c) / det;
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(EstimateError::NonFinite);
    }

    Ok(LocationEstimate::new(latitude, longitude))
}
