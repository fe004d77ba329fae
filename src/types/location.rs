//! Device position estimates

use serde::{Deserialize, Serialize};
use std::fmt;

/// Estimated device position in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationEstimate {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationEstimate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// (0, 0) is treated as "never set" when reporting.
    pub fn is_origin(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

impl fmt::Display for LocationEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LAT={:.6}, LONG={:.6}", self.latitude, self.longitude)
    }
}
