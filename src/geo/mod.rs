//! Position estimation from resolved towers

pub mod history;
pub mod trilateration;

pub use history::{LocationHistory, HISTORY_CAPACITY};
pub use trilateration::{estimate_distance, trilaterate, EstimateError, PathLossModel};
