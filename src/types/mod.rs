//! Shared data structures for the cell-tower geolocation pipeline
//!
//! - Reader: `TowerObservation`, `ObservationBatch`
//! - Router: `TowerRecord`, `ResolvedObservation`
//! - Display: `LocationEstimate`

mod location;
mod tower;

pub use location::*;
pub use tower::*;
