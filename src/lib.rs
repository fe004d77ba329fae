//! Cell Locator: GSM cell-tower geolocation
//!
//! Three cooperating processes estimate a device position from the cell
//! towers its modem can hear.
//!
//! ## Architecture
//!
//! - **Reader**: polls the modem with `AT+CENG?` and announces each batch of towers
//! - **Router**: resolves towers to coordinates through the tower database
//! - **Display**: trilaterates each batch and keeps the last ten positions

pub mod acquisition;
pub mod config;
pub mod geo;
pub mod location_log;
pub mod protocol;
pub mod roles;
pub mod tower_db;
pub mod transport;
pub mod types;

// Re-export configuration
pub use config::LocatorConfig;

// Re-export commonly used types
pub use types::{
    LocationEstimate, ObservationBatch, ResolvedObservation, TowerKey, TowerObservation, TowerRecord,
    MAX_TOWERS_PER_BATCH,
};

pub use acquisition::{parse_ceng_response, ModemClient, ModemError};
pub use geo::{trilaterate, EstimateError, LocationHistory, PathLossModel};
pub use protocol::{DisplayMessage, ProtocolError};
pub use tower_db::{TowerDatabase, TowerDbError};
pub use transport::{DisplayLink, LinkError};
