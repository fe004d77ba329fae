//! Local socket transport between the pipeline processes

pub mod display_link;

pub use display_link::{
    is_recoverable, Connector, Delivery, DisplayLink, LinkError, LinkState, LinkStats, RetryPolicy,
    UnixConnector,
};
