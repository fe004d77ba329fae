//! Modem acquisition
//!
//! Talks AT commands to the GSM modem and turns `AT+CENG?` replies into
//! observation batches.

pub mod ceng_parser;
pub mod modem;

pub use ceng_parser::{parse_ceng_bytes, parse_ceng_response};
pub use modem::{BoxedModemIo, ModemClient, ModemError, ModemStats};
