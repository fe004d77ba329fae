//! SIM800 `AT+CENG?` Response Parser
//!
//! The modem answers an engineering-mode query with one line per visible cell:
//!
//! ```text
//! +CENG: 0,"<arfcn>,<rxl>,<rxq>,<mcc>,<mnc>,<bsic>,<cellid>,<rla>,<txp>,<lac>,<ta>"
//! +CENG: 1,"<arfcn>,<rxl>,<bsic>,<cellid>,<mcc>,<mnc>,<lac>"
//! ...
//! OK
//! ```
//!
//! Index 0 is the serving cell, 1..6 are neighbours. `cellid` and `lac` are
//! hexadecimal, everything else is decimal. Neighbours the modem cannot
//! identify report `ffff` in place of their identity fields.
//!
//! Parsing is total: lines that do not match either shape are skipped and
//! logged, never returned as errors.

use crate::types::{ObservationBatch, TowerObservation, UNKNOWN_FIELD};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Marker every cell line carries.
pub const CENG_MARKER: &str = "+CENG:";

/// `+CENG: <index>,"<payload>"`, located anywhere in the line.
fn ceng_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\+CENG:\s*(\d+)\s*,\s*"([^"]*)"#).expect("CENG line pattern is valid")
    })
}

/// Which layout a line was matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellLine {
    Serving,
    Neighbour,
}

/// Parse a complete modem response into at most seven observations.
///
/// Lines may be separated by any mix of `\r` and `\n`. The serving-cell line
/// is only honoured as the first accepted line; after that, `+CENG: 0` lines
/// are read with the neighbour layout.
pub fn parse_ceng_response(response: &str) -> ObservationBatch {
    let mut batch = ObservationBatch::new();

    for line in response.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
        if batch.is_full() {
            break;
        }

        debug!(line = %line, "Parsing modem line");

        let shape = if batch.is_empty() && is_serving_line(line) {
            CellLine::Serving
        } else if line.contains(CENG_MARKER) {
            CellLine::Neighbour
        } else {
            continue;
        };

        let parsed = match shape {
            CellLine::Serving => parse_serving_line(line),
            CellLine::Neighbour => parse_neighbour_line(line),
        };

        match parsed {
            Some(observation) => {
                debug!(
                    kind = ?shape,
                    mcc = observation.country_code,
                    mnc = observation.operator_code,
                    lac = ?observation.region_code,
                    cid = observation.cell_id,
                    level = observation.signal_level,
                    "Parsed tower"
                );
                if batch.push(observation).is_err() {
                    break;
                }
            }
            None => {
                warn!(kind = ?shape, line = %line, "Failed to parse modem line");
            }
        }
    }

    debug!(towers = batch.len(), "Total parsed towers");
    batch
}

/// Lossy variant for raw serial bytes.
pub fn parse_ceng_bytes(response: &[u8]) -> ObservationBatch {
    parse_ceng_response(&String::from_utf8_lossy(response))
}

fn is_serving_line(line: &str) -> bool {
    ceng_line_pattern()
        .captures(line)
        .is_some_and(|caps| &caps[1] == "0")
}

/// Quoted payload fields of the first `+CENG:` match in the line.
fn payload_fields(line: &str) -> Option<Vec<&str>> {
    let caps = ceng_line_pattern().captures(line)?;
    let payload = caps.get(2)?.as_str();
    Some(payload.split(',').map(str::trim).collect())
}

/// Serving layout: every one of level, MCC, MNC, cell id and LAC must parse.
pub fn parse_serving_line(line: &str) -> Option<TowerObservation> {
    let fields = payload_fields(line)?;

    let signal_level = parse_dec_i32(fields.get(1)?)?;
    let country_code = parse_dec_u16(fields.get(3)?)?;
    let operator_code = parse_dec_u16(fields.get(4)?)?;
    let cell_id = parse_hex_u32(fields.get(6)?)?;
    let region_code = u16::try_from(parse_hex_u32(fields.get(9)?)?).ok()?;

    Some(TowerObservation {
        country_code,
        operator_code,
        cell_id,
        region_code: Some(region_code),
        signal_level,
    })
}

/// Neighbour layout: level, cell id, MCC and MNC are required, LAC is optional.
///
/// Any identity field equal to `0xFFFF` means the modem does not know the
/// neighbour and the line is dropped.
pub fn parse_neighbour_line(line: &str) -> Option<TowerObservation> {
    let fields = payload_fields(line)?;

    let signal_level = parse_dec_i32(fields.get(1)?)?;
    let cell_id = parse_hex_u32(fields.get(3)?)?;
    let mcc = fields.get(4)?.parse::<u32>().ok()?;
    let mnc = fields.get(5)?.parse::<u32>().ok()?;
    let lac = fields.get(6).and_then(|f| parse_hex_u32(f));

    let identity = [Some(mcc), Some(mnc), Some(cell_id), lac];
    if identity.iter().flatten().any(|&v| v == UNKNOWN_FIELD) {
        debug!(line = %line, "Dropping neighbour with unknown identity");
        return None;
    }

    Some(TowerObservation {
        country_code: u16::try_from(mcc).ok()?,
        operator_code: u16::try_from(mnc).ok()?,
        cell_id,
        region_code: match lac {
            Some(v) => Some(u16::try_from(v).ok()?),
            None => None,
        },
        signal_level,
    })
}

fn parse_dec_i32(field: &str) -> Option<i32> {
    field.parse().ok()
}

fn parse_dec_u16(field: &str) -> Option<u16> {
    field.parse().ok()
}

fn parse_hex_u32(field: &str) -> Option<u32> {
    if field.is_empty() {
        return None;
    }
    u32::from_str_radix(field, 16).ok()
}
