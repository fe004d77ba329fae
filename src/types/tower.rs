//! Cell tower identities, observations and resolved coordinates

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of towers one modem poll can report (serving + 6 neighbours).
pub const MAX_TOWERS_PER_BATCH: usize = 7;

/// Value a SIM800-class modem reports for a field it does not know.
pub const UNKNOWN_FIELD: u32 = 0xFFFF;

/// Lookup key of a tower: (country code, operator code, cell id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TowerKey {
    pub country_code: u16,
    pub operator_code: u16,
    pub cell_id: u32,
}

impl TowerKey {
    pub fn new(country_code: u16, operator_code: u16, cell_id: u32) -> Self {
        Self {
            country_code,
            operator_code,
            cell_id,
        }
    }
}

impl fmt::Display for TowerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MCC={} MNC={} CID={}",
            self.country_code, self.operator_code, self.cell_id
        )
    }
}

/// One tower signal reading parsed from a modem response line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TowerObservation {
    /// Mobile country code (MCC)
    pub country_code: u16,
    /// Mobile network code (MNC)
    pub operator_code: u16,
    /// Cell id (CID)
    pub cell_id: u32,
    /// Location area code (LAC), when the line reported one
    #[serde(default)]
    pub region_code: Option<u16>,
    /// Receive level as reported by the modem (rxl)
    pub signal_level: i32,
}

impl TowerObservation {
    pub fn key(&self) -> TowerKey {
        TowerKey::new(self.country_code, self.operator_code, self.cell_id)
    }
}

/// Bounded batch of observations from a single poll cycle.
///
/// Storage is inline with an explicit length so the batch maps one-to-one
/// onto the fixed-size batch announcement on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservationBatch {
    towers: [TowerObservation; MAX_TOWERS_PER_BATCH],
    len: usize,
}

impl ObservationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an observation. Hands it back when the batch is already full.
    pub fn push(&mut self, observation: TowerObservation) -> Result<(), TowerObservation> {
        if self.is_full() {
            return Err(observation);
        }
        self.towers[self.len] = observation;
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == MAX_TOWERS_PER_BATCH
    }

    pub fn as_slice(&self) -> &[TowerObservation] {
        &self.towers[..self.len]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TowerObservation> {
        self.as_slice().iter()
    }
}

impl<'a> IntoIterator for &'a ObservationBatch {
    type Item = &'a TowerObservation;
    type IntoIter = std::slice::Iter<'a, TowerObservation>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Tower coordinates as held by the tower database
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TowerRecord {
    pub country_code: u16,
    pub operator_code: u16,
    pub cell_id: u32,
    pub latitude: f64,
    pub longitude: f64,
}

impl TowerRecord {
    pub fn key(&self) -> TowerKey {
        TowerKey::new(self.country_code, self.operator_code, self.cell_id)
    }

    pub fn matches(&self, key: TowerKey) -> bool {
        self.country_code == key.country_code
            && self.operator_code == key.operator_code
            && self.cell_id == key.cell_id
    }
}

/// An observation paired with its tower coordinates.
///
/// `latitude == longitude == 0.0` means the tower was not in the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedObservation {
    pub country_code: u16,
    pub operator_code: u16,
    pub cell_id: u32,
    pub signal_level: i32,
    pub latitude: f64,
    pub longitude: f64,
}

impl ResolvedObservation {
    /// Resolve an observation against an optional database hit.
    pub fn resolve(observation: &TowerObservation, record: Option<&TowerRecord>) -> Self {
        let (latitude, longitude) = record.map_or((0.0, 0.0), |r| (r.latitude, r.longitude));
        Self {
            country_code: observation.country_code,
            operator_code: observation.operator_code,
            cell_id: observation.cell_id,
            signal_level: observation.signal_level,
            latitude,
            longitude,
        }
    }

    pub fn key(&self) -> TowerKey {
        TowerKey::new(self.country_code, self.operator_code, self.cell_id)
    }

    /// True when the coordinates are the "no database match" sentinel.
    pub fn is_unresolved(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// A zero signal level marks an empty accumulation slot, not a reading.
    pub fn has_signal(&self) -> bool {
        self.signal_level != 0
    }
}
