//! Tower Coordinate Database
//!
//! A fixed-size chained hash table keyed by (MCC, MNC, CID). The bucket count
//! equals the number of rows it was built from and never changes.
//!
//! ## Layout
//!
//! Records live in a single arena (`Vec<TowerRecord>`). Each bucket holds the
//! arena index of its newest record, and `next` links every record to the
//! one inserted into the same bucket before it. Inserting prepends, so a
//! repeated key shadows its older copy.
//!
//! ## Lifecycle
//!
//! Fill a [`TowerDbBuilder`], then [`freeze`](TowerDbBuilder::freeze) it into
//! a read-only [`TowerDatabase`]. Lookups never mutate and the frozen table
//! can be shared across readers.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{TowerKey, TowerRecord};

/// Tower database errors
#[derive(Debug, Error)]
pub enum TowerDbError {
    #[error("Failed to read tower database {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Tower table has zero buckets")]
    ZeroCapacity,
}

/// Bucket index for a key: `(mcc + mnc + cid) mod buckets`.
///
/// Deliberately simple. It only picks the chain; equality is always checked
/// on the full key.
pub fn bucket_index(key: TowerKey, buckets: usize) -> Option<usize> {
    if buckets == 0 {
        return None;
    }
    let sum = u64::from(key.country_code) + u64::from(key.operator_code) + u64::from(key.cell_id);
    usize::try_from(sum % buckets as u64).ok()
}

/// Mutable phase of the tower table
#[derive(Debug, Clone)]
pub struct TowerDbBuilder {
    records: Vec<TowerRecord>,
    next: Vec<Option<usize>>,
    heads: Vec<Option<usize>>,
}

impl TowerDbBuilder {
    /// Allocate exactly `buckets` chains. Zero is allowed; such a table
    /// accepts no inserts and answers every lookup with "not found".
    pub fn with_capacity(buckets: usize) -> Self {
        Self {
            records: Vec::with_capacity(buckets),
            next: Vec::with_capacity(buckets),
            heads: vec![None; buckets],
        }
    }

    /// Prepend a record to its bucket's chain.
    pub fn insert(&mut self, record: TowerRecord) -> Result<(), TowerDbError> {
        let bucket = bucket_index(record.key(), self.heads.len()).ok_or(TowerDbError::ZeroCapacity)?;
        let index = self.records.len();
        self.records.push(record);
        self.next.push(self.heads[bucket]);
        self.heads[bucket] = Some(index);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// End the build phase.
    pub fn freeze(self) -> TowerDatabase {
        TowerDatabase {
            records: self.records,
            next: self.next,
            heads: self.heads,
        }
    }
}

/// Read-only tower table
#[derive(Debug, Clone)]
pub struct TowerDatabase {
    records: Vec<TowerRecord>,
    next: Vec<Option<usize>>,
    heads: Vec<Option<usize>>,
}

impl TowerDatabase {
    /// Build a table with one bucket per record.
    pub fn from_records(records: Vec<TowerRecord>) -> Self {
        let mut builder = TowerDbBuilder::with_capacity(records.len());
        for record in records {
            let inserted = builder.insert(record);
            debug_assert!(inserted.is_ok(), "one bucket per record");
        }
        builder.freeze()
    }

    /// First record in the key's chain whose full key matches.
    pub fn lookup(&self, key: TowerKey) -> Option<&TowerRecord> {
        let bucket = bucket_index(key, self.heads.len())?;
        let mut cursor = self.heads[bucket];
        while let Some(index) = cursor {
            let record = &self.records[index];
            if record.matches(key) {
                return Some(record);
            }
            cursor = self.next[index];
        }
        None
    }

    pub fn get(&self, country_code: u16, operator_code: u16, cell_id: u32) -> Option<&TowerRecord> {
        self.lookup(TowerKey::new(country_code, operator_code, cell_id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.heads.len()
    }

    /// Chain occupancy summary
    pub fn stats(&self) -> TowerDbStats {
        let mut lengths = vec![0usize; self.heads.len()];
        for (bucket, head) in self.heads.iter().enumerate() {
            let mut cursor = *head;
            while let Some(index) = cursor {
                lengths[bucket] += 1;
                cursor = self.next[index];
            }
        }
        TowerDbStats {
            records: self.records.len(),
            buckets: self.heads.len(),
            empty_buckets: lengths.iter().filter(|&&l| l == 0).count(),
            longest_chain: lengths.into_iter().max().unwrap_or(0),
        }
    }
}

/// Tower table occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TowerDbStats {
    pub records: usize,
    pub buckets: usize,
    pub empty_buckets: usize,
    pub longest_chain: usize,
}

// ============================================================================
// CSV loading
// ============================================================================

/// Parse one OpenCellID-style row:
/// `radio,mcc,net,area,cell,unit,lon,lat,range,samples,changeable,created,updated,averageSignal`
pub fn parse_csv_row(line: &str) -> Result<TowerRecord, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 8 {
        return Err(format!("expected at least 8 columns, found {}", fields.len()));
    }

    let country_code = fields[1]
        .parse::<u16>()
        .map_err(|e| format!("mcc {:?}: {}", fields[1], e))?;
    let operator_code = fields[2]
        .parse::<u16>()
        .map_err(|e| format!("net {:?}: {}", fields[2], e))?;
    let cell_id = fields[4]
        .parse::<u32>()
        .map_err(|e| format!("cell {:?}: {}", fields[4], e))?;
    let longitude = fields[6]
        .parse::<f32>()
        .map_err(|e| format!("lon {:?}: {}", fields[6], e))?;
    let latitude = fields[7]
        .parse::<f32>()
        .map_err(|e| format!("lat {:?}: {}", fields[7], e))?;

    Ok(TowerRecord {
        country_code,
        operator_code,
        cell_id,
        latitude: f64::from(latitude),
        longitude: f64::from(longitude),
    })
}

/// Parse CSV text into records, skipping (and logging) malformed rows.
pub fn parse_csv(contents: &str, has_header: bool) -> Vec<TowerRecord> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for (line_no, line) in contents.lines().enumerate().skip(usize::from(has_header)) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_csv_row(line) {
            Ok(record) => records.push(record),
            Err(reason) => {
                skipped += 1;
                warn!(line = line_no + 1, reason = %reason, "Skipping malformed tower row");
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, accepted = records.len(), "Tower rows skipped");
    }
    records
}

/// Load and freeze a tower table from a CSV file.
pub fn load_csv(path: &Path, has_header: bool) -> Result<TowerDatabase, TowerDbError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| TowerDbError::Io(path.to_path_buf(), e))?;
    let records = parse_csv(&contents, has_header);
    let db = TowerDatabase::from_records(records);
    let stats = db.stats();
    info!(
        path = %path.display(),
        records = stats.records,
        empty_buckets = stats.empty_buckets,
        longest_chain = stats.longest_chain,
        "Tower database loaded"
    );
    if db.is_empty() {
        warn!(path = %path.display(), "Tower database is empty; every lookup will miss");
    }
    debug!(?stats, "Tower table occupancy");
    Ok(db)
}
