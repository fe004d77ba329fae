//! Append-only JSON-lines log of Display results
//!
//! One line per tower in a completed batch, then one line for the estimate
//! (or the reason there is none). Consumers such as a map front-end tail
//! the file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::types::{LocationEstimate, ResolvedObservation};

/// One line of the location log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Tower {
        timestamp: DateTime<Utc>,
        /// 1-based accumulation slot
        slot: usize,
        tower: ResolvedObservation,
    },
    Estimate {
        timestamp: DateTime<Utc>,
        location: LocationEstimate,
    },
    NoEstimate {
        timestamp: DateTime<Utc>,
        reason: String,
    },
}

/// Open handle on the log file.
pub struct LocationLog {
    path: PathBuf,
    file: File,
}

impl LocationLog {
    /// Open for appending, creating the file if needed.
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a batch worth of entries and flush.
    pub async fn append(&mut self, entries: &[LogEntry]) -> std::io::Result<()> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }
        self.file.write_all(&buf).await?;
        self.file.flush().await
    }
}
