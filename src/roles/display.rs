//! Display role
//!
//! Accepts the Router, accumulates tower reports in a seven-slot ring and,
//! on each end-of-batch marker, estimates the device position, records it
//! in the location history, prints a report and appends to the location log.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::AsyncRead;
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::geo::{trilaterate, EstimateError, LocationHistory, PathLossModel};
use crate::location_log::{LocationLog, LogEntry};
use crate::protocol::{read_record, DisplayMessage, DISPLAY_MESSAGE_SIZE};
use crate::roles::{bind_fresh, SocketGuard};
use crate::types::{LocationEstimate, ResolvedObservation, MAX_TOWERS_PER_BATCH};

/// Display startup parameters
#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub listen_path: PathBuf,
    pub location_log: Option<PathBuf>,
    pub model: PathLossModel,
}

// ============================================================================
// Batch accumulation
// ============================================================================

/// Seven slots written in arrival order, wrapping around.
#[derive(Debug, Clone, Default)]
pub struct BatchAccumulator {
    slots: [ResolvedObservation; MAX_TOWERS_PER_BATCH],
    next: usize,
}

impl BatchAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store at the current ring position; returns the slot used.
    pub fn push(&mut self, tower: ResolvedObservation) -> usize {
        let slot = self.next;
        self.slots[slot] = tower;
        self.next = (self.next + 1) % MAX_TOWERS_PER_BATCH;
        slot
    }

    pub fn slots(&self) -> &[ResolvedObservation] {
        &self.slots
    }

    /// Slots holding a reading, with 1-based slot numbers.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &ResolvedObservation)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, t)| t.has_signal())
            .map(|(i, t)| (i + 1, t))
    }

    pub fn next_slot(&self) -> usize {
        self.next
    }

    /// Zero every slot and rewind to slot 0.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// What one completed batch produced
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Occupied slots (1-based) at end of batch
    pub towers: Vec<(usize, ResolvedObservation)>,
    pub estimate: Result<LocationEstimate, EstimateError>,
    /// History after this batch, newest first
    pub history: Vec<LocationEstimate>,
}

// ============================================================================
// Display state
// ============================================================================

/// State that outlives a single Router connection.
pub struct DisplayState {
    history: LocationHistory,
    model: PathLossModel,
    log: Option<LocationLog>,
    batches: u64,
    estimates: u64,
}

impl DisplayState {
    pub fn new(model: PathLossModel) -> Self {
        Self {
            history: LocationHistory::new(),
            model,
            log: None,
            batches: 0,
            estimates: 0,
        }
    }

    pub fn with_log(mut self, log: LocationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn history(&self) -> &LocationHistory {
        &self.history
    }

    /// Close out a batch: estimate, record, report, log.
    pub async fn finish_batch(&mut self, accumulator: &BatchAccumulator) -> BatchReport {
        self.batches += 1;
        let towers: Vec<(usize, ResolvedObservation)> =
            accumulator.occupied().map(|(slot, t)| (slot, *t)).collect();

        let estimate = trilaterate(accumulator.slots(), &self.model);
        match &estimate {
            Ok(location) => {
                self.estimates += 1;
                self.history.record(*location);
                info!(
                    latitude = location.latitude,
                    longitude = location.longitude,
                    towers = towers.len(),
                    "[Display] Location estimated"
                );
            }
            Err(e) => warn!(towers = towers.len(), reason = %e, "[Display] No location for batch"),
        }

        let report = BatchReport {
            towers,
            estimate,
            history: self.history.snapshot(),
        };
        print_report(&report, &self.history);
        self.append_log(&report).await;
        report
    }

    async fn append_log(&mut self, report: &BatchReport) {
        let Some(log) = self.log.as_mut() else {
            return;
        };
        let timestamp = Utc::now();
        let mut entries: Vec<LogEntry> = report
            .towers
            .iter()
            .map(|(slot, tower)| LogEntry::Tower {
                timestamp,
                slot: *slot,
                tower: *tower,
            })
            .collect();
        entries.push(match &report.estimate {
            Ok(location) => LogEntry::Estimate {
                timestamp,
                location: *location,
            },
            Err(e) => LogEntry::NoEstimate {
                timestamp,
                reason: e.to_string(),
            },
        });

        if let Err(e) = log.append(&entries).await {
            error!(path = %log.path().display(), error = %e, "[Display] Failed to write location log");
        }
    }
}

fn print_report(report: &BatchReport, history: &LocationHistory) {
    println!("\nBatch complete, towers:");
    for (slot, t) in &report.towers {
        println!(
            "Tower {slot}: MCC={}, MNC={}, CID={}, level={}, LAT={:.6}, LONG={:.6}",
            t.country_code, t.operator_code, t.cell_id, t.signal_level, t.latitude, t.longitude
        );
    }
    match &report.estimate {
        Ok(location) => println!("\nEstimated device location: {location}"),
        Err(e) => println!("\nNo location estimate: {e}"),
    }
    println!("\nLocation history:");
    for (n, location) in history.reportable() {
        println!("Location {n}: {location}");
    }
}

// ============================================================================
// Server loop
// ============================================================================

pub struct DisplayServer {
    listener: UnixListener,
    state: DisplayState,
    reports: Option<mpsc::UnboundedSender<BatchReport>>,
}

impl DisplayServer {
    pub fn new(listener: UnixListener, state: DisplayState) -> Self {
        Self {
            listener,
            state,
            reports: None,
        }
    }

    /// Also publish every batch report on a channel.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<BatchReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    /// Sequential accept loop; one Router at a time.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(
                        batches = self.state.batches,
                        estimates = self.state.estimates,
                        "[Display] Shutdown signal received"
                    );
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (mut stream, _) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "[Display] Accept failed");
                    continue;
                }
            };
            info!("[Display] Router connected");

            match self.serve_connection(&mut stream, cancel).await {
                Ok(()) => info!("[Display] Router closed the connection"),
                Err(e) => warn!(error = %e, "[Display] Connection ended with error"),
            }
        }
    }

    /// Handle one Router connection. The slot ring starts empty for every
    /// connection; history carries over.
    pub async fn serve_connection<R>(&mut self, stream: &mut R, cancel: &CancellationToken) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut accumulator = BatchAccumulator::new();

        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                record = read_record::<_, DISPLAY_MESSAGE_SIZE>(stream) => record?,
            };
            let Some(record) = record else {
                return Ok(());
            };

            match DisplayMessage::decode(&record) {
                Ok(DisplayMessage::TowerReport(tower)) => {
                    let slot = accumulator.push(tower);
                    println!(
                        "Tower received: MCC={}, MNC={}, CID={}, level={}, LAT={:.6}, LONG={:.6}",
                        tower.country_code,
                        tower.operator_code,
                        tower.cell_id,
                        tower.signal_level,
                        tower.latitude,
                        tower.longitude
                    );
                    debug!(slot, tower = %tower.key(), "[Display] Tower stored");
                }
                Ok(DisplayMessage::EndOfBatch) => {
                    let report = self.state.finish_batch(&accumulator).await;
                    accumulator.clear();
                    if let Some(tx) = &self.reports {
                        let _ = tx.send(report);
                    }
                }
                Err(e) => warn!(error = %e, "[Display] Ignoring record"),
            }
        }
    }
}

/// Bind the Display socket and serve until cancelled.
pub async fn run(settings: DisplaySettings, cancel: CancellationToken) -> Result<()> {
    let mut state = DisplayState::new(settings.model);
    if let Some(path) = &settings.location_log {
        let log = LocationLog::open(path)
            .await
            .with_context(|| format!("Failed to open location log {}", path.display()))?;
        info!(path = %path.display(), "[Display] Appending results to location log");
        state = state.with_log(log);
    }

    let listener = bind_fresh(&settings.listen_path)?;
    let _guard = SocketGuard::new(&settings.listen_path);
    info!(socket = %settings.listen_path.display(), "[Display] Listening for Router");

    DisplayServer::new(listener, state).run(&cancel).await
}
