//! SIM800 Modem Simulation
//!
//! Serves a fake GSM modem on a Unix socket for exercising the Reader
//! without hardware. The simulated handset sits at a configurable position
//! and wanders by a small random step on every poll.
//!
//! - `AT+CENG?` is answered with the seven nearest towers from the tower
//!   CSV: the nearest as the serving cell, the rest as neighbours, with a
//!   receive level that falls off with distance plus noise
//! - `AT+CENG=1,1` and plain `AT` are answered with `OK`
//! - anything else gets `ERROR`
//!
//! # Usage
//! ```bash
//! ./modem-sim --db 250.csv --socket /tmp/modem_socket &
//! ./cell-locator reader --modem-socket /tmp/modem_socket
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use cell_locator::tower_db::parse_csv;
use cell_locator::types::{TowerRecord, MAX_TOWERS_PER_BATCH};

// ============================================================================
// Constants
// ============================================================================

/// Default handset latitude (Moscow centre)
const DEFAULT_LATITUDE: f64 = 55.751244;
/// Default handset longitude (Moscow centre)
const DEFAULT_LONGITUDE: f64 = 37.618423;
/// Metres per degree, good enough at city scale
const METRES_PER_DEGREE: f64 = 111_000.0;
/// Strongest receive level a SIM800 reports
const MAX_RXL: f64 = 63.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "modem-sim")]
#[command(about = "SIM800 modem simulation for cell-locator testing")]
#[command(version = "1.0")]
struct Args {
    /// Unix socket to serve the modem on
    #[arg(long, default_value = "/tmp/modem_socket")]
    socket: PathBuf,

    /// Tower CSV (OpenCellID layout)
    #[arg(long, default_value = "250.csv")]
    db: PathBuf,

    /// The CSV has no header row
    #[arg(long)]
    no_header: bool,

    /// Starting handset latitude
    #[arg(long, default_value_t = DEFAULT_LATITUDE)]
    lat: f64,

    /// Starting handset longitude
    #[arg(long, default_value_t = DEFAULT_LONGITUDE)]
    lon: f64,

    /// Standard deviation of the per-poll position step (degrees)
    #[arg(long, default_value_t = 0.0005)]
    walk: f64,

    /// Standard deviation of receive-level noise
    #[arg(long, default_value_t = 2.0)]
    noise: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Simulated modem
// ============================================================================

struct SimModem {
    towers: Vec<TowerRecord>,
    latitude: f64,
    longitude: f64,
    rng: StdRng,
    step: Normal<f64>,
    level_noise: Normal<f64>,
}

impl SimModem {
    fn new(towers: Vec<TowerRecord>, args: &Args) -> Result<Self> {
        let rng = match args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            towers,
            latitude: args.lat,
            longitude: args.lon,
            rng,
            step: Normal::new(0.0, args.walk.max(0.0)).context("Invalid --walk")?,
            level_noise: Normal::new(0.0, args.noise.max(0.0)).context("Invalid --noise")?,
        })
    }

    fn respond(&mut self, command: &str) -> String {
        match command {
            "AT+CENG?" => self.cell_environment(),
            "AT" | "AT+CENG=1,1" => "\r\nOK\r\n".to_string(),
            _ => "\r\nERROR\r\n".to_string(),
        }
    }

    fn cell_environment(&mut self) -> String {
        self.latitude += self.step.sample(&mut self.rng);
        self.longitude += self.step.sample(&mut self.rng);

        let mut nearest: Vec<(f64, &TowerRecord)> = self
            .towers
            .iter()
            .map(|t| {
                let d = (t.latitude - self.latitude).hypot(t.longitude - self.longitude);
                (d * METRES_PER_DEGREE, t)
            })
            .collect();
        nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearest.truncate(MAX_TOWERS_PER_BATCH);

        let mut out = String::from("\r\n");
        for (i, (metres, tower)) in nearest.into_iter().enumerate() {
            let rxl = receive_level(metres, self.level_noise.sample(&mut self.rng));
            let line = if i == 0 {
                format!(
                    "+CENG: {i},\"0034,{rxl},00,{},{:02},40,{:04x},01,05,6d07,255\"",
                    tower.country_code, tower.operator_code, tower.cell_id
                )
            } else {
                format!(
                    "+CENG: {i},\"0072,{rxl},44,{:04x},{},{:02},6d07\"",
                    tower.cell_id, tower.country_code, tower.operator_code
                )
            };
            out.push_str(&line);
            out.push_str("\r\n");
        }
        out.push_str("\r\nOK\r\n");
        debug!(
            latitude = self.latitude,
            longitude = self.longitude,
            "Answered cell environment query"
        );
        out
    }
}

/// Receive level falling off with distance, clamped to 1..=63.
fn receive_level(metres: f64, noise: f64) -> i32 {
    let level = MAX_RXL - 20.0 * (1.0 + metres / 100.0).log10() + noise;
    // Clamped to the rxl range, so the cast cannot overflow.
    level.round().clamp(1.0, MAX_RXL) as i32
}

async fn serve_client(mut stream: UnixStream, modem: Arc<Mutex<SimModem>>) -> Result<()> {
    let mut pending = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);

        while let Some(end) = pending.iter().position(|&b| b == b'\r' || b == b'\n') {
            let line: Vec<u8> = pending.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line).trim().to_string();
            if command.is_empty() {
                continue;
            }
            info!(command = %command, "Command received");
            let response = modem.lock().await.respond(&command);
            stream.write_all(response.as_bytes()).await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let contents = std::fs::read_to_string(&args.db)
        .with_context(|| format!("Failed to read {}", args.db.display()))?;
    let towers = parse_csv(&contents, !args.no_header);
    if towers.is_empty() {
        warn!(db = %args.db.display(), "No towers loaded; every query will list none");
    }
    info!(towers = towers.len(), lat = args.lat, lon = args.lon, "Modem simulation ready");
    let modem = Arc::new(Mutex::new(SimModem::new(towers, &args)?));

    let _ = std::fs::remove_file(&args.socket);
    let listener = UnixListener::bind(&args.socket)
        .with_context(|| format!("Failed to bind {}", args.socket.display()))?;
    info!(socket = %args.socket.display(), "Listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                info!("Client connected");
                let modem = Arc::clone(&modem);
                tokio::spawn(async move {
                    if let Err(e) = serve_client(stream, modem).await {
                        warn!(error = %e, "Client session failed");
                    }
                });
            }
        }
    }

    let _ = std::fs::remove_file(&args.socket);
    Ok(())
}
