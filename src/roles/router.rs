//! Router role
//!
//! Owns the tower database. Accepts one Reader at a time, resolves every
//! tower of each batch announcement to coordinates and forwards the result
//! to the Display, followed by an end-of-batch marker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncRead;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::protocol::{decode_batch, read_record, DisplayMessage, BATCH_ANNOUNCEMENT_SIZE};
use crate::roles::{bind_fresh, SocketGuard};
use crate::tower_db::{self, TowerDatabase};
use crate::transport::{Connector, DisplayLink, LinkError, RetryPolicy, UnixConnector};
use crate::types::{ObservationBatch, ResolvedObservation};

/// Router startup parameters
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub listen_path: PathBuf,
    pub display_path: PathBuf,
    pub database_path: PathBuf,
    pub has_header: bool,
    pub retry: RetryPolicy,
}

/// Router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RouterStats {
    pub readers_served: u64,
    pub batches_received: u64,
    pub batches_abandoned: u64,
    pub towers_resolved: u64,
    pub lookup_misses: u64,
}

/// Result of forwarding one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forwarded {
    pub towers: usize,
    pub misses: usize,
}

pub struct Router<C: Connector> {
    database: Arc<TowerDatabase>,
    link: DisplayLink<C>,
    stats: RouterStats,
}

impl<C: Connector> Router<C> {
    pub fn new(database: Arc<TowerDatabase>, link: DisplayLink<C>) -> Self {
        Self {
            database,
            link,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn link(&self) -> &DisplayLink<C> {
        &self.link
    }

    /// Connect to the Display. Failing here is fatal for the process.
    pub async fn connect_display(&mut self) -> Result<(), LinkError> {
        self.link.connect().await
    }

    /// Resolve and forward one batch, then mark its end.
    ///
    /// If the link cannot be recovered the rest of the batch, end marker
    /// included, is abandoned and the error returned.
    pub async fn forward_batch(&mut self, batch: &ObservationBatch) -> Result<Forwarded, LinkError> {
        let mut misses = 0;

        for observation in batch {
            let record = self.database.lookup(observation.key());
            if record.is_none() {
                misses += 1;
                self.stats.lookup_misses += 1;
                info!(tower = %observation.key(), "Tower not found in database");
            }
            let resolved = ResolvedObservation::resolve(observation, record);
            debug!(
                tower = %resolved.key(),
                signal_level = resolved.signal_level,
                latitude = resolved.latitude,
                longitude = resolved.longitude,
                "Forwarding tower"
            );
            self.link.send(&DisplayMessage::TowerReport(resolved)).await?;
            self.stats.towers_resolved += 1;
        }

        self.link.send(&DisplayMessage::EndOfBatch).await?;
        Ok(Forwarded {
            towers: batch.len(),
            misses,
        })
    }

    /// Handle batches from one Reader until it disconnects or cancellation.
    ///
    /// A clean close returns `Ok`; read and decode failures end the session
    /// with an error the accept loop logs.
    pub async fn serve_reader<R>(&mut self, reader: &mut R, cancel: &CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                record = read_record::<_, BATCH_ANNOUNCEMENT_SIZE>(reader) => record,
            };

            let Some(record) = record.context("Failed to read batch announcement")? else {
                info!("[Router] Reader closed the connection");
                return Ok(());
            };

            let batch = decode_batch(&record).context("Malformed batch announcement")?;
            self.stats.batches_received += 1;
            info!(towers = batch.len(), "[Router] Batch received");

            match self.forward_batch(&batch).await {
                Ok(forwarded) => debug!(towers = forwarded.towers, misses = forwarded.misses, "Batch forwarded"),
                Err(e) => {
                    self.stats.batches_abandoned += 1;
                    error!(error = %e, "[Router] Abandoning batch, display unavailable");
                }
            }
        }
    }

    /// Sequential accept loop.
    pub async fn run(&mut self, listener: &UnixListener, cancel: &CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Router] Shutdown signal received");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (mut stream, _) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "[Router] Accept failed");
                    continue;
                }
            };
            self.stats.readers_served += 1;
            info!("[Router] Reader connected");

            if let Err(e) = self.serve_reader(&mut stream, cancel).await {
                warn!(error = %format!("{e:#}"), "[Router] Reader session ended with error");
            }
        }
    }
}

/// Load the database, connect to the Display, then serve Readers.
pub async fn run(settings: RouterSettings, cancel: CancellationToken) -> Result<()> {
    let database = load_database(&settings.database_path, settings.has_header)?;

    let link = DisplayLink::new(UnixConnector::new(&settings.display_path), settings.retry);
    let mut router = Router::new(Arc::new(database), link);
    router
        .connect_display()
        .await
        .with_context(|| format!("Cannot reach display at {}", settings.display_path.display()))?;

    let listener = bind_fresh(&settings.listen_path)?;
    let _guard = SocketGuard::new(&settings.listen_path);
    info!(socket = %settings.listen_path.display(), "[Router] Listening for Reader");

    router.run(&listener, &cancel).await?;

    let stats = router.stats();
    info!(
        readers = stats.readers_served,
        batches = stats.batches_received,
        abandoned = stats.batches_abandoned,
        misses = stats.lookup_misses,
        "[Router] Stopped"
    );
    Ok(())
}

fn load_database(path: &Path, has_header: bool) -> Result<TowerDatabase> {
    let database = tower_db::load_csv(path, has_header)
        .with_context(|| format!("Failed to load tower database {}", path.display()))?;
    let stats = database.stats();
    info!(
        records = stats.records,
        empty_buckets = stats.empty_buckets,
        longest_chain = stats.longest_chain,
        "[Router] Tower database ready"
    );
    Ok(database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_batch, write_record, DISPLAY_MESSAGE_SIZE};
    use crate::types::{TowerObservation, TowerRecord};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    /// Hands out duplex pipes; the far ends go to the test.
    struct PipeConnector {
        peers: mpsc::UnboundedSender<DuplexStream>,
    }

    #[async_trait]
    impl Connector for PipeConnector {
        type Stream = DuplexStream;

        async fn connect(&mut self) -> std::io::Result<DuplexStream> {
            let (near, far) = tokio::io::duplex(4096);
            self.peers
                .send(far)
                .map_err(|_| std::io::Error::from(std::io::ErrorKind::ConnectionRefused))?;
            Ok(near)
        }

        fn endpoint(&self) -> String {
            "pipe".to_string()
        }
    }

    fn database() -> Arc<TowerDatabase> {
        Arc::new(TowerDatabase::from_records(vec![TowerRecord {
            country_code: 250,
            operator_code: 1,
            cell_id: 1000,
            latitude: 55.75,
            longitude: 37.62,
        }]))
    }

    fn observation(cell_id: u32, signal_level: i32) -> TowerObservation {
        TowerObservation {
            country_code: 250,
            operator_code: 1,
            cell_id,
            region_code: None,
            signal_level,
        }
    }

    async fn router() -> (Router<PipeConnector>, DuplexStream) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = DisplayLink::new(
            PipeConnector { peers: tx },
            RetryPolicy {
                max_attempts: 1,
                delay: Duration::from_millis(1),
            },
        );
        let mut router = Router::new(database(), link);
        router.connect_display().await.expect("connect");
        let display = rx.recv().await.expect("display side");
        (router, display)
    }

    async fn next_message(display: &mut DuplexStream) -> DisplayMessage {
        let record = read_record::<_, DISPLAY_MESSAGE_SIZE>(display)
            .await
            .expect("read")
            .expect("record");
        DisplayMessage::decode(&record).expect("decode")
    }

    #[tokio::test]
    async fn test_batch_resolved_in_order_with_sentinel_for_misses() {
        let (mut router, mut display) = router().await;
        let mut batch = ObservationBatch::new();
        batch.push(observation(1000, -60)).expect("room");
        batch.push(observation(2000, -70)).expect("room");
        batch.push(observation(3000, -80)).expect("room");

        let forwarded = router.forward_batch(&batch).await.expect("forward");
        assert_eq!(forwarded, Forwarded { towers: 3, misses: 2 });

        let DisplayMessage::TowerReport(first) = next_message(&mut display).await else {
            panic!("expected tower report");
        };
        assert_eq!(first.cell_id, 1000);
        assert!((first.latitude - 55.75).abs() < 1e-5);
        assert!((first.longitude - 37.62).abs() < 1e-5);

        for expected in [2000, 3000] {
            let DisplayMessage::TowerReport(miss) = next_message(&mut display).await else {
                panic!("expected tower report");
            };
            assert_eq!(miss.cell_id, expected);
            assert!(miss.is_unresolved());
        }
        assert_eq!(next_message(&mut display).await, DisplayMessage::EndOfBatch);
        assert_eq!(router.stats().lookup_misses, 2);
    }

    #[tokio::test]
    async fn test_empty_batch_still_ends() {
        let (mut router, mut display) = router().await;
        router.forward_batch(&ObservationBatch::new()).await.expect("forward");
        assert_eq!(next_message(&mut display).await, DisplayMessage::EndOfBatch);
    }

    #[tokio::test]
    async fn test_serve_reader_until_clean_close() {
        let (mut router, mut display) = router().await;
        let (mut reader_side, mut router_side) = tokio::io::duplex(1024);

        let mut batch = ObservationBatch::new();
        batch.push(observation(1000, -60)).expect("room");
        write_record(&mut reader_side, &encode_batch(&batch)).await.expect("write");
        write_record(&mut reader_side, &encode_batch(&batch)).await.expect("write");
        drop(reader_side);

        router
            .serve_reader(&mut router_side, &CancellationToken::new())
            .await
            .expect("clean close");
        assert_eq!(router.stats().batches_received, 2);

        for _ in 0..2 {
            assert!(matches!(next_message(&mut display).await, DisplayMessage::TowerReport(_)));
            assert_eq!(next_message(&mut display).await, DisplayMessage::EndOfBatch);
        }
    }

    #[tokio::test]
    async fn test_malformed_announcement_ends_session() {
        let (mut router, _display) = router().await;
        let (mut reader_side, mut router_side) = tokio::io::duplex(1024);
        let mut record = [0u8; BATCH_ANNOUNCEMENT_SIZE];
        record[0] = 9;
        write_record(&mut reader_side, &record).await.expect("write");

        let result = router.serve_reader(&mut router_side, &CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(router.stats().batches_received, 0);
    }
}
