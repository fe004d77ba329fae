//! Reader role
//!
//! Polls the modem for its cell environment, parses the reply into a batch
//! and announces it to the Router. A modem that does not answer only costs
//! one cycle; losing the Router ends the process.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acquisition::{parse_ceng_bytes, BoxedModemIo, ModemClient, ModemError};
use crate::config::defaults::ROUTER_CONNECT_RETRY_MS;
use crate::protocol::{encode_batch, write_record};
use crate::types::ObservationBatch;

/// Where the modem lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEndpoint {
    /// Serial device node
    Device(PathBuf),
    /// Unix socket served by `modem-sim`
    Socket(PathBuf),
}

/// Reader startup parameters
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub modem: ModemEndpoint,
    pub router_path: PathBuf,
    pub init_command: String,
    pub poll_command: String,
    pub response_timeout: Duration,
    pub poll_interval: Duration,
    pub max_response_bytes: usize,
}

/// Reader counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReaderStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub batches_sent: u64,
    pub towers_sent: u64,
}

pub struct Reader<M, W> {
    modem: ModemClient<M>,
    router: W,
    poll_command: String,
    poll_interval: Duration,
    stats: ReaderStats,
}

impl<M, W> Reader<M, W>
where
    M: AsyncRead + AsyncWrite + Unpin + Send,
    W: AsyncWrite + Unpin,
{
    pub fn new(modem: ModemClient<M>, router: W, poll_command: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            modem,
            router,
            poll_command: poll_command.into(),
            poll_interval,
            stats: ReaderStats::default(),
        }
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Query the modem once and parse whatever came back.
    pub async fn poll_modem(&mut self) -> Result<ObservationBatch, ModemError> {
        let response = self.modem.query(&self.poll_command).await?;
        let batch = parse_ceng_bytes(&response);
        info!(towers = batch.len(), "[Reader] Parsed modem response");
        for (i, tower) in batch.iter().enumerate() {
            debug!(
                n = i + 1,
                tower = %tower.key(),
                lac = ?tower.region_code,
                signal_level = tower.signal_level,
                "Tower"
            );
        }
        Ok(batch)
    }

    /// Send one batch announcement to the Router.
    pub async fn announce(&mut self, batch: &ObservationBatch) -> std::io::Result<()> {
        write_record(&mut self.router, &encode_batch(batch)).await?;
        self.stats.batches_sent += 1;
        self.stats.towers_sent += batch.len() as u64;
        Ok(())
    }

    /// One poll cycle. Modem failures are logged; Router failures returned.
    pub async fn cycle(&mut self) -> Result<()> {
        self.stats.cycles += 1;
        match self.poll_modem().await {
            Ok(batch) => self
                .announce(&batch)
                .await
                .context("Failed to send batch to router"),
            Err(ModemError::Closed) => Err(anyhow::Error::new(ModemError::Closed).context("Modem stream ended")),
            Err(e) => {
                self.stats.failed_cycles += 1;
                warn!(error = %e, "[Reader] Poll cycle failed");
                Ok(())
            }
        }
    }

    /// Poll until cancelled or the Router goes away.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.cycle() => result?,
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(
            cycles = self.stats.cycles,
            failed = self.stats.failed_cycles,
            batches = self.stats.batches_sent,
            "[Reader] Stopped"
        );
        Ok(())
    }
}

/// Send the init command and discard whatever the modem answers.
pub async fn initialise_modem<M>(modem: &mut ModemClient<M>, command: &str) -> Result<(), ModemError>
where
    M: AsyncRead + AsyncWrite + Unpin + Send,
{
    if command.trim().is_empty() {
        return Ok(());
    }
    match modem.query(command).await {
        Ok(_) | Err(ModemError::Timeout | ModemError::EmptyResponse) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Connect to the Router, retrying every second until it answers or the
/// token is cancelled.
pub async fn connect_router(path: &std::path::Path, cancel: &CancellationToken) -> Option<UnixStream> {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match UnixStream::connect(path).await {
            Ok(stream) => {
                info!(socket = %path.display(), attempt, "[Reader] Connected to router");
                return Some(stream);
            }
            Err(e) => {
                warn!(socket = %path.display(), attempt, error = %e, "[Reader] Router not reachable, retrying in 1s");
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(Duration::from_millis(ROUTER_CONNECT_RETRY_MS)) => {}
        }
    }
}

async fn open_modem(endpoint: &ModemEndpoint) -> Result<ModemClient<BoxedModemIo>, ModemError> {
    match endpoint {
        ModemEndpoint::Device(path) => ModemClient::open_device(path).await,
        ModemEndpoint::Socket(path) => ModemClient::connect_socket(path).await,
    }
}

/// Open the modem, initialise it, connect to the Router and poll.
pub async fn run(settings: ReaderSettings, cancel: CancellationToken) -> Result<()> {
    let modem = open_modem(&settings.modem)
        .await
        .with_context(|| format!("Failed to open modem {:?}", settings.modem))?;
    let mut modem = modem
        .with_response_timeout(settings.response_timeout)
        .with_max_response_bytes(settings.max_response_bytes);

    initialise_modem(&mut modem, &settings.init_command)
        .await
        .context("Modem initialisation failed")?;
    info!("[Reader] Modem engineering mode enabled");

    let Some(router) = connect_router(&settings.router_path, &cancel).await else {
        return Ok(());
    };

    Reader::new(modem, router, settings.poll_command, settings.poll_interval)
        .run(&cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_batch, read_record, BATCH_ANNOUNCEMENT_SIZE};
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    const RESPONSE: &[u8] = b"\r\n+CENG: 0,\"0034,40,00,250,01,40,03e8,01,05,6d07,255\"\r\n\
+CENG: 1,\"0044,35,21,07d0,250,01,6d07\"\r\n\
+CENG: 2,\"0051,30,17,ffff,250,01,ffff\"\r\n\r\nOK\r\n";

    #[tokio::test]
    async fn test_cycle_announces_parsed_batch() {
        let modem = Builder::new().write(b"AT+CENG?\r").read(RESPONSE).build();
        let (router_tx, mut router_rx) = tokio::io::duplex(1024);
        let mut reader = Reader::new(ModemClient::new(modem), router_tx, "AT+CENG?\r", Duration::from_secs(5));

        reader.cycle().await.expect("cycle");

        let record = read_record::<_, BATCH_ANNOUNCEMENT_SIZE>(&mut router_rx)
            .await
            .expect("read")
            .expect("record");
        let batch = decode_batch(&record).expect("decode");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.as_slice()[0].cell_id, 0x03e8);
        assert_eq!(batch.as_slice()[0].signal_level, 40);
        assert_eq!(batch.as_slice()[1].cell_id, 0x07d0);
        assert_eq!(reader.stats().towers_sent, 2);
    }

    #[tokio::test]
    async fn test_modem_timeout_fails_cycle_only() {
        let (modem_io, mut modem_side) = tokio::io::duplex(256);
        let (router_tx, _router_rx) = tokio::io::duplex(1024);
        let modem = ModemClient::new(modem_io).with_response_timeout(Duration::from_millis(20));
        let mut reader = Reader::new(modem, router_tx, "AT+CENG?\r", Duration::from_secs(5));

        reader.cycle().await.expect("timeout is not fatal");
        assert_eq!(reader.stats().failed_cycles, 1);
        assert_eq!(reader.stats().batches_sent, 0);

        // The command still reached the modem.
        let mut sent = [0u8; 9];
        tokio::io::AsyncReadExt::read_exact(&mut modem_side, &mut sent).await.expect("command");
        assert_eq!(&sent, b"AT+CENG?\r");
    }

    #[tokio::test]
    async fn test_lost_router_is_fatal() {
        let modem = Builder::new().write(b"AT+CENG?\r").read(RESPONSE).build();
        let (router_tx, router_rx) = tokio::io::duplex(1024);
        drop(router_rx);
        let mut reader = Reader::new(ModemClient::new(modem), router_tx, "AT+CENG?\r", Duration::from_secs(5));
        assert!(reader.cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_init_ignores_silent_modem() {
        let (modem_io, mut modem_side) = tokio::io::duplex(256);
        let mut modem = ModemClient::new(modem_io).with_response_timeout(Duration::from_millis(10));
        initialise_modem(&mut modem, "AT+CENG=1,1\r").await.expect("init");
        modem_side.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn test_connect_router_gives_up_on_cancel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(connect_router(&dir.path().join("missing.sock"), &cancel).await.is_none());
    }
}
