//! Router → Display link with bounded reconnection
//!
//! The link is a small state machine:
//!
//! ```text
//!   Disconnected ──connect ok──▶ Connected
//!        ▲                          │ broken pipe / reset on send
//!        │ all attempts failed      ▼
//!        └────────────────── Reconnecting(attempt 1..=max)
//! ```
//!
//! A record whose send hits a broken pipe is re-sent once the link is back.
//! If the reconnect cycle is exhausted the record is dropped and the link
//! stays `Disconnected`; the next send starts a fresh cycle at attempt 1.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};

use crate::protocol::{write_record, DisplayMessage};

/// Default connect attempts per cycle.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default pause between failed connect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Display link errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Display unreachable after {attempts} connection attempts")]
    Exhausted { attempts: u32 },

    #[error("Display send failed: {0}")]
    Io(#[from] io::Error),
}

/// Opens streams toward the Display process.
#[async_trait]
pub trait Connector: Send {
    type Stream: AsyncWrite + Unpin + Send;

    async fn connect(&mut self) -> io::Result<Self::Stream>;

    /// Human-readable endpoint for logging.
    fn endpoint(&self) -> String;
}

/// Connects to a Unix stream socket path.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Connector for UnixConnector {
    type Stream = UnixStream;

    async fn connect(&mut self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.path).await
    }

    fn endpoint(&self) -> String {
        self.path.display().to_string()
    }
}

/// Connect attempts per cycle and the pause between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Where the link currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
}

/// How a record reached the Display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written on the existing connection.
    Sent,
    /// Written after reconnecting; `attempts` connects were needed.
    Resent { attempts: u32 },
}

/// Send errors that warrant a reconnect.
pub fn is_recoverable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

/// Display link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LinkStats {
    pub records_sent: u64,
    pub records_resent: u64,
    pub records_dropped: u64,
    pub reconnections: u64,
}

/// Outbound link to the Display process.
pub struct DisplayLink<C: Connector> {
    connector: C,
    stream: Option<C::Stream>,
    state: LinkState,
    policy: RetryPolicy,
    stats: LinkStats,
}

impl<C: Connector> DisplayLink<C> {
    pub fn new(connector: C, policy: RetryPolicy) -> Self {
        Self {
            connector,
            stream: None,
            state: LinkState::Disconnected,
            policy,
            stats: LinkStats::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Startup connection. Exhaustion here is fatal for the caller.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        if self.state == LinkState::Connected {
            return Ok(());
        }
        let attempts = self.run_connect_cycle().await?;
        info!(
            endpoint = %self.connector.endpoint(),
            attempts,
            "Connected to display socket"
        );
        Ok(())
    }

    /// Deliver one record, reconnecting once on a broken link.
    pub async fn send(&mut self, message: &DisplayMessage) -> Result<Delivery, LinkError> {
        let record = message.encode();

        if self.state != LinkState::Connected {
            let attempts = self.reconnect_or_drop().await?;
            return self.write_after_reconnect(&record, attempts).await;
        }

        match self.write(&record).await {
            Ok(()) => {
                self.stats.records_sent += 1;
                Ok(Delivery::Sent)
            }
            Err(e) if is_recoverable(&e) => {
                warn!(error = %e, "Broken display link, attempting to reconnect");
                let attempts = self.reconnect_or_drop().await?;
                self.write_after_reconnect(&record, attempts).await
            }
            Err(e) => {
                error!(error = %e, "Failed to send to display");
                self.mark_disconnected();
                self.record_dropped();
                Err(LinkError::Io(e))
            }
        }
    }

    /// Drop the current stream, leaving the link disconnected.
    pub fn close(&mut self) {
        self.mark_disconnected();
    }

    async fn write_after_reconnect(&mut self, record: &[u8], attempts: u32) -> Result<Delivery, LinkError> {
        match self.write(record).await {
            Ok(()) => {
                self.stats.records_resent += 1;
                info!(attempts, "Resent record to display after reconnection");
                Ok(Delivery::Resent { attempts })
            }
            Err(e) => {
                error!(error = %e, "Failed to resend record to display after reconnection");
                self.mark_disconnected();
                self.record_dropped();
                Err(LinkError::Io(e))
            }
        }
    }

    async fn write(&mut self, record: &[u8]) -> io::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
        write_record(stream, record).await
    }

    async fn reconnect_or_drop(&mut self) -> Result<u32, LinkError> {
        match self.reconnect().await {
            Ok(attempts) => Ok(attempts),
            Err(e) => {
                self.record_dropped();
                Err(e)
            }
        }
    }

    async fn reconnect(&mut self) -> Result<u32, LinkError> {
        self.mark_disconnected();
        let attempts = self.run_connect_cycle().await?;
        self.stats.reconnections += 1;
        info!(
            endpoint = %self.connector.endpoint(),
            attempts,
            total_reconnections = self.stats.reconnections,
            "Reconnected to display socket"
        );
        Ok(attempts)
    }

    /// One bounded cycle of connect attempts. The attempt count starts at 1
    /// on every call.
    async fn run_connect_cycle(&mut self) -> Result<u32, LinkError> {
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            self.state = LinkState::Reconnecting { attempt };
            match self.connector.connect().await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    self.state = LinkState::Connected;
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.connector.endpoint(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Display connection attempt failed"
                    );
                    if attempt < max_attempts {
                        debug!(delay_ms = self.policy.delay.as_millis() as u64, "Retrying display connection");
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        self.state = LinkState::Disconnected;
        error!(
            endpoint = %self.connector.endpoint(),
            max_attempts,
            "Display connection exhausted, all attempts failed"
        );
        Err(LinkError::Exhausted {
            attempts: max_attempts,
        })
    }

    fn mark_disconnected(&mut self) {
        self.stream = None;
        self.state = LinkState::Disconnected;
    }

    fn record_dropped(&mut self) {
        self.stats.records_dropped += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{read_record, DISPLAY_MESSAGE_SIZE};
    use crate::types::ResolvedObservation;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    /// Connector whose outcomes are scripted; accepted peers are handed to
    /// the test through a channel.
    struct ScriptedConnector {
        outcomes: Arc<std::sync::Mutex<VecDeque<bool>>>,
        peers: mpsc::UnboundedSender<DuplexStream>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        type Stream = DuplexStream;

        async fn connect(&mut self) -> io::Result<DuplexStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let accept = self
                .outcomes
                .lock()
                .map(|mut o| o.pop_front().unwrap_or(false))
                .unwrap_or(false);
            if !accept {
                return Err(io::ErrorKind::ConnectionRefused.into());
            }
            let (client, server) = tokio::io::duplex(1024);
            let _ = self.peers.send(server);
            Ok(client)
        }

        fn endpoint(&self) -> String {
            "scripted".to_string()
        }
    }

    struct Harness {
        link: DisplayLink<ScriptedConnector>,
        outcomes: Arc<std::sync::Mutex<VecDeque<bool>>>,
        peers: mpsc::UnboundedReceiver<DuplexStream>,
        calls: Arc<AtomicU32>,
    }

    impl Harness {
        fn new() -> Self {
            let outcomes = Arc::new(std::sync::Mutex::new(VecDeque::new()));
            let calls = Arc::new(AtomicU32::new(0));
            let (tx, rx) = mpsc::unbounded_channel();
            let connector = ScriptedConnector {
                outcomes: Arc::clone(&outcomes),
                peers: tx,
                calls: Arc::clone(&calls),
            };
            let policy = RetryPolicy {
                max_attempts: 5,
                delay: Duration::from_millis(1),
            };
            Self {
                link: DisplayLink::new(connector, policy),
                outcomes,
                peers: rx,
                calls,
            }
        }

        fn script(&self, outcomes: &[bool]) {
            self.outcomes.lock().expect("script lock").extend(outcomes.iter().copied());
        }
    }

    fn report() -> DisplayMessage {
        DisplayMessage::TowerReport(ResolvedObservation {
            country_code: 250,
            operator_code: 1,
            cell_id: 1000,
            signal_level: -70,
            latitude: 0.0,
            longitude: 0.0,
        })
    }

    async fn drain(mut peer: DuplexStream) -> Vec<DisplayMessage> {
        let mut messages = Vec::new();
        while let Some(record) = read_record::<_, DISPLAY_MESSAGE_SIZE>(&mut peer).await.expect("read") {
            messages.push(DisplayMessage::decode(&record).expect("decode"));
        }
        messages
    }

    #[tokio::test]
    async fn test_broken_pipe_resends_exactly_once() {
        let mut h = Harness::new();
        h.script(&[true]);
        h.link.connect().await.expect("initial connect");
        let first_peer = h.peers.recv().await.expect("first peer");

        // Display goes away; attempts 1 and 2 fail, attempt 3 succeeds.
        drop(first_peer);
        h.script(&[false, false, true]);

        let delivery = h.link.send(&report()).await.expect("delivered");
        assert_eq!(delivery, Delivery::Resent { attempts: 3 });
        assert_eq!(h.link.state(), LinkState::Connected);
        assert_eq!(h.calls.load(Ordering::SeqCst), 4);

        let second_peer = h.peers.recv().await.expect("second peer");
        h.link.close();
        let received = drain(second_peer).await;
        assert_eq!(received, vec![report()]);

        let stats = h.link.stats();
        assert_eq!(stats.records_resent, 1);
        assert_eq!(stats.reconnections, 1);
        assert_eq!(stats.records_dropped, 0);
    }

    #[tokio::test]
    async fn test_exhaustion_drops_record_then_recovers() {
        let mut h = Harness::new();
        h.script(&[true]);
        h.link.connect().await.expect("initial connect");
        drop(h.peers.recv().await);

        h.script(&[false; 5]);
        let err = h.link.send(&report()).await.expect_err("exhausted");
        assert!(matches!(err, LinkError::Exhausted { attempts: 5 }));
        assert_eq!(h.link.state(), LinkState::Disconnected);
        assert_eq!(h.link.stats().records_dropped, 1);

        // A later record starts a new cycle from attempt 1.
        h.script(&[true]);
        let delivery = h.link.send(&DisplayMessage::EndOfBatch).await.expect("recovered");
        assert_eq!(delivery, Delivery::Resent { attempts: 1 });
        let peer = h.peers.recv().await.expect("peer");
        h.link.close();
        assert_eq!(drain(peer).await, vec![DisplayMessage::EndOfBatch]);
    }

    #[tokio::test]
    async fn test_initial_connect_is_bounded() {
        let mut h = Harness::new();
        h.script(&[false; 5]);
        assert!(matches!(
            h.link.connect().await,
            Err(LinkError::Exhausted { attempts: 5 })
        ));
        assert_eq!(h.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_healthy_link_sends_in_order() {
        let mut h = Harness::new();
        h.script(&[true]);
        h.link.connect().await.expect("connect");
        let peer = h.peers.recv().await.expect("peer");

        assert_eq!(h.link.send(&report()).await.expect("send"), Delivery::Sent);
        assert_eq!(h.link.send(&DisplayMessage::EndOfBatch).await.expect("send"), Delivery::Sent);
        h.link.close();
        assert_eq!(drain(peer).await, vec![report(), DisplayMessage::EndOfBatch]);
        assert_eq!(h.link.stats().records_sent, 2);
    }

    #[tokio::test]
    async fn test_unix_socket_broken_pipe_is_recoverable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("display.sock");
        let listener = tokio::net::UnixListener::bind(&path).expect("bind");

        let mut link = DisplayLink::new(
            UnixConnector::new(&path),
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(5),
            },
        );
        link.connect().await.expect("connect");
        let (first, _) = listener.accept().await.expect("accept");
        drop(first);

        let accept_again = tokio::spawn(async move {
            let (mut second, _) = listener.accept().await.expect("accept again");
            read_record::<_, DISPLAY_MESSAGE_SIZE>(&mut second).await.expect("read")
        });

        // The first write may land in the socket buffer before the peer
        // close is observed; keep sending until the link reconnects.
        let mut delivery = link.send(&report()).await.expect("send");
        for _ in 0..10 {
            if matches!(delivery, Delivery::Resent { .. }) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            delivery = link.send(&report()).await.expect("send");
        }
        assert!(matches!(delivery, Delivery::Resent { .. }));

        let record = accept_again.await.expect("join").expect("record");
        assert_eq!(DisplayMessage::decode(&record), Ok(report()));
    }
}
