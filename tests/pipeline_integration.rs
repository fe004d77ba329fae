//! Pipeline Integration Tests
//!
//! Router and Display run in-process on real Unix sockets inside a temp
//! directory; the test plays the Reader by writing batch announcements.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cell_locator::geo::{EstimateError, PathLossModel};
use cell_locator::protocol::{encode_batch, write_record};
use cell_locator::roles::display::{BatchReport, DisplayServer, DisplayState};
use cell_locator::roles::router::Router;
use cell_locator::tower_db::{parse_csv, TowerDatabase};
use cell_locator::transport::{RetryPolicy, UnixConnector, DisplayLink};
use cell_locator::types::{ObservationBatch, TowerObservation};

const TOWERS_CSV: &str = "\
radio,mcc,net,area,cell,unit,lon,lat,range,samples,changeable,created,updated,averageSignal
GSM,250,1,27911,101,,1.0,1.0,1000,5,1,1459813819,1459813819,0
GSM,250,1,27911,102,,1.0,11.0,1000,5,1,1459813819,1459813819,0
GSM,250,1,27911,103,,11.0,1.0,1000,5,1,1459813819,1459813819,0
GSM,250,2,7801,5001,,37.62,55.75,1000,5,1,1459813819,1459813819,0
";

const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

struct DisplayHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    reports: mpsc::UnboundedReceiver<BatchReport>,
}

impl DisplayHandle {
    fn start(path: &Path) -> Self {
        let listener = UnixListener::bind(path).expect("bind display");
        let (tx, reports) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut server =
                DisplayServer::new(listener, DisplayState::new(PathLossModel::default())).with_reports(tx);
            server.run(&token).await.expect("display loop");
        });
        Self { cancel, task, reports }
    }

    async fn next_report(&mut self) -> BatchReport {
        tokio::time::timeout(REPORT_TIMEOUT, self.reports.recv())
            .await
            .expect("report in time")
            .expect("display still running")
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.expect("display task");
    }
}

fn database() -> Arc<TowerDatabase> {
    Arc::new(TowerDatabase::from_records(parse_csv(TOWERS_CSV, true)))
}

fn start_router(dir: &Path, cancel: &CancellationToken) -> JoinHandle<()> {
    let listener = UnixListener::bind(dir.join("router.sock")).expect("bind router");
    let display_path = dir.join("display.sock");
    let cancel = cancel.clone();
    tokio::spawn(async move {
        let link = DisplayLink::new(
            UnixConnector::new(&display_path),
            RetryPolicy {
                max_attempts: 5,
                delay: Duration::from_millis(20),
            },
        );
        let mut router = Router::new(database(), link);
        router.connect_display().await.expect("router reaches display");
        router.run(&listener, &cancel).await.expect("router loop");
    })
}

fn batch(towers: &[(u16, u32, i32)]) -> ObservationBatch {
    let mut batch = ObservationBatch::new();
    for &(operator_code, cell_id, signal_level) in towers {
        batch
            .push(TowerObservation {
                country_code: 250,
                operator_code,
                cell_id,
                region_code: None,
                signal_level,
            })
            .expect("room in batch");
    }
    batch
}

async fn announce(reader: &mut UnixStream, batch: &ObservationBatch) {
    write_record(reader, &encode_batch(batch)).await.expect("announce batch");
}

#[tokio::test]
async fn three_known_towers_produce_estimate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut display = DisplayHandle::start(&dir.path().join("display.sock"));
    let cancel = CancellationToken::new();
    let router = start_router(dir.path(), &cancel);

    let mut reader = UnixStream::connect(dir.path().join("router.sock")).await.expect("reader connect");
    announce(&mut reader, &batch(&[(1, 101, 40), (1, 103, 40), (1, 102, 40)])).await;

    let report = display.next_report().await;
    assert_eq!(report.towers.len(), 3);
    let location = report.estimate.expect("estimate");
    assert!((location.latitude - 6.0).abs() < 1e-6, "{location}");
    assert!((location.longitude - 6.0).abs() < 1e-6, "{location}");
    assert_eq!(report.history, vec![location]);

    cancel.cancel();
    router.await.expect("router task");
    display.stop().await;
}

#[tokio::test]
async fn unknown_towers_yield_no_estimate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut display = DisplayHandle::start(&dir.path().join("display.sock"));
    let cancel = CancellationToken::new();
    let router = start_router(dir.path(), &cancel);

    let mut reader = UnixStream::connect(dir.path().join("router.sock")).await.expect("reader connect");
    // One tower the database knows, two it does not.
    announce(&mut reader, &batch(&[(2, 5001, 45), (1, 9998, 38), (1, 9999, 33)])).await;

    let report = display.next_report().await;
    assert_eq!(report.towers.len(), 3);
    assert!(report.towers[1].1.is_unresolved());
    assert!(report.towers[2].1.is_unresolved());
    assert_eq!(report.estimate, Err(EstimateError::SingularGeometry));
    assert!(report.history.is_empty());

    // Too few towers also yields nothing, and history stays empty.
    announce(&mut reader, &batch(&[(2, 5001, 45)])).await;
    let report = display.next_report().await;
    assert_eq!(report.estimate, Err(EstimateError::InsufficientTowers { have: 1 }));
    assert!(report.history.is_empty());

    cancel.cancel();
    router.await.expect("router task");
    display.stop().await;
}

#[tokio::test]
async fn router_accepts_next_reader_after_close() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut display = DisplayHandle::start(&dir.path().join("display.sock"));
    let cancel = CancellationToken::new();
    let router = start_router(dir.path(), &cancel);

    let mut first = UnixStream::connect(dir.path().join("router.sock")).await.expect("first reader");
    announce(&mut first, &batch(&[(1, 101, 40)])).await;
    assert_eq!(display.next_report().await.towers.len(), 1);
    drop(first);

    let mut second = UnixStream::connect(dir.path().join("router.sock")).await.expect("second reader");
    announce(&mut second, &batch(&[(1, 101, 40), (1, 103, 40), (1, 102, 40)])).await;
    let report = display.next_report().await;
    assert!(report.estimate.is_ok());
    assert_eq!(report.history.len(), 1);

    cancel.cancel();
    router.await.expect("router task");
    display.stop().await;
}

#[tokio::test]
async fn router_reconnects_to_restarted_display() {
    let dir = tempfile::tempdir().expect("tempdir");
    let display_path = dir.path().join("display.sock");
    let mut display = DisplayHandle::start(&display_path);
    let cancel = CancellationToken::new();
    let router = start_router(dir.path(), &cancel);

    let mut reader = UnixStream::connect(dir.path().join("router.sock")).await.expect("reader connect");
    let full = batch(&[(1, 101, 40), (1, 103, 40), (1, 102, 40)]);
    announce(&mut reader, &full).await;
    assert!(display.next_report().await.estimate.is_ok());

    // Display goes away and comes back on the same path.
    display.stop().await;
    std::fs::remove_file(&display_path).expect("remove display socket");
    let mut display = DisplayHandle::start(&display_path);

    announce(&mut reader, &full).await;
    let report = display.next_report().await;
    assert_eq!(report.towers.len(), 3, "the failed record is re-sent, none lost");
    assert!(report.estimate.is_ok());
    // The restarted display starts with an empty history.
    assert_eq!(report.history.len(), 1);

    cancel.cancel();
    router.await.expect("router task");
    display.stop().await;
}
