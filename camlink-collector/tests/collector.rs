//! Collector against real senders on loopback.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use camlink_collector::config::{CollectorConfig, ListenerConfig, Protocol};
use camlink_collector::server::{CollectorServer, CollectorStats};
use camlink_core::wire::encode_header;
use camlink_core::{
    CaptureMode, Connection, Endpoint, Facing, Resolution, StartOrigin, Supervisor,
    SupervisorConfig, SyntheticBackend, SyntheticConfig, TransferHeader,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

// ── Helpers ──────────────────────────────────────────────────────

fn config(root: &Path, listeners: Vec<ListenerConfig>) -> CollectorConfig {
    let mut cfg = CollectorConfig::default();
    cfg.listeners = listeners
        .into_iter()
        .map(|mut l| {
            l.bind_address = "127.0.0.1".into();
            l
        })
        .collect();
    cfg.storage.receive_dir = root.to_string_lossy().into_owned();
    cfg
}

/// Bind and run a collector, returning its ports by label.
async fn start(cfg: &CollectorConfig) -> (Vec<(String, u16)>, Arc<CollectorStats>, Arc<AtomicBool>) {
    let server = CollectorServer::bind(cfg).await.unwrap();
    let ports = cfg
        .listeners
        .iter()
        .map(|l| (l.label.clone(), server.local_addr(&l.label).unwrap().port()))
        .collect();
    let stats = server.stats();
    let stop = server.stop_handle();
    tokio::spawn(server.run());
    // Let `run` flip the running flag before anyone stops it.
    tokio::time::sleep(Duration::from_millis(20)).await;
    (ports, stats, stop)
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|rd| {
            rd.filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// ── Streaming ────────────────────────────────────────────────────

#[tokio::test]
async fn stream_frames_become_files() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), vec![ListenerConfig::new("rear", 0, Protocol::Stream)]);
    let (ports, stats, stop) = start(&cfg).await;

    let endpoint = Endpoint::new("127.0.0.1", ports[0].1).unwrap();
    let mut conn = Connection::connect(&endpoint, Duration::from_secs(2)).await.unwrap();
    conn.send_frame(&Bytes::from_static(b"first")).await.unwrap();
    conn.send_frame(&Bytes::new()).await.unwrap();
    conn.send_frame(&Bytes::from_static(b"second")).await.unwrap();
    conn.close().await.unwrap();

    wait_until("three frames", || stats.snapshot().frames == 3).await;
    let names = files_in(&tmp.path().join("rear"));
    assert_eq!(names.len(), 2, "empty frames are not stored: {names:?}");
    assert!(names.iter().all(|n| n.ends_with(".jpg")));
    let bodies: Vec<Vec<u8>> = names
        .iter()
        .map(|n| std::fs::read(tmp.path().join("rear").join(n)).unwrap())
        .collect();
    assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec()]);
    stop.store(false, Ordering::SeqCst);
}

#[tokio::test]
async fn oversized_prefix_drops_the_connection() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = config(tmp.path(), vec![ListenerConfig::new("front", 0, Protocol::Stream)]);
    cfg.storage.max_frame_bytes = 1024;
    let (ports, stats, stop) = start(&cfg).await;

    let mut sock = TcpStream::connect(("127.0.0.1", ports[0].1)).await.unwrap();
    sock.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    sock.write_all(b"garbage").await.unwrap();

    // The collector hangs up instead of buffering 4 GiB.
    let mut buf = [0u8; 1];
    let n = tokio::time::timeout(Duration::from_secs(5), async {
        use tokio::io::AsyncReadExt;
        sock.read(&mut buf).await
    })
    .await
    .unwrap()
    .unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(stats.snapshot().frames, 0);
    stop.store(false, Ordering::SeqCst);
}

// ── Transfers ────────────────────────────────────────────────────

#[tokio::test]
async fn photo_transfer_is_read_until_close() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), vec![ListenerConfig::new("rear", 0, Protocol::Photo)]);
    let (ports, stats, stop) = start(&cfg).await;

    let mut sock = TcpStream::connect(("127.0.0.1", ports[0].1)).await.unwrap();
    let header = encode_header(&TransferHeader::until_close("../../etc/shot.jpg")).unwrap();
    sock.write_all(&header).await.unwrap();
    sock.write_all(b"photo bytes").await.unwrap();
    sock.shutdown().await.unwrap();

    wait_until("saved photo", || stats.snapshot().files_saved == 1).await;
    let names = files_in(&tmp.path().join("rear"));
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with("_shot.jpg"), "{names:?}");
    let body = std::fs::read(tmp.path().join("rear").join(&names[0])).unwrap();
    assert_eq!(body, b"photo bytes");
    stop.store(false, Ordering::SeqCst);
}

#[tokio::test]
async fn truncated_clip_is_discarded() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), vec![ListenerConfig::new("front", 0, Protocol::Clip)]);
    let (ports, stats, stop) = start(&cfg).await;

    let mut sock = TcpStream::connect(("127.0.0.1", ports[0].1)).await.unwrap();
    let header = encode_header(&TransferHeader::sized("clip.mjpeg", 100)).unwrap();
    sock.write_all(&header).await.unwrap();
    sock.write_all(&[7u8; 40]).await.unwrap();
    drop(sock);

    wait_until("discarded clip", || stats.snapshot().files_discarded == 1).await;
    assert!(files_in(&tmp.path().join("front")).is_empty());
    stop.store(false, Ordering::SeqCst);
}

// ── End to end ───────────────────────────────────────────────────

#[tokio::test]
async fn supervisor_streams_into_collector() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = config(
        tmp.path(),
        vec![
            ListenerConfig::new("rear", 0, Protocol::Stream),
            ListenerConfig::new("front", 0, Protocol::Stream),
        ],
    );
    let (ports, stats, stop) = start(&cfg).await;

    let camera = SyntheticConfig {
        fps: 30,
        sizes: vec![Resolution::new(64, 48)],
        ..SyntheticConfig::default()
    };
    let sup_config = SupervisorConfig {
        mode: CaptureMode::Stream,
        rear_port: ports[0].1,
        front_port: ports[1].1,
        target_resolution: Resolution::new(64, 48),
        min_frame_interval: Duration::from_millis(20),
        ..SupervisorConfig::default()
    };
    let (tx, _events) = mpsc::unbounded_channel();
    let mut sup = Supervisor::new(sup_config, Arc::new(SyntheticBackend::new(camera)), tx);
    sup.start(StartOrigin::Operator).unwrap();

    wait_until("frames from both cameras", || {
        files_in(&tmp.path().join("rear")).len() >= 2 && files_in(&tmp.path().join("front")).len() >= 2
    })
    .await;
    sup.shutdown().await;

    let rear = sup.stats(Facing::Back).unwrap();
    assert!(rear.frames_sent >= 2);
    assert!(stats.snapshot().connections >= 2);
    stop.store(false, Ordering::SeqCst);
}

#[tokio::test]
async fn supervisor_clips_land_as_complete_files() {
    let tmp = tempfile::tempdir().unwrap();
    let spool = tempfile::tempdir().unwrap();
    let cfg = config(tmp.path(), vec![ListenerConfig::new("rear", 0, Protocol::Clip)]);
    let (ports, stats, stop) = start(&cfg).await;

    let camera = SyntheticConfig {
        fps: 20,
        sizes: vec![Resolution::new(48, 32)],
        ..SyntheticConfig::default()
    };
    let sup_config = SupervisorConfig {
        mode: CaptureMode::Clip,
        facings: vec![Facing::Back],
        rear_port: ports[0].1,
        clip_duration: Duration::from_millis(200),
        burst_gap: Duration::from_millis(100),
        spool_dir: spool.path().to_path_buf(),
        ..SupervisorConfig::default()
    };
    let (tx, _events) = mpsc::unbounded_channel();
    let mut sup = Supervisor::new(sup_config, Arc::new(SyntheticBackend::new(camera)), tx);
    sup.start(StartOrigin::Operator).unwrap();

    wait_until("one clip", || stats.snapshot().files_saved >= 1).await;
    sup.shutdown().await;

    let names = files_in(&tmp.path().join("rear"));
    let clip = names
        .iter()
        .find(|n| n.ends_with(".mjpeg"))
        .expect("committed clip");
    assert!(clip.contains("_back_"));
    let body = std::fs::read(tmp.path().join("rear").join(clip)).unwrap();
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
    assert_eq!(stats.snapshot().files_discarded, 0);
    stop.store(false, Ordering::SeqCst);
}
