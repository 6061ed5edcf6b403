//! Whole-system tests: mock feed through normalization, distribution,
//! recording and live pub-sub delivery, then replay of the recorded data
//! back through the publisher to a subscribed socket.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use tickstream_core::codec;
use tickstream_core::frame::{Frame, MsgType, FRAME_HEADER_LEN};
use tickstream_server::{Config, MarketDataCore};
use tickstream_storage::MdfHeader;

fn test_config(data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.network.pubsub_port = 0;
    config.security.token = "e2e-token".into();
    config.storage.dir = data_dir.to_path_buf();
    config.storage.fsync_interval_ms = 10;
    config.pipeline.normalizer_threads = 2;
    config.feeds.symbols = vec!["BTCUSDT".into()];
    config.feeds.l1_rate = 2_000;
    config.feeds.l2_rate = 500;
    config.feeds.trade_rate = 200;
    config
}

struct WireClient {
    stream: TcpStream,
}

impl WireClient {
    fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        Self { stream }
    }

    fn send_line(&mut self, line: &str) {
        self.stream.write_all(line.as_bytes()).unwrap();
        self.stream.write_all(b"\n").unwrap();
    }

    fn read_frame(&mut self) -> Frame {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.stream.read_exact(&mut header).unwrap();
        let body_len = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
        let mut buf = vec![0u8; FRAME_HEADER_LEN + body_len];
        buf[..FRAME_HEADER_LEN].copy_from_slice(&header);
        self.stream.read_exact(&mut buf[FRAME_HEADER_LEN..]).unwrap();
        codec::decode(&buf).unwrap()
    }

    /// Read frames until the next control ack (heartbeats may interleave).
    fn expect_ack(&mut self, code: u32) {
        loop {
            match self.read_frame() {
                Frame::ControlAck(ack) => {
                    assert_eq!(ack.ack_code, code);
                    return;
                }
                Frame::Heartbeat(_) => continue,
                other => panic!("expected ControlAck({}), got {:?}", code, other),
            }
        }
    }

    fn handshake(&mut self, subscriptions: &[&str]) {
        self.send_line(r#"{"op":"auth","token":"e2e-token"}"#);
        self.expect_ack(200);
        let topics: Vec<String> = subscriptions.iter().map(|t| format!("\"{}\"", t)).collect();
        self.send_line(&format!(
            r#"{{"op":"subscribe","topics":[{}]}}"#,
            topics.join(",")
        ));
        self.expect_ack(200);
    }
}

fn mdf_files(dir: &Path) -> Vec<std::path::PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "mdf").unwrap_or(false))
        .collect()
}

#[test]
fn test_live_pipeline_delivers_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let core = MarketDataCore::new(test_config(dir.path()));
    core.start();

    let addr = core.publisher_addr().expect("publisher bound");
    let mut client = WireClient::connect(addr);
    client.handshake(&["l1.*"]);

    // A live L1 frame must arrive from the synthetic feed.
    let frame = loop {
        let frame = client.read_frame();
        if frame.msg_type() == MsgType::L1 {
            break frame;
        }
    };
    let Frame::L1(body) = frame else { unreachable!() };
    assert!(body.bid_px > 0);
    assert!(body.ask_px > body.bid_px);
    assert!(body.seq > 0);

    // The registry learned the symbol from the feed.
    let symbols = core.list_symbols();
    assert!(symbols.iter().any(|(_, name)| name == "BTCUSDT"));

    // Health and metrics reflect actual flow.
    let deadline = Instant::now() + Duration::from_secs(5);
    while core.health().recorder.frames_written == 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    let health = core.health();
    assert!(health.feed.total_events > 0);
    assert!(health.normalizer.frames_output > 0);
    assert!(health.recorder.frames_written > 0);
    assert!(!health.publisher_degraded);
    assert_eq!(health.publisher.active_clients, 1);

    let metrics = core.metrics();
    assert!(metrics.counters["publisher_frames_published_total"] > 0);
    assert!(metrics.histograms.contains_key("normalize_event_ns"));

    core.stop();

    // The recorder left a finalized file pair behind.
    let files = mdf_files(dir.path());
    assert!(!files.is_empty(), "no .mdf files were produced");
    let header = MdfHeader::read_from(&files[0]).unwrap();
    assert!(header.frame_count > 0);
    assert!(header.start_ts_ns <= header.end_ts_ns);
}

#[test]
fn test_recorded_data_replays_through_publisher() {
    let dir = tempfile::tempdir().unwrap();

    // Phase 1: produce a recording.
    {
        let core = MarketDataCore::new(test_config(dir.path()));
        core.start();
        let deadline = Instant::now() + Duration::from_secs(10);
        while core.health().recorder.frames_written < 500 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        core.stop();
    }
    let files = mdf_files(dir.path());
    assert!(!files.is_empty());
    let header = MdfHeader::read_from(&files[0]).unwrap();
    assert!(header.frame_count >= 500);

    // Phase 2: a fresh core (no live feed) replays the recorded range.
    let mut config = test_config(dir.path());
    config.feeds.mock_enabled = false;
    let core = MarketDataCore::new(config);
    core.start();

    let addr = core.publisher_addr().unwrap();
    let mut client = WireClient::connect(addr);
    client.handshake(&["replay.*"]);

    let session_id = core
        .replay_start(
            header.start_ts_ns,
            header.end_ts_ns + 1,
            vec!["*".into()],
            100.0,
        )
        .unwrap();

    // Replayed market-data frames arrive on the subscribed socket.
    let mut data_frames = 0;
    while data_frames < 10 {
        let frame = client.read_frame();
        match frame.msg_type() {
            MsgType::Heartbeat => continue,
            MsgType::L1 | MsgType::L2 | MsgType::Trade => {
                assert!(frame.ts_ns().unwrap() >= header.start_ts_ns);
                data_frames += 1;
            }
            other => panic!("unexpected frame type {:?}", other),
        }
    }

    // The session winds down and reports its progress.
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let sessions = core.replay_sessions();
        let info = sessions
            .iter()
            .find(|info| info.session_id == session_id)
            .expect("session listed");
        if !info.running {
            assert!(info.frames_sent >= 10);
            break;
        }
        if Instant::now() > deadline {
            panic!("replay session did not finish");
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    core.replay_stop(&session_id);
    assert!(core.replay_sessions().is_empty());
    core.stop();
}
