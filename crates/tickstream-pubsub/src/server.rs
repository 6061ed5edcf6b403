//! Pub-Sub Server
//!
//! Owns the TCP acceptor, the client list and the heartbeat task, all running
//! on a private tokio runtime so the thread-based data plane can call
//! [`PubServer::publish`] as a plain synchronous function.
//!
//! `publish` encodes the frame once, snapshots the client list under a short
//! mutex and hands a cheap handle of the encoded bytes to every authenticated
//! client whose subscription set matches the topic. Slow clients overflow
//! their own queue; nothing here ever blocks the caller.
//!
//! A 1 Hz heartbeat task sends a `Heartbeat` frame on the reserved topic to
//! every authenticated client and reaps clients whose connection stopped.
//!
//! Topics beginning with `replay.` are only routed while a matching virtual
//! prefix is registered; replay sessions register `replay.<session_id>` on
//! start and remove it when they terminate.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tickstream_core::codec;
use tickstream_core::frame::{Frame, HeartbeatBody};
use tickstream_core::FramePublisher;
use tickstream_observability::MetricsSink;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::client::{control_reader_task, writer_task, ClientConnection};
use crate::error::Result;

/// Prefix reserved for replayed streams; see virtual prefix registration.
const REPLAY_TOPIC_PREFIX: &str = "replay.";

#[derive(Debug, Clone)]
pub struct PubServerConfig {
    /// Listen port; 0 picks an ephemeral port (tests).
    pub port: u16,
    /// Shared secret expected in `auth` control records.
    pub auth_token: String,
}

impl Default for PubServerConfig {
    fn default() -> Self {
        Self {
            port: 9100,
            auth_token: "devtoken".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PubServerStats {
    pub total_connections: u64,
    pub active_clients: u64,
    pub frames_published: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub auth_failures: u64,
}

pub struct PubServer {
    config: PubServerConfig,
    sink: Arc<MetricsSink>,
    running: Arc<AtomicBool>,
    clients: Mutex<Vec<Arc<ClientConnection>>>,
    virtual_prefixes: Mutex<HashSet<String>>,
    local_addr: Mutex<Option<SocketAddr>>,
    runtime: Mutex<Option<tokio::runtime::Runtime>>,
    total_connections: AtomicU64,
    frames_published: AtomicU64,
}

impl PubServer {
    pub fn new(config: PubServerConfig, sink: Arc<MetricsSink>) -> Arc<Self> {
        Arc::new(Self {
            config,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            clients: Mutex::new(Vec::new()),
            virtual_prefixes: Mutex::new(HashSet::new()),
            local_addr: Mutex::new(None),
            runtime: Mutex::new(None),
            total_connections: AtomicU64::new(0),
            frames_published: AtomicU64::new(0),
        })
    }

    /// Bind the listener and spawn the acceptor and heartbeat tasks.
    /// A bind failure is returned to the caller; the server stays stopped.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = match std::net::TcpListener::bind(("0.0.0.0", self.config.port)) {
            Ok(listener) => listener,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                error!(port = self.config.port, error = %err, "pub-sub bind failed");
                return Err(err.into());
            }
        };
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap() = Some(addr);

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.spawn(accept_loop(self.clone(), listener));
        runtime.spawn(heartbeat_loop(self.clone()));
        *self.runtime.lock().unwrap() = Some(runtime);

        info!(%addr, "pub-sub server started");
        Ok(())
    }

    /// Stop accepting, ask every client to close, and tear down the runtime.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let clients = {
            let mut clients = self.clients.lock().unwrap();
            std::mem::take(&mut *clients)
        };
        for client in &clients {
            client.stop();
        }
        if let Some(runtime) = self.runtime.lock().unwrap().take() {
            // Give in-flight writers a beat to flush, then drop the reactor.
            std::thread::sleep(Duration::from_millis(50));
            runtime.shutdown_background();
        }
        self.sink.set_gauge("publisher_active_clients", 0.0);
        info!("pub-sub server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Actual bound address (meaningful after `start`, e.g. with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn active_clients(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn stats(&self) -> PubServerStats {
        let dropped_queue_full = self.sink.counter("publisher_frames_dropped_queue_full");
        let dropped_backpressure = self.sink.counter("publisher_frames_dropped_backpressure");
        PubServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_clients: self.active_clients() as u64,
            frames_published: self.frames_published.load(Ordering::Relaxed),
            frames_sent: self.sink.counter("publisher_frames_sent_total"),
            frames_dropped: dropped_queue_full + dropped_backpressure,
            auth_failures: self.sink.counter("publisher_auth_failures_total"),
        }
    }

    fn register_client(self: &Arc<Self>, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (client, rx) = ClientConnection::new(peer);

        {
            let mut clients = self.clients.lock().unwrap();
            clients.push(client.clone());
            self.sink
                .set_gauge("publisher_active_clients", clients.len() as f64);
        }
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        info!(%peer, "client connected");

        tokio::spawn(control_reader_task(
            client.clone(),
            read_half,
            self.config.auth_token.clone(),
            self.sink.clone(),
        ));
        tokio::spawn(writer_task(client, write_half, rx, self.sink.clone()));
    }

    /// A replay topic is routable only under a registered prefix.
    fn replay_topic_recognized(&self, topic: &str) -> bool {
        let prefixes = self.virtual_prefixes.lock().unwrap();
        prefixes.iter().any(|prefix| {
            topic
                .strip_prefix(prefix.as_str())
                .map(|rest| rest.is_empty() || rest.starts_with('.'))
                .unwrap_or(false)
        })
    }
}

impl FramePublisher for PubServer {
    fn publish(&self, topic: &str, frame: &Frame) {
        if !self.is_running() {
            return;
        }
        let _timer = self.sink.latency_timer("publisher_publish_ns");

        if topic.starts_with(REPLAY_TOPIC_PREFIX) && !self.replay_topic_recognized(topic) {
            self.sink
                .inc_counter("publisher_unknown_virtual_topic_total", 1);
            return;
        }

        let encoded = codec::encode(frame);
        let snapshot: Vec<Arc<ClientConnection>> =
            self.clients.lock().unwrap().clone();

        for client in &snapshot {
            if !client.is_authenticated() {
                continue;
            }
            if client.subscription_matches(topic) {
                client.enqueue_data(encoded.clone(), &self.sink);
            }
        }

        self.frames_published.fetch_add(1, Ordering::Relaxed);
        self.sink.inc_counter("publisher_frames_published_total", 1);
    }

    fn add_virtual_topic_prefix(&self, prefix: &str) {
        self.virtual_prefixes
            .lock()
            .unwrap()
            .insert(prefix.to_string());
        info!(prefix, "virtual topic prefix registered");
    }

    fn remove_virtual_topic_prefix(&self, prefix: &str) {
        self.virtual_prefixes.lock().unwrap().remove(prefix);
        info!(prefix, "virtual topic prefix removed");
    }
}

impl Drop for PubServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(server: Arc<PubServer>, listener: std::net::TcpListener) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to adopt listener into runtime");
            return;
        }
    };

    while server.is_running() {
        match listener.accept().await {
            Ok((stream, peer)) => server.register_client(stream, peer),
            Err(err) => {
                if server.is_running() {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn heartbeat_loop(server: Arc<PubServer>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if !server.is_running() {
            break;
        }

        // Reap clients whose connection has stopped.
        let snapshot: Vec<Arc<ClientConnection>> = {
            let mut clients = server.clients.lock().unwrap();
            clients.retain(|client| client.is_running());
            server
                .sink
                .set_gauge("publisher_active_clients", clients.len() as f64);
            clients.clone()
        };

        let ts_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let heartbeat = codec::encode(&Frame::Heartbeat(HeartbeatBody { ts_ns }));

        // Heartbeats go to every authenticated client, subscription or not.
        for client in &snapshot {
            if client.is_authenticated() {
                client.enqueue_data(heartbeat.clone(), &server.sink);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop() {
        let sink = Arc::new(MetricsSink::new());
        let server = PubServer::new(
            PubServerConfig {
                port: 0,
                auth_token: "secret".into(),
            },
            sink,
        );
        server.start().unwrap();
        assert!(server.is_running());
        assert!(server.local_addr().is_some());
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let sink = Arc::new(MetricsSink::new());
        let first = PubServer::new(
            PubServerConfig {
                port: 0,
                auth_token: "secret".into(),
            },
            sink.clone(),
        );
        first.start().unwrap();
        let taken_port = first.local_addr().unwrap().port();

        let second = PubServer::new(
            PubServerConfig {
                port: taken_port,
                auth_token: "secret".into(),
            },
            sink,
        );
        assert!(second.start().is_err());
        assert!(!second.is_running());
        first.stop();
    }

    #[test]
    fn test_publish_without_clients_is_noop() {
        let sink = Arc::new(MetricsSink::new());
        let server = PubServer::new(
            PubServerConfig {
                port: 0,
                auth_token: "secret".into(),
            },
            sink.clone(),
        );
        server.start().unwrap();
        server.publish(
            "l1.BTCUSDT",
            &Frame::Heartbeat(HeartbeatBody { ts_ns: 1 }),
        );
        assert_eq!(sink.counter("publisher_frames_published_total"), 1);
        server.stop();
    }

    #[test]
    fn test_replay_topics_require_registered_prefix() {
        let sink = Arc::new(MetricsSink::new());
        let server = PubServer::new(
            PubServerConfig {
                port: 0,
                auth_token: "secret".into(),
            },
            sink.clone(),
        );
        server.start().unwrap();
        let frame = Frame::Heartbeat(HeartbeatBody { ts_ns: 1 });

        server.publish("replay.rpl_0.l1.X", &frame);
        assert_eq!(sink.counter("publisher_unknown_virtual_topic_total"), 1);
        assert_eq!(sink.counter("publisher_frames_published_total"), 0);

        server.add_virtual_topic_prefix("replay.rpl_0");
        server.publish("replay.rpl_0.l1.X", &frame);
        assert_eq!(sink.counter("publisher_frames_published_total"), 1);

        // A different session id stays unrecognized.
        server.publish("replay.rpl_1.l1.X", &frame);
        assert_eq!(sink.counter("publisher_unknown_virtual_topic_total"), 2);

        server.remove_virtual_topic_prefix("replay.rpl_0");
        server.publish("replay.rpl_0.l1.X", &frame);
        assert_eq!(sink.counter("publisher_unknown_virtual_topic_total"), 3);
        server.stop();
    }
}
