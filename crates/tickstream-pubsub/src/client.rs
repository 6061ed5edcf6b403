//! Client Connection
//!
//! Each accepted socket gets a [`ClientConnection`] plus two tasks: a
//! control reader parsing newline-delimited JSON records, and a writer
//! draining the client's private bounded send queue to the socket.
//!
//! State machine: Connected → Authenticated → Subscribed* → Closing →
//! Closed. Control ops:
//!
//! | op            | precondition  | effect                          | ack |
//! |---------------|---------------|---------------------------------|-----|
//! | `auth`        | any           | authenticate against the token  | 200 / 401 + close |
//! | `subscribe`   | authenticated | append pattern entries          | 200 |
//! | `unsubscribe` | authenticated | remove matching entries         | 200 |
//! | other/garbage | any           | none                            | 400 |
//!
//! Every ack is a `ControlAck` frame on the same socket. Acks bypass the
//! authentication gate (a failed auth must still see its 401 before the
//! close); data frames and heartbeats require the authenticated state.
//!
//! The send queue is a bounded `mpsc` of pre-encoded frames. When it is
//! full the frame is dropped and counted — under
//! `publisher_frames_dropped_backpressure` if any of the client's
//! subscriptions is lossless, else `publisher_frames_dropped_queue_full`.
//! Closing drops the queue's sender, so the writer drains what was already
//! queued before shutting the socket down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tickstream_core::codec;
use tickstream_core::frame::{ControlAckBody, Frame};
use tickstream_observability::MetricsSink;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::subscription::TopicSubscription;

/// Capacity of a client's private send queue, in frames.
pub const MAX_QUEUE_SIZE: usize = 10_000;

/// Writer drains up to this many queued frames into one socket write.
const WRITE_BATCH: usize = 100;

pub struct ClientConnection {
    peer: SocketAddr,
    authenticated: AtomicBool,
    running: AtomicBool,
    subscriptions: Mutex<Vec<TopicSubscription>>,
    /// Dropped on close so the writer drains and exits.
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    stop_notify: Notify,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl ClientConnection {
    pub(crate) fn new(peer: SocketAddr) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(MAX_QUEUE_SIZE);
        let client = Arc::new(Self {
            peer,
            authenticated: AtomicBool::new(false),
            running: AtomicBool::new(true),
            subscriptions: Mutex::new(Vec::new()),
            sender: Mutex::new(Some(tx)),
            stop_notify: Notify::new(),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        });
        (client, rx)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// Transition to Closing: no new frames are accepted, the writer drains
    /// what is queued and closes the socket, the reader unblocks.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.sender.lock().unwrap() = None;
        // notify_one leaves a permit behind if the reader is not parked yet.
        self.stop_notify.notify_one();
    }

    pub fn subscription_matches(&self, topic: &str) -> bool {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .any(|sub| sub.matches(topic))
    }

    pub fn subscriptions(&self) -> Vec<TopicSubscription> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Enqueue an encoded data frame for an authenticated client. Returns
    /// whether the frame was queued; overflow drops and counts.
    pub(crate) fn enqueue_data(&self, encoded: Bytes, sink: &MetricsSink) -> bool {
        if !self.is_running() || !self.is_authenticated() {
            return false;
        }
        let guard = self.sender.lock().unwrap();
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        match sender.try_send(encoded) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                let lossless = self
                    .subscriptions
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|sub| sub.lossless);
                // Lossless overflow is still a drop today, but it is counted
                // apart so the policy can change without losing the signal.
                let counter = if lossless {
                    "publisher_frames_dropped_backpressure"
                } else {
                    "publisher_frames_dropped_queue_full"
                };
                sink.inc_counter(counter, 1);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue a `ControlAck` frame. Unlike data frames this works in any
    /// state, so a rejected client still sees its 401.
    pub(crate) fn enqueue_ack(&self, ack_code: u32) {
        let encoded = codec::encode(&Frame::ControlAck(ControlAckBody::new(ack_code)));
        let guard = self.sender.lock().unwrap();
        if let Some(sender) = guard.as_ref() {
            let _ = sender.try_send(encoded);
        }
    }

    fn add_subscriptions(&self, topics: &[String], lossless: bool) {
        let mut subs = self.subscriptions.lock().unwrap();
        for topic in topics {
            subs.push(TopicSubscription::new(topic.clone(), lossless));
        }
    }

    fn remove_subscriptions(&self, topics: &[String]) {
        let mut subs = self.subscriptions.lock().unwrap();
        subs.retain(|sub| !topics.iter().any(|t| t == &sub.pattern));
    }
}

/// Inbound control record. Unknown fields are ignored; missing ones default.
#[derive(Debug, Deserialize)]
struct ControlRecord {
    #[serde(default)]
    op: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    lossless: bool,
}

/// Reads newline-delimited control records until EOF, error or stop.
pub(crate) async fn control_reader_task(
    client: Arc<ClientConnection>,
    read_half: OwnedReadHalf,
    auth_token: String,
    sink: Arc<MetricsSink>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            _ = client.stop_notify.notified() => break,
            result = reader.read_line(&mut line) => match result {
                Ok(0) => {
                    client.stop();
                    break;
                }
                Ok(_) => {
                    let message = line.trim();
                    if !message.is_empty() {
                        process_control_message(&client, message, &auth_token, &sink);
                    }
                    if !client.is_running() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(peer = %client.peer(), error = %err, "control read failed");
                    client.stop();
                    break;
                }
            }
        }
    }
}

fn process_control_message(
    client: &Arc<ClientConnection>,
    message: &str,
    auth_token: &str,
    sink: &MetricsSink,
) {
    let record: ControlRecord = match serde_json::from_str(message) {
        Ok(record) => record,
        Err(err) => {
            warn!(peer = %client.peer(), error = %err, "malformed control record");
            sink.inc_counter("publisher_protocol_errors_total", 1);
            client.enqueue_ack(400);
            return;
        }
    };

    match record.op.as_str() {
        "auth" => {
            if record.token == auth_token {
                client.authenticated.store(true, Ordering::SeqCst);
                client.enqueue_ack(200);
                info!(peer = %client.peer(), "client authenticated");
            } else {
                client.enqueue_ack(401);
                sink.inc_counter("publisher_auth_failures_total", 1);
                warn!(peer = %client.peer(), "authentication failed");
                // Dropping the sender lets the queued 401 flush first.
                client.stop();
            }
        }
        "subscribe" => {
            if !client.is_authenticated() {
                client.enqueue_ack(401);
                return;
            }
            if record.topics.is_empty() {
                sink.inc_counter("publisher_protocol_errors_total", 1);
                client.enqueue_ack(400);
                return;
            }
            client.add_subscriptions(&record.topics, record.lossless);
            sink.inc_counter("publisher_subscriptions_total", record.topics.len() as u64);
            info!(
                peer = %client.peer(),
                topics = ?record.topics,
                lossless = record.lossless,
                "client subscribed"
            );
            client.enqueue_ack(200);
        }
        "unsubscribe" => {
            if !client.is_authenticated() {
                client.enqueue_ack(401);
                return;
            }
            client.remove_subscriptions(&record.topics);
            client.enqueue_ack(200);
        }
        other => {
            warn!(peer = %client.peer(), op = other, "unknown control op");
            sink.inc_counter("publisher_protocol_errors_total", 1);
            client.enqueue_ack(400);
        }
    }
}

/// Drains the send queue to the socket in batches. Exits when the queue
/// closes (client stopped) or a write fails; either way the socket is shut
/// down and the client is marked stopped.
pub(crate) async fn writer_task(
    client: Arc<ClientConnection>,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    sink: Arc<MetricsSink>,
) {
    let mut buffer = BytesMut::with_capacity(64 * 1024);

    while let Some(first) = rx.recv().await {
        buffer.clear();
        buffer.extend_from_slice(&first);
        let mut batched = 1u64;
        while batched < WRITE_BATCH as u64 {
            match rx.try_recv() {
                Ok(next) => {
                    buffer.extend_from_slice(&next);
                    batched += 1;
                }
                Err(_) => break,
            }
        }

        if let Err(err) = write_half.write_all(&buffer).await {
            warn!(peer = %client.peer(), error = %err, "socket write failed");
            client.stop();
            break;
        }
        client.frames_sent.fetch_add(batched, Ordering::Relaxed);
        sink.inc_counter("publisher_frames_sent_total", batched);
    }

    let _ = write_half.shutdown().await;
    client.stop();
    info!(peer = %client.peer(), "client connection closed");
}
