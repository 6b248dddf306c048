//! One WebSocket shard.
//!
//! Each shard owns a hash-assigned slice of the token universe, keeps its
//! connection alive with pings, re-subscribes from scratch after every
//! reconnect, and feeds parsed price changes into the shared buffer. Frames
//! are paced because the server drops connections that receive bursts.

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::buffer::PriceBuffer;
use super::SharedTokenMap;

/// Maximum token ids per subscription frame.
pub const SUBSCRIBE_CHUNK: usize = 500;

/// Exponential backoff is capped here while attempts remain.
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// After the attempt budget is spent, retry at this constant cadence
/// forever; a shard never gives up.
const LATE_RETRY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub(crate) struct ShardConfig {
    pub url: String,
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
    pub ping_interval: Duration,
    pub frame_spacing: Duration,
}

#[derive(Debug)]
pub(crate) enum ShardCommand {
    /// Replace the shard's assigned token set; already-subscribed tokens are
    /// kept, new ones get subscribe frames.
    Assign(Vec<String>),
}

pub(crate) struct ShardHandle {
    pub index: usize,
    command_tx: mpsc::Sender<ShardCommand>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ShardHandle {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn command_sender(&self) -> mpsc::Sender<ShardCommand> {
        self.command_tx.clone()
    }

    pub(crate) async fn join(self) {
        let _ = self.task.await;
    }
}

/// Stable shard assignment: FNV-1a 32-bit of the token id, mod shard count.
#[must_use]
pub fn fnv1a_32(input: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[must_use]
pub fn shard_for_token(token_id: &str, shards: usize) -> usize {
    (fnv1a_32(token_id) % shards.max(1) as u32) as usize
}

/// Backoff: `min(base * 2^(attempts-1), 30s)` while attempts remain, then a
/// constant 60 s.
fn reconnect_delay(attempts: u32, base: Duration, max_attempts: u32) -> Duration {
    if attempts > max_attempts {
        return LATE_RETRY;
    }
    let shift = attempts.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << shift).min(BACKOFF_CAP)
}

#[derive(Serialize)]
struct SubscribeFrame<'a> {
    #[serde(rename = "type")]
    channel: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    operation: Option<&'static str>,
    assets_ids: &'a [String],
}

/// Serializes one subscription frame. The first frame after `open` carries
/// no operation; later frames are explicit subscribes.
fn subscribe_frame(tokens: &[String], initial: bool) -> String {
    serde_json::to_string(&SubscribeFrame {
        channel: "market",
        operation: if initial { None } else { Some("subscribe") },
        assets_ids: tokens,
    })
    .unwrap_or_default()
}

/// Extracts `(token_id, price)` pairs from an inbound frame.
///
/// Plaintext status tokens and JSON arrays (order-book snapshots) are
/// ignored; only objects carrying a `price_changes` array contribute.
#[must_use]
pub fn parse_price_changes(text: &str) -> Vec<(String, Decimal)> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return Vec::new();
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Vec::new();
    };
    let Some(changes) = value.get("price_changes").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    changes
        .iter()
        .filter_map(|change| {
            let token = change.get("asset_id")?.as_str()?;
            let price = match change.get("price")? {
                serde_json::Value::String(s) => mirror_upstream::models::parse_decimal(s)?,
                serde_json::Value::Number(n) => {
                    Decimal::try_from(n.as_f64()?).ok()?
                }
                _ => return None,
            };
            Some((token.to_string(), price))
        })
        .collect()
}

pub(crate) fn spawn_shard(
    index: usize,
    config: ShardConfig,
    assigned: Vec<String>,
    buffer: Arc<PriceBuffer>,
    token_map: SharedTokenMap,
    shutdown: watch::Receiver<bool>,
) -> ShardHandle {
    let (command_tx, command_rx) = mpsc::channel(8);
    let connected = Arc::new(AtomicBool::new(false));
    let connected_flag = Arc::clone(&connected);

    let task = tokio::spawn(run_shard(
        index,
        config,
        assigned,
        buffer,
        token_map,
        command_rx,
        shutdown,
        connected_flag,
    ));

    ShardHandle {
        index,
        command_tx,
        connected,
        task,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_shard(
    index: usize,
    config: ShardConfig,
    mut assigned: Vec<String>,
    buffer: Arc<PriceBuffer>,
    token_map: SharedTokenMap,
    mut command_rx: mpsc::Receiver<ShardCommand>,
    mut shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
) {
    let mut attempts: u32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }

        match connect_async(config.url.as_str()).await {
            Ok((ws, _)) => {
                tracing::info!(shard = index, tokens = assigned.len(), "shard connected");
                connected.store(true, Ordering::Release);
                attempts = 0;
                let closed = drive_connection(
                    index,
                    &config,
                    ws,
                    &mut assigned,
                    &buffer,
                    &token_map,
                    &mut command_rx,
                    &mut shutdown,
                )
                .await;
                connected.store(false, Ordering::Release);
                match closed {
                    Closed::Shutdown => break,
                    Closed::Dropped(reason) => {
                        tracing::warn!(shard = index, %reason, "shard connection dropped");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(shard = index, error = %e, "shard connect failed");
            }
        }

        attempts += 1;
        let delay = reconnect_delay(attempts, config.reconnect_base, config.max_reconnect_attempts);
        tracing::debug!(shard = index, attempts, delay_ms = delay.as_millis() as u64, "reconnect backoff");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!(shard = index, "shard stopped");
}

enum Closed {
    Shutdown,
    Dropped(String),
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

#[allow(clippy::too_many_arguments)]
async fn drive_connection(
    index: usize,
    config: &ShardConfig,
    ws: WsStream,
    assigned: &mut Vec<String>,
    buffer: &PriceBuffer,
    token_map: &SharedTokenMap,
    command_rx: &mut mpsc::Receiver<ShardCommand>,
    shutdown: &mut watch::Receiver<bool>,
) -> Closed {
    let (mut write, mut read) = ws.split();

    // Fresh connection: the server has no memory of us, so the whole
    // assigned set is re-sent, one initial frame then subscribe frames.
    let mut subscribed: HashSet<String> = HashSet::new();
    if let Err(e) = send_subscriptions(&mut write, assigned, true, config.frame_spacing).await {
        return Closed::Dropped(e.to_string());
    }
    subscribed.extend(assigned.iter().cloned());

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping.tick().await; // the first tick is immediate

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    let _ = write.close().await;
                    return Closed::Shutdown;
                }
            }
            command = command_rx.recv() => {
                match command {
                    Some(ShardCommand::Assign(tokens)) => {
                        *assigned = tokens;
                        let to_add: Vec<String> = assigned
                            .iter()
                            .filter(|t| !subscribed.contains(*t))
                            .cloned()
                            .collect();
                        // Tokens that left the shard are not unsubscribed;
                        // stale subscriptions decay with the connection.
                        if !to_add.is_empty() {
                            tracing::debug!(shard = index, adding = to_add.len(), "resubscribing new tokens");
                            if let Err(e) = send_subscriptions(&mut write, &to_add, false, config.frame_spacing).await {
                                return Closed::Dropped(e.to_string());
                            }
                            subscribed.extend(to_add);
                        }
                    }
                    None => {
                        let _ = write.close().await;
                        return Closed::Shutdown;
                    }
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    return Closed::Dropped(e.to_string());
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        ingest_text(&text, buffer, token_map);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Closed::Dropped("server closed the connection".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Closed::Dropped(e.to_string());
                    }
                }
            }
        }
    }
}

fn ingest_text(text: &str, buffer: &PriceBuffer, token_map: &SharedTokenMap) {
    let changes = parse_price_changes(text);
    if changes.is_empty() {
        return;
    }
    let map = Arc::clone(&token_map.read());
    for (token, price) in changes {
        if let Some(market_id) = map.get(&token) {
            buffer.insert(&token, market_id, price);
        }
    }
}

async fn send_subscriptions<S>(
    write: &mut S,
    tokens: &[String],
    include_initial: bool,
    spacing: Duration,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let chunks: Vec<&[String]> = tokens.chunks(SUBSCRIBE_CHUNK).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        let frame = subscribe_frame(chunk, include_initial && i == 0);
        write.send(Message::Text(frame)).await?;
        if i + 1 < chunks.len() {
            tokio::time::sleep(spacing).await;
        }
    }
    Ok(())
}
